//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use turnstile_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// When several actions are given, they are reduced in order and the effect
/// assertions see only the effects of the **last** action.
///
/// # Example
///
/// ```ignore
/// use turnstile_testing::ReducerTest;
///
/// ReducerTest::new(ScannerReducer::new())
///     .with_env(test_environment())
///     .given_state(capturing_state())
///     .when_actions(vec![decoded("TICKET-001"), decoded("TICKET-001")])
///     .then_effects(|effects| assertions::assert_no_effects(effects))
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    actions: Vec<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            actions: Vec::new(),
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Add an action to reduce (When)
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.actions.push(action);
        self
    }

    /// Add several actions to reduce in order (When)
    #[must_use]
    pub fn when_actions(mut self, actions: impl IntoIterator<Item = A>) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the effects of the last action (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, actions, or environment are not set,
    /// or if any assertions fail.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        assert!(
            !self.actions.is_empty(),
            "At least one action must be set with when_action()"
        );

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        let mut effects = Vec::new();
        for action in self.actions {
            effects = self.reducer.reduce(&mut state, action, &env).into_vec();
        }

        for assertion in self.state_assertions {
            assertion(&state);
        }

        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use turnstile_core::effect::{Effect, EffectId};

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if effects is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(|e| matches!(e, Effect::None)),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Assert that effects contain at least one Future effect
    ///
    /// # Panics
    ///
    /// Panics if no Future effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        fn any_future<A>(effect: &Effect<A>) -> bool {
            match effect {
                Effect::Future(_) => true,
                Effect::Parallel(effects) | Effect::Sequential(effects) => {
                    effects.iter().any(any_future)
                },
                Effect::Cancellable { effect, .. } => any_future(effect),
                _ => false,
            }
        }

        assert!(
            effects.iter().any(any_future),
            "Expected at least one Future effect, but none found"
        );
    }

    /// Assert that the effects cancel everything registered under `id`
    ///
    /// # Panics
    ///
    /// Panics if no `Cancel(id)` effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_cancels<A>(effects: &[Effect<A>], id: EffectId) {
        assert!(
            effects.iter().any(|e| e.cancels(id)),
            "Expected a Cancel({id}) effect, but none found"
        );
    }

    /// Assert that the effects start something registered under `id`
    ///
    /// # Panics
    ///
    /// Panics if no effect is registered under `id`.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_registers<A>(effects: &[Effect<A>], id: EffectId) {
        assert!(
            effects.iter().any(|e| e.registers(id)),
            "Expected an effect registered under {id}, but none found"
        );
    }

    /// Assert that nothing in the effects is registered under `id`
    ///
    /// # Panics
    ///
    /// Panics if an effect is registered under `id`.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_not_registers<A>(effects: &[Effect<A>], id: EffectId) {
        assert!(
            !effects.iter().any(|e| e.registers(id)),
            "Expected no effect registered under {id}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::effect::{Effect, EffectId};
    use turnstile_core::reducer::Reducer;

    const ALARM: EffectId = EffectId::new("alarm");

    #[derive(Clone, Debug, PartialEq)]
    enum Gate {
        Locked,
        Unlocked,
    }

    #[derive(Clone, Debug)]
    enum GateAction {
        Coin,
        Push,
    }

    struct GateReducer;

    struct GateEnv;

    impl Reducer for GateReducer {
        type State = Gate;
        type Action = GateAction;
        type Environment = GateEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> smallvec::SmallVec<[Effect<Self::Action>; 4]> {
            match (&*state, action) {
                (Gate::Locked, GateAction::Coin) => {
                    *state = Gate::Unlocked;
                    smallvec::smallvec![Effect::Cancel(ALARM)]
                },
                (Gate::Unlocked, GateAction::Push) => {
                    *state = Gate::Locked;
                    smallvec::smallvec![Effect::None]
                },
                (Gate::Locked, GateAction::Push) => smallvec::smallvec![
                    Effect::Future(Box::pin(async { None })).cancellable(ALARM)
                ],
                (Gate::Unlocked, GateAction::Coin) => smallvec::smallvec![Effect::None],
            }
        }
    }

    #[test]
    fn test_coin_unlocks_and_silences_alarm() {
        ReducerTest::new(GateReducer)
            .with_env(GateEnv)
            .given_state(Gate::Locked)
            .when_action(GateAction::Coin)
            .then_state(|state| assert_eq!(*state, Gate::Unlocked))
            .then_effects(|effects| assertions::assert_cancels(effects, ALARM))
            .run();
    }

    #[test]
    fn test_effects_come_from_last_action() {
        ReducerTest::new(GateReducer)
            .with_env(GateEnv)
            .given_state(Gate::Locked)
            .when_actions([GateAction::Coin, GateAction::Push, GateAction::Push])
            .then_state(|state| assert_eq!(*state, Gate::Locked))
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_registers(effects, ALARM);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_assertions_no_effects() {
        assertions::assert_no_effects::<GateAction>(&[Effect::None]);
        assertions::assert_no_effects::<GateAction>(&[]);
        assertions::assert_not_registers::<GateAction>(&[Effect::None], ALARM);
    }
}
