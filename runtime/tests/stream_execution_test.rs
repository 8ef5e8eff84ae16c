//! Integration tests for `Effect::Stream` execution and cancellation in the Store runtime
//!
//! Streams model the long-running sources of the check-in flow (decode loops,
//! channel feeds): items must reach the reducer in order, and `Effect::Cancel`
//! must stop them for good.

#![allow(clippy::unwrap_used)] // Integration tests can use unwrap for assertions

use futures::stream;
use std::time::Duration;
use turnstile_core::{
    effect::{Effect, EffectId},
    reducer::Reducer,
    smallvec, SmallVec,
};
use turnstile_runtime::Store;

const FEED: EffectId = EffectId::new("feed");

#[derive(Clone, Debug, Default)]
struct FeedState {
    received: Vec<(u32, u32)>,
    generation: u32,
}

#[derive(Clone, Debug)]
enum FeedAction {
    StartFinite { items: Vec<u32> },
    StartEndless,
    Restart,
    Stop,
    Item { generation: u32, value: u32 },
}

#[derive(Clone)]
struct FeedReducer;

fn endless(generation: u32) -> Effect<FeedAction> {
    let ticks = stream::unfold(0, move |value| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Some((FeedAction::Item { generation, value }, value + 1))
    });
    Effect::Stream(Box::pin(ticks)).cancellable(FEED)
}

impl Reducer for FeedReducer {
    type State = FeedState;
    type Action = FeedAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        _env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            FeedAction::StartFinite { items } => {
                let generation = state.generation;
                smallvec![Effect::Stream(Box::pin(stream::iter(
                    items
                        .into_iter()
                        .map(move |value| FeedAction::Item { generation, value }),
                )))]
            },
            FeedAction::StartEndless => smallvec![endless(state.generation)],
            FeedAction::Restart => {
                state.generation += 1;
                smallvec![Effect::Cancel(FEED), endless(state.generation)]
            },
            FeedAction::Stop => smallvec![Effect::Cancel(FEED)],
            FeedAction::Item { generation, value } => {
                state.received.push((generation, value));
                smallvec![Effect::None]
            },
        }
    }
}

#[tokio::test]
async fn test_stream_items_arrive_in_order() {
    let store = Store::new(FeedState::default(), FeedReducer, ());
    let items: Vec<u32> = (0..100).collect();

    let mut handle = store
        .send(FeedAction::StartFinite { items: items.clone() })
        .await
        .unwrap();
    handle.wait_with_timeout(Duration::from_secs(2)).await.unwrap();

    let received: Vec<u32> = store
        .state(|s| s.received.iter().map(|(_, v)| *v).collect())
        .await;
    assert_eq!(received, items);
}

#[tokio::test]
async fn test_cancel_completes_the_effect_handle() {
    let store = Store::new(FeedState::default(), FeedReducer, ());

    let mut handle = store.send(FeedAction::StartEndless).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(handle.pending(), 1);

    let _ = store.send(FeedAction::Stop).await.unwrap();
    handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

    let count = store.state(|s| s.received.len()).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(store.state(|s| s.received.len()).await, count);
}

#[tokio::test]
async fn test_restart_leaves_exactly_one_live_feed() {
    let store = Store::new(FeedState::default(), FeedReducer, ());

    let _ = store.send(FeedAction::StartEndless).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = store.send(FeedAction::Restart).await.unwrap();
    assert_eq!(store.running(FEED), 1);

    tokio::time::sleep(Duration::from_millis(40)).await;
    let _ = store.send(FeedAction::Stop).await.unwrap();

    // Once the first feed is gone, everything after its last item is from generation 1
    let received = store.state(|s| s.received.clone()).await;
    let first_new = received.iter().position(|(g, _)| *g == 1).unwrap();
    assert!(received[first_new..].iter().all(|(g, _)| *g == 1));
}
