//! Declarative macros for ergonomic effect construction
//!
//! These macros reduce boilerplate when reducers describe async work, delays,
//! long-running action sources and cancellable effects.

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust,ignore
/// use turnstile_core::async_effect;
///
/// async_effect! {
///     let result = gateway.validate(&code, &session).await;
///     Some(ScannerAction::AdmissionSettled { epoch, result })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use turnstile_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(2),
///     action: RosterAction::Resubscribe
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}

/// Create an `Effect::Stream` registered under a cancellation id
///
/// # Example
///
/// ```rust,ignore
/// use turnstile_core::cancellable_stream;
///
/// cancellable_stream! {
///     id: DECODE_LOOP,
///     stream: decodes.map(|code| ScannerAction::CodeDecoded { capture, code })
/// }
/// ```
#[macro_export]
macro_rules! cancellable_stream {
    (
        id: $id:expr,
        stream: $stream:expr
    ) => {
        $crate::effect::Effect::Cancellable {
            id: $id,
            effect: ::std::boxed::Box::new($crate::effect::Effect::Stream(
                ::std::boxed::Box::pin($stream),
            )),
        }
    };
}
