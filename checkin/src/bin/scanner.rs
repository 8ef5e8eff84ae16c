//! Door scanner.
//!
//! Reads a keyboard-wedge QR reader (or typed codes) from stdin. Lines starting
//! with `:` are operator commands, everything else is a decode from the reader:
//!
//! ```text
//! :login <operator token>   authenticate this scanner
//! :again                    scan the next ticket
//! :retry                    retry opening the reader
//! :stop                     stop scanning, keep the session
//! :logout                   release the reader and forget the session
//! :quit                     exit, keeping the stored session
//! ```
//!
//! `--demo` runs against an in-process backend that knows operator `VALID123`
//! and tickets `TICKET-001` to `TICKET-003`.

use checkin::{
    mocks::MockBackend, CheckInGateway, Config, FileSessionStorage, HttpGateway,
    LineCaptureDevice, MemorySessionStorage, OperatorToken, ScanPhase, ScannerAction,
    ScannerEnvironment, ScannerReducer, ScannerState, SessionStorage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_core::environment::SystemClock;
use turnstile_runtime::Store;

type ScannerStore = Store<ScannerState, ScannerAction, ScannerEnvironment, ScannerReducer>;

/// One line of operator input.
enum Input {
    Action(ScannerAction),
    Decode(String),
    Quit,
    Unknown(String),
}

fn parse(line: &str) -> Input {
    let Some(command) = line.trim().strip_prefix(':') else {
        return Input::Decode(line.to_string());
    };

    let (name, argument) = command
        .split_once(char::is_whitespace)
        .unwrap_or((command, ""));

    match name {
        "login" => Input::Action(ScannerAction::Authenticate {
            operator_token: OperatorToken::new(argument),
        }),
        "again" => Input::Action(ScannerAction::ScanAgain),
        "retry" => Input::Action(ScannerAction::RetryCapture),
        "stop" => Input::Action(ScannerAction::StopScanning),
        "logout" => Input::Action(ScannerAction::Logout),
        "quit" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

fn hint(phase: &ScanPhase) -> &'static str {
    match phase {
        ScanPhase::Idle => "type :login <operator token>",
        ScanPhase::Capturing => "present a ticket",
        ScanPhase::Settled(_) | ScanPhase::Stopped => "type :again for the next ticket",
        ScanPhase::CaptureFailed(_) => "type :retry",
        _ => "",
    }
}

async fn render(store: &ScannerStore, last: &mut Option<(&'static str, Option<String>)>) {
    let (phase, message, hint) = store
        .state(|s| (s.phase.name(), s.message.clone(), hint(&s.phase)))
        .await;

    let current = Some((phase, message));
    if *last == current {
        return;
    }
    if let Some((phase, message)) = &current {
        match message {
            Some(message) => println!("[{phase}] {message}"),
            None => println!("[{phase}]"),
        }
        if !hint.is_empty() {
            println!("  {hint}");
        }
    }
    *last = current;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let mut config = Config::from_env();

    // Logs go to stderr so the door messages on stdout stay readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let demo = std::env::args().any(|arg| arg == "--demo");
    if demo && config.event_id.is_empty() {
        config.event_id = "demo".to_string();
    }
    if config.event_id.is_empty() {
        return Err("CHECKIN_EVENT_ID is not set".into());
    }

    info!(
        api_url = %config.api.base_url,
        event_id = %config.event_id,
        demo,
        "Starting scanner"
    );

    let gateway: Arc<dyn CheckInGateway> = if demo {
        let event = config.event_id.as_str();
        MockBackend::new()
            .with_operator("VALID123", event, "sess-abc")
            .with_ticket("TICKET-001", event, "Ana")
            .with_ticket("TICKET-002", event, "Bruno")
            .with_ticket("TICKET-003", event, "Carla")
            .into_shared()
    } else {
        Arc::new(HttpGateway::new(
            config.api.base_url.clone(),
            config.api.request_timeout(),
        )?)
    };

    let storage: Arc<dyn SessionStorage> = match &config.session_file {
        Some(path) => Arc::new(FileSessionStorage::new(path)),
        None => MemorySessionStorage::shared(),
    };

    let reader = LineCaptureDevice::new(64);
    let env = ScannerEnvironment::new(
        gateway,
        storage,
        Arc::new(reader.clone()),
        Arc::new(SystemClock),
        config.event_id.clone(),
    );
    let store = Store::new(ScannerState::new(), ScannerReducer::new(), env);

    store.send(ScannerAction::RestoreSession).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(100));
    let mut last = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tick.tick() => render(&store, &mut last).await,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse(&line) {
                    Input::Action(action) => {
                        store.send(action).await?;
                    },
                    Input::Decode(code) => reader.feed(&code),
                    Input::Quit => break,
                    Input::Unknown(name) => println!("unknown command :{name}"),
                }
            },
        }
    }

    info!("Shutting down scanner");
    store.send(ScannerAction::StopScanning).await?;
    if let Err(error) = store.shutdown(Duration::from_secs(5)).await {
        warn!(error = %error, "Scanner did not shut down cleanly");
    }

    Ok(())
}
