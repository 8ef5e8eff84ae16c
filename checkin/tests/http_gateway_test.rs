//! HTTP contract of the token swap, checked against a mock server.
//!
//! Run with: `cargo test -p checkin --test http_gateway_test`

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use checkin::gateway::UNREACHABLE_PREFIX;
use checkin::{
    CheckInError, CheckInGateway, DecodedCode, HttpGateway, OperatorToken, ValidationError,
    ValidationSession,
};
use serde_json::json;
use std::time::Duration;
use turnstile_core::environment::Clock;
use turnstile_testing::test_clock;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session() -> ValidationSession {
    ValidationSession {
        session_token: "sess-abc".to_string(),
        event_id: "evt-1".to_string(),
        issued_at: test_clock().now(),
    }
}

fn gateway(server: &MockServer) -> HttpGateway {
    HttpGateway::new(server.uri(), Duration::from_millis(500)).unwrap()
}

#[tokio::test]
async fn operator_token_rides_in_the_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/validate"))
        .and(header("authorization", "Bearer VALID123"))
        .and(body_json(json!({})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "validated": true, "validationToken": "sess-abc" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let token = gateway(&server)
        .exchange_operator_token(&OperatorToken::new("VALID123"))
        .await
        .unwrap();

    assert_eq!(token, "sess-abc");
}

#[tokio::test]
async fn scan_swaps_the_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets/scan"))
        .and(header("authorization", "Bearer TICKET-001"))
        .and(body_json(json!({ "dispositiveToken": "sess-abc" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "Entrada confirmada",
            "user": { "id": "user-7" },
            "ticket": { "eventId": "evt-1" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = gateway(&server)
        .validate(&DecodedCode::new("TICKET-001"), &session())
        .await
        .unwrap();

    assert_eq!(result.message, "Entrada confirmada");
    assert_eq!(result.user.unwrap().id, "user-7");
    assert_eq!(result.ticket.unwrap().event_id, "evt-1");
}

#[tokio::test]
async fn refused_scan_surfaces_backend_message_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets/scan"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "message": "Ticket já utilizado" })),
        )
        .mount(&server)
        .await;

    let error = gateway(&server)
        .validate(&DecodedCode::new("TICKET-001"), &session())
        .await
        .unwrap_err();

    assert_eq!(
        error,
        ValidationError::Rejected {
            message: "Ticket já utilizado".to_string()
        }
    );
    assert_eq!(error.display_message(), "Ticket já utilizado");
}

#[tokio::test]
async fn slow_scan_times_out_as_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets/scan"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "message": "Entrada confirmada" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let error = gateway(&server)
        .validate(&DecodedCode::new("TICKET-001"), &session())
        .await
        .unwrap_err();

    assert!(matches!(error, ValidationError::NetworkFailure { .. }));
}

#[tokio::test]
async fn unreadable_success_body_is_a_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets/scan"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let error = gateway(&server)
        .validate(&DecodedCode::new("TICKET-001"), &session())
        .await
        .unwrap_err();

    assert!(matches!(error, ValidationError::NetworkFailure { .. }));
}

#[tokio::test]
async fn unvalidated_operator_is_an_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "validated": false,
            "message": "Token de operador inválido",
        })))
        .mount(&server)
        .await;

    let error = gateway(&server)
        .exchange_operator_token(&OperatorToken::new("NOPE"))
        .await
        .unwrap_err();

    assert_eq!(
        error,
        CheckInError::Auth {
            message: "Token de operador inválido".to_string()
        }
    );
}

#[tokio::test]
async fn refused_operator_falls_back_to_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/validate"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let error = gateway(&server)
        .exchange_operator_token(&OperatorToken::new("NOPE"))
        .await
        .unwrap_err();

    assert_eq!(error.display_message(), "Request refused (HTTP 401)");
}

#[tokio::test]
async fn unreachable_backend_fails_without_hanging() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let gateway = HttpGateway::new(uri, Duration::from_millis(500)).unwrap();
    let error = gateway
        .validate(&DecodedCode::new("TICKET-001"), &session())
        .await
        .unwrap_err();

    assert!(matches!(error, ValidationError::NetworkFailure { .. }));
}

#[tokio::test]
async fn unreachable_backend_during_login_is_not_a_bad_token() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let gateway = HttpGateway::new(uri, Duration::from_millis(500)).unwrap();
    let error = gateway
        .exchange_operator_token(&OperatorToken::new("VALID123"))
        .await
        .unwrap_err();

    let CheckInError::Auth { message } = error else {
        panic!("expected an auth error, got {error:?}");
    };
    assert!(message.starts_with(UNREACHABLE_PREFIX), "{message}");
}
