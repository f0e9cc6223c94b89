//! Router and command handling against a simulated line

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use sorter_core::{Result, SorterConfig, SorterEvent};
use sorter_engine::SortingLine;
use sorter_eye::UnavailableVision;
use sorter_hal::{BackendProvider, SelectedBackend, SimulatedBackend};
use sorter_server::websocket::handle_message;
use sorter_server::{router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

fn simulated_line() -> Arc<SortingLine> {
    let config = SorterConfig::default();
    let provider: Arc<dyn BackendProvider> =
        Arc::new(|config: &SorterConfig| -> Result<SelectedBackend> {
            Ok(SelectedBackend::new(Arc::new(SimulatedBackend::new(config)?)))
        });
    let selected = provider.select(&config).unwrap();
    Arc::new(SortingLine::with_backend(
        config,
        selected,
        provider,
        Arc::new(UnavailableVision::new("no model in tests")),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_health_reports_state_and_counters() {
    let line = simulated_line();
    let app = router(AppState::new(line.clone()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["state"], "Idle");
    assert_eq!(json["class"], "idle");
    assert_eq!(json["capabilities"], "simulated");
    assert_eq!(json["running"], false);
    assert_eq!(json["counters"]["total"], 0);

    line.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unknown_route_is_not_found() {
    let line = simulated_line();
    let response = router(AppState::new(line.clone()))
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    line.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_malformed_command_answers_sender_only() {
    let line = simulated_line();
    let mut events = line.subscribe_events();
    let (tx, mut rx) = mpsc::unbounded_channel();

    handle_message(line.control(), "not json", &tx).await;
    handle_message(line.control(), r#"{"type":"command","action":"dance"}"#, &tx).await;

    for _ in 0..2 {
        match rx.recv().await.unwrap() {
            SorterEvent::Log { message } => assert!(message.starts_with("Invalid command: ")),
            other => panic!("unexpected reply {:?}", other),
        }
    }
    assert!(events.try_recv().is_err());
    assert_eq!(line.engine().state(), sorter_core::EngineState::Idle);

    line.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_command_reaches_control_surface() {
    let line = simulated_line();
    let mut events = line.subscribe_events();
    let (tx, mut rx) = mpsc::unbounded_channel();

    handle_message(
        line.control(),
        r#"{"type":"command","action":"manual_arm_home"}"#,
        &tx,
    )
    .await;

    assert_eq!(
        events.recv().await.unwrap(),
        SorterEvent::log("Arm moved to home position")
    );
    assert!(rx.try_recv().is_err());

    line.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_then_stop_over_commands() {
    let line = simulated_line();
    let (tx, _rx) = mpsc::unbounded_channel();

    handle_message(line.control(), r#"{"action":"start"}"#, &tx).await;
    assert!(line.control().is_running());

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle_message(line.control(), r#"{"type":"command","action":"stop"}"#, &tx).await;
    assert!(!line.control().is_running());

    line.shutdown(Duration::from_secs(5)).await.unwrap();
}
