//! HTTP routing against a running controller task

use async_trait::async_trait;
use bytes::Bytes;
use cash_gateway::domain::types::Device;
use cash_gateway::domain::Money;
use cash_gateway::infra::{Config, Metrics};
use cash_gateway::io::http::route;
use cash_gateway::io::{CommandSink, DeviceCommand, DeviceFrame, Frame, HttpState};
use cash_gateway::services::{
    create_controller_channel, CashController, ControllerSettings, EventBus,
};
use http_body_util::BodyExt;
use hyper::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Tube reply holding 21.70 Bs of change
const TUBE_REPLY: &str = "02000A00000C08060A000000000000000000000000001003";

struct StubSink {
    device: Device,
}

#[async_trait]
impl CommandSink for StubSink {
    fn device(&self) -> Device {
        self.device
    }

    async fn send(&self, _command: DeviceCommand) {}

    async fn query(&self, _command: DeviceCommand, _timeout: Duration) -> Option<Frame> {
        hex::decode(TUBE_REPLY).ok().map(Frame::new)
    }
}

struct Gateway {
    state: Arc<HttpState>,
    frames: mpsc::Sender<DeviceFrame>,
    _shutdown: watch::Sender<bool>,
}

fn gateway(config: Config) -> Gateway {
    let bus = EventBus::default();
    let metrics = Arc::new(Metrics::new());
    let (handle, requests) = create_controller_channel(8);
    let (frames, frame_rx) = mpsc::channel(8);
    let (shutdown, shutdown_rx) = watch::channel(false);

    let controller = CashController::new(
        ControllerSettings::from_config(&config),
        Arc::new(StubSink { device: Device::BillAcceptor }),
        Arc::new(StubSink { device: Device::CoinChanger }),
        bus.clone(),
        metrics.clone(),
    );
    tokio::spawn(controller.run(frame_rx, requests, shutdown_rx));

    let state = Arc::new(HttpState::new(&config, handle, bus, metrics));
    Gateway { state, frames, _shutdown: shutdown }
}

async fn call(gw: &Gateway, method: Method, path: &str, body: &str) -> (StatusCode, Bytes) {
    let response = route(&gw.state, &method, path, Bytes::from(body.to_string())).await;
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn call_json(gw: &Gateway, method: Method, path: &str, body: &str) -> (StatusCode, Value) {
    let (status, body) = call(gw, method, path, body).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_health_and_not_found() {
    let gw = gateway(Config::default());

    let (status, body) = call(&gw, Method::GET, "/health", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");

    let (status, _) = call(&gw, Method::GET, "/api/efectivo/otro", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Payment routes only live under the base path
    let (status, _) = call(&gw, Method::POST, "/efectivo/monto", r#"{"amount": 5}"#).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_request_amount_validation() {
    let gw = gateway(Config::default());

    for body in [r#"{"amount": 0}"#, r#"{"amount": -2}"#, r#"{"amount": "5"}"#, "{}", "nope"] {
        let (status, json) = call_json(&gw, Method::POST, "/api/efectivo/monto", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(json, json!({ "message": "Monto inválido" }));
    }
}

#[tokio::test(start_paused = true)]
async fn test_amounts_above_ceiling_are_rejected() {
    let gw = gateway(Config::default());

    let (status, json) =
        call_json(&gw, Method::POST, "/api/efectivo/monto", r#"{"amount": 9e16}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({ "message": "Monto inválido" }));

    let (status, _) = call(&gw, Method::POST, "/api/efectivo/monto", r#"{"amount": 5}"#).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) =
        call_json(&gw, Method::POST, "/api/efectivo/pagar", r#"{"amount": 5e16}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({ "message": "Monto inválido" }));
}

#[tokio::test(start_paused = true)]
async fn test_overflowing_credit_keeps_controller_alive() {
    let gw = gateway(Config::default().with_max_amount(Money::from_cents(i64::MAX)));

    let (status, _) =
        call(&gw, Method::POST, "/api/efectivo/monto", r#"{"amount": 9e16}"#).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) =
        call_json(&gw, Method::POST, "/api/efectivo/pagar", r#"{"amount": 5e16}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Pago en progreso");

    let (status, json) =
        call_json(&gw, Method::POST, "/api/efectivo/pagar", r#"{"amount": 5e16}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({ "message": "Monto inválido" }));

    // The controller task is still serving requests
    let (status, json) =
        call_json(&gw, Method::POST, "/api/efectivo/monto", r#"{"amount": 30}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["TotalMonedero"], 21.7);
}

#[tokio::test(start_paused = true)]
async fn test_request_amount_reports_tube_status() {
    let gw = gateway(Config::default());

    let (status, json) =
        call_json(&gw, Method::POST, "/api/efectivo/monto", r#"{"amount": 30}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "TotalMonedero": 21.7, "BilletesAceptados": [10, 20] }));
}

#[tokio::test(start_paused = true)]
async fn test_manual_payment_without_session_conflicts() {
    let gw = gateway(Config::default());

    let (status, json) =
        call_json(&gw, Method::POST, "/api/efectivo/pagar", r#"{"amount": 5}"#).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json, json!({ "message": "No hay un pago en curso" }));
}

#[tokio::test(start_paused = true)]
async fn test_manual_payment_flow() {
    let gw = gateway(Config::default());
    call_json(&gw, Method::POST, "/api/efectivo/monto", r#"{"amount": 5}"#).await;

    let (status, json) =
        call_json(&gw, Method::POST, "/api/efectivo/pagar", r#"{"amount": 3}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Pago en progreso");
    assert_eq!(json["totalPaid"], 3.0);

    let (status, json) =
        call_json(&gw, Method::POST, "/api/efectivo/pagar", r#"{"amount": 4}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Pago completado");
    assert_eq!(json["totalPaid"], 7.0);
    assert_eq!(json["change"], 2.0);

    let (status, _) = call(&gw, Method::POST, "/api/efectivo/pagar", r#"{"amount": 1}"#).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test(start_paused = true)]
async fn test_status_times_out() {
    let gw = gateway(Config::default());

    let started = tokio::time::Instant::now();
    let (status, json) = call_json(&gw, Method::GET, "/api/efectivo/estado", "").await;

    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "PAYMENT_TIMEOUT");
    assert_eq!(json["details"]["maxWaitTime"], "120 segundos");
    assert!(started.elapsed() >= Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_status_sees_completion() {
    let gw = Arc::new(gateway(Config::default().with_status_timeout_ms(5_000)));
    call_json(&gw, Method::POST, "/api/efectivo/monto", r#"{"amount": 5}"#).await;

    let waiter = {
        let gw = gw.clone();
        tokio::spawn(async move { call_json(&gw, Method::GET, "/api/efectivo/estado", "").await })
    };
    // Let the waiter subscribe before the coin lands
    tokio::time::sleep(Duration::from_millis(10)).await;

    gw.frames
        .send(DeviceFrame {
            device: Device::CoinChanger,
            frame: Frame::from(&[0x06, 0x00, 0x00, 0x55, 0x00, 0x10, 0x03][..]),
            received_at: tokio::time::Instant::now(),
        })
        .await
        .unwrap();

    let (status, json) = waiter.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], "PAYMENT_COMPLETED");
    assert_eq!(json["EstadoPago"], "completado");
    assert_eq!(json["TotalPagado"], "5.00");
    assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test(start_paused = true)]
async fn test_metrics_endpoint() {
    let gw = gateway(Config::default());
    call_json(&gw, Method::POST, "/api/efectivo/monto", r#"{"amount": 5}"#).await;

    let (status, body) = call(&gw, Method::GET, "/metrics", "").await;
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("cash_sessions_started_total{site=\"cash-gateway\"} 1"));
}
