//! HTTP endpoints for the payment terminal
//!
//! Under the configured base path (default `/api`):
//! - `POST /efectivo/monto {amount}` opens a payment session
//! - `GET /efectivo/estado` waits for the next payment event
//! - `POST /efectivo/pagar {amount}` credits the session manually
//!
//! Plus `GET /metrics` (Prometheus) and `GET /health` at the root.

use crate::domain::types::PaymentCompletedEvent;
use crate::domain::Money;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::controller::ControllerHandle;
use crate::services::error::ControllerError;
use crate::services::event_bus::{EventBus, StatusOutcome};
use crate::services::session::{CreditOutcome, COMPLETED_MESSAGE, IN_PROGRESS_MESSAGE};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Everything a request handler needs
pub struct HttpState {
    controller: ControllerHandle,
    bus: EventBus,
    metrics: Arc<Metrics>,
    base_path: String,
    site_id: String,
    status_timeout: Duration,
    max_amount: Money,
}

impl HttpState {
    pub fn new(
        config: &Config,
        controller: ControllerHandle,
        bus: EventBus,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            controller,
            bus,
            metrics,
            base_path: config.http_base_path().to_string(),
            site_id: config.site_id().to_string(),
            status_timeout: Duration::from_millis(config.status_timeout_ms()),
            max_amount: config.max_amount(),
        }
    }
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

fn error_response(status: StatusCode, error: &ControllerError) -> Response<Full<Bytes>> {
    json_response(status, json!({ "message": error.to_string() }))
}

fn timestamp() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// `{"amount": <positive number up to max>}` → amount in cents
pub fn parse_amount(body: &[u8], max: Money) -> Option<Money> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let amount = value.get("amount")?;
    if !amount.is_number() {
        return None;
    }
    Money::from_decimal(amount.as_f64()?).filter(|&amount| amount <= max)
}

fn controller_error(error: ControllerError) -> Response<Full<Bytes>> {
    let status = match error {
        ControllerError::InvalidAmount => StatusCode::BAD_REQUEST,
        ControllerError::NoActiveSession => StatusCode::CONFLICT,
        ControllerError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, &error)
}

async fn request_amount(state: &HttpState, body: &[u8]) -> Response<Full<Bytes>> {
    let Some(amount) = parse_amount(body, state.max_amount) else {
        debug!(body = %String::from_utf8_lossy(body), "http_amount_rejected");
        return error_response(StatusCode::BAD_REQUEST, &ControllerError::InvalidAmount);
    };

    match state.controller.request_amount(amount).await {
        Ok(status) => json_response(
            StatusCode::OK,
            json!({
                "TotalMonedero": status.total,
                "BilletesAceptados": status.accepted_bills,
            }),
        ),
        Err(e) => controller_error(e),
    }
}

fn completed_body(event: &PaymentCompletedEvent) -> Value {
    json!({
        "success": true,
        "code": "PAYMENT_COMPLETED",
        "EstadoPago": "completado",
        "TotalPagado": event.total_paid,
        "timestamp": timestamp(),
    })
}

async fn payment_status(state: &HttpState) -> Response<Full<Bytes>> {
    let mut subscription = state.bus.subscribe();
    match subscription.wait_status(state.status_timeout).await {
        StatusOutcome::Completed(event) => json_response(StatusCode::OK, completed_body(&event)),
        StatusOutcome::InProgress(_) => json_response(
            StatusCode::OK,
            json!({
                "success": true,
                "code": "PAYMENT_IN_PROGRESS",
                "EstadoPago": "en proceso",
                "timestamp": timestamp(),
            }),
        ),
        StatusOutcome::TimedOut => {
            info!(timeout_ms = %state.status_timeout.as_millis(), "payment_status_timeout");
            json_response(
                StatusCode::REQUEST_TIMEOUT,
                json!({
                    "success": false,
                    "code": "PAYMENT_TIMEOUT",
                    "message": "La operación de pago ha excedido el tiempo de espera",
                    "details": {
                        "maxWaitTime": format!("{} segundos", state.status_timeout.as_secs()),
                        "suggestion": "Por favor, intente realizar el pago nuevamente",
                    },
                }),
            )
        }
        StatusOutcome::Closed => controller_error(ControllerError::Unavailable),
    }
}

async fn manual_payment(state: &HttpState, body: &[u8]) -> Response<Full<Bytes>> {
    let Some(amount) = parse_amount(body, state.max_amount) else {
        debug!(body = %String::from_utf8_lossy(body), "http_credit_rejected");
        return error_response(StatusCode::BAD_REQUEST, &ControllerError::InvalidAmount);
    };

    match state.controller.credit(amount).await {
        Ok(CreditOutcome::InProgress { accumulated, .. }) => json_response(
            StatusCode::OK,
            json!({ "message": IN_PROGRESS_MESSAGE, "totalPaid": accumulated }),
        ),
        Ok(CreditOutcome::Completed(done)) => json_response(
            StatusCode::OK,
            json!({
                "message": COMPLETED_MESSAGE,
                "totalPaid": done.total_paid,
                "change": done.change.is_positive().then_some(done.change),
            }),
        ),
        Ok(CreditOutcome::NoSession) => controller_error(ControllerError::NoActiveSession),
        Ok(CreditOutcome::Overflow) => controller_error(ControllerError::InvalidAmount),
        Err(e) => controller_error(e),
    }
}

/// Dispatch one request; independent of the transport so tests can call it
pub async fn route(
    state: &HttpState,
    method: &Method,
    path: &str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let local = path.strip_prefix(state.base_path.as_str()).unwrap_or("");

    match (method, path, local) {
        (&Method::GET, "/metrics", _) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Full::new(Bytes::from(format_prometheus_metrics(
                &state.metrics,
                &state.site_id,
            ))))
            .expect("static response should not fail"),
        (&Method::GET, "/health", _) => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),
        (&Method::POST, _, "/efectivo/monto") => request_amount(state, &body).await,
        (&Method::GET, _, "/efectivo/estado") => payment_status(state).await,
        (&Method::POST, _, "/efectivo/pagar") => manual_payment(state, &body).await,
        // CORS preflight for the payment endpoints
        (&Method::OPTIONS, _, local) if local.starts_with("/efectivo/") => Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail"),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail"),
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<HttpState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "http_body_read_failed");
            return Ok(error_response(StatusCode::BAD_REQUEST, &ControllerError::InvalidAmount));
        }
    };
    Ok(route(&state, &parts.method, parts.uri.path(), body).await)
}

/// Start the HTTP server
pub async fn start_http_server(
    addr: SocketAddr,
    state: Arc<HttpState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    info!(addr = %addr, base_path = %state.base_path, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
