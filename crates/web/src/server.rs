//! Trigger server implementation

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use vouchflow_common::{PaymentCard, StartRequest, StartResponse};

use crate::admission::RunGuard;
use crate::runner::AutomationRunner;

const SERVICE_NAME: &str = "vouchflow";

/// Trigger server state
#[derive(Clone)]
pub struct TriggerServer {
    state: Arc<ServerState>,
}

struct ServerState {
    guard: RunGuard,
    runner: Arc<dyn AutomationRunner>,
    default_card: PaymentCard,
    /// Cancelled on shutdown; each run gets a child token
    shutdown: CancellationToken,
}

impl TriggerServer {
    pub fn new(runner: Arc<dyn AutomationRunner>, default_card: PaymentCard) -> Self {
        Self {
            state: Arc::new(ServerState {
                guard: RunGuard::new(),
                runner,
                default_card,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn guard(&self) -> &RunGuard {
        &self.state.guard
    }

    /// Token that cancels in-flight runs when fired
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/start", post(start_handler))
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until Ctrl-C, then cancel whatever is running.
    ///
    /// A cancelled run stops at its next browser step, OTP wait or SafeKey
    /// check, then closes its browser.
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!("Trigger server starting on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let shutdown = self.shutdown_token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {}", e);
                    return;
                }
                info!("Shutting down, cancelling in-flight runs");
                shutdown.cancel();
            })
            .await?;

        Ok(())
    }
}

fn reply(status: StatusCode, success: bool, message: impl Into<String>) -> Response {
    (
        status,
        Json(StartResponse {
            success,
            message: message.into(),
        }),
    )
        .into_response()
}

/// Empty body selects the default card
fn parse_start_request(body: &[u8]) -> Result<StartRequest, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartRequest::default());
    }
    serde_json::from_slice(body)
}

// ============================================================================
// Handlers
// ============================================================================

async fn start_handler(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let request = match parse_start_request(&body) {
        Ok(request) => request,
        Err(e) => return reply(StatusCode::BAD_REQUEST, false, format!("Invalid request body: {}", e)),
    };
    let card = request.card.unwrap_or(state.default_card);

    let Some(permit) = state.guard.try_acquire(card) else {
        warn!("Rejecting start request, automation already running");
        return reply(StatusCode::CONFLICT, false, "Automation already running");
    };

    let run_id = permit.info().id.clone();
    info!(run = %run_id, "Starting automation with {} card", card);

    // The task owns the permit, so a dropped connection cannot strand the guard
    let runner = state.runner.clone();
    let cancel = state.shutdown.child_token();
    let task = tokio::spawn(async move {
        let result = runner.run(card, cancel).await;
        match &result {
            Ok(_) => permit.release(true, "Automation completed successfully"),
            Err(e) => permit.release(false, e.to_string()),
        }
        result
    });

    match task.await {
        Ok(Ok(report)) => {
            info!(run = %run_id, verdict = ?report.verdict, "Automation completed successfully");
            reply(StatusCode::OK, true, "Automation completed successfully")
        }
        Ok(Err(e)) => {
            error!(run = %run_id, "Automation failed: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, false, e.to_string())
        }
        Err(e) => {
            error!(run = %run_id, "Automation task aborted: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, false, "Automation task aborted")
        }
    }
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "busy": state.guard.is_busy(),
    }))
}

async fn status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.guard.status()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use parking_lot::Mutex;
    use tokio::sync::Notify;
    use tower::ServiceExt;
    use vouchflow_browser::{CheckoutReport, FlowError, FlowResult, PageVerdict};
    use vouchflow_common::{RendezvousError, SecretKind, ServiceStatus};

    use super::*;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        /// Wait for `release` (or cancellation) before succeeding
        Block,
    }

    struct FakeRunner {
        behaviour: Behaviour,
        release: Notify,
        calls: AtomicUsize,
        cards: Mutex<Vec<PaymentCard>>,
    }

    impl FakeRunner {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                release: Notify::new(),
                calls: AtomicUsize::new(0),
                cards: Mutex::new(Vec::new()),
            })
        }
    }

    fn report(card: PaymentCard) -> CheckoutReport {
        CheckoutReport {
            card,
            final_url: "https://www.gyftr.com/done".to_string(),
            verdict: PageVerdict::Inconclusive,
            voucher: None,
            published: false,
            duration: Duration::ZERO,
        }
    }

    #[async_trait]
    impl AutomationRunner for FakeRunner {
        async fn run(&self, card: PaymentCard, cancel: CancellationToken) -> FlowResult<CheckoutReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cards.lock().push(card);

            match self.behaviour {
                Behaviour::Succeed => Ok(report(card)),
                Behaviour::Fail => Err(FlowError::Rendezvous(RendezvousError::Exhausted {
                    kind: SecretKind::MobileOtp,
                    attempts: 3,
                })),
                Behaviour::Panic => panic!("browser crashed"),
                Behaviour::Block => {
                    tokio::select! {
                        _ = self.release.notified() => Ok(report(card)),
                        _ = cancel.cancelled() => Err(FlowError::Rendezvous(RendezvousError::Cancelled {
                            kind: SecretKind::PaymentOtp,
                        })),
                    }
                }
            }
        }
    }

    fn start_request(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/start")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn wait_until_busy(server: &TriggerServer) {
        for _ in 0..1000 {
            if server.guard().is_busy() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("run never started");
    }

    #[tokio::test]
    async fn test_start_success() {
        let runner = FakeRunner::new(Behaviour::Succeed);
        let server = TriggerServer::new(runner.clone(), PaymentCard::MembershipRewards);

        let (status, body) = send(server.router(), start_request("")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Automation completed successfully");

        let (_, body) = send(server.router(), get_request("/status")).await;
        let status: ServiceStatus = serde_json::from_value(body).unwrap();
        assert!(!status.busy);
        assert_eq!(status.runs_succeeded, 1);
        assert!(status.last_run.unwrap().success);
    }

    #[tokio::test]
    async fn test_failure_returns_500_and_releases() {
        let runner = FakeRunner::new(Behaviour::Fail);
        let server = TriggerServer::new(runner.clone(), PaymentCard::MembershipRewards);

        let (status, body) = send(server.router(), start_request("{}")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().contains("3 consecutive attempts"));
        assert!(!server.guard().is_busy());

        let (status, _) = send(server.router(), start_request("{}")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_run_releases_guard() {
        let runner = FakeRunner::new(Behaviour::Panic);
        let server = TriggerServer::new(runner, PaymentCard::MembershipRewards);

        let (status, body) = send(server.router(), start_request("")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(!server.guard().is_busy());
        assert_eq!(server.guard().status().runs_failed, 1);
    }

    #[tokio::test]
    async fn test_concurrent_start_conflicts() {
        let runner = FakeRunner::new(Behaviour::Block);
        let server = TriggerServer::new(runner.clone(), PaymentCard::MembershipRewards);

        let first = tokio::spawn(send(server.router(), start_request("")));
        wait_until_busy(&server).await;

        let (status, body) = send(server.router(), start_request("")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "Automation already running");

        let (status, body) = send(server.router(), get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["busy"], true);

        let (_, body) = send(server.router(), get_request("/status")).await;
        assert_eq!(body["current_run"]["card"], "membership_rewards");

        runner.release.notify_one();
        let (status, _) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(!server.guard().is_busy());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_card_selection() {
        let runner = FakeRunner::new(Behaviour::Succeed);
        let server = TriggerServer::new(runner.clone(), PaymentCard::MembershipRewards);

        send(server.router(), start_request(r#"{"card": "gold_charge"}"#)).await;
        send(server.router(), start_request(r#"{"card": "gold"}"#)).await;
        send(server.router(), start_request("{}")).await;

        assert_eq!(
            *runner.cards.lock(),
            vec![
                PaymentCard::GoldCharge,
                PaymentCard::GoldCharge,
                PaymentCard::MembershipRewards
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let runner = FakeRunner::new(Behaviour::Succeed);
        let server = TriggerServer::new(runner.clone(), PaymentCard::MembershipRewards);

        let (status, body) = send(server.router(), start_request(r#"{"card": "platinum"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(!server.guard().is_busy());
    }

    #[tokio::test]
    async fn test_health_when_idle() {
        let server = TriggerServer::new(FakeRunner::new(Behaviour::Succeed), PaymentCard::GoldCharge);

        let (status, body) = send(server.router(), get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"status": "ok", "service": "vouchflow", "busy": false})
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_flow() {
        let runner = FakeRunner::new(Behaviour::Block);
        let server = TriggerServer::new(runner, PaymentCard::MembershipRewards);

        let first = tokio::spawn(send(server.router(), start_request("")));
        wait_until_busy(&server).await;

        server.shutdown_token().cancel();
        let (status, body) = first.await.unwrap();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["message"].as_str().unwrap().contains("cancelled"));
        assert!(!server.guard().is_busy());
    }
}
