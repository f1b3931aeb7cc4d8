//! HTTP surface: signature-checked webhook intake and background dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use codex_github::codex_prompts::is_codex_label;
use codex_github::webhook_payloads::{
    payload_action, IssuesLabeledPayload, PullRequestPayload, WebhookRoute, WorkflowRunPayload,
};
use codex_github::webhook_signature::{verify_webhook_signature, SIGNATURE_HEADER};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::event_handlers::{
    handle_issue_labeled, handle_pull_request, handle_workflow_run, is_failed_run,
    HandlerContext, HandlerOutcome,
};

pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";
pub const WEBHOOK_PATH: &str = "/api/github/webhooks";

/// One verified, parsed webhook request.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub delivery_id: String,
    pub event_name: String,
    pub action: Option<String>,
    pub payload: Value,
}

/// Registry of in-flight deliveries keyed by the subject they act on.
///
/// Registering a subject that is already active signals the older
/// delivery's cancellation channel.
#[derive(Debug, Default)]
pub struct ActiveDeliveries {
    next_id: AtomicU64,
    active: Mutex<HashMap<String, (u64, watch::Sender<bool>)>>,
}

impl ActiveDeliveries {
    pub fn register(self: &Arc<Self>, subject: String) -> DeliveryRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let previous = {
            let mut active = self
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            active.insert(subject.clone(), (id, cancel_tx))
        };
        if let Some((_, previous_tx)) = previous {
            tracing::info!(subject = %subject, "superseding in-flight delivery");
            let _ = previous_tx.send(true);
        }
        DeliveryRegistration {
            registry: self.clone(),
            subject,
            id,
            cancel: cancel_rx,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn release(&self, subject: &str, id: u64) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if active.get(subject).is_some_and(|(owner, _)| *owner == id) {
            active.remove(subject);
        }
    }
}

/// Membership in [`ActiveDeliveries`]; released on drop.
#[derive(Debug)]
pub struct DeliveryRegistration {
    registry: Arc<ActiveDeliveries>,
    subject: String,
    id: u64,
    cancel: watch::Receiver<bool>,
}

impl DeliveryRegistration {
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }
}

impl Drop for DeliveryRegistration {
    fn drop(&mut self) {
        self.registry.release(&self.subject, self.id);
    }
}

/// Runs routed deliveries against the handlers.
#[derive(Clone)]
pub struct WebhookDispatcher {
    context: Arc<HandlerContext>,
    deliveries: Arc<ActiveDeliveries>,
    synchronous: bool,
}

impl WebhookDispatcher {
    pub fn new(context: Arc<HandlerContext>, synchronous: bool) -> Self {
        Self {
            context,
            deliveries: Arc::new(ActiveDeliveries::default()),
            synchronous,
        }
    }

    pub fn deliveries(&self) -> &Arc<ActiveDeliveries> {
        &self.deliveries
    }

    /// Run inline or on a background task; handler errors are logged here.
    pub async fn dispatch(&self, route: WebhookRoute, delivery: WebhookDelivery) {
        if self.synchronous {
            self.run_delivery(route, delivery).await;
            return;
        }
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.run_delivery(route, delivery).await;
        });
    }

    async fn run_delivery(&self, route: WebhookRoute, delivery: WebhookDelivery) {
        match self.execute(route, delivery.payload).await {
            Ok(outcome) => tracing::info!(
                delivery = %delivery.delivery_id,
                event = %delivery.event_name,
                route = route.as_str(),
                outcome = outcome.as_str(),
                "webhook handled"
            ),
            Err(error) => tracing::error!(
                delivery = %delivery.delivery_id,
                event = %delivery.event_name,
                route = route.as_str(),
                error = %format!("{error:#}"),
                "webhook handler failed"
            ),
        }
    }

    async fn execute(&self, route: WebhookRoute, payload: Value) -> Result<HandlerOutcome> {
        let ctx = self.context.as_ref();
        match route {
            WebhookRoute::IssueLabeled => {
                let payload: IssuesLabeledPayload =
                    serde_json::from_value(payload).context("failed to decode issues payload")?;
                let triggers = payload
                    .label
                    .as_ref()
                    .is_some_and(|label| is_codex_label(&label.name));
                let registration = triggers.then(|| {
                    self.deliveries.register(format!(
                        "{}#issue-{}",
                        payload.repository.full_name, payload.issue.number
                    ))
                });
                handle_issue_labeled(ctx, &payload, cancel_of(registration.as_ref())).await
            }
            WebhookRoute::PullRequest => {
                let payload: PullRequestPayload = serde_json::from_value(payload)
                    .context("failed to decode pull_request payload")?;
                let registration = self.deliveries.register(format!(
                    "{}#pull-{}",
                    payload.repository.full_name, payload.pull_request.number
                ));
                handle_pull_request(ctx, &payload, Some(registration.cancel_signal())).await
            }
            WebhookRoute::WorkflowRunCompleted => {
                let payload: WorkflowRunPayload = serde_json::from_value(payload)
                    .context("failed to decode workflow_run payload")?;
                // A re-run finishing green must not cancel the diagnosis of
                // the failed attempt.
                let registration = is_failed_run(&payload).then(|| {
                    self.deliveries.register(format!(
                        "{}#run-{}",
                        payload.repository.full_name, payload.workflow_run.id
                    ))
                });
                handle_workflow_run(ctx, &payload, cancel_of(registration.as_ref())).await
            }
            WebhookRoute::Ping => Ok(HandlerOutcome::ignored("ping")),
        }
    }
}

fn cancel_of(registration: Option<&DeliveryRegistration>) -> Option<watch::Receiver<bool>> {
    registration.map(DeliveryRegistration::cancel_signal)
}

pub struct WebhookServerState {
    pub webhook_secret: String,
    pub dispatcher: WebhookDispatcher,
}

pub fn build_webhook_router(state: Arc<WebhookServerState>) -> Router {
    Router::new()
        .route("/", get(handle_root).post(handle_webhook))
        .route(WEBHOOK_PATH, axum::routing::post(handle_webhook))
        .route("/healthz", get(handle_health))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve_webhooks<F>(
    listener: TcpListener,
    state: Arc<WebhookServerState>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_webhook_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("webhook server exited unexpectedly")
}

/// Bind `host:port` and serve until Ctrl-C.
pub async fn run_webhook_server(
    bind_host: &str,
    port: u16,
    state: Arc<WebhookServerState>,
) -> Result<()> {
    let bind = format!("{bind_host}:{port}");
    let listener = TcpListener::bind(bind.as_str())
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve webhook bound address")?;
    tracing::info!(addr = %local_addr, path = WEBHOOK_PATH, "webhook server listening");
    serve_webhooks(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await
}

async fn handle_root() -> &'static str {
    "OK"
}

async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({"error":{"code":code,"message":message}})),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn handle_webhook(
    State(state): State<Arc<WebhookServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header_str(&headers, SIGNATURE_HEADER);
    if let Err(error) = verify_webhook_signature(&body, signature, &state.webhook_secret) {
        tracing::warn!(code = error.code(), "rejected webhook signature");
        return error_response(StatusCode::UNAUTHORIZED, error.code(), &error.to_string());
    }
    let Some(event_name) = header_str(&headers, EVENT_HEADER) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing_event",
            "missing X-GitHub-Event header",
        );
    };
    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => payload,
        Err(error) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "parse_failed",
                &format!("webhook body is not valid json: {error}"),
            );
        }
    };

    let delivery = WebhookDelivery {
        delivery_id: header_str(&headers, DELIVERY_HEADER)
            .unwrap_or("unknown")
            .to_string(),
        event_name: event_name.to_string(),
        action: payload_action(&payload).map(str::to_string),
        payload,
    };
    let route = WebhookRoute::from_event(&delivery.event_name, delivery.action.as_deref());
    let status = match route {
        Some(WebhookRoute::Ping) => "pong",
        Some(_) => "accepted",
        None => "ignored",
    };
    let body = json!({
        "status": status,
        "event": delivery.event_name,
        "action": delivery.action,
        "delivery": delivery.delivery_id,
    });
    tracing::debug!(
        delivery = %delivery.delivery_id,
        event = %delivery.event_name,
        action = delivery.action.as_deref().unwrap_or(""),
        status,
        "webhook received"
    );
    if let Some(route) = route.filter(|route| *route != WebhookRoute::Ping) {
        state.dispatcher.dispatch(route, delivery).await;
    }
    (StatusCode::OK, Json(body)).into_response()
}
