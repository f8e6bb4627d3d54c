//! LineRelay server.
//!
//! Builds the LLM and LINE clients once, wires them into the webhook
//! pipeline and serves it behind the shared HTTP middleware stack.

use crate::config::RelayConfig;
use crate::dispatcher::EventDispatcher;
use crate::generator::ResponseGenerator;
use crate::routes;
use crate::sender::ReplySender;
use crate::webhook::{self, WebhookState};
use anyhow::{Context, Result};
use axum::Router;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use lr_line::{LineMessagingClient, ReplyClient};
use lr_llm::{ChatBackend, LlmClient};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

#[tracing::instrument(level = "info", skip_all)]
pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let addr = cfg.bind_addr()?;
    tracing::info!(
        model = %cfg.llm.model,
        provider = ?lr_llm::detect_provider(&cfg.llm.model),
        llm_base_url = ?cfg.llm.base_url,
        line_api_base_url = ?cfg.line.api_base_url,
        bind_addr = %addr,
        generation_timeout_seconds = cfg.relay.generation_timeout_seconds,
        delivery_timeout_seconds = cfg.relay.delivery_timeout_seconds,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        max_reply_chars = cfg.relay.max_reply_chars,
        "config ok"
    );
    Ok(())
}

/// Print the `x-line-signature` value for a payload file.
pub async fn sign_payload(config_path: Option<PathBuf>, payload: &Path) -> Result<()> {
    let cfg = RelayConfig::read(config_path).await?;
    if cfg.line.channel_secret.trim().is_empty() {
        return Err(anyhow::anyhow!(
            "line.channel_secret is required (LINE_CHANNEL_SECRET)"
        ));
    }
    let body = tokio::fs::read(payload)
        .await
        .with_context(|| format!("read payload {}", payload.display()))?;
    println!("{}", lr_line::sign(&body, cfg.line.channel_secret.as_bytes()));
    Ok(())
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let started_at = Instant::now();
    let addr = cfg.bind_addr()?;
    tracing::info!(
        bind_addr = %addr,
        model = %cfg.llm.model,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        generation_timeout_seconds = cfg.relay.generation_timeout_seconds,
        delivery_timeout_seconds = cfg.relay.delivery_timeout_seconds,
        "linerelay starting"
    );

    let backend = build_llm_client(&cfg)?;
    let reply_client = build_reply_client(&cfg)?;
    let dispatcher = build_dispatcher(&cfg, backend, reply_client);
    let app = app(&cfg, WebhookState::new(&cfg.line.channel_secret, dispatcher));

    let listener = preflight_bind_listener(addr).await?;
    tracing::info!(
        %addr,
        startup_ms = started_at.elapsed().as_millis() as u64,
        "linerelay serving"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

fn build_llm_client(cfg: &RelayConfig) -> Result<Arc<dyn ChatBackend>> {
    let api_key = cfg
        .api_key_for_model()
        .ok_or_else(|| anyhow::anyhow!("no api key configured for model {:?}", cfg.llm.model))?;
    let client = LlmClient::new(&api_key, &cfg.llm.model)?
        .with_base_url(cfg.llm.base_url.clone())
        .with_max_tokens(cfg.llm.max_tokens);
    tracing::info!(model = %client.model(), provider = ?client.provider(), "llm client ready");
    Ok(Arc::new(client))
}

fn build_reply_client(cfg: &RelayConfig) -> Result<Arc<dyn ReplyClient>> {
    let mut client = LineMessagingClient::new(&cfg.line.channel_access_token)?;
    if let Some(api_base) = cfg.line.api_base_url.as_deref() {
        client = client.with_api_base(api_base)?;
    }
    Ok(Arc::new(client))
}

fn build_dispatcher(
    cfg: &RelayConfig,
    backend: Arc<dyn ChatBackend>,
    reply_client: Arc<dyn ReplyClient>,
) -> EventDispatcher {
    let generator = ResponseGenerator::new(
        backend,
        cfg.llm.system_prompt.clone(),
        cfg.relay.generation_timeout(),
        cfg.relay.timeout_fallback.clone(),
        cfg.relay.error_fallback.clone(),
    );
    let sender = ReplySender::new(
        reply_client,
        cfg.relay.delivery_timeout(),
        cfg.relay.max_reply_chars,
        cfg.relay.continuation_marker.clone(),
    );
    EventDispatcher::new(
        Arc::new(generator),
        Arc::new(sender),
        cfg.relay.delivery_fallback.clone(),
    )
}

fn app(cfg: &RelayConfig, webhook_state: WebhookState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    // `/webhook` is bounded by the relay deadlines, never by the HTTP timeout.
    let timed_routes = routes::router().layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(cfg.server.http_timeout_seconds),
    ));

    timed_routes
        .merge(webhook::router(webhook_state))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::{dispatcher, dispatcher_with};
    use crate::generator::tests::{Script, ScriptedBackend};
    use crate::sender::tests::RecordingClient;
    use axum::body::Body;
    use tokio::task::JoinSet;
    use tower::ServiceExt;

    fn signed_webhook(token: &str, text: &str) -> Request<Body> {
        let body = serde_json::json!({
            "events": [{
                "type": "message",
                "replyToken": token,
                "message": { "id": "1", "type": "text", "text": text }
            }]
        })
        .to_string();
        Request::post("/webhook")
            .header(lr_line::SIGNATURE_HEADER, lr_line::sign(body.as_bytes(), b"secret"))
            .body(Body::from(body))
            .expect("request builds")
    }

    fn test_app() -> (Router, Arc<RecordingClient>) {
        let client = Arc::new(RecordingClient::accepting());
        let state = WebhookState::new(
            "secret",
            dispatcher(Arc::new(ScriptedBackend::replying("hi there")), client.clone()),
        );
        (app(&RelayConfig::default(), state), client)
    }

    #[tokio::test]
    async fn app_serves_liveness_and_sets_request_id() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).expect("request builds"))
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn app_propagates_caller_request_id() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "req-123")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");

        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("req-123")
        );
    }

    #[tokio::test]
    async fn app_routes_signed_webhook_through_pipeline() {
        let (app, client) = test_app();

        let response = app
            .oneshot(signed_webhook("tok1", "hello"))
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(client.requests_for("tok1")[0].messages[0].text, "hi there");
    }

    #[tokio::test]
    async fn webhooks_queued_behind_the_concurrency_limit_still_get_ok() {
        let client = Arc::new(RecordingClient::accepting());
        let state = WebhookState::new(
            "secret",
            dispatcher_with(
                Arc::new(ScriptedBackend::new(|_| Script::Hang)),
                client.clone(),
                Duration::from_millis(400),
                Duration::from_secs(5),
            ),
        );
        let mut cfg = RelayConfig::default();
        cfg.server.http_timeout_seconds = 1;
        cfg.server.http_max_in_flight = 1;
        let app = app(&cfg, state);

        // Four serialized 400 ms batches outlast the 1 s HTTP timeout.
        let mut calls = JoinSet::new();
        for i in 0..4 {
            calls.spawn(app.clone().oneshot(signed_webhook(&format!("tok{i}"), "hello")));
        }
        let mut statuses = Vec::new();
        while let Some(joined) = calls.join_next().await {
            let response = joined.expect("call joins").expect("router responds");
            statuses.push(response.status());
        }

        assert_eq!(statuses, vec![StatusCode::OK; 4]);
        for i in 0..4 {
            let sent = client.requests_for(&format!("tok{i}"));
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].messages[0].text, "TIMEOUT");
        }
    }

    #[test]
    fn dispatcher_builds_from_default_tuning() {
        let cfg = RelayConfig::default();
        let backend: Arc<dyn ChatBackend> = Arc::new(ScriptedBackend::replying("ok"));
        let client: Arc<dyn ReplyClient> = Arc::new(RecordingClient::accepting());
        let _ = build_dispatcher(&cfg, backend, client);
    }

    #[test]
    fn reply_client_rejects_bad_api_base() {
        let mut cfg = RelayConfig::default();
        cfg.line.channel_access_token = "token".to_string();
        cfg.line.api_base_url = Some("not a url".to_string());
        assert!(build_reply_client(&cfg).is_err());
    }

    #[test]
    fn llm_client_requires_key_for_model() {
        let cfg = RelayConfig::default();
        assert!(build_llm_client(&cfg).is_err());
    }
}
