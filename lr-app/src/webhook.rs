//! `POST /webhook`: verify, decode, dispatch, acknowledge.
//!
//! Anything past signature verification answers `200 OK`; per-event failures
//! stay inside the dispatcher.

use crate::dispatcher::EventDispatcher;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use lr_line::{SIGNATURE_HEADER, WebhookEnvelope};
use std::sync::Arc;

#[derive(Clone)]
pub struct WebhookState {
    channel_secret: Arc<[u8]>,
    dispatcher: EventDispatcher,
}

impl WebhookState {
    pub fn new(channel_secret: &str, dispatcher: EventDispatcher) -> Self {
        Self {
            channel_secret: Arc::from(channel_secret.as_bytes()),
            dispatcher,
        }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .with_state(state)
}

#[tracing::instrument(level = "info", skip_all, fields(body_bytes = body.len()))]
async fn receive_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if !lr_line::verify(&body, signature, &state.channel_secret) {
        tracing::warn!(
            signature_present = signature.is_some(),
            "rejecting webhook with invalid signature"
        );
        return (StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let envelope = match WebhookEnvelope::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(%error, "verified webhook body is not a valid envelope; treating as empty");
            WebhookEnvelope::default()
        }
    };
    tracing::debug!(
        destination = envelope.destination.as_deref().unwrap_or("none"),
        event_count = envelope.events.len(),
        "webhook accepted"
    );

    state.dispatcher.dispatch(envelope).await;
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::dispatcher;
    use crate::generator::tests::{Script, ScriptedBackend};
    use crate::sender::tests::{Delivery, RecordingClient};
    use axum::body::Body;
    use axum::http::Request;
    use lr_line::ReplyRequest;
    use tower::ServiceExt;

    const SECRET: &str = "channel-secret";

    fn app(backend: ScriptedBackend, client: Arc<RecordingClient>) -> Router {
        router(WebhookState::new(
            SECRET,
            dispatcher(Arc::new(backend), client),
        ))
    }

    fn webhook_request(body: &[u8], signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/webhook");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_vec()))
            .expect("request builds")
    }

    fn signed(body: &[u8]) -> Request<Body> {
        webhook_request(body, Some(lr_line::sign(body, SECRET.as_bytes())))
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(request).await.expect("router responds");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    fn text_payload(token: &str, text: &str) -> Vec<u8> {
        serde_json::json!({
            "destination": "Ubot",
            "events": [{
                "type": "message",
                "mode": "active",
                "timestamp": 1_700_000_000_000_i64,
                "replyToken": token,
                "source": { "type": "user", "userId": "U1" },
                "message": { "id": "1", "type": "text", "text": text }
            }]
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn valid_text_event_is_answered_and_acknowledged() {
        let client = Arc::new(RecordingClient::accepting());
        let app = app(ScriptedBackend::replying("hi there"), client.clone());

        let (status, body) = call(app, signed(&text_payload("tok1", "hello"))).await;

        assert_eq!((status, body.as_str()), (StatusCode::OK, "OK"));
        assert_eq!(
            client.requests_for("tok1"),
            vec![ReplyRequest::text("tok1".into(), "hi there")]
        );
        let wire = serde_json::to_value(&client.requests_for("tok1")[0]).expect("serializes");
        assert_eq!(
            wire,
            serde_json::json!({
                "replyToken": "tok1",
                "messages": [{ "type": "text", "text": "hi there" }]
            })
        );
    }

    #[tokio::test]
    async fn missing_signature_is_rejected_without_side_effects() {
        let backend = ScriptedBackend::replying("hi");
        let client = Arc::new(RecordingClient::accepting());
        let app = app(backend, client.clone());

        let (status, body) = call(app, webhook_request(&text_payload("tok1", "hello"), None)).await;

        assert_eq!((status, body.as_str()), (StatusCode::UNAUTHORIZED, "Invalid signature"));
        assert!(client.requests.lock().expect("requests lock").is_empty());
    }

    #[tokio::test]
    async fn wrong_signature_is_rejected_even_for_garbage_bodies() {
        for body in [text_payload("tok1", "hello"), b"not json".to_vec(), Vec::new()] {
            let client = Arc::new(RecordingClient::accepting());
            let app = app(ScriptedBackend::replying("hi"), client.clone());
            let forged = lr_line::sign(&body, b"some-other-secret");

            let (status, text) = call(app, webhook_request(&body, Some(forged))).await;

            assert_eq!((status, text.as_str()), (StatusCode::UNAUTHORIZED, "Invalid signature"));
            assert!(client.requests.lock().expect("requests lock").is_empty());
        }
    }

    #[tokio::test]
    async fn signature_over_different_bytes_is_rejected() {
        let client = Arc::new(RecordingClient::accepting());
        let app = app(ScriptedBackend::replying("hi"), client.clone());
        let body = text_payload("tok1", "hello");
        let signature = lr_line::sign(&text_payload("tok1", "hello!"), SECRET.as_bytes());

        let (status, _) = call(app, webhook_request(&body, Some(signature))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn empty_batch_is_acknowledged() {
        let client = Arc::new(RecordingClient::accepting());
        let app = app(ScriptedBackend::replying("hi"), client.clone());
        let body = br#"{"destination":"Ubot","events":[]}"#;

        let (status, text) = call(app, signed(body)).await;

        assert_eq!((status, text.as_str()), (StatusCode::OK, "OK"));
        assert!(client.requests.lock().expect("requests lock").is_empty());
    }

    #[tokio::test]
    async fn non_text_events_are_acknowledged_without_replies() {
        let client = Arc::new(RecordingClient::accepting());
        let app = app(ScriptedBackend::replying("hi"), client.clone());
        let body = serde_json::json!({
            "events": [
                { "type": "follow", "replyToken": "tokF", "source": { "type": "user", "userId": "U1" } },
                { "type": "message", "replyToken": "tokI", "message": { "id": "9", "type": "image" } }
            ]
        })
        .to_string();

        let (status, _) = call(app, signed(body.as_bytes())).await;

        assert_eq!(status, StatusCode::OK);
        assert!(client.requests.lock().expect("requests lock").is_empty());
    }

    #[tokio::test]
    async fn verified_invalid_json_is_acknowledged() {
        let client = Arc::new(RecordingClient::accepting());
        let app = app(ScriptedBackend::replying("hi"), client.clone());

        let (status, text) = call(app, signed(b"{not json")).await;

        assert_eq!((status, text.as_str()), (StatusCode::OK, "OK"));
        assert!(client.requests.lock().expect("requests lock").is_empty());
    }

    #[tokio::test]
    async fn generation_failure_is_acknowledged() {
        let client = Arc::new(RecordingClient::accepting());
        let app = app(ScriptedBackend::new(|_| Script::Fail), client.clone());

        let (status, _) = call(app, signed(&text_payload("tok1", "hello"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(client.requests_for("tok1")[0].messages[0].text, "ERROR");
    }

    #[tokio::test]
    async fn double_delivery_failure_is_acknowledged() {
        let client = Arc::new(RecordingClient::new(|_, _| Delivery::Reject));
        let app = app(ScriptedBackend::replying("hi"), client.clone());

        let (status, text) = call(app, signed(&text_payload("tok1", "hello"))).await;

        assert_eq!((status, text.as_str()), (StatusCode::OK, "OK"));
        assert_eq!(client.requests_for("tok1").len(), 2);
    }
}
