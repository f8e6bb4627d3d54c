//! Concurrent per-event processing for one verified webhook batch.
//!
//! Every actionable event runs in its own task. A task owns its failures:
//! a failed delivery earns exactly one fallback attempt with the same reply
//! token, and a panic surfaces only as a join error for that event.

use crate::generator::ResponseGenerator;
use crate::notify;
use crate::sender::ReplySender;
use chrono::{DateTime, Utc};
use lr_line::{ReplyToken, UserId, WebhookEnvelope, WebhookEvent};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Clone)]
pub struct EventDispatcher {
    generator: Arc<ResponseGenerator>,
    sender: Arc<ReplySender>,
    delivery_fallback: Arc<str>,
}

/// Outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub total: usize,
    pub skipped: usize,
    pub replied: usize,
    pub fallback_delivered: usize,
    pub dropped: usize,
    pub panicked: usize,
}

/// The parts of a text message event the pipeline acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InboundText {
    reply_token: ReplyToken,
    text: String,
    user_id: Option<UserId>,
    sent_at: Option<DateTime<Utc>>,
}

impl InboundText {
    fn age_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        self.sent_at.map(|sent_at| (now - sent_at).num_milliseconds())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventOutcome {
    Replied,
    FallbackDelivered,
    Dropped,
}

impl EventDispatcher {
    pub fn new(
        generator: Arc<ResponseGenerator>,
        sender: Arc<ReplySender>,
        delivery_fallback: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            sender,
            delivery_fallback: Arc::from(delivery_fallback.into()),
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(event_count = envelope.events.len()))]
    pub async fn dispatch(&self, envelope: WebhookEnvelope) -> DispatchReport {
        let mut report = DispatchReport {
            total: envelope.events.len(),
            ..DispatchReport::default()
        };
        if envelope.is_empty() {
            tracing::debug!("empty webhook batch");
            return report;
        }
        let mut tasks = JoinSet::new();

        for event in envelope.events {
            let Some(inbound) = actionable(event, &mut report) else {
                continue;
            };
            let this = self.clone();
            tasks.spawn(async move { this.handle_message(inbound).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(EventOutcome::Replied) => report.replied += 1,
                Ok(EventOutcome::FallbackDelivered) => report.fallback_delivered += 1,
                Ok(EventOutcome::Dropped) => report.dropped += 1,
                Err(error) => {
                    report.panicked += 1;
                    notify::report_critical(
                        "event.task",
                        &error,
                        serde_json::json!({ "panic": error.is_panic() }),
                    );
                }
            }
        }

        tracing::info!(
            total = report.total,
            skipped = report.skipped,
            replied = report.replied,
            fallback_delivered = report.fallback_delivered,
            dropped = report.dropped,
            panicked = report.panicked,
            "webhook batch dispatched"
        );
        report
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(
            reply_token = %inbound.reply_token,
            user_id = inbound.user_id.as_deref().unwrap_or("unknown"),
            text_chars = inbound.text.chars().count()
        )
    )]
    async fn handle_message(&self, inbound: InboundText) -> EventOutcome {
        tracing::debug!(event_age_ms = ?inbound.age_ms(Utc::now()), "handling text event");
        let InboundText { reply_token, text, .. } = inbound;
        let reply = self.generator.generate(&text, &[]).await;

        let primary_error = match self.sender.send(&reply_token, &reply).await {
            Ok(ack) => {
                tracing::info!(request_id = ?ack.request_id, "reply delivered");
                return EventOutcome::Replied;
            }
            Err(error) => error,
        };
        tracing::warn!(error = %primary_error, "reply delivery failed; sending fallback");

        match self.sender.send(&reply_token, &self.delivery_fallback).await {
            Ok(ack) => {
                tracing::info!(request_id = ?ack.request_id, "fallback reply delivered");
                EventOutcome::FallbackDelivered
            }
            Err(fallback_error) => {
                notify::report_critical(
                    "reply.fallback",
                    &fallback_error,
                    serde_json::json!({
                        "reply_token": reply_token.as_str(),
                        "primary_error": primary_error.to_string(),
                    }),
                );
                EventOutcome::Dropped
            }
        }
    }
}

fn actionable(event: WebhookEvent, report: &mut DispatchReport) -> Option<InboundText> {
    let WebhookEvent::Message(message) = &event else {
        tracing::debug!(kind = event.kind(), "skipping non-message event");
        report.skipped += 1;
        return None;
    };
    let Some(text) = message.text() else {
        tracing::debug!("skipping non-text message event");
        report.skipped += 1;
        return None;
    };
    Some(InboundText {
        reply_token: message.reply_token.clone(),
        text: text.to_string(),
        user_id: message.user_id().cloned(),
        sent_at: message.sent_at(),
    })
}
