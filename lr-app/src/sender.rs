use crate::error::DeliveryError;
use lr_line::{ReplyAck, ReplyClient, ReplyRequest, ReplyToken};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

pub struct ReplySender {
    client: Arc<dyn ReplyClient>,
    deadline: Duration,
    max_units: usize,
    continuation_marker: String,
}

impl ReplySender {
    pub fn new(
        client: Arc<dyn ReplyClient>,
        deadline: Duration,
        max_units: usize,
        continuation_marker: impl Into<String>,
    ) -> Self {
        Self {
            client,
            deadline,
            max_units,
            continuation_marker: continuation_marker.into(),
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(reply_token = %reply_token))]
    pub async fn send(&self, reply_token: &ReplyToken, text: &str) -> Result<ReplyAck, DeliveryError> {
        let text = truncate_reply(text, self.max_units, &self.continuation_marker);
        if let Cow::Owned(_) = text {
            tracing::info!(max_units = self.max_units, "reply truncated");
        }
        let request = ReplyRequest::text(reply_token.clone(), text);

        match tokio::time::timeout(self.deadline, self.client.reply(&request)).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(error)) => Err(DeliveryError::Transport(format!("{error:#}"))),
            Err(_) => Err(DeliveryError::Timeout(self.deadline)),
        }
    }
}

/// Cut `text` to at most `max_units` UTF-16 code units and append `marker`.
///
/// LINE measures message length in UTF-16 code units. A surrogate pair that
/// would straddle the limit is dropped whole. Text within the limit is
/// returned unchanged.
pub fn truncate_reply<'a>(text: &'a str, max_units: usize, marker: &str) -> Cow<'a, str> {
    let mut units = 0;
    for (index, ch) in text.char_indices() {
        units += ch.len_utf16();
        if units > max_units {
            let mut out = String::with_capacity(index + marker.len());
            out.push_str(&text[..index]);
            out.push_str(marker);
            return Cow::Owned(out);
        }
    }
    Cow::Borrowed(text)
}
