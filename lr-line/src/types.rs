use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// Single-use: owned by exactly one event.
id_newtype!(ReplyToken);
id_newtype!(UserId);

/// A verified webhook body.
///
/// Decoding is lenient: a missing `events` array is an empty batch and an
/// event that does not fit its declared shape becomes `WebhookEvent::Other`.
#[derive(Debug, Clone, Default)]
pub struct WebhookEnvelope {
    pub destination: Option<String>,
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

impl WebhookEnvelope {
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        let raw: RawEnvelope = serde_json::from_slice(body)?;
        Ok(Self {
            destination: raw.destination,
            events: raw
                .events
                .into_iter()
                .map(WebhookEvent::from_value)
                .collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Message(MessageEvent),
    /// follow, unfollow, postback, join, ... or an undecodable message event.
    Other { kind: String },
}

impl WebhookEvent {
    pub fn from_value(value: serde_json::Value) -> Self {
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        if kind != "message" {
            return Self::Other { kind };
        }
        match serde_json::from_value::<MessageEvent>(value) {
            Ok(event) => Self::Message(event),
            Err(error) => {
                tracing::warn!(%error, "message event did not decode; treating as inert");
                Self::Other { kind }
            }
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::Other { kind } => kind,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub reply_token: ReplyToken,
    #[serde(default)]
    pub source: Option<EventSource>,
    pub message: MessageContent,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub webhook_event_id: Option<String>,
}

impl MessageEvent {
    pub fn text(&self) -> Option<&str> {
        match &self.message {
            MessageContent::Text { text, .. } => Some(text),
            MessageContent::Other => None,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.source.as_ref().and_then(|s| s.user_id.as_ref())
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text {
        #[serde(default)]
        id: Option<String>,
        text: String,
    },
    /// image, sticker, video, audio, file, location, ...
    #[serde(other)]
    Other,
}
