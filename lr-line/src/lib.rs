//! LINE Messaging API plumbing for LineRelay.
//!
//! Pure I/O and wire types: webhook decoding, signature checks and the reply
//! endpoint. No generation or dispatch policy lives here.

mod messaging;
mod signature;
mod traits;
mod types;

pub use messaging::{LineMessagingClient, ReplyAck, ReplyRequest, TextMessage};
pub use signature::{SIGNATURE_HEADER, sign, verify};
pub use traits::ReplyClient;
pub use types::{
    EventSource, MessageContent, MessageEvent, ReplyToken, UserId, WebhookEnvelope, WebhookEvent,
};
