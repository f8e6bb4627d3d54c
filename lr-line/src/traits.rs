use crate::messaging::{ReplyAck, ReplyRequest};
use anyhow::Result;
use async_trait::async_trait;

/// Delivery side of the Messaging API.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait ReplyClient: Send + Sync {
    /// Send one reply bound to the request's reply token.
    async fn reply(&self, request: &ReplyRequest) -> Result<ReplyAck>;
}
