//! Transport trait: delivers text to a user.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::UserId;

/// Outbound message delivery.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, user_id: UserId, text: &str) -> Result<()>;
}
