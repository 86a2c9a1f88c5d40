//! Text generation trait: turns a context into a short message.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::GenerationContext;

/// A source of generated notification text.
///
/// Implementations may be slow or fail; callers wrap every call in a timeout
/// and fall back to deterministic text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Produce one message. An empty string counts as a failure at the call site.
    async fn generate(&self, context: &GenerationContext) -> Result<String>;
}
