//! LLM provider seam and implementations

use std::pin::Pin;
use async_trait::async_trait;
use futures_util::Stream;

use crate::error::ProviderError;

pub mod anthropic;
pub mod sse;

// Re-export for convenience
pub use anthropic::AnthropicClient;
use anthropic::{
  BatchRequestEntry, MessagesRequest, MessagesResponse, StreamEvent,
  WireBatch, WireBatchResult, WireModel,
};

/// Provider events in arrival order
pub type EventStream
  = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// One provider account API. Every call is a single round trip made
/// with the given key; rotation and retries live above this trait.
#[async_trait]
pub trait Provider: Send + Sync
{   async fn create_message(
      &self
    , api_key: &str
    , request: &MessagesRequest
    ) -> Result<MessagesResponse, ProviderError>;

    /// Open a stream; errors returned here happened before any event
    async fn stream_message(
      &self
    , api_key: &str
    , request: &MessagesRequest
    ) -> Result<EventStream, ProviderError>;

    async fn create_batch(
      &self
    , api_key: &str
    , requests: &[BatchRequestEntry]
    ) -> Result<WireBatch, ProviderError>;

    async fn retrieve_batch(
      &self
    , api_key: &str
    , batch_id: &str
    ) -> Result<WireBatch, ProviderError>;

    async fn batch_results(
      &self
    , api_key: &str
    , batch_id: &str
    ) -> Result<Vec<WireBatchResult>, ProviderError>;

    async fn cancel_batch(
      &self
    , api_key: &str
    , batch_id: &str
    ) -> Result<WireBatch, ProviderError>;

    async fn list_models(
      &self
    , api_key: &str
    ) -> Result<Vec<WireModel>, ProviderError>;
}
