//! Uniform streaming contract handed to consumers

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use log::debug;

use crate::error::ExecutorError;

/// One item of a streamed answer, in provider arrival order.
/// Reasoning text is never surfaced as `Text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamChunk
{   Text(String)
  , /// The model started a reasoning block; informational only
    ThinkingStarted
  , UsageInfo
    {   input_tokens: u64
      , output_tokens: u64
    }
  , Done
}

/// A stream item; an `Err` is terminal
pub type StreamItem = Result<StreamChunk, ExecutorError>;

/// Consumer side of a streaming call
pub struct StreamHandle
{   rx: mpsc::UnboundedReceiver<StreamItem>
  , cancel: CancellationToken
}

impl StreamHandle
{   pub(crate) fn new(
      rx: mpsc::UnboundedReceiver<StreamItem>
    , cancel: CancellationToken
    ) -> Self
    {   StreamHandle { rx, cancel }
    }

    /// Next item, or `None` once the stream ended or was cancelled.
    /// Items already queued are discarded after cancellation.
    pub async fn next(&mut self) -> Option<StreamItem>
    {   if self.cancel.is_cancelled()
        {   return None;
        }
        tokio::select!
        { biased;
          _ = self.cancel.cancelled() => None
        , item = self.rx.recv() => {
            if self.cancel.is_cancelled() { None } else { item }
          }
        }
    }

    /// Stop the producer; it checks between chunks
    pub fn cancel(&self)
    {   debug!("Stream cancellation requested");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool
    {   self.cancel.is_cancelled()
    }

    /// Token shared with the producer, for external timeouts
    pub fn cancellation_token(&self) -> CancellationToken
    {   self.cancel.clone()
    }

    /// Drain the stream and concatenate its `Text` chunks
    pub async fn collect_text(mut self) -> Result<String, ExecutorError>
    {   let mut text = String::new();
        while let Some(item) = self.next().await
        {   match item?
            {   StreamChunk::Text(t) => text.push_str(&t)
              , StreamChunk::Done => break
              , _ => {}
            }
        }
        Ok(text)
    }
}

impl Drop for StreamHandle
{   fn drop(&mut self)
    {   // a dropped consumer counts as cancellation
        self.cancel.cancel();
    }
}
