use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use log::{debug, trace, error};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::request::Message;
use crate::providers::{EventStream, Provider};

// ===== Message Types =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingParam
{   #[serde(rename = "type")]
    pub kind: String
  , pub budget_tokens: u32
}

impl ThinkingParam
{   pub fn enabled(budget_tokens: u32) -> Self
    {   ThinkingParam
        {   kind: "enabled".to_string()
          , budget_tokens
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesRequest
{   pub model: String
  , pub max_tokens: u32
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>
  , pub messages: Vec<Message>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingParam>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>
}

/// A block of a response; reasoning blocks are kept apart from text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock
{   Text
    {   #[serde(default)]
        text: String
    }
  , Thinking
    {   #[serde(default)]
        thinking: String
    }
  , RedactedThinking
  , #[serde(other)]
    Other
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage
{   #[serde(default)]
    pub input_tokens: u64
  , #[serde(default)]
    pub output_tokens: u64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesResponse
{   #[serde(default)]
    pub id: String
  , pub content: Vec<ContentBlock>
  , #[serde(default)]
    pub usage: Usage
  , #[serde(default)]
    pub stop_reason: Option<String>
}

impl MessagesResponse
{   /// Concatenated text blocks; reasoning blocks are skipped
    pub fn text(&self) -> String
    {   self.content
          .iter()
          .filter_map(|block| match block
          {   ContentBlock::Text { text } => Some(text.as_str())
            , _ => None
          })
          .collect()
    }
}

// ===== Streaming Events =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMessage
{   #[serde(default)]
    pub usage: Usage
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta
{   TextDelta
    {   text: String
    }
  , ThinkingDelta
    {   thinking: String
    }
  , #[serde(other)]
    Other
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody
{   #[serde(rename = "type", default)]
    pub kind: String
  , #[serde(default)]
    pub message: String
}

impl ErrorBody
{   pub fn into_provider_error(self) -> ProviderError
    {   ProviderError::from_error_type(&self.kind, self.message)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope
{   error: ErrorBody
}

/// Provider streaming event, discriminated by its `type` tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent
{   MessageStart
    {   message: StartMessage
    }
  , ContentBlockStart
    {   #[serde(default)]
        index: usize
      , content_block: ContentBlock
    }
  , ContentBlockDelta
    {   #[serde(default)]
        index: usize
      , delta: BlockDelta
    }
  , ContentBlockStop
    {   #[serde(default)]
        index: usize
    }
  , MessageDelta
    {   #[serde(default)]
        usage: Usage
    }
  , MessageStop
  , Ping
  , Error
    {   error: ErrorBody
    }
  , #[serde(other)]
    Unknown
}

// ===== Batch Types =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequestEntry
{   pub custom_id: String
  , pub params: MessagesRequest
}

#[derive(Debug, Clone, Serialize)]
struct CreateBatchRequest<'a>
{   requests: &'a [BatchRequestEntry]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts
{   #[serde(default)]
    pub processing: u64
  , #[serde(default)]
    pub succeeded: u64
  , #[serde(default)]
    pub errored: u64
  , #[serde(default)]
    pub canceled: u64
  , #[serde(default)]
    pub expired: u64
}

impl RequestCounts
{   pub fn total(&self) -> u64
    {   self.processing + self.succeeded + self.errored
          + self.canceled + self.expired
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBatch
{   pub id: String
  , /// `in_progress`, `canceling` or `ended`
    pub processing_status: String
  , #[serde(default)]
    pub request_counts: RequestCounts
  , #[serde(default)]
    pub created_at: Option<DateTime<Utc>>
  , #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>
  , #[serde(default)]
    pub cancel_initiated_at: Option<DateTime<Utc>>
  , #[serde(default)]
    pub results_url: Option<String>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireResult
{   Succeeded
    {   message: MessagesResponse
    }
  , Errored
    {   #[serde(default)]
        error: serde_json::Value
    }
  , Canceled
  , Expired
}

impl WireResult
{   /// Provider error message of an errored result; the body nests
    /// `{"error": {"message": ...}}` one or two levels deep
    pub fn error_message(error: &serde_json::Value) -> String
    {   error.pointer("/error/message")
          .or_else(|| error.pointer("/message"))
          .and_then(|m| m.as_str())
          .map(str::to_string)
          .unwrap_or_else(|| error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBatchResult
{   pub custom_id: String
  , pub result: WireResult
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireModel
{   pub id: String
  , #[serde(default)]
    pub display_name: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
struct ModelsPage
{   data: Vec<WireModel>
}

// ===== HTTP Client =====

/// HTTP client for the Messages, Message Batches and Models endpoints
#[derive(Debug, Clone)]
pub struct AnthropicClient
{   http_client: reqwest::Client
  , api_base: String
  , api_version: String
  , timeout: Option<Duration>
}

impl AnthropicClient
{   pub fn new(config: &ProviderConfig) -> Self
    {   debug!("Creating AnthropicClient for {}", config.api_base);
        AnthropicClient
        {   http_client: reqwest::Client::new()
          , api_base: config.api_base.trim_end_matches('/').to_string()
          , api_version: config.api_version.clone()
          , timeout: config.timeout_secs.map(Duration::from_secs)
        }
    }

    fn url(&self, path: &str) -> String
    {   format!("{}/v1/{}", self.api_base, path)
    }

    fn request(
      &self
    , method: reqwest::Method
    , path: &str
    , api_key: &str
    ) -> reqwest::RequestBuilder
    {   self.http_client
          .request(method, self.url(path))
          .header("x-api-key", api_key)
          .header("anthropic-version", &self.api_version)
          .header("content-type", "application/json")
    }

    /// Apply the request timeout; streams are left unbounded
    fn bounded(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder
    {   match self.timeout
        {   Some(t) => builder.timeout(t)
          , None => builder
        }
    }

    /// Send and classify non-success statuses
    async fn execute(
      &self
    , builder: reqwest::RequestBuilder
    ) -> Result<reqwest::Response, ProviderError>
    {   let response = builder.send().await.map_err(|e| {
          error!("HTTP error: {}", e);
          ProviderError::from(e)
        })?;

        let status = response.status();
        trace!("Anthropic response status: {}", status);
        if status.is_success()
        {   return Ok(response);
        }

        let body = response.text().await
          .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
          .map(|env| env.error.message)
          .unwrap_or(body);
        error!("Anthropic API error {}: {}", status, message);
        Err(ProviderError::from_status(status.as_u16(), message))
    }

    async fn json<T: serde::de::DeserializeOwned>(
      response: reqwest::Response
    ) -> Result<T, ProviderError>
    {   let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
          error!("Parse error: {}", e);
          ProviderError::from(e)
        })
    }
}

#[async_trait]
impl Provider for AnthropicClient
{   async fn create_message(
      &self
    , api_key: &str
    , request: &MessagesRequest
    ) -> Result<MessagesResponse, ProviderError>
    {   debug!("POST messages for {}", request.model);
        let builder = self
          .request(reqwest::Method::POST, "messages", api_key)
          .json(request);
        let response = self.execute(self.bounded(builder)).await?;
        Self::json(response).await
    }

    async fn stream_message(
      &self
    , api_key: &str
    , request: &MessagesRequest
    ) -> Result<EventStream, ProviderError>
    {   debug!("POST messages (stream) for {}", request.model);
        let builder = self
          .request(reqwest::Method::POST, "messages", api_key)
          .header("accept", "text/event-stream")
          .json(request);
        let response = self.execute(builder).await?;
        Ok(crate::providers::sse::decode_events(response))
    }

    async fn create_batch(
      &self
    , api_key: &str
    , requests: &[BatchRequestEntry]
    ) -> Result<WireBatch, ProviderError>
    {   debug!("POST messages/batches with {} requests", requests.len());
        let builder = self
          .request(reqwest::Method::POST, "messages/batches", api_key)
          .json(&CreateBatchRequest { requests });
        let response = self.execute(self.bounded(builder)).await?;
        Self::json(response).await
    }

    async fn retrieve_batch(
      &self
    , api_key: &str
    , batch_id: &str
    ) -> Result<WireBatch, ProviderError>
    {   let path = format!("messages/batches/{}", batch_id);
        let builder = self.request(reqwest::Method::GET, &path, api_key);
        let response = self.execute(self.bounded(builder)).await?;
        Self::json(response).await
    }

    async fn batch_results(
      &self
    , api_key: &str
    , batch_id: &str
    ) -> Result<Vec<WireBatchResult>, ProviderError>
    {   let path = format!("messages/batches/{}/results", batch_id);
        let builder = self.request(reqwest::Method::GET, &path, api_key);
        let response = self.execute(self.bounded(builder)).await?;
        let body = response.text().await?;

        // results arrive as JSON lines
        let results = body
          .lines()
          .map(str::trim)
          .filter(|line| !line.is_empty())
          .map(serde_json::from_str::<WireBatchResult>)
          .collect::<Result<Vec<_>, _>>()?;
        debug!("Batch {} returned {} results", batch_id, results.len());
        Ok(results)
    }

    async fn cancel_batch(
      &self
    , api_key: &str
    , batch_id: &str
    ) -> Result<WireBatch, ProviderError>
    {   let path = format!("messages/batches/{}/cancel", batch_id);
        let builder = self.request(reqwest::Method::POST, &path, api_key);
        let response = self.execute(self.bounded(builder)).await?;
        Self::json(response).await
    }

    async fn list_models(
      &self
    , api_key: &str
    ) -> Result<Vec<WireModel>, ProviderError>
    {   let builder = self.request(reqwest::Method::GET, "models", api_key);
        let response = self.execute(self.bounded(builder)).await?;
        let page: ModelsPage = Self::json(response).await?;
        debug!("Retrieved {} models", page.data.len());
        Ok(page.data)
    }
}
