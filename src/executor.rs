//! Request executor: blocking and streamed calls with credential failover

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use log::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::credentials::{Credential, CredentialPool, CredentialStore};
use crate::error::{ExecutorError, ProviderError};
use crate::failover::{RetryPolicy, RotationBudget};
use crate::models::ModelEntry;
use crate::providers::anthropic::{
  BlockDelta, ContentBlock, MessagesRequest, StreamEvent, Usage,
};
use crate::providers::{AnthropicClient, EventStream, Provider};
use crate::request::RequestPayload;
use crate::stream::{StreamChunk, StreamHandle, StreamItem};
use crate::usage::UsageSink;

/// Result of probing a single key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialCheck
{   pub valid: bool
  , pub model_count: usize
  , pub response_time_ms: u64
  , pub error: Option<String>
}

/// Executes generation requests against the best available credential
#[derive(Clone)]
pub struct Executor
{   provider: Arc<dyn Provider>
  , pool: Arc<CredentialPool>
  , usage: Arc<dyn UsageSink>
  , retry: RetryPolicy
}

impl Executor
{   pub fn new(
      provider: Arc<dyn Provider>
    , pool: Arc<CredentialPool>
    , usage: Arc<dyn UsageSink>
    , retry: RetryPolicy
    ) -> Self
    {   debug!("Creating Executor");
        Executor
        {   provider
          , pool
          , usage
          , retry
        }
    }

    /// Wire an HTTP client, pool and retry policy from configuration
    pub fn from_config(
      config: &ClientConfig
    , store: Arc<dyn CredentialStore>
    , usage: Arc<dyn UsageSink>
    ) -> Self
    {   let provider = Arc::new(AnthropicClient::new(&config.provider));
        let pool = Arc::new(CredentialPool::with_threshold(
          store,
          config.failover.quarantine_threshold
        ));
        Executor::new(
          provider
        , pool
        , usage
        , RetryPolicy::from(&config.failover)
        )
    }

    pub fn pool(&self) -> &Arc<CredentialPool>
    {   &self.pool
    }

    pub(crate) fn provider(&self) -> &Arc<dyn Provider>
    {   &self.provider
    }

    /// Run `op` with the best credential, rotating on rate-limit and
    /// authentication failures and retrying transient ones on the same
    /// credential. Returns the value with the credential that produced
    /// it; the caller records the success.
    pub(crate) async fn call_with_failover<T, F, Fut>(
      &self
    , label: &str
    , retry: &RetryPolicy
    , op: F
    ) -> Result<(T, Credential), ExecutorError>
    where
      F: FnMut(Credential) -> Fut,
      Fut: Future<Output = Result<T, ProviderError>>,
    {   let mut rotations = self.rotation_budget();
        self.call_with_budget(label, retry, &mut rotations, op).await
    }

    /// Rotations allowed for one logical call, sized from the pool now
    fn rotation_budget(&self) -> RotationBudget
    {   RotationBudget::new(self.pool.usable_count(), self.pool.threshold())
    }

    /// [`Executor::call_with_failover`] drawing on a caller-held budget,
    /// so several opens of one stream share a single bound
    async fn call_with_budget<T, F, Fut>(
      &self
    , label: &str
    , retry: &RetryPolicy
    , rotations: &mut RotationBudget
    , mut op: F
    ) -> Result<(T, Credential), ExecutorError>
    where
      F: FnMut(Credential) -> Fut,
      Fut: Future<Output = Result<T, ProviderError>>,
    {   let mut credential = self.pool.select().ok_or_else(|| {
          warn!("{}: no usable credential", label);
          ExecutorError::NoCredentials
        })?;
        let mut attempts = 0usize;

        loop
        {   attempts += 1;
            match op(credential.clone()).await
            {   Ok(value) => {
                  debug!(
                    "{} succeeded with credential {} after {} rotations",
                    label, credential.id, rotations.used
                  );
                  return Ok((value, credential));
                }
              , Err(err) if err.is_rotatable() => {
                  warn!(
                    "{} failed on credential {} ({}); rotating",
                    label, credential.id, err
                  );
                  self.pool.record_failure(credential.id);
                  let exhausted = ExecutorError::from_provider(err);
                  if !rotations.take()
                  {   error!("{}: rotation budget spent", label);
                      return Err(exhausted);
                  }
                  credential = match self.pool.select()
                  {   Some(next) => next
                    , None => {
                        error!("{}: every credential exhausted", label);
                        return Err(exhausted);
                      }
                  };
                  attempts = 0;
                }
              , Err(err) if err.is_retryable()
                  && retry.allows_another(attempts) => {
                  let wait = retry.backoff_for_attempt(attempts);
                  warn!(
                    "{} attempt {} failed ({}); retrying in {:?}",
                    label, attempts, err, wait
                  );
                  tokio::time::sleep(wait).await;
                }
              , Err(err) => {
                  error!("{} failed: {}", label, err);
                  return Err(ExecutorError::from_provider(err));
                }
            }
        }
    }

    /// Blocking call: the full answer text, reasoning excluded
    pub async fn send(
      &self
    , payload: &RequestPayload
    ) -> Result<String, ExecutorError>
    {   let body = payload.to_wire(false);
        let provider = &self.provider;
        let request = &body;

        let (response, credential) = self
          .call_with_failover("send", &self.retry, move |cred: Credential| async move {
            provider.create_message(&cred.secret, request).await
          })
          .await?;

        self.pool.record_success(credential.id);
        self.usage.record(
          response.usage.input_tokens,
          response.usage.output_tokens
        );
        info!(
          "send complete: {} in / {} out tokens",
          response.usage.input_tokens,
          response.usage.output_tokens
        );
        Ok(response.text())
    }

    /// Streaming call on its own task. Rotation applies only while the
    /// stream is opening; a failure after that ends the stream with an
    /// error item.
    pub fn stream(&self, payload: &RequestPayload) -> StreamHandle
    {   let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let executor = self.clone();
        let body = payload.to_wire(true);
        let token = cancel.clone();

        tokio::spawn(async move {
          executor.run_stream(body, tx, token).await;
        });

        StreamHandle::new(rx, cancel)
    }

    async fn run_stream(
      self
    , body: MessagesRequest
    , tx: mpsc::UnboundedSender<StreamItem>
    , cancel: CancellationToken
    )
    {   let mut rotations = self.rotation_budget();
        loop
        {   let provider = &self.provider;
            let request = &body;
            let once = RetryPolicy::once();
            let open = self.call_with_budget(
              "stream",
              &once,
              &mut rotations,
              move |cred: Credential| async move {
                provider.stream_message(&cred.secret, request).await
              }
            );

            let opened = tokio::select!
            { biased;
              _ = cancel.cancelled() => {
                debug!("Stream cancelled while opening");
                return;
              }
            , opened = open => opened
            };

            let (events, credential) = match opened
            {   Ok(v) => v
              , Err(e) => {
                  let _ = tx.send(Err(e));
                  return;
                }
            };
            debug!("Stream open on credential {}", credential.id);

            let err = match self.pump(events, &credential, &tx, &cancel).await
            {   Some(err) => err
              , None => return
            };

            // no text reached the consumer yet: start over on another key
            warn!(
              "Stream on credential {} failed before any text ({}); rotating",
              credential.id, err
            );
            self.pool.record_failure(credential.id);
            if !rotations.take() || self.pool.usable_count() == 0
            {   error!("stream: every credential exhausted");
                let _ = tx.send(Err(ExecutorError::from_provider(err)));
                return;
            }
        }
    }

    /// Forward one opened stream to the consumer. Returns the error when
    /// a rate-limit or authentication failure arrives before any text,
    /// leaving the rotation to the caller; every other ending is
    /// delivered here.
    async fn pump(
      &self
    , mut events: EventStream
    , credential: &Credential
    , tx: &mpsc::UnboundedSender<StreamItem>
    , cancel: &CancellationToken
    ) -> Option<ProviderError>
    {   let mut usage = Usage::default();
        let mut text_sent = false;
        loop
        {   let next = tokio::select!
            { biased;
              _ = cancel.cancelled() => {
                debug!("Stream cancelled by consumer");
                return None;
              }
            , next = events.next() => next
            };

            let event = match next
            {   Some(Ok(event)) => event
              , Some(Err(err)) => {
                  return self.stream_failed(credential, err, text_sent, tx);
                }
              , None => {
                  warn!("Stream closed before message_stop");
                  let _ = tx.send(Err(ExecutorError::TransientFailure(
                    "stream closed before completion".to_string()
                  )));
                  return None;
                }
            };

            let chunk = match event
            {   StreamEvent::MessageStart { message } => {
                  usage = message.usage;
                  None
                }
              , StreamEvent::ContentBlockStart {
                  content_block: ContentBlock::Thinking { .. }
                    | ContentBlock::RedactedThinking
                , ..
                } => Some(StreamChunk::ThinkingStarted)
              , StreamEvent::ContentBlockDelta {
                  delta: BlockDelta::TextDelta { text }
                , ..
                } => Some(StreamChunk::Text(text))
              , StreamEvent::MessageDelta { usage: delta } => {
                  usage.output_tokens = delta.output_tokens;
                  if delta.input_tokens > 0
                  {   usage.input_tokens = delta.input_tokens;
                  }
                  None
                }
              , StreamEvent::MessageStop => {
                  self.finish_stream(credential, usage, tx, cancel);
                  return None;
                }
              , StreamEvent::Error { error } => {
                  let err = error.into_provider_error();
                  return self.stream_failed(credential, err, text_sent, tx);
                }
              // reasoning deltas, block boundaries and pings carry no text
              , StreamEvent::ContentBlockStart { .. }
              | StreamEvent::ContentBlockDelta { .. }
              | StreamEvent::ContentBlockStop { .. }
              | StreamEvent::Ping
              | StreamEvent::Unknown => None
            };

            if let Some(chunk) = chunk
            {   if cancel.is_cancelled()
                {   return None;
                }
                text_sent |= matches!(chunk, StreamChunk::Text(_));
                if tx.send(Ok(chunk)).is_err()
                {   debug!("Stream consumer dropped");
                    return None;
                }
            }
        }
    }

    fn finish_stream(
      &self
    , credential: &Credential
    , usage: Usage
    , tx: &mpsc::UnboundedSender<StreamItem>
    , cancel: &CancellationToken
    )
    {   if cancel.is_cancelled()
        {   debug!("Stream finished after cancellation; dropping result");
            return;
        }
        self.pool.record_success(credential.id);
        self.usage.record(usage.input_tokens, usage.output_tokens);
        info!(
          "stream complete: {} in / {} out tokens",
          usage.input_tokens, usage.output_tokens
        );

        // accounting is settled before the consumer sees Done
        let _ = tx.send(Ok(StreamChunk::UsageInfo
        {   input_tokens: usage.input_tokens
          , output_tokens: usage.output_tokens
        }));
        let _ = tx.send(Ok(StreamChunk::Done));
    }

    /// A failed stream: rotatable errors before any text go back to the
    /// rotation loop, anything later is terminal for the consumer
    fn stream_failed(
      &self
    , credential: &Credential
    , err: ProviderError
    , text_sent: bool
    , tx: &mpsc::UnboundedSender<StreamItem>
    ) -> Option<ProviderError>
    {   if err.is_rotatable() && !text_sent
        {   return Some(err);
        }
        error!("Stream failed mid-delivery: {}", err);
        if err.is_rotatable()
        {   self.pool.record_failure(credential.id);
        }
        let _ = tx.send(Err(ExecutorError::from_provider(err)));
        None
    }

    /// Claude models visible to the current credential, ordered for
    /// display
    pub async fn list_models(&self) -> Result<Vec<ModelEntry>, ExecutorError>
    {   let provider = &self.provider;
        let (models, _) = self
          .call_with_failover("list models", &self.retry, move |cred: Credential| async move {
            provider.list_models(&cred.secret).await
          })
          .await?;
        Ok(crate::models::catalogue(models.iter().map(|m| m.id.as_str())))
    }

    /// Like [`Executor::list_models`], falling back to the static list
    pub async fn available_models(&self) -> Vec<ModelEntry>
    {   match self.list_models().await
        {   Ok(models) if !models.is_empty() => models
          , Ok(_) => crate::models::fallback_catalogue()
          , Err(e) => {
              warn!("Model listing failed ({}); using fallback list", e);
              crate::models::fallback_catalogue()
            }
        }
    }

    /// Probe a key outside the pool; listing models costs no tokens
    pub async fn check_credential(&self, secret: &str) -> CredentialCheck
    {   let start = Instant::now();
        match self.provider.list_models(secret).await
        {   Ok(models) => CredentialCheck
            {   valid: true
              , model_count: models.len()
              , response_time_ms: start.elapsed().as_millis() as u64
              , error: None
            }
          , Err(ProviderError::Authentication(_)) => CredentialCheck
            {   valid: false
              , model_count: 0
              , response_time_ms: 0
              , error: Some("invalid API key".to_string())
            }
          , Err(e) => CredentialCheck
            {   valid: false
              , model_count: 0
              , response_time_ms: 0
              , error: Some(e.to_string())
            }
        }
    }
}
