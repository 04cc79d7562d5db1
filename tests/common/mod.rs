//! Shared fixtures: a scripted provider and a wired executor

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::mpsc;

use claude_relay::credentials::{Credential, CredentialPool, MemoryCredentialStore};
use claude_relay::error::ProviderError;
use claude_relay::failover::RetryPolicy;
use claude_relay::providers::anthropic::{
  BatchRequestEntry, BlockDelta, ContentBlock, MessagesRequest,
  MessagesResponse, RequestCounts, StartMessage, StreamEvent, Usage,
  WireBatch, WireBatchResult, WireModel,
};
use claude_relay::providers::{EventStream, Provider};
use claude_relay::usage::MemoryUsageSink;
use claude_relay::Executor;

pub fn init_logger()
{   let _ = env_logger::builder().is_test(true).try_init();
}

/// One recorded provider call
#[derive(Debug, Clone, PartialEq)]
pub struct Call
{   pub method: &'static str
  , pub api_key: String
}

/// Provider double answering from per-method queues. An empty queue
/// answers with a transient "unscripted" failure.
#[derive(Default)]
pub struct ScriptedProvider
{   pub messages: Mutex<VecDeque<Result<MessagesResponse, ProviderError>>>
  , pub streams: Mutex<VecDeque<Result<EventStream, ProviderError>>>
  , pub creates: Mutex<VecDeque<Result<WireBatch, ProviderError>>>
  , pub retrieves: Mutex<VecDeque<Result<WireBatch, ProviderError>>>
  , pub results: Mutex<HashMap<String, Vec<WireBatchResult>>>
  , pub cancels: Mutex<VecDeque<Result<WireBatch, ProviderError>>>
  , pub models: Mutex<Option<Result<Vec<WireModel>, ProviderError>>>
  , pub calls: Mutex<Vec<Call>>
  , pub sent_requests: Mutex<Vec<MessagesRequest>>
  , pub submitted: Mutex<Vec<BatchRequestEntry>>
}

fn unscripted<T>() -> Result<T, ProviderError>
{   Err(ProviderError::Transient("unscripted".to_string()))
}

impl ScriptedProvider
{   pub fn new() -> Arc<Self>
    {   Arc::new(Self::default())
    }

    pub fn push_message(&self, r: Result<MessagesResponse, ProviderError>)
    {   self.messages.lock().unwrap().push_back(r);
    }

    pub fn push_stream(&self, r: Result<EventStream, ProviderError>)
    {   self.streams.lock().unwrap().push_back(r);
    }

    pub fn push_events(&self, events: Vec<Result<StreamEvent, ProviderError>>)
    {   self.push_stream(Ok(Box::pin(stream::iter(events))));
    }

    /// Stream fed by the returned sender; stays open until it drops
    pub fn push_live_stream(
      &self
    ) -> mpsc::UnboundedSender<Result<StreamEvent, ProviderError>>
    {   let (tx, rx) = mpsc::unbounded_channel();
        let live = stream::unfold(rx, |mut rx| async move {
          rx.recv().await.map(|item| (item, rx))
        });
        self.push_stream(Ok(Box::pin(live)));
        tx
    }

    pub fn push_create(&self, r: Result<WireBatch, ProviderError>)
    {   self.creates.lock().unwrap().push_back(r);
    }

    pub fn push_retrieve(&self, r: Result<WireBatch, ProviderError>)
    {   self.retrieves.lock().unwrap().push_back(r);
    }

    pub fn push_cancel(&self, r: Result<WireBatch, ProviderError>)
    {   self.cancels.lock().unwrap().push_back(r);
    }

    pub fn set_results(&self, batch_id: &str, results: Vec<WireBatchResult>)
    {   self.results.lock().unwrap().insert(batch_id.to_string(), results);
    }

    pub fn calls(&self) -> Vec<Call>
    {   self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Call>
    {   self.calls().into_iter().filter(|c| c.method == method).collect()
    }

    fn log(&self, method: &'static str, api_key: &str)
    {   self.calls.lock().unwrap().push(Call
        {   method
          , api_key: api_key.to_string()
        });
    }
}

#[async_trait]
impl Provider for ScriptedProvider
{   async fn create_message(
      &self
    , api_key: &str
    , request: &MessagesRequest
    ) -> Result<MessagesResponse, ProviderError>
    {   self.log("create_message", api_key);
        self.sent_requests.lock().unwrap().push(request.clone());
        self.messages.lock().unwrap().pop_front().unwrap_or_else(unscripted)
    }

    async fn stream_message(
      &self
    , api_key: &str
    , request: &MessagesRequest
    ) -> Result<EventStream, ProviderError>
    {   self.log("stream_message", api_key);
        self.sent_requests.lock().unwrap().push(request.clone());
        self.streams.lock().unwrap().pop_front().unwrap_or_else(unscripted)
    }

    async fn create_batch(
      &self
    , api_key: &str
    , requests: &[BatchRequestEntry]
    ) -> Result<WireBatch, ProviderError>
    {   self.log("create_batch", api_key);
        let result = self.creates.lock().unwrap().pop_front().unwrap_or_else(unscripted);
        if result.is_ok()
        {   self.submitted.lock().unwrap().extend_from_slice(requests);
        }
        result
    }

    async fn retrieve_batch(
      &self
    , api_key: &str
    , _batch_id: &str
    ) -> Result<WireBatch, ProviderError>
    {   self.log("retrieve_batch", api_key);
        self.retrieves.lock().unwrap().pop_front().unwrap_or_else(unscripted)
    }

    async fn batch_results(
      &self
    , api_key: &str
    , batch_id: &str
    ) -> Result<Vec<WireBatchResult>, ProviderError>
    {   self.log("batch_results", api_key);
        match self.results.lock().unwrap().get(batch_id)
        {   Some(r) => Ok(r.clone())
          , None => unscripted()
        }
    }

    async fn cancel_batch(
      &self
    , api_key: &str
    , _batch_id: &str
    ) -> Result<WireBatch, ProviderError>
    {   self.log("cancel_batch", api_key);
        self.cancels.lock().unwrap().pop_front().unwrap_or_else(unscripted)
    }

    async fn list_models(
      &self
    , api_key: &str
    ) -> Result<Vec<WireModel>, ProviderError>
    {   self.log("list_models", api_key);
        self.models.lock().unwrap().clone().unwrap_or_else(unscripted)
    }
}

pub struct Fixture
{   pub store: Arc<MemoryCredentialStore>
  , pub usage: Arc<MemoryUsageSink>
  , pub provider: Arc<ScriptedProvider>
  , pub executor: Executor
}

impl Fixture
{   pub fn error_count(&self, id: u64) -> u32
    {   self.store.get(id).map(|c| c.error_count).unwrap()
    }
}

/// Executor over the given keys with instant retries
pub fn fixture(credentials: Vec<Credential>) -> Fixture
{   init_logger();
    let store = Arc::new(MemoryCredentialStore::with_credentials(credentials));
    let usage = Arc::new(MemoryUsageSink::new());
    let provider = ScriptedProvider::new();
    let pool = Arc::new(CredentialPool::new(store.clone()));
    let executor = Executor::new(
      provider.clone()
    , pool
    , usage.clone()
    , RetryPolicy::new(3, 1.0, 0)
    );
    Fixture { store, usage, provider, executor }
}

pub fn key(id: u64, priority: i32) -> Credential
{   Credential::new(id, format!("key-{}", id), format!("sk-{}", id), priority)
}

pub fn rate_limited() -> ProviderError
{   ProviderError::RateLimited("rate_limit_error".to_string())
}

pub fn unauthorized() -> ProviderError
{   ProviderError::Authentication("invalid x-api-key".to_string())
}

/// Response with a reasoning block ahead of the answer
pub fn response(text: &str, input: u64, output: u64) -> MessagesResponse
{   MessagesResponse
    {   id: "msg_1".to_string()
      , content: vec![
          ContentBlock::Thinking { thinking: "hidden deliberation".to_string() }
        , ContentBlock::Text { text: text.to_string() }
        ]
      , usage: Usage { input_tokens: input, output_tokens: output }
      , stop_reason: Some("end_turn".to_string())
    }
}

/// A complete event sequence: reasoning block, then the text pieces
pub fn events(pieces: &[&str], input: u64, output: u64)
  -> Vec<Result<StreamEvent, ProviderError>>
{   let mut out = vec![
      Ok(StreamEvent::MessageStart
      {   message: StartMessage { usage: Usage { input_tokens: input, output_tokens: 1 } }
      })
    , Ok(StreamEvent::ContentBlockStart
      {   index: 0
        , content_block: ContentBlock::Thinking { thinking: String::new() }
      })
    , Ok(StreamEvent::ContentBlockDelta
      {   index: 0
        , delta: BlockDelta::ThinkingDelta { thinking: "hidden deliberation".to_string() }
      })
    , Ok(StreamEvent::ContentBlockStop { index: 0 })
    , Ok(StreamEvent::ContentBlockStart
      {   index: 1
        , content_block: ContentBlock::Text { text: String::new() }
      })
    ];
    for piece in pieces
    {   out.push(Ok(text_delta(piece)));
    }
    out.push(Ok(StreamEvent::ContentBlockStop { index: 1 }));
    out.push(Ok(StreamEvent::Ping));
    out.push(Ok(StreamEvent::MessageDelta
    {   usage: Usage { input_tokens: 0, output_tokens: output }
    }));
    out.push(Ok(StreamEvent::MessageStop));
    out
}

pub fn text_delta(text: &str) -> StreamEvent
{   StreamEvent::ContentBlockDelta
    {   index: 1
      , delta: BlockDelta::TextDelta { text: text.to_string() }
    }
}

pub fn wire_batch(id: &str, status: &str, counts: RequestCounts) -> WireBatch
{   WireBatch
    {   id: id.to_string()
      , processing_status: status.to_string()
      , request_counts: counts
      , created_at: None
      , ended_at: None
      , cancel_initiated_at: None
      , results_url: None
    }
}
