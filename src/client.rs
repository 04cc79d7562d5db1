use std::sync::Arc;
use log::debug;

use crate::batch::{BatchItem, BatchJob, BatchOrchestrator, BatchResult, CancelOutcome};
use crate::config::ClientConfig;
use crate::credentials::{CredentialPool, CredentialStore, PoolStatus};
use crate::error::ExecutorError;
use crate::executor::{CredentialCheck, Executor};
use crate::models::ModelEntry;
use crate::request::RequestPayload;
use crate::stream::StreamHandle;
use crate::usage::UsageSink;

/// Main client interface: single requests, streams and batch jobs over
/// one shared credential pool
pub struct RelayClient
{   config: ClientConfig
  , executor: Executor
  , batches: BatchOrchestrator
}

impl RelayClient
{   /// Build the HTTP provider client and pool from configuration
    pub fn new(
      config: ClientConfig
    , store: Arc<dyn CredentialStore>
    , usage: Arc<dyn UsageSink>
    ) -> Self
    {   debug!("Creating RelayClient for {}", config.provider.api_base);
        let executor = Executor::from_config(&config, store, usage);
        Self::with_executor(config, executor)
    }

    /// Use an existing executor (custom provider or pool)
    pub fn with_executor(config: ClientConfig, executor: Executor) -> Self
    {   let batches = BatchOrchestrator::new(
          executor.clone(),
          config.generation.clone()
        );
        RelayClient
        {   config
          , executor
          , batches
        }
    }

    pub fn config(&self) -> &ClientConfig
    {   &self.config
    }

    pub fn executor(&self) -> &Executor
    {   &self.executor
    }

    pub fn pool(&self) -> &Arc<CredentialPool>
    {   self.executor.pool()
    }

    pub fn batches(&self) -> &BatchOrchestrator
    {   &self.batches
    }

    /// Payload using the configured generation parameters
    pub fn payload(
      &self
    , system: impl Into<String>
    , messages: Vec<crate::request::Message>
    ) -> RequestPayload
    {   RequestPayload::new(&self.config.generation, system, messages)
    }

    pub async fn send(
      &self
    , payload: &RequestPayload
    ) -> Result<String, ExecutorError>
    {   self.executor.send(payload).await
    }

    pub fn stream(&self, payload: &RequestPayload) -> StreamHandle
    {   self.executor.stream(payload)
    }

    pub async fn create_job(
      &self
    , items: &[BatchItem]
    ) -> Result<BatchJob, ExecutorError>
    {   self.batches.create_job(items).await
    }

    pub async fn poll_status(
      &self
    , job_id: &str
    ) -> Result<BatchJob, ExecutorError>
    {   self.batches.poll_status(job_id).await
    }

    pub async fn fetch_results(
      &self
    , job_id: &str
    ) -> Result<Vec<BatchResult>, ExecutorError>
    {   self.batches.fetch_results(job_id).await
    }

    pub async fn cancel_job(
      &self
    , job_id: &str
    ) -> Result<CancelOutcome, ExecutorError>
    {   self.batches.cancel_job(job_id).await
    }

    pub fn supports_extended_reasoning(&self, model_id: &str) -> bool
    {   crate::models::supports_extended_reasoning(model_id)
    }

    pub async fn available_models(&self) -> Vec<ModelEntry>
    {   self.executor.available_models().await
    }

    pub async fn check_credential(&self, secret: &str) -> CredentialCheck
    {   self.executor.check_credential(secret).await
    }

    pub fn pool_status(&self) -> PoolStatus
    {   self.executor.pool().status()
    }
}
