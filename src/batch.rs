//! Batch orchestrator: many independent items as one provider job
//!
//! Job lifecycle: `Created → InProgress → Ended`, or through
//! `Canceling → Canceled`. Polling is caller driven; the orchestrator
//! keeps no timers and only remembers the jobs it created so results
//! can be matched back to their items.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use log::{debug, info, warn, error};

use crate::config::GenerationParams;
use crate::credentials::{Credential, CredentialId};
use crate::error::{ExecutorError, ProviderError};
use crate::executor::Executor;
use crate::failover::RetryPolicy;
use crate::providers::anthropic::{
  BatchRequestEntry, RequestCounts, WireBatch, WireBatchResult, WireResult,
};
use crate::request::{Message, RequestPayload};

/// Outcome text for a submitted item the provider never reported
pub const MISSING_RESULT: &str = "missing result";

const MAX_CUSTOM_ID_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus
{   Created
  , InProgress
  , Canceling
  , Canceled
  , Ended
}

impl BatchStatus
{   pub fn is_terminal(&self) -> bool
    {   matches!(self, BatchStatus::Ended | BatchStatus::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob
{   pub id: String
  , pub status: BatchStatus
  , pub counts: RequestCounts
  , /// Items submitted; falls back to the provider's counts for jobs
    /// this instance did not create
    pub total: u64
  , pub created_at: Option<DateTime<Utc>>
  , pub ended_at: Option<DateTime<Utc>>
}

impl BatchJob
{   /// Fraction of items finished, `(succeeded + errored) / total`
    pub fn progress(&self) -> f64
    {   if self.total == 0
        {   return 0.0;
        }
        (self.counts.succeeded + self.counts.errored) as f64
          / self.total as f64
    }

    pub fn is_terminal(&self) -> bool
    {   self.status.is_terminal()
    }

    /// Once terminal, the provider's counters account for every item
    pub fn counts_consistent(&self) -> bool
    {   !self.is_terminal() || self.counts.total() == self.total
    }
}

/// One unit of work; `custom_id` must be unique within a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem
{   pub custom_id: String
  , pub content: String
  , pub system_prompt: String
}

impl BatchItem
{   pub fn new(
      custom_id: impl Into<String>
    , content: impl Into<String>
    , system_prompt: impl Into<String>
    ) -> Self
    {   BatchItem
        {   custom_id: custom_id.into()
          , content: content.into()
          , system_prompt: system_prompt.into()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOutcome
{   Succeeded(String)
  , Errored(String)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult
{   pub custom_id: String
  , pub outcome: BatchOutcome
}

impl BatchResult
{   pub fn is_success(&self) -> bool
    {   matches!(self.outcome, BatchOutcome::Succeeded(_))
    }

    /// Strict view of the outcome
    pub fn into_text(self) -> Result<String, ExecutorError>
    {   match self.outcome
        {   BatchOutcome::Succeeded(text) => Ok(text)
          , BatchOutcome::Errored(msg) if msg == MISSING_RESULT => {
              Err(ExecutorError::MissingBatchResult(self.custom_id))
            }
          , BatchOutcome::Errored(msg) => Err(ExecutorError::ProviderError(msg))
        }
    }
}

/// What `cancel_job` did
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome
{   /// Provider accepted the cancellation
    Requested(BatchJob)
  , /// Job had already ended; nothing changed
    NothingToCancel
}

struct TrackedJob
{   credential_id: CredentialId
  , custom_ids: Vec<String>
  , cancel_requested: bool
  , last: BatchJob
}

pub struct BatchOrchestrator
{   executor: Executor
  , params: GenerationParams
  , jobs: Mutex<HashMap<String, TrackedJob>>
}

impl BatchOrchestrator
{   pub fn new(executor: Executor, params: GenerationParams) -> Self
    {   debug!("Creating BatchOrchestrator for {}", params.model);
        BatchOrchestrator
        {   executor
          , params
          , jobs: Mutex::new(HashMap::new())
        }
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedJob>>
    {   self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last known state of a job created here
    pub fn tracked(&self, job_id: &str) -> Option<BatchJob>
    {   self.jobs().get(job_id).map(|t| t.last.clone())
    }

    /// Submit every item as one provider job. Nothing is submitted when
    /// validation or credential acquisition fails.
    pub async fn create_job(
      &self
    , items: &[BatchItem]
    ) -> Result<BatchJob, ExecutorError>
    {   validate_items(items)?;

        let entries: Vec<BatchRequestEntry> = items
          .iter()
          .map(|item| BatchRequestEntry
          {   custom_id: item.custom_id.clone()
            , params: RequestPayload::new(
                &self.params,
                item.system_prompt.clone(),
                vec![Message::user(item.content.clone())]
              ).to_wire(false)
          })
          .collect();

        let provider = self.executor.provider();
        let requests = entries.as_slice();
        // a retried create could leave a duplicate job behind
        let once = RetryPolicy::once();
        let (wire, credential) = self.executor
          .call_with_failover("create batch", &once, move |cred: Credential| async move {
            provider.create_batch(&cred.secret, requests).await
          })
          .await?;
        self.executor.pool().record_success(credential.id);

        let job = BatchJob
        {   id: wire.id.clone()
          , status: BatchStatus::Created
          , counts: wire.request_counts
          , total: items.len() as u64
          , created_at: wire.created_at
          , ended_at: wire.ended_at
        };
        info!("Batch {} created with {} items", job.id, items.len());

        self.jobs().insert(job.id.clone(), TrackedJob
        {   credential_id: credential.id
          , custom_ids: items.iter().map(|i| i.custom_id.clone()).collect()
          , cancel_requested: false
          , last: job.clone()
        });
        Ok(job)
    }

    /// One status round trip. Terminal jobs created here are answered
    /// from memory.
    pub async fn poll_status(
      &self
    , job_id: &str
    ) -> Result<BatchJob, ExecutorError>
    {   if let Some(job) = self.tracked(job_id).filter(BatchJob::is_terminal)
        {   debug!("Batch {} already {:?}", job_id, job.status);
            return Ok(job);
        }

        let credential = self.job_credential(job_id)?;
        let wire = self.executor
          .provider()
          .retrieve_batch(&credential.secret, job_id)
          .await
          .map_err(|e| self.provider_failure(&credential, e))?;

        let job = self.update_from_wire(&wire);
        debug!(
          "Batch {} is {:?} ({:.0}% done)",
          job_id, job.status, job.progress() * 100.0
        );
        Ok(job)
    }

    /// Results in submission order, one per submitted item. Valid once
    /// the job has ended (or was canceled).
    pub async fn fetch_results(
      &self
    , job_id: &str
    ) -> Result<Vec<BatchResult>, ExecutorError>
    {   let expected = match self.jobs().get(job_id)
        {   Some(tracked) => {
              if !tracked.last.is_terminal()
              {   return Err(ExecutorError::BatchNotEnded(job_id.to_string()));
              }
              Some(tracked.custom_ids.clone())
            }
          , None => None
        };

        match expected
        {   Some(ids) => self.fetch_results_for(job_id, &ids).await
          , None => {
              warn!(
                "Batch {} not created here; results cannot be checked \
                 against submitted items",
                job_id
              );
              let job = self.poll_status(job_id).await?;
              if !job.is_terminal()
              {   return Err(ExecutorError::BatchNotEnded(job_id.to_string()));
              }
              let wire = self.download(job_id).await?;
              let ids: Vec<String> = wire
                .iter()
                .map(|r| r.custom_id.clone())
                .collect();
              reconcile(&ids, wire)
            }
        }
    }

    /// Results for a job whose item ids the caller persisted, e.g. one
    /// created by an earlier process
    pub async fn fetch_results_for(
      &self
    , job_id: &str
    , expected_ids: &[String]
    ) -> Result<Vec<BatchResult>, ExecutorError>
    {   let wire = self.download(job_id).await?;
        let results = reconcile(expected_ids, wire)?;
        let ok = results.iter().filter(|r| r.is_success()).count();
        info!(
          "Batch {}: {} of {} items succeeded",
          job_id, ok, results.len()
        );
        Ok(results)
    }

    async fn download(
      &self
    , job_id: &str
    ) -> Result<Vec<WireBatchResult>, ExecutorError>
    {   let credential = self.job_credential(job_id)?;
        self.executor
          .provider()
          .batch_results(&credential.secret, job_id)
          .await
          .map_err(|e| self.provider_failure(&credential, e))
    }

    /// Best-effort cancel. A job that already ended resolves to
    /// [`CancelOutcome::NothingToCancel`].
    pub async fn cancel_job(
      &self
    , job_id: &str
    ) -> Result<CancelOutcome, ExecutorError>
    {   if let Some(job) = self.tracked(job_id)
        {   if job.is_terminal()
            {   info!("Batch {} already {:?}; nothing to cancel", job_id, job.status);
                return Ok(CancelOutcome::NothingToCancel);
            }
        }

        let credential = self.job_credential(job_id)?;
        let provider = self.executor.provider();
        match provider.cancel_batch(&credential.secret, job_id).await
        {   Ok(wire) => {
              if wire.processing_status == "ended"
                && wire.cancel_initiated_at.is_none()
              {   // finished on its own before the cancel landed
                  let job = self.update_from_wire(&wire);
                  info!(
                    "Batch {} already {:?}; nothing to cancel",
                    job_id, job.status
                  );
                  return Ok(CancelOutcome::NothingToCancel);
              }
              if let Some(tracked) = self.jobs().get_mut(job_id)
              {   tracked.cancel_requested = true;
              }
              let job = self.update_from_wire(&wire);
              info!("Batch {} cancel requested ({:?})", job_id, job.status);
              Ok(CancelOutcome::Requested(job))
            }
          , Err(ProviderError::Rejected { status, message }) => {
              // cancellation racing completion: the provider refuses
              // to cancel an ended job
              debug!("Cancel of {} rejected ({}): {}", job_id, status, message);
              let wire = provider
                .retrieve_batch(&credential.secret, job_id)
                .await
                .map_err(|e| self.provider_failure(&credential, e))?;
              if wire.processing_status == "ended"
              {   info!("Batch {} ended before cancel; nothing to cancel", job_id);
                  Ok(CancelOutcome::NothingToCancel)
              } else
              {   error!("Cancel of {} failed: {}", job_id, message);
                  Err(ExecutorError::ProviderError(message))
              }
            }
          , Err(e) => Err(self.provider_failure(&credential, e))
        }
    }

    /// Credential bound to a tracked job, or the pool's best for jobs
    /// created elsewhere
    fn job_credential(&self, job_id: &str) -> Result<Credential, ExecutorError>
    {   let bound = self.jobs().get(job_id).map(|t| t.credential_id);
        let credential = match bound
        {   Some(id) => self.executor.pool().get(id)
          , None => self.executor.pool().select()
        };
        credential.ok_or(ExecutorError::NoCredentials)
    }

    fn provider_failure(
      &self
    , credential: &Credential
    , err: ProviderError
    ) -> ExecutorError
    {   error!("Batch call on credential {} failed: {}", credential.id, err);
        if err.is_rotatable()
        {   self.executor.pool().record_failure(credential.id);
        }
        ExecutorError::from_provider(err)
    }

    /// Fold a provider snapshot into the tracked state
    fn update_from_wire(&self, wire: &WireBatch) -> BatchJob
    {   let mut jobs = self.jobs();
        let tracked = jobs.get_mut(&wire.id);
        let cancel_requested = tracked
          .as_ref()
          .map(|t| t.cancel_requested)
          .unwrap_or(false)
          || wire.cancel_initiated_at.is_some();

        let status = match wire.processing_status.as_str()
        {   "in_progress" => BatchStatus::InProgress
          , "canceling" => BatchStatus::Canceling
          , "ended" if cancel_requested => BatchStatus::Canceled
          , "ended" => BatchStatus::Ended
          , other => {
              warn!("Unknown batch status {:?}; treating as in progress", other);
              BatchStatus::InProgress
            }
        };

        let total = tracked
          .as_ref()
          .map(|t| t.custom_ids.len() as u64)
          .unwrap_or_else(|| wire.request_counts.total());

        let job = BatchJob
        {   id: wire.id.clone()
          , status
          , counts: wire.request_counts
          , total
          , created_at: wire.created_at
          , ended_at: wire.ended_at
        };
        if let Some(tracked) = tracked
        {   if !job.counts_consistent()
            {   warn!(
                  "Batch {} {:?} with {} counted results for {} items",
                  job.id, job.status, job.counts.total(), job.total
                );
            }
            tracked.last = job.clone();
        }
        job
    }
}

/// Reject empty jobs and duplicate or malformed ids before submission
fn validate_items(items: &[BatchItem]) -> Result<(), ExecutorError>
{   if items.is_empty()
    {   return Err(ExecutorError::InvalidBatch("no items".to_string()));
    }
    let mut seen = HashSet::new();
    for item in items
    {   let id = item.custom_id.as_str();
        let well_formed = !id.is_empty()
          && id.len() <= MAX_CUSTOM_ID_LEN
          && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !well_formed
        {   return Err(ExecutorError::InvalidBatch(
              format!("malformed custom id {:?}", id)
            ));
        }
        if !seen.insert(id)
        {   return Err(ExecutorError::InvalidBatch(
              format!("duplicate custom id {:?}", id)
            ));
        }
    }
    Ok(())
}

/// Match provider results to submitted ids: exactly one result per id,
/// in submission order. Ids the provider invented are an error.
fn reconcile(
  expected_ids: &[String]
, results: Vec<WireBatchResult>
) -> Result<Vec<BatchResult>, ExecutorError>
{   let expected: HashSet<&str> = expected_ids
      .iter()
      .map(String::as_str)
      .collect();
    let mut by_id: HashMap<String, BatchOutcome> = HashMap::new();

    for result in results
    {   if !expected.contains(result.custom_id.as_str())
        {   return Err(ExecutorError::ProviderError(
              format!("result for unknown custom id {}", result.custom_id)
            ));
        }
        let outcome = match result.result
        {   WireResult::Succeeded { message } => BatchOutcome::Succeeded(message.text())
          , WireResult::Errored { error } => {
              BatchOutcome::Errored(WireResult::error_message(&error))
            }
          , WireResult::Canceled => BatchOutcome::Errored("canceled".to_string())
          , WireResult::Expired => BatchOutcome::Errored("expired".to_string())
        };
        if by_id.insert(result.custom_id.clone(), outcome).is_some()
        {   return Err(ExecutorError::ProviderError(
              format!("duplicate result for custom id {}", result.custom_id)
            ));
        }
    }

    Ok(expected_ids
      .iter()
      .map(|id| {
        let outcome = by_id.remove(id).unwrap_or_else(|| {
          warn!("No result for batch item {}", id);
          BatchOutcome::Errored(MISSING_RESULT.to_string())
        });
        BatchResult
        {   custom_id: id.clone()
          , outcome
        }
      })
      .collect())
}
