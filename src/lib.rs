//! claude-relay: reliable text generation over a pool of provider keys.
//!
//! ```text
//! caller ─┬─ Executor::send / stream ──┐
//!         └─ BatchOrchestrator ────────┤── Provider (HTTP) ── API
//!                                      └── CredentialPool ── store
//! ```
//!
//! Rate-limit and authentication failures rotate to another key;
//! transient failures retry on the same key; callers only ever see
//! [`ExecutorError`].

pub mod error;
pub mod config;
pub mod models;
pub mod request;
pub mod credentials;
pub mod usage;
pub mod failover;
pub mod providers;
pub mod stream;
pub mod executor;
pub mod batch;
pub mod client;

pub use batch::{
  BatchItem, BatchJob, BatchOrchestrator, BatchOutcome, BatchResult,
  BatchStatus, CancelOutcome,
};
pub use client::RelayClient;
pub use config::{ClientConfig, FailoverConfig, GenerationParams, ProviderConfig};
pub use credentials::{
  Credential, CredentialId, CredentialPool, CredentialStore,
  MemoryCredentialStore, PoolHealth, PoolStatus,
};
pub use error::{ExecutorError, ProviderError};
pub use executor::{CredentialCheck, Executor};
pub use models::supports_extended_reasoning;
pub use request::{Attachment, Message, RequestPayload, Role};
pub use stream::{StreamChunk, StreamHandle};
pub use usage::{MemoryUsageSink, NoopUsageSink, UsageSink};

/// Initialize `env_logger` once; honours `RUST_LOG`, defaulting to
/// `info`. Safe to call repeatedly.
pub fn init_logging()
{   let _ = env_logger::Builder::from_env(
      env_logger::Env::default().default_filter_or("info")
    )
    .try_init();
}
