//! Configuration for the provider client, generation defaults and failover

use std::path::Path;
use serde::{Deserialize, Serialize};
use log::debug;

pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig
{   /// API base URL, without the `/v1` suffix
    pub api_base: String
  , /// Value of the `anthropic-version` header
    pub api_version: String
  , /// Request timeout in seconds; streams are not bounded by it
    pub timeout_secs: Option<u64>
}

impl Default for ProviderConfig
{   fn default() -> Self
    {   ProviderConfig
        {   api_base: DEFAULT_API_BASE.to_string()
          , api_version: DEFAULT_API_VERSION.to_string()
          , timeout_secs: Some(600)
        }
    }
}

/// Generation parameters applied when building requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams
{   pub model: String
  , pub max_tokens: u32
  , pub temperature: f32
  , /// Extended reasoning budget; `None` disables it
    pub reasoning_budget: Option<u32>
}

impl Default for GenerationParams
{   fn default() -> Self
    {   GenerationParams
        {   model: crate::models::DEFAULT_MODEL.to_string()
          , max_tokens: 8192
          , temperature: 0.7
          , reasoning_budget: Some(10_000)
        }
    }
}

/// Failover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig
{   /// Attempts per credential for transient failures
    pub max_attempts: usize
  , /// Backoff multiplier for retries
    pub backoff_multiplier: f32
  , /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64
  , /// Consecutive failures after which a credential is quarantined
    pub quarantine_threshold: u32
}

impl Default for FailoverConfig
{   fn default() -> Self
    {   FailoverConfig
        {   max_attempts: 3
          , backoff_multiplier: 2.0
          , initial_backoff_ms: 100
          , quarantine_threshold: crate::credentials::QUARANTINE_THRESHOLD
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig
{   pub provider: ProviderConfig
  , pub generation: GenerationParams
  , pub failover: FailoverConfig
}

impl ClientConfig
{   /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(
      path: impl AsRef<Path>
    ) -> Result<Self, crate::error::ConfigError>
    {   let path = path.as_ref();
        debug!("Loading config from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(
      raw: &str
    ) -> Result<Self, crate::error::ConfigError>
    {   Ok(serde_json::from_str(raw)?)
    }
}
