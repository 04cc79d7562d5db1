//! Error types: provider-level failures and the caller-facing taxonomy

use thiserror::Error;

/// Classified failure from one provider call.
/// Never handed to callers directly; the executor folds these into
/// [`ExecutorError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError
{   /// HTTP 429 or a `rate_limit_error` body
    #[error("rate limited: {0}")]
    RateLimited(String)
  , /// HTTP 401/403 or an `authentication_error` body
    #[error("authentication failed: {0}")]
    Authentication(String)
  , /// Transport failure, 5xx or provider overload; worth retrying
    #[error("transient failure: {0}")]
    Transient(String)
  , /// Any other rejected request, passed through with its message
    #[error("provider rejected request ({status}): {message}")]
    Rejected
    {   status: u16
      , message: String
    }
  , /// Response body did not match the expected schema
    #[error("parse error: {0}")]
    Parse(String)
}

impl ProviderError
{   /// Failures handled by switching to another credential
    pub fn is_rotatable(&self) -> bool
    {   matches!(
          self,
          ProviderError::RateLimited(_)
            | ProviderError::Authentication(_)
        )
    }

    /// Failures worth repeating with the same credential
    pub fn is_retryable(&self) -> bool
    {   matches!(self, ProviderError::Transient(_))
    }

    /// Classify an HTTP status and provider message
    pub fn from_status(status: u16, message: String) -> Self
    {   match status
        {   429 => ProviderError::RateLimited(message)
          , 401 | 403 => ProviderError::Authentication(message)
          , 500..=599 => ProviderError::Transient(message)
          , _ => ProviderError::Rejected { status, message }
        }
    }

    /// Classify a provider error type string (as found in SSE error
    /// events and batch result errors)
    pub fn from_error_type(kind: &str, message: String) -> Self
    {   match kind
        {   "rate_limit_error" => ProviderError::RateLimited(message)
          , "authentication_error" | "permission_error" => {
              ProviderError::Authentication(message)
            }
          , "overloaded_error" | "api_error" | "timeout_error" => {
              ProviderError::Transient(message)
            }
          , _ => ProviderError::Rejected { status: 400, message }
        }
    }

    pub fn message(&self) -> &str
    {   match self
        {   ProviderError::RateLimited(m)
          | ProviderError::Authentication(m)
          | ProviderError::Transient(m)
          | ProviderError::Parse(m) => m
          , ProviderError::Rejected { message, .. } => message
        }
    }
}

impl From<reqwest::Error> for ProviderError
{   fn from(e: reqwest::Error) -> Self
    {   if e.is_decode()
        {   ProviderError::Parse(e.to_string())
        } else
        {   ProviderError::Transient(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError
{   fn from(e: serde_json::Error) -> Self
    {   ProviderError::Parse(e.to_string())
    }
}

/// Closed error set returned by the executor and batch orchestrator.
/// Implements Clone for sending through channels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError
{   /// No usable credential before the first attempt
    #[error("no usable API key; add one in settings")]
    NoCredentials
  , /// Every usable credential was rate limited
    #[error("all API keys are rate limited; try again later")]
    AllCredentialsExhausted
  , /// Every usable credential failed authentication
    #[error("API key is invalid; check your keys")]
    InvalidCredential
  , /// Same-credential retry budget spent on transient failures
    #[error("request failed after retries: {0}")]
    TransientFailure(String)
  , /// Non-recoverable provider response
    #[error("provider error: {0}")]
    ProviderError(String)
  , /// A submitted batch item has no provider result
    #[error("missing batch result for {0}")]
    MissingBatchResult(String)
  , /// Batch rejected locally; nothing was submitted
    #[error("invalid batch: {0}")]
    InvalidBatch(String)
  , /// Results requested before the job ended
    #[error("batch {0} has not ended")]
    BatchNotEnded(String)
}

impl ExecutorError
{   /// Map a provider failure that is no longer recoverable locally
    pub fn from_provider(err: ProviderError) -> Self
    {   match err
        {   ProviderError::RateLimited(_) => {
              ExecutorError::AllCredentialsExhausted
            }
          , ProviderError::Authentication(_) => {
              ExecutorError::InvalidCredential
            }
          , ProviderError::Transient(m) => {
              ExecutorError::TransientFailure(m)
            }
          , ProviderError::Rejected { message, .. } => {
              ExecutorError::ProviderError(message)
            }
          , ProviderError::Parse(m) => {
              ExecutorError::ProviderError(m)
            }
        }
    }

    /// Whether the caller should be sent to key settings
    pub fn needs_credentials(&self) -> bool
    {   matches!(
          self,
          ExecutorError::NoCredentials
            | ExecutorError::InvalidCredential
        )
    }
}

/// Failure loading a [`crate::config::ClientConfig`]
#[derive(Debug, Error)]
pub enum ConfigError
{   #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error)
  , #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error)
}
