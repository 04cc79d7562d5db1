//! Credential pool: selection, failure quarantine and success accounting
//!
//! Credential records belong to an external store. The pool reads
//! through to it and funnels every mutation through one lock, so
//! concurrent executors rotating at the same time cannot lose counter
//! updates.

use std::sync::{Arc, Mutex, PoisonError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use log::{debug, info, warn};

/// Consecutive failures after which a credential is never selected
pub const QUARANTINE_THRESHOLD: u32 = 3;

pub type CredentialId = u64;

/// A provider API key and its health
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential
{   pub id: CredentialId
  , pub name: String
  , pub secret: String
  , /// Higher is preferred
    pub priority: i32
  , pub active: bool
  , pub error_count: u32
  , pub last_used: Option<DateTime<Utc>>
}

impl Credential
{   pub fn new(
      id: CredentialId
    , name: impl Into<String>
    , secret: impl Into<String>
    , priority: i32
    ) -> Self
    {   Credential
        {   id
          , name: name.into()
          , secret: secret.into()
          , priority
          , active: true
          , error_count: 0
          , last_used: None
        }
    }

    /// Active and below the quarantine threshold
    pub fn is_usable(&self, threshold: u32) -> bool
    {   self.active && self.error_count < threshold
    }
}

impl std::fmt::Debug for Credential
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {   f.debug_struct("Credential")
          .field("id", &self.id)
          .field("name", &self.name)
          .field("secret", &"<redacted>")
          .field("priority", &self.priority)
          .field("active", &self.active)
          .field("error_count", &self.error_count)
          .field("last_used", &self.last_used)
          .finish()
    }
}

/// Storage collaborator owning credential records
pub trait CredentialStore: Send + Sync
{   /// Every record, usable or not
    fn list_all(&self) -> Vec<Credential>;

    /// Records with the active flag set
    fn list_usable(&self) -> Vec<Credential>
    {   self.list_all().into_iter().filter(|c| c.active).collect()
    }

    fn touch(&self, id: CredentialId, at: DateTime<Utc>);
    fn bump_error_count(&self, id: CredentialId);
    fn reset_error_count(&self, id: CredentialId);
}

/// Selection policy: among usable credentials, highest priority first,
/// then least recently used (never-used counts as oldest).
pub fn select_from(
  credentials: &[Credential]
, threshold: u32
) -> Option<&Credential>
{   credentials
      .iter()
      .filter(|c| c.is_usable(threshold))
      .min_by(|a, b| {
        b.priority
          .cmp(&a.priority)
          .then_with(|| a.last_used.cmp(&b.last_used))
          .then_with(|| a.id.cmp(&b.id))
      })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolHealth
{   /// At least one usable key
    Ok
  , /// Keys exist but all are inactive or quarantined
    Warning
  , /// No keys configured
    None
}

/// Summary shown next to the key settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus
{   pub total_keys: usize
  , pub usable_keys: usize
  , pub current_key_id: Option<CredentialId>
  , pub current_key_name: Option<String>
  , pub total_errors: u32
  , pub health: PoolHealth
}

/// Arbitration layer over a [`CredentialStore`]
pub struct CredentialPool
{   store: Arc<dyn CredentialStore>
  , threshold: u32
  , lock: Mutex<()>
}

impl CredentialPool
{   pub fn new(store: Arc<dyn CredentialStore>) -> Self
    {   Self::with_threshold(store, QUARANTINE_THRESHOLD)
    }

    pub fn with_threshold(
      store: Arc<dyn CredentialStore>
    , threshold: u32
    ) -> Self
    {   debug!("Creating CredentialPool (threshold {})", threshold);
        CredentialPool
        {   store
          , threshold: threshold.max(1)
          , lock: Mutex::new(())
        }
    }

    pub fn threshold(&self) -> u32
    {   self.threshold
    }

    /// Best usable credential, or `None` when every key is inactive or
    /// quarantined
    pub fn select(&self) -> Option<Credential>
    {   let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let candidates = self.store.list_usable();
        let chosen = select_from(&candidates, self.threshold).cloned();
        match &chosen
        {   Some(c) => debug!("Selected credential {} ({})", c.id, c.name)
          , None => warn!("No usable credential among {}", candidates.len())
        }
        chosen
    }

    /// Look up a credential regardless of its health; batch jobs stay
    /// bound to the key that created them
    pub fn get(&self, id: CredentialId) -> Option<Credential>
    {   let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.list_all().into_iter().find(|c| c.id == id)
    }

    /// Number of credentials `select` could currently return
    pub fn usable_count(&self) -> usize
    {   let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store
          .list_usable()
          .iter()
          .filter(|c| c.is_usable(self.threshold))
          .count()
    }

    pub fn record_success(&self, id: CredentialId)
    {   let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Credential {} succeeded", id);
        self.store.reset_error_count(id);
        self.store.touch(id, Utc::now());
    }

    pub fn record_failure(&self, id: CredentialId)
    {   let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.bump_error_count(id);
        let count = self.store
          .list_all()
          .into_iter()
          .find(|c| c.id == id)
          .map(|c| c.error_count)
          .unwrap_or_default();
        if count >= self.threshold
        {   warn!("Credential {} quarantined after {} failures", id, count);
        } else
        {   debug!("Credential {} failure count now {}", id, count);
        }
    }

    /// Operator action: bring a quarantined credential back
    pub fn reset(&self, id: CredentialId)
    {   let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        info!("Credential {} reset by operator", id);
        self.store.reset_error_count(id);
    }

    pub fn status(&self) -> PoolStatus
    {   let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let all = self.store.list_all();
        let usable: Vec<Credential> = all
          .iter()
          .filter(|c| c.is_usable(self.threshold))
          .cloned()
          .collect();
        let current = select_from(&usable, self.threshold);
        let health = if !usable.is_empty()
        {   PoolHealth::Ok
        } else if !all.is_empty()
        {   PoolHealth::Warning
        } else
        {   PoolHealth::None
        };

        PoolStatus
        {   total_keys: all.len()
          , usable_keys: usable.len()
          , current_key_id: current.map(|c| c.id)
          , current_key_name: current.map(|c| c.name.clone())
          , total_errors: all.iter().map(|c| c.error_count).sum()
          , health
        }
    }
}

/// In-process credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore
{   records: Mutex<Vec<Credential>>
}

impl MemoryCredentialStore
{   pub fn new() -> Self
    {   Self::default()
    }

    pub fn with_credentials(credentials: Vec<Credential>) -> Self
    {   MemoryCredentialStore
        {   records: Mutex::new(credentials)
        }
    }

    pub fn add(&self, credential: Credential)
    {   self.edit(|records| records.push(credential));
    }

    pub fn set_active(&self, id: CredentialId, active: bool)
    {   self.update(id, |c| c.active = active);
    }

    pub fn set_priority(&self, id: CredentialId, priority: i32)
    {   self.update(id, |c| c.priority = priority);
    }

    pub fn get(&self, id: CredentialId) -> Option<Credential>
    {   self.list_all().into_iter().find(|c| c.id == id)
    }

    fn edit<R>(&self, f: impl FnOnce(&mut Vec<Credential>) -> R) -> R
    {   let mut records = self.records
          .lock()
          .unwrap_or_else(PoisonError::into_inner);
        f(&mut records)
    }

    fn update(&self, id: CredentialId, f: impl FnOnce(&mut Credential))
    {   self.edit(|records| {
          if let Some(c) = records.iter_mut().find(|c| c.id == id)
          {   f(c);
          }
        });
    }
}

impl CredentialStore for MemoryCredentialStore
{   fn list_all(&self) -> Vec<Credential>
    {   self.edit(|records| records.clone())
    }

    fn touch(&self, id: CredentialId, at: DateTime<Utc>)
    {   self.update(id, |c| c.last_used = Some(at));
    }

    fn bump_error_count(&self, id: CredentialId)
    {   self.update(id, |c| c.error_count = c.error_count.saturating_add(1));
    }

    fn reset_error_count(&self, id: CredentialId)
    {   self.update(id, |c| c.error_count = 0);
    }
}
