//! Session identity and the persistence it is loaded from.
//!
//! A client produces exactly one [`SessionIdentity`] at startup and hands it to
//! every component. The identity survives restarts through a
//! [`KeyValuePersistence`] backend, which is what lets a former host reclaim
//! its room.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

const SESSION_USER_ID_KEY: &str = "$watchparty$/session/user-id";
const SESSION_USER_NAME_KEY: &str = "$watchparty$/session/user-name";

/// Opaque participant identity as written into room records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Reserved identity used for synthesized room notices.
    pub const SYSTEM: &'static str = "system";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_system(&self) -> bool {
        self.0 == Self::SYSTEM
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Small string key-value store used to persist the session identity.
///
/// Browser builds back this with local/session storage; tests use
/// [`MemoryPersistence`].
pub trait KeyValuePersistence: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// In-memory persistence backend.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValuePersistence for MemoryPersistence {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }
}

/// The local participant: a stable identity plus a fallback display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub id: Identity,
    pub display_name: String,
}

impl SessionIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: Identity::new(id),
            display_name: display_name.into(),
        }
    }

    /// Load the persisted identity, creating and persisting any missing part.
    pub fn load_or_create(persistence: &dyn KeyValuePersistence) -> Self {
        let id = match persistence.get(SESSION_USER_ID_KEY) {
            Some(saved) if !saved.is_empty() => saved,
            _ => {
                let fresh = uuid::Uuid::new_v4().to_string();
                persistence.set(SESSION_USER_ID_KEY, &fresh);
                tracing::debug!(user_id = %fresh, "Created new session identity");
                fresh
            }
        };

        let display_name = match persistence.get(SESSION_USER_NAME_KEY) {
            Some(saved) if !saved.trim().is_empty() => saved,
            _ => {
                let name = format!("User_{}", rand::rng().random_range(100..900));
                persistence.set(SESSION_USER_NAME_KEY, &name);
                name
            }
        };

        Self::new(id, display_name)
    }
}
