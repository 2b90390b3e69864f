use std::fmt;
use std::path::{Path, PathBuf};

use keyring::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Keychain service name for the keyring backend
const SERVICE_NAME: &str = "sessionward";

/// Token file name in the data directory
const TOKEN_FILE: &str = "tokens.json";

/// Access and refresh credentials. Either may be absent.
/// The values are opaque; nothing here inspects them.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Some(access.into()),
            refresh: Some(refresh.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }

    /// Overlay the present fields of `other` onto this pair.
    fn merge(&mut self, other: CredentialPair) {
        if other.access.is_some() {
            self.access = other.access;
        }
        if other.refresh.is_some() {
            self.refresh = other.refresh;
        }
    }
}

// Tokens must never end up in logs
impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("CredentialPair")
            .field("access", &redact(&self.access))
            .field("refresh", &redact(&self.refresh))
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Token file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token file is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Durable home for the credential pair.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Result<CredentialPair, StorageError>;
    fn save(&self, pair: &CredentialPair) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// JSON file in the per-user data directory.
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at `<dir>/tokens.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(TOKEN_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStorage for FileTokenStorage {
    fn load(&self) -> Result<CredentialPair, StorageError> {
        if !self.path.exists() {
            return Ok(CredentialPair::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(pair)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// OS keychain, one entry per credential field.
pub struct KeyringTokenStorage {
    account: String,
}

impl KeyringTokenStorage {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self, field: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(SERVICE_NAME, &format!("{}:{}", self.account, field))?)
    }

    fn read_field(&self, field: &str) -> Result<Option<String>, StorageError> {
        match self.entry(field)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_field(&self, field: &str) -> Result<(), StorageError> {
        match self.entry(field)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TokenStorage for KeyringTokenStorage {
    fn load(&self) -> Result<CredentialPair, StorageError> {
        Ok(CredentialPair {
            access: self.read_field("access")?,
            refresh: self.read_field("refresh")?,
        })
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        if let Some(ref access) = pair.access {
            self.entry("access")?.set_password(access)?;
        }
        if let Some(ref refresh) = pair.refresh {
            self.entry("refresh")?.set_password(refresh)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.delete_field("access")?;
        self.delete_field("refresh")
    }
}

/// Nothing survives the process. Used by tests and ephemeral hosts.
#[derive(Default)]
pub struct MemoryTokenStorage {
    saved: Mutex<CredentialPair>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a previous run left this pair behind.
    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            saved: Mutex::new(pair),
        }
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> Result<CredentialPair, StorageError> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        *self.saved.lock() = pair.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.saved.lock() = CredentialPair::default();
        Ok(())
    }
}

/// In-memory credential pair backed by durable storage.
///
/// The in-memory copy is authoritative for the running process: a failed
/// persist is logged and does not undo the update.
pub struct CredentialStore {
    current: Mutex<CredentialPair>,
    storage: Box<dyn TokenStorage>,
}

impl CredentialStore {
    /// Open the store, loading whatever a previous run persisted.
    pub fn open(storage: Box<dyn TokenStorage>) -> Self {
        let current = match storage.load() {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted credentials, starting signed out");
                CredentialPair::default()
            }
        };
        Self {
            current: Mutex::new(current),
            storage,
        }
    }

    /// A store with nothing persisted and nothing to persist to.
    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryTokenStorage::new()))
    }

    /// Current pair, no I/O.
    pub fn read(&self) -> CredentialPair {
        self.current.lock().clone()
    }

    pub fn access(&self) -> Option<String> {
        self.current.lock().access.clone()
    }

    pub fn refresh(&self) -> Option<String> {
        self.current.lock().refresh.clone()
    }

    pub fn has_refresh(&self) -> bool {
        self.current.lock().refresh.is_some()
    }

    /// Store the present fields of `pair`; absent fields keep their value.
    /// Returns the resulting pair.
    pub(crate) fn write(&self, pair: CredentialPair) -> CredentialPair {
        let merged = {
            let mut current = self.current.lock();
            current.merge(pair);
            current.clone()
        };
        if let Err(e) = self.storage.save(&merged) {
            warn!(error = %e, "Failed to persist credentials");
        }
        debug!(
            access = merged.access.is_some(),
            refresh = merged.refresh.is_some(),
            "Credentials written"
        );
        merged
    }

    /// Forget both credentials, in memory and on disk.
    pub(crate) fn clear(&self) {
        *self.current.lock() = CredentialPair::default();
        if let Err(e) = self.storage.clear() {
            warn!(error = %e, "Failed to clear persisted credentials");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
