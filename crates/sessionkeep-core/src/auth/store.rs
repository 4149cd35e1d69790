//! Persistent storage for the session credential.
//!
//! Three string keys live under a namespace: `<ns>_token`,
//! `<ns>_refresh_token` and `<ns>_role`. A missing access-token key means
//! logged out. The credential is always saved and cleared as a whole.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyring::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default key namespace
pub const DEFAULT_NAMESPACE: &str = "sgcd_pm";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub role: Option<String>,
}

/// Key names for one namespace
#[derive(Debug, Clone)]
pub struct StorageKeys {
    pub token: String,
    pub refresh_token: String,
    pub role: String,
}

impl StorageKeys {
    pub fn new(namespace: &str) -> Self {
        Self {
            token: format!("{}_token", namespace),
            refresh_token: format!("{}_refresh_token", namespace),
            role: format!("{}_role", namespace),
        }
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionCredential>>;

    fn save(&self, credential: &SessionCredential) -> Result<()>;

    fn clear(&self) -> Result<()>;

    /// Current credential, treating a read failure as "no session"
    fn current(&self) -> Option<SessionCredential> {
        match self.load() {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Failed to read stored credentials");
                None
            }
        }
    }

    fn access_token(&self) -> Option<String> {
        self.current().map(|c| c.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.current().and_then(|c| c.refresh_token)
    }

    fn role(&self) -> Option<String> {
        self.current().and_then(|c| c.role)
    }
}

// ============================================================================
// File store
// ============================================================================

/// JSON key/value document on disk, shared by every namespace
pub struct FileStore {
    path: PathBuf,
    keys: StorageKeys,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(cache_dir: &Path, namespace: &str) -> Self {
        Self {
            path: cache_dir.join(SESSION_FILE),
            keys: StorageKeys::new(namespace),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read session file")?;
        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    fn write_document(&self, document: &BTreeMap<String, String>) -> Result<()> {
        if document.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove session file")?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(document)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn remove_keys(&self, document: &mut BTreeMap<String, String>) {
        document.remove(&self.keys.token);
        document.remove(&self.keys.refresh_token);
        document.remove(&self.keys.role);
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Result<Option<SessionCredential>> {
        let _guard = self.lock.lock();
        let mut document = self.read_document()?;
        Ok(document.remove(&self.keys.token).map(|access_token| SessionCredential {
            access_token,
            refresh_token: document.remove(&self.keys.refresh_token),
            role: document.remove(&self.keys.role),
        }))
    }

    fn save(&self, credential: &SessionCredential) -> Result<()> {
        let _guard = self.lock.lock();
        let mut document = self.read_document().unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable session file");
            BTreeMap::new()
        });
        self.remove_keys(&mut document);
        document.insert(self.keys.token.clone(), credential.access_token.clone());
        if let Some(ref refresh) = credential.refresh_token {
            document.insert(self.keys.refresh_token.clone(), refresh.clone());
        }
        if let Some(ref role) = credential.role {
            document.insert(self.keys.role.clone(), role.clone());
        }
        self.write_document(&document)?;
        debug!(path = ?self.path, "Session credential saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        let mut document = self.read_document().unwrap_or_default();
        self.remove_keys(&mut document);
        self.write_document(&document)
    }
}

// ============================================================================
// Keyring store
// ============================================================================

/// OS keychain storage, one entry per key under the namespace service name
pub struct KeyringStore {
    service: String,
    keys: StorageKeys,
}

impl KeyringStore {
    pub fn new(namespace: &str) -> Self {
        Self {
            service: namespace.to_string(),
            keys: StorageKeys::new(namespace),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credential from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store credential in keychain")
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

impl CredentialStore for KeyringStore {
    fn load(&self) -> Result<Option<SessionCredential>> {
        let Some(access_token) = self.get(&self.keys.token)? else {
            return Ok(None);
        };
        Ok(Some(SessionCredential {
            access_token,
            refresh_token: self.get(&self.keys.refresh_token)?,
            role: self.get(&self.keys.role)?,
        }))
    }

    fn save(&self, credential: &SessionCredential) -> Result<()> {
        write_keys(
            &self.keys,
            credential,
            |key, value| self.set(key, value),
            |key| self.delete(key),
        )
    }

    fn clear(&self) -> Result<()> {
        // Remove the access token first so a partial failure reads as logged out
        self.delete(&self.keys.token)?;
        self.delete(&self.keys.refresh_token)?;
        self.delete(&self.keys.role)
    }
}

/// Write `credential` one key at a time, access token last. If any write
/// fails every key is removed, so a half-written credential reads as logged out.
fn write_keys(
    keys: &StorageKeys,
    credential: &SessionCredential,
    set: impl Fn(&str, &str) -> Result<()>,
    delete: impl Fn(&str) -> Result<()>,
) -> Result<()> {
    let written = (|| -> Result<()> {
        match credential.refresh_token {
            Some(ref refresh) => set(&keys.refresh_token, refresh)?,
            None => delete(&keys.refresh_token)?,
        }
        match credential.role {
            Some(ref role) => set(&keys.role, role)?,
            None => delete(&keys.role)?,
        }
        set(&keys.token, &credential.access_token)
    })();

    if let Err(e) = written {
        for key in [&keys.token, &keys.refresh_token, &keys.role] {
            if let Err(err) = delete(key) {
                warn!(key = key.as_str(), error = %err, "Failed to remove partially written credential");
            }
        }
        return Err(e);
    }
    Ok(())
}

// ============================================================================
// Memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    credential: Mutex<Option<SessionCredential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: SessionCredential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<Option<SessionCredential>> {
        Ok(self.credential.lock().clone())
    }

    fn save(&self, credential: &SessionCredential) -> Result<()> {
        *self.credential.lock() = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.credential.lock() = None;
        Ok(())
    }
}
