//! Credential access for the publisher adapter
//!
//! The credential store is a collaborator, not part of this core: the
//! adapter consumes it through the [`CredentialProvider`] trait, injected
//! explicitly rather than looked up through any ambient state. The only
//! write this core ever performs is persisting a token the adapter refreshed
//! inline before use; per owner that is a single-writer operation, which is
//! acceptable at publish frequencies.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::{ConfigError, FanoutError, Result};
use crate::types::PlatformId;

/// Per-user, per-platform platform credentials.
///
/// Tokens are held in [`SecretString`] so they are zeroed on drop and never
/// land in debug output.
#[derive(Clone)]
pub struct Credentials {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Platform-side account handle (page id, author URN, ...)
    pub account_ref: Option<String>,
    pub expires_at: Option<i64>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into().into(),
            refresh_token: None,
            account_ref: None,
            expires_at: None,
        }
    }

    pub fn with_account_ref(mut self, account_ref: impl Into<String>) -> Self {
        self.account_ref = Some(account_ref.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("account_ref", &self.account_ref)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Read-mostly credential source injected into the publisher adapter
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get(&self, owner_id: &str, platform: PlatformId) -> Result<Option<Credentials>>;

    /// Persist a refreshed token back to the store
    async fn put(&self, owner_id: &str, platform: PlatformId, creds: &Credentials) -> Result<()>;
}

// ----------------------------------------------------------------------
// TOML file store
// ----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    owners: BTreeMap<String, BTreeMap<String, StoredCredentials>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredentials {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    account_ref: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

impl From<&Credentials> for StoredCredentials {
    fn from(creds: &Credentials) -> Self {
        Self {
            access_token: creds.access_token.expose_secret().to_string(),
            refresh_token: creds
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            account_ref: creds.account_ref.clone(),
            expires_at: creds.expires_at,
        }
    }
}

impl From<StoredCredentials> for Credentials {
    fn from(stored: StoredCredentials) -> Self {
        Self {
            access_token: stored.access_token.into(),
            refresh_token: stored.refresh_token.map(Into::into),
            account_ref: stored.account_ref,
            expires_at: stored.expires_at,
        }
    }
}

/// Credentials in a TOML file under the config directory.
///
/// A missing file reads as "no credentials", not an error, so a fresh
/// deployment degrades to credential-missing publish failures rather than
/// refusing to start.
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: &str) -> Self {
        let expanded = shellexpand::tilde(path).to_string();
        Self {
            path: PathBuf::from(expanded),
            write_lock: Mutex::new(()),
        }
    }

    fn read_file(&self) -> Result<CredentialsFile> {
        if !self.path.exists() {
            return Ok(CredentialsFile::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(ConfigError::ReadError)?;
        let file: CredentialsFile = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(file)
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialStore {
    async fn get(&self, owner_id: &str, platform: PlatformId) -> Result<Option<Credentials>> {
        let file = self.read_file()?;
        Ok(file
            .owners
            .get(owner_id)
            .and_then(|platforms| platforms.get(platform.as_str()))
            .cloned()
            .map(Into::into))
    }

    async fn put(&self, owner_id: &str, platform: PlatformId, creds: &Credentials) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut file = self.read_file()?;
        file.owners
            .entry(owner_id.to_string())
            .or_default()
            .insert(platform.as_str().to_string(), StoredCredentials::from(creds));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::ReadError)?;
        }
        let content = toml::to_string(&file)
            .map_err(|e| FanoutError::InvalidInput(format!("unencodable credentials: {}", e)))?;
        std::fs::write(&self.path, content).map_err(ConfigError::ReadError)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// In-memory store (tests, embedding)
// ----------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<HashMap<(String, PlatformId), Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, owner_id: &str, platform: PlatformId, creds: Credentials) {
        self.inner
            .write()
            .await
            .insert((owner_id.to_string(), platform), creds);
    }
}

#[async_trait]
impl CredentialProvider for MemoryCredentialStore {
    async fn get(&self, owner_id: &str, platform: PlatformId) -> Result<Option<Credentials>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&(owner_id.to_string(), platform))
            .cloned())
    }

    async fn put(&self, owner_id: &str, platform: PlatformId, creds: &Credentials) -> Result<()> {
        self.insert(owner_id, platform, creds.clone()).await;
        Ok(())
    }
}
