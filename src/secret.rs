//! HMAC secret providers
//!
//! The pipeline asks its [`SecretProvider`] for the secret on every request
//! and never caches it, so a rotated secret takes effect as soon as the
//! provider sees it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SecretError;

/// Source of the shared webhook secret
pub trait SecretProvider: Send + Sync + 'static {
    /// The secret as it is right now
    fn secret(&self) -> Vec<u8>;
}

/// A secret that never changes. Mostly useful in tests.
#[derive(Clone)]
pub struct StaticSecret(Vec<u8>);

impl std::fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticSecret(..)")
    }
}

impl StaticSecret {
    /// Wrap a fixed secret value
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }
}

impl SecretProvider for StaticSecret {
    fn secret(&self) -> Vec<u8> {
        self.0.clone()
    }
}

/// File-backed secret that is re-read periodically.
///
/// The file is read once at startup, where a failure is fatal, and then on
/// every refresh tick. A failed refresh keeps the last good value.
pub struct SecretAgent {
    path: PathBuf,
    current: Arc<RwLock<Vec<u8>>>,
    refresher: Option<JoinHandle<()>>,
}

impl SecretAgent {
    /// Load the secret from `path` without starting the refresh loop
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SecretError> {
        let path = path.into();
        let secret = read_secret(&path)?;
        info!(path = %path.display(), "Loaded HMAC secret");

        Ok(Self {
            path,
            current: Arc::new(RwLock::new(secret)),
            refresher: None,
        })
    }

    /// Load the secret and re-read it every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(path: impl Into<PathBuf>, interval: Duration) -> Result<Self, SecretError> {
        let mut agent = Self::load(path)?;

        let path = agent.path.clone();
        let current = Arc::clone(&agent.current);
        agent.refresher = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately and the file was just read.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                refresh(&path, &current).await;
            }
        }));

        Ok(agent)
    }

    /// Stop the refresh loop. The last loaded secret stays available.
    pub fn stop(&mut self) {
        if let Some(handle) = self.refresher.take() {
            handle.abort();
            debug!(path = %self.path.display(), "Stopped secret refresh");
        }
    }

    /// Path of the secret file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SecretAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretAgent")
            .field("path", &self.path)
            .field("refreshing", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}

impl SecretProvider for SecretAgent {
    fn secret(&self) -> Vec<u8> {
        self.current.read().clone()
    }
}

impl Drop for SecretAgent {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refresh(path: &Path, current: &RwLock<Vec<u8>>) {
    let raw = tokio::fs::read(path).await;
    match parse_secret(path, raw) {
        Ok(secret) => {
            let mut guard = current.write();
            if *guard != secret {
                info!(path = %path.display(), "HMAC secret rotated");
                *guard = secret;
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to refresh HMAC secret, keeping previous value");
        }
    }
}

fn read_secret(path: &Path) -> Result<Vec<u8>, SecretError> {
    parse_secret(path, std::fs::read(path))
}

fn parse_secret(path: &Path, raw: std::io::Result<Vec<u8>>) -> Result<Vec<u8>, SecretError> {
    let raw = raw.map_err(|source| SecretError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return Err(SecretError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(trimmed.to_vec())
}
