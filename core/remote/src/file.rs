//! Remote endpoint persisted as a JSON file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use fieldsync_common::{Clock, Error, Inspection, Result, SystemClock, Timestamp};

use crate::authoritative::AuthoritativeSet;
use crate::endpoint::{HealthReport, PushOutcome, PushRecord, RemoteEndpoint};

/// Authoritative set stored in a single JSON document.
///
/// Every call reloads the file, so several processes pointed at the same
/// path observe each other's writes between calls.
pub struct FileRemote {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRemote {
    /// Create an endpoint backed by `path`.
    ///
    /// # Postconditions
    /// - Parent directory exists; the file itself is created on first push
    ///
    /// # Errors
    /// - Parent directory cannot be created
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("Using file remote at {}", path.display());
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Backing JSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<AuthoritativeSet> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(AuthoritativeSet::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Remote(format!("Corrupt remote file: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AuthoritativeSet::new()),
            Err(e) => Err(Error::Network(format!(
                "Cannot read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn store(&self, set: &AuthoritativeSet) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(set)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteEndpoint for FileRemote {
    fn name(&self) -> &str {
        "file"
    }

    async fn push(&self, batch: Vec<PushRecord>) -> Result<PushOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut set = self.load().await?;
        let outcome = set.apply(batch);
        if outcome.synced_count > 0 {
            self.store(&set).await?;
        }
        debug!(
            "File remote applied {} items, {} superseded",
            outcome.synced_count,
            outcome.superseded.len()
        );
        Ok(outcome)
    }

    async fn pull(&self, since: Option<Timestamp>) -> Result<Vec<Inspection>> {
        Ok(self.load().await?.changed_since(since))
    }

    async fn health_check(&self) -> Result<HealthReport> {
        self.load().await?;
        Ok(HealthReport {
            status: "ok".to_string(),
            timestamp: SystemClock.now(),
        })
    }
}
