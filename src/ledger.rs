/// Tombstone ledger
///
/// Durable list of filenames deleted locally whose remote copies have not yet
/// been confirmed gone. Persists as a JSON array under one fixed key.
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::asset::AssetPair;
use crate::error::Result;
use crate::store::PreferenceStore;

/// Preference key holding the tombstone list
pub const TOMBSTONE_KEY: &str = "lumos_deleted_images";

/// Where an unreadable tombstone list is preserved before it is replaced
pub const TOMBSTONE_BACKUP_KEY: &str = "lumos_deleted_images_corrupt";

/// Set-semantics list of pending remote deletions.
/// Clones share the same lock, so read-modify-write cycles never interleave.
#[derive(Debug, Clone)]
pub struct TombstoneLedger {
    prefs: Arc<dyn PreferenceStore>,
    lock: Arc<Mutex<()>>,
}

impl TombstoneLedger {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self {
            prefs,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Add a filename; recording the same name twice keeps one entry
    pub async fn record(&self, filename: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut list = self.load_for_update().await?;
        if !list.iter().any(|f| f == filename) {
            list.push(filename.to_string());
            self.save(&list).await?;
            debug!("Tombstoned {}", filename);
        }
        Ok(())
    }

    /// Record both names of a pair, whether or not the thumbnail ever existed
    pub async fn record_pair(&self, pair: &AssetPair) -> Result<()> {
        for name in pair.names() {
            self.record(name).await?;
        }
        Ok(())
    }

    /// Current tombstones, in recording order
    pub async fn drain(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Remove exactly these filenames, leaving any others in place
    pub async fn clear(&self, filenames: &[String]) -> Result<()> {
        if filenames.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let cleared: HashSet<&str> = filenames.iter().map(String::as_str).collect();
        let mut list = self.load_for_update().await?;
        let before = list.len();
        list.retain(|f| !cleared.contains(f.as_str()));
        if list.len() != before {
            self.save(&list).await?;
        }
        debug!("Cleared {} tombstone(s), {} remaining", before - list.len(), list.len());
        Ok(())
    }

    /// A corrupt stored list reads as empty rather than failing every caller
    async fn load(&self) -> Result<Vec<String>> {
        Ok(self.load_raw().await?.0)
    }

    /// Like `load`, but a corrupt list is copied to `TOMBSTONE_BACKUP_KEY`
    /// before the caller gets a chance to save over it
    async fn load_for_update(&self) -> Result<Vec<String>> {
        let (list, corrupt) = self.load_raw().await?;
        if let Some(raw) = corrupt {
            self.prefs.set(TOMBSTONE_BACKUP_KEY, &raw).await?;
            warn!("Backed up corrupt tombstone list to {}", TOMBSTONE_BACKUP_KEY);
        }
        Ok(list)
    }

    /// Parsed list, plus the raw content when it failed to parse
    async fn load_raw(&self) -> Result<(Vec<String>, Option<String>)> {
        let Some(raw) = self.prefs.get(TOMBSTONE_KEY).await? else {
            return Ok((Vec::new(), None));
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(list) => Ok((list, None)),
            Err(e) => {
                warn!("Tombstone list is corrupt, treating as empty: {}", e);
                Ok((Vec::new(), Some(raw)))
            }
        }
    }

    async fn save(&self, list: &[String]) -> Result<()> {
        let raw = serde_json::to_string(list)?;
        self.prefs.set(TOMBSTONE_KEY, &raw).await
    }
}
