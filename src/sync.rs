/// Remote reconciliation
///
/// One sync pass, in strict phase order:
/// 1. precondition check on the remote
/// 2. merge local and cloud reference sets
/// 3. drain tombstones (remote deletes, then local leftovers)
/// 4. classify the rest into uploads and downloads
/// 5. uploads, then downloads, one item at a time
/// 6. publish the manifest of the merged set
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MediaError, Result};
use crate::ledger::TombstoneLedger;
use crate::references::ReferenceSet;
use crate::remote::{RemoteBackend, RemoteManifest};
use crate::store::AssetStore;

/// Counts and per-item failures of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncResult {
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted_remote: usize,
    /// Uploads the remote listing showed were already there
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SyncReconciler {
    store: AssetStore,
    ledger: TombstoneLedger,
    remote: Option<Arc<dyn RemoteBackend>>,
    running: Arc<Mutex<()>>,
}

impl SyncReconciler {
    pub fn new(
        store: AssetStore,
        ledger: TombstoneLedger,
        remote: Option<Arc<dyn RemoteBackend>>,
    ) -> Self {
        Self {
            store,
            ledger,
            remote,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Reconcile local assets with the remote.
    ///
    /// Only a failed precheck or an overlapping call return `Err`; every
    /// per-item problem is collected into `SyncResult::errors`. Without a
    /// configured remote this is a no-op.
    pub async fn sync(&self, local: &ReferenceSet, cloud: &ReferenceSet) -> Result<SyncResult> {
        let Some(remote) = self.remote.clone() else {
            info!("No remote configured, skipping image sync");
            return Ok(SyncResult::default());
        };

        let Ok(_running) = self.running.try_lock() else {
            return Err(MediaError::SyncInProgress);
        };

        remote.precheck().await?;
        info!("Syncing images with {} remote", remote.name());

        let mut result = SyncResult::default();

        let merged: ReferenceSet = local.union(cloud).cloned().collect();
        debug!(
            "Reference sets: {} local, {} cloud, {} merged",
            local.len(),
            cloud.len(),
            merged.len()
        );

        let mut inventory: BTreeSet<String> = match self.store.list().await {
            Ok(files) => files.into_iter().collect(),
            Err(e) => {
                warn!("Local listing failed: {}", e);
                result.errors.push(format!("Local listing failed: {}", e));
                BTreeSet::new()
            }
        };

        let tombstoned = self
            .drain_tombstones(remote.as_ref(), &mut inventory, &mut result)
            .await;

        let (to_upload, to_download): (Vec<&String>, Vec<&String>) = merged
            .iter()
            .filter(|name| !tombstoned.contains(*name))
            .partition(|name| inventory.contains(*name));

        // Only a non-empty listing is trusted: some WebDAV servers answer an
        // empty list when they cannot enumerate
        let remote_files = match remote.list().await {
            Ok(listing) => listing.filter(|files| !files.is_empty()),
            Err(e) => {
                warn!("Remote listing failed, uploading everything: {}", e);
                None
            }
        };

        info!(
            "{} to upload, {} to download",
            to_upload.len(),
            to_download.len()
        );

        for filename in to_upload {
            if remote_files.as_ref().is_some_and(|files| files.contains(filename)) {
                debug!("Already on remote: {}", filename);
                result.skipped += 1;
                continue;
            }
            match self.upload(remote.as_ref(), filename).await {
                Ok(()) => {
                    info!("Uploaded {}", filename);
                    result.uploaded += 1;
                }
                Err(e) => {
                    warn!("Upload failed for {}: {}", filename, e);
                    result.errors.push(format!("Upload failed: {} - {}", filename, e));
                }
            }
        }

        // Every to-download name is attempted; ending up neither local nor in
        // `errors` is not an allowed outcome
        for filename in to_download {
            match self.download(remote.as_ref(), filename).await {
                Ok(()) => {
                    info!("Downloaded {}", filename);
                    result.downloaded += 1;
                }
                Err(e) => {
                    warn!("Download failed for {}: {}", filename, e);
                    result.errors.push(format!("Download failed: {} - {}", filename, e));
                }
            }
        }

        if !merged.is_empty() {
            let manifest = RemoteManifest::new(merged.iter().cloned());
            if let Err(e) = remote.publish_manifest(&manifest).await {
                warn!("Manifest publish failed: {}", e);
                result.errors.push(format!("Image list upload failed: {}", e));
            } else {
                debug!("Published manifest with {} image(s)", manifest.images.len());
            }
        }

        info!(
            "Image sync finished: {} uploaded, {} downloaded, {} deleted remotely, {} skipped, {} error(s)",
            result.uploaded,
            result.downloaded,
            result.deleted_remote,
            result.skipped,
            result.errors.len()
        );
        Ok(result)
    }

    /// Remote deletes for every tombstone, then removal of local leftovers.
    /// Returns every tombstoned name, confirmed or not; none of them may be
    /// uploaded or downloaded in this pass.
    async fn drain_tombstones(
        &self,
        remote: &dyn RemoteBackend,
        inventory: &mut BTreeSet<String>,
        result: &mut SyncResult,
    ) -> BTreeSet<String> {
        let tombstones = match self.ledger.drain().await {
            Ok(list) => list,
            Err(e) => {
                result.errors.push(format!("Tombstone read failed: {}", e));
                return BTreeSet::new();
            }
        };
        if tombstones.is_empty() {
            return BTreeSet::new();
        }
        info!("Processing {} pending deletion(s)", tombstones.len());

        let mut confirmed = Vec::new();
        for filename in &tombstones {
            match remote.delete(filename).await {
                Ok(()) => {
                    debug!("Deleted remotely: {}", filename);
                    result.deleted_remote += 1;
                    confirmed.push(filename.clone());
                }
                Err(e) if e.is_not_found() => confirmed.push(filename.clone()),
                Err(e) => {
                    warn!("Remote delete failed for {}: {}", filename, e);
                    result.errors.push(format!("Remote delete failed: {} - {}", filename, e));
                }
            }
        }
        if let Err(e) = self.ledger.clear(&confirmed).await {
            result.errors.push(format!("Tombstone update failed: {}", e));
        }

        for filename in &tombstones {
            if !inventory.contains(filename) {
                continue;
            }
            match self.store.delete(filename).await {
                Ok(()) => {
                    debug!("Removed leftover local copy: {}", filename);
                    inventory.remove(filename);
                }
                Err(e) => warn!("Could not remove leftover {}: {}", filename, e),
            }
        }

        tombstones.into_iter().collect()
    }

    async fn upload(&self, remote: &dyn RemoteBackend, filename: &str) -> Result<()> {
        let bytes = self.store.read(filename).await?;
        remote.upload(filename, bytes).await
    }

    async fn download(&self, remote: &dyn RemoteBackend, filename: &str) -> Result<()> {
        let bytes = remote.download(filename).await?;
        self.store.write(filename, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use crate::store::KeyValueDatabase;

    fn set(names: &[&str]) -> ReferenceSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn reconciler(
        local_files: &[&str],
        remote: Arc<MemoryRemote>,
    ) -> (SyncReconciler, AssetStore, TombstoneLedger) {
        let store = AssetStore::in_memory().unwrap();
        for name in local_files {
            store.write(name, name.as_bytes()).await.unwrap();
        }
        let ledger = TombstoneLedger::new(Arc::new(KeyValueDatabase::open_in_memory().unwrap()));
        let sync = SyncReconciler::new(store.clone(), ledger.clone(), Some(remote));
        (sync, store, ledger)
    }

    #[tokio::test]
    async fn test_upload_download_and_manifest() {
        let remote = Arc::new(MemoryRemote::new());
        remote.insert("b.jpg", b"bee");
        let (sync, store, _) = reconciler(&["a.jpg"], remote.clone()).await;

        let result = sync.sync(&set(&["a.jpg"]), &set(&["b.jpg"])).await.unwrap();

        assert!(result.is_clean(), "{:?}", result.errors);
        assert_eq!((result.uploaded, result.downloaded), (1, 1));
        assert!(remote.contains("a.jpg"));
        assert_eq!(store.read("b.jpg").await.unwrap(), b"bee");
        assert_eq!(remote.manifest().unwrap().images, vec!["a.jpg", "b.jpg"]);
    }

    #[tokio::test]
    async fn test_no_remote_is_noop() {
        let store = AssetStore::in_memory().unwrap();
        let ledger = TombstoneLedger::new(Arc::new(KeyValueDatabase::open_in_memory().unwrap()));
        let sync = SyncReconciler::new(store, ledger, None);
        let result = sync.sync(&set(&["a.jpg"]), &set(&[])).await.unwrap();
        assert_eq!(result, SyncResult::default());
    }

    #[tokio::test]
    async fn test_precheck_failure_aborts_before_any_transfer() {
        let remote = Arc::new(MemoryRemote::without_image_dir());
        let (sync, _, ledger) = reconciler(&["a.jpg"], remote.clone()).await;
        ledger.record("old.jpg").await.unwrap();

        let err = sync.sync(&set(&["a.jpg"]), &set(&[])).await.unwrap_err();
        assert!(matches!(err, MediaError::PreconditionFailed(ref m) if m.contains("images")));
        assert!(remote.filenames().is_empty());
        assert!(remote.manifest().is_none());
        assert_eq!(ledger.drain().await.unwrap(), vec!["old.jpg"]);
    }

    #[tokio::test]
    async fn test_tombstones_are_never_resurrected() {
        let remote = Arc::new(MemoryRemote::new());
        remote.insert("x.jpg", b"x");
        remote.insert("thumb_x.jpg", b"tx");
        // a leftover local copy from an interrupted delete
        let (sync, store, ledger) = reconciler(&["x.jpg"], remote.clone()).await;
        ledger.record("x.jpg").await.unwrap();
        ledger.record("thumb_x.jpg").await.unwrap();

        // a stale cloud reference still lists x.jpg
        let result = sync.sync(&set(&[]), &set(&["x.jpg"])).await.unwrap();

        assert_eq!(result.deleted_remote, 2);
        assert_eq!((result.uploaded, result.downloaded), (0, 0));
        assert!(remote.filenames().is_empty());
        assert!(!store.exists("x.jpg").await.unwrap());
        assert!(ledger.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_remote_delete_keeps_tombstone() {
        let remote = Arc::new(MemoryRemote::new());
        remote.insert("x.jpg", b"x");
        remote.fail_on("x.jpg");
        let (sync, _, ledger) = reconciler(&[], remote.clone()).await;
        ledger.record("x.jpg").await.unwrap();
        ledger.record("thumb_x.jpg").await.unwrap();

        let result = sync.sync(&set(&[]), &set(&[])).await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(ledger.drain().await.unwrap(), vec!["x.jpg"]);

        // converges once the remote recovers
        remote.heal("x.jpg");
        let result = sync.sync(&set(&[]), &set(&[])).await.unwrap();
        assert!(result.is_clean());
        assert!(ledger.drain().await.unwrap().is_empty());
        assert!(remote.filenames().is_empty());
    }

    #[tokio::test]
    async fn test_per_item_failure_does_not_abort_batch() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_on("b.jpg");
        let (sync, _, _) = reconciler(&["a.jpg", "b.jpg", "c.jpg"], remote.clone()).await;

        let result = sync.sync(&set(&["a.jpg", "b.jpg", "c.jpg"]), &set(&[])).await.unwrap();
        assert_eq!(result.uploaded, 2);
        assert_eq!(result.errors, vec!["Upload failed: b.jpg - transfer failed for b.jpg: injected failure"]);
        assert_eq!(remote.manifest().unwrap().images.len(), 3);
    }

    #[tokio::test]
    async fn test_listing_skips_only_present_uploads() {
        let remote = Arc::new(MemoryRemote::new());
        remote.insert("a.jpg", b"a");
        let (sync, _, _) = reconciler(&["a.jpg"], remote.clone()).await;

        // thumb_b.jpg was never uploaded anywhere
        let result = sync.sync(&set(&["a.jpg"]), &set(&["thumb_b.jpg"])).await.unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!((result.uploaded, result.downloaded), (0, 0));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Download failed: thumb_b.jpg"));
    }

    #[tokio::test]
    async fn test_every_merged_name_ends_local_or_in_errors() {
        // empty remote: the listing says nothing is there
        let remote = Arc::new(MemoryRemote::new());
        let (sync, store, _) = reconciler(&["a.jpg"], remote.clone()).await;

        let merged = set(&["a.jpg", "b.jpg"]);
        let result = sync.sync(&set(&["a.jpg"]), &set(&["b.jpg"])).await.unwrap();

        assert_eq!(result.uploaded, 1);
        for name in &merged {
            let local = store.exists(name).await.unwrap();
            let reported = result.errors.iter().any(|e| e.contains(name.as_str()));
            assert!(local || reported, "{} dropped: {:?}", name, result);
        }
        assert!(result.errors[0].starts_with("Download failed: b.jpg"));
    }

    #[tokio::test]
    async fn test_unlistable_remote_attempts_every_transfer() {
        let remote = Arc::new(MemoryRemote::unlistable());
        let (sync, _, _) = reconciler(&["a.jpg"], remote.clone()).await;

        let result = sync.sync(&set(&["a.jpg"]), &set(&["missing.jpg"])).await.unwrap();
        assert_eq!(result.uploaded, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Download failed: missing.jpg"));
    }

    #[tokio::test]
    async fn test_overlapping_sync_is_rejected() {
        let remote = Arc::new(MemoryRemote::new());
        let (sync, _, _) = reconciler(&[], remote).await;

        let _held = sync.running.lock().await;
        let err = sync.sync(&set(&[]), &set(&[])).await.unwrap_err();
        assert!(matches!(err, MediaError::SyncInProgress));
    }

    #[tokio::test]
    async fn test_empty_merged_set_publishes_nothing() {
        let remote = Arc::new(MemoryRemote::new());
        let (sync, _, _) = reconciler(&[], remote.clone()).await;
        sync.sync(&set(&[]), &set(&[])).await.unwrap();
        assert!(remote.manifest().is_none());
    }
}
