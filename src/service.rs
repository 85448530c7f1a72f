/// Media service
///
/// The surface the app talks to. Wires one local store, one tombstone ledger
/// and at most one remote into the garbage collector and the reconciler.
use std::sync::Arc;

use tracing::{info, warn};

use crate::asset::thumbnail::ThumbnailDeriver;
use crate::asset::{generate_filename, AssetPair, Variant};
use crate::config::MediaConfig;
use crate::error::{MediaError, Result};
use crate::gc::{self, CleanupOptions, CleanupResult, GarbageCollector, UnreferencedReport};
use crate::ledger::TombstoneLedger;
use crate::references::{self, ImageRefs, ReferenceSet, UsageStats};
use crate::remote::RemoteBackend;
use crate::store::{AssetStore, LocalStorage, PairDeletion};
use crate::sync::{SyncReconciler, SyncResult};

#[derive(Debug, Clone)]
pub struct MediaService {
    store: AssetStore,
    ledger: TombstoneLedger,
    remote: Option<Arc<dyn RemoteBackend>>,
    deriver: ThumbnailDeriver,
    gc: GarbageCollector,
    reconciler: SyncReconciler,
}

impl MediaService {
    pub fn new(
        store: AssetStore,
        ledger: TombstoneLedger,
        remote: Option<Arc<dyn RemoteBackend>>,
    ) -> Self {
        let gc = GarbageCollector::new(store.clone(), ledger.clone(), remote.clone());
        let reconciler = SyncReconciler::new(store.clone(), ledger.clone(), remote.clone());
        Self {
            store,
            ledger,
            remote,
            deriver: ThumbnailDeriver::default(),
            gc,
            reconciler,
        }
    }

    /// Open local storage and connect the configured remote, if any
    pub fn open(config: &MediaConfig) -> Result<Self> {
        let remote = config
            .active_remote()
            .map(|remote| remote.connect())
            .transpose()?;
        Self::open_with_remote(config, remote)
    }

    /// Open local storage from the config but use the given remote
    pub fn open_with_remote(
        config: &MediaConfig,
        remote: Option<Arc<dyn RemoteBackend>>,
    ) -> Result<Self> {
        let storage = LocalStorage::open(config.local_backend, &config.data_dir)?;
        let ledger = TombstoneLedger::new(storage.preferences);
        Ok(Self::new(storage.assets, ledger, remote))
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// URL of an original or its thumbnail, empty when unavailable
    pub async fn get_url(&self, filename: &str, variant: Variant) -> String {
        self.store.url_for(filename, variant).await
    }

    /// Store new image bytes under a fresh filename and derive its thumbnail.
    ///
    /// Only the original write can fail this call. A thumbnail that cannot be
    /// derived or written is logged and skipped.
    pub async fn save_image(&self, bytes: Vec<u8>) -> Result<String> {
        let filename = generate_filename(&bytes);
        let pair = AssetPair::for_original(&filename);

        self.store.write(&filename, &bytes).await?;
        if !self.store.exists(&filename).await? {
            return Err(MediaError::NotFound(filename));
        }

        match self.deriver.derive_async(bytes).await {
            Ok(thumbnail) => {
                if let Err(e) = self.store.write(pair.thumbnail(), &thumbnail).await {
                    warn!("Could not write thumbnail for {}: {}", filename, e);
                }
            }
            Err(e) => warn!("No thumbnail for {}: {}", filename, e),
        }

        info!("Saved image {}", filename);
        Ok(filename)
    }

    /// Delete an image and its thumbnail locally; the remote follows on the next sync
    pub async fn delete_image(&self, filename: &str) -> Result<PairDeletion> {
        self.gc.delete_image(filename).await
    }

    pub async fn check_unreferenced<L: ImageRefs>(&self, logs: &[L]) -> Result<UnreferencedReport> {
        self.gc.find_unreferenced(logs).await
    }

    pub async fn cleanup<L: ImageRefs>(&self, logs: &[L], options: CleanupOptions) -> CleanupResult {
        self.gc.cleanup(logs, options).await
    }

    /// Sync against the remote, taking the local reference set from the logs
    pub async fn sync<L: ImageRefs>(&self, logs: &[L], cloud: &[String]) -> Result<SyncResult> {
        let local = references::resolve(logs);
        let cloud: ReferenceSet = cloud.iter().cloned().collect();
        self.reconciler.sync(&local, &cloud).await
    }

    /// Sync using the remote manifest as the cloud reference set.
    /// A missing, corrupt or unreadable manifest counts as an empty one.
    pub async fn sync_from_manifest<L: ImageRefs>(&self, logs: &[L]) -> Result<SyncResult> {
        let Some(remote) = &self.remote else {
            info!("No remote configured, skipping image sync");
            return Ok(SyncResult::default());
        };

        let mut fetch_error = None;
        let cloud = match remote.fetch_manifest().await {
            Ok(Some(manifest)) => manifest.images,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Could not fetch remote manifest: {}", e);
                fetch_error = Some(format!("Manifest fetch failed: {}", e));
                Vec::new()
            }
        };

        let mut result = self.sync(logs, &cloud).await?;
        if let Some(message) = fetch_error {
            result.errors.insert(0, message);
        }
        Ok(result)
    }

    /// Deletions still waiting for remote confirmation
    pub async fn tombstones(&self) -> Result<Vec<String>> {
        self.ledger.drain().await
    }

    pub fn usage_stats<L: ImageRefs>(&self, logs: &[L]) -> UsageStats {
        references::usage_stats(logs)
    }

    /// Markdown report of the current check plus usage statistics
    pub async fn render_report<L: ImageRefs>(&self, logs: &[L]) -> Result<String> {
        let report = self.check_unreferenced(logs).await?;
        Ok(gc::render_report(&report, &self.usage_stats(logs)))
    }
}
