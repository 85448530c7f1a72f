/// Local asset persistence
///
/// This module handles:
/// - The `StorageBackend` contract every local backend satisfies
/// - The native filesystem backend (native.rs)
/// - The SQLite key/value fallback backend (kv.rs)
/// - Small durable preferences such as the tombstone list (prefs.rs)
/// - Picking one backend at startup and wrapping it in an `AssetStore`

pub mod kv;
pub mod native;
pub mod prefs;

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::asset::{AssetPair, Variant};
use crate::error::{MediaError, Result};

pub use kv::{KeyValueDatabase, KeyValueFallbackBackend};
pub use native::NativeFilesystemBackend;
pub use prefs::{FilePreferences, PreferenceStore};

/// Directory (native) that holds every asset, flat namespace
pub const IMAGE_DIR: &str = "images";

/// SQLite file used by the key/value backend
pub const KV_DB_FILE: &str = "lumos_media.db";

/// Persistence of raw asset bytes keyed by filename.
///
/// Implementations must agree on semantics: `read` of a missing file is
/// `MediaError::NotFound`, `delete` of a missing file is `Ok`.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Store bytes under the filename, replacing any previous content
    async fn write(&self, filename: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch the bytes stored under the filename
    async fn read(&self, filename: &str) -> Result<Vec<u8>>;

    /// Remove the filename; missing files are not an error
    async fn delete(&self, filename: &str) -> Result<()>;

    /// Every filename currently stored
    async fn list(&self) -> Result<Vec<String>>;

    async fn exists(&self, filename: &str) -> Result<bool>;

    /// Presentable URL for a file the caller knows exists
    async fn url(&self, filename: &str) -> Result<String>;
}

/// Filenames must name a single entry in the flat asset namespace
pub fn validate_filename(filename: &str) -> Result<()> {
    let flat = !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\']);
    if flat {
        Ok(())
    } else {
        Err(MediaError::InvalidFilename(filename.to_string()))
    }
}

/// Which local backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalBackendKind {
    /// Native when the data directory is usable, key/value otherwise
    #[default]
    Auto,
    Native,
    KeyValue,
}

impl LocalBackendKind {
    /// Resolve `Auto` into a concrete kind for this machine
    pub fn detect(self, data_dir: &Path) -> LocalBackendKind {
        match self {
            LocalBackendKind::Auto => {
                if std::fs::create_dir_all(data_dir).is_ok() {
                    LocalBackendKind::Native
                } else {
                    warn!(
                        "Data directory {} is not writable, using key/value storage",
                        data_dir.display()
                    );
                    LocalBackendKind::KeyValue
                }
            }
            other => other,
        }
    }
}

/// Outcome of deleting an original together with its thumbnail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairDeletion {
    pub original_existed: bool,
    pub thumbnail_existed: bool,
}

impl PairDeletion {
    /// Number of files that were actually removed
    pub fn removed(&self) -> usize {
        self.original_existed as usize + self.thumbnail_existed as usize
    }
}

/// Backend-agnostic handle to the local assets.
/// Cheap to clone; every component that touches assets gets one injected.
#[derive(Debug, Clone)]
pub struct AssetStore {
    backend: Arc<dyn StorageBackend>,
}

impl AssetStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by an in-memory SQLite database
    pub fn in_memory() -> Result<Self> {
        let db = KeyValueDatabase::open_in_memory()?;
        Ok(Self::new(Arc::new(KeyValueFallbackBackend::new(db))))
    }

    pub async fn write(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        validate_filename(filename)?;
        self.backend.write(filename, bytes).await
    }

    pub async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        validate_filename(filename)?;
        self.backend.read(filename).await
    }

    pub async fn delete(&self, filename: &str) -> Result<()> {
        validate_filename(filename)?;
        self.backend.delete(filename).await
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        self.backend.list().await
    }

    pub async fn exists(&self, filename: &str) -> Result<bool> {
        validate_filename(filename)?;
        self.backend.exists(filename).await
    }

    /// Remove an original and its thumbnail in one call.
    /// Reports which of the two were present beforehand.
    pub async fn delete_pair(&self, pair: &AssetPair) -> Result<PairDeletion> {
        validate_filename(pair.original())?;
        let outcome = PairDeletion {
            original_existed: self.backend.exists(pair.original()).await?,
            thumbnail_existed: self.backend.exists(pair.thumbnail()).await?,
        };

        self.backend.delete(pair.original()).await?;
        self.backend.delete(pair.thumbnail()).await?;

        debug!(
            "Deleted pair {} ({} file(s) removed)",
            pair.original(),
            outcome.removed()
        );
        Ok(outcome)
    }

    /// URL for an original or its thumbnail.
    ///
    /// A missing thumbnail silently falls back to the original. Returns an
    /// empty string when nothing usable exists; this never fails.
    pub async fn url_for(&self, filename: &str, variant: Variant) -> String {
        if let Err(e) = validate_filename(filename) {
            debug!("{}", e);
            return String::new();
        }
        let pair = AssetPair::for_original(filename);

        let mut target = pair.original();
        if variant == Variant::Thumbnail {
            match self.backend.exists(pair.thumbnail()).await {
                Ok(true) => target = pair.thumbnail(),
                Ok(false) => debug!("No thumbnail for {}, using original", filename),
                Err(e) => warn!("Thumbnail lookup failed for {}: {}", filename, e),
            }
        }

        match self.backend.exists(target).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Asset unavailable: {}", target);
                return String::new();
            }
            Err(e) => {
                warn!("Existence check failed for {}: {}", target, e);
                return String::new();
            }
        }

        match self.backend.url(target).await {
            Ok(url) => url,
            Err(e) => {
                warn!("Could not build URL for {}: {}", target, e);
                String::new()
            }
        }
    }
}

/// Local asset store plus the preference store that lives beside it
#[derive(Debug, Clone)]
pub struct LocalStorage {
    pub assets: AssetStore,
    pub preferences: Arc<dyn PreferenceStore>,
    pub kind: LocalBackendKind,
}

impl LocalStorage {
    /// Open local storage under the data directory.
    /// The backend is chosen here, once; nothing downstream branches on it.
    pub fn open(kind: LocalBackendKind, data_dir: &Path) -> Result<Self> {
        let kind = kind.detect(data_dir);

        let storage = match kind {
            LocalBackendKind::Native => {
                let backend = NativeFilesystemBackend::new(data_dir.join(IMAGE_DIR));
                LocalStorage {
                    assets: AssetStore::new(Arc::new(backend)),
                    preferences: Arc::new(FilePreferences::new(data_dir)),
                    kind,
                }
            }
            LocalBackendKind::KeyValue => {
                let db = if std::fs::create_dir_all(data_dir).is_ok() {
                    KeyValueDatabase::open(&data_dir.join(KV_DB_FILE))?
                } else {
                    KeyValueDatabase::open_in_memory()?
                };
                LocalStorage {
                    assets: AssetStore::new(Arc::new(KeyValueFallbackBackend::new(db.clone()))),
                    preferences: Arc::new(db),
                    kind,
                }
            }
            LocalBackendKind::Auto => {
                return Err(MediaError::Config(
                    "local backend detection did not resolve".to_string(),
                ))
            }
        };

        info!("Local storage ready ({:?}) at {}", storage.kind, data_dir.display());
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_thumbnail_url_falls_back_to_original() {
        let store = AssetStore::in_memory().unwrap();
        store.write("a.jpg", b"original").await.unwrap();

        let original = store.url_for("a.jpg", Variant::Original).await;
        let thumb = store.url_for("a.jpg", Variant::Thumbnail).await;
        assert!(!original.is_empty());
        assert_eq!(original, thumb);
    }

    #[tokio::test]
    async fn test_thumbnail_url_prefers_thumbnail() {
        let store = AssetStore::in_memory().unwrap();
        store.write("a.jpg", b"original").await.unwrap();
        store.write("thumb_a.jpg", b"small").await.unwrap();

        let original = store.url_for("a.jpg", Variant::Original).await;
        let thumb = store.url_for("a.jpg", Variant::Thumbnail).await;
        assert_ne!(original, thumb);
    }

    #[tokio::test]
    async fn test_missing_asset_yields_empty_url() {
        let store = AssetStore::in_memory().unwrap();
        assert_eq!(store.url_for("nope.jpg", Variant::Original).await, "");
        assert_eq!(store.url_for("nope.jpg", Variant::Thumbnail).await, "");
    }

    #[tokio::test]
    async fn test_delete_pair_reports_presence() {
        let store = AssetStore::in_memory().unwrap();
        store.write("a.jpg", b"1").await.unwrap();

        let outcome = store.delete_pair(&AssetPair::for_original("a.jpg")).await.unwrap();
        assert!(outcome.original_existed);
        assert!(!outcome.thumbnail_existed);
        assert_eq!(outcome.removed(), 1);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_flat_names_rejected_by_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        let native = LocalStorage::open(LocalBackendKind::Native, dir.path()).unwrap().assets;
        let key_value = AssetStore::in_memory().unwrap();

        for store in [native, key_value] {
            for name in ["a/b.jpg", "..", "", "c\\d.jpg"] {
                assert!(matches!(
                    store.write(name, b"x").await,
                    Err(MediaError::InvalidFilename(_))
                ));
                assert!(matches!(store.exists(name).await, Err(MediaError::InvalidFilename(_))));
                assert_eq!(store.url_for(name, Variant::Original).await, "");
            }
            assert!(store.list().await.unwrap().is_empty());
        }
    }

    #[test]
    fn test_open_native_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(LocalBackendKind::Auto, dir.path()).unwrap();
        assert_eq!(storage.kind, LocalBackendKind::Native);
    }

    #[tokio::test]
    async fn test_open_key_value_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(LocalBackendKind::KeyValue, dir.path()).unwrap();
        assert_eq!(storage.kind, LocalBackendKind::KeyValue);
        storage.assets.write("a.jpg", b"1").await.unwrap();
        assert!(dir.path().join(KV_DB_FILE).exists());
    }
}
