/// Remote object stores
///
/// This module handles:
/// - The `RemoteBackend` contract the reconciler drives
/// - The remote manifest of referenced filenames
/// - S3-compatible buckets (s3.rs) and WebDAV shares (webdav.rs)
/// - An in-process remote for tests and offline runs (memory.rs)

pub mod memory;
pub mod s3;
pub mod webdav;

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

pub use memory::MemoryRemote;
pub use s3::{S3Config, S3Remote};
pub use webdav::{WebDavConfig, WebDavRemote};

/// Remote "directory" (key prefix) holding assets
pub const REMOTE_IMAGE_DIR: &str = "images";

/// Top-level key of the manifest object
pub const MANIFEST_KEY: &str = "lumostime_images.json";

/// Manifest format version written by this crate
pub const MANIFEST_VERSION: &str = "1.0.0";

/// Authoritative list of filenames every device should retain.
/// Overwritten wholesale on publish, never merged field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteManifest {
    pub images: Vec<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub version: String,
}

impl RemoteManifest {
    /// Manifest stamped with the current time
    pub fn new<I: IntoIterator<Item = String>>(images: I) -> Self {
        Self {
            images: images.into_iter().collect(),
            timestamp: Utc::now().timestamp_millis(),
            version: MANIFEST_VERSION.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse a stored manifest. Corrupt content counts as no manifest.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice(bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("Remote manifest is corrupt, ignoring it: {}", e);
                None
            }
        }
    }
}

/// Operations the reconciler needs from a remote store.
///
/// Assets live under `images/<filename>`; the manifest under `MANIFEST_KEY`.
#[async_trait]
pub trait RemoteBackend: Send + Sync + Debug {
    /// Short label for logs
    fn name(&self) -> &'static str;

    /// Verify the remote is usable before a sync touches anything.
    /// Failing here aborts the whole sync with `PreconditionFailed`.
    async fn precheck(&self) -> Result<()>;

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<()>;

    /// Missing assets are `MediaError::NotFound`
    async fn download(&self, filename: &str) -> Result<Vec<u8>>;

    /// Missing assets count as deleted
    async fn delete(&self, filename: &str) -> Result<()>;

    /// Filenames currently stored, or None when the remote cannot list
    async fn list(&self) -> Result<Option<BTreeSet<String>>>;

    async fn publish_manifest(&self, manifest: &RemoteManifest) -> Result<()>;

    /// None when no manifest exists or the stored one is corrupt
    async fn fetch_manifest(&self) -> Result<Option<RemoteManifest>>;
}

/// Exactly one configured remote
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteConfig {
    S3(S3Config),
    WebDav(WebDavConfig),
}

impl RemoteConfig {
    /// Pick the active remote: S3 when configured, then WebDAV
    pub fn select(s3: Option<&S3Config>, webdav: Option<&WebDavConfig>) -> Option<Self> {
        match (s3, webdav) {
            (Some(s3), _) => Some(RemoteConfig::S3(s3.clone())),
            (None, Some(webdav)) => Some(RemoteConfig::WebDav(webdav.clone())),
            (None, None) => None,
        }
    }

    /// Build the client for this configuration
    pub fn connect(&self) -> Result<Arc<dyn RemoteBackend>> {
        let remote: Arc<dyn RemoteBackend> = match self {
            RemoteConfig::S3(config) => Arc::new(S3Remote::connect(config)?),
            RemoteConfig::WebDav(config) => Arc::new(WebDavRemote::connect(config)?),
        };
        info!("Remote backend: {}", remote.name());
        Ok(remote)
    }
}

/// Remote key of an asset
pub(crate) fn image_key(filename: &str) -> String {
    format!("{}/{}", REMOTE_IMAGE_DIR, filename)
}
