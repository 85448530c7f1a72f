use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RemoteBackend, RemoteManifest};
use crate::error::{MediaError, Result};

/// Remote held entirely in process memory.
///
/// Used by tests and by `--offline` runs of the binary. Individual filenames
/// can be made to fail, and the remote can pretend its images folder is
/// missing, to exercise the reconciler's partial-failure paths.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    manifest: Mutex<Option<Vec<u8>>>,
    failing: Mutex<BTreeSet<String>>,
    missing_image_dir: bool,
    unlistable: bool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote whose precheck fails the way a WebDAV share without /images does
    pub fn without_image_dir() -> Self {
        Self {
            missing_image_dir: true,
            ..Self::default()
        }
    }

    /// Remote that cannot enumerate its contents
    pub fn unlistable() -> Self {
        Self {
            unlistable: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, filename: &str, bytes: &[u8]) {
        self.objects.lock().insert(filename.to_string(), bytes.to_vec());
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.objects.lock().contains_key(filename)
    }

    pub fn filenames(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Every transfer touching this filename fails until `heal` is called
    pub fn fail_on(&self, filename: &str) {
        self.failing.lock().insert(filename.to_string());
    }

    pub fn heal(&self, filename: &str) {
        self.failing.lock().remove(filename);
    }

    /// Raw manifest bytes, for planting corrupt content
    pub fn set_raw_manifest(&self, bytes: &[u8]) {
        *self.manifest.lock() = Some(bytes.to_vec());
    }

    /// Currently published manifest, if any parses
    pub fn manifest(&self) -> Option<RemoteManifest> {
        self.manifest.lock().as_deref().and_then(RemoteManifest::parse)
    }

    fn check(&self, filename: &str) -> Result<()> {
        if self.failing.lock().contains(filename) {
            return Err(MediaError::transfer(filename, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn precheck(&self) -> Result<()> {
        if self.missing_image_dir {
            return Err(MediaError::PreconditionFailed(
                super::webdav::MISSING_IMAGE_DIR_MESSAGE.to_string(),
            ));
        }
        Ok(())
    }

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<()> {
        self.check(filename)?;
        self.objects.lock().insert(filename.to_string(), bytes);
        Ok(())
    }

    async fn download(&self, filename: &str) -> Result<Vec<u8>> {
        self.check(filename)?;
        self.objects
            .lock()
            .get(filename)
            .cloned()
            .ok_or_else(|| MediaError::NotFound(filename.to_string()))
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        self.check(filename)?;
        self.objects.lock().remove(filename);
        Ok(())
    }

    async fn list(&self) -> Result<Option<BTreeSet<String>>> {
        if self.unlistable {
            return Ok(None);
        }
        Ok(Some(self.objects.lock().keys().cloned().collect()))
    }

    async fn publish_manifest(&self, manifest: &RemoteManifest) -> Result<()> {
        *self.manifest.lock() = Some(manifest.to_json()?);
        Ok(())
    }

    async fn fetch_manifest(&self) -> Result<Option<RemoteManifest>> {
        Ok(self.manifest())
    }
}
