use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{image_key, RemoteBackend, RemoteManifest, MANIFEST_KEY, REMOTE_IMAGE_DIR};
use crate::error::{MediaError, Result};

/// Credentials and location of an S3-compatible bucket
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint for S3-compatible services (COS, MinIO, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Bucket-backed remote. Buckets have no directories, so `precheck` is a no-op.
#[derive(Debug)]
pub struct S3Remote {
    store: Arc<dyn ObjectStore>,
}

impl S3Remote {
    pub fn connect(config: &S3Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        Ok(Self::with_store(Arc::new(builder.build()?)))
    }

    /// Wrap any object store, e.g. `object_store::memory::InMemory` in tests
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RemoteBackend for S3Remote {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn precheck(&self) -> Result<()> {
        Ok(())
    }

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<()> {
        let size = bytes.len();
        self.store
            .put(&ObjectPath::from(image_key(filename)), PutPayload::from(bytes))
            .await?;
        debug!("[s3] Uploaded {} ({} bytes)", filename, size);
        Ok(())
    }

    async fn download(&self, filename: &str) -> Result<Vec<u8>> {
        let path = ObjectPath::from(image_key(filename));
        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(MediaError::NotFound(filename.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(result.bytes().await?.to_vec())
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        match self.store.delete(&ObjectPath::from(image_key(filename))).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Option<BTreeSet<String>>> {
        let prefix = ObjectPath::from(REMOTE_IMAGE_DIR);
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        // Only direct children of images/ are assets
        let names = objects
            .iter()
            .filter(|meta| meta.location.parts().count() == 2)
            .filter_map(|meta| meta.location.filename().map(str::to_string))
            .collect();
        Ok(Some(names))
    }

    async fn publish_manifest(&self, manifest: &RemoteManifest) -> Result<()> {
        self.store
            .put(&ObjectPath::from(MANIFEST_KEY), PutPayload::from(manifest.to_json()?))
            .await?;
        Ok(())
    }

    async fn fetch_manifest(&self) -> Result<Option<RemoteManifest>> {
        match self.store.get(&ObjectPath::from(MANIFEST_KEY)).await {
            Ok(result) => Ok(RemoteManifest::parse(&result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn remote() -> (S3Remote, Arc<InMemory>) {
        let store = Arc::new(InMemory::new());
        (S3Remote::with_store(store.clone()), store)
    }

    #[tokio::test]
    async fn test_assets_live_under_images_prefix() {
        let (remote, store) = remote();
        remote.upload("a.jpg", b"abc".to_vec()).await.unwrap();

        let raw = store.get(&ObjectPath::from("images/a.jpg")).await.unwrap();
        assert_eq!(raw.bytes().await.unwrap().as_ref(), b"abc");
        assert_eq!(remote.download("a.jpg").await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_missing_download_and_delete() {
        let (remote, _) = remote();
        let err = remote.download("nope.jpg").await.unwrap_err();
        assert!(err.is_not_found());
        remote.delete("nope.jpg").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_ignores_manifest_and_nested_keys() {
        let (remote, store) = remote();
        remote.upload("a.jpg", b"1".to_vec()).await.unwrap();
        remote.upload("thumb_a.jpg", b"2".to_vec()).await.unwrap();
        remote
            .publish_manifest(&RemoteManifest::new(vec!["a.jpg".to_string()]))
            .await
            .unwrap();
        store
            .put(&ObjectPath::from("images/old/x.jpg"), PutPayload::from(b"x".to_vec()))
            .await
            .unwrap();

        let listed = remote.list().await.unwrap().unwrap();
        assert_eq!(
            listed.into_iter().collect::<Vec<_>>(),
            vec!["a.jpg".to_string(), "thumb_a.jpg".to_string()]
        );
    }

    #[tokio::test]
    async fn test_manifest_roundtrip_and_corruption() {
        let (remote, store) = remote();
        assert!(remote.fetch_manifest().await.unwrap().is_none());

        remote
            .publish_manifest(&RemoteManifest::new(vec!["a.jpg".to_string()]))
            .await
            .unwrap();
        let fetched = remote.fetch_manifest().await.unwrap().unwrap();
        assert_eq!(fetched.images, vec!["a.jpg"]);

        store
            .put(&ObjectPath::from(MANIFEST_KEY), PutPayload::from(b"{oops".to_vec()))
            .await
            .unwrap();
        assert!(remote.fetch_manifest().await.unwrap().is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = S3Config {
            bucket: "b".into(),
            region: "r".into(),
            access_key_id: "id".into(),
            secret_access_key: "hunter2".into(),
            endpoint: None,
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
