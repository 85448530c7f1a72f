use std::collections::BTreeSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{image_key, RemoteBackend, RemoteManifest, MANIFEST_KEY, REMOTE_IMAGE_DIR};
use crate::error::{MediaError, Result};

/// Shown to the user when the share has no images folder
pub const MISSING_IMAGE_DIR_MESSAGE: &str = "Image sync failed: the WebDAV share has no /images folder. \
Create a folder named \"images\" in the WebDAV root and sync again.";

/// Location and credentials of a WebDAV share
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct WebDavConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for WebDavConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// WebDAV share remote with Basic auth.
///
/// The `/images` collection must already exist; this client never creates it.
#[derive(Debug)]
pub struct WebDavRemote {
    client: Client,
    base: Url,
    username: String,
    password: String,
}

impl WebDavRemote {
    pub fn connect(config: &WebDavConfig) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            base: base_url(&config.url)?,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| MediaError::Config(format!("bad WebDAV path {:?}: {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self
            .client
            .request(method, self.url(path)?)
            .basic_auth(&self.username, Some(&self.password)))
    }

    async fn propfind(&self, path: &str, depth: &str) -> Result<Response> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| MediaError::Config(e.to_string()))?;
        Ok(self
            .request(method, path)?
            .header("Depth", depth)
            .send()
            .await?)
    }
}

#[async_trait]
impl RemoteBackend for WebDavRemote {
    fn name(&self) -> &'static str {
        "webdav"
    }

    async fn precheck(&self) -> Result<()> {
        let dir = format!("{}/", REMOTE_IMAGE_DIR);
        let response = self.propfind(&dir, "0").await.map_err(|e| {
            MediaError::PreconditionFailed(format!("could not reach the WebDAV /images folder: {}", e))
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(MediaError::PreconditionFailed(
                MISSING_IMAGE_DIR_MESSAGE.to_string(),
            )),
            status if status.is_success() => {
                debug!("[webdav] /images folder present");
                Ok(())
            }
            status => Err(MediaError::PreconditionFailed(format!(
                "could not check the WebDAV /images folder (HTTP {})",
                status
            ))),
        }
    }

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<()> {
        let size = bytes.len();
        self.request(Method::PUT, &image_key(filename))?
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        debug!("[webdav] Uploaded {} ({} bytes)", filename, size);
        Ok(())
    }

    async fn download(&self, filename: &str) -> Result<Vec<u8>> {
        let response = self
            .request(Method::GET, &image_key(filename))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(MediaError::NotFound(filename.to_string()));
        }
        Ok(response.error_for_status()?.bytes().await?.to_vec())
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &image_key(filename))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }

    async fn list(&self) -> Result<Option<BTreeSet<String>>> {
        let dir = format!("{}/", REMOTE_IMAGE_DIR);
        let response = self.propfind(&dir, "1").await?;
        if !response.status().is_success() {
            warn!("[webdav] Listing not available (HTTP {})", response.status());
            return Ok(None);
        }
        let body = response.text().await?;
        Ok(parse_multistatus(&body))
    }

    async fn publish_manifest(&self, manifest: &RemoteManifest) -> Result<()> {
        self.request(Method::PUT, MANIFEST_KEY)?
            .header("Content-Type", "application/json; charset=utf-8")
            .body(manifest.to_json()?)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn fetch_manifest(&self) -> Result<Option<RemoteManifest>> {
        let response = self.request(Method::GET, MANIFEST_KEY)?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(RemoteManifest::parse(&bytes))
    }
}

/// Base URL with a trailing slash so relative joins stay inside it
fn base_url(raw: &str) -> Result<Url> {
    let mut raw = raw.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).map_err(|e| MediaError::Config(format!("bad WebDAV url {:?}: {}", raw, e)))
}

fn href_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?is)<(?:[a-z0-9_-]+:)?href>\s*([^<]+?)\s*</(?:[a-z0-9_-]+:)?href>")
                .map_err(|e| warn!("[webdav] href pattern rejected: {}", e))
                .ok()
        })
        .as_ref()
}

/// File names from a PROPFIND multistatus body. Collections (hrefs ending in
/// `/`) are skipped, which also drops the listed folder itself. None when the
/// body cannot be parsed at all, which callers treat as "cannot list".
fn parse_multistatus(body: &str) -> Option<BTreeSet<String>> {
    let names: BTreeSet<String> = href_pattern()?
        .captures_iter(body)
        .filter_map(|caps| {
            let href = caps.get(1)?.as_str();
            if href.ends_with('/') {
                return None;
            }
            let last = href.rsplit('/').next()?;
            let name = urlencoding::decode(last).ok()?.into_owned();
            (!name.is_empty()).then_some(name)
        })
        .collect();
    Some(names)
}
