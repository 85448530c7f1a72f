/// Configuration
///
/// One JSON file holding the data directory, the local backend choice and at
/// most one S3 and one WebDAV remote.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MediaError, Result};
use crate::remote::{RemoteConfig, S3Config, WebDavConfig};
use crate::store::LocalBackendKind;

/// Directory name used under the platform config and data dirs
pub const APP_DIR: &str = "lumos-media";

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Root of local storage; assets live under `<data_dir>/images/`
    pub data_dir: PathBuf,
    pub local_backend: LocalBackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webdav: Option<WebDavConfig>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            local_backend: LocalBackendKind::Auto,
            s3: None,
            webdav: None,
        }
    }
}

impl MediaConfig {
    /// `<config dir>/lumos-media/config.json`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        path.push(APP_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw)
            .map_err(|e| MediaError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// The remote a sync talks to, S3 first
    pub fn active_remote(&self) -> Option<RemoteConfig> {
        RemoteConfig::select(self.s3.as_ref(), self.webdav.as_ref())
    }
}

fn default_data_dir() -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path
}
