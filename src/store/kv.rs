use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::prefs::PreferenceStore;
use super::StorageBackend;
use crate::asset::mime_for;
use crate::error::{MediaError, Result};

/// SQLite-backed key/value database.
///
/// Holds two tables:
/// - `images`: asset bytes keyed by filename (the fallback asset store)
/// - `prefs`: small text values such as the tombstone list
///
/// `rusqlite::Connection` is not `Sync`, so it sits behind a mutex and every
/// query runs on the blocking pool.
#[derive(Clone)]
pub struct KeyValueDatabase {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl KeyValueDatabase {
    /// Open or create the database file, creating parent directories as needed
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        info!("Key/value database opened at: {}", db_path.display());

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path.to_path_buf()),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Database that lives only as long as this handle (and its clones)
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            db_path: None,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Create all necessary tables if they don't exist
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS images (
                key     TEXT PRIMARY KEY NOT NULL,
                value   BLOB NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS prefs (
                key     TEXT PRIMARY KEY NOT NULL,
                value   TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Run a query on the blocking pool
    async fn run<T, F>(&self, query: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            query(&guard).map_err(MediaError::from)
        })
        .await?
    }

    pub async fn put_blob(&self, key: &str, value: &[u8]) -> Result<()> {
        let key = key.to_string();
        let value = value.to_vec();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO images (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.query_row("SELECT value FROM images WHERE key = ?1", [key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()
        })
        .await
    }

    pub async fn delete_blob(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM images WHERE key = ?1", [key])
                .map(|_| ())
        })
        .await
    }

    pub async fn has_blob(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM images WHERE key = ?1",
                [key],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    pub async fn blob_keys(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM images ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }
}

#[async_trait]
impl PreferenceStore for KeyValueDatabase {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.query_row("SELECT value FROM prefs WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO prefs (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for KeyValueDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueDatabase")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Asset store for environments without a usable filesystem directory.
/// URLs are self-contained `data:` URLs.
#[derive(Debug, Clone)]
pub struct KeyValueFallbackBackend {
    db: KeyValueDatabase,
}

impl KeyValueFallbackBackend {
    pub fn new(db: KeyValueDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StorageBackend for KeyValueFallbackBackend {
    async fn write(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        self.db.put_blob(filename, bytes).await?;
        debug!("Stored {} in key/value store ({} bytes)", filename, bytes.len());
        Ok(())
    }

    async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        self.db
            .get_blob(filename)
            .await?
            .ok_or_else(|| MediaError::NotFound(filename.to_string()))
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        self.db.delete_blob(filename).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.db.blob_keys().await
    }

    async fn exists(&self, filename: &str) -> Result<bool> {
        self.db.has_blob(filename).await
    }

    async fn url(&self, filename: &str) -> Result<String> {
        let bytes = self.read(filename).await?;
        Ok(format!(
            "data:{};base64,{}",
            mime_for(filename),
            base64::engine::general_purpose::STANDARD.encode(bytes)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> KeyValueFallbackBackend {
        KeyValueFallbackBackend::new(KeyValueDatabase::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_write_read_overwrite() {
        let kv = backend();
        kv.write("a.jpg", b"one").await.unwrap();
        kv.write("a.jpg", b"two").await.unwrap();
        assert_eq!(kv.read("a.jpg").await.unwrap(), b"two");
        assert_eq!(kv.list().await.unwrap(), vec!["a.jpg"]);
    }

    #[tokio::test]
    async fn test_missing_and_idempotent_delete() {
        let kv = backend();
        assert!(matches!(kv.read("x.jpg").await, Err(MediaError::NotFound(_))));
        kv.delete("x.jpg").await.unwrap();
        assert!(!kv.exists("x.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn test_data_url() {
        let kv = backend();
        kv.write("p.png", b"hi").await.unwrap();
        assert_eq!(kv.url("p.png").await.unwrap(), "data:image/png;base64,aGk=");
    }

    #[tokio::test]
    async fn test_preferences_roundtrip() {
        let db = KeyValueDatabase::open_in_memory().unwrap();
        assert_eq!(db.get("k").await.unwrap(), None);
        db.set("k", "[\"a\"]").await.unwrap();
        db.set("k", "[\"b\"]").await.unwrap();
        assert_eq!(db.get("k").await.unwrap().as_deref(), Some("[\"b\"]"));
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kv.db");
        {
            let kv = KeyValueFallbackBackend::new(KeyValueDatabase::open(&path).unwrap());
            kv.write("a.jpg", b"keep").await.unwrap();
        }
        let reopened = KeyValueFallbackBackend::new(KeyValueDatabase::open(&path).unwrap());
        assert_eq!(reopened.read("a.jpg").await.unwrap(), b"keep");
    }
}
