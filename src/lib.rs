/// Media assets for LumosTime
///
/// This crate handles:
/// - Local storage of images and their thumbnails (native files or SQLite)
/// - Thumbnail derivation at write time
/// - Garbage collection of images no log references
/// - Tombstones for deletions the remote has not seen yet
/// - Reconciliation with an S3 or WebDAV remote

pub mod asset;
pub mod config;
pub mod error;
pub mod gc;
pub mod ledger;
pub mod references;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;

pub use asset::{AssetKind, AssetPair, Variant};
pub use config::MediaConfig;
pub use error::{MediaError, Result};
pub use gc::{CleanupOptions, CleanupResult, UnreferencedReport};
pub use references::{LogRecord, ReferenceSet};
pub use service::MediaService;
pub use sync::SyncResult;
