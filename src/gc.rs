/// Garbage collection of unreferenced assets
///
/// Diffs the local inventory against the references derived from the logs,
/// classifies every file, and deletes what no record needs any more, locally
/// and (optionally) on the remote.
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::asset::{AssetKind, AssetPair};
use crate::error::Result;
use crate::ledger::TombstoneLedger;
use crate::references::{resolve, ImageRefs, UsageStats};
use crate::remote::RemoteBackend;
use crate::store::{AssetStore, PairDeletion};

/// Classification of the local inventory against the logs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnreferencedReport {
    /// Files in the local store
    pub total_images: usize,
    /// Size of the referenced set (originals plus thumbnail names)
    pub referenced_images: usize,
    /// Local originals no log references
    pub unreferenced_originals: Vec<String>,
    /// Local thumbnails whose original file is missing
    pub orphaned_thumbnails: Vec<String>,
    /// Local originals without a thumbnail. Informational only; never deleted
    /// for this reason alone.
    pub orphaned_originals: Vec<String>,
    /// Every file the cleanup pass would remove
    pub deletion_set: Vec<String>,
    /// `deletion_set.len()`
    pub total_count: usize,
}

/// What a cleanup pass may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOptions {
    pub delete_local: bool,
    pub delete_remote: bool,
    pub dry_run: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            delete_local: true,
            delete_remote: true,
            dry_run: false,
        }
    }
}

/// Outcome of a cleanup pass. Per-item failures land in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupResult {
    pub report: UnreferencedReport,
    pub deleted_local: usize,
    pub deleted_remote: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Presence {
    original: bool,
    thumbnail: bool,
}

#[derive(Debug, Clone)]
pub struct GarbageCollector {
    store: AssetStore,
    ledger: TombstoneLedger,
    remote: Option<Arc<dyn RemoteBackend>>,
}

impl GarbageCollector {
    pub fn new(
        store: AssetStore,
        ledger: TombstoneLedger,
        remote: Option<Arc<dyn RemoteBackend>>,
    ) -> Self {
        Self {
            store,
            ledger,
            remote,
        }
    }

    /// Delete an original and its thumbnail, tombstoning both names first so a
    /// later sync removes them from the remote too
    pub async fn delete_image(&self, filename: &str) -> Result<PairDeletion> {
        let pair = AssetPair::for_original(filename);
        self.ledger.record_pair(&pair).await?;
        let outcome = self.store.delete_pair(&pair).await?;
        info!("Deleted image {} ({} local file(s))", filename, outcome.removed());
        Ok(outcome)
    }

    /// Classify the local inventory against the current logs
    pub async fn find_unreferenced<L: ImageRefs>(&self, logs: &[L]) -> Result<UnreferencedReport> {
        let inventory = self.store.list().await?;

        // original name -> which halves of the pair are on disk
        let mut pairs: BTreeMap<String, Presence> = BTreeMap::new();
        for name in &inventory {
            match AssetKind::of(name) {
                AssetKind::Original => pairs.entry(name.clone()).or_default().original = true,
                AssetKind::Thumbnail => match AssetPair::for_thumbnail(name) {
                    Some(pair) => {
                        pairs.entry(pair.original().to_string()).or_default().thumbnail = true
                    }
                    // A bare "thumb_" has no original to pair with
                    None => pairs.entry(name.clone()).or_default().original = true,
                },
            }
        }

        let referenced = resolve(logs);

        let mut report = UnreferencedReport {
            total_images: inventory.len(),
            referenced_images: referenced.len(),
            ..Default::default()
        };

        for (original, presence) in &pairs {
            let pair = AssetPair::for_original(original);
            match (presence.original, presence.thumbnail) {
                (true, thumbnail) => {
                    if !thumbnail {
                        report.orphaned_originals.push(original.clone());
                    }
                    if !referenced.contains(original) {
                        report.unreferenced_originals.push(original.clone());
                        report.deletion_set.push(original.clone());
                        if thumbnail {
                            report.deletion_set.push(pair.thumbnail().to_string());
                        }
                    }
                }
                (false, true) => {
                    report.orphaned_thumbnails.push(pair.thumbnail().to_string());
                    report.deletion_set.push(pair.thumbnail().to_string());
                }
                (false, false) => {}
            }
        }
        report.total_count = report.deletion_set.len();

        info!(
            "Checked {} local image(s): {} referenced name(s), {} unreferenced, {} orphaned thumbnail(s)",
            report.total_images,
            report.referenced_images,
            report.unreferenced_originals.len(),
            report.orphaned_thumbnails.len()
        );
        if !report.orphaned_originals.is_empty() {
            debug!(
                "{} original(s) have no thumbnail: {:?}",
                report.orphaned_originals.len(),
                report.orphaned_originals
            );
        }

        Ok(report)
    }

    /// Delete everything `find_unreferenced` puts in the deletion set.
    ///
    /// One item failing never stops the others. A missing remote counts as
    /// nothing to delete remotely.
    pub async fn cleanup<L: ImageRefs>(&self, logs: &[L], options: CleanupOptions) -> CleanupResult {
        let mut result = CleanupResult::default();

        result.report = match self.find_unreferenced(logs).await {
            Ok(report) => report,
            Err(e) => {
                result.errors.push(format!("Cleanup failed: {}", e));
                return result;
            }
        };

        if result.report.total_count == 0 {
            info!("No unreferenced images found");
            return result;
        }
        if options.dry_run {
            info!(
                "Dry run: {} file(s) would be deleted",
                result.report.total_count
            );
            return result;
        }

        let remote = if options.delete_remote {
            self.remote.clone()
        } else {
            None
        };

        let unreferenced = result.report.unreferenced_originals.clone();

        for original in &unreferenced {
            let pair = AssetPair::for_original(original);

            if options.delete_local {
                match self.delete_image(original).await {
                    Ok(outcome) => result.deleted_local += outcome.removed(),
                    Err(e) => {
                        warn!("Local delete failed for {}: {}", original, e);
                        result.errors.push(format!("Local delete failed: {} - {}", original, e));
                    }
                }
            }

            // Both names go remotely, matching the tombstones just recorded;
            // the remote may hold a thumbnail this device never had
            if let Some(remote) = &remote {
                self.delete_remote(remote.as_ref(), &pair.names(), &mut result).await;
            }
        }

        // Orphaned thumbnails go one file at a time, outside the paired path
        for thumbnail in result.report.orphaned_thumbnails.clone() {
            if options.delete_local {
                match self.store.delete(&thumbnail).await {
                    Ok(()) => result.deleted_local += 1,
                    Err(e) => {
                        warn!("Local delete failed for {}: {}", thumbnail, e);
                        result.errors.push(format!("Local delete failed: {} - {}", thumbnail, e));
                    }
                }
            }
            if let Some(remote) = &remote {
                self.delete_remote(remote.as_ref(), &[thumbnail.as_str()], &mut result).await;
            }
        }

        info!(
            "Cleanup finished: {} local, {} remote, {} error(s)",
            result.deleted_local,
            result.deleted_remote,
            result.errors.len()
        );
        result
    }

    /// Remote deletes for one item. Confirmed deletions also retire their
    /// tombstones; the next sync has nothing left to do for them.
    async fn delete_remote(
        &self,
        remote: &dyn RemoteBackend,
        names: &[&str],
        result: &mut CleanupResult,
    ) {
        let mut confirmed = Vec::new();
        for name in names {
            match remote.delete(name).await {
                Ok(()) => {
                    result.deleted_remote += 1;
                    confirmed.push(name.to_string());
                }
                Err(e) if e.is_not_found() => confirmed.push(name.to_string()),
                Err(e) => {
                    warn!("Remote delete failed for {}: {}", name, e);
                    result.errors.push(format!("Remote delete failed: {} - {}", name, e));
                }
            }
        }
        if let Err(e) = self.ledger.clear(&confirmed).await {
            result.errors.push(format!("Tombstone update failed: {}", e));
        }
    }
}

/// Markdown summary of a check plus usage statistics
pub fn render_report(report: &UnreferencedReport, stats: &UsageStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Image Cleanup Report\n");
    let _ = writeln!(out, "## Totals");
    let _ = writeln!(out, "- **Local images**: {}", report.total_images);
    let _ = writeln!(out, "- **Referenced names**: {}", report.referenced_images);
    let _ = writeln!(out, "- **Unreferenced originals**: {}", report.unreferenced_originals.len());
    let _ = writeln!(out, "- **Orphaned thumbnails**: {}", report.orphaned_thumbnails.len());
    let _ = writeln!(out, "- **Originals without thumbnail**: {}", report.orphaned_originals.len());
    let _ = writeln!(out, "- **Total references**: {}\n", stats.total_references);

    if !report.deletion_set.is_empty() {
        let _ = writeln!(out, "## Files to delete");
        for (index, name) in report.deletion_set.iter().enumerate() {
            let _ = writeln!(out, "{}. `{}`", index + 1, name);
        }
        let _ = writeln!(out);
    }

    if !stats.usage.is_empty() {
        let _ = writeln!(out, "## Usage");
        let mut usage: Vec<(&String, &usize)> = stats.usage.iter().collect();
        usage.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (name, count) in usage {
            let _ = writeln!(out, "- `{}`: {} reference(s)", name, count);
        }
    }

    out
}
