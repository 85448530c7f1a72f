/// Reference resolution
///
/// Maps the externally-owned log collection to the set of asset filenames it
/// references. Pure functions: recompute on every call, never cache.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::asset::AssetPair;

/// Referenced filenames, originals and thumbnails alike, in sorted order
pub type ReferenceSet = BTreeSet<String>;

/// Anything from the domain layer that lists attached image filenames
pub trait ImageRefs {
    fn images(&self) -> &[String];
}

/// Minimal view of a log record: only the attached image filenames.
/// Unknown fields in the domain's JSON are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl LogRecord {
    pub fn with_images<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: None,
            images: images.into_iter().map(Into::into).collect(),
        }
    }
}

impl ImageRefs for LogRecord {
    fn images(&self) -> &[String] {
        &self.images
    }
}

/// Every referenced filename plus its derived thumbnail name
pub fn resolve<L: ImageRefs>(logs: &[L]) -> ReferenceSet {
    let mut referenced = ReferenceSet::new();
    for name in logs.iter().flat_map(|log| log.images()) {
        if name.is_empty() {
            continue;
        }
        let pair = AssetPair::for_original(name);
        referenced.insert(pair.original().to_string());
        referenced.insert(pair.thumbnail().to_string());
    }
    referenced
}

/// How often each original is referenced across the logs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub usage: BTreeMap<String, usize>,
    pub total_references: usize,
    pub unique_images: usize,
}

pub fn usage_stats<L: ImageRefs>(logs: &[L]) -> UsageStats {
    let mut usage: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_references = 0;

    for name in logs.iter().flat_map(|log| log.images()) {
        if name.is_empty() {
            continue;
        }
        *usage.entry(name.clone()).or_default() += 1;
        total_references += 1;
    }

    UsageStats {
        unique_images: usage.len(),
        usage,
        total_references,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_includes_thumbnails() {
        let logs = vec![
            LogRecord::with_images(["a.jpg"]),
            LogRecord::with_images(["a.jpg", "b.png"]),
            LogRecord::default(),
        ];
        let referenced = resolve(&logs);
        let expected: Vec<&str> = vec!["a.jpg", "b.png", "thumb_a.jpg", "thumb_b.png"];
        assert_eq!(referenced.iter().map(String::as_str).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_resolve_skips_empty_names() {
        let logs = vec![LogRecord::with_images([""])];
        assert!(resolve(&logs).is_empty());
    }

    #[test]
    fn test_resolve_reflects_current_logs() {
        let mut logs = vec![LogRecord::with_images(["a.jpg"])];
        assert!(resolve(&logs).contains("thumb_a.jpg"));
        logs[0].images.clear();
        assert!(resolve(&logs).is_empty());
    }

    #[test]
    fn test_usage_stats() {
        let logs = vec![
            LogRecord::with_images(["a.jpg", "b.jpg"]),
            LogRecord::with_images(["a.jpg"]),
        ];
        let stats = usage_stats(&logs);
        assert_eq!(stats.total_references, 3);
        assert_eq!(stats.unique_images, 2);
        assert_eq!(stats.usage["a.jpg"], 2);
    }

    #[test]
    fn test_log_record_ignores_unknown_fields() {
        let json = r#"[{"id":"l1","title":"Run","startTime":1,"images":["a.jpg"]},{"id":"l2"}]"#;
        let logs: Vec<LogRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(logs[0].images, vec!["a.jpg"]);
        assert!(logs[1].images.is_empty());
    }
}
