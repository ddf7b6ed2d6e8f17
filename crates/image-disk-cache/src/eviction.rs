//! Directory enumeration and the expiration / size-cap sweeps
//!
//! Everything here is synchronous filesystem work; the store runs it on its
//! serial I/O queue via `spawn_blocking`.

use crate::types::{DiskEntry, DiskStats, SweepReport};
use chrono::{DateTime, Utc};
use std::fs::{self, ReadDir};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Lazily enumerate the blobs of a cache directory.
///
/// Directories, hidden files and entries whose metadata cannot be read are
/// skipped. A missing directory yields nothing.
pub fn enumerate(dir: &Path) -> DiskEntries {
    let inner = match fs::read_dir(dir) {
        Ok(read_dir) => Some(read_dir),
        Err(e) => {
            debug!(dir = ?dir, error = %e, "Cannot enumerate cache directory");
            None
        }
    };
    DiskEntries { inner }
}

/// Iterator returned by [`enumerate`]
pub struct DiskEntries {
    inner: Option<ReadDir>,
}

impl Iterator for DiskEntries {
    type Item = DiskEntry;

    fn next(&mut self) -> Option<DiskEntry> {
        let read_dir = self.inner.as_mut()?;
        for dir_entry in read_dir.by_ref() {
            let Ok(dir_entry) = dir_entry else {
                continue;
            };
            let file_name = dir_entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            let Ok(metadata) = dir_entry.metadata() else {
                continue;
            };
            if metadata.is_dir() {
                continue;
            }

            return Some(DiskEntry {
                path: dir_entry.path(),
                file_name,
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                size: metadata.len(),
            });
        }
        None
    }
}

/// Whether an entry was last modified before `cutoff`. Entries without a
/// readable modification time never expire.
pub fn is_expired(entry: &DiskEntry, cutoff: DateTime<Utc>) -> bool {
    entry.modified.is_some_and(|modified| modified < cutoff)
}

/// Pick the entries to delete so the total drops to half of
/// `max_total_size`, oldest first.
///
/// Returns nothing when the cap is zero or not exceeded. Entries without a
/// modification time go first.
pub fn plan_size_cap(mut retained: Vec<DiskEntry>, max_total_size: u64) -> Vec<DiskEntry> {
    if max_total_size == 0 {
        return Vec::new();
    }

    let mut total: u64 = retained.iter().map(|e| e.size).sum();
    if total <= max_total_size {
        return Vec::new();
    }

    let target = max_total_size / 2;
    retained.sort_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });

    let mut victims = Vec::new();
    for entry in retained {
        if total <= target {
            break;
        }
        total = total.saturating_sub(entry.size);
        victims.push(entry);
    }
    victims
}

/// Total size of every blob in the directory, without deleting anything
pub fn calculate_total_size(dir: &Path) -> DiskStats {
    enumerate(dir).fold(DiskStats::default(), |mut stats, entry| {
        stats.entries += 1;
        stats.total_size += entry.size;
        stats
    })
}

/// Run the expiration pass followed by the size-cap pass
pub fn sweep(dir: &Path, max_age: Duration, max_total_size: u64, now: DateTime<Utc>) -> SweepReport {
    let cutoff = chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age));

    let mut report = SweepReport::default();
    let mut retained = Vec::new();

    for entry in enumerate(dir) {
        if cutoff.is_some_and(|cutoff| is_expired(&entry, cutoff)) {
            if remove_entry(&entry) {
                report.expired.push(entry.file_name);
            }
            continue;
        }
        retained.push(entry);
    }

    let mut remaining: u64 = retained.iter().map(|e| e.size).sum();
    for entry in plan_size_cap(retained, max_total_size) {
        if remove_entry(&entry) {
            remaining = remaining.saturating_sub(entry.size);
            report.evicted.push(entry.file_name);
        }
    }
    report.remaining_size = remaining;

    debug!(
        dir = ?dir,
        expired = report.expired.len(),
        evicted = report.evicted.len(),
        remaining_size = report.remaining_size,
        "Disk cache sweep finished"
    );
    report
}

fn remove_entry(entry: &DiskEntry) -> bool {
    match fs::remove_file(&entry.path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = ?entry.path, error = %e, "Failed to remove cache file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tempfile::tempdir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn entry(name: &str, size: u64, age_secs: Option<i64>, now: DateTime<Utc>) -> DiskEntry {
        DiskEntry {
            path: PathBuf::from(format!("/cache/{}", name)),
            file_name: name.to_string(),
            modified: age_secs.map(|secs| now - chrono::Duration::seconds(secs)),
            size,
        }
    }

    fn write_file(dir: &Path, name: &str, size: usize, age: Duration) {
        let path = dir.join(name);
        fs::write(&path, vec![0u8; size]).unwrap();
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn names(entries: &[DiskEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.file_name.as_str()).collect()
    }

    #[test]
    fn test_plan_size_cap_reclaims_to_half_cap() {
        let now = Utc::now();
        // Ten entries of ten bytes, "e0" oldest
        let entries: Vec<DiskEntry> = (0..10)
            .map(|i| entry(&format!("e{}", i), 10, Some(1000 - i * 10), now))
            .collect();

        let victims = plan_size_cap(entries, 60);
        assert_eq!(
            names(&victims),
            vec!["e0", "e1", "e2", "e3", "e4", "e5", "e6"]
        );
        let reclaimed: u64 = victims.iter().map(|e| e.size).sum();
        assert_eq!(100 - reclaimed, 30);
    }

    #[test]
    fn test_plan_size_cap_uneven_sizes() {
        let now = Utc::now();
        let entries = vec![
            entry("newest", 40, Some(10), now),
            entry("oldest", 25, Some(300), now),
            entry("middle", 35, Some(200), now),
        ];

        // 100 bytes over a cap of 60, target 30
        let victims = plan_size_cap(entries, 60);
        assert_eq!(names(&victims), vec!["oldest", "middle"]);
    }

    #[test]
    fn test_plan_size_cap_under_cap_or_unlimited() {
        let now = Utc::now();
        let entries = vec![entry("a", 10, Some(5), now), entry("b", 10, Some(6), now)];

        assert!(plan_size_cap(entries.clone(), 20).is_empty());
        assert!(plan_size_cap(entries, 0).is_empty());
    }

    #[test]
    fn test_plan_size_cap_undated_entries_go_first() {
        let now = Utc::now();
        let entries = vec![
            entry("dated", 50, Some(1000), now),
            entry("undated", 50, None, now),
        ];

        let victims = plan_size_cap(entries, 60);
        assert_eq!(names(&victims), vec!["undated", "dated"]);
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::days(7);

        assert!(is_expired(&entry("old", 1, Some(8 * 86_400), now), cutoff));
        assert!(!is_expired(&entry("fresh", 1, Some(6 * 86_400), now), cutoff));
        assert!(!is_expired(&entry("undated", 1, None, now), cutoff));
    }

    #[test]
    fn test_enumerate_skips_directories_and_hidden_files() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "blob", 5, Duration::ZERO);
        write_file(dir.path(), ".blob.tmp", 5, Duration::ZERO);
        fs::create_dir(dir.path().join("nested")).unwrap();

        let entries: Vec<DiskEntry> = enumerate(dir.path()).collect();
        assert_eq!(names(&entries), vec!["blob"]);
        assert_eq!(entries[0].size, 5);
        assert!(entries[0].modified.is_some());
    }

    #[test]
    fn test_enumerate_is_restartable() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a", 1, Duration::ZERO);
        assert_eq!(enumerate(dir.path()).count(), 1);

        write_file(dir.path(), "b", 1, Duration::ZERO);
        assert_eq!(enumerate(dir.path()).count(), 2);
    }

    #[test]
    fn test_enumerate_missing_directory() {
        let dir = tempdir().unwrap();
        assert_eq!(enumerate(&dir.path().join("missing")).count(), 0);
    }

    #[test]
    fn test_sweep_removes_expired_and_keeps_fresh() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "old", 10, 8 * DAY);
        write_file(dir.path(), "fresh", 10, 6 * DAY);

        let report = sweep(dir.path(), 7 * DAY, 0, Utc::now());
        assert_eq!(report.expired, vec!["old"]);
        assert!(report.evicted.is_empty());
        assert_eq!(report.remaining_size, 10);
        assert!(!dir.path().join("old").exists());
        assert!(dir.path().join("fresh").exists());
    }

    #[test]
    fn test_sweep_enforces_size_cap_after_expiration() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "expired", 50, 30 * DAY);
        for i in 0..10u64 {
            write_file(dir.path(), &format!("f{}", i), 10, Duration::from_secs(1000 - i * 60));
        }

        let report = sweep(dir.path(), 7 * DAY, 60, Utc::now());
        assert_eq!(report.expired, vec!["expired"]);
        assert_eq!(
            report.evicted,
            vec!["f0", "f1", "f2", "f3", "f4", "f5", "f6"]
        );
        assert_eq!(report.remaining_size, 30);
        assert_eq!(calculate_total_size(dir.path()).total_size, 30);
    }

    #[test]
    fn test_calculate_total_size() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a", 3, Duration::ZERO);
        write_file(dir.path(), "b", 4, 30 * DAY);

        let stats = calculate_total_size(dir.path());
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_size, 7);
        // Read-only: nothing was removed
        assert!(dir.path().join("b").exists());
    }
}
