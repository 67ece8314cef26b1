//! Daily artifact calendar.
//!
//! Each calendar month gets a deterministic permutation of the artifact
//! set, seeded by `year * 100 + month`, so every process with the same
//! artifacts agrees on which chapter belongs to which day. The first
//! computation for a month is cached and never re-scanned.

use chrono::{Datelike, NaiveDate};
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Day of month (1-based) to artifact id.
pub type Assignment = BTreeMap<u32, String>;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("No artifact available for {year}-{month:02}")]
    NotFound { year: i32, month: u32 },

    #[error("Artifact I/O failed: {path}: {reason}")]
    Io { path: String, reason: String },
}

/// A loaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: String,
    pub content: String,
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(next.signed_duration_since(first).num_days() as u32)
}

/// Assign one artifact to every day of the month.
///
/// `artifacts` must already be in canonical (sorted) order. Fewer artifacts
/// than days wrap around cyclically. An empty set or invalid month yields
/// an empty assignment.
pub fn monthly_assignment(artifacts: &[String], year: i32, month: u32) -> Assignment {
    let Some(days) = days_in_month(year, month) else {
        return Assignment::new();
    };
    if artifacts.is_empty() {
        return Assignment::new();
    }

    let seed = (i64::from(year) * 100 + i64::from(month)) as u64;
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut shuffled = artifacts.to_vec();
    for i in (1..shuffled.len()).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        shuffled.swap(i, j);
    }

    (1..=days)
        .map(|day| {
            let idx = (day as usize - 1) % shuffled.len();
            (day, shuffled[idx].clone())
        })
        .collect()
}

/// Lazily computes and caches monthly assignments over an artifact directory.
pub struct DailyArtifactScheduler {
    dir: PathBuf,
    extension: String,
    cache: RwLock<HashMap<(i32, u32), Arc<Assignment>>>,
}

impl DailyArtifactScheduler {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifact ids (file names) in the directory, sorted.
    async fn scan(&self) -> Result<Vec<String>, CalendarError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| self.io_error(&self.dir, e))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.io_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == self.extension.as_str()) {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn io_error(&self, path: &Path, e: std::io::Error) -> CalendarError {
        CalendarError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }

    pub async fn assignment_for(&self, year: i32, month: u32) -> Result<Arc<Assignment>, CalendarError> {
        if let Some(cached) = self.cache.read().await.get(&(year, month)) {
            debug!(year, month, "Calendar cache hit");
            return Ok(cached.clone());
        }

        let artifacts = self.scan().await?;
        let assignment = monthly_assignment(&artifacts, year, month);
        if assignment.is_empty() {
            return Err(CalendarError::NotFound { year, month });
        }

        let mut cache = self.cache.write().await;
        // Another task may have computed the month while we scanned.
        let stored = cache
            .entry((year, month))
            .or_insert_with(|| {
                info!(year, month, artifacts = artifacts.len(), "Calendar computed");
                Arc::new(assignment)
            })
            .clone();
        Ok(stored)
    }

    pub async fn artifact_for_date(&self, date: NaiveDate) -> Result<String, CalendarError> {
        let assignment = self.assignment_for(date.year(), date.month()).await?;
        assignment
            .get(&date.day())
            .cloned()
            .ok_or(CalendarError::NotFound {
                year: date.year(),
                month: date.month(),
            })
    }

    pub async fn load(&self, date: NaiveDate) -> Result<Artifact, CalendarError> {
        let id = self.artifact_for_date(date).await?;
        let path = self.dir.join(&id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| self.io_error(&path, e))?;
        Ok(Artifact { id, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn artifact_dir(names: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), format!("content of {name}")).unwrap();
        }
        dir
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2025, 11), Some(30));
        assert_eq!(days_in_month(2025, 12), Some(31));
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2025, 2), Some(28));
        assert_eq!(days_in_month(2025, 13), None);
    }

    #[test]
    fn three_artifacts_cover_november() {
        let artifacts = ids(&["A", "B", "C"]);
        let first = monthly_assignment(&artifacts, 2025, 11);
        let second = monthly_assignment(&artifacts, 2025, 11);

        assert_eq!(first, second);
        assert_eq!(first.len(), 30);
        assert_eq!(first.keys().copied().collect::<Vec<_>>(), (1..=30).collect::<Vec<_>>());
        assert!(first.values().all(|v| artifacts.contains(v)));
    }

    #[test]
    fn assignment_cycles_through_the_permutation() {
        let artifacts = ids(&["A", "B", "C"]);
        let assignment = monthly_assignment(&artifacts, 2025, 11);
        for day in 4..=30 {
            assert_eq!(assignment[&day], assignment[&(day - 3)]);
        }
        let first_three: std::collections::BTreeSet<_> = (1..=3).map(|d| &assignment[&d]).collect();
        assert_eq!(first_three.len(), 3);
    }

    #[test]
    fn every_day_of_every_month_is_assigned() {
        let artifacts: Vec<String> = (0..40).map(|i| format!("{i:02}.md")).collect();
        for year in [2024, 2025, 2026] {
            for month in 1..=12 {
                let assignment = monthly_assignment(&artifacts, year, month);
                assert_eq!(assignment.len() as u32, days_in_month(year, month).unwrap());
                assert_eq!(assignment, monthly_assignment(&artifacts, year, month));
            }
        }
    }

    #[test]
    fn enough_artifacts_means_no_repeats() {
        let artifacts: Vec<String> = (0..31).map(|i| format!("{i:02}.md")).collect();
        let assignment = monthly_assignment(&artifacts, 2025, 1);
        let unique: std::collections::BTreeSet<_> = assignment.values().collect();
        assert_eq!(unique.len(), 31);
    }

    #[test]
    fn months_differ() {
        let artifacts: Vec<String> = (0..30).map(|i| format!("{i:02}.md")).collect();
        assert_ne!(
            monthly_assignment(&artifacts, 2025, 10),
            monthly_assignment(&artifacts, 2025, 11)
        );
    }

    #[test]
    fn empty_set_is_empty() {
        assert!(monthly_assignment(&[], 2025, 11).is_empty());
    }

    #[tokio::test]
    async fn scheduler_reads_sorted_markdown_files() {
        let dir = artifact_dir(&["b.md", "a.md", "notes.txt"]);
        let scheduler = DailyArtifactScheduler::new(dir.path(), "md");

        let assignment = scheduler.assignment_for(2025, 11).await.unwrap();
        assert!(assignment.values().all(|v| v == "a.md" || v == "b.md"));
        assert_eq!(*assignment, monthly_assignment(&ids(&["a.md", "b.md"]), 2025, 11));
    }

    #[tokio::test]
    async fn assignment_is_frozen_for_the_month() {
        let dir = artifact_dir(&["a.md", "b.md", "c.md"]);
        let scheduler = DailyArtifactScheduler::new(dir.path(), "md");
        let before = scheduler.assignment_for(2025, 11).await.unwrap();

        std::fs::remove_file(dir.path().join("c.md")).unwrap();
        std::fs::write(dir.path().join("d.md"), "new").unwrap();

        let after = scheduler.assignment_for(2025, 11).await.unwrap();
        assert_eq!(before, after);
        assert!(Arc::ptr_eq(&before, &after));

        // A month not yet computed sees the new directory.
        let december = scheduler.assignment_for(2025, 12).await.unwrap();
        assert!(december.values().all(|v| v != "c.md"));
    }

    #[tokio::test]
    async fn empty_directory_is_not_found_and_not_cached() {
        let dir = TempDir::new().unwrap();
        let scheduler = DailyArtifactScheduler::new(dir.path(), "md");
        assert!(matches!(
            scheduler.assignment_for(2025, 11).await,
            Err(CalendarError::NotFound { year: 2025, month: 11 })
        ));

        std::fs::write(dir.path().join("a.md"), "late arrival").unwrap();
        let assignment = scheduler.assignment_for(2025, 11).await.unwrap();
        assert_eq!(assignment.len(), 30);
    }

    #[tokio::test]
    async fn load_returns_content_for_the_day() {
        let dir = artifact_dir(&["only.md"]);
        let scheduler = DailyArtifactScheduler::new(dir.path(), "md");
        let date = NaiveDate::from_ymd_opt(2025, 11, 17).unwrap();

        let artifact = scheduler.load(date).await.unwrap();
        assert_eq!(artifact.id, "only.md");
        assert_eq!(artifact.content, "content of only.md");
        assert_eq!(scheduler.artifact_for_date(date).await.unwrap(), "only.md");
    }

    #[tokio::test]
    async fn missing_directory_is_io_error() {
        let scheduler = DailyArtifactScheduler::new("/nonexistent/cadence/chapters", "md");
        assert!(matches!(
            scheduler.assignment_for(2025, 1).await,
            Err(CalendarError::Io { .. })
        ));
    }
}
