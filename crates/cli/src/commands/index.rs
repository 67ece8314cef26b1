//! `cadence index`: bring the full-text index in line with the library.

use super::open_index;
use cadence_config::AppConfig;
use cadence_core::index::ReindexReport;

pub fn summary(report: &ReindexReport) -> String {
    format!(
        "{} updated, {} unchanged, {} removed, {} failed ({} chunks written, {} deleted)",
        report.updated.len(),
        report.unchanged.len(),
        report.removed.len(),
        report.failed.len(),
        report.chunks_written,
        report.chunks_deleted,
    )
}

pub async fn run(config: AppConfig, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let index = open_index(&config).await?;
    let report = index
        .reindex_dir(&config.index.source_dir, &config.index.extension, force)
        .await?;

    println!("{}", summary(&report));
    for failure in &report.failed {
        eprintln!("  failed: {}: {}", failure.path, failure.reason);
    }
    println!("{} chunks indexed", index.chunk_count().await?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::index::IndexFailure;

    #[test]
    fn summary_counts_every_bucket() {
        let report = ReindexReport {
            updated: vec!["a.md".into(), "b.md".into()],
            unchanged: vec!["c.md".into()],
            removed: vec![],
            failed: vec![IndexFailure {
                path: "d.md".into(),
                reason: "denied".into(),
            }],
            chunks_written: 7,
            chunks_deleted: 3,
        };
        assert_eq!(
            summary(&report),
            "2 updated, 1 unchanged, 0 removed, 1 failed (7 chunks written, 3 deleted)"
        );
    }
}
