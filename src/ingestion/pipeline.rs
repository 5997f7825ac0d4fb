//! Orchestrator - clean raw exports, then load listings, calendar and reviews in order

use crate::config::Config;
use crate::ingestion::clean::clean_file;
use crate::ingestion::db::Warehouse;
use crate::ingestion::enrich::{aggregate_weekly, calendar_date_span, downsample, review_cap};
use crate::ingestion::error::LoadError;
use crate::ingestion::parse::{read_calendar, read_listings, read_reviews};
use crate::ingestion::stage::{stage_rows, PgStagingSink, SkippedRowLog};
use crate::ingestion::types::{FileKind, FileOutcome, PhaseReport, RunReport, WriteStats};
use crate::ingestion::utils::find_files;
use crate::ingestion::write;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const REPORT_FILE: &str = "load_report.json";

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Phases to run; empty means all of them
    pub phases: Vec<FileKind>,
    /// Clear every table before loading
    pub fresh: bool,
}

/// Requested phases in load order, duplicates removed
pub fn ordered_phases(requested: &[FileKind]) -> Vec<FileKind> {
    FileKind::ALL
        .into_iter()
        .filter(|kind| requested.is_empty() || requested.contains(kind))
        .collect()
}

/// Clean every raw file of every kind. A file that fails is logged and skipped.
/// Returns the number of cleaned files written.
pub fn clean_all(config: &Config) -> Result<usize> {
    let mut written = 0;

    for kind in FileKind::ALL {
        info!("📁 Processing {} files...", kind);
        let files = find_files(&config.raw_data_dir, kind)?;
        if files.is_empty() {
            warn!("No {} files found in {:?}", kind, config.raw_data_dir);
            continue;
        }

        let mut processed = 0;
        for path in &files {
            match clean_file(kind, path, &config.cleaned_data_dir) {
                Ok(Some(_)) => processed += 1,
                Ok(None) => {}
                Err(e) => error!("❌ Error cleaning {:?}: {}", path, e),
            }
        }
        info!(
            "Successfully processed {}/{} {} files",
            processed,
            files.len(),
            kind
        );
        written += processed;
    }

    Ok(written)
}

pub struct Pipeline<'a> {
    config: &'a Config,
    warehouse: &'a mut Warehouse,
    skipped_log: SkippedRowLog,
    report: RunReport,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, warehouse: &'a mut Warehouse) -> Self {
        Pipeline {
            config,
            warehouse,
            skipped_log: SkippedRowLog::in_dir(&config.logs_dir),
            report: RunReport::default(),
        }
    }

    /// Schema, optional clear, phases, hosts, views, statistics, report file
    pub async fn run(mut self, options: &LoadOptions) -> Result<RunReport> {
        self.warehouse
            .apply_schema()
            .await
            .context("Failed to apply schema")?;

        if options.fresh {
            self.warehouse
                .clear_tables()
                .await
                .context("Failed to clear tables")?;
        }

        for kind in ordered_phases(&options.phases) {
            let phase = self.run_phase(kind).await?;
            info!(
                "✓ {} phase complete: {} ({} failed files)",
                kind,
                phase.totals,
                phase.failed_files()
            );
            self.report.phases.push(phase);

            if kind == FileKind::Listings {
                if let Err(e) = write::populate_hosts(self.warehouse.conn()).await {
                    self.record_failure("dim_hosts", &e).await?;
                }
            }
        }

        self.warehouse
            .create_views()
            .await
            .context("Failed to create views")?;
        self.report.table_counts = self.warehouse.show_statistics().await?;

        let report_path = write_report(&self.report, &self.config.logs_dir)?;
        if self.report.error_count > 0 {
            warn!(
                "Load finished with {} errors, see {:?}",
                self.report.error_count, report_path
            );
        } else {
            info!("Load finished without errors");
        }

        Ok(self.report)
    }

    async fn run_phase(&mut self, kind: FileKind) -> Result<PhaseReport> {
        info!("=== {} phase ===", kind);
        let mut phase = PhaseReport::new(kind);

        let files = find_files(&self.config.cleaned_data_dir, kind)?;
        if files.is_empty() {
            if kind == FileKind::Listings {
                return Err(LoadError::NoInputFiles {
                    kind,
                    dir: self.config.cleaned_data_dir.clone(),
                }
                .into());
            }
            warn!(
                "No cleaned {} files in {:?}",
                kind, self.config.cleaned_data_dir
            );
            return Ok(phase);
        }

        if kind == FileKind::Calendar {
            write::truncate_calendar(self.warehouse.conn()).await?;
        }

        for (idx, path) in files.iter().enumerate() {
            info!("Loading [{}/{}] {:?}", idx + 1, files.len(), path);
            let result = match kind {
                FileKind::Listings => self.load_listings_file(path).await,
                FileKind::Calendar => self.load_calendar_file(path).await,
                FileKind::Reviews => self.load_reviews_file(path).await,
            };

            match result {
                Ok(stats) => {
                    phase.totals.absorb(&stats);
                    phase.files.push(FileOutcome {
                        path: path.clone(),
                        stats: Some(stats),
                        error: None,
                    });
                }
                Err(e) => {
                    phase.totals.errors += 1;
                    phase.files.push(FileOutcome {
                        path: path.clone(),
                        stats: None,
                        error: Some(e.to_string()),
                    });
                    self.record_failure(&path.display().to_string(), &e).await?;
                }
            }
        }

        Ok(phase)
    }

    /// Count a failure and keep going; a dropped connection is replaced first
    async fn record_failure(&mut self, what: &str, err: &LoadError) -> Result<()> {
        error!("✗ {} failed: {}", what, err);
        self.report.error_count += 1;

        if err.is_connection_dropped() {
            self.warehouse
                .reconnect()
                .await
                .context("Database unreachable after connection loss")?;
        }
        Ok(())
    }

    async fn load_listings_file(&mut self, path: &Path) -> Result<WriteStats, LoadError> {
        let (rows, _report) = read_listings(path)?;

        let mut sink = PgStagingSink::new(self.warehouse.conn());
        let staged = stage_rows(
            &mut sink,
            &rows,
            self.config.staging_batch_size,
            &self.skipped_log,
        )
        .await?;

        let merge = write::promote_listings(self.warehouse.conn()).await?;

        Ok(WriteStats {
            inserted: merge.inserted as usize,
            updated: merge.updated as usize,
            skipped: staged.skipped,
            errors: 0,
        })
    }

    async fn load_calendar_file(&mut self, path: &Path) -> Result<WriteStats, LoadError> {
        let (rows, dropped) = read_calendar(path)?;

        let Some(span) = calendar_date_span(&rows) else {
            warn!("No usable calendar rows in {:?}", path);
            return Ok(WriteStats {
                skipped: dropped,
                ..Default::default()
            });
        };

        let weeks = aggregate_weekly(&rows);
        let load = write::load_calendar_weeks(self.warehouse.conn(), &weeks, span).await?;
        info!(
            "Inserted {} weekly rows ({} dates added to dim_dates)",
            load.inserted, load.dates_added
        );

        Ok(WriteStats {
            inserted: load.inserted as usize,
            skipped: dropped + load.orphaned as usize,
            ..Default::default()
        })
    }

    async fn load_reviews_file(&mut self, path: &Path) -> Result<WriteStats, LoadError> {
        let mut rows = read_reviews(path)?;

        if let Some(keep) = review_cap(
            rows.len(),
            self.config.review_cap_threshold,
            self.config.review_cap_ratio,
        ) {
            info!(
                "Sampling {} of {} reviews from {:?}",
                keep,
                rows.len(),
                path
            );
            rows = downsample(rows, keep, self.config.review_sample_seed);
        }

        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let inserted = write::load_reviews(
            self.warehouse,
            &rows,
            self.config.max_load_attempts,
            &label,
        )
        .await?;

        Ok(WriteStats {
            inserted: inserted as usize,
            skipped: rows.len().saturating_sub(inserted as usize),
            ..Default::default()
        })
    }
}

/// Write the run report as pretty JSON into `logs_dir`
pub fn write_report(report: &RunReport, logs_dir: &Path) -> Result<PathBuf> {
    let path = logs_dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Run report written to {:?}", path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_always_run_in_load_order() {
        assert_eq!(
            ordered_phases(&[FileKind::Reviews, FileKind::Listings]),
            vec![FileKind::Listings, FileKind::Reviews]
        );
        assert_eq!(
            ordered_phases(&[FileKind::Calendar, FileKind::Calendar]),
            vec![FileKind::Calendar]
        );
        assert_eq!(ordered_phases(&[]), FileKind::ALL.to_vec());
    }

    #[test]
    fn test_write_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut phase = PhaseReport::new(FileKind::Calendar);
        phase.files.push(FileOutcome {
            path: PathBuf::from("minimal_Spain_Madrid_calendar_2025.csv.gz"),
            stats: None,
            error: Some("database error: boom".to_string()),
        });
        phase.totals.errors = 1;
        let report = RunReport {
            phases: vec![phase],
            error_count: 1,
            table_counts: vec![("dim_listings".to_string(), 12)],
        };

        let path = write_report(&report, dir.path()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["error_count"], 1);
        assert_eq!(value["phases"][0]["kind"], "calendar");
        assert_eq!(value["phases"][0]["files"][0]["error"], "database error: boom");
        assert_eq!(value["table_counts"][0][1], 12);
    }

    #[test]
    fn test_clean_all_tolerates_missing_kinds() {
        let root = tempfile::tempdir().unwrap();
        let raw = root.path().join("raw");
        let cleaned = root.path().join("cleaned");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::create_dir_all(&cleaned).unwrap();

        let config = Config {
            database_url: "postgres://localhost/airbnb".to_string(),
            raw_data_dir: raw,
            cleaned_data_dir: cleaned,
            logs_dir: root.path().to_path_buf(),
            staging_batch_size: 500,
            review_cap_threshold: 200_000,
            review_cap_ratio: 0.8,
            review_sample_seed: 42,
            max_load_attempts: 3,
        };

        assert_eq!(clean_all(&config).unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Needs a live DATABASE_URL
    async fn test_missing_listings_files_are_fatal() {
        let root = tempfile::tempdir().unwrap();
        let url = std::env::var("DATABASE_URL").unwrap();
        let config = Config {
            database_url: url.clone(),
            raw_data_dir: root.path().join("raw"),
            cleaned_data_dir: root.path().to_path_buf(),
            logs_dir: root.path().to_path_buf(),
            staging_batch_size: 500,
            review_cap_threshold: 200_000,
            review_cap_ratio: 0.8,
            review_sample_seed: 42,
            max_load_attempts: 3,
        };
        let mut warehouse = Warehouse::connect(&url).await.unwrap();

        let err = Pipeline::new(&config, &mut warehouse)
            .run(&LoadOptions::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no listings files"));
    }
}
