//! Staging loader - persist sanitized rows as text before promotion
//!
//! Rows go in batches; a failed batch is retried one row at a time so a
//! single bad row cannot sink its neighbours. Rows that still fail are
//! appended to the skipped-rows log instead of aborting the load. A dropped
//! connection is never a row problem and aborts the file.

use crate::ingestion::error::LoadError;
use crate::ingestion::types::{StageStats, StagedListing};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SKIPPED_ROWS_FILE: &str = "listings_skipped_rows.csv";

/// Where staged rows are written
pub(crate) trait StagingSink {
    async fn clear(&mut self) -> Result<(), LoadError>;
    async fn insert_batch(&mut self, rows: &[StagedListing]) -> Result<(), LoadError>;
    async fn insert_row(&mut self, row: &StagedListing) -> Result<(), LoadError>;
}

/// Append-only side log for rows that could not be staged
pub struct SkippedRowLog {
    path: PathBuf,
}

impl SkippedRowLog {
    pub fn in_dir(logs_dir: &Path) -> Self {
        SkippedRowLog {
            path: logs_dir.join(SKIPPED_ROWS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, row: &StagedListing) -> Result<(), LoadError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LoadError::io(&self.path, e))?;
        writeln!(file, "{}", row.to_log_line()).map_err(|e| LoadError::io(&self.path, e))
    }
}

/// Stage one file's rows: clear, insert in batches, fall back per row, log the rest
pub(crate) async fn stage_rows<S: StagingSink>(
    sink: &mut S,
    rows: &[StagedListing],
    batch_size: usize,
    skipped_log: &SkippedRowLog,
) -> Result<StageStats, LoadError> {
    // leftovers from an earlier failed promote must not ride along with this file
    sink.clear().await?;

    let mut stats = StageStats::default();

    for batch in rows.chunks(batch_size.max(1)) {
        match sink.insert_batch(batch).await {
            Ok(()) => stats.staged += batch.len(),
            Err(e) => {
                warn!("Staging batch insert failed: {}", e);
                for row in batch {
                    match sink.insert_row(row).await {
                        Ok(()) => stats.staged += 1,
                        Err(row_err) if row_err.is_connection_dropped() => return Err(row_err),
                        Err(row_err) => {
                            warn!(
                                "Skipping listing {:?}: {}",
                                row.listing_id.as_deref().unwrap_or(""),
                                row_err
                            );
                            skipped_log.append(row)?;
                            stats.skipped += 1;
                        }
                    }
                }
            }
        }
    }

    info!(
        "Staged {} rows into dim_listings_staging ({} skipped)",
        stats.staged, stats.skipped
    );

    Ok(stats)
}

/// `dim_listings_staging` on a live connection
pub(crate) struct PgStagingSink<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgStagingSink<'c> {
    pub(crate) fn new(conn: &'c mut PgConnection) -> Self {
        PgStagingSink { conn }
    }

    fn insert_query<'a>(rows: impl IntoIterator<Item = &'a StagedListing>) -> QueryBuilder<'a, Postgres> {
        let mut qb: QueryBuilder<'a, Postgres> = QueryBuilder::new(format!(
            "INSERT INTO dim_listings_staging ({}) ",
            StagedListing::COLUMNS.join(", ")
        ));
        qb.push_values(rows, |mut b, row| {
            for value in row.values() {
                b.push_bind(value);
            }
        });
        qb
    }
}

impl StagingSink for PgStagingSink<'_> {
    async fn clear(&mut self) -> Result<(), LoadError> {
        sqlx::query("TRUNCATE TABLE dim_listings_staging RESTART IDENTITY")
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn insert_batch(&mut self, rows: &[StagedListing]) -> Result<(), LoadError> {
        Self::insert_query(rows).build().execute(&mut *self.conn).await?;
        Ok(())
    }

    async fn insert_row(&mut self, row: &StagedListing) -> Result<(), LoadError> {
        Self::insert_query(std::iter::once(row))
            .build()
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }
}
