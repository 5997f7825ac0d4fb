//! Write functions - promote staged rows and load facts into PostgreSQL

use crate::ingestion::db::Warehouse;
use crate::ingestion::enrich::{derive_date_row, missing_dates};
use crate::ingestion::error::LoadError;
use crate::ingestion::types::{MergeSummary, ReviewRow, WeeklyCalendar, WriteStats};
use crate::ingestion::utils::US_STATE_CODES;
use chrono::NaiveDate;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use std::borrow::Cow;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Bind parameters per statement stay well under the protocol limit of 65535
const CALENDAR_CHUNK: usize = 5_000;
const DATES_CHUNK: usize = 2_000;
const COPY_CHUNK_BYTES: usize = 1 << 20;

const VALID_STAGED_SQL: &str = r#"
    SELECT
        COUNT(*) FILTER (WHERE try_cast_bigint(listing_id) IS NOT NULL) AS valid_listing_ids,
        COUNT(*) FILTER (WHERE try_cast_bigint(host_id) IS NOT NULL) AS valid_host_ids
    FROM dim_listings_staging
"#;

/// Upsert castable staged rows; a repeated id keeps its last staged row
const MERGE_LISTINGS_SQL: &str = r#"
    WITH src AS (
        SELECT DISTINCT ON (try_cast_bigint(listing_id))
            try_cast_bigint(listing_id) AS listing_id,
            try_cast_bigint(host_id) AS host_id,
            host_name,
            host_city,
            host_country,
            property_country,
            property_city,
            property_neighbourhood,
            try_cast_decimal(latitude, 1000, 6) AS latitude,
            try_cast_decimal(longitude, 1000, 6) AS longitude,
            try_cast_decimal(price, 100000000, 2) AS price,
            try_cast_bigint(number_of_reviews) AS number_of_reviews,
            try_cast_decimal(review_scores_rating, 1000, 2) AS review_scores_rating,
            try_cast_bigint(calculated_host_listings_count) AS calculated_host_listings_count,
            CASE is_local_host WHEN 'True' THEN TRUE WHEN 'False' THEN FALSE END AS is_local_host
        FROM dim_listings_staging
        WHERE try_cast_bigint(listing_id) IS NOT NULL
        ORDER BY try_cast_bigint(listing_id), staging_row DESC
    ),
    merged AS (
        INSERT INTO dim_listings (
            listing_id, host_id, host_name, host_city, host_country,
            property_country, property_city, property_neighbourhood,
            latitude, longitude, price, number_of_reviews, review_scores_rating,
            calculated_host_listings_count, is_local_host, last_updated
        )
        SELECT
            listing_id, host_id, host_name, host_city, host_country,
            property_country, property_city, property_neighbourhood,
            latitude, longitude, price, number_of_reviews, review_scores_rating,
            calculated_host_listings_count, is_local_host, NOW()
        FROM src
        ON CONFLICT (listing_id) DO UPDATE SET
            host_id = EXCLUDED.host_id,
            host_name = EXCLUDED.host_name,
            host_city = EXCLUDED.host_city,
            host_country = EXCLUDED.host_country,
            property_country = EXCLUDED.property_country,
            property_city = EXCLUDED.property_city,
            property_neighbourhood = EXCLUDED.property_neighbourhood,
            latitude = EXCLUDED.latitude,
            longitude = EXCLUDED.longitude,
            price = EXCLUDED.price,
            number_of_reviews = EXCLUDED.number_of_reviews,
            review_scores_rating = EXCLUDED.review_scores_rating,
            calculated_host_listings_count = EXCLUDED.calculated_host_listings_count,
            is_local_host = EXCLUDED.is_local_host,
            last_updated = NOW()
        RETURNING (xmax = 0) AS inserted
    )
    SELECT
        COUNT(*) FILTER (WHERE inserted) AS inserted,
        COUNT(*) FILTER (WHERE NOT inserted) AS updated
    FROM merged
"#;

/// Every staged row, castable or not, keeps its raw id for auditing
const INSERT_ID_MAP_SQL: &str = r#"
    INSERT INTO dim_listing_id_map (listing_id, listing_raw_id, part1, part2, part3)
    SELECT
        try_cast_bigint(listing_id),
        listing_id,
        NULLIF(LEFT(listing_id, 6), ''),
        NULLIF(SUBSTRING(listing_id FROM 7 FOR 6), ''),
        NULLIF(SUBSTRING(listing_id FROM 13 FOR 6), '')
    FROM dim_listings_staging
    ORDER BY staging_row
"#;

const LISTINGS_TOTALS_SQL: &str =
    "SELECT COUNT(*) AS total_rows, COUNT(host_id) AS hosts_present FROM dim_listings";

/// One host row per host id, attributes from the host's newest listing
const POPULATE_HOSTS_SQL: &str = r#"
    WITH counts AS (
        SELECT host_id, COUNT(*) AS n
        FROM dim_listings
        WHERE host_id IS NOT NULL
        GROUP BY host_id
    ),
    latest AS (
        SELECT DISTINCT ON (host_id) host_id, host_name, host_city, host_country
        FROM dim_listings
        WHERE host_id IS NOT NULL
        ORDER BY host_id, listing_id DESC
    ),
    upserted AS (
        INSERT INTO dim_hosts (
            host_id, host_name, host_city, host_country, host_country_corrected, listings_count
        )
        SELECT
            latest.host_id,
            latest.host_name,
            latest.host_city,
            latest.host_country,
            CASE WHEN btrim(latest.host_country) = ANY($1) THEN 'United States'
                 ELSE latest.host_country END,
            counts.n
        FROM latest
        JOIN counts USING (host_id)
        ON CONFLICT (host_id) DO UPDATE SET
            host_name = EXCLUDED.host_name,
            host_city = EXCLUDED.host_city,
            host_country = EXCLUDED.host_country,
            host_country_corrected = EXCLUDED.host_country_corrected,
            listings_count = EXCLUDED.listings_count
        RETURNING (xmax = 0) AS inserted
    )
    SELECT
        COUNT(*) FILTER (WHERE inserted) AS inserted,
        COUNT(*) FILTER (WHERE NOT inserted) AS updated
    FROM upserted
"#;

const COPY_REVIEWS_SQL: &str = "COPY fact_reviews_staging \
    (review_id, listing_id, review_date, reviewer_id, reviewer_name, comments) \
    FROM STDIN WITH (FORMAT csv, DELIMITER '|')";

/// Append castable reviews whose listing is loaded; known review ids are left alone
const INSERT_REVIEWS_SQL: &str = r#"
    INSERT INTO fact_reviews (review_id, listing_id, review_date, reviewer_id, reviewer_name, comments)
    SELECT
        try_cast_bigint(s.review_id),
        try_cast_bigint(s.listing_id),
        try_cast_date(s.review_date),
        try_cast_bigint(s.reviewer_id),
        s.reviewer_name,
        s.comments
    FROM fact_reviews_staging s
    WHERE try_cast_bigint(s.review_id) IS NOT NULL
      AND EXISTS (
          SELECT 1 FROM dim_listings d WHERE d.listing_id = try_cast_bigint(s.listing_id)
      )
    ON CONFLICT (review_id) DO NOTHING
"#;

/// Cast and upsert the staged listings, append the id map, clear staging.
/// All of it commits together; an error drops the transaction, which rolls back.
pub async fn promote_listings(conn: &mut PgConnection) -> Result<MergeSummary, LoadError> {
    let (valid_ids, valid_hosts): (i64, i64) =
        sqlx::query_as(VALID_STAGED_SQL).fetch_one(&mut *conn).await?;
    info!(
        "{} valid listing_ids and {} valid host_ids in dim_listings_staging",
        valid_ids, valid_hosts
    );

    let mut tx = conn.begin().await?;

    let (inserted, updated): (i64, i64) =
        sqlx::query_as(MERGE_LISTINGS_SQL).fetch_one(&mut *tx).await?;

    let mapped = sqlx::query(INSERT_ID_MAP_SQL)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    debug!("Recorded {} raw ids in dim_listing_id_map", mapped);

    sqlx::query("TRUNCATE TABLE dim_listings_staging RESTART IDENTITY")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let (total_rows, hosts_present): (i64, i64) =
        sqlx::query_as(LISTINGS_TOTALS_SQL).fetch_one(&mut *conn).await?;

    let summary = MergeSummary {
        inserted,
        updated,
        total_rows,
        hosts_present,
    };
    info!(
        "Listings added: {}, updated: {}; dim_listings now {} rows ({} with host_id)",
        summary.inserted, summary.updated, summary.total_rows, summary.hosts_present
    );

    Ok(summary)
}

/// Rebuild host attributes from the loaded listings
pub async fn populate_hosts(conn: &mut PgConnection) -> Result<WriteStats, LoadError> {
    let (inserted, updated): (i64, i64) = sqlx::query_as(POPULATE_HOSTS_SQL)
        .bind(&US_STATE_CODES[..])
        .fetch_one(&mut *conn)
        .await?;

    let stats = WriteStats {
        inserted: inserted as usize,
        updated: updated as usize,
        ..Default::default()
    };
    info!("dim_hosts populated: {}", stats);
    Ok(stats)
}

pub async fn truncate_calendar(conn: &mut PgConnection) -> Result<(), LoadError> {
    sqlx::query("TRUNCATE TABLE fact_calendar")
        .execute(&mut *conn)
        .await?;
    info!("fact_calendar cleared");
    Ok(())
}

/// Insert any dates in `[min, max]` missing from `dim_dates`; returns how many were added
pub async fn ensure_dim_dates(
    conn: &mut PgConnection,
    min: NaiveDate,
    max: NaiveDate,
) -> Result<usize, LoadError> {
    debug!("Ensuring dim_dates for range: {} -> {}", min, max);

    let existing: HashSet<NaiveDate> =
        sqlx::query_scalar("SELECT full_date FROM dim_dates WHERE full_date BETWEEN $1 AND $2")
            .bind(min)
            .bind(max)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    let missing = missing_dates(min, max, &existing);
    if missing.is_empty() {
        debug!("No missing dates to insert");
        return Ok(0);
    }

    for chunk in missing.chunks(DATES_CHUNK) {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO dim_dates (full_date, year, quarter, month, month_name, day, day_name, is_weekend) ",
        );
        qb.push_values(chunk.iter().map(|d| derive_date_row(*d)), |mut b, row| {
            b.push_bind(row.full_date)
                .push_bind(row.year)
                .push_bind(row.quarter)
                .push_bind(row.month)
                .push_bind(row.month_name)
                .push_bind(row.day)
                .push_bind(row.day_name)
                .push_bind(row.is_weekend);
        });
        qb.push(" ON CONFLICT (full_date) DO NOTHING");
        qb.build().execute(&mut *conn).await?;
    }

    info!("Inserted {} missing dates into dim_dates", missing.len());
    Ok(missing.len())
}

/// Result of loading one calendar file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CalendarLoad {
    pub inserted: u64,
    pub orphaned: u64,
    pub dates_added: usize,
}

/// Gap-fill `dim_dates` over `span`, then insert weekly buckets whose listing exists.
/// Runs in one transaction.
pub async fn load_calendar_weeks(
    conn: &mut PgConnection,
    weeks: &[WeeklyCalendar],
    span: (NaiveDate, NaiveDate),
) -> Result<CalendarLoad, LoadError> {
    let mut tx = conn.begin().await?;

    let dates_added = ensure_dim_dates(&mut tx, span.0, span.1).await?;

    let mut inserted = 0;
    for chunk in weeks.chunks(CALENDAR_CHUNK) {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO fact_calendar (listing_id, week_start, avg_price, available_days) \
             SELECT v.listing_id, v.week_start, v.avg_price, v.available_days FROM (",
        );
        qb.push_values(chunk, |mut b, week| {
            b.push_bind(week.listing_id)
                .push_bind(week.week_start)
                .push_bind(week.avg_price)
                .push_bind(week.available_days);
        });
        qb.push(
            ") AS v (listing_id, week_start, avg_price, available_days) \
             WHERE EXISTS (SELECT 1 FROM dim_listings d WHERE d.listing_id = v.listing_id)",
        );
        inserted += qb.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;

    let load = CalendarLoad {
        inserted,
        orphaned: weeks.len() as u64 - inserted,
        dates_added,
    };
    if load.orphaned > 0 {
        warn!(
            "{} weekly calendar rows reference listings not in dim_listings",
            load.orphaned
        );
    }
    Ok(load)
}

/// Serialize review rows as pipe-delimited CSV for COPY; `None` becomes an unquoted empty field
pub fn reviews_copy_payload(rows: &[ReviewRow]) -> Result<Vec<u8>, LoadError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'|')
        .has_headers(false)
        .from_writer(Vec::new());

    for row in rows {
        let listing_id = row.listing_id.map(|id| id.to_string());
        let fields = [
            row.review_id.as_deref(),
            listing_id.as_deref(),
            row.date.as_deref(),
            row.reviewer_id.as_deref(),
            row.reviewer_name.as_deref(),
            row.comments.as_deref(),
        ];
        writer
            .write_record(fields.map(copy_field).iter().map(|f| f.as_bytes()))
            .map_err(|e| LoadError::csv("<reviews payload>", e))?;
    }

    writer
        .into_inner()
        .map_err(|e| LoadError::io("<reviews payload>", e.into_error()))
}

/// COPY text cannot carry NUL; `None` is an empty field
fn copy_field(value: Option<&str>) -> Cow<'_, str> {
    match value {
        Some(v) if v.contains('\0') => Cow::Owned(v.replace('\0', "")),
        Some(v) => Cow::Borrowed(v),
        None => Cow::Borrowed(""),
    }
}

/// One attempt: stage via COPY, append to `fact_reviews`, clear staging, commit
async fn copy_and_insert_reviews(conn: &mut PgConnection, payload: &[u8]) -> Result<u64, LoadError> {
    let mut tx = conn.begin().await?;

    sqlx::query("TRUNCATE TABLE fact_reviews_staging")
        .execute(&mut *tx)
        .await?;

    let mut copy = tx.copy_in_raw(COPY_REVIEWS_SQL).await?;
    for chunk in payload.chunks(COPY_CHUNK_BYTES) {
        copy.send(chunk).await?;
    }
    let copied = copy.finish().await?;
    debug!("Copied {} rows into fact_reviews_staging", copied);

    let inserted = sqlx::query(INSERT_REVIEWS_SQL)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query("TRUNCATE TABLE fact_reviews_staging")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(inserted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transport failure with attempts left: reconnect, then retry
    Reconnect,
    /// Other failure with attempts left: retry on the same connection
    Retry,
    GiveUp,
}

/// What to do after `attempt` (1-based) failed with `err`
pub fn retry_decision(attempt: u32, max_attempts: u32, err: &LoadError) -> RetryDecision {
    if attempt >= max_attempts {
        RetryDecision::GiveUp
    } else if err.is_connection_dropped() {
        RetryDecision::Reconnect
    } else {
        RetryDecision::Retry
    }
}

/// Where a reviews payload is loaded; the warehouse in production
pub(crate) trait ReviewTarget {
    async fn load_payload(&mut self, payload: &[u8]) -> Result<u64, LoadError>;
    async fn reconnect(&mut self) -> Result<(), LoadError>;
}

impl ReviewTarget for Warehouse {
    async fn load_payload(&mut self, payload: &[u8]) -> Result<u64, LoadError> {
        copy_and_insert_reviews(self.conn(), payload).await
    }

    async fn reconnect(&mut self) -> Result<(), LoadError> {
        Warehouse::reconnect(self).await
    }
}

/// Load review rows with bounded retry; reconnects when the connection drops
pub async fn load_reviews(
    warehouse: &mut Warehouse,
    rows: &[ReviewRow],
    max_attempts: u32,
    label: &str,
) -> Result<u64, LoadError> {
    let payload = reviews_copy_payload(rows)?;
    load_with_retry(warehouse, &payload, max_attempts, label).await
}

pub(crate) async fn load_with_retry<T: ReviewTarget>(
    target: &mut T,
    payload: &[u8],
    max_attempts: u32,
    label: &str,
) -> Result<u64, LoadError> {
    let mut attempt = 1;

    loop {
        let err = match target.load_payload(payload).await {
            Ok(inserted) => {
                info!("Loaded {} - new reviews added: {}", label, inserted);
                return Ok(inserted);
            }
            Err(e) => e,
        };

        match retry_decision(attempt, max_attempts, &err) {
            RetryDecision::Reconnect => {
                warn!(
                    "Connection error on attempt {} for {}: {}. Retrying...",
                    attempt, label, err
                );
                target.reconnect().await?;
            }
            RetryDecision::Retry => {
                warn!("Attempt {} failed for {}: {}. Retrying...", attempt, label, err);
            }
            RetryDecision::GiveUp => {
                error!("All {} attempts failed for {}", max_attempts, label);
                return Err(err);
            }
        }

        attempt += 1;
    }
}
