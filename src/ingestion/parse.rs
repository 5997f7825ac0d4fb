//! Parse functions - decode cleaned `.csv.gz` files into row structs

use crate::ingestion::error::LoadError;
use crate::ingestion::sanitize::{
    is_null_like, sanitize_listing, sanitize_numstr, sanitize_str, SanitizeReport, MAX_NAME,
    MAX_TEXT,
};
use crate::ingestion::types::{CalendarRow, RawRecord, ReviewRow, StagedListing};
use crate::ingestion::utils::open_gz;
use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use flate2::read::GzDecoder;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

pub type GzCsvReader = csv::Reader<BufReader<GzDecoder<File>>>;

pub const CLEANED_DELIMITER: u8 = b'|';
pub const RAW_DELIMITER: u8 = b',';

/// `fact_calendar.avg_price` is NUMERIC(10, 2)
const MAX_PRICE: i64 = 100_000_000;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Open a gzip CSV with headers; ragged rows are tolerated
pub fn gz_csv_reader(path: &Path, delimiter: u8) -> Result<GzCsvReader, LoadError> {
    let reader = open_gz(path)?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader))
}

/// Walk every record, decoding invalid UTF-8 lossily instead of failing the row.
/// NUL characters are dropped; PostgreSQL text cannot hold them.
pub fn for_each_record<F>(path: &Path, delimiter: u8, mut f: F) -> Result<usize, LoadError>
where
    F: FnMut(RawRecord<'_>),
{
    let mut reader = gz_csv_reader(path, delimiter)?;
    let headers = reader
        .byte_headers()
        .map(|h| StringRecord::from_byte_record_lossy(h.clone()))
        .map_err(|e| LoadError::csv(path, e))?;

    let mut rows = 0;
    let mut parse_errors = 0;
    for (idx, result) in reader.byte_records().enumerate() {
        match result {
            Ok(bytes) => {
                let record = strip_nul(StringRecord::from_byte_record_lossy(bytes));
                f(RawRecord::new(&headers, &record));
                rows += 1;
            }
            Err(e) => {
                parse_errors += 1;
                if parse_errors <= 10 {
                    // Only log first 10 errors
                    warn!("Failed to read row {} of {:?}: {}", idx, path, e);
                }
            }
        }
    }

    if parse_errors > 0 {
        warn!("{} unreadable rows in {:?}", parse_errors, path);
    }

    Ok(rows)
}

fn strip_nul(record: StringRecord) -> StringRecord {
    if !record.iter().any(|field| field.contains('\0')) {
        return record;
    }
    record.iter().map(|field| field.replace('\0', "")).collect()
}

/// Read a cleaned listings file into staging-ordered rows
pub fn read_listings(path: &Path) -> Result<(Vec<StagedListing>, SanitizeReport), LoadError> {
    let mut report = SanitizeReport::default();
    let mut rows = Vec::new();

    for_each_record(path, CLEANED_DELIMITER, |raw| {
        rows.push(sanitize_listing(&raw, &mut report));
    })?;

    if report.unrecognized_booleans > 0 {
        warn!(
            "{} rows in {:?} carry an unrecognized is_local_host value; they will load as NULL",
            report.unrecognized_booleans, path
        );
    }

    info!("Parsed {} listings rows from {:?}", rows.len(), path);
    Ok((rows, report))
}

/// Read a cleaned calendar file; rows without a usable listing id or date are dropped
pub fn read_calendar(path: &Path) -> Result<(Vec<CalendarRow>, usize), LoadError> {
    let mut rows = Vec::new();
    let mut dropped = 0;

    for_each_record(path, CLEANED_DELIMITER, |raw| match parse_calendar_row(&raw) {
        Some(row) => rows.push(row),
        None => dropped += 1,
    })?;

    info!(
        "Parsed {} calendar rows from {:?} ({} dropped)",
        rows.len(),
        path,
        dropped
    );
    Ok((rows, dropped))
}

fn parse_calendar_row(raw: &RawRecord<'_>) -> Option<CalendarRow> {
    let listing_id = parse_numeric_id(raw.get("listing_id"))?;
    let date = parse_date(raw.get("date")?)?;

    Some(CalendarRow {
        listing_id,
        date,
        available: is_available(raw.get("available")),
        price: parse_price(raw.get("price")),
    })
}

/// Read a cleaned reviews file; every row is kept, bad fields become `None`
pub fn read_reviews(path: &Path) -> Result<Vec<ReviewRow>, LoadError> {
    let mut rows = Vec::new();

    for_each_record(path, CLEANED_DELIMITER, |raw| {
        rows.push(parse_review_row(&raw));
    })?;

    info!("Parsed {} review rows from {:?}", rows.len(), path);
    Ok(rows)
}

fn parse_review_row(raw: &RawRecord<'_>) -> ReviewRow {
    ReviewRow {
        review_id: sanitize_numstr(raw.get("id")),
        listing_id: parse_numeric_id(raw.get("listing_id")),
        date: raw.get("date").and_then(normalize_date),
        reviewer_id: sanitize_numstr(raw.get("reviewer_id")),
        reviewer_name: sanitize_str(raw.get("reviewer_name"), MAX_NAME),
        comments: sanitize_str(raw.get("comments"), MAX_TEXT),
    }
}

/// Numeric coercion for id columns; anything that is not an i64 is `None`
pub fn parse_numeric_id(value: Option<&str>) -> Option<i64> {
    sanitize_numstr(value)?.parse::<i64>().ok()
}

/// Parse the handful of date spellings seen in the dumps
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if is_null_like(trimmed) {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Normalize a date to `%Y-%m-%d`
pub fn normalize_date(value: &str) -> Option<String> {
    parse_date(value).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Parse "$1,234.00" style prices; values the warehouse column cannot hold are `None`
pub fn parse_price(value: Option<&str>) -> Option<Decimal> {
    let cleaned = value?.trim().replace(['$', ','], "");
    if is_null_like(&cleaned) {
        return None;
    }
    Decimal::from_str(&cleaned)
        .ok()
        .filter(|price| price.abs() < Decimal::from(MAX_PRICE))
}

/// Calendar availability: recognized truthy values, everything else unavailable
pub fn is_available(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("t" | "true" | "1" | "y" | "yes")
    )
}
