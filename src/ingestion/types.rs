//! Core data types for the warehouse pipeline
//! Pure data structures with little behavior

use chrono::NaiveDate;
use csv::StringRecord;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;

/// Source file families, matched by substring in the filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Listings,
    Calendar,
    Reviews,
}

impl FileKind {
    /// Load order: calendar and review facts reference listing keys.
    pub const ALL: [FileKind; 3] = [FileKind::Listings, FileKind::Calendar, FileKind::Reviews];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Listings => "listings",
            FileKind::Calendar => "calendar",
            FileKind::Reviews => "reviews",
        }
    }

    /// Whether a file name belongs to this family (`*listings*.csv.gz` etc.)
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.ends_with(".csv.gz") && file_name.contains(self.as_str())
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "listings" => Ok(FileKind::Listings),
            "calendar" => Ok(FileKind::Calendar),
            "reviews" => Ok(FileKind::Reviews),
            other => Err(format!("unknown file kind: {}", other)),
        }
    }
}

/// One source row, every field still unvalidated text.
/// Borrows the header and the record so no per-row map is built.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'r> {
    headers: &'r StringRecord,
    record: &'r StringRecord,
}

impl<'r> RawRecord<'r> {
    pub fn new(headers: &'r StringRecord, record: &'r StringRecord) -> Self {
        RawRecord { headers, record }
    }

    /// Value for a column, `None` when the column is absent from the file
    pub fn get(&self, column: &str) -> Option<&'r str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|idx| self.record.get(idx))
    }
}

/// A sanitized listings row, aligned to the staging column order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedListing {
    pub listing_id: Option<String>,
    pub host_id: Option<String>,
    pub host_name: Option<String>,
    pub host_city: Option<String>,
    pub host_country: Option<String>,
    pub property_country: Option<String>,
    pub property_city: Option<String>,
    pub property_neighbourhood: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub price: Option<String>,
    pub number_of_reviews: Option<String>,
    pub review_scores_rating: Option<String>,
    pub calculated_host_listings_count: Option<String>,
    pub is_local_host: Option<String>,
}

impl StagedListing {
    pub const COLUMNS: [&'static str; 15] = [
        "listing_id",
        "host_id",
        "host_name",
        "host_city",
        "host_country",
        "property_country",
        "property_city",
        "property_neighbourhood",
        "latitude",
        "longitude",
        "price",
        "number_of_reviews",
        "review_scores_rating",
        "calculated_host_listings_count",
        "is_local_host",
    ];

    /// Field values in `COLUMNS` order
    pub fn values(&self) -> [Option<&str>; 15] {
        [
            self.listing_id.as_deref(),
            self.host_id.as_deref(),
            self.host_name.as_deref(),
            self.host_city.as_deref(),
            self.host_country.as_deref(),
            self.property_country.as_deref(),
            self.property_city.as_deref(),
            self.property_neighbourhood.as_deref(),
            self.latitude.as_deref(),
            self.longitude.as_deref(),
            self.price.as_deref(),
            self.number_of_reviews.as_deref(),
            self.review_scores_rating.as_deref(),
            self.calculated_host_listings_count.as_deref(),
            self.is_local_host.as_deref(),
        ]
    }

    /// Comma-joined form used by the skipped-rows log
    pub fn to_log_line(&self) -> String {
        self.values()
            .iter()
            .map(|v| v.unwrap_or(""))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Calendar row after parsing; unusable ids/dates never get this far
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarRow {
    pub listing_id: i64,
    pub date: NaiveDate,
    pub available: bool,
    pub price: Option<Decimal>,
}

/// One weekly bucket of `fact_calendar`
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyCalendar {
    pub listing_id: i64,
    pub week_start: NaiveDate,
    pub avg_price: Option<Decimal>,
    pub available_days: i32,
}

/// Review row ready for COPY: ids still text so the server does the cast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRow {
    pub review_id: Option<String>,
    pub listing_id: Option<i64>,
    pub date: Option<String>,
    pub reviewer_id: Option<String>,
    pub reviewer_name: Option<String>,
    pub comments: Option<String>,
}

/// Row of the `dim_dates` dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRow {
    pub full_date: NaiveDate,
    pub year: i32,
    pub quarter: i32,
    pub month: i32,
    pub month_name: &'static str,
    pub day: i32,
    pub day_name: &'static str,
    pub is_weekend: bool,
}

/// Outcome of the staging step for one file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub staged: usize,
    pub skipped: usize,
}

/// Outcome of the listings promote for one file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub inserted: i64,
    pub updated: i64,
    pub total_rows: i64,
    pub hosts_present: i64,
}

/// Write operation statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct WriteStats {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl WriteStats {
    pub fn absorb(&mut self, other: &WriteStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

impl std::fmt::Display for WriteStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted: {}, updated: {}, skipped: {}, errors: {}",
            self.inserted, self.updated, self.skipped, self.errors
        )
    }
}

/// Per-file result recorded by the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub stats: Option<WriteStats>,
    pub error: Option<String>,
}

/// Per-phase roll-up
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub kind: FileKind,
    pub files: Vec<FileOutcome>,
    pub totals: WriteStats,
}

impl PhaseReport {
    pub fn new(kind: FileKind) -> Self {
        PhaseReport {
            kind,
            files: Vec::new(),
            totals: WriteStats::default(),
        }
    }

    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }
}

/// Whole-run report, written next to the skipped-rows log
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub phases: Vec<PhaseReport>,
    pub error_count: usize,
    pub table_counts: Vec<(String, i64)>,
}
