//! Column relevance: the minimal set of source columns kept per file kind

use crate::ingestion::types::FileKind;

const LISTINGS: &[&str] = &[
    // identifiers
    "id",
    "host_id",
    "host_name",
    "host_location",
    // location (city/country come from the filename)
    "neighbourhood_cleansed",
    "latitude",
    "longitude",
    // metrics
    "price",
    "number_of_reviews",
    "review_scores_rating",
    "calculated_host_listings_count",
];

const REVIEWS: &[&str] = &["listing_id", "id", "date", "reviewer_id", "reviewer_name", "comments"];

const CALENDAR: &[&str] = &["listing_id", "date", "available", "price"];

pub fn relevant_columns(kind: FileKind) -> &'static [&'static str] {
    match kind {
        FileKind::Listings => LISTINGS,
        FileKind::Calendar => CALENDAR,
        FileKind::Reviews => REVIEWS,
    }
}

/// Split the relevant columns into (present, missing) for a file's header
pub fn partition_columns<'h>(
    kind: FileKind,
    headers: impl IntoIterator<Item = &'h str> + Clone,
) -> (Vec<&'static str>, Vec<&'static str>) {
    relevant_columns(kind)
        .iter()
        .copied()
        .partition(|col| headers.clone().into_iter().any(|h| h == *col))
}
