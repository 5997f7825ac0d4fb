//! Row sanitizer - per-field normalization applied before staging
//! Pure functions, no side effects

use crate::ingestion::types::{RawRecord, StagedListing};
use crate::ingestion::utils::truncate_chars;

pub const MAX_TEXT: usize = 4000;
pub const MAX_NAME: usize = 255;
pub const MAX_COUNTRY: usize = 100;

/// Spellings of "missing" produced by the upstream dumps and by pandas-style writers
const NULL_LIKE: [&str; 10] = ["", "nan", "NaN", "None", "NULL", "null", "<NA>", "N/A", "n/a", "#N/A"];

pub fn is_null_like(value: &str) -> bool {
    NULL_LIKE.contains(&value)
}

/// Trim, map null-likes to `None`, truncate to `max_len` characters
pub fn sanitize_str(value: Option<&str>, max_len: usize) -> Option<String> {
    let trimmed = value?.trim();
    if is_null_like(trimmed) {
        return None;
    }
    Some(truncate_chars(trimmed, max_len).to_string())
}

/// Strip thousands separators and a float-stringification ".0" suffix
pub fn sanitize_numstr(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if is_null_like(trimmed) {
        return None;
    }
    let cleaned = trimmed.replace(',', "");
    let cleaned = cleaned.strip_suffix(".0").unwrap_or(&cleaned);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Drop the currency symbol and separators; decimal parsing happens server-side
pub fn sanitize_price(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if is_null_like(trimmed) {
        return None;
    }
    let cleaned = trimmed.replace(['$', ','], "");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolNorm {
    True,
    False,
    /// Not a recognized spelling; kept verbatim
    Unrecognized(String),
}

impl BoolNorm {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_lowercase().as_str() {
            "true" | "1" | "t" | "y" | "yes" => BoolNorm::True,
            "false" | "0" | "f" | "n" | "no" => BoolNorm::False,
            _ => BoolNorm::Unrecognized(trimmed.to_string()),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            BoolNorm::True => "True".to_string(),
            BoolNorm::False => "False".to_string(),
            BoolNorm::Unrecognized(raw) => raw,
        }
    }
}

/// Normalize a boolean-like field to "True"/"False", passing anything else through
pub fn normalize_bool(value: Option<&str>) -> Option<BoolNorm> {
    let trimmed = value?.trim();
    if is_null_like(trimmed) {
        return None;
    }
    Some(BoolNorm::parse(trimmed))
}

/// Per-file sanitizer counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeReport {
    pub rows: usize,
    pub unrecognized_booleans: usize,
}

/// Sanitize one cleaned listings row into the staging column order
pub fn sanitize_listing(raw: &RawRecord<'_>, report: &mut SanitizeReport) -> StagedListing {
    report.rows += 1;

    let is_local_host = normalize_bool(raw.get("is_local_host")).map(|b| {
        if matches!(b, BoolNorm::Unrecognized(_)) {
            report.unrecognized_booleans += 1;
        }
        b.into_text()
    });

    StagedListing {
        listing_id: sanitize_str(raw.get("id"), MAX_TEXT),
        host_id: sanitize_numstr(raw.get("host_id")),
        host_name: sanitize_str(raw.get("host_name"), MAX_NAME),
        host_city: sanitize_str(raw.get("host_city"), MAX_NAME),
        host_country: sanitize_str(raw.get("host_country"), MAX_COUNTRY),
        property_country: sanitize_str(raw.get("property_country"), MAX_COUNTRY),
        property_city: sanitize_str(raw.get("property_city"), MAX_NAME),
        property_neighbourhood: sanitize_str(raw.get("property_neighbourhood"), MAX_NAME),
        latitude: sanitize_numstr(raw.get("latitude")),
        longitude: sanitize_numstr(raw.get("longitude")),
        price: sanitize_price(raw.get("price")),
        number_of_reviews: sanitize_numstr(raw.get("number_of_reviews")),
        review_scores_rating: sanitize_numstr(raw.get("review_scores_rating")),
        calculated_host_listings_count: sanitize_numstr(raw.get("calculated_host_listings_count")),
        is_local_host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv::StringRecord;

    #[test]
    fn test_sanitize_str() {
        assert_eq!(sanitize_str(Some("  Ana  "), 255), Some("Ana".to_string()));
        assert_eq!(sanitize_str(Some("   "), 255), None);
        assert_eq!(sanitize_str(Some("nan"), 255), None);
        assert_eq!(sanitize_str(None, 255), None);
        assert_eq!(sanitize_str(Some("abcdef"), 4), Some("abcd".to_string()));
    }

    #[test]
    fn test_sanitize_numstr_strips_separators_and_float_suffix() {
        assert_eq!(sanitize_numstr(Some("1,234,567.0")), Some("1234567".to_string()));
        assert_eq!(sanitize_numstr(Some(" 42 ")), Some("42".to_string()));
        assert_eq!(sanitize_numstr(Some("4.85")), Some("4.85".to_string()));
        assert_eq!(sanitize_numstr(Some(",")), None);
        assert_eq!(sanitize_numstr(Some(".0")), None);
        assert_eq!(sanitize_numstr(Some("")), None);
    }

    #[test]
    fn test_sanitized_numerics_never_keep_separators_or_suffix() {
        let inputs = ["1,000.0", "12,345", "7.0", "0.5", "3,2,1.0", "-41.0", "100.05"];
        for input in inputs {
            if let Some(out) = sanitize_numstr(Some(input)) {
                assert!(!out.contains(','), "{} -> {}", input, out);
                assert!(!out.ends_with(".0"), "{} -> {}", input, out);
            }
        }
    }

    #[test]
    fn test_sanitize_price() {
        assert_eq!(sanitize_price(Some("$1,250.00")), Some("1250.00".to_string()));
        assert_eq!(sanitize_price(Some("$")), None);
        assert_eq!(sanitize_price(Some("NaN")), None);
    }

    #[test]
    fn test_normalize_bool() {
        assert_eq!(normalize_bool(Some("TRUE")), Some(BoolNorm::True));
        assert_eq!(normalize_bool(Some("t")), Some(BoolNorm::True));
        assert_eq!(normalize_bool(Some("No")), Some(BoolNorm::False));
        assert_eq!(normalize_bool(Some("0")), Some(BoolNorm::False));
        assert_eq!(
            normalize_bool(Some("maybe")),
            Some(BoolNorm::Unrecognized("maybe".to_string()))
        );
        assert_eq!(normalize_bool(Some("")), None);
    }

    #[test]
    fn test_sanitize_listing_aligns_columns() {
        let headers = StringRecord::from(vec![
            "id",
            "host_id",
            "host_name",
            "price",
            "is_local_host",
            "property_country",
        ]);
        let record = StringRecord::from(vec![
            "12345678901234567890123",
            "9,876.0",
            " Maria ",
            "$2,100.00",
            "sometimes",
            "Argentina",
        ]);
        let mut report = SanitizeReport::default();

        let staged = sanitize_listing(&RawRecord::new(&headers, &record), &mut report);

        assert_eq!(staged.listing_id.as_deref(), Some("12345678901234567890123"));
        assert_eq!(staged.host_id.as_deref(), Some("9876"));
        assert_eq!(staged.host_name.as_deref(), Some("Maria"));
        assert_eq!(staged.price.as_deref(), Some("2100.00"));
        assert_eq!(staged.is_local_host.as_deref(), Some("sometimes"));
        assert_eq!(staged.property_country.as_deref(), Some("Argentina"));
        assert_eq!(staged.latitude, None);
        assert_eq!(report, SanitizeReport { rows: 1, unrecognized_booleans: 1 });
    }
}
