//! Utility functions for common operations

use crate::ingestion::error::LoadError;
use crate::ingestion::types::FileKind;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub const UNKNOWN: &str = "Unknown";

pub const US_STATE_CODES: [&str; 54] = [
    "AL", "AK", "AS", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "GU", "HI", "ID", "IL",
    "IN", "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "PR", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY",
];

/// Extract (city, country) from a `Country_City_listings_<date>.csv.gz` name.
/// Needs at least four underscore-separated parts, otherwise both are "Unknown".
pub fn infer_geography_from_filename(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.trim_end_matches(".csv.gz");
    let stem = stem.strip_prefix("minimal_").unwrap_or(stem);

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() >= 4 {
        return (parts[1].to_string(), parts[0].to_string());
    }

    (UNKNOWN.to_string(), UNKNOWN.to_string())
}

/// Split a free-text host location into (city, country).
/// The last comma-separated part is the country; a lone part is a country.
pub fn parse_host_location(location: Option<&str>) -> (String, String) {
    let parts: Vec<&str> = location
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    match parts.as_slice() {
        [] => (UNKNOWN.to_string(), UNKNOWN.to_string()),
        [country] => (UNKNOWN.to_string(), country.to_string()),
        [city @ .., country] => (city.join(", "), country.to_string()),
    }
}

/// Host locations often end in a US state code ("Austin, TX");
/// map those onto the country so local/foreign comparisons work.
pub fn correct_host_country(country: &str) -> String {
    let trimmed = country.trim();
    if US_STATE_CODES.contains(&trimmed) {
        "United States".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Truncate to at most `max` characters, never splitting a code point
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Open a `.csv.gz` as a buffered, decompressing reader
pub fn open_gz(path: &Path) -> Result<BufReader<GzDecoder<File>>, LoadError> {
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    Ok(BufReader::new(GzDecoder::new(file)))
}

/// Create a `.csv.gz` for writing; call `finish()` on the encoder when done
pub fn create_gz(path: &Path) -> Result<GzEncoder<BufWriter<File>>, LoadError> {
    let file = File::create(path).map_err(|e| LoadError::io(path, e))?;
    Ok(GzEncoder::new(BufWriter::new(file), Compression::default()))
}

/// Files of one kind in `dir`, sorted by name; an unreadable directory is an error
pub fn find_files(dir: &Path, kind: FileKind) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| LoadError::io(dir, e))? {
        let path = entry.map_err(|e| LoadError::io(dir, e))?.path();
        let matched = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| kind.matches(n));
        if matched && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_geography_from_filename() {
        assert_eq!(
            infer_geography_from_filename(&PathBuf::from(
                "data/Argentina_Buenos Aires_listings_29-January-2025.csv.gz"
            )),
            ("Buenos Aires".to_string(), "Argentina".to_string())
        );

        assert_eq!(
            infer_geography_from_filename(&PathBuf::from(
                "minimal_Spain_Madrid_listings_12-March-2025.csv.gz"
            )),
            ("Madrid".to_string(), "Spain".to_string())
        );

        assert_eq!(
            infer_geography_from_filename(&PathBuf::from("listings.csv.gz")),
            ("Unknown".to_string(), "Unknown".to_string())
        );
    }

    #[test]
    fn test_parse_host_location() {
        assert_eq!(
            parse_host_location(Some("Buenos Aires, Argentina")),
            ("Buenos Aires".to_string(), "Argentina".to_string())
        );

        assert_eq!(
            parse_host_location(Some("Argentina")),
            ("Unknown".to_string(), "Argentina".to_string())
        );

        assert_eq!(
            parse_host_location(Some("Brooklyn, New York, United States")),
            ("Brooklyn, New York".to_string(), "United States".to_string())
        );

        assert_eq!(
            parse_host_location(Some(" , ")),
            ("Unknown".to_string(), "Unknown".to_string())
        );
        assert_eq!(
            parse_host_location(None),
            ("Unknown".to_string(), "Unknown".to_string())
        );
    }

    #[test]
    fn test_correct_host_country() {
        assert_eq!(correct_host_country("TX"), "United States");
        assert_eq!(correct_host_country(" HI "), "United States");
        assert_eq!(correct_host_country("Argentina"), "Argentina");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hi", 10), "hi");
        // multi-byte characters count once
        assert_eq!(truncate_chars("São Paulo", 3), "São");
    }

    #[test]
    fn test_find_files_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "minimal_Spain_Madrid_reviews_2025.csv.gz",
            "minimal_Argentina_Buenos Aires_reviews_2025.csv.gz",
            "minimal_Spain_Madrid_listings_2025.csv.gz",
            "notes_reviews.txt",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let found = find_files(dir.path(), FileKind::Reviews).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            names,
            vec![
                "minimal_Argentina_Buenos Aires_reviews_2025.csv.gz",
                "minimal_Spain_Madrid_reviews_2025.csv.gz",
            ]
        );
        assert!(find_files(&dir.path().join("missing"), FileKind::Reviews).is_err());
    }
}
