//! Cleaner - raw comma-delimited exports to pipe-delimited `minimal_*` files
//!
//! Keeps only the relevant columns for the file kind. Listings additionally
//! gain host and property geography plus the local-host flag.

use crate::ingestion::columns::partition_columns;
use crate::ingestion::error::LoadError;
use crate::ingestion::parse::{gz_csv_reader, CLEANED_DELIMITER, RAW_DELIMITER};
use crate::ingestion::types::{FileKind, RawRecord};
use crate::ingestion::utils::{
    correct_host_country, create_gz, infer_geography_from_filename, parse_host_location, UNKNOWN,
};
use csv::StringRecord;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CLEANED_PREFIX: &str = "minimal_";

/// Source columns replaced by derived ones in cleaned listings
const LISTINGS_REPLACED: [&str; 2] = ["host_location", "neighbourhood_cleansed"];

const LISTINGS_DERIVED: [&str; 6] = [
    "host_city",
    "host_country",
    "property_country",
    "property_city",
    "property_neighbourhood",
    "is_local_host",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanOutcome {
    pub output: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub missing: Vec<&'static str>,
}

pub fn cleaned_name(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}{}", CLEANED_PREFIX, name)
}

/// Per-listing values that do not depend on the row
struct ListingGeography {
    property_city: String,
    property_country: String,
}

impl ListingGeography {
    fn derive(&self, raw: &RawRecord<'_>) -> [String; 6] {
        let (host_city, host_country) = parse_host_location(raw.get("host_location"));
        let neighbourhood = raw
            .get("neighbourhood_cleansed")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN)
            .to_string();
        let is_local = correct_host_country(&host_country) == self.property_country;

        [
            host_city,
            host_country,
            self.property_country.clone(),
            self.property_city.clone(),
            neighbourhood,
            if is_local { "True" } else { "False" }.to_string(),
        ]
    }
}

/// Clean one raw file into `output_dir`. Returns `None` for a file with no rows,
/// in which case nothing is written.
pub fn clean_file(
    kind: FileKind,
    input: &Path,
    output_dir: &Path,
) -> Result<Option<CleanOutcome>, LoadError> {
    let mut reader = gz_csv_reader(input, RAW_DELIMITER)?;
    let headers = reader
        .byte_headers()
        .map(|h| StringRecord::from_byte_record_lossy(h.clone()))
        .map_err(|e| LoadError::csv(input, e))?;

    let names: Vec<&str> = headers.iter().collect();
    let (present, missing) = partition_columns(kind, names.iter().copied());
    if !missing.is_empty() {
        warn!("Missing columns in {:?}: {:?}", input, missing);
    }

    let geography = (kind == FileKind::Listings).then(|| {
        let (property_city, property_country) = infer_geography_from_filename(input);
        info!(
            "Property geography from filename: {}, {}",
            property_city, property_country
        );
        ListingGeography {
            property_city,
            property_country,
        }
    });

    let projected: Vec<&str> = match geography {
        Some(_) => present
            .iter()
            .copied()
            .filter(|c| !LISTINGS_REPLACED.contains(c))
            .collect(),
        None => present.clone(),
    };
    let mut header_out: Vec<&str> = projected.clone();
    if geography.is_some() {
        header_out.extend(LISTINGS_DERIVED);
    }

    let output = output_dir.join(cleaned_name(input));
    let mut writer = None;
    let mut rows = 0;
    let mut local_hosts = 0;

    for result in reader.byte_records() {
        let record = match result {
            Ok(bytes) => StringRecord::from_byte_record_lossy(bytes),
            Err(e) => {
                warn!("Unreadable row in {:?}: {}", input, e);
                continue;
            }
        };
        let raw = RawRecord::new(&headers, &record);

        let mut fields: Vec<String> = projected
            .iter()
            .map(|c| raw.get(c).unwrap_or("").to_string())
            .collect();
        if let Some(geo) = &geography {
            let derived = geo.derive(&raw);
            if derived[5] == "True" {
                local_hosts += 1;
            }
            fields.extend(derived);
        }

        // created lazily so an empty input leaves no output behind
        if writer.is_none() {
            let mut w = csv::WriterBuilder::new()
                .delimiter(CLEANED_DELIMITER)
                .from_writer(create_gz(&output)?);
            w.write_record(&header_out)
                .map_err(|e| LoadError::csv(&output, e))?;
            writer = Some(w);
        }
        if let Some(w) = writer.as_mut() {
            w.write_record(&fields)
                .map_err(|e| LoadError::csv(&output, e))?;
        }
        rows += 1;
    }

    let Some(writer) = writer else {
        warn!("Skipping empty file: {:?}", input);
        return Ok(None);
    };

    let encoder = writer
        .into_inner()
        .map_err(|e| LoadError::io(&output, e.into_error()))?;
    encoder
        .finish()
        .and_then(|mut inner| inner.flush())
        .map_err(|e| LoadError::io(&output, e))?;

    if geography.is_some() {
        info!(
            "Host types: {} local, {} foreign",
            local_hosts,
            rows - local_hosts
        );
    }
    info!(
        "Cleaned {:?}: {} -> {} columns, {} rows",
        input,
        headers.len(),
        header_out.len(),
        rows
    );

    Ok(Some(CleanOutcome {
        output,
        rows,
        columns: header_out.len(),
        missing,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::parse::{read_calendar, read_listings};
    use crate::ingestion::utils::open_gz;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Read;
    use tempfile::tempdir;

    fn write_raw(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut gz = GzEncoder::new(file, Compression::default());
        gz.write_all(body.as_bytes()).unwrap();
        gz.finish().unwrap();
        path
    }

    fn read_text(path: &Path) -> String {
        let mut text = String::new();
        open_gz(path).unwrap().read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn test_cleaned_name() {
        assert_eq!(
            cleaned_name(Path::new("raw/Spain_Madrid_calendar_2025.csv.gz")),
            "minimal_Spain_Madrid_calendar_2025.csv.gz"
        );
    }

    #[test]
    fn test_clean_listings_adds_geography() {
        let raw = tempdir().unwrap();
        let out = tempdir().unwrap();
        let input = write_raw(
            raw.path(),
            "Argentina_Buenos Aires_listings_29-January-2025.csv.gz",
            "id,host_id,host_name,host_location,neighbourhood_cleansed,price,amenities\n\
             1,10,Ana,\"Palermo, Argentina\",Palermo,\"$1,200.00\",wifi\n\
             2,11,Bob,\"Austin, TX\",,$80.00,tv\n",
        );

        let outcome = clean_file(FileKind::Listings, &input, out.path())
            .unwrap()
            .unwrap();

        assert_eq!(outcome.rows, 2);
        assert!(outcome.missing.contains(&"latitude"));
        assert!(outcome
            .output
            .ends_with("minimal_Argentina_Buenos Aires_listings_29-January-2025.csv.gz"));

        let text = read_text(&outcome.output);
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id|host_id|host_name|price|host_city|host_country|property_country|property_city|property_neighbourhood|is_local_host"
        );
        assert_eq!(
            lines.next().unwrap(),
            "1|10|Ana|$1,200.00|Palermo|Argentina|Argentina|Buenos Aires|Palermo|True"
        );
        assert_eq!(
            lines.next().unwrap(),
            "2|11|Bob|$80.00|Austin|TX|Argentina|Buenos Aires|Unknown|False"
        );

        // the cleaned file feeds straight into the listings reader
        let (rows, _) = read_listings(&outcome.output).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].property_city.as_deref(), Some("Buenos Aires"));
        assert_eq!(rows[0].is_local_host.as_deref(), Some("True"));
    }

    #[test]
    fn test_clean_calendar_projects_columns() {
        let raw = tempdir().unwrap();
        let out = tempdir().unwrap();
        let input = write_raw(
            raw.path(),
            "Spain_Madrid_calendar_2025.csv.gz",
            "listing_id,date,available,price,minimum_nights\n\
             7,2025-03-03,t,$50.00,2\n",
        );

        let outcome = clean_file(FileKind::Calendar, &input, out.path())
            .unwrap()
            .unwrap();
        assert_eq!(outcome.columns, 4);
        assert!(outcome.missing.is_empty());

        let (rows, dropped) = read_calendar(&outcome.output).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(rows[0].listing_id, 7);
        assert!(rows[0].available);
    }

    #[test]
    fn test_empty_file_is_skipped() {
        let raw = tempdir().unwrap();
        let out = tempdir().unwrap();
        let input = write_raw(
            raw.path(),
            "Spain_Madrid_reviews_2025.csv.gz",
            "listing_id,id,date,reviewer_id,reviewer_name,comments\n",
        );

        assert_eq!(clean_file(FileKind::Reviews, &input, out.path()).unwrap(), None);
        assert!(!out.path().join(cleaned_name(&input)).exists());
    }
}
