//! Configuration loaded from environment variables

use crate::ingestion::error::LoadError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub raw_data_dir: PathBuf,
    pub cleaned_data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub staging_batch_size: usize,
    pub review_cap_threshold: usize,
    pub review_cap_ratio: f64,
    pub review_sample_seed: u64,
    pub max_load_attempts: u32,
}

impl Config {
    /// Read the process environment; call `dotenvy::dotenv()` first to pick up `.env`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Config {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            raw_data_dir: lookup("RAW_DATA_DIR")
                .unwrap_or_else(|| "data/raw".to_string())
                .into(),
            cleaned_data_dir: lookup("CLEANED_DATA_DIR")
                .unwrap_or_else(|| "data/cleaned_data".to_string())
                .into(),
            logs_dir: lookup("LOGS_DIR")
                .unwrap_or_else(|| "logs".to_string())
                .into(),
            staging_batch_size: parse_or(&lookup, "STAGING_BATCH_SIZE", 500)?,
            review_cap_threshold: parse_or(&lookup, "REVIEW_CAP_THRESHOLD", 200_000)?,
            review_cap_ratio: parse_or(&lookup, "REVIEW_CAP_RATIO", 0.8)?,
            review_sample_seed: parse_or(&lookup, "REVIEW_SAMPLE_SEED", 42)?,
            max_load_attempts: parse_or(&lookup, "MAX_LOAD_ATTEMPTS", 3)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LoadError> {
        let problem = if self.staging_batch_size == 0 {
            "STAGING_BATCH_SIZE must be at least 1"
        } else if self.max_load_attempts == 0 {
            "MAX_LOAD_ATTEMPTS must be at least 1"
        } else if !(self.review_cap_ratio > 0.0 && self.review_cap_ratio <= 1.0) {
            "REVIEW_CAP_RATIO must be in (0, 1]"
        } else {
            return Ok(());
        };
        Err(LoadError::Config(problem.to_string()))
    }

    /// Create the data and log directories if they do not exist
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.raw_data_dir, &self.cleaned_data_dir, &self.logs_dir] {
            create_dir(dir)?;
        }
        Ok(())
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/airbnb")])).unwrap();

        assert_eq!(config.raw_data_dir, PathBuf::from("data/raw"));
        assert_eq!(config.cleaned_data_dir, PathBuf::from("data/cleaned_data"));
        assert_eq!(config.logs_dir, PathBuf::from("logs"));
        assert_eq!(config.staging_batch_size, 500);
        assert_eq!(config.review_cap_threshold, 200_000);
        assert_eq!(config.review_cap_ratio, 0.8);
        assert_eq!(config.review_sample_seed, 42);
        assert_eq!(config.max_load_attempts, 3);
    }

    #[test]
    fn test_database_url_required() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/airbnb"),
            ("STAGING_BATCH_SIZE", " 250 "),
            ("REVIEW_CAP_RATIO", "0.5"),
        ]))
        .unwrap();
        assert_eq!(config.staging_batch_size, 250);
        assert_eq!(config.review_cap_ratio, 0.5);

        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/airbnb"),
            ("MAX_LOAD_ATTEMPTS", "three"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_LOAD_ATTEMPTS"));

        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/airbnb"),
            ("REVIEW_CAP_RATIO", "1.5"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LoadError>(),
            Some(LoadError::Config(msg)) if msg.contains("REVIEW_CAP_RATIO")
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/airbnb"),
            ("STAGING_BATCH_SIZE", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::Config(_))));
    }

    #[test]
    fn test_ensure_dirs_creates_tree() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().to_string_lossy().into_owned();
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/airbnb"),
            ("RAW_DATA_DIR", &format!("{}/data/raw", base)),
            ("CLEANED_DATA_DIR", &format!("{}/data/cleaned", base)),
            ("LOGS_DIR", &format!("{}/logs", base)),
        ]))
        .unwrap();

        config.ensure_dirs().unwrap();

        assert!(config.raw_data_dir.is_dir());
        assert!(config.cleaned_data_dir.is_dir());
        assert!(config.logs_dir.is_dir());
    }
}
