//! Enrichment functions - derived values computed before a fact load
//! Pure functions, no database access

use crate::ingestion::types::{CalendarRow, DateRow, WeeklyCalendar};
use chrono::{Datelike, Duration, Month, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Monday of the week containing `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

#[derive(Default)]
struct WeekAccumulator {
    price_sum: Decimal,
    priced_days: u32,
    available_days: i32,
}

/// Aggregate daily calendar rows into (listing, week) buckets.
/// The average covers only days with a price; availability counts available days.
pub fn aggregate_weekly(rows: &[CalendarRow]) -> Vec<WeeklyCalendar> {
    let mut buckets: BTreeMap<(i64, NaiveDate), WeekAccumulator> = BTreeMap::new();

    for row in rows {
        let acc = buckets
            .entry((row.listing_id, week_start(row.date)))
            .or_default();
        if let Some(price) = row.price {
            acc.price_sum += price;
            acc.priced_days += 1;
        }
        if row.available {
            acc.available_days += 1;
        }
    }

    debug!(
        "Aggregated {} calendar rows into {} weekly buckets",
        rows.len(),
        buckets.len()
    );

    buckets
        .into_iter()
        .map(|((listing_id, week_start), acc)| WeeklyCalendar {
            listing_id,
            week_start,
            avg_price: (acc.priced_days > 0)
                .then(|| (acc.price_sum / Decimal::from(acc.priced_days)).round_dp(2)),
            available_days: acc.available_days,
        })
        .collect()
}

/// Date range the date dimension must cover for a calendar file:
/// from the earliest week start to the latest observed day.
pub fn calendar_date_span(rows: &[CalendarRow]) -> Option<(NaiveDate, NaiveDate)> {
    let min = rows.iter().map(|r| week_start(r.date)).min()?;
    let max = rows.iter().map(|r| r.date).max()?;
    Some((min, max))
}

/// Calendar attributes for one `dim_dates` row
pub fn derive_date_row(date: NaiveDate) -> DateRow {
    let month = date.month();
    let weekday = date.weekday();

    DateRow {
        full_date: date,
        year: date.year(),
        quarter: ((month - 1) / 3 + 1) as i32,
        month: month as i32,
        month_name: Month::try_from(month as u8)
            .map(|m| m.name())
            .unwrap_or("Unknown"),
        day: date.day() as i32,
        day_name: weekday_name(weekday),
        is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
    }
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Every date in `[min, max]` not already present, in ascending order
pub fn missing_dates(min: NaiveDate, max: NaiveDate, existing: &HashSet<NaiveDate>) -> Vec<NaiveDate> {
    min.iter_days()
        .take_while(|d| *d <= max)
        .filter(|d| !existing.contains(d))
        .collect()
}

/// Row count after the volume cap, or `None` when the file is under the threshold
pub fn review_cap(rows: usize, threshold: usize, ratio: f64) -> Option<usize> {
    (rows > threshold).then(|| (rows as f64 * ratio).floor() as usize)
}

/// Uniformly sample `keep` rows without replacement; survivors keep file order
pub fn downsample<T>(rows: Vec<T>, keep: usize, seed: u64) -> Vec<T> {
    if keep >= rows.len() {
        return rows;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, rows.len(), keep).into_vec();
    picked.sort_unstable();

    let mut picked = picked.into_iter().peekable();
    rows.into_iter()
        .enumerate()
        .filter_map(|(idx, row)| {
            if picked.peek() == Some(&idx) {
                picked.next();
                Some(row)
            } else {
                None
            }
        })
        .collect()
}
