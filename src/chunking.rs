use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::ResolverError;

pub const DEFAULT_CHUNK_BYTES: f64 = 200e6;
pub const DEFAULT_SUBSET_BYTES: u64 = 500_000_000;

static DATE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_(\d{4,14})-(\d{4,14})\.nc$").expect("date range pattern is valid")
});

/// Candidates must divide every file's step count (the last file is exempt unless
/// `include_last`); every element must then agree on the largest one under `max_bytes`.
pub fn choose_chunksize(
    candidates: &[u64],
    max_bytes: f64,
    element_sizes: &[f64],
    timesteps: &[u64],
    include_last: bool,
) -> Result<u64, ResolverError> {
    let checked = if !include_last && timesteps.len() > 1 {
        &timesteps[..timesteps.len() - 1]
    } else {
        timesteps
    };
    let mut divisors = candidates
        .iter()
        .copied()
        .filter(|candidate| *candidate > 0)
        .filter(|candidate| checked.iter().all(|steps| steps % candidate == 0))
        .collect::<Vec<_>>();
    divisors.sort_unstable();

    if element_sizes.is_empty() {
        return Err(ResolverError::NoAdmissibleChunkSize {
            max_bytes,
            element_size: 0.0,
        });
    }

    let mut picks = Vec::with_capacity(element_sizes.len());
    for element_size in element_sizes {
        let pick = divisors
            .iter()
            .rev()
            .copied()
            .find(|candidate| *candidate as f64 * element_size <= max_bytes)
            .ok_or(ResolverError::NoAdmissibleChunkSize {
                max_bytes,
                element_size: *element_size,
            })?;
        picks.push(pick);
    }

    let chosen = picks[0];
    if picks.iter().any(|pick| *pick != chosen) {
        tracing::debug!(?picks, "chunk candidates disagree");
        return Err(ResolverError::InconsistentChunkSize { sizes: picks });
    }
    Ok(chosen)
}

pub fn subset_factor(sizes: &[u64], ceiling: u64) -> Option<u64> {
    let largest = sizes.iter().copied().max()?;
    if ceiling == 0 || largest <= ceiling {
        return None;
    }
    Some(largest.div_ceil(ceiling))
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

pub fn parse_date_range(filename: &str) -> Option<DateRange> {
    let captures = DATE_RANGE.captures(filename)?;
    Some(DateRange {
        start: captures[1].to_string(),
        end: captures[2].to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Monthly,
    Daily,
}

impl Frequency {
    pub fn from_table_id(table_id: &str) -> Option<Self> {
        if table_id.ends_with("mon") {
            Some(Frequency::Monthly)
        } else if table_id.ends_with("day") {
            Some(Frequency::Daily)
        } else {
            None
        }
    }
}

/// Inclusive number of time steps covered by `range`, on the proleptic Gregorian calendar.
pub fn count_timesteps(range: &DateRange, frequency: Frequency) -> Option<u64> {
    match frequency {
        Frequency::Monthly => {
            let (start_year, start_month) = year_month(&range.start)?;
            let (end_year, end_month) = year_month(&range.end)?;
            let months = (end_year * 12 + end_month) - (start_year * 12 + start_month) + 1;
            u64::try_from(months).ok().filter(|months| *months > 0)
        }
        Frequency::Daily => {
            let start = day(&range.start)?;
            let end = day(&range.end)?;
            let days = (end - start).num_days() + 1;
            u64::try_from(days).ok().filter(|days| *days > 0)
        }
    }
}

fn year_month(stamp: &str) -> Option<(i64, i64)> {
    let year = stamp.get(0..4)?.parse::<i64>().ok()?;
    let month = stamp.get(4..6)?.parse::<i64>().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

fn day(stamp: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(stamp.get(0..8)?, "%Y%m%d").ok()
}

pub fn default_divisors() -> Vec<u64> {
    let mut divisors = vec![1, 3, 6, 12, 36];
    divisors.extend((60..2400).step_by(60));
    divisors.extend([684, 1026, 2052]);
    divisors.sort_unstable();
    divisors.dedup();
    divisors
}
