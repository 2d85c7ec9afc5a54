//! Cron entry parsing and tick arithmetic.
//!
//! Entries use the classic five-field form (`minute hour day-of-month month
//! day-of-week`) or one of the `@` macros (`@hourly`, `@daily`, `@weekly`,
//! `@monthly`, `@yearly`). All boundaries are evaluated in UTC and fall on
//! whole minutes.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid cron entry {entry:?}: {message}")]
    Invalid { entry: String, message: String },

    #[error("cron entry {0:?} has no boundary in range")]
    NoBoundary(String),

    #[error("schedule entry {entry:?} is more frequent than allowed minimum frequency of {minimum}")]
    TooFrequent { entry: String, minimum: String },
}

/// A parsed cron entry.
#[derive(Clone)]
pub struct CronEntry {
    entry: String,
    schedule: ::cron::Schedule,
}

impl CronEntry {
    pub fn parse(entry: &str) -> Result<Self, CronError> {
        let entry = entry.trim();
        let expression = to_cron_expression(entry)?;
        let schedule = ::cron::Schedule::from_str(&expression).map_err(|e| CronError::Invalid {
            entry: entry.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            entry: entry.to_string(),
            schedule,
        })
    }

    /// The entry as written by the user.
    pub fn as_str(&self) -> &str {
        &self.entry
    }

    /// The most recent boundary at or before `at`.
    pub fn prev_tick(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        // Boundaries sit on second zero, so probing one second past the
        // truncated instant makes the strictly-before search inclusive of `at`.
        let probe = at.trunc_subsecs(0) + Duration::seconds(1);
        self.schedule
            .after(&probe)
            .next_back()
            .ok_or_else(|| CronError::NoBoundary(self.entry.clone()))
    }

    /// The first boundary strictly after `at`.
    pub fn next_tick_after(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        self.schedule
            .after(&at)
            .next()
            .ok_or_else(|| CronError::NoBoundary(self.entry.clone()))
    }

    /// Reject entries that fire more often than `minimum`.
    ///
    /// Looks at the gaps between the next few dozen boundaries after `from`
    /// so lists like `0,5 * * * *` are caught even when the first gap is long.
    pub fn validate_frequency(
        &self,
        from: DateTime<Utc>,
        minimum: std::time::Duration,
    ) -> Result<(), CronError> {
        let minimum_gap = Duration::from_std(minimum).map_err(|e| CronError::Invalid {
            entry: self.entry.clone(),
            message: e.to_string(),
        })?;

        let mut upcoming = self.schedule.after(&from).take(FREQUENCY_WINDOW);
        let Some(mut previous) = upcoming.next() else {
            return Err(CronError::NoBoundary(self.entry.clone()));
        };
        for next in upcoming {
            if next - previous < minimum_gap {
                return Err(CronError::TooFrequent {
                    entry: self.entry.clone(),
                    minimum: format!("{:?}", minimum),
                });
            }
            previous = next;
        }
        Ok(())
    }
}

impl fmt::Debug for CronEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronEntry").field(&self.entry).finish()
    }
}

impl FromStr for CronEntry {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

const FREQUENCY_WINDOW: usize = 48;

/// Translate a five-field entry into the seconds-first dialect of the
/// `cron` crate. Day-of-week numbers move from `0-7` (Sunday = 0 or 7) to
/// `1-7` (Sunday = 1).
fn to_cron_expression(entry: &str) -> Result<String, CronError> {
    if entry.starts_with('@') {
        return Ok(entry.to_string());
    }

    let fields: Vec<&str> = entry.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(
            entry,
            format!("expected 5 fields, found {}", fields.len()),
        ));
    }

    let day_of_week = translate_day_of_week(entry, fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    ))
}

fn translate_day_of_week(entry: &str, field: &str) -> Result<String, CronError> {
    let mut verbatim = Vec::new();
    let mut days = BTreeSet::new();

    for token in field.split(',') {
        if token.chars().any(|c| c.is_ascii_alphabetic()) {
            verbatim.push(token.to_string());
            continue;
        }

        let (range, step) = match token.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(entry, format!("bad day-of-week step {:?}", step)))?;
                if step == 0 {
                    return Err(invalid(entry, "day-of-week step must be positive"));
                }
                (range, Some(step))
            }
            None => (token, None),
        };

        if (range == "*" || range == "?") && step.is_none() {
            verbatim.push(range.to_string());
            continue;
        }

        let (lo, hi) = match range {
            "*" | "?" => (0, 6),
            _ => match range.split_once('-') {
                Some((lo, hi)) => (parse_day(entry, lo)?, parse_day(entry, hi)?),
                None => {
                    let day = parse_day(entry, range)?;
                    if step.is_some() { (day, 6) } else { (day, day) }
                }
            },
        };
        if lo > hi {
            return Err(invalid(entry, format!("bad day-of-week range {:?}", range)));
        }

        let step = step.unwrap_or(1) as usize;
        days.extend((lo..=hi).step_by(step).map(|d| d % 7 + 1));
    }

    verbatim.extend(days.into_iter().map(|d| d.to_string()));
    Ok(verbatim.join(","))
}

fn parse_day(entry: &str, value: &str) -> Result<u32, CronError> {
    match value.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(invalid(entry, format!("bad day-of-week {:?}", value))),
    }
}

fn invalid(entry: &str, message: impl Into<String>) -> CronError {
    CronError::Invalid {
        entry: entry.to_string(),
        message: message.into(),
    }
}
