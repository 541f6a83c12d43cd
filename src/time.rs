//! # Calendar Time
//!
//! Decodes CF time coordinates (`"days since 1850-01-01"`) into calendar
//! dates. Model output uses several calendars; `standard`, `gregorian` and
//! `proleptic_gregorian` go through chrono, while `noleap`/`365_day` and
//! `360_day` are counted directly since chrono cannot represent them.

use crate::error::{ProcessingError, ProcessingResult};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

const SECONDS_PER_DAY: f64 = 86_400.0;
const NOLEAP_MONTH_DAYS: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Units of a time offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert the time unit to a multiplier for seconds
    pub fn to_seconds_multiplier(&self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Days => SECONDS_PER_DAY,
        }
    }

    fn parse(unit: &str) -> Option<Self> {
        match unit.trim().to_lowercase().as_str() {
            "days" | "day" | "d" => Some(TimeUnit::Days),
            "hours" | "hour" | "h" | "hr" => Some(TimeUnit::Hours),
            "minutes" | "minute" | "min" => Some(TimeUnit::Minutes),
            "seconds" | "second" | "s" | "sec" => Some(TimeUnit::Seconds),
            _ => None,
        }
    }
}

/// CF calendars the decoder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    Standard,
    NoLeap,
    Day360,
}

impl Calendar {
    /// Parses a CF `calendar` attribute. An empty string means `standard`.
    pub fn parse(name: &str) -> ProcessingResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "" | "standard" | "gregorian" | "proleptic_gregorian" => Ok(Calendar::Standard),
            "noleap" | "no_leap" | "365_day" => Ok(Calendar::NoLeap),
            "360_day" => Ok(Calendar::Day360),
            other => Err(ProcessingError::Calendar(other.to_string())),
        }
    }
}

/// A date in any supported calendar. `360_day` dates such as Feb 30 are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Parsed `"<unit> since <origin>"` string
#[derive(Debug, Clone, PartialEq)]
pub struct TimeUnits {
    pub unit: TimeUnit,
    pub origin: NaiveDateTime,
}

impl TimeUnits {
    pub fn parse(units: &str) -> ProcessingResult<Self> {
        let invalid = || ProcessingError::TimeUnits(units.to_string());
        if !units.is_ascii() {
            return Err(invalid());
        }

        let lower = units.to_lowercase();
        let split = lower.find(" since ").ok_or_else(invalid)?;
        let unit = TimeUnit::parse(&units[..split]).ok_or_else(invalid)?;

        let mut origin = units[split + " since ".len()..].split_whitespace();
        let date_part = origin.next().ok_or_else(invalid)?;
        // ISO form "1850-01-01T00:00:00" carries the time after a 'T'
        let (date_part, inline_time) = match date_part.split_once('T') {
            Some((date, time)) => (date, Some(time)),
            None => (date_part, None),
        };
        let date = parse_date(date_part).ok_or_else(invalid)?;

        // A trailing zone name ("UTC") is not a time of day
        let time = match inline_time.or_else(|| origin.next()) {
            Some(text) if text.contains(':') => parse_time(text).ok_or_else(invalid)?,
            _ => NaiveTime::MIN,
        };

        Ok(TimeUnits {
            unit,
            origin: date.and_time(time),
        })
    }

    /// Decodes offsets into calendar dates.
    pub fn decode(&self, offsets: &[f64], calendar: Calendar) -> ProcessingResult<Vec<CalendarDate>> {
        offsets
            .iter()
            .map(|offset| self.decode_one(*offset, calendar))
            .collect()
    }

    fn decode_one(&self, offset: f64, calendar: Calendar) -> ProcessingResult<CalendarDate> {
        if !offset.is_finite() {
            return Err(ProcessingError::TimeUnits(format!(
                "non-finite time offset {}",
                offset
            )));
        }
        let seconds = offset * self.unit.to_seconds_multiplier();

        match calendar {
            Calendar::Standard => {
                let moment = to_i64((seconds * 1000.0).round())
                    .and_then(Duration::try_milliseconds)
                    .and_then(|delta| self.origin.checked_add_signed(delta))
                    .ok_or_else(|| out_of_range(offset))?;
                Ok(CalendarDate {
                    year: moment.year(),
                    month: moment.month(),
                    day: moment.day(),
                })
            }
            Calendar::NoLeap => {
                let start = noleap_day_number(self.origin.date())
                    .ok_or_else(|| ProcessingError::Calendar("noleap origin on Feb 29".into()))?;
                self.elapsed_days(seconds)
                    .and_then(|days| start.checked_add(days))
                    .and_then(noleap_from_day_number)
                    .ok_or_else(|| out_of_range(offset))
            }
            Calendar::Day360 => {
                let origin = self.origin.date();
                let start = i64::from(origin.year()) * 360
                    + i64::from(origin.month0()) * 30
                    + i64::from(origin.day0());
                let number = self
                    .elapsed_days(seconds)
                    .and_then(|days| start.checked_add(days))
                    .ok_or_else(|| out_of_range(offset))?;
                let year = i32::try_from(number.div_euclid(360))
                    .map_err(|_| out_of_range(offset))?;
                let rest = number.rem_euclid(360);
                Ok(CalendarDate {
                    year,
                    month: (rest / 30) as u32 + 1,
                    day: (rest % 30) as u32 + 1,
                })
            }
        }
    }

    /// Whole days between the origin's midnight and origin + `seconds`.
    fn elapsed_days(&self, seconds: f64) -> Option<i64> {
        let since_midnight = f64::from(self.origin.time().num_seconds_from_midnight());
        to_i64(((since_midnight + seconds) / SECONDS_PER_DAY).floor())
    }
}

fn out_of_range(offset: f64) -> ProcessingError {
    ProcessingError::TimeUnits(format!("offset {} out of range", offset))
}

/// `None` when `value` does not fit in an i64 (`as` would saturate).
fn to_i64(value: f64) -> Option<i64> {
    // 2^63 is exactly representable; i64::MAX as f64 rounds up to it
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (value >= -LIMIT && value < LIMIT).then_some(value as i64)
}

/// Decodes `offsets` given the CF `units` and `calendar` attributes.
pub fn decode_time(offsets: &[f64], units: &str, calendar: &str) -> ProcessingResult<Vec<CalendarDate>> {
    let units = TimeUnits::parse(units)?;
    units.decode(offsets, Calendar::parse(calendar)?)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    // Leading '-' belongs to the year; origins like "1-1-1" omit zero padding
    let (sign, body) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text),
    };
    let mut parts = body.split('-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next().unwrap_or("1").parse().ok()?;
    let day: u32 = parts.next().unwrap_or("1").parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(sign * year, month, day)
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim_end_matches('Z');
    ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
}

fn noleap_day_number(date: NaiveDate) -> Option<i64> {
    if date.month() == 2 && date.day() == 29 {
        return None;
    }
    let before: i64 = NOLEAP_MONTH_DAYS[..date.month0() as usize].iter().sum();
    Some(i64::from(date.year()) * 365 + before + i64::from(date.day0()))
}

fn noleap_from_day_number(number: i64) -> Option<CalendarDate> {
    let year = i32::try_from(number.div_euclid(365)).ok()?;
    let mut rest = number.rem_euclid(365);
    let mut month = 0;
    while rest >= NOLEAP_MONTH_DAYS[month] {
        rest -= NOLEAP_MONTH_DAYS[month];
        month += 1;
    }
    Some(CalendarDate {
        year,
        month: month as u32 + 1,
        day: rest as u32 + 1,
    })
}
