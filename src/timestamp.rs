//! # Timestamps and Name Templates
//!
//! Snapshot families are named from a template such as `nightly-%T`, where
//! `%T` is replaced by a timestamp rounded down to the family's rotation
//! schedule. Timestamps are always UTC and formatted as `%Y%m%dT%H%MZ`
//! (e.g. `20240102T0000Z`). The format is fixed width, so sorting instance
//! names lexically sorts them chronologically.
//!
//! A [`Schedule`] is either daily at a time of day, or weekly on a weekday at
//! a time of day. [`Schedule::round`] floors a point in time to the most
//! recent schedule point; [`Schedule::window_start`] walks back through
//! earlier windows to resolve `previous`-style back-references.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};

use crate::error::{Error, Result};

/// Placeholder replaced by the formatted timestamp in name templates.
pub const PLACEHOLDER: &str = "%T";

/// `strftime` format of the timestamp part of a snapshot name.
pub const FORMAT: &str = "%Y%m%dT%H%MZ";

/// Length of a formatted timestamp (`YYYYMMDDTHHMMZ`).
pub const FORMATTED_LEN: usize = 14;

/// Format a timestamp the way it appears in snapshot names.
pub fn format(timestamp: DateTime<Utc>) -> String {
    timestamp.format(FORMAT).to_string()
}

/// Parse the timestamp part of a snapshot name.
pub fn parse(value: &str) -> Result<DateTime<Utc>> {
    if value.len() != FORMATTED_LEN {
        return Err(Error::Timestamp {
            message: format!("'{}' is not a {} timestamp", value, FORMAT),
        });
    }
    let naive = NaiveDateTime::parse_from_str(value, FORMAT).map_err(|e| Error::Timestamp {
        message: format!("'{}': {}", value, e),
    })?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Rotation schedule of a snapshot family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Time of day the window starts at
    pub time: NaiveTime,
    /// Weekday for weekly rotation; `None` rotates daily
    pub weekday: Option<Weekday>,
}

impl Schedule {
    /// Daily rotation at the given time of day.
    pub fn daily(time: NaiveTime) -> Self {
        Self {
            time,
            weekday: None,
        }
    }

    /// Weekly rotation on `weekday` at the given time of day.
    pub fn weekly(weekday: Weekday, time: NaiveTime) -> Self {
        Self {
            time,
            weekday: Some(weekday),
        }
    }

    /// Build a schedule from its configuration strings.
    ///
    /// `time` is a 24 hour `HH:MM` string, `repeat_weekly` a three-letter
    /// weekday name (`mon` .. `sun`), case-insensitive.
    pub fn parse(time: &str, repeat_weekly: Option<&str>) -> Result<Self> {
        let parsed = NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|_| Error::Timestamp {
            message: format!("invalid time '{}', expected HH:MM", time),
        })?;
        match repeat_weekly {
            None => Ok(Self::daily(parsed)),
            Some(day) => Ok(Self::weekly(parse_weekday(day)?, parsed)),
        }
    }

    /// Offset of the schedule point from the start of its period
    /// (midnight for daily, Monday midnight for weekly).
    fn offset(&self) -> Duration {
        let days = self
            .weekday
            .map(|d| d.num_days_from_monday() as i64)
            .unwrap_or(0);
        Duration::days(days) + (self.time - NaiveTime::MIN)
    }

    /// Round `date` down to the most recent schedule point.
    ///
    /// Rounding is idempotent: a value already on a schedule point is
    /// returned unchanged.
    pub fn round(&self, date: DateTime<Utc>) -> DateTime<Utc> {
        let offset = self.offset();
        let raster = date - offset;
        let day = raster.date_naive();
        let period_start = match self.weekday {
            None => day,
            Some(_) => day - Duration::days(raster.weekday().num_days_from_monday() as i64),
        };
        let start = Utc.from_utc_datetime(&period_start.and_time(NaiveTime::MIN));
        start + offset
    }

    /// Start of the window `back` rotations before the one containing `now`.
    ///
    /// `back = 0` is the current window, `back = 1` the previous one.
    pub fn window_start(&self, now: DateTime<Utc>, back: u32) -> DateTime<Utc> {
        let one = Duration::seconds(1);
        let mut timestamp = now;
        for _ in 0..=back {
            timestamp = self.round(timestamp) - one;
        }
        timestamp + one
    }
}

fn parse_weekday(day: &str) -> Result<Weekday> {
    match day.trim().to_lowercase().as_str() {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        other => Err(Error::Timestamp {
            message: format!("invalid weekday '{}', expected mon..sun", other),
        }),
    }
}

/// Parse a retention age such as `30d`, `12h`, `2w`, `90m` or `3600s`.
pub fn parse_age(value: &str) -> Result<Duration> {
    let value = value.trim();
    let invalid = || Error::Timestamp {
        message: format!("invalid age '{}', expected <number><s|m|h|d|w>", value),
    };
    let unit = value.chars().last().ok_or_else(invalid)?;
    let amount: i64 = value[..value.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    if amount < 0 {
        return Err(invalid());
    }
    let age = match unit {
        's' => Duration::try_seconds(amount),
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        'w' => Duration::try_weeks(amount),
        _ => None,
    };
    age.ok_or_else(invalid)
}

/// A snapshot name template, split around the `%T` placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameTemplate {
    raw: String,
    split: Option<(String, String)>,
}

impl NameTemplate {
    /// Parse a template. At most one `%T` placeholder is allowed.
    pub fn parse(raw: &str) -> Result<Self> {
        let split = match raw.find(PLACEHOLDER) {
            None => None,
            Some(at) => {
                let prefix = &raw[..at];
                let suffix = &raw[at + PLACEHOLDER.len()..];
                if suffix.contains(PLACEHOLDER) {
                    return Err(Error::ConfigParse {
                        message: format!("snapshot name '{}' has more than one {}", raw, PLACEHOLDER),
                        hint: None,
                    });
                }
                Some((prefix.to_string(), suffix.to_string()))
            }
        };
        Ok(Self {
            raw: raw.to_string(),
            split,
        })
    }

    /// The template as written in the configuration.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the template contains a timestamp placeholder.
    pub fn is_timestamped(&self) -> bool {
        self.split.is_some()
    }

    /// Concrete instance name for `timestamp`; untimestamped templates are
    /// returned as-is.
    pub fn expand(&self, timestamp: DateTime<Utc>) -> String {
        match &self.split {
            Some((prefix, suffix)) => format!("{}{}{}", prefix, format(timestamp), suffix),
            None => self.raw.clone(),
        }
    }

    /// If `name` is an instance of this template, return its timestamp.
    pub fn instance_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        let (prefix, suffix) = self.split.as_ref()?;
        let middle = name.strip_prefix(prefix.as_str())?.strip_suffix(suffix.as_str())?;
        parse(middle).ok()
    }
}

impl std::fmt::Display for NameTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
