//! Inclusive time ranges for restricting historical samples.

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

/// Filter construction errors.
#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    #[error("invalid start time: {0}")]
    InvalidStart(String),
    #[error("invalid end time: {0}")]
    InvalidEnd(String),
    #[error("invalid range {0:?}: expected a duration like 2h, 30m or 1d")]
    InvalidRange(String),
}

/// A time range with inclusive, optional bounds. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimeFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeFilter {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Whether `t` lies within `[start, end]`.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        if let Some(start) = self.start {
            if t < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if t > end {
                return false;
            }
        }
        true
    }

    pub fn is_bounded(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    /// Build a filter from user-facing inputs.
    ///
    /// A non-zero `range` wins over `start`/`end` and covers the last
    /// `|range|` up to now. Otherwise the absolute strings are parsed with
    /// [`parse_time`].
    pub fn from_inputs(
        start: Option<&str>,
        end: Option<&str>,
        range: Option<ChronoDuration>,
    ) -> Result<Self, FilterError> {
        Self::from_inputs_at(Utc::now(), start, end, range)
    }

    fn from_inputs_at(
        now: DateTime<Utc>,
        start: Option<&str>,
        end: Option<&str>,
        range: Option<ChronoDuration>,
    ) -> Result<Self, FilterError> {
        if let Some(range) = range.map(|r| r.abs()).filter(|r| !r.is_zero()) {
            return Ok(Self::new(Some(now - range), Some(now)));
        }

        let start = start
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_time(s).ok_or_else(|| FilterError::InvalidStart(s.to_string())))
            .transpose()?;
        let end = end
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_time(s).ok_or_else(|| FilterError::InvalidEnd(s.to_string())))
            .transpose()?;

        Ok(Self::new(start, end))
    }
}

/// Test a timestamp against an optional filter; no filter admits everything.
pub fn admits(filter: Option<&TimeFilter>, t: DateTime<Utc>) -> bool {
    filter.map_or(true, |f| f.contains(t))
}

/// Parse `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` (local time) or RFC 3339.
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a relative range such as `2h`, `-30m` or `1day`.
///
/// `max`, `0` and the empty string mean "no range". A leading `-` is kept as
/// a negative duration; [`TimeFilter::from_inputs`] normalizes it.
pub fn parse_range(s: &str) -> Result<Option<ChronoDuration>, FilterError> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("max") {
        return Ok(None);
    }

    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim()),
        None => (false, trimmed),
    };

    let std_dur =
        humantime::parse_duration(body).map_err(|_| FilterError::InvalidRange(s.to_string()))?;
    let dur =
        ChronoDuration::from_std(std_dur).map_err(|_| FilterError::InvalidRange(s.to_string()))?;

    Ok(Some(if negative { -dur } else { dur }))
}
