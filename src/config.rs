use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::limits::*;
use crate::model::{Occupancy, TimeRange};

/// Opening hours applied to every center and every date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workday {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Workday {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Result<Self, ConfigError> {
        if open >= close {
            return Err(ConfigError::EmptyWorkday { open, close });
        }
        Ok(Self { open, close })
    }

    /// The workday as a concrete range on `date`.
    pub fn on(&self, date: NaiveDate) -> TimeRange {
        TimeRange::on(date, self.open, self.close)
    }

    pub fn close_on(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.close)
    }
}

impl Default for Workday {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
        }
    }
}

/// Policy values every engine call reads. Passed in explicitly so tests can
/// vary the workday or buffer without touching process state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub workday: Workday,
    /// Idle minutes required before and after every booking.
    pub buffer_minutes: u32,
    pub occupancy: Occupancy,
    /// Cap on generated slots per date.
    pub max_slots: usize,
    /// Slots returned to an availability caller.
    pub shortlist_len: usize,
    /// Days after "today" scanned for alternatives.
    pub horizon_days: u32,
    pub max_suggestions: usize,
    pub duration_tolerance_minutes: u32,
    pub forward_interval: Duration,
    pub forward_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workday: Workday::default(),
            buffer_minutes: 15,
            occupancy: Occupancy::default(),
            max_slots: 20,
            shortlist_len: 10,
            horizon_days: 7,
            max_suggestions: 3,
            duration_tolerance_minutes: 1,
            forward_interval: Duration::from_secs(30),
            forward_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    pub fn buffer(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.buffer_minutes))
    }

    /// Load from `CENTERBOOK_*` environment variables, defaulting what is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let open = match lookup("CENTERBOOK_WORKDAY_OPEN") {
            Some(v) => parse_time("CENTERBOOK_WORKDAY_OPEN", &v)?,
            None => defaults.workday.open,
        };
        let close = match lookup("CENTERBOOK_WORKDAY_CLOSE") {
            Some(v) => parse_time("CENTERBOOK_WORKDAY_CLOSE", &v)?,
            None => defaults.workday.close,
        };
        let workday = Workday::new(open, close)?;

        let buffer_minutes = match lookup("CENTERBOOK_BUFFER_MINUTES") {
            Some(v) => parse_num::<u32>("CENTERBOOK_BUFFER_MINUTES", &v)?,
            None => defaults.buffer_minutes,
        };
        if buffer_minutes > MAX_BUFFER_MINUTES {
            return Err(ConfigError::OutOfRange("CENTERBOOK_BUFFER_MINUTES"));
        }

        let occupancy = match lookup("CENTERBOOK_PENDING_OCCUPIES") {
            Some(v) => {
                if parse_bool("CENTERBOOK_PENDING_OCCUPIES", &v)? {
                    Occupancy::BOOKED_AND_PENDING
                } else {
                    Occupancy::BOOKED_ONLY
                }
            }
            None => defaults.occupancy,
        };

        let horizon_days = match lookup("CENTERBOOK_HORIZON_DAYS") {
            Some(v) => parse_num::<u32>("CENTERBOOK_HORIZON_DAYS", &v)?,
            None => defaults.horizon_days,
        };
        if horizon_days == 0 || horizon_days > MAX_HORIZON_DAYS {
            return Err(ConfigError::OutOfRange("CENTERBOOK_HORIZON_DAYS"));
        }

        let forward_interval = match lookup("CENTERBOOK_FORWARD_INTERVAL_SECS") {
            Some(v) => Duration::from_secs(parse_num("CENTERBOOK_FORWARD_INTERVAL_SECS", &v)?),
            None => defaults.forward_interval,
        };
        let forward_timeout = match lookup("CENTERBOOK_FORWARD_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_num("CENTERBOOK_FORWARD_TIMEOUT_SECS", &v)?),
            None => defaults.forward_timeout,
        };
        if forward_interval.is_zero() {
            return Err(ConfigError::OutOfRange("CENTERBOOK_FORWARD_INTERVAL_SECS"));
        }

        Ok(Self {
            workday,
            buffer_minutes,
            occupancy,
            horizon_days,
            forward_interval,
            forward_timeout,
            ..defaults
        })
    }
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn parse_time(key: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    parse_time_of_day(value).ok_or_else(|| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

/// Optional server setting from `lookup`. A value that does not parse is
/// logged and treated as unset, so the caller falls back to its default.
pub fn server_setting<T, F>(key: &str, lookup: F) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring invalid value for {key}: {raw:?}");
            None
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
    OutOfRange(&'static str),
    EmptyWorkday { open: NaiveTime, close: NaiveTime },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
            ConfigError::OutOfRange(key) => write!(f, "{key} out of range"),
            ConfigError::EmptyWorkday { open, close } => {
                write!(f, "workday open {open} must be before close {close}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
