//! Cadence policies and next-tick computation.

use crate::errors::ConfigError;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
    /// Fixed interval, first tick one interval after start.
    Interval { every_secs: u64 },
    /// Once a day at a wall-clock time.
    Daily {
        #[serde(with = "hhmm")]
        at: NaiveTime,
        #[serde(default = "default_timezone")]
        timezone: String,
        #[serde(default)]
        weekdays_only: bool,
    },
    /// Every `every_minutes` between open and close (inclusive), Monday to Friday.
    MarketHours {
        #[serde(default = "default_timezone")]
        timezone: String,
        #[serde(with = "hhmm", default = "default_open")]
        open: NaiveTime,
        #[serde(with = "hhmm", default = "default_close")]
        close: NaiveTime,
        every_minutes: u32,
    },
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence::Daily {
            at: NaiveTime::from_hms_opt(16, 30, 0).unwrap_or_default(),
            timezone: default_timezone(),
            weekdays_only: true,
        }
    }
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default()
}

fn default_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default()
}

fn parse_tz(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|e| ConfigError::Invalid(format!("unknown timezone {}: {}", name, e)))
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Resolve a local wall-clock time; `None` when it falls in a DST gap.
fn local_to_utc(tz: &Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Longest accepted interval, one leap year.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 3600;

impl Cadence {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Cadence::Interval { every_secs } => {
                if *every_secs == 0 {
                    return Err(ConfigError::Invalid("interval must be positive".to_string()));
                }
                if *every_secs > MAX_INTERVAL_SECS {
                    return Err(ConfigError::Invalid(format!(
                        "interval of {}s exceeds the maximum of {}s",
                        every_secs, MAX_INTERVAL_SECS
                    )));
                }
            }
            Cadence::Daily { timezone, .. } => {
                parse_tz(timezone)?;
            }
            Cadence::MarketHours { timezone, open, close, every_minutes } => {
                parse_tz(timezone)?;
                if *every_minutes == 0 {
                    return Err(ConfigError::Invalid("every_minutes must be positive".to_string()));
                }
                if open >= close {
                    return Err(ConfigError::Invalid(format!(
                        "market open {} must be before close {}", open, close
                    )));
                }
            }
        }
        Ok(())
    }

    /// The first tick strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigError> {
        match self {
            Cadence::Interval { every_secs } => {
                let too_large = || ConfigError::Invalid(format!("interval of {}s is out of range", every_secs));
                let secs = i64::try_from(*every_secs).map_err(|_| too_large())?;
                let step = ChronoDuration::try_seconds(secs.max(1)).ok_or_else(too_large)?;
                after.checked_add_signed(step).ok_or_else(too_large)
            }
            Cadence::Daily { at, timezone, weekdays_only } => {
                let tz = parse_tz(timezone)?;
                let start = after.with_timezone(&tz).date_naive();
                // 最多向后查找8天（跨周末）
                for offset in 0..8 {
                    let date = start + ChronoDuration::days(offset);
                    if *weekdays_only && !is_weekday(date) {
                        continue;
                    }
                    if let Some(tick) = local_to_utc(&tz, date, *at) {
                        if tick > after {
                            return Ok(tick);
                        }
                    }
                }
                Err(ConfigError::Invalid(format!("no daily tick found after {}", after)))
            }
            Cadence::MarketHours { timezone, open, close, every_minutes } => {
                let tz = parse_tz(timezone)?;
                let step = ChronoDuration::minutes(i64::from((*every_minutes).max(1)));
                let start = after.with_timezone(&tz).date_naive();
                for offset in 0..8 {
                    let date = start + ChronoDuration::days(offset);
                    if !is_weekday(date) {
                        continue;
                    }
                    let mut slot = *open;
                    loop {
                        if let Some(tick) = local_to_utc(&tz, date, slot) {
                            if tick > after {
                                return Ok(tick);
                            }
                        }
                        let (next, wrapped) = slot.overflowing_add_signed(step);
                        if wrapped != 0 || next > *close {
                            break;
                        }
                        slot = next;
                    }
                }
                Err(ConfigError::Invalid(format!("no market-hours tick found after {}", after)))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Cadence::Interval { every_secs } => format!("every {}s", every_secs),
            Cadence::Daily { at, timezone, weekdays_only } => format!(
                "daily at {} {}{}",
                at.format("%H:%M"),
                timezone,
                if *weekdays_only { " (weekdays)" } else { "" }
            ),
            Cadence::MarketHours { timezone, open, close, every_minutes } => format!(
                "every {} min between {} and {} {} (weekdays)",
                every_minutes,
                open.format("%H:%M"),
                close.format("%H:%M"),
                timezone
            ),
        }
    }
}

/// `HH:MM` (or `HH:MM:SS`) serde representation for wall-clock times.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time {:?}: {}", s, e)))
    }
}
