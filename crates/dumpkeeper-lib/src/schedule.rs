//! Recurring trigger definitions: 5-field cron expressions and fixed intervals.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound for the forward search, enough for `29 2` schedules.
const MAX_SEARCH_DAYS: i64 = 366 * 5;

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("cron expression must have 5 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid cron field '{field}': {reason}")]
    Field { field: String, reason: String },
    #[error("unknown timezone '{0}'")]
    Timezone(String),
}

/// Timezone in which cron fields are evaluated.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Timezone {
    #[default]
    Utc,
    Local,
    Named(chrono_tz::Tz),
}

impl FromStr for Timezone {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            t if t.eq_ignore_ascii_case("utc") => Ok(Timezone::Utc),
            t if t.eq_ignore_ascii_case("local") => Ok(Timezone::Local),
            t => t
                .parse::<chrono_tz::Tz>()
                .map(Timezone::Named)
                .map_err(|_| ScheduleError::Timezone(t.to_string())),
        }
    }
}

impl fmt::Display for Timezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timezone::Utc => write!(f, "UTC"),
            Timezone::Local => write!(f, "local"),
            Timezone::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

/// Set of allowed values for one cron field, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FieldSet {
    bits: u64,
    /// False when the field was a bare `*`.
    restricted: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }

    fn parse(raw: &str, min: u32, max: u32) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::Field {
            field: raw.to_string(),
            reason,
        };
        let number = |s: &str| -> Result<u32, ScheduleError> {
            let value: u32 = s
                .parse()
                .map_err(|_| invalid(format!("'{}' is not a number", s)))?;
            if value < min || value > max {
                return Err(invalid(format!("{} is out of range ({}-{})", value, min, max)));
            }
            Ok(value)
        };

        let mut bits = 0u64;
        for part in raw.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| invalid(format!("bad step '{}'", step)))?;
                    if step == 0 {
                        return Err(invalid("step must be positive".to_string()));
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                let (a, b) = (number(a)?, number(b)?);
                if a > b {
                    return Err(invalid(format!("range {}-{} is reversed", a, b)));
                }
                (a, b)
            } else {
                let value = number(range)?;
                // `5/15` means "from 5 to the end of the range, every 15".
                if step > 1 {
                    (value, max)
                } else {
                    (value, value)
                }
            };

            let mut value = Some(start);
            while let Some(v) = value.filter(|v| *v <= end) {
                bits |= 1u64 << v;
                value = v.checked_add(step);
            }
        }

        Ok(Self {
            bits,
            // Vixie cron treats `*/n` as unrestricted too.
            restricted: !raw.starts_with('*'),
        })
    }
}

/// A parsed 5-field cron expression (minute, hour, day of month, month, day of week).
#[derive(Debug, Clone, PartialEq)]
pub struct CronSchedule {
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
    raw: String,
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(ScheduleError::FieldCount(parts.len()));
        }

        let mut day_of_week = FieldSet::parse(parts[4], 0, 7)?;
        // 7 is an alias for Sunday.
        if day_of_week.contains(7) {
            day_of_week.bits |= 1;
        }

        Ok(Self {
            minute: FieldSet::parse(parts[0], 0, 59)?,
            hour: FieldSet::parse(parts[1], 0, 23)?,
            day_of_month: FieldSet::parse(parts[2], 1, 31)?,
            month: FieldSet::parse(parts[3], 1, 12)?,
            day_of_week,
            raw: parts.join(" "),
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl CronSchedule {
    fn date_matches(&self, date: NaiveDate) -> bool {
        if !self.month.contains(date.month()) {
            return false;
        }
        let dom = self.day_of_month.contains(date.day());
        let dow = self
            .day_of_week
            .contains(date.weekday().num_days_from_sunday());
        // Vixie cron: if both day fields are restricted, either may match.
        match (self.day_of_month.restricted, self.day_of_week.restricted) {
            (true, true) => dom || dow,
            _ => dom && dow,
        }
    }

    /// Next firing strictly after `after`, with the fields read as wall-clock time in `tz`.
    pub fn next_after<Z: TimeZone>(&self, after: DateTime<Utc>, tz: &Z) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(tz).naive_local();
        let mut candidate = local.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = candidate + Duration::days(MAX_SEARCH_DAYS);

        while candidate < limit {
            if !self.date_matches(candidate.date()) {
                candidate = next_midnight(candidate)?;
                continue;
            }
            if !self.hour.contains(candidate.hour()) {
                candidate = candidate.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }

            // Wall-clock times inside a DST gap do not exist and are skipped.
            if let Some(resolved) = tz.from_local_datetime(&candidate).earliest() {
                let utc = resolved.with_timezone(&Utc);
                if utc > after {
                    return Some(utc);
                }
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

fn next_midnight(at: NaiveDateTime) -> Option<NaiveDateTime> {
    at.date().succ_opt()?.and_hms_opt(0, 0, 0)
}

/// When a recurring job fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Cron {
        schedule: CronSchedule,
        timezone: Timezone,
    },
    /// Fires every fixed interval, measured from the previous firing.
    Interval(std::time::Duration),
}

impl Trigger {
    /// Parses a cron trigger evaluated in `timezone`.
    pub fn cron(expression: &str, timezone: Timezone) -> Result<Self, ScheduleError> {
        Ok(Trigger::Cron {
            schedule: expression.parse()?,
            timezone,
        })
    }

    /// Next firing strictly after `after`, or `None` if the schedule never fires again.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron { schedule, timezone } => match timezone {
                Timezone::Utc => schedule.next_after(after, &Utc),
                Timezone::Local => schedule.next_after(after, &chrono::Local),
                Timezone::Named(tz) => schedule.next_after(after, tz),
            },
            Trigger::Interval(every) => {
                let every = Duration::from_std(*every).ok()?;
                if every <= Duration::zero() {
                    return None;
                }
                Some(after + every)
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron { schedule, timezone } => write!(f, "cron '{}' ({})", schedule, timezone),
            Trigger::Interval(every) => write!(f, "every {:?}", every),
        }
    }
}
