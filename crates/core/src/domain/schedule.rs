// Schedule Domain Model
//
// Grammar (all times are local wall-clock, naive):
//   daily@H          every day at H:00
//   weekly@D@H       every week on weekday D (0 = Monday) at H:00
//   interval@M       every M minutes after the previous computation
//   hourly           at the top of every hour

use crate::domain::DomainError;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Interval used when a schedule string cannot be parsed
pub const FALLBACK_INTERVAL_MINUTES: u32 = 30;

/// Parsed recurrence rule for a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    Daily { hour: u32 },
    Weekly { weekday: u32, hour: u32 },
    Interval { minutes: u32 },
    Hourly,
}

impl Schedule {
    /// Parse a schedule string, falling back to a 30 minute interval on malformed input
    ///
    /// The fallback is logged at warn level so that typos in configuration surface
    /// without preventing the task from being registered.
    pub fn parse_lenient(expr: &str) -> Self {
        match expr.parse() {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(
                    schedule = %expr,
                    error = %e,
                    fallback_minutes = FALLBACK_INTERVAL_MINUTES,
                    "Malformed schedule, using fallback interval"
                );
                Schedule::Interval {
                    minutes: FALLBACK_INTERVAL_MINUTES,
                }
            }
        }
    }

    /// Compute the next fire time strictly after `now`
    ///
    /// # Example
    /// ```text
    /// // now = Wednesday 10:30
    /// daily@9       -> Thursday 09:00
    /// daily@11      -> Wednesday 11:00
    /// weekly@2@10   -> next Wednesday 10:00 (same weekday, hour already passed)
    /// hourly        -> Wednesday 11:00
    /// interval@15   -> Wednesday 10:45
    /// ```
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        match *self {
            Schedule::Daily { hour } => {
                let today = at_hour(now.date(), hour);
                if today <= now {
                    today + Duration::days(1)
                } else {
                    today
                }
            }
            Schedule::Weekly { weekday, hour } => {
                let current = now.weekday().num_days_from_monday();
                let mut days_ahead = (weekday + 7 - current) % 7;
                if days_ahead == 0 && now.hour() >= hour {
                    days_ahead = 7;
                }
                at_hour(now.date() + Duration::days(i64::from(days_ahead)), hour)
            }
            Schedule::Interval { minutes } => now + Duration::minutes(i64::from(minutes)),
            Schedule::Hourly => at_hour(now.date(), now.hour()) + Duration::hours(1),
        }
    }
}

fn at_hour(date: NaiveDate, hour: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    date.and_time(time)
}

fn invalid(expr: &str, reason: impl Into<String>) -> DomainError {
    DomainError::InvalidSchedule {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

fn parse_field(expr: &str, raw: Option<&str>, name: &str, max: u32) -> Result<u32, DomainError> {
    let raw = raw.ok_or_else(|| invalid(expr, format!("missing {name}")))?;
    let value: u32 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(expr, format!("{name} is not a number: '{raw}'")))?;
    if value > max {
        return Err(invalid(expr, format!("{name} {value} exceeds {max}")));
    }
    Ok(value)
}

impl FromStr for Schedule {
    type Err = DomainError;

    /// Strict parse; use [`Schedule::parse_lenient`] for the fallback behaviour
    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let trimmed = expr.trim();
        let mut parts = trimmed.split('@');
        let kind = parts.next().unwrap_or_default();

        let schedule = match kind {
            "daily" => Schedule::Daily {
                hour: parse_field(expr, parts.next(), "hour", 23)?,
            },
            "weekly" => Schedule::Weekly {
                weekday: parse_field(expr, parts.next(), "weekday", 6)?,
                hour: parse_field(expr, parts.next(), "hour", 23)?,
            },
            "interval" => {
                let minutes = parse_field(expr, parts.next(), "minutes", u32::MAX)?;
                if minutes == 0 {
                    return Err(invalid(expr, "interval must be at least one minute"));
                }
                Schedule::Interval { minutes }
            }
            "hourly" => Schedule::Hourly,
            other => return Err(invalid(expr, format!("unknown schedule kind '{other}'"))),
        };

        if parts.next().is_some() {
            return Err(invalid(expr, "unexpected trailing fields"));
        }
        Ok(schedule)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Daily { hour } => write!(f, "daily@{hour}"),
            Schedule::Weekly { weekday, hour } => write!(f, "weekly@{weekday}@{hour}"),
            Schedule::Interval { minutes } => write!(f, "interval@{minutes}"),
            Schedule::Hourly => write!(f, "hourly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    // 2024-06-05 is a Wednesday (weekday index 2)
    fn wednesday_1030() -> NaiveDateTime {
        dt(2024, 6, 5, 10, 30)
    }

    #[test]
    fn test_parse_valid_schedules() {
        assert_eq!("daily@3".parse::<Schedule>().unwrap(), Schedule::Daily { hour: 3 });
        assert_eq!(
            "weekly@6@4".parse::<Schedule>().unwrap(),
            Schedule::Weekly { weekday: 6, hour: 4 }
        );
        assert_eq!(
            "interval@15".parse::<Schedule>().unwrap(),
            Schedule::Interval { minutes: 15 }
        );
        assert_eq!("hourly".parse::<Schedule>().unwrap(), Schedule::Hourly);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["daily", "daily@24", "weekly@7@1", "weekly@1", "interval@0", "monthly@1", "daily@x", "hourly@2"] {
            assert!(bad.parse::<Schedule>().is_err(), "expected '{bad}' to be rejected");
        }
    }

    #[test]
    fn test_lenient_parse_falls_back_to_thirty_minutes() {
        assert_eq!(
            Schedule::parse_lenient("every-tuesday"),
            Schedule::Interval { minutes: 30 }
        );
        let now = wednesday_1030();
        assert_eq!(
            Schedule::parse_lenient("garbage").next_after(now),
            now + Duration::minutes(30)
        );
    }

    #[test]
    fn test_daily_later_today_and_tomorrow() {
        let now = wednesday_1030();
        assert_eq!(Schedule::Daily { hour: 11 }.next_after(now), dt(2024, 6, 5, 11, 0));
        assert_eq!(Schedule::Daily { hour: 9 }.next_after(now), dt(2024, 6, 6, 9, 0));
    }

    #[test]
    fn test_daily_exact_hour_moves_to_tomorrow() {
        let now = dt(2024, 6, 5, 3, 0);
        assert_eq!(Schedule::Daily { hour: 3 }.next_after(now), dt(2024, 6, 6, 3, 0));
    }

    #[test]
    fn test_weekly_same_day_hour_passed_goes_seven_days() {
        let now = wednesday_1030();
        let next = Schedule::Weekly { weekday: 2, hour: 10 }.next_after(now);
        assert_eq!(next, dt(2024, 6, 12, 10, 0));
    }

    #[test]
    fn test_weekly_same_day_hour_ahead() {
        let now = wednesday_1030();
        let next = Schedule::Weekly { weekday: 2, hour: 11 }.next_after(now);
        assert_eq!(next, dt(2024, 6, 5, 11, 0));
    }

    #[test]
    fn test_weekly_wraps_around_week() {
        let now = wednesday_1030();
        // Monday
        assert_eq!(
            Schedule::Weekly { weekday: 0, hour: 4 }.next_after(now),
            dt(2024, 6, 10, 4, 0)
        );
        // Sunday
        assert_eq!(
            Schedule::Weekly { weekday: 6, hour: 4 }.next_after(now),
            dt(2024, 6, 9, 4, 0)
        );
    }

    #[test]
    fn test_hourly_truncates_to_next_hour() {
        assert_eq!(Schedule::Hourly.next_after(wednesday_1030()), dt(2024, 6, 5, 11, 0));
        assert_eq!(Schedule::Hourly.next_after(dt(2024, 6, 5, 23, 59)), dt(2024, 6, 6, 0, 0));
    }

    #[test]
    fn test_interval_adds_minutes() {
        let now = wednesday_1030();
        assert_eq!(
            Schedule::Interval { minutes: 90 }.next_after(now),
            dt(2024, 6, 5, 12, 0)
        );
    }

    #[test]
    fn test_next_after_is_strictly_later() {
        let now = dt(2024, 12, 31, 23, 0);
        for expr in ["daily@23", "weekly@1@23", "hourly", "interval@1"] {
            let schedule: Schedule = expr.parse().unwrap();
            assert!(schedule.next_after(now) > now, "{expr} did not advance");
        }
    }

    #[test]
    fn test_display_matches_grammar() {
        for expr in ["daily@7", "weekly@3@12", "interval@45", "hourly"] {
            assert_eq!(expr.parse::<Schedule>().unwrap().to_string(), expr);
        }
    }
}
