use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc, Weekday};
use std::fmt;
use std::time::Duration;

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Every `Duration`, first fire one full period after the timer is armed
    Interval(Duration),
    /// Once a day at a fixed UTC wall-clock time
    Daily { at: NaiveTime, weekdays_only: bool },
}

/// Next time strictly after `now` that a daily trigger at `at` fires.
///
/// Interval triggers have no wall-clock schedule; their timers count from
/// when they are armed.
pub fn next_daily_fire(at: NaiveTime, weekdays_only: bool, now: DateTime<Utc>) -> DateTime<Utc> {
    let mut candidate = now.date_naive().and_time(at).and_utc();
    if candidate <= now {
        candidate += ChronoDuration::days(1);
    }
    while weekdays_only && is_weekend(candidate.weekday()) {
        candidate += ChronoDuration::days(1);
    }
    candidate
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval(period) => write!(f, "every {}s", period.as_secs()),
            Trigger::Daily { at, weekdays_only } => {
                write!(f, "daily at {} UTC", at.format("%H:%M"))?;
                if *weekdays_only {
                    write!(f, " (Mon-Fri)")?;
                }
                Ok(())
            }
        }
    }
}
