// Schedule module - Calendar restarts of single processes and of the host

pub mod host;
pub mod process;

pub use host::{HostRebooter, HostRestartScheduler, HostTimings, SystemRebooter};
pub use process::{ProcessRestartScheduler, ScheduleTimings};

use crate::config::{Frequency, RestartSchedule};
use crate::process::name_key;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use std::collections::HashMap;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// Weekday for a 0 = Sunday index
pub fn weekday(day_of_week: u32) -> Option<Weekday> {
    WEEKDAYS.get(day_of_week as usize).copied()
}

/// The schedule's wall-clock time on `date`
pub fn target_on(schedule: &RestartSchedule, date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(schedule.hour, schedule.minute, 0)
}

/// Today's target if `now` lies within one minute of it, either side.
/// Weekly schedules only match on their weekday.
pub fn due_target(schedule: &RestartSchedule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if schedule.frequency == Frequency::Weekly
        && now.weekday().num_days_from_sunday() != schedule.day_of_week
    {
        return None;
    }

    let target = target_on(schedule, now.date())?;
    let offset = now.signed_duration_since(target);
    let window = Duration::minutes(1);

    if offset > -window && offset < window {
        Some(target)
    } else {
        None
    }
}

/// First target strictly after `now`
pub fn next_occurrence(schedule: &RestartSchedule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let today = target_on(schedule, now.date())?;

    let days_ahead = match schedule.frequency {
        Frequency::Daily => {
            if today > now {
                0
            } else {
                1
            }
        }
        Frequency::Weekly => {
            let current = now.weekday().num_days_from_sunday() as i64;
            let days = (schedule.day_of_week as i64 - current + 7) % 7;
            if days == 0 && today <= now {
                7
            } else {
                days
            }
        }
    };

    target_on(schedule, now.date() + Duration::days(days_ahead))
}

/// Render the next occurrence, e.g. `2024-03-10 23:30:00 (Daily) - in 0d 2h 15m`
pub fn describe_next(schedule: &RestartSchedule, now: NaiveDateTime) -> String {
    let Some(next) = next_occurrence(schedule, now) else {
        return format!(
            "Invalid restart time {:02}:{:02}",
            schedule.hour, schedule.minute
        );
    };

    let remaining = next.signed_duration_since(now).num_seconds().max(0);
    format!(
        "{} ({}) - in {}d {}h {}m",
        next.format("%Y-%m-%d %H:%M:%S"),
        schedule.frequency,
        remaining / 86_400,
        (remaining % 86_400) / 3_600,
        (remaining % 3_600) / 60,
    )
}

/// Targets that already fired, keyed by name and target minute.
///
/// Entries older than a day are evicted on every insert.
#[derive(Debug, Default)]
pub struct FiredTargets {
    fired: HashMap<String, NaiveDateTime>,
}

impl FiredTargets {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, target: NaiveDateTime) -> String {
        format!("{}_{}", name_key(name), target.format("%Y%m%d%H%M"))
    }

    /// Record that `name` fired for `target`. Returns `false` if it already had.
    pub fn try_mark(&mut self, name: &str, target: NaiveDateTime, now: NaiveDateTime) -> bool {
        self.evict(now);

        let key = Self::key(name, target);
        if self.fired.contains_key(&key) {
            return false;
        }
        self.fired.insert(key, now);
        true
    }

    fn evict(&mut self, now: NaiveDateTime) {
        let horizon = Duration::hours(24);
        self.fired
            .retain(|_, fired_at| now.signed_duration_since(*fired_at) < horizon);
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}
