use std::time::Duration;

use chrono::prelude::*;
use chrono;

use errors::*;

/// `ScheduleSpec` describes a recurring run: first at `start_hour:start_minute` local time, then
/// every `interval` seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    start_hour: u32,
    start_minute: u32,
    interval: u64,
}

impl ScheduleSpec {
    pub fn new(start_hour: u32, start_minute: u32, interval: u64) -> Result<Self> {
        if start_hour > 23 {
            return Err(ErrorKind::InvalidSchedule(format!("hour {} is out of range", start_hour)).into());
        }
        if start_minute > 59 {
            return Err(
                ErrorKind::InvalidSchedule(format!("minute {} is out of range", start_minute)).into(),
            );
        }
        if interval == 0 {
            return Err(ErrorKind::InvalidSchedule("interval must be positive".to_owned()).into());
        }

        Ok(ScheduleSpec {
            start_hour,
            start_minute,
            interval,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn start_minute(&self) -> u32 {
        self.start_minute
    }

    /// Seconds between two firings.
    pub fn interval_secs(&self) -> u64 {
        self.interval
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// The next occurrence of the start time: today if it has not passed yet, tomorrow otherwise.
    pub fn first_fire_time(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = match now.date().and_hms_opt(self.start_hour, self.start_minute, 0) {
            Some(today) => today,
            None => return now,
        };

        if today >= now {
            today
        } else {
            today + chrono::Duration::days(1)
        }
    }

    /// Time to wait from `now` until the first firing.
    pub fn initial_delay(&self, now: NaiveDateTime) -> Duration {
        (self.first_fire_time(now) - now)
            .to_std()
            .unwrap_or_else(|_| Duration::from_secs(0))
    }
}
