use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use std::collections::BTreeSet;

pub const MS_PER_HOUR: i64 = 60 * 60 * 1000;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// The range synthetic sessions are spread over: `days` whole days ending at
/// `end_ms`, which is the local midnight that starts the current day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub end_ms: i64,
    pub days: u32,
}

impl TimeWindow {
    pub fn new(end_ms: i64, days: u32) -> Self {
        Self { end_ms, days }
    }

    /// Window ending at today's local midnight.
    pub fn ending_today(days: u32) -> Self {
        Self::new(local_midnight_ms(Local::now()), days)
    }

    pub fn start_ms(&self) -> i64 {
        self.end_ms - i64::from(self.days) * MS_PER_DAY
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms() && timestamp_ms <= self.end_ms
    }

    /// Midnight of each day, walking back from `end_ms` while still after `start_ms`.
    pub fn day_starts(&self) -> Vec<i64> {
        let start = self.start_ms();
        let mut days = Vec::with_capacity(self.days as usize);
        let mut cursor = self.end_ms;
        while cursor > start {
            days.push(cursor);
            cursor -= MS_PER_DAY;
        }
        days
    }

    /// Every UTC calendar day a timestamp inside the window can fall on, oldest first.
    pub fn utc_days(&self) -> Vec<String> {
        let mut days = BTreeSet::new();
        for day_start in self.day_starts() {
            days.insert(utc_day(day_start - MS_PER_DAY));
            days.insert(utc_day(day_start));
        }
        days.into_iter().collect()
    }
}

/// Epoch milliseconds of the local midnight starting the day `now` falls on.
pub fn local_midnight_ms<Tz: TimeZone>(now: DateTime<Tz>) -> i64 {
    let date = now.with_timezone(&Local).date_naive();
    date.and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.timestamp_millis())
        .unwrap_or_else(|| utc_midnight_ms(date))
}

fn utc_midnight_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc().timestamp_millis())
        .unwrap_or_default()
}

/// ISO-8601 string in UTC with a numeric offset, e.g. `2026-10-17T21:00:00+0000`.
pub fn iso8601(timestamp_ms: i64) -> String {
    utc_datetime(timestamp_ms)
        .format("%Y-%m-%dT%H:%M:%S%z")
        .to_string()
}

/// UTC calendar day used for date-partitioned index names.
pub fn utc_day(timestamp_ms: i64) -> String {
    utc_datetime(timestamp_ms).format("%Y-%m-%d").to_string()
}

fn utc_datetime(timestamp_ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).unwrap_or_default()
}
