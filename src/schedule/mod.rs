//! Delivery scheduling.
//!
//! `should_trigger` is the whole policy: a summary may go out on a cadence
//! day, from shortly before the configured delivery time onwards, and only
//! when there is something to send. `runner` drives it from wall-clock
//! polling loops.

mod runner;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::config::ScheduleConfig;
use crate::error::Result;

pub use runner::run;

/// Slack on either side of the delivery time.
pub const TIME_MATCH_TOLERANCE_MINUTES: i64 = 15;

/// How long after the delivery time the day stays eligible.
pub const DELIVERY_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Weekly(Weekday),
    /// Day of month, 1-31. Short months deliver on their last day.
    Monthly(u32),
}

impl Cadence {
    pub fn label(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly(_) => "weekly",
            Cadence::Monthly(_) => "monthly",
        }
    }

    pub fn is_delivery_day(&self, date: NaiveDate) -> bool {
        match *self {
            Cadence::Daily => true,
            Cadence::Weekly(day) => date.weekday() == day,
            Cadence::Monthly(day) => date.day() == day.min(days_in_month(date)),
        }
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Decides whether `now` (local wall-clock time) is a moment to summarize
/// and send.
pub fn should_trigger(
    now: NaiveDateTime,
    cadence: Cadence,
    delivery_time: NaiveTime,
    has_unsummarized_content: bool,
    force: bool,
) -> bool {
    if force {
        return true;
    }
    if !has_unsummarized_content || !cadence.is_delivery_day(now.date()) {
        return false;
    }

    let today_delivery = now.date().and_time(delivery_time);
    let offset = now - today_delivery;

    let time_match = offset.num_seconds().abs() <= TIME_MATCH_TOLERANCE_MINUTES * 60;
    let time_window = offset >= Duration::zero() && offset < Duration::hours(DELIVERY_WINDOW_HOURS);

    time_match || time_window
}

#[derive(Debug, Clone, Copy)]
pub struct DeliverySchedule {
    pub cadence: Cadence,
    pub delivery_time: NaiveTime,
}

impl DeliverySchedule {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self {
            cadence: config.cadence()?,
            delivery_time: config.delivery_time()?,
        })
    }

    pub fn should_trigger(&self, now: NaiveDateTime, has_content: bool, force: bool) -> bool {
        should_trigger(now, self.cadence, self.delivery_time, has_content, force)
    }
}
