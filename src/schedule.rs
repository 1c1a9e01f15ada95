//! When passes run: once, on a fixed interval, or on a cron schedule.
use crate::WatchduckerError;
use chrono::{DateTime, Local};
use cron::Schedule;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CRON: &str = "0 2 * * *";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// A single pass, then exit.
    Once,
    /// A pass right away and again after every interval.
    Interval(Duration),
    /// Passes at the schedule's fire times only.
    Cron(CronSchedule),
}

impl RunMode {
    /// How long to wait before the next pass, or `None` when no pass follows.
    pub fn next_delay(&self, now: DateTime<Local>) -> Option<Duration> {
        match self {
            RunMode::Once => None,
            RunMode::Interval(interval) => Some(*interval),
            RunMode::Cron(schedule) => schedule.delay_from(now),
        }
    }

    /// Cron mode waits for the first fire time instead of checking at startup.
    pub fn runs_at_startup(&self) -> bool {
        !matches!(self, RunMode::Cron(_))
    }
}

/// A parsed cron expression. Classic five field expressions (minute, hour,
/// day of month, month, day of week) get a zero seconds field prepended;
/// six and seven field expressions and `@daily` style shorthands are taken
/// as they are.
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, WatchduckerError> {
        let expression = expression.trim();
        let full = if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.to_string()
        };
        let schedule = Schedule::from_str(&full).map_err(|e| {
            WatchduckerError::Config(format!("invalid cron expression `{expression}`: {e}"))
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `now`.
    pub fn next_run(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(&now).next()
    }

    fn delay_from(&self, now: DateTime<Local>) -> Option<Duration> {
        let next = self.next_run(now)?;
        // a fire time within the current instant yields a zero wait
        Some((next - now).to_std().unwrap_or_default())
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}
