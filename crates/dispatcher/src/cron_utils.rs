use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::{debug, warn};

use coordinator_core::errors::CoordinatorError;
use coordinator_core::CoordinatorResult;

/// Cron expression parsing and trigger decisions.
///
/// Expressions use the six-field form with a leading seconds column, so
/// "every five minutes" is `0 */5 * * * *`.
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> CoordinatorResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| CoordinatorError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { schedule })
    }

    /// Should a task with this schedule fire, given when it last ran?
    ///
    /// A task that has never run is triggered if an execution time fell
    /// within the last minute, so freshly registered tasks do not fire
    /// retroactively for every missed slot.
    pub fn should_trigger(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let check_from = match last_run {
            Some(last) => last,
            None => now - Duration::minutes(1),
        };
        match self.schedule.after(&check_from).next() {
            Some(next_time) => {
                let should = next_time <= now;
                if should {
                    debug!(
                        next = %next_time.format("%Y-%m-%d %H:%M:%S UTC"),
                        now = %now.format("%Y-%m-%d %H:%M:%S UTC"),
                        "schedule due"
                    );
                }
                should
            }
            None => {
                warn!("schedule has no future execution time");
                false
            }
        }
    }

    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    pub fn validate_cron_expression(cron_expr: &str) -> CoordinatorResult<()> {
        Schedule::from_str(cron_expr).map_err(|e| CoordinatorError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.schedule.after(&now).next().map(|next| next - now)
    }
}
