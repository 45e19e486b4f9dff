use crate::error::{BackupError, Result};
use chrono::{DateTime, Local};
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use tokio::task::JoinHandle;
use tracing::warn;

/// Accepts classic 5-field patterns as well as the 6/7-field form with seconds.
pub fn parse_schedule(pattern: &str) -> Result<Schedule> {
    let normalized = match pattern.split_whitespace().count() {
        5 => format!("0 {}", pattern.trim()),
        _ => pattern.trim().to_string(),
    };
    Schedule::from_str(&normalized)
        .map_err(|e| BackupError::Config(format!("invalid cron pattern `{}`: {}", pattern, e)))
}

/// Fires a callback at every instant matching a cron pattern, in local time.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    pattern: String,
    schedule: Schedule,
}

impl CronTrigger {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(CronTrigger {
            pattern: pattern.to_string(),
            schedule: parse_schedule(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn next_run(&self) -> Option<DateTime<Local>> {
        self.schedule.upcoming(Local).next()
    }

    /// Runs until the schedule has no further instants. Every firing gets its
    /// own task, so a slow or panicking run never holds up the timer.
    pub fn spawn<F, Fut>(self, callback: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(next) = self.next_run() {
                let wait = (next - Local::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                tokio::spawn(callback());
            }
            warn!("Cron pattern \"{}\" has no upcoming runs", self.pattern);
        })
    }
}
