//! Recurring pipeline trigger.
//!
//! Fire times come from a seconds-first cron expression, evaluated in UTC.
//! Runs execute one at a time: a fire time that passes while a run is in
//! progress is skipped, not queued.

use std::future::Future;
use std::pin::pin;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::{info, warn};

use crate::error::{Result, WarehouseError};
use crate::pipeline::Pipeline;

/// Parsed cron schedule for pipeline runs
#[derive(Debug, Clone)]
pub struct PipelineSchedule {
    expression: String,
    schedule: Schedule,
}

impl PipelineSchedule {
    /// Parse a cron expression such as `0 0 2 * * *` (daily at 02:00)
    pub fn parse(expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            WarehouseError::InvalidConfig(format!("invalid cron expression {expression:?}: {e}"))
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `from`
    pub fn next_after(&self, from: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(from).next()
    }

    /// Fire runs until `shutdown` resolves
    ///
    /// A shutdown during a run aborts it at the next stage boundary and waits
    /// for it to settle before returning. Returns the number of runs started.
    pub async fn run_until<F>(&self, pipeline: &Pipeline, shutdown: F) -> Result<usize>
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        let mut runs = 0;

        loop {
            let now = Utc::now();
            let Some(next) = self.next_after(&now) else {
                warn!(cron = %self.expression, "Schedule has no future fire times");
                return Ok(runs);
            };
            info!(cron = %self.expression, next_run = %next, "Waiting for next scheduled run");

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = &mut shutdown => {
                    info!(runs, "Scheduler stopped");
                    return Ok(runs);
                }
            }

            runs += 1;
            let mut run = pin!(pipeline.run());
            let result = tokio::select! {
                result = &mut run => result,
                () = &mut shutdown => {
                    warn!("Shutdown requested, aborting run at the next stage boundary");
                    pipeline.abort_handle().abort();
                    let result = run.await;
                    info!(state = ?result.state, runs, "Scheduler stopped");
                    return Ok(runs);
                }
            };

            if result.succeeded() {
                info!(run = runs, "Scheduled run succeeded");
            } else {
                warn!(run = runs, state = ?result.state, "Scheduled run failed");
            }
        }
    }
}
