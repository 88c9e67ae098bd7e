//! Stage execution with bounded retry.
//!
//! A [`StageAction`] is one coarse unit of external work. The [`StageRunner`]
//! runs it up to `max_attempts` times with a fixed delay between attempts and
//! reports a typed [`StageOutcome`]. Every attempt is logged.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::metrics::MetricsCollector;
use crate::models::{StageName, StageOutcome, StageStatus, StageToken};

/// Fixed-delay retry budget for one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included
    pub max_attempts: u32,
    /// Wait between consecutive attempts
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_secs(60),
        }
    }
}

/// One unit of pipeline work
///
/// Returning an error, for whatever reason, marks the attempt failed.
#[async_trait]
pub trait StageAction: Send + Sync {
    /// Run the work once; `upstream` is the token of the preceding stage
    async fn execute(&self, upstream: &StageToken) -> anyhow::Result<StageToken>;
}

/// Runs stage actions under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct StageRunner {
    policy: RetryPolicy,
    metrics: MetricsCollector,
}

impl StageRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: MetricsCollector::default(),
        }
    }

    /// Execute `action`, retrying failures until the budget is spent
    pub async fn run(&self, stage: StageName, action: &dyn StageAction, upstream: &StageToken) -> StageOutcome {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let attempt_started = Instant::now();
            let result = action.execute(upstream).await;
            let duration = attempt_started.elapsed();
            self.metrics.record_stage_attempt(stage, duration, result.is_ok());

            match result {
                Ok(token) => {
                    info!(
                        stage = %stage,
                        attempt,
                        outcome = "succeeded",
                        duration_ms = duration.as_millis(),
                        token = %token,
                        "Stage attempt finished"
                    );
                    return StageOutcome {
                        stage,
                        status: StageStatus::Succeeded,
                        attempts: attempt,
                        last_error,
                        token: Some(token),
                        elapsed: started.elapsed(),
                    };
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    warn!(
                        stage = %stage,
                        attempt,
                        max_attempts,
                        outcome = "failed",
                        duration_ms = duration.as_millis(),
                        error = %message,
                        "Stage attempt finished"
                    );
                    last_error = Some(message);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.backoff_delay).await;
                    }
                }
            }
        }

        StageOutcome {
            stage,
            status: StageStatus::Failed,
            attempts: max_attempts,
            last_error,
            token: None,
            elapsed: started.elapsed(),
        }
    }
}

/// External process stage; success means exit status zero
#[derive(Debug, Clone)]
pub struct CommandAction {
    stage: StageName,
    program: String,
    args: Vec<String>,
}

impl CommandAction {
    /// Build from a command line; `None` when it is empty
    pub fn from_command_line(stage: StageName, command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            stage,
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl StageAction for CommandAction {
    async fn execute(&self, _upstream: &StageToken) -> anyhow::Result<StageToken> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to start `{}`", self.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("`{}` exited with {}: {}", self.display(), output.status, stderr.trim()));
        }

        Ok(StageToken(format!("{} complete", self.stage)))
    }
}
