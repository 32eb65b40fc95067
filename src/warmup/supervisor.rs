//! Warm-up supervisor - runs one canned job under a deadline, then opens the
//! readiness gate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use super::isolate::{IsolateExit, IsolateLauncher};
use crate::domain::{JobRequest, WarmupOutcome, WarmupReport};
use crate::readiness::ReadinessGate;

/// Default deadline for the warm-up run (20 minutes).
pub const DEFAULT_WARMUP_DEADLINE: Duration = Duration::from_secs(20 * 60);

/// Default time the torn-down isolate gets to exit.
pub const DEFAULT_WARMUP_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the WarmupSupervisor.
#[derive(Debug, Clone)]
pub struct WarmupConfig {
    /// Hard deadline for the warm-up run
    pub deadline: Duration,
    /// How long to wait for teardown after the deadline passes
    pub grace: Duration,
    /// Keep the gate closed when the warm-up run fails
    pub fail_closed: bool,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_WARMUP_DEADLINE,
            grace: DEFAULT_WARMUP_GRACE,
            fail_closed: false,
        }
    }
}

/// Runs the warm-up job in an isolate and settles readiness.
pub struct WarmupSupervisor {
    launcher: Arc<dyn IsolateLauncher>,
    gate: ReadinessGate,
    config: WarmupConfig,
}

impl WarmupSupervisor {
    pub fn new(launcher: Arc<dyn IsolateLauncher>, gate: ReadinessGate, config: WarmupConfig) -> Self {
        Self { launcher, gate, config }
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Run the canned warm-up job.
    pub async fn warm_up_default(&self) -> WarmupReport {
        self.warm_up(JobRequest::canned_warmup()).await
    }

    /// Run `job` as the warm-up. Returns once the isolate has finished or
    /// been torn down, at most `deadline + grace` after the call.
    pub async fn warm_up(&self, job: JobRequest) -> WarmupReport {
        let started = Instant::now();
        info!("Models loaded - running warm-up (deadline {:?})", self.config.deadline);

        let outcome = match self.launcher.launch(job).await {
            Err(e) => WarmupOutcome::Failed(e.to_string()),
            Ok(mut isolate) => {
                let waited = tokio::time::timeout(self.config.deadline, isolate.wait()).await;
                match waited {
                    Ok(IsolateExit::Success) => WarmupOutcome::Completed,
                    Ok(IsolateExit::Failure(msg)) => WarmupOutcome::Failed(msg),
                    Err(_) => {
                        warn!("Timeout - terminating warm-up after {:?}", self.config.deadline);
                        let torn_down = isolate.terminate(self.config.grace).await;
                        if !torn_down {
                            warn!("Warm-up did not exit within {:?}; detached", self.config.grace);
                        }
                        WarmupOutcome::TimedOut { torn_down }
                    }
                }
            }
        };

        let elapsed = started.elapsed();
        let ready = self.settle(&outcome);
        tracing::info!(outcome = ?outcome, elapsed_ms = elapsed.as_millis() as u64, ready, "Warm-up finished");

        WarmupReport { outcome, elapsed, ready }
    }

    /// Open the gate without running anything.
    pub fn skip(&self) -> WarmupReport {
        info!("Warm-up disabled");
        self.gate.mark_ready();
        WarmupReport {
            outcome: WarmupOutcome::Skipped,
            elapsed: Duration::ZERO,
            ready: self.gate.is_ready(),
        }
    }

    fn settle(&self, outcome: &WarmupOutcome) -> bool {
        match outcome {
            WarmupOutcome::Completed => info!("Warm-up complete"),
            WarmupOutcome::Failed(msg) => error!("Warm-up failed: {}", msg),
            WarmupOutcome::TimedOut { .. } => warn!("Warm-up timed out"),
            WarmupOutcome::Skipped => {}
        }

        if self.config.fail_closed && outcome.is_failure() {
            error!("Warm-up failed and fail-closed is set; staying not ready");
            return self.gate.is_ready();
        }
        self.gate.mark_ready();
        self.gate.is_ready()
    }
}
