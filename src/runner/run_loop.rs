//! Run loop implementation - drives one engine instance to completion.
//!
//! Each run:
//! 1. Resolves owned settings for the job (defaults, then job keys)
//! 2. Creates a fresh engine and initializes it on a blocking worker
//! 3. Steps the engine until it reports completion, snapshotting the output
//!    after every step
//! 4. Publishes the final snapshot (or every snapshot, if configured)
//!
//! Any failure aborts the run; no partial snapshot is returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::domain::{EngineSettings, JobRequest, RunOutcome, Snapshot};
use crate::engine::{EngineFactory, GenerationEngine};
use crate::error::{GenserveError, Result};
use crate::id::generate_job_id;
use crate::publish::{ArtifactPublisher, NoopPublisher, object_key};
use crate::snapshot::SnapshotCopier;

/// Configuration for the RunLoop.
#[derive(Debug, Clone)]
pub struct RunLoopConfig {
    /// Parent of the per-job engine output directories
    pub jobs_dir: PathBuf,
    /// Publish every iteration's snapshot instead of only the final one
    pub publish_every_iteration: bool,
    /// Fail the run if the engine has not completed after this many steps
    pub max_steps: Option<u32>,
    /// Keep non-final snapshots on disk after a run completes
    pub keep_intermediate_snapshots: bool,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            jobs_dir: std::env::temp_dir().join("genserve").join("jobs"),
            publish_every_iteration: false,
            max_steps: None,
            keep_intermediate_snapshots: true,
        }
    }
}

/// Drives the generation engine for one job at a time per call.
///
/// A `RunLoop` is shared; each `run()` builds its own settings and engine, so
/// concurrent calls share no mutable state.
pub struct RunLoop {
    factory: Arc<dyn EngineFactory>,
    copier: SnapshotCopier,
    publisher: Arc<dyn ArtifactPublisher>,
    config: RunLoopConfig,
}

impl RunLoop {
    /// Create a RunLoop that never publishes.
    pub fn new(factory: Arc<dyn EngineFactory>, copier: SnapshotCopier) -> Self {
        Self::with_config(factory, copier, Arc::new(NoopPublisher), RunLoopConfig::default())
    }

    /// Create a RunLoop with a publisher and custom configuration.
    pub fn with_config(
        factory: Arc<dyn EngineFactory>,
        copier: SnapshotCopier,
        publisher: Arc<dyn ArtifactPublisher>,
        config: RunLoopConfig,
    ) -> Self {
        Self {
            factory,
            copier,
            publisher,
            config,
        }
    }

    /// Same engine and snapshot location, publishing disabled.
    pub fn without_publishing(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            copier: self.copier.clone(),
            publisher: Arc::new(NoopPublisher),
            config: self.config.clone(),
        }
    }

    /// Run a job to completion.
    pub async fn run(&self, job: JobRequest) -> Result<RunOutcome> {
        self.run_with_cancel(job, CancellationToken::new()).await
    }

    /// Run a job, stopping at the next step boundary once `cancel` fires.
    ///
    /// A step already executing on a worker thread cannot be interrupted; the
    /// run returns `Cancelled` after it finishes and discards its result.
    pub async fn run_with_cancel(&self, job: JobRequest, cancel: CancellationToken) -> Result<RunOutcome> {
        let job_id = generate_job_id();
        self.run_as(job_id, job, cancel).await
    }

    /// Run a job under a caller-chosen id.
    pub async fn run_as(&self, job_id: String, job: JobRequest, cancel: CancellationToken) -> Result<RunOutcome> {
        info!("Model called for {} with args: {}", job_id, serde_json::Value::Object(job.params().clone()));

        let settings = EngineSettings::for_job(&job, job_dir(&self.config.jobs_dir, &job_id))?;
        let engine = self.factory.create(settings)?;

        let (mut engine, ()) = on_worker(engine, &cancel, |engine| engine.init()).await?;
        tracing::debug!(job_id = %job_id, "Engine initialized");

        let mut published = Vec::new();
        let mut iteration: u32 = 0;
        let final_snapshot = loop {
            if let Some(limit) = self.config.max_steps {
                if iteration >= limit {
                    return Err(GenserveError::StepLimit(limit));
                }
            }
            iteration += 1;

            let copier = self.copier.clone();
            let id = job_id.clone();
            let (returned, (complete, snapshot)) = on_worker(engine, &cancel, move |engine| {
                let complete = engine.step()?;
                let snapshot = copier.snapshot(&engine.output_path(), &id, iteration)?;
                Ok((complete, snapshot))
            })
            .await?;
            engine = returned;

            info!("Iterating result for `{}` output num: {}", job.prompt(), iteration);

            if self.config.publish_every_iteration || complete {
                if let Some(key) = self.publish(&snapshot, job.prompt()).await? {
                    published.push(key);
                }
            }

            if complete {
                break snapshot;
            }
        };

        if !self.config.keep_intermediate_snapshots {
            let removed = self.copier.prune(&job_id, &final_snapshot.path)?;
            debug!("Pruned {} intermediate snapshots for {}", removed, job_id);
        }

        tracing::info!(
            job_id = %job_id,
            iterations = iteration,
            snapshot = %final_snapshot.path.display(),
            "Run complete"
        );

        Ok(RunOutcome {
            job_id,
            snapshot: final_snapshot,
            iterations: iteration,
            published,
        })
    }

    async fn publish(&self, snapshot: &Snapshot, prompt: &str) -> Result<Option<String>> {
        let key = object_key(prompt, Utc::now());
        self.publisher.publish(snapshot.path(), &key).await?;
        Ok(self.publisher.is_enabled().then_some(key))
    }
}

/// Run a blocking engine call on a worker thread and hand the engine back.
///
/// Once `cancel` fires the run is over, but the call in flight cannot be
/// interrupted: this waits for it to return and drops the engine before
/// reporting `Cancelled`, so no engine work outlives the run.
async fn on_worker<T, F>(
    mut engine: Box<dyn GenerationEngine>,
    cancel: &CancellationToken,
    f: F,
) -> Result<(Box<dyn GenerationEngine>, T)>
where
    T: Send + 'static,
    F: FnOnce(&mut Box<dyn GenerationEngine>) -> Result<T> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(GenserveError::Cancelled);
    }

    let mut worker = tokio::task::spawn_blocking(move || {
        let result = f(&mut engine);
        (engine, result)
    });

    let joined = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        joined = &mut worker => Some(joined),
    };

    let Some(joined) = joined else {
        warn!("Run cancelled while the engine was busy; waiting for the current call");
        if let Err(e) = worker.await {
            warn!("Engine worker panicked after cancel: {}", e);
        }
        return Err(GenserveError::Cancelled);
    };

    let (engine, result) = joined.map_err(|e| GenserveError::Engine(format!("engine worker panicked: {}", e)))?;
    result.map(|value| (engine, value))
}

/// Directory a job's engine output is written to.
pub fn job_dir(jobs_dir: &Path, job_id: &str) -> PathBuf {
    jobs_dir.join(job_id)
}
