//! Isolated execution units for the warm-up run.
//!
//! An isolate hosts one run and can be torn down from outside:
//! - `TaskIsolate`: an in-process task; termination cancels it at the next
//!   step boundary and only counts as torn down once the engine call in
//!   flight has returned
//! - `ProcessIsolate`: a child process re-running this binary in its own
//!   process group; termination kills the whole group, engine processes
//!   included

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::{JobRequest, RunOutcome};
use crate::error::{GenserveError, Result};
use crate::id::generate_warmup_id;
use crate::runner::RunLoop;

/// Environment variable carrying the warm-up job to a child process.
pub const WARMUP_JOB_ENV: &str = "GENSERVE_WARMUP_JOB";

/// How an isolate finished on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolateExit {
    Success,
    Failure(String),
}

/// A running warm-up unit.
#[async_trait]
pub trait Isolate: Send {
    /// Wait for the unit to finish. Safe to drop mid-wait and call again.
    async fn wait(&mut self) -> IsolateExit;

    /// Send the hard termination signal and wait up to `grace` for teardown.
    /// Returns whether the unit was gone before the grace period ran out.
    async fn terminate(&mut self, grace: Duration) -> bool;
}

/// Starts isolates for a job.
#[async_trait]
pub trait IsolateLauncher: Send + Sync {
    async fn launch(&self, job: JobRequest) -> Result<Box<dyn Isolate>>;
}

/// Launches warm-up runs as tasks on the current runtime.
pub struct TaskLauncher {
    runner: Arc<RunLoop>,
}

impl TaskLauncher {
    pub fn new(runner: Arc<RunLoop>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl IsolateLauncher for TaskLauncher {
    async fn launch(&self, job: JobRequest) -> Result<Box<dyn Isolate>> {
        let cancel = CancellationToken::new();
        let runner = Arc::clone(&self.runner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { runner.run_as(generate_warmup_id(), job, token).await });
        Ok(Box::new(TaskIsolate {
            handle: Some(handle),
            cancel,
        }))
    }
}

/// A warm-up run hosted on a runtime task.
pub struct TaskIsolate {
    handle: Option<JoinHandle<Result<RunOutcome>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl Isolate for TaskIsolate {
    async fn wait(&mut self) -> IsolateExit {
        let Some(handle) = self.handle.as_mut() else {
            return IsolateExit::Failure("warm-up task already reaped".to_string());
        };
        let joined = handle.await;
        self.handle = None;
        match joined {
            Ok(Ok(_)) => IsolateExit::Success,
            Ok(Err(e)) => IsolateExit::Failure(e.to_string()),
            Err(e) => IsolateExit::Failure(format!("warm-up task panicked: {}", e)),
        }
    }

    async fn terminate(&mut self, grace: Duration) -> bool {
        self.cancel.cancel();
        let Some(handle) = self.handle.as_mut() else {
            return true;
        };
        match tokio::time::timeout(grace, &mut *handle).await {
            Ok(_) => {
                self.handle = None;
                true
            }
            Err(_) => {
                handle.abort();
                false
            }
        }
    }
}

/// Launches warm-up runs as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Launcher that re-executes the running binary.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| GenserveError::Warmup(format!("Failed to locate current executable: {}", e)))?;
        Ok(Self::new(exe))
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl IsolateLauncher for ProcessLauncher {
    async fn launch(&self, job: JobRequest) -> Result<Box<dyn Isolate>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(WARMUP_JOB_ENV, serde_json::to_string(&job)?)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        // Own group so engine processes started by the child die with it
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            GenserveError::Warmup(format!("Failed to spawn {}: {}", self.program.display(), e))
        })?;
        let pgid = child.id();
        log::debug!("Warm-up process started with pid {:?}", pgid);
        Ok(Box::new(ProcessIsolate { child, pgid }))
    }
}

/// A warm-up run hosted in a child process and its process group.
pub struct ProcessIsolate {
    child: Child,
    pgid: Option<u32>,
}

impl ProcessIsolate {
    /// SIGKILL every process in the group. Returns whether the whole group
    /// was signalled.
    fn kill_group(&mut self) -> bool {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid {
                match kill_process_group(pgid) {
                    Ok(()) => return true,
                    Err(e) => log::warn!("Failed to kill warm-up process group {}: {}", pgid, e),
                }
            }
        }
        if let Err(e) = self.child.start_kill() {
            log::warn!("Failed to kill warm-up process: {}", e);
        }
        false
    }
}

#[async_trait]
impl Isolate for ProcessIsolate {
    async fn wait(&mut self) -> IsolateExit {
        match self.child.wait().await {
            Ok(status) if status.success() => IsolateExit::Success,
            Ok(status) => IsolateExit::Failure(format!("warm-up process exited with {}", status)),
            Err(e) => IsolateExit::Failure(format!("failed to wait for warm-up process: {}", e)),
        }
    }

    async fn terminate(&mut self, grace: Duration) -> bool {
        let group_killed = self.kill_group();
        let reaped = tokio::time::timeout(grace, self.child.wait()).await.is_ok();
        group_killed && reaped
    }
}

impl Drop for ProcessIsolate {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            self.kill_group();
        }
    }
}

/// Send SIGKILL to process group `pgid`. A group that is already gone counts
/// as killed.
#[cfg(unix)]
fn kill_process_group(pgid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "process group id out of range"))?;
    // SAFETY: kill(2) with a negative pid signals the group; no memory is touched.
    let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}
