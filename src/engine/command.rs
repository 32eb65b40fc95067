//! External engine driven through a line protocol.
//!
//! `init` writes the settings as a JSON object into the job directory and
//! starts one long-lived `<program> settings.json` process there. The process
//! loads whatever it needs and prints `ready`. Each `step` then writes a
//! `step` line to its stdin, and the process answers with `continue` or
//! `done` once the output file has been overwritten. `error <message>` fails
//! the call. Any other stdout line is passed through to the debug log.
//!
//! The process is killed when the engine is dropped or a call fails.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use log::debug;

use super::{EngineFactory, GenerationEngine};
use crate::domain::EngineSettings;
use crate::error::{GenserveError, Result};

/// Default program name
pub const DEFAULT_ENGINE_COMMAND: &str = "pixray-step";

/// Environment variable handed to the engine with the model artifact location
pub const MODEL_ARTIFACTS_ENV: &str = "AIP_STORAGE_URI";

const SETTINGS_FILE: &str = "settings.json";

/// Creates `CommandEngine`s for one configured program.
#[derive(Debug, Clone)]
pub struct CommandEngineFactory {
    program: String,
    model_artifacts: Option<String>,
}

impl CommandEngineFactory {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            model_artifacts: None,
        }
    }

    /// Location of model weights, exported to the engine process.
    pub fn model_artifacts(mut self, uri: impl Into<String>) -> Self {
        self.model_artifacts = Some(uri.into());
        self
    }
}

impl Default for CommandEngineFactory {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_COMMAND)
    }
}

impl EngineFactory for CommandEngineFactory {
    fn create(&self, settings: EngineSettings) -> Result<Box<dyn GenerationEngine>> {
        Ok(Box::new(CommandEngine {
            program: self.program.clone(),
            model_artifacts: self.model_artifacts.clone(),
            settings_path: settings.output_dir().join(SETTINGS_FILE),
            settings,
            process: None,
        }))
    }
}

/// An engine backed by an external program.
#[derive(Debug)]
pub struct CommandEngine {
    program: String,
    model_artifacts: Option<String>,
    settings: EngineSettings,
    settings_path: PathBuf,
    process: Option<EngineProcess>,
}

/// Replies the engine process sends on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Ready,
    Continue,
    Done,
}

impl CommandEngine {
    fn spawn(&self) -> Result<EngineProcess> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(SETTINGS_FILE)
            .current_dir(self.settings.output_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(uri) = &self.model_artifacts {
            cmd.env(MODEL_ARTIFACTS_ENV, uri);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| GenserveError::Engine(format!("Failed to execute {}: {}", self.program, e)))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(GenserveError::Engine(format!("{} started without pipes", self.program)));
        };
        debug!("Engine {} started with pid {}", self.program, child.id());
        Ok(EngineProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Run `f` against the live process; a failure kills it.
    fn exchange<T>(&mut self, phase: &str, f: impl FnOnce(&mut EngineProcess, &str) -> Result<T>) -> Result<T> {
        let Some(process) = self.process.as_mut() else {
            return Err(GenserveError::Engine(format!("{} called before init", phase)));
        };
        let result = f(process, &self.program);
        if result.is_err() {
            self.process = None;
        }
        result
    }
}

impl GenerationEngine for CommandEngine {
    fn init(&mut self) -> Result<()> {
        fs::create_dir_all(self.settings.output_dir())?;
        fs::write(&self.settings_path, serde_json::to_vec_pretty(&self.settings.to_json())?)?;

        self.process = Some(self.spawn()?);
        match self.exchange("init", |process, program| process.read_reply(program, "init"))? {
            Reply::Ready => {
                debug!("Engine {} initialized in {}", self.program, self.settings.output_dir().display());
                Ok(())
            }
            other => {
                self.process = None;
                Err(GenserveError::Engine(format!("expected `ready` from init, got {:?}", other)))
            }
        }
    }

    fn step(&mut self) -> Result<bool> {
        let reply = self.exchange("step", |process, program| {
            process.send("step", program)?;
            process.read_reply(program, "step")
        })?;
        match reply {
            Reply::Continue => Ok(false),
            Reply::Done => Ok(true),
            Reply::Ready => {
                self.process = None;
                Err(GenserveError::Engine("unexpected `ready` in reply to step".to_string()))
            }
        }
    }

    fn output_path(&self) -> PathBuf {
        self.settings.output_path()
    }
}

/// The running engine program and its pipes.
#[derive(Debug)]
struct EngineProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl EngineProcess {
    fn send(&mut self, command: &str, program: &str) -> Result<()> {
        writeln!(self.stdin, "{}", command)
            .and_then(|()| self.stdin.flush())
            .map_err(|e| GenserveError::Engine(format!("Failed to send {} to {}: {}", command, program, e)))
    }

    fn read_reply(&mut self, program: &str, phase: &str) -> Result<Reply> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .stdout
                .read_line(&mut line)
                .map_err(|e| GenserveError::Engine(format!("Failed to read from {}: {}", program, e)))?;
            if read == 0 {
                return Err(self.exited(program, phase));
            }
            match parse_reply(&line) {
                Some(reply) => return reply,
                None => debug!("{}: {}", program, line.trim_end()),
            }
        }
    }

    fn exited(&mut self, program: &str, phase: &str) -> GenserveError {
        match self.child.wait() {
            Ok(status) => GenserveError::Engine(format!("{} exited during {} with {}", program, phase, status)),
            Err(e) => GenserveError::Engine(format!("{} closed its output during {}: {}", program, phase, e)),
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            if let Err(e) = self.child.kill() {
                debug!("Failed to kill engine process {}: {}", self.child.id(), e);
            }
        }
        if let Err(e) = self.child.wait() {
            debug!("Failed to reap engine process {}: {}", self.child.id(), e);
        }
    }
}

/// Interpret one stdout line. `None` means the line is not a reply.
fn parse_reply(line: &str) -> Option<Result<Reply>> {
    let line = line.trim();
    match line {
        "ready" => Some(Ok(Reply::Ready)),
        "continue" => Some(Ok(Reply::Continue)),
        "done" => Some(Ok(Reply::Done)),
        _ => line
            .strip_prefix("error")
            .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
            .map(|rest| Err(GenserveError::Engine(format!("engine reported: {}", rest.trim())))),
    }
}

/// Whether `program` resolves to something runnable.
pub fn program_exists(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobRequest;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("ready\n").unwrap().unwrap(), Reply::Ready);
        assert_eq!(parse_reply("  continue ").unwrap().unwrap(), Reply::Continue);
        assert_eq!(parse_reply("done").unwrap().unwrap(), Reply::Done);
        assert!(parse_reply("loading weights").is_none());
        assert!(parse_reply("").is_none());
        assert!(parse_reply("errors so far: 0").is_none());

        let err = parse_reply("error out of memory").unwrap().unwrap_err();
        assert!(err.to_string().contains("out of memory"));
    }

    #[test]
    fn test_program_exists() {
        assert!(!program_exists("definitely-not-a-real-program-xyz"));
        assert!(!program_exists("/no/such/dir/engine"));
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("engine.sh");
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn engine_for(dir: &TempDir, script: &Path) -> Box<dyn GenerationEngine> {
        let job = JobRequest::from_value(json!({"prompts": "x"})).unwrap();
        let settings = EngineSettings::for_job(&job, dir.path().join("job")).unwrap();
        CommandEngineFactory::new(script.to_string_lossy()).create(settings).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_command_engine_protocol() {
        let dir = TempDir::new().unwrap();
        // Records every start-up in `starts`; completes on the third step.
        let script = write_script(
            dir.path(),
            r#"
test -f "$1" || exit 2
echo started >> starts
echo loading weights
echo ready
n=0
while read cmd; do
  [ "$cmd" = step ] || continue
  n=$((n + 1))
  echo "image $n" > output.png
  if [ $n -ge 3 ]; then echo done; else echo continue; fi
done
"#,
        );

        let mut engine = engine_for(&dir, &script);
        engine.init().unwrap();
        assert!(dir.path().join("job").join(SETTINGS_FILE).exists());
        assert!(!engine.step().unwrap());
        assert!(!engine.step().unwrap());
        assert!(engine.step().unwrap());
        assert_eq!(fs::read_to_string(engine.output_path()).unwrap(), "image 3\n");

        // Initialization ran once for all three steps.
        let starts = fs::read_to_string(dir.path().join("job").join("starts")).unwrap();
        assert_eq!(starts.lines().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_engine_reported_error() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "echo 'error weights missing'\nread cmd\n");

        let mut engine = engine_for(&dir, &script);
        let err = engine.init().unwrap_err();
        assert!(matches!(err, GenserveError::Engine(_)));
        assert!(err.to_string().contains("weights missing"));
        // A failed call leaves no live process behind.
        assert!(engine.step().unwrap_err().to_string().contains("before init"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_engine_exit_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "echo ready\nread cmd\nexit 3\n");

        let mut engine = engine_for(&dir, &script);
        engine.init().unwrap();
        let err = engine.step().unwrap_err();
        assert!(err.to_string().contains("exited during step"));
    }

    #[test]
    fn test_command_engine_missing_program() {
        let dir = TempDir::new().unwrap();
        let job = JobRequest::from_value(json!({"prompts": "x"})).unwrap();
        let settings = EngineSettings::for_job(&job, dir.path().join("job")).unwrap();
        let mut engine = CommandEngineFactory::new("definitely-not-a-real-program-xyz")
            .create(settings)
            .unwrap();

        let err = engine.init().unwrap_err();
        assert!(err.to_string().contains("Failed to execute"));
    }
}
