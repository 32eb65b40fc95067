//! Engine settings - built in two phases from a job request.
//!
//! `SettingsBuilder` accumulates raw key/value settings (built-in defaults
//! first, caller keys layered on top), and `resolve()` normalizes them into an
//! immutable `EngineSettings` owned by exactly one run.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::job::JobRequest;
use crate::error::{GenserveError, Result};

/// Default quality preset.
pub const DEFAULT_QUALITY: &str = "draft";

/// Default loss function selector.
pub const DEFAULT_LOSS: &str = "clip";

/// File name the engine writes its output to inside the job directory.
pub const DEFAULT_OUTPUT_NAME: &str = "output.png";

/// Accumulates raw settings before resolution.
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    values: Map<String, Value>,
}

impl SettingsBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder seeded with the built-in defaults.
    pub fn with_defaults() -> Self {
        Self::new()
            .add("quality", DEFAULT_QUALITY)
            .add("loss", DEFAULT_LOSS)
            .add("output", DEFAULT_OUTPUT_NAME)
    }

    /// Set a single key, replacing any earlier value.
    pub fn add(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Layer every parameter of a job over the accumulated settings.
    pub fn merge_job(mut self, job: &JobRequest) -> Self {
        for (key, value) in job.params() {
            self.values.insert(key.clone(), value.clone());
        }
        self
    }

    /// Normalize into final settings that write into `output_dir`.
    pub fn resolve(mut self, output_dir: impl Into<PathBuf>) -> Result<EngineSettings> {
        let output_dir = output_dir.into();

        // `prompt` is accepted as an alias; the engine only sees `prompts`.
        if let Some(prompt) = self.values.remove("prompt") {
            self.values.entry("prompts").or_insert(prompt);
        }
        let prompt = match self.values.get("prompts") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            _ => return Err(GenserveError::InvalidJob("settings have no prompt".to_string())),
        };

        let iterations = match self.values.get("iterations") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_u64() {
                Some(n) if n > 0 => Some(n),
                _ => {
                    return Err(GenserveError::InvalidJob(format!(
                        "iterations must be a positive integer, got {}",
                        v
                    )));
                }
            },
        };

        let quality = match self.values.get("quality") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(GenserveError::InvalidJob(format!(
                    "quality must be a string, got {}",
                    other
                )));
            }
            None => DEFAULT_QUALITY.to_string(),
        };

        let output_name = match self.values.get("output") {
            Some(Value::String(s)) if is_plain_file_name(s) => s.clone(),
            Some(other) => {
                return Err(GenserveError::InvalidJob(format!(
                    "output must be a plain file name, got {}",
                    other
                )));
            }
            None => DEFAULT_OUTPUT_NAME.to_string(),
        };

        self.values.insert(
            "outdir".to_string(),
            Value::from(output_dir.to_string_lossy().into_owned()),
        );

        Ok(EngineSettings {
            values: self.values,
            prompt,
            iterations,
            quality,
            output_dir,
            output_name,
        })
    }
}

/// Resolved settings for one engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    values: Map<String, Value>,
    prompt: String,
    iterations: Option<u64>,
    quality: String,
    output_dir: PathBuf,
    output_name: String,
}

impl EngineSettings {
    /// Resolve settings for a job: defaults, then job keys, then normalization.
    pub fn for_job(job: &JobRequest, output_dir: impl Into<PathBuf>) -> Result<Self> {
        SettingsBuilder::with_defaults().merge_job(job).resolve(output_dir)
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn iterations(&self) -> Option<u64> {
        self.iterations
    }

    pub fn quality(&self) -> &str {
        &self.quality
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The file the engine overwrites in place after every step.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_name)
    }

    /// Look up a raw setting.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// All settings as a JSON object, as handed to the engine.
    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name).file_name().map(|f| f == name).unwrap_or(false)
}
