//! Job request - the parameters for one generation run.
//!
//! A job is an unvalidated mapping of parameter name to value. Only the
//! presence of a prompt is checked; everything else is handed to the engine
//! verbatim.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{GenserveError, Result};

/// Keys that may carry the prompt text, in lookup order.
pub const PROMPT_KEYS: [&str; 2] = ["prompts", "prompt"];

/// Prompt used by the startup warm-up run.
pub const WARMUP_PROMPT: &str = "the eiffel tower";

/// Parameters for one generation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JobRequest {
    params: Map<String, Value>,
}

impl JobRequest {
    /// Build a job from a JSON value.
    ///
    /// The value must be an object with a non-empty string prompt under
    /// `prompts` or `prompt`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(params) = value else {
            return Err(GenserveError::InvalidJob(
                "job specification must be a JSON object".to_string(),
            ));
        };

        let job = Self { params };
        match job.find_prompt() {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(job),
            Some(Value::String(_)) => Err(GenserveError::InvalidJob("prompt is empty".to_string())),
            Some(_) => Err(GenserveError::InvalidJob("prompt must be a string".to_string())),
            None => Err(GenserveError::InvalidJob(
                "missing `prompts` or `prompt` field".to_string(),
            )),
        }
    }

    /// The job used to exercise the engine once at startup.
    pub fn canned_warmup() -> Self {
        let mut params = Map::new();
        params.insert("prompts".to_string(), Value::from(WARMUP_PROMPT));
        params.insert("iterations".to_string(), Value::from(1));
        Self { params }
    }

    /// The prompt text.
    pub fn prompt(&self) -> &str {
        self.find_prompt().and_then(Value::as_str).unwrap_or_default()
    }

    /// Requested iteration count, if the caller supplied one.
    pub fn iterations(&self) -> Option<u64> {
        self.params.get("iterations").and_then(Value::as_u64)
    }

    /// All parameters, as supplied.
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn find_prompt(&self) -> Option<&Value> {
        PROMPT_KEYS.iter().find_map(|key| self.params.get(*key))
    }
}
