//! Shared request-handling state.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::readiness::ReadinessGate;
use crate::runner::RunLoop;

/// How a finished image is returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// `{"predictions": [{"image_bytes": {"b64": ...}}]}`
    #[default]
    Json,
    /// Raw image bytes with an image media type
    File,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::Json => write!(f, "json"),
            ResponseMode::File => write!(f, "file"),
        }
    }
}

impl FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseMode::Json),
            "file" => Ok(ResponseMode::File),
            other => Err(format!("unknown response mode: {}", other)),
        }
    }
}

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub gate: ReadinessGate,
    pub runner: Arc<RunLoop>,
    /// One permit per concurrently running job
    pub slots: Arc<Semaphore>,
    pub response_mode: ResponseMode,
}

impl AppState {
    pub fn new(gate: ReadinessGate, runner: Arc<RunLoop>, workers: usize, response_mode: ResponseMode) -> Self {
        Self {
            gate,
            runner,
            slots: Arc::new(Semaphore::new(workers.max(1))),
            response_mode,
        }
    }
}
