use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use genserve::engine::DEFAULT_ENGINE_COMMAND;
use genserve::server::{DEFAULT_HEALTH_ROUTE, DEFAULT_PREDICT_ROUTE, ResponseMode, RouteConfig};

/// Default location of the model weights the engine loads.
pub const DEFAULT_MODEL_ARTIFACTS: &str = "gs://ltx_text_us";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub server: ServerConfig,
    pub warmup: WarmupConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub health_route: String,
    pub predict_route: String,
    pub workers: usize,
    pub response_mode: ResponseMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            health_route: DEFAULT_HEALTH_ROUTE.to_string(),
            predict_route: DEFAULT_PREDICT_ROUTE.to_string(),
            workers: 1,
            response_mode: ResponseMode::Json,
        }
    }
}

impl ServerConfig {
    pub fn routes(&self) -> RouteConfig {
        RouteConfig::new(&self.health_route, &self.predict_route)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub grace_secs: u64,
    pub fail_closed: bool,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 1200,
            grace_secs: 5,
            fail_closed: false,
        }
    }
}

impl WarmupConfig {
    pub fn supervisor(&self) -> genserve::warmup::WarmupConfig {
        genserve::warmup::WarmupConfig {
            deadline: Duration::from_secs(self.timeout_secs),
            grace: Duration::from_secs(self.grace_secs),
            fail_closed: self.fail_closed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub command: String,
    pub model_artifacts: String,
    pub max_steps: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_ENGINE_COMMAND.to_string(),
            model_artifacts: DEFAULT_MODEL_ARTIFACTS.to_string(),
            max_steps: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Empty disables publishing
    pub export_bucket: String,
    pub work_dir: PathBuf,
    pub publish_every_iteration: bool,
    pub keep_intermediate_snapshots: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            export_bucket: String::new(),
            work_dir: std::env::temp_dir().join("genserve"),
            publish_every_iteration: false,
            keep_intermediate_snapshots: true,
        }
    }
}

impl StorageConfig {
    pub fn snapshots_dir(&self) -> PathBuf {
        self.work_dir.join("snapshots")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.work_dir.join("jobs")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            server: ServerConfig::default(),
            warmup: WarmupConfig::default(),
            engine: EngineConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Overlay deployment environment variables.
    ///
    /// String settings take the variable verbatim, including empty values.
    /// Empty numeric or boolean variables are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(route) = lookup("AIP_HEALTH_ROUTE") {
            self.server.health_route = route;
        }
        if let Some(route) = lookup("AIP_PREDICT_ROUTE") {
            self.server.predict_route = route;
        }
        if let Some(uri) = lookup("AIP_STORAGE_URI") {
            self.engine.model_artifacts = uri;
        }
        if let Some(bucket) = lookup("EXPORT_BUCKET") {
            self.storage.export_bucket = bucket;
        }
        if let Some(host) = lookup("VERTEX_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_var(&lookup, "VERTEX_PORT")?.or(parse_var(&lookup, "AIP_HTTP_PORT")?) {
            self.server.port = port;
        }
        if let Some(workers) = parse_var::<usize, _>(&lookup, "WORKERS")? {
            if workers == 0 {
                return Err(eyre!("WORKERS must be at least 1"));
            }
            self.server.workers = workers;
        }
        if let Some(mode) = parse_var(&lookup, "PREDICT_RESPONSE")? {
            self.server.response_mode = mode;
        }
        if let Some(secs) = parse_var(&lookup, "WARMUP_TIMEOUT_SECS")? {
            self.warmup.timeout_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, "WARMUP_GRACE_SECS")? {
            self.warmup.grace_secs = secs;
        }
        if let Some(enabled) = parse_flag(&lookup, "WARMUP_ENABLED")? {
            self.warmup.enabled = enabled;
        }
        if let Some(fail_closed) = parse_flag(&lookup, "WARMUP_FAIL_CLOSED")? {
            self.warmup.fail_closed = fail_closed;
        }
        if let Some(command) = lookup("ENGINE_COMMAND").filter(|c| !c.trim().is_empty()) {
            self.engine.command = command;
        }
        if let Some(steps) = parse_var(&lookup, "MAX_STEPS")? {
            self.engine.max_steps = Some(steps);
        }
        if let Some(dir) = lookup("GENSERVE_WORK_DIR").filter(|d| !d.trim().is_empty()) {
            self.storage.work_dir = PathBuf::from(dir);
        }
        if let Some(every) = parse_flag(&lookup, "PUBLISH_EVERY_ITERATION")? {
            self.storage.publish_every_iteration = every;
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("Invalid value for {}: {:?} ({})", key, raw, e)),
        _ => Ok(None),
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(eyre!("Invalid value for {}: {:?} (expected true or false)", key, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.server.health_route, "/health_check");
        assert_eq!(config.server.predict_route, "/predict");
        assert_eq!(config.server.workers, 1);
        assert_eq!(config.warmup.timeout_secs, 1200);
        assert!(config.warmup.enabled);
        assert!(config.storage.export_bucket.is_empty());
        assert_eq!(config.engine.model_artifacts, "gs://ltx_text_us");
        assert_eq!(config.engine.command, "pixray-step");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "server:\n  port: 9000\n  response_mode: file\nwarmup:\n  fail_closed: true\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.response_mode, ResponseMode::File);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.warmup.fail_closed);
        assert_eq!(config.warmup.grace_secs, 5);
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("AIP_HEALTH_ROUTE", "/healthz"),
                ("AIP_PREDICT_ROUTE", "/v1/predict"),
                ("AIP_STORAGE_URI", "gs://weights"),
                ("EXPORT_BUCKET", "my-bucket"),
                ("VERTEX_HOST", "127.0.0.1"),
                ("VERTEX_PORT", "9090"),
                ("WORKERS", "2"),
                ("WARMUP_TIMEOUT_SECS", "30"),
                ("WARMUP_ENABLED", "false"),
                ("PREDICT_RESPONSE", "file"),
                ("MAX_STEPS", "500"),
                ("PUBLISH_EVERY_ITERATION", "1"),
            ]))
            .unwrap();

        assert_eq!(config.server.routes(), RouteConfig::new("/healthz", "/v1/predict"));
        assert_eq!(config.engine.model_artifacts, "gs://weights");
        assert_eq!(config.storage.export_bucket, "my-bucket");
        assert_eq!(config.server.bind_addr(), "127.0.0.1:9090");
        assert_eq!(config.server.workers, 2);
        assert_eq!(config.warmup.supervisor().deadline, Duration::from_secs(30));
        assert!(!config.warmup.enabled);
        assert_eq!(config.server.response_mode, ResponseMode::File);
        assert_eq!(config.engine.max_steps, Some(500));
        assert!(config.storage.publish_every_iteration);
    }

    #[test]
    fn test_port_fallback() {
        let mut config = Config::default();
        config.apply_env(env(&[("AIP_HTTP_PORT", "7080")])).unwrap();
        assert_eq!(config.server.port, 7080);

        let mut config = Config::default();
        config
            .apply_env(env(&[("AIP_HTTP_PORT", "7080"), ("VERTEX_PORT", "6080")]))
            .unwrap();
        assert_eq!(config.server.port, 6080);
    }

    #[test]
    fn test_empty_bucket_disables_publishing() {
        let mut config = Config::default();
        config.storage.export_bucket = "from-file".to_string();
        config.apply_env(env(&[("EXPORT_BUCKET", "")])).unwrap();
        assert!(config.storage.export_bucket.is_empty());
    }

    #[test]
    fn test_invalid_env_values_rejected() {
        for (key, value) in [
            ("VERTEX_PORT", "eighty"),
            ("WORKERS", "0"),
            ("WARMUP_FAIL_CLOSED", "maybe"),
            ("PREDICT_RESPONSE", "xml"),
        ] {
            let mut config = Config::default();
            assert!(config.apply_env(env(&[(key, value)])).is_err(), "{}={} accepted", key, value);
        }
    }

    #[test]
    fn test_work_dir_layout() {
        let mut config = Config::default();
        config.apply_env(env(&[("GENSERVE_WORK_DIR", "/srv/genserve")])).unwrap();
        assert_eq!(config.storage.snapshots_dir(), PathBuf::from("/srv/genserve/snapshots"));
        assert_eq!(config.storage.jobs_dir(), PathBuf::from("/srv/genserve/jobs"));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("genserve.yml");
        fs::write(&path, "log_level: debug\nengine:\n  command: /opt/engine/step\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.engine.command, "/opt/engine/step");
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let missing = PathBuf::from("/nonexistent/genserve.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }
}
