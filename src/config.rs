use std::path::PathBuf;

use serde::Deserialize;

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

impl Config {
    /// Load the configuration from the specified file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Config> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug)]
pub struct StoreConfig {
    /// Root directory holding the topic index and per-topic fixture trees
    #[serde(default = "default_materials_dir")]
    pub materials_dir: PathBuf,
    /// Scratch directory for materialized submissions; a per-user cache
    /// location is used when unset
    pub scratch_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            materials_dir: default_materials_dir(),
            scratch_dir: None,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct SandboxConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_base_image")]
    pub base_image: String,
    /// Interpreter argv prefix the submission file is appended to
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,
    /// Wall-clock budget for one sandboxed run
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: i64,
    #[serde(default = "default_nano_cpus")]
    pub nano_cpus: i64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            base_image: default_base_image(),
            interpreter: default_interpreter(),
            run_timeout_ms: default_run_timeout_ms(),
            memory_limit_bytes: default_memory_limit_bytes(),
            nano_cpus: default_nano_cpus(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct AdmissionConfig {
    /// Maximum checks one caller may start within the window
    #[serde(default = "default_max_checks")]
    pub max_checks: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_checks: default_max_checks(),
            window_secs: default_window_secs(),
        }
    }
}

/// Execution backend, selected at startup through configuration
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Throwaway images and containers driven over the local engine socket
    #[default]
    Docker,
    /// Plain subprocesses in a scratch directory; no security isolation
    Process,
}

fn default_materials_dir() -> PathBuf {
    PathBuf::from("materials")
}

fn default_base_image() -> String {
    "python:3.9-alpine".to_string()
}

fn default_interpreter() -> Vec<String> {
    vec!["python".to_string(), "-u".to_string()]
}

fn default_run_timeout_ms() -> u64 {
    10_000
}

fn default_memory_limit_bytes() -> i64 {
    256 * 1024 * 1024
}

fn default_nano_cpus() -> i64 {
    500_000_000
}

fn default_max_checks() -> u32 {
    2
}

fn default_window_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let raw = r#"
        {
            "store": { "materials_dir": "data/materials" },
            "sandbox": {
                "backend": "process",
                "base_image": "python:3.11-alpine",
                "run_timeout_ms": 2000
            },
            "admission": { "max_checks": 5 }
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.store.materials_dir, PathBuf::from("data/materials"));
        assert_eq!(config.sandbox.backend, BackendKind::Process);
        assert_eq!(config.sandbox.base_image, "python:3.11-alpine");
        assert_eq!(config.sandbox.run_timeout_ms, 2000);
        assert_eq!(config.admission.max_checks, 5);
        assert_eq!(config.admission.window_secs, 60);
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.sandbox.backend, BackendKind::Docker);
        assert_eq!(config.sandbox.base_image, "python:3.9-alpine");
        assert_eq!(config.admission.max_checks, 2);
    }
}
