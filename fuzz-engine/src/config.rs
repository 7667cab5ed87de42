use std::{env, path::PathBuf};

use scenario_fuzz_core::{ConfigError, RangeConfiguration};

pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 1;
pub const DEFAULT_EVALUATION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RESTART_GAP: usize = 5;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 3;
pub const DEFAULT_PROGRESS_WINDOW: usize = 10;
pub const DEFAULT_SIMULATOR_STARTUP_SECS: u64 = 5;
pub const DEFAULT_DATA_DIR: &str = "output";

/// Process-wide engine settings, read once from the environment.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_concurrent_runs: usize,
    pub evaluation_timeout_secs: u64,
    /// Proactive simulator restart interval in evaluations; 0 disables it.
    pub restart_gap: usize,
    pub max_consecutive_failures: usize,
    pub progress_window: usize,
    pub simulator_startup_secs: u64,
    pub data_dir: PathBuf,
    pub ranges_file: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            evaluation_timeout_secs: DEFAULT_EVALUATION_TIMEOUT_SECS,
            restart_gap: DEFAULT_RESTART_GAP,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            progress_window: DEFAULT_PROGRESS_WINDOW,
            simulator_startup_secs: DEFAULT_SIMULATOR_STARTUP_SECS,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            ranges_file: None,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        Self {
            max_concurrent_runs: read_env_usize(
                "FUZZ_MAX_CONCURRENT_RUNS",
                DEFAULT_MAX_CONCURRENT_RUNS,
            ),
            evaluation_timeout_secs: read_env_u64(
                "FUZZ_TIMEOUT_SECS",
                DEFAULT_EVALUATION_TIMEOUT_SECS,
            ),
            restart_gap: read_env_usize_allow_zero("FUZZ_RESTART_GAP", DEFAULT_RESTART_GAP),
            max_consecutive_failures: read_env_usize(
                "FUZZ_MAX_CONSECUTIVE_FAILURES",
                DEFAULT_MAX_CONSECUTIVE_FAILURES,
            ),
            progress_window: read_env_usize("FUZZ_PROGRESS_WINDOW", DEFAULT_PROGRESS_WINDOW),
            simulator_startup_secs: read_env_u64_allow_zero(
                "FUZZ_SIMULATOR_STARTUP_SECS",
                DEFAULT_SIMULATOR_STARTUP_SECS,
            ),
            data_dir: env::var("FUZZ_DATA_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            ranges_file: env::var("FUZZ_RANGES_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Range configuration from `ranges_file`, or the built-in defaults when unset.
    pub fn load_ranges(&self) -> Result<RangeConfiguration, ConfigError> {
        match &self.ranges_file {
            Some(path) => RangeConfiguration::load(path),
            None => {
                tracing::info!("no range configuration file set, using built-in defaults");
                Ok(RangeConfiguration::builtin())
            }
        }
    }
}

pub fn read_env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub fn read_env_usize_allow_zero(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

pub fn read_env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub fn read_env_u64_allow_zero(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}
