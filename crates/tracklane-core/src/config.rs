use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    model::{BitDepth, DEFAULT_BPM, DEFAULT_LOOP_END_SECONDS},
    transport::{DEFAULT_HORIZON_SECONDS, DEFAULT_LOOKAHEAD_SECONDS, SchedulerTiming},
    validate::ValidationPolicy,
};

pub const CONFIG_FILE_NAME: &str = "tracklane.config.toml";
pub const CONFIG_PATH_ENV: &str = "TRACKLANE_CONFIG_PATH";
pub const DEFAULT_LOG_FILTER: &str = "info,tracklane_core=debug";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub transport: TransportConfig,
    pub export: ExportConfig,
    pub validation: ValidationPolicy,
    pub diagnostics: DiagnosticsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub default_bpm: f64,
    pub default_loop_start_seconds: f64,
    pub default_loop_end_seconds: f64,
    pub lookahead_seconds: f64,
    pub horizon_seconds: f64,
}

impl TransportConfig {
    #[must_use]
    pub fn timing(&self) -> SchedulerTiming {
        SchedulerTiming {
            lookahead_seconds: self.lookahead_seconds,
            horizon_seconds: self.horizon_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    pub default_bit_depth: BitDepth,
    pub dither: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub logs_dir: PathBuf,
    pub library_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_bpm: DEFAULT_BPM,
            default_loop_start_seconds: 0.0,
            default_loop_end_seconds: DEFAULT_LOOP_END_SECONDS,
            lookahead_seconds: DEFAULT_LOOKAHEAD_SECONDS,
            horizon_seconds: DEFAULT_HORIZON_SECONDS,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_bit_depth: BitDepth::Pcm16,
            dither: true,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: "tracklane".to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            library_dir: PathBuf::from("data/library"),
            export_dir: PathBuf::from("data/exports"),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Loads the discovered config file, or defaults when there is none or
    /// it cannot be parsed.
    #[must_use]
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "using default engine config");
                Self::default()
            }
        }
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| Path::new(path).is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}
