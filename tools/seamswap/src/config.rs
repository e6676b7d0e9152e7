use crate::backends::BackendKind;
use crate::errors::SeamError;
use crate::logging::{JsonlLogger, DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_ACQUIRE_LIMIT: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeamConfig {
    pub backends: BackendsConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BackendsConfig {
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    pub acquire_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for SeamConfig {
    fn default() -> Self {
        Self {
            backends: BackendsConfig::default(),
            pool: PoolConfig {
                acquire_limit: DEFAULT_ACQUIRE_LIMIT,
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

impl SeamConfig {
    /// Disabled backend names, parsed. Unknown names are rejected by
    /// validation, so they never reach here from `load_config`.
    pub fn disabled_backends(&self) -> Vec<BackendKind> {
        self.backends
            .disabled
            .iter()
            .filter_map(|name| BackendKind::parse(name))
            .collect()
    }

    pub fn enabled_backends(&self) -> Vec<BackendKind> {
        let disabled = self.disabled_backends();
        BackendKind::ALL
            .into_iter()
            .filter(|kind| !disabled.contains(kind))
            .collect()
    }

    pub fn run_logger(&self) -> Option<JsonlLogger> {
        self.logging.path.as_ref().map(|path| JsonlLogger {
            path: path.clone(),
            max_payload_bytes: self.logging.max_payload_bytes,
            budget_bytes: self.logging.budget_bytes,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSeamConfig {
    backends: Option<PartialBackendsConfig>,
    pool: Option<PartialPoolConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialBackendsConfig {
    disabled: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPoolConfig {
    acquire_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<SeamConfig, SeamError> {
    let mut cfg = SeamConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(&absolutize_path(process_cwd, path))?;
        let partial: PartialSeamConfig = toml::from_str(&file_contents)
            .map_err(|e| SeamError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);

    if let Some(path) = &cfg.logging.path {
        cfg.logging.path = Some(absolutize_path(process_cwd, path));
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut SeamConfig, partial: PartialSeamConfig) {
    if let Some(backends) = partial.backends {
        if let Some(disabled) = backends.disabled {
            cfg.backends.disabled = disabled;
        }
    }

    if let Some(pool) = partial.pool {
        if let Some(acquire_limit) = pool.acquire_limit {
            cfg.pool.acquire_limit = acquire_limit;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.path {
            cfg.logging.path = Some(path);
        }
        if let Some(max_payload_bytes) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = max_payload_bytes;
        }
        if let Some(budget_bytes) = logging.budget_bytes {
            cfg.logging.budget_bytes = budget_bytes;
        }
    }
}

fn apply_cli_overrides(cfg: &mut SeamConfig, overrides: &CliOverrides) {
    if let Some(log_path) = &overrides.log_path {
        cfg.logging.path = Some(log_path.clone());
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &SeamConfig) -> Result<(), SeamError> {
    if cfg.pool.acquire_limit == 0 {
        return Err(SeamError::InvalidConfig(
            "pool.acquire_limit must be greater than zero".to_string(),
        ));
    }

    if cfg.logging.max_payload_bytes == 0 {
        return Err(SeamError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }

    for name in &cfg.backends.disabled {
        if BackendKind::parse(name).is_none() {
            return Err(SeamError::InvalidConfig(format!(
                "backends.disabled names unknown backend `{name}`"
            )));
        }
    }

    Ok(())
}
