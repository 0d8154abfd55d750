//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use swarm_core::scheduler::{MAX_CANDIDATES, MAX_TRANSFERS_PER_ROLE};
use swarm_core::{CoreConfig, SchedulerConfig, DEFAULT_CHUNK_SIZE};

/// Server configuration. File: ~/.config/swarm/config.toml or /etc/swarm/config.toml,
/// or the path given with `--config`.
/// Env overrides: SWARM_HOST, SWARM_PORT, SWARM_STATS_PORT, SWARM_FILE_ROOT, SWARM_CHUNK_SIZE.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listen address for both the swarm port and the status page.
    pub host: String,
    /// Coordination TCP port (default 6000).
    pub port: u16,
    /// Status page HTTP port (default 6001, 0 disables it).
    pub stats_port: u16,
    /// Directory urls are resolved under.
    pub file_root: PathBuf,
    pub chunk_size: u64,
    pub tick_interval_ms: u64,
    pub stall_timeout_ticks: u64,
    pub max_transfers_per_role: usize,
    pub max_candidates: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6000,
            stats_port: 6001,
            file_root: PathBuf::from("."),
            chunk_size: DEFAULT_CHUNK_SIZE,
            tick_interval_ms: 1000,
            stall_timeout_ticks: swarm_core::core::DEFAULT_STALL_TIMEOUT_TICKS,
            max_transfers_per_role: MAX_TRANSFERS_PER_ROLE,
            max_candidates: MAX_CANDIDATES,
        }
    }
}

impl Config {
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            scheduler: SchedulerConfig {
                max_transfers_per_role: self.max_transfers_per_role,
                max_candidates: self.max_candidates,
            },
            stall_timeout_ticks: self.stall_timeout_ticks,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        if self.max_candidates == 0 {
            return Err(ConfigError::Invalid("max_candidates must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{var}={value} is not valid")]
    Env { var: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Load config: merge default, then config file (explicit path, else first default path that
/// exists), then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(path) => load_file(path)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => load_file(&path)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |var| std::env::var(var).ok())?;
    c.validate()?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/swarm/config.toml"));
    }
    out.push(PathBuf::from("/etc/swarm/config.toml"));
    out
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let c = toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
    fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::Env { var: name, value })
    }

    if let Some(v) = var("SWARM_HOST") {
        c.host = v;
    }
    if let Some(v) = var("SWARM_PORT") {
        c.port = parse("SWARM_PORT", v)?;
    }
    if let Some(v) = var("SWARM_STATS_PORT") {
        c.stats_port = parse("SWARM_STATS_PORT", v)?;
    }
    if let Some(v) = var("SWARM_FILE_ROOT") {
        c.file_root = PathBuf::from(v);
    }
    if let Some(v) = var("SWARM_CHUNK_SIZE") {
        c.chunk_size = parse("SWARM_CHUNK_SIZE", v)?;
    }
    Ok(())
}
