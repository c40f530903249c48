//! Configuration (C9) — layered startup config: CLI/env > TOML file >
//! built-in defaults, mirroring the teacher's `DaemonConfig::new()`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::error;

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOG: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    User,
    System,
}

impl Scope {
    fn default_data_dir(self) -> PathBuf {
        match self {
            Scope::User => dirs_data_dir(),
            Scope::System => PathBuf::from("/var/lib/provman"),
        }
    }
}

fn dirs_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".provman")
}

/// `{config_dir}/provman/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var > TOML > built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    data_dir: Option<PathBuf>,
    idle_timeout_secs: Option<u64>,
    log: Option<String>,
}

fn config_file_path(scope: Scope) -> PathBuf {
    match scope {
        Scope::User => std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| dirs_data_dir().join(".config"))
            .join("provman")
            .join("config.toml"),
        Scope::System => PathBuf::from("/etc/provman/config.toml"),
    }
}

fn load_toml(scope: Scope) -> TomlConfig {
    let path = config_file_path(scope);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return TomlConfig::default(),
    };
    match toml::from_str(&contents) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to parse config.toml, using defaults");
            TomlConfig::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvmanConfig {
    pub scope: Scope,
    pub data_dir: PathBuf,
    pub idle_timeout_secs: u64,
    pub log: String,
}

impl ProvmanConfig {
    /// Builds config from CLI args + env vars + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI flags, passed in as `Some(value)`
    ///   2. `PROVMAN_*` environment variables
    ///   3. TOML file at `config_file_path(scope)`
    ///   4. Built-in defaults
    pub fn new(scope: Scope, data_dir: Option<PathBuf>, idle_timeout_secs: Option<u64>, log: Option<String>) -> Self {
        let toml = load_toml(scope);

        let data_dir = data_dir
            .or_else(|| std::env::var("PROVMAN_DATA_DIR").ok().map(PathBuf::from))
            .or(toml.data_dir)
            .unwrap_or_else(|| scope.default_data_dir());

        let idle_timeout_secs = idle_timeout_secs
            .or_else(|| {
                std::env::var("PROVMAN_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .or(toml.idle_timeout_secs)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);

        let log = log
            .or_else(|| std::env::var("PROVMAN_LOG").ok())
            .or(toml.log)
            .unwrap_or_else(|| DEFAULT_LOG.to_string());

        Self {
            scope,
            data_dir,
            idle_timeout_secs,
            log,
        }
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_secs)
    }
}

pub fn ensure_data_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
