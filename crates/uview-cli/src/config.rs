//! Configuration for the `uview` CLI.
//!
//! Loaded from:
//! 1. `~/.uview/config.toml` (global)
//! 2. `.uview/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! Command-line flags override all of it; see `main.rs`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uview::Identity;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub identity: IdentityConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            identity: IdentityConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// The identity to impersonate. Negative ids and an empty group list mean
/// "inherit from the calling process's effective identity".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub uid: i64,
    pub gid: i64,
    pub groups: Vec<u32>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            uid: -1,
            gid: -1,
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// tracing filter directive, e.g. `warn` or `uview=debug`.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load the configuration from the standard locations relative to the
    /// current directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_for_project(Path::new("."))
    }

    /// Resolution order: global, then project, then environment.
    pub fn load_for_project(project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global) = dirs::home_dir().map(|h| h.join(".uview/config.toml")) {
            if global.exists() {
                debug!(path = %global.display(), "loading global config");
                let contents = std::fs::read_to_string(&global)?;
                config = toml::from_str(&contents)?;
            }
        }

        let project = project_root.join(".uview/config.toml");
        if project.exists() {
            debug!(path = %project.display(), "loading project config");
            let contents = std::fs::read_to_string(&project)?;
            let overlay: Config = toml::from_str(&contents)?;
            config.merge(overlay);
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Project values replace global ones when they differ from defaults.
    fn merge(&mut self, other: Config) {
        let default_identity = IdentityConfig::default();
        if other.identity.uid != default_identity.uid {
            self.identity.uid = other.identity.uid;
        }
        if other.identity.gid != default_identity.gid {
            self.identity.gid = other.identity.gid;
        }
        if !other.identity.groups.is_empty() {
            self.identity.groups = other.identity.groups;
        }

        if other.log.filter != LogConfig::default().filter {
            self.log.filter = other.log.filter;
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(uid) = std::env::var("UVIEW_UID") {
            if let Ok(n) = uid.parse() {
                self.identity.uid = n;
            }
        }
        if let Ok(gid) = std::env::var("UVIEW_GID") {
            if let Ok(n) = gid.parse() {
                self.identity.gid = n;
            }
        }
        if let Ok(groups) = std::env::var("UVIEW_GROUPS") {
            let parsed: Vec<u32> = groups
                .split(',')
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                self.identity.groups = parsed;
            }
        }
        if let Ok(filter) = std::env::var("UVIEW_LOG") {
            self.log.filter = filter;
        }
    }

    /// Resolve the configured identity, inheriting unset fields from the
    /// process.
    pub fn identity(&self) -> Identity {
        let mut builder = Identity::builder();
        if self.identity.uid >= 0 {
            builder = builder.uid(self.identity.uid as u32);
        }
        if self.identity.gid >= 0 {
            builder = builder.gid(self.identity.gid as u32);
        }
        if !self.identity.groups.is_empty() {
            builder = builder.groups(self.identity.groups.iter().copied());
        }
        builder.build()
    }

    /// Template written by `uview init`.
    pub fn init_toml() -> String {
        r#"# uview configuration
# Negative ids inherit from the calling process.

[identity]
uid = -1
gid = -1
# groups = [1001, 1002]

[log]
filter = "warn"
"#
        .to_string()
    }
}
