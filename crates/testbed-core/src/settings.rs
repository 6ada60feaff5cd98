//! Harness settings.
//!
//! Settings are loaded from multiple sources with the following priority:
//!
//! 1. Environment variables (`TESTBED_*`, nested keys separated by `__`)
//! 2. Settings file (`testbed.toml` in the working directory, or an explicit path)
//! 3. Default values
//!
//! ## Example Settings File
//!
//! ```toml
//! root_dir_env = "SERVICE_ROOT_DIR"
//!
//! [layout]
//! template = "service.conf.template"
//! env_template = "service-env.sh.template"
//!
//! [keys]
//! port = "server.webserver.httpPort"
//! storage_path = "entity.store.kv.rocksdbBackend.storagePath"
//!
//! [ports]
//! service = { start = 2000, end = 3000 }
//!
//! [readiness]
//! startup_timeout_secs = 60
//! ```
//!
//! `TESTBED_READINESS__STARTUP_TIMEOUT_SECS=30` overrides the last value.

use crate::error::{HarnessError, Result};
use crate::port::PortRange;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file name, looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "testbed.toml";

/// Environment variable prefix for settings overrides.
pub const ENV_PREFIX: &str = "TESTBED_";

/// Top-level harness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    /// Explicit root directory; wins over `root_dir_env` when set.
    pub root_dir: Option<PathBuf>,
    /// Environment variable naming the service root directory.
    pub root_dir_env: String,
    /// Template and generated file names.
    pub layout: LayoutSettings,
    /// Configuration keys the harness writes.
    pub keys: KeySettings,
    /// Port ranges.
    pub ports: PortSettings,
    /// Scratch locations for generated files and backend storage.
    pub scratch: ScratchSettings,
    /// Readiness probing and timing.
    pub readiness: ReadinessSettings,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            root_dir: None,
            root_dir_env: "SERVICE_ROOT_DIR".to_string(),
            layout: LayoutSettings::default(),
            keys: KeySettings::default(),
            ports: PortSettings::default(),
            scratch: ScratchSettings::default(),
            readiness: ReadinessSettings::default(),
        }
    }
}

impl HarnessSettings {
    /// Loads settings from `testbed.toml` (if present) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    pub fn load() -> Result<Self> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(DEFAULT_SETTINGS_FILE))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Loads settings from a specific file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(HarnessError::config(format!(
                "settings file not found: {}",
                path.display()
            )));
        }

        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    fn extract(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| HarnessError::config(format!("invalid settings: {e}")))
    }

    /// Resolves the service root directory.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if neither `root_dir` nor the root
    /// environment variable is set, or if the path is not a directory.
    pub fn resolve_root_dir(&self) -> Result<PathBuf> {
        let root = match &self.root_dir {
            Some(dir) => dir.clone(),
            None => std::env::var_os(&self.root_dir_env)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| {
                    HarnessError::config(format!(
                        "environment variable {} is not set",
                        self.root_dir_env
                    ))
                })?,
        };

        if !root.is_dir() {
            return Err(HarnessError::config(format!(
                "service root directory does not exist: {}",
                root.display()
            )));
        }

        Ok(root)
    }
}

/// Template and generated file layout under the root directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSettings {
    /// Directory under the root holding templates.
    pub conf_dir: String,
    /// Configuration template file name.
    pub template: String,
    /// Generated configuration file name.
    pub conf_file: String,
    /// Optional environment template, copied verbatim when set.
    pub env_template: Option<String>,
    /// Generated environment file name.
    pub env_file: String,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            conf_dir: "conf".to_string(),
            template: "service.conf.template".to_string(),
            conf_file: "service.conf".to_string(),
            env_template: None,
            env_file: "service-env.sh".to_string(),
        }
    }
}

impl LayoutSettings {
    /// Returns the template path under `root`.
    #[must_use]
    pub fn template_path(&self, root: &Path) -> PathBuf {
        root.join(&self.conf_dir).join(&self.template)
    }

    /// Returns the environment template path under `root`, if configured.
    #[must_use]
    pub fn env_template_path(&self, root: &Path) -> Option<PathBuf> {
        self.env_template
            .as_ref()
            .map(|name| root.join(&self.conf_dir).join(name))
    }
}

/// Configuration keys written by the harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    /// Key holding the bind host.
    pub host: String,
    /// Key holding the HTTP port.
    pub port: String,
    /// Key holding the backend storage path.
    pub storage_path: String,
    /// Prefix for auxiliary service keys.
    pub aux_prefix: String,
    /// Suffix for an auxiliary service's port key.
    pub aux_port_suffix: String,
    /// Suffix for an auxiliary service's classpath key.
    pub aux_classpath_suffix: String,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            host: "server.webserver.host".to_string(),
            port: "server.webserver.httpPort".to_string(),
            storage_path: "entity.store.kv.rocksdbBackend.storagePath".to_string(),
            aux_prefix: "server.auxService.".to_string(),
            aux_port_suffix: "httpPort".to_string(),
            aux_classpath_suffix: "classpath".to_string(),
        }
    }
}

impl KeySettings {
    /// Returns the port key for an auxiliary service.
    #[must_use]
    pub fn aux_port_key(&self, service: &str) -> String {
        format!("{}{}.{}", self.aux_prefix, service, self.aux_port_suffix)
    }

    /// Returns the classpath key for an auxiliary service.
    #[must_use]
    pub fn aux_classpath_key(&self, service: &str) -> String {
        format!("{}{}.{}", self.aux_prefix, service, self.aux_classpath_suffix)
    }
}

/// Port ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// Range for the service's own HTTP port.
    pub service: PortRange,
    /// Range for auxiliary service ports.
    pub auxiliary: PortRange,
    /// Maximum number of ports probed per allocation.
    pub max_attempts: usize,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            service: PortRange::new(2000, 3000),
            auxiliary: PortRange::new(3000, 4000),
            max_attempts: 64,
        }
    }
}

/// Scratch locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchSettings {
    /// Parent of per-instance directories and storage paths.
    pub base_dir: PathBuf,
    /// Prefix of generated backend storage directories.
    pub storage_prefix: String,
}

impl Default for ScratchSettings {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir(),
            storage_prefix: "service-".to_string(),
        }
    }
}

/// Readiness probing and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    /// Host used when the configuration does not name one.
    pub host: String,
    /// Relative path of the health endpoint.
    pub health_path: String,
    /// Delay between probes in milliseconds.
    pub poll_interval_ms: u64,
    /// Deadline for the service to become healthy, in seconds.
    pub startup_timeout_secs: u64,
    /// Deadline for the service to stop answering, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Timeout of a single probe request in milliseconds.
    pub request_timeout_ms: u64,
    /// Grace period between the stop signal and forced reclamation, in milliseconds.
    pub stop_grace_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            health_path: "api/version".to_string(),
            poll_interval_ms: 500,
            startup_timeout_secs: 180,
            shutdown_timeout_secs: 180,
            request_timeout_ms: 2_000,
            stop_grace_ms: 500,
        }
    }
}

impl ReadinessSettings {
    /// Delay between probes.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Deadline for becoming healthy.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Deadline for becoming unhealthy after a stop request.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Timeout of a single probe request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Grace period before forced reclamation.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}
