//! Materialization of the per-instance runtime configuration.
//!
//! Layering, lowest to highest precedence:
//!
//! ```text
//!   template defaults  <  computed (port, storage path, aux ports)  <  caller overrides
//! ```
//!
//! The root directory and template are validated before any port is
//! allocated, so a misconfigured environment fails without touching the
//! network or the scratch directory.

use crate::context::InstanceContext;
use crate::error::{HarnessError, Result};
use crate::port::{PortAllocator, PortLease};
use crate::settings::HarnessSettings;
use crate::template::ConfigTemplate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Prefix of per-instance private directories.
pub const INSTANCE_DIR_PREFIX: &str = "testbed-";

/// The concrete configuration one instance runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    entries: BTreeMap<String, String>,
    host: String,
    port: u16,
    storage_path: PathBuf,
    instance_dir: PathBuf,
    conf_file: PathBuf,
    env_file: Option<PathBuf>,
    auxiliary_ports: BTreeMap<String, u16>,
}

impl RuntimeConfig {
    /// All materialized entries.
    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Looks up a materialized value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Host the service listens on.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the service listens on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Backend storage path.
    #[must_use]
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Private directory holding the generated files.
    #[must_use]
    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    /// Generated configuration file passed to the entry point.
    #[must_use]
    pub fn conf_file(&self) -> &Path {
        &self.conf_file
    }

    /// Generated environment file, if an environment template is configured.
    #[must_use]
    pub fn env_file(&self) -> Option<&Path> {
        self.env_file.as_deref()
    }

    /// Ports assigned to auxiliary services, by service name.
    #[must_use]
    pub const fn auxiliary_ports(&self) -> &BTreeMap<String, u16> {
        &self.auxiliary_ports
    }

    /// Base URL of the service, `http://host:port`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// A materialized configuration together with the port leases backing it.
#[derive(Debug)]
pub struct Materialized {
    /// The runtime configuration.
    pub config: RuntimeConfig,
    /// Leases for every port written into the configuration.
    pub leases: Vec<PortLease>,
}

impl Materialized {
    /// Closes every probing listener so the service can bind.
    pub fn release_reservations(&mut self) {
        for lease in &mut self.leases {
            lease.release_socket();
        }
    }
}

/// Produces runtime configurations from the service templates.
#[derive(Debug, Clone)]
pub struct ConfigMaterializer<'a> {
    settings: &'a HarnessSettings,
}

impl<'a> ConfigMaterializer<'a> {
    /// Creates a materializer bound to `settings`.
    #[must_use]
    pub const fn new(settings: &'a HarnessSettings) -> Self {
        Self { settings }
    }

    /// Materializes the configuration for a new instance.
    ///
    /// Writes the generated configuration (and environment file, if
    /// configured) into a fresh private directory under the scratch base.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if the root directory or a template is
    /// missing, an override conflicts with a computed key, or the output
    /// location is not writable. Returns [`HarnessError::NoAvailablePort`] if
    /// a port range is exhausted.
    pub fn materialize(&self, context: &InstanceContext) -> Result<Materialized> {
        let settings = self.settings;
        let root = settings.resolve_root_dir()?;

        let template_path = settings.layout.template_path(&root);
        let template_text = std::fs::read_to_string(&template_path).map_err(|e| {
            HarnessError::config(format!(
                "failed to read template {}: {e}",
                template_path.display()
            ))
        })?;
        let template = ConfigTemplate::parse(&template_text);

        let env_template = match settings.layout.env_template_path(&root) {
            Some(path) if !path.is_file() => {
                return Err(HarnessError::config(format!(
                    "environment template not found: {}",
                    path.display()
                )));
            }
            other => other,
        };

        let keys = &settings.keys;
        let mut leases = Vec::new();
        let mut computed = BTreeMap::new();

        let service_port = PortAllocator::new(settings.ports.service, settings.ports.max_attempts)
            .allocate()?;
        computed.insert(keys.port.clone(), service_port.port().to_string());
        leases.push(service_port);

        let storage_path = settings
            .scratch
            .base_dir
            .join(format!("{}{}", settings.scratch.storage_prefix, Uuid::new_v4()));
        computed.insert(
            keys.storage_path.clone(),
            storage_path.to_string_lossy().into_owned(),
        );

        let mut auxiliary_ports = BTreeMap::new();
        let aux_allocator =
            PortAllocator::new(settings.ports.auxiliary, settings.ports.max_attempts);
        for service in context.auxiliary_services() {
            let lease = aux_allocator.allocate()?;
            computed.insert(keys.aux_port_key(service.name()), lease.port().to_string());
            if !service.classpath().is_empty() {
                computed.insert(
                    keys.aux_classpath_key(service.name()),
                    service.classpath().join(","),
                );
            }
            auxiliary_ports.insert(service.name().to_string(), lease.port());
            leases.push(lease);
        }

        let template_entries = template.entries();
        if !template_entries.contains_key(&keys.host) {
            computed.insert(keys.host.clone(), settings.readiness.host.clone());
        }

        // Caller overrides go last and win.
        let mut overrides = computed;
        overrides.extend(
            context
                .overrides()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let mut entries = template_entries;
        entries.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        let host = entries
            .get(&keys.host)
            .filter(|host| !host.is_empty())
            .cloned()
            .unwrap_or_else(|| settings.readiness.host.clone());
        let port = parse_port(&keys.port, entries.get(&keys.port))?;
        let storage_path = entries
            .get(&keys.storage_path)
            .map_or(storage_path, PathBuf::from);
        for (name, aux_port) in &mut auxiliary_ports {
            let key = keys.aux_port_key(name);
            *aux_port = parse_port(&key, entries.get(&key))?;
        }

        // The backend must start from empty storage.
        match std::fs::remove_dir_all(&storage_path) {
            Ok(()) => tracing::debug!(path = %storage_path.display(), "removed stale storage"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HarnessError::config(format!(
                    "failed to clear storage path {}: {e}",
                    storage_path.display()
                )));
            }
        }

        let instance_dir = create_instance_dir(&settings.scratch.base_dir)?;
        let written =
            write_instance_files(settings, &instance_dir, &template, &overrides, env_template);
        let (conf_file, env_file) = match written {
            Ok(files) => files,
            Err(e) => {
                if let Err(rm) = std::fs::remove_dir_all(&instance_dir) {
                    tracing::warn!(path = %instance_dir.display(), "cleanup failed: {}", rm);
                }
                return Err(e);
            }
        };

        tracing::info!(
            port,
            storage = %storage_path.display(),
            config = %conf_file.display(),
            "materialized runtime configuration"
        );

        Ok(Materialized {
            config: RuntimeConfig {
                entries,
                host,
                port,
                storage_path,
                instance_dir,
                conf_file,
                env_file,
                auxiliary_ports,
            },
            leases,
        })
    }
}

fn parse_port(key: &str, value: Option<&String>) -> Result<u16> {
    let value = value.ok_or_else(|| HarnessError::config(format!("missing value for {key}")))?;
    value.trim().parse::<u16>().map_err(|_| {
        HarnessError::config(format!("{key} must be a port number, got '{value}'"))
    })
}

fn create_instance_dir(base: &Path) -> Result<PathBuf> {
    let dir = base.join(format!("{INSTANCE_DIR_PREFIX}{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).map_err(|e| {
        HarnessError::config(format!(
            "failed to create instance directory {}: {e}",
            dir.display()
        ))
    })?;
    Ok(dir)
}

fn write_instance_files(
    settings: &HarnessSettings,
    instance_dir: &Path,
    template: &ConfigTemplate,
    overrides: &BTreeMap<String, String>,
    env_template: Option<PathBuf>,
) -> Result<(PathBuf, Option<PathBuf>)> {
    let conf_file = instance_dir.join(&settings.layout.conf_file);
    write_output(&conf_file, template.render(overrides).as_bytes())?;

    let Some(source) = env_template else {
        return Ok((conf_file, None));
    };
    let target = instance_dir.join(&settings.layout.env_file);
    std::fs::copy(&source, &target).map_err(|e| {
        HarnessError::config(format!(
            "failed to copy {} to {}: {e}",
            source.display(),
            target.display()
        ))
    })?;
    Ok((conf_file, Some(target)))
}

fn write_output(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| {
        HarnessError::config(format!("failed to write {}: {e}", path.display()))
    })
}
