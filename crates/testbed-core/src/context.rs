//! Caller-supplied instance context.

use std::collections::BTreeMap;

/// Per-instance overrides supplied by the test.
///
/// Overrides are written verbatim into the materialized configuration and
/// win over every computed or template value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceContext {
    overrides: BTreeMap<String, String>,
    auxiliary_services: Vec<AuxiliaryService>,
}

impl InstanceContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a configuration override.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Adds several configuration overrides.
    #[must_use]
    pub fn with_overrides<K, V>(mut self, overrides: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.overrides
            .extend(overrides.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Declares an auxiliary service that needs its own port.
    #[must_use]
    pub fn with_auxiliary_service(mut self, service: AuxiliaryService) -> Self {
        self.auxiliary_services.push(service);
        self
    }

    /// Caller overrides, keyed by configuration key.
    #[must_use]
    pub const fn overrides(&self) -> &BTreeMap<String, String> {
        &self.overrides
    }

    /// Declared auxiliary services.
    #[must_use]
    pub fn auxiliary_services(&self) -> &[AuxiliaryService] {
        &self.auxiliary_services
    }
}

/// An auxiliary service hosted alongside the main one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryService {
    name: String,
    classpath: Vec<String>,
}

impl AuxiliaryService {
    /// Creates an auxiliary service entry.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classpath: Vec::new(),
        }
    }

    /// Sets the classpath entries, joined with `,` in the configuration.
    #[must_use]
    pub fn with_classpath<S: Into<String>>(mut self, entries: impl IntoIterator<Item = S>) -> Self {
        self.classpath = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Service name used in its configuration keys.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Classpath entries.
    #[must_use]
    pub fn classpath(&self) -> &[String] {
        &self.classpath
    }
}
