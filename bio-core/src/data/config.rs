//! Configuration management
//!
//! The daemon configuration names the default device and carries an opaque
//! tree that is handed untouched to the device's descriptor.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::{config as limits, devices};
use crate::error::{BiometryError, Result};

/// Opaque key/value tree consumed by `Descriptor::create`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(serde_json::Map<String, serde_json::Value>);

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value, which must be an object
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(map)),
            other => Err(BiometryError::InvalidConfig {
                field: "config".into(),
                reason: format!("expected an object, got {}", other),
            }),
        }
    }

    /// Builder style insertion, mostly for tests and embedders
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(serde_json::Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(serde_json::Value::as_bool)
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }

    /// Nested subtree, if the key holds an object
    pub fn child(&self, key: &str) -> Option<Configuration> {
        match self.0.get(key) {
            Some(serde_json::Value::Object(map)) => Some(Self(map.clone())),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone())
    }
}

fn default_device_id() -> String {
    devices::DUMMY.to_string()
}

/// Which device the service exposes as its default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultDeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: String,
    #[serde(default)]
    pub config: Configuration,
}

impl Default for DefaultDeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            config: Configuration::new(),
        }
    }
}

/// Top level daemon configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    #[serde(default)]
    pub default_device: DefaultDeviceConfig,
}

impl DaemonConfig {
    /// Load from a file. A missing file yields the default configuration;
    /// an unreadable or malformed one is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let metadata = fs::metadata(path).map_err(|e| {
            BiometryError::configuration_caused_by(format!("Cannot stat {}", path.display()), e)
        })?;
        if metadata.len() > limits::MAX_CONFIG_SIZE {
            return Err(BiometryError::configuration(format!(
                "{} exceeds maximum size of {} bytes",
                path.display(),
                limits::MAX_CONFIG_SIZE
            )));
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            BiometryError::configuration_caused_by(
                format!("Could not read {}", path.display()),
                BiometryError::FileRead {
                    path: path.to_path_buf(),
                    source: e,
                },
            )
        })?;

        let config = Self::parse(&contents).map_err(|e| {
            BiometryError::configuration_caused_by(format!("Could not parse {}", path.display()), e)
        })?;

        info!(
            "Loaded configuration from {:?} (default device: {})",
            path, config.default_device.id
        );
        Ok(config)
    }

    /// Parse from a JSON document
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents)?;
        if config.default_device.id.trim().is_empty() {
            return Err(BiometryError::InvalidConfig {
                field: "defaultDevice.id".into(),
                reason: "must not be empty".into(),
            });
        }
        Ok(config)
    }
}
