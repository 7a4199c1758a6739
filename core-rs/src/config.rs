/**
 * config.rs
 * Framework launch configuration (YAML format)
 *
 * Format:
 * ```yaml
 * apiVersion: kf/v1
 * kind: Framework
 * storageDir: /var/lib/kf
 * storageClean: none            # or onFirstInit
 * systemPackages: org.osgi.framework;version=1.6
 * logLevel: info
 * properties:
 *   app.name: demo
 * ```
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{FrameworkError, Result};
use crate::manifest::parse_export_list;

pub const API_VERSION: &str = "kf/v1";
pub const KIND: &str = "Framework";

/// Spec version reported through `org.osgi.framework.version`
pub const FRAMEWORK_VERSION: &str = "1.6.0";
pub const FRAMEWORK_VENDOR: &str = "Knopflerfish";

pub const PROP_FRAMEWORK_VERSION: &str = "org.osgi.framework.version";
pub const PROP_FRAMEWORK_VENDOR: &str = "org.osgi.framework.vendor";
pub const PROP_FRAMEWORK_STORAGE: &str = "org.osgi.framework.storage";

/// Packages the system bundle exports when none are configured
pub const DEFAULT_SYSTEM_PACKAGES: &str = "org.osgi.framework;version=1.6,org.osgi.framework.wiring;version=1.0";

/// When to wipe the storage directory
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum StorageClean {
    #[default]
    None,
    /// Wipe the first time the framework is initialized
    OnFirstInit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkConfig {
    pub api_version: String,
    pub kind: String,
    pub storage_dir: PathBuf,
    #[serde(default)]
    pub storage_clean: StorageClean,
    #[serde(default = "default_system_packages")]
    pub system_packages: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

fn default_system_packages() -> String {
    DEFAULT_SYSTEM_PACKAGES.to_string()
}

impl FrameworkConfig {
    /// Configuration with defaults for a storage directory
    pub fn default_for<P: AsRef<Path>>(storage_dir: P) -> Self {
        FrameworkConfig {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            storage_dir: storage_dir.as_ref().to_path_buf(),
            storage_clean: StorageClean::None,
            system_packages: default_system_packages(),
            properties: BTreeMap::new(),
            log_level: None,
        }
    }

    /// Load and validate a configuration file
    ///
    /// A relative `storageDir` is taken relative to the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FrameworkError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)?;
        let mut config: FrameworkConfig = serde_yaml::from_str(&content)
            .map_err(|e| FrameworkError::Config(format!("Invalid configuration YAML: {}", e)))?;

        if config.storage_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.storage_dir = parent.join(&config.storage_dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path.as_ref(), yaml)?;
        Ok(())
    }

    /// Ensures:
    /// - apiVersion is "kf/v1" and kind is "Framework"
    /// - storageDir is set
    /// - systemPackages parses as an Export-Package value
    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            return Err(FrameworkError::Config(format!(
                "Invalid apiVersion: expected '{}', got '{}'",
                API_VERSION, self.api_version
            )));
        }

        if self.kind != KIND {
            return Err(FrameworkError::Config(format!(
                "Invalid kind: expected '{}', got '{}'",
                KIND, self.kind
            )));
        }

        if self.storage_dir.as_os_str().is_empty() {
            return Err(FrameworkError::Config("storageDir cannot be empty".to_string()));
        }

        parse_export_list(&self.system_packages)
            .map_err(|e| FrameworkError::Config(format!("Invalid systemPackages: {}", e)))?;

        Ok(())
    }

    /// Configured properties plus the ones the framework always defines
    pub fn framework_properties(&self) -> BTreeMap<String, String> {
        let mut props = self.properties.clone();
        props.insert(PROP_FRAMEWORK_VERSION.to_string(), FRAMEWORK_VERSION.to_string());
        props.insert(PROP_FRAMEWORK_VENDOR.to_string(), FRAMEWORK_VENDOR.to_string());
        props.insert(
            PROP_FRAMEWORK_STORAGE.to_string(),
            self.storage_dir.to_string_lossy().to_string(),
        );
        props
    }
}
