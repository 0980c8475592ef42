//! Meshcore Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./meshcore.yaml` (current directory - highest priority)
//! 2. `~/.meshcore.yaml` (home directory)
//! 3. `~/.config/meshcore/meshcore.yaml` (user config directory)
//! 4. `/etc/meshcore/meshcore.yaml` (system - lowest priority)
//!
//! Files are merged key by key: a value from a higher priority file
//! overrides the same key of a lower priority file, and keys it does not
//! mention keep their lower priority values.
//!
//! # YAML Structure
//!
//! ```yaml
//! node:
//!   primary_address: 0x0001
//!   network_keys:
//!     - index: 0
//!       key: "7dd7364cd842ad18c17c2b820c84c3d6"
//! network:
//!   default_ttl: 5
//!   sar:
//!     segment_interval_ms: 60
//! bearer:
//!   udp:
//!     bind_addr: "0.0.0.0:4000"
//! manager:
//!   proxy_filter:
//!     type: reject_list
//!     addresses: [0x0005]
//! ```

mod bearer;
mod network;
mod node;

use crate::model::ModelError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use bearer::{BearerConfig, UdpConfig};
pub use network::{NetworkConfig, NetworkTransmitConfig, SarConfig};
pub use node::{
    ApplicationKeyConfig, ManagerConfig, NetworkKeyConfig, NodeConfig, StorageConfig,
};

/// Default config filename.
const CONFIG_FILENAME: &str = "meshcore.yaml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Local node (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// Network parameters (`network.*`).
    #[serde(default)]
    pub network: NetworkConfig,

    /// Bearer (`bearer.*`).
    #[serde(default)]
    pub bearer: BearerConfig,

    /// Persistence (`storage.*`).
    #[serde(default)]
    pub storage: StorageConfig,

    /// Event loop (`manager.*`).
    #[serde(default)]
    pub manager: ManagerConfig,
}

impl Config {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (config, paths_loaded) where paths_loaded contains
    /// the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut merged = serde_yaml::Value::Null;
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let value = Self::read_value(path)?;
                merge_values(&mut merged, value);
                loaded_paths.push(path.clone());
            }
        }

        let config = if merged.is_null() {
            Config::default()
        } else {
            serde_yaml::from_value(merged).map_err(|e| ConfigError::ParseYaml {
                path: loaded_paths.last().cloned().unwrap_or_default(),
                source: e,
            })?
        };
        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn read_value(path: &Path) -> Result<serde_yaml::Value, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        if contents.trim().is_empty() {
            return Ok(serde_yaml::Value::Null);
        }
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/meshcore").join(CONFIG_FILENAME));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("meshcore").join(CONFIG_FILENAME));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".meshcore.yaml"));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Each section of `other` that differs from its default replaces the
    /// corresponding section of `self`.
    pub fn merge(&mut self, other: Config) {
        if other.node != NodeConfig::default() {
            self.node = other.node;
        }
        if other.network != NetworkConfig::default() {
            self.network = other.network;
        }
        if other.bearer.udp != UdpConfig::default() {
            self.bearer.udp = other.bearer.udp;
        }
        let default_bearer = BearerConfig::default();
        if other.bearer.max_send_retries != default_bearer.max_send_retries
            || other.bearer.retry_base_ms != default_bearer.retry_base_ms
            || other.bearer.retry_max_ms != default_bearer.retry_max_ms
        {
            self.bearer.max_send_retries = other.bearer.max_send_retries;
            self.bearer.retry_base_ms = other.bearer.retry_base_ms;
            self.bearer.retry_max_ms = other.bearer.retry_max_ms;
        }
        if other.storage.path.is_some() {
            self.storage.path = other.storage.path;
        }
        if other.manager != ManagerConfig::default() {
            self.manager = other.manager;
        }
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let primary = self.node.primary_address;
        let last = u32::from(primary) + u32::from(self.node.element_count.max(1)) - 1;
        if primary == 0 || last > 0x7FFF {
            return Err(ConfigError::Invalid(format!(
                "unicast range 0x{:04X}..=0x{:04X} is outside 0x0001..=0x7FFF",
                primary, last
            )));
        }
        if self.manager.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("manager.tick_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Recursively merge `overlay` into `base`. Mappings merge key by key;
/// any other value replaces.
fn merge_values(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    use serde_yaml::Value;
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Address;
    use crate::proxy::ProxyFilterSetup;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config() {
        let config = Config::new();
        assert_eq!(config.network.default_ttl, 5);
        assert!(config.storage.path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml_empty() {
        let yaml = "";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_yaml_partial() {
        let yaml = r#"
network:
  sar:
    segment_interval_ms: 100
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.network.sar.segment_interval_ms, 100);
        assert_eq!(config.network.sar.discard_timeout_ms, 10_000);
        assert_eq!(config.network.default_ttl, 5);
    }

    #[test]
    fn test_parse_node_keys() {
        let yaml = r#"
node:
  primary_address: 0x0010
  element_count: 2
  network_keys:
    - index: 0
      key: "7dd7364cd842ad18c17c2b820c84c3d6"
  application_keys:
    - index: 0
      key: "63964771734fbd76e3b40519d1d94a48"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.node.primary_address, 0x10);
        assert_eq!(config.node.network_keys.len(), 1);
        assert_eq!(config.node.application_keys[0].bound_network_key, 0);
        let network = config.node.build_network().unwrap();
        assert_eq!(network.application_keys().len(), 1);
    }

    #[test]
    fn test_parse_proxy_filter_setup() {
        let config: Config = serde_yaml::from_str("").unwrap();
        assert_eq!(config.manager.proxy_filter, ProxyFilterSetup::Automatic);

        let yaml = r#"
manager:
  proxy_filter:
    type: reject_list
    addresses: [5, 0xC000]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let expected = [Address::new(0x0005), Address::new(0xC000)].into_iter().collect();
        assert_eq!(config.manager.proxy_filter, ProxyFilterSetup::RejectList(expected));
        assert_eq!(config.manager.tick_interval_ms, 20);
    }

    #[test]
    fn test_unknown_udp_field_rejected() {
        let yaml = r#"
bearer:
  udp:
    mtu: 1280
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = Config::new();
        base.storage.path = Some(PathBuf::from("/tmp/base.cbor"));
        base.network.default_ttl = 10;

        let mut override_config = Config::new();
        override_config.network.default_ttl = 20;

        base.merge(override_config);
        assert_eq!(base.network.default_ttl, 20);
        assert_eq!(base.storage.path, Some(PathBuf::from("/tmp/base.cbor")));
    }

    #[test]
    fn test_merge_preserves_base_when_override_empty() {
        let mut base = Config::new();
        base.bearer.udp.peers = vec!["127.0.0.1:4001".into()];

        base.merge(Config::new());
        assert_eq!(base.bearer.udp.peers.len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("meshcore.yaml");
        fs::write(&config_path, "manager:\n  tick_interval_ms: 50\n").unwrap();

        let config = Config::load_file(&config_path).unwrap();
        assert_eq!(config.manager.tick_interval_ms, 50);
        assert_eq!(config.manager.event_buffer, 256);
    }

    #[test]
    fn test_load_from_paths_merges_keys() {
        let temp_dir = TempDir::new().unwrap();

        let low = temp_dir.path().join("low.yaml");
        fs::write(
            &low,
            "network:\n  default_ttl: 7\n  sar:\n    segment_interval_ms: 80\n",
        )
        .unwrap();

        let high = temp_dir.path().join("high.yaml");
        fs::write(&high, "network:\n  sar:\n    discard_timeout_ms: 5000\n").unwrap();

        let (config, loaded) = Config::load_from_paths(&[low.clone(), high.clone()]).unwrap();
        assert_eq!(loaded, vec![low, high]);
        assert_eq!(config.network.default_ttl, 7);
        assert_eq!(config.network.sar.segment_interval_ms, 80);
        assert_eq!(config.network.sar.discard_timeout_ms, 5_000);
    }

    #[test]
    fn test_load_skips_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("exists.yaml");
        fs::write(&existing, "storage:\n  path: /tmp/state.cbor\n").unwrap();
        let missing = temp_dir.path().join("missing.yaml");

        let (config, loaded) = Config::load_from_paths(&[missing, existing.clone()]).unwrap();
        assert_eq!(loaded, vec![existing]);
        assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/state.cbor")));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "network: [unclosed").unwrap();
        assert!(matches!(
            Config::load_from_paths(&[path]),
            Err(ConfigError::ParseYaml { .. })
        ));
    }

    #[test]
    fn test_search_paths_includes_expected() {
        let paths = Config::search_paths();
        assert_eq!(
            paths.first(),
            Some(&PathBuf::from("/etc/meshcore/meshcore.yaml"))
        );
        assert_eq!(paths.last(), Some(&PathBuf::from("./meshcore.yaml")));
    }

    #[test]
    fn test_validate_rejects_bad_range() {
        let mut config = Config::new();
        config.node.primary_address = 0x7FFF;
        config.node.element_count = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.node.primary_address = 0;
        config.node.element_count = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_yaml_roundtrip() {
        let mut config = Config::new();
        config.bearer.udp.peers = vec!["10.0.0.1:4000".into()];
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("10.0.0.1:4000"));
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
