//! Local node configuration (`node.*`) and the runtime sections
//! (`storage.*`, `manager.*`).
//!
//! The node section describes the local node's credentials: its unicast
//! address range, Device Key, Network and Application Keys, and the IV
//! Index it starts from.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::ConfigError;
use crate::crypto::Key;
use crate::model::{
    parse_key, Address, ApplicationKey, Element, Features, IvIndex, MeshNetwork, Model, ModelId,
    NetworkKey, Node,
};
use crate::proxy::ProxyFilterSetup;

/// Network Key entry (`node.network_keys[]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkKeyConfig {
    pub index: u16,
    /// 128-bit key as 32 hex characters.
    pub key: String,
}

/// Application Key entry (`node.application_keys[]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationKeyConfig {
    pub index: u16,
    pub key: String,
    /// Index of the Network Key this key is bound to.
    #[serde(default)]
    pub bound_network_key: u16,
}

/// Local node configuration (`node.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "NodeConfig::default_name")]
    pub name: String,
    /// Unicast address of the primary element (`node.primary_address`).
    #[serde(default = "NodeConfig::default_primary_address")]
    pub primary_address: u16,
    #[serde(default = "NodeConfig::default_element_count")]
    pub element_count: u16,
    /// Device Key in hex. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_key: Option<String>,
    /// Feature bitmap reported in Heartbeats (`node.features`).
    #[serde(default)]
    pub features: u16,
    /// Network Keys. A random primary key is generated when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_keys: Vec<NetworkKeyConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub application_keys: Vec<ApplicationKeyConfig>,
    /// Initial IV Index, used when storage holds none (`node.iv_index`).
    #[serde(default)]
    pub iv_index: u32,
    /// Group addresses the local models subscribe to (`node.subscriptions`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscriptions: Vec<u16>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            primary_address: 0x0001,
            element_count: 1,
            device_key: None,
            features: 0,
            network_keys: Vec::new(),
            application_keys: Vec::new(),
            iv_index: 0,
            subscriptions: Vec::new(),
        }
    }
}

impl NodeConfig {
    fn default_name() -> String { "meshcore".to_string() }
    fn default_primary_address() -> u16 { 0x0001 }
    fn default_element_count() -> u16 { 1 }

    /// Build the mesh network containing the local node.
    ///
    /// Every element carries a Generic OnOff server and client bound to all
    /// Application Keys. The primary element also carries the Configuration
    /// and Health models.
    pub fn build_network(&self) -> Result<MeshNetwork, ConfigError> {
        let mut network = MeshNetwork::new();
        network.set_iv_index(IvIndex::new(self.iv_index, false));

        if self.network_keys.is_empty() {
            network.add_network_key(NetworkKey::new(0, random_key())?.with_name("Primary"))?;
        }
        for entry in &self.network_keys {
            network.add_network_key(NetworkKey::new(entry.index, parse_key(&entry.key)?)?)?;
        }
        for entry in &self.application_keys {
            network.add_application_key(ApplicationKey::new(
                entry.index,
                parse_key(&entry.key)?,
                entry.bound_network_key,
            )?)?;
        }

        let app_keys: Vec<u16> = network.application_keys().iter().map(|k| k.index()).collect();
        let subscriptions: Vec<Address> = self
            .subscriptions
            .iter()
            .map(|&a| Address::new(a))
            .filter(|a| a.is_group() || a.is_virtual())
            .collect();

        let elements = (0..self.element_count.max(1))
            .map(|i| {
                let mut models = Vec::new();
                if i == 0 {
                    models.push(Model::new(ModelId::CONFIGURATION_SERVER));
                    models.push(Model::new(ModelId::CONFIGURATION_CLIENT));
                    models.push(Model::new(ModelId::HEALTH_SERVER));
                }
                for id in [ModelId::GENERIC_ON_OFF_SERVER, ModelId::GENERIC_ON_OFF_CLIENT] {
                    let mut model = Model::new(id);
                    for &key in &app_keys {
                        model = model.bind(key);
                    }
                    for &group in &subscriptions {
                        model = model.subscribe(group.into());
                    }
                    models.push(model);
                }
                Element::new(models)
            })
            .collect();

        let mut node = Node::new(self.name.clone(), Address::new(self.primary_address), elements);
        node.device_key = Some(match &self.device_key {
            Some(hex) => parse_key(hex)?,
            None => random_key(),
        });
        node.network_keys = network.network_keys().iter().map(|k| k.index()).collect();
        node.application_keys = app_keys;
        node.features = Features::from_bits(self.features);

        let primary = node.primary_address;
        network.add_node(node)?;
        network.set_local_node(primary)?;
        Ok(network)
    }
}

fn random_key() -> Key {
    let mut key = [0u8; 16];
    rand::rng().fill(&mut key);
    key
}

/// Persistence configuration (`storage.*`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State file. In-memory storage is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Event loop configuration (`manager.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Timer resolution (`manager.tick_interval_ms`).
    #[serde(default = "ManagerConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Command channel capacity (`manager.command_buffer`).
    #[serde(default = "ManagerConfig::default_command_buffer")]
    pub command_buffer: usize,
    /// Application event channel capacity (`manager.event_buffer`).
    #[serde(default = "ManagerConfig::default_event_buffer")]
    pub event_buffer: usize,
    /// Filter requested from each proxy that connects
    /// (`manager.proxy_filter`).
    #[serde(default)]
    pub proxy_filter: ProxyFilterSetup,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 20,
            command_buffer: 64,
            event_buffer: 256,
            proxy_filter: ProxyFilterSetup::Automatic,
        }
    }
}

impl ManagerConfig {
    fn default_tick_interval_ms() -> u64 { 20 }
    fn default_command_buffer() -> usize { 64 }
    fn default_event_buffer() -> usize { 256 }
}
