//! Mesh network container: keys, nodes and groups of one network.

use super::address::{Address, MeshAddress};
use super::iv_index::IvIndex;
use super::keys::{ApplicationKey, KeyIndex, NetworkKey};
use super::node::Node;
use super::ModelError;

/// State of the single mesh network handled by this process.
#[derive(Clone, Debug, Default)]
pub struct MeshNetwork {
    network_keys: Vec<NetworkKey>,
    application_keys: Vec<ApplicationKey>,
    nodes: Vec<Node>,
    groups: Vec<MeshAddress>,
    local_address: Option<Address>,
    iv_index: IvIndex,
}

impl MeshNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    // === IV Index ===

    pub fn iv_index(&self) -> IvIndex {
        self.iv_index
    }

    pub fn set_iv_index(&mut self, iv_index: IvIndex) {
        self.iv_index = iv_index;
    }

    // === Network Keys ===

    pub fn network_keys(&self) -> &[NetworkKey] {
        &self.network_keys
    }

    pub fn network_keys_mut(&mut self) -> impl Iterator<Item = &mut NetworkKey> {
        self.network_keys.iter_mut()
    }

    pub fn network_key(&self, index: KeyIndex) -> Option<&NetworkKey> {
        self.network_keys.iter().find(|k| k.index() == index)
    }

    pub fn network_key_mut(&mut self, index: KeyIndex) -> Option<&mut NetworkKey> {
        self.network_keys.iter_mut().find(|k| k.index() == index)
    }

    pub fn primary_network_key(&self) -> Option<&NetworkKey> {
        self.network_key(0)
    }

    pub fn add_network_key(&mut self, key: NetworkKey) -> Result<(), ModelError> {
        if self.network_key(key.index()).is_some() {
            return Err(ModelError::KeyExists(key.index()));
        }
        self.network_keys.push(key);
        Ok(())
    }

    /// Removes a Network Key. Fails while any Application Key is bound to it.
    pub fn remove_network_key(&mut self, index: KeyIndex) -> Result<NetworkKey, ModelError> {
        if self.application_keys.iter().any(|k| k.bound_network_key() == index) {
            return Err(ModelError::KeyInUse(index));
        }
        let pos = self
            .network_keys
            .iter()
            .position(|k| k.index() == index)
            .ok_or(ModelError::NetworkKeyNotFound(index))?;
        Ok(self.network_keys.remove(pos))
    }

    // === Application Keys ===

    pub fn application_keys(&self) -> &[ApplicationKey] {
        &self.application_keys
    }

    pub fn application_key(&self, index: KeyIndex) -> Option<&ApplicationKey> {
        self.application_keys.iter().find(|k| k.index() == index)
    }

    pub fn application_key_mut(&mut self, index: KeyIndex) -> Option<&mut ApplicationKey> {
        self.application_keys.iter_mut().find(|k| k.index() == index)
    }

    /// Adds an Application Key. Its bound Network Key must exist.
    pub fn add_application_key(&mut self, key: ApplicationKey) -> Result<(), ModelError> {
        if self.network_key(key.bound_network_key()).is_none() {
            return Err(ModelError::NetworkKeyNotFound(key.bound_network_key()));
        }
        if self.application_key(key.index()).is_some() {
            return Err(ModelError::KeyExists(key.index()));
        }
        self.application_keys.push(key);
        Ok(())
    }

    pub fn remove_application_key(&mut self, index: KeyIndex) -> Result<ApplicationKey, ModelError> {
        let pos = self
            .application_keys
            .iter()
            .position(|k| k.index() == index)
            .ok_or(ModelError::ApplicationKeyNotFound(index))?;
        Ok(self.application_keys.remove(pos))
    }

    /// Application Keys bound to the given Network Key.
    pub fn application_keys_bound_to(
        &self,
        network_key: KeyIndex,
    ) -> impl Iterator<Item = &ApplicationKey> {
        self.application_keys
            .iter()
            .filter(move |k| k.bound_network_key() == network_key)
    }

    /// Revokes old key material of every Application Key bound to `network_key`.
    pub fn revoke_old_application_keys(&mut self, network_key: KeyIndex) {
        for key in self
            .application_keys
            .iter_mut()
            .filter(|k| k.bound_network_key() == network_key)
        {
            key.revoke_old_key();
        }
    }

    // === Nodes ===

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Adds a node, rejecting overlapping unicast ranges.
    pub fn add_node(&mut self, node: Node) -> Result<(), ModelError> {
        if !node.primary_address.is_unicast() {
            return Err(ModelError::NotUnicast(node.primary_address));
        }
        if let Some(existing) = self.nodes.iter().find(|n| {
            n.contains_address(node.primary_address) || node.contains_address(n.primary_address)
        }) {
            return Err(ModelError::AddressOverlap {
                address: node.primary_address,
                existing: existing.primary_address,
            });
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn remove_node(&mut self, primary_address: Address) -> Option<Node> {
        let pos = self
            .nodes
            .iter()
            .position(|n| n.primary_address == primary_address)?;
        if self.local_address == Some(primary_address) {
            self.local_address = None;
        }
        Some(self.nodes.remove(pos))
    }

    /// Node owning the given unicast address.
    pub fn node_with_address(&self, address: Address) -> Option<&Node> {
        self.nodes.iter().find(|n| n.contains_address(address))
    }

    pub fn node_with_address_mut(&mut self, address: Address) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.contains_address(address))
    }

    /// Marks the node with this primary address as the local node.
    pub fn set_local_node(&mut self, primary_address: Address) -> Result<(), ModelError> {
        if self.node_with_address(primary_address).is_none() {
            return Err(ModelError::NotUnicast(primary_address));
        }
        self.local_address = Some(primary_address);
        Ok(())
    }

    pub fn local_node(&self) -> Option<&Node> {
        self.local_address.and_then(|a| self.node_with_address(a))
    }

    pub fn local_node_mut(&mut self) -> Option<&mut Node> {
        let address = self.local_address?;
        self.node_with_address_mut(address)
    }

    /// Whether `address` is a unicast address of the local node.
    pub fn is_local_unicast(&self, address: Address) -> bool {
        self.local_node()
            .is_some_and(|n| address.is_unicast() && n.contains_address(address))
    }

    // === Groups ===

    pub fn groups(&self) -> &[MeshAddress] {
        &self.groups
    }

    pub fn add_group(&mut self, group: MeshAddress) {
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
    }

    /// Label UUIDs of known virtual groups and local subscriptions hashing
    /// to `address`.
    pub fn virtual_labels(&self, address: Address) -> Vec<[u8; 16]> {
        let mut labels: Vec<[u8; 16]> = self
            .groups
            .iter()
            .filter(|g| g.address == address)
            .filter_map(|g| g.virtual_label)
            .collect();
        if let Some(node) = self.local_node() {
            let subscribed = node
                .elements
                .iter()
                .flat_map(|e| e.models.iter())
                .flat_map(|m| m.subscriptions.iter())
                .filter(|s| s.address == address)
                .filter_map(|s| s.virtual_label);
            for label in subscribed {
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
        }
        labels
    }
}
