//! Node startup options, radio setup, and controller configuration.

use crate::identity::layout;
use crate::traits::Storage;
use crate::types::AUTO;

/// Radio power amplifier level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PaLevel {
    Min,
    Low,
    High,
    #[default]
    Max,
}

/// Radio air data rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DataRate {
    Kbps250,
    #[default]
    Mbps1,
    Mbps2,
}

/// Physical radio parameters, handed to the transport at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RadioSetup {
    pub pa_level: PaLevel,
    pub channel: u8,
    pub data_rate: DataRate,
}

impl Default for RadioSetup {
    fn default() -> Self {
        Self {
            pa_level: PaLevel::default(),
            channel: 76,
            data_rate: DataRate::default(),
        }
    }
}

/// Startup options for a node.
///
/// The defaults describe a battery-powered leaf: automatic id and parent
/// discovery, no relaying. A statically provisioned deployment can pin
/// `node_id` and `parent_node_id`; pinning the parent disables parent
/// search entirely (the node will keep retrying the pinned parent).
#[derive(Clone, Copy, Debug)]
pub struct NodeOptions {
    /// Own address, or [`AUTO`] to request one from the controller.
    pub node_id: u8,
    /// Fixed parent, or [`AUTO`] to discover one.
    pub parent_node_id: u8,
    /// Forward other nodes' traffic. Repeater nodes must keep their
    /// radio powered and call `process()` continuously.
    pub repeater: bool,
    /// Act as the distance-0 network root.
    pub gateway: bool,
    /// Physical radio parameters.
    pub radio: RadioSetup,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            node_id: AUTO,
            parent_node_id: AUTO,
            repeater: false,
            gateway: false,
            radio: RadioSetup::default(),
        }
    }
}

impl NodeOptions {
    /// Leaf node with automatic discovery.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a statically assigned address.
    pub fn with_node_id(mut self, node_id: u8) -> Self {
        self.node_id = node_id;
        self
    }

    /// Always route through the given parent; disables parent search.
    pub fn with_parent(mut self, parent_node_id: u8) -> Self {
        self.parent_node_id = parent_node_id;
        self
    }

    /// Enable relaying for other nodes.
    pub fn repeater(mut self) -> Self {
        self.repeater = true;
        self
    }

    /// Configure as the gateway. Implies repeater duties.
    pub fn gateway(mut self) -> Self {
        self.gateway = true;
        self.repeater = true;
        self
    }

    /// Override the radio parameters.
    pub fn with_radio(mut self, radio: RadioSetup) -> Self {
        self.radio = radio;
        self
    }
}

/// Configuration pushed once from the gateway's controller. Persisted,
/// read by application code only - routing never consults it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub is_metric: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { is_metric: true }
    }
}

impl ControllerConfig {
    /// Restore from storage. Unprogrammed storage (0xFF) reads as the
    /// metric default.
    pub fn load<S: Storage>(storage: &S) -> Self {
        match storage.read(layout::CONTROLLER_CONFIG) {
            0 => Self { is_metric: false },
            _ => Self { is_metric: true },
        }
    }

    /// Persist to the controller-config region.
    pub fn store<S: Storage>(&self, storage: &mut S) {
        storage.update(layout::CONTROLLER_CONFIG, self.is_metric as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_impls::MockStorage;

    #[test]
    fn test_options_builder() {
        let options = NodeOptions::new().with_node_id(12).repeater();
        assert_eq!(options.node_id, 12);
        assert!(options.repeater);
        assert!(!options.gateway);

        let gw = NodeOptions::new().gateway();
        assert!(gw.gateway);
        assert!(gw.repeater);
    }

    #[test]
    fn test_controller_config_default_is_metric() {
        let storage = MockStorage::new();
        assert!(ControllerConfig::load(&storage).is_metric);
    }

    #[test]
    fn test_controller_config_roundtrip() {
        let mut storage = MockStorage::new();
        let config = ControllerConfig { is_metric: false };
        config.store(&mut storage);
        assert_eq!(ControllerConfig::load(&storage), config);
    }
}
