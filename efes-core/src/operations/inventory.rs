use crate::error::Result;
use crate::model::{Device, Host};
use crate::registry::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct InventoryOperation {
    registry: Arc<dyn Registry>,
}

/// Full snapshot of hosts and devices, dead records included; operational
/// visibility never filters.
#[derive(Debug, Clone)]
pub struct InventorySnapshot {
    pub hosts: Vec<Host>,
    pub devices: Vec<Device>,
}

impl InventoryOperation {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    pub async fn run(&self) -> Result<InventorySnapshot> {
        Ok(InventorySnapshot {
            hosts: self.registry.get_hosts().await?,
            devices: self.registry.get_devices().await?,
        })
    }
}
