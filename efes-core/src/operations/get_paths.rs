use crate::error::{EfesError, Result};
use crate::model::{DeviceStatus, HostStatus, file_url};
use crate::registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct GetPathsOperation {
    registry: Arc<dyn Registry>,
}

#[derive(Debug, Clone)]
pub struct GetPathsOperationRequest {
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct GetPathsOperationResult {
    pub paths: Vec<String>,
}

impl GetPathsOperation {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    /// Resolve a key to its reachable locations, least loaded first. Dead
    /// devices and dead hosts are filtered out; an absent or tombstoned
    /// mapping is NotFound, a mapping with no live location Unavailable.
    pub async fn run(&self, request: GetPathsOperationRequest) -> Result<GetPathsOperationResult> {
        let Some(file) = self.registry.get_key_mapping(&request.key).await? else {
            return Err(EfesError::NotFound(format!("key {} not found", request.key)));
        };

        let hosts = self.registry.get_hosts().await?;
        let hosts_by_id: HashMap<i64, _> = hosts.iter().map(|host| (host.hostid, host)).collect();
        let devices = self.registry.get_devices().await?;

        let mut holders: Vec<(i64, String)> = devices
            .iter()
            .filter(|device| device.devid == file.devid)
            .filter(|device| device.status != DeviceStatus::Dead)
            .filter_map(|device| {
                let host = hosts_by_id.get(&device.hostid)?;
                if host.status != HostStatus::Alive {
                    return None;
                }
                Some((
                    device.io_utilization.unwrap_or(i64::MAX),
                    file_url(&host.addr, device.devid, file.fid),
                ))
            })
            .collect();
        holders.sort_by_key(|(io, _)| *io);

        if holders.is_empty() {
            return Err(EfesError::Unavailable(format!(
                "no reachable device holds key {}",
                request.key
            )));
        }

        Ok(GetPathsOperationResult {
            paths: holders.into_iter().map(|(_, path)| path).collect(),
        })
    }
}
