use crate::error::{EfesError, Result};
use crate::model::{Device, DeviceStatus, Host, HostStatus, file_url};
use crate::registry::Registry;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct CreateOpenOperation {
    registry: Arc<dyn Registry>,
}

#[derive(Debug, Clone)]
pub struct CreateOpenOperationRequest {
    pub size: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CreateOpenOperationResult {
    pub path: String,
    pub fid: i64,
    pub devid: i64,
}

impl CreateOpenOperation {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    /// Select one placement-eligible device and reserve a pending file on
    /// it. Fails with Unavailable before any data moves when no device
    /// qualifies.
    pub async fn run(
        &self,
        request: CreateOpenOperationRequest,
    ) -> Result<CreateOpenOperationResult> {
        let hosts = self.registry.get_hosts().await?;
        let devices = self.registry.get_devices().await?;
        let hosts_by_id: HashMap<i64, &Host> =
            hosts.iter().map(|host| (host.hostid, host)).collect();

        let mut eligible: Vec<&Device> = devices
            .iter()
            .filter(|device| {
                is_eligible(device, hosts_by_id.get(&device.hostid).copied(), request.size)
            })
            .collect();

        // Prefer the least loaded device, then the most free space. A device
        // that has not reported utilization sorts after those that have.
        eligible.sort_by_key(|device| {
            (
                device.io_utilization.unwrap_or(i64::MAX),
                Reverse(device.bytes_free.unwrap_or(0)),
            )
        });

        let Some(target) = eligible.first() else {
            return Err(EfesError::Unavailable(match request.size {
                Some(size) => format!("no device can accept a write of {} bytes", size),
                None => "no device available for writing".to_string(),
            }));
        };

        let host = hosts_by_id
            .get(&target.hostid)
            .ok_or_else(|| EfesError::Internal(format!("host {} vanished", target.hostid)))?;

        let fid = self.registry.create_pending_file(target.devid).await?;
        tracing::debug!("reserved pending fid {} on device {}", fid, target.devid);

        Ok(CreateOpenOperationResult {
            path: file_url(&host.addr, target.devid, fid),
            fid,
            devid: target.devid,
        })
    }
}

fn is_eligible(device: &Device, host: Option<&Host>, size: Option<i64>) -> bool {
    if device.status != DeviceStatus::Alive {
        return false;
    }
    // Every path is served from the host's address, so a dead or unknown
    // host takes its devices out of placement.
    if !matches!(host, Some(host) if host.status == HostStatus::Alive) {
        return false;
    }
    match size {
        // A sized write needs a reported free capacity that covers it.
        Some(size) => device.bytes_free.is_some_and(|free| free >= size),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SqliteRegistry;
    use chrono::Utc;

    async fn seed_registry(dir: &tempfile::TempDir) -> Arc<SqliteRegistry> {
        let registry = Arc::new(SqliteRegistry::open(dir.path().join("efes.db")).unwrap());
        registry
            .upsert_host(&Host {
                hostid: 1,
                hostname: "storage-1".to_string(),
                addr: "127.0.0.1:8500".to_string(),
                status: HostStatus::Alive,
            })
            .await
            .unwrap();
        registry
    }

    fn device(devid: i64, free: Option<i64>, io: Option<i64>) -> Device {
        Device {
            devid,
            hostid: 1,
            status: DeviceStatus::Alive,
            bytes_total: free.map(|f| f * 2),
            bytes_used: free,
            bytes_free: free,
            io_utilization: io,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_prefers_lowest_io_then_highest_free() {
        let dir = tempfile::tempdir().unwrap();
        let registry = seed_registry(&dir).await;
        registry.upsert_device(&device(1, Some(5000), Some(80))).await.unwrap();
        registry.upsert_device(&device(2, Some(1000), Some(5))).await.unwrap();
        registry.upsert_device(&device(3, Some(9000), Some(5))).await.unwrap();
        // Unreported utilization sorts after reported values.
        registry.upsert_device(&device(4, Some(9999), None)).await.unwrap();

        let operation = CreateOpenOperation::new(registry);
        let result = operation
            .run(CreateOpenOperationRequest { size: Some(100) })
            .await
            .unwrap();
        assert_eq!(result.devid, 3);
        assert!(result.path.contains("/dev3/"));
    }

    #[tokio::test]
    async fn test_excludes_dead_readonly_and_undersized() {
        let dir = tempfile::tempdir().unwrap();
        let registry = seed_registry(&dir).await;

        let mut dead = device(1, Some(5000), Some(1));
        dead.status = DeviceStatus::Dead;
        registry.upsert_device(&dead).await.unwrap();

        let mut readonly = device(2, Some(5000), Some(1));
        readonly.status = DeviceStatus::Readonly;
        registry.upsert_device(&readonly).await.unwrap();

        registry.upsert_device(&device(3, Some(100), Some(1))).await.unwrap();

        let operation = CreateOpenOperation::new(registry);
        let result = operation
            .run(CreateOpenOperationRequest { size: Some(1000) })
            .await;
        assert!(matches!(result, Err(EfesError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_sized_write_requires_reported_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let registry = seed_registry(&dir).await;
        registry.upsert_device(&device(1, None, Some(1))).await.unwrap();

        let operation = CreateOpenOperation::new(registry.clone());
        let sized = operation
            .run(CreateOpenOperationRequest { size: Some(1000) })
            .await;
        assert!(matches!(sized, Err(EfesError::Unavailable(_))));

        // A size-unknown write may still land on it.
        let r#unsized = operation
            .run(CreateOpenOperationRequest { size: None })
            .await
            .unwrap();
        assert_eq!(r#unsized.devid, 1);
    }

    #[tokio::test]
    async fn test_dead_host_takes_devices_out_of_placement() {
        let dir = tempfile::tempdir().unwrap();
        let registry = seed_registry(&dir).await;
        registry
            .upsert_host(&Host {
                hostid: 1,
                hostname: "storage-1".to_string(),
                addr: "127.0.0.1:8500".to_string(),
                status: HostStatus::Dead,
            })
            .await
            .unwrap();
        registry.upsert_device(&device(1, Some(5000), Some(1))).await.unwrap();

        let operation = CreateOpenOperation::new(registry);
        let result = operation
            .run(CreateOpenOperationRequest { size: Some(100) })
            .await;
        assert!(matches!(result, Err(EfesError::Unavailable(_))));
    }
}
