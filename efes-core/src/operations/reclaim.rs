use crate::device::DeviceClient;
use crate::error::{EfesError, Result};
use crate::model::{Device, DeviceStatus, Host, HostStatus, file_url};
use crate::registry::Registry;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct ReclaimOperation {
    registry: Arc<dyn Registry>,
    device_client: DeviceClient,
    pending_ttl: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReclaimOperationResult {
    pub pending_expired: usize,
    pub files_reclaimed: usize,
    pub tombstones_purged: u64,
}

impl ReclaimOperation {
    pub fn new(
        registry: Arc<dyn Registry>,
        device_client: DeviceClient,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            device_client,
            pending_ttl,
        }
    }

    /// One sweep pass: expire pending files past the staleness threshold and
    /// reclaim committed files no key resolves to. Bytes are released on the
    /// owning device before the metadata row goes; a device that cannot
    /// serve the release keeps its rows for a later pass. Only records
    /// already past their condition are touched, so the sweep is safe next
    /// to live reservations and commits.
    pub async fn run(&self) -> Result<ReclaimOperationResult> {
        let hosts = self.registry.get_hosts().await?;
        let devices = self.registry.get_devices().await?;
        let hosts_by_id: HashMap<i64, &Host> =
            hosts.iter().map(|host| (host.hostid, host)).collect();
        let devices_by_id: HashMap<i64, &Device> =
            devices.iter().map(|device| (device.devid, device)).collect();

        let mut result = ReclaimOperationResult::default();
        let cutoff = Utc::now() - self.pending_ttl;

        for pending in self.registry.list_stale_pending(cutoff).await? {
            match self
                .release_bytes(pending.devid, pending.fid, &devices_by_id, &hosts_by_id)
                .await
            {
                Ok(()) => {
                    self.registry.remove_pending_file(pending.fid).await?;
                    result.pending_expired += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        "could not release expired pending fid {}: {}",
                        pending.fid,
                        error
                    );
                }
            }
        }

        for file in self.registry.list_reclaimable_files().await? {
            match self
                .release_bytes(file.devid, file.fid, &devices_by_id, &hosts_by_id)
                .await
            {
                Ok(()) => {
                    self.registry.remove_file(file.fid).await?;
                    result.files_reclaimed += 1;
                }
                Err(error) => {
                    tracing::warn!("could not release fid {}: {}", file.fid, error);
                }
            }
        }

        result.tombstones_purged = self.registry.purge_tombstones().await?;
        Ok(result)
    }

    async fn release_bytes(
        &self,
        devid: i64,
        fid: i64,
        devices_by_id: &HashMap<i64, &Device>,
        hosts_by_id: &HashMap<i64, &Host>,
    ) -> Result<()> {
        let device = devices_by_id
            .get(&devid)
            .ok_or_else(|| EfesError::NotFound(format!("device {} not in inventory", devid)))?;
        if device.status == DeviceStatus::Dead {
            return Err(EfesError::Unavailable(format!("device {} is dead", devid)));
        }
        let host = hosts_by_id
            .get(&device.hostid)
            .ok_or_else(|| EfesError::NotFound(format!("host {} not in inventory", device.hostid)))?;
        if host.status != HostStatus::Alive {
            return Err(EfesError::Unavailable(format!(
                "host {} is not alive",
                host.hostid
            )));
        }

        self.device_client
            .release(&file_url(&host.addr, devid, fid))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SqliteRegistry;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::delete;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    type Released = Arc<Mutex<Vec<String>>>;

    async fn mock_device_endpoint() -> (String, Released) {
        let released: Released = Arc::new(Mutex::new(Vec::new()));
        let seen = released.clone();
        let app = Router::new().route(
            "/dev1/*rest",
            delete(move |path: axum::extract::Path<String>| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(path.0);
                    StatusCode::OK
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr.to_string(), released)
    }

    async fn seeded(dir: &tempfile::TempDir, host_addr: &str) -> Arc<SqliteRegistry> {
        let registry = Arc::new(SqliteRegistry::open(dir.path().join("efes.db")).unwrap());
        registry
            .upsert_host(&Host {
                hostid: 1,
                hostname: "storage-1".to_string(),
                addr: host_addr.to_string(),
                status: HostStatus::Alive,
            })
            .await
            .unwrap();
        registry
            .upsert_device(&Device {
                devid: 1,
                hostid: 1,
                status: DeviceStatus::Alive,
                bytes_total: Some(1000),
                bytes_used: Some(0),
                bytes_free: Some(1000),
                io_utilization: None,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_sweep_expires_stale_pending_and_reclaims_orphans() {
        let (addr, released) = mock_device_endpoint().await;
        let dir = tempfile::tempdir().unwrap();
        let registry = seeded(&dir, &addr).await;

        // A pending file with no commit, immediately stale under a zero TTL.
        let stale = registry.create_pending_file(1).await.unwrap();

        // A committed key, then tombstoned.
        let fid = registry.create_pending_file(1).await.unwrap();
        registry.commit_file("k", fid, 1, 10).await.unwrap();
        registry.tombstone_key("k").await.unwrap();

        let operation = ReclaimOperation::new(
            registry.clone(),
            DeviceClient::new(StdDuration::from_secs(5)).unwrap(),
            Duration::zero(),
        );
        let result = operation.run().await.unwrap();

        assert_eq!(result.pending_expired, 1);
        assert_eq!(result.files_reclaimed, 1);
        assert_eq!(result.tombstones_purged, 1);
        assert_eq!(released.lock().unwrap().len(), 2);

        assert!(registry.get_pending_file(stale).await.unwrap().is_none());
        assert!(registry.list_reclaimable_files().await.unwrap().is_empty());

        // Nothing left for a second pass.
        let again = operation.run().await.unwrap();
        assert_eq!(again.pending_expired, 0);
        assert_eq!(again.files_reclaimed, 0);
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_records_alone() {
        let (addr, released) = mock_device_endpoint().await;
        let dir = tempfile::tempdir().unwrap();
        let registry = seeded(&dir, &addr).await;

        // A fresh pending file and a live committed key.
        registry.create_pending_file(1).await.unwrap();
        let fid = registry.create_pending_file(1).await.unwrap();
        registry.commit_file("live", fid, 1, 10).await.unwrap();

        let operation = ReclaimOperation::new(
            registry.clone(),
            DeviceClient::new(StdDuration::from_secs(5)).unwrap(),
            Duration::hours(24),
        );
        let result = operation.run().await.unwrap();

        assert_eq!(result.pending_expired, 0);
        assert_eq!(result.files_reclaimed, 0);
        assert!(released.lock().unwrap().is_empty());
        assert!(registry.get_key_mapping("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dead_device_defers_reclamation() {
        let (addr, _released) = mock_device_endpoint().await;
        let dir = tempfile::tempdir().unwrap();
        let registry = seeded(&dir, &addr).await;

        let fid = registry.create_pending_file(1).await.unwrap();
        registry.commit_file("k", fid, 1, 10).await.unwrap();
        registry.tombstone_key("k").await.unwrap();

        let mut device = registry.get_device(1).await.unwrap().unwrap();
        device.status = DeviceStatus::Dead;
        registry.upsert_device(&device).await.unwrap();

        let operation = ReclaimOperation::new(
            registry.clone(),
            DeviceClient::new(StdDuration::from_secs(5)).unwrap(),
            Duration::zero(),
        );
        let result = operation.run().await.unwrap();

        assert_eq!(result.files_reclaimed, 0);
        assert_eq!(registry.list_reclaimable_files().await.unwrap().len(), 1);
    }
}
