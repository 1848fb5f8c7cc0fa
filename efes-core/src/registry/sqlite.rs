use crate::error::{EfesError, Result};
use crate::model::{Device, DeviceStatus, FileInfo, Host, HostStatus, PendingFile};
use crate::registry::{CommitOutcome, Registry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// SQLite-backed registry. Connections are opened per call with WAL and a
/// busy timeout, so concurrent tracker requests serialize on the database
/// rather than on an in-process lock.
pub struct SqliteRegistry {
    db_path: PathBuf,
}

impl SqliteRegistry {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let registry = Self {
            db_path: db_path.into(),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS hosts (
                hostid INTEGER PRIMARY KEY,
                hostname TEXT NOT NULL,
                addr TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('alive', 'dead'))
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS devices (
                devid INTEGER PRIMARY KEY,
                hostid INTEGER NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('alive', 'dead', 'readonly')),
                bytes_total INTEGER,
                bytes_used INTEGER,
                bytes_free INTEGER,
                io_utilization INTEGER,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // AUTOINCREMENT keeps fids monotonic even after pending rows are
        // promoted or reclaimed; an identifier is never reused.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS pending_files (
                fid INTEGER PRIMARY KEY AUTOINCREMENT,
                devid INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                fid INTEGER PRIMARY KEY,
                devid INTEGER NOT NULL,
                size INTEGER NOT NULL,
                committed_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS keys (
                key TEXT PRIMARY KEY,
                fid INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )",
            [],
        )?;

        conn.execute("CREATE INDEX IF NOT EXISTS idx_keys_fid ON keys(fid)", [])?;

        Ok(())
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn get_hosts(&self) -> Result<Vec<Host>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT hostid, hostname, addr, status FROM hosts")?;
        let mut rows = stmt.query([])?;

        let mut hosts = Vec::new();
        while let Some(row) = rows.next()? {
            hosts.push(decode_host(row)?);
        }
        Ok(hosts)
    }

    async fn get_devices(&self) -> Result<Vec<Device>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT devid, hostid, status, bytes_total, bytes_used, bytes_free,
                    io_utilization, updated_at
             FROM devices",
        )?;
        let mut rows = stmt.query([])?;

        let mut devices = Vec::new();
        while let Some(row) = rows.next()? {
            devices.push(decode_device(row)?);
        }
        Ok(devices)
    }

    async fn get_device(&self, devid: i64) -> Result<Option<Device>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT devid, hostid, status, bytes_total, bytes_used, bytes_free,
                    io_utilization, updated_at
             FROM devices
             WHERE devid = ?1",
        )?;
        let mut rows = stmt.query(params![devid])?;

        match rows.next()? {
            Some(row) => Ok(Some(decode_device(row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_host(&self, host: &Host) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO hosts (hostid, hostname, addr, status)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(hostid) DO UPDATE SET
                hostname = excluded.hostname,
                addr = excluded.addr,
                status = excluded.status",
            params![
                host.hostid,
                host.hostname,
                host.addr,
                host.status.to_string()
            ],
        )?;
        Ok(())
    }

    async fn upsert_device(&self, device: &Device) -> Result<()> {
        if let (Some(used), Some(total)) = (device.bytes_used, device.bytes_total) {
            if used > total {
                return Err(EfesError::InvalidRequest(format!(
                    "device {} reports used {} > total {}",
                    device.devid, used, total
                )));
            }
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO devices (devid, hostid, status, bytes_total, bytes_used,
                                  bytes_free, io_utilization, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(devid) DO UPDATE SET
                hostid = excluded.hostid,
                status = excluded.status,
                bytes_total = excluded.bytes_total,
                bytes_used = excluded.bytes_used,
                bytes_free = excluded.bytes_free,
                io_utilization = excluded.io_utilization,
                updated_at = excluded.updated_at",
            params![
                device.devid,
                device.hostid,
                device.status.to_string(),
                device.bytes_total,
                device.bytes_used,
                device.bytes_free,
                device.io_utilization,
                device.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn create_pending_file(&self, devid: i64) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pending_files (devid, created_at) VALUES (?1, ?2)",
            params![devid, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_pending_file(&self, fid: i64) -> Result<Option<PendingFile>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT fid, devid, created_at FROM pending_files WHERE fid = ?1",
                params![fid],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((fid, devid, created_at)) => Ok(Some(PendingFile {
                fid,
                devid,
                created_at: parse_rfc3339(&created_at)?,
            })),
            None => Ok(None),
        }
    }

    async fn commit_file(
        &self,
        key: &str,
        fid: i64,
        devid: i64,
        size: i64,
    ) -> Result<CommitOutcome> {
        let mut conn = self.conn()?;
        // Take the write lock up front so concurrent commits serialize on
        // the busy handler instead of failing a deferred lock upgrade.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let pending_devid: Option<i64> = tx
            .query_row(
                "SELECT devid FROM pending_files WHERE fid = ?1",
                params![fid],
                |row| row.get(0),
            )
            .optional()?;

        match pending_devid {
            Some(pending_devid) => {
                if pending_devid != devid {
                    return Err(EfesError::InvalidRequest(format!(
                        "fid {} is pending on device {}, not device {}",
                        fid, pending_devid, devid
                    )));
                }
            }
            None => {
                // The pending row is gone. A retried commit for the pair
                // that already holds the mapping is a no-op.
                let current: Option<i64> = tx
                    .query_row(
                        "SELECT fid FROM keys WHERE key = ?1 AND deleted_at IS NULL",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                if current == Some(fid) {
                    return Ok(CommitOutcome::AlreadyCommitted);
                }
                return Err(EfesError::NotFound(format!("pending file {} not found", fid)));
            }
        }

        let now = Utc::now().to_rfc3339();
        tx.execute("DELETE FROM pending_files WHERE fid = ?1", params![fid])?;
        tx.execute(
            "INSERT INTO files (fid, devid, size, committed_at) VALUES (?1, ?2, ?3, ?4)",
            params![fid, devid, size, now],
        )?;

        let replaced: Option<i64> = tx
            .query_row(
                "SELECT fid FROM keys WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute(
            "INSERT INTO keys (key, fid, updated_at, deleted_at) VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT(key) DO UPDATE SET
                fid = excluded.fid,
                updated_at = excluded.updated_at,
                deleted_at = NULL",
            params![key, fid, now],
        )?;
        tx.commit()?;

        Ok(CommitOutcome::Committed {
            replaced: replaced.filter(|&old| old != fid),
        })
    }

    async fn get_key_mapping(&self, key: &str) -> Result<Option<FileInfo>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT f.fid, f.devid, f.size, f.committed_at
                 FROM keys k
                 JOIN files f ON f.fid = k.fid
                 WHERE k.key = ?1 AND k.deleted_at IS NULL",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((fid, devid, size, committed_at)) => Ok(Some(FileInfo {
                fid,
                devid,
                size,
                committed_at: parse_rfc3339(&committed_at)?,
            })),
            None => Ok(None),
        }
    }

    async fn tombstone_key(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE keys SET deleted_at = ?2 WHERE key = ?1 AND deleted_at IS NULL",
            params![key, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<PendingFile>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT fid, devid, created_at FROM pending_files WHERE created_at < ?1",
        )?;
        let mut rows = stmt.query(params![cutoff.to_rfc3339()])?;

        let mut pending = Vec::new();
        while let Some(row) = rows.next()? {
            let created_at: String = row.get(2)?;
            pending.push(PendingFile {
                fid: row.get(0)?,
                devid: row.get(1)?,
                created_at: parse_rfc3339(&created_at)?,
            });
        }
        Ok(pending)
    }

    async fn list_reclaimable_files(&self) -> Result<Vec<FileInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT f.fid, f.devid, f.size, f.committed_at
             FROM files f
             WHERE NOT EXISTS (
                SELECT 1 FROM keys k WHERE k.fid = f.fid AND k.deleted_at IS NULL
             )",
        )?;
        let mut rows = stmt.query([])?;

        let mut files = Vec::new();
        while let Some(row) = rows.next()? {
            let committed_at: String = row.get(3)?;
            files.push(FileInfo {
                fid: row.get(0)?,
                devid: row.get(1)?,
                size: row.get(2)?,
                committed_at: parse_rfc3339(&committed_at)?,
            });
        }
        Ok(files)
    }

    async fn remove_pending_file(&self, fid: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM pending_files WHERE fid = ?1", params![fid])?;
        Ok(())
    }

    async fn remove_file(&self, fid: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM files WHERE fid = ?1", params![fid])?;
        Ok(())
    }

    async fn purge_tombstones(&self) -> Result<u64> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "DELETE FROM keys
             WHERE deleted_at IS NOT NULL
               AND fid NOT IN (SELECT fid FROM files)",
            [],
        )?;
        Ok(affected as u64)
    }
}

fn decode_host(row: &Row<'_>) -> Result<Host> {
    let status: String = row.get(3)?;
    Ok(Host {
        hostid: row.get(0)?,
        hostname: row.get(1)?,
        addr: row.get(2)?,
        status: HostStatus::from_str(&status).map_err(EfesError::Internal)?,
    })
}

fn decode_device(row: &Row<'_>) -> Result<Device> {
    let status: String = row.get(2)?;
    let updated_at: String = row.get(7)?;
    Ok(Device {
        devid: row.get(0)?,
        hostid: row.get(1)?,
        status: DeviceStatus::from_str(&status).map_err(EfesError::Internal)?,
        bytes_total: row.get(3)?,
        bytes_used: row.get(4)?,
        bytes_free: row.get(5)?,
        io_utilization: row.get(6)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|error| EfesError::Internal(format!("invalid RFC3339 timestamp: {}", error)))?;
    Ok(parsed.with_timezone(&Utc))
}
