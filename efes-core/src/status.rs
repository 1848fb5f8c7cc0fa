//! Read-only status view: device records joined with their owning hosts,
//! cluster aggregates, and the selectable report ordering.

use crate::model::{Device, DeviceStatus, Host, HostStatus};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

/// One row of the status view: a device merged with derived host fields.
/// The join is produced at query time; the registry records stay the single
/// source of truth.
#[derive(Debug, Clone)]
pub struct DeviceStatusRow {
    pub device: Device,
    pub hostname: String,
    pub host_status: Option<HostStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterTotals {
    pub bytes_total: i64,
    pub bytes_used: i64,
    pub bytes_free: i64,
    pub use_percent: i64,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub rows: Vec<DeviceStatusRow>,
}

impl StatusReport {
    /// Build the view by looking up each device's owning host in a
    /// hostid-keyed map. Dead devices are left out of the view; the raw
    /// inventory keeps them.
    pub fn build(hosts: &[Host], devices: &[Device]) -> Self {
        let hosts_by_id: HashMap<i64, &Host> =
            hosts.iter().map(|host| (host.hostid, host)).collect();
        let rows = devices
            .iter()
            .filter(|device| device.status != DeviceStatus::Dead)
            .map(|device| {
                let host = hosts_by_id.get(&device.hostid);
                DeviceStatusRow {
                    device: device.clone(),
                    hostname: host.map(|host| host.hostname.clone()).unwrap_or_default(),
                    host_status: host.map(|host| host.status),
                }
            })
            .collect();
        Self { rows }
    }

    /// Cluster aggregates from the raw byte sums. Absent per-device values
    /// stay out of the sums, and the percentage is derived from the summed
    /// counters rather than averaging per-device percentages, which would
    /// misweight small devices.
    pub fn totals(&self) -> ClusterTotals {
        let mut bytes_total = 0i64;
        let mut bytes_used = 0i64;
        for row in &self.rows {
            if let Some(total) = row.device.bytes_total {
                bytes_total += total;
            }
            if let Some(used) = row.device.bytes_used {
                bytes_used += used;
            }
        }
        let use_percent = if bytes_total == 0 {
            0
        } else {
            bytes_used * 100 / bytes_total
        };
        ClusterTotals {
            bytes_total,
            bytes_used,
            bytes_free: bytes_total - bytes_used,
            use_percent,
        }
    }

    /// Sort the rows in place by the named key. An unrecognized key logs a
    /// warning and leaves the rows in their original order.
    pub fn sort_by_key_name(&mut self, sort_by: &str) {
        match SortKey::from_str(sort_by) {
            Ok(key) => self.rows.sort_by(key.comparator()),
            Err(_) => tracing::warn!("sort key is not valid: {}", sort_by),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Host,
    Device,
    Size,
    Used,
    Free,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "host" => Ok(Self::Host),
            "device" => Ok(Self::Device),
            "size" => Ok(Self::Size),
            "used" => Ok(Self::Used),
            "free" => Ok(Self::Free),
            other => Err(format!("unknown sort key: {}", other)),
        }
    }
}

type RowComparator = fn(&DeviceStatusRow, &DeviceStatusRow) -> Ordering;

impl SortKey {
    /// Explicit comparator table; each key maps to exactly one ordering.
    pub fn comparator(self) -> RowComparator {
        match self {
            Self::Host => |a, b| a.hostname.cmp(&b.hostname),
            Self::Device => |a, b| a.device.devid.cmp(&b.device.devid),
            Self::Size => |a, b| a.device.bytes_total.cmp(&b.device.bytes_total),
            Self::Used => |a, b| a.device.bytes_used.cmp(&b.device.bytes_used),
            Self::Free => |a, b| a.device.bytes_free.cmp(&b.device.bytes_free),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn host(hostid: i64, hostname: &str) -> Host {
        Host {
            hostid,
            hostname: hostname.to_string(),
            addr: format!("{}:8500", hostname),
            status: HostStatus::Alive,
        }
    }

    fn device(devid: i64, hostid: i64, total: Option<i64>, used: Option<i64>) -> Device {
        Device {
            devid,
            hostid,
            status: DeviceStatus::Alive,
            bytes_total: total,
            bytes_used: used,
            bytes_free: match (total, used) {
                (Some(total), Some(used)) => Some(total - used),
                _ => None,
            },
            io_utilization: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_join_carries_host_fields_and_skips_dead_devices() {
        let hosts = vec![host(1, "alpha"), host(2, "beta")];
        let mut dead = device(3, 2, Some(100), Some(10));
        dead.status = DeviceStatus::Dead;
        let devices = vec![device(1, 1, Some(100), Some(10)), dead];

        let report = StatusReport::build(&hosts, &devices);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].hostname, "alpha");
        assert_eq!(report.rows[0].host_status, Some(HostStatus::Alive));
    }

    #[test]
    fn test_totals_sum_raw_bytes_not_percentages() {
        let hosts = vec![host(1, "alpha")];
        // 90% of a small device and 10% of a big one: the averaged
        // percentage would be 50, the correct cluster usage is 17.
        let devices = vec![
            device(1, 1, Some(100), Some(90)),
            device(2, 1, Some(1000), Some(100)),
        ];

        let report = StatusReport::build(&hosts, &devices);
        let totals = report.totals();
        assert_eq!(totals.bytes_total, 1100);
        assert_eq!(totals.bytes_used, 190);
        assert_eq!(totals.bytes_free, 910);
        assert_eq!(totals.use_percent, 17);
    }

    #[test]
    fn test_absent_values_are_not_coerced_to_zero() {
        let hosts = vec![host(1, "alpha")];
        let devices = vec![
            device(1, 1, Some(1000), Some(250)),
            device(2, 1, None, None),
        ];

        let report = StatusReport::build(&hosts, &devices);
        let totals = report.totals();
        assert_eq!(totals.bytes_total, 1000);
        assert_eq!(totals.bytes_used, 250);
        assert_eq!(totals.use_percent, 25);
        assert_eq!(report.rows[1].device.usage_percent(), None);
    }

    #[test]
    fn test_sort_keys() {
        let hosts = vec![host(1, "beta"), host(2, "alpha")];
        let devices = vec![
            device(1, 1, Some(100), Some(50)),
            device(2, 2, Some(500), Some(10)),
        ];

        let mut report = StatusReport::build(&hosts, &devices);
        report.sort_by_key_name("host");
        assert_eq!(report.rows[0].hostname, "alpha");

        report.sort_by_key_name("device");
        assert_eq!(report.rows[0].device.devid, 1);

        report.sort_by_key_name("size");
        assert_eq!(report.rows[0].device.devid, 1);

        report.sort_by_key_name("used");
        assert_eq!(report.rows[0].device.devid, 2);

        report.sort_by_key_name("free");
        assert_eq!(report.rows[0].device.devid, 1);
    }

    #[test]
    fn test_unknown_sort_key_keeps_original_order() {
        let hosts = vec![host(1, "beta"), host(2, "alpha")];
        let devices = vec![
            device(1, 1, Some(100), Some(50)),
            device(2, 2, Some(500), Some(10)),
        ];

        let mut report = StatusReport::build(&hosts, &devices);
        report.sort_by_key_name("bogus");
        assert_eq!(report.rows[0].device.devid, 1);
        assert_eq!(report.rows[1].device.devid, 2);
    }
}
