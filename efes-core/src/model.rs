use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Alive,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Alive,
    Dead,
    Readonly,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alive => write!(f, "alive"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

impl FromStr for HostStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "alive" => Ok(Self::Alive),
            "dead" => Ok(Self::Dead),
            other => Err(format!("unknown host status: {}", other)),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alive => write!(f, "alive"),
            Self::Dead => write!(f, "dead"),
            Self::Readonly => write!(f, "readonly"),
        }
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "alive" => Ok(Self::Alive),
            "dead" => Ok(Self::Dead),
            "readonly" => Ok(Self::Readonly),
            other => Err(format!("unknown device status: {}", other)),
        }
    }
}

/// A machine owning one or more storage devices. `addr` is the host:port its
/// device endpoints are served from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub hostid: i64,
    pub hostname: String,
    pub addr: String,
    pub status: HostStatus,
}

/// A storage device record as reported by its host. Capacity counters and
/// the I/O utilization percentage stay `None` until first reported; an
/// absent value means unknown, never zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub devid: i64,
    pub hostid: i64,
    pub status: DeviceStatus,
    pub bytes_total: Option<i64>,
    pub bytes_used: Option<i64>,
    pub bytes_free: Option<i64>,
    pub io_utilization: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Integer-truncated usage percentage, defined only when both counters
    /// have been reported.
    pub fn usage_percent(&self) -> Option<i64> {
        match (self.bytes_used, self.bytes_total) {
            (Some(used), Some(total)) if total > 0 => Some(used * 100 / total),
            _ => None,
        }
    }
}

/// A reserved write target that has not been committed yet. Past the
/// configured staleness threshold it becomes eligible for reclamation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFile {
    pub fid: i64,
    pub devid: i64,
    pub created_at: DateTime<Utc>,
}

/// A committed file bound to one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub fid: i64,
    pub devid: i64,
    pub size: i64,
    pub committed_at: DateTime<Utc>,
}

/// Device-local layout for a file identifier: `{ddd}/{ddd}/{dddddddddd}.fid`.
pub fn fid_relative_path(fid: i64) -> String {
    let nfid = format!("{:010}", fid);
    let split = nfid.len() - 7;
    format!("{}/{}/{}.fid", &nfid[..split], &nfid[split..split + 3], nfid)
}

/// Full URL of a file on its storage device.
pub fn file_url(host_addr: &str, devid: i64, fid: i64) -> String {
    format!("http://{}/dev{}/{}", host_addr, devid, fid_relative_path(fid))
}
