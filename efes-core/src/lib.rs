//! Efes Core - Core library for a distributed blob store: the tracker's
//! placement and commit protocol, the chunked transfer client, and the
//! device/host health and status model.

pub mod client;
pub mod device;
pub mod error;
pub mod model;
pub mod operations;
pub mod registry;
pub mod status;

pub use client::{
    Client, ClientConfig, CreateOpenResponse, DEFAULT_CHUNK_SIZE, GetDevicesResponse,
    GetHostsResponse, GetPathsResponse, WriteSession,
};
pub use device::{DeviceClient, LENGTH_HEADER, OFFSET_HEADER};
pub use error::{EfesError, Result};
pub use model::{
    Device, DeviceStatus, FileInfo, Host, HostStatus, PendingFile, fid_relative_path, file_url,
};
pub use operations::*;
pub use registry::{CommitOutcome, DynRegistry, Registry, SqliteRegistry};
pub use status::{ClusterTotals, DeviceStatusRow, SortKey, StatusReport};
