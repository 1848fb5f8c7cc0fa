//! Client for reading and writing files on Efes: reserve a write target on
//! the tracker, stream chunks to the storage device, then commit the key.

use crate::device::{DeviceClient, check_response};
use crate::error::{EfesError, Result};
use crate::model::{Device, Host};
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub tracker_url: String,
    pub chunk_size: usize,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tracker_url: "http://127.0.0.1:8001".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOpenResponse {
    pub path: String,
    pub fid: i64,
    pub devid: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetPathsResponse {
    pub paths: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetDevicesResponse {
    pub devices: Vec<Device>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetHostsResponse {
    pub hosts: Vec<Host>,
}

pub struct Client {
    config: ClientConfig,
    http: reqwest::Client,
    device: DeviceClient,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let device = DeviceClient::new(config.timeout)?;
        Ok(Self {
            config,
            http,
            device,
        })
    }

    /// Write the contents of `reader` under `key`. `size` is the declared
    /// total length when known up front; `None` streams until end of input.
    /// Returns the number of bytes committed.
    pub async fn write<R>(&self, key: &str, reader: &mut R, size: Option<i64>) -> Result<i64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let open = self.create_open(size).await?;
        tracing::debug!(
            "reserved fid {} on device {} at {}",
            open.fid,
            open.devid,
            open.path
        );

        let mut session = WriteSession::new(
            self.device.clone(),
            open.path,
            self.config.chunk_size,
            size,
        );
        let sent = session.send_all(reader).await?;

        self.create_close(key, sent, open.fid, open.devid).await?;
        Ok(sent)
    }

    /// Read the content stored under `key`, streaming it into `writer`. A
    /// non-success fetch aborts before anything is written out.
    pub async fn read<W>(&self, key: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let paths = self.get_paths(key).await?;
        let Some(path) = paths.first() else {
            return Err(EfesError::Unavailable(format!(
                "no reachable location for key {}",
                key
            )));
        };

        let response = self.device.fetch(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| EfesError::Transport(error.to_string()))?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Delete the key. The mapping stops resolving immediately; bytes are
    /// reclaimed asynchronously by the tracker sweep.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.post_form("delete", &[("key", key.to_string())]).await?;
        Ok(())
    }

    /// Check whether a key currently resolves to a reachable location.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.get_paths(key).await {
            Ok(paths) => Ok(!paths.is_empty()),
            Err(EfesError::NotFound(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Full host and device inventory, dead records included.
    pub async fn fetch_inventory(&self) -> Result<(Vec<Host>, Vec<Device>)> {
        let devices: GetDevicesResponse = self.get_json("get-devices", &[]).await?;
        let hosts: GetHostsResponse = self.get_json("get-hosts", &[]).await?;
        Ok((hosts.hosts, devices.devices))
    }

    async fn get_paths(&self, key: &str) -> Result<Vec<String>> {
        let response: GetPathsResponse = self
            .get_json("get-paths", &[("key", key.to_string())])
            .await?;
        Ok(response.paths)
    }

    async fn create_open(&self, size: Option<i64>) -> Result<CreateOpenResponse> {
        let mut form: Vec<(&str, String)> = Vec::new();
        if let Some(size) = size {
            form.push(("size", size.to_string()));
        }
        let response = self.post_form("create-open", &form).await?;
        decode_json(response).await
    }

    async fn create_close(&self, key: &str, size: i64, fid: i64, devid: i64) -> Result<()> {
        self.post_form(
            "create-close",
            &[
                ("key", key.to_string()),
                ("size", size.to_string()),
                ("fid", fid.to_string()),
                ("devid", devid.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.tracker_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http
            .get(self.endpoint(path))
            .query(params)
            .send()
            .await?;
        let response = check_response(response, StatusCode::OK).await?;
        decode_json(response).await
    }

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(self.endpoint(path))
            .form(form)
            .send()
            .await?;
        check_response(response, StatusCode::OK).await
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|error| EfesError::ProtocolViolation(format!("invalid response body: {}", error)))
}

/// One chunked upload against the location returned by create-open.
///
/// The running byte offset is the session's cursor: it lives here and only
/// here. A failed chunk can be retried at the unchanged cursor; a lost
/// session means reserving again from scratch.
pub struct WriteSession {
    device: DeviceClient,
    path: String,
    chunk_size: usize,
    total: Option<i64>,
    offset: i64,
}

impl WriteSession {
    pub fn new(device: DeviceClient, path: String, chunk_size: usize, total: Option<i64>) -> Self {
        Self {
            device,
            path,
            chunk_size: chunk_size.max(1),
            total,
            offset: 0,
        }
    }

    /// Bytes acknowledged by the device so far in this session.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Drain `reader`, sending strictly ordered chunks one at a time. With a
    /// declared total the session stops once the cumulative bytes reach it,
    /// without a trailing empty request; without one, a short or empty read
    /// signals end of input and that final write completes the session.
    pub async fn send_all<R>(&mut self, reader: &mut R) -> Result<i64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            let want = match self.total {
                Some(total) => ((total - self.offset).max(0) as usize).min(self.chunk_size),
                None => self.chunk_size,
            };
            let chunk = read_chunk(reader, want).await?;
            let chunk_len = chunk.len();

            if let Some(total) = self.total {
                if chunk_len < want {
                    return Err(EfesError::InvalidRequest(format!(
                        "input ended at {} bytes, before the declared length {}",
                        self.offset + chunk_len as i64,
                        total
                    )));
                }
            }

            self.send_chunk(chunk).await?;

            match self.total {
                Some(total) => {
                    if self.offset >= total {
                        break;
                    }
                }
                None => {
                    if chunk_len < self.chunk_size {
                        break;
                    }
                }
            }
        }
        Ok(self.offset)
    }

    /// Send one chunk at the current cursor. The cursor only advances after
    /// the device acknowledges, so a failed chunk may be retried as is.
    pub async fn send_chunk(&mut self, chunk: Bytes) -> Result<()> {
        let len = chunk.len() as i64;
        self.device
            .send_chunk(&self.path, self.offset, self.total, chunk)
            .await?;
        self.offset += len;
        Ok(())
    }
}

async fn read_chunk<R>(reader: &mut R, want: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; want];
    let mut filled = 0;
    while filled < want {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{LENGTH_HEADER, OFFSET_HEADER};
    use axum::Router;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::patch;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct SeenChunk {
        offset: i64,
        total: Option<i64>,
        len: usize,
    }

    type Seen = Arc<Mutex<Vec<SeenChunk>>>;

    async fn mock_device() -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/dev1/*rest",
                patch(
                    |State(seen): State<Seen>, headers: HeaderMap, body: axum::body::Bytes| async move {
                        let offset = headers
                            .get(OFFSET_HEADER)
                            .and_then(|value| value.to_str().ok())
                            .and_then(|value| value.parse::<i64>().ok())
                            .unwrap();
                        let total = headers
                            .get(LENGTH_HEADER)
                            .and_then(|value| value.to_str().ok())
                            .and_then(|value| value.parse::<i64>().ok());
                        seen.lock().unwrap().push(SeenChunk {
                            offset,
                            total,
                            len: body.len(),
                        });
                    },
                ),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/dev1/000/000/0000000001.fid", addr), seen)
    }

    fn session(path: String, chunk_size: usize, total: Option<i64>) -> WriteSession {
        let device = DeviceClient::new(Duration::from_secs(5)).unwrap();
        WriteSession::new(device, path, chunk_size, total)
    }

    #[tokio::test]
    async fn test_known_size_sends_ordered_chunks_without_trailing_empty() {
        let (path, seen) = mock_device().await;
        let mut session = session(path, 4, Some(10));

        let mut input: &[u8] = b"0123456789";
        let sent = session.send_all(&mut input).await.unwrap();
        assert_eq!(sent, 10);

        let chunks = seen.lock().unwrap().clone();
        assert_eq!(
            chunks,
            vec![
                SeenChunk { offset: 0, total: Some(10), len: 4 },
                SeenChunk { offset: 4, total: Some(10), len: 4 },
                SeenChunk { offset: 8, total: Some(10), len: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_length_write_sends_one_empty_chunk() {
        let (path, seen) = mock_device().await;
        let mut session = session(path, 4, Some(0));

        let mut input: &[u8] = b"";
        assert_eq!(session.send_all(&mut input).await.unwrap(), 0);

        let chunks = seen.lock().unwrap().clone();
        assert_eq!(chunks, vec![SeenChunk { offset: 0, total: Some(0), len: 0 }]);
    }

    #[tokio::test]
    async fn test_unknown_size_stops_on_short_read() {
        let (path, seen) = mock_device().await;
        let mut session = session(path, 4, None);

        let mut input: &[u8] = b"012345";
        assert_eq!(session.send_all(&mut input).await.unwrap(), 6);

        let chunks = seen.lock().unwrap().clone();
        assert_eq!(
            chunks,
            vec![
                SeenChunk { offset: 0, total: None, len: 4 },
                SeenChunk { offset: 4, total: None, len: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_size_exact_multiple_ends_with_empty_chunk() {
        let (path, seen) = mock_device().await;
        let mut session = session(path, 4, None);

        let mut input: &[u8] = b"01234567";
        assert_eq!(session.send_all(&mut input).await.unwrap(), 8);

        let lens: Vec<usize> = seen.lock().unwrap().iter().map(|c| c.len).collect();
        assert_eq!(lens, vec![4, 4, 0]);
    }

    #[tokio::test]
    async fn test_truncated_input_with_declared_size_is_an_error() {
        let (path, _seen) = mock_device().await;
        let mut session = session(path, 4, Some(100));

        let mut input: &[u8] = b"0123456";
        let result = session.send_all(&mut input).await;
        assert!(matches!(result, Err(EfesError::InvalidRequest(_))));
    }
}
