//! HTTP client for storage-device endpoints: chunked append, fetch and
//! release against the path returned by create-open.

use crate::error::{EfesError, Result};
use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;

pub const OFFSET_HEADER: &str = "efes-file-offset";
pub const LENGTH_HEADER: &str = "efes-file-length";

#[derive(Clone)]
pub struct DeviceClient {
    client: reqwest::Client,
}

impl DeviceClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Append one chunk at the session's running offset. Appends at a
    /// previously written offset are idempotent to retransmission.
    pub async fn send_chunk(
        &self,
        path: &str,
        offset: i64,
        total_len: Option<i64>,
        body: Bytes,
    ) -> Result<()> {
        let mut request = self
            .client
            .patch(path)
            .header(OFFSET_HEADER, offset.to_string())
            .body(body);
        if let Some(len) = total_len {
            request = request.header(LENGTH_HEADER, len.to_string());
        }

        let response = request.send().await?;
        check_response(response, StatusCode::OK).await?;
        Ok(())
    }

    /// Fetch the full stored content at a path. The caller streams the body.
    pub async fn fetch(&self, path: &str) -> Result<reqwest::Response> {
        let response = self.client.get(path).send().await?;
        check_response(response, StatusCode::OK).await
    }

    /// Release the bytes stored at a path. A missing file counts as already
    /// released.
    pub async fn release(&self, path: &str) -> Result<()> {
        let response = self.client.delete(path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_response(response, StatusCode::OK).await?;
        Ok(())
    }
}

/// Classify a response against the expected status: 5xx is a server fault
/// the caller may retry, 4xx is a client fault, anything else unexpected is
/// a protocol violation. The body is carried along for diagnosis.
pub(crate) async fn check_response(
    response: reqwest::Response,
    expected: StatusCode,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(EfesError::Unavailable(body));
        }
        return Err(EfesError::ServerFault {
            status: status.as_u16(),
            body,
        });
    }
    if status == StatusCode::NOT_FOUND {
        return Err(EfesError::NotFound(body));
    }
    if status.is_client_error() {
        return Err(EfesError::InvalidRequest(format!(
            "client error ({}): {}",
            status.as_u16(),
            body
        )));
    }
    Err(EfesError::ProtocolViolation(format!(
        "unexpected status code {} (expected {}), body: {}",
        status.as_u16(),
        expected.as_u16(),
        body
    )))
}
