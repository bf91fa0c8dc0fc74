//! HTTP client over the paravirtual socket to the host.
//!
//! At config-fetch time no IP networking exists in the guest; the vsock
//! stream to the host (context id 2) is the only channel. The client speaks
//! plain HTTP/1.1 over that stream, one connection per request.

use std::time::Duration;

use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::http1;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::time::timeout;
use tokio_vsock::{VsockAddr, VsockStream};
use vmlite_shared::constants::CONFIG_VSOCK_PORT;
use vmlite_shared::{VmliteError, VmliteResult};

/// vsock context id of the host.
const HOST_CID: u32 = 2;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct HostClient {
    port: u32,
    dial_timeout: Duration,
}

impl Default for HostClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClient {
    pub fn new() -> Self {
        Self {
            port: CONFIG_VSOCK_PORT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    async fn connect(&self) -> VmliteResult<VsockStream> {
        let addr = VsockAddr::new(HOST_CID, self.port);
        match timeout(self.dial_timeout, VsockStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(err)) => Err(VmliteError::Dial(format!(
                "vsock cid={HOST_CID} port={}: {err}",
                self.port
            ))),
            Err(_) => Err(VmliteError::Dial(format!(
                "vsock cid={HOST_CID} port={}: timed out after {:?}",
                self.port, self.dial_timeout
            ))),
        }
    }

    /// Perform a GET with standard HTTP semantics.
    pub async fn get(&self, path: &str) -> VmliteResult<Response<Incoming>> {
        let stream = self.connect().await?;
        let io = TokioIo::new(stream);

        let (mut sender, connection) = http1::handshake(io)
            .await
            .map_err(|err| VmliteError::Dial(format!("http handshake: {err}")))?;
        tokio::spawn(async move {
            connection.await.ok();
        });

        let request = Request::builder()
            .uri(path)
            .header(hyper::header::HOST, "vmlite-host")
            .body(Empty::<Bytes>::new())
            .map_err(|err| VmliteError::Internal(format!("build request for {path}: {err}")))?;

        sender
            .send_request(request)
            .await
            .map_err(|err| VmliteError::Dial(format!("GET {path}: {err}")))
    }

    /// GET that succeeds only on HTTP 200, returning the full body.
    pub async fn get_json(&self, path: &str) -> VmliteResult<Vec<u8>> {
        let response = self.get(path).await?;
        if response.status() != StatusCode::OK {
            return Err(VmliteError::HttpStatus(response.status().as_u16()));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|err| VmliteError::HttpBody(format!("GET {path}: {err}")))?;
        Ok(body.to_bytes().to_vec())
    }
}
