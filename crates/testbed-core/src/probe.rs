//! Health probing.
//!
//! A probe answers one question: is the service healthy right now? Transport
//! failures, timeouts, non-2xx answers and unparseable bodies all count as
//! "not healthy" and never surface as errors.

use anyhow::{Context, bail};
use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthProbeResult {
    /// The service answered with a success code.
    Healthy,
    /// The service is unreachable or answered with a failure.
    Unhealthy,
}

impl HealthProbeResult {
    /// Returns true if the service is healthy.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Health check against a running service.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Performs a single probe.
    async fn probe(&self) -> HealthProbeResult;
}

/// Body of the version endpoint. Only `code` is inspected.
#[derive(Debug, Deserialize)]
struct VersionResponse {
    code: i32,
}

/// Probes `GET http://host:port/<path>` and expects `{"code": 0, ...}`.
#[derive(Debug, Clone)]
pub struct VersionEndpointProbe {
    host: String,
    port: u16,
    path: String,
    request_timeout: Duration,
}

impl VersionEndpointProbe {
    /// Creates a probe for the given address and relative endpoint path.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, path: &str) -> Self {
        Self {
            host: host.into(),
            port,
            path: format!("/{}", path.trim_start_matches('/')),
            request_timeout: Duration::from_secs(2),
        }
    }

    /// Sets the timeout of a single probe request.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Full URL probed.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }

    async fn fetch_code(&self) -> anyhow::Result<i32> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("failed to connect to {}:{}", self.host, self.port))?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .context("HTTP handshake failed")?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::trace!("probe connection closed: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(&self.path)
            .header("Host", format!("{}:{}", self.host, self.port))
            .header("Accept", "application/json")
            .body(Empty::<Bytes>::new())
            .context("failed to build request")?;

        let response = sender
            .send_request(request)
            .await
            .context("failed to send request")?;

        let status = response.status();
        if !status.is_success() {
            bail!("health endpoint returned {status}");
        }

        let body = response
            .into_body()
            .collect()
            .await
            .context("failed to read response")?
            .to_bytes();
        let version: VersionResponse =
            serde_json::from_slice(&body).context("failed to parse response")?;
        Ok(version.code)
    }
}

#[async_trait]
impl HealthProbe for VersionEndpointProbe {
    async fn probe(&self) -> HealthProbeResult {
        match tokio::time::timeout(self.request_timeout, self.fetch_code()).await {
            Ok(Ok(0)) => HealthProbeResult::Healthy,
            Ok(Ok(code)) => {
                tracing::debug!(url = %self.url(), code, "service reported failure code");
                HealthProbeResult::Unhealthy
            }
            Ok(Err(e)) => {
                tracing::debug!(url = %self.url(), "probe failed: {:#}", e);
                HealthProbeResult::Unhealthy
            }
            Err(_) => {
                tracing::debug!(url = %self.url(), "probe timed out");
                HealthProbeResult::Unhealthy
            }
        }
    }
}
