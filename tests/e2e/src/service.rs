//! Fake backend service.
//!
//! Reads the generated configuration like the real service would, binds the
//! configured host and port, and answers `GET /api/version`.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use axum::routing::get;
use axum::{Json, Router};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use testbed_core::ServiceEntryPoint;
use testbed_core::template::parse_entries;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const HOST_KEY: &str = "server.webserver.host";
const PORT_KEY: &str = "server.webserver.httpPort";

/// How the fake service behaves once launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Serves `code: 0` until told to stop.
    Healthy,
    /// Serves the given non-zero code until told to stop.
    Code(i32),
    /// Never binds and ignores the stop signal.
    NeverBind,
    /// Fails immediately, as if the port were taken.
    FailToBind,
    /// Serves `code: 0` and keeps serving after the stop signal.
    IgnoreShutdown,
}

#[derive(Debug, Serialize)]
struct VersionInfo {
    version: &'static str,
    #[serde(rename = "compileDate")]
    compile_date: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionBody {
    code: i32,
    version: VersionInfo,
}

/// Fake service implementing [`ServiceEntryPoint`].
#[derive(Clone)]
pub struct FakeService {
    behavior: Behavior,
    seen_config: Arc<Mutex<Option<BTreeMap<String, String>>>>,
    kill_switch: CancellationToken,
}

impl FakeService {
    /// Creates a fake with the given behavior.
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            seen_config: Arc::new(Mutex::new(None)),
            kill_switch: CancellationToken::new(),
        }
    }

    /// Configuration entries the service read at launch, if it ran.
    pub fn seen_config(&self) -> Option<BTreeMap<String, String>> {
        self.seen_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops a server that ignored the stop signal.
    pub fn kill(&self) {
        self.kill_switch.cancel();
    }

    fn router(code: i32) -> Router {
        Router::new().route(
            "/api/version",
            get(move || async move {
                Json(VersionBody {
                    code,
                    version: VersionInfo {
                        version: env!("CARGO_PKG_VERSION"),
                        compile_date: "2026-01-01",
                    },
                })
            }),
        )
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        // The last clone going away takes any detached server with it.
        if Arc::strong_count(&self.seen_config) == 1 {
            self.kill_switch.cancel();
        }
    }
}

#[async_trait]
impl ServiceEntryPoint for FakeService {
    async fn run(&self, config_path: &Path, shutdown: CancellationToken) -> Result<()> {
        let text = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let entries = parse_entries(&text);
        *self
            .seen_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(entries.clone());

        let host = entries.get(HOST_KEY).map_or("127.0.0.1", String::as_str);
        let port: u16 = entries
            .get(PORT_KEY)
            .context("port missing from config")?
            .parse()
            .context("invalid port in config")?;

        match self.behavior {
            Behavior::NeverBind => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Behavior::FailToBind => bail!("failed to bind {host}:{port}: address in use"),
            Behavior::Healthy | Behavior::Code(_) => {
                let code = match self.behavior {
                    Behavior::Code(code) => code,
                    _ => 0,
                };
                let listener = TcpListener::bind((host, port))
                    .await
                    .with_context(|| format!("failed to bind {host}:{port}"))?;
                tracing::debug!(port, code, "fake service listening");
                serve(listener, Self::router(code), shutdown).await;
                Ok(())
            }
            Behavior::IgnoreShutdown => {
                let listener = TcpListener::bind((host, port))
                    .await
                    .with_context(|| format!("failed to bind {host}:{port}"))?;
                tokio::spawn(serve(listener, Self::router(0), self.kill_switch.clone()));
                shutdown.cancelled().await;
                tracing::debug!(port, "fake service ignoring stop request");
                Ok(())
            }
        }
    }
}

/// Accept loop serving `router` until `shutdown` is cancelled.
async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let router = router.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = TowerToHyperService::new(router);
                        let conn = hyper::server::conn::http1::Builder::new()
                            .serve_connection(io, service);
                        tokio::select! {
                            result = conn => {
                                if let Err(e) = result {
                                    tracing::debug!("fake service connection error: {}", e);
                                }
                            }
                            () = shutdown.cancelled() => {}
                        }
                    });
                }
                Err(e) => {
                    tracing::debug!("fake service accept error: {}", e);
                    break;
                }
            }
        }
    }
}
