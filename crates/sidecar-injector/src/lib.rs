pub mod admission;
mod api;
mod certs;
pub mod cli;
pub mod config;
pub mod injection;
pub mod tracing;

use ::tracing::{debug, error, info};
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use lazy_static::lazy_static;
use std::{net::SocketAddr, process, sync::Arc, sync::RwLock, time::Duration};
use tokio::{runtime::Runtime, signal};
use tower_http::trace::{self, TraceLayer};

use crate::admission::AdmissionCodec;
use crate::api::{
    handlers::{mutate_handler, readiness_handler},
    state::ApiServerState,
};
use crate::certs::create_tls_config_and_watch_certificate_changes;
use crate::config::Config;
use crate::injection::Mutator;
use crate::tracing::setup_tracing;

/// Time given to the in-flight requests once a shutdown signal is received
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

lazy_static! {
    static ref TRACE_SYSTEM_INITIALIZED: RwLock<bool> = RwLock::new(false);
}

pub struct SidecarInjector {
    router: Router,
    addr: SocketAddr,
    tls_config: Option<RustlsConfig>,
}

impl SidecarInjector {
    pub async fn new_from_config(config: Config) -> Result<Self> {
        let tls_config = match config.tls_config {
            Some(tls_config) => Some(
                create_tls_config_and_watch_certificate_changes(tls_config)
                    .await
                    .inspect_err(|e| error!(error = %e, "cannot load TLS certificates"))?,
            ),
            None => None,
        };

        info!(
            containers = config.sidecar_config.containers.len(),
            volumes = config.sidecar_config.volumes.len(),
            ignored_namespaces = ?config.ignored_namespaces,
            "sidecar configuration loaded"
        );

        let state = Arc::new(ApiServerState {
            codec: AdmissionCodec::new(),
            mutator: Mutator::new(config.sidecar_config, config.ignored_namespaces),
        });

        let router = Router::new()
            .route("/mutate", post(mutate_handler))
            .route("/readiness", get(readiness_handler))
            .with_state(state)
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().level(::tracing::Level::INFO))
                    .on_response(trace::DefaultOnResponse::new().level(::tracing::Level::INFO)),
            );

        Ok(Self {
            router,
            addr: config.addr,
            tls_config,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve requests until SIGINT or SIGTERM is received
    pub async fn run(self) -> Result<()> {
        let handle = axum_server::Handle::new();
        tokio::spawn(graceful_shutdown(handle.clone()));

        match self.tls_config {
            Some(tls_config) => {
                info!(address = %self.addr, "started HTTPS server");
                axum_server::bind_rustls(self.addr, tls_config)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await?;
            }
            None => {
                info!(address = %self.addr, "started HTTP server");
                axum_server::bind(self.addr)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await?;
            }
        }
        info!("server stopped");

        Ok(())
    }
}

pub fn run(config: Config) -> Result<()> {
    let rt = Runtime::new()?;

    rt.block_on(async {
        // Setup the tracing system. This MUST be done inside of a tokio Runtime
        // because some collectors rely on it and would panic otherwise.
        match setup_tracing(&config.log_level, &config.log_fmt, config.log_no_color) {
            Err(err) => fatal_error(err.to_string()),
            Ok(_) => {
                debug!("tracing system ready");
                if let Ok(mut w) = TRACE_SYSTEM_INITIALIZED.write() {
                    *w = true;
                }
            }
        };

        let sidecar_injector = match SidecarInjector::new_from_config(config).await {
            Ok(sidecar_injector) => sidecar_injector,
            Err(e) => fatal_error(e.to_string()),
        };

        sidecar_injector.run().await
    })
}

async fn graceful_shutdown(handle: axum_server::Handle) {
    shutdown_signal().await;
    info!("shutdown signal received, draining connections");
    handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

pub fn fatal_error(msg: String) -> ! {
    let trace_system_ready = TRACE_SYSTEM_INITIALIZED
        .read()
        .map(|ready| *ready)
        .unwrap_or(false);
    if trace_system_ready {
        error!("{}", msg);
    } else {
        eprintln!("{msg}");
    }

    process::exit(1);
}
