//! HTTP surface of the bridge.
//!
//! | Route              | Method | Purpose                                  |
//! |--------------------|--------|------------------------------------------|
//! | `/keep_alive/`     | GET    | publish the configured keep-alive pair   |
//! | `/post/`           | POST   | publish one message                      |
//! | `/subscribe/`      | GET    | stream payloads of one topic             |
//!
//! Routes answer with and without the trailing slash.

use anyhow::{anyhow, Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::mqtt::{ConnectionHandle, Connector};

pub mod body;
pub mod guard;
pub mod logging;
pub mod normalize;
pub mod publish;
pub mod subscribe;

/// Shared state of all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    /// Long-lived session used by every publish request.
    pub publisher: Arc<ConnectionHandle>,
    /// Opens the dedicated session of each subscription.
    pub connector: Arc<dyn Connector>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(
        config: Arc<BridgeConfig>,
        publisher: Arc<ConnectionHandle>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            publisher,
            connector,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Stops the server and ends every open subscription stream.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/keep_alive/", get(publish::keep_alive))
        .route("/keep_alive", get(publish::keep_alive))
        .route("/post/", post(publish::publish))
        .route("/post", post(publish::publish))
        .route("/subscribe/", get(subscribe::subscribe))
        .route("/subscribe", get(subscribe::subscribe))
        .layer(DefaultBodyLimit::max(body::MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            logging::log_request,
        ))
        .with_state(state)
}

pub struct BridgeServer {
    addr: SocketAddr,
    state: AppState,
}

impl BridgeServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Binds the listener and serves requests on a background task.
    pub async fn spawn(self) -> Result<BridgeHandle> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to listen on {}", self.addr))?;
        let addr = listener.local_addr()?;

        let mut shutdown = self.state.shutdown_signal();
        let app = router(self.state.clone());
        let join = tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await;
            if let Err(err) = served {
                log::error!("http server stopped: {}", err);
            }
        });

        Ok(BridgeHandle {
            addr,
            state: self.state,
            join: Some(join),
        })
    }
}

pub struct BridgeHandle {
    pub addr: SocketAddr,
    state: AppState,
    join: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Ends open subscription streams and waits for the server to drain.
    pub async fn stop(mut self) -> Result<()> {
        self.state.shutdown();
        if let Some(join) = self.join.take() {
            join.await
                .map_err(|_| anyhow!("http server task panicked"))?;
        }
        Ok(())
    }
}
