// Copyright 2023 Greptime Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::net::SocketAddr;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::response::IntoResponse;
use axum::{routing, BoxError, Json, Router};
use common_telemetry::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use snafu::{ensure, ResultExt};
use snapshot::ExporterRef;
use tokio::sync::oneshot::{self, Sender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower::timeout::TimeoutLayer;
use tower::util::option_layer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::error::{
    AlreadyStartedSnafu, JoinServerTaskSnafu, Result, StartHttpSnafu, TcpBindSnafu,
};
use crate::metrics_handler::MetricsHandler;
use crate::server::Server;

pub mod dyn_log;
pub mod handler;

pub const HTTP_API_VERSION: &str = "v1";
pub const HTTP_SERVER: &str = "HTTP_SERVER";

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:9092";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub addr: String,

    /// Request timeout, `0s` disables it.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            addr: DEFAULT_HTTP_ADDR.to_string(),
            timeout: Duration::ZERO,
        }
    }
}

pub struct HttpServer {
    options: HttpOptions,
    exporter: ExporterRef,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    serve_task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl HttpServer {
    pub fn new(options: HttpOptions, exporter: ExporterRef) -> Self {
        Self {
            options,
            exporter,
            shutdown_tx: Mutex::new(None),
            serve_task: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    pub fn make_app(&self) -> Router {
        Router::new()
            .nest(
                &format!("/api/{HTTP_API_VERSION}"),
                self.route_admin(self.exporter.clone()),
            )
            .merge(self.route_metrics(MetricsHandler))
            .route("/health", routing::get(handler::health))
            .nest(
                "/debug",
                Router::new().route("/log_level", routing::post(dyn_log::dyn_log_handler)),
            )
    }

    pub fn build(&self, router: Router) -> Router {
        let timeout = (!self.options.timeout.is_zero()).then_some(self.options.timeout);
        router.layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_error))
                .layer(TraceLayer::new_for_http())
                .layer(option_layer(timeout.map(TimeoutLayer::new))),
        )
    }

    fn route_admin<S>(&self, exporter: ExporterRef) -> Router<S> {
        Router::new()
            .route("/admin/tsdb/snapshot", routing::post(handler::snapshot))
            .with_state(exporter)
    }

    fn route_metrics<S>(&self, metrics_handler: MetricsHandler) -> Router<S> {
        Router::new()
            .route("/metrics", routing::get(handler::metrics))
            .with_state(metrics_handler)
    }
}

#[async_trait::async_trait]
impl Server for HttpServer {
    async fn shutdown(&self) -> Result<()> {
        let mut shutdown_tx = self.shutdown_tx.lock().await;
        if let Some(tx) = shutdown_tx.take() {
            if tx.send(()).is_err() {
                info!("Receiver dropped, the HTTP server has already exited");
            }
        }

        if let Some(task) = self.serve_task.lock().await.take() {
            task.await
                .context(JoinServerTaskSnafu)?
                .context(StartHttpSnafu)?;
        }
        info!("Shutdown HTTP server");

        Ok(())
    }

    async fn start(&self, listening: SocketAddr) -> Result<SocketAddr> {
        let mut shutdown_tx = self.shutdown_tx.lock().await;
        ensure!(
            shutdown_tx.is_none(),
            AlreadyStartedSnafu { server: "HTTP" }
        );

        let listener = tokio::net::TcpListener::bind(listening)
            .await
            .context(TcpBindSnafu { addr: listening })?;
        let listening = listener
            .local_addr()
            .context(TcpBindSnafu { addr: listening })?;
        info!("HTTP server is bound to {}", listening);

        let (tx, rx) = oneshot::channel::<()>();
        let app = self.build(self.make_app());
        let server = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(
            async move {
                let _ = rx.await;
            },
        );
        *self.serve_task.lock().await = Some(tokio::spawn(async move { server.await }));
        *shutdown_tx = Some(tx);

        Ok(listening)
    }

    fn name(&self) -> &str {
        HTTP_SERVER
    }
}

/// handle error middleware
///
/// Every failure of the snapshot trigger is a 500, timeouts included.
async fn handle_error(err: BoxError) -> impl IntoResponse {
    error!(err; "Unhandled internal error");

    (
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": format!("Unhandled internal error: {err}"),
        })),
    )
}
