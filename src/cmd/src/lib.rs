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

use async_trait::async_trait;
use common_telemetry::{error, info};

pub mod error;
pub mod options;
pub mod sidecar;

lazy_static::lazy_static! {
    static ref APP_VERSION: prometheus::IntGaugeVec =
        prometheus::register_int_gauge_vec!("snapshot_sidecar_app_version", "app version", &["version"]).unwrap();
}

#[async_trait]
pub trait App: Send {
    fn name(&self) -> &str;

    /// Starts the app. Returns once the app is serving.
    async fn start(&mut self) -> error::Result<()>;

    async fn stop(&self) -> error::Result<()>;
}

/// Starts `app` and stops it once the process receives a shutdown signal.
pub async fn start_app(mut app: Box<dyn App>) -> error::Result<()> {
    let name = app.name().to_string();

    app.start().await?;
    info!("App {name} is started");

    shutdown_signal().await;

    if let Err(err) = app.stop().await {
        error!(err; "Failed to stop app {name}!");
    }
    info!("Goodbye!");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(e; "Failed to listen for ctrl-c signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(e; "Failed to listen for terminate signal");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received terminate signal"),
    }
}

pub fn log_versions() {
    // Report app version as gauge.
    APP_VERSION.with_label_values(&[version()]).inc();

    info!("version: {}", version());
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
