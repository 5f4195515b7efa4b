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
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use cmd::sidecar::{Instance, SidecarOptions};
use cmd::App;
use common_test_util::ports::bind_local;
use common_test_util::temp_dir::{create_temp_dir, write_files, TempDir};
use object_store::services::{Azblob, Fs};
use object_store::test_util::{azblob_test_config, TempFolder};
use object_store::ObjectStore;
use serde_json::{json, Value};
use servers::http::HttpOptions;
use servers::server::Server;
use snapshot::storage::{AzblobConfig, FileConfig};
use snapshot::{PromClientOptions, SnapshotOptions, StorageConfig};
use tokio::sync::oneshot;

/// Files of every snapshot the fake Prometheus creates, relative to the snapshot directory.
pub const SNAPSHOT_FILES: &[(&str, &str)] = &[
    ("01HQ3XJ4K2Z8W6B0Y7N5M9P1QR/index", "index"),
    ("01HQ3XJ4K2Z8W6B0Y7N5M9P1QR/meta.json", r#"{"version":1}"#),
    ("chunks_head/000001", "0123456789"),
];

pub enum StorageType {
    File,
    Azblob,
}

impl StorageType {
    pub fn test_on(&self) -> bool {
        match self {
            StorageType::File => true, // always test file
            StorageType::Azblob => azblob_test_config().is_some(),
        }
    }
}

/// How the fake Prometheus answers snapshot requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrometheusBehavior {
    Snapshot,
    /// Answers 200 with a non-success status, as with admin APIs disabled.
    Reject,
    Unavailable,
}

struct FakePrometheusState {
    snapshots_dir: PathBuf,
    behavior: PrometheusBehavior,
    created: AtomicUsize,
}

/// Serves the snapshot endpoint of the Prometheus admin API, creating
/// [SNAPSHOT_FILES] under `snapshots_dir` for every snapshot.
pub struct FakePrometheus {
    addr: SocketAddr,
    state: Arc<FakePrometheusState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FakePrometheus {
    pub async fn start(snapshots_dir: &Path, behavior: PrometheusBehavior) -> Self {
        let state = Arc::new(FakePrometheusState {
            snapshots_dir: snapshots_dir.to_path_buf(),
            behavior,
            created: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/api/v1/admin/tsdb/snapshot", post(create_snapshot))
            .with_state(state.clone());

        let (listener, addr) = bind_local().await;
        let (tx, rx) = oneshot::channel::<()>();
        let _handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(tx),
        }
    }

    pub fn api_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of snapshots created so far.
    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::Relaxed)
    }
}

impl Drop for FakePrometheus {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub fn snapshot_name(seq: usize) -> String {
    format!("20240101T000000Z-{seq:016x}")
}

async fn create_snapshot(State(state): State<Arc<FakePrometheusState>>) -> (StatusCode, Json<Value>) {
    match state.behavior {
        PrometheusBehavior::Snapshot => {
            let name = snapshot_name(state.created.fetch_add(1, Ordering::Relaxed));
            let files = SNAPSHOT_FILES
                .iter()
                .map(|(path, content)| (*path, content.as_bytes()))
                .collect::<Vec<_>>();
            write_files(state.snapshots_dir.join(&name), &files);

            (
                StatusCode::OK,
                Json(json!({"status": "success", "data": {"name": name}})),
            )
        }
        PrometheusBehavior::Reject => (
            StatusCode::OK,
            Json(json!({
                "status": "error",
                "errorType": "unavailable",
                "error": "admin APIs disabled",
            })),
        ),
        PrometheusBehavior::Unavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "error": "starting up"})),
        ),
    }
}

enum StorageGuard {
    File(TempDir),
    Azblob(TempFolder),
}

/// A running sidecar wired to a [FakePrometheus] and a test storage.
pub struct TestContext {
    pub prometheus: FakePrometheus,
    /// Reads the artifacts back, rooted where the sidecar uploads.
    pub store: ObjectStore,
    instance: Instance,
    _snapshots_dir: TempDir,
    storage_guard: StorageGuard,
}

impl TestContext {
    pub fn sidecar_url(&self, path: &str) -> String {
        format!("http://{}{}", self.instance.listening(), path)
    }

    pub fn snapshot_url(&self) -> String {
        self.sidecar_url("/api/v1/admin/tsdb/snapshot")
    }

    pub async fn teardown(self) {
        self.instance.server().shutdown().await.unwrap();
        if let StorageGuard::Azblob(folder) = &self.storage_guard {
            folder.remove_all().await.unwrap();
        }
    }
}

fn test_storage(store_type: &StorageType, name: &str) -> (StorageConfig, ObjectStore, StorageGuard) {
    match store_type {
        StorageType::File => {
            let dir = create_temp_dir(&format!("sidecar_artifacts_{name}"));
            let root = dir.path().to_str().unwrap().to_string();
            let store = ObjectStore::new(Fs::default().root(&root))
                .unwrap()
                .finish();

            (
                StorageConfig::File(FileConfig { root }),
                store,
                StorageGuard::File(dir),
            )
        }
        StorageType::Azblob => {
            let config = azblob_test_config().unwrap();
            let root = uuid::Uuid::new_v4().to_string();
            let builder = Azblob::default()
                .root(&root)
                .container(&config.container)
                .account_name(&config.account_name)
                .account_key(&config.account_key)
                .endpoint(&config.endpoint);
            let store = ObjectStore::new(builder).unwrap().finish();
            let folder = TempFolder::new(&store, "/");

            let container_url = format!(
                "{}/{}/{}",
                config.endpoint.trim_end_matches('/'),
                config.container,
                root
            );
            (
                StorageConfig::Azblob(AzblobConfig {
                    container_url,
                    account_name: Some(config.account_name),
                    account_key: Some(config.account_key),
                    sas_token: None,
                }),
                store,
                StorageGuard::Azblob(folder),
            )
        }
    }
}

/// Starts a sidecar the way the `start` command does, on an ephemeral port.
pub async fn setup_sidecar(
    store_type: StorageType,
    name: &str,
    behavior: PrometheusBehavior,
) -> TestContext {
    common_telemetry::init_default_ut_logging();

    let snapshots_dir = create_temp_dir(&format!("sidecar_snapshots_{name}"));
    let prometheus = FakePrometheus::start(snapshots_dir.path(), behavior).await;
    let (storage, store, storage_guard) = test_storage(&store_type, name);

    let opts = SidecarOptions {
        http: HttpOptions {
            addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        },
        prometheus: PromClientOptions {
            api_base: prometheus.api_base(),
            ..Default::default()
        },
        snapshot: SnapshotOptions {
            snapshots_dir: snapshots_dir.path().to_str().unwrap().to_string(),
            ..Default::default()
        },
        storage,
        ..Default::default()
    };
    opts.validate().unwrap();

    let mut instance = Instance::try_new(&opts, vec![]).unwrap();
    instance.start().await.unwrap();

    TestContext {
        prometheus,
        store,
        instance,
        _snapshots_dir: snapshots_dir,
        storage_guard,
    }
}
