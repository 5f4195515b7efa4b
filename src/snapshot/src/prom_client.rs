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

use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_telemetry::{debug, warn};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use url::Url;

use crate::error::{
    BuildHttpClientSnafu, DecodeSnapshotResponseSnafu, EmptySnapshotNameSnafu,
    InvalidBaseUrlSnafu, InvalidSnapshotNameSnafu, RequestSnapshotSnafu, Result,
    SnapshotRejectedSnafu, UnexpectedStatusSnafu,
};

/// Path of the TSDB admin snapshot endpoint, relative to the API base.
pub const SNAPSHOT_API_PATH: &str = "api/v1/admin/tsdb/snapshot";

pub const DEFAULT_PROM_API_BASE: &str = "http://0.0.0.0:9090";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// A snapshot created by the database, identified by its directory name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHandle {
    pub name: String,
}

/// Asks the database to materialize a new on-disk snapshot.
#[async_trait]
pub trait SnapshotClient: Send + Sync {
    /// Creates a snapshot. Exactly one attempt is made per call.
    async fn create_snapshot(&self) -> Result<SnapshotHandle>;
}

pub type SnapshotClientRef = Arc<dyn SnapshotClient>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromClientOptions {
    /// Base URL of the Prometheus HTTP API.
    pub api_base: String,
    /// Timeout of a single snapshot request.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for PromClientOptions {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_PROM_API_BASE.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// example: {"status":"success","data":{"name":"20201005T145700Z-380704bb7b4d7c03"}}
#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    status: String,
    #[serde(default)]
    data: Option<SnapshotData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotData {
    #[serde(default)]
    name: String,
}

/// [SnapshotClient] backed by the Prometheus TSDB admin API.
#[derive(Debug, Clone)]
pub struct HttpPromClient {
    client: reqwest::Client,
    snapshot_url: Url,
}

impl HttpPromClient {
    pub fn new(opts: &PromClientOptions) -> Result<Self> {
        let snapshot_url = snapshot_url(&opts.api_base)?;
        let mut builder = reqwest::Client::builder();
        if !opts.timeout.is_zero() {
            builder = builder.timeout(opts.timeout);
        }
        let client = builder.build().context(BuildHttpClientSnafu)?;

        Ok(Self {
            client,
            snapshot_url,
        })
    }

    pub fn snapshot_url(&self) -> &Url {
        &self.snapshot_url
    }
}

/// Appends [SNAPSHOT_API_PATH] to the path already present in `api_base`.
fn snapshot_url(api_base: &str) -> Result<Url> {
    let mut url = Url::parse(api_base).context(InvalidBaseUrlSnafu { url: api_base })?;
    let path = format!("{}/{}", url.path().trim_end_matches('/'), SNAPSHOT_API_PATH);
    url.set_path(&path);
    Ok(url)
}

#[async_trait]
impl SnapshotClient for HttpPromClient {
    async fn create_snapshot(&self) -> Result<SnapshotHandle> {
        let url = self.snapshot_url.as_str();
        debug!("Requesting snapshot, url: {}", url);

        let resp = self
            .client
            .post(self.snapshot_url.clone())
            .send()
            .await
            .context(RequestSnapshotSnafu { url })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Snapshot request failed, url: {}, statusCode: {}", url, status);
            return UnexpectedStatusSnafu {
                url,
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let body = resp.bytes().await.context(RequestSnapshotSnafu { url })?;
        let resp: SnapshotResponse =
            serde_json::from_slice(&body).context(DecodeSnapshotResponseSnafu { url })?;
        debug!("Snapshot response: {:?}", resp);

        ensure!(
            resp.status.eq_ignore_ascii_case("success"),
            SnapshotRejectedSnafu {
                status: resp.status,
                reason: resp.error,
            }
        );

        let name = resp.data.map(|d| d.name).unwrap_or_default();
        ensure!(!name.is_empty(), EmptySnapshotNameSnafu { url });
        ensure!(is_plain_name(&name), InvalidSnapshotNameSnafu { name });

        Ok(SnapshotHandle { name })
    }
}

/// Returns true if `name` is a single normal path component.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
