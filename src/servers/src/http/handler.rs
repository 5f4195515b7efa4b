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

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use snapshot::ExporterRef;

use crate::error::{ExportSnapshotSnafu, Result};
use crate::metrics_handler::MetricsHandler;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    #[serde(rename = "artifactURL")]
    pub artifact_url: String,
}

/// Handler to export a new snapshot of the database.
///
/// The run is cancelled if the client goes away before it completes.
pub async fn snapshot(State(exporter): State<ExporterRef>) -> Result<Json<SnapshotResponse>> {
    let artifact_url = exporter
        .export_with_default_timeout()
        .await
        .context(ExportSnapshotSnafu)?;

    Ok(Json(SnapshotResponse { artifact_url }))
}

/// Handler to export metrics
pub async fn metrics(State(state): State<MetricsHandler>) -> String {
    state.render()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {}

/// Handler to export healthy check
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {})
}
