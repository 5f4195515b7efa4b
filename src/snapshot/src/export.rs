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

use std::fmt;
use std::future::Future;
use std::io::Seek;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common_error::ext::ErrorExt;
use common_telemetry::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use strum::{AsRefStr, Display};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::archive::{ZipArchiveBuilder, DEFAULT_ARCHIVE_BASE_PATH};
use crate::error::{
    CancelledSnafu, CreateSpoolSnafu, Error, JoinArchiveTaskSnafu, Result, RewindSpoolSnafu,
};
use crate::metrics::{METRIC_ARCHIVE_BYTES, METRIC_EXPORT_ELAPSED, METRIC_EXPORT_TOTAL};
use crate::prom_client::SnapshotClientRef;
use crate::storage::UploadSinkRef;

pub const DEFAULT_SNAPSHOTS_DIR: &str = "/prometheus/data/snapshots";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotOptions {
    /// Directory the database creates snapshots in, as seen by this process.
    pub snapshots_dir: String,
    /// Prefix of every entry in the archive.
    pub archive_base_path: String,
    /// Maximum number of exports running at the same time, 0 for no limit.
    pub max_inflight_exports: usize,
    /// Deadline of a single export, no deadline if unset.
    #[serde(with = "humantime_serde")]
    pub export_timeout: Option<Duration>,
    /// Directory of the temporary files archives are spooled to. Defaults
    /// to the system temporary directory.
    pub spool_dir: Option<String>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            snapshots_dir: DEFAULT_SNAPSHOTS_DIR.to_string(),
            archive_base_path: DEFAULT_ARCHIVE_BASE_PATH.to_string(),
            max_inflight_exports: 0,
            export_timeout: None,
            spool_dir: None,
        }
    }
}

/// Non-terminal states of an export, where work happens and failures occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ExportStage {
    Idle,
    SnapshotRequested,
    Archiving,
    Uploading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ExportState {
    Idle,
    SnapshotRequested,
    Archiving,
    Uploading,
    Done,
    /// Absorbing state, `stage` is where the run stopped.
    Failed { stage: ExportStage },
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportState::Failed { stage } => write!(f, "failed at {stage}"),
            _ => f.write_str(self.as_ref()),
        }
    }
}

impl From<ExportStage> for ExportState {
    fn from(stage: ExportStage) -> Self {
        match stage {
            ExportStage::Idle => ExportState::Idle,
            ExportStage::SnapshotRequested => ExportState::SnapshotRequested,
            ExportStage::Archiving => ExportState::Archiving,
            ExportStage::Uploading => ExportState::Uploading,
        }
    }
}

impl ExportState {
    /// The stage of a non-terminal state.
    pub fn stage(&self) -> Option<ExportStage> {
        match self {
            ExportState::Idle => Some(ExportStage::Idle),
            ExportState::SnapshotRequested => Some(ExportStage::SnapshotRequested),
            ExportState::Archiving => Some(ExportStage::Archiving),
            ExportState::Uploading => Some(ExportStage::Uploading),
            ExportState::Done | ExportState::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage().is_none()
    }
}

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Bookkeeping of a single export.
#[derive(Debug)]
pub struct ExportRun {
    id: u64,
    state: ExportState,
    snapshot_name: Option<String>,
    started_at: Instant,
    stage_started_at: Instant,
}

impl ExportRun {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            id: NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed),
            state: ExportState::Idle,
            snapshot_name: None,
            started_at: now,
            stage_started_at: now,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    fn transition(&mut self, next: ExportState) {
        let now = Instant::now();
        if let Some(stage) = self.state.stage() {
            METRIC_EXPORT_ELAPSED
                .with_label_values(&[stage.as_ref()])
                .observe(now.duration_since(self.stage_started_at).as_secs_f64());
        }
        debug!(
            "Export run {} ({}): {} -> {}",
            self.id,
            self.snapshot_name.as_deref().unwrap_or("-"),
            self.state,
            next
        );
        self.state = next;
        self.stage_started_at = now;
    }

    /// Moves to `Failed` at the current stage. No-op on terminal states.
    fn fail(&mut self, err: &Error) {
        if let Some(stage) = self.state.stage() {
            self.transition(ExportState::Failed { stage });
        }
        METRIC_EXPORT_TOTAL.with_label_values(&["failure"]).inc();
        if err.status_code().should_log_error() {
            error!(err; "Export run {} failed after {:?}", self.id, self.started_at.elapsed());
        } else {
            warn!(
                "Export run {} failed after {:?}: {}",
                self.id,
                self.started_at.elapsed(),
                err
            );
        }
    }

    fn done(&mut self, locator: &str) {
        self.transition(ExportState::Done);
        METRIC_EXPORT_TOTAL.with_label_values(&["success"]).inc();
        info!(
            "Export run {} exported snapshot {} to {} in {:?}",
            self.id,
            self.snapshot_name.as_deref().unwrap_or("-"),
            locator,
            self.started_at.elapsed()
        );
    }
}

/// Runs snapshot exports: request a snapshot, archive its directory and
/// upload the archive.
///
/// Every call to [Exporter::export] is an independent run with its own
/// snapshot and archive. Runs share nothing but the collaborators.
pub struct Exporter {
    client: SnapshotClientRef,
    sink: UploadSinkRef,
    snapshots_dir: PathBuf,
    archive_base_path: String,
    export_timeout: Option<Duration>,
    spool_dir: Option<PathBuf>,
    admission: Option<Arc<Semaphore>>,
}

pub type ExporterRef = Arc<Exporter>;

impl Exporter {
    pub fn new(client: SnapshotClientRef, sink: UploadSinkRef, opts: &SnapshotOptions) -> Self {
        let admission = (opts.max_inflight_exports > 0)
            .then(|| Arc::new(Semaphore::new(opts.max_inflight_exports)));
        Self {
            client,
            sink,
            snapshots_dir: PathBuf::from(&opts.snapshots_dir),
            archive_base_path: opts.archive_base_path.clone(),
            export_timeout: opts.export_timeout,
            spool_dir: opts.spool_dir.as_ref().map(PathBuf::from),
            admission,
        }
    }

    /// Directory of the snapshot named `name`. Existence is not checked.
    pub fn snapshot_dir(&self, name: &str) -> PathBuf {
        self.snapshots_dir.join(name)
    }

    /// Runs one export with the configured deadline.
    pub async fn export_with_default_timeout(&self) -> Result<String> {
        self.export_within(self.export_timeout).await
    }

    /// Runs one export and returns the artifact locator.
    ///
    /// The run stops with [Error::Cancelled] once `cancel` is cancelled.
    /// Dropping the returned future cancels the run as well.
    pub async fn export(&self, cancel: &CancellationToken) -> Result<String> {
        let token = cancel.child_token();
        let _guard = token.clone().drop_guard();

        let mut run = ExportRun::new();
        match self.run(&mut run, &token).await {
            Ok(locator) => {
                run.done(&locator);
                Ok(locator)
            }
            Err(e) => {
                run.fail(&e);
                Err(e)
            }
        }
    }

    /// Runs one export that is cancelled once `timeout` elapses.
    pub async fn export_within(&self, timeout: Option<Duration>) -> Result<String> {
        let cancel = CancellationToken::new();
        let Some(timeout) = timeout else {
            return self.export(&cancel).await;
        };

        let run = self.export(&cancel);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            _ = tokio::time::sleep(timeout) => {
                warn!("Export exceeded deadline of {:?}, cancelling", timeout);
                cancel.cancel();
                run.await
            }
        }
    }

    async fn run(&self, run: &mut ExportRun, token: &CancellationToken) -> Result<String> {
        let _permit = match &self.admission {
            Some(semaphore) => {
                cancellable(token, ExportStage::Idle, async {
                    Ok(semaphore.clone().acquire_owned().await.ok())
                })
                .await?
            }
            None => None,
        };

        run.transition(ExportState::SnapshotRequested);
        let handle = cancellable(
            token,
            ExportStage::SnapshotRequested,
            self.client.create_snapshot(),
        )
        .await?;
        run.snapshot_name = Some(handle.name.clone());

        let snapshot_dir = self.snapshot_dir(&handle.name);
        run.transition(ExportState::Archiving);
        let spool = cancellable(
            token,
            ExportStage::Archiving,
            self.archive(snapshot_dir, token.clone()),
        )
        .await?;

        run.transition(ExportState::Uploading);
        cancellable(
            token,
            ExportStage::Uploading,
            self.sink.upload_stream(Box::new(spool), &handle.name),
        )
        .await
    }

    /// Archives `snapshot_dir` into an anonymous temporary file and returns it
    /// rewound to the start.
    async fn archive(
        &self,
        snapshot_dir: PathBuf,
        token: CancellationToken,
    ) -> Result<tokio::fs::File> {
        let builder = ZipArchiveBuilder::new(snapshot_dir, self.archive_base_path.clone());
        let spool_dir = self.spool_dir.clone();
        let spool = tokio::task::spawn_blocking(move || {
            let spool = match spool_dir {
                Some(dir) => tempfile::tempfile_in(dir),
                None => tempfile::tempfile(),
            }
            .context(CreateSpoolSnafu)?;
            let mut spool = builder.create_archive(spool, &token)?;
            spool.rewind().context(RewindSpoolSnafu)?;
            Ok::<_, Error>(spool)
        })
        .await
        .context(JoinArchiveTaskSnafu)??;

        if let Ok(metadata) = spool.metadata() {
            METRIC_ARCHIVE_BYTES.observe(metadata.len() as f64);
        }
        Ok(tokio::fs::File::from_std(spool))
    }
}

/// Runs `fut` unless `token` is cancelled first, in which case the run fails
/// with [Error::Cancelled] at `stage`.
async fn cancellable<T, F>(token: &CancellationToken, stage: ExportStage, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => CancelledSnafu { stage }.fail(),
        result = fut => result,
    }
}
