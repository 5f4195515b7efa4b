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

use std::any::Any;
use std::io;

use common_error::ext::ErrorExt;
use common_error::status_code::StatusCode;
use snafu::{Location, Snafu};
use strum::{AsRefStr, Display};

use crate::export::ExportStage;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to request snapshot from {}", url))]
    RequestSnapshot {
        url: String,
        #[snafu(source)]
        error: reqwest::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Snapshot request to {} failed, statusCode={}, body: {}",
        url,
        status,
        body
    ))]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to decode snapshot response from {}", url))]
    DecodeSnapshotResponse {
        url: String,
        #[snafu(source)]
        error: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Snapshot response from {} has no snapshot name", url))]
    EmptySnapshotName {
        url: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Snapshot name '{}' is not a plain directory name", name))]
    InvalidSnapshotName {
        name: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Snapshot request rejected, status={}{}",
        status,
        reason.as_ref().map(|r| format!(", error: {r}")).unwrap_or_default()
    ))]
    SnapshotRejected {
        status: String,
        reason: Option<String>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to walk snapshot directory at {}", path))]
    WalkSnapshotDir {
        path: String,
        #[snafu(source)]
        error: walkdir::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to open file {}", path))]
    OpenFile {
        path: String,
        #[snafu(source)]
        error: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to read file {}", path))]
    ReadFile {
        path: String,
        #[snafu(source)]
        error: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to create archive entry {} for {}", entry, path))]
    CreateArchiveEntry {
        entry: String,
        path: String,
        #[snafu(source)]
        error: zip::result::ZipError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to write archive entry {}", entry))]
    WriteArchiveEntry {
        entry: String,
        #[snafu(source)]
        error: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to finish archive"))]
    FinishArchive {
        #[snafu(source)]
        error: zip::result::ZipError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to create archive spool file"))]
    CreateSpool {
        #[snafu(source)]
        error: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to rewind archive spool file"))]
    RewindSpool {
        #[snafu(source)]
        error: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to create directory {}", path))]
    CreateDir {
        path: String,
        #[snafu(source)]
        error: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to upload {}", name))]
    Upload {
        name: String,
        #[snafu(source)]
        error: object_store::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to read archive stream while uploading {}", name))]
    ReadArchiveStream {
        name: String,
        #[snafu(source)]
        error: io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Export cancelled while {}", stage))]
    Cancelled {
        stage: ExportStage,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Archive task failed to complete"))]
    JoinArchiveTask {
        #[snafu(source)]
        error: tokio::task::JoinError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid Prometheus API base URL: {}", url))]
    InvalidBaseUrl {
        url: String,
        #[snafu(source)]
        error: url::ParseError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to build HTTP client"))]
    BuildHttpClient {
        #[snafu(source)]
        error: reqwest::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to build object store"))]
    BuildObjectStore {
        #[snafu(source)]
        error: object_store::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid container URL '{}': {}", url, reason))]
    InvalidContainerUrl {
        url: String,
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of export failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ExportErrorKind {
    /// The database could not be reached or answered with a non-2xx status.
    Transport,
    /// The database answered with a body that could not be used.
    Protocol,
    /// The database answered but did not report success.
    RemoteRejected,
    /// Local snapshot files or the archive spool failed.
    Filesystem,
    /// The upload sink failed.
    Upload,
    /// The export was cancelled.
    Cancellation,
    /// Setup or runtime failures that are not tied to a collaborator.
    Internal,
}

impl Error {
    pub fn kind(&self) -> ExportErrorKind {
        match self {
            Error::RequestSnapshot { .. } | Error::UnexpectedStatus { .. } => {
                ExportErrorKind::Transport
            }

            Error::DecodeSnapshotResponse { .. }
            | Error::EmptySnapshotName { .. }
            | Error::InvalidSnapshotName { .. } => ExportErrorKind::Protocol,

            Error::SnapshotRejected { .. } => ExportErrorKind::RemoteRejected,

            Error::WalkSnapshotDir { .. }
            | Error::OpenFile { .. }
            | Error::ReadFile { .. }
            | Error::CreateArchiveEntry { .. }
            | Error::WriteArchiveEntry { .. }
            | Error::FinishArchive { .. }
            | Error::CreateSpool { .. }
            | Error::RewindSpool { .. }
            | Error::CreateDir { .. } => ExportErrorKind::Filesystem,

            Error::Upload { .. } | Error::ReadArchiveStream { .. } => ExportErrorKind::Upload,

            Error::Cancelled { .. } => ExportErrorKind::Cancellation,

            Error::JoinArchiveTask { .. }
            | Error::InvalidBaseUrl { .. }
            | Error::BuildHttpClient { .. }
            | Error::BuildObjectStore { .. }
            | Error::InvalidContainerUrl { .. } => ExportErrorKind::Internal,
        }
    }

    /// The export stage this error belongs to, `None` for setup errors.
    pub fn stage(&self) -> Option<ExportStage> {
        match self {
            Error::Cancelled { stage, .. } => Some(*stage),
            Error::JoinArchiveTask { .. } => Some(ExportStage::Archiving),
            Error::CreateDir { .. } => None,
            _ => match self.kind() {
                ExportErrorKind::Transport
                | ExportErrorKind::Protocol
                | ExportErrorKind::RemoteRejected => Some(ExportStage::SnapshotRequested),
                ExportErrorKind::Filesystem => Some(ExportStage::Archiving),
                ExportErrorKind::Upload => Some(ExportStage::Uploading),
                ExportErrorKind::Cancellation | ExportErrorKind::Internal => None,
            },
        }
    }
}

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidBaseUrl { .. } | Error::InvalidContainerUrl { .. } => {
                StatusCode::InvalidArguments
            }
            Error::BuildHttpClient { .. } | Error::BuildObjectStore { .. } => StatusCode::Internal,
            Error::JoinArchiveTask { .. } => StatusCode::Unexpected,
            _ => match self.kind() {
                ExportErrorKind::Transport => StatusCode::UpstreamUnavailable,
                ExportErrorKind::Protocol => StatusCode::UpstreamProtocol,
                ExportErrorKind::RemoteRejected => StatusCode::UpstreamRejected,
                ExportErrorKind::Filesystem | ExportErrorKind::Upload => {
                    StatusCode::StorageUnavailable
                }
                ExportErrorKind::Cancellation => StatusCode::Cancelled,
                ExportErrorKind::Internal => StatusCode::Internal,
            },
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
