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

//! Exports on-disk snapshots of a Prometheus server to object storage.
//!
//! An export asks the server to create a snapshot ([prom_client]), packs the
//! snapshot directory into a zip archive ([archive]) and streams the archive
//! to an [storage::UploadSink]. [export::Exporter] drives the three steps.

pub mod archive;
pub mod error;
pub mod export;
pub mod metrics;
pub mod prom_client;
pub mod storage;
pub mod test_util;

pub use error::{Error, ExportErrorKind, Result};
pub use export::{ExportStage, ExportState, Exporter, ExporterRef, SnapshotOptions};
pub use prom_client::{
    HttpPromClient, PromClientOptions, SnapshotClient, SnapshotClientRef, SnapshotHandle,
};
pub use storage::{new_upload_sink, ArchiveReader, StorageConfig, UploadSink, UploadSinkRef};
