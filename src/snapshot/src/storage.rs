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
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common_telemetry::{debug, info, warn};
use object_store::layers::{LoggingLayer, RetryLayer};
use object_store::services::{Azblob, Fs};
use object_store::util::join_url;
use object_store::{ObjectStore, Writer};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use url::{Position, Url};

use crate::error::{
    BuildObjectStoreSnafu, CreateDirSnafu, InvalidContainerUrlSnafu, ReadArchiveStreamSnafu,
    Result, UploadSnafu,
};

/// A byte stream handed to an [UploadSink].
pub type ArchiveReader = Box<dyn AsyncRead + Send + Unpin>;

/// Destination of exported archives.
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Consumes `stream` and stores it as `name`, returning a locator that can
    /// be used to retrieve the artifact later.
    ///
    /// An interrupted upload is a total failure; no partial artifact is
    /// reported.
    async fn upload_stream(&self, stream: ArchiveReader, name: &str) -> Result<String>;
}

pub type UploadSinkRef = Arc<dyn UploadSink>;

/// Size of a block written to the object store.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

const READ_BUFFER_SIZE: usize = 1024 * 1024;

pub const DEFAULT_FILE_STORAGE_ROOT: &str = "./snapshot_sidecar_data/artifacts";

/// Directory below the file storage root holding uploads in progress.
pub const ATOMIC_WRITE_DIR: &str = ".tmp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    Azblob(AzblobConfig),
    File(FileConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Azblob(AzblobConfig::default())
    }
}

impl StorageConfig {
    pub fn name(&self) -> &'static str {
        match self {
            StorageConfig::Azblob(_) => "Azblob",
            StorageConfig::File(_) => "File",
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzblobConfig {
    /// URL of the target container, e.g.
    /// `https://<account>.blob.core.windows.net/<container>[/<root>]`.
    /// A query string is used as the SAS token unless `sas_token` is set.
    pub container_url: String,
    /// Defaults to the first label of the container URL host.
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
}

impl fmt::Debug for AzblobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzblobConfig")
            .field("container_url", &redact_query(&self.container_url))
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "******"))
            .field("sas_token", &self.sas_token.as_ref().map(|_| "******"))
            .finish()
    }
}

/// Replaces the query string of `raw`, which carries SAS tokens, with a mask.
pub fn redact_query(raw: &str) -> String {
    match raw.split_once('?') {
        Some((url, _)) => format!("{url}?******"),
        None => raw.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub root: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_FILE_STORAGE_ROOT.to_string(),
        }
    }
}

/// Where a container URL points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerLocation {
    pub endpoint: String,
    pub container: String,
    pub root: String,
    pub account_name: Option<String>,
    pub sas_token: Option<String>,
}

impl ContainerLocation {
    /// Base of every artifact locator: `<endpoint>/<container>/<root>`.
    fn locator_base(&self) -> String {
        join_url(&join_url(&self.endpoint, &self.container), &self.root)
    }
}

pub(crate) fn parse_container_url(raw: &str) -> Result<ContainerLocation> {
    let invalid = |reason: &str| {
        InvalidContainerUrlSnafu {
            url: redact_query(raw),
            reason,
        }
        .build()
    };

    if raw.is_empty() {
        return Err(invalid("container URL is required"));
    }
    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    let host = url.host_str().context(InvalidContainerUrlSnafu {
        url: redact_query(raw),
        reason: "missing host",
    })?;

    let mut segments = url
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty());
    let container = segments
        .next()
        .ok_or_else(|| invalid("missing container name"))?
        .to_string();
    let root = format!("/{}", segments.collect::<Vec<_>>().join("/"));

    let account_name = host
        .contains(".blob.")
        .then(|| host.split('.').next().map(|s| s.to_string()))
        .flatten();
    let sas_token = url.query().filter(|q| !q.is_empty()).map(|q| q.to_string());

    Ok(ContainerLocation {
        endpoint: url[..Position::BeforePath].to_string(),
        container,
        root,
        account_name,
        sas_token,
    })
}

/// Builds the [UploadSink] described by `config`.
pub fn new_upload_sink(config: &StorageConfig) -> Result<UploadSinkRef> {
    let sink = match config {
        StorageConfig::Azblob(azblob_config) => new_azblob_sink(azblob_config)?,
        StorageConfig::File(file_config) => new_fs_sink(file_config)?,
    };
    info!(
        "Upload sink {} is ready, locator base: {}",
        config.name(),
        sink.locator_base
    );
    Ok(Arc::new(sink))
}

fn new_azblob_sink(config: &AzblobConfig) -> Result<ObjectStoreSink> {
    let location = parse_container_url(&config.container_url)?;

    let mut builder = Azblob::default()
        .endpoint(&location.endpoint)
        .container(&location.container)
        .root(&location.root);
    if let Some(account_name) = config.account_name.as_ref().or(location.account_name.as_ref()) {
        builder = builder.account_name(account_name);
    }
    if let Some(account_key) = &config.account_key {
        builder = builder.account_key(account_key);
    }
    if let Some(sas_token) = config.sas_token.as_ref().or(location.sas_token.as_ref()) {
        builder = builder.sas_token(sas_token);
    }
    if config.account_key.is_none() && config.sas_token.is_none() && location.sas_token.is_none()
    {
        debug!("No azblob credential configured, using the identity from environment");
    }

    let store = ObjectStore::new(builder)
        .context(BuildObjectStoreSnafu)?
        .finish()
        .layer(RetryLayer::new().with_jitter())
        .layer(LoggingLayer::default());

    Ok(ObjectStoreSink::new(store, location.locator_base()))
}

fn new_fs_sink(config: &FileConfig) -> Result<ObjectStoreSink> {
    std::fs::create_dir_all(&config.root).context(CreateDirSnafu { path: &config.root })?;
    let root = std::fs::canonicalize(&config.root)
        .context(CreateDirSnafu { path: &config.root })?
        .to_string_lossy()
        .into_owned();

    // Artifacts are written under the atomic write dir and renamed into place
    // on close, so the final name only ever holds a complete archive.
    let atomic_write_dir = Path::new(&root).join(ATOMIC_WRITE_DIR);
    let builder = Fs::default()
        .root(&root)
        .atomic_write_dir(&atomic_write_dir.to_string_lossy());
    let store = ObjectStore::new(builder)
        .context(BuildObjectStoreSnafu)?
        .finish()
        .layer(LoggingLayer::default());

    Ok(ObjectStoreSink::new(store, join_url("file:///", &root)))
}

/// [UploadSink] writing into an [ObjectStore].
#[derive(Debug, Clone)]
pub struct ObjectStoreSink {
    store: ObjectStore,
    locator_base: String,
    chunk_size: usize,
}

impl ObjectStoreSink {
    pub fn new(store: ObjectStore, locator_base: impl Into<String>) -> Self {
        Self {
            store,
            locator_base: locator_base.into(),
            chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
        }
    }

    pub fn locator(&self, name: &str) -> String {
        join_url(&self.locator_base, name)
    }

    /// Copies `stream` into `writer` and commits it.
    async fn write_all(stream: &mut ArchiveReader, writer: &mut Writer, name: &str) -> Result<u64> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut copied = 0u64;
        loop {
            let n = stream
                .read(&mut buf)
                .await
                .context(ReadArchiveStreamSnafu { name })?;
            if n == 0 {
                break;
            }
            writer
                .write(Bytes::copy_from_slice(&buf[..n]))
                .await
                .context(UploadSnafu { name })?;
            copied += n as u64;
        }
        writer.close().await.context(UploadSnafu { name })?;
        Ok(copied)
    }
}

#[async_trait]
impl UploadSink for ObjectStoreSink {
    async fn upload_stream(&self, mut stream: ArchiveReader, name: &str) -> Result<String> {
        let writer = self
            .store
            .writer_with(name)
            .chunk(self.chunk_size)
            .await
            .context(UploadSnafu { name })?;
        let mut guard = AbortOnDrop::new(writer, name);
        let Some(writer) = guard.writer.as_mut() else {
            unreachable!("writer is only taken by disarm or abort")
        };

        match Self::write_all(&mut stream, writer, name).await {
            Ok(copied) => {
                guard.disarm();
                let locator = self.locator(name);
                info!("Uploaded {} ({} bytes) to {}", name, copied, locator);
                Ok(locator)
            }
            Err(e) => {
                guard.abort().await;
                Err(e)
            }
        }
    }
}

/// Owns the [Writer] of an upload and aborts it unless the upload completed.
///
/// Dropping an armed guard, e.g. when the upload future is cancelled, aborts
/// the writer in a background task.
struct AbortOnDrop {
    writer: Option<Writer>,
    name: String,
}

impl AbortOnDrop {
    fn new(writer: Writer, name: &str) -> Self {
        Self {
            writer: Some(writer),
            name: name.to_string(),
        }
    }

    fn disarm(&mut self) {
        self.writer = None;
    }

    async fn abort(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.abort().await {
                warn!(e; "Failed to abort upload of {}", self.name);
            }
        }
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Upload of {} interrupted, aborting", name);
                let _ = handle.spawn(async move {
                    if let Err(e) = writer.abort().await {
                        warn!(e; "Failed to abort interrupted upload of {}", name);
                    }
                });
            }
            Err(_) => warn!("Upload of {} interrupted outside of a runtime", name),
        }
    }
}
