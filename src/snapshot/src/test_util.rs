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

//! In-memory [SnapshotClient] and [UploadSink] implementations for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::io::AsyncReadExt;

use crate::error::{ReadArchiveStreamSnafu, Result, SnapshotRejectedSnafu, UploadSnafu};
use crate::prom_client::{SnapshotClient, SnapshotHandle};
use crate::storage::{ArchiveReader, UploadSink};

/// Returns the same snapshot name on every call, or rejects every call.
pub struct StubSnapshotClient {
    name: String,
    rejected_status: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubSnapshotClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rejected_status: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A client whose response carries `status` instead of `success`.
    pub fn rejecting(status: &str) -> Self {
        Self {
            rejected_status: Some(status.to_string()),
            ..Self::new("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SnapshotClient for StubSnapshotClient {
    async fn create_snapshot(&self) -> Result<SnapshotHandle> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(status) = &self.rejected_status {
            return SnapshotRejectedSnafu {
                status,
                reason: None::<String>,
            }
            .fail();
        }
        Ok(SnapshotHandle {
            name: self.name.clone(),
        })
    }
}

/// Buffers every upload in memory and answers with `stub://<name>`.
#[derive(Default)]
pub struct StubUploadSink {
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    failing: bool,
}

impl StubUploadSink {
    /// A sink that consumes the stream and then fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    /// `(name, content)` of every successful upload, in order.
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl UploadSink for StubUploadSink {
    async fn upload_stream(&self, mut stream: ArchiveReader, name: &str) -> Result<String> {
        let mut content = Vec::new();
        stream
            .read_to_end(&mut content)
            .await
            .context(ReadArchiveStreamSnafu { name })?;
        if self.failing {
            return Err(object_store::Error::new(
                object_store::ErrorKind::Unexpected,
                "stub upload failure",
            ))
            .context(UploadSnafu { name });
        }

        self.uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.to_string(), content));
        Ok(format!("stub://{name}"))
    }
}
