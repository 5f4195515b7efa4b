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

use std::env;

use crate::{ObjectStore, Result};

/// Temp folder for object store test
pub struct TempFolder {
    store: ObjectStore,
    // The path under root.
    path: String,
}

impl TempFolder {
    pub fn new(store: &ObjectStore, path: &str) -> Self {
        Self {
            store: store.clone(),
            path: path.to_string(),
        }
    }

    pub async fn remove_all(&self) -> Result<()> {
        self.store.remove_all(&self.path).await
    }
}

/// Test azblob config from environment variables
#[derive(Debug)]
pub struct TestAzblobConfig {
    pub container: String,
    pub account_name: String,
    pub account_key: String,
    pub endpoint: String,
}

/// Returns azblob test config, return None if not found.
pub fn azblob_test_config() -> Option<TestAzblobConfig> {
    let container = env::var("SIDECAR_TEST_AZBLOB_CONTAINER").ok()?;
    if container.is_empty() {
        return None;
    }

    let account_name = env::var("SIDECAR_TEST_AZBLOB_ACCOUNT_NAME").ok()?;
    let endpoint = env::var("SIDECAR_TEST_AZBLOB_ENDPOINT")
        .unwrap_or_else(|_| format!("https://{account_name}.blob.core.windows.net"));
    Some(TestAzblobConfig {
        container,
        account_key: env::var("SIDECAR_TEST_AZBLOB_ACCOUNT_KEY").ok()?,
        account_name,
        endpoint,
    })
}
