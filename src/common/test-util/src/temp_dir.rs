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

use std::fs;
use std::path::Path;

pub use tempfile::{NamedTempFile, TempDir};

pub fn create_temp_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new().prefix(prefix).tempdir().unwrap()
}

pub fn create_named_temp_file() -> NamedTempFile {
    tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap()
}

/// Writes every `(relative_path, content)` pair under `root`, creating the
/// parent directories as needed.
pub fn write_files<P: AsRef<Path>>(root: P, files: &[(&str, &[u8])]) {
    for (relative_path, content) in files {
        let path = root.as_ref().join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
    }
}
