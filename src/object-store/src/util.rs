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

use futures::TryStreamExt;
use opendal::{Entry, Lister};

pub async fn collect(stream: Lister) -> Result<Vec<Entry>, opendal::Error> {
    stream.try_collect::<Vec<_>>().await
}

/// Joins a locator base such as `https://account.blob.core.windows.net/container`
/// with an object path, keeping exactly one `/` between them.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            "https://a.blob.core.windows.net/c/snap",
            join_url("https://a.blob.core.windows.net/c/", "/snap")
        );
        assert_eq!(
            "https://a.blob.core.windows.net/c/r/snap",
            join_url("https://a.blob.core.windows.net/c", "r/snap")
        );
        assert_eq!("http://127.0.0.1:10000/c", join_url("http://127.0.0.1:10000/c", ""));
        assert_eq!("file:///tmp/x/snap", join_url("file:///", "tmp/x/snap"));
    }
}
