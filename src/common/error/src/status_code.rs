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

use strum::AsRefStr;

/// Common status code for public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
pub enum StatusCode {
    // ====== Begin of common status code ==============
    /// Unknown error.
    Unknown = 1000,
    /// Unexpected error, maybe there is a BUG.
    Unexpected = 1002,
    /// Internal server error.
    Internal = 1003,
    /// Invalid arguments.
    InvalidArguments = 1004,
    /// The task is cancelled.
    Cancelled = 1005,
    // ====== End of common status code ================

    // ====== Begin of storage related status code =====
    /// Storage is temporarily unable to handle the request
    StorageUnavailable = 5000,
    // ====== End of storage related status code =======

    // ====== Begin of upstream related status code =====
    /// The upstream database could not be reached or answered with an error status.
    UpstreamUnavailable = 8000,
    /// The upstream database answered but refused the request.
    UpstreamRejected = 8001,
    /// The upstream response could not be understood.
    UpstreamProtocol = 8002,
    // ====== End of upstream related status code =====
}

impl StatusCode {
    /// Returns `true` if we should print an error log for an error with
    /// this status code.
    pub fn should_log_error(&self) -> bool {
        match self {
            StatusCode::Unknown
            | StatusCode::Unexpected
            | StatusCode::Internal
            | StatusCode::Cancelled
            | StatusCode::StorageUnavailable
            | StatusCode::UpstreamUnavailable
            | StatusCode::UpstreamRejected
            | StatusCode::UpstreamProtocol => true,
            StatusCode::InvalidArguments => false,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_status_code_display(code: StatusCode, msg: &str) {
        let code_msg = format!("{code}");
        assert_eq!(msg, code_msg);
    }

    #[test]
    fn test_display_status_code() {
        assert_status_code_display(StatusCode::Unknown, "Unknown");
        assert_status_code_display(StatusCode::UpstreamRejected, "UpstreamRejected");
    }

    #[test]
    fn test_should_log_error() {
        assert!(StatusCode::UpstreamUnavailable.should_log_error());
        assert!(StatusCode::Cancelled.should_log_error());
        assert!(!StatusCode::InvalidArguments.should_log_error());
    }
}
