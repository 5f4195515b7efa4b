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
use std::net::SocketAddr;

use axum::http::StatusCode as HttpStatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common_error::ext::ErrorExt;
use common_error::status_code::StatusCode;
use common_telemetry::{debug, error};
use serde_json::json;
use snafu::{Location, Snafu};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{} server has been started", server))]
    AlreadyStarted {
        server: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to bind address {}", addr))]
    TcpBind {
        addr: SocketAddr,
        #[snafu(source)]
        error: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to start HTTP server"))]
    StartHttp {
        #[snafu(source)]
        error: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to join HTTP server task"))]
    JoinServerTask {
        #[snafu(source)]
        error: tokio::task::JoinError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid parameter, reason: {}", reason))]
    InvalidParameter {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Internal error: {}", err_msg))]
    Internal { err_msg: String },

    #[snafu(display("Failed to export snapshot"))]
    ExportSnapshot {
        source: snapshot::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Message returned to HTTP clients.
    ///
    /// Export failures report the pipeline error itself, not this wrapper.
    pub fn response_msg(&self) -> String {
        match self {
            Error::ExportSnapshot { source, .. } => source.output_msg(),
            _ => self.output_msg(),
        }
    }
}

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::AlreadyStarted { .. } => StatusCode::Unexpected,
            Error::InvalidParameter { .. } => StatusCode::InvalidArguments,
            Error::Internal { .. } => StatusCode::Internal,
            Error::TcpBind { .. } | Error::StartHttp { .. } | Error::JoinServerTask { .. } => {
                StatusCode::Internal
            }
            Error::ExportSnapshot { source, .. } => source.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let error_msg = self.response_msg();
        let status = match &self {
            Error::InvalidParameter { .. } => HttpStatusCode::BAD_REQUEST,
            // The exporter has logged the failure of the run already.
            Error::ExportSnapshot { .. } => {
                debug!("Failed to handle HTTP request: {self}");
                HttpStatusCode::INTERNAL_SERVER_ERROR
            }
            _ => {
                if self.status_code().should_log_error() {
                    error!(self; "Failed to handle HTTP request: ");
                } else {
                    debug!("Failed to handle HTTP request: {self}");
                }

                HttpStatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({
            "error": error_msg,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use snafu::ResultExt;
    use snapshot::error::CancelledSnafu;
    use snapshot::ExportStage;

    use super::*;

    #[test]
    fn test_export_error_message() {
        let err = Err::<(), _>(
            CancelledSnafu {
                stage: ExportStage::Archiving,
            }
            .build(),
        )
        .context(ExportSnapshotSnafu)
        .unwrap_err();

        assert_eq!("Export cancelled while archiving", err.response_msg());
        assert_eq!(StatusCode::Cancelled, err.status_code());
    }

    #[test]
    fn test_already_started_message() {
        let err = AlreadyStartedSnafu { server: "HTTP" }.build();
        assert_eq!("HTTP server has been started", err.response_msg());
    }
}
