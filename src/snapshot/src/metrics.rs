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

//! snapshot export metrics

use lazy_static::lazy_static;
use prometheus::*;

lazy_static! {
    /// Finished exports, labeled by `result` (`success` or `failure`).
    pub static ref METRIC_EXPORT_TOTAL: IntCounterVec = register_int_counter_vec!(
        "snapshot_export_total",
        "snapshot export runs",
        &["result"]
    )
    .unwrap();
    /// Time spent in each export stage.
    pub static ref METRIC_EXPORT_ELAPSED: HistogramVec = register_histogram_vec!(
        "snapshot_export_elapsed",
        "snapshot export elapsed seconds by stage",
        &["stage"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 180.0, 600.0]
    )
    .unwrap();
    pub static ref METRIC_ARCHIVE_BYTES: Histogram = register_histogram!(
        "snapshot_archive_bytes",
        "size of snapshot archives in bytes",
        exponential_buckets(1024.0 * 1024.0, 4.0, 10).unwrap()
    )
    .unwrap();
}
