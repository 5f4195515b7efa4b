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

use common_telemetry::error;
use prometheus::{Encoder, TextEncoder};

/// Renders the metrics of the default registry in the Prometheus text format.
#[derive(Clone, Default)]
pub struct MetricsHandler;

impl MetricsHandler {
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            error!(e; "Failed to encode metrics");
            return String::new();
        }

        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use prometheus::{register_int_counter, IntCounter};

    use super::*;

    #[test]
    fn test_render_registered_counter() {
        let counter: IntCounter =
            register_int_counter!("servers_test_render_total", "test counter").unwrap();
        counter.inc_by(3);

        let text = MetricsHandler.render();
        assert!(text.contains("servers_test_render_total 3"), "{text}");
    }
}
