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

use clap::Parser;
use cmd::error::Result;
use cmd::options::GlobalOptions;
use cmd::sidecar::SubCommand;
use cmd::start_app;

/// Exports Prometheus TSDB snapshots to object storage on request.
#[derive(Parser)]
#[command(name = "snapshot-sidecar", version, about)]
struct Command {
    #[clap(subcommand)]
    subcmd: SubCommand,

    #[clap(flatten)]
    global_options: GlobalOptions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Command::parse();

    let opts = cmd.subcmd.load_options(&cmd.global_options)?;
    let app = cmd.subcmd.build(opts).await?;

    start_app(Box::new(app)).await
}
