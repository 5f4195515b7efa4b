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

//! The `start` command of the sidecar.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use common_config::Configurable;
use common_error::ext::BoxedError;
use common_telemetry::info;
use common_telemetry::logging::LoggingOptions;
use serde::{Deserialize, Serialize};
use servers::http::{HttpOptions, HttpServer};
use servers::server::Server;
use snafu::{ensure, ResultExt};
use snapshot::storage::{redact_query, AzblobConfig};
use snapshot::{
    new_upload_sink, Exporter, HttpPromClient, PromClientOptions, SnapshotOptions, StorageConfig,
};
use tracing_appender::non_blocking::WorkerGuard;

use crate::error::{
    BuildExporterSnafu, LoadLayeredConfigSnafu, MissingConfigSnafu, ParseAddrSnafu,
    ParseUrlSnafu, Result, ShutdownServerSnafu, StartServerSnafu,
};
use crate::options::GlobalOptions;
use crate::{log_versions, App};

pub const APP_NAME: &str = "snapshot-sidecar";

pub const ENV_PREFIX: &str = "SNAPSHOT_SIDECAR";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarOptions {
    pub http: HttpOptions,
    pub prometheus: PromClientOptions,
    pub snapshot: SnapshotOptions,
    pub storage: StorageConfig,
    pub logging: LoggingOptions,
}

impl Configurable for SidecarOptions {
    fn validate_sanitize(&mut self) -> common_config::error::Result<()> {
        if let StorageConfig::Azblob(azblob) = &mut self.storage {
            azblob.container_url = azblob.container_url.trim().to_string();
        }
        self.prometheus.api_base = self.prometheus.api_base.trim().to_string();

        Ok(())
    }
}

impl SidecarOptions {
    /// Checks the options once every source, the command line included, is merged.
    pub fn validate(&self) -> Result<()> {
        let _: SocketAddr = self
            .http
            .addr
            .parse()
            .context(ParseAddrSnafu {
                addr: &self.http.addr,
            })?;
        url::Url::parse(&self.prometheus.api_base).context(ParseUrlSnafu {
            url: &self.prometheus.api_base,
        })?;

        if let StorageConfig::Azblob(azblob) = &self.storage {
            ensure!(
                !azblob.container_url.is_empty(),
                MissingConfigSnafu {
                    msg: "'storage.container_url' is required by the Azblob storage",
                }
            );
        }
        ensure!(
            !self.snapshot.snapshots_dir.is_empty(),
            MissingConfigSnafu {
                msg: "'snapshot.snapshots_dir'",
            }
        );

        Ok(())
    }
}

pub struct Instance {
    server: HttpServer,
    listening: SocketAddr,

    // Keep the logging guard to prevent the worker from being dropped.
    _guard: Vec<WorkerGuard>,
}

impl Instance {
    /// Wires the exporter and the HTTP server described by `opts`.
    pub fn try_new(opts: &SidecarOptions, guard: Vec<WorkerGuard>) -> Result<Self> {
        let listening = opts.http.addr.parse().context(ParseAddrSnafu {
            addr: &opts.http.addr,
        })?;

        let client = HttpPromClient::new(&opts.prometheus).context(BuildExporterSnafu)?;
        let sink = new_upload_sink(&opts.storage).context(BuildExporterSnafu)?;
        let exporter = Exporter::new(Arc::new(client), sink, &opts.snapshot);

        Ok(Self {
            server: HttpServer::new(opts.http.clone(), Arc::new(exporter)),
            listening,
            _guard: guard,
        })
    }

    pub fn server(&self) -> &HttpServer {
        &self.server
    }

    /// Address of the HTTP server, the bound one once started.
    pub fn listening(&self) -> SocketAddr {
        self.listening
    }
}

#[async_trait]
impl App for Instance {
    fn name(&self) -> &str {
        APP_NAME
    }

    async fn start(&mut self) -> Result<()> {
        let addr = self
            .server
            .start(self.listening)
            .await
            .map_err(BoxedError::new)
            .context(StartServerSnafu)?;
        self.listening = addr;

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.server
            .shutdown()
            .await
            .map_err(BoxedError::new)
            .context(ShutdownServerSnafu)
    }
}

#[derive(Subcommand)]
pub enum SubCommand {
    /// Serve snapshot exports over HTTP.
    Start(StartCommand),
}

impl SubCommand {
    pub async fn build(&self, opts: SidecarOptions) -> Result<Instance> {
        match self {
            SubCommand::Start(cmd) => cmd.build(opts).await,
        }
    }

    pub fn load_options(&self, global_options: &GlobalOptions) -> Result<SidecarOptions> {
        match self {
            SubCommand::Start(cmd) => cmd.load_options(global_options),
        }
    }
}

#[derive(Default, Parser)]
pub struct StartCommand {
    #[clap(short, long)]
    config_file: Option<String>,
    #[clap(long)]
    http_addr: Option<String>,
    /// Base URL of the Prometheus HTTP API.
    #[clap(long)]
    prom_api_base: Option<String>,
    /// Directory Prometheus writes snapshots to.
    #[clap(long)]
    snapshots_dir: Option<String>,
    #[clap(long)]
    azblob_container_url: Option<String>,
    /// Shorthand for `--log-level debug`.
    #[clap(long)]
    debug: bool,
    #[clap(long, default_value = ENV_PREFIX)]
    env_prefix: String,
}

impl fmt::Debug for StartCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartCommand")
            .field("config_file", &self.config_file)
            .field("http_addr", &self.http_addr)
            .field("prom_api_base", &self.prom_api_base)
            .field("snapshots_dir", &self.snapshots_dir)
            .field(
                "azblob_container_url",
                &self.azblob_container_url.as_deref().map(redact_query),
            )
            .field("debug", &self.debug)
            .field("env_prefix", &self.env_prefix)
            .finish()
    }
}

impl StartCommand {
    fn load_options(&self, global_options: &GlobalOptions) -> Result<SidecarOptions> {
        let mut opts = SidecarOptions::load_layered_options(
            self.config_file.as_deref(),
            self.env_prefix.as_ref(),
        )
        .context(LoadLayeredConfigSnafu)?;

        self.merge_with_cli_options(global_options, &mut opts);
        opts.validate()?;

        Ok(opts)
    }

    // The precedence order is: cli > config file > environment variables > default values.
    fn merge_with_cli_options(&self, global_options: &GlobalOptions, opts: &mut SidecarOptions) {
        if let Some(dir) = &global_options.log_dir {
            opts.logging.dir.clone_from(dir);
        }

        if self.debug {
            opts.logging.level = Some("debug".to_string());
        }

        if global_options.log_level.is_some() {
            opts.logging.level.clone_from(&global_options.log_level);
        }

        if let Some(addr) = &self.http_addr {
            opts.http.addr.clone_from(addr);
        }

        if let Some(api_base) = &self.prom_api_base {
            opts.prometheus.api_base.clone_from(api_base);
        }

        if let Some(dir) = &self.snapshots_dir {
            opts.snapshot.snapshots_dir.clone_from(dir);
        }

        if let Some(container_url) = &self.azblob_container_url {
            match &mut opts.storage {
                StorageConfig::Azblob(azblob) => azblob.container_url.clone_from(container_url),
                storage => {
                    *storage = StorageConfig::Azblob(AzblobConfig {
                        container_url: container_url.clone(),
                        ..Default::default()
                    })
                }
            }
        }
    }

    async fn build(&self, opts: SidecarOptions) -> Result<Instance> {
        let guard = common_telemetry::init_global_logging(APP_NAME, &opts.logging);
        log_versions();

        info!("Sidecar start command: {:#?}", self);
        info!("Sidecar options: {:#?}", opts);

        Instance::try_new(&opts, guard)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use common_config::ENV_VAR_SEP;
    use common_test_util::temp_dir::{create_named_temp_file, create_temp_dir};
    use snapshot::storage::FileConfig;

    use super::*;
    use crate::error::Error;

    const CONTAINER_URL: &str = "https://acct.blob.core.windows.net/snapshots";

    fn start_command() -> StartCommand {
        StartCommand {
            azblob_container_url: Some(CONTAINER_URL.to_string()),
            env_prefix: "SIDECAR_UT".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_start_command_debug_redacts_sas() {
        let command = StartCommand {
            azblob_container_url: Some(format!("{CONTAINER_URL}?sv=2022-11-02&sig=SECRETSIG")),
            ..start_command()
        };

        let debug = format!("{command:#?}");
        assert!(!debug.contains("SECRETSIG"), "{debug}");
        assert!(!debug.contains("sv=2022-11-02"), "{debug}");
        assert!(debug.contains(CONTAINER_URL), "{debug}");
        assert!(debug.contains("SIDECAR_UT"), "{debug}");

        let mut opts = SidecarOptions::default();
        command.merge_with_cli_options(&GlobalOptions::default(), &mut opts);
        let debug = format!("{opts:#?}");
        assert!(!debug.contains("SECRETSIG"), "{debug}");
    }

    #[test]
    fn test_default_options() {
        let opts = SidecarOptions::default();
        assert_eq!("0.0.0.0:9092", opts.http.addr);
        assert_eq!("http://0.0.0.0:9090", opts.prometheus.api_base);
        assert_eq!(Duration::from_secs(180), opts.prometheus.timeout);
        assert_eq!("/prometheus/data/snapshots", opts.snapshot.snapshots_dir);
        assert_eq!("data", opts.snapshot.archive_base_path);
        assert_eq!(StorageConfig::Azblob(AzblobConfig::default()), opts.storage);
    }

    #[test]
    fn test_load_from_cli() {
        let command = StartCommand {
            http_addr: Some("127.0.0.1:1234".to_string()),
            prom_api_base: Some("http://prometheus:9090".to_string()),
            snapshots_dir: Some("/data/snapshots".to_string()),
            debug: true,
            ..start_command()
        };

        let opts = command.load_options(&Default::default()).unwrap();
        assert_eq!("127.0.0.1:1234", opts.http.addr);
        assert_eq!("http://prometheus:9090", opts.prometheus.api_base);
        assert_eq!("/data/snapshots", opts.snapshot.snapshots_dir);
        assert_eq!("debug", opts.logging.level.as_ref().unwrap());
        match opts.storage {
            StorageConfig::Azblob(azblob) => assert_eq!(CONTAINER_URL, azblob.container_url),
            other => panic!("unexpected storage {other:?}"),
        }
    }

    #[test]
    fn test_read_from_config_file() {
        let mut file = create_named_temp_file();
        let toml_str = r#"
            [http]
            addr = "127.0.0.1:9999"
            timeout = "30s"

            [prometheus]
            api_base = "http://127.0.0.1:19090/prom"
            timeout = "10s"

            [snapshot]
            snapshots_dir = "/tmp/snapshots"
            archive_base_path = "backup"
            max_inflight_exports = 2
            export_timeout = "5m"

            [storage]
            type = "File"
            root = "/tmp/artifacts"

            [logging]
            level = "warn"
            dir = "/tmp/snapshot-sidecar/logs"
        "#;
        write!(file, "{}", toml_str).unwrap();

        let command = StartCommand {
            config_file: Some(file.path().to_str().unwrap().to_string()),
            env_prefix: "SIDECAR_UT".to_string(),
            ..Default::default()
        };
        let opts = command.load_options(&Default::default()).unwrap();
        assert_eq!("127.0.0.1:9999", opts.http.addr);
        assert_eq!(Duration::from_secs(30), opts.http.timeout);
        assert_eq!("http://127.0.0.1:19090/prom", opts.prometheus.api_base);
        assert_eq!(Duration::from_secs(10), opts.prometheus.timeout);
        assert_eq!("/tmp/snapshots", opts.snapshot.snapshots_dir);
        assert_eq!("backup", opts.snapshot.archive_base_path);
        assert_eq!(2, opts.snapshot.max_inflight_exports);
        assert_eq!(Some(Duration::from_secs(300)), opts.snapshot.export_timeout);
        assert_eq!(
            StorageConfig::File(FileConfig {
                root: "/tmp/artifacts".to_string()
            }),
            opts.storage
        );
        assert_eq!("warn", opts.logging.level.as_ref().unwrap());
        assert_eq!("/tmp/snapshot-sidecar/logs", opts.logging.dir);
    }

    #[test]
    fn test_load_log_options_from_cli() {
        let options = start_command()
            .load_options(&GlobalOptions {
                log_dir: Some("/tmp/snapshot-sidecar/test/logs".to_string()),
                log_level: Some("info,snapshot=debug".to_string()),
            })
            .unwrap();

        assert_eq!("/tmp/snapshot-sidecar/test/logs", options.logging.dir);
        assert_eq!("info,snapshot=debug", options.logging.level.as_ref().unwrap());
    }

    #[test]
    fn test_missing_container_url() {
        let command = StartCommand {
            env_prefix: "SIDECAR_UT".to_string(),
            ..Default::default()
        };

        let err = command.load_options(&Default::default()).unwrap_err();
        assert!(matches!(err, Error::MissingConfig { .. }), "{err:?}");
    }

    #[test]
    fn test_invalid_addr_and_url() {
        let command = StartCommand {
            http_addr: Some("not an address".to_string()),
            ..start_command()
        };
        let err = command.load_options(&Default::default()).unwrap_err();
        assert!(matches!(err, Error::ParseAddr { .. }), "{err:?}");

        let command = StartCommand {
            prom_api_base: Some("not a url".to_string()),
            ..start_command()
        };
        let err = command.load_options(&Default::default()).unwrap_err();
        assert!(matches!(err, Error::ParseUrl { .. }), "{err:?}");
    }

    #[test]
    fn test_config_precedence_order() {
        let mut file = create_named_temp_file();
        let toml_str = r#"
            [http]
            addr = "127.0.0.1:4000"

            [snapshot]
            snapshots_dir = "/from/file"
        "#;
        write!(file, "{}", toml_str).unwrap();

        let env_prefix = "SIDECAR_PRECEDENCE_UT";
        let env_key = |section: &str, key: &str| {
            [
                env_prefix.to_string(),
                section.to_uppercase(),
                key.to_uppercase(),
            ]
            .join(ENV_VAR_SEP)
        };
        temp_env::with_vars(
            [
                // snapshot.snapshots_dir = /from/env
                (env_key("snapshot", "snapshots_dir"), Some("/from/env")),
                // snapshot.max_inflight_exports = 3
                (env_key("snapshot", "max_inflight_exports"), Some("3")),
                // storage.container_url = https://env.blob.core.windows.net/c
                (
                    env_key("storage", "container_url"),
                    Some("https://env.blob.core.windows.net/c"),
                ),
                // http.addr = 127.0.0.1:24000
                (env_key("http", "addr"), Some("127.0.0.1:24000")),
            ],
            || {
                let command = StartCommand {
                    config_file: Some(file.path().to_str().unwrap().to_string()),
                    http_addr: Some("127.0.0.1:14000".to_string()),
                    env_prefix: env_prefix.to_string(),
                    ..Default::default()
                };
                let opts = command.load_options(&Default::default()).unwrap();

                // Should be read from env, env > default values.
                assert_eq!(3, opts.snapshot.max_inflight_exports);
                match &opts.storage {
                    StorageConfig::Azblob(azblob) => assert_eq!(
                        "https://env.blob.core.windows.net/c",
                        azblob.container_url
                    ),
                    other => panic!("unexpected storage {other:?}"),
                }
                // Should be read from config file, config file > env > default values.
                assert_eq!("/from/file", opts.snapshot.snapshots_dir);
                // Should be read from cli, cli > config file > env > default values.
                assert_eq!("127.0.0.1:14000", opts.http.addr);
                // Should be default value.
                assert_eq!(
                    PromClientOptions::default().api_base,
                    opts.prometheus.api_base
                );
            },
        );
    }

    #[test]
    fn test_container_url_switches_storage() {
        let mut opts = SidecarOptions {
            storage: StorageConfig::File(FileConfig::default()),
            ..Default::default()
        };
        start_command().merge_with_cli_options(&Default::default(), &mut opts);

        assert_eq!(
            StorageConfig::Azblob(AzblobConfig {
                container_url: CONTAINER_URL.to_string(),
                ..Default::default()
            }),
            opts.storage
        );
    }

    #[tokio::test]
    async fn test_instance_start_stop() {
        let dir = create_temp_dir("sidecar");
        let opts = SidecarOptions {
            http: HttpOptions {
                addr: "127.0.0.1:0".to_string(),
                ..Default::default()
            },
            storage: StorageConfig::File(FileConfig {
                root: dir.path().join("artifacts").to_string_lossy().to_string(),
            }),
            ..Default::default()
        };
        opts.validate().unwrap();

        let mut instance = Instance::try_new(&opts, vec![]).unwrap();
        assert_eq!(APP_NAME, instance.name());
        instance.start().await.unwrap();
        assert_ne!(0, instance.listening.port());
        assert!(dir.path().join("artifacts").is_dir());

        instance.stop().await.unwrap();
    }
}
