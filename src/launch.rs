use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use ecs_sd::aliyun::credentials::{CredentialProvider, Strategy};
use ecs_sd::aliyun::{self, Client};
use ecs_sd::config::Config;
use ecs_sd::ecs::EcsDiscovery;
use ecs_sd::http::{HttpClient, HttpError};
use ecs_sd::outputs::{self, FileOutput};
use ecs_sd::signal::{self, SignalTo};
use exitcode::ExitCode;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn default_worker_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/ecs-sd/config.yaml")
}

#[derive(FromArgs)]
#[argh(
    description = "Discover Alibaba Cloud ECS instances as Prometheus scrape targets",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(
        option,
        short = 'c',
        long = "config",
        default = "default_config_path()",
        description = "read configuration from the file"
    )]
    config: PathBuf,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the Tokio runtime will use"
    )]
    threads: usize,

    #[argh(
        switch,
        description = "refresh once, print the targets to stdout and exit"
    )]
    once: bool,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("ecs-sd {}", ecs_sd::get_version());
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("ecs-sd-worker")
            .worker_threads(self.threads.max(1))
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                eprintln!("build tokio runtime failed, {err}");
                exitcode::OSERR
            })?;

        let levels = std::env::var("ECS_SD_LOG").unwrap_or_else(|_| match self.log_level.as_str() {
            "off" => "off".to_owned(),
            level => [format!("ecs_sd={level}"), format!("discovery={level}")].join(","),
        });
        let color = std::io::stderr().is_terminal();
        ecs_sd::trace::init(color, &levels);

        runtime.block_on(async move {
            let config = Config::load(&self.config).map_err(handle_config_errors)?;

            info!(
                message = "Start ecs-sd",
                version = ecs_sd::get_version(),
                threads = self.threads,
                region = %config.region_id,
                config = ?self.config
            );

            let discovery = build_discovery(&config).map_err(|err| {
                error!(message = "build http client failed", %err);
                exitcode::SOFTWARE
            })?;

            if self.once {
                return once(discovery, config.refresh_timeout).await;
            }

            serve(discovery, &config).await
        })?;

        runtime.shutdown_timeout(Duration::from_secs(5));

        Ok(())
    }
}

pub fn handle_config_errors(errors: Vec<String>) -> ExitCode {
    for err in errors {
        error!(message = "configuration error", %err);
    }

    exitcode::CONFIG
}

fn build_discovery(config: &Config) -> Result<EcsDiscovery, HttpError> {
    let http = HttpClient::new()?;

    let strategy = Strategy::resolve(&config.credentials());
    let mut provider = CredentialProvider::new(strategy, http.clone());
    if let Some(endpoint) = &config.sts_endpoint {
        provider = provider.with_sts_endpoint(endpoint.clone());
    }
    if let Some(endpoint) = &config.metadata_endpoint {
        provider = provider.with_metadata_endpoint(endpoint.clone());
    }

    let endpoint = config
        .endpoint
        .clone()
        .unwrap_or_else(|| aliyun::ecs_endpoint(&config.region_id));
    let client = Client::new(http, endpoint, Arc::new(provider));

    Ok(EcsDiscovery::new(Arc::new(client), config.options()))
}

/// Runs a single refresh and prints the targets in the `file_sd` format.
async fn once(mut discovery: EcsDiscovery, timeout: Option<Duration>) -> Result<(), ExitCode> {
    let cancel = CancellationToken::new();
    let deadline = timeout.map(|timeout| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(message = "refresh timed out", ?timeout);
            cancel.cancel();
        })
    });

    let result = discovery.refresh(&cancel).await;
    if let Some(deadline) = deadline {
        deadline.abort();
    }

    let group = result.map_err(|err| {
        error!(message = "refresh failed", %err);
        exitcode::UNAVAILABLE
    })?;

    let data = outputs::encode(&[group]).map_err(|err| {
        error!(message = "encode targets failed", %err);
        exitcode::SOFTWARE
    })?;

    std::io::stdout().write_all(&data).map_err(|err| {
        error!(message = "write targets to stdout failed", %err);
        exitcode::IOERR
    })
}

async fn serve(discovery: EcsDiscovery, config: &Config) -> Result<(), ExitCode> {
    let shutdown = CancellationToken::new();
    let signals = signal::os_signals().map_err(|err| {
        error!(message = "set up signal handlers failed", %err);
        exitcode::OSERR
    })?;
    let signal = tokio::spawn(signal::cancel_on(signals, shutdown.clone()));

    let (publisher, snapshots) = watch::channel(None);
    let mut tasks = Vec::new();

    if let Some(file) = &config.outputs.file {
        tasks.push(tokio::spawn(outputs::run_file(
            FileOutput::new(&file.path),
            snapshots.clone(),
            shutdown.clone(),
        )));
    }

    if let Some(http) = &config.outputs.http {
        let listener = bind(http.address).await?;
        info!(message = "serving targets", address = %http.address);

        tasks.push(tokio::spawn(outputs::serve(
            listener,
            snapshots.clone(),
            shutdown.clone(),
        )));
    }

    if tasks.is_empty() {
        warn!(message = "no outputs configured, discovered targets are dropped");
    }

    discovery::run(
        discovery,
        config.refresh_interval,
        config.refresh_timeout,
        shutdown.clone(),
        publisher,
    )
    .await;

    match signal.await {
        Ok(Some(SignalTo::Quit)) => {
            info!(message = "Quit signal received");
        }
        _ => {
            info!(message = "Shutdown signal received");

            for task in tasks {
                if let Err(err) = task.await {
                    error!(message = "output task failed", %err);
                }
            }
        }
    }

    drop(snapshots);

    Ok(())
}

async fn bind(address: std::net::SocketAddr) -> Result<TcpListener, ExitCode> {
    TcpListener::bind(address).await.map_err(|err| {
        error!(message = "bind http output failed", %address, %err);
        exitcode::UNAVAILABLE
    })
}
