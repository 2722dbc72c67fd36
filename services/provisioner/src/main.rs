//! burst provisioner CLI
//!
//! `provisioner submit --request req.json` provisions capacity for one request
//! and prints the reply. `provisioner resume` finishes workflows left behind
//! by a previous run. Either way, workflows found in the state database are
//! recovered and driven to completion before the process exits.
//!
//! The exit status reflects the result: 0 success, 1 failure, 2 invalid
//! request, 3 communication error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use burst_id::WorkflowId;
use burst_provisioner::gateway::{AsyncGateway, Gateway, HttpCloudApi, MockGateway};
use burst_provisioner::logging::{self, LogFormat};
use burst_provisioner::{
    Config, Driver, DriverConfig, ProvisionRequest, ResultCode, WorkflowReply,
};
use burst_saga::SqliteStore;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "provisioner")]
#[command(author, version, about = "Provision elastic cloud capacity", long_about = None)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, env = "BURST_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    /// State database path.
    #[arg(long, global = true, env = "BURST_STATE_PATH")]
    state_path: Option<PathBuf>,

    /// Use an in-process mock cloud instead of the HTTP API.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision capacity for a request and wait for the result.
    Submit {
        /// Request JSON file.
        #[arg(long)]
        request: PathBuf,
    },

    /// Finish workflows left behind by a previous run.
    Resume,
}

fn read_request(path: &Path) -> Result<std::result::Result<ProvisionRequest, WorkflowReply>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request file {}", path.display()))?;
    Ok(ProvisionRequest::from_json(&raw).map_err(|e| WorkflowReply::invalid_request(&e)))
}

fn print_reply(reply: &WorkflowReply) -> Result<()> {
    println!("{}", serde_json::to_string(reply).context("failed to encode reply")?);
    Ok(())
}

fn open_store(path: &str) -> Result<SqliteStore> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    SqliteStore::open(path).with_context(|| format!("failed to open state database {path}"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(path) = &cli.state_path {
        config.state_path = path.display().to_string();
    }

    logging::init(cli.log_format, &config.log_level);
    info!(
        api_url = %config.api_url,
        state_path = %config.state_path,
        dry_run = cli.dry_run,
        "Starting burst provisioner"
    );

    let store = open_store(&config.state_path)?;

    let (gateway, notifications): (Arc<dyn Gateway>, mpsc::UnboundedReceiver<WorkflowId>) =
        if cli.dry_run {
            let (_tx, rx) = mpsc::unbounded_channel();
            (Arc::new(MockGateway::new()), rx)
        } else {
            let api = HttpCloudApi::new(
                config.api_url.clone(),
                config.api_token.clone(),
                config.request_timeout(),
            )
            .context("failed to build HTTP client")?;
            let (gateway, rx) = AsyncGateway::new(api, config.max_in_flight);
            (Arc::new(gateway), rx)
        };

    let (outcomes_tx, mut outcomes_rx) = mpsc::unbounded_channel();
    let (driver, handle) = Driver::new(
        Box::new(store),
        gateway,
        notifications,
        config.step_settings(),
        DriverConfig {
            tick_interval: config.tick_interval(),
            ..DriverConfig::default()
        },
    );
    let mut driver = driver.with_outcomes(outcomes_tx);
    let recovered = driver
        .recover()
        .context("failed to recover workflows")?;
    if recovered > 0 {
        info!(recovered, "Resuming workflows from a previous run");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut driver_task = tokio::spawn(driver.run(shutdown_rx));

    let mut exit = ResultCode::Success;
    let mut interrupted = false;
    if let Command::Submit { request } = &cli.command {
        let reply = match read_request(request)? {
            Err(reply) => reply,
            Ok(request) => tokio::select! {
                reply = handle.submit(request) => reply,
                _ = tokio::signal::ctrl_c() => {
                    interrupted = true;
                    WorkflowReply::communication_error("interrupted before the workflow finished")
                }
            },
        };
        print_reply(&reply)?;
        exit = reply.result;
    }
    drop(handle);

    // Unfinished workflows stay in the store for the next `resume`.
    if interrupted {
        let _ = shutdown_tx.send(true);
    }

    tokio::select! {
        result = &mut driver_task => {
            if let Err(e) = result {
                warn!(error = %e, "Driver task failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            let _ = driver_task.await;
        }
    }

    while let Ok(reply) = outcomes_rx.try_recv() {
        print_reply(&reply)?;
        if matches!(cli.command, Command::Resume) && reply.result.exit_code() > exit.exit_code() {
            exit = reply.result;
        }
    }

    info!(result = %exit, "Provisioner finished");
    Ok(ExitCode::from(exit.exit_code()))
}
