//! TIA Portal MCP Server
//!
//! This binary runs an MCP server over stdin/stdout. Each engineering
//! session gets its own worker thread; the tokio runtime only routes calls.

use clap::{Args, Parser, Subcommand};
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tia_mcp::{
    expand_path, Config, Dispatcher, ExecutionBridge, LocalWorkspace, PortalBackend,
    SessionManager, TiaMcpServer,
};
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tia-mcp", version, about = "TIA Portal MCP Server")]
struct Cli {
    /// JSON config file (defaults to ./tia_portal_mcp.json when present)
    #[arg(long, global = true, env = "TIA_MCP_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server over stdio (default)
    Serve(ServeArgs),
    /// Open a project through a single bridge and print what it contains
    Probe(ProbeArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Maximum number of concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,
    /// Close sessions idle for this long (0 disables)
    #[arg(long)]
    idle_timeout_secs: Option<u64>,
    /// Seconds between idle sweeps
    #[arg(long)]
    sweep_interval_secs: Option<u64>,
    /// Default per-call timeout in seconds
    #[arg(long)]
    call_timeout_secs: Option<u64>,
}

impl ServeArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = self.max_sessions {
            config.session.max_concurrent = v;
        }
        if let Some(v) = self.idle_timeout_secs {
            config.session.idle_timeout_secs = v;
        }
        if let Some(v) = self.sweep_interval_secs {
            config.session.sweep_interval_secs = v;
        }
        if let Some(v) = self.call_timeout_secs {
            config.session.call_timeout_secs = v;
        }
    }
}

#[derive(Args)]
struct ProbeArgs {
    /// Project directory or .ap* file
    #[arg(long)]
    path: String,
    /// Project name when the directory holds several
    #[arg(long)]
    name: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    // Initialize logging to stderr (stdout is used for MCP protocol)
    let default_filter = config.log_filter();
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => {
            args.apply(&mut config);
            config.validate()?;
            run_server(config)
        }
        Command::Probe(args) => run_probe(args),
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

fn run_server(config: Config) -> anyhow::Result<()> {
    info!(
        max_sessions = config.session.max_concurrent,
        idle_timeout_secs = config.session.idle_timeout_secs,
        "Starting TIA Portal MCP Server"
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let sessions = Arc::new(SessionManager::new(
            config.session_settings(),
            LocalWorkspace::factory(),
        ));
        sessions.start();
        let dispatcher = Arc::new(Dispatcher::new(
            sessions.clone(),
            config.handler_context(),
            config.call_timeout(),
        ));

        info!("MCP server listening on stdio");
        let server = TiaMcpServer::new(dispatcher);
        let mut service = Some(server.serve(stdio()).await?);
        let shutdown_notify = Arc::new(Notify::new());
        let shutdown_signal = shutdown_notify.clone();

        tokio::spawn(async move {
            if wait_for_shutdown_signal().await.is_ok() {
                info!("Shutdown signal received");
                shutdown_signal.notify_one();
            } else {
                info!("Shutdown signal handler failed; server will continue running");
            }
        });

        loop {
            tokio::select! {
                _ = shutdown_notify.notified() => {
                    if let Some(mut running) = service.take() {
                        let _ = running.close().await?;
                    }
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    if let Some(running) = service.as_ref() {
                        if running.is_transport_closed() {
                            if let Some(running) = service.take() {
                                let _ = running.waiting().await?;
                            }
                            break;
                        }
                    }
                }
            }
        }
        info!("MCP server shutting down");
        sessions.stop().await;
        Ok::<_, anyhow::Error>(())
    })?;

    info!("Server stopped");
    Ok(())
}

fn run_probe(args: ProbeArgs) -> anyhow::Result<()> {
    info!("Starting TIA Portal MCP Server (probe mode)");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let (bridge, ready) =
            ExecutionBridge::spawn("tia-probe", LocalWorkspace::factory(), 0)?;
        ready
            .await
            .map_err(|_| anyhow::anyhow!("probe worker exited during startup"))??;

        let path = expand_path(&args.path);
        let name = args.name.clone();
        let report = bridge
            .submit(move |ws: &mut LocalWorkspace| {
                let info = ws.open_project(&path, name.as_deref())?;
                let blocks = ws.list_blocks()?;
                ws.close_project(false)?;
                Ok::<_, tia_mcp::ToolError>(json!({ "project": info, "blocks": blocks }))
            })?
            .wait()
            .await?;

        bridge.shutdown();
        if !bridge.wait_stopped(Duration::from_secs(5)).await {
            error!("Probe worker did not stop in time");
        }

        match report {
            Ok(value) => {
                println!("{}", serde_json::to_string_pretty(&value)?);
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("probe failed: {e}")),
        }
    })
}
