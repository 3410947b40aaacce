//! scenehub binary entry point.
//!
//! Parses CLI flags (falling back to the same environment variables
//! [`scenehub::Config::from_env`] reads), spawns the hub control task,
//! and serves the axum router until the process is killed.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use scenehub::{server, Config, Hub};

/// Realtime multi-tenant synchronization hub for a shared virtual 3D world.
#[derive(Debug, Parser)]
#[command(name = "scenehub", version, about)]
struct Cli {
    /// Address the HTTP/WebSocket listener binds to. Overrides
    /// `SCENEHUB_BIND_ADDR` when set.
    #[arg(long, env = "SCENEHUB_BIND_ADDR")]
    bind_addr: Option<SocketAddr>,

    /// Directory static avatar asset files are served from.
    #[arg(long, env = "SCENEHUB_ASSET_DIR", default_value = "./assets/avatars")]
    asset_dir: PathBuf,

    /// `env_logger` filter string, e.g. `info`, `scenehub=debug`.
    #[arg(long, env = "SCENEHUB_LOG", default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_filter))
        .init();

    let mut config = Config::from_env().context("loading configuration from environment")?;
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }

    let (hub, _control_task) = Hub::spawn(config.server_version.clone());
    let state = server::AppState {
        hub,
        config: config.clone(),
        asset_dir: cli.asset_dir,
    };
    let app = server::router(state);

    log::info!("scenehub v{} listening on {}", config.server_version, config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    axum::serve(listener, app)
        .await
        .context("axum server exited")?;

    Ok(())
}
