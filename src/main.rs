// ABOUTME: Entry point for the apiary control plane.
// ABOUTME: Wires settings, store, runtime, proxy, and reaper, then serves.

mod cli;

use clap::Parser;
use cli::Cli;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use apiary::app::App;
use apiary::error::Result;
use apiary::mailer::LogMailer;
use apiary::runtime::BollardRuntime;
use apiary::settings::Settings;
use apiary::store::MemoryStore;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::from_env()?;
    if let Some(listen) = cli.listen {
        settings.proxy_listen = listen;
    }

    let runtime = match &settings.docker_socket {
        Some(socket) => BollardRuntime::connect(socket),
        None => BollardRuntime::connect_local(),
    }
    .map_err(|e| apiary::error::Error::InvalidConfig(format!("runtime: {e}")))?;

    let store = Arc::new(MemoryStore::new());
    let app = App::new(
        settings,
        store.clone(),
        store,
        Arc::new(runtime),
        Arc::new(LogMailer),
    )?;

    let reaper_handle = Arc::clone(&app.reaper).spawn();
    tracing::info!(interval = ?app.settings.reaper_interval, "reaper started");

    let listener = TcpListener::bind(app.settings.proxy_listen).await?;
    tracing::info!(listen = %app.settings.proxy_listen, domain = %app.settings.domain, "proxy listening");

    let result = Arc::clone(&app.proxy).serve(listener).await;

    reaper_handle.abort();
    result.map_err(Into::into)
}
