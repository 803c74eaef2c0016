// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: The service is configured by environment; flags cover ops overrides.

use clap::Parser;
use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "apiary")]
#[command(about = "Multi-tenant control plane for sandboxed agent containers")]
#[command(version)]
pub struct Cli {
    /// Override the proxy listen address (PROXY_LISTEN)
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
