//! ninep server binary.
//!
//! Serves an in-memory file tree over 9P2000 on TCP.
//!
//! Usage:
//!   # Defaults: 127.0.0.1:5640, root owned by the current user
//!   cargo run -p ninep-server
//!
//!   # From a RON config, overriding the port
//!   cargo run -p ninep-server -- --config ninep.ron --port 5641
//!
//! Mount with plan9port or the Linux v9fs client:
//!   9p -a tcp!localhost!5640 ls /
//!   mount -t 9p -o trans=tcp,port=5640,version=9p2000 127.0.0.1 /mnt

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use ninep_server::constants::MIN_MSIZE;
use ninep_server::{NinepServer, ServerConfig};

/// 9P2000 file server.
#[derive(Parser, Debug)]
#[command(name = "ninep-server")]
#[command(about = "Serve an in-memory file tree over 9P2000")]
struct Args {
    /// RON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Owner of the root directory
    #[arg(long)]
    user: Option<String>,

    /// Group of the root directory
    #[arg(long)]
    group: Option<String>,

    /// Largest msize offered to clients
    #[arg(long)]
    msize: Option<u32>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(ip) = self.bind {
            config.bind_addr.set_ip(ip);
        }
        if let Some(port) = self.port {
            config.bind_addr.set_port(port);
        }
        if let Some(user) = self.user {
            config.root_user = user;
        }
        if let Some(group) = self.group {
            config.root_group = group;
        }
        if let Some(msize) = self.msize {
            config.msize = msize;
        }
        anyhow::ensure!(
            config.msize >= MIN_MSIZE,
            "msize {} is below the minimum of {}",
            config.msize,
            MIN_MSIZE
        );
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Args::parse().into_config()?;
    tracing::info!(
        bind = %config.bind_addr,
        msize = config.msize,
        owner = %config.root_user,
        group = %config.root_group,
        "Starting ninep server"
    );

    let server = Arc::new(NinepServer::with_memory_tree(config));
    server.run().await.context("server failed")?;
    Ok(())
}
