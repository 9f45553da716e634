use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::{self, Duration};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use firemesh::{CaBundle, Config, LocalCa, Node};

#[derive(Parser, Debug)]
#[command(name = "firemesh")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gossip (reliable channel) bind address.
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// Ping (unreliable channel) bind address.
    #[arg(short, long, default_value = "0.0.0.0:0")]
    ping_bind: SocketAddr,

    /// CA bundle shared by the deployment.
    #[arg(long, default_value = "firemesh-ca.bin")]
    ca_bundle: PathBuf,

    /// Create the CA bundle if it does not exist yet.
    #[arg(long)]
    init_ca: bool,

    /// Ring count used when creating a fresh CA bundle.
    #[arg(long, default_value = "8")]
    rings: u32,

    /// DER certificates of known members to seed the view.
    #[arg(short, long, value_name = "FILE")]
    seed: Vec<PathBuf>,

    /// Write this node's certificate DER here, for seeding other members.
    #[arg(long, value_name = "FILE")]
    export_cert: Option<PathBuf>,

    /// Seconds between membership status log lines.
    #[arg(long, default_value = "60")]
    status_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let ca = if args.ca_bundle.exists() {
        LocalCa::from_bundle(&CaBundle::load(&args.ca_bundle)?)?
    } else if args.init_ca {
        let ca = LocalCa::new(args.rings)?;
        ca.to_bundle().save(&args.ca_bundle)?;
        info!(path = %args.ca_bundle.display(), rings = args.rings, "created CA bundle");
        ca
    } else {
        anyhow::bail!(
            "CA bundle {} not found (pass --init-ca to create one)",
            args.ca_bundle.display()
        );
    };

    let mut seeds = Vec::new();
    for path in &args.seed {
        let der = std::fs::read(path)
            .with_context(|| format!("failed to read seed certificate {}", path.display()))?;
        seeds.push(der);
    }

    let node = Node::new(
        Config::default(),
        &ca,
        args.bind,
        args.ping_bind,
        seeds,
        Box::new(|old: &[u8], new: &[u8]| new > old),
    )
    .await?;

    if let Some(path) = &args.export_cert {
        std::fs::write(path, node.cert_der())
            .with_context(|| format!("failed to export certificate to {}", path.display()))?;
        info!(path = %path.display(), "exported certificate");
    }

    node.start();
    info!(id = %node.id(), addr = %node.gossip_addr(), "node running");

    let mut status = time::interval(Duration::from_secs(args.status_interval.max(1)));
    status.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, exiting gracefully");
                break;
            }
            _ = status.tick() => {
                let members = node.live_members();
                if members.is_empty() {
                    warn!(view = node.view_count(), "no live members yet");
                } else {
                    info!(
                        live = members.len(),
                        view = node.view_count(),
                        members = ?members,
                        "membership status"
                    );
                }
            }
        }
    }

    node.shutdown().await;
    Ok(())
}
