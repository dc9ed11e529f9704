//! ctxfilter - HTTP proxy that trims agent context for small local models

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ctxfilter::config::Config;
use ctxfilter::error::Result;
use ctxfilter::proxy::ProxyServer;

/// ctxfilter - Transparent proxy that strips context small models cannot use
#[derive(Parser)]
#[command(name = "ctxfilter")]
#[command(about = "A transparent HTTP proxy that trims agent context for small local models")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Address to listen on (overrides config)
    #[arg(long, short = 'l')]
    pub listen: Option<String>,

    /// Upstream model server URL (overrides config)
    #[arg(long, short = 'u')]
    pub upstream: Option<String>,

    /// Forward system prompts unchanged
    #[arg(long)]
    pub no_filter: bool,

    /// Write before/after payloads of filtered requests to this directory
    #[arg(long)]
    pub audit_dir: Option<PathBuf>,
}

impl Cli {
    fn apply_overrides(self, mut config: Config) -> Config {
        if let Some(listen) = self.listen {
            config.proxy.listen_addr = listen;
        }
        if let Some(upstream) = self.upstream {
            config.proxy.upstream_url = upstream;
        }
        if self.no_filter {
            config.filter.enabled = false;
        }
        if let Some(dir) = self.audit_dir {
            config.audit.enabled = true;
            config.audit.dir = dir;
        }
        config
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let config = cli.apply_overrides(config);
    tracing::debug!("Config loaded: {:?}", config);

    ProxyServer::new(config).serve().await?;

    tracing::info!("ctxfilter stopped");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ctxfilter=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
