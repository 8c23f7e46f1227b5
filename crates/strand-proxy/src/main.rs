use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use strand_proxy::{Config, HeaderTracer, ProxyServer};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "strand-proxy", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "STRAND_CONFIG")]
    config: Option<PathBuf>,
    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
    /// Run filters on a dedicated processing pool
    #[arg(long)]
    separate_processing: bool,
    /// Strip trace propagation headers from outbound requests
    #[arg(long)]
    transparent: bool,
    /// Emit logs as JSON
    #[arg(long, env = "STRAND_LOG_JSON")]
    log_json: bool,
}

fn init_logging(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strand_proxy=info"));

    // Thread names carry the pool role of every log line
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_thread_names(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_thread_names(true).with_target(true))
            .init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(port) = args.port {
        let mut addr = config.listen.socket_addr()?;
        addr.set_port(port);
        config.listen.address = addr.to_string();
    }
    if args.separate_processing {
        config.thread_pools.separate_processing_event_loop = true;
    }
    if args.transparent {
        config.upstream.transparent = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let config = load_config(&args)?;
    let proxy = ProxyServer::new(config)
        .with_tracer(Arc::new(HeaderTracer::new()))
        .start()
        .context("Failed to start proxy")?;
    info!("strand-proxy running on {}", proxy.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    // Joining the pools blocks
    tokio::task::spawn_blocking(move || proxy.stop()).await?;
    Ok(())
}
