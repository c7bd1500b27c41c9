use ami_proxy::{AmiProxy, AmiResult, ProxyConfig};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, warn};

/// Keep an AMI session up and log the derived telephony events
#[derive(Parser, Debug)]
#[command(name = "amiproxyd", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    conf: Option<String>,

    /// Overrides `log_level` from the configuration (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> AmiResult<()> {
    let cli = Cli::parse();

    let config = match &cli.conf {
        Some(path) => ProxyConfig::load(path)?,
        None => ProxyConfig::default(),
    };

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(level) = cli
        .log_level
        .as_ref()
        .or(config
            .log_level
            .as_ref())
    {
        if let Ok(lv) = level
            .as_str()
            .parse::<LevelFilter>()
        {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }
    log_fmt
        .try_init()
        .ok();

    info!("Starting amiproxyd with {:?}", config.ami);
    let mut proxy = AmiProxy::new(config);
    proxy.start()?;

    let mut events = proxy.event_stream();
    tokio::select! {
        _ = async {
            while let Some(event) = events.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => info!(event = %event.kind(), "{}", json),
                    Err(e) => warn!("could not serialize {}: {}", event.kind(), e),
                }
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
        }
    }

    proxy.shutdown();
    Ok(())
}
