use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mediajitter::cli::{parse_args, print_help};
use mediajitter::config::Config;
use mediajitter::relay;

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.help {
        print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mediajitter=info".parse()?),
        )
        .init();

    info!("mediajitter relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Listen: {}", config.listen_addr);
    info!("  Forward: {}", config.forward_addr);
    info!("  Target latency: {}ms", config.target_latency_ms);
    info!("  Capacity: {} packets per stream", config.max_capacity);
    info!("  Max streams: {}", config.max_streams);

    // Handle --validate mode
    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    let cancel = CancellationToken::new();

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    if let Some(duration) = args.duration {
        info!("Running for {}s", duration.as_secs());
        tokio::spawn(relay::cancel_after(duration, cancel.clone()));
    }

    let report = relay::run_relay(&config, cancel).await?;
    info!("Final report: {}", serde_json::to_string(&report)?);

    Ok(())
}
