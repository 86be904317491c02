use anyhow::Result;
use clap::Parser;
use imagegen_orchestrator::app::App;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "imagegen-orchestrator")]
#[command(about = "Orchestrate image generation across providers and receive their webhooks")]
struct CliArgs {
    /// Address for the webhook endpoint (overrides WEBHOOK_LISTEN_ADDR).
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Print the capabilities of configured providers and exit.
    #[arg(long)]
    list_providers: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imagegen_orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();

    let app = match App::new() {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if args.list_providers {
        for capability in app.orchestrator().capabilities() {
            println!(
                "{}: {:?}, max_images={}, webhook={}, dimensions={:?}",
                capability.provider,
                capability.mechanism,
                capability.max_images,
                capability.supports_webhook,
                capability.dimensions,
            );
        }
        return Ok(());
    }

    let app = match args.listen {
        Some(addr) => app.with_listen_addr(addr),
        None => app,
    };

    info!("Starting imagegen-orchestrator");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        signal.cancel();
    });

    if let Err(e) = app.serve(shutdown).await {
        error!("Webhook server failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::Parser;

    #[test]
    fn test_parse_listen_arg() {
        let args = CliArgs::try_parse_from(["imagegen-orchestrator", "--listen", "127.0.0.1:9000"])
            .unwrap();
        assert_eq!(args.listen.unwrap().port(), 9000);
        assert!(!args.list_providers);
    }

    #[test]
    fn test_parse_listen_arg_invalid() {
        assert!(CliArgs::try_parse_from(["imagegen-orchestrator", "--listen", "nowhere"]).is_err());
    }
}
