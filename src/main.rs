use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use takagi::{cli, config, jobs, keys, router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "takagi=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = cli::Cli::parse();
    let cfg = config::load()?;

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Keygen) => {
            let jwks = keys::generate_jwks()?;
            println!("{}", serde_json::to_string_pretty(&jwks)?);
            Ok(())
        }
        Some(cli::Commands::Rotate) => {
            let path = keys::rotate_managed(&cfg)?;
            println!(
                "Keyset rotated at {}. All previously issued tokens are now invalid.",
                path.display()
            );
            Ok(())
        }
        None => run_server(cfg, 8000).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!(provider = cfg.provider.as_str(), "initializing keyset...");
    let bind = cfg.bind.clone();
    let state = Arc::new(AppState::from_config(cfg)?);

    jobs::sweeper::spawn(state.store.clone());

    let app = router(state);

    // IPv6 listen addresses need brackets.
    let addr_str = if bind.contains(':') {
        format!("[{}]:{}", bind, port)
    } else {
        format!("{}:{}", bind, port)
    };
    let addr: SocketAddr = addr_str
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address {}: {}", addr_str, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("takagi listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
