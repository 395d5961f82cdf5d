use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use concord_domain::Settings;
use concord_gateway::{api, AppState};

#[derive(Parser)]
#[command(name = "concord", about = "Multi-model deliberation engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (the default).
    Serve,
    /// Print the resolved runtime settings and exit.
    Config,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(Settings::from_env()).await
        }
        Some(Command::Config) => {
            let settings = Settings::from_env();
            println!("{settings:#?}");
            Ok(())
        }
        Some(Command::Version) => {
            println!("concord {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,concord_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(settings: Settings) -> anyhow::Result<()> {
    tracing::info!(
        max_concurrent_requests = settings.max_concurrent_requests,
        data_dir = %settings.data_dir.display(),
        environment = %settings.environment,
        "concord starting"
    );

    let bind_addr = settings.bind_addr.clone();
    let state = AppState::from_settings(settings)?;

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
