use clap::Parser;
use std::sync::Arc;
use tasklist_server::{build_router, AppState};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tasklist-server")]
#[command(about = "Reference remote service for tasklist clients")]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Log filter directives
    #[arg(long, env = "RUST_LOG", default_value = "tasklist_server=debug,tower_http=debug")]
    log: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log))
        .init();

    let app = build_router(Arc::new(AppState::new()));

    tracing::info!("Starting tasklist server on {}", args.bind);

    let listener = match tokio::net::TcpListener::bind(&args.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%e, addr = %args.bind, "Failed to bind");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(%e, addr = %args.bind);
    }
}
