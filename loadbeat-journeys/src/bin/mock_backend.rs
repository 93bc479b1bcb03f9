//! Standalone in-memory backend for local runs of the journeys.

use anyhow::{Context, Result};
use clap::Parser;
use loadbeat_journeys::MockBackend;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "In-memory social-network API for loadbeat runs", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:3000")]
    listen: String,

    /// Email of the seeded test account
    #[arg(long, env = "EMAIL", default_value = "loadbeat@example.test")]
    email: String,

    /// Password of the seeded test account
    #[arg(long, env = "PASSWORD", default_value = "Loadbeat#2024", hide_env_values = true)]
    password: String,

    /// Path prefix the API is mounted under, e.g. `/api/v1`
    #[arg(long, value_name = "PATH", default_value = "")]
    prefix: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let backend = MockBackend::new(&args.email, &args.password);
    info!(
        email = %args.email,
        target_user_id = %backend.target_user_id(),
        target_chat_id = %backend.target_chat_id(),
        "Seeded accounts"
    );
    println!("TARGET_USER_ID={}", backend.target_user_id());
    println!("TARGET_USERNAME={}", loadbeat_journeys::mock::TARGET_USERNAME);
    println!("TARGET_CHAT_ID={}", backend.target_chat_id());

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", args.listen))?;
    backend.serve(listener, &args.prefix).await
}
