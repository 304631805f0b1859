use std::path::PathBuf;
use std::time::Duration;

use chainbox::config::Config;
use chainbox::fabric::FabricBuilder;
use chainbox::mesh::server;
use clap::Parser;

#[derive(Parser)]
#[command(name = "chainbox-node")]
#[command(author = "Chainbox")]
#[command(version)]
#[command(about = "Chainbox mesh node: serves the execution fabric over HTTP for remote routing")]
struct Cli {
    #[arg(long, env = "CHAINBOX_BIND_ADDR", default_value = "0.0.0.0:4000")]
    bind_addr: String,

    #[arg(long, env = "CHAINBOX_REGISTRY_ROOT", default_value = ".")]
    registry_root: PathBuf,

    #[arg(long, env = "CHAINBOX_JWT_SECRET")]
    jwt_secret: Option<String>,

    #[arg(long, env = "CHAINBOX_SHUTDOWN_GRACE_MS", default_value = "5000")]
    shutdown_grace_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let now_ms = chrono::Utc::now().timestamp_millis();
    let mut builder = FabricBuilder::new(config, now_ms).registry_root(cli.registry_root);
    if let Some(secret) = cli.jwt_secret {
        builder = builder.jwt_secret(secret);
    }
    let fabric = builder.build();

    if let Err(e) = server::serve(fabric, &cli.bind_addr, Duration::from_millis(cli.shutdown_grace_ms)).await {
        eprintln!("chainbox-node error: {e}");
        std::process::exit(1);
    }
}
