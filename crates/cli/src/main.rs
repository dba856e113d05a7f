use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::AsyncReadExt;

use icebase_cli::{init_logging, serve};
use icebase_sql::{Engine, EngineConfig};

#[derive(Parser)]
#[command(name = "icebase", version, about = "Append-only analytical table service")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Act as a client: read SQL from stdin, dispatch it to the given
    /// endpoint in-process and print the JSON response.
    #[arg(long, value_name = "ENDPOINT")]
    post: Option<String>,

    /// Enable semicolon query splitting.
    #[arg(long)]
    query_splitting: bool,

    /// Logging level (also settable via the LOG_LEVEL env var).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Storage root directory (key prefix when S3_BUCKET is set).
    #[arg(long, default_value = "icebase_tables")]
    storage_dir: String,

    /// Install the engine extensions at startup.
    #[arg(long)]
    install_extensions: bool,

    /// Load the engine extensions at startup.
    #[arg(long)]
    load_extensions: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = EngineConfig::default()
        .with_storage_dir(&cli.storage_dir)
        .with_extensions(cli.install_extensions, cli.load_extensions);
    if cli.query_splitting {
        config = config.with_query_splitting();
    }
    let engine = Arc::new(Engine::new(config)?);

    if let Some(endpoint) = cli.post {
        let mut input = String::new();
        tokio::io::stdin().read_to_string(&mut input).await?;
        let response = engine.post_endpoint(&endpoint, &input).await?;
        println!("{response}");
        engine.close().await;
        return Ok(());
    }

    let auth_token = std::env::var("BEARER_TOKEN").ok().filter(|t| !t.is_empty());
    serve(engine, cli.port, auth_token).await
}
