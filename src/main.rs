use std::path::PathBuf;

use clap::Parser;
use serde_json::json;

use serve_bridge::config::{load_config, BridgeConfig};
use serve_bridge::http::{handler_fn, Reply};
use serve_bridge::lifecycle::{signals, startup};
use serve_bridge::{ServeOptions, Shutdown};

#[derive(Parser)]
#[command(name = "serve-bridge")]
#[command(about = "Demo server running on the HTTP dispatch bridge", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override listener.hostname
    #[arg(long)]
    hostname: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(hostname) = cli.hostname {
        config.listener.hostname = hostname;
    }

    startup::init_observability(&config);
    tracing::info!("serve-bridge v{} starting", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();
    let (bridge, event_loop) = startup::start_bridge(&config, &shutdown);

    let handler = handler_fn(|req| {
        let reply = match req.path().as_str() {
            "/ping" => Reply::from("pong"),
            "/json" => Reply::json(&json!({ "ok": true, "count": 3 }))?,
            _ => Reply::from(format!("{} {}", req.method(), req.url())),
        };
        Ok(reply)
    });

    let options = ServeOptions::from_config(&config.listener).await?.handler(handler);
    let server = bridge.serve(options).await?;
    tracing::info!(url = %server.url(), "Listening for requests");

    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));
    event_loop.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
