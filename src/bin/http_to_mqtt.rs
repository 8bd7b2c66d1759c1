//! http_to_mqtt - HTTP to MQTT bridge
//!
//! This daemon:
//! 1. Opens one long-lived publisher session to the MQTT broker
//! 2. Serves the keep-alive, publish and subscribe endpoints
//! 3. Closes every broker session on Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use http_mqtt_bridge::{
    AppState, BridgeConfig, BridgeServer, ConfigLayer, Connector, RumqttcConnector, SessionKind,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bridge HTTP requests to an MQTT broker")]
struct Args {
    /// MQTT broker URL, e.g. mqtt://localhost:1883 or mqtts://broker:8883.
    #[arg(long, alias = "mqtt_url")]
    mqtt_url: Option<String>,

    #[arg(long, alias = "mqtt_user")]
    mqtt_user: Option<String>,

    #[arg(long, alias = "mqtt_pass")]
    mqtt_pass: Option<String>,

    /// Client id of the publisher session.
    #[arg(long, alias = "mqtt_clientid")]
    mqtt_clientid: Option<String>,

    #[arg(long, alias = "keep_alive_topic")]
    keep_alive_topic: Option<String>,

    #[arg(long, alias = "keep_alive_message")]
    keep_alive_message: Option<String>,

    /// Log request payloads.
    #[arg(long)]
    debug: bool,

    /// Shared secret required as `key` on every request.
    #[arg(long)]
    secret: Option<String>,

    /// HTTP listen port.
    #[arg(long)]
    port: Option<u16>,

    /// JSON (or .toml) settings file.
    #[arg(long, env = "HTTP_TO_MQTT_SETTINGS")]
    settings: Option<PathBuf>,
}

impl Args {
    fn flags(&self) -> ConfigLayer {
        ConfigLayer {
            mqtt_url: self.mqtt_url.clone(),
            mqtt_user: self.mqtt_user.clone(),
            mqtt_pass: self.mqtt_pass.clone(),
            mqtt_clientid: self.mqtt_clientid.clone(),
            keep_alive_topic: self.keep_alive_topic.clone(),
            keep_alive_message: self.keep_alive_message.clone(),
            debug: self.debug.then_some(true),
            secret: self.secret.clone(),
            port: self.port,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = BridgeConfig::load(args.flags(), args.settings.as_deref())?;

    let default_filter = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    log::debug!("configuration: {:?}", config);

    let connector: Arc<dyn Connector> = Arc::new(RumqttcConnector);
    let publisher = connector.connect(&config.mqtt, SessionKind::Publisher)?;
    let port = config.http_port;
    let state = AppState::new(Arc::new(config), Arc::new(publisher), connector);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server = match BridgeServer::new(addr, state.clone()).spawn().await {
        Ok(server) => server,
        Err(err) => {
            log::error!("{:#}", err);
            return Err(err);
        }
    };
    log::info!("http_to_mqtt is running on port {}", server.addr.port());

    let (tx, mut rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    let _ = rx.recv().await;
    log::info!("shutdown signal received, stopping http_to_mqtt...");
    server.stop().await?;
    state.publisher.close();

    Ok(())
}
