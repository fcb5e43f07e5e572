use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rill::api::ApiServer;
use rill::config::Config;
use rill::hls::server::HlsServer;
use rill::httpflv::server::HttpFlvServer;
use rill::keystore::ChannelKeys;
use rill::registry::store::ChannelRegistry;
use rill::relay::StaticPushRegistry;
use rill::server::RtmpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rill=info")),
        )
        .init();

    const VERSION: &str = env!("CARGO_PKG_VERSION");
    info!(version = VERSION, "rill starting");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "loading configuration");
            Config::load(&path).await?
        }
        None => Config::default(),
    };
    let config = Arc::new(config);

    // channel keys, persisted when a key file is configured
    let key_file = if config.key_file.is_empty() {
        None
    } else {
        Some(std::path::PathBuf::from(&config.key_file))
    };
    let keys = Arc::new(ChannelKeys::new(key_file));
    keys.load().await?;
    keys.spawn_persist_task();

    // the multiplexer with its static-push hook
    let statics = Arc::new(StaticPushRegistry::new(config.static_push_map()));
    let registry = Arc::new(ChannelRegistry::new(config.gop_num, statics));
    registry.spawn_liveness_task();

    // HLS
    let hls = if config.hls_addr.is_empty() {
        None
    } else {
        let hls = HlsServer::new(config.hls_keep_after_end);
        hls.spawn_check_stop();
        let listener = TcpListener::bind(Config::bind_addr(&config.hls_addr)).await?;
        let server = hls.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!(error = %e, "hls server exited");
            }
        });
        Some(hls)
    };

    // HTTP-FLV / WebSocket-FLV
    if !config.httpflv_addr.is_empty() {
        let listener = TcpListener::bind(Config::bind_addr(&config.httpflv_addr)).await?;
        let server = HttpFlvServer::new(registry.clone());
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!(error = %e, "http-flv server exited");
            }
        });
    }

    // control API
    if !config.api_addr.is_empty() {
        let listener = TcpListener::bind(Config::bind_addr(&config.api_addr)).await?;
        let server = ApiServer::new(
            registry.clone(),
            keys.clone(),
            config.jwt.clone(),
            config.rtmp_addr.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!(error = %e, "api server exited");
            }
        });
    }

    // RTMP, on the main task
    if !config.rtmp_addr.is_empty() {
        let listener = TcpListener::bind(Config::bind_addr(&config.rtmp_addr)).await?;
        let server = RtmpServer::new(config.clone(), registry, keys, hls);
        tokio::select! {
            result = server.serve(listener) => {
                if let Err(e) = result {
                    error!(error = %e, "rtmp server exited");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("shutting down");
    }

    Ok(())
}
