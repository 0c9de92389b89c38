use anyhow::Result;
use bytes::Bytes;
use http_body_util::Full;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::RwLock;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming as IncomingBody, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;

pub mod auth;
pub mod bridge;
pub mod client;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod events;
pub mod gate;
pub mod handlers;
pub mod health;
pub mod limiter;
pub mod message;
pub mod metrics;

use auth::{AuthGate, GuestGate, StaticTokenGate};
use bridge::RedisBridge;
use config::Config;
use context::{AppContext, Clients};
use directory::{Directory, MemoryDirectory, RedisDirectory};
use events::TracingSink;
use limiter::RateLimiter;

type HttpResult = Result<Response<Full<Bytes>>, Infallible>;

async fn http_handler(req: Request<IncomingBody>, directory: Arc<dyn Directory>) -> HttpResult {
    let response = match req.uri().path() {
        "/health" => match health::health_check(&directory).await {
            Ok(_) => Response::new(Full::new(Bytes::from("OK"))),
            Err(e) => {
                tracing::error!("Health check failed: {}", e);
                let mut res = Response::new(Full::new(Bytes::from("Service Unavailable")));
                *res.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                res
            }
        },
        "/metrics" => match metrics::gather_metrics() {
            Ok(metrics_data) => {
                let mut res = Response::new(Full::new(Bytes::from(metrics_data)));
                res.headers_mut()
                    .insert("Content-Type", "text/plain; version=0.0.4".parse().unwrap());
                res
            }
            Err(e) => {
                tracing::error!("Failed to gather metrics: {}", e);
                let mut res = Response::new(Full::new(Bytes::from("Internal Server Error")));
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res
            }
        },
        _ => {
            let mut not_found = Response::new(Full::new(Bytes::from("Not Found")));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            not_found
        }
    };
    Ok(response)
}

pub async fn run_http_server(config: Arc<Config>, directory: Arc<dyn Directory>) -> Result<()> {
    let http_addr = format!("0.0.0.0:{}", config.health_port);
    let listener = TcpListener::bind(&http_addr).await?;
    tracing::info!("HTTP server listening on http://{}", http_addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let directory = directory.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| http_handler(req, directory.clone()));

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Error serving HTTP connection: {:?}", err);
            }
        });
    }
}

pub async fn run_websocket_server(app_context: AppContext, listener: TcpListener) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to accept socket: {}", e);
                continue;
            }
        };

        let ctx = app_context.clone();
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config::MAX_WEBSOCKET_FRAME_SIZE);
        ws_config.max_frame_size = Some(config::MAX_WEBSOCKET_FRAME_SIZE);

        tokio::spawn(async move {
            if let Ok(ws_stream) = accept_async_with_config(socket, Some(ws_config)).await {
                handlers::handle_websocket(ws_stream, addr, ctx).await;
            }
        });
    }
}

/// Periodic directory sweep; shares no lock with foreground routing.
async fn run_directory_sweeper(directory: Arc<dyn Directory>, interval: Duration, max_idle: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match directory.sweep(max_idle).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Directory sweep evicted stale entries"),
            Err(e) => tracing::warn!(error = %e, "Directory sweep failed"),
        }
    }
}

/// Periodic token-bucket garbage collection.
async fn run_bucket_purger(limiter: Arc<RateLimiter>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let purged = limiter.purge_idle();
        if purged > 0 {
            tracing::debug!(purged, "Purged idle rate-limit buckets");
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    let instance_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(instance_id = %instance_id, "Starting switchboard");

    let clients: Clients = Arc::new(RwLock::new(HashMap::new()));

    // Select the directory store and fan-out bridge once, at startup.
    let (directory, bridge): (Arc<dyn Directory>, Option<Arc<dyn bridge::FanoutBridge>>) =
        match &config.redis_url {
            Some(url) => {
                tracing::info!("Multi-instance mode: Redis directory and fan-out bridge");
                let directory = RedisDirectory::connect(
                    url,
                    config.directory_ttl(),
                    config.store_timeout(),
                    config.assign_max_attempts,
                )
                .await?;
                let bridge = RedisBridge::connect(url, &instance_id).await?;

                let subscriber_url = url.clone();
                let subscriber_clients = clients.clone();
                let subscriber_instance = instance_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = bridge::run_subscriber(
                        subscriber_url,
                        subscriber_instance,
                        subscriber_clients,
                    )
                    .await
                    {
                        tracing::error!(error = %e, "Fan-out subscriber stopped");
                    }
                });

                (Arc::new(directory), Some(Arc::new(bridge) as Arc<dyn bridge::FanoutBridge>))
            }
            None => {
                tracing::info!("Single-instance mode: in-process directory, no bridge");
                (
                    Arc::new(MemoryDirectory::new(config.assign_max_attempts)),
                    None,
                )
            }
        };

    let limiter = Arc::new(RateLimiter::new(
        config.limits.bucket_table(),
        Duration::from_secs(config.limits.bucket_idle_secs),
    ));

    let auth: Arc<dyn AuthGate> = match &config.auth_token {
        Some(token) => Arc::new(StaticTokenGate::new(token.clone())),
        None => Arc::new(GuestGate),
    };

    let app_context = AppContext::new(
        config.clone(),
        directory.clone(),
        limiter.clone(),
        clients,
        bridge,
        auth,
        Arc::new(TracingSink),
        instance_id,
    );

    tokio::spawn(run_directory_sweeper(
        directory.clone(),
        Duration::from_secs(config.sweep_interval_secs),
        config.directory_ttl(),
    ));
    tokio::spawn(run_bucket_purger(
        limiter,
        Duration::from_secs(config.limits.purge_interval_secs),
    ));

    let bind_address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!("Switchboard listening on {} (WebSocket)", bind_address);

    let websocket_server = run_websocket_server(app_context, listener);
    let http_server = run_http_server(config, directory);

    tokio::select! {
        _ = websocket_server => {
            tracing::info!("WebSocket server shut down.");
        },
        res = http_server => {
            if let Err(e) = res {
                tracing::error!("HTTP server failed: {}", e);
            }
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received. Shutting down...");
        }
    }

    Ok(())
}
