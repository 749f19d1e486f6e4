use std::sync::Arc;

use axum::middleware as axum_middleware;
use axum::routing::get;
use axum::Router;
use relay_shared::clients::RedisClient;
use relay_shared::middleware::{init_metrics, init_tracing, metrics_middleware};
use socketioxide::SocketIo;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

mod bus;
mod config;
mod inbox;
mod inbox_routes;
mod instance;
mod push;
mod push_routes;
mod redis_conn;
mod registry;
mod rooms;
mod socket;
mod state;
mod stats;
mod telegram;
mod token;
mod webhook;

use bus::Bus;
use config::AppConfig;
use push::{PushDispatcher, VapidKeys};
use registry::Registry;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("relay-core");

    let config = AppConfig::load()?;
    let port = config.port;

    let instance_id = instance::generate_instance_id();
    tracing::info!(instance_id = %instance_id, "starting relay-core");

    let redis_url = redis_conn::resolve_redis_url(&config).await.ok();
    let redis_url_for_redis = redis_url.clone().ok_or_else(|| {
        anyhow::anyhow!("unable to resolve a redis connection; the inbox and push stores require it")
    })?;
    let redis = RedisClient::connect(&redis_url_for_redis).await?;

    let registry: Arc<Registry<socket::transport::SocketEmitter>> = Arc::new(Registry::new());

    let metrics_handle = init_metrics();

    let bus = {
        let registry = registry.clone();
        Bus::connect(redis_url, instance_id.clone(), move |envelope| {
            let registry = registry.clone();
            async move {
                rooms::apply_remote(&registry, &envelope);
            }
        })
        .await
    };

    let vapid = if config.vapid_configured() {
        VapidKeys::from_config(
            config.vapid_public_key.as_deref().unwrap_or_default(),
            config.vapid_private_key.as_deref().unwrap_or_default(),
        )
    } else {
        tracing::warn!("no VAPID keys configured, generating ephemeral keys for this process");
        VapidKeys::generate()?
    };

    let push = PushDispatcher::new(redis.clone(), Some(vapid), config.vapid_subject.clone())?;

    let (sio_layer, io) = SocketIo::builder().build_layer();

    let http_client = reqwest::Client::new();

    let state = Arc::new(AppState {
        config,
        redis,
        bus,
        registry,
        io: io.clone(),
        http_client,
        instance_id,
        push,
    });

    io.ns("/", {
        let state = state.clone();
        move |socket: socketioxide::extract::SocketRef, socketioxide::extract::Data(auth): socketioxide::extract::Data<serde_json::Value>| {
            let state = state.clone();
            async move {
                socket::handlers::register(socket, state, auth);
            }
        }
    });

    let sweep_handle = spawn_sweep_task(state.clone());

    let cors = build_cors_layer(&state.config);

    let app = Router::new()
        .merge(webhook::router())
        .merge(inbox_routes::router())
        .merge(push_routes::router())
        .merge(stats::router())
        .route("/metrics", get(move || render_metrics(metrics_handle.clone())))
        .layer(sio_layer)
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "relay-core listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // axum has stopped accepting new connections by the time `serve`
    // returns (spec.md 5, step 1). Drain in order: stop the sweep task,
    // unsubscribe and close the bus, then close every live socket.
    sweep_handle.abort();
    state.bus.close().await;
    state.registry.close_all();
    tracing::info!("shutdown drain complete");

    Ok(())
}

fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let origins = config.cors_origins();
    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_credentials(true)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }
}

async fn render_metrics(handle: metrics_exporter_prometheus::PrometheusHandle) -> String {
    handle.render()
}

fn spawn_sweep_task(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(registry::SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let reaped = state.registry.sweep_dead();
            if !reaped.is_empty() {
                tracing::info!(count = reaped.len(), "swept dead sockets");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, stopping acceptance of new connections");
}
