use std::net::SocketAddr;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use ripple_backbone::LocalBackbone;
use ripple_gateway::connection;
use ripple_gateway::{ConnectionRegistry, FanOutBroadcaster};

#[derive(Clone)]
struct ServerState {
    broadcaster: FanOutBroadcaster<LocalBackbone>,
    registry: ConnectionRegistry,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("RIPPLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("RIPPLE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let channel = std::env::var("RIPPLE_CHANNEL").unwrap_or_else(|_| "chat".into());

    // Shared state
    let registry = ConnectionRegistry::new();
    let backbone = LocalBackbone::new();
    let broadcaster = FanOutBroadcaster::new(backbone, registry.clone(), &channel);

    // The gateway cannot serve without its subscription: a failed initial
    // subscribe aborts startup. Reconnects after that are the pump's job.
    let pump = broadcaster.start().await?;
    tokio::spawn(pump.run());

    let state = ServerState {
        broadcaster,
        registry,
    };

    let app = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ripple relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_socket(socket, state.broadcaster, state.registry)
    })
}

async fn health() -> &'static str {
    "ok"
}
