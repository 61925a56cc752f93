use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use flame_db::{Database, SqliteBackend};
use flame_gateway::connection;
use flame_gateway::pipeline::GatewayDeps;
use flame_gateway::rooms::RoomIndex;

#[derive(Clone)]
struct ServerState {
    rooms: RoomIndex,
    deps: Arc<GatewayDeps>,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flame=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("FLAME_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("FLAME_DB_PATH").unwrap_or_else(|_| "flame.db".into());
    let host = std::env::var("FLAME_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("FLAME_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let quota_bypass = std::env::var("FLAME_QUOTA_BYPASS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if quota_bypass {
        warn!("Quota enforcement is BYPASSED — development mode only");
    }

    // Init database and collaborators
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    let backend = SqliteBackend::new(db);

    let deps = Arc::new(GatewayDeps {
        messages: Arc::new(backend.clone()),
        quota: Arc::new(backend.clone()),
        blocks: Arc::new(backend.clone()),
        presence: Arc::new(backend),
        quota_bypass,
    });

    let state = ServerState {
        rooms: RoomIndex::new(),
        deps,
        jwt_secret,
    };

    // Routes
    let app = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Flame messaging gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.rooms, state.deps, state.jwt_secret)
    })
}
