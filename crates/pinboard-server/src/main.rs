use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use pinboard_api::graphql::{self, AppSchema};
use pinboard_api::images::{self, ImageStore};
use pinboard_api::middleware::{authenticate, verify_token};
use pinboard_api::state::{AppState, AppStateInner};
use pinboard_gateway::broadcaster::Broadcaster;
use pinboard_gateway::connection;

#[derive(Clone)]
struct ServerState {
    broadcaster: Broadcaster,
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
                .unwrap_or_else(|_| "pinboard=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PINBOARD_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PINBOARD_DB_PATH").unwrap_or_else(|_| "pinboard.db".into());
    let image_dir: PathBuf = std::env::var("PINBOARD_IMAGE_DIR")
        .unwrap_or_else(|_| "./images".into())
        .into();
    let host = std::env::var("PINBOARD_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PINBOARD_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()?;
    let per_page: u32 = std::env::var("PINBOARD_PER_PAGE")
        .unwrap_or_else(|_| "2".into())
        .parse()?;

    // Init database and image storage
    let db = pinboard_db::Database::open(&PathBuf::from(&db_path))?;
    let images = ImageStore::new(image_dir.clone()).await?;

    // Shared state; the broadcaster is constructed here and handed to every
    // collaborator that needs it
    let broadcaster = Broadcaster::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        images,
        broadcaster: broadcaster.clone(),
        jwt_secret: jwt_secret.clone(),
        per_page,
    });
    let schema: AppSchema = graphql::build_schema(app_state.clone());

    // Routes. The credential verifier runs in front of both entry points and
    // never rejects by itself; handlers decide whether auth is required.
    let graphql_routes = Router::new()
        .route("/graphql", get(graphql::graphiql).post(graphql::graphql_handler))
        .layer(middleware::from_fn_with_state(app_state.clone(), authenticate))
        .with_state(schema);

    let upload_routes = Router::new()
        .route("/post-image", put(images::upload_image))
        .layer(middleware::from_fn_with_state(app_state.clone(), authenticate))
        .with_state(app_state.clone());

    let ws_routes = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState {
            broadcaster,
            jwt_secret,
        });

    let app = Router::new()
        .merge(graphql_routes)
        .merge(upload_routes)
        .merge(ws_routes)
        .nest_service("/images", ServeDir::new(&image_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Pinboard server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Feed gateway upgrade. The token is checked here, before the upgrade, so
/// the connection handler only ever sees authenticated clients.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let claims = query
        .token
        .as_deref()
        .and_then(|token| verify_token(&state.jwt_secret, token));

    match claims {
        Some(claims) => ws
            .on_upgrade(move |socket| connection::handle_connection(socket, state.broadcaster, claims))
            .into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}
