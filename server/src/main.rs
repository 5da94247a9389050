use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use protocol::{PlayerId, RoomId};
use server::lifecycle::{Runtime, RuntimeCollaborators};
use server::{dispatch, session, ws};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Clone)]
struct AppState {
    registry: Arc<session::SessionRegistry>,
    dispatcher: Arc<dispatch::Dispatcher>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let mut runtime = match Runtime::start(RuntimeCollaborators::default()).await {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "startup failed");
            panic!("startup failed: {error}");
        }
    };

    let listen_addr = runtime.config.listen_addr.clone();
    let state = AppState { registry: runtime.registry.clone(), dispatcher: runtime.dispatcher.clone() };

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await.unwrap();

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal).await.unwrap();

    runtime.shutdown().await;
}

/// Plain-text liveness/online-count diagnostic (spec §6.1), grounded on
/// the teacher's `/enlist` handler shape.
async fn healthz_handler(State(state): State<AppState>) -> String {
    let summaries = state.registry.online_summaries().await;
    let transports = state.registry.live_transport_count().await;
    format!(
        "ok, {} online, {} live transports\n{}",
        summaries.len(),
        transports,
        summaries.into_iter().map(|(_, name)| name).collect::<Vec<_>>().join("\n")
    )
}

/// Carries the already-authenticated identity as query parameters (spec
/// §6.1): the auth collaborator that issues and verifies this identity is
/// out of core scope.
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>, Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let player_id = params.get("player_id").and_then(|raw| raw.parse::<uuid::Uuid>().ok()).map(PlayerId).unwrap_or_default();
    let display_name = params.get("name").cloned().unwrap_or_else(|| player_id.to_string());
    let room_id = params
        .get("room")
        .and_then(|raw| RoomId::parse(raw.clone()).ok())
        .unwrap_or_else(|| RoomId::parse("arkham_room_start").unwrap());

    ws.on_upgrade(move |socket| ws::serve(socket, player_id, display_name, room_id, state.registry, state.dispatcher))
}
