use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::routes;
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    // Public routes — no auth required (health probes only)
    let public_routes = Router::new().route("/health", get(routes::health::health_check));

    // Protected routes — require RAGFORGE_AUTH_TOKEN when configured
    let protected_routes = Router::new()
        .route("/shutdown", post(routes::health::shutdown_handler))
        .route("/api/projects", get(routes::projects::list_projects))
        .route("/api/projects", post(routes::projects::create_project))
        .route("/api/projects/{project_id}", get(routes::projects::get_project))
        .route("/api/projects/{project_id}", delete(routes::projects::remove_project))
        .route("/api/projects/{project_id}/sources", post(routes::projects::add_knowledge_source))
        .route(
            "/api/projects/{project_id}/sources/{source_id}",
            delete(routes::projects::remove_knowledge_source),
        )
        .route("/api/projects/{project_id}/index", post(routes::projects::trigger_index))
        .route(
            "/api/projects/{project_id}/sources/{source_id}/progress",
            get(routes::projects::knowledge_source_progress),
        )
        .route(
            "/api/projects/{project_id}/sources/{source_id}/verify",
            post(routes::projects::verify_checksums),
        )
        .route("/api/projects/{project_id}/query", post(routes::query::query_project))
        .route("/ws", get(ws_handler))
        .layer(axum::middleware::from_fn(auth_middleware));

    public_routes
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// Middleware that validates `Authorization: Bearer <token>` against the
/// `RAGFORGE_AUTH_TOKEN` environment variable. If the env var is not set or
/// empty, auth is skipped (development mode).
async fn auth_middleware(req: Request, next: Next) -> Result<Response, (StatusCode, axum::Json<serde_json::Value>)> {
    use std::sync::OnceLock;
    static AUTH_TOKEN: OnceLock<Option<String>> = OnceLock::new();
    let expected = AUTH_TOKEN.get_or_init(|| std::env::var("RAGFORGE_AUTH_TOKEN").ok().filter(|t| !t.is_empty()));

    let expected_token = match expected {
        Some(t) => t.as_str(),
        None => return Ok(next.run(req).await),
    };

    let auth_header = req.headers().get("authorization").and_then(|v| v.to_str().ok());

    match auth_header {
        Some(header) if header.len() > 7 && header[..7].eq_ignore_ascii_case("bearer ") => {
            let token = &header[7..];
            if token == expected_token {
                Ok(next.run(req).await)
            } else {
                tracing::warn!("Auth token mismatch — rejecting request");
                Err((StatusCode::UNAUTHORIZED, axum::Json(serde_json::json!({"error": "Unauthorized", "status": 401}))))
            }
        }
        _ => {
            tracing::warn!("Missing or malformed Authorization header — rejecting request");
            Err((StatusCode::UNAUTHORIZED, axum::Json(serde_json::json!({"error": "Unauthorized", "status": 401}))))
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bidirectional WebSocket handler.
/// Server -> Client: broadcasts `IndexerEvent`s as JSON, filtered by
/// subscribed project IDs.
/// Client -> Server: `subscribe_project` / `unsubscribe_project` /
/// `trigger_index` commands.
async fn handle_socket(socket: WebSocket, state: AppState) {
    tracing::info!("WebSocket client connected");
    let mut rx = state.registry.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let subscribed: Arc<parking_lot::Mutex<HashSet<String>>> = Arc::new(parking_lot::Mutex::new(HashSet::new()));
    let subscribed_for_send = subscribed.clone();

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    {
                        let subs = subscribed_for_send.lock();
                        if !subs.is_empty() && !subs.contains(event.project_id()) {
                            continue;
                        }
                    }
                    if let Ok(json) = serde_json::to_string(&event) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("WebSocket client lagged, skipped {} events", n);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    });

    let registry = state.registry.clone();

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                let text_str: &str = &text;
                if let Ok(cmd) = serde_json::from_str::<serde_json::Value>(text_str) {
                    let cmd_type = cmd.get("type").and_then(|v| v.as_str()).unwrap_or("");
                    tracing::debug!(command = cmd_type, "WebSocket command received");
                    match cmd_type {
                        "subscribe_project" => {
                            if let Some(project_id) = cmd.get("project_id").and_then(|v| v.as_str()) {
                                subscribed.lock().insert(project_id.to_string());
                                tracing::debug!("Client subscribed to project: {}", project_id);
                            }
                        }
                        "unsubscribe_project" => {
                            if let Some(project_id) = cmd.get("project_id").and_then(|v| v.as_str()) {
                                subscribed.lock().remove(project_id);
                                tracing::debug!("Client unsubscribed from project: {}", project_id);
                            }
                        }
                        "trigger_index" => {
                            let project_id = cmd.get("project_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                            let watch_for_changes = cmd.get("watch_for_changes").and_then(|v| v.as_bool()).unwrap_or(true);
                            if !project_id.is_empty() {
                                if let Err(e) = registry
                                    .dispatch(crate::events::IndexerCommand::ProjectIndexingRequested {
                                        project_id,
                                        knowledge_sources: None,
                                        embedding_model: None,
                                        embedding_store: None,
                                        watch_for_changes,
                                    })
                                    .await
                                {
                                    tracing::warn!("Failed to trigger indexing from WebSocket command: {}", e);
                                }
                            }
                        }
                        _ => {
                            tracing::debug!("Unknown WS command: {}", cmd_type);
                        }
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }
    tracing::info!("WebSocket client disconnected");
}
