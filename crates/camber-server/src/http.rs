use std::net::SocketAddr;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use camber_core::RunError;
use camber_wire::{decode_history, ChatRequest, ChatResponse, WireTurn};

use crate::AppState;

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("camber-engine listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/chat", post(chat))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({"message": "Camber agent API is running"}))
}

enum RunFailure {
    /// The submitted history itself was malformed: a client bug, not a run
    /// failure.
    BadRequest(String),
    Run(RunError),
}

async fn run_once(
    state: &AppState,
    run_id: &str,
    req: ChatRequest,
    cancel: CancellationToken,
) -> Result<WireTurn, RunFailure> {
    let history =
        decode_history(req.messages).map_err(|err| RunFailure::BadRequest(err.to_string()))?;
    let history = state
        .engine
        .run(run_id, history, cancel)
        .await
        .map_err(RunFailure::Run)?;
    let last = history.last().ok_or_else(|| {
        RunFailure::Run(RunError::HistoryInvariant {
            detail: "completed run produced an empty history".to_string(),
        })
    })?;
    Ok(WireTurn::from_turn(last))
}

async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let run_id = Uuid::new_v4().to_string();
    match run_once(&state, &run_id, req, CancellationToken::new()).await {
        Ok(message) => Json(ChatResponse { message }).into_response(),
        Err(RunFailure::BadRequest(detail)) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": detail}))).into_response()
        }
        Err(RunFailure::Run(err)) => {
            tracing::error!(run_id = %run_id, error_code = err.error_code(), "chat run failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_stream(socket, state))
}

/// One run per inbound text frame; all continuity lives in the history the
/// client resubmits. Peer disconnect mid-run cancels the run and ends the
/// loop as a normal termination.
async fn ws_stream(mut socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "websocket client connected");

    while let Some(inbound) = socket.recv().await {
        let Ok(msg) = inbound else { break };
        let raw = match msg {
            WsMessage::Text(raw) => raw,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let cancel = CancellationToken::new();
        let run = handle_ws_request(&state, raw.as_str(), cancel.clone());
        tokio::pin!(run);
        let reply = loop {
            tokio::select! {
                reply = &mut run => break Some(reply),
                interrupt = socket.recv() => match interrupt {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => {
                        cancel.cancel();
                        break None;
                    }
                    // frames arriving mid-run are ignored: the protocol is
                    // lock-step request/reply
                    Some(Ok(_)) => continue,
                }
            }
        };

        let Some(reply) = reply else {
            tracing::info!(conn_id = %conn_id, "client disconnected mid-run");
            return;
        };
        if socket
            .send(WsMessage::Text(reply.to_string().into()))
            .await
            .is_err()
        {
            break;
        }
    }
    tracing::info!(conn_id = %conn_id, "websocket client disconnected");
}

/// Every failure mode answers in-band as `{"message": {"error": ...}}`; the
/// connection itself stays usable.
async fn handle_ws_request(state: &AppState, raw: &str, cancel: CancellationToken) -> Value {
    let req = match serde_json::from_str::<ChatRequest>(raw) {
        Ok(req) => req,
        Err(err) => {
            return json!({"message": {"error": format!("invalid request: {err}")}});
        }
    };
    let run_id = Uuid::new_v4().to_string();
    match run_once(state, &run_id, req, cancel).await {
        Ok(message) => json!({"message": message}),
        Err(RunFailure::BadRequest(detail)) => json!({"message": {"error": detail}}),
        Err(RunFailure::Run(err)) => {
            tracing::error!(run_id = %run_id, error_code = err.error_code(), "ws run failed: {err}");
            json!({"message": {"error": err.to_string()}})
        }
    }
}
