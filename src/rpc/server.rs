//! RPC HTTP Server
//!
//! Axum-based HTTP server that answers JSON-RPC requests posted to `/`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::node::Node;
use crate::rpc::methods::{handle_request, JsonRpcRequest, JsonRpcResponse, RpcState};

/// Build the router; split out so tests can drive it without a socket.
pub fn rpc_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(handle_rpc))
        .layer(cors)
        .with_state(Arc::new(RpcState { node }))
}

/// Serve RPC on `port` until `shutdown` flips to true.
pub async fn start_rpc_server(
    node: Arc<Node>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "RPC server listening");

    axum::serve(listener, rpc_router(node))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    info!("RPC server stopped");
    Ok(())
}

/// Handle incoming JSON-RPC requests
async fn handle_rpc(
    State(state): State<Arc<RpcState>>,
    Json(request): Json<JsonRpcRequest>,
) -> (StatusCode, Json<JsonRpcResponse>) {
    debug!(method = %request.method, "rpc call");
    let response = handle_request(&state, request);
    (StatusCode::OK, Json(response))
}
