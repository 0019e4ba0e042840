//! HTTP server implementation using Axum.

use crate::handlers::s3::{get_object, head_object, list_bucket, put_direct, put_object};
use crate::handlers::{handle_health, handle_rpc};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use nscache_core::config::NetworkConfig;
use nscache_core::Gateway;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Requests handled at once; further requests wait for a slot.
const MAX_CONCURRENT_REQUESTS: usize = 1024;

/// Application state shared across handlers.
pub struct AppState {
    pub gateway: Gateway,
}

/// Build the router with every route and middleware layer.
pub fn build_router(gateway: Gateway) -> Router {
    let state = Arc::new(AppState { gateway });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .route("/s3/:bucket", get(list_bucket))
        .route(
            "/s3/:bucket/*key",
            get(get_object).head(head_object).put(put_object),
        )
        .route("/hub/:resource/*key", put(put_direct))
        .layer(DefaultBodyLimit::max(NetworkConfig::MAX_PUT_BYTES))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(gateway: Gateway, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let app = build_router(gateway);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nscache_core::MemoryBackend;

    #[tokio::test]
    async fn test_server_starts() {
        let gateway = Gateway::builder()
            .backend(Arc::new(MemoryBackend::auto_creating()))
            .build()
            .await
            .unwrap();
        let addr = start_server(gateway, "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_bad_host_is_rejected() {
        let gateway = Gateway::builder()
            .backend(Arc::new(MemoryBackend::new()))
            .build()
            .await
            .unwrap();
        assert!(start_server(gateway, "not an address", 0).await.is_err());
    }
}
