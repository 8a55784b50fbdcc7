//! HTTP control API
mod auth;
mod error;
mod peers;
mod update;

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::extract::OriginalUri;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use log::info;
use tokio::net::TcpListener;

pub use error::{ApiError, ErrorBody};
pub use peers::{PeerDetail, PeerStatistics, PeerSummary};
pub use update::{OutboundStatus, RefreshQueued, RefreshRequest, UpdateQueued};

use crate::config::ApiConfig;
use crate::registry::PeerRegistry;
use crate::session::SessionHandle;
use crate::utils::addr_from_str;

#[derive(Clone)]
pub struct AppState {
    pub registry: PeerRegistry,
    pub api: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(registry: PeerRegistry, api: Arc<ApiConfig>) -> Self {
        Self { registry, api }
    }
}

/// Resolve the `{ip}` path segment to a registered session
async fn lookup(state: &AppState, peer: &str) -> Result<SessionHandle, ApiError> {
    let addr = addr_from_str(peer).map_err(|err| ApiError::BadRequest(err.reason))?;
    Ok(state.registry.lookup(addr).await?)
}

async fn not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/peer/:ip/send/update",
            post(update::send_update)
                .get(update::update_status)
                .fallback(method_not_allowed),
        )
        .route(
            "/v1/peer/:ip/send/route-refresh",
            post(update::send_route_refresh).fallback(method_not_allowed),
        )
        .route(
            "/v1/peer/:ip/state",
            get(peers::peer_state).fallback(method_not_allowed),
        )
        .route(
            "/v1/peer/:ip/statistic",
            get(peers::peer_statistics).fallback(method_not_allowed),
        )
        .route(
            "/v1/peers",
            get(peers::list_peers).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_auth))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
