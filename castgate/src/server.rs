//! Router assembly.

use axum::{Router, routing::get};

use castgate_proxy::ProxyState;
use castgate_stream::RtpHandlerState;

pub fn build_router(rtp: RtpHandlerState, proxy: ProxyState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(castgate_stream::router(rtp))
        .merge(castgate_proxy::router(proxy))
}

async fn health_check() -> &'static str {
    "OK"
}
