use crate::handlers::{get_price, get_prices, health};
use crate::state::ApiState;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn create_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/price", get(get_price))
        .route("/prices", post(get_prices));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: ApiState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "price api listening");
    }
    axum::serve(listener, create_router(state)).await
}
