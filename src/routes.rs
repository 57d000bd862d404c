use axum::Router;
use axum::routing::get;

pub fn configure_routes() -> Router {
    Router::new().route("/health", get(|| async { "ok" }))
}
