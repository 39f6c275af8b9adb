//! Axum router construction.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/v1/fields/encrypt", post(handlers::encrypt))
        .route("/v1/fields/decrypt", post(handlers::decrypt))
        .route("/v1/fields/reveal", post(handlers::reveal))
        .route("/v1/names/encrypt", post(handlers::encrypt_name))
        .route("/v1/search", post(handlers::search))
        .route("/v1/keys/rotate", post(handlers::rotate_keys))
        .route("/v1/keys/retire", post(handlers::retire_keys))
        .route("/v1/deletions", post(handlers::delete_subjects))
        .route("/v1/audit/:tenant/verify", get(handlers::verify_audit))
        .route("/v1/cache/clear", post(handlers::clear_cache))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = build(AppState::for_tests());
        let req = Request::builder()
            .uri("/unknown")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn health_route_exists() {
        let app = build(AppState::for_tests());
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let app = build(AppState::for_tests());
        let req = Request::builder()
            .uri("/v1/search")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 405);
    }
}
