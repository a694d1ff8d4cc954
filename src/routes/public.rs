use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints reachable without a session: the home page and the entry points
/// that create one.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        // GET /
        // Home. Reports the logged-in identity, if any.
        .route("/", get(handlers::index))
        // GET, POST /register
        // Self-service sign-up. Success logs the new account in.
        .route("/register", get(handlers::register_form).post(handlers::register))
        // GET, POST /login
        .route("/login", get(handlers::login_form).post(handlers::login))
}
