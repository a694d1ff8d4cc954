use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Routes that need a session. The router is wrapped in the `login_required`
/// layer, which redirects anonymous callers to `/login` before any handler
/// runs. The per-account routes then apply the self-or-admin guard against
/// the `{id}` in the path.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /logout
        .route("/logout", get(handlers::logout))
        // GET, POST /user/{id}/update
        // Owner or admin. Only admins see and may change the role.
        .route(
            "/user/{id}/update",
            get(handlers::update_user_form).post(handlers::update_user),
        )
        // GET, POST /user/{id}/delete
        // Owner or admin. Hard delete, no confirmation step.
        .route(
            "/user/{id}/delete",
            get(handlers::delete_user).post(handlers::delete_user),
        )
}
