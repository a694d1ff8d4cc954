use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin Router Module
///
/// User-management routes restricted to the admin role. Sits behind the same
/// `login_required` layer as the authenticated routes; the role check itself
/// happens in each handler and answers 403 rather than redirecting.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /user
        // Every account with its role name, ascending by id.
        .route("/user", get(handlers::list_users))
        // GET, POST /user/add
        // Create an account with an explicit role.
        .route("/user/add", get(handlers::add_user_form).post(handlers::add_user))
}
