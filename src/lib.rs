use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod forms;
pub mod guards;
pub mod handlers;
pub mod models;
pub mod repository;

// Routers grouped by required access (public, authenticated, admin).
pub mod routes;
use auth::Session;
use error::AppError;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document for every route, served at `/api-docs/openapi.json` and
/// browsable under `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::index, handlers::register_form, handlers::register,
        handlers::login_form, handlers::login, handlers::logout,
        handlers::list_users, handlers::add_user_form, handlers::add_user,
        handlers::update_user_form, handlers::update_user, handlers::delete_user
    ),
    components(
        schemas(
            models::Role, models::UserListing, models::HomeView, models::FormView,
            models::FormKind, models::FieldErrors,
            forms::RegisterForm, forms::LoginForm, forms::AddUserForm, forms::UpdateUserForm,
        )
    ),
    tags(
        (name = "user-accounts", description = "User registration, sessions and account management")
    )
)]
struct ApiDoc;

/// AppState
///
/// Shared, cloneable container for the store handle and the configuration.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub config: AppConfig,
}

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// login_required
///
/// First layer in front of the authenticated and admin routers. Resolving the
/// `Session` here caches it in the request extensions, so the handler's own
/// `Session` extractor does not hit the store a second time.
async fn login_required(session: Session, request: Request, next: Next) -> Response {
    match guards::login_required(session.user()) {
        Ok(_) => next.run(request).await,
        Err(denial) => AppError::from(denial).into_response(),
    }
}

/// create_router
///
/// Assembles the routers, their access layers, and the observability stack.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header used to correlate a request across log lines and responses.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        // Documentation: Swagger UI plus the raw OpenAPI document.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public Routes: home, registration and login. No session required.
        .merge(public::public_routes())
        // Session Routes: the self-or-admin account routes and the admin
        // routes share one `login_required` layer. It only runs for requests
        // that matched one of these routes, so unknown paths still 404.
        // The finer role checks happen inside each handler.
        .merge(
            authenticated::authenticated_routes()
                .merge(admin::admin_routes())
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    login_required,
                )),
        )
        // Apply the shared state to every route.
        .with_state(state);

    // 3. Observability and Correlation Layers (outermost, run first)
    base_router
        .layer(
            ServiceBuilder::new()
                // 3a. Request ID Generation: a UUID per incoming request.
                .layer(SetRequestIdLayer::new(
                    x_request_id.clone(),
                    MakeRequestUuid,
                ))
                // 3b. Request Tracing: one span per request, carrying the id
                // from 3a, with the status and latency logged on response.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Request ID Propagation: echo the id back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer (applied last)
        .layer(cors)
}

/// trace_span_logger
///
/// Request span carrying method, URI and the request id, so every log line of
/// one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
