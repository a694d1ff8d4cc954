use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, HeaderValue, header, request::Parts},
};
use chrono::Utc;
use cookie::{Cookie, SameSite};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{
    config::{AppConfig, Env},
    error::AppError,
    models::UserListing,
    repository::RepositoryState,
};

/// Name of the cookie carrying the signed session token.
pub const SESSION_COOKIE: &str = "session";

/// Role name granting unrestricted access to user management.
pub const ADMIN_ROLE: &str = "admin";

/// Claims
///
/// Payload of the signed session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The `user_info.id` of the session owner.
    pub sub: i32,
    pub exp: usize,
    pub iat: usize,
}

/// CurrentUser
///
/// The identity resolved from a valid session. Always re-read from the store,
/// so a deleted account or a changed role takes effect on the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i32,
    pub username: String,
    pub role_name: Option<String>,
}

impl CurrentUser {
    pub fn has_role(&self, role_name: &str) -> bool {
        self.role_name.as_deref() == Some(role_name)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

impl From<UserListing> for CurrentUser {
    fn from(user: UserListing) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role_name: user.role_name,
        }
    }
}

/// Session
///
/// The explicit per-request identity: `None` for anonymous callers. Passed to
/// the guards instead of being read from ambient state.
#[derive(Debug, Clone, Default)]
pub struct Session(pub Option<CurrentUser>);

impl Session {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn user(&self) -> Option<&CurrentUser> {
        self.0.as_ref()
    }
}

/// Signs a session token for `user_id`.
pub fn issue_token(user_id: i32, config: &AppConfig) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        iat: now as usize,
        exp: (now + config.session_ttl_secs) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )
}

/// Verifies signature and expiry, returning the user id the token was issued
/// for. Any failure yields `None`: a bad token is an anonymous request.
pub fn verify_token(token: &str, secret_key: &str) -> Option<i32> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret_key.as_bytes()),
        &validation,
    ) {
        Ok(data) => Some(data.claims.sub),
        Err(e) => {
            tracing::debug!(error = %e, "rejected session token");
            None
        }
    }
}

/// Pulls the session token out of the request's `Cookie` headers.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

/// `Set-Cookie` value establishing a session.
pub fn session_cookie(token: String, config: &AppConfig) -> HeaderValue {
    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.env == Env::Production)
        .build();
    // Token and attributes are ASCII, so the header value is always valid.
    HeaderValue::from_str(&cookie.to_string()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// `Set-Cookie` value that makes the client drop its session.
pub fn removal_cookie() -> HeaderValue {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookie.make_removal();
    HeaderValue::from_str(&cookie.to_string()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Session Extractor Implementation
///
/// 1. Reuses a session already resolved for this request (by the
///    `login_required` layer) from the request extensions.
/// 2. Reads and verifies the session cookie.
/// 3. Loads the user and role from the store.
///
/// Missing, invalid or expired tokens, and tokens for deleted users, resolve
/// to an anonymous session. Only store failures reject the request.
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<Session>() {
            return Ok(session.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let user_id = session_token(&parts.headers)
            .and_then(|token| verify_token(&token, &config.secret_key));

        let session = match user_id {
            Some(id) => Session(repo.get_user_with_role(id).await?.map(CurrentUser::from)),
            None => Session::anonymous(),
        };

        parts.extensions.insert(session.clone());
        Ok(session)
    }
}
