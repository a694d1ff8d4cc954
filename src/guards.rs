//! Access-control guards.
//!
//! Plain predicates over the session identity (and, where relevant, the id of
//! the account being acted on). Each one checks authentication first and only
//! then looks at roles, so an anonymous caller is always sent to log in.

use crate::{auth::CurrentUser, error::AppError};

/// Why a guard refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// No session: redirect to the login entry point.
    Login,
    /// Authenticated without the required role: 403.
    Forbidden,
    /// Authenticated but neither admin nor the account owner: redirect home.
    Home,
}

impl From<Denial> for AppError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Login => AppError::Unauthenticated,
            Denial::Forbidden => AppError::Forbidden,
            Denial::Home => AppError::NotPermitted,
        }
    }
}

pub fn login_required(user: Option<&CurrentUser>) -> Result<&CurrentUser, Denial> {
    user.ok_or(Denial::Login)
}

pub fn admin_required(user: Option<&CurrentUser>) -> Result<&CurrentUser, Denial> {
    let user = login_required(user)?;
    if user.is_admin() {
        Ok(user)
    } else {
        Err(Denial::Forbidden)
    }
}

pub fn admin_or_self_required(
    user: Option<&CurrentUser>,
    target_id: i32,
) -> Result<&CurrentUser, Denial> {
    let user = login_required(user)?;
    if user.is_admin() || user.id == target_id {
        Ok(user)
    } else {
        Err(Denial::Home)
    }
}
