//! Router Module Index
//!
//! Routes grouped by the access they require, so each group gets its
//! middleware applied once in `create_router`.

/// Routes open to anonymous callers.
pub mod public;

/// Routes behind the `login_required` layer.
pub mod authenticated;

/// Routes restricted to the admin role.
pub mod admin;
