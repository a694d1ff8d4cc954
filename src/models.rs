use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::BTreeMap, fmt};
use ts_rs::TS;
use utoipa::ToSchema;

// --- Store Records ---

/// Role
///
/// A row of the `user_role` table. Role names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Role {
    pub id: i32,
    pub role_name: String,
}

/// User
///
/// A row of the `user_info` table. `password` holds the PHC hash string and is
/// never serialized.
#[derive(Clone, PartialEq, Eq, Serialize, FromRow, Default)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    // Nullable FK to user_role.id.
    pub user_role: Option<i32>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<hash>")
            .field("user_role", &self.user_role)
            .finish()
    }
}

/// UserListing
///
/// One line of the admin listing: a user joined with its role name. Users
/// without a role carry `role_name: None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct UserListing {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role_name: Option<String>,
}

// --- Write Models ---

/// NewUser
///
/// A fully validated account ready to be inserted.
#[derive(Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub user_role: Option<i32>,
}

/// UserChanges
///
/// A validated update. `None` for `password_hash` or `user_role` keeps the
/// stored value.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct UserChanges {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub user_role: Option<i32>,
}

// --- Views (Output) ---

/// HomeView
///
/// Body of `GET /`. Both fields are null for anonymous visitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct HomeView {
    pub current_username: Option<String>,
    pub current_id: Option<i32>,
}

/// FieldErrors
///
/// Field name to the human-readable messages raised against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn extend(&mut self, field: &str, messages: Vec<String>) {
        if !messages.is_empty() {
            self.0.entry(field.to_string()).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum FormKind {
    Register,
    Login,
    AddUser,
    UpdateUser,
}

/// FormView
///
/// What a client needs to (re)display a form: the non-secret values, the role
/// choices when the form has a role field, and any validation errors.
/// Password fields are never echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct FormView {
    pub form: FormKind,
    pub username: Option<String>,
    pub email: Option<String>,
    // None when the form has no role field at all.
    pub role_choices: Option<Vec<Role>>,
    pub selected_role: Option<i32>,
    pub errors: FieldErrors,
}

impl FormView {
    pub fn new(form: FormKind) -> Self {
        Self {
            form,
            username: None,
            email: None,
            role_choices: None,
            selected_role: None,
            errors: FieldErrors::default(),
        }
    }

    pub fn with_errors(mut self, errors: FieldErrors) -> Self {
        self.errors = errors;
        self
    }
}
