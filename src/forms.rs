//! Form submissions and their validation.
//!
//! Each field has a declarative rule list run in order. `Required` and
//! `Optional` can end a field's chain early; the other rules accumulate
//! messages. Cross-field (`confirm_password`) and store-backed checks
//! (uniqueness, role existence) run after the field rules. Validation reads
//! the store but never writes to it.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use utoipa::ToSchema;

use crate::{
    credentials::{CredentialError, hash_password},
    models::{FieldErrors, FormKind, FormView, NewUser, Role, User, UserChanges},
    repository::{Repository, RepositoryError, UniqueField},
};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

const REQUIRED_MESSAGE: &str = "This field is required.";
const EMAIL_MESSAGE: &str = "Invalid email address.";
const MISMATCH_MESSAGE: &str = "Field must be equal to password.";
const ROLE_COERCE_MESSAGE: &str = "Invalid Choice: could not coerce.";
const ROLE_CHOICE_MESSAGE: &str = "Not a valid choice.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Blank or whitespace-only fails and ends the chain.
    Required,
    /// Blank passes and ends the chain.
    Optional,
    /// Length in characters.
    Length {
        min: Option<usize>,
        max: Option<usize>,
    },
    Email,
}

const USERNAME_RULES: &[Rule] = &[
    Rule::Required,
    Rule::Length {
        min: Some(4),
        max: Some(64),
    },
];

const EMAIL_RULES: &[Rule] = &[
    Rule::Required,
    Rule::Email,
    Rule::Length {
        min: None,
        max: Some(320),
    },
];

const PASSWORD_RULES: &[Rule] = &[
    Rule::Required,
    Rule::Length {
        min: Some(8),
        max: Some(256),
    },
];

const OPTIONAL_PASSWORD_RULES: &[Rule] = &[
    Rule::Optional,
    Rule::Length {
        min: Some(8),
        max: Some(256),
    },
];

const CONFIRM_RULES: &[Rule] = &[Rule::Required];

fn length_message(min: Option<usize>, max: Option<usize>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("Field must be between {min} and {max} characters long."),
        (None, Some(max)) => format!("Field cannot be longer than {max} characters."),
        (Some(min), None) => format!("Field must be at least {min} characters long."),
        (None, None) => String::new(),
    }
}

/// Runs a field's rule chain and returns the messages it raised.
pub fn check_field(value: &str, rules: &[Rule]) -> Vec<String> {
    let blank = value.trim().is_empty();
    let mut messages = Vec::new();

    for rule in rules {
        match *rule {
            Rule::Required => {
                if blank {
                    messages.push(REQUIRED_MESSAGE.to_string());
                    break;
                }
            }
            Rule::Optional => {
                if blank {
                    messages.clear();
                    break;
                }
            }
            Rule::Length { min, max } => {
                let len = value.chars().count();
                let too_short = min.is_some_and(|min| len < min);
                let too_long = max.is_some_and(|max| len > max);
                if too_short || too_long {
                    messages.push(length_message(min, max));
                }
            }
            Rule::Email => {
                if !EMAIL_PATTERN.is_match(value) {
                    messages.push(EMAIL_MESSAGE.to_string());
                }
            }
        }
    }
    messages
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("submission has invalid fields")]
    Invalid(FieldErrors),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl FormError {
    /// A write-time uniqueness conflict reads to the user exactly like the
    /// validator's own pre-check.
    pub fn from_write(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(field) => {
                let mut errors = FieldErrors::default();
                errors.add(field.field(), field.message());
                FormError::Invalid(errors)
            }
            other => FormError::Repository(other),
        }
    }
}

/// Adds "already exists" when `value` belongs to another account. `current`
/// is the edited record's own value: resubmitting it unchanged is not a clash.
async fn check_unique(
    repo: &dyn Repository,
    field: UniqueField,
    value: &str,
    current: Option<&str>,
    errors: &mut FieldErrors,
) -> Result<(), RepositoryError> {
    if value.trim().is_empty() || current == Some(value) {
        return Ok(());
    }
    let taken = match field {
        UniqueField::Username => repo.username_taken(value).await?,
        UniqueField::Email => repo.email_taken(value).await?,
    };
    if taken {
        errors.add(field.field(), field.message());
    }
    Ok(())
}

/// Coerces a submitted role id and checks it against the existing roles.
fn check_role(raw: Option<&str>, roles: &[Role], required: bool, errors: &mut FieldErrors) -> Option<i32> {
    let raw = raw.map(str::trim).filter(|raw| !raw.is_empty());
    let Some(raw) = raw else {
        if required {
            errors.add("role", REQUIRED_MESSAGE);
        }
        return None;
    };
    let Ok(id) = raw.parse::<i32>() else {
        errors.add("role", ROLE_COERCE_MESSAGE);
        return None;
    };
    if roles.iter().any(|role| role.id == id) {
        Some(id)
    } else {
        errors.add("role", ROLE_CHOICE_MESSAGE);
        None
    }
}

fn check_confirmation(password: &str, confirm: &str, rules: &[Rule], errors: &mut FieldErrors) {
    let mut messages = check_field(confirm, rules);
    let required_failed = rules.contains(&Rule::Required) && !messages.is_empty();
    if !required_failed && confirm != password {
        messages.push(MISMATCH_MESSAGE.to_string());
    }
    errors.extend("confirm_password", messages);
}

/// Moves `roles` so the role with id `current` comes first. The relative
/// order of the others is kept.
pub fn pin_role(roles: Vec<Role>, current: Option<i32>) -> Vec<Role> {
    let (mut pinned, rest): (Vec<Role>, Vec<Role>) =
        roles.into_iter().partition(|role| Some(role.id) == current);
    pinned.extend(rest);
    pinned
}

// --- Validated Submissions ---

/// A new account that passed validation. Still holds the plaintext password
/// until `into_new_user` hashes it.
pub struct ValidAccount {
    pub username: String,
    pub email: String,
    password: String,
    pub role: Option<i32>,
}

impl ValidAccount {
    pub fn into_new_user(self) -> Result<NewUser, CredentialError> {
        Ok(NewUser {
            username: self.username,
            email: self.email,
            password_hash: hash_password(&self.password)?,
            user_role: self.role,
        })
    }
}

/// An update that passed validation.
pub struct ValidUpdate {
    pub username: String,
    pub email: String,
    password: Option<String>,
    pub role: Option<i32>,
}

impl ValidUpdate {
    pub fn changes_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn into_changes(self) -> Result<UserChanges, CredentialError> {
        let password_hash = self.password.as_deref().map(hash_password).transpose()?;
        Ok(UserChanges {
            username: self.username,
            email: self.email,
            password_hash,
            user_role: self.role,
        })
    }
}

// --- Forms ---

/// Self-service registration.
#[derive(Deserialize, ToSchema, Default)]
#[serde(default)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegisterForm {
    pub fn view(&self) -> FormView {
        FormView {
            username: Some(self.username.clone()),
            email: Some(self.email.clone()),
            ..FormView::new(FormKind::Register)
        }
    }

    pub async fn validate(&self, repo: &dyn Repository) -> Result<ValidAccount, FormError> {
        let mut errors = FieldErrors::default();
        errors.extend("username", check_field(&self.username, USERNAME_RULES));
        errors.extend("email", check_field(&self.email, EMAIL_RULES));
        errors.extend("password", check_field(&self.password, PASSWORD_RULES));
        check_confirmation(&self.password, &self.confirm_password, CONFIRM_RULES, &mut errors);

        check_unique(repo, UniqueField::Username, &self.username, None, &mut errors).await?;
        check_unique(repo, UniqueField::Email, &self.email, None, &mut errors).await?;

        if !errors.is_empty() {
            return Err(FormError::Invalid(errors));
        }
        Ok(ValidAccount {
            username: self.username.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
            role: None,
        })
    }
}

#[derive(Deserialize, ToSchema, Default)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

impl LoginForm {
    pub fn view(&self) -> FormView {
        FormView {
            username: Some(self.username.clone()),
            ..FormView::new(FormKind::Login)
        }
    }

    /// Field rules only. Whether the credentials match is the handler's call.
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        errors.extend("username", check_field(&self.username, USERNAME_RULES));
        errors.extend("password", check_field(&self.password, PASSWORD_RULES));
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Privileged creation with an explicit role.
#[derive(Deserialize, ToSchema, Default)]
#[serde(default)]
pub struct AddUserForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    /// Role id as submitted by the select field.
    pub role: Option<String>,
}

impl AddUserForm {
    /// `roles` are the choices offered, already sorted by name.
    pub fn view(&self, roles: Vec<Role>) -> FormView {
        FormView {
            username: Some(self.username.clone()),
            email: Some(self.email.clone()),
            selected_role: self.role.as_deref().and_then(|raw| raw.trim().parse().ok()),
            role_choices: Some(roles),
            ..FormView::new(FormKind::AddUser)
        }
    }

    pub async fn validate(&self, repo: &dyn Repository, roles: &[Role]) -> Result<ValidAccount, FormError> {
        let mut errors = FieldErrors::default();
        errors.extend("username", check_field(&self.username, USERNAME_RULES));
        errors.extend("email", check_field(&self.email, EMAIL_RULES));
        errors.extend("password", check_field(&self.password, PASSWORD_RULES));
        check_confirmation(&self.password, &self.confirm_password, CONFIRM_RULES, &mut errors);
        let role = check_role(self.role.as_deref(), roles, true, &mut errors);

        check_unique(repo, UniqueField::Username, &self.username, None, &mut errors).await?;
        check_unique(repo, UniqueField::Email, &self.email, None, &mut errors).await?;

        if !errors.is_empty() {
            return Err(FormError::Invalid(errors));
        }
        Ok(ValidAccount {
            username: self.username.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
            role,
        })
    }
}

/// Self or admin edit of an existing account.
#[derive(Deserialize, ToSchema, Default)]
#[serde(default)]
pub struct UpdateUserForm {
    pub username: String,
    pub email: String,
    /// Blank keeps the current password.
    pub password: String,
    pub confirm_password: String,
    /// Only honoured when the acting user is an admin.
    pub role: Option<String>,
}

/// Who is editing what. `roles` is `Some` only when the actor is an admin,
/// in which case the form has a role field.
pub struct UpdateContext<'a> {
    pub target: &'a User,
    pub roles: Option<Vec<Role>>,
}

impl UpdateContext<'_> {
    /// The form as first shown: prefilled from the record, role choices
    /// (admins only) with the current role pinned first.
    pub fn initial_view(&self) -> FormView {
        FormView {
            username: Some(self.target.username.clone()),
            email: Some(self.target.email.clone()),
            role_choices: self
                .roles
                .clone()
                .map(|roles| pin_role(roles, self.target.user_role)),
            selected_role: self.roles.as_ref().and(self.target.user_role),
            ..FormView::new(FormKind::UpdateUser)
        }
    }
}

impl UpdateUserForm {
    pub fn view(&self, ctx: &UpdateContext<'_>) -> FormView {
        let submitted_role = self.role.as_deref().and_then(|raw| raw.trim().parse().ok());
        FormView {
            username: Some(self.username.clone()),
            email: Some(self.email.clone()),
            role_choices: ctx
                .roles
                .clone()
                .map(|roles| pin_role(roles, ctx.target.user_role)),
            selected_role: ctx
                .roles
                .as_ref()
                .and(submitted_role.or(ctx.target.user_role)),
            ..FormView::new(FormKind::UpdateUser)
        }
    }

    pub async fn validate(&self, repo: &dyn Repository, ctx: &UpdateContext<'_>) -> Result<ValidUpdate, FormError> {
        let mut errors = FieldErrors::default();
        errors.extend("username", check_field(&self.username, USERNAME_RULES));
        errors.extend("email", check_field(&self.email, EMAIL_RULES));
        errors.extend("password", check_field(&self.password, OPTIONAL_PASSWORD_RULES));
        check_confirmation(&self.password, &self.confirm_password, &[], &mut errors);

        let role = match &ctx.roles {
            Some(roles) => check_role(self.role.as_deref(), roles, false, &mut errors),
            // Non-admins have no role field; whatever they send is dropped.
            None => None,
        };

        let target = ctx.target;
        check_unique(repo, UniqueField::Username, &self.username, Some(target.username.as_str()), &mut errors).await?;
        check_unique(repo, UniqueField::Email, &self.email, Some(target.email.as_str()), &mut errors).await?;

        if !errors.is_empty() {
            return Err(FormError::Invalid(errors));
        }
        Ok(ValidUpdate {
            username: self.username.clone(),
            email: self.email.clone(),
            password: Some(self.password.clone()).filter(|p| !p.trim().is_empty()),
            role,
        })
    }
}
