use crate::{
    AppState,
    auth::{Session, issue_token, removal_cookie, session_cookie},
    credentials::verify_login,
    error::{AppError, AppResult},
    forms::{AddUserForm, FormError, LoginForm, RegisterForm, UpdateContext, UpdateUserForm},
    guards,
    models::{FormKind, FormView, HomeView, UserListing},
};
use axum::{
    Form, Json,
    extract::{FromRequestParts, Path, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};

// --- Path Extraction ---

/// UserId
///
/// The `{id}` segment of the per-account routes. A segment that is not an
/// `i32` cannot name any account, so it is a 404 like any other unknown id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i32);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<i32>::from_request_parts(parts, state).await {
            Ok(Path(id)) => Ok(UserId(id)),
            Err(rejection) => {
                tracing::debug!(error = %rejection, "unusable user id in path");
                Err(AppError::NotFound)
            }
        }
    }
}

// --- Response Helpers ---

/// A form that failed validation goes back to the client with its errors.
fn rerender(view: FormView) -> Response {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(view)).into_response()
}

fn reject(err: FormError, view: FormView) -> AppResult<Response> {
    match err {
        FormError::Invalid(errors) => Ok(rerender(view.with_errors(errors))),
        FormError::Repository(e) => Err(e.into()),
    }
}

fn redirect_with_cookie(to: &str, cookie: HeaderValue) -> Response {
    let mut response = Redirect::to(to).into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);
    response
}

// --- Public Handlers ---

/// index
///
/// [Public Route] Home. Shows who is logged in, if anyone.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Current identity", body = HomeView))
)]
pub async fn index(session: Session) -> Json<HomeView> {
    let user = session.user();
    Json(HomeView {
        current_username: user.map(|u| u.username.clone()),
        current_id: user.map(|u| u.id),
    })
}

#[utoipa::path(
    get,
    path = "/register",
    responses((status = 200, description = "Empty registration form", body = FormView))
)]
pub async fn register_form() -> Json<FormView> {
    Json(FormView::new(FormKind::Register))
}

/// register
///
/// [Public Route] Self-service sign-up. The new account gets no role and is
/// logged in straight away.
#[utoipa::path(
    post,
    path = "/register",
    request_body(content = RegisterForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Registered and logged in; redirect to /"),
        (status = 422, description = "Invalid submission", body = FormView)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> AppResult<Response> {
    let valid = match form.validate(state.repo.as_ref()).await {
        Ok(valid) => valid,
        Err(err) => return reject(err, form.view()),
    };

    let user = match state.repo.create_user(valid.into_new_user()?).await {
        Ok(user) => user,
        Err(err) => return reject(FormError::from_write(err), form.view()),
    };

    tracing::info!(user_id = user.id, username = %user.username, "user registered");

    let token = issue_token(user.id, &state.config)?;
    Ok(redirect_with_cookie("/", session_cookie(token, &state.config)))
}

#[utoipa::path(
    get,
    path = "/login",
    responses((status = 200, description = "Empty login form", body = FormView))
)]
pub async fn login_form() -> Json<FormView> {
    Json(FormView::new(FormKind::Login))
}

/// login
///
/// [Public Route] Establishes a session when the username exists and the
/// password verifies. Bad credentials re-render the form without a message.
#[utoipa::path(
    post,
    path = "/login",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Logged in; redirect to /"),
        (status = 200, description = "Credentials did not match", body = FormView),
        (status = 422, description = "Invalid submission", body = FormView)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    if let Err(errors) = form.validate() {
        return Ok(rerender(form.view().with_errors(errors)));
    }

    let user = state.repo.get_user_by_username(&form.username).await?;
    // Unknown usernames still pay for a hash check.
    let verified = verify_login(&form.password, user.as_ref().map(|u| u.password.as_str()));
    match user {
        Some(user) if verified => {
            tracing::info!(user_id = user.id, "user logged in");
            let token = issue_token(user.id, &state.config)?;
            Ok(redirect_with_cookie("/", session_cookie(token, &state.config)))
        }
        _ => {
            tracing::info!(username = %form.username, "login rejected");
            Ok(Json(form.view()).into_response())
        }
    }
}

// --- Authenticated Handlers ---

/// logout
///
/// [Authenticated Route] Drops the session cookie.
#[utoipa::path(
    get,
    path = "/logout",
    responses(
        (status = 303, description = "Logged out; redirect to /, or to /login without a session")
    )
)]
pub async fn logout(session: Session) -> AppResult<Response> {
    let user = guards::login_required(session.user())?;
    tracing::info!(user_id = user.id, "user logged out");
    Ok(redirect_with_cookie("/", removal_cookie()))
}

/// update_user_form
///
/// [Self or Admin] The update form prefilled from the record. Admins also get
/// the role choices, current role first.
#[utoipa::path(
    get,
    path = "/user/{id}/update",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Prefilled update form", body = FormView),
        (status = 303, description = "Not permitted (redirect to /) or not logged in (redirect to /login)"),
        (status = 404, description = "No such user")
    )
)]
pub async fn update_user_form(
    session: Session,
    State(state): State<AppState>,
    UserId(id): UserId,
) -> AppResult<Json<FormView>> {
    let actor = guards::admin_or_self_required(session.user(), id)?;
    let target = state.repo.get_user(id).await?.ok_or(AppError::NotFound)?;

    let roles = if actor.is_admin() {
        Some(state.repo.list_roles().await?)
    } else {
        None
    };

    let ctx = UpdateContext {
        target: &target,
        roles,
    };
    Ok(Json(ctx.initial_view()))
}

/// update_user
///
/// [Self or Admin] Username and email are always written. The password only
/// when a new one is submitted; the role only when an admin submits one.
#[utoipa::path(
    post,
    path = "/user/{id}/update",
    params(("id" = i32, Path, description = "User ID")),
    request_body(content = UpdateUserForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Updated; redirect to /. Also used for not permitted / not logged in"),
        (status = 404, description = "No such user"),
        (status = 422, description = "Invalid submission", body = FormView)
    )
)]
pub async fn update_user(
    session: Session,
    State(state): State<AppState>,
    UserId(id): UserId,
    Form(form): Form<UpdateUserForm>,
) -> AppResult<Response> {
    let actor = guards::admin_or_self_required(session.user(), id)?;
    let target = state.repo.get_user(id).await?.ok_or(AppError::NotFound)?;

    let roles = if actor.is_admin() {
        Some(state.repo.list_roles().await?)
    } else {
        None
    };
    let ctx = UpdateContext {
        target: &target,
        roles,
    };

    let valid = match form.validate(state.repo.as_ref(), &ctx).await {
        Ok(valid) => valid,
        Err(err) => return reject(err, form.view(&ctx)),
    };
    let password_changed = valid.changes_password();

    let updated = match state.repo.update_user(id, valid.into_changes()?).await {
        Ok(updated) => updated.ok_or(AppError::NotFound)?,
        Err(err) => return reject(FormError::from_write(err), form.view(&ctx)),
    };

    tracing::info!(
        user_id = updated.id,
        actor_id = actor.id,
        password_changed,
        role = ?updated.user_role,
        "user updated"
    );
    Ok(Redirect::to("/").into_response())
}

/// delete_user
///
/// [Self or Admin] Hard delete, no confirmation. Deleting your own account
/// also ends your session.
#[utoipa::path(
    method(get, post),
    path = "/user/{id}/delete",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 303, description = "Deleted; redirect to /user. Also used for not permitted / not logged in"),
        (status = 404, description = "No such user")
    )
)]
pub async fn delete_user(
    session: Session,
    State(state): State<AppState>,
    UserId(id): UserId,
) -> AppResult<Response> {
    let actor = guards::admin_or_self_required(session.user(), id)?;

    if !state.repo.delete_user(id).await? {
        return Err(AppError::NotFound);
    }

    tracing::info!(user_id = id, actor_id = actor.id, "user deleted");

    if actor.id == id {
        Ok(redirect_with_cookie("/user", removal_cookie()))
    } else {
        Ok(Redirect::to("/user").into_response())
    }
}

// --- Admin Handlers ---

/// list_users
///
/// [Admin Route] Every user with their role name, ascending by id.
#[utoipa::path(
    get,
    path = "/user",
    responses(
        (status = 200, description = "All users", body = [UserListing]),
        (status = 303, description = "Not logged in; redirect to /login"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn list_users(
    session: Session,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<UserListing>>> {
    guards::admin_required(session.user())?;
    Ok(Json(state.repo.list_users().await?))
}

#[utoipa::path(
    get,
    path = "/user/add",
    responses(
        (status = 200, description = "Empty add form with role choices", body = FormView),
        (status = 303, description = "Not logged in; redirect to /login"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn add_user_form(
    session: Session,
    State(state): State<AppState>,
) -> AppResult<Json<FormView>> {
    guards::admin_required(session.user())?;
    let roles = state.repo.list_roles().await?;
    Ok(Json(FormView {
        role_choices: Some(roles),
        ..FormView::new(FormKind::AddUser)
    }))
}

/// add_user
///
/// [Admin Route] Creates an account with the chosen role. The admin's own
/// session is left alone.
#[utoipa::path(
    post,
    path = "/user/add",
    request_body(content = AddUserForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Created; redirect to /user"),
        (status = 403, description = "Not an admin"),
        (status = 422, description = "Invalid submission", body = FormView)
    )
)]
pub async fn add_user(
    session: Session,
    State(state): State<AppState>,
    Form(form): Form<AddUserForm>,
) -> AppResult<Response> {
    let actor = guards::admin_required(session.user())?;
    let roles = state.repo.list_roles().await?;

    let valid = match form.validate(state.repo.as_ref(), &roles).await {
        Ok(valid) => valid,
        Err(err) => return reject(err, form.view(roles)),
    };

    let user = match state.repo.create_user(valid.into_new_user()?).await {
        Ok(user) => user,
        Err(err) => return reject(FormError::from_write(err), form.view(roles)),
    };

    tracing::info!(
        user_id = user.id,
        actor_id = actor.id,
        role = ?user.user_role,
        "user added by admin"
    );
    Ok(Redirect::to("/user").into_response())
}
