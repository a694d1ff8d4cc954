use user_accounts::{
    credentials::verify_password,
    forms::{AddUserForm, FormError, LoginForm, RegisterForm, UpdateContext, UpdateUserForm},
    models::{FieldErrors, FormKind, FormView, NewUser, Role, User},
    repository::{InMemoryRepository, Repository},
};

// --- Test Utilities ---

async fn seeded_repo() -> (InMemoryRepository, User) {
    let repo = InMemoryRepository::with_default_roles();
    let existing = repo
        .create_user(NewUser {
            username: "alice1".to_string(),
            email: "a@x.com".to_string(),
            password_hash: "unused".to_string(),
            user_role: None,
        })
        .await
        .unwrap();
    (repo, existing)
}

fn register(username: &str, email: &str, password: &str, confirm: &str) -> RegisterForm {
    RegisterForm {
        username: username.to_string(),
        email: email.to_string(),
        password: password.to_string(),
        confirm_password: confirm.to_string(),
    }
}

fn invalid(result: Result<impl Sized, FormError>) -> FieldErrors {
    match result {
        Err(FormError::Invalid(errors)) => errors,
        Err(FormError::Repository(e)) => panic!("unexpected store error: {e}"),
        Ok(_) => panic!("expected the submission to be rejected"),
    }
}

// --- Registration ---

#[tokio::test]
async fn valid_registration_hashes_the_password() {
    let repo = InMemoryRepository::with_default_roles();
    let form = register("bob_the_user", "bob@example.com", "secretpw", "secretpw");

    let valid = form.validate(&repo).await.ok().expect("form should be valid");
    assert_eq!(valid.role, None);

    let new_user = valid.into_new_user().unwrap();
    assert_eq!(new_user.username, "bob_the_user");
    assert_ne!(new_user.password_hash, "secretpw");
    assert!(verify_password("secretpw", &new_user.password_hash));
}

#[tokio::test]
async fn taken_username_and_email_are_reported() {
    let (repo, _) = seeded_repo().await;
    let form = register("alice1", "a@x.com", "secretpw", "secretpw");

    let errors = invalid(form.validate(&repo).await);
    assert_eq!(errors.get("username"), Some(&["Username already exists".to_string()][..]));
    assert_eq!(errors.get("email"), Some(&["Email already exists".to_string()][..]));
    assert_eq!(repo.user_count().await, 1);
}

#[tokio::test]
async fn field_rules_collect_messages_per_field() {
    let repo = InMemoryRepository::with_default_roles();
    let form = register("abc", "not-an-email", "short", "different");

    let errors = invalid(form.validate(&repo).await);
    assert_eq!(
        errors.get("username").unwrap(),
        ["Field must be between 4 and 64 characters long."]
    );
    assert_eq!(errors.get("email").unwrap(), ["Invalid email address."]);
    assert_eq!(
        errors.get("password").unwrap(),
        ["Field must be between 8 and 256 characters long."]
    );
    assert_eq!(
        errors.get("confirm_password").unwrap(),
        ["Field must be equal to password."]
    );
}

#[tokio::test]
async fn blank_fields_are_required() {
    let repo = InMemoryRepository::with_default_roles();
    let errors = invalid(RegisterForm::default().validate(&repo).await);

    for field in ["username", "email", "password", "confirm_password"] {
        assert_eq!(
            errors.get(field).unwrap(),
            ["This field is required."],
            "field {field}"
        );
    }
}

#[test]
fn login_form_only_checks_field_rules() {
    let ok = LoginForm {
        username: "nobody_here".to_string(),
        password: "whatever1".to_string(),
    };
    assert!(ok.validate().is_ok());

    let bad = LoginForm {
        username: "ab".to_string(),
        password: String::new(),
    };
    let errors = bad.validate().unwrap_err();
    assert!(errors.get("username").is_some());
    assert_eq!(errors.get("password").unwrap(), ["This field is required."]);
}

// --- Admin Add ---

#[tokio::test]
async fn add_form_requires_an_existing_role() {
    let repo = InMemoryRepository::with_default_roles();
    let roles = repo.list_roles().await.unwrap();

    let mut form = AddUserForm {
        username: "carol_admin".to_string(),
        email: "carol@example.com".to_string(),
        password: "secretpw".to_string(),
        confirm_password: "secretpw".to_string(),
        role: None,
    };
    let errors = invalid(form.validate(&repo, &roles).await);
    assert_eq!(errors.get("role").unwrap(), ["This field is required."]);

    form.role = Some("admin".to_string());
    let errors = invalid(form.validate(&repo, &roles).await);
    assert_eq!(errors.get("role").unwrap(), ["Invalid Choice: could not coerce."]);

    form.role = Some("99".to_string());
    let errors = invalid(form.validate(&repo, &roles).await);
    assert_eq!(errors.get("role").unwrap(), ["Not a valid choice."]);

    let admin = repo.role_by_name("admin").await.unwrap();
    form.role = Some(admin.id.to_string());
    let valid = form.validate(&repo, &roles).await.ok().unwrap();
    assert_eq!(valid.role, Some(admin.id));
}

#[tokio::test]
async fn add_form_view_lists_roles_by_name() {
    let repo = InMemoryRepository::with_default_roles();
    repo.insert_role("editor").await;
    let roles = repo.list_roles().await.unwrap();

    let names: Vec<&str> = roles.iter().map(|r| r.role_name.as_str()).collect();
    assert_eq!(names, ["admin", "editor", "user"]);

    let view = AddUserForm::default().view(roles.clone());
    assert_eq!(view.form, FormKind::AddUser);
    assert_eq!(view.role_choices, Some(roles));
}

// --- Update ---

fn update(username: &str, email: &str, password: &str, confirm: &str) -> UpdateUserForm {
    UpdateUserForm {
        username: username.to_string(),
        email: email.to_string(),
        password: password.to_string(),
        confirm_password: confirm.to_string(),
        role: None,
    }
}

#[tokio::test]
async fn unchanged_identity_fields_are_not_a_conflict() {
    let (repo, alice) = seeded_repo().await;
    let ctx = UpdateContext {
        target: &alice,
        roles: None,
    };

    let valid = update("alice1", "a@x.com", "", "")
        .validate(&repo, &ctx)
        .await
        .ok()
        .expect("resubmitting your own username and email is allowed");
    assert!(!valid.changes_password());
    assert!(valid.into_changes().unwrap().password_hash.is_none());
}

#[tokio::test]
async fn update_cannot_take_another_accounts_identity() {
    let (repo, alice) = seeded_repo().await;
    let bob = repo
        .create_user(NewUser {
            username: "bobby".to_string(),
            email: "b@x.com".to_string(),
            password_hash: "unused".to_string(),
            user_role: None,
        })
        .await
        .unwrap();
    let ctx = UpdateContext {
        target: &bob,
        roles: None,
    };

    let errors = invalid(
        update(&alice.username, &alice.email, "", "")
            .validate(&repo, &ctx)
            .await,
    );
    assert!(errors.get("username").is_some());
    assert!(errors.get("email").is_some());
}

#[tokio::test]
async fn update_password_is_optional_but_checked_when_given() {
    let (repo, alice) = seeded_repo().await;
    let ctx = UpdateContext {
        target: &alice,
        roles: None,
    };

    let errors = invalid(update("alice1", "a@x.com", "short", "short").validate(&repo, &ctx).await);
    assert!(errors.get("password").is_some());

    let errors = invalid(update("alice1", "a@x.com", "", "leftover").validate(&repo, &ctx).await);
    assert_eq!(
        errors.get("confirm_password").unwrap(),
        ["Field must be equal to password."]
    );

    let valid = update("alice1", "a@x.com", "newsecret", "newsecret")
        .validate(&repo, &ctx)
        .await
        .ok()
        .unwrap();
    let changes = valid.into_changes().unwrap();
    assert!(verify_password("newsecret", changes.password_hash.as_deref().unwrap()));
}

#[tokio::test]
async fn non_admin_role_submissions_are_ignored() {
    let (repo, alice) = seeded_repo().await;
    let admin = repo.role_by_name("admin").await.unwrap();
    let ctx = UpdateContext {
        target: &alice,
        roles: None,
    };

    let mut form = update("alice1", "a@x.com", "", "");
    form.role = Some(admin.id.to_string());

    let valid = form.validate(&repo, &ctx).await.ok().unwrap();
    assert_eq!(valid.role, None);

    let view = form.view(&ctx);
    assert_eq!(view.role_choices, None);
    assert_eq!(view.selected_role, None);
}

#[tokio::test]
async fn admin_update_view_pins_the_current_role() {
    let repo = InMemoryRepository::with_default_roles();
    repo.insert_role("editor").await;
    let user_role = repo.role_by_name("user").await.unwrap();
    let target = repo
        .create_user(NewUser {
            username: "dave_user".to_string(),
            email: "d@x.com".to_string(),
            password_hash: "unused".to_string(),
            user_role: Some(user_role.id),
        })
        .await
        .unwrap();

    let ctx = UpdateContext {
        target: &target,
        roles: Some(repo.list_roles().await.unwrap()),
    };
    let view = ctx.initial_view();

    let names: Vec<String> = view
        .role_choices
        .unwrap()
        .into_iter()
        .map(|r: Role| r.role_name)
        .collect();
    assert_eq!(names, ["user", "admin", "editor"]);
    assert_eq!(view.selected_role, Some(user_role.id));
    assert_eq!(view.username.as_deref(), Some("dave_user"));
}

// --- Serialization ---

#[test]
fn user_password_hash_is_never_serialized() {
    let user = User {
        id: 3,
        username: "erin_user".to_string(),
        email: "e@x.com".to_string(),
        password: "$argon2id$secret".to_string(),
        user_role: None,
    };

    let json = serde_json::to_string(&user).unwrap();
    assert!(!json.contains("password"));
    assert!(!json.contains("argon2"));
    assert!(!format!("{user:?}").contains("argon2"));
}

#[test]
fn form_view_uses_snake_case_form_names() {
    let view = FormView::new(FormKind::UpdateUser);
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["form"], "update_user");
    assert_eq!(json["errors"], serde_json::json!({}));
}
