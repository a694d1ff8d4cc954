use reqwest::{StatusCode, header, redirect};
use std::sync::Arc;
use tokio::net::TcpListener;
use user_accounts::{
    AppConfig, AppState, InMemoryRepository, create_router,
    models::NewUser,
    repository::{Repository, RepositoryState},
};

#[derive(Debug)]
pub struct TestApp {
    pub address: String,
}

async fn spawn_app(repo: RepositoryState) -> TestApp {
    let state = AppState {
        repo,
        config: AppConfig::default(),
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp { address }
}

// Redirects are asserted on, never followed.
fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap()
}

/// Registers `username` and returns the `Cookie` header value for its session.
async fn register(app: &TestApp, username: &str) -> String {
    let email = format!("{username}@example.com");
    let response = client()
        .post(format!("{}/register", app.address))
        .form(&[
            ("username", username),
            ("email", email.as_str()),
            ("password", "secretpw"),
            ("confirm_password", "secretpw"),
        ])
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("registration sets a session cookie")
        .to_str()
        .unwrap();
    // "session=<token>; Path=/; ..." -> "session=<token>"
    set_cookie.split(';').next().unwrap().to_string()
}

fn location(response: &reqwest::Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app(Arc::new(InMemoryRepository::with_default_roles())).await;
    let response = client()
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn register_then_home_shows_the_new_identity() {
    let app = spawn_app(Arc::new(InMemoryRepository::with_default_roles())).await;
    let cookie = register(&app, "api_user").await;

    let home: serde_json::Value = client()
        .get(format!("{}/", app.address))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(home["current_username"], "api_user");

    let anonymous: serde_json::Value = client()
        .get(format!("{}/", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(anonymous["current_username"].is_null());
}

#[tokio::test]
async fn protected_routes_redirect_anonymous_callers_to_login() {
    let app = spawn_app(Arc::new(InMemoryRepository::with_default_roles())).await;

    for path in ["/user", "/user/add", "/logout", "/user/1/update", "/user/1/delete"] {
        let response = client()
            .get(format!("{}{}", app.address, path))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "path {path}");
        assert_eq!(location(&response), "/login", "path {path}");
    }
}

#[tokio::test]
async fn admin_routes_forbid_ordinary_users() {
    let app = spawn_app(Arc::new(InMemoryRepository::with_default_roles())).await;
    let cookie = register(&app, "plain_user").await;

    let response = client()
        .get(format!("{}/user", app.address))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// Spawns an app holding one admin account and returns it with the admin's
/// session cookie.
async fn spawn_with_admin() -> (TestApp, String) {
    let repo = Arc::new(InMemoryRepository::with_default_roles());
    let admin_role = repo.role_by_name("admin").await.unwrap();
    repo.create_user(NewUser {
        username: "site_admin".to_string(),
        email: "admin@example.com".to_string(),
        password_hash: user_accounts::credentials::hash_password("adminpass").unwrap(),
        user_role: Some(admin_role.id),
    })
    .await
    .unwrap();
    let app = spawn_app(repo).await;

    let login = client()
        .post(format!("{}/login", app.address))
        .form(&[("username", "site_admin"), ("password", "adminpass")])
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::SEE_OTHER);
    let cookie = login
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    (app, cookie)
}

#[tokio::test]
async fn admin_lists_users_after_login() {
    let (app, cookie) = spawn_with_admin().await;

    let users: Vec<serde_json::Value> = client()
        .get(format!("{}/user", app.address))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["role_name"], "admin");
    assert!(users[0].get("password").is_none());
}

#[tokio::test]
async fn invalid_registration_is_unprocessable() {
    let app = spawn_app(Arc::new(InMemoryRepository::with_default_roles())).await;

    let response = client()
        .post(format!("{}/register", app.address))
        .form(&[("username", "abc"), ("email", "nope")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["errors"]["password"][0], "This field is required.");
    assert_eq!(body["errors"]["email"][0], "Invalid email address.");
}

#[tokio::test]
async fn logout_clears_the_session_cookie() {
    let app = spawn_app(Arc::new(InMemoryRepository::with_default_roles())).await;
    let cookie = register(&app, "short_visit").await;

    let response = client()
        .get(format!("{}/logout", app.address))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    let removal = response.headers().get(header::SET_COOKIE).unwrap();
    assert!(removal.to_str().unwrap().contains("Max-Age=0"));
}

#[tokio::test]
async fn unparsable_user_ids_are_not_found() {
    let (app, cookie) = spawn_with_admin().await;

    for (method, path) in [
        (reqwest::Method::GET, "/user/abc/update"),
        (reqwest::Method::POST, "/user/abc/update"),
        (reqwest::Method::GET, "/user/99999999999/delete"),
        (reqwest::Method::POST, "/user/-/delete"),
    ] {
        let response = client()
            .request(method.clone(), format!("{}{}", app.address, path))
            .header(header::COOKIE, &cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method} {path}");

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"]["status"], 404, "{method} {path}");
        assert_eq!(body["error"]["message"], "Not Found", "{method} {path}");
    }
}

#[tokio::test]
async fn unknown_numeric_id_is_not_found_for_admins() {
    let (app, cookie) = spawn_with_admin().await;

    let response = client()
        .get(format!("{}/user/424242/update", app.address))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
