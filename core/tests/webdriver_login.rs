//! Browser login driven through a mocked WebDriver server.

use export_core::client::http_client;
use export_core::login::{CodeProvider, LoginRequest, WebDriverLogin};
use export_core::AuthError;
use serde_json::json;
use std::time::{Duration, Instant};
use wiremock::matchers::{any, body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REDIRECT: &str = "http://localhost:3000/callback";

fn request<'a>(username: &'a str, password: &'a str) -> LoginRequest<'a> {
    LoginRequest {
        authorize_url: "https://accounts.spotify.com/authorize?client_id=x",
        redirect_uri: REDIRECT,
        username,
        password,
    }
}

fn ok(value: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "value": value }))
}

fn no_such_element() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "value": { "error": "no such element", "message": "Unable to locate element" }
    }))
}

async fn mount_session(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/session"))
        .and(body_string_contains("-headless"))
        .respond_with(ok(json!({ "sessionId": "s1", "capabilities": {} })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session/s1/url"))
        .and(body_string_contains("accounts.spotify.com/authorize"))
        .respond_with(ok(json!(null)))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/session/s1/element/[^/]+/(value|click)$"))
        .respond_with(ok(json!(null)))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/session/s1"))
        .respond_with(ok(json!(null)))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_element(server: &MockServer, selector: &str, element_id: &str) {
    Mock::given(method("POST"))
        .and(path("/session/s1/element"))
        .and(body_string_contains(selector))
        .respond_with(ok(json!({ "element-6066-11e4-a52e-4f466cb85f4b": element_id })))
        .mount(server)
        .await;
}

async fn mount_login_form(server: &MockServer) {
    mount_element(server, "#login-username", "e-user").await;
    mount_element(server, "#login-password", "e-pass").await;
    mount_element(server, "#login-button", "e-submit").await;
}

async fn mount_current_url(server: &MockServer, url: &str) {
    Mock::given(method("GET"))
        .and(path("/session/s1/url"))
        .respond_with(ok(json!(url)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_accepts_consent_and_returns_redirect() {
    let server = MockServer::start().await;
    mount_session(&server).await;
    mount_login_form(&server).await;
    mount_element(&server, "auth-accept", "e-accept").await;
    mount_current_url(&server, "http://localhost:3000/callback?code=XYZ").await;

    let login = WebDriverLogin::new(http_client().unwrap(), &server.uri())
        .with_timeout(Duration::from_secs(5));
    let redirect = login.redirect_url(&request("me", "pw")).await.unwrap();

    assert_eq!(redirect, "http://localhost:3000/callback?code=XYZ");

    let requests = server.received_requests().await.unwrap();
    let typed: Vec<String> = requests
        .iter()
        .filter(|r| r.url.path().ends_with("/value"))
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .collect();
    assert_eq!(typed.len(), 2);
    assert!(typed[0].contains("\"me\""));
    assert!(typed[1].contains("\"pw\""));
}

#[tokio::test]
async fn test_missing_form_field_fails_login() {
    let server = MockServer::start().await;
    mount_session(&server).await;
    Mock::given(method("POST"))
        .and(path("/session/s1/element"))
        .respond_with(no_such_element())
        .mount(&server)
        .await;

    let login = WebDriverLogin::new(http_client().unwrap(), &server.uri())
        .with_timeout(Duration::from_secs(3));
    let result = login.redirect_url(&request("me", "pw")).await;

    assert!(matches!(
        result,
        Err(AuthError::LoginAutomationFailed(reason)) if reason.contains("#login-username")
    ));
}

#[tokio::test]
async fn test_never_reaching_redirect_times_out() {
    let server = MockServer::start().await;
    mount_session(&server).await;
    mount_login_form(&server).await;
    Mock::given(method("POST"))
        .and(path("/session/s1/element"))
        .and(body_string_contains("auth-accept"))
        .respond_with(no_such_element())
        .mount(&server)
        .await;
    mount_current_url(&server, "https://accounts.spotify.com/login").await;

    let login = WebDriverLogin::new(http_client().unwrap(), &server.uri())
        .with_timeout(Duration::from_secs(1));
    let result = login.redirect_url(&request("me", "pw")).await;

    assert!(matches!(result, Err(AuthError::ConsentTimeout { waited }) if waited == Duration::from_secs(1)));
}

#[tokio::test]
async fn test_missing_credentials_skip_the_browser() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let login = WebDriverLogin::new(http_client().unwrap(), &server.uri());

    assert!(matches!(
        login.redirect_url(&request("", "pw")).await,
        Err(AuthError::MissingConfiguration { field }) if field.starts_with("username")
    ));
    assert!(matches!(
        login.redirect_url(&request("me", "")).await,
        Err(AuthError::MissingConfiguration { field }) if field.starts_with("password")
    ));
}

#[tokio::test]
async fn test_form_fields_share_one_deadline() {
    let server = MockServer::start().await;
    mount_session(&server).await;
    // The username field shows up late; the password field never does.
    Mock::given(method("POST"))
        .and(path("/session/s1/element"))
        .and(body_string_contains("#login-username"))
        .respond_with(
            ok(json!({ "element-6066-11e4-a52e-4f466cb85f4b": "e-user" }))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session/s1/element"))
        .and(body_string_contains("#login-password"))
        .respond_with(no_such_element())
        .mount(&server)
        .await;

    // Form deadline is half of this, 2s from the start.
    let login = WebDriverLogin::new(http_client().unwrap(), &server.uri())
        .with_timeout(Duration::from_secs(4));
    let started = Instant::now();
    let result = login.redirect_url(&request("me", "pw")).await;

    assert!(matches!(
        result,
        Err(AuthError::LoginAutomationFailed(reason)) if reason.contains("#login-password")
    ));
    assert!(
        started.elapsed() < Duration::from_millis(3000),
        "password wait restarted after the username was found: {:?}",
        started.elapsed()
    );
}
