/*
    spotify-export-rs | Rust CLI tool to export playlists and their tracks.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Ways of turning an authorization URL into the provider's redirect.

use crate::auth::AuthError;
use crate::config::Settings;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use url::Url;

/// Key under which W3C WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f466cb85f4b";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const FORM_WAIT: Duration = Duration::from_secs(15);

const USERNAME_FIELD: &str = "#login-username";
const PASSWORD_FIELD: &str = "#login-password";
const LOGIN_BUTTON: &str = "#login-button";
const CONSENT_BUTTON: &str = "[data-testid=\"auth-accept\"]";

/// What a code provider needs to complete the login.
#[derive(Debug, Clone, Copy)]
pub struct LoginRequest<'a> {
    pub authorize_url: &'a str,
    pub redirect_uri: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

/// Produces the URL the provider redirected to after login and consent.
#[async_trait]
pub trait CodeProvider: Send + Sync {
    async fn redirect_url(&self, request: &LoginRequest<'_>) -> Result<String, AuthError>;
}

/// Picks the provider: a configured code wins over the browser.
pub fn code_provider_from_settings(settings: &Settings, http: Client) -> Box<dyn CodeProvider> {
    match &settings.auth_code {
        Some(code) => Box::new(PresuppliedCode::new(code)),
        None => Box::new(
            WebDriverLogin::new(http, &settings.webdriver_url)
                .headless(settings.headless)
                .with_timeout(settings.login_timeout),
        ),
    }
}

/// A code (or complete redirect URL) obtained out of band, e.g. by a
/// previous run or by pasting it from a browser.
#[derive(Debug, Clone)]
pub struct PresuppliedCode {
    value: String,
}

impl PresuppliedCode {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.trim().to_string(),
        }
    }
}

#[async_trait]
impl CodeProvider for PresuppliedCode {
    async fn redirect_url(&self, request: &LoginRequest<'_>) -> Result<String, AuthError> {
        if self.value.contains("://") {
            return Ok(self.value.clone());
        }
        let url = Url::parse_with_params(request.redirect_uri, &[("code", self.value.as_str())])?;
        Ok(url.into())
    }
}

/// Drives a WebDriver server (geckodriver by default) through the hosted
/// login form and the consent prompt.
#[derive(Debug, Clone)]
pub struct WebDriverLogin {
    http: Client,
    webdriver_url: String,
    headless: bool,
    timeout: Duration,
}

impl WebDriverLogin {
    pub fn new(http: Client, webdriver_url: &str) -> Self {
        Self {
            http,
            webdriver_url: webdriver_url.trim_end_matches('/').to_string(),
            headless: true,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn drive(
        &self,
        browser: &BrowserSession<'_>,
        request: &LoginRequest<'_>,
    ) -> Result<String, AuthError> {
        info!("Directing to Spotify Authorization page...");
        browser.navigate(request.authorize_url).await?;

        // One deadline for the whole form, at most half the overall ceiling,
        // so a missing field is reported as such.
        let form_deadline = Instant::now() + FORM_WAIT.min(self.timeout / 2);
        let username = browser.wait_for(USERNAME_FIELD, form_deadline).await?;
        let password = browser.wait_for(PASSWORD_FIELD, form_deadline).await?;
        let submit = browser.wait_for(LOGIN_BUTTON, form_deadline).await?;

        info!(
            "Submitting user login data (username length {}, password length {})",
            request.username.len(),
            request.password.len()
        );
        browser.type_into(&username, request.username).await?;
        browser.type_into(&password, request.password).await?;
        browser.click(&submit).await?;

        // Poll until the provider sends us to the redirect URI, accepting the
        // consent prompt whenever it shows up.
        loop {
            let current = browser.current_url().await?;
            if current.starts_with(request.redirect_uri) {
                info!("Redirect successful");
                return Ok(current);
            }
            if let Some(accept) = browser.find(CONSENT_BUTTON).await? {
                debug!("Consent prompt found, accepting");
                browser.click(&accept).await?;
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl CodeProvider for WebDriverLogin {
    async fn redirect_url(&self, request: &LoginRequest<'_>) -> Result<String, AuthError> {
        if request.username.is_empty() {
            return Err(AuthError::MissingConfiguration {
                field: "username (SPOTIFY_USERNAME)",
            });
        }
        if request.password.is_empty() {
            return Err(AuthError::MissingConfiguration {
                field: "password (SPOTIFY_PASSWORD)",
            });
        }

        let browser = BrowserSession::start(&self.http, &self.webdriver_url, self.headless).await?;
        let outcome = match timeout(self.timeout, self.drive(&browser, request)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::ConsentTimeout {
                waited: self.timeout,
            }),
        };

        if let Err(e) = browser.close().await {
            warn!("Failed to close browser session: {}", e);
        }
        outcome
    }
}

/// One W3C WebDriver session.
struct BrowserSession<'a> {
    http: &'a Client,
    base: String,
}

impl<'a> BrowserSession<'a> {
    async fn start(http: &'a Client, webdriver_url: &str, headless: bool) -> Result<Self, AuthError> {
        let args: Vec<&str> = if headless { vec!["-headless"] } else { vec![] };
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "firefox",
                    "moz:firefoxOptions": { "args": args }
                }
            }
        });

        let value = call(http.post(format!("{}/session", webdriver_url)).json(&capabilities)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AuthError::LoginAutomationFailed(format!("WebDriver returned no session id: {}", value))
            })?;

        debug!("Started WebDriver session {}", session_id);
        Ok(Self {
            http,
            base: format!("{}/session/{}", webdriver_url, session_id),
        })
    }

    async fn navigate(&self, url: &str) -> Result<(), AuthError> {
        call(self.http.post(format!("{}/url", self.base)).json(&json!({ "url": url }))).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AuthError> {
        let value = call(self.http.get(format!("{}/url", self.base))).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// `None` when the selector matches nothing right now.
    async fn find(&self, selector: &str) -> Result<Option<String>, AuthError> {
        let response = self
            .http
            .post(format!("{}/element", self.base))
            .json(&json!({ "using": "css selector", "value": selector }))
            .send()
            .await
            .map_err(webdriver_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value = unwrap_value(response).await?;
        Ok(value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn wait_for(&self, selector: &str, deadline: Instant) -> Result<String, AuthError> {
        loop {
            if let Some(element) = self.find(selector).await? {
                return Ok(element);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(AuthError::LoginAutomationFailed(format!(
                    "form field '{}' not found before the login form deadline",
                    selector
                )));
            }
            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn type_into(&self, element: &str, text: &str) -> Result<(), AuthError> {
        let url = format!("{}/element/{}/value", self.base, element);
        call(self.http.post(url).json(&json!({ "text": text }))).await?;
        Ok(())
    }

    async fn click(&self, element: &str) -> Result<(), AuthError> {
        let url = format!("{}/element/{}/click", self.base, element);
        call(self.http.post(url).json(&json!({}))).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AuthError> {
        call(self.http.delete(&self.base)).await?;
        Ok(())
    }
}

fn webdriver_error(e: reqwest::Error) -> AuthError {
    AuthError::LoginAutomationFailed(format!("WebDriver unreachable: {}", e))
}

async fn call(request: reqwest::RequestBuilder) -> Result<Value, AuthError> {
    let response = request.send().await.map_err(webdriver_error)?;
    unwrap_value(response).await
}

/// WebDriver wraps every payload in `{"value": ...}`; errors carry
/// `value.error` and `value.message`.
async fn unwrap_value(response: reqwest::Response) -> Result<Value, AuthError> {
    let status = response.status();
    let body: Value = response.json().await.map_err(webdriver_error)?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
        return Err(AuthError::LoginAutomationFailed(format!(
            "WebDriver {}: {} {}",
            status.as_u16(),
            error,
            message
        )));
    }
    Ok(value)
}
