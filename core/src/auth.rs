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

use crate::config::{Settings, DEFAULT_ACCOUNTS_URL};
use crate::login::{CodeProvider, LoginRequest};
use crate::store::{CredentialRecord, CredentialStore, StoreError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info, warn};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use rspotify::{scopes, Credentials, OAuth};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Seconds after the last refresh at which an access token is treated as expired.
/// Spotify tokens live for 3600 seconds; this leaves a margin.
pub const STALENESS_THRESHOLD_SECS: i64 = 3000;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing configuration: {field} must be provided")]
    MissingConfiguration { field: &'static str },
    #[error("No authorization code in redirect: {0}")]
    AuthCodeMissing(String),
    #[error("Browser login failed: {0}")]
    LoginAutomationFailed(String),
    #[error("Login did not reach the redirect URI within {waited:?}")]
    ConsentTimeout { waited: Duration },
    #[error("Token endpoint returned {status}: {body}")]
    TokenExchangeFailed { status: u16, body: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Source of wall-clock time in epoch seconds.
pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Anything that can hand out a bearer token for API calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// A token resolved once before the export starts.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// Client identity, redirect and scopes plus the login used by the browser step.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub credentials: Credentials,
    pub oauth: OAuth,
    pub username: String,
    pub password: String,
}

impl AuthSession {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        username: &str,
        password: &str,
    ) -> Self {
        // - playlist-read-private / playlist-read-collaborative: list and read every playlist.
        // - playlist-modify-public / playlist-modify-private: requested for parity with
        //   the app registration; nothing here writes playlists.
        let scopes = scopes!(
            "playlist-read-private",
            "playlist-read-collaborative",
            "playlist-modify-public",
            "playlist-modify-private"
        );

        Self {
            credentials: Credentials::new(client_id, client_secret),
            oauth: OAuth {
                redirect_uri: redirect_uri.to_string(),
                scopes,
                ..Default::default()
            },
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.client_id,
            &settings.client_secret,
            &settings.redirect_uri,
            &settings.username,
            &settings.password,
        )
    }

    fn client_secret(&self) -> &str {
        self.credentials.secret.as_deref().unwrap_or_default()
    }

    /// Fails on the first empty client field; never touches the network.
    pub fn validate(&self) -> Result<(), AuthError> {
        let required: [(&'static str, &str); 3] = [
            ("redirect_uri (SPOTIFY_CLIENT_CALLBACK_URL)", self.oauth.redirect_uri.as_str()),
            ("client_id (SPOTIFY_CLIENT_ID)", self.credentials.id.as_str()),
            ("client_secret (SPOTIFY_CLIENT_SECRET)", self.client_secret()),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(AuthError::MissingConfiguration { field: *field }),
            None => Ok(()),
        }
    }

    /// `<accounts>/authorize?client_id&redirect_uri&response_type=code&scope`,
    /// form-encoded. Scopes are sorted so the URL is stable.
    pub fn authorize_url(&self, accounts_url: &str) -> Result<String, AuthError> {
        let mut scopes: Vec<&str> = self.oauth.scopes.iter().map(String::as_str).collect();
        scopes.sort_unstable();
        let scope = scopes.join(" ");

        let base = format!("{}/authorize", accounts_url.trim_end_matches('/'));
        let url = Url::parse_with_params(
            &base,
            &[
                ("client_id", self.credentials.id.as_str()),
                ("redirect_uri", self.oauth.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
            ],
        )?;
        Ok(url.into())
    }

    /// `Basic base64(client_id:client_secret)`
    pub fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.credentials.id, self.client_secret());
        format!("Basic {}", STANDARD.encode(raw))
    }
}

/// Where the credential record currently sits in the OAuth lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthorized,
    Fresh { elapsed_secs: i64 },
    Stale { elapsed_secs: i64 },
}

impl AuthState {
    pub fn of(record: &CredentialRecord, now: i64) -> Self {
        if !record.authorized {
            return Self::Unauthorized;
        }
        if !record.is_consistent() {
            warn!("Stored credentials are marked authorized but incomplete; re-authorizing");
            return Self::Unauthorized;
        }
        let elapsed_secs = now - record.last_refresh_epoch_seconds.unwrap_or_default();
        if elapsed_secs < STALENESS_THRESHOLD_SECS {
            Self::Fresh { elapsed_secs }
        } else {
            Self::Stale { elapsed_secs }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Runs the authorization-code grant and keeps the stored tokens fresh.
pub struct Authenticator {
    session: AuthSession,
    store: Arc<dyn CredentialStore>,
    code_provider: Box<dyn CodeProvider>,
    http: Client,
    accounts_url: String,
    clock: Arc<dyn Clock>,
    // Serializes refreshes when the authenticator is shared between workers.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl Authenticator {
    pub fn new(
        session: AuthSession,
        store: Arc<dyn CredentialStore>,
        code_provider: Box<dyn CodeProvider>,
        http: Client,
    ) -> Self {
        Self {
            session,
            store,
            code_provider,
            http,
            accounts_url: DEFAULT_ACCOUNTS_URL.to_string(),
            clock: Arc::new(SystemClock),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_accounts_url(mut self, accounts_url: &str) -> Self {
        self.accounts_url = accounts_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    /// Current lifecycle state according to the stored record.
    pub fn state(&self) -> Result<AuthState, AuthError> {
        let record = self.store.load()?;
        Ok(AuthState::of(&record, self.clock.now_epoch_seconds()))
    }

    /// Ensures a usable access token exists and returns it.
    ///
    /// - No (valid) stored authorization: full grant through the code provider.
    /// - Authorized and refreshed less than [`STALENESS_THRESHOLD_SECS`] ago: stored token.
    /// - Otherwise: one refresh-token exchange.
    pub async fn authorize(&self) -> Result<String, AuthError> {
        self.session.validate()?;

        let record = self.store.load()?;
        match AuthState::of(&record, self.clock.now_epoch_seconds()) {
            AuthState::Unauthorized => {
                info!("Running fresh authorization protocol...");
                self.grant().await
            }
            AuthState::Fresh { elapsed_secs } => {
                info!("No authorization needed (last refresh {}s ago)", elapsed_secs);
                Ok(record.access_token.unwrap_or_default())
            }
            AuthState::Stale { elapsed_secs } => {
                info!("Refreshing access token (last refresh {}s ago)...", elapsed_secs);
                self.refresh(record).await
            }
        }
    }

    async fn grant(&self) -> Result<String, AuthError> {
        let authorize_url = self.session.authorize_url(&self.accounts_url)?;
        info!("Custom authorization url: {}", authorize_url);

        let request = LoginRequest {
            authorize_url: &authorize_url,
            redirect_uri: &self.session.oauth.redirect_uri,
            username: &self.session.username,
            password: &self.session.password,
        };
        let redirect = self.code_provider.redirect_url(&request).await?;
        debug!("Login finished at {}", redirect);

        let code = extract_code(&redirect)?;
        if code.trim().is_empty() {
            return Err(AuthError::MissingConfiguration {
                field: "auth_code (SPOTIFY_AUTH_CODE)",
            });
        }

        info!("Requesting access and refresh tokens...");
        let (status, tokens) = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", self.session.oauth.redirect_uri.as_str()),
            ])
            .await?;

        let refresh_token = match tokens.refresh_token {
            Some(token) if !token.is_empty() => token,
            _ => {
                return Err(AuthError::TokenExchangeFailed {
                    status,
                    body: "response did not include a refresh_token".to_string(),
                })
            }
        };

        let record = CredentialRecord::authorized(
            tokens.access_token.clone(),
            refresh_token,
            self.clock.now_epoch_seconds(),
        );
        self.store.save(&record)?;
        info!("Authorization complete");

        Ok(tokens.access_token)
    }

    async fn refresh(&self, record: CredentialRecord) -> Result<String, AuthError> {
        let refresh_token = record.refresh_token.clone().unwrap_or_default();
        if refresh_token.is_empty() {
            return Err(AuthError::MissingConfiguration {
                field: "refresh_token",
            });
        }

        let (_, tokens) = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .await?;

        // The refresh token is kept; only the access token and timestamp move.
        let updated = CredentialRecord {
            access_token: Some(tokens.access_token.clone()),
            last_refresh_epoch_seconds: Some(self.clock.now_epoch_seconds()),
            ..record
        };
        self.store.save(&updated)?;
        info!("Access token refreshed");

        Ok(tokens.access_token)
    }

    /// `POST <accounts>/api/token` with client basic auth and a form body.
    async fn request_token(
        &self,
        form: &[(&str, &str)],
    ) -> Result<(u16, TokenResponse), AuthError> {
        let url = format!("{}/api/token", self.accounts_url);
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.session.basic_auth_header())
            .form(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        if !(200..300).contains(&status) {
            return Err(AuthError::TokenExchangeFailed { status, body });
        }

        match serde_json::from_str::<TokenResponse>(&body) {
            Ok(tokens) if !tokens.access_token.is_empty() => {
                debug!("Token endpoint answered; expires_in={:?}", tokens.expires_in);
                Ok((status, tokens))
            }
            _ => Err(AuthError::TokenExchangeFailed { status, body }),
        }
    }
}

#[async_trait]
impl TokenSource for Authenticator {
    /// Re-checks staleness on every call; concurrent callers refresh at most once.
    async fn access_token(&self) -> Result<String, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.authorize().await
    }
}

/// Pulls the `code` query parameter out of the provider's redirect.
pub fn extract_code(redirect_url: &str) -> Result<String, AuthError> {
    let url = Url::parse(redirect_url.trim()).map_err(|e| {
        AuthCodeMissingReason::Unparseable(e.to_string()).into_error(redirect_url)
    })?;

    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (Some(code), _) => Ok(code),
        (None, Some(error)) => Err(AuthCodeMissingReason::Denied(error).into_error(redirect_url)),
        (None, None) => Err(AuthCodeMissingReason::Absent.into_error(redirect_url)),
    }
}

enum AuthCodeMissingReason {
    Unparseable(String),
    Denied(String),
    Absent,
}

impl AuthCodeMissingReason {
    fn into_error(self, redirect_url: &str) -> AuthError {
        let reason = match self {
            Self::Unparseable(e) => format!("'{}' is not a valid URL ({})", redirect_url, e),
            Self::Denied(e) => format!("provider returned error '{}'", e),
            Self::Absent => format!("no 'code' parameter in '{}'", redirect_url),
        };
        AuthError::AuthCodeMissing(reason)
    }
}
