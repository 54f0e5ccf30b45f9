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

use crate::auth::{AuthError, TokenSource};
use crate::models::{ApiPlaylist, ApiPlaylistItem, Page};
use log::{debug, warn};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

pub use reqwest::Client as HttpClient;

/// Projection for `GET /playlists/{id}/tracks`: only what the export keeps.
pub const TRACK_FIELDS: &str = "total,limit,offset,next,items(added_at,added_by.id,track(id,name,duration_ms,track_number,type,is_local,artists(id,name,type)))";

/// Tries per page before a rate limit or server error is reported.
const MAX_ATTEMPTS: u32 = 4;
/// Used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;
const MAX_RETRY_AFTER_SECS: u64 = 60;
const BASE_BACKOFF_MS: u64 = 500;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Spotify API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },
    #[error("Could not obtain an access token: {0}")]
    Auth(#[from] AuthError),
}

/// Builds the HTTP client shared by the authenticator and the API client.
pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(format!("spotify-export/{}", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Typed access to the two Web API resources the export reads.
#[derive(Clone)]
pub struct SpotifyClient {
    http: Client,
    api_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl SpotifyClient {
    pub fn new(http: Client, api_url: &str, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// `GET /me/playlists`
    pub async fn playlists_page(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Page<ApiPlaylist>, ClientError> {
        let url = format!("{}/me/playlists", self.api_url);
        self.get_page(&url, &[("limit", limit.to_string()), ("offset", offset.to_string())])
            .await
    }

    /// `GET /playlists/{id}/tracks`, projected to [`TRACK_FIELDS`].
    pub async fn playlist_items_page(
        &self,
        playlist_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Page<ApiPlaylistItem>, ClientError> {
        let url = format!("{}/playlists/{}/tracks", self.api_url, playlist_id);
        self.get_page(
            &url,
            &[
                ("fields", TRACK_FIELDS.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Page<T>, ClientError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_page(url, query).await {
                Err(ClientError::RateLimited { retry_after_secs }) if attempt < MAX_ATTEMPTS => {
                    let wait = retry_after_secs.min(MAX_RETRY_AFTER_SECS);
                    warn!(
                        "Rate limited on {} (attempt {}/{}), retrying in {}s",
                        url, attempt, MAX_ATTEMPTS, wait
                    );
                    sleep(Duration::from_secs(wait)).await;
                }
                Err(ClientError::Status { status, ref body })
                    if status >= 500 && attempt < MAX_ATTEMPTS =>
                {
                    let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                    warn!(
                        "{} returned {} (attempt {}/{}), retrying in {}ms: {}",
                        url, status, attempt, MAX_ATTEMPTS, delay, body
                    );
                    sleep(Duration::from_millis(delay)).await;
                }
                other => return other,
            }
        }
    }

    async fn send_page<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Page<T>, ClientError> {
        let token = self.tokens.access_token().await?;
        debug!("GET {} {:?}", url, query);

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ClientError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}
