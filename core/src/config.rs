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

use log::warn;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ACCOUNTS_URL: &str = "https://accounts.spotify.com";
pub const DEFAULT_API_URL: &str = "https://api.spotify.com/v1";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/callback";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

/// When the access token's staleness is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Once, before the export starts.
    #[default]
    PerRun,
    /// Before every resource call.
    PerRequest,
}

impl FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-run" | "run" => Ok(Self::PerRun),
            "per-request" | "request" => Ok(Self::PerRequest),
            other => Err(format!("unknown refresh policy '{other}'")),
        }
    }
}

/// Everything the exporter needs from the environment.
///
/// Required values are kept as (possibly empty) strings; the authenticator
/// decides which of them are missing so it can report the exact field.
#[derive(Debug, Clone)]
pub struct Settings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub username: String,
    pub password: String,
    pub owner_ids: Vec<String>,
    /// Pre-supplied authorization code or full redirect URL. Skips the browser.
    pub auth_code: Option<String>,
    pub webdriver_url: String,
    pub headless: bool,
    pub login_timeout: Duration,
    pub credentials_path: PathBuf,
    pub output_dir: PathBuf,
    pub summary_path: PathBuf,
    pub concurrency: usize,
    pub refresh_policy: RefreshPolicy,
    pub accounts_url: String,
    pub api_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            username: String::new(),
            password: String::new(),
            owner_ids: Vec::new(),
            auth_code: None,
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            headless: true,
            login_timeout: Duration::from_secs(60),
            credentials_path: PathBuf::from(".spotify_credentials.json"),
            output_dir: PathBuf::from("playlists"),
            summary_path: PathBuf::from("playlists.csv"),
            concurrency: 1,
            refresh_policy: RefreshPolicy::PerRun,
            accounts_url: DEFAULT_ACCOUNTS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

impl Settings {
    /// Reads `SPOTIFY_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let non_empty = |key: &str| text(key).filter(|v| !v.is_empty());

        Self {
            client_id: text("SPOTIFY_CLIENT_ID").unwrap_or_default(),
            client_secret: text("SPOTIFY_CLIENT_SECRET").unwrap_or_default(),
            redirect_uri: text("SPOTIFY_CLIENT_CALLBACK_URL").unwrap_or(defaults.redirect_uri),
            username: text("SPOTIFY_USERNAME").unwrap_or_default(),
            password: lookup("SPOTIFY_PASSWORD").unwrap_or_default(),
            owner_ids: text("SPOTIFY_OWNER_IDS")
                .map(|v| parse_owner_ids(&v))
                .unwrap_or_default(),
            auth_code: non_empty("SPOTIFY_AUTH_CODE"),
            webdriver_url: non_empty("SPOTIFY_WEBDRIVER_URL").unwrap_or(defaults.webdriver_url),
            headless: parse_or("SPOTIFY_HEADLESS", non_empty("SPOTIFY_HEADLESS"), defaults.headless),
            login_timeout: Duration::from_secs(parse_or(
                "SPOTIFY_LOGIN_TIMEOUT_SECS",
                non_empty("SPOTIFY_LOGIN_TIMEOUT_SECS"),
                defaults.login_timeout.as_secs(),
            )),
            credentials_path: non_empty("SPOTIFY_CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.credentials_path),
            output_dir: non_empty("SPOTIFY_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            summary_path: non_empty("SPOTIFY_SUMMARY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.summary_path),
            concurrency: parse_or::<usize>(
                "SPOTIFY_CONCURRENCY",
                non_empty("SPOTIFY_CONCURRENCY"),
                defaults.concurrency,
            )
            .max(1),
            refresh_policy: parse_or(
                "SPOTIFY_REFRESH_POLICY",
                non_empty("SPOTIFY_REFRESH_POLICY"),
                defaults.refresh_policy,
            ),
            accounts_url: non_empty("SPOTIFY_ACCOUNTS_URL").unwrap_or(defaults.accounts_url),
            api_url: non_empty("SPOTIFY_API_URL").unwrap_or(defaults.api_url),
        }
    }
}

/// Splits a comma separated allow-list, dropping blank entries.
pub fn parse_owner_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> T {
    match value {
        Some(v) => v.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value '{}' for {}", v, key);
            default
        }),
        None => default,
    }
}
