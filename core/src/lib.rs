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

pub mod auth;
pub mod client;
pub mod config;
pub mod export;
pub mod login;
pub mod models;
pub mod paginate;
pub mod store;
pub mod transform;

// Re-export key items for convenience
pub use auth::{AuthError, AuthSession, Authenticator, TokenSource, STALENESS_THRESHOLD_SECS};
pub use client::SpotifyClient;
pub use config::{RefreshPolicy, Settings};
pub use export::{ExportOptions, Exporter};
pub use models::{ExportReport, PlaylistSummary, TrackSummary};
pub use store::{CredentialRecord, CredentialStore, FileCredentialStore};
