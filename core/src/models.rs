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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Web API response shapes. Every field is optional so that sparse or
// field-projected responses still deserialize.
// ---------------------------------------------------------------------------

/// One page of a limit/offset paginated collection.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// Required; paging stops once this many items are collected.
    pub total: u32,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u32) -> Self {
        Self {
            items,
            total,
            limit: None,
            offset: None,
            next: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiPlaylist {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: ApiUser,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiArtist {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiTrack {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artists: Option<Vec<ApiArtist>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub is_local: Option<bool>,
}

/// An entry of a playlist's track list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiPlaylistItem {
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub added_by: Option<ApiUser>,
    #[serde(default)]
    pub track: Option<ApiTrack>,
}

// ---------------------------------------------------------------------------
// Persisted schema
// ---------------------------------------------------------------------------

/// Minimal identity of a playlist. One row of the summary table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub owner_id: String,
    pub id: String,
    pub name: String,
}

impl fmt::Display for PlaylistSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' [{}] (owner: {})", self.name, self.id, self.owner_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub added_at: Option<DateTime<Utc>>,
    pub added_by_id: String,
    /// The literal `"null"` when the provider reported no id (e.g. local files).
    pub id: String,
    pub name: String,
    pub artists: Vec<ArtistSummary>,
    pub duration_ms: u64,
    pub track_number: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_local: bool,
}

/// Contents of one `playlist-<id>.json` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistExport {
    #[serde(flatten)]
    pub playlist: PlaylistSummary,
    pub tracks: Vec<TrackSummary>,
}

/// A playlist that was written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedPlaylist {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub tracks: usize,
    pub path: String,
}

/// A playlist whose export was abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPlaylist {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub reason: String,
}

impl fmt::Display for FailedPlaylist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' [{}] (owner: {}) -> {}",
            self.name, self.id, self.owner_id, self.reason
        )
    }
}

/// Outcome of a full export run.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExportReport {
    pub playlists_seen: usize,
    pub playlists_selected: usize,
    pub exported: Vec<ExportedPlaylist>,
    pub failed: Vec<FailedPlaylist>,
    pub summary_path: Option<String>,
    pub summary_error: Option<String>,
    pub elapsed_ms: u128,
}

impl ExportReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks_exported(&self) -> usize {
        self.exported.iter().map(|p| p.tracks).sum()
    }

    /// False when any playlist or the summary table could not be written.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.summary_error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sparse_item_deserializes() {
        let item: ApiPlaylistItem = serde_json::from_value(json!({
            "track": { "id": null, "name": "Local Demo" }
        }))
        .unwrap();

        let track = item.track.unwrap();
        assert!(track.id.is_none());
        assert!(track.artists.is_none());
        assert!(item.added_at.is_none());
    }

    #[test]
    fn test_projected_page_deserializes_without_paging_links() {
        let page: Page<ApiPlaylist> = serde_json::from_value(json!({
            "items": [{ "id": "p1", "name": "Mix", "owner": { "id": "alice" } }],
            "total": 7
        }))
        .unwrap();

        assert_eq!(page.total, 7);
        assert_eq!(page.items[0].owner.id.as_deref(), Some("alice"));
        assert!(page.next.is_none());
    }

    #[test]
    fn test_page_without_total_is_rejected() {
        let result = serde_json::from_value::<Page<ApiPlaylist>>(json!({
            "items": [{ "id": "p1", "name": "Mix", "owner": { "id": "alice" } }]
        }));

        assert!(result.is_err());
    }

    #[test]
    fn test_export_is_flat_with_tracks_last() {
        let export = PlaylistExport {
            playlist: PlaylistSummary {
                owner_id: "alice".into(),
                id: "p1".into(),
                name: "Café del Mar".into(),
            },
            tracks: vec![],
        };

        let text = serde_json::to_string_pretty(&export).unwrap();
        assert_eq!(
            text,
            "{\n  \"owner_id\": \"alice\",\n  \"id\": \"p1\",\n  \"name\": \"Café del Mar\",\n  \"tracks\": []\n}"
        );
    }

    #[test]
    fn test_report_success_tracks_failures() {
        let mut report = ExportReport::new();
        assert!(report.is_success());

        report.exported.push(ExportedPlaylist {
            id: "p1".into(),
            name: "A".into(),
            owner_id: "o".into(),
            tracks: 12,
            path: "playlists/o/playlist-p1.json".into(),
        });
        assert_eq!(report.tracks_exported(), 12);

        report.failed.push(FailedPlaylist {
            id: "p2".into(),
            name: "B".into(),
            owner_id: "o".into(),
            reason: "disk full".into(),
        });
        assert!(!report.is_success());
        assert!(report.failed[0].to_string().contains("disk full"));
    }
}
