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

//! Pure mappings from Web API shapes to the persisted schema.

use crate::models::{
    ApiArtist, ApiPlaylist, ApiPlaylistItem, ApiTrack, ArtistSummary, PlaylistExport,
    PlaylistSummary, TrackSummary,
};

/// Written in place of an id the provider reported as missing or null.
pub const NULL_SENTINEL: &str = "null";

fn id_or_sentinel(id: Option<&str>) -> String {
    id.filter(|id| !id.is_empty())
        .unwrap_or(NULL_SENTINEL)
        .to_string()
}

pub fn playlist_summary(playlist: &ApiPlaylist) -> PlaylistSummary {
    PlaylistSummary {
        owner_id: playlist.owner.id.clone().unwrap_or_default(),
        id: playlist.id.clone(),
        name: playlist.name.clone(),
    }
}

pub fn artist_summary(artist: &ApiArtist) -> ArtistSummary {
    ArtistSummary {
        id: id_or_sentinel(artist.id.as_deref()),
        name: artist.name.clone().unwrap_or_default(),
        kind: artist
            .kind
            .clone()
            .unwrap_or_else(|| NULL_SENTINEL.to_string()),
    }
}

/// Maps one playlist entry. Removed tracks (`track: null`) map to an
/// entry with sentinel ids and zeroed fields instead of failing.
pub fn track_summary(item: &ApiPlaylistItem) -> TrackSummary {
    let empty = ApiTrack::default();
    let track = item.track.as_ref().unwrap_or(&empty);

    TrackSummary {
        added_at: item.added_at,
        added_by_id: id_or_sentinel(item.added_by.as_ref().and_then(|u| u.id.as_deref())),
        id: id_or_sentinel(track.id.as_deref()),
        name: track.name.clone().unwrap_or_default(),
        artists: track
            .artists
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(artist_summary)
            .collect(),
        duration_ms: track.duration_ms.unwrap_or(0),
        track_number: track.track_number.unwrap_or(0),
        kind: track
            .kind
            .clone()
            .unwrap_or_else(|| NULL_SENTINEL.to_string()),
        is_local: track.is_local.unwrap_or(false),
    }
}

pub fn track_summaries(items: &[ApiPlaylistItem]) -> Vec<TrackSummary> {
    items.iter().map(track_summary).collect()
}

pub fn playlist_export(playlist: &PlaylistSummary, items: &[ApiPlaylistItem]) -> PlaylistExport {
    PlaylistExport {
        playlist: playlist.clone(),
        tracks: track_summaries(items),
    }
}
