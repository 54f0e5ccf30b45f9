use crate::client::SpotifyClient;
use crate::config::Settings;
use crate::models::{
    ExportReport, ExportedPlaylist, FailedPlaylist, PlaylistExport, PlaylistSummary,
};
use crate::paginate::{fetch_all, PaginationError, PLAYLISTS_PAGE_SIZE, TRACKS_PAGE_SIZE};
use crate::transform::{self, NULL_SENTINEL};
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Name shared by Spotify's yearly auto-generated personal playlists
/// ("Your Top Songs 2023", ...). Always exported, whoever owns it.
pub const TOP_SONGS_SENTINEL: &str = "Your Top Songs";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize playlist: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub output_dir: PathBuf,
    pub summary_path: PathBuf,
    /// Empty means every playlist is exported.
    pub owner_ids: Vec<String>,
    pub concurrency: usize,
}

impl ExportOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            output_dir: settings.output_dir.clone(),
            summary_path: settings.summary_path.clone(),
            owner_ids: settings.owner_ids.clone(),
            concurrency: settings.concurrency.max(1),
        }
    }
}

/// Ownership filter applied before a playlist's tracks are fetched.
pub fn is_selected(playlist: &PlaylistSummary, owner_ids: &[String]) -> bool {
    owner_ids.is_empty()
        || owner_ids.iter().any(|id| *id == playlist.owner_id)
        || playlist.name.contains(TOP_SONGS_SENTINEL)
}

/// `<root>/<owner_id>/playlist-<id>.json`
pub fn artifact_path(root: &Path, playlist: &PlaylistSummary) -> PathBuf {
    root.join(&*path_segment(&playlist.owner_id))
        .join(format!("playlist-{}.json", path_segment(&playlist.id)))
}

fn path_segment(raw: &str) -> Cow<'_, str> {
    if raw.is_empty() {
        Cow::Borrowed(NULL_SENTINEL)
    } else if raw.contains(['/', '\\']) || raw == "." || raw == ".." {
        Cow::Owned(raw.replace(['/', '\\', '.'], "_"))
    } else {
        Cow::Borrowed(raw)
    }
}

/// Renders the playlist summary table as CSV (`owner_id,id,name`).
pub fn summary_csv(playlists: &[PlaylistSummary]) -> String {
    let mut output = String::from("owner_id,id,name\n");
    for p in playlists {
        let record = [
            escape_csv(&p.owner_id),
            escape_csv(&p.id),
            escape_csv(&p.name),
        ];
        output.push_str(&record.join(","));
        output.push('\n');
    }
    output
}

fn escape_csv(s: &str) -> Cow<'_, str> {
    if s.contains(['"', ',', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", s.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(s)
    }
}

/// Writes through a sibling temp file so readers never see a partial file.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ExportError> {
    let io = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(source) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io(source));
    }
    tokio::fs::rename(&tmp, path).await.map_err(io)
}

/// Drives the fetch, transform and persist pipeline.
pub struct Exporter {
    client: SpotifyClient,
    options: ExportOptions,
}

impl Exporter {
    pub fn new(client: SpotifyClient, options: ExportOptions) -> Self {
        Self { client, options }
    }

    /// All playlists of the current user, de-duplicated by id.
    pub async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>, ExportError> {
        let raw = fetch_all(PLAYLISTS_PAGE_SIZE, |limit, offset| {
            info!(
                "Fetching {} playlists per call with an offset of {}",
                limit, offset
            );
            self.client.playlists_page(limit, offset)
        })
        .await?;

        let mut seen = HashSet::new();
        let playlists: Vec<PlaylistSummary> = raw
            .iter()
            .map(transform::playlist_summary)
            .filter(|p| {
                let fresh = seen.insert(p.id.clone());
                if !fresh {
                    warn!("Skipping duplicate playlist {}", p);
                }
                fresh
            })
            .collect();

        info!("Total of {} playlists fetched", playlists.len());
        Ok(playlists)
    }

    /// Fetches, transforms and writes one playlist.
    pub async fn export_playlist(
        &self,
        playlist: &PlaylistSummary,
    ) -> Result<ExportedPlaylist, ExportError> {
        let started = Instant::now();
        info!("------ start '{}' ------", playlist.name);

        let items = fetch_all(TRACKS_PAGE_SIZE, |limit, offset| {
            info!(
                "Fetching {} items per call with an offset of {} from playlist {}",
                limit, offset, playlist.id
            );
            self.client.playlist_items_page(&playlist.id, limit, offset)
        })
        .await?;

        let export: PlaylistExport = transform::playlist_export(playlist, &items);
        info!(
            "Fetched all {} tracks for playlist '{}'",
            export.tracks.len(),
            playlist.name
        );

        let path = artifact_path(&self.options.output_dir, playlist);
        let json = serde_json::to_vec_pretty(&export)?;
        write_atomic(&path, &json).await?;

        info!(
            "------ end '{}' ({} tracks, {} ms) ------",
            playlist.name,
            export.tracks.len(),
            started.elapsed().as_millis()
        );

        Ok(ExportedPlaylist {
            id: playlist.id.clone(),
            name: playlist.name.clone(),
            owner_id: playlist.owner_id.clone(),
            tracks: export.tracks.len(),
            path: path.display().to_string(),
        })
    }

    /// Full run: list, write the summary table, then export every selected
    /// playlist. Only a failure to list playlists aborts the run; anything
    /// else is recorded in the report.
    pub async fn run(&self) -> Result<ExportReport, ExportError> {
        let started = Instant::now();
        let mut report = ExportReport::new();

        let playlists = self.list_playlists().await?;
        report.playlists_seen = playlists.len();

        let summary = summary_csv(&playlists);
        match write_atomic(&self.options.summary_path, summary.as_bytes()).await {
            Ok(()) => {
                info!("Saved playlist summary to {}", self.options.summary_path.display());
                report.summary_path = Some(self.options.summary_path.display().to_string());
            }
            Err(e) => {
                error!("{}", e);
                report.summary_error = Some(e.to_string());
            }
        }

        let selected: Vec<&PlaylistSummary> = playlists
            .iter()
            .filter(|p| is_selected(p, &self.options.owner_ids))
            .collect();
        report.playlists_selected = selected.len();
        info!(
            "Exporting {} of {} playlists",
            selected.len(),
            playlists.len()
        );

        let outcomes: Vec<_> = stream::iter(selected)
            .map(|playlist| async move { (playlist, self.export_playlist(playlist).await) })
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        for (playlist, outcome) in outcomes {
            match outcome {
                Ok(exported) => report.exported.push(exported),
                Err(e) => {
                    error!("Export of {} failed: {}", playlist, e);
                    report.failed.push(FailedPlaylist {
                        id: playlist.id.clone(),
                        name: playlist.name.clone(),
                        owner_id: playlist.owner_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(owner: &str, id: &str, name: &str) -> PlaylistSummary {
        PlaylistSummary {
            owner_id: owner.into(),
            id: id.into(),
            name: name.into(),
        }
    }

    #[test]
    fn test_ownership_filter() {
        let owners = vec!["A".to_string(), "B".to_string()];

        assert!(is_selected(&playlist("A", "1", "Mine"), &owners));
        assert!(is_selected(&playlist("C", "2", "Your Top Songs"), &owners));
        assert!(is_selected(&playlist("C", "3", "Your Top Songs 2023"), &owners));
        assert!(!is_selected(&playlist("C", "4", "Discover Weekly"), &owners));
    }

    #[test]
    fn test_empty_allow_list_selects_everything() {
        assert!(is_selected(&playlist("C", "4", "Discover Weekly"), &[]));
        assert!(is_selected(&playlist("", "5", ""), &[]));
    }

    #[test]
    fn test_artifact_path() {
        let root = Path::new("playlists");
        assert_eq!(
            artifact_path(root, &playlist("alice", "p1", "x")),
            PathBuf::from("playlists/alice/playlist-p1.json")
        );
        assert_eq!(
            artifact_path(root, &playlist("", "p1", "x")),
            PathBuf::from("playlists/null/playlist-p1.json")
        );
        assert_eq!(
            artifact_path(root, &playlist("../etc", "p1", "x")),
            PathBuf::from("playlists/___etc/playlist-p1.json")
        );
        assert_eq!(
            artifact_path(root, &playlist("..", "a/b", "x")),
            PathBuf::from("playlists/__/playlist-a_b.json")
        );
    }

    #[test]
    fn test_summary_csv_quotes_when_needed() {
        let csv = summary_csv(&[
            playlist("alice", "p1", "Chill"),
            playlist("bob", "p2", "Rock, Roll & \"Soul\""),
            playlist("zoë", "p3", "Café"),
        ]);

        assert_eq!(
            csv,
            "owner_id,id,name\n\
             alice,p1,Chill\n\
             bob,p2,\"Rock, Roll & \"\"Soul\"\"\"\n\
             zoë,p3,Café\n"
        );
    }

    #[tokio::test]
    async fn test_write_atomic_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("out.json");

        write_atomic(&path, b"{}").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        assert!(!dir.path().join("a/b/out.json.tmp").exists());
    }
}
