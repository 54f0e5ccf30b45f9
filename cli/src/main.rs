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

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use export_core::auth::{AuthState, StaticToken};
use export_core::client::{http_client, HttpClient};
use export_core::config::parse_owner_ids;
use export_core::login::code_provider_from_settings;
use export_core::{
    AuthSession, Authenticator, ExportOptions, ExportReport, Exporter, FileCredentialStore,
    RefreshPolicy, Settings, SpotifyClient, TokenSource,
};
use log::debug;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "spotify-export")]
#[command(about = "Back up your Spotify playlists and their tracks as JSON", long_about = None)]
struct Cli {
    /// Authorization code (or the full redirect URL) to use instead of the browser login
    #[arg(long, global = true)]
    auth_code: Option<String>,

    /// Where tokens are kept between runs
    #[arg(long, global = true, value_name = "PATH")]
    credentials: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Exports every selected playlist to <output-dir>/<owner_id>/playlist-<id>.json (default)
    Export {
        /// Root directory for the per-playlist files
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,

        /// Path of the CSV summary of all playlists
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Only export playlists owned by these ids (comma separated, repeatable)
        #[arg(long = "owner", value_name = "OWNER_ID")]
        owners: Vec<String>,

        /// Number of playlists exported in parallel
        #[arg(long, short = 'j')]
        concurrency: Option<usize>,

        /// Check the token's age before every API call instead of once per run
        #[arg(long)]
        refresh_per_request: bool,

        /// Output the run report to a JSON file (e.g., --json=report.json)
        #[arg(long)]
        json: Option<String>,
    },
    /// Lists all your playlists with their IDs and owners
    List,
    /// Runs the authorization flow only and stores the tokens
    Authorize,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if dotenv().is_err() {
        debug!("No .env file found");
    }

    let cli = Cli::parse();
    let mut settings = Settings::from_env();
    if let Some(code) = &cli.auth_code {
        settings.auth_code = Some(code.clone());
    }
    if let Some(path) = &cli.credentials {
        settings.credentials_path = path.clone();
    }

    let command = cli.command.unwrap_or(Commands::Export {
        output_dir: None,
        summary: None,
        owners: Vec::new(),
        concurrency: None,
        refresh_per_request: false,
        json: None,
    });

    let outcome = match command {
        Commands::Export {
            output_dir,
            summary,
            owners,
            concurrency,
            refresh_per_request,
            json,
        } => {
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            if let Some(path) = summary {
                settings.summary_path = path;
            }
            if !owners.is_empty() {
                settings.owner_ids = owners.iter().flat_map(|o| parse_owner_ids(o)).collect();
            }
            if let Some(n) = concurrency {
                settings.concurrency = n.max(1);
            }
            if refresh_per_request {
                settings.refresh_policy = RefreshPolicy::PerRequest;
            }
            handle_export(&settings, json.as_deref()).await
        }
        Commands::List => handle_list(&settings).await,
        Commands::Authorize => handle_authorize(&settings).await,
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!();
            eprintln!("[ERROR] {:#}", e);
            process::exit(1);
        }
    }
}

fn build_authenticator(settings: &Settings, http: HttpClient) -> Authenticator {
    let store = Arc::new(FileCredentialStore::new(&settings.credentials_path));
    let provider = code_provider_from_settings(settings, http.clone());
    Authenticator::new(AuthSession::from_settings(settings), store, provider, http)
        .with_accounts_url(&settings.accounts_url)
}

/// Authorizes once and builds the API client with the configured refresh policy.
async fn connect(settings: &Settings) -> Result<SpotifyClient> {
    let http = http_client().context("Failed to build HTTP client")?;
    let authenticator = build_authenticator(settings, http.clone());

    let token = authenticator
        .authorize()
        .await
        .context("Authorization failed")?;

    let tokens: Arc<dyn TokenSource> = match settings.refresh_policy {
        RefreshPolicy::PerRun => Arc::new(StaticToken(token)),
        RefreshPolicy::PerRequest => Arc::new(authenticator),
    };
    Ok(SpotifyClient::new(http, &settings.api_url, tokens))
}

async fn handle_authorize(settings: &Settings) -> Result<bool> {
    let http = http_client().context("Failed to build HTTP client")?;
    let authenticator = build_authenticator(settings, http);

    authenticator
        .authorize()
        .await
        .context("Authorization failed")?;

    let state = authenticator.state().context("Failed to read stored credentials")?;
    println!();
    match state {
        AuthState::Fresh { elapsed_secs } => println!(
            "[OK] Authorized. Token refreshed {}s ago, stored in {}",
            elapsed_secs,
            settings.credentials_path.display()
        ),
        other => println!("[WARN] Unexpected credential state after authorization: {:?}", other),
    }
    Ok(true)
}

async fn handle_export(settings: &Settings, json_path: Option<&str>) -> Result<bool> {
    let started = Instant::now();
    let client = connect(settings).await?;
    let exporter = Exporter::new(client, ExportOptions::from_settings(settings));

    println!("Exporting playlists to {} ...", settings.output_dir.display());
    let report = exporter.run().await.context("Export aborted")?;

    print_report(&report);

    if let Some(path) = json_path {
        match File::create(path) {
            Ok(mut file) => {
                let json_content = serde_json::to_string_pretty(&report).unwrap_or_default();
                if let Err(e) = file.write_all(json_content.as_bytes()) {
                    eprintln!();
                    eprintln!("[ERROR] Failed to write report to file: {}", e);
                } else {
                    println!();
                    println!("[SAVED] Report saved to: {}", path);
                }
            }
            Err(e) => eprintln!("[ERROR] Failed to create file '{}': {}", path, e),
        }
    }

    println!();
    println!(
        "Export completed in {:.2} seconds",
        started.elapsed().as_secs_f64()
    );
    Ok(report.is_success())
}

fn print_report(report: &ExportReport) {
    println!();
    println!("---------------------------------------------------");
    println!("EXPORT REPORT");
    println!("---------------------------------------------------");
    println!("Playlists Found:     {}", report.playlists_seen);
    println!("Playlists Selected:  {}", report.playlists_selected);
    println!("Playlists Exported:  {}", report.exported.len());
    println!("Tracks Exported:     {}", report.tracks_exported());
    println!("Failures:            {}", report.failed.len());
    match (&report.summary_path, &report.summary_error) {
        (Some(path), _) => println!("Summary Table:       {}", path),
        (None, Some(e)) => println!("Summary Table:       FAILED ({})", e),
        (None, None) => {}
    }
    println!("---------------------------------------------------");

    if !report.failed.is_empty() {
        println!();
        println!("The following playlists could not be exported:");
        for (i, failure) in report.failed.iter().enumerate() {
            println!("{}. {}", i + 1, failure);
        }
    }
}

async fn handle_list(settings: &Settings) -> Result<bool> {
    let client = connect(settings).await?;
    let exporter = Exporter::new(client, ExportOptions::from_settings(settings));
    println!("Fetching your playlists...");

    let playlists = exporter
        .list_playlists()
        .await
        .context("Failed to list playlists")?;

    println!();
    println!("{:<25} | {:<30} | {:<20}", "ID", "Name", "Owner");
    println!("{:-<25}-+-{:-<30}-+-{:-<20}", "", "", "");
    for pl in &playlists {
        println!(
            "{:<25} | {:<30} | {:<20}",
            pl.id,
            truncate(&pl.name, 28),
            truncate(&pl.owner_id, 18)
        );
    }
    println!();
    println!("Total: {} playlists", playlists.len());
    Ok(true)
}

/// Shortens to `max` characters, appending `..` when cut.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}..", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}
