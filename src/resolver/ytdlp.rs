use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::PlayerError;
use crate::player::{StreamSource, TrackRequest};
use crate::resolver::{SpotifyClient, TrackResolver};

const UNKNOWN_TRACK_TITLE: &str = "UNKNOWN TRACK";

/// Resolver backed by the `yt-dlp` binary. Spotify links are first
/// translated into "title artist" search terms through the Spotify Web API;
/// everything else goes to yt-dlp directly, with free text as a
/// first-match `ytsearch`.
pub struct YtDlpResolver {
    spotify: Option<SpotifyClient>,
}

#[derive(Deserialize)]
struct YtDlpEntry {
    id: Option<String>,
    title: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
}

impl YtDlpResolver {
    pub fn new(spotify: Option<SpotifyClient>) -> Self {
        Self { spotify }
    }

    async fn search_terms_for(&self, query: &str) -> String {
        if !is_spotify_link(query) {
            return query.to_string();
        }

        match &self.spotify {
            Some(spotify) => match spotify.search_terms(query).await {
                Ok(terms) => {
                    info!("Resolved spotify link to `{terms}`");
                    terms
                }
                Err(e) => {
                    warn!("Spotify lookup failed, searching the raw link: {e}");
                    query.to_string()
                }
            },
            None => {
                warn!("No spotify credentials configured, searching the raw link");
                query.to_string()
            }
        }
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve_identity(&self, query: &str) -> Result<TrackRequest, PlayerError> {
        let terms = self.search_terms_for(query).await;
        let target = if terms.starts_with("http") {
            terms
        } else {
            format!("ytsearch1:{terms}")
        };

        let stdout = run_ytdlp(&["-j", "--no-playlist", &target]).await?;
        let entry = first_entry(&stdout).ok_or_else(|| {
            PlayerError::NoResolutionFound(query.to_string())
        })?;

        let url = entry
            .webpage_url
            .or_else(|| {
                entry
                    .id
                    .map(|id| format!("https://www.youtube.com/watch?v={id}"))
            })
            .ok_or_else(|| PlayerError::NoResolutionFound(query.to_string()))?;

        Ok(TrackRequest {
            url,
            title: entry.title.unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
        })
    }

    async fn resolve_stream(&self, url: &str) -> Result<StreamSource, PlayerError> {
        let stdout = run_ytdlp(&["-j", "--no-playlist", "-f", "bestaudio/best", url]).await?;
        let entry = first_entry(&stdout)
            .ok_or_else(|| PlayerError::ResolutionFailure(format!("no stream data for {url}")))?;

        let stream_url = entry
            .url
            .ok_or_else(|| PlayerError::ResolutionFailure(format!("no stream URL for {url}")))?;

        Ok(StreamSource {
            url: stream_url,
            title: entry.title.unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
        })
    }
}

async fn run_ytdlp(args: &[&str]) -> Result<String, PlayerError> {
    let output = Command::new("yt-dlp")
        .args(args)
        .output()
        .await
        .map_err(|e| PlayerError::ResolutionFailure(format!("yt-dlp failed to start: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PlayerError::ResolutionFailure(
            stderr.lines().last().unwrap_or("yt-dlp failed").to_string(),
        ));
    }

    String::from_utf8(output.stdout)
        .map_err(|_| PlayerError::ResolutionFailure("yt-dlp produced invalid utf-8".to_string()))
}

fn first_entry(stdout: &str) -> Option<YtDlpEntry> {
    stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str(line).ok())
}

pub fn is_spotify_link(query: &str) -> bool {
    query.contains("spotify.com") || query.starts_with("spotify:")
}
