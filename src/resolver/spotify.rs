use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::PlayerError;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const TRACKS_URL: &str = "https://api.spotify.com/v1/tracks";

/// Minimal Spotify Web API client using the client-credentials flow. Only
/// used to translate a track link into "title artist" search terms; the
/// audio itself always comes from the stream resolver.
pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct TrackResponse {
    name: String,
    artists: Vec<Artist>,
}

#[derive(Deserialize)]
struct Artist {
    name: String,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    /// Turns a track link into "title artist" search terms.
    pub async fn search_terms(&self, link: &str) -> Result<String, PlayerError> {
        let id = parse_track_id(link).ok_or_else(|| {
            PlayerError::ResolutionFailure(format!("unrecognized spotify link: {link}"))
        })?;

        let token = self.access_token().await?;
        let track: TrackResponse = self
            .http
            .get(format!("{TRACKS_URL}/{id}"))
            .bearer_auth(token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlayerError::ResolutionFailure(format!("spotify api: {e}")))?
            .json()
            .await
            .map_err(|e| PlayerError::ResolutionFailure(format!("spotify api: {e}")))?;

        let artist = track
            .artists
            .first()
            .map(|a| a.name.as_str())
            .unwrap_or_default();

        Ok(format!("{} {artist}", track.name).trim_end().to_string())
    }

    async fn access_token(&self) -> Result<String, PlayerError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Fetching new spotify access token");
        let response: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlayerError::ResolutionFailure(format!("spotify auth: {e}")))?
            .json()
            .await
            .map_err(|e| PlayerError::ResolutionFailure(format!("spotify auth: {e}")))?;

        let access_token = response.access_token.clone();
        // Renew a minute early so an about-to-expire token is never used.
        *cached = Some(CachedToken {
            access_token: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in.saturating_sub(60)),
        });

        Ok(access_token)
    }
}

/// Accepts both `https://open.spotify.com/track/ID` and `spotify:track:ID`.
pub fn parse_track_id(link: &str) -> Option<String> {
    if let Some(rest) = link.split("spotify:track:").nth(1) {
        return rest
            .split(&['?', '&'][..])
            .next()
            .filter(|id| !id.is_empty())
            .map(str::to_string);
    }

    if let Some(idx) = link.find("/track/") {
        return link[idx + "/track/".len()..]
            .split(&['?', '&', '/'][..])
            .next()
            .filter(|id| !id.is_empty())
            .map(str::to_string);
    }

    None
}
