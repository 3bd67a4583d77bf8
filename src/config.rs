use std::env;
use std::time::Duration;

use tracing::warn;

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Runtime configuration, read once at startup from the environment (a
/// `.env` file is honored when present).
pub struct Config {
    pub discord_token: String,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub idle_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let discord_token =
            env::var("DISCORD_TOKEN").expect("Expected a token in the environment");

        let idle_timeout = match env::var("IDLE_TIMEOUT_SECS") {
            Ok(raw) => match raw.parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    warn!("Invalid IDLE_TIMEOUT_SECS `{raw}`, using default");
                    Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)
                }
            },
            Err(_) => Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        };

        Self {
            discord_token,
            spotify_client_id: env::var("SPOTIFY_CLIENT_ID").ok().filter(|v| !v.is_empty()),
            spotify_client_secret: env::var("SPOTIFY_CLIENT_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            idle_timeout,
        }
    }
}
