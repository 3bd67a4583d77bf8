use async_trait::async_trait;

use crate::error::PlayerError;
use crate::player::{StreamSource, TrackRequest};

pub mod spotify;
pub mod ytdlp;

pub use spotify::SpotifyClient;
pub use ytdlp::YtDlpResolver;

/// Resolution happens in two steps, and both are part of the contract:
/// identity first (free text or link to a page URL plus title), then the
/// stream (page URL to a directly playable audio URL) at the moment the
/// track actually starts. Page URLs are not playable, and stream URLs
/// expire, which is why the second step cannot be done up front.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve_identity(&self, query: &str) -> Result<TrackRequest, PlayerError>;

    async fn resolve_stream(&self, url: &str) -> Result<StreamSource, PlayerError>;
}
