use thiserror::Error;

/// Errors surfaced by the player. None of these are fatal; user-facing
/// variants are reported to the requester channel, the rest are logged.
#[derive(Debug, Clone, Error)]
pub enum PlayerError {
    #[error("You're not in a voice channel.")]
    NotInVoiceChannel,

    #[error("No playable result found for `{0}`.")]
    NoResolutionFound(String),

    #[error("Stream resolution failed: {0}")]
    ResolutionFailure(String),

    #[error("Already {0}.")]
    AlreadyInState(&'static str),

    #[error("Voice error: {0}")]
    Voice(String),
}
