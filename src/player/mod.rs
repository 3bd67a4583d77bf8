use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::PlayerError;

pub mod actor;
pub mod queue;
pub mod registry;

pub use actor::PlayerActor;
pub use queue::QueueStore;
pub use registry::PlayerRegistry;

/// A track whose identity has been resolved: a page URL plus a display
/// title. The URL is not directly playable; a second, stream-level
/// resolution happens when the track reaches the front of the queue.
#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub url: String,
    pub title: String,
}

/// The playable product of stream resolution.
#[derive(Debug, Clone)]
pub struct StreamSource {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

/// Everything that may touch a guild's playback state goes through this
/// channel, including the track-end notification from the audio thread and
/// the idle timer. One consumer per guild means per-guild operations run
/// one at a time, in arrival order.
pub enum PlayerCommand {
    Request(TrackRequest),
    Pause,
    Resume,
    Stop,
    PlaybackFinished,
    StreamReady {
        track: TrackRequest,
        result: Result<StreamSource, PlayerError>,
    },
    IdleTimeout,
}

/// Cheap clonable handle to a guild's player actor.
///
/// Sends return `false` when the actor has already exited (stopped or idled
/// out); callers treat that the same as "no player for this guild".
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::UnboundedSender<PlayerCommand>,
}

impl PlayerHandle {
    fn new(tx: mpsc::UnboundedSender<PlayerCommand>) -> Self {
        Self { tx }
    }

    pub fn request(&self, track: TrackRequest) -> bool {
        self.send(PlayerCommand::Request(track))
    }

    pub fn pause(&self) -> bool {
        self.send(PlayerCommand::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(PlayerCommand::Resume)
    }

    pub fn stop(&self) -> bool {
        self.send(PlayerCommand::Stop)
    }

    pub fn playback_finished(&self) -> bool {
        self.send(PlayerCommand::PlaybackFinished)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn same_channel(&self, other: &PlayerHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    pub(crate) fn send(&self, cmd: PlayerCommand) -> bool {
        self.tx.send(cmd).is_ok()
    }
}

/// Where the player reports "Now playing", queue acknowledgments and
/// playback errors. Production sends to the requester's text channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}
