use std::sync::Arc;

use async_trait::async_trait;
use serenity::model::id::GuildId;
use songbird::tracks::{PlayMode, TrackHandle};
use songbird::{ytdl, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::PlayerError;
use crate::player::{PlayerHandle, StreamSource};

/// One guild's voice connection, as seen by the player actor.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Starts the stream and arranges for `on_complete` to be told when the
    /// track ends naturally.
    async fn play(&self, stream: &StreamSource, on_complete: PlayerHandle)
        -> Result<(), PlayerError>;

    async fn pause(&self) -> Result<(), PlayerError>;

    async fn resume(&self) -> Result<(), PlayerError>;

    async fn is_playing(&self) -> bool;

    async fn is_paused(&self) -> bool;

    async fn disconnect(&self) -> Result<(), PlayerError>;
}

/// Production session driving a songbird call. The actor is the only caller,
/// so the current-track handle needs no finer locking than a mutex.
pub struct SongbirdSession {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdSession {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId) -> Self {
        Self {
            manager,
            guild_id,
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl VoiceSession for SongbirdSession {
    async fn play(
        &self,
        stream: &StreamSource,
        on_complete: PlayerHandle,
    ) -> Result<(), PlayerError> {
        let source = ytdl(&stream.url)
            .await
            .map_err(|e| PlayerError::Voice(format!("could not open stream: {e}")))?;

        let call = self
            .manager
            .get(self.guild_id)
            .ok_or_else(|| PlayerError::Voice("no voice connection".to_string()))?;
        let mut call = call.lock().await;

        call.stop(); // Just in case something was playing before
        let handle = call.play_source(source);

        handle
            .add_event(Event::Track(TrackEvent::End), TrackEndNotifier { on_complete })
            .map_err(|e| PlayerError::Voice(format!("could not attach end event: {e}")))?;

        debug!("Started track `{}` in guild {}", stream.title, self.guild_id);
        *self.current.lock().await = Some(handle);

        Ok(())
    }

    async fn pause(&self) -> Result<(), PlayerError> {
        match self.current.lock().await.as_ref() {
            Some(handle) => handle
                .pause()
                .map_err(|e| PlayerError::Voice(e.to_string())),
            None => Err(PlayerError::AlreadyInState("stopped")),
        }
    }

    async fn resume(&self) -> Result<(), PlayerError> {
        match self.current.lock().await.as_ref() {
            Some(handle) => handle.play().map_err(|e| PlayerError::Voice(e.to_string())),
            None => Err(PlayerError::AlreadyInState("stopped")),
        }
    }

    async fn is_playing(&self) -> bool {
        match self.current.lock().await.as_ref() {
            Some(handle) => matches!(
                handle.get_info().await.map(|info| info.playing),
                Ok(PlayMode::Play)
            ),
            None => false,
        }
    }

    async fn is_paused(&self) -> bool {
        match self.current.lock().await.as_ref() {
            Some(handle) => matches!(
                handle.get_info().await.map(|info| info.playing),
                Ok(PlayMode::Pause)
            ),
            None => false,
        }
    }

    async fn disconnect(&self) -> Result<(), PlayerError> {
        info!("Leaving voice channel in guild {}", self.guild_id);
        self.current.lock().await.take();

        if self.manager.get(self.guild_id).is_none() {
            // Already gone (e.g. the bot was kicked from the channel).
            return Ok(());
        }

        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| PlayerError::Voice(e.to_string()))
    }
}

/// Marshals songbird's track-end event, which fires on the driver's own
/// context, back into the guild's serialized mailbox.
struct TrackEndNotifier {
    on_complete: PlayerHandle,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.on_complete.playback_finished();
        None
    }
}
