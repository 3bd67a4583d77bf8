use std::sync::Arc;
use std::time::Duration;

use serenity::model::id::GuildId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PlayerError;
use crate::player::{
    Notifier, PlaybackState, PlayerCommand, PlayerHandle, PlayerRegistry, QueueStore, TrackRequest,
};
use crate::resolver::TrackResolver;
use crate::voice::VoiceSession;

/// Per-guild playback coordinator.
///
/// One actor task per guild owns that guild's playback state and is the only
/// thing that drives its voice session. Commands, the track-end notification
/// and the idle timer all arrive through the same mailbox, so there is no
/// window in which two operations for one guild interleave. Stream
/// resolution is network-bound and runs in a spawned task that reports back
/// through the mailbox; the actor keeps handling commands in the meantime.
pub struct PlayerActor {
    guild_id: GuildId,
    rx: mpsc::UnboundedReceiver<PlayerCommand>,
    handle: PlayerHandle,
    queue: Arc<QueueStore>,
    registry: Arc<PlayerRegistry>,
    resolver: Arc<dyn TrackResolver>,
    session: Arc<dyn VoiceSession>,
    notifier: Arc<dyn Notifier>,
    idle_timeout: Duration,
    state: PlaybackState,
    resolving: bool,
    idle_timer: Option<JoinHandle<()>>,
}

impl PlayerActor {
    /// Spawns the actor and registers its handle. If another play command
    /// won the registration race, the freshly built actor is dropped and the
    /// existing handle is returned instead.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        guild_id: GuildId,
        queue: Arc<QueueStore>,
        registry: Arc<PlayerRegistry>,
        resolver: Arc<dyn TrackResolver>,
        session: Arc<dyn VoiceSession>,
        notifier: Arc<dyn Notifier>,
        idle_timeout: Duration,
    ) -> PlayerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = PlayerHandle::new(tx);

        let winner = registry.register(guild_id, handle.clone());
        if !winner.same_channel(&handle) {
            return winner;
        }

        let actor = Self {
            guild_id,
            rx,
            handle: handle.clone(),
            queue,
            registry,
            resolver,
            session,
            notifier,
            idle_timeout,
            state: PlaybackState::Idle,
            resolving: false,
            idle_timer: None,
        };

        tokio::spawn(actor.run());

        handle
    }

    async fn run(mut self) {
        info!("Player started for guild {}", self.guild_id);

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                PlayerCommand::Request(track) => self.on_request(track).await,
                PlayerCommand::Pause => self.on_pause().await,
                PlayerCommand::Resume => self.on_resume().await,
                PlayerCommand::PlaybackFinished => {
                    debug!("Track finished in guild {}", self.guild_id);
                    self.state = PlaybackState::Idle;
                    self.advance().await;
                }
                PlayerCommand::StreamReady { track, result } => {
                    self.on_stream_ready(track, result).await;
                }
                PlayerCommand::IdleTimeout => {
                    if self.on_idle_timeout().await {
                        break;
                    }
                }
                PlayerCommand::Stop => {
                    self.on_stop().await;
                    break;
                }
            }
        }

        self.cancel_idle_timer();
        self.registry.deregister(self.guild_id, &self.handle);
        info!("Player exited for guild {}", self.guild_id);
    }

    async fn on_request(&mut self, track: TrackRequest) {
        info!("Queueing `{}` for guild {}", track.title, self.guild_id);
        self.cancel_idle_timer();
        let title = track.title.clone();
        self.queue.enqueue(self.guild_id, track);

        // Only an idle player with no resolution in flight may start a new
        // track; anything else is a plain FIFO append. This is what keeps a
        // burst of requests from racing into two play-starts.
        if self.state == PlaybackState::Idle && !self.resolving {
            self.advance().await;
        } else {
            self.notifier
                .notify(&format!("Added to the queue: **{title}**"))
                .await;
        }
    }

    /// Pulls the next track and kicks off its stream resolution, or arms the
    /// idle timer when the queue has run dry.
    async fn advance(&mut self) {
        self.cancel_idle_timer();

        match self.queue.dequeue_front(self.guild_id) {
            Some(track) => {
                debug!("Resolving stream for `{}`", track.title);
                self.resolving = true;
                let resolver = Arc::clone(&self.resolver);
                let handle = self.handle.clone();
                tokio::spawn(async move {
                    let result = resolver.resolve_stream(&track.url).await;
                    // Dropped on the floor if the actor has since stopped.
                    handle.send(PlayerCommand::StreamReady { track, result });
                });
            }
            None => {
                self.state = PlaybackState::Idle;
                self.start_idle_timer();
            }
        }
    }

    async fn on_stream_ready(
        &mut self,
        track: TrackRequest,
        result: Result<crate::player::StreamSource, PlayerError>,
    ) {
        if !self.resolving {
            // A stop superseded this resolution while it was in flight.
            debug!("Discarding stale stream result for `{}`", track.title);
            return;
        }
        self.resolving = false;

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Stream resolution failed for `{}`: {e}", track.title);
                self.notifier
                    .notify(&format!("Could not play **{}**: {e}", track.title))
                    .await;
                self.advance().await;
                return;
            }
        };

        match self.session.play(&stream, self.handle.clone()).await {
            Ok(()) => {
                self.state = PlaybackState::Playing;
                info!("Now playing `{}` in guild {}", track.title, self.guild_id);
                self.notifier
                    .notify(&format!("Now playing: **{}**", track.title))
                    .await;
            }
            Err(e) => {
                warn!("Playback start failed for `{}`: {e}", track.title);
                self.notifier
                    .notify(&format!("Could not play **{}**: {e}", track.title))
                    .await;
                self.advance().await;
            }
        }
    }

    async fn on_pause(&mut self) {
        match self.state {
            PlaybackState::Playing => match self.session.pause().await {
                Ok(()) => {
                    self.state = PlaybackState::Paused;
                    self.notifier.notify("Paused.").await;
                }
                Err(e) => {
                    warn!("Pause failed in guild {}: {e}", self.guild_id);
                    self.notifier.notify(&e.to_string()).await;
                }
            },
            PlaybackState::Paused => {
                self.notifier
                    .notify(&PlayerError::AlreadyInState("paused").to_string())
                    .await;
            }
            PlaybackState::Idle => {
                self.notifier
                    .notify(&PlayerError::AlreadyInState("stopped").to_string())
                    .await;
            }
        }
    }

    async fn on_resume(&mut self) {
        match self.state {
            PlaybackState::Paused => match self.session.resume().await {
                Ok(()) => {
                    // A reported no-op resume must leave an armed idle timer
                    // alone, or the auto-disconnect never happens.
                    self.cancel_idle_timer();
                    self.state = PlaybackState::Playing;
                    self.notifier.notify("Resumed.").await;
                }
                Err(e) => {
                    warn!("Resume failed in guild {}: {e}", self.guild_id);
                    self.notifier.notify(&e.to_string()).await;
                }
            },
            PlaybackState::Playing => {
                self.notifier
                    .notify(&PlayerError::AlreadyInState("playing").to_string())
                    .await;
            }
            PlaybackState::Idle => {
                self.notifier
                    .notify(&PlayerError::AlreadyInState("stopped").to_string())
                    .await;
            }
        }
    }

    async fn on_stop(&mut self) {
        info!("Stopping player for guild {}", self.guild_id);
        self.cancel_idle_timer();
        self.resolving = false;
        self.queue.clear(self.guild_id);
        self.state = PlaybackState::Idle;

        // A failed disconnect must not keep the guild stuck; log and move on.
        if let Err(e) = self.session.disconnect().await {
            warn!("Disconnect failed for guild {}: {e}", self.guild_id);
        }
        self.notifier.notify("Disconnected.").await;
    }

    /// Fires at most once per arming. Returns true when the actor should
    /// exit. The state re-check matters: a track may have started, or a
    /// request may have landed, between scheduling and delivery.
    async fn on_idle_timeout(&mut self) -> bool {
        let still_idle = self.state == PlaybackState::Idle
            && !self.resolving
            && self.queue.is_empty(self.guild_id)
            && !self.session.is_playing().await;

        if !still_idle {
            debug!("Ignoring stale idle timeout for guild {}", self.guild_id);
            return false;
        }

        // Shut the mailbox before tearing down: a request racing the timeout
        // has either already landed here, or its sender now sees a closed
        // handle and tells the user to retry. Buffered requests must not be
        // dropped silently, since their senders were told the send succeeded.
        self.rx.close();
        let mut pending = Vec::new();
        while let Ok(cmd) = self.rx.try_recv() {
            if let PlayerCommand::Request(track) = cmd {
                pending.push(track);
            }
        }

        if !pending.is_empty() {
            info!(
                "Request raced the idle timeout in guild {}, keeping the player alive",
                self.guild_id
            );
            let (tx, rx) = mpsc::unbounded_channel();
            self.rx = rx;
            self.handle = PlayerHandle::new(tx);
            self.registry.register(self.guild_id, self.handle.clone());
            for track in pending {
                self.on_request(track).await;
            }
            return false;
        }

        info!(
            "Idle for {}s, leaving voice in guild {}",
            self.idle_timeout.as_secs(),
            self.guild_id
        );
        if let Err(e) = self.session.disconnect().await {
            warn!("Idle disconnect failed for guild {}: {e}", self.guild_id);
        }
        true
    }

    fn start_idle_timer(&mut self) {
        self.cancel_idle_timer();
        debug!(
            "Arming {}s idle timer for guild {}",
            self.idle_timeout.as_secs(),
            self.guild_id
        );

        let handle = self.handle.clone();
        let timeout = self.idle_timeout;
        self.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            handle.send(PlayerCommand::IdleTimeout);
        }));
    }

    fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::StreamSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeResolver {
        delay: Duration,
        fail_marker: Option<&'static str>,
    }

    impl FakeResolver {
        fn instant() -> Self {
            Self {
                delay: Duration::ZERO,
                fail_marker: None,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                fail_marker: None,
            }
        }

        fn failing_on(marker: &'static str) -> Self {
            Self {
                delay: Duration::ZERO,
                fail_marker: Some(marker),
            }
        }
    }

    #[async_trait]
    impl TrackResolver for FakeResolver {
        async fn resolve_identity(&self, query: &str) -> Result<TrackRequest, PlayerError> {
            Ok(TrackRequest {
                url: format!("https://example.com/watch/{query}"),
                title: query.to_string(),
            })
        }

        async fn resolve_stream(&self, url: &str) -> Result<StreamSource, PlayerError> {
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(marker) = self.fail_marker {
                if url.contains(marker) {
                    return Err(PlayerError::ResolutionFailure("extractor blew up".into()));
                }
            }
            Ok(StreamSource {
                url: format!("{url}/stream"),
                title: url.rsplit('/').next().unwrap_or("unknown").to_string(),
            })
        }
    }

    #[derive(Default)]
    struct FakeSession {
        played: Mutex<Vec<String>>,
        pauses: AtomicUsize,
        resumes: AtomicUsize,
        disconnected: AtomicBool,
    }

    impl FakeSession {
        fn played(&self) -> Vec<String> {
            self.played.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VoiceSession for FakeSession {
        async fn play(
            &self,
            stream: &StreamSource,
            _on_complete: PlayerHandle,
        ) -> Result<(), PlayerError> {
            self.played.lock().unwrap().push(stream.title.clone());
            Ok(())
        }

        async fn pause(&self) -> Result<(), PlayerError> {
            self.pauses.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn resume(&self) -> Result<(), PlayerError> {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_playing(&self) -> bool {
            false
        }

        async fn is_paused(&self) -> bool {
            false
        }

        async fn disconnect(&self) -> Result<(), PlayerError> {
            self.disconnected.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl FakeNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }

        fn contains(&self, needle: &str) -> bool {
            self.messages().iter().any(|m| m.contains(needle))
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn notify(&self, text: &str) {
            self.messages.lock().unwrap().push(text.to_string());
        }
    }

    struct Rig {
        handle: PlayerHandle,
        session: Arc<FakeSession>,
        notifier: Arc<FakeNotifier>,
        queue: Arc<QueueStore>,
        registry: Arc<PlayerRegistry>,
        guild_id: GuildId,
    }

    const IDLE: Duration = Duration::from_secs(300);

    fn rig(resolver: FakeResolver) -> Rig {
        rig_for_guild(GuildId(1), resolver, &Arc::new(QueueStore::new()), &Arc::new(PlayerRegistry::new()))
    }

    fn rig_for_guild(
        guild_id: GuildId,
        resolver: FakeResolver,
        queue: &Arc<QueueStore>,
        registry: &Arc<PlayerRegistry>,
    ) -> Rig {
        let session = Arc::new(FakeSession::default());
        let notifier = Arc::new(FakeNotifier::default());
        let handle = PlayerActor::spawn(
            guild_id,
            Arc::clone(queue),
            Arc::clone(registry),
            Arc::new(resolver),
            session.clone() as Arc<dyn VoiceSession>,
            notifier.clone() as Arc<dyn Notifier>,
            IDLE,
        );
        Rig {
            handle,
            session,
            notifier,
            queue: Arc::clone(queue),
            registry: Arc::clone(registry),
            guild_id,
        }
    }

    fn track(title: &str) -> TrackRequest {
        TrackRequest {
            url: format!("https://example.com/watch/{title}"),
            title: title.to_string(),
        }
    }

    /// Lets the actor and any spawned resolution tasks run to quiescence.
    /// Under paused time the sleep auto-advances once nothing is runnable.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn request_while_idle_starts_playback() {
        let rig = rig(FakeResolver::instant());

        assert!(rig.handle.request(track("songA")));
        settle().await;

        assert_eq!(rig.session.played(), ["songA"]);
        assert!(rig.notifier.contains("Now playing: **songA**"));
        assert!(rig.queue.is_empty(rig.guild_id));
    }

    #[tokio::test(start_paused = true)]
    async fn request_while_playing_appends_without_interrupting() {
        let rig = rig(FakeResolver::instant());

        rig.handle.request(track("songA"));
        settle().await;
        rig.handle.request(track("songB"));
        settle().await;

        assert_eq!(rig.session.played(), ["songA"]);
        assert!(rig.notifier.contains("Added to the queue: **songB**"));
        let pending: Vec<String> = rig
            .queue
            .snapshot(rig.guild_id)
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(pending, ["songB"]);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_advances_to_next_track() {
        let rig = rig(FakeResolver::instant());

        rig.handle.request(track("songA"));
        settle().await;
        rig.handle.request(track("songB"));
        settle().await;

        rig.handle.playback_finished();
        settle().await;

        assert_eq!(rig.session.played(), ["songA", "songB"]);
        assert!(rig.notifier.contains("Now playing: **songB**"));
        assert!(rig.queue.is_empty(rig.guild_id));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_with_empty_queue_disconnects_after_timeout() {
        let rig = rig(FakeResolver::instant());

        rig.handle.request(track("songA"));
        settle().await;
        rig.handle.playback_finished();
        settle().await;

        assert!(!rig.session.disconnected.load(Ordering::SeqCst));

        tokio::time::sleep(IDLE + Duration::from_secs(1)).await;
        settle().await;

        assert!(rig.session.disconnected.load(Ordering::SeqCst));
        assert!(rig.registry.get(rig.guild_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn new_request_cancels_pending_idle_timer() {
        let rig = rig(FakeResolver::instant());

        rig.handle.request(track("songA"));
        settle().await;
        rig.handle.playback_finished();
        settle().await;

        // Deep into the idle window, but before expiry.
        tokio::time::sleep(IDLE - Duration::from_secs(10)).await;
        rig.handle.request(track("songB"));
        settle().await;

        tokio::time::sleep(IDLE + Duration::from_secs(1)).await;
        settle().await;

        assert!(!rig.session.disconnected.load(Ordering::SeqCst));
        assert_eq!(rig.session.played(), ["songA", "songB"]);
    }

    #[tokio::test(start_paused = true)]
    async fn noop_resume_keeps_the_idle_timer_armed() {
        let rig = rig(FakeResolver::instant());

        rig.handle.request(track("songA"));
        settle().await;
        rig.handle.playback_finished();
        settle().await;

        // Nothing is paused, so this is a reported no-op; the armed timer
        // must survive it.
        rig.handle.resume();
        settle().await;
        assert!(rig.notifier.contains("Already stopped."));

        tokio::time::sleep(IDLE + Duration::from_secs(1)).await;
        settle().await;

        assert!(rig.session.disconnected.load(Ordering::SeqCst));
        assert!(rig.registry.get(rig.guild_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn request_racing_the_idle_timeout_still_plays() {
        let rig = rig(FakeResolver::instant());

        rig.handle.request(track("songA"));
        settle().await;
        rig.handle.playback_finished();
        settle().await;

        // The timeout has fired but the actor has not run yet; a request
        // lands in the mailbox right behind it.
        rig.handle.send(PlayerCommand::IdleTimeout);
        assert!(rig.handle.request(track("songB")));
        settle().await;

        assert!(!rig.session.disconnected.load(Ordering::SeqCst));
        assert_eq!(rig.session.played(), ["songA", "songB"]);
        assert!(rig.registry.get(rig.guild_id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_idle_timeout_does_not_disconnect_active_session() {
        let rig = rig(FakeResolver::instant());

        rig.handle.request(track("songA"));
        settle().await;

        // Simulates a timer that was already in the mailbox when playback
        // started.
        rig.handle.send(PlayerCommand::IdleTimeout);
        settle().await;

        assert!(!rig.session.disconnected.load(Ordering::SeqCst));
        assert!(rig.registry.get(rig.guild_id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_resolution_discards_the_result() {
        let rig = rig(FakeResolver::slow(Duration::from_secs(5)));

        rig.handle.request(track("songA"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        rig.handle.stop();
        settle().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        assert!(rig.session.played().is_empty());
        assert!(rig.session.disconnected.load(Ordering::SeqCst));
        assert!(rig.registry.get(rig.guild_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_resolution_reports_and_plays_next() {
        let rig = rig(FakeResolver::failing_on("broken"));

        rig.handle.request(track("broken"));
        rig.handle.request(track("songB"));
        settle().await;

        assert_eq!(rig.session.played(), ["songB"]);
        assert!(rig.notifier.contains("Could not play **broken**"));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_requests_start_playback_exactly_once() {
        let rig = rig(FakeResolver::slow(Duration::from_millis(50)));

        rig.handle.request(track("one"));
        rig.handle.request(track("two"));
        rig.handle.request(track("three"));
        settle().await;

        assert_eq!(rig.session.played(), ["one"]);
        let pending: Vec<String> = rig
            .queue
            .snapshot(rig.guild_id)
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(pending, ["two", "three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_follow_the_state_machine() {
        let rig = rig(FakeResolver::instant());

        rig.handle.request(track("songA"));
        settle().await;

        rig.handle.pause();
        settle().await;
        assert_eq!(rig.session.pauses.load(Ordering::SeqCst), 1);

        rig.handle.pause();
        settle().await;
        assert!(rig.notifier.contains("Already paused."));
        assert_eq!(rig.session.pauses.load(Ordering::SeqCst), 1);

        rig.handle.resume();
        settle().await;
        assert_eq!(rig.session.resumes.load(Ordering::SeqCst), 1);

        rig.handle.resume();
        settle().await;
        assert!(rig.notifier.contains("Already playing."));
        assert_eq!(rig.session.resumes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_when_nothing_plays_is_a_reported_noop() {
        let rig = rig(FakeResolver::instant());

        rig.handle.pause();
        settle().await;

        assert!(rig.notifier.contains("Already stopped."));
        assert_eq!(rig.session.pauses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_queue_and_disconnects() {
        let rig = rig(FakeResolver::instant());

        rig.handle.request(track("songA"));
        settle().await;
        rig.handle.request(track("songB"));
        rig.handle.request(track("songC"));
        settle().await;

        rig.handle.stop();
        settle().await;

        assert!(rig.queue.is_empty(rig.guild_id));
        assert!(rig.session.disconnected.load(Ordering::SeqCst));
        assert!(rig.notifier.contains("Disconnected."));
        assert!(rig.registry.get(rig.guild_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn guilds_are_fully_independent() {
        let queue = Arc::new(QueueStore::new());
        let registry = Arc::new(PlayerRegistry::new());

        let a = rig_for_guild(GuildId(1), FakeResolver::instant(), &queue, &registry);
        let b = rig_for_guild(GuildId(2), FakeResolver::slow(Duration::from_secs(30)), &queue, &registry);

        a.handle.request(track("fast"));
        b.handle.request(track("slow"));
        settle().await;

        // Guild 1 plays immediately even though guild 2 is stuck resolving.
        assert_eq!(a.session.played(), ["fast"]);
        assert!(b.session.played().is_empty());

        a.handle.stop();
        settle().await;

        assert!(registry.get(GuildId(1)).is_none());
        assert!(registry.get(GuildId(2)).is_some());
        assert!(!b.session.disconnected.load(Ordering::SeqCst));
    }
}
