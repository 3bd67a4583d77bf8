use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serenity::client::Context;
use serenity::framework::standard::macros::{command, group};
use serenity::framework::standard::{Args, CommandError, CommandResult};
use serenity::http::Http;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::channel::Message;
use serenity::model::guild::Guild;
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::Result as SerenityResult;
use tracing::info;

use crate::error::PlayerError;
use crate::player::{Notifier, PlayerActor, PlayerHandle, PlayerRegistry, QueueStore};
use crate::resolver::TrackResolver;
use crate::voice::SongbirdSession;
use crate::{BotConfig, PlayerManager, QueueManager, ResolverManager};

#[group]
#[commands(play, pause, resume, stop, queue, help)]
struct General;

#[command]
#[only_in(guilds)]
async fn play(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let user_input = args.message().trim();
    if user_input.is_empty() {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "Give me a song name or a link.")
                .await,
        );
        return Ok(());
    }

    info!("User input is {user_input}");

    let guild_id = get_guild_id(ctx, msg)?;
    if let Err(reply) =
        enqueue_track(ctx, guild_id, msg.author.id, msg.channel_id, user_input).await
    {
        check_msg(msg.channel_id.say(&ctx.http, reply).await);
    }

    Ok(())
}

/// Slash variant of `play`. Defers the response first so a slow resolution
/// does not run into the interaction deadline.
pub async fn slash_play(ctx: &Context, interaction: &ApplicationCommandInteraction) {
    let query = interaction
        .data
        .options
        .first()
        .and_then(|option| option.value.as_ref())
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    let guild_id = match interaction.guild_id {
        Some(guild_id) => guild_id,
        None => return,
    };

    if let Err(e) = interaction.defer(&ctx.http).await {
        info!("Failed to defer interaction: {e:?}");
        return;
    }

    let reply = if query.is_empty() {
        "Give me a song name or a link.".to_string()
    } else {
        match enqueue_track(
            ctx,
            guild_id,
            interaction.user.id,
            interaction.channel_id,
            &query,
        )
        .await
        {
            Ok(title) => format!("Queued: **{title}**"),
            Err(reply) => reply,
        }
    };

    if let Err(e) = interaction
        .edit_original_interaction_response(&ctx.http, |response| response.content(reply))
        .await
    {
        info!("Error editing interaction response: {e:?}");
    }
}

/// Resolves the input and hands the track to the guild's player, spawning
/// one if needed. Shared by the prefix and slash `play`. Returns the track
/// title on success and a user-facing message on failure.
async fn enqueue_track(
    ctx: &Context,
    guild_id: GuildId,
    author_id: UserId,
    text_channel: ChannelId,
    user_input: &str,
) -> Result<String, String> {
    let (registry, store, resolver, idle_timeout) =
        shared_state(ctx).await.map_err(|e| e.to_string())?;

    // Identity resolution is network-bound and runs here, before the
    // guild's player is involved, so a slow lookup never stalls the mailbox.
    let track = resolver
        .resolve_identity(user_input)
        .await
        .map_err(|e| e.to_string())?;
    let title = track.title.clone();

    let handle = match registry.get(guild_id) {
        Some(handle) => handle,
        None => connect_player(
            ctx,
            guild_id,
            author_id,
            text_channel,
            registry,
            store,
            resolver,
            idle_timeout,
        )
        .await
        .map_err(|e| e.to_string())?,
    };

    if !handle.request(track) {
        return Err("The player just shut down, try again.".to_string());
    }

    Ok(title)
}

#[command]
#[only_in(guilds)]
async fn pause(ctx: &Context, msg: &Message) -> CommandResult {
    dispatch(ctx, msg, PlayerHandle::pause).await
}

#[command]
#[only_in(guilds)]
async fn resume(ctx: &Context, msg: &Message) -> CommandResult {
    dispatch(ctx, msg, PlayerHandle::resume).await
}

#[command]
#[only_in(guilds)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    dispatch(ctx, msg, PlayerHandle::stop).await
}

#[command]
#[only_in(guilds)]
async fn queue(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    let store = {
        let data = ctx.data.read().await;
        data.get::<QueueManager>()
            .ok_or_else(|| CommandError::from("Queue store missing"))?
            .clone()
    };

    let tracks = store.snapshot(guild_id);
    if tracks.is_empty() {
        check_msg(msg.channel_id.say(&ctx.http, "The queue is empty!").await);
        return Ok(());
    }

    let max_tracks = 20;
    let mut lines: Vec<String> = Vec::with_capacity(min(tracks.len(), max_tracks));
    for (index, track) in tracks.iter().take(max_tracks).enumerate() {
        lines.push(format!("{} - {}", index + 1, track.title));
    }
    let formatted = lines.join("\n");

    check_msg(
        msg.channel_id
            .say(&ctx.http, format!("**Queue**:\n```{formatted}```"))
            .await,
    );

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    let message = r#"
**Commands:**
    **play [URL|Title]** - Plays (or adds to the queue) a track given a YouTube/Spotify link or a title.
    **pause** - Pauses the current track.
    **resume** - Resumes the currently paused track.
    **stop** - Stops playback, clears the queue and leaves the channel.
    **queue** - Shows the queue of tracks.
    "#;

    check_msg(msg.channel_id.say(&ctx.http, message).await);

    Ok(())
}

/// Routes a parameterless command to the guild's player, if one is running.
async fn dispatch(
    ctx: &Context,
    msg: &Message,
    op: impl FnOnce(&PlayerHandle) -> bool,
) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    let handle = {
        let data = ctx.data.read().await;
        data.get::<PlayerManager>()
            .ok_or_else(|| CommandError::from("Player registry missing"))?
            .get(guild_id)
    };

    match handle {
        Some(handle) => {
            op(&handle);
        }
        None => check_msg(msg.reply(ctx, "Not in a voice channel").await),
    }

    Ok(())
}

type SharedState = (
    Arc<PlayerRegistry>,
    Arc<QueueStore>,
    Arc<dyn TrackResolver>,
    Duration,
);

async fn shared_state(ctx: &Context) -> Result<SharedState, CommandError> {
    let data = ctx.data.read().await;
    Ok((
        data.get::<PlayerManager>()
            .ok_or_else(|| CommandError::from("Player registry missing"))?
            .clone(),
        data.get::<QueueManager>()
            .ok_or_else(|| CommandError::from("Queue store missing"))?
            .clone(),
        data.get::<ResolverManager>()
            .ok_or_else(|| CommandError::from("Resolver missing"))?
            .clone(),
        data.get::<BotConfig>()
            .ok_or_else(|| CommandError::from("Config missing"))?
            .idle_timeout,
    ))
}

/// Joins the requester's voice channel and spawns a player for the guild.
#[allow(clippy::too_many_arguments)]
async fn connect_player(
    ctx: &Context,
    guild_id: GuildId,
    author_id: UserId,
    text_channel: ChannelId,
    registry: Arc<PlayerRegistry>,
    store: Arc<QueueStore>,
    resolver: Arc<dyn TrackResolver>,
    idle_timeout: Duration,
) -> Result<PlayerHandle, PlayerError> {
    let connect_to = ctx
        .cache
        .guild(guild_id)
        .and_then(|guild| {
            guild
                .voice_states
                .get(&author_id)
                .and_then(|voice_state| voice_state.channel_id)
        })
        .ok_or(PlayerError::NotInVoiceChannel)?;

    let manager = songbird::get(ctx)
        .await
        .expect("Songbird Voice client placed in at initialisation.")
        .clone();

    let _ = manager.join(guild_id, connect_to).await;
    let call = manager
        .get(guild_id)
        .ok_or_else(|| PlayerError::Voice("could not join the voice channel".to_string()))?;

    {
        let mut call = call.lock().await;
        if !call.is_deaf() {
            if let Err(e) = call.deafen(true).await {
                info!("Deafen failed due to {e:?}");
            }
        }
    }

    let session = Arc::new(SongbirdSession::new(manager, guild_id));
    let notifier = Arc::new(ChannelNotifier {
        http: ctx.http.clone(),
        channel_id: text_channel,
    });

    Ok(PlayerActor::spawn(
        guild_id,
        store,
        registry,
        resolver,
        session,
        notifier,
        idle_timeout,
    ))
}

/// Posts player announcements to the text channel the session was started
/// from.
struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, text: &str) {
        check_msg(self.channel_id.say(&self.http, text).await);
    }
}

/// Checks that a message successfully sent; if not, then logs why to stdout.
pub fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

fn get_guild(ctx: &Context, msg: &Message) -> CommandResult<Guild> {
    msg.guild(&ctx.cache)
        .ok_or(CommandError::from("Guild not found"))
}

fn get_guild_id(ctx: &Context, msg: &Message) -> CommandResult<GuildId> {
    let guild_id = get_guild(ctx, msg)?.id;

    Ok(guild_id)
}
