use std::sync::Arc;

use dotenvy::dotenv;
use serenity::{
    async_trait,
    client::{Client, Context, EventHandler},
    framework::StandardFramework,
    model::{
        application::command::{Command, CommandOptionType},
        application::interaction::Interaction,
        gateway::Ready,
        prelude::VoiceState,
    },
    prelude::{GatewayIntents, TypeMapKey},
};
use songbird::SerenityInit;
use tracing::info;

use crate::commands::GENERAL_GROUP;
use crate::config::Config;
use crate::player::{PlayerRegistry, QueueStore};
use crate::resolver::{SpotifyClient, TrackResolver, YtDlpResolver};

mod commands;
mod config;
mod error;
mod player;
mod resolver;
mod voice;

struct Handler;

pub struct PlayerManager;

impl TypeMapKey for PlayerManager {
    type Value = Arc<PlayerRegistry>;
}

pub struct QueueManager;

impl TypeMapKey for QueueManager {
    type Value = Arc<QueueStore>;
}

pub struct ResolverManager;

impl TypeMapKey for ResolverManager {
    type Value = Arc<dyn TrackResolver>;
}

pub struct BotConfig;

impl TypeMapKey for BotConfig {
    type Value = Arc<Config>;
}

pub struct BotDataMap;

pub struct BotData {
    pub id: u64,
}

impl TypeMapKey for BotDataMap {
    type Value = BotData;
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        let bot_data = BotData {
            id: ready.user.id.0,
        };
        {
            let data = &mut ctx.data.write().await;
            data.insert::<BotDataMap>(bot_data);
        }

        // Slash mirror of the prefix `play`.
        let registered = Command::create_global_application_command(&ctx.http, |command| {
            command
                .name("play")
                .description("Play a track from a name, a YouTube link or a Spotify link")
                .create_option(|option| {
                    option
                        .name("query")
                        .description("Song name or link")
                        .kind(CommandOptionType::String)
                        .required(true)
                })
        })
        .await;

        if let Err(e) = registered {
            info!("Failed to register the play slash command: {e:?}");
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::ApplicationCommand(command) = interaction {
            if command.data.name == "play" {
                commands::slash_play(&ctx, &command).await;
            }
        }
    }

    // Someone kicked or moved the bot out of the voice channel: stop the
    // guild's player so the queue and state don't outlive the connection.
    async fn voice_state_update(&self, ctx: Context, _: Option<VoiceState>, new: VoiceState) {
        if new.channel_id.is_some() {
            return;
        }

        let (bot_id, registry) = {
            let data = ctx.data.read().await;
            (
                data.get::<BotDataMap>().map(|data| data.id),
                data.get::<PlayerManager>().cloned(),
            )
        };

        if let (Some(bot_id), Some(guild_id), Some(registry)) = (bot_id, new.guild_id, registry) {
            if bot_id == new.user_id.0 {
                if let Some(handle) = registry.get(guild_id) {
                    info!("Bot was disconnected from voice in guild {guild_id}, stopping player");
                    handle.stop();
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt::init();

    let config = Arc::new(Config::from_env());

    let spotify = match (&config.spotify_client_id, &config.spotify_client_secret) {
        (Some(id), Some(secret)) => Some(SpotifyClient::new(id.clone(), secret.clone())),
        _ => {
            info!("Spotify credentials not set, spotify links will fall back to plain search");
            None
        }
    };
    let resolver: Arc<dyn TrackResolver> = Arc::new(YtDlpResolver::new(spotify));

    let framework = StandardFramework::new()
        .configure(|c| c.prefix("!"))
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(Handler)
        .framework(framework)
        .register_songbird()
        .await
        .expect("Err creating client");

    {
        let mut w = client.data.write().await;

        w.insert::<PlayerManager>(Arc::new(PlayerRegistry::new()));
        w.insert::<QueueManager>(Arc::new(QueueStore::new()));
        w.insert::<ResolverManager>(resolver);
        w.insert::<BotConfig>(config);
    }

    tokio::spawn(async move {
        let _ = client
            .start()
            .await
            .map_err(|why| info!("Client ended: {why:?}"));
    });

    tokio::signal::ctrl_c()
        .await
        .expect("Control-C interruption failed!");

    info!("Received Ctrl-C, shutting down.");
}
