use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serenity::model::id::GuildId;
use tracing::info;

use crate::player::PlayerHandle;

/// Guild to player-handle mapping, created once in `main` and shared through
/// the client's data map. Actors deregister themselves when they exit.
pub struct PlayerRegistry {
    players: DashMap<GuildId, PlayerHandle>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self {
            players: DashMap::new(),
        }
    }

    /// Returns the guild's live handle, if any. A handle whose actor has
    /// already exited counts as absent.
    pub fn get(&self, guild_id: GuildId) -> Option<PlayerHandle> {
        self.players
            .get(&guild_id)
            .map(|r| r.value().clone())
            .filter(|h| !h.is_closed())
    }

    /// Registers `handle` unless a live player already exists for the guild,
    /// in which case the existing handle wins. Returns the handle callers
    /// should use. This closes the race between two play commands both
    /// spinning up a player for the same guild.
    pub fn register(&self, guild_id: GuildId, handle: PlayerHandle) -> PlayerHandle {
        match self.players.entry(guild_id) {
            Entry::Occupied(e) if !e.get().is_closed() => e.get().clone(),
            Entry::Occupied(mut e) => {
                e.insert(handle.clone());
                info!("Registered player for guild {guild_id}");
                handle
            }
            Entry::Vacant(v) => {
                v.insert(handle.clone());
                info!("Registered player for guild {guild_id}");
                handle
            }
        }
    }

    /// Removes the mapping, but only if it still points at `handle`. An
    /// exiting actor must not evict a replacement that was registered after
    /// it decided to shut down.
    pub fn deregister(&self, guild_id: GuildId, handle: &PlayerHandle) {
        if self
            .players
            .remove_if(&guild_id, |_, h| h.same_channel(handle))
            .is_some()
        {
            info!("Removed player for guild {guild_id}");
        }
    }
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
