use std::collections::VecDeque;

use dashmap::DashMap;
use serenity::model::id::GuildId;

use crate::player::TrackRequest;

/// Per-guild FIFO queues of pending tracks.
///
/// Entries are created on first enqueue; an absent entry is equivalent to an
/// empty queue. The map is sharded, so two guilds never contend on a shared
/// lock. Within one guild, all mutation happens from that guild's player
/// actor, which serializes it by construction.
pub struct QueueStore {
    queues: DashMap<GuildId, VecDeque<TrackRequest>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    /// Appends to the tail of the guild's queue, creating it if absent.
    pub fn enqueue(&self, guild_id: GuildId, track: TrackRequest) {
        self.queues.entry(guild_id).or_default().push_back(track);
    }

    /// Removes and returns the head of the guild's queue.
    pub fn dequeue_front(&self, guild_id: GuildId) -> Option<TrackRequest> {
        self.queues.get_mut(&guild_id)?.pop_front()
    }

    /// Ordered read-only copy of the pending tracks, for queue listing.
    pub fn snapshot(&self, guild_id: GuildId) -> Vec<TrackRequest> {
        self.queues
            .get(&guild_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, guild_id: GuildId) -> bool {
        self.queues.get(&guild_id).map_or(true, |q| q.is_empty())
    }

    /// Drops every pending track for the guild. Only `stop()` uses this.
    pub fn clear(&self, guild_id: GuildId) {
        self.queues.remove(&guild_id);
    }
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new()
    }
}
