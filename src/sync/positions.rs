//! # Position Board
//!
//! Ephemeral cursor/selection state per user for one document.
//!
//! At most one entry per user; every report replaces the previous entry
//! wholesale. Entries are never persisted.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::document::{EntityId, UserId};

/// What a client reports about its cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMetadata {
    /// Entity (block) the cursor is in, if any
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    pub shortname: String,
    pub display_name: String,
}

/// A user's last reported position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPosition {
    pub user_id: UserId,
    pub entity_id: Option<EntityId>,
    pub shortname: String,
    pub display_name: String,
    pub updated_at: DateTime<Utc>,
}

impl UserPosition {
    fn new(user_id: UserId, metadata: PositionMetadata) -> Self {
        Self {
            user_id,
            entity_id: metadata.entity_id,
            shortname: metadata.shortname,
            display_name: metadata.display_name,
            updated_at: Utc::now(),
        }
    }

    /// No report for longer than `max_age`
    pub fn is_stale(&self, max_age: Duration) -> bool {
        Utc::now() - self.updated_at > max_age
    }
}

/// Positions of everyone viewing a document
#[derive(Debug, Default, Clone)]
pub struct PositionBoard {
    entries: HashMap<UserId, UserPosition>,
}

impl PositionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the user's entry
    pub fn register(&mut self, user_id: UserId, metadata: PositionMetadata) -> UserPosition {
        let position = UserPosition::new(user_id, metadata);
        self.entries.insert(user_id, position.clone());
        position
    }

    /// Drop a user's entry
    pub fn remove(&mut self, user_id: &UserId) -> Option<UserPosition> {
        self.entries.remove(user_id)
    }

    /// All entries except `exclude`, ordered by user id
    pub fn snapshot(&self, exclude: Option<UserId>) -> Vec<UserPosition> {
        let mut positions: Vec<UserPosition> = self
            .entries
            .values()
            .filter(|p| Some(p.user_id) != exclude)
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.user_id);
        positions
    }

    pub fn get(&self, user_id: &UserId) -> Option<&UserPosition> {
        self.entries.get(user_id)
    }

    /// Remove entries not refreshed within `max_age`
    pub fn prune_stale(&mut self, max_age: Duration) -> Vec<UserId> {
        let stale: Vec<UserId> = self
            .entries
            .values()
            .filter(|p| p.is_stale(max_age))
            .map(|p| p.user_id)
            .collect();
        for id in &stale {
            self.entries.remove(id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
