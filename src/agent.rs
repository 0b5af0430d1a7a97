//! Agent identity and registry records.
//!
//! Stable agent IDs are the anchor for turn records and reputation held by
//! external collaborators. A disconnected agent keeps its record (and its id)
//! so history stays attributable after a reconnect.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, stable agent identifier.
///
/// Assigned once at registration and never reused while the record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Creates a new random agent ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an agent ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AgentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AgentId> for Uuid {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

/// Liveness status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Heartbeating within the configured timeout.
    Active,
    /// Silent beyond the timeout; skipped in round-robin, never removed.
    Disconnected,
}

/// A registered participant in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Stable identifier.
    pub id: AgentId,
    /// Display name, unique among active agents.
    pub name: String,
    /// When the agent registered.
    pub registered_at: DateTime<Utc>,
    /// Last heartbeat or applied action.
    pub last_seen: DateTime<Utc>,
    /// Liveness status.
    pub status: AgentStatus,
    /// Fixed slot in registration order, used for round-robin turns.
    pub turn_position: u32,
    /// Last observed X position.
    pub x: u8,
    /// Last observed Y position.
    pub y: u8,
    /// Last observed map id.
    pub map_id: u8,
    /// Number of actions applied on this agent's behalf.
    pub action_count: u64,
}

impl Agent {
    /// Creates a fresh active agent record.
    #[must_use]
    pub fn new(name: impl Into<String>, turn_position: u32) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            name: name.into(),
            registered_at: now,
            last_seen: now,
            status: AgentStatus::Active,
            turn_position,
            x: 0,
            y: 0,
            map_id: 0,
            action_count: 0,
        }
    }

    /// Returns true if the agent is currently active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, AgentStatus::Active)
    }
}
