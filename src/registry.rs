//! Agent registry: admission control for participants.
//!
//! The registry decides who may submit at all. Liveness is heartbeat-driven:
//! an agent silent beyond the configured timeout transitions to
//! `Disconnected` and is skipped in round-robin turn order, but its record is
//! kept so history and reputation held by external collaborators stay
//! attached to the same id after a reconnect.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::agent::{Agent, AgentId, AgentStatus};
use crate::error::{AdmissionError, BridgeError, BridgeResult};
use crate::world::WorldSnapshot;

#[derive(Debug, Default)]
struct RegistryInner {
    // Registration order; turn_position indexes into this ordering.
    agents: Vec<Agent>,
    next_position: u32,
}

/// Thread-safe registry of connected agents.
///
/// Shared between submitting callers and the arbiter worker via `Arc`.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    inner: Mutex<RegistryInner>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new agent, or revives a disconnected one by the same name.
    ///
    /// Reviving returns the original id, preserving continuity for turn
    /// history and external reputation.
    ///
    /// # Errors
    /// [`AdmissionError::EmptyName`] for a blank name,
    /// [`AdmissionError::DuplicateName`] if an *active* agent already holds it.
    pub fn register(&self, name: &str) -> BridgeResult<AgentId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AdmissionError::EmptyName.into());
        }

        let mut inner = self.lock()?;
        if let Some(existing) = inner.agents.iter_mut().find(|a| a.name == name) {
            if existing.is_active() {
                return Err(AdmissionError::DuplicateName {
                    name: name.to_string(),
                }
                .into());
            }
            existing.status = AgentStatus::Active;
            existing.last_seen = Utc::now();
            return Ok(existing.id);
        }

        let position = inner.next_position;
        inner.next_position += 1;
        let agent = Agent::new(name, position);
        let id = agent.id;
        inner.agents.push(agent);
        Ok(id)
    }

    /// Removes an agent entirely. Idempotent: unknown ids are a no-op.
    pub fn unregister(&self, id: AgentId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.agents.retain(|a| a.id != id);
        }
    }

    /// Resets the agent's liveness timer, reviving it if it had timed out.
    ///
    /// # Errors
    /// [`AdmissionError::UnknownAgent`] if the id is not registered.
    pub fn heartbeat(&self, id: AgentId) -> BridgeResult<()> {
        let mut inner = self.lock()?;
        let agent = inner
            .agents
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(AdmissionError::UnknownAgent { agent_id: id })?;
        agent.last_seen = Utc::now();
        agent.status = AgentStatus::Active;
        Ok(())
    }

    /// Marks agents silent beyond `timeout` as disconnected.
    ///
    /// Returns the ids that transitioned on this sweep.
    pub fn expire_stale(&self, timeout: Duration) -> Vec<AgentId> {
        let now = Utc::now();
        let mut expired = Vec::new();
        let Ok(mut inner) = self.inner.lock() else {
            return expired;
        };
        for agent in &mut inner.agents {
            if !agent.is_active() {
                continue;
            }
            let silent = now
                .signed_duration_since(agent.last_seen)
                .to_std()
                .unwrap_or_default();
            if silent > timeout {
                agent.status = AgentStatus::Disconnected;
                expired.push(agent.id);
            }
        }
        expired
    }

    /// Looks up an agent by id.
    pub fn get(&self, id: AgentId) -> Option<Agent> {
        let inner = self.inner.lock().ok()?;
        inner.agents.iter().find(|a| a.id == id).cloned()
    }

    /// Returns true if the id is registered (active or disconnected).
    pub fn contains(&self, id: AgentId) -> bool {
        self.get(id).is_some()
    }

    /// Registration-ordered listing for spectators.
    pub fn list(&self) -> Vec<Agent> {
        self.inner
            .lock()
            .map(|inner| inner.agents.clone())
            .unwrap_or_default()
    }

    /// Ids of active agents in fixed turn order.
    pub fn active_in_turn_order(&self) -> Vec<AgentId> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .agents
                    .iter()
                    .filter(|a| a.is_active())
                    .map(|a| a.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of registered agents, disconnected included.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.agents.len()).unwrap_or(0)
    }

    /// Returns true if no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes post-turn bookkeeping back to the acting agent's record.
    ///
    /// Called by the arbiter after each applied action, mirroring how the
    /// original server refreshed `last_seen` and counted actions per agent.
    pub fn record_turn(&self, id: AgentId, snapshot: &WorldSnapshot) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(agent) = inner.agents.iter_mut().find(|a| a.id == id) {
                agent.x = snapshot.x;
                agent.y = snapshot.y;
                agent.map_id = snapshot.map_id;
                agent.action_count += 1;
                agent.last_seen = Utc::now();
            }
        }
    }

    /// Snapshot of every record, for checkpointing.
    pub fn export(&self) -> Vec<Agent> {
        self.list()
    }

    /// Replaces the registry wholesale from a checkpoint.
    pub fn import(&self, agents: Vec<Agent>) -> BridgeResult<()> {
        let mut inner = self.lock()?;
        inner.next_position = agents
            .iter()
            .map(|a| a.turn_position + 1)
            .max()
            .unwrap_or(0);
        inner.agents = agents;
        Ok(())
    }

    fn lock(&self) -> BridgeResult<std::sync::MutexGuard<'_, RegistryInner>> {
        self.inner
            .lock()
            .map_err(|_| BridgeError::internal("agent registry lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_increasing_turn_positions() {
        let registry = AgentRegistry::new();
        let a = registry.register("A").unwrap();
        let b = registry.register("B").unwrap();

        assert_ne!(a, b);
        assert_eq!(registry.get(a).unwrap().turn_position, 0);
        assert_eq!(registry.get(b).unwrap().turn_position, 1);
    }

    #[test]
    fn duplicate_active_name_is_rejected() {
        let registry = AgentRegistry::new();
        registry.register("Koolie").unwrap();

        let err = registry.register("Koolie").unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Admission(AdmissionError::DuplicateName { .. })
        ));
    }

    #[test]
    fn empty_name_is_rejected() {
        let registry = AgentRegistry::new();
        let err = registry.register("   ").unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Admission(AdmissionError::EmptyName)
        ));
    }

    #[test]
    fn reregistering_disconnected_name_revives_same_id() {
        let registry = AgentRegistry::new();
        let id = registry.register("Scout-7").unwrap();

        // Force a timeout.
        registry.expire_stale(Duration::ZERO);
        assert!(!registry.get(id).unwrap().is_active());

        let revived = registry.register("Scout-7").unwrap();
        assert_eq!(revived, id);
        assert!(registry.get(id).unwrap().is_active());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = AgentRegistry::new();
        let id = registry.register("A").unwrap();

        registry.unregister(id);
        registry.unregister(id);
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn heartbeat_unknown_agent_fails() {
        let registry = AgentRegistry::new();
        let err = registry.heartbeat(AgentId::new()).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Admission(AdmissionError::UnknownAgent { .. })
        ));
    }

    #[test]
    fn expire_stale_skips_already_disconnected() {
        let registry = AgentRegistry::new();
        registry.register("A").unwrap();

        let first = registry.expire_stale(Duration::ZERO);
        assert_eq!(first.len(), 1);
        let second = registry.expire_stale(Duration::ZERO);
        assert!(second.is_empty());
    }

    #[test]
    fn heartbeat_revives_disconnected_agent() {
        let registry = AgentRegistry::new();
        let id = registry.register("A").unwrap();
        registry.expire_stale(Duration::ZERO);

        registry.heartbeat(id).unwrap();
        assert!(registry.get(id).unwrap().is_active());
    }

    #[test]
    fn active_turn_order_skips_disconnected() {
        let registry = AgentRegistry::new();
        let a = registry.register("A").unwrap();
        let b = registry.register("B").unwrap();
        let c = registry.register("C").unwrap();

        registry.expire_stale(Duration::ZERO);
        registry.heartbeat(a).unwrap();
        registry.heartbeat(c).unwrap();

        assert_eq!(registry.active_in_turn_order(), vec![a, c]);
        assert!(registry.contains(b));
    }

    #[test]
    fn export_import_round_trip() {
        let registry = AgentRegistry::new();
        registry.register("A").unwrap();
        registry.register("B").unwrap();
        let exported = registry.export();

        let restored = AgentRegistry::new();
        restored.import(exported.clone()).unwrap();
        assert_eq!(restored.export(), exported);

        // Positions continue after the imported maximum.
        let c = restored.register("C").unwrap();
        assert_eq!(restored.get(c).unwrap().turn_position, 2);
    }
}
