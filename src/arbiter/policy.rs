//! Turn-order policies.
//!
//! The source material only promises "actions execute sequentially", so the
//! scheduling discipline is a pluggable seam: FIFO admits requests in queue
//! order, round-robin enforces a fixed rotation over active agents.

use crate::agent::AgentId;
use crate::registry::AgentRegistry;

/// Built-in policy selection for [`BridgeConfig`](super::BridgeConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPolicyKind {
    /// Admit requests in submission order across all agents.
    #[default]
    Fifo,
    /// Fixed rotation over active agents in registration order.
    RoundRobin,
}

impl TurnPolicyKind {
    pub(crate) fn build(self) -> Box<dyn TurnPolicy> {
        match self {
            Self::Fifo => Box::new(FifoPolicy),
            Self::RoundRobin => Box::new(RoundRobinPolicy::new()),
        }
    }
}

/// Admission decision for the request at the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The agent may act now.
    Granted,
    /// Strict turn order is on and another agent holds the slot.
    NotTurn {
        /// The current slot holder.
        holder: AgentId,
    },
}

/// Decides whose turn it is.
///
/// Called only from the arbiter worker thread, so implementations keep plain
/// mutable state.
pub trait TurnPolicy: Send {
    /// Decides whether `agent` may act on the request being dequeued.
    fn admit(&mut self, agent: AgentId, registry: &AgentRegistry) -> Admission;

    /// Advances the rotation after a turn was served for `agent` (applied or
    /// faulted; a slot rejection does not consume the turn).
    fn on_turn_served(&mut self, agent: AgentId, registry: &AgentRegistry);
}

/// Drain the queue in submission order; every registered agent is admitted.
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoPolicy;

impl TurnPolicy for FifoPolicy {
    fn admit(&mut self, _agent: AgentId, _registry: &AgentRegistry) -> Admission {
        Admission::Granted
    }

    fn on_turn_served(&mut self, _agent: AgentId, _registry: &AgentRegistry) {}
}

/// Fixed rotation over active agents, registration order.
///
/// Disconnected agents are skipped without being removed: the rotation is
/// recomputed from the registry on every admission, so an agent that times
/// out mid-queue simply stops holding slots until it re-registers.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    cursor: Option<AgentId>,
}

impl RoundRobinPolicy {
    /// Creates a rotation with no slot holder yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn holder(&self, order: &[AgentId]) -> Option<AgentId> {
        let cursor = self.cursor?;
        if order.contains(&cursor) {
            Some(cursor)
        } else {
            // Holder disconnected or left: the slot falls to the next agent.
            None
        }
    }
}

impl TurnPolicy for RoundRobinPolicy {
    fn admit(&mut self, agent: AgentId, registry: &AgentRegistry) -> Admission {
        let order = registry.active_in_turn_order();
        if order.is_empty() {
            return Admission::Granted;
        }

        let holder = self.holder(&order).unwrap_or(order[0]);
        self.cursor = Some(holder);

        if agent == holder {
            Admission::Granted
        } else {
            Admission::NotTurn { holder }
        }
    }

    fn on_turn_served(&mut self, agent: AgentId, registry: &AgentRegistry) {
        let order = registry.active_in_turn_order();
        if order.is_empty() {
            self.cursor = None;
            return;
        }
        let next = order
            .iter()
            .position(|&id| id == agent)
            .map_or(order[0], |i| order[(i + 1) % order.len()]);
        self.cursor = Some(next);
    }
}
