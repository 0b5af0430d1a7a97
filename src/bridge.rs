//! Top-level facade wiring the registry, logs, persistence and arbiter
//! together behind one handle.

use std::path::Path;
use std::sync::Arc;

use crate::action::Action;
use crate::adapter::EmulatorAdapter;
use crate::agent::{Agent, AgentId};
use crate::arbiter::{BridgeConfig, SubmitHandle, TurnArbiter};
use crate::chat::{ChatKind, ChatLog, ChatMessage, ChatStream};
use crate::error::BridgeResult;
use crate::log::{EventLog, LogStream, TurnRecord};
use crate::persist::{CheckpointId, PersistenceManager, SaveCheckpoint};
use crate::registry::AgentRegistry;
use crate::world::WorldSnapshot;

/// The memory bridge: one emulator, many agents, strict turn order.
///
/// All mutation funnels through the arbiter's worker thread; everything the
/// facade adds on top is registration plumbing and the spectator surface.
pub struct MemoryBridge {
    arbiter: TurnArbiter,
    registry: Arc<AgentRegistry>,
    log: EventLog,
    chat: ChatLog,
}

impl MemoryBridge {
    /// Builds a bridge over `adapter` with an in-memory event log and no
    /// checkpoint store.
    pub fn new(adapter: Box<dyn EmulatorAdapter>, config: BridgeConfig) -> Self {
        Self::build(adapter, config, EventLog::new(), None)
    }

    /// Builds a bridge with a durable event log and checkpoint store rooted
    /// at `dir`.
    ///
    /// Replays any existing log file, so sequences continue across restarts.
    pub fn open(
        adapter: Box<dyn EmulatorAdapter>,
        config: BridgeConfig,
        dir: impl AsRef<Path>,
    ) -> BridgeResult<Self> {
        let dir = dir.as_ref();
        let log = EventLog::open_durable(&dir.join("turns.log"))?;
        let persistence = PersistenceManager::open(dir.join("checkpoints"))?;
        Ok(Self::build(adapter, config, log, Some(persistence)))
    }

    fn build(
        adapter: Box<dyn EmulatorAdapter>,
        config: BridgeConfig,
        log: EventLog,
        persistence: Option<PersistenceManager>,
    ) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let chat = ChatLog::new();
        let arbiter = TurnArbiter::new(
            adapter,
            Arc::clone(&registry),
            log.clone(),
            chat.clone(),
            persistence,
            config,
        );
        Self {
            arbiter,
            registry,
            log,
            chat,
        }
    }

    /// Registers an agent and announces the join to spectators.
    ///
    /// # Errors
    /// `DuplicateName` if an active agent already holds the name,
    /// `EmptyName` if the trimmed name is empty.
    pub fn register(&self, name: &str) -> BridgeResult<AgentId> {
        let id = self.registry.register(name)?;
        let tick = self
            .arbiter
            .current_snapshot()
            .map_or(0, |snap| snap.tick);
        self.chat.append(
            tick,
            "world",
            format!("{} has entered the world", name.trim()),
            ChatKind::Join,
        );
        Ok(id)
    }

    /// Removes an agent. Unknown ids are ignored.
    pub fn unregister(&self, id: AgentId) {
        self.registry.unregister(id);
    }

    /// Marks an agent live, reviving it if it had timed out.
    ///
    /// # Errors
    /// `UnknownAgent` if the id was never registered or was removed.
    pub fn heartbeat(&self, id: AgentId) -> BridgeResult<()> {
        self.registry.heartbeat(id)
    }

    /// Submits an action and waits for its turn record.
    pub fn submit(&self, id: AgentId, action: Action) -> BridgeResult<TurnRecord> {
        self.arbiter.submit(id, action)
    }

    /// Submits an action, returning a handle to await or withdraw it.
    pub fn submit_async(&self, id: AgentId, action: Action) -> BridgeResult<SubmitHandle> {
        self.arbiter.submit_async(id, action)
    }

    /// Posts a chat line on behalf of an agent.
    ///
    /// # Errors
    /// `UnknownAgent` if the id is not registered.
    pub fn say(&self, id: AgentId, text: impl Into<String>) -> BridgeResult<ChatMessage> {
        let agent = self
            .registry
            .get(id)
            .ok_or(crate::error::AdmissionError::UnknownAgent { agent_id: id })?;
        let tick = self
            .arbiter
            .current_snapshot()
            .map_or(0, |snap| snap.tick);
        Ok(self.chat.append(tick, agent.name, text, ChatKind::Chat))
    }

    /// Captures a checkpoint at the next quiescent point.
    pub fn checkpoint(&self) -> BridgeResult<SaveCheckpoint> {
        self.arbiter.checkpoint()
    }

    /// Restores a stored checkpoint wholesale.
    pub fn restore(&self, id: CheckpointId) -> BridgeResult<WorldSnapshot> {
        self.arbiter.restore(id)
    }

    /// A read-only handle for observers.
    #[must_use]
    pub fn spectator(&self) -> SpectatorView {
        SpectatorView {
            registry: Arc::clone(&self.registry),
            log: self.log.clone(),
            chat: self.chat.clone(),
            snapshot: self.arbiter.snapshot_handle(),
        }
    }

    /// The most recently published world snapshot.
    pub fn current_snapshot(&self) -> Option<Arc<WorldSnapshot>> {
        self.arbiter.current_snapshot()
    }

    /// Registered agents, including disconnected ones.
    pub fn agents(&self) -> Vec<Agent> {
        self.registry.list()
    }
}

/// Read-only view for spectators.
///
/// Holds no submit or registry mutation capability; cloning is cheap and a
/// view stays valid after the bridge itself is dropped (streams simply stop
/// growing).
#[derive(Clone)]
pub struct SpectatorView {
    registry: Arc<AgentRegistry>,
    log: EventLog,
    chat: ChatLog,
    snapshot: Arc<std::sync::RwLock<Option<Arc<WorldSnapshot>>>>,
}

impl SpectatorView {
    /// The most recently published world snapshot.
    pub fn current_snapshot(&self) -> Option<Arc<WorldSnapshot>> {
        self.snapshot.read().ok().and_then(|s| s.clone())
    }

    /// Turn records after `since`, as a restartable stream.
    #[must_use]
    pub fn stream_since(&self, since: u64) -> LogStream {
        self.log.stream_since(since)
    }

    /// Chat messages after `since`, as a restartable stream.
    #[must_use]
    pub fn chat_since(&self, since: u64) -> ChatStream {
        self.chat.stream_since(since)
    }

    /// The most recent `n` chat messages, oldest first.
    #[must_use]
    pub fn recent_chat(&self, n: usize) -> Vec<ChatMessage> {
        self.chat.recent(n)
    }

    /// Registered agents, including disconnected ones.
    #[must_use]
    pub fn agents(&self) -> Vec<Agent> {
        self.registry.list()
    }

    /// Sequence number of the newest turn record.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.log.last_sequence()
    }
}
