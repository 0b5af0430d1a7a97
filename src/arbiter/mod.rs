//! Turn arbiter: the single writer of emulator state.
//!
//! Many agents submit concurrently; one worker thread owns the boxed adapter
//! and applies exactly one action at a time. Callers queue on a bounded
//! channel and wait on a reply channel, so a full queue blocks submission
//! rather than surfacing a busy error. Checkpoint and restore run as control
//! jobs on the same thread, which is all the mutual exclusion they need.

pub mod policy;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::action::Action;
use crate::adapter::EmulatorAdapter;
use crate::agent::{Agent, AgentId};
use crate::chat::{ChatKind, ChatLog};
use crate::error::{AdmissionError, BridgeError, BridgeResult, RuntimeError};
use crate::log::{EventLog, RejectReason, TurnDraft, TurnOutcome, TurnRecord};
use crate::persist::{CheckpointId, PersistenceManager, SaveCheckpoint};
use crate::registry::AgentRegistry;
use crate::world::{self, offsets, WorldSnapshot};

use policy::{Admission, TurnPolicy, TurnPolicyKind};

/// Arbiter configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Turn-order policy.
    pub policy: TurnPolicyKind,
    /// Maximum queued action requests before submitters block.
    pub queue_capacity: usize,
    /// Agents silent beyond this are marked disconnected.
    pub heartbeat_timeout: Duration,
    /// How often the worker sweeps the registry for stale agents.
    pub sweep_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            policy: TurnPolicyKind::default(),
            queue_capacity: 256,
            heartbeat_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(100),
        }
    }
}

// Request admission states; see SubmitHandle::withdraw.
const QUEUED: u8 = 0;
const ADMITTED: u8 = 1;
const WITHDRAWN: u8 = 2;

struct TurnJob {
    agent_id: AgentId,
    action: Action,
    state: Arc<AtomicU8>,
    reply: Sender<BridgeResult<TurnRecord>>,
}

enum CtrlJob {
    Checkpoint {
        reply: Sender<BridgeResult<SaveCheckpoint>>,
    },
    Restore {
        checkpoint: Box<SaveCheckpoint>,
        reply: Sender<BridgeResult<WorldSnapshot>>,
    },
}

/// Handle to a submitted action request.
///
/// The request is consumed exactly once: it either runs to a [`TurnRecord`]
/// (or a fault) delivered through [`join`](Self::join), or it is withdrawn
/// before admission and produces nothing.
pub struct SubmitHandle {
    agent_id: AgentId,
    rx: Receiver<BridgeResult<TurnRecord>>,
    state: Arc<AtomicU8>,
}

impl SubmitHandle {
    /// The submitting agent.
    #[must_use]
    pub const fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Withdraws the request if it has not been admitted yet.
    ///
    /// Returns true if the withdrawal won: the request will never touch the
    /// emulator and no turn record will be produced. Returns false if the
    /// arbiter already admitted it; an in-flight action always runs to
    /// completion.
    pub fn withdraw(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, WITHDRAWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Waits for the turn to complete.
    pub fn join(self) -> BridgeResult<TurnRecord> {
        self.rx.recv().map_err(|_| {
            BridgeError::Runtime(RuntimeError::Disconnected {
                path: "turn_reply".to_string(),
            })
        })?
    }

    /// Waits for the turn to complete, withdrawing on timeout.
    ///
    /// If the request was still queued when the timeout fired it is
    /// withdrawn and will produce no record; if it was already in flight it
    /// still runs to completion, but this caller stops waiting.
    pub fn join_timeout(self, timeout: Duration) -> BridgeResult<TurnRecord> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.withdraw();
                Err(RuntimeError::Timeout {
                    duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                }
                .into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(RuntimeError::Disconnected {
                path: "turn_reply".to_string(),
            }
            .into()),
        }
    }
}

/// Serializes concurrent agent actions into a strict turn order.
pub struct TurnArbiter {
    job_tx: Sender<TurnJob>,
    ctrl_tx: Sender<CtrlJob>,
    registry: Arc<AgentRegistry>,
    log: EventLog,
    chat: ChatLog,
    snapshot: Arc<RwLock<Option<Arc<WorldSnapshot>>>>,
    persistence: Option<PersistenceManager>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl TurnArbiter {
    /// Starts the arbiter worker with the policy named in `config`.
    pub fn new(
        adapter: Box<dyn EmulatorAdapter>,
        registry: Arc<AgentRegistry>,
        log: EventLog,
        chat: ChatLog,
        persistence: Option<PersistenceManager>,
        config: BridgeConfig,
    ) -> Self {
        let policy = config.policy.build();
        Self::with_policy(adapter, registry, log, chat, persistence, config, policy)
    }

    /// Starts the arbiter worker with a custom turn policy.
    pub fn with_policy(
        adapter: Box<dyn EmulatorAdapter>,
        registry: Arc<AgentRegistry>,
        log: EventLog,
        chat: ChatLog,
        persistence: Option<PersistenceManager>,
        config: BridgeConfig,
        policy: Box<dyn TurnPolicy>,
    ) -> Self {
        let (job_tx, job_rx) = bounded::<TurnJob>(config.queue_capacity.max(1));
        let (ctrl_tx, ctrl_rx) = bounded::<CtrlJob>(16);
        let snapshot = Arc::new(RwLock::new(None));

        let worker = Worker {
            config: config.clone(),
            adapter,
            policy,
            registry: Arc::clone(&registry),
            log: log.clone(),
            chat: chat.clone(),
            snapshot: Arc::clone(&snapshot),
            persistence: persistence.clone(),
            tick: 0,
        };

        let join = thread::Builder::new()
            .name("aether-arbiter".to_string())
            .spawn(move || worker.run(ctrl_rx, job_rx))
            .expect("failed to spawn arbiter worker");

        Self {
            job_tx,
            ctrl_tx,
            registry,
            log,
            chat,
            snapshot,
            persistence,
            join: Mutex::new(Some(join)),
        }
    }

    /// Submits an action and returns a handle to await or withdraw it.
    ///
    /// Blocks only if the turn queue is full; waiting for the turn itself
    /// happens on the handle.
    ///
    /// # Errors
    /// [`AdmissionError::UnknownAgent`] if the agent is not registered.
    pub fn submit_async(&self, agent_id: AgentId, action: Action) -> BridgeResult<SubmitHandle> {
        if !self.registry.contains(agent_id) {
            return Err(AdmissionError::UnknownAgent { agent_id }.into());
        }

        let state = Arc::new(AtomicU8::new(QUEUED));
        let (reply_tx, reply_rx) = bounded::<BridgeResult<TurnRecord>>(1);
        let job = TurnJob {
            agent_id,
            action,
            state: Arc::clone(&state),
            reply: reply_tx,
        };

        self.job_tx.send(job).map_err(|_| {
            BridgeError::Runtime(RuntimeError::Disconnected {
                path: "turn_queue".to_string(),
            })
        })?;

        Ok(SubmitHandle {
            agent_id,
            rx: reply_rx,
            state,
        })
    }

    /// Submits an action and waits for its turn record.
    pub fn submit(&self, agent_id: AgentId, action: Action) -> BridgeResult<TurnRecord> {
        self.submit_async(agent_id, action)?.join()
    }

    /// Captures a checkpoint at the next quiescent point.
    ///
    /// Waits for any in-flight turn to complete, then runs exclusively on
    /// the worker thread; queued turns resume afterwards.
    pub fn checkpoint(&self) -> BridgeResult<SaveCheckpoint> {
        let (reply_tx, reply_rx) = bounded::<BridgeResult<SaveCheckpoint>>(1);
        self.ctrl_tx
            .send(CtrlJob::Checkpoint { reply: reply_tx })
            .map_err(|_| {
                BridgeError::Runtime(RuntimeError::Disconnected {
                    path: "arbiter_control".to_string(),
                })
            })?;
        reply_rx.recv().map_err(|_| {
            BridgeError::Runtime(RuntimeError::Disconnected {
                path: "arbiter_control".to_string(),
            })
        })?
    }

    /// Restores emulator and registry state wholesale from a stored
    /// checkpoint and republishes the resulting snapshot.
    ///
    /// # Errors
    /// [`RuntimeError::CheckpointNotFound`] if `id` is not stored.
    pub fn restore(&self, id: CheckpointId) -> BridgeResult<WorldSnapshot> {
        let persistence = self
            .persistence
            .as_ref()
            .ok_or_else(|| BridgeError::internal("no persistence manager configured"))?;
        let checkpoint = persistence.load(id)?;

        let (reply_tx, reply_rx) = bounded::<BridgeResult<WorldSnapshot>>(1);
        self.ctrl_tx
            .send(CtrlJob::Restore {
                checkpoint: Box::new(checkpoint),
                reply: reply_tx,
            })
            .map_err(|_| {
                BridgeError::Runtime(RuntimeError::Disconnected {
                    path: "arbiter_control".to_string(),
                })
            })?;
        reply_rx.recv().map_err(|_| {
            BridgeError::Runtime(RuntimeError::Disconnected {
                path: "arbiter_control".to_string(),
            })
        })?
    }

    /// The most recently published snapshot, if any turn has completed.
    ///
    /// Always a specific already-published value, never state mid-mutation.
    pub fn current_snapshot(&self) -> Option<Arc<WorldSnapshot>> {
        self.snapshot.read().ok().and_then(|s| s.clone())
    }

    /// The agent registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The event log.
    #[must_use]
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// The spectator chat stream.
    #[must_use]
    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub(crate) fn snapshot_handle(&self) -> Arc<RwLock<Option<Arc<WorldSnapshot>>>> {
        Arc::clone(&self.snapshot)
    }
}

impl Drop for TurnArbiter {
    fn drop(&mut self) {
        // Close both channels so the worker drains and exits, then join.
        let (dummy_job_tx, _) = bounded::<TurnJob>(1);
        drop(std::mem::replace(&mut self.job_tx, dummy_job_tx));
        let (dummy_ctrl_tx, _) = bounded::<CtrlJob>(1);
        drop(std::mem::replace(&mut self.ctrl_tx, dummy_ctrl_tx));

        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

struct Worker {
    config: BridgeConfig,
    adapter: Box<dyn EmulatorAdapter>,
    policy: Box<dyn TurnPolicy>,
    registry: Arc<AgentRegistry>,
    log: EventLog,
    chat: ChatLog,
    snapshot: Arc<RwLock<Option<Arc<WorldSnapshot>>>>,
    persistence: Option<PersistenceManager>,
    tick: u64,
}

impl Worker {
    fn run(mut self, ctrl_rx: Receiver<CtrlJob>, job_rx: Receiver<TurnJob>) {
        // Publish the boot state so spectators see something before turn 1.
        if let Ok(snap) = self.read_world() {
            self.publish(snap.at_tick(self.tick));
        }

        let mut ctrl_closed = false;
        let mut jobs_closed = false;
        let mut next_sweep = Instant::now() + self.config.sweep_interval;

        loop {
            // The sweep is deadline-driven, not idleness-driven: a saturated
            // turn queue must not postpone liveness expiry.
            if Instant::now() >= next_sweep {
                self.sweep_stale();
                next_sweep = Instant::now() + self.config.sweep_interval;
            }
            let wait = next_sweep.saturating_duration_since(Instant::now());

            // Control jobs (checkpoint/restore) run at the next quiescent
            // point, ahead of queued turns.
            if !ctrl_closed {
                match ctrl_rx.try_recv() {
                    Ok(job) => {
                        self.handle_ctrl(job);
                        continue;
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => ctrl_closed = true,
                }
            }

            // A disconnected receiver is permanently ready, so it must leave
            // the select set once it closes.
            match (ctrl_closed, jobs_closed) {
                (false, false) => select! {
                    recv(ctrl_rx) -> msg => match msg {
                        Ok(job) => self.handle_ctrl(job),
                        Err(_) => ctrl_closed = true,
                    },
                    recv(job_rx) -> msg => match msg {
                        Ok(job) => self.serve_turn(job),
                        Err(_) => jobs_closed = true,
                    },
                    default(wait) => {}
                },
                (true, false) => match job_rx.recv_timeout(wait) {
                    Ok(job) => self.serve_turn(job),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => jobs_closed = true,
                },
                (false, true) => match ctrl_rx.recv_timeout(wait) {
                    Ok(job) => self.handle_ctrl(job),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => ctrl_closed = true,
                },
                (true, true) => break,
            }
        }
    }

    fn sweep_stale(&mut self) {
        for id in self.registry.expire_stale(self.config.heartbeat_timeout) {
            let name = self
                .registry
                .get(id)
                .map_or_else(|| id.to_string(), |a| a.name);
            self.chat.append(
                self.tick,
                "world",
                format!("{name} disconnected (heartbeat timeout)"),
                ChatKind::System,
            );
        }
    }

    fn serve_turn(&mut self, job: TurnJob) {
        // Withdrawn while queued: consumed without a trace, by contract.
        if job
            .state
            .compare_exchange(QUEUED, ADMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match self.policy.admit(job.agent_id, &self.registry) {
            Admission::Granted => {}
            Admission::NotTurn { holder } => {
                let holder_name = self
                    .registry
                    .get(holder)
                    .map_or_else(|| holder.to_string(), |a| a.name);
                // Slot rejections are validation, not world events: no record.
                let _ = job.reply.send(Err(AdmissionError::AgentNotTurn {
                    agent_id: job.agent_id,
                    holder: holder_name,
                }
                .into()));
                return;
            }
        }

        let Some(agent) = self.registry.get(job.agent_id) else {
            // Unregistered between submission and admission.
            let _ = job.reply.send(Err(AdmissionError::UnknownAgent {
                agent_id: job.agent_id,
            }
            .into()));
            return;
        };

        let result = self.execute(&agent, job.action);
        self.policy.on_turn_served(job.agent_id, &self.registry);
        let _ = job.reply.send(result);
    }

    /// Runs one admitted action against the emulator.
    ///
    /// Exactly one emulator mutation, exactly one log append, and the
    /// published snapshot is always the post-action state.
    fn execute(&mut self, agent: &Agent, action: Action) -> BridgeResult<TurnRecord> {
        let pre = match self.read_world() {
            Ok(snap) => snap,
            Err(err) => return self.reject(agent, action, err),
        };

        if let Err(fault) = self.adapter.write_input(&action) {
            let err = BridgeError::adapter_fault(fault.to_string());
            return self.reject(agent, action, err);
        }

        let post = match self.read_world() {
            Ok(snap) => snap,
            Err(err) => return self.reject(agent, action, err),
        };

        self.tick += 1;
        let post = post.at_tick(self.tick);
        let moved = pre.position() != post.position() || pre.map_id != post.map_id;
        let changed = world::diff(&pre, &post);

        self.publish(post.clone());
        self.registry.record_turn(agent.id, &post);

        // Periodic movement callout for spectators, matching the showcase
        // cadence of one announcement per five actions.
        if let Some(updated) = self.registry.get(agent.id) {
            if updated.action_count % 5 == 0 {
                self.chat.append(
                    self.tick,
                    updated.name,
                    format!("{} to ({}, {})", action, post.x, post.y),
                    ChatKind::Movement,
                );
            }
        }

        let draft = TurnDraft {
            agent_id: agent.id,
            agent_name: agent.name.clone(),
            action,
            outcome: TurnOutcome::Applied { moved },
            snapshot: Some(post),
            changed,
        };
        // A durability failure is surfaced, but the in-memory append has
        // already happened: an applied action is always recorded.
        self.log.append(draft)
    }

    /// Records a runtime fault as a rejected turn and returns the fault.
    fn reject(
        &mut self,
        agent: &Agent,
        action: Action,
        err: BridgeError,
    ) -> BridgeResult<TurnRecord> {
        let reason = match &err {
            BridgeError::Runtime(RuntimeError::Decode(decode)) => RejectReason::Decode {
                message: decode.to_string(),
            },
            other => RejectReason::AdapterFault {
                message: other.to_string(),
            },
        };

        let draft = TurnDraft {
            agent_id: agent.id,
            agent_name: agent.name.clone(),
            action,
            outcome: TurnOutcome::Rejected { reason },
            snapshot: None,
            changed: Vec::new(),
        };
        // Spectators see the failure even though the caller gets the error.
        let _ = self.log.append(draft);
        Err(err)
    }

    /// Reads and decodes the WRAM window, retrying the read once.
    fn read_world(&mut self) -> BridgeResult<WorldSnapshot> {
        let raw = match self
            .adapter
            .read_memory(offsets::WRAM_BASE, offsets::MIN_WINDOW_LEN)
        {
            Ok(raw) => raw,
            Err(_) => self
                .adapter
                .read_memory(offsets::WRAM_BASE, offsets::MIN_WINDOW_LEN)
                .map_err(|e| BridgeError::adapter_fault(e.to_string()))?,
        };
        world::decode(&raw).map_err(|e| BridgeError::Runtime(RuntimeError::Decode(e)))
    }

    fn publish(&self, snapshot: WorldSnapshot) {
        if let Ok(mut slot) = self.snapshot.write() {
            *slot = Some(Arc::new(snapshot));
        }
    }

    fn handle_ctrl(&mut self, job: CtrlJob) {
        match job {
            CtrlJob::Checkpoint { reply } => {
                let result = self.capture_checkpoint();
                if let Ok(ckpt) = &result {
                    self.chat.append(
                        self.tick,
                        "world",
                        format!("checkpoint {} saved", ckpt.id),
                        ChatKind::System,
                    );
                }
                let _ = reply.send(result);
            }
            CtrlJob::Restore { checkpoint, reply } => {
                let result = self.apply_restore(*checkpoint);
                let _ = reply.send(result);
            }
        }
    }

    fn capture_checkpoint(&mut self) -> BridgeResult<SaveCheckpoint> {
        let state = self
            .adapter
            .snapshot_state()
            .map_err(|e| BridgeError::adapter_fault(e.to_string()))?;
        let checkpoint = SaveCheckpoint::new(
            self.tick,
            self.log.last_sequence(),
            state,
            self.registry.export(),
        );
        if let Some(persistence) = &self.persistence {
            persistence.store(&checkpoint)?;
        }
        Ok(checkpoint)
    }

    fn apply_restore(&mut self, checkpoint: SaveCheckpoint) -> BridgeResult<WorldSnapshot> {
        self.adapter
            .restore_state(&checkpoint.emulator_state)
            .map_err(|e| BridgeError::adapter_fault(e.to_string()))?;
        self.registry.import(checkpoint.agents)?;
        self.tick = checkpoint.tick;

        let snapshot = self.read_world()?.at_tick(self.tick);
        self.publish(snapshot.clone());
        self.chat.append(
            self.tick,
            "world",
            format!("restored checkpoint {}", checkpoint.id),
            ChatKind::System,
        );
        Ok(snapshot)
    }
}
