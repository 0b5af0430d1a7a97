//! # Aether Bridge - Shared-World Turn Arbitration for Emulated Games
//!
//! Aether Bridge lets many autonomous agents inhabit a single emulated
//! Game Boy world. The emulator has exactly one input channel and one
//! memory space, so the bridge serializes agent actions into strict turns,
//! decodes working RAM into typed world snapshots, and records every turn
//! in a restartable event log that spectators can follow.
//!
//! ## Core Concepts
//!
//! - **Turn**: one admitted action applied to the emulator, producing one
//!   immutable [`TurnRecord`]
//! - **WorldSnapshot**: a typed decode of the WRAM window (position, map,
//!   money, party)
//! - **Arbiter**: the single worker thread that owns the emulator adapter
//!   and applies turns in order
//! - **Checkpoint**: a wholesale capture of emulator state plus the agent
//!   roster, restorable under the same exclusion as turns
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aether_bridge::{Action, BridgeConfig, Direction, FlatMemoryEmulator, MemoryBridge};
//!
//! let bridge = MemoryBridge::new(Box::new(FlatMemoryEmulator::new()), BridgeConfig::default());
//!
//! let koolie = bridge.register("Koolie")?;
//! let record = bridge.submit(koolie, Action::Move(Direction::Up))?;
//! assert_eq!(record.sequence, 1);
//!
//! for record in bridge.spectator().stream_since(0) {
//!     println!("{} -> {:?}", record.agent_name, record.outcome);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// World model and agent identity
pub mod action;
pub mod adapter;
pub mod agent;
pub mod error;
pub mod world;

// Coordination: registry, logs, arbitration
pub mod arbiter;
pub mod chat;
pub mod log;
pub mod registry;

// Persistence, strategies, and the facade
pub mod bridge;
pub mod persist;
pub mod strategy;

// Re-export primary types at crate root for convenience
pub use action::{Action, Button, Direction, ParseActionError};
pub use adapter::{AdapterError, EmulatorAdapter, FlatMemoryEmulator, MapBounds};
pub use agent::{Agent, AgentId, AgentStatus};
pub use arbiter::policy::{TurnPolicy, TurnPolicyKind};
pub use arbiter::{BridgeConfig, SubmitHandle, TurnArbiter};
pub use bridge::{MemoryBridge, SpectatorView};
pub use chat::{ChatKind, ChatLog, ChatMessage, ChatStream};
pub use error::{AdmissionError, BridgeError, BridgeResult, RuntimeError};
pub use log::{EventLog, LogStream, RejectReason, TurnDraft, TurnOutcome, TurnRecord};
pub use persist::{CheckpointId, PersistenceManager, SaveCheckpoint};
pub use registry::AgentRegistry;
pub use strategy::{AgentStrategy, Explorer, Merchant, Observation, Scout, Social};
pub use world::{decode, diff, ChangedField, DecodeError, WorldSnapshot};
