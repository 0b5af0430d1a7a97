//! World state cache: typed decoding of raw emulator memory.
//!
//! The bridge never interprets emulator memory anywhere else. A fixed window
//! of Game Boy work RAM is decoded into an immutable [`WorldSnapshot`] once
//! per applied turn, and everything downstream (spectators, strategies, the
//! event log) sees only snapshots.
//!
//! Offsets are the Pokémon Red overworld addresses used by the original
//! bridge, relative to the WRAM base `0xC000`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Memory offsets for the decoded window.
pub mod offsets {
    /// First address of the work RAM window handed to [`decode`](super::decode).
    pub const WRAM_BASE: u16 = 0xC000;
    /// Player X position (overworld).
    pub const PLAYER_X: u16 = 0xD361;
    /// Player Y position (overworld).
    pub const PLAYER_Y: u16 = 0xD360;
    /// Current map id.
    pub const PLAYER_MAP: u16 = 0xD35E;
    /// Player money, 3 bytes of packed BCD, most significant first.
    pub const MONEY: u16 = 0xD347;
    /// Number of party members.
    pub const PARTY_COUNT: u16 = 0xD163;

    /// Smallest window length that covers every decoded field.
    pub const MIN_WINDOW_LEN: usize = (PLAYER_X - WRAM_BASE) as usize + 1;
}

/// Errors produced while decoding a raw memory window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The window does not cover every decoded field.
    #[error("memory window too short: need {expected} bytes, got {actual}")]
    ShortInput { expected: usize, actual: usize },

    /// A packed-BCD money byte held a nibble above 9.
    #[error("invalid BCD byte {byte:#04x} at offset {offset:#06x}")]
    InvalidBcd { offset: u16, byte: u8 },
}

/// Decoded, immutable view of emulator memory at a point in time.
///
/// Snapshots are produced once per applied turn and superseded, never mutated.
/// Equality ignores [`decoded_at`](Self::decoded_at): two snapshots decoded
/// from identical bytes at the same tick compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Player X position.
    pub x: u8,
    /// Player Y position.
    pub y: u8,
    /// Current map id.
    pub map_id: u8,
    /// Player money, decoded from packed BCD.
    pub money: u32,
    /// Party member count.
    pub party_count: u8,
    /// Arbiter tick at which this snapshot was published.
    pub tick: u64,
    /// Wall-clock decode time. Not part of equality.
    pub decoded_at: DateTime<Utc>,
}

impl WorldSnapshot {
    /// Returns a copy stamped with the arbiter's tick counter.
    ///
    /// `decode` is pure over the raw bytes; the tick is world-clock state the
    /// arbiter owns, stamped after decoding.
    #[must_use]
    pub const fn at_tick(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    /// Returns the overworld position as an `(x, y)` pair.
    #[must_use]
    pub const fn position(&self) -> (u8, u8) {
        (self.x, self.y)
    }
}

impl PartialEq for WorldSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.map_id == other.map_id
            && self.money == other.money
            && self.party_count == other.party_count
            && self.tick == other.tick
    }
}

impl Eq for WorldSnapshot {}

impl fmt::Display for WorldSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "map {} ({}, {}), {}g, party {} @ tick {}",
            self.map_id, self.x, self.y, self.money, self.party_count, self.tick
        )
    }
}

/// A field that changed between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    /// X or Y moved.
    Position,
    /// The player changed maps.
    MapId,
    /// Money went up or down.
    Money,
    /// Party size changed.
    PartyCount,
}

fn field(raw: &[u8], offset: u16) -> u8 {
    // decode() has already bounds-checked the window.
    raw[(offset - offsets::WRAM_BASE) as usize]
}

fn bcd_byte(raw: &[u8], offset: u16) -> Result<u32, DecodeError> {
    let byte = field(raw, offset);
    let high = byte >> 4;
    let low = byte & 0x0F;
    if high > 9 || low > 9 {
        return Err(DecodeError::InvalidBcd { offset, byte });
    }
    Ok(u32::from(high) * 10 + u32::from(low))
}

/// Decodes a raw WRAM window into a [`WorldSnapshot`].
///
/// Pure and deterministic: identical bytes always yield an identical snapshot
/// (the `decoded_at` stamp is excluded from equality). The window must start
/// at [`offsets::WRAM_BASE`] and cover at least
/// [`offsets::MIN_WINDOW_LEN`] bytes.
///
/// # Errors
/// [`DecodeError::ShortInput`] for a truncated window,
/// [`DecodeError::InvalidBcd`] for malformed money bytes.
pub fn decode(raw: &[u8]) -> Result<WorldSnapshot, DecodeError> {
    if raw.len() < offsets::MIN_WINDOW_LEN {
        return Err(DecodeError::ShortInput {
            expected: offsets::MIN_WINDOW_LEN,
            actual: raw.len(),
        });
    }

    let money = bcd_byte(raw, offsets::MONEY)? * 10_000
        + bcd_byte(raw, offsets::MONEY + 1)? * 100
        + bcd_byte(raw, offsets::MONEY + 2)?;

    Ok(WorldSnapshot {
        x: field(raw, offsets::PLAYER_X),
        y: field(raw, offsets::PLAYER_Y),
        map_id: field(raw, offsets::PLAYER_MAP),
        money,
        party_count: field(raw, offsets::PARTY_COUNT),
        tick: 0,
        decoded_at: Utc::now(),
    })
}

/// Computes the set of meaningful changes between two snapshots.
///
/// Used for spectator notification without resubmitting unchanged snapshots
/// downstream. Tick and timestamps are not compared.
#[must_use]
pub fn diff(prev: &WorldSnapshot, next: &WorldSnapshot) -> Vec<ChangedField> {
    let mut changed = Vec::new();
    if prev.x != next.x || prev.y != next.y {
        changed.push(ChangedField::Position);
    }
    if prev.map_id != next.map_id {
        changed.push(ChangedField::MapId);
    }
    if prev.money != next.money {
        changed.push(ChangedField::Money);
    }
    if prev.party_count != next.party_count {
        changed.push(ChangedField::PartyCount);
    }
    changed
}
