//! Emulator adapter capability interface.
//!
//! The bridge does not embed an emulator; it consumes one through this trait.
//! Implementations are synchronous and single-threaded-safe only: the turn
//! arbiter owns the boxed adapter on its worker thread and is the sole caller,
//! which is why methods take `&mut self` and the trait is `Send` but not
//! `Sync`.

use std::collections::HashSet;

use thiserror::Error;

use crate::action::{Action, Direction};
use crate::world::offsets;

/// Errors surfaced by an emulator adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// A memory read/write addressed bytes outside the emulator's RAM.
    #[error("memory range out of bounds: offset {offset:#06x}, len {len}")]
    OutOfRange { offset: u16, len: usize },

    /// A save state blob was rejected.
    #[error("bad save state: {reason}")]
    BadState { reason: String },

    /// Backend-specific failure (I/O, process, device).
    #[error("adapter backend error: {message}")]
    Backend { message: String },
}

/// Capability interface over an external emulator.
///
/// All calls happen under the arbiter's mutual exclusion; implementations do
/// not need their own locking.
pub trait EmulatorAdapter: Send {
    /// Reads `len` bytes of emulator memory starting at absolute `offset`.
    fn read_memory(&mut self, offset: u16, len: usize) -> Result<Vec<u8>, AdapterError>;

    /// Applies one agent input (held long enough for its effect to settle).
    fn write_input(&mut self, action: &Action) -> Result<(), AdapterError>;

    /// Captures the full emulator state as an opaque blob.
    fn snapshot_state(&mut self) -> Result<Vec<u8>, AdapterError>;

    /// Replaces the full emulator state from a blob previously produced by
    /// [`snapshot_state`](Self::snapshot_state).
    fn restore_state(&mut self, state: &[u8]) -> Result<(), AdapterError>;
}

/// Walkable bounds for [`FlatMemoryEmulator`] movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapBounds {
    /// Smallest walkable X.
    pub min_x: u8,
    /// Largest walkable X.
    pub max_x: u8,
    /// Smallest walkable Y.
    pub min_y: u8,
    /// Largest walkable Y.
    pub max_y: u8,
}

impl Default for MapBounds {
    fn default() -> Self {
        // The original showcase pinned agents to the Pallet Town block.
        Self {
            min_x: 4,
            max_x: 11,
            min_y: 4,
            max_y: 11,
        }
    }
}

const WRAM_LEN: usize = 0x2000;

/// In-memory emulator backend for tests, demos, and embedded use.
///
/// Holds a flat WRAM image and applies overworld movement directly to the
/// position bytes: a move into an out-of-bounds or impassable tile leaves the
/// position unchanged, exactly how a wall behaves on real hardware.
#[derive(Debug, Clone)]
pub struct FlatMemoryEmulator {
    wram: Vec<u8>,
    bounds: MapBounds,
    walls: HashSet<(u8, u8, u8)>,
}

impl FlatMemoryEmulator {
    /// Creates an emulator with zeroed memory and default bounds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            wram: vec![0u8; WRAM_LEN],
            bounds: MapBounds::default(),
            walls: HashSet::new(),
        }
    }

    /// Overrides the walkable bounds.
    #[must_use]
    pub const fn with_bounds(mut self, bounds: MapBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Marks a `(map, x, y)` tile as impassable.
    pub fn add_wall(&mut self, map_id: u8, x: u8, y: u8) {
        self.walls.insert((map_id, x, y));
    }

    /// Places the player.
    pub fn set_position(&mut self, map_id: u8, x: u8, y: u8) {
        self.poke(offsets::PLAYER_MAP, map_id);
        self.poke(offsets::PLAYER_X, x);
        self.poke(offsets::PLAYER_Y, y);
    }

    /// Sets player money (stored as packed BCD, capped at 999 999).
    pub fn set_money(&mut self, money: u32) {
        let money = money.min(999_999);
        let pairs = [money / 10_000, (money / 100) % 100, money % 100];
        for (i, pair) in pairs.into_iter().enumerate() {
            let bcd = (((pair / 10) << 4) | (pair % 10)) as u8;
            self.poke(offsets::MONEY + i as u16, bcd);
        }
    }

    /// Sets the party member count.
    pub fn set_party_count(&mut self, count: u8) {
        self.poke(offsets::PARTY_COUNT, count);
    }

    fn poke(&mut self, offset: u16, value: u8) {
        self.wram[(offset - offsets::WRAM_BASE) as usize] = value;
    }

    fn peek(&self, offset: u16) -> u8 {
        self.wram[(offset - offsets::WRAM_BASE) as usize]
    }

    fn step(&mut self, direction: Direction) {
        let map_id = self.peek(offsets::PLAYER_MAP);
        let x = self.peek(offsets::PLAYER_X);
        let y = self.peek(offsets::PLAYER_Y);

        let (dx, dy) = direction.delta();
        let nx = x.wrapping_add_signed(dx as i8);
        let ny = y.wrapping_add_signed(dy as i8);

        let in_bounds = nx >= self.bounds.min_x
            && nx <= self.bounds.max_x
            && ny >= self.bounds.min_y
            && ny <= self.bounds.max_y;
        if !in_bounds || self.walls.contains(&(map_id, nx, ny)) {
            return;
        }

        self.poke(offsets::PLAYER_X, nx);
        self.poke(offsets::PLAYER_Y, ny);
    }

    fn check_range(&self, offset: u16, len: usize) -> Result<usize, AdapterError> {
        let start = offset
            .checked_sub(offsets::WRAM_BASE)
            .map(usize::from)
            .ok_or(AdapterError::OutOfRange { offset, len })?;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= WRAM_LEN)
            .ok_or(AdapterError::OutOfRange { offset, len })?;
        Ok(end)
    }
}

impl Default for FlatMemoryEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatorAdapter for FlatMemoryEmulator {
    fn read_memory(&mut self, offset: u16, len: usize) -> Result<Vec<u8>, AdapterError> {
        let end = self.check_range(offset, len)?;
        let start = (offset - offsets::WRAM_BASE) as usize;
        Ok(self.wram[start..end].to_vec())
    }

    fn write_input(&mut self, action: &Action) -> Result<(), AdapterError> {
        match action {
            Action::Move(direction) => self.step(*direction),
            // Menus are not modeled; button presses and waits advance nothing.
            Action::Press(_) | Action::Wait => {}
        }
        Ok(())
    }

    fn snapshot_state(&mut self) -> Result<Vec<u8>, AdapterError> {
        Ok(self.wram.clone())
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<(), AdapterError> {
        if state.len() != WRAM_LEN {
            return Err(AdapterError::BadState {
                reason: format!("expected {WRAM_LEN} bytes, got {}", state.len()),
            });
        }
        self.wram.copy_from_slice(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world;

    // Compile-time check: the trait stays object-safe for Box<dyn _>.
    fn _assert_object_safe(_: &mut dyn EmulatorAdapter) {}

    fn read_snapshot(emu: &mut FlatMemoryEmulator) -> world::WorldSnapshot {
        let raw = emu
            .read_memory(offsets::WRAM_BASE, offsets::MIN_WINDOW_LEN)
            .unwrap();
        world::decode(&raw).unwrap()
    }

    #[test]
    fn movement_updates_position_bytes() {
        let mut emu = FlatMemoryEmulator::new();
        emu.set_position(1, 6, 6);

        emu.write_input(&Action::Move(Direction::Right)).unwrap();
        emu.write_input(&Action::Move(Direction::Up)).unwrap();

        let snap = read_snapshot(&mut emu);
        assert_eq!(snap.position(), (7, 5));
        assert_eq!(snap.map_id, 1);
    }

    #[test]
    fn movement_into_wall_is_a_no_op() {
        let mut emu = FlatMemoryEmulator::new();
        emu.set_position(1, 6, 6);
        emu.add_wall(1, 7, 6);

        emu.write_input(&Action::Move(Direction::Right)).unwrap();
        assert_eq!(read_snapshot(&mut emu).position(), (6, 6));
    }

    #[test]
    fn movement_respects_bounds() {
        let mut emu = FlatMemoryEmulator::new();
        emu.set_position(0, 4, 4);

        emu.write_input(&Action::Move(Direction::Left)).unwrap();
        emu.write_input(&Action::Move(Direction::Up)).unwrap();
        assert_eq!(read_snapshot(&mut emu).position(), (4, 4));
    }

    #[test]
    fn money_round_trips_through_bcd() {
        let mut emu = FlatMemoryEmulator::new();
        emu.set_money(30_517);
        assert_eq!(read_snapshot(&mut emu).money, 30_517);

        emu.set_money(2_000_000);
        assert_eq!(read_snapshot(&mut emu).money, 999_999);
    }

    #[test]
    fn out_of_range_read_is_rejected() {
        let mut emu = FlatMemoryEmulator::new();
        let err = emu.read_memory(0x8000, 4).unwrap_err();
        assert!(matches!(err, AdapterError::OutOfRange { .. }));

        let err = emu.read_memory(0xDFFF, 2).unwrap_err();
        assert!(matches!(err, AdapterError::OutOfRange { .. }));
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut emu = FlatMemoryEmulator::new();
        emu.set_position(2, 8, 9);
        emu.set_money(777);
        let state = emu.snapshot_state().unwrap();

        emu.set_position(0, 4, 4);
        emu.set_money(0);
        emu.restore_state(&state).unwrap();

        let snap = read_snapshot(&mut emu);
        assert_eq!(snap.position(), (8, 9));
        assert_eq!(snap.map_id, 2);
        assert_eq!(snap.money, 777);
    }

    #[test]
    fn restore_rejects_wrong_length() {
        let mut emu = FlatMemoryEmulator::new();
        let err = emu.restore_state(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, AdapterError::BadState { .. }));
    }
}
