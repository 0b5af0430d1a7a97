use aether_bridge::{
    Action, BridgeConfig, BridgeError, CheckpointId, Direction, FlatMemoryEmulator, MemoryBridge,
    RuntimeError,
};

fn emulator() -> FlatMemoryEmulator {
    let mut emu = FlatMemoryEmulator::new();
    emu.set_position(1, 6, 6);
    emu.set_money(3000);
    emu
}

#[test]
fn reopened_bridge_replays_history_and_continues_sequences() {
    let dir = tempfile::tempdir().unwrap();

    {
        let bridge =
            MemoryBridge::open(Box::new(emulator()), BridgeConfig::default(), dir.path()).unwrap();
        let id = bridge.register("Koolie").unwrap();
        bridge.submit(id, Action::Move(Direction::Up)).unwrap();
        bridge.submit(id, Action::Move(Direction::Right)).unwrap();
    }

    let bridge =
        MemoryBridge::open(Box::new(emulator()), BridgeConfig::default(), dir.path()).unwrap();

    // History survives the restart and streams from the beginning.
    let replayed: Vec<_> = bridge.spectator().stream_since(0).collect();
    assert_eq!(replayed.len(), 2);
    assert_eq!(replayed[0].agent_name, "Koolie");

    let id = bridge.register("Koolie").unwrap();
    let record = bridge.submit(id, Action::Move(Direction::Down)).unwrap();
    assert_eq!(record.sequence, 3);
}

#[test]
fn checkpoint_restores_world_and_roster_across_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (checkpoint_id, saved_position, saved_roster) = {
        let bridge =
            MemoryBridge::open(Box::new(emulator()), BridgeConfig::default(), dir.path()).unwrap();
        let id = bridge.register("Koolie").unwrap();
        bridge.submit(id, Action::Move(Direction::Right)).unwrap();

        let checkpoint = bridge.checkpoint().unwrap();
        let position = bridge.current_snapshot().unwrap().position();
        let roster = bridge.agents();

        // Keep playing past the checkpoint, then shut down.
        bridge.submit(id, Action::Move(Direction::Right)).unwrap();
        bridge.submit(id, Action::Move(Direction::Down)).unwrap();

        (checkpoint.id, position, roster)
    };

    // A fresh process with a fresh emulator restores the saved state
    // wholesale, roster included.
    let bridge =
        MemoryBridge::open(Box::new(emulator()), BridgeConfig::default(), dir.path()).unwrap();
    let restored = bridge.restore(checkpoint_id).unwrap();

    assert_eq!(restored.position(), saved_position);
    assert_eq!(restored.money, 3000);
    assert_eq!(bridge.agents(), saved_roster);
}

#[test]
fn restoring_an_unknown_checkpoint_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let bridge =
        MemoryBridge::open(Box::new(emulator()), BridgeConfig::default(), dir.path()).unwrap();

    let err = bridge.restore(CheckpointId::new()).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Runtime(RuntimeError::CheckpointNotFound { .. })
    ));

    // The bridge keeps serving turns afterwards.
    let id = bridge.register("Koolie").unwrap();
    bridge.submit(id, Action::Wait).unwrap();
}
