//! Aether Bridge showcase
//!
//! Runs four archetype agents against the flat in-memory emulator and
//! prints the turn records and chat stream as they happen.

use std::process;

use aether_bridge::{
    AgentId, AgentStrategy, BridgeConfig, Explorer, FlatMemoryEmulator, MemoryBridge, Merchant,
    Observation, Scout, Social, TurnOutcome, TurnPolicyKind,
};

struct Config {
    rounds: u32,
    policy: TurnPolicyKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rounds: 10,
            policy: TurnPolicyKind::RoundRobin,
        }
    }
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--rounds" | "-r" => {
                if i + 1 < args.len() {
                    config.rounds = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("error: invalid round count: {}", args[i + 1]);
                        process::exit(1);
                    });
                    i += 2;
                } else {
                    eprintln!("error: --rounds requires a value");
                    process::exit(1);
                }
            }
            "--policy" => {
                if i + 1 < args.len() {
                    config.policy = match args[i + 1].as_str() {
                        "fifo" => TurnPolicyKind::Fifo,
                        "round-robin" => TurnPolicyKind::RoundRobin,
                        other => {
                            eprintln!("error: unknown policy: {other}");
                            process::exit(1);
                        }
                    };
                    i += 2;
                } else {
                    eprintln!("error: --policy requires a value");
                    process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("Usage: bridge-demo [--rounds N] [--policy fifo|round-robin]");
                process::exit(0);
            }
            other => {
                eprintln!("error: unknown argument: {other}");
                process::exit(1);
            }
        }
    }

    config
}

fn main() {
    let config = parse_args();

    let mut emu = FlatMemoryEmulator::new();
    emu.set_position(1, 6, 6);
    emu.set_money(3000);
    emu.set_party_count(1);
    // A short wall south of the start, so some moves bounce.
    emu.add_wall(1, 5, 8);
    emu.add_wall(1, 6, 8);
    emu.add_wall(1, 7, 8);

    let bridge = MemoryBridge::new(
        Box::new(emu),
        BridgeConfig {
            policy: config.policy,
            ..BridgeConfig::default()
        },
    );

    let mut team: Vec<(AgentId, Box<dyn AgentStrategy>)> = Vec::new();
    let roster: [(&str, Box<dyn AgentStrategy>); 4] = [
        ("Koolie", Box::new(Explorer::new())),
        ("Scout-7", Box::new(Scout::new())),
        ("Merchant-X", Box::new(Merchant::new())),
        ("HelpBot", Box::new(Social::new())),
    ];
    for (name, strategy) in roster {
        match bridge.register(name) {
            Ok(id) => team.push((id, strategy)),
            Err(err) => {
                eprintln!("error: failed to register {name}: {err}");
                process::exit(1);
            }
        }
    }

    println!("=== aether bridge demo: {} rounds ===", config.rounds);

    let spectator = bridge.spectator();
    for round in 1..=config.rounds {
        println!("--- round {round} ---");
        for (id, strategy) in &mut team {
            let Some(snapshot) = spectator.current_snapshot() else {
                eprintln!("error: no world snapshot available");
                process::exit(1);
            };
            let obs = Observation {
                snapshot: (*snapshot).clone(),
                peers: spectator.agents(),
            };
            let action = strategy.decide(*id, &obs);

            match bridge.submit(*id, action) {
                Ok(record) => {
                    let outcome = match record.outcome {
                        TurnOutcome::Applied { moved: true } => "moved",
                        TurnOutcome::Applied { moved: false } => "blocked",
                        TurnOutcome::Rejected { .. } => "rejected",
                    };
                    let position = record
                        .snapshot
                        .map_or_else(String::new, |s| format!(" at ({}, {})", s.x, s.y));
                    println!(
                        "  #{:<3} {:<10} {:<12} {outcome}{position}",
                        record.sequence,
                        record.agent_name,
                        record.action.to_string()
                    );
                }
                Err(err) => println!("  {:<10} skipped: {err}", bridge_name(&bridge, *id)),
            }

            if let Some(line) = strategy.remark() {
                if let Err(err) = bridge.say(*id, line) {
                    eprintln!("warning: chat failed: {err}");
                }
            }
            let _ = bridge.heartbeat(*id);
        }
    }

    println!();
    println!("=== chat tail ===");
    for message in spectator.recent_chat(12) {
        println!("  [{:?}] {}: {}", message.kind, message.author, message.text);
    }

    println!();
    println!("=== final roster ===");
    for agent in spectator.agents() {
        println!(
            "  {:<10} {:?} actions={} last=({}, {})",
            agent.name, agent.status, agent.action_count, agent.x, agent.y
        );
    }
}

fn bridge_name(bridge: &MemoryBridge, id: AgentId) -> String {
    bridge
        .agents()
        .into_iter()
        .find(|a| a.id == id)
        .map_or_else(|| id.to_string(), |a| a.name)
}
