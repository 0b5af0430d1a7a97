//! Decision policies for autonomous agents.
//!
//! A strategy looks at the published world snapshot and the peer listing and
//! picks the next [`Action`]. The arbiter does not know or care which
//! strategy produced an action; these exist for the demo loop and as a seam
//! for callers plugging in their own decision code.

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::action::{Action, Button, Direction};
use crate::agent::{Agent, AgentId};
use crate::world::WorldSnapshot;

/// What a strategy gets to see before each decision.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Most recent published snapshot.
    pub snapshot: WorldSnapshot,
    /// Registry listing, including the deciding agent itself.
    pub peers: Vec<Agent>,
}

impl Observation {
    /// Peers other than `id`, restricted to the snapshot's map.
    fn others_on_map(&self, id: AgentId) -> impl Iterator<Item = &Agent> {
        self.peers
            .iter()
            .filter(move |a| a.id != id && a.map_id == self.snapshot.map_id)
    }
}

/// A pluggable decision policy.
pub trait AgentStrategy: Send {
    /// Picks the next action for `id` given the current observation.
    fn decide(&mut self, id: AgentId, obs: &Observation) -> Action;

    /// Optional chat line to broadcast after deciding.
    ///
    /// Strategies that talk (see [`Social`]) return `Some`; the caller routes
    /// it through the chat stream. Default is silence.
    fn remark(&mut self) -> Option<String> {
        None
    }
}

/// Steps from `from` toward `to`, longest axis first.
fn step_toward(from: (u8, u8), to: (u8, u8)) -> Direction {
    let dx = i16::from(to.0) - i16::from(from.0);
    let dy = i16::from(to.1) - i16::from(from.1);
    if dx.abs() >= dy.abs() {
        if dx >= 0 {
            Direction::Right
        } else {
            Direction::Left
        }
    } else if dy >= 0 {
        Direction::Down
    } else {
        Direction::Up
    }
}

fn adjacent(a: (u8, u8), b: (u8, u8)) -> bool {
    let dx = i16::from(a.0) - i16::from(b.0);
    let dy = i16::from(a.1) - i16::from(b.1);
    dx.abs() <= 1 && dy.abs() <= 1
}

/// Random wanderer that avoids grinding against the same wall.
///
/// Repeating the previous direction is de-weighted, and after several
/// repeats in a row the next pick is forced perpendicular.
pub struct Explorer {
    rng: SmallRng,
    last: Option<Direction>,
    repeats: u32,
}

impl Explorer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(rand::rng().random())
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            last: None,
            repeats: 0,
        }
    }

    fn pick(&mut self) -> Direction {
        if let Some(last) = self.last {
            if self.repeats > 3 {
                let perpendicular = match last {
                    Direction::Up | Direction::Down => [Direction::Left, Direction::Right],
                    Direction::Left | Direction::Right => [Direction::Up, Direction::Down],
                };
                self.repeats = 0;
                return perpendicular[self.rng.random_range(0..2)];
            }
            // Weight 25/25/25/25, knocked down to 5 for the previous pick.
            let mut weighted = Vec::with_capacity(80);
            for dir in Direction::ALL {
                let weight = if dir == last { 5 } else { 25 };
                for _ in 0..weight {
                    weighted.push(dir);
                }
            }
            return weighted[self.rng.random_range(0..weighted.len())];
        }
        Direction::ALL[self.rng.random_range(0..Direction::ALL.len())]
    }
}

impl Default for Explorer {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStrategy for Explorer {
    fn decide(&mut self, _id: AgentId, _obs: &Observation) -> Action {
        let dir = self.pick();
        if self.last == Some(dir) {
            self.repeats += 1;
        } else {
            self.repeats = 0;
        }
        self.last = Some(dir);
        Action::Move(dir)
    }
}

/// Frontier-seeker that steps toward its least-visited neighbouring tile.
pub struct Scout {
    rng: SmallRng,
    visits: HashMap<(u8, u8, u8), u32>,
}

impl Scout {
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(rand::rng().random())
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            visits: HashMap::new(),
        }
    }
}

impl Default for Scout {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStrategy for Scout {
    fn decide(&mut self, _id: AgentId, obs: &Observation) -> Action {
        let snap = &obs.snapshot;
        *self
            .visits
            .entry((snap.map_id, snap.x, snap.y))
            .or_insert(0) += 1;

        // Least-visited neighbour wins; ties break randomly.
        let mut best: Vec<Direction> = Vec::new();
        let mut best_count = u32::MAX;
        for dir in Direction::ALL {
            let (dx, dy) = dir.delta();
            let nx = snap.x.wrapping_add_signed(dx as i8);
            let ny = snap.y.wrapping_add_signed(dy as i8);
            let count = self
                .visits
                .get(&(snap.map_id, nx, ny))
                .copied()
                .unwrap_or(0);
            if count < best_count {
                best_count = count;
                best.clear();
                best.push(dir);
            } else if count == best_count {
                best.push(dir);
            }
        }
        Action::Move(best[self.rng.random_range(0..best.len())])
    }
}

/// Chases the busiest peer and pings it when adjacent.
///
/// Peer wealth is not observable through the bridge, so the most active peer
/// stands in for the richest one.
pub struct Merchant {
    rng: SmallRng,
}

impl Merchant {
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(rand::rng().random())
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Default for Merchant {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStrategy for Merchant {
    fn decide(&mut self, id: AgentId, obs: &Observation) -> Action {
        let here = obs.snapshot.position();
        let target = obs
            .others_on_map(id)
            .max_by_key(|a| a.action_count)
            .map(|a| (a.x, a.y));

        match target {
            Some(pos) if adjacent(here, pos) => Action::Press(Button::A),
            Some(pos) => Action::Move(step_toward(here, pos)),
            None => Action::Move(Direction::ALL[self.rng.random_range(0..Direction::ALL.len())]),
        }
    }
}

/// Seeks out the nearest peer and greets it when adjacent.
pub struct Social {
    rng: SmallRng,
    pending: Option<String>,
}

impl Social {
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(rand::rng().random())
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            pending: None,
        }
    }
}

impl Default for Social {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStrategy for Social {
    fn decide(&mut self, id: AgentId, obs: &Observation) -> Action {
        let here = obs.snapshot.position();
        let nearest = obs.others_on_map(id).min_by_key(|a| {
            (i16::from(a.x) - i16::from(here.0)).abs()
                + (i16::from(a.y) - i16::from(here.1)).abs()
        });

        match nearest {
            Some(peer) if adjacent(here, (peer.x, peer.y)) => {
                self.pending = Some(format!("Hello {}! Want to trade?", peer.name));
                Action::Wait
            }
            Some(peer) => Action::Move(step_toward(here, (peer.x, peer.y))),
            None => Action::Move(Direction::ALL[self.rng.random_range(0..Direction::ALL.len())]),
        }
    }

    fn remark(&mut self) -> Option<String> {
        self.pending.take()
    }
}
