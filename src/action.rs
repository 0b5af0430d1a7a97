//! Agent action commands.
//!
//! Everything an agent can ask the emulator to do is one of these values. The
//! textual forms (`"move up"`, `"press start"`) match the original bridge
//! wire commands so external callers can keep sending strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Overworld movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// All four directions, in a fixed order.
    pub const ALL: [Self; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];

    /// The (dx, dy) delta this direction applies to an overworld position.
    #[must_use]
    pub const fn delta(self) -> (i16, i16) {
        match self {
            Self::Up => (0, -1),
            Self::Down => (0, 1),
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        };
        f.write_str(s)
    }
}

impl FromStr for Direction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(ParseActionError {
                input: other.to_string(),
            }),
        }
    }
}

/// Game Boy face/system buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    A,
    B,
    Start,
    Select,
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "a",
            Self::B => "b",
            Self::Start => "start",
            Self::Select => "select",
        };
        f.write_str(s)
    }
}

/// A single emulator input an agent can request for its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Action {
    /// Hold a directional pad button long enough for one overworld step.
    Move(Direction),
    /// Press and release a button.
    Press(Button),
    /// Let the emulator run for one turn without input.
    Wait,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move(d) => write!(f, "move {d}"),
            Self::Press(b) => write!(f, "press {b}"),
            Self::Wait => f.write_str("wait"),
        }
    }
}

/// Error returned when a textual command cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown action: '{input}'")]
pub struct ParseActionError {
    /// The unparseable input, normalized.
    pub input: String,
}

impl FromStr for Action {
    /// Parses the original bridge's textual commands.
    ///
    /// Accepted forms: `up`/`down`/`left`/`right`, `move <dir>`,
    /// `press <button>`, `wait`.
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized == "wait" {
            return Ok(Self::Wait);
        }
        if let Some(rest) = normalized.strip_prefix("move ") {
            return rest.parse().map(Self::Move);
        }
        if let Some(rest) = normalized.strip_prefix("press ") {
            let button = match rest.trim() {
                "a" => Button::A,
                "b" => Button::B,
                "start" => Button::Start,
                "select" => Button::Select,
                other => {
                    return Err(ParseActionError {
                        input: other.to_string(),
                    })
                }
            };
            return Ok(Self::Press(button));
        }
        // Bare direction, as the original `move` handler accepted.
        normalized.parse().map(Self::Move)
    }
}
