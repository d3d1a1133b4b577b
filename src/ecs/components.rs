use tokio::sync::mpsc;

use crate::protocol::Direction;

// ── Identity ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OccupantName {
    pub name: String,
}

// ── Spatial ──────────────────────────────────────────────────────────

/// Current resting tile and the effective height on it.
#[derive(Debug, Clone)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
    pub height: f32,
}

impl TilePos {
    pub fn tile(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

#[derive(Debug, Clone)]
pub struct Rotation {
    pub head: Direction,
    pub body: Direction,
}

/// The tile the occupant is walking toward, if any.
#[derive(Debug, Clone, Default)]
pub struct WalkGoal {
    pub target: Option<(i32, i32)>,
}

#[derive(Debug, Clone, Default)]
pub struct WalkFlags {
    /// Suspends goal processing while set (trade dialogs etc).
    pub walk_lock: bool,
    /// The current goal is the door; arrival is a room-exit request.
    pub walk_door: bool,
}

/// The item currently held in hand while a carry cycle runs. Used to
/// ignore phase commands from a superseded cycle.
#[derive(Debug, Clone, Default)]
pub struct Handheld {
    pub item: Option<String>,
}

// ── Session ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Typing {
    pub active: bool,
}

/// Non-owning handle to the occupant's outbound connection. The session
/// writer task on the other end frames and delivers each line.
#[derive(Debug, Clone)]
pub struct Outbox {
    pub tx: mpsc::UnboundedSender<String>,
}
