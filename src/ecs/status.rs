use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::OccupantId;
use crate::room::RoomCommand;

// ── Status overlay ───────────────────────────────────────────────────

/// Transient named effects on an occupant, rendered into its serialized
/// state line. Lookup ignores order; serialization preserves insertion
/// order. A key appears at most once.
#[derive(Debug, Clone, Default)]
pub struct StatusOverlay {
    entries: Vec<(String, String)>,
}

impl StatusOverlay {
    pub fn new() -> Self {
        StatusOverlay::default()
    }

    /// Add a status, replacing any existing entry under the same key
    /// (the entry keeps its original position in the serialization order).
    pub fn add(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.entries.push((key.to_string(), value.to_string()));
        }
    }

    /// Idempotent removal; returns whether the key was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        self.entries.len() != before
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the serialized form back into an overlay.
    pub fn parse(s: &str) -> StatusOverlay {
        let mut overlay = StatusOverlay::new();
        for part in s.split('/') {
            if part.is_empty() {
                continue;
            }
            match part.split_once(' ') {
                Some((k, v)) => overlay.add(k, v),
                None => overlay.add(part, ""),
            }
        }
        overlay
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for StatusOverlay {
    /// `<key>[ <value>]/` per entry, in insertion order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            f.write_str(key)?;
            if !value.is_empty() {
                write!(f, " {}", value)?;
            }
            f.write_str("/")?;
        }
        Ok(())
    }
}

// ── Timed status sequences ───────────────────────────────────────────

/// One scheduled status sequence (delayed removal or carry cycle) with a
/// cooperative cancellation flag. The task never mutates room state
/// directly; it posts `RoomCommand`s back into the owning room's channel,
/// so a sequence firing for a removed occupant is a registry miss, not a
/// crash.
#[derive(Debug)]
pub struct SequenceHandle {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SequenceHandle {
    /// Cooperatively cancel the sequence. Returns `true` when a pending
    /// sequence was actually cancelled, `false` when it had already
    /// finished naturally or was cancelled before. Either way the no-op is
    /// safe, never an error.
    pub fn cancel(&self) -> bool {
        let already = self.cancelled.swap(true, Ordering::SeqCst);
        !already && !self.handle.is_finished()
    }
}

impl Drop for SequenceHandle {
    fn drop(&mut self) {
        // Teardown with the occupant: nothing scheduled may outlive it.
        self.cancelled.store(true, Ordering::SeqCst);
        self.handle.abort();
    }
}

/// Per-occupant map of live sequences, keyed by the status they drive.
/// Dropping it (with the occupant entity) cancels everything outstanding.
#[derive(Debug, Default)]
pub struct StatusTimers {
    timers: HashMap<String, SequenceHandle>,
}

impl StatusTimers {
    pub fn new() -> Self {
        StatusTimers::default()
    }

    /// Install a sequence for `key`, cancelling any prior one.
    pub fn install(&mut self, key: &str, handle: SequenceHandle) {
        self.timers.insert(key.to_string(), handle);
    }

    /// Cancel and forget the sequence for `key`. Returns `true` when a
    /// pending sequence was cancelled.
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.timers.remove(key) {
            Some(handle) => handle.cancel(),
            None => false,
        }
    }

    /// Forget a sequence that completed naturally.
    pub fn clear(&mut self, key: &str) {
        self.timers.remove(key);
    }
}

/// Schedule the removal of `key` after `delay`. The room refreshes the
/// occupant when it applies the expiry.
pub fn spawn_expiry(
    room_tx: mpsc::UnboundedSender<RoomCommand>,
    id: OccupantId,
    key: String,
    delay: Duration,
) -> SequenceHandle {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if flag.load(Ordering::SeqCst) {
            return;
        }
        let _ = room_tx.send(RoomCommand::StatusExpired { id, key });
    });
    SequenceHandle { cancelled, handle }
}

/// Drive the carry/sip alternation: after each half-cycle the occupant
/// flips between carrying and drinking, and after the final cycle the
/// item is dropped. The statuses themselves are applied by the room when
/// each phase command arrives, so cancelling before the first half-cycle
/// means no carry status is ever observed. The item rides along in every
/// command so the room can ignore phases from a superseded cycle.
pub fn spawn_carry_cycle(
    room_tx: mpsc::UnboundedSender<RoomCommand>,
    id: OccupantId,
    item: String,
    cycles: u32,
    half_cycle: Duration,
) -> SequenceHandle {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    let handle = tokio::spawn(async move {
        for phase in 0..cycles.saturating_mul(2) {
            tokio::time::sleep(half_cycle).await;
            if flag.load(Ordering::SeqCst) {
                return;
            }
            let drinking = phase % 2 == 1;
            let _ = room_tx.send(RoomCommand::CarryPhase {
                id,
                item: item.clone(),
                drinking,
            });
        }
        tokio::time::sleep(half_cycle).await;
        if flag.load(Ordering::SeqCst) {
            return;
        }
        let _ = room_tx.send(RoomCommand::CarryFinished { id, item });
    });
    SequenceHandle { cancelled, handle }
}
