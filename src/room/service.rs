use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};
use tracing::info;

use crate::game::grid::Grid;
use crate::room::{Room, RoomConfig, RoomHandle};

/// Lazily spawns a room task per model on first entry and hands out
/// command-channel handles. A room evicts itself when its last occupant
/// leaves; the stale handle is detected here and replaced on the next
/// entry.
pub struct RoomService {
    config: RoomConfig,
    rooms: Mutex<HashMap<String, RoomHandle>>,
}

impl RoomService {
    pub fn new(config: RoomConfig) -> Self {
        RoomService {
            config,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Get the live handle for `model`, spawning the room if needed.
    ///
    /// # Errors
    ///
    /// An unknown or malformed room model fails the entry; nothing is
    /// spawned and the caller reports the refusal to its client.
    pub async fn get_or_spawn(&self, model: &str) -> Result<RoomHandle, String> {
        let mut rooms = self.rooms.lock().await;
        if let Some(handle) = rooms.get(model) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
        }

        let grid = Grid::from_model(model)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let room = Room::new(model, grid, self.config.clone(), rx, tx.clone());
        tokio::spawn(room.run());

        let handle = RoomHandle {
            model: model.to_string(),
            tx,
        };
        rooms.insert(model.to_string(), handle.clone());
        info!(room = %model, "room spawned");
        Ok(handle)
    }
}
