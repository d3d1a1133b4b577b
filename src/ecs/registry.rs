use std::collections::HashMap;

use hecs::{Entity, World};
use tokio::sync::mpsc;

use crate::ecs::components::{
    Handheld, Outbox, OccupantName, Rotation, TilePos, Typing, WalkFlags, WalkGoal,
};
use crate::ecs::status::{StatusOverlay, StatusTimers};
use crate::protocol::{Direction, OccupantId};

/// The set of occupants physically present in one room: a hecs world for
/// the component data plus an O(1) map from room-local id to entity.
///
/// Ids are allocated monotonically and never reused while the owning room
/// instance is alive, so duplicate registration cannot happen.
pub struct Registry {
    world: World,
    by_id: HashMap<OccupantId, Entity>,
    next_id: OccupantId,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            world: World::new(),
            by_id: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a new occupant standing on `tile` and return its id.
    pub fn add(
        &mut self,
        name: &str,
        tile: (i32, i32),
        height: f32,
        facing: Direction,
        tx: mpsc::UnboundedSender<String>,
    ) -> OccupantId {
        let id = self.next_id;
        self.next_id += 1;

        let entity = self.world.spawn((
            OccupantName {
                name: name.to_string(),
            },
            TilePos {
                x: tile.0,
                y: tile.1,
                height,
            },
            Rotation {
                head: facing,
                body: facing,
            },
            WalkGoal::default(),
            WalkFlags::default(),
            Typing::default(),
            Handheld::default(),
            Outbox { tx },
            StatusOverlay::new(),
            StatusTimers::new(),
        ));
        self.by_id.insert(id, entity);
        id
    }

    /// Idempotent removal. Despawning drops the occupant's `StatusTimers`,
    /// which cancels every outstanding scheduled sequence.
    pub fn remove(&mut self, id: OccupantId) -> bool {
        match self.by_id.remove(&id) {
            Some(entity) => {
                let _ = self.world.despawn(entity);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: OccupantId) -> Option<Entity> {
        self.by_id.get(&id).copied()
    }

    /// Snapshot of the current ids, sufficient for one tick or broadcast
    /// pass. Mutation during a pass only affects the next snapshot.
    pub fn ids(&self) -> Vec<OccupantId> {
        self.by_id.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Component access goes through the world; hecs checks borrows at
    /// runtime, so `get::<&mut T>` works from a shared reference.
    pub fn world(&self) -> &World {
        &self.world
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> mpsc::UnboundedSender<String> {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn add_then_get_then_remove() {
        let mut reg = Registry::new();
        let id = reg.add("astrid", (0, 0), 0.0, Direction::South, outbox());

        let entity = reg.get(id).expect("registered occupant is present");
        let name = reg.world().get::<&OccupantName>(entity).unwrap();
        assert_eq!(name.name, "astrid");
        drop(name);

        assert_eq!(reg.len(), 1);
        assert!(reg.remove(id));
        assert!(reg.get(id).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut reg = Registry::new();
        let id = reg.add("astrid", (0, 0), 0.0, Direction::South, outbox());
        assert!(reg.remove(id));
        assert!(!reg.remove(id));
        assert!(!reg.remove(999));
    }

    #[test]
    fn ids_are_never_reused() {
        let mut reg = Registry::new();
        let a = reg.add("a", (0, 0), 0.0, Direction::South, outbox());
        reg.remove(a);
        let b = reg.add("b", (0, 0), 0.0, Direction::South, outbox());
        assert_ne!(a, b);
    }

    #[test]
    fn ids_snapshot_covers_every_occupant_once() {
        let mut reg = Registry::new();
        let a = reg.add("a", (0, 0), 0.0, Direction::South, outbox());
        let b = reg.add("b", (1, 0), 0.0, Direction::South, outbox());
        let mut ids = reg.ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![a, b]);
    }
}
