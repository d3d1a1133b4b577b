use hecs::Entity;
use tracing::debug;

use crate::ecs::components::{Outbox, Rotation, TilePos};
use crate::ecs::registry::Registry;
use crate::ecs::status::StatusOverlay;
use crate::protocol::{format_height, OccupantId};

/// Serialize one occupant's state line:
/// `<id> <X>,<Y>,<H>,<head>,<body>/<status>[ <value>]/.../`
pub fn occupant_line(registry: &Registry, id: OccupantId, entity: Entity) -> Option<String> {
    let world = registry.world();
    let pos = world.get::<&TilePos>(entity).ok()?;
    let rot = world.get::<&Rotation>(entity).ok()?;
    let overlay = world.get::<&StatusOverlay>(entity).ok()?;
    Some(format!(
        "{} {},{},{},{},{}/{}",
        id,
        pos.x,
        pos.y,
        format_height(pos.height),
        rot.head.index(),
        rot.body.index(),
        overlay
    ))
}

/// Push one occupant's updated line to everyone in the room.
pub fn refresh(registry: &Registry, id: OccupantId) {
    let Some(entity) = registry.get(id) else {
        return;
    };
    let Some(line) = occupant_line(registry, id, entity) else {
        return;
    };
    deliver(registry, &line);
}

/// Push the full occupant set, for bulk changes (room entry, mass kick).
pub fn refresh_all(registry: &Registry) {
    for id in registry.ids() {
        refresh(registry, id);
    }
}

/// Deliver a raw line to every occupant's outbound channel. A recipient
/// whose session is gone never blocks delivery to the others.
pub fn deliver(registry: &Registry, line: &str) {
    for (_, outbox) in registry.world().query::<&Outbox>().iter() {
        if outbox.tx.send(line.to_string()).is_err() {
            debug!("dropping broadcast line for a disconnected session");
        }
    }
}
