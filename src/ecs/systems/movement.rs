use std::collections::HashSet;

use crate::ecs::components::{Rotation, TilePos, WalkFlags, WalkGoal};
use crate::ecs::registry::Registry;
use crate::ecs::status::StatusOverlay;
use crate::game::grid::Grid;
use crate::protocol::{Direction, OccupantId};

/// What one tick of the movement engine did, for the room to act on:
/// `moved` occupants need a broadcast refresh, `departed` ones reached
/// the door with the walk-door flag set and must be removed.
#[derive(Debug, Default)]
pub struct MovementOutcome {
    pub moved: Vec<OccupantId>,
    pub departed: Vec<OccupantId>,
}

/// Advance every occupant with a pending goal one tile, in registry
/// snapshot order. The order is whatever the snapshot yields this tick;
/// the only guarantee is that each occupant is considered exactly once.
///
/// Collision rule: the reservation set seeds with every occupant's
/// current tile, movers claim their destination first-come, and a
/// vacated tile stays reserved until next tick. No two occupants can end
/// the tick on the same tile.
pub fn movement_tick(registry: &mut Registry, grid: &Grid, max_step_height: f32) -> MovementOutcome {
    let ids = registry.ids();
    let mut outcome = MovementOutcome::default();

    // Phase 1: seed reservations from where everyone currently stands.
    let mut reserved: HashSet<(i32, i32)> = HashSet::new();
    for id in &ids {
        let Some(entity) = registry.get(*id) else {
            continue;
        };
        if let Ok(pos) = registry.world().get::<&TilePos>(entity) {
            reserved.insert(pos.tile());
        }
    }

    // Phase 2: step each occupant with a goal.
    for id in ids {
        let Some(entity) = registry.get(id) else {
            continue;
        };

        let (current, height, goal, walk_lock, walk_door) = {
            let world = registry.world();
            let Ok(pos) = world.get::<&TilePos>(entity) else {
                continue;
            };
            let Ok(goal) = world.get::<&WalkGoal>(entity) else {
                continue;
            };
            let Ok(flags) = world.get::<&WalkFlags>(entity) else {
                continue;
            };
            (
                pos.tile(),
                pos.height,
                goal.target,
                flags.walk_lock,
                flags.walk_door,
            )
        };

        let Some(goal) = goal else {
            continue;
        };
        if walk_lock {
            // Goal persists, no movement this tick.
            continue;
        }

        if current == goal {
            if let Ok(mut g) = registry.world().get::<&mut WalkGoal>(entity) {
                g.target = None;
            }
            if walk_door {
                outcome.departed.push(id);
            }
            continue;
        }

        let Some(next) = next_step(grid, &reserved, current, height, goal, max_step_height) else {
            // Blocked is steady-state contention, not an error; retry next tick.
            continue;
        };

        let next_height = grid.height_at(next.0, next.1).unwrap_or(height);
        if let Ok(mut pos) = registry.world().get::<&mut TilePos>(entity) {
            pos.x = next.0;
            pos.y = next.1;
            pos.height = next_height;
        }
        if let Some(dir) = Direction::between(current, next) {
            if let Ok(mut rot) = registry.world().get::<&mut Rotation>(entity) {
                rot.body = dir;
                // Head follows the body unless an explicit rotate overrides
                // it later.
                rot.head = dir;
            }
        }
        reserved.insert(next);
        outcome.moved.push(id);
    }

    outcome
}

/// Pick the next tile toward `goal`: the diagonal when both axis deltas
/// are non-zero and the diagonal is walkable, otherwise the larger-delta
/// axis, with the remaining axis-aligned step as the fallback.
fn next_step(
    grid: &Grid,
    reserved: &HashSet<(i32, i32)>,
    current: (i32, i32),
    current_height: f32,
    goal: (i32, i32),
    max_step_height: f32,
) -> Option<(i32, i32)> {
    let dx = (goal.0 - current.0).signum();
    let dy = (goal.1 - current.1).signum();
    let adx = (goal.0 - current.0).abs();
    let ady = (goal.1 - current.1).abs();

    let mut candidates: Vec<(i32, i32)> = Vec::with_capacity(3);
    if dx != 0 && dy != 0 {
        let diagonal = (current.0 + dx, current.1 + dy);
        if grid.is_walkable(diagonal.0, diagonal.1) {
            candidates.push(diagonal);
        }
    }
    let x_step = (current.0 + dx, current.1);
    let y_step = (current.0, current.1 + dy);
    if adx >= ady {
        if dx != 0 {
            candidates.push(x_step);
        }
        if dy != 0 {
            candidates.push(y_step);
        }
    } else {
        if dy != 0 {
            candidates.push(y_step);
        }
        if dx != 0 {
            candidates.push(x_step);
        }
    }

    candidates.into_iter().find(|&tile| {
        step_allowed(grid, reserved, current_height, tile, max_step_height)
    })
}

fn step_allowed(
    grid: &Grid,
    reserved: &HashSet<(i32, i32)>,
    current_height: f32,
    tile: (i32, i32),
    max_step_height: f32,
) -> bool {
    if !grid.is_walkable(tile.0, tile.1) {
        return false;
    }
    if reserved.contains(&tile) {
        return false;
    }
    match grid.height_at(tile.0, tile.1) {
        // Only climbing is limited; stepping down any distance is fine.
        Some(h) => h - current_height <= max_step_height,
        None => false,
    }
}

// ── Request appliers ─────────────────────────────────────────────────

/// Set an occupant's walk goal. Out-of-bounds goals are silently ignored
/// (stale client coordinates are expected, not an error). Standing up to
/// walk clears sit/lay, and a plain move cancels a pending door exit.
pub fn apply_walk_request(registry: &mut Registry, grid: &Grid, id: OccupantId, x: i32, y: i32) {
    if !grid.in_bounds(x, y) {
        return;
    }
    let Some(entity) = registry.get(id) else {
        return;
    };
    if let Ok(mut overlay) = registry.world().get::<&mut StatusOverlay>(entity) {
        overlay.remove("sit");
        overlay.remove("lay");
    }
    if let Ok(mut flags) = registry.world().get::<&mut WalkFlags>(entity) {
        flags.walk_door = false;
    }
    if let Ok(mut goal) = registry.world().get::<&mut WalkGoal>(entity) {
        goal.target = Some((x, y));
    }
}

/// Point the occupant toward the door and flag the arrival as an exit.
pub fn apply_door_request(registry: &mut Registry, grid: &Grid, id: OccupantId) {
    let Some(entity) = registry.get(id) else {
        return;
    };
    if let Ok(mut overlay) = registry.world().get::<&mut StatusOverlay>(entity) {
        overlay.remove("sit");
        overlay.remove("lay");
    }
    if let Ok(mut flags) = registry.world().get::<&mut WalkFlags>(entity) {
        flags.walk_door = true;
    }
    if let Ok(mut goal) = registry.world().get::<&mut WalkGoal>(entity) {
        goal.target = Some(grid.door());
    }
}

/// Rotation-only action: face a target tile via the compass lookup,
/// independent of the stepping algorithm. Rejected while sitting or
/// lying. Returns whether the rotation changed (the caller refreshes).
pub fn apply_rotate_request(registry: &mut Registry, id: OccupantId, target: (i32, i32)) -> bool {
    let Some(entity) = registry.get(id) else {
        return false;
    };
    {
        let Ok(overlay) = registry.world().get::<&StatusOverlay>(entity) else {
            return false;
        };
        if overlay.contains("sit") || overlay.contains("lay") {
            return false;
        }
    }
    let current = match registry.world().get::<&TilePos>(entity) {
        Ok(pos) => pos.tile(),
        Err(_) => return false,
    };
    let Some(dir) = Direction::between(current, target) else {
        return false;
    };
    match registry.world().get::<&mut Rotation>(entity) {
        Ok(mut rot) => {
            let changed = rot.head != dir || rot.body != dir;
            rot.head = dir;
            rot.body = dir;
            changed
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::grid::test_support::open_grid;
    use tokio::sync::mpsc;

    fn outbox() -> mpsc::UnboundedSender<String> {
        mpsc::unbounded_channel().0
    }

    fn tile_of(reg: &Registry, id: OccupantId) -> (i32, i32) {
        let entity = reg.get(id).unwrap();
        reg.world().get::<&TilePos>(entity).unwrap().tile()
    }

    fn body_of(reg: &Registry, id: OccupantId) -> Direction {
        let entity = reg.get(id).unwrap();
        reg.world().get::<&Rotation>(entity).unwrap().body
    }

    fn goal_of(reg: &Registry, id: OccupantId) -> Option<(i32, i32)> {
        let entity = reg.get(id).unwrap();
        reg.world().get::<&WalkGoal>(entity).unwrap().target
    }

    #[test]
    fn walks_straight_south_in_three_ticks() {
        let grid = open_grid(10, 10);
        let mut reg = Registry::new();
        let id = reg.add("a", (5, 5), 0.0, Direction::North, outbox());
        apply_walk_request(&mut reg, &grid, id, 5, 8);

        for expected in [(5, 6), (5, 7), (5, 8)] {
            let outcome = movement_tick(&mut reg, &grid, 1.1);
            assert_eq!(outcome.moved, vec![id]);
            assert_eq!(tile_of(&reg, id), expected);
            assert_eq!(body_of(&reg, id), Direction::South);
        }

        // Arrival clears the goal on the following tick.
        let outcome = movement_tick(&mut reg, &grid, 1.1);
        assert!(outcome.moved.is_empty());
        assert_eq!(goal_of(&reg, id), None);
    }

    #[test]
    fn prefers_the_diagonal_when_open() {
        let grid = open_grid(10, 10);
        let mut reg = Registry::new();
        let id = reg.add("a", (2, 2), 0.0, Direction::North, outbox());
        apply_walk_request(&mut reg, &grid, id, 5, 5);

        movement_tick(&mut reg, &grid, 1.1);
        assert_eq!(tile_of(&reg, id), (3, 3));
        assert_eq!(body_of(&reg, id), Direction::SouthEast);
    }

    #[test]
    fn two_movers_one_tile_first_come_wins() {
        let grid = open_grid(10, 10);
        let mut reg = Registry::new();
        let a = reg.add("a", (4, 4), 0.0, Direction::South, outbox());
        let b = reg.add("b", (4, 6), 0.0, Direction::North, outbox());
        apply_walk_request(&mut reg, &grid, a, 4, 5);
        apply_walk_request(&mut reg, &grid, b, 4, 5);

        movement_tick(&mut reg, &grid, 1.1);
        let at_goal: Vec<_> = [a, b]
            .iter()
            .copied()
            .filter(|id| tile_of(&reg, *id) == (4, 5))
            .collect();
        assert_eq!(at_goal.len(), 1, "exactly one occupant wins the tile");
        let loser = if at_goal[0] == a { b } else { a };
        assert_eq!(goal_of(&reg, loser), Some((4, 5)), "loser's goal persists");

        // Walk the winner away; once the tile is vacated for a full tick
        // the loser takes it.
        apply_walk_request(&mut reg, &grid, at_goal[0], 0, 0);
        movement_tick(&mut reg, &grid, 1.1);
        movement_tick(&mut reg, &grid, 1.1);
        assert_eq!(tile_of(&reg, loser), (4, 5));
        assert_eq!(goal_of(&reg, loser), Some((4, 5)));
    }

    #[test]
    fn no_two_occupants_share_a_tile_after_any_tick() {
        let grid = open_grid(10, 10);
        let mut reg = Registry::new();
        let ids = [
            reg.add("a", (1, 1), 0.0, Direction::South, outbox()),
            reg.add("b", (8, 1), 0.0, Direction::South, outbox()),
            reg.add("c", (1, 8), 0.0, Direction::South, outbox()),
            reg.add("d", (8, 8), 0.0, Direction::South, outbox()),
        ];
        for id in ids {
            apply_walk_request(&mut reg, &grid, id, 5, 5);
        }

        for _ in 0..8 {
            movement_tick(&mut reg, &grid, 1.1);
            let mut tiles: Vec<_> = ids.iter().map(|id| tile_of(&reg, *id)).collect();
            // Every resting position is walkable and unique.
            for &(x, y) in &tiles {
                assert!(grid.is_walkable(x, y));
            }
            tiles.sort_unstable();
            tiles.dedup();
            assert_eq!(tiles.len(), ids.len());
        }
    }

    #[test]
    fn climb_above_max_step_height_is_rejected() {
        // Column 5 is a height-2 ledge across the whole row.
        let rows: Vec<String> = (0..8).map(|_| "00000200".to_string()).collect();
        let grid = Grid::from_rows(
            &rows,
            (0, 0),
            Direction::South,
            std::collections::HashMap::new(),
        )
        .unwrap();
        let mut reg = Registry::new();
        let id = reg.add("a", (4, 3), 0.0, Direction::East, outbox());
        apply_walk_request(&mut reg, &grid, id, 5, 3);

        let outcome = movement_tick(&mut reg, &grid, 1.1);
        assert!(outcome.moved.is_empty());
        assert_eq!(tile_of(&reg, id), (4, 3));
        assert_eq!(goal_of(&reg, id), Some((5, 3)));

        // A taller allowed step clears the ledge.
        let outcome = movement_tick(&mut reg, &grid, 2.0);
        assert_eq!(outcome.moved, vec![id]);
        assert_eq!(tile_of(&reg, id), (5, 3));
    }

    #[test]
    fn walk_lock_suspends_goal_processing() {
        let grid = open_grid(10, 10);
        let mut reg = Registry::new();
        let id = reg.add("a", (5, 5), 0.0, Direction::South, outbox());
        apply_walk_request(&mut reg, &grid, id, 5, 8);

        let entity = reg.get(id).unwrap();
        reg.world().get::<&mut WalkFlags>(entity).unwrap().walk_lock = true;
        movement_tick(&mut reg, &grid, 1.1);
        assert_eq!(tile_of(&reg, id), (5, 5));
        assert_eq!(goal_of(&reg, id), Some((5, 8)));

        reg.world().get::<&mut WalkFlags>(entity).unwrap().walk_lock = false;
        movement_tick(&mut reg, &grid, 1.1);
        assert_eq!(tile_of(&reg, id), (5, 6));
    }

    #[test]
    fn door_arrival_is_reported_as_departed() {
        let grid = open_grid(4, 4);
        let mut reg = Registry::new();
        let id = reg.add("a", (1, 0), 0.0, Direction::West, outbox());
        apply_door_request(&mut reg, &grid, id);

        let outcome = movement_tick(&mut reg, &grid, 1.1);
        assert_eq!(outcome.moved, vec![id]);
        assert_eq!(tile_of(&reg, id), grid.door());

        let outcome = movement_tick(&mut reg, &grid, 1.1);
        assert_eq!(outcome.departed, vec![id]);
    }

    #[test]
    fn out_of_bounds_goal_is_silently_ignored() {
        let grid = open_grid(10, 10);
        let mut reg = Registry::new();
        let id = reg.add("a", (5, 5), 0.0, Direction::South, outbox());
        apply_walk_request(&mut reg, &grid, id, 42, -3);
        assert_eq!(goal_of(&reg, id), None);

        let outcome = movement_tick(&mut reg, &grid, 1.1);
        assert!(outcome.moved.is_empty());
        assert_eq!(tile_of(&reg, id), (5, 5));
    }

    #[test]
    fn rotation_follows_compass_and_is_rejected_while_seated() {
        let mut reg = Registry::new();
        let id = reg.add("a", (5, 5), 0.0, Direction::North, outbox());

        assert!(apply_rotate_request(&mut reg, id, (9, 5)));
        assert_eq!(body_of(&reg, id), Direction::East);
        // Same facing again reports no change.
        assert!(!apply_rotate_request(&mut reg, id, (9, 5)));

        let entity = reg.get(id).unwrap();
        reg.world()
            .get::<&mut StatusOverlay>(entity)
            .unwrap()
            .add("sit", "0.0");
        assert!(!apply_rotate_request(&mut reg, id, (5, 9)));
        assert_eq!(body_of(&reg, id), Direction::East);
    }

    #[test]
    fn walking_stands_the_occupant_up() {
        let grid = open_grid(10, 10);
        let mut reg = Registry::new();
        let id = reg.add("a", (5, 5), 0.0, Direction::North, outbox());
        let entity = reg.get(id).unwrap();
        reg.world()
            .get::<&mut StatusOverlay>(entity)
            .unwrap()
            .add("sit", "0.0");

        apply_walk_request(&mut reg, &grid, id, 5, 6);
        assert!(!reg
            .world()
            .get::<&StatusOverlay>(entity)
            .unwrap()
            .contains("sit"));
    }
}
