use std::collections::HashMap;

use serde::Deserialize;

use crate::protocol::Direction;

/// Room model catalogue compiled into the binary. Rooms are authored,
/// not generated, so the grid for a model is identical on every load.
const MODEL_CATALOGUE: &str = include_str!("models.json");

// ── Tiles ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Tile {
    pub base_height: f32,
    pub walkable: bool,
    /// Height contributed by the tallest stackable item on the tile.
    pub stack_height: f32,
    /// Set when an impassable floor item occupies the tile.
    pub blocked_by_item: bool,
}

impl Tile {
    fn open(base_height: f32) -> Self {
        Tile {
            base_height,
            walkable: true,
            stack_height: 0.0,
            blocked_by_item: false,
        }
    }

    fn closed() -> Self {
        Tile {
            base_height: 0.0,
            walkable: false,
            stack_height: 0.0,
            blocked_by_item: false,
        }
    }
}

/// Special-behavior tile: walking onto it toggles a named effect and may
/// teleport the occupant (swim-outfit curtains work this way).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trigger {
    pub name: String,
    #[serde(default)]
    pub teleport_to: Option<(i32, i32)>,
}

// ── Room model definitions ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TriggerDef {
    x: i32,
    y: i32,
    name: String,
    #[serde(default)]
    teleport_to: Option<(i32, i32)>,
}

#[derive(Debug, Deserialize)]
struct RoomModelDef {
    name: String,
    /// One string per row; `x` is unwalkable, digits are walkable base heights.
    heightmap: Vec<String>,
    door: (i32, i32),
    door_direction: Direction,
    #[serde(default)]
    triggers: Vec<TriggerDef>,
}

// ── Grid ───────────────────────────────────────────────────────────

/// Static per-room tile grid. Dimensions are fixed at load time; the only
/// mutation after that is stack-height updates from item placement.
pub struct Grid {
    width: i32,
    height: i32,
    tiles: Vec<Tile>,
    door: (i32, i32),
    door_direction: Direction,
    triggers: HashMap<(i32, i32), Trigger>,
}

impl Grid {
    /// Load a grid from the embedded model catalogue.
    ///
    /// # Errors
    ///
    /// Returns an error string for an unknown model name or a malformed
    /// definition. This is fatal to the room being loaded, nothing else.
    pub fn from_model(model: &str) -> Result<Grid, String> {
        let defs: Vec<RoomModelDef> = serde_json::from_str(MODEL_CATALOGUE)
            .map_err(|e| format!("model catalogue is malformed: {}", e))?;
        let def = defs
            .into_iter()
            .find(|d| d.name == model)
            .ok_or_else(|| format!("unknown room model '{}'", model))?;

        let triggers = def
            .triggers
            .into_iter()
            .map(|t| {
                (
                    (t.x, t.y),
                    Trigger {
                        name: t.name,
                        teleport_to: t.teleport_to,
                    },
                )
            })
            .collect();

        Grid::from_rows(&def.heightmap, def.door, def.door_direction, triggers)
    }

    pub(crate) fn from_rows(
        rows: &[String],
        door: (i32, i32),
        door_direction: Direction,
        triggers: HashMap<(i32, i32), Trigger>,
    ) -> Result<Grid, String> {
        if rows.is_empty() {
            return Err("heightmap has no rows".to_string());
        }
        let width = rows[0].len();
        if width == 0 {
            return Err("heightmap rows are empty".to_string());
        }

        let mut tiles = Vec::with_capacity(width * rows.len());
        for (y, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(format!(
                    "heightmap row {} has width {} but row 0 has width {}",
                    y,
                    row.len(),
                    width
                ));
            }
            for c in row.chars() {
                match c {
                    'x' | 'X' => tiles.push(Tile::closed()),
                    d if d.is_ascii_digit() => {
                        tiles.push(Tile::open(d.to_digit(10).unwrap_or(0) as f32))
                    }
                    other => {
                        return Err(format!("heightmap row {} has unknown tile '{}'", y, other))
                    }
                }
            }
        }

        let grid = Grid {
            width: width as i32,
            height: rows.len() as i32,
            tiles,
            door,
            door_direction,
            triggers,
        };
        if !grid.is_walkable(door.0, door.1) {
            return Err(format!("door tile {:?} is not walkable", door));
        }
        Ok(grid)
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn door(&self) -> (i32, i32) {
        self.door
    }

    pub fn door_direction(&self) -> Direction {
        self.door_direction
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    fn tile(&self, x: i32, y: i32) -> Option<&Tile> {
        if !self.in_bounds(x, y) {
            return None;
        }
        self.tiles.get((y * self.width + x) as usize)
    }

    /// False when out of bounds, the tile is marked unwalkable, or an
    /// impassable floor item sits on it.
    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        match self.tile(x, y) {
            Some(t) => t.walkable && !t.blocked_by_item,
            None => false,
        }
    }

    /// Effective height: base plus the tallest stacked item. `None` is the
    /// out-of-bounds sentinel.
    pub fn height_at(&self, x: i32, y: i32) -> Option<f32> {
        self.tile(x, y).map(|t| t.base_height + t.stack_height)
    }

    pub fn trigger_at(&self, x: i32, y: i32) -> Option<&Trigger> {
        self.triggers.get(&(x, y))
    }

    /// Narrow mutation surface for the item-placement collaborator.
    /// Out-of-bounds coordinates are ignored.
    pub fn set_stack_height(&mut self, x: i32, y: i32, stack_height: f32, blocking: bool) {
        if !self.in_bounds(x, y) {
            return;
        }
        if let Some(t) = self.tiles.get_mut((y * self.width + x) as usize) {
            t.stack_height = stack_height.max(0.0);
            t.blocked_by_item = blocking;
        }
    }
}
