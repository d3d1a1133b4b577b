use serde::{Deserialize, Serialize};

// ── Core type aliases ──────────────────────────────────────────────

/// Room-local occupant identifier. Unique within one room instance and
/// never reused while that instance is alive.
pub type OccupantId = u32;

// ── Directions ─────────────────────────────────────────────────────

/// 8-way compass rotation, clockwise from north. The numeric value is
/// what the wire format carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Direction {
    North = 0,
    NorthEast = 1,
    East = 2,
    SouthEast = 3,
    South = 4,
    SouthWest = 5,
    West = 6,
    NorthWest = 7,
}

impl Direction {
    /// Compass lookup from one tile toward another. Only the sign of each
    /// axis delta matters. Returns `None` when the tiles are equal.
    pub fn between(from: (i32, i32), to: (i32, i32)) -> Option<Direction> {
        let dx = (to.0 - from.0).signum();
        let dy = (to.1 - from.1).signum();
        match (dx, dy) {
            (0, -1) => Some(Direction::North),
            (1, -1) => Some(Direction::NorthEast),
            (1, 0) => Some(Direction::East),
            (1, 1) => Some(Direction::SouthEast),
            (0, 1) => Some(Direction::South),
            (-1, 1) => Some(Direction::SouthWest),
            (-1, 0) => Some(Direction::West),
            (-1, -1) => Some(Direction::NorthWest),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

// ── Client → Room requests ─────────────────────────────────────────

/// Everything the packet layer can ask a room to do, as a tagged enum.
/// The short ASCII command codes of the wire are mapped here once, in
/// `parse`, instead of being string-dispatched all over the codebase.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    /// Set the occupant's walk goal.
    Move { x: i32, y: i32 },
    /// Turn head and body toward a tile without walking.
    Rotate { x: i32, y: i32 },
    /// Walk to the door tile and leave the room on arrival.
    WalkDoor,
    Sit,
    Lay,
    Dance,
    Wave,
    /// Start the carry/sip cycle for a hand-held item.
    Carry { item: String },
    DropCarry,
    /// Clear one named status ("dance" or "carry").
    Stop { what: String },
    Typing { active: bool },
    Say { message: String },
    LobbyOpen { name: String },
    LobbyJoin { team: usize },
    LobbyLeave,
    LobbyShuffle,
}

impl ClientRequest {
    /// Parse one inbound payload. Returns `None` for unknown codes and
    /// malformed arguments; per the error-handling contract those are
    /// silently dropped upstream, never surfaced to the client.
    pub fn parse(payload: &str) -> Option<ClientRequest> {
        let mut parts = payload.splitn(2, ' ');
        let code = parts.next()?;
        let rest = parts.next().unwrap_or("");

        match code {
            "MOVE" => {
                let (x, y) = parse_coords(rest)?;
                Some(ClientRequest::Move { x, y })
            }
            "LOOK" => {
                let (x, y) = parse_coords(rest)?;
                Some(ClientRequest::Rotate { x, y })
            }
            "DOOR" => Some(ClientRequest::WalkDoor),
            "SIT" => Some(ClientRequest::Sit),
            "LAY" => Some(ClientRequest::Lay),
            "DANCE" => Some(ClientRequest::Dance),
            "WAVE" => Some(ClientRequest::Wave),
            "CARRY" => {
                let item = rest.trim();
                if item.is_empty() {
                    return None;
                }
                Some(ClientRequest::Carry {
                    item: item.to_string(),
                })
            }
            "DROP" => Some(ClientRequest::DropCarry),
            "STOP" => {
                let what = rest.trim();
                if what.is_empty() {
                    return None;
                }
                Some(ClientRequest::Stop {
                    what: what.to_ascii_lowercase(),
                })
            }
            "TYPE" => match rest.trim() {
                "1" => Some(ClientRequest::Typing { active: true }),
                "0" => Some(ClientRequest::Typing { active: false }),
                _ => None,
            },
            "SAY" => {
                if rest.is_empty() {
                    return None;
                }
                Some(ClientRequest::Say {
                    message: rest.to_string(),
                })
            }
            "GOPEN" => {
                let name = rest.trim();
                if name.is_empty() {
                    return None;
                }
                Some(ClientRequest::LobbyOpen {
                    name: name.to_string(),
                })
            }
            "GJOIN" => {
                let team = rest.trim().parse::<usize>().ok()?;
                Some(ClientRequest::LobbyJoin { team })
            }
            "GLEAVE" => Some(ClientRequest::LobbyLeave),
            "GSHUFFLE" => Some(ClientRequest::LobbyShuffle),
            _ => None,
        }
    }
}

fn parse_coords(rest: &str) -> Option<(i32, i32)> {
    let mut it = rest.split_whitespace();
    let x = it.next()?.parse::<i32>().ok()?;
    let y = it.next()?.parse::<i32>().ok()?;
    if it.next().is_some() {
        return None;
    }
    Some((x, y))
}

// ── Wire formatting helpers ────────────────────────────────────────

/// Render a height with a period decimal separator regardless of locale.
/// Whole numbers keep a trailing `.0` so the client parser stays simple.
pub fn format_height(h: f32) -> String {
    let s = format!("{}", h);
    if s.contains('.') {
        s
    } else {
        format!("{}.0", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_between_cardinals_and_diagonals() {
        assert_eq!(Direction::between((5, 5), (5, 8)), Some(Direction::South));
        assert_eq!(Direction::between((5, 5), (5, 2)), Some(Direction::North));
        assert_eq!(Direction::between((5, 5), (9, 5)), Some(Direction::East));
        assert_eq!(Direction::between((5, 5), (0, 5)), Some(Direction::West));
        assert_eq!(
            Direction::between((5, 5), (7, 3)),
            Some(Direction::NorthEast)
        );
        assert_eq!(
            Direction::between((5, 5), (3, 7)),
            Some(Direction::SouthWest)
        );
        assert_eq!(Direction::between((5, 5), (5, 5)), None);
    }

    #[test]
    fn direction_indices_match_wire_values() {
        assert_eq!(Direction::North.index(), 0);
        assert_eq!(Direction::South.index(), 4);
        assert_eq!(Direction::NorthWest.index(), 7);
    }

    #[test]
    fn parse_move_and_look() {
        assert_eq!(
            ClientRequest::parse("MOVE 3 7"),
            Some(ClientRequest::Move { x: 3, y: 7 })
        );
        assert_eq!(
            ClientRequest::parse("LOOK 0 0"),
            Some(ClientRequest::Rotate { x: 0, y: 0 })
        );
    }

    #[test]
    fn parse_rejects_malformed_coordinates() {
        assert_eq!(ClientRequest::parse("MOVE 3"), None);
        assert_eq!(ClientRequest::parse("MOVE a b"), None);
        assert_eq!(ClientRequest::parse("MOVE 3 7 9"), None);
        assert_eq!(ClientRequest::parse("MOVE"), None);
    }

    #[test]
    fn parse_statuses_and_unknown_codes() {
        assert_eq!(
            ClientRequest::parse("CARRY Juice"),
            Some(ClientRequest::Carry {
                item: "Juice".to_string()
            })
        );
        assert_eq!(
            ClientRequest::parse("STOP Dance"),
            Some(ClientRequest::Stop {
                what: "dance".to_string()
            })
        );
        assert_eq!(
            ClientRequest::parse("TYPE 1"),
            Some(ClientRequest::Typing { active: true })
        );
        assert_eq!(ClientRequest::parse("TYPE yes"), None);
        assert_eq!(ClientRequest::parse("FROBNICATE 1 2"), None);
        assert_eq!(ClientRequest::parse("CARRY"), None);
    }

    #[test]
    fn height_formatting_keeps_period_separator() {
        assert_eq!(format_height(0.0), "0.0");
        assert_eq!(format_height(1.5), "1.5");
        assert_eq!(format_height(2.0), "2.0");
    }
}
