pub mod broadcast;
pub mod lobby;
pub mod service;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::ecs::components::{Handheld, TilePos, Typing, WalkGoal};
use crate::ecs::registry::Registry;
use crate::ecs::status::{
    spawn_carry_cycle, spawn_expiry, StatusOverlay, StatusTimers,
};
use crate::ecs::systems::movement::{
    apply_door_request, apply_rotate_request, apply_walk_request, movement_tick,
};
use crate::game::grid::Grid;
use crate::protocol::{ClientRequest, OccupantId};
use crate::room::lobby::GameLobby;

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Movement engine tick interval.
    pub tick_interval: Duration,
    /// Largest upward height step the movement engine allows.
    pub max_step_height: f32,
    pub wave_duration: Duration,
    /// How long the talk flash stays on a speaking occupant.
    pub talk_duration: Duration,
    /// Carry/sip alternations before the item is dropped automatically.
    pub carry_cycles: u32,
    pub carry_half_cycle: Duration,
    pub lobby_team_capacity: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        RoomConfig {
            tick_interval: Duration::from_millis(480),
            max_step_height: 1.1,
            wave_duration: Duration::from_millis(2000),
            talk_duration: Duration::from_millis(1500),
            carry_cycles: 12,
            carry_half_cycle: Duration::from_millis(2500),
            lobby_team_capacity: 4,
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────────

/// Everything that can happen to a room, funneled through one channel.
/// The room task is the single writer for all of its state; sessions and
/// timed status tasks only ever send commands here.
#[derive(Debug)]
pub enum RoomCommand {
    Enter {
        name: String,
        outbox: mpsc::UnboundedSender<String>,
        reply: oneshot::Sender<OccupantId>,
    },
    Leave {
        id: OccupantId,
    },
    Request {
        id: OccupantId,
        request: ClientRequest,
    },
    StatusExpired {
        id: OccupantId,
        key: String,
    },
    CarryPhase {
        id: OccupantId,
        item: String,
        drinking: bool,
    },
    CarryFinished {
        id: OccupantId,
        item: String,
    },
}

/// Cloneable sender half of a room's command channel.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub model: String,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn send(&self, cmd: RoomCommand) -> bool {
        self.tx.send(cmd).is_ok()
    }

    /// True once the room task has shut down (evicted after emptying).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Register a new occupant and wait for its room-local id. `None`
    /// means the room shut down before answering; callers retry against
    /// the room service.
    pub async fn enter(
        &self,
        name: &str,
        outbox: mpsc::UnboundedSender<String>,
    ) -> Option<OccupantId> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Enter {
                name: name.to_string(),
                outbox,
                reply,
            })
            .ok()?;
        reply_rx.await.ok()
    }
}

// ── Room ─────────────────────────────────────────────────────────────

/// One active room: grid, occupant registry, and at most one game lobby,
/// owned exclusively by the room task that `run` drives.
pub struct Room {
    model: String,
    grid: Grid,
    registry: Registry,
    lobby: Option<GameLobby>,
    config: RoomConfig,
    rx: mpsc::UnboundedReceiver<RoomCommand>,
    self_tx: mpsc::UnboundedSender<RoomCommand>,
    had_occupants: bool,
}

impl Room {
    pub fn new(
        model: &str,
        grid: Grid,
        config: RoomConfig,
        rx: mpsc::UnboundedReceiver<RoomCommand>,
        self_tx: mpsc::UnboundedSender<RoomCommand>,
    ) -> Self {
        Room {
            model: model.to_string(),
            grid,
            registry: Registry::new(),
            lobby: None,
            config,
            rx,
            self_tx,
            had_occupants: false,
        }
    }

    /// Drive the room until the last occupant leaves.
    pub async fn run(mut self) {
        info!(room = %self.model, "room online");
        let mut ticker = time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
            }
            if self.had_occupants && self.registry.is_empty() {
                break;
            }
        }
        info!(room = %self.model, "room evicted");
    }

    /// One movement-engine pass: step every occupant with a goal, apply
    /// trigger tiles, broadcast the movers, remove door-exiters.
    fn tick(&mut self) {
        let outcome = movement_tick(&mut self.registry, &self.grid, self.config.max_step_height);
        for id in &outcome.moved {
            self.apply_trigger(*id);
            broadcast::refresh(&self.registry, *id);
        }
        for id in outcome.departed {
            self.remove_occupant(id);
        }
    }

    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Enter {
                name,
                outbox,
                reply,
            } => {
                // Every entrant starts on the door tile, so two entries in
                // quick succession share it until the first walks away. The
                // end-of-tick uniqueness rule covers movement only; the
                // seeded reservation set keeps other movers off the stack
                // in the meantime.
                let door = self.grid.door();
                let height = self.grid.height_at(door.0, door.1).unwrap_or(0.0);
                let id = self.registry.add(
                    &name,
                    door,
                    height,
                    self.grid.door_direction(),
                    outbox,
                );
                self.had_occupants = true;
                info!(room = %self.model, occupant = id, name = %name, "occupant entered");
                let _ = reply.send(id);
                broadcast::refresh_all(&self.registry);
            }
            RoomCommand::Leave { id } => self.remove_occupant(id),
            RoomCommand::Request { id, request } => self.handle_request(id, request),
            RoomCommand::StatusExpired { id, key } => self.status_expired(id, &key),
            RoomCommand::CarryPhase { id, item, drinking } => {
                self.carry_phase(id, &item, drinking)
            }
            RoomCommand::CarryFinished { id, item } => self.carry_finished(id, &item),
        }
    }

    fn handle_request(&mut self, id: OccupantId, request: ClientRequest) {
        // A session can race its own removal; a stale id is a no-op.
        if self.registry.get(id).is_none() {
            debug!(room = %self.model, occupant = id, "request for an absent occupant");
            return;
        }
        match request {
            ClientRequest::Move { x, y } => {
                // The tick's subsequent broadcast is the only observable effect.
                apply_walk_request(&mut self.registry, &self.grid, id, x, y);
            }
            ClientRequest::Rotate { x, y } => {
                if !self.grid.in_bounds(x, y) {
                    return;
                }
                if apply_rotate_request(&mut self.registry, id, (x, y)) {
                    broadcast::refresh(&self.registry, id);
                }
            }
            ClientRequest::WalkDoor => {
                apply_door_request(&mut self.registry, &self.grid, id);
            }
            ClientRequest::Sit => self.settle(id, "sit"),
            ClientRequest::Lay => self.settle(id, "lay"),
            ClientRequest::Dance => self.dance(id),
            ClientRequest::Wave => {
                self.handle_status(id, "wave", "", self.config.wave_duration)
            }
            ClientRequest::Carry { item } => self.carry_item(id, &item),
            ClientRequest::DropCarry => self.drop_carryd_item(id),
            ClientRequest::Stop { what } => match what.as_str() {
                "dance" => {
                    if self.remove_status(id, "dance") {
                        broadcast::refresh(&self.registry, id);
                    }
                }
                "carry" => self.drop_carryd_item(id),
                _ => {}
            },
            ClientRequest::Typing { active } => {
                if let Some(entity) = self.registry.get(id) {
                    if let Ok(mut typing) = self.registry.world().get::<&mut Typing>(entity) {
                        typing.active = active;
                    }
                }
                broadcast::deliver(
                    &self.registry,
                    &format!("TYPE {} {}", id, u8::from(active)),
                );
            }
            ClientRequest::Say { message } => {
                broadcast::deliver(&self.registry, &format!("CHAT {} {}", id, message));
                self.handle_status(id, "talk", "", self.config.talk_duration);
            }
            ClientRequest::LobbyOpen { name } => self.lobby_open(id, &name),
            ClientRequest::LobbyJoin { team } => self.lobby_join(id, team),
            ClientRequest::LobbyLeave => self.lobby_leave(id),
            ClientRequest::LobbyShuffle => self.lobby_shuffle(id),
        }
    }

    // ── Occupant lifecycle ───────────────────────────────────────────

    fn remove_occupant(&mut self, id: OccupantId) {
        let mut close_lobby = false;
        if let Some(lobby) = &mut self.lobby {
            lobby.leave(id);
            close_lobby = lobby.owner == id;
        }
        if close_lobby {
            self.lobby = None;
            broadcast::deliver(&self.registry, "LOBBY close");
        }
        if self.registry.remove(id) {
            info!(room = %self.model, occupant = id, "occupant left");
            broadcast::deliver(&self.registry, &format!("LEAVE {}", id));
        }
    }

    /// Walking onto a trigger tile toggles its named effect and may
    /// teleport the occupant (swim curtains).
    fn apply_trigger(&mut self, id: OccupantId) {
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        let tile = match self.registry.world().get::<&TilePos>(entity) {
            Ok(pos) => pos.tile(),
            Err(_) => return,
        };
        let Some(trigger) = self.grid.trigger_at(tile.0, tile.1) else {
            return;
        };
        let name = trigger.name.clone();
        let teleport = trigger.teleport_to;

        if let Ok(mut overlay) = self.registry.world().get::<&mut StatusOverlay>(entity) {
            if overlay.contains(&name) {
                overlay.remove(&name);
            } else {
                overlay.add(&name, "");
            }
        }
        // The destination must be walkable and free, or the occupant stays
        // on the trigger tile. Tile uniqueness holds across teleports too.
        if let Some((x, y)) = teleport {
            if !self.grid.is_walkable(x, y) || self.tile_occupied(x, y) {
                return;
            }
            if let Some(height) = self.grid.height_at(x, y) {
                if let Ok(mut pos) = self.registry.world().get::<&mut TilePos>(entity) {
                    pos.x = x;
                    pos.y = y;
                    pos.height = height;
                }
                // The teleport ends the walk.
                if let Ok(mut goal) = self.registry.world().get::<&mut WalkGoal>(entity) {
                    goal.target = None;
                }
            }
        }
    }

    fn tile_occupied(&self, x: i32, y: i32) -> bool {
        self.registry
            .world()
            .query::<&TilePos>()
            .iter()
            .any(|(_, pos)| pos.tile() == (x, y))
    }

    // ── Status handling ──────────────────────────────────────────────

    fn remove_status(&mut self, id: OccupantId, key: &str) -> bool {
        let Some(entity) = self.registry.get(id) else {
            return false;
        };
        match self.registry.world().get::<&mut StatusOverlay>(entity) {
            Ok(mut overlay) => overlay.remove(key),
            Err(_) => false,
        }
    }

    /// Add a time-bounded status and schedule its removal; refreshes the
    /// room now and again when the expiry lands.
    fn handle_status(&mut self, id: OccupantId, key: &str, value: &str, duration: Duration) {
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        match self.registry.world().get::<&mut StatusOverlay>(entity) {
            Ok(mut overlay) => overlay.add(key, value),
            Err(_) => return,
        }
        if let Ok(mut timers) = self.registry.world().get::<&mut StatusTimers>(entity) {
            timers.install(
                key,
                spawn_expiry(self.self_tx.clone(), id, key.to_string(), duration),
            );
        }
        broadcast::refresh(&self.registry, id);
    }

    fn status_expired(&mut self, id: OccupantId, key: &str) {
        let Some(entity) = self.registry.get(id) else {
            // The occupant left before the timer landed.
            return;
        };
        if let Ok(mut timers) = self.registry.world().get::<&mut StatusTimers>(entity) {
            timers.clear(key);
        }
        if self.remove_status(id, key) {
            broadcast::refresh(&self.registry, id);
        }
    }

    /// Sit or lay where the occupant stands. Clears the walk goal and any
    /// dance; the status value carries the resting height.
    fn settle(&mut self, id: OccupantId, key: &str) {
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        let height = match self.registry.world().get::<&TilePos>(entity) {
            Ok(pos) => pos.height,
            Err(_) => return,
        };
        if let Ok(mut goal) = self.registry.world().get::<&mut WalkGoal>(entity) {
            goal.target = None;
        }
        if let Ok(mut overlay) = self.registry.world().get::<&mut StatusOverlay>(entity) {
            overlay.remove("dance");
            overlay.remove(if key == "sit" { "lay" } else { "sit" });
            overlay.add(key, &crate::protocol::format_height(height));
        }
        broadcast::refresh(&self.registry, id);
    }

    /// Dancing requires standing and empties the hands first.
    fn dance(&mut self, id: OccupantId) {
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        {
            let Ok(overlay) = self.registry.world().get::<&StatusOverlay>(entity) else {
                return;
            };
            if overlay.contains("sit") || overlay.contains("lay") {
                return;
            }
        }
        if let Ok(mut timers) = self.registry.world().get::<&mut StatusTimers>(entity) {
            timers.cancel("carryd");
        }
        if let Ok(mut handheld) = self.registry.world().get::<&mut Handheld>(entity) {
            handheld.item = None;
        }
        if let Ok(mut overlay) = self.registry.world().get::<&mut StatusOverlay>(entity) {
            overlay.remove("carryd");
            overlay.remove("drink");
            overlay.add("dance", "");
        }
        broadcast::refresh(&self.registry, id);
    }

    // ── Carry cycle ──────────────────────────────────────────────────

    /// Start carrying an item. Any prior carry cycle is cancelled first;
    /// the item becomes visible with the first half-cycle.
    fn carry_item(&mut self, id: OccupantId, item: &str) {
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        if let Ok(mut timers) = self.registry.world().get::<&mut StatusTimers>(entity) {
            timers.cancel("carryd");
        }
        let mut cleared = false;
        if let Ok(mut overlay) = self.registry.world().get::<&mut StatusOverlay>(entity) {
            cleared |= overlay.remove("dance");
            cleared |= overlay.remove("carryd");
            cleared |= overlay.remove("drink");
        }
        if let Ok(mut handheld) = self.registry.world().get::<&mut Handheld>(entity) {
            handheld.item = Some(item.to_string());
        }
        if let Ok(mut timers) = self.registry.world().get::<&mut StatusTimers>(entity) {
            timers.install(
                "carryd",
                spawn_carry_cycle(
                    self.self_tx.clone(),
                    id,
                    item.to_string(),
                    self.config.carry_cycles,
                    self.config.carry_half_cycle,
                ),
            );
        }
        if cleared {
            broadcast::refresh(&self.registry, id);
        }
    }

    /// Cancel the carry cycle. Distinct outcome from an error: cancelling
    /// an already-finished or absent cycle is simply a no-op.
    fn drop_carryd_item(&mut self, id: OccupantId) {
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        if let Ok(mut timers) = self.registry.world().get::<&mut StatusTimers>(entity) {
            timers.cancel("carryd");
        }
        if let Ok(mut handheld) = self.registry.world().get::<&mut Handheld>(entity) {
            handheld.item = None;
        }
        let mut removed = false;
        if let Ok(mut overlay) = self.registry.world().get::<&mut StatusOverlay>(entity) {
            removed |= overlay.remove("carryd");
            removed |= overlay.remove("drink");
        }
        if removed {
            broadcast::refresh(&self.registry, id);
        }
    }

    fn carry_phase(&mut self, id: OccupantId, item: &str, drinking: bool) {
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        {
            // A queued phase from a superseded cycle is ignored.
            let Ok(handheld) = self.registry.world().get::<&Handheld>(entity) else {
                return;
            };
            if handheld.item.as_deref() != Some(item) {
                return;
            }
        }
        if let Ok(mut overlay) = self.registry.world().get::<&mut StatusOverlay>(entity) {
            if drinking {
                overlay.remove("carryd");
                overlay.add("drink", item);
            } else {
                overlay.remove("drink");
                overlay.add("carryd", item);
            }
        }
        broadcast::refresh(&self.registry, id);
    }

    fn carry_finished(&mut self, id: OccupantId, item: &str) {
        let Some(entity) = self.registry.get(id) else {
            return;
        };
        {
            let Ok(handheld) = self.registry.world().get::<&Handheld>(entity) else {
                return;
            };
            if handheld.item.as_deref() != Some(item) {
                return;
            }
        }
        if let Ok(mut handheld) = self.registry.world().get::<&mut Handheld>(entity) {
            handheld.item = None;
        }
        if let Ok(mut timers) = self.registry.world().get::<&mut StatusTimers>(entity) {
            timers.clear("carryd");
        }
        let mut removed = false;
        if let Ok(mut overlay) = self.registry.world().get::<&mut StatusOverlay>(entity) {
            removed |= overlay.remove("carryd");
            removed |= overlay.remove("drink");
        }
        if removed {
            broadcast::refresh(&self.registry, id);
        }
    }

    // ── Game lobby ───────────────────────────────────────────────────

    fn lobby_open(&mut self, id: OccupantId, name: &str) {
        if self.lobby.is_some() {
            // Zero-or-one lobby per room.
            return;
        }
        self.lobby = Some(GameLobby::new(name, id, self.config.lobby_team_capacity));
        broadcast::deliver(&self.registry, &format!("LOBBY open {} {}", name, id));
    }

    fn lobby_join(&mut self, id: OccupantId, team: usize) {
        let Some(lobby) = &mut self.lobby else {
            return;
        };
        if lobby.join(id, team) {
            broadcast::deliver(&self.registry, &format!("LOBBY join {} {}", id, team));
        }
    }

    fn lobby_leave(&mut self, id: OccupantId) {
        let Some(lobby) = &mut self.lobby else {
            return;
        };
        // A non-participant's leave must not evict the lobby.
        if !lobby.leave(id) {
            return;
        }
        broadcast::deliver(&self.registry, &format!("LOBBY leave {}", id));
        if lobby.participant_count() == 0 {
            self.lobby = None;
            broadcast::deliver(&self.registry, "LOBBY close");
        }
    }

    fn lobby_shuffle(&mut self, id: OccupantId) {
        let Some(lobby) = &mut self.lobby else {
            return;
        };
        if lobby.owner != id {
            return;
        }
        lobby.shuffle(&mut rand::thread_rng());
        let roster: Vec<String> = lobby
            .participants()
            .map(|p| format!("{}:{}", p, lobby.team_of(p).unwrap_or(0)))
            .collect();
        let line = format!("LOBBY teams {}", roster.join(" "));
        broadcast::deliver(&self.registry, &line);
    }
}
