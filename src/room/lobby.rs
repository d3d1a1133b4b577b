use rand::seq::SliceRandom;

use crate::protocol::OccupantId;

pub const TEAM_COUNT: usize = 2;

/// The room's mini-game lobby. At most one exists per room; participants
/// are ordinary occupants and keep walking around while signed up. Game
/// play itself is handled elsewhere; the lobby only tracks rosters.
#[derive(Debug)]
pub struct GameLobby {
    pub name: String,
    pub owner: OccupantId,
    teams: [Vec<OccupantId>; TEAM_COUNT],
    team_capacity: usize,
}

impl GameLobby {
    pub fn new(name: &str, owner: OccupantId, team_capacity: usize) -> Self {
        GameLobby {
            name: name.to_string(),
            owner,
            teams: Default::default(),
            team_capacity,
        }
    }

    /// Sign an occupant up for a team. Fails (returns false) for an
    /// unknown team, a full team, or an occupant already signed up.
    pub fn join(&mut self, id: OccupantId, team: usize) -> bool {
        if team >= TEAM_COUNT || self.contains(id) {
            return false;
        }
        if self.teams[team].len() >= self.team_capacity {
            return false;
        }
        self.teams[team].push(id);
        true
    }

    /// Idempotent; returns whether the occupant was signed up.
    pub fn leave(&mut self, id: OccupantId) -> bool {
        let before = self.participant_count();
        for team in &mut self.teams {
            team.retain(|p| *p != id);
        }
        self.participant_count() != before
    }

    pub fn contains(&self, id: OccupantId) -> bool {
        self.teams.iter().any(|t| t.contains(&id))
    }

    pub fn team_of(&self, id: OccupantId) -> Option<usize> {
        self.teams.iter().position(|t| t.contains(&id))
    }

    pub fn participant_count(&self) -> usize {
        self.teams.iter().map(|t| t.len()).sum()
    }

    pub fn participants(&self) -> impl Iterator<Item = OccupantId> + '_ {
        self.teams.iter().flatten().copied()
    }

    /// Redistribute everyone across the teams as evenly as possible, in
    /// random order. Only the lobby owner may trigger this.
    pub fn shuffle<R: rand::Rng>(&mut self, rng: &mut R) {
        let mut all: Vec<OccupantId> = self.teams.iter().flatten().copied().collect();
        all.shuffle(rng);
        for team in &mut self.teams {
            team.clear();
        }
        for (i, id) in all.into_iter().enumerate() {
            self.teams[i % TEAM_COUNT].push(id);
        }
    }
}
