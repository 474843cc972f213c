//! Player registry and territory assignment.
//!
//! `WarGame` owns the players of a match. Players are referred to everywhere
//! else by their `PlayerId`, which is the index into this registry.

use crate::hex::HexCoord;
use crate::map::{HexMap, MapError};
use crate::player::{Player, PlayerId, NO_OWNER};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the player registry
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("player limit of {0} reached")]
    Full(usize),

    #[error("no player with id {0}")]
    UnknownPlayer(PlayerId),

    #[error(transparent)]
    Map(#[from] MapError),
}

/// Registry of the players taking part in a game
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarGame {
    players: Vec<Player>,
}

impl WarGame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the given players in order
    pub fn with_players<S: AsRef<str>>(names: &[S]) -> Result<Self, RosterError> {
        let mut game = Self::new();
        for name in names {
            game.add_player(name.as_ref())?;
        }
        Ok(game)
    }

    /// Register a player and return its id.
    ///
    /// Ids are handed out sequentially from 0. `NO_OWNER` is never assigned.
    pub fn add_player(&mut self, name: &str) -> Result<PlayerId, RosterError> {
        let limit = NO_OWNER as usize;
        if self.players.len() >= limit {
            return Err(RosterError::Full(limit));
        }
        let id = self.players.len() as PlayerId;
        self.players.push(Player::new(id, name));
        Ok(id)
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Give a land cell to a player and paint it in the player's colour
    pub fn claim(&self, map: &mut HexMap, coord: HexCoord, id: PlayerId) -> Result<(), RosterError> {
        let player = self.player(id).ok_or(RosterError::UnknownPlayer(id))?;
        map.set_owner(coord, Some(id))?;
        map.at_mut(coord).set_color(player.color);
        Ok(())
    }

    /// Hand every land cell to a uniformly random registered player.
    ///
    /// Returns the number of cells assigned; nothing happens without players.
    pub fn assign_random_owners<R: Rng>(
        &self,
        map: &mut HexMap,
        rng: &mut R,
    ) -> Result<usize, RosterError> {
        if self.players.is_empty() {
            return Ok(0);
        }

        let land: Vec<HexCoord> = map.coords().filter(|c| map.at(*c).is_land()).collect();
        for coord in &land {
            let id = rng.gen_range(0..self.players.len()) as PlayerId;
            self.claim(map, *coord, id)?;
        }
        Ok(land.len())
    }
}
