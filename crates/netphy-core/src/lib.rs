//! Netphy - core data for a turn-based hex wargame
//!
//! This crate provides the game data shared by every game mode:
//! - Hex coordinate system and world-plane conversion
//! - Territory map with land/sea cells, ownership and connected regions
//! - Player registry and colour palette
//!
//! # Modules
//!
//! - [`hex`]: Offset hex coordinates, adjacency and the world grid
//! - [`map`]: Cell grid, flood fill and region partitioning
//! - [`player`]: Players and display colours
//! - [`game`]: Player registry and territory assignment

pub mod game;
pub mod hex;
pub mod map;
pub mod player;

// Re-export commonly used types
pub use game::{RosterError, WarGame};
pub use hex::{HexCoord, HexDirection, HexGrid};
pub use map::{CellJson, HexCell, HexMap, HexRegion, MapError, MapJson, DEFAULT_CELL_COLOR, LAND_COLOR};
pub use player::{Color, Player, PlayerId, NO_OWNER, PALETTE};
