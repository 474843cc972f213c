//! Players and display colours.
//!
//! This module contains:
//! - `Color`, the RGB display colour carried by cells and players
//! - The fixed player colour palette
//! - `Player`, a registered participant

use serde::{Deserialize, Serialize};

/// Player identifier, assigned sequentially from 0 at registration
pub type PlayerId = u8;

/// Reserved identifier meaning "no owner" where a plain byte is needed
pub const NO_OWNER: PlayerId = PlayerId::MAX;

/// RGB display colour with components in 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// The same hue at half brightness
    pub fn darkened(self) -> Self {
        Self::new(0.5 * self.r, 0.5 * self.g, 0.5 * self.b)
    }
}

/// Player colours, indexed by registration order
pub const PALETTE: [Color; 5] = [
    Color::new(1.0, 0.0, 0.0),
    Color::new(1.0, 1.0, 0.0),
    Color::new(0.0, 0.8, 0.0),
    Color::new(1.0, 0.6, 0.2),
    Color::new(0.2, 0.5, 0.7),
];

/// A registered player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: Color,
}

impl Player {
    /// Create a player, deriving its colour from the palette
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: Self::color_for(id),
        }
    }

    /// Palette colour for a player index
    pub fn color_for(id: PlayerId) -> Color {
        PALETTE[id as usize % PALETTE.len()]
    }
}
