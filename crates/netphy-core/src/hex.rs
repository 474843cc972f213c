//! Hex coordinate system using column-offset coordinates (x, y).
//!
//! This module provides the foundational geometry for the hex map:
//! - `HexCoord`: Identifies individual hex cells
//! - `HexDirection`: The six neighbour directions
//! - `HexGrid`: Conversion between hex cells and the continuous world plane
//!
//! The grid is modelled as an isometric projection of cubes onto the
//! x + y + z = 0 plane. Cells are addressed by column `x` and row `y`, with
//! odd columns shifted half a row up. Because of that shift the neighbour
//! offsets differ between even and odd columns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Neighbour offsets for cells in an even column, in `HexDirection::ALL` order.
const EVEN_COLUMN_OFFSETS: [(i32, i32); 6] = [(-1, 0), (0, 1), (1, 0), (1, -1), (0, -1), (-1, -1)];

/// Neighbour offsets for cells in an odd column, in `HexDirection::ALL` order.
const ODD_COLUMN_OFFSETS: [(i32, i32); 6] = [(-1, 1), (0, 1), (1, 1), (1, 0), (0, -1), (-1, 0)];

/// Direction of a neighbouring hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HexDirection {
    /// Top-left neighbour
    NorthWest,
    /// Neighbour directly above
    North,
    /// Top-right neighbour
    NorthEast,
    /// Bottom-right neighbour
    SouthEast,
    /// Neighbour directly below
    South,
    /// Bottom-left neighbour
    SouthWest,
}

impl HexDirection {
    /// All directions in clockwise order starting from NorthWest
    pub const ALL: [HexDirection; 6] = [
        HexDirection::NorthWest,
        HexDirection::North,
        HexDirection::NorthEast,
        HexDirection::SouthEast,
        HexDirection::South,
        HexDirection::SouthWest,
    ];

    /// The direction pointing back the other way
    pub fn opposite(self) -> Self {
        match self {
            HexDirection::NorthWest => HexDirection::SouthEast,
            HexDirection::North => HexDirection::South,
            HexDirection::NorthEast => HexDirection::SouthWest,
            HexDirection::SouthEast => HexDirection::NorthWest,
            HexDirection::South => HexDirection::North,
            HexDirection::SouthWest => HexDirection::NorthEast,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Offset coordinate of a hex cell.
///
/// - `x` is the column and increases going east
/// - `y` is the row and increases going north
/// - Odd columns sit half a row higher than even columns
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct HexCoord {
    /// Column
    pub x: i32,
    /// Row
    pub y: i32,
}

impl HexCoord {
    /// Create a new hex coordinate
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Whether this cell lies in an odd (half-row shifted) column
    pub const fn is_odd_column(&self) -> bool {
        self.x % 2 != 0
    }

    fn offsets(&self) -> &'static [(i32, i32); 6] {
        if self.is_odd_column() {
            &ODD_COLUMN_OFFSETS
        } else {
            &EVEN_COLUMN_OFFSETS
        }
    }

    /// The six neighbouring hexes in clockwise order:
    /// northwest, north, northeast, southeast, south, southwest
    pub fn adjacent(&self) -> [HexCoord; 6] {
        let offsets = *self.offsets();
        offsets.map(|(dx, dy)| HexCoord::new(self.x + dx, self.y + dy))
    }

    /// Get the neighbour in a specific direction
    pub fn neighbor(&self, direction: HexDirection) -> HexCoord {
        let (dx, dy) = self.offsets()[direction.index()];
        HexCoord::new(self.x + dx, self.y + dy)
    }

    /// Cube coordinates (x, y, z) with x + y + z = 0
    pub fn to_cube(&self) -> (i32, i32, i32) {
        let cx = self.x;
        let cy = self.y - (self.x - (self.x & 1)) / 2;
        (cx, cy, -cx - cy)
    }

    /// Distance to another hex (in hex steps)
    pub fn distance_to(&self, other: &HexCoord) -> u32 {
        let (ax, ay, az) = self.to_cube();
        let (bx, by, bz) = other.to_cube();
        (((ax - bx).abs() + (ay - by).abs() + (az - bz).abs()) / 2) as u32
    }
}

impl fmt::Display for HexCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A regular hexagon grid laid over the world plane.
///
/// Holds only the horizontal and vertical spacing between cell centres;
/// every conversion is a pure function of those two scalars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HexGrid {
    x_spacing: f64,
    y_spacing: f64,
}

impl Default for HexGrid {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl HexGrid {
    /// Create a grid with the given cell spacing
    pub fn new(x_spacing: f64, y_spacing: f64) -> Self {
        Self {
            x_spacing,
            y_spacing,
        }
    }

    pub fn set_spacing(&mut self, x_spacing: f64, y_spacing: f64) {
        self.x_spacing = x_spacing;
        self.y_spacing = y_spacing;
    }

    pub fn spacing(&self) -> (f64, f64) {
        (self.x_spacing, self.y_spacing)
    }

    /// Snap a world-plane point to the hex containing it.
    ///
    /// Computes fractional cube coordinates, rounds each component and then
    /// corrects the component with the largest rounding error so that
    /// x + y + z = 0 holds again. Ties go to x, then y, then z.
    ///
    /// Returns `None` for points that are not finite after scaling or whose
    /// cell does not fit an `i32` coordinate.
    pub fn world_to_hex(&self, (wx, wy): (f64, f64)) -> Option<HexCoord> {
        let x = wx / self.x_spacing;
        let y = wy / self.y_spacing;
        let z = -0.5 * x - y;
        let y = y - 0.5 * x;

        // Bounds every component so the i64 arithmetic below cannot overflow
        let limit = 4.0 * f64::from(i32::MAX);
        if [x, y, z].iter().any(|v| !v.is_finite() || v.abs() > limit) {
            return None;
        }

        let mut ix = (x + 0.5).floor() as i64;
        let mut iy = (y + 0.5).floor() as i64;
        let mut iz = (z + 0.5).floor() as i64;

        let s = ix + iy + iz;
        if s != 0 {
            let dx = (ix as f64 - x).abs();
            let dy = (iy as f64 - y).abs();
            let dz = (iz as f64 - z).abs();
            if dx >= dy && dx >= dz {
                ix -= s;
            } else if dy >= dx && dy >= dz {
                iy -= s;
            } else {
                iz -= s;
            }
        }

        // Back from cube to offset rows; integer division truncates toward zero
        let d = iy - iz;
        let row = if d < 0 {
            (d - 1 + ((ix + 1) & 1)) / 2
        } else {
            (d + 1 - (ix & 1)) / 2
        };

        Some(HexCoord::new(
            i32::try_from(ix).ok()?,
            i32::try_from(row).ok()?,
        ))
    }

    /// World-plane centre of a hex cell
    pub fn hex_to_world(&self, coord: HexCoord) -> (f64, f64) {
        let (x, y) = Self::unscaled_centre(coord);
        (x * self.x_spacing, y * self.y_spacing)
    }

    fn unscaled_centre(coord: HexCoord) -> (f64, f64) {
        let column = f64::from(coord.x);
        let even_base = if coord.is_odd_column() {
            coord.x - 1
        } else {
            coord.x
        };
        let y = f64::from(coord.y) + 0.5 * column - 0.5 * f64::from(even_base);
        (column, y)
    }
}
