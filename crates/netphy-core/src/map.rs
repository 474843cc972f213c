//! Territory map: a fixed rectangle of hex cells.
//!
//! This module contains:
//! - `HexCell`, the per-cell land/owner/colour state
//! - `HexMap`, the grid of cells with bounds checks and connectivity queries
//! - `HexRegion`, a maximal connected group of same-owner land cells
//! - `MapJson`, a flat serializable snapshot of a map
//!
//! Sea cells never have an owner. Ownership only means something on land.

use crate::hex::HexCoord;
use crate::player::{Color, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

/// Display colour of untouched cells
pub const DEFAULT_CELL_COLOR: Color = Color::new(0.15, 0.15, 0.15);

/// Display colour of land painted in the editor
pub const LAND_COLOR: Color = Color::new(1.0, 1.0, 0.8);

/// Errors from checked map operations
#[derive(Debug, Error)]
pub enum MapError {
    #[error("coordinate {0} is outside the map")]
    OutOfBounds(HexCoord),

    #[error("cell {0} is sea and cannot be owned")]
    SeaCell(HexCoord),

    #[error("snapshot is {width}x{height} but holds {cells} cells")]
    CellCount { width: u32, height: u32, cells: usize },

    #[error("invalid map json: {0}")]
    Json(#[from] serde_json::Error),
}

/// State of a single hex cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexCell {
    land: bool,
    owner: Option<PlayerId>,
    color: Color,
}

impl Default for HexCell {
    fn default() -> Self {
        Self {
            land: false,
            owner: None,
            color: DEFAULT_CELL_COLOR,
        }
    }
}

impl HexCell {
    pub fn is_land(&self) -> bool {
        self.land
    }

    /// Switch between land and sea. Turning a cell to sea drops its owner.
    pub fn set_land(&mut self, land: bool) {
        self.land = land;
        if !land {
            self.owner = None;
        }
    }

    pub fn owner(&self) -> Option<PlayerId> {
        self.owner
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }
}

/// A maximal group of connected land cells sharing one owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexRegion {
    pub owner: Option<PlayerId>,
    /// Member cells, sorted
    pub cells: Vec<HexCoord>,
}

impl HexRegion {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, coord: &HexCoord) -> bool {
        self.cells.binary_search(coord).is_ok()
    }
}

/// Fixed-size rectangular map of hex cells.
///
/// Every coordinate with `0 <= x < width` and `0 <= y < height` is valid.
/// Dimensions never change after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexMap {
    width: u32,
    height: u32,
    /// Column-major: index is `x * height + y`
    cells: Vec<HexCell>,
}

impl HexMap {
    /// Create a map of all-sea cells
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![HexCell::default(); width as usize * height as usize],
        }
    }

    /// Map dimensions as (width, height)
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Check position lies on the map
    pub fn is_valid(&self, coord: HexCoord) -> bool {
        coord.x >= 0
            && coord.y >= 0
            && (coord.x as u32) < self.width
            && (coord.y as u32) < self.height
    }

    fn index(&self, coord: HexCoord) -> Option<usize> {
        self.is_valid(coord)
            .then(|| coord.x as usize * self.height as usize + coord.y as usize)
    }

    /// Cell at `coord`.
    ///
    /// # Panics
    ///
    /// Panics if `coord` is outside the map. Use [`HexMap::get`] for
    /// coordinates that have not been checked with [`HexMap::is_valid`].
    pub fn at(&self, coord: HexCoord) -> &HexCell {
        match self.get(coord) {
            Some(cell) => cell,
            None => panic!("hex {coord} is outside the {}x{} map", self.width, self.height),
        }
    }

    /// Mutable cell at `coord`.
    ///
    /// # Panics
    ///
    /// Panics if `coord` is outside the map.
    pub fn at_mut(&mut self, coord: HexCoord) -> &mut HexCell {
        let (width, height) = self.size();
        match self.get_mut(coord) {
            Some(cell) => cell,
            None => panic!("hex {coord} is outside the {width}x{height} map"),
        }
    }

    pub fn get(&self, coord: HexCoord) -> Option<&HexCell> {
        self.index(coord).map(|i| &self.cells[i])
    }

    pub fn get_mut(&mut self, coord: HexCoord) -> Option<&mut HexCell> {
        self.index(coord).map(move |i| &mut self.cells[i])
    }

    /// All valid coordinates, column by column
    pub fn coords(&self) -> impl Iterator<Item = HexCoord> + '_ {
        (0..self.width as i32)
            .flat_map(move |x| (0..self.height as i32).map(move |y| HexCoord::new(x, y)))
    }

    /// Number of land cells
    pub fn land_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_land()).count()
    }

    /// Assign (or clear) the owner of a land cell
    pub fn set_owner(&mut self, coord: HexCoord, owner: Option<PlayerId>) -> Result<(), MapError> {
        let cell = self.get_mut(coord).ok_or(MapError::OutOfBounds(coord))?;
        if !cell.is_land() {
            return Err(MapError::SeaCell(coord));
        }
        cell.owner = owner;
        Ok(())
    }

    /// Turn a cell into land with the editor colour
    pub fn paint_land(&mut self, coord: HexCoord) -> Result<(), MapError> {
        let cell = self.get_mut(coord).ok_or(MapError::OutOfBounds(coord))?;
        cell.set_land(true);
        cell.set_color(LAND_COLOR);
        Ok(())
    }

    /// Turn a cell back into sea
    pub fn clear_land(&mut self, coord: HexCoord) -> Result<(), MapError> {
        let cell = self.get_mut(coord).ok_or(MapError::OutOfBounds(coord))?;
        cell.set_land(false);
        cell.set_color(DEFAULT_CELL_COLOR);
        Ok(())
    }

    /// Halve the display brightness of the given cells
    pub fn darken<'a>(&mut self, coords: impl IntoIterator<Item = &'a HexCoord>) {
        for coord in coords {
            if let Some(cell) = self.get_mut(*coord) {
                cell.color = cell.color.darkened();
            }
        }
    }

    /// Flood fill from `origin` over land cells with the same owner.
    ///
    /// The result includes `origin` itself. A sea origin yields an empty set.
    ///
    /// # Panics
    ///
    /// Panics if `origin` is outside the map.
    pub fn connected(&self, origin: HexCoord) -> HashSet<HexCoord> {
        let start = self.at(origin);
        let mut visited = HashSet::new();
        if !start.is_land() {
            return visited;
        }

        let owner = start.owner();
        let mut stack = vec![origin];
        visited.insert(origin);

        while let Some(current) = stack.pop() {
            for next in current.adjacent() {
                let joins = self
                    .get(next)
                    .is_some_and(|cell| cell.is_land() && cell.owner() == owner);
                if joins && visited.insert(next) {
                    stack.push(next);
                }
            }
        }

        visited
    }

    /// Partition every land cell into maximal same-owner regions.
    ///
    /// Regions come out in order of their smallest coordinate.
    pub fn regions(&self) -> Vec<HexRegion> {
        let mut pending: BTreeSet<HexCoord> =
            self.coords().filter(|c| self.at(*c).is_land()).collect();
        let mut regions = Vec::new();

        while let Some(seed) = pending.pop_first() {
            let members = self.connected(seed);
            let mut cells: Vec<HexCoord> = members.into_iter().collect();
            cells.sort();
            for cell in &cells {
                pending.remove(cell);
            }
            regions.push(HexRegion {
                owner: self.at(seed).owner(),
                cells,
            });
        }

        regions
    }

    /// Land cells held by each owner
    pub fn territory(&self) -> BTreeMap<PlayerId, usize> {
        let mut counts = BTreeMap::new();
        for cell in self.cells.iter().filter(|c| c.is_land()) {
            if let Some(owner) = cell.owner() {
                *counts.entry(owner).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Convert to a flat representation suitable for JSON
    pub fn to_json_friendly(&self) -> MapJson {
        MapJson {
            width: self.width,
            height: self.height,
            cells: self
                .coords()
                .map(|coord| {
                    let cell = self.at(coord);
                    CellJson {
                        x: coord.x,
                        y: coord.y,
                        land: cell.land,
                        owner: cell.owner,
                        color: cell.color,
                    }
                })
                .collect(),
        }
    }

    /// Rebuild a map from a snapshot, rejecting cells outside its bounds
    pub fn from_json_friendly(snapshot: &MapJson) -> Result<Self, MapError> {
        let expected = snapshot.width as usize * snapshot.height as usize;
        if snapshot.cells.len() != expected {
            return Err(MapError::CellCount {
                width: snapshot.width,
                height: snapshot.height,
                cells: snapshot.cells.len(),
            });
        }

        let mut map = Self::new(snapshot.width, snapshot.height);
        for cell in &snapshot.cells {
            let coord = HexCoord::new(cell.x, cell.y);
            let target = map.get_mut(coord).ok_or(MapError::OutOfBounds(coord))?;
            target.set_land(cell.land);
            target.owner = if cell.land { cell.owner } else { None };
            target.color = cell.color;
        }
        Ok(map)
    }

    pub fn to_json(&self) -> Result<String, MapError> {
        Ok(serde_json::to_string_pretty(&self.to_json_friendly())?)
    }

    pub fn from_json(json: &str) -> Result<Self, MapError> {
        let snapshot: MapJson = serde_json::from_str(json)?;
        Self::from_json_friendly(&snapshot)
    }
}

/// JSON-friendly map representation with one entry per cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapJson {
    pub width: u32,
    pub height: u32,
    pub cells: Vec<CellJson>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellJson {
    pub x: i32,
    pub y: i32,
    pub land: bool,
    pub owner: Option<PlayerId>,
    pub color: Color,
}
