//! Integration tests for the netphy core.
//!
//! These tests exercise the grid, map and registry together the way the
//! editor and play modes drive them.

use netphy_core::*;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

/// Paint a filled rectangle of land
fn fill_land(map: &mut HexMap) {
    let coords: Vec<HexCoord> = map.coords().collect();
    for c in coords {
        map.paint_land(c).unwrap();
    }
}

/// Build the default five-player roster
fn default_game() -> WarGame {
    WarGame::with_players(&["Dan", "Abe", "Tim", "Mickey", "Zen"]).unwrap()
}

#[test]
fn test_editor_click_paints_snapped_cell() {
    let grid = HexGrid::new(1.5, 1.732050807);
    let mut map = HexMap::new(64, 32);

    // A click slightly off the centre of (7, 4)
    let (x, y) = grid.hex_to_world(HexCoord::new(7, 4));
    let clicked = grid.world_to_hex((x + 0.1, y - 0.2)).unwrap();
    assert!(map.is_valid(clicked));
    map.paint_land(clicked).unwrap();

    assert_eq!(clicked, HexCoord::new(7, 4));
    assert_eq!(map.land_count(), 1);
    assert_eq!(map.at(clicked).color(), LAND_COLOR);
}

#[test]
fn test_clicks_outside_the_map_are_rejected() {
    let grid = HexGrid::default();
    let map = HexMap::new(4, 4);
    let outside = grid.world_to_hex((-3.0, 1.0)).unwrap();
    assert!(!map.is_valid(outside));
    assert!(map.get(outside).is_none());
}

#[test]
fn test_random_owners_partition_into_regions() {
    let game = default_game();
    let mut map = HexMap::new(16, 12);
    fill_land(&mut map);
    map.clear_land(HexCoord::new(5, 5)).unwrap();
    map.clear_land(HexCoord::new(5, 6)).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    game.assign_random_owners(&mut map, &mut rng).unwrap();

    let regions = map.regions();
    let covered: usize = regions.iter().map(HexRegion::len).sum();
    assert_eq!(covered, map.land_count());

    let unique: HashSet<HexCoord> = regions.iter().flat_map(|r| r.cells.iter().copied()).collect();
    assert_eq!(unique.len(), covered);
    assert!(!unique.contains(&HexCoord::new(5, 5)));

    // Every region is exactly the flood fill of any of its members
    for region in &regions {
        let from_member: HashSet<HexCoord> = map.connected(region.cells[0]);
        let expected: HashSet<HexCoord> = region.cells.iter().copied().collect();
        assert_eq!(from_member, expected);
    }

    let territory = map.territory();
    assert_eq!(territory.values().sum::<usize>(), map.land_count());
}

#[test]
fn test_claiming_joins_regions() {
    let game = default_game();
    let mut map = HexMap::new(3, 1);
    fill_land(&mut map);

    game.claim(&mut map, HexCoord::new(0, 0), 2).unwrap();
    game.claim(&mut map, HexCoord::new(2, 0), 2).unwrap();
    game.claim(&mut map, HexCoord::new(1, 0), 3).unwrap();
    assert_eq!(map.regions().len(), 3);

    game.claim(&mut map, HexCoord::new(1, 0), 2).unwrap();
    let regions = map.regions();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].owner, Some(2));
    assert_eq!(map.territory().get(&2), Some(&3));
}

#[test]
fn test_connected_then_darken_like_the_editor() {
    let game = default_game();
    let mut map = HexMap::new(4, 4);
    fill_land(&mut map);
    let coords: Vec<HexCoord> = map.coords().collect();
    for c in coords {
        game.claim(&mut map, c, 1).unwrap();
    }
    game.claim(&mut map, HexCoord::new(0, 0), 0).unwrap();
    game.claim(&mut map, HexCoord::new(1, 0), 0).unwrap();

    let connected = map.connected(HexCoord::new(0, 0));
    map.darken(&connected);

    assert_eq!(map.at(HexCoord::new(1, 0)).color(), PALETTE[0].darkened());
    assert_eq!(map.at(HexCoord::new(2, 0)).color(), PALETTE[1]);
}

#[test]
fn test_snapshot_survives_json() {
    let game = default_game();
    let mut map = HexMap::new(5, 4);
    fill_land(&mut map);
    map.clear_land(HexCoord::new(2, 2)).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    game.assign_random_owners(&mut map, &mut rng).unwrap();

    let json = map.to_json().unwrap();
    let restored = HexMap::from_json(&json).unwrap();
    assert_eq!(restored.regions(), map.regions());
    assert_eq!(restored, map);
}
