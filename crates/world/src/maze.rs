use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WorldError;
use crate::tile::{Tile, TileCoord, TileEvent};

/// Address nesting level used when truncating a tile's full address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressLevel {
    World,
    Sector,
    Arena,
    GameObject,
}

// ── Tileset document ──────────────────────────────────────────────────────────

/// Seed record for a single named tile in a [`MazeSheet`].  Tiles not
/// listed default to empty metadata and no collision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TileSeed {
    pub x: usize,
    pub y: usize,
    pub world: String,
    pub sector: String,
    pub arena: String,
    pub game_object: String,
    pub spawning_location: String,
}

/// On-disk maze tileset: dimensions, the collision grid, and the sparse
/// list of named tiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MazeSheet {
    pub maze_name: String,
    pub width: usize,
    pub height: usize,
    pub collision: Vec<Vec<bool>>,
    pub tiles: Vec<TileSeed>,
}

// ── Maze ──────────────────────────────────────────────────────────────────────

/// The tile world.  Holds the grid, the collision map consumed by the
/// pathfinder, and the address → tiles reverse index.
#[derive(Debug, Clone)]
pub struct Maze {
    pub maze_name: String,
    width: usize,
    height: usize,
    tiles: Vec<Vec<Tile>>,
    pub collision_maze: Vec<Vec<bool>>,
    /// For every address prefix (any nesting level), the exact set of
    /// tiles whose truncated address equals it.
    pub address_tiles: HashMap<String, BTreeSet<TileCoord>>,
}

impl Maze {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorldError> {
        let raw = fs::read_to_string(path)?;
        let sheet: MazeSheet = serde_json::from_str(&raw)?;
        Self::from_sheet(sheet)
    }

    pub fn from_sheet(sheet: MazeSheet) -> Result<Self, WorldError> {
        if sheet.collision.len() != sheet.height
            || sheet.collision.iter().any(|row| row.len() != sheet.width)
        {
            return Err(WorldError::MalformedSheet(format!(
                "collision grid does not match {}x{}",
                sheet.width, sheet.height
            )));
        }

        let mut tiles = vec![vec![Tile::default(); sheet.width]; sheet.height];
        for (y, row) in tiles.iter_mut().enumerate() {
            for (x, tile) in row.iter_mut().enumerate() {
                tile.collision = sheet.collision[y][x];
            }
        }

        for seed in &sheet.tiles {
            if seed.x >= sheet.width || seed.y >= sheet.height {
                return Err(WorldError::OutOfBounds {
                    x: seed.x,
                    y: seed.y,
                    width: sheet.width,
                    height: sheet.height,
                });
            }
            let tile = &mut tiles[seed.y][seed.x];
            tile.world = seed.world.clone();
            tile.sector = seed.sector.clone();
            tile.arena = seed.arena.clone();
            tile.game_object = seed.game_object.clone();
            tile.spawning_location = seed.spawning_location.clone();

            // Every game object starts out present-but-idle.
            if !seed.game_object.is_empty() {
                let address = format!(
                    "{}:{}:{}:{}",
                    seed.world, seed.sector, seed.arena, seed.game_object
                );
                tile.events.insert(TileEvent::blank(address));
            }
        }

        let mut maze = Self {
            maze_name: sheet.maze_name,
            width: sheet.width,
            height: sheet.height,
            tiles,
            collision_maze: sheet.collision,
            address_tiles: HashMap::new(),
        };
        maze.index_addresses();
        debug!(
            maze = %maze.maze_name,
            addresses = maze.address_tiles.len(),
            "maze loaded"
        );
        Ok(maze)
    }

    fn index_addresses(&mut self) {
        for y in 0..self.height {
            for x in 0..self.width {
                let tile = &self.tiles[y][x];
                let mut parts = Vec::new();
                for part in [&tile.world, &tile.sector, &tile.arena, &tile.game_object] {
                    if part.is_empty() {
                        break;
                    }
                    parts.push(part.as_str());
                    self.address_tiles
                        .entry(parts.join(":"))
                        .or_default()
                        .insert((x, y));
                }
            }
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Direct tile access.  Callers move personas along in-bounds paths, so
    /// out-of-range coordinates indicate a logic bug upstream.
    pub fn access_tile(&self, tile: TileCoord) -> &Tile {
        &self.tiles[tile.1][tile.0]
    }

    /// Bounds-checked access for operator commands.
    pub fn try_tile(&self, tile: TileCoord) -> Option<&Tile> {
        self.tiles.get(tile.1).and_then(|row| row.get(tile.0))
    }

    /// The tile's address truncated to `level`, empty components elided.
    pub fn get_tile_path(&self, tile: TileCoord, level: AddressLevel) -> String {
        let t = self.access_tile(tile);
        let mut parts = vec![t.world.as_str()];
        match level {
            AddressLevel::World => {}
            AddressLevel::Sector => parts.push(&t.sector),
            AddressLevel::Arena => {
                parts.push(&t.sector);
                parts.push(&t.arena);
            }
            AddressLevel::GameObject => {
                parts.push(&t.sector);
                parts.push(&t.arena);
                parts.push(&t.game_object);
            }
        }
        parts.join(":")
    }

    /// Axis-aligned square of side `2r + 1` around `tile`, clipped to the
    /// maze bounds.  `r = 0` yields exactly the tile itself.
    pub fn get_nearby_tiles(&self, tile: TileCoord, r: usize) -> Vec<TileCoord> {
        let (x, y) = tile;
        let left = x.saturating_sub(r);
        let top = y.saturating_sub(r);
        let right = (x + r).min(self.width.saturating_sub(1));
        let bottom = (y + r).min(self.height.saturating_sub(1));

        let mut nearby = Vec::with_capacity((right - left + 1) * (bottom - top + 1));
        for ny in top..=bottom {
            for nx in left..=right {
                nearby.push((nx, ny));
            }
        }
        nearby
    }

    // ── Per-tile event operations ─────────────────────────────────────────

    pub fn add_event_from_tile(&mut self, event: TileEvent, tile: TileCoord) {
        self.tiles[tile.1][tile.0].events.insert(event);
    }

    pub fn remove_event_from_tile(&mut self, event: &TileEvent, tile: TileCoord) {
        self.tiles[tile.1][tile.0].events.remove(event);
    }

    pub fn remove_subject_events_from_tile(&mut self, subject: &str, tile: TileCoord) {
        self.tiles[tile.1][tile.0]
            .events
            .retain(|event| event.subject != subject);
    }

    /// Replace a matching event with the blank form for its subject.
    pub fn turn_event_from_tile_idle(&mut self, event: &TileEvent, tile: TileCoord) {
        let events = &mut self.tiles[tile.1][tile.0].events;
        if events.remove(event) {
            events.insert(TileEvent::blank(event.subject.clone()));
        }
    }
}
