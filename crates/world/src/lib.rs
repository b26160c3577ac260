//! The shared tile world: grid, collision, addresses, events, pathfinding.
//!
//! Coordinates are `(x, y)` with `y` growing downward.  The maze is the
//! only mutable structure shared between personas; all mutation goes
//! through the per-tile event operations so writes stay atomic at tile
//! granularity.

mod error;
mod maze;
mod path;
mod tile;

pub use error::WorldError;
pub use maze::{AddressLevel, Maze, MazeSheet, TileSeed};
pub use path::path_finder;
pub use tile::{EventTriple, Tile, TileCoord, TileEvent};
