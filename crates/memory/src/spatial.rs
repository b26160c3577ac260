//! Spatial memory: the tree of the world a persona has personally seen.
//!
//! `world → sector → arena → [game objects]`.  The tree only ever grows;
//! perception adds what the persona walks past, and planning reads it to
//! decide where an action can take place.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::MemoryError;

type ArenaMap = BTreeMap<String, Vec<String>>;
type SectorMap = BTreeMap<String, ArenaMap>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpatialTree {
    pub tree: BTreeMap<String, SectorMap>,
}

impl SpatialTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observed tile into the tree.  Empty components stop the
    /// descent: a tile with a world but no sector only contributes the
    /// world entry.
    pub fn observe(&mut self, world: &str, sector: &str, arena: &str, game_object: &str) {
        if world.is_empty() {
            return;
        }
        let sectors = self.tree.entry(world.to_string()).or_default();
        if sector.is_empty() {
            return;
        }
        let arenas = sectors.entry(sector.to_string()).or_default();
        if arena.is_empty() {
            return;
        }
        let objects = arenas.entry(arena.to_string()).or_default();
        if game_object.is_empty() {
            return;
        }
        if !objects.iter().any(|o| o == game_object) {
            objects.push(game_object.to_string());
        }
    }

    pub fn accessible_sectors(&self, world: &str) -> Vec<String> {
        self.tree
            .get(world)
            .map(|sectors| sectors.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn accessible_arenas(&self, world: &str, sector: &str) -> Vec<String> {
        self.tree
            .get(world)
            .and_then(|sectors| sectors.get(sector))
            .map(|arenas| arenas.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Game objects known inside a `"world:sector:arena"` address.
    pub fn accessible_game_objects(&self, arena_address: &str) -> Vec<String> {
        let mut parts = arena_address.split(':');
        let (Some(world), Some(sector), Some(arena)) = (parts.next(), parts.next(), parts.next())
        else {
            return Vec::new();
        };
        self.tree
            .get(world)
            .and_then(|sectors| sectors.get(sector))
            .and_then(|arenas| arenas.get(arena))
            .cloned()
            .unwrap_or_default()
    }

    /// Indented rendering for the operator REPL.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (world, sectors) in &self.tree {
            out.push_str(world);
            out.push('\n');
            for (sector, arenas) in sectors {
                out.push_str(&format!(" > {sector}\n"));
                for (arena, objects) in arenas {
                    out.push_str(&format!("  > {arena}: {}\n", objects.join(", ")));
                }
            }
        }
        out
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MemoryError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.tree)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let raw = fs::read_to_string(path)?;
        Ok(Self {
            tree: serde_json::from_str(&raw)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_grows_monotonically() {
        let mut tree = SpatialTree::new();
        tree.observe("the ville", "cafe", "counter", "espresso machine");
        tree.observe("the ville", "cafe", "counter", "espresso machine");
        tree.observe("the ville", "cafe", "counter", "register");
        tree.observe("the ville", "park", "", "");

        assert_eq!(
            tree.accessible_game_objects("the ville:cafe:counter"),
            vec!["espresso machine", "register"]
        );
        assert_eq!(tree.accessible_sectors("the ville"), vec!["cafe", "park"]);
        assert!(tree.accessible_arenas("the ville", "park").is_empty());
    }

    #[test]
    fn empty_components_stop_the_descent() {
        let mut tree = SpatialTree::new();
        tree.observe("the ville", "", "counter", "register");
        assert!(tree.tree["the ville"].is_empty());
    }

    #[test]
    fn roundtrip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spatial_memory.json");

        let mut tree = SpatialTree::new();
        tree.observe("the ville", "cafe", "counter", "register");
        tree.save(&path).unwrap();

        let loaded = SpatialTree::load(&path).unwrap();
        assert_eq!(
            loaded.accessible_game_objects("the ville:cafe:counter"),
            vec!["register"]
        );
    }
}
