//! Execution: turn the planned action address into an actual tile path
//! and advance along it one tile per tick.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use simulacra_world::{path_finder, Maze, TileCoord};

use crate::{Movement, Persona};

/// Resolve the action address to a target tile (when no path is set yet)
/// and step along the planned path.
pub fn execute(
    persona: &mut Persona,
    maze: &Maze,
    others: &BTreeMap<String, Persona>,
    plan: &str,
) -> Movement {
    // A consumed "<random>" path re-rolls its target.
    if plan.contains("<random>") && persona.scratch.planned_path.is_empty() {
        persona.scratch.act_path_set = false;
    }

    if !persona.scratch.act_path_set {
        let curr_tile = persona.scratch.curr_tile.unwrap_or((0, 0));
        let target_tiles = select_target_tiles(persona, maze, others, plan, curr_tile);

        // Sample a handful of candidates and prefer tiles no other persona
        // is standing on, so everyone headed the same way spreads out.
        let mut candidates = target_tiles;
        candidates.shuffle(&mut persona.rng);
        candidates.truncate(4);

        let unoccupied: Vec<TileCoord> = candidates
            .iter()
            .copied()
            .filter(|&tile| {
                !maze
                    .access_tile(tile)
                    .events
                    .iter()
                    .any(|event| event.subject == persona.name || others.contains_key(&event.subject))
            })
            .collect();
        if !unoccupied.is_empty() {
            candidates = unoccupied;
        }

        let mut best_path: Vec<TileCoord> = Vec::new();
        for candidate in candidates {
            let path = path_finder(&maze.collision_maze, curr_tile, candidate);
            if path.is_empty() {
                continue;
            }
            if best_path.is_empty() || path.len() < best_path.len() {
                best_path = path;
            }
        }

        if best_path.is_empty() {
            // Every candidate was unreachable: stay put this tick and
            // re-sample a target on the next one.
            warn!(persona = %persona.name, address = %plan, "no reachable target tile");
            persona.scratch.planned_path = Vec::new();
        } else {
            persona.scratch.planned_path = best_path[1..].to_vec();
            persona.scratch.act_path_set = true;
        }
    }

    let mut next_tile = persona.scratch.curr_tile.unwrap_or((0, 0));
    if !persona.scratch.planned_path.is_empty() {
        next_tile = persona.scratch.planned_path.remove(0);
    }

    let description = format!(
        "{} @ {}",
        persona.scratch.act_description.as_deref().unwrap_or(""),
        persona.scratch.act_address.as_deref().unwrap_or(""),
    );
    debug!(persona = %persona.name, ?next_tile, "step");

    Movement {
        next_tile,
        pronunciatio: persona
            .scratch
            .act_pronunciatio
            .clone()
            .unwrap_or_else(|| crate::prompts::DEFAULT_PRONUNCIATIO.to_string()),
        description,
    }
}

fn select_target_tiles(
    persona: &mut Persona,
    maze: &Maze,
    others: &BTreeMap<String, Persona>,
    plan: &str,
    curr_tile: TileCoord,
) -> Vec<TileCoord> {
    if plan.contains("<persona>") {
        // Meet the named persona halfway rather than standing on them:
        // probe the two middle tiles of the direct path and keep the one
        // with the shorter approach.
        let target_name = plan.split("<persona>").last().unwrap_or("").trim();
        let target_tile = others
            .get(target_name)
            .and_then(|p| p.scratch.curr_tile)
            .unwrap_or(curr_tile);
        let potential = path_finder(&maze.collision_maze, curr_tile, target_tile);
        if potential.is_empty() {
            return vec![curr_tile];
        }
        if potential.len() <= 2 {
            return vec![potential[0]];
        }
        let mid_1 = potential[potential.len() / 2];
        let mid_2 = potential[potential.len() / 2 + 1];
        let path_1 = path_finder(&maze.collision_maze, curr_tile, mid_1);
        let path_2 = path_finder(&maze.collision_maze, curr_tile, mid_2);
        if path_1.len() <= path_2.len() {
            vec![mid_1]
        } else {
            vec![mid_2]
        }
    } else if plan.contains("<waiting>") {
        // "<waiting> {x} {y}" pins an explicit tile.
        let mut parts = plan.split_whitespace();
        parts.next();
        let x = parts.next().and_then(|v| v.parse().ok()).unwrap_or(curr_tile.0);
        let y = parts.next().and_then(|v| v.parse().ok()).unwrap_or(curr_tile.1);
        vec![(x, y)]
    } else if plan.contains("<random>") {
        let parts: Vec<&str> = plan.split(':').collect();
        let prefix = parts[..parts.len().saturating_sub(1)].join(":");
        match maze.address_tiles.get(&prefix) {
            Some(tiles) => {
                let all: Vec<TileCoord> = tiles.iter().copied().collect();
                all.choose(&mut persona.rng)
                    .map(|&tile| vec![tile])
                    .unwrap_or_else(|| vec![curr_tile])
            }
            None => vec![curr_tile],
        }
    } else {
        match maze.address_tiles.get(plan) {
            Some(tiles) => tiles.iter().copied().collect(),
            None => {
                warn!(
                    persona = %persona.name,
                    address = %plan,
                    fallback = %persona.fallback_address,
                    "plan address missing from the maze, walking to the fallback"
                );
                maze.address_tiles
                    .get(&persona.fallback_address)
                    .map(|tiles| tiles.iter().copied().collect())
                    .unwrap_or_else(|| vec![curr_tile])
            }
        }
    }
}
