//! A persona: identity, three memory substrates, and the cognitive loop.
//!
//! Each tick the server hands every persona its new tile and the world
//! clock; the persona perceives its surroundings, retrieves related
//! memories, plans (long-term on a new day, short-term when the current
//! action runs out, reactions when another persona is worth responding
//! to), reflects opportunistically, and finally executes one step of its
//! planned path.
//!
//! The cognitive modules are free functions over `(persona, maze, …)`
//! rather than methods on each other, so each stage depends on data, not
//! on the other stages.

pub mod execute;
pub mod perceive;
pub mod plan;
pub mod prompts;
pub mod reflect;
pub mod retrieve;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::debug;

use simulacra_llm::LanguageModel;
use simulacra_memory::{AssociativeMemory, Scratch, SpatialTree};
use simulacra_world::{Maze, TileCoord};

pub use plan::NewDay;

/// One tick's output for the frontend: where to step, what emoji to show,
/// and the human-readable activity line.
#[derive(Debug, Clone)]
pub struct Movement {
    pub next_tile: TileCoord,
    pub pronunciatio: String,
    pub description: String,
}

pub struct Persona {
    pub name: String,
    pub s_mem: SpatialTree,
    pub a_mem: AssociativeMemory,
    pub scratch: Scratch,
    /// Address used when a planned action address cannot be resolved.
    pub fallback_address: String,
    pub(crate) rng: SmallRng,
}

impl Persona {
    /// Load a persona from its `bootstrap_memory/` snapshot directory.
    pub fn load(name: &str, folder: impl AsRef<Path>, seed: u64, fallback_address: &str) -> Result<Self> {
        let bootstrap = folder.as_ref().join("bootstrap_memory");
        let scratch = Scratch::load(bootstrap.join("scratch.json"))
            .with_context(|| format!("loading scratch for {name}"))?;
        let s_mem = SpatialTree::load(bootstrap.join("spatial_memory.json"))
            .with_context(|| format!("loading spatial memory for {name}"))?;
        let a_mem = AssociativeMemory::load(bootstrap.join("associative_memory"))
            .with_context(|| format!("loading associative memory for {name}"))?;
        Ok(Self::from_parts(name, scratch, s_mem, a_mem, seed, fallback_address))
    }

    /// Assemble a persona from in-memory parts (tests, fresh bootstraps).
    pub fn from_parts(
        name: &str,
        scratch: Scratch,
        s_mem: SpatialTree,
        a_mem: AssociativeMemory,
        seed: u64,
        fallback_address: &str,
    ) -> Self {
        // Offset the master seed by the name so personas do not mirror
        // each other's sampling.
        let name_salt: u64 = name.bytes().map(u64::from).sum();
        Self {
            name: name.to_string(),
            s_mem,
            a_mem,
            scratch,
            fallback_address: fallback_address.to_string(),
            rng: SmallRng::seed_from_u64(seed.wrapping_add(name_salt)),
        }
    }

    /// Persist all three substrates under `folder/bootstrap_memory/`.
    pub fn save(&self, folder: impl AsRef<Path>) -> Result<()> {
        let bootstrap = folder.as_ref().join("bootstrap_memory");
        self.scratch.save(bootstrap.join("scratch.json"))?;
        self.s_mem.save(bootstrap.join("spatial_memory.json"))?;
        self.a_mem.save(bootstrap.join("associative_memory"))?;
        Ok(())
    }

    /// The main cognitive sequence for one tick.
    ///
    /// `others` holds every other persona by name; reactions mutate chat
    /// state on both sides, which is why the server lends the whole table.
    pub async fn advance(
        &mut self,
        maze: &Maze,
        others: &mut BTreeMap<String, Persona>,
        curr_tile: TileCoord,
        curr_time: NaiveDateTime,
        llm: &dyn LanguageModel,
    ) -> Result<Movement> {
        self.scratch.curr_tile = Some(curr_tile);

        let new_day = match self.scratch.curr_time {
            None => NewDay::FirstDay,
            Some(prev) if prev.date() != curr_time.date() => NewDay::NewDay,
            Some(_) => NewDay::No,
        };
        self.scratch.curr_time = Some(curr_time);
        debug!(persona = %self.name, ?new_day, tile = ?curr_tile, "advance");

        let perceived = perceive::perceive(self, maze, llm).await?;
        let retrieved = retrieve::retrieve(self, &perceived);
        let plan = plan::plan(self, maze, others, new_day, &retrieved, llm).await?;
        reflect::reflect(self, llm).await?;
        Ok(execute::execute(self, maze, others, &plan))
    }
}

#[cfg(test)]
pub(crate) mod test_support;
