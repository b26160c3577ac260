//! The three memory substrates owned by every persona.
//!
//! * [`AssociativeMemory`] — the episodic stream of event / thought / chat
//!   nodes with keyword indices and an embedding cache.
//! * [`SpatialTree`] — the monotonically growing map of the known world.
//! * [`Scratch`] — mutable working state: identity, schedule, current
//!   action, chat state, path state.
//!
//! All three round-trip through the JSON snapshots under a persona's
//! `bootstrap_memory/` directory.

pub mod associative;
pub mod concept;
pub mod scratch;
pub mod spatial;
pub mod timefmt;

use thiserror::Error;

pub use associative::AssociativeMemory;
pub use concept::{ConceptNode, Filling, NodeKind, SpoTriple};
pub use scratch::{NewAction, Scratch};
pub use spatial::SpatialTree;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to read or write memory snapshot")]
    Io(#[from] std::io::Error),

    #[error("failed to parse memory snapshot")]
    Parse(#[from] serde_json::Error),
}
