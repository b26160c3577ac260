//! The simulation server: tick loop, frontend handshake, persistence.
//!
//! The server owns the maze and the persona table.  Each tick it ingests
//! the frontend's `environment/{step}.json`, applies every persona's tile
//! move to the maze, runs each persona's cognitive loop in a fixed order,
//! and writes `movement/{step}.json` back for the frontend.

mod server;
mod storage;

pub use server::SimulationServer;
pub use storage::{EnvPersona, MovementFile, MovementMeta, PersonaMovement, SimMeta};
