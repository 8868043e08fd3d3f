//! The detect/execute loop and its externally visible state.

pub mod runner;
pub mod state;

pub use runner::{LoopExit, LoopSettings, Orchestrator};
pub use state::{OrchestratorState, StatusSnapshot};
