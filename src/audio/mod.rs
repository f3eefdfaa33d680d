//! Cola de reproducción y motor de avance.

pub mod engine;
pub mod queue;
