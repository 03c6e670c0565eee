//! Recording consolidation pipeline.
//!
//! Re-exports the entity types consumers need so that `web` does not depend on
//! `entity_api` directly.
pub use entity_api::{chunk_status, recording_chunks, recording_status, recordings, Id};

pub mod archive;
pub mod backoff;
pub mod chunk_store;
pub mod consolidation;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod recording;
pub mod recording_store;
pub mod state_machine;

/// In-memory stores and a scriptable gateway for exercising the pipeline.
#[cfg(any(test, feature = "mock"))]
pub mod testing;
