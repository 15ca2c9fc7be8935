//! Core domain model types for gateflow.
//!
//! This module contains the fundamental types shared by the gate, the status
//! store and the runner:
//! - Stage state and the persisted stage record
//! - The artifact store used to persist validated stage outputs

mod artifact;
mod status;

pub use artifact::{ArtifactReceipt, ArtifactStore};
pub use status::{StageRecord, StageState, MAX_ATTEMPTS};
