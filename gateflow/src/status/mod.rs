//! Persisted stage status.
//!
//! The status map is the only channel through which a run reports progress
//! to whatever is polling it. It sits behind the [`StatusRepository`] port
//! with a JSON-file and an in-memory implementation; [`StageStatusStore`]
//! implements the transition rules on top of either.

mod file;
mod memory;
mod repository;
mod store;
mod watch;

use indexmap::IndexMap;

use crate::core::StageRecord;

pub use file::JsonFileStatusRepository;
pub use memory::InMemoryStatusRepository;
pub use repository::StatusRepository;
#[cfg(test)]
pub use repository::MockStatusRepository;
pub use store::StageStatusStore;
pub use watch::StatusWatcher;

/// Stage records keyed by stage name, in pipeline order.
pub type StatusMap = IndexMap<String, StageRecord>;
