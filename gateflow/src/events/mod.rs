//! Pipeline lifecycle events.
//!
//! The runner reports every stage transition through an [`EventSink`]. Sinks
//! are injected per runner; there is no global sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
