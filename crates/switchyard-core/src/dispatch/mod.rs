//! Dispatch across ranked provider candidates.

pub mod engine;
pub mod sink;

pub use engine::{DispatchEngine, DispatchError, DispatchOutcome, StreamSelection};
pub use sink::{AttemptBus, AttemptSink, AttemptSinks, TracingAttemptSink};
