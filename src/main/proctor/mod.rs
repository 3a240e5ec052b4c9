//! The expectation engine: runs a handler on its own thread, checks every device call it makes
//! against a [`Scenario`](crate::scenario::Scenario), and reports the result.

pub mod call;
pub mod device;
pub mod engine;
pub mod report;

pub use self::call::{Call, CallKind, ReceivedPacket};
pub use self::device::{Device, DeviceError};
pub use self::engine::{run_scenario, Proctor, RunState};
pub use self::report::{Counts, EventResult, ExecutionResult, Verdict};

#[cfg(test)]
mod tests;
