//! Fleet-wide dispatch.
//!
//! [`FleetDispatcher`] runs a [`Workflow`](crate::runner::Workflow) on every
//! device of an inventory with a bounded number of concurrent sessions and
//! gathers one [`RunResult`] per device into a [`FleetReport`].

mod dispatcher;
mod events;
mod result;

pub use dispatcher::FleetDispatcher;
pub use events::{EventSink, FleetEvent};
pub use result::{Failure, FleetReport, ReportSummary, RunOutcome, RunResult};
