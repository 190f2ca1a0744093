//! Plan execution.
//!
//! The [`Executor`] turns a [`Plan`](crate::planner::Plan) into handler calls
//! and reports one [`ExecutionResult`] per entry as a stream.

mod engine;
mod handler;
mod result;

pub use engine::{ApplyStream, DEFAULT_MAX_IN_FLIGHT, Executor};
pub use handler::{ActionRequest, HandlerRegistry, ProviderConfig, ResourceHandler};
pub use result::{ApplyReport, ExecutionResult, NodeOutcome, ReportSummary};

#[cfg(test)]
pub use handler::MockResourceHandler;
