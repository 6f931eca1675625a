//! Concurrent agent dispatch.
//!
//! Every agent call, whether generation, peer evaluation or clarification,
//! goes through [`Dispatcher::dispatch_requests`]: one tokio task per call,
//! a per-call timeout, and results returned in request order.

mod dispatcher;
pub mod fakes;
mod invocation;
mod runner;

pub use dispatcher::Dispatcher;
pub use invocation::{DispatchEntry, DispatchFailure, DispatchRequest, Invocation, Purpose, RawResponse};
pub use runner::{AgentRunner, CapturedOutput, ProcessRunner};
