//! Middleware Pipeline
//!
//! This module implements the per-instance handler registry and its
//! execution semantics. Handlers attach to a method key (a specific name or
//! the wildcard) and one of three phases:
//!
//! - **Props** runs before a write commits or a method body executes and
//!   chain-transforms the pending state or argument list.
//! - **Result** runs after a method body executes and chain-transforms the
//!   return value.
//! - **Event** runs after a change commits; it is fan-out only, and handler
//!   outputs are discarded.
//!
//! For a given (method, phase) the effective chain is the specific-key
//! handlers followed by the wildcard handlers, each group in registration
//! order. Removal is by handler identity and touches exactly one
//! (key, phase) bucket per addressed key, never the neighbouring phases.

mod key;
mod registry;

pub use key::{MethodKey, Phase};
pub use registry::{Middleware, MiddlewarePipeline};
