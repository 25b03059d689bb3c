//! Model State
//!
//! This module implements the stateful half of the runtime: the backing
//! property bag, the calculated-property engine, and the facade that ties
//! them to the middleware pipeline.
//!
//! # Concepts
//!
//! ## Store
//!
//! Each model instance owns a private property bag mapping text keys to
//! dynamic values. Keys starting with the private marker are invisible to
//! every public-surface operation while remaining writable internally.
//!
//! ## Derivations
//!
//! A derivation computes one property from the pending partial state and a
//! frozen snapshot of the current state. The declared set is re-evaluated
//! to a fixed point on every write, so derived properties stay consistent
//! no matter which of their inputs changed.
//!
//! ## Model
//!
//! The facade. Property access, enumeration, deletion, writes, and method
//! calls all go through it; it consults the capability filter and routes
//! mutations through the write procedure and calls through the call
//! protocol.

mod derivation;
mod model;
mod store;

pub use derivation::{Derivation, MAX_PASSES};
pub use model::{Model, DEFAULT_SILENTS, WRITE_METHOD};
pub use store::{is_public, StateMap, PRIVATE_MARKER};
