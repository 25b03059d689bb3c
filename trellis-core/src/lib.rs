//! Trellis Core
//!
//! This crate provides the core runtime for the Trellis reactive model
//! container. It implements:
//!
//! - A property bag behind a capability-filtering facade: keys starting
//!   with `_` are private and behave as absent on every public operation
//! - An ordered, pluggable middleware pipeline with props, result, and
//!   event phases, addressable per method or via a wildcard
//! - Calculated properties recomputed to a fixed point on every write
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `state`: the store, the derivation engine, and the [`Model`] facade
//! - `pipeline`: method keys, phases, and the handler registry
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use trellis_core::{Derivation, Model, StateMap, Value};
//!
//! // A calculated property: full_name follows name and family.
//! let full_name = Derivation::new("full_name", |pending, current| {
//!     if !pending.contains_key("name") && !pending.contains_key("family") {
//!         return Ok(None);
//!     }
//!     let name = pending.get("name").or_else(|| current.get("name"));
//!     let family = pending.get("family").or_else(|| current.get("family"));
//!     Ok(Some(json!(format!(
//!         "{} {}",
//!         name.and_then(Value::as_str).unwrap_or(""),
//!         family.and_then(Value::as_str).unwrap_or("")
//!     ))))
//! });
//!
//! let mut initial = StateMap::new();
//! initial.insert("name".to_owned(), json!("Nikolay"));
//! initial.insert("family".to_owned(), json!("Yanovskiy"));
//!
//! let mut model = Model::with_derivations(initial, vec![full_name]).unwrap();
//! assert_eq!(model.get("full_name"), Some(&json!("Nikolay Yanovskiy")));
//!
//! // Writes recompute derived state; identical writes are no-ops.
//! assert!(model.set("family", json!("Gogol")).unwrap());
//! assert_eq!(model.get("full_name"), Some(&json!("Nikolay Gogol")));
//! assert!(!model.set("family", json!("Gogol")).unwrap());
//! ```

pub mod error;
pub mod pipeline;
pub mod state;

pub use error::{BoxError, ModelError};
pub use pipeline::{MethodKey, Middleware, MiddlewarePipeline, Phase};
pub use state::{
    is_public, Derivation, Model, StateMap, DEFAULT_SILENTS, MAX_PASSES, PRIVATE_MARKER,
    WRITE_METHOD,
};

/// The dynamic value type, re-exported for convenience.
pub use serde_json::Value;
