//! Model error types.

use thiserror::Error;

use crate::pipeline::Phase;

/// Boxed error carried by user-supplied handlers, methods, and derivations.
///
/// Anything implementing `Error + Send + Sync` converts into it with `?`,
/// including plain strings via `.into()`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A registration call addressed an empty method name.
    #[error("invalid method key {0:?}: method names must be non-empty")]
    InvalidMethodKey(String),

    /// `call` addressed a method that is not registered, or whose name is
    /// private-prefixed and therefore absent from the public surface.
    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    /// A middleware handler failed. Already-applied state is not rolled
    /// back; see [`Model::update`](crate::Model::update).
    #[error("middleware for `{method}` failed in {phase} phase")]
    Middleware {
        /// The method key the chain was running under.
        method: String,
        /// The phase the failing handler was registered for.
        phase: Phase,
        /// The handler's own error.
        #[source]
        source: BoxError,
    },

    /// A registered method body failed.
    #[error("method `{method}` failed")]
    Method {
        /// The invoked method name.
        method: String,
        #[source]
        source: BoxError,
    },

    /// A derivation function failed to evaluate.
    #[error("derived property `{property}` failed to evaluate")]
    Derivation {
        /// The property the derivation computes.
        property: String,
        #[source]
        source: BoxError,
    },

    /// The derivation set kept producing overrides past the pass cap.
    ///
    /// Derivations must be pure functions of (pending, current) that
    /// converge; this is the guard against ones that do not.
    #[error("derived state did not converge after {passes} passes")]
    DerivationDiverged {
        /// How many full passes ran before giving up.
        passes: usize,
    },

    /// The props chain for a write returned something other than a state
    /// object in first position.
    #[error("props phase for `{method}` must return a state object")]
    InvalidPipelineOutput {
        /// The write entry point whose chain misbehaved.
        method: String,
    },
}
