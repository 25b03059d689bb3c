//! Calculated properties.
//!
//! A derivation computes one property's value from the pending partial
//! state and a frozen snapshot of the current state. On every write the
//! whole declared set is re-evaluated until no derivation produces a new
//! override, so derivations may feed on each other's output regardless of
//! declaration order.
//!
//! # Convergence
//!
//! Derivations must be pure functions of (pending, current) and must reach
//! a fixed point. A derivation whose output keeps differing from the merged
//! view on every pass would loop forever; the engine caps evaluation at
//! [`MAX_PASSES`] and fails the write with
//! [`ModelError::DerivationDiverged`] instead.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use super::store::StateMap;
use crate::error::{BoxError, ModelError};

/// Upper bound on fixed-point evaluation passes per write.
pub const MAX_PASSES: usize = 64;

type ComputeFn = dyn Fn(&StateMap, &StateMap) -> Result<Option<Value>, BoxError> + Send + Sync;

/// A declared calculated property.
///
/// The compute function receives `(pending, current)`: the partial state
/// being written and the frozen pre-write snapshot. It returns the value
/// its property should take, or `None` when it has no opinion for this
/// write.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use trellis_core::Derivation;
///
/// let doubled = Derivation::new("doubled", |pending, current| {
///     let base = pending.get("base").or_else(|| current.get("base"));
///     match base.and_then(|v| v.as_i64()) {
///         Some(n) => Ok(Some(json!(n * 2))),
///         None => Ok(None),
///     }
/// });
/// assert_eq!(doubled.property(), "doubled");
/// ```
#[derive(Clone)]
pub struct Derivation {
    property: String,
    compute: Arc<ComputeFn>,
}

impl Derivation {
    /// Declare a derivation for `property`.
    pub fn new<F>(property: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&StateMap, &StateMap) -> Result<Option<Value>, BoxError> + Send + Sync + 'static,
    {
        Self {
            property: property.into(),
            compute: Arc::new(compute),
        }
    }

    /// The property this derivation writes.
    pub fn property(&self) -> &str {
        &self.property
    }
}

impl fmt::Debug for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivation")
            .field("property", &self.property)
            .finish_non_exhaustive()
    }
}

/// The ordered derivation list owned by one model instance.
#[derive(Debug, Default)]
pub(crate) struct DerivationEngine {
    derivations: Vec<Derivation>,
}

impl DerivationEngine {
    pub fn new(derivations: Vec<Derivation>) -> Self {
        Self { derivations }
    }

    /// Re-evaluate every derivation against `(partial, snapshot)` until no
    /// new override appears, then return the augmented partial.
    ///
    /// An override is recorded when a derivation's output differs from the
    /// value its property would hold after naively merging `partial` onto
    /// `snapshot`. Overrides merge into the partial and the whole set runs
    /// again, against the same snapshot, until a pass produces none.
    pub fn derive(&self, mut partial: StateMap, snapshot: &StateMap) -> Result<StateMap, ModelError> {
        if self.derivations.is_empty() {
            return Ok(partial);
        }

        for pass in 0..MAX_PASSES {
            let mut overrides: Vec<(String, Value)> = Vec::new();

            for derivation in &self.derivations {
                let computed = (derivation.compute)(&partial, snapshot).map_err(|source| {
                    ModelError::Derivation {
                        property: derivation.property.clone(),
                        source,
                    }
                })?;
                let Some(value) = computed else { continue };

                let merged = partial
                    .get(&derivation.property)
                    .or_else(|| snapshot.get(&derivation.property));
                if merged != Some(&value) {
                    overrides.push((derivation.property.clone(), value));
                }
            }

            if overrides.is_empty() {
                if pass > 0 {
                    trace!(passes = pass + 1, "derivations reached fixed point");
                }
                return Ok(partial);
            }
            for (property, value) in overrides {
                partial.insert(property, value);
            }
        }

        Err(ModelError::DerivationDiverged { passes: MAX_PASSES })
    }
}
