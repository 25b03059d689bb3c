//! Handler registry and chain execution.
//!
//! # How Buckets Work
//!
//! Handlers live in a flat map keyed by (method key, phase). Each bucket is
//! an ordered list; registration appends, deregistration removes by
//! identity. Because every bucket is independently addressable, removing a
//! handler from one (key, phase) pair can never disturb another phase's
//! handlers for the same method.
//!
//! # Execution
//!
//! `run` resolves the combined chain for a method and phase: specific-key
//! handlers first, wildcard handlers after, each group in registration
//! order. An empty chain returns the arguments unchanged. Props and result
//! phases fold the argument vector left-to-right through the chain, each
//! handler's output feeding the next handler. The event phase invokes every
//! handler with the same arguments and discards what they return.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::trace;

use super::{MethodKey, Phase};
use crate::error::{BoxError, ModelError};

type HandlerFn = dyn Fn(Vec<Value>) -> Result<Vec<Value>, BoxError> + Send + Sync;

/// A pipeline handler.
///
/// Wraps the handler function once; clones share identity. Transform-phase
/// handlers receive the argument vector and return the (possibly altered)
/// vector for the next handler in the chain. Event-phase handlers receive
/// the same vector and their return value is discarded.
///
/// # Example
///
/// ```
/// use trellis_core::Middleware;
///
/// let passthrough = Middleware::new(|args| Ok(args));
/// assert!(passthrough.same(&passthrough.clone()));
/// assert!(!passthrough.same(&Middleware::new(|args| Ok(args))));
/// ```
#[derive(Clone)]
pub struct Middleware {
    func: Arc<HandlerFn>,
}

impl Middleware {
    /// Wrap a handler function.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>, BoxError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    /// Identity comparison. Clones of one `Middleware` are the same
    /// handler; separately constructed handlers never are, even when built
    /// from identical closures.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }

    pub(crate) fn invoke(&self, args: Vec<Value>) -> Result<Vec<Value>, BoxError> {
        (self.func)(args)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware").finish_non_exhaustive()
    }
}

type Bucket = SmallVec<[Middleware; 4]>;

/// Per-instance handler registry, keyed by (method key, phase).
pub struct MiddlewarePipeline {
    buckets: IndexMap<(MethodKey, Phase), Bucket>,
}

impl MiddlewarePipeline {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            buckets: IndexMap::new(),
        }
    }

    /// Append `handler` to the bucket of every addressed (key, phase) pair.
    ///
    /// An empty `methods` slice addresses the wildcard key. Prior entries
    /// are preserved; the new handler runs after them.
    pub fn register(
        &mut self,
        handler: Middleware,
        methods: &[&str],
        phase: Phase,
    ) -> Result<(), ModelError> {
        for key in check_methods(methods)? {
            self.buckets
                .entry((key, phase))
                .or_default()
                .push(handler.clone());
        }
        Ok(())
    }

    /// Remove `handler`, by identity, from every addressed (key, phase)
    /// bucket. A no-op where the handler is not present. Buckets for other
    /// phases and other keys are untouched.
    pub fn deregister(
        &mut self,
        handler: &Middleware,
        methods: &[&str],
        phase: Phase,
    ) -> Result<(), ModelError> {
        for key in check_methods(methods)? {
            if let Some(bucket) = self.buckets.get_mut(&(key, phase)) {
                bucket.retain(|existing| !existing.same(handler));
            }
        }
        Ok(())
    }

    /// Execute the chain for `method` and `phase` over `args`.
    pub fn run(
        &self,
        method: &str,
        phase: Phase,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, ModelError> {
        let specific = self.buckets.get(&(MethodKey::named(method), phase));
        let wildcard = self.buckets.get(&(MethodKey::Wildcard, phase));
        let chain: Vec<&Middleware> = specific
            .into_iter()
            .flatten()
            .chain(wildcard.into_iter().flatten())
            .collect();

        if chain.is_empty() {
            return Ok(args);
        }
        trace!(method, phase = phase.label(), handlers = chain.len(), "running chain");

        match phase {
            Phase::Event => {
                for handler in &chain {
                    handler.invoke(args.clone()).map_err(|source| ModelError::Middleware {
                        method: method.to_owned(),
                        phase,
                        source,
                    })?;
                }
                Ok(args)
            }
            Phase::Props | Phase::Result => {
                let mut acc = args;
                for handler in &chain {
                    acc = handler.invoke(acc).map_err(|source| ModelError::Middleware {
                        method: method.to_owned(),
                        phase,
                        source,
                    })?;
                }
                Ok(acc)
            }
        }
    }
}

impl Default for MiddlewarePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewarePipeline")
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

/// Normalize a method-name slice into typed keys.
///
/// An empty slice means the wildcard; an empty name is a validation error.
fn check_methods(methods: &[&str]) -> Result<Vec<MethodKey>, ModelError> {
    if methods.is_empty() {
        return Ok(vec![MethodKey::Wildcard]);
    }
    methods
        .iter()
        .map(|name| {
            if name.is_empty() {
                Err(ModelError::InvalidMethodKey((*name).to_owned()))
            } else {
                Ok(MethodKey::named(*name))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn append(marker: &'static str) -> Middleware {
        Middleware::new(move |mut args| {
            if let Some(Value::String(text)) = args.first_mut() {
                text.push_str(marker);
            }
            Ok(args)
        })
    }

    #[test]
    fn empty_chain_returns_args_unchanged() {
        let pipeline = MiddlewarePipeline::new();
        let args = vec![json!("hello"), json!(1)];
        let out = pipeline.run("anything", Phase::Props, args.clone()).unwrap();
        assert_eq!(out, args);
    }

    #[test]
    fn chain_runs_in_registration_order() {
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.register(append("a"), &["m"], Phase::Props).unwrap();
        pipeline.register(append("b"), &["m"], Phase::Props).unwrap();

        let out = pipeline.run("m", Phase::Props, vec![json!("")]).unwrap();
        assert_eq!(out, vec![json!("ab")]);
    }

    #[test]
    fn wildcard_runs_after_specific() {
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.register(append("w"), &[], Phase::Props).unwrap();
        pipeline.register(append("s"), &["m"], Phase::Props).unwrap();

        let out = pipeline.run("m", Phase::Props, vec![json!("")]).unwrap();
        assert_eq!(out, vec![json!("sw")]);

        // A method with no specific handlers still hits the wildcard.
        let out = pipeline.run("other", Phase::Props, vec![json!("")]).unwrap();
        assert_eq!(out, vec![json!("w")]);
    }

    #[test]
    fn event_phase_discards_handler_output() {
        let mut pipeline = MiddlewarePipeline::new();
        let calls = std::sync::Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        pipeline
            .register(
                Middleware::new(move |_args| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![json!("tampered")])
                }),
                &["m"],
                Phase::Event,
            )
            .unwrap();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        pipeline
            .register(
                Middleware::new(move |args| {
                    seen_clone.lock().unwrap().push(args.clone());
                    Ok(args)
                }),
                &["m"],
                Phase::Event,
            )
            .unwrap();

        let out = pipeline.run("m", Phase::Event, vec![json!("original")]).unwrap();

        // Neither the later handler nor the caller sees the first handler's
        // return value.
        assert_eq!(out, vec![json!("original")]);
        assert_eq!(seen.lock().unwrap().as_slice(), &[vec![json!("original")]]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deregister_removes_exactly_one_handler() {
        let mut pipeline = MiddlewarePipeline::new();
        let first = append("a");
        let second = append("b");
        pipeline.register(first.clone(), &["m"], Phase::Props).unwrap();
        pipeline.register(second.clone(), &["m"], Phase::Props).unwrap();

        pipeline.deregister(&first, &["m"], Phase::Props).unwrap();

        let out = pipeline.run("m", Phase::Props, vec![json!("")]).unwrap();
        assert_eq!(out, vec![json!("b")]);
    }

    #[test]
    fn deregister_leaves_other_phases_untouched() {
        let mut pipeline = MiddlewarePipeline::new();
        let handler = append("x");
        pipeline.register(handler.clone(), &["m"], Phase::Props).unwrap();
        pipeline.register(handler.clone(), &["m"], Phase::Result).unwrap();

        pipeline.deregister(&handler, &["m"], Phase::Props).unwrap();

        let props = pipeline.run("m", Phase::Props, vec![json!("")]).unwrap();
        assert_eq!(props, vec![json!("")]);
        let result = pipeline.run("m", Phase::Result, vec![json!("")]).unwrap();
        assert_eq!(result, vec![json!("x")]);
    }

    #[test]
    fn deregister_leaves_other_keys_untouched() {
        let mut pipeline = MiddlewarePipeline::new();
        let handler = append("x");
        pipeline.register(handler.clone(), &["m", "n"], Phase::Props).unwrap();

        pipeline.deregister(&handler, &["m"], Phase::Props).unwrap();

        assert_eq!(pipeline.run("m", Phase::Props, vec![json!("")]).unwrap(), vec![json!("")]);
        assert_eq!(pipeline.run("n", Phase::Props, vec![json!("")]).unwrap(), vec![json!("x")]);
    }

    #[test]
    fn deregister_missing_handler_is_noop() {
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.register(append("a"), &["m"], Phase::Props).unwrap();

        // Identical closure, different identity.
        pipeline.deregister(&append("a"), &["m"], Phase::Props).unwrap();

        let out = pipeline.run("m", Phase::Props, vec![json!("")]).unwrap();
        assert_eq!(out, vec![json!("a")]);
    }

    #[test]
    fn empty_method_name_fails_validation() {
        let mut pipeline = MiddlewarePipeline::new();
        let err = pipeline.register(append("a"), &[""], Phase::Props).unwrap_err();
        assert!(matches!(err, ModelError::InvalidMethodKey(_)));
    }

    #[test]
    fn handler_error_carries_method_and_phase() {
        let mut pipeline = MiddlewarePipeline::new();
        pipeline
            .register(
                Middleware::new(|_args| Err("boom".into())),
                &["m"],
                Phase::Result,
            )
            .unwrap();

        let err = pipeline.run("m", Phase::Result, vec![json!(1)]).unwrap_err();
        match err {
            ModelError::Middleware { method, phase, .. } => {
                assert_eq!(method, "m");
                assert_eq!(phase, Phase::Result);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
