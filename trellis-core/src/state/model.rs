//! The model facade.
//!
//! [`Model`] is the public face of one reactive instance: a
//! property-addressable, callable surface where every read, write,
//! enumeration, deletion, and method call is routed through the capability
//! filter, the middleware pipeline, and the derivation engine.
//!
//! # Write Procedure
//!
//! Every write, whether a single [`set`](Model::set) or a partial
//! [`update`](Model::update), runs the same steps:
//!
//! 1. Freeze a snapshot of the full current state.
//! 2. Run the derivation engine on (partial, snapshot) to a fixed point.
//! 3. Run the props phase keyed by the write entry point with
//!    (candidate, snapshot); its output is the final candidate.
//! 4. Apply every candidate key whose value differs from the snapshot.
//! 5. If anything changed, fan out the event phase with the applied
//!    candidate and the changed-key list.
//!
//! The snapshot never mutates during one write. There is no rollback: if a
//! handler fails in step 3 nothing has been applied yet, but a failure in
//! step 5 leaves the keys from step 4 in place and the error surfaces to
//! the caller.
//!
//! # Call Protocol
//!
//! Invoking a registered method that is not in the silent set runs the
//! props phase (transforming the argument list), the method body, the
//! result phase (transforming the return value), and the event phase
//! (notify-only). Silent methods skip all three phases, which keeps
//! infrastructure entry points from re-entering the pipeline.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tracing::debug;

use super::derivation::{Derivation, DerivationEngine};
use super::store::{is_public, StateMap, StateStore};
use crate::error::{BoxError, ModelError};
use crate::pipeline::{Middleware, MiddlewarePipeline, Phase};

/// Middleware key for the write entry point.
pub const WRITE_METHOD: &str = "update";

/// Method names exempt from interception by default: the write entry
/// points, the registration and deregistration methods, and the export
/// method.
pub const DEFAULT_SILENTS: [&str; 11] = [
    "update",
    "set",
    "use_middleware",
    "unuse_middleware",
    "use_props",
    "unuse_props",
    "use_result",
    "unuse_result",
    "use_event",
    "unuse_event",
    "to_object",
];

type MethodFn = dyn Fn(&mut Model, &[Value]) -> Result<Value, BoxError> + Send + Sync;

/// A reactive model instance.
///
/// Owns its state, its middleware registry, its derivation list, and its
/// silent set; all of them live exactly as long as the instance. The model
/// assumes a single logical owner: every operation completes synchronously
/// before control returns, and nothing locks internally. A multi-threaded
/// host must treat each write as one critical section (for example behind
/// its own mutex); the closures a model holds are all `Send + Sync`, so
/// that composes.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use trellis_core::{Model, StateMap};
///
/// let mut initial = StateMap::new();
/// initial.insert("subscribers".to_owned(), json!("45"));
/// let mut model = Model::new(initial);
///
/// assert_eq!(model.get("subscribers"), Some(&json!("45")));
/// assert!(model.set("subscribers", json!("46")).unwrap());
/// assert!(!model.set("subscribers", json!("46")).unwrap());
/// ```
pub struct Model {
    store: StateStore,
    pipeline: MiddlewarePipeline,
    derivations: DerivationEngine,
    methods: IndexMap<String, Arc<MethodFn>>,
    silents: HashSet<String>,
}

impl Model {
    /// Create a model with no derivations.
    pub fn new(initial: StateMap) -> Self {
        Self {
            store: StateStore::new(initial),
            pipeline: MiddlewarePipeline::new(),
            derivations: DerivationEngine::default(),
            methods: IndexMap::new(),
            silents: DEFAULT_SILENTS.iter().map(|name| (*name).to_owned()).collect(),
        }
    }

    /// Create a model with calculated properties.
    ///
    /// The initial state goes through the full write procedure, so derived
    /// properties are computed before the constructor returns. Fails if
    /// the derivation set does not converge on the initial state.
    pub fn with_derivations(
        initial: StateMap,
        derivations: Vec<Derivation>,
    ) -> Result<Self, ModelError> {
        let mut model = Self::new(StateMap::new());
        model.derivations = DerivationEngine::new(derivations);
        model.update(initial)?;
        Ok(model)
    }

    /// Read a property. Private or missing keys read as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if !is_public(key) {
            return None;
        }
        self.store.get(key)
    }

    /// Whether a public property exists. Private keys behave as absent.
    pub fn has(&self, key: &str) -> bool {
        is_public(key) && self.store.contains(key)
    }

    /// Public property names, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.store.public_keys()
    }

    /// Delete a public property, returning its value. Private keys behave
    /// as absent and are left untouched.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if !is_public(key) {
            return None;
        }
        self.store.remove(key)
    }

    /// Shallow copy of the public state. The sanctioned snapshot export:
    /// never exposes the live store or any private key.
    pub fn to_object(&self) -> StateMap {
        self.store
            .public_entries()
            .map(|(key, value)| (key.to_owned(), value.clone()))
            .collect()
    }

    /// Write one property through the update procedure.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<bool, ModelError> {
        let mut partial = StateMap::new();
        partial.insert(key.into(), value);
        self.update(partial)
    }

    /// Write a partial state. Returns whether any property changed.
    ///
    /// Derivations run first, then the props chain keyed
    /// [`WRITE_METHOD`], then the diff against the frozen snapshot; only
    /// keys whose value actually differs are applied and reported. The
    /// event chain fires once, after apply, with the final candidate and
    /// the changed-key list, and only when something changed.
    ///
    /// A handler failure propagates without rolling back keys already
    /// applied; callers that need all-or-nothing must arrange it
    /// themselves.
    pub fn update(&mut self, partial: StateMap) -> Result<bool, ModelError> {
        let snapshot = self.store.snapshot();

        let candidate = self.derivations.derive(partial, &snapshot)?;

        let args = self.pipeline.run(
            WRITE_METHOD,
            Phase::Props,
            vec![Value::Object(candidate), Value::Object(snapshot.clone())],
        )?;
        let candidate = match args.into_iter().next() {
            Some(Value::Object(map)) => map,
            _ => {
                return Err(ModelError::InvalidPipelineOutput {
                    method: WRITE_METHOD.to_owned(),
                })
            }
        };

        let mut changed: Vec<String> = Vec::new();
        for (key, value) in &candidate {
            if snapshot.get(key) != Some(value) {
                self.store.insert(key.clone(), value.clone());
                changed.push(key.clone());
            }
        }

        if changed.is_empty() {
            return Ok(false);
        }
        debug!(?changed, "state updated");

        let changed_keys = Value::Array(changed.into_iter().map(Value::String).collect());
        self.pipeline.run(
            WRITE_METHOD,
            Phase::Event,
            vec![Value::Object(candidate), changed_keys],
        )?;

        Ok(true)
    }

    /// Invoke a registered method through the call protocol.
    ///
    /// Unless the method is silent: the props chain transforms the
    /// argument list, the method body runs with the transformed arguments,
    /// the result chain transforms `(original arguments, result)` and its
    /// second element becomes the return value, and the event chain is
    /// notified with `(method name, transformed arguments, result)`.
    pub fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Value, ModelError> {
        if !is_public(method) {
            return Err(ModelError::UnknownMethod(method.to_owned()));
        }
        let func = self
            .methods
            .get(method)
            .cloned()
            .ok_or_else(|| ModelError::UnknownMethod(method.to_owned()))?;

        if self.silents.contains(method) {
            return func(self, &args).map_err(|source| ModelError::Method {
                method: method.to_owned(),
                source,
            });
        }

        let call_args = self.pipeline.run(method, Phase::Props, args.clone())?;
        let result = func(self, &call_args).map_err(|source| ModelError::Method {
            method: method.to_owned(),
            source,
        })?;

        let out = self
            .pipeline
            .run(method, Phase::Result, vec![Value::Array(args), result])?;
        let result = out.into_iter().nth(1).unwrap_or(Value::Null);

        self.pipeline.run(
            method,
            Phase::Event,
            vec![
                Value::String(method.to_owned()),
                Value::Array(call_args),
                result.clone(),
            ],
        )?;

        Ok(result)
    }

    /// Register a callable method on the instance.
    ///
    /// Methods receive the model itself and the (possibly transformed)
    /// argument list, so they can read state or issue further writes.
    /// Replaces any method previously registered under the same name.
    pub fn register_method<F>(&mut self, name: impl Into<String>, func: F) -> Result<(), ModelError>
    where
        F: Fn(&mut Model, &[Value]) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(ModelError::InvalidMethodKey(name));
        }
        self.methods.insert(name, Arc::new(func));
        Ok(())
    }

    /// Register a handler for `phase` on the given methods. An empty slice
    /// addresses the wildcard.
    pub fn use_middleware(
        &mut self,
        handler: Middleware,
        methods: &[&str],
        phase: Phase,
    ) -> Result<(), ModelError> {
        self.pipeline.register(handler, methods, phase)
    }

    /// Remove a previously registered handler, by identity.
    pub fn unuse_middleware(
        &mut self,
        handler: &Middleware,
        methods: &[&str],
        phase: Phase,
    ) -> Result<(), ModelError> {
        self.pipeline.deregister(handler, methods, phase)
    }

    /// Register a props-phase handler.
    pub fn use_props(&mut self, handler: Middleware, methods: &[&str]) -> Result<(), ModelError> {
        self.use_middleware(handler, methods, Phase::Props)
    }

    /// Remove a props-phase handler, by identity.
    pub fn unuse_props(&mut self, handler: &Middleware, methods: &[&str]) -> Result<(), ModelError> {
        self.unuse_middleware(handler, methods, Phase::Props)
    }

    /// Register a result-phase handler.
    pub fn use_result(&mut self, handler: Middleware, methods: &[&str]) -> Result<(), ModelError> {
        self.use_middleware(handler, methods, Phase::Result)
    }

    /// Remove a result-phase handler, by identity.
    pub fn unuse_result(&mut self, handler: &Middleware, methods: &[&str]) -> Result<(), ModelError> {
        self.unuse_middleware(handler, methods, Phase::Result)
    }

    /// Register an event-phase handler.
    pub fn use_event(&mut self, handler: Middleware, methods: &[&str]) -> Result<(), ModelError> {
        self.use_middleware(handler, methods, Phase::Event)
    }

    /// Remove an event-phase handler, by identity.
    pub fn unuse_event(&mut self, handler: &Middleware, methods: &[&str]) -> Result<(), ModelError> {
        self.unuse_middleware(handler, methods, Phase::Event)
    }

    /// Exempt a method from call interception.
    pub fn add_silent(&mut self, name: impl Into<String>) {
        self.silents.insert(name.into());
    }

    /// Whether a method bypasses the pipeline when called.
    pub fn is_silent(&self, name: &str) -> bool {
        self.silents.contains(name)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("state", &self.to_object())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Serializes the public view only, same filter as
/// [`to_object`](Model::to_object).
impl Serialize for Model {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in self.store.public_entries() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
