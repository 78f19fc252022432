//! # Scoped Store
//!
//! The store is a side channel: a stage can write its result under a name,
//! and a later stage (not necessarily the next one) can read it back into
//! one of its parameters. See [`crate::Stage::write_to`] and friends.
//!
//! ## Scoping
//!
//! There is no global store. A [`Context`] owns the active [`Store`] and is
//! passed through every call. Each pipeline invocation swaps in a fresh
//! store and restores the previous one when it returns, successfully or
//! not, so a nested pipeline can neither see nor clobber the names of the
//! pipeline that called it:
//!
//! ```text
//! outer scope   { "user" }
//!   └─ nested pipeline scope { }      <- "user" is not visible here
//! ```
//!
//! A read of a name from an enclosing scope fails exactly like a read of a
//! name that was never written.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::error::PipeError;
use crate::trace::{Recorder, TraceNode};
use crate::ty::Ty;
use crate::value::{Typed, Value};

// ============================================================================
// Keys
// ============================================================================

/// A generated, collision-free store name.
///
/// Useful when a reusable pipeline fragment needs a private slot: two
/// fragments that each create their own key can never clash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn new() -> Self {
        Self(format!("key-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StoreKey {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Store
// ============================================================================

/// One scope's values and their recorded types.
#[derive(Default, Clone)]
pub struct Store {
    values: HashMap<String, Value>,
    types: HashMap<String, Ty>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value. A name can be written once per scope.
    pub fn write(&mut self, name: &str, value: Value) -> Result<(), PipeError> {
        if self.values.contains_key(name) {
            return Err(PipeError::AttributeExists {
                name: name.to_string(),
            });
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Read a previously written value.
    pub fn read(&self, name: &str) -> Result<Value, PipeError> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| PipeError::AttributeNotFound {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Record the type of an entry. Each name gets one type, and "no value"
    /// is not a storable type.
    pub fn record_type(&mut self, name: &str, ty: Ty) -> Result<(), PipeError> {
        check_storable(name, &ty)?;
        if self.types.contains_key(name) {
            return Err(PipeError::AttributeExists {
                name: name.to_string(),
            });
        }
        self.types.insert(name.to_string(), ty);
        Ok(())
    }

    /// Write a value together with its type. When either is rejected the
    /// store is left as it was.
    pub fn write_typed(&mut self, name: &str, value: Value, ty: Ty) -> Result<(), PipeError> {
        check_storable(name, &ty)?;
        if self.values.contains_key(name) || self.types.contains_key(name) {
            return Err(PipeError::AttributeExists {
                name: name.to_string(),
            });
        }
        self.values.insert(name.to_string(), value);
        self.types.insert(name.to_string(), ty);
        Ok(())
    }

    /// The recorded type of an entry.
    pub fn type_of(&self, name: &str) -> Result<&Ty, PipeError> {
        self.types
            .get(name)
            .ok_or_else(|| PipeError::AttributeNotFound {
                name: name.to_string(),
                available: sorted(self.types.keys()),
            })
    }

    /// Write a typed value and record its type in one step.
    pub fn insert<T: Typed>(&mut self, name: impl AsRef<str>, value: T) -> Result<(), PipeError> {
        self.write_typed(name.as_ref(), value.into_value(), T::ty())
    }

    /// Read an entry back as a Rust value.
    pub fn get<T: Typed>(&self, name: impl AsRef<str>) -> Result<T, PipeError> {
        self.read(name.as_ref())?.get()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Written names, sorted.
    pub fn names(&self) -> Vec<String> {
        sorted(self.values.keys())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn check_storable(name: &str, ty: &Ty) -> Result<(), PipeError> {
    if ty.is_unit() {
        return Err(PipeError::InvalidStoreType {
            name: name.to_string(),
            ty: ty.to_string(),
        });
    }
    Ok(())
}

fn sorted<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut names: Vec<String> = keys.cloned().collect();
    names.sort();
    names
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("names", &self.names())
            .finish()
    }
}

// ============================================================================
// Context
// ============================================================================

/// Runtime knobs for a [`Context`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Record a [`TraceNode`] tree per call.
    pub record_trace: bool,
    /// Maximum nesting of pipeline scopes.
    pub max_depth: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            record_trace: false,
            max_depth: 64,
        }
    }
}

impl RunConfig {
    pub fn with_record_trace(mut self, record: bool) -> Self {
        self.record_trace = record;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Per-call execution state: the active store scope and the trace recorder.
pub struct Context {
    store: Store,
    depth: usize,
    config: RunConfig,
    recorder: Recorder,
}

impl Default for Context {
    fn default() -> Self {
        Self::with_config(RunConfig::default())
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RunConfig) -> Self {
        Self {
            store: Store::new(),
            depth: 0,
            recorder: Recorder::new(config.record_trace),
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The active scope.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// How many pipeline scopes are currently open.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Completed traces since the last call, oldest first.
    pub fn take_trace(&mut self) -> Vec<TraceNode> {
        self.recorder.take()
    }

    /// Run `f` inside a fresh scope, restoring the current one afterwards
    /// on every path.
    pub(crate) fn scoped<T>(
        &mut self,
        f: impl FnOnce(&mut Context) -> Result<T, PipeError>,
    ) -> Result<T, PipeError> {
        if self.depth >= self.config.max_depth {
            return Err(PipeError::DepthExceeded {
                max: self.config.max_depth,
            });
        }
        let previous = std::mem::take(&mut self.store);
        self.depth += 1;
        tracing::debug!(depth = self.depth, "entering store scope");

        let result = f(self);

        tracing::debug!(depth = self.depth, entries = self.store.len(), "leaving store scope");
        self.depth -= 1;
        self.store = previous;
        result
    }

    /// Run `f` as a traced call named `name`.
    pub(crate) fn traced<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Context) -> Result<T, PipeError>,
    ) -> Result<T, PipeError> {
        self.recorder.enter(name);
        let result = f(self);
        self.recorder.exit(result.is_err());
        result
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("store", &self.store)
            .field("depth", &self.depth)
            .field("config", &self.config)
            .finish()
    }
}
