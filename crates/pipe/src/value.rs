//! # Values Flowing Between Stages
//!
//! A pipeline is assembled from stages of different shapes, so the values
//! passed between them are dynamic: a [`Value`] is either nothing, a single
//! opaque item, a structural container, a multi-value result, or a fan-out
//! bundle.
//!
//! ## Typed Conversion
//!
//! [`Typed`] is the compile-time bridge between Rust types and the runtime
//! descriptors in [`crate::ty`]. A user type only needs to name its
//! descriptor; the default conversions box it as an opaque item:
//!
//! ```rust
//! use compositional_pipe::{Nominal, Ty, Typed, Value};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Celsius(f64);
//!
//! impl Typed for Celsius {
//!     fn ty() -> Ty {
//!         Ty::named(&Nominal::new("Celsius"))
//!     }
//! }
//!
//! let v = Value::new(Celsius(21.5));
//! assert_eq!(v.get::<Celsius>().unwrap(), Celsius(21.5));
//! ```
//!
//! Standard containers convert structurally, so a `Vec<i64>` produced by one
//! stage can be consumed as a `BTreeSet<i64>` by the next (list and set are
//! interchangeable for the checker, and the values follow).

use std::any::{type_name, Any};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{BoxError, PipeError};
use crate::ty::Ty;

// ============================================================================
// Value
// ============================================================================

trait Payload: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + fmt::Debug> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An opaque, cheaply clonable value of some Rust type.
#[derive(Clone)]
pub struct Item {
    type_name: &'static str,
    payload: Arc<dyn Payload>,
}

impl Item {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        (*self.payload).as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.payload, f)
    }
}

/// A value passed between stages.
#[derive(Debug, Clone)]
pub enum Value {
    /// No value.
    Unit,
    Item(Item),
    /// A sequence (list, set).
    Seq(Vec<Value>),
    /// A mapping, in insertion (or key) order.
    Map(Vec<(Value, Value)>),
    /// A multi-value result; unpacked positionally into the next stage.
    Tuple(Vec<Value>),
    /// A composite fan-output.
    Fan(FanOut),
}

impl Value {
    /// Convert any [`Typed`] value.
    pub fn new<T: Typed>(value: T) -> Self {
        value.into_value()
    }

    /// Box `value` as an opaque item.
    pub fn item<T: Any + Send + Sync + fmt::Debug>(value: T) -> Self {
        Value::Item(Item {
            type_name: type_name::<T>(),
            payload: Arc::new(value),
        })
    }

    /// Convert back into a [`Typed`] Rust value.
    pub fn get<T: Typed>(&self) -> Result<T, PipeError> {
        T::from_value(self)
    }

    /// Clone the boxed item out if it holds a `T`.
    pub fn downcast<T: Clone + 'static>(&self) -> Result<T, PipeError> {
        match self {
            Value::Item(item) => item
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| self.mismatch::<T>()),
            _ => Err(self.mismatch::<T>()),
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Value::Unit => "none".to_string(),
            Value::Item(item) => item.type_name().to_string(),
            Value::Seq(items) => format!("sequence of {}", items.len()),
            Value::Map(entries) => format!("mapping of {}", entries.len()),
            Value::Tuple(items) => format!("tuple of {}", items.len()),
            Value::Fan(fan) => format!("fan of {}", fan.len()),
        }
    }

    pub(crate) fn mismatch<T>(&self) -> PipeError {
        PipeError::ValueType {
            expected: type_name::<T>(),
            found: self.describe(),
        }
    }
}

/// Build a `Vec<Value>` from [`Typed`] expressions.
///
/// ```rust
/// use compositional_pipe::args;
///
/// let args = args![1_i64, "x".to_string()];
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::Value>::new() };
    ($($v:expr),+ $(,)?) => { ::std::vec![$($crate::Value::new($v)),+] };
}

// ============================================================================
// Fan-out bundles
// ============================================================================

/// An ordered bundle of branch results.
///
/// Downstream fan-in primitives flatten it before use: nested bundles are
/// spliced in place, left to right, until none remain.
#[derive(Debug, Clone, Default)]
pub struct FanOut(Vec<Value>);

impl FanOut {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// No element is itself a bundle.
    pub fn is_flat(&self) -> bool {
        !self.0.iter().any(|v| matches!(v, Value::Fan(_)))
    }

    /// Splice nested bundles one level at a time until the bundle is flat.
    pub fn flatten(self) -> FanOut {
        let mut current = self.0;
        while current.iter().any(|v| matches!(v, Value::Fan(_))) {
            let mut next = Vec::with_capacity(current.len());
            for value in current {
                match value {
                    Value::Fan(inner) => next.extend(inner.0),
                    other => next.push(other),
                }
            }
            current = next;
        }
        FanOut(current)
    }
}

/// Splice nested fan types the same way [`FanOut::flatten`] splices values.
pub(crate) fn flatten_types(types: &[Ty]) -> Vec<Ty> {
    let mut out = Vec::with_capacity(types.len());
    for ty in types {
        match ty {
            Ty::Fan(Some(inner)) => out.extend(flatten_types(inner)),
            other => out.push(other.clone()),
        }
    }
    out
}

// ============================================================================
// Typed
// ============================================================================

/// A Rust type with a runtime type descriptor and conversions to [`Value`].
pub trait Typed: Sized + Clone + Send + Sync + fmt::Debug + 'static {
    /// The descriptor the checker sees for this type.
    fn ty() -> Ty;

    fn into_value(self) -> Value {
        Value::item(self)
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        value.downcast::<Self>()
    }
}

/// A type `to` can construct from flattened fan-out values.
pub trait Record: Typed {
    /// Field names and types, in declaration order.
    fn fields() -> Vec<(&'static str, Ty)>;

    /// Build from one value per field, in declaration order.
    fn construct(values: Vec<Value>) -> Result<Self, BoxError>;
}

/// Sequential typed access to a list of values.
///
/// ```rust
/// use compositional_pipe::{args, Args};
///
/// let mut args = Args::new(args![3_i64, "a".to_string()]);
/// let n: i64 = args.next().unwrap();
/// let s: String = args.next().unwrap();
/// assert_eq!((n, s.as_str()), (3, "a"));
/// ```
#[derive(Debug)]
pub struct Args(std::vec::IntoIter<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values.into_iter())
    }

    /// Convert the next value; a missing value reads as [`Value::Unit`].
    #[allow(clippy::should_implement_trait)]
    pub fn next<T: Typed>(&mut self) -> Result<T, PipeError> {
        let value = self.0.next().unwrap_or(Value::Unit);
        T::from_value(&value)
    }

    pub fn remaining(&self) -> usize {
        self.0.len()
    }
}

// ---- scalars ---------------------------------------------------------------

impl Typed for i64 {
    fn ty() -> Ty {
        Ty::Int
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        match value {
            Value::Item(item) => item
                .downcast_ref::<i64>()
                .copied()
                .or_else(|| item.downcast_ref::<i32>().map(|v| i64::from(*v)))
                .ok_or_else(|| value.mismatch::<i64>()),
            _ => Err(value.mismatch::<i64>()),
        }
    }
}

impl Typed for i32 {
    fn ty() -> Ty {
        Ty::Int
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        match value {
            Value::Item(item) => item
                .downcast_ref::<i32>()
                .copied()
                .or_else(|| item.downcast_ref::<i64>().and_then(|v| i32::try_from(*v).ok()))
                .ok_or_else(|| value.mismatch::<i32>()),
            _ => Err(value.mismatch::<i32>()),
        }
    }
}

// Integers widen to floats, the same exception the checker makes.
impl Typed for f64 {
    fn ty() -> Ty {
        Ty::Float
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        match value {
            Value::Item(item) => item
                .downcast_ref::<f64>()
                .copied()
                .or_else(|| item.downcast_ref::<f32>().map(|v| f64::from(*v)))
                .or_else(|| item.downcast_ref::<i64>().map(|v| *v as f64))
                .or_else(|| item.downcast_ref::<i32>().map(|v| f64::from(*v)))
                .ok_or_else(|| value.mismatch::<f64>()),
            _ => Err(value.mismatch::<f64>()),
        }
    }
}

impl Typed for f32 {
    fn ty() -> Ty {
        Ty::Float
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        match value {
            Value::Item(item) => item
                .downcast_ref::<f32>()
                .copied()
                .or_else(|| item.downcast_ref::<f64>().map(|v| *v as f32))
                .or_else(|| item.downcast_ref::<i64>().map(|v| *v as f32))
                .or_else(|| item.downcast_ref::<i32>().map(|v| *v as f32))
                .ok_or_else(|| value.mismatch::<f32>()),
            _ => Err(value.mismatch::<f32>()),
        }
    }
}

impl Typed for bool {
    fn ty() -> Ty {
        Ty::Bool
    }
}

impl Typed for String {
    fn ty() -> Ty {
        Ty::Str
    }
}

impl Typed for () {
    fn ty() -> Ty {
        Ty::Unit
    }

    fn into_value(self) -> Value {
        Value::Unit
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        match value {
            Value::Unit => Ok(()),
            other => Err(other.mismatch::<()>()),
        }
    }
}

impl Typed for Value {
    fn ty() -> Ty {
        Ty::Any
    }

    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        Ok(value.clone())
    }
}

impl Typed for FanOut {
    fn ty() -> Ty {
        Ty::Fan(None)
    }

    fn into_value(self) -> Value {
        Value::Fan(self)
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        match value {
            Value::Fan(fan) => Ok(fan.clone()),
            other => Err(other.mismatch::<FanOut>()),
        }
    }
}

impl<T: Typed> Typed for Option<T> {
    fn ty() -> Ty {
        Ty::optional(T::ty())
    }

    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Unit,
        }
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        match value {
            Value::Unit => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

// ---- containers -------------------------------------------------------------

fn seq_items(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Seq(items) => Some(items),
        _ => None,
    }
}

fn map_entries(value: &Value) -> Option<&[(Value, Value)]> {
    match value {
        Value::Map(entries) => Some(entries),
        _ => None,
    }
}

impl<T: Typed> Typed for Vec<T> {
    fn ty() -> Ty {
        Ty::list(T::ty())
    }

    fn into_value(self) -> Value {
        Value::Seq(self.into_iter().map(Typed::into_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        let items = seq_items(value).ok_or_else(|| value.mismatch::<Self>())?;
        items.iter().map(T::from_value).collect()
    }
}

impl<T: Typed + Eq + Hash> Typed for HashSet<T> {
    fn ty() -> Ty {
        Ty::set(T::ty())
    }

    fn into_value(self) -> Value {
        Value::Seq(self.into_iter().map(Typed::into_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        let items = seq_items(value).ok_or_else(|| value.mismatch::<Self>())?;
        items.iter().map(T::from_value).collect()
    }
}

impl<T: Typed + Ord> Typed for BTreeSet<T> {
    fn ty() -> Ty {
        Ty::set(T::ty())
    }

    fn into_value(self) -> Value {
        Value::Seq(self.into_iter().map(Typed::into_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        let items = seq_items(value).ok_or_else(|| value.mismatch::<Self>())?;
        items.iter().map(T::from_value).collect()
    }
}

impl<K: Typed + Eq + Hash, V: Typed> Typed for HashMap<K, V> {
    fn ty() -> Ty {
        Ty::dict(K::ty(), V::ty())
    }

    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        let entries = map_entries(value).ok_or_else(|| value.mismatch::<Self>())?;
        entries
            .iter()
            .map(|(k, v)| Ok::<_, PipeError>((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}

impl<K: Typed + Ord, V: Typed> Typed for BTreeMap<K, V> {
    fn ty() -> Ty {
        Ty::dict(K::ty(), V::ty())
    }

    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k.into_value(), v.into_value()))
                .collect(),
        )
    }

    fn from_value(value: &Value) -> Result<Self, PipeError> {
        let entries = map_entries(value).ok_or_else(|| value.mismatch::<Self>())?;
        entries
            .iter()
            .map(|(k, v)| Ok::<_, PipeError>((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}

// ---- tuples -----------------------------------------------------------------

macro_rules! impl_typed_tuple {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: Typed),+> Typed for ($($name,)+) {
            fn ty() -> Ty {
                Ty::tuple(vec![$($name::ty()),+])
            }

            fn into_value(self) -> Value {
                Value::Tuple(vec![$(self.$idx.into_value()),+])
            }

            fn from_value(value: &Value) -> Result<Self, PipeError> {
                match value {
                    Value::Tuple(items) if items.len() == $len => {
                        Ok(($($name::from_value(&items[$idx])?,)+))
                    }
                    other => Err(other.mismatch::<Self>()),
                }
            }
        }
    };
}

impl_typed_tuple!(2; A: 0, B: 1);
impl_typed_tuple!(3; A: 0, B: 1, C: 2);

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(fan: &FanOut) -> Vec<i64> {
        fan.values().iter().map(|v| v.get::<i64>().unwrap()).collect()
    }

    #[test]
    fn test_flatten_nested() {
        let inner = FanOut::new(vec![Value::new(2_i64), Value::new(3_i64)]);
        let deeper = FanOut::new(vec![Value::Fan(inner), Value::new(4_i64)]);
        let fan = FanOut::new(vec![Value::new(1_i64), Value::Fan(deeper), Value::new(5_i64)]);

        assert!(!fan.is_flat());
        let flat = fan.flatten();
        assert!(flat.is_flat());
        assert_eq!(ints(&flat), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_flatten_flat_is_noop() {
        let fan = FanOut::new(vec![Value::new(1_i64), Value::new(2_i64)]);
        let once = fan.flatten();
        let twice = once.clone().flatten();
        assert_eq!(ints(&once), ints(&twice));
    }

    #[test]
    fn test_int_widens_to_float() {
        let v = Value::new(3_i64);
        assert_eq!(v.get::<f64>().unwrap(), 3.0);
        assert!(Value::new(1.5_f64).get::<i64>().is_err());
    }

    #[test]
    fn test_option_maps_to_unit() {
        assert!(Value::new(None::<i64>).is_unit());
        assert_eq!(Value::Unit.get::<Option<i64>>().unwrap(), None);
        assert_eq!(Value::new(4_i64).get::<Option<i64>>().unwrap(), Some(4));
        assert_eq!(<Option<i64>>::ty(), Ty::optional(Ty::Int));
    }

    #[test]
    fn test_sequences_convert_structurally() {
        let v = Value::new(vec![3_i64, 1, 3]);
        let set: BTreeSet<i64> = v.get().unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_tuple_round_trip() {
        let v = Value::new((1_i64, "a".to_string()));
        assert!(matches!(v, Value::Tuple(ref items) if items.len() == 2));
        let (n, s): (i64, String) = v.get().unwrap();
        assert_eq!((n, s.as_str()), (1, "a"));
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let err = Value::new("x".to_string()).get::<i64>().unwrap_err();
        assert!(matches!(err, PipeError::ValueType { expected: "i64", .. }));
    }

    #[test]
    fn test_flatten_types() {
        let tys = vec![Ty::Int, Ty::Fan(Some(vec![Ty::Str, Ty::Fan(Some(vec![Ty::Bool]))]))];
        assert_eq!(flatten_types(&tys), vec![Ty::Int, Ty::Str, Ty::Bool]);
    }
}
