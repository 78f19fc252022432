//! # Types - Stage Contracts as Values
//!
//! Every stage declares the types of its parameters and of its result.
//! Composition is only valid when the result of one stage fits the
//! parameters of the next, so these descriptors are what the checker
//! (see [`crate::check`]) compares at assembly time.
//!
//! ## Design Choices
//!
//! Types are explicit runtime descriptors rather than Rust generics: a
//! pipeline is assembled from stages of different shapes and needs to be
//! inspected as a whole. Statically known stages derive their descriptors
//! from Rust types through [`crate::value::Typed`]; stages assembled at
//! runtime spell them out (or parse them, see [`crate::syntax`]).

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Container families. Members of a family are interchangeable, and
/// `Iterable` accepts any container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContainerKind {
    List,
    Set,
    Iterable,
    Dict,
    Mapping,
    Tuple,
}

/// The interchangeable groups containers fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    Sequence,
    Mapping,
    Tuple,
    Any,
}

impl ContainerKind {
    pub(crate) fn family(self) -> Family {
        match self {
            ContainerKind::List | ContainerKind::Set => Family::Sequence,
            ContainerKind::Dict | ContainerKind::Mapping => Family::Mapping,
            ContainerKind::Tuple => Family::Tuple,
            ContainerKind::Iterable => Family::Any,
        }
    }

    /// Whether a `self` container may stand in where `expected` is declared.
    pub fn interchangeable_with(self, expected: ContainerKind) -> bool {
        expected.family() == Family::Any || self.family() == expected.family()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerKind::List => "list",
            ContainerKind::Set => "set",
            ContainerKind::Iterable => "iterable",
            ContainerKind::Dict => "dict",
            ContainerKind::Mapping => "mapping",
            ContainerKind::Tuple => "tuple",
        }
    }
}

/// A nominal (user declared) type together with its supertype chain.
///
/// Two nominal types are the same when their names are equal; subtyping
/// follows the declared `parent` links.
#[derive(Debug, Clone, Serialize)]
pub struct Nominal {
    pub name: String,
    #[serde(skip)]
    parent: Option<Arc<Nominal>>,
}

impl Nominal {
    /// A root nominal type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
        }
    }

    /// A nominal type declared as a subtype of `parent`.
    pub fn extending(name: impl Into<String>, parent: &Nominal) -> Self {
        Self {
            name: name.into(),
            parent: Some(Arc::new(parent.clone())),
        }
    }

    /// The direct supertype, if any.
    pub fn parent(&self) -> Option<&Nominal> {
        self.parent.as_deref()
    }

    /// Nominal subclassing: `self` is `other` or one of its descendants.
    pub fn is_subtype_of(&self, other: &Nominal) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty.name == other.name {
                return true;
            }
            current = ty.parent();
        }
        false
    }
}

impl PartialEq for Nominal {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Nominal {}

/// A generic placeholder such as `T`, optionally bounded or constrained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeVar {
    pub name: String,
    /// Every resolution must fit the bound.
    pub bound: Option<Box<Ty>>,
    /// A resolution must fit at least one constraint (when any are given).
    pub constraints: Vec<Ty>,
}

impl TypeVar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bound: None,
            constraints: Vec::new(),
        }
    }

    pub fn bounded(mut self, bound: Ty) -> Self {
        self.bound = Some(Box::new(bound));
        self
    }

    pub fn constrained(mut self, constraints: Vec<Ty>) -> Self {
        self.constraints = constraints;
        self
    }
}

/// A declared type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Ty {
    /// Accepts everything.
    Any,
    /// "No value". A stage returning `Unit` feeds nothing to the next stage.
    Unit,
    Bool,
    Int,
    Float,
    Str,
    Named(Nominal),
    Generic(TypeVar),
    Union(Vec<Ty>),
    Container { kind: ContainerKind, args: Vec<Ty> },
    Callable { params: Vec<Ty>, ret: Box<Ty> },
    /// A composite fan-output. `Some` carries the flattened branch types.
    Fan(Option<Vec<Ty>>),
}

/// Generic placeholder resolutions, keyed by placeholder name.
pub type Bindings = BTreeMap<String, Ty>;

impl Ty {
    pub fn named(nominal: &Nominal) -> Self {
        Ty::Named(nominal.clone())
    }

    pub fn generic(name: impl Into<String>) -> Self {
        Ty::Generic(TypeVar::new(name))
    }

    pub fn list(item: Ty) -> Self {
        Ty::Container {
            kind: ContainerKind::List,
            args: vec![item],
        }
    }

    pub fn set(item: Ty) -> Self {
        Ty::Container {
            kind: ContainerKind::Set,
            args: vec![item],
        }
    }

    pub fn dict(key: Ty, value: Ty) -> Self {
        Ty::Container {
            kind: ContainerKind::Dict,
            args: vec![key, value],
        }
    }

    pub fn tuple(items: Vec<Ty>) -> Self {
        Ty::Container {
            kind: ContainerKind::Tuple,
            args: items,
        }
    }

    /// An unparametrized container, e.g. a bare `iterable`.
    pub fn bare(kind: ContainerKind) -> Self {
        Ty::Container {
            kind,
            args: Vec::new(),
        }
    }

    pub fn callable(params: Vec<Ty>, ret: Ty) -> Self {
        Ty::Callable {
            params,
            ret: Box::new(ret),
        }
    }

    /// `Union[inner, Unit]`.
    pub fn optional(inner: Ty) -> Self {
        match inner {
            Ty::Union(mut arms) => {
                if !arms.contains(&Ty::Unit) {
                    arms.push(Ty::Unit);
                }
                Ty::Union(arms)
            }
            Ty::Unit => Ty::Unit,
            other => Ty::Union(vec![other, Ty::Unit]),
        }
    }

    /// A union that also admits "no value".
    pub fn is_optional(&self) -> bool {
        matches!(self, Ty::Union(arms) if arms.contains(&Ty::Unit))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Ty::Unit)
    }

    /// The values a stage declared with this result type produces,
    /// as seen by the next stage: a tuple is several values, `Unit` none.
    pub fn produced(&self) -> Vec<Ty> {
        match self {
            Ty::Unit => Vec::new(),
            Ty::Container {
                kind: ContainerKind::Tuple,
                args,
            } => args.clone(),
            other => vec![other.clone()],
        }
    }

    /// Substitute resolved placeholders, recursively.
    pub fn resolve(&self, bindings: &Bindings) -> Ty {
        match self {
            Ty::Generic(var) => bindings.get(&var.name).cloned().unwrap_or_else(|| self.clone()),
            Ty::Union(arms) => Ty::Union(arms.iter().map(|t| t.resolve(bindings)).collect()),
            Ty::Container { kind, args } => Ty::Container {
                kind: *kind,
                args: args.iter().map(|t| t.resolve(bindings)).collect(),
            },
            Ty::Callable { params, ret } => Ty::Callable {
                params: params.iter().map(|t| t.resolve(bindings)).collect(),
                ret: Box::new(ret.resolve(bindings)),
            },
            Ty::Fan(Some(items)) => Ty::Fan(Some(items.iter().map(|t| t.resolve(bindings)).collect())),
            other => other.clone(),
        }
    }

    /// Whether an unresolved placeholder occurs anywhere in this type.
    pub fn has_generics(&self) -> bool {
        match self {
            Ty::Generic(_) => true,
            Ty::Union(arms) => arms.iter().any(Ty::has_generics),
            Ty::Container { args, .. } => args.iter().any(Ty::has_generics),
            Ty::Callable { params, ret } => params.iter().any(Ty::has_generics) || ret.has_generics(),
            Ty::Fan(Some(items)) => items.iter().any(Ty::has_generics),
            _ => false,
        }
    }
}

fn join(items: &[Ty]) -> String {
    items.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Any => write!(f, "any"),
            Ty::Unit => write!(f, "none"),
            Ty::Bool => write!(f, "bool"),
            Ty::Int => write!(f, "int"),
            Ty::Float => write!(f, "float"),
            Ty::Str => write!(f, "str"),
            Ty::Named(n) => write!(f, "{}", n.name),
            Ty::Generic(v) => write!(f, "{}", v.name),
            Ty::Union(arms) => {
                let parts: Vec<String> = arms.iter().map(|t| t.to_string()).collect();
                write!(f, "{}", parts.join(" | "))
            }
            Ty::Container { kind, args } if args.is_empty() => write!(f, "{}", kind.as_str()),
            Ty::Container { kind, args } => write!(f, "{}[{}]", kind.as_str(), join(args)),
            Ty::Callable { params, ret } => write!(f, "callable[[{}], {}]", join(params), ret),
            Ty::Fan(None) => write!(f, "fan"),
            Ty::Fan(Some(items)) => write!(f, "fan[{}]", join(items)),
        }
    }
}
