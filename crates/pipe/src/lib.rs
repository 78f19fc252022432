//! # Compositional Pipe - Typed Stage Composition
//!
//! Pipelines are values: stages are joined, forked, merged and bound to a
//! scoped store, and every join is type checked when the pipeline is
//! assembled, before anything runs.
//!
//! - **Types**: explicit type descriptors, generics, nominal subtyping ([`ty`], [`check`])
//! - **Stages**: typed units of work built from closures or descriptors ([`stage`], [`descriptor`])
//! - **Composition**: `compose`, `pipeline`, `fork`, `merge`, `to` ([`compose`], [`fan`])
//! - **Store**: a per-pipeline side channel with write and read binds ([`store`], [`bind`])
//! - **Export**: step trees, flow graphs and timing traces ([`node`], [`diagram`], [`trace`])
//!
//! ## Example
//!
//! ```rust
//! use compositional_pipe::{args, fork, merge, pipeline, Stage};
//!
//! let add = Stage::from_fn2("add", ["x", "y"], |x: i64, y: i64| x + y);
//! let double = Stage::from_fn1("double", ["v"], |v: i64| v * 2);
//!
//! let p = pipeline([add.clone(), double.clone(), double.clone()]).unwrap();
//! assert_eq!(p.call(args![1_i64, 2_i64]).unwrap().get::<i64>().unwrap(), 12);
//!
//! let fan = pipeline([
//!     add.clone(),
//!     fork([double.clone(), double]).unwrap(),
//!     merge(add),
//! ])
//! .unwrap();
//! assert_eq!(fan.call(args![1_i64, 1_i64]).unwrap().get::<i64>().unwrap(), 8);
//! ```
//!
//! A join whose types don't line up is refused at assembly:
//!
//! ```rust
//! use compositional_pipe::{pipeline, PipeError, Stage};
//!
//! let show = Stage::from_fn1("show", ["n"], |n: i64| n.to_string());
//! let double = Stage::from_fn1("double", ["v"], |v: i64| v * 2);
//! let err = pipeline([show, double]).unwrap_err();
//! assert!(matches!(err, PipeError::OutputInputMismatch { .. }));
//! ```

pub mod bind;
pub mod check;
pub mod compose;
pub mod descriptor;
pub mod diagram;
pub mod error;
pub mod fan;
pub mod node;
pub mod signature;
pub mod stage;
pub mod store;
pub mod syntax;
pub mod trace;
pub mod ty;
pub mod value;

// Re-export key types at crate root for convenience
pub use check::{compatible, is_compatible, trim_optional};
pub use compose::{compose, pipeline};
pub use descriptor::{ParamDescriptor, StageDescriptor};
pub use diagram::{Link, Step, StepGraph, StepKind};
pub use error::{BoxError, ErrorKind, PipeError};
pub use fan::{fork, identity, merge, to};
pub use node::{Node, ReadBind};
pub use signature::{Param, ParamDecl, ParamKind, Signature};
pub use stage::{Stage, StageBuilder, StoreEffect};
pub use store::{Context, RunConfig, Store, StoreKey};
pub use syntax::{parse_type, TypeParser};
pub use trace::TraceNode;
pub use ty::{Bindings, ContainerKind, Nominal, Ty, TypeVar};
pub use value::{Args, FanOut, Item, Record, Typed, Value};
