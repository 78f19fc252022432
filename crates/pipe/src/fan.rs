//! # Fan-out and Fan-in
//!
//! - [`fork`] calls every branch with the same input and bundles the results
//!   into a [`FanOut`];
//! - [`merge`] flattens a bundle and calls a combiner stage with its values;
//! - [`to`] flattens a bundle and constructs a [`Record`];
//! - [`identity`] forwards its input, e.g. to keep a value alongside a branch
//!   that transforms it.
//!
//! ```text
//!              ┌────────┐
//!    x ────────│ double │────┐
//!         │    └────────┘    │    ┌───────┐
//!         │                  ├────│  add  │──── 2x + x
//!         │    ┌──────────┐  │    └───────┘
//!         └────│ identity │──┘
//!              └──────────┘
//!
//!    pipeline(fork(double, identity), merge(add))
//! ```
//!
//! Branches run one after another, in the listed order.

use std::sync::Arc;

use crate::check::{match_outputs, trim_optional, Consumer};
use crate::error::{BoxError, PipeError};
use crate::node::Node;
use crate::signature::{format_produced, Param, Signature};
use crate::stage::{Invoke, Stage};
use crate::store::Context;
use crate::ty::{Bindings, Ty};
use crate::value::{flatten_types, FanOut, Record, Value};

/// What a fan-in stage feeds the flattened values into.
#[derive(Clone)]
pub(crate) enum FanIn {
    Merge(Box<Stage>),
    Construct {
        target: String,
        fields: Vec<(String, Ty)>,
    },
}

impl FanIn {
    /// Check branch output types, when a fork makes them known.
    pub(crate) fn check(&self, producer: &str, types: &[Ty]) -> Result<(), PipeError> {
        let types = flatten_types(types);
        match self {
            FanIn::Merge(combiner) => {
                let free = combiner.free_params();
                if trim_optional(&free, types.len()).is_none() {
                    return Err(PipeError::MergeArity {
                        combiner: combiner.name.clone(),
                        received: format_produced(&types),
                        expected: combiner.signature.to_string(),
                    });
                }
                let consumer = Consumer {
                    name: &combiner.name,
                    signature: &combiner.signature,
                    free,
                };
                match_outputs(producer, &types, &consumer, &mut Bindings::new(), &mut Bindings::new())
            }
            FanIn::Construct { target, fields } => {
                if fields.len() != types.len() {
                    return Err(PipeError::ConstructArity {
                        target: target.clone(),
                        expected: fields.len(),
                        received: types.len(),
                    });
                }
                let params: Vec<Param> = fields
                    .iter()
                    .map(|(name, ty)| Param::new(name.clone(), ty.clone()))
                    .collect();
                let signature = Signature::new(params, Ty::Any);
                let consumer = Consumer {
                    name: target,
                    signature: &signature,
                    free: signature.params.iter().collect(),
                };
                match_outputs(producer, &types, &consumer, &mut Bindings::new(), &mut Bindings::new())
            }
        }
    }
}

fn fan_param() -> Param {
    Param::new("fan", Ty::Fan(None))
}

/// Take the bundle out of a fan-in's single argument and flatten it.
fn flattened(stage: &str, args: Vec<Value>) -> Result<Vec<Value>, PipeError> {
    let mut args = args.into_iter();
    let value = args.next().unwrap_or(Value::Unit);
    match value {
        Value::Fan(fan) => Ok(fan.flatten().into_values()),
        other => {
            tracing::debug!(stage, found = %other.describe(), "fan-in called without a bundle");
            Err(other.mismatch::<FanOut>())
        }
    }
}

fn describe_all(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(Value::describe).collect();
    format!("[{}]", parts.join(", "))
}

// ============================================================================
// fork
// ============================================================================

struct ForkBody {
    branches: Vec<Stage>,
}

impl Invoke for ForkBody {
    fn invoke(&self, stage: &str, ctx: &mut Context, args: Vec<Value>) -> Result<Value, PipeError> {
        ctx.traced(stage, |ctx| {
            let mut results = Vec::with_capacity(self.branches.len());
            for branch in &self.branches {
                results.push(branch.call_in(ctx, args.clone())?);
            }
            Ok(Value::Fan(FanOut::new(results)))
        })
    }
}

/// Call every branch with the same input; the result is a [`FanOut`] of the
/// branch results in listed order.
///
/// Every branch must accept the first branch's input.
pub fn fork(branches: impl IntoIterator<Item = Stage>) -> Result<Stage, PipeError> {
    let branches: Vec<Stage> = branches.into_iter().collect();
    let Some(first) = branches.first() else {
        return Err(PipeError::EmptyFork);
    };

    let input: Vec<Ty> = first.free_params().iter().map(|p| p.ty.clone()).collect();
    let source = format!("{} input", first.name);
    let mut narrowed = Bindings::new();
    let mut rest = Vec::with_capacity(branches.len() - 1);
    for branch in &branches[1..] {
        let consumer = Consumer {
            name: &branch.name,
            signature: &branch.signature,
            free: branch.free_params(),
        };
        let mut bindings = Bindings::new();
        match_outputs(&source, &input, &consumer, &mut bindings, &mut narrowed)?;
        rest.push(branch.signature.ret.resolve(&bindings));
    }
    let mut outputs = vec![first.signature.ret.resolve(&narrowed)];
    outputs.extend(rest);

    let ret = if outputs.iter().any(|t| matches!(t, Ty::Fan(None))) {
        Ty::Fan(None)
    } else {
        Ty::Fan(Some(flatten_types(&outputs)))
    };

    let params = first
        .free_params()
        .into_iter()
        .map(|p| p.resolved(&narrowed))
        .collect();
    let names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
    let name = format!("fork({})", names.join(", "));
    let node = Node::Fork {
        branches: branches.iter().map(Stage::node).collect(),
    };

    let mut stage = Stage::from_parts(
        name,
        Signature::new(params, ret),
        node,
        Arc::new(ForkBody {
            branches: branches.clone(),
        }),
    );
    stage.inner_effects = first.effects().iter().map(|e| e.resolve(&narrowed)).collect();
    stage
        .inner_effects
        .extend(branches[1..].iter().flat_map(Stage::effects));
    stage.ingest = false;
    Ok(stage)
}

// ============================================================================
// merge
// ============================================================================

struct MergeBody {
    combiner: Stage,
}

impl Invoke for MergeBody {
    fn invoke(&self, stage: &str, ctx: &mut Context, args: Vec<Value>) -> Result<Value, PipeError> {
        ctx.traced(stage, |ctx| {
            let values = flattened(stage, args)?;
            let free = self.combiner.free_params();
            let required = free.iter().filter(|p| !p.is_optional()).count();
            if values.len() < required || values.len() > free.len() {
                return Err(PipeError::MergeArity {
                    combiner: self.combiner.name.clone(),
                    received: describe_all(&values),
                    expected: self.combiner.signature.to_string(),
                });
            }
            self.combiner.call_in(ctx, values)
        })
    }
}

/// Flatten a [`FanOut`] and call `combiner` with its values.
pub fn merge(combiner: Stage) -> Stage {
    let name = format!("merge({})", combiner.name);
    let ret = combiner.signature.ret.clone();
    let node = Node::Merge {
        combiner: Box::new(combiner.node()),
    };
    let mut stage = Stage::from_parts(
        name,
        Signature::new(vec![fan_param()], ret),
        node,
        Arc::new(MergeBody {
            combiner: combiner.clone(),
        }),
    );
    stage.inner_effects = combiner.effects();
    stage.fan_in = Some(FanIn::Merge(Box::new(combiner)));
    stage.ingest = false;
    stage
}

// ============================================================================
// to
// ============================================================================

struct ConstructBody {
    target: String,
    /// For each declared field, its position among the flattened values.
    positions: Vec<Option<usize>>,
    received: usize,
    build: fn(Vec<Value>) -> Result<Value, BoxError>,
}

impl Invoke for ConstructBody {
    fn invoke(&self, stage: &str, ctx: &mut Context, args: Vec<Value>) -> Result<Value, PipeError> {
        ctx.traced(stage, |_| {
            let values = flattened(stage, args)?;
            if values.len() != self.received {
                return Err(PipeError::ConstructArity {
                    target: self.target.clone(),
                    expected: self.received,
                    received: values.len(),
                });
            }
            let ordered = self
                .positions
                .iter()
                .map(|pos| pos.map_or(Value::Unit, |i| values[i].clone()))
                .collect();
            (self.build)(ordered).map_err(|err| PipeError::from_step(stage, err))
        })
    }
}

fn build_record<T: Record>(values: Vec<Value>) -> Result<Value, BoxError> {
    Ok(T::construct(values)?.into_value())
}

/// Flatten a [`FanOut`] and construct a `T`.
///
/// With no `fields`, values fill the declared fields positionally. Otherwise
/// the values go to the named fields in the given order; fields left out
/// receive [`Value::Unit`].
pub fn to<T: Record>(fields: &[&str]) -> Result<Stage, PipeError> {
    let declared = T::fields();
    let target = T::ty().to_string();

    let selected: Vec<usize> = if fields.is_empty() {
        (0..declared.len()).collect()
    } else {
        fields
            .iter()
            .map(|field| {
                declared
                    .iter()
                    .position(|(name, _)| name == field)
                    .ok_or_else(|| PipeError::UnknownField {
                        target: target.clone(),
                        field: field.to_string(),
                    })
            })
            .collect::<Result<_, _>>()?
    };
    if let Some(field) = fields
        .iter()
        .enumerate()
        .find_map(|(i, field)| fields[..i].contains(field).then_some(field))
    {
        return Err(PipeError::DuplicateField {
            target,
            field: field.to_string(),
        });
    }

    let positions = (0..declared.len())
        .map(|d| selected.iter().position(|s| *s == d))
        .collect();
    let field_types: Vec<(String, Ty)> = selected
        .iter()
        .map(|&d| (declared[d].0.to_string(), declared[d].1.clone()))
        .collect();

    let name = format!("to({target})");
    let node = Node::Construct {
        target: target.clone(),
        fields: fields.iter().map(|f| f.to_string()).collect(),
    };
    let mut stage = Stage::from_parts(
        name,
        Signature::new(vec![fan_param()], T::ty()),
        node,
        Arc::new(ConstructBody {
            target: target.clone(),
            positions,
            received: selected.len(),
            build: build_record::<T>,
        }),
    );
    stage.fan_in = Some(FanIn::Construct {
        target,
        fields: field_types,
    });
    stage.ingest = false;
    Ok(stage)
}

// ============================================================================
// identity
// ============================================================================

struct IdentityBody;

impl Invoke for IdentityBody {
    fn invoke(&self, _stage: &str, _ctx: &mut Context, args: Vec<Value>) -> Result<Value, PipeError> {
        Ok(args.into_iter().next().unwrap_or(Value::Unit))
    }
}

/// Return the input unchanged. Accepts any single value.
pub fn identity() -> Stage {
    let t = Ty::generic("T");
    let signature = Signature::new(vec![Param::new("value", t.clone())], t);
    let node = Node::stage("identity", signature.to_string());
    Stage::from_parts("identity", signature, node, Arc::new(IdentityBody))
}
