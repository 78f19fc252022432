//! # Composition
//!
//! [`compose`] joins two stages after checking, once, that what the first
//! produces fits what the second takes. [`pipeline`] folds a list of stages
//! with [`compose`] and runs the result in its own store scope.
//!
//! ## What flows across a join
//!
//! | producer result type | the consumer receives |
//! |----------------------|-----------------------|
//! | `none`               | no arguments          |
//! | `tuple[A, B, ..]`    | one argument per element |
//! | `fan[..]`            | the bundle, whole (for `merge` / `to`) |
//! | anything else        | one argument          |
//!
//! Trailing optional parameters of the consumer may be left out; parameters
//! fed by a read bind are not part of the join at all.
//!
//! ```rust
//! use compositional_pipe::{args, fork, merge, pipeline, Stage};
//!
//! let add = Stage::from_fn2("add", ["x", "y"], |x: i64, y: i64| x + y);
//! let double = Stage::from_fn1("double", ["v"], |v: i64| v * 2);
//!
//! let p = pipeline([
//!     add.clone(),
//!     fork([double.clone(), double]).unwrap(),
//!     merge(add),
//! ])
//! .unwrap();
//!
//! assert_eq!(p.call(args![1_i64, 1_i64]).unwrap().get::<i64>().unwrap(), 8);
//! ```

use std::sync::Arc;

use crate::check::{is_compatible, match_outputs, Consumer};
use crate::error::PipeError;
use crate::node::Node;
use crate::signature::Signature;
use crate::stage::{Invoke, Stage, StoreEffect};
use crate::store::{Context, Store};
use crate::ty::{Bindings, ContainerKind, Ty};
use crate::value::Value;

/// Split a result into the arguments of the next stage, by declared type.
fn unpack(declared: &Ty, value: Value) -> Vec<Value> {
    match (declared, value) {
        (Ty::Unit, _) => Vec::new(),
        (
            Ty::Container {
                kind: ContainerKind::Tuple,
                ..
            },
            Value::Tuple(items),
        ) => items,
        (_, value) => vec![value],
    }
}

struct Composed {
    first: Stage,
    second: Stage,
}

impl Invoke for Composed {
    fn invoke(&self, _stage: &str, ctx: &mut Context, args: Vec<Value>) -> Result<Value, PipeError> {
        let out = self.first.call_in(ctx, args)?;
        let next = unpack(&self.first.signature.ret, out);
        self.second.call_in(ctx, next)
    }
}

/// Join `first` and `second`: the result takes `first`'s free parameters
/// and returns what `second` returns.
///
/// Fails with [`PipeError::OutputInputMismatch`] when the types don't line
/// up, or with [`PipeError::MergeArity`] / [`PipeError::ConstructArity`]
/// when a fork's branch count doesn't fit the fan-in after it.
pub fn compose(first: &Stage, second: &Stage) -> Result<Stage, PipeError> {
    let produced = first.signature.ret.produced();
    let mut bindings = Bindings::new();
    let mut narrowed = Bindings::new();
    let consumer = Consumer {
        name: &second.name,
        signature: &second.signature,
        free: second.free_params(),
    };
    match_outputs(&first.name, &produced, &consumer, &mut bindings, &mut narrowed)?;

    if let (Some(fan_in), [Ty::Fan(Some(types))]) = (&second.fan_in, produced.as_slice()) {
        fan_in.check(&first.name, types)?;
    }

    let ret = second.signature.ret.resolve(&bindings);
    tracing::debug!(
        producer = %first.name,
        consumer = %second.name,
        produced = %first.signature.ret,
        expected = %second.signature,
        narrowed = narrowed.len(),
        "stages joined"
    );

    let params = first
        .free_params()
        .into_iter()
        .map(|p| p.resolved(&narrowed))
        .collect();
    let name = format!("{} >> {}", first.name, second.name);
    let node = Node::chain(first.node(), second.node());

    let mut stage = Stage::from_parts(
        name,
        Signature::new(params, ret),
        node,
        Arc::new(Composed {
            first: first.clone(),
            second: second.clone(),
        }),
    );
    stage.ingest = first.ingest;
    stage.fan_in = first.fan_in.clone();
    stage.inner_effects = first.effects().iter().map(|e| e.resolve(&narrowed)).collect();
    stage
        .inner_effects
        .extend(second.effects().iter().map(|e| e.resolve(&bindings)));
    Ok(stage)
}

struct PipelineBody {
    chain: Stage,
}

impl Invoke for PipelineBody {
    fn invoke(&self, stage: &str, ctx: &mut Context, args: Vec<Value>) -> Result<Value, PipeError> {
        ctx.traced(stage, |ctx| ctx.scoped(|ctx| self.chain.call_in(ctx, args)))
    }
}

/// Replay the store accesses of one scope against types only.
fn check_effects(effects: &[StoreEffect]) -> Result<(), PipeError> {
    let mut types = Store::new();
    for effect in effects {
        match effect {
            StoreEffect::Read {
                name,
                stage,
                param,
                ty,
            } => {
                let actual = types.type_of(name)?;
                if !is_compatible(actual, ty) {
                    return Err(PipeError::StoreTypeMismatch {
                        name: name.clone(),
                        stage: stage.clone(),
                        param: param.clone(),
                        expected: ty.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
            StoreEffect::Write { name, ty, .. } => types.record_type(name, ty.clone())?,
        }
    }
    Ok(())
}

/// Compose `stages` left to right into one stage that runs in a fresh
/// store scope.
///
/// Every join is checked here, as is every store access: a read of a name
/// no earlier stage in this pipeline writes, a name written twice, or an
/// entry whose type doesn't fit the parameter it feeds.
pub fn pipeline(stages: impl IntoIterator<Item = Stage>) -> Result<Stage, PipeError> {
    let stages: Vec<Stage> = stages.into_iter().collect();
    let Some((first, rest)) = stages.split_first() else {
        return Err(PipeError::EmptyPipeline);
    };

    let mut chain = first.clone();
    for next in rest {
        chain = compose(&chain, next)?;
    }

    let effects = chain.effects();
    check_effects(&effects)?;

    let names: Vec<&str> = stages.iter().map(Stage::name).collect();
    let name = format!("pipeline({})", names.join(", "));
    tracing::debug!(
        pipeline = %name,
        steps = stages.len(),
        store_effects = effects.len(),
        "pipeline assembled"
    );

    let params = chain.free_params().into_iter().cloned().collect();
    let signature = Signature::new(params, chain.signature.ret.clone());
    let node = Node::Pipeline {
        steps: stages.iter().map(Stage::node).collect(),
    };

    let mut stage = Stage::from_parts(name, signature, node, Arc::new(PipelineBody { chain: chain.clone() }));
    stage.fan_in = chain.fan_in;
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::fan::{fork, identity, merge};
    use crate::store::RunConfig;
    use crate::ty::TypeVar;

    fn add() -> Stage {
        Stage::from_fn2("add", ["x", "y"], |x: i64, y: i64| x + y)
    }

    fn double() -> Stage {
        Stage::from_fn1("double", ["v"], |v: i64| v * 2)
    }

    fn int(value: Value) -> i64 {
        value.get().unwrap()
    }

    #[test]
    fn test_chain_of_three() {
        let p = pipeline([add(), double(), double()]).unwrap();
        assert_eq!(p.signature().to_string(), "(x: int, y: int) -> int");
        assert_eq!(int(p.call(args![1_i64, 2_i64]).unwrap()), 12);
    }

    #[test]
    fn test_empty_pipeline() {
        assert!(matches!(pipeline(Vec::new()), Err(PipeError::EmptyPipeline)));
    }

    #[test]
    fn test_mismatch_is_caught_at_assembly() {
        let shout = Stage::from_fn1("shout", ["text"], |t: String| t.to_uppercase());
        let err = pipeline([double(), shout]).unwrap_err();
        match err {
            PipeError::OutputInputMismatch {
                producer,
                consumer,
                produced,
                expected,
                ..
            } => {
                assert_eq!(producer, "double");
                assert_eq!(consumer, "shout");
                assert_eq!(produced, "int");
                assert_eq!(expected, "(text: str) -> str");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tuple_results_unpack() {
        let split = Stage::from_fn1("split", ["v"], |v: i64| (v / 10, v % 10));
        let p = pipeline([split, add()]).unwrap();
        assert_eq!(int(p.call(args![47_i64]).unwrap()), 11);
    }

    #[test]
    fn test_tuple_arity_mismatch() {
        let split = Stage::from_fn1("split", ["v"], |v: i64| (v, v, v));
        assert!(matches!(
            pipeline([split, add()]),
            Err(PipeError::OutputInputMismatch { .. })
        ));
    }

    #[test]
    fn test_unit_result_feeds_nothing() {
        let noop = Stage::from_fn1("noop", ["v"], |_v: i64| ());
        let answer = Stage::from_fn0("answer", || 42_i64);
        let p = pipeline([noop, answer]).unwrap();
        assert_eq!(int(p.call(args![1_i64]).unwrap()), 42);
    }

    #[test]
    fn test_optional_params_are_trimmed() {
        let scale = Stage::builder("scale")
            .param("v", Ty::Int)
            .param_with_default("by", Ty::Int, Value::new(3_i64))
            .returns(Ty::Int)
            .build(|values| {
                let mut args = crate::value::Args::new(values);
                let v: i64 = args.next()?;
                let by: i64 = args.next()?;
                Ok(Value::new(v * by))
            })
            .unwrap();
        let p = pipeline([double(), scale]).unwrap();
        assert_eq!(int(p.call(args![2_i64]).unwrap()), 12);
    }

    #[test]
    fn test_generic_resolution_travels_down_the_chain() {
        let p = pipeline([double(), identity(), identity()]).unwrap();
        assert_eq!(p.signature().ret, Ty::Int);

        let shout = Stage::from_fn1("shout", ["text"], |t: String| t);
        assert!(matches!(
            pipeline([double(), identity(), shout]),
            Err(PipeError::OutputInputMismatch { .. })
        ));
    }

    #[test]
    fn test_generic_producer_narrows_its_input() {
        let show = Stage::from_fn1("show", ["n"], |n: i64| n.to_string());
        let tail = compose(&identity(), &double()).unwrap();
        assert_eq!(tail.signature().to_string(), "(value: int) -> int");

        let grouped_right = compose(&show, &tail);
        assert!(matches!(
            grouped_right,
            Err(PipeError::OutputInputMismatch { ref consumer, .. }) if consumer == "identity >> double"
        ));
        let grouped_left = compose(&compose(&show, &identity()).unwrap(), &double());
        assert!(matches!(grouped_left, Err(PipeError::OutputInputMismatch { .. })));

        let nested = pipeline([identity(), double()]).unwrap();
        assert!(matches!(pipeline([show, nested]), Err(PipeError::OutputInputMismatch { .. })));
    }

    #[test]
    fn test_generic_producer_narrows_its_store_reads() {
        let pick = identity().read_first("p").unwrap();
        let chain = compose(&compose(&pick, &double()).unwrap(), &double()).unwrap();
        let effects = chain.effects();
        assert!(matches!(&effects[0], StoreEffect::Read { ty: Ty::Int, .. }));
    }

    #[test]
    fn test_bounded_generic_consumer() {
        let bounded = Stage::builder("halve")
            .param("n", Ty::Generic(TypeVar::new("N").bounded(Ty::Float)))
            .returns(Ty::Float)
            .build(|values| {
                let mut args = crate::value::Args::new(values);
                let n: f64 = args.next()?;
                Ok(Value::new(n / 2.0))
            })
            .unwrap();
        let p = pipeline([double(), bounded.clone()]).unwrap();
        assert_eq!(p.call(args![3_i64]).unwrap().get::<f64>().unwrap(), 3.0);

        let name = Stage::from_fn0("name", || "x".to_string());
        assert!(pipeline([name, bounded]).is_err());
    }

    #[test]
    fn test_fork_merge() {
        let p = pipeline([add(), fork([double(), double()]).unwrap(), merge(add())]).unwrap();
        assert_eq!(int(p.call(args![1_i64, 1_i64]).unwrap()), 8);
    }

    #[test]
    fn test_static_fan_in_arity() {
        let three = fork([double(), double(), double()]).unwrap();
        let err = pipeline([three, merge(add())]).unwrap_err();
        assert!(matches!(err, PipeError::MergeArity { ref combiner, .. } if combiner == "add"));
    }

    #[test]
    fn test_merge_after_composed_fan_in() {
        let tail = compose(&merge(add()), &double()).unwrap();
        let p = pipeline([fork([double(), double(), double()]).unwrap(), tail]);
        assert!(matches!(p, Err(PipeError::MergeArity { .. })));
    }

    #[test]
    fn test_store_reads_checked_at_assembly() {
        let sub = Stage::from_fn2("sub", ["a", "b"], |a: i64, b: i64| a - b);

        let unwritten = pipeline([double(), sub.read_first("p").unwrap()]);
        assert!(matches!(unwritten, Err(PipeError::AttributeNotFound { ref name, .. }) if name == "p"));

        let name = Stage::from_fn1("name", ["v"], |v: i64| v.to_string());
        let wrong_type = pipeline([
            name.write_to("p").unwrap(),
            Stage::from_fn1("len", ["s"], |s: String| s.len() as i64),
            sub.read_first("p").unwrap(),
        ]);
        assert!(matches!(wrong_type, Err(PipeError::StoreTypeMismatch { .. })));

        let twice = pipeline([double().write_to("p").unwrap(), double().write_to("p").unwrap()]);
        assert!(matches!(twice, Err(PipeError::AttributeExists { .. })));
    }

    #[test]
    fn test_write_read_through_pipeline() {
        let mul = Stage::from_fn2("mul", ["x", "y"], |x: i64, y: i64| x * y);
        let sub = Stage::from_fn2("sub", ["a", "b"], |a: i64, b: i64| a - b);
        let five = Stage::from_fn1("five", ["_v"], |_v: i64| 5_i64);
        let p = pipeline([mul.write_to("p").unwrap(), five, sub.read_first("p").unwrap()]).unwrap();
        assert_eq!(int(p.call(args![3_i64, 4_i64]).unwrap()), 7);
    }

    #[test]
    fn test_nested_pipeline_gets_own_scope() {
        let inner = pipeline([double().write_to("p").unwrap()]).unwrap();
        let outer = pipeline([double().write_to("p").unwrap(), inner]).unwrap();

        let mut ctx = Context::new();
        assert_eq!(int(outer.call_in(&mut ctx, args![1_i64]).unwrap()), 4);
        assert!(ctx.store().is_empty());
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_pipeline_as_bound_stage() {
        let inner = pipeline([double(), double()]).unwrap().write_to("quad").unwrap();
        let sub = Stage::from_fn2("sub", ["a", "b"], |a: i64, b: i64| a - b);
        let p = pipeline([inner, sub.read_last("quad").unwrap()]).unwrap();
        assert_eq!(int(p.call(args![2_i64]).unwrap()), 0);
    }

    #[test]
    fn test_scope_restored_after_failure() {
        let fail = Stage::try_fn1("fail", ["v"], |_v: i64| Err::<i64, _>("boom"));
        let p = pipeline([double().write_to("p").unwrap(), fail]).unwrap();

        let mut ctx = Context::new();
        ctx.store_mut().insert("outer", 1_i64).unwrap();
        let err = p.call_in(&mut ctx, args![1_i64]).unwrap_err();
        assert!(matches!(err, PipeError::StepFailed { ref stage, .. } if stage == "fail"));
        assert_eq!(ctx.store().names(), vec!["outer"]);
    }

    #[test]
    fn test_associativity_of_assembly() {
        let left = compose(&compose(&add(), &double()).unwrap(), &double()).unwrap();
        let right = compose(&add(), &compose(&double(), &double()).unwrap()).unwrap();
        for (x, y) in [(0_i64, 0_i64), (1, 2), (-4, 9)] {
            assert_eq!(int(left.call(args![x, y]).unwrap()), int(right.call(args![x, y]).unwrap()));
        }
        assert_eq!(left.node(), right.node());
    }

    #[test]
    fn test_trace_tree() {
        let p = pipeline([add(), fork([double(), double()]).unwrap(), merge(add())]).unwrap();
        let mut ctx = Context::with_config(RunConfig::default().with_record_trace(true));
        p.call_in(&mut ctx, args![1_i64, 1_i64]).unwrap();

        let traces = ctx.take_trace();
        assert_eq!(traces.len(), 1);
        let root = &traces[0];
        assert_eq!(root.name, "pipeline(add, fork(double, double), merge(add))");
        let children: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(children, vec!["add", "fork(double, double)", "merge(add)"]);
        assert_eq!(root.size(), 7);
    }

    #[test]
    fn test_depth_limit_applies_to_nesting() {
        let inner = pipeline([double()]).unwrap();
        let outer = pipeline([inner]).unwrap();
        let mut ctx = Context::with_config(RunConfig::default().with_max_depth(1));
        assert!(matches!(
            outer.call_in(&mut ctx, args![1_i64]),
            Err(PipeError::DepthExceeded { max: 1 })
        ));
    }
}
