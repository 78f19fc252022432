//! End-to-end pipelines built only through the public API.

use compositional_pipe::{
    args, compose, fork, identity, merge, pipeline, to, Args, BoxError, Context, ErrorKind, FanOut,
    Nominal, PipeError, Record, RunConfig, Stage, Ty, Typed, Value,
};

fn add() -> Stage {
    Stage::from_fn2("add", ["x", "y"], |x: i64, y: i64| x + y)
}

fn double() -> Stage {
    Stage::from_fn1("double", ["v"], |v: i64| v * 2)
}

fn mul() -> Stage {
    Stage::from_fn2("mul", ["x", "y"], |x: i64, y: i64| x * y)
}

fn sub() -> Stage {
    Stage::from_fn2("sub", ["a", "b"], |a: i64, b: i64| a - b)
}

#[test]
fn test_sequential_pipeline() {
    let p = pipeline([add(), double(), double()]).unwrap();
    assert_eq!(p.signature().to_string(), "(x: int, y: int) -> int");
    assert_eq!(p.call(args![1_i64, 2_i64]).unwrap().get::<i64>().unwrap(), 12);
}

#[test]
fn test_fork_and_merge() {
    let p = pipeline([add(), fork([double(), double()]).unwrap(), merge(add())]).unwrap();
    assert_eq!(p.call(args![1_i64, 1_i64]).unwrap().get::<i64>().unwrap(), 8);
}

#[test]
fn test_store_side_channel() {
    let mul = mul().write_to("p").unwrap();
    let sub = sub().read_first("p").unwrap();

    let mut ctx = Context::new();
    assert_eq!(mul.call_in(&mut ctx, args![3_i64, 4_i64]).unwrap().get::<i64>().unwrap(), 12);
    assert_eq!(sub.call_in(&mut ctx, args![5_i64]).unwrap().get::<i64>().unwrap(), 7);
}

#[test]
fn test_store_side_channel_inside_pipeline() {
    let five = Stage::from_fn1("five", ["_product"], |_product: i64| 5_i64);
    let p = pipeline([mul().write_to("p").unwrap(), five, sub().read_first("p").unwrap()]).unwrap();
    assert_eq!(p.call(args![3_i64, 4_i64]).unwrap().get::<i64>().unwrap(), 7);
}

#[test]
fn test_int_to_str_rejected() {
    let shout = Stage::from_fn1("shout", ["s"], |s: String| s.to_uppercase());
    let err = pipeline([add(), shout]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Contract);
    let message = err.to_string();
    assert!(message.contains("'shout' couldn't be added after 'add'"), "{message}");
    assert!(message.contains("int"), "{message}");
}

#[test]
fn test_tuple_result_unpacks() {
    let split = Stage::from_fn1("split", ["n"], |n: i64| (n / 10, n % 10));
    let p = pipeline([split, add()]).unwrap();
    assert_eq!(p.call(args![47_i64]).unwrap().get::<i64>().unwrap(), 11);
}

#[test]
fn test_unit_result_feeds_nothing() {
    let tick = Stage::from_fn0("tick", || ());
    let seven = Stage::from_fn0("seven", || 7_i64);
    let p = pipeline([tick, seven, double()]).unwrap();
    assert_eq!(p.call(args![]).unwrap().get::<i64>().unwrap(), 14);
}

#[test]
fn test_optional_parameters_are_trimmed() {
    let scale = Stage::builder("scale")
        .param("v", Ty::Int)
        .param_with_default("factor", Ty::Int, Value::new(10_i64))
        .returns(Ty::Int)
        .build(|values: Vec<Value>| -> Result<Value, BoxError> {
            let mut args = Args::new(values);
            let v: i64 = args.next()?;
            let factor: i64 = args.next()?;
            Ok(Value::new(v * factor))
        })
        .unwrap();

    let p = pipeline([double(), scale]).unwrap();
    assert_eq!(p.call(args![2_i64]).unwrap().get::<i64>().unwrap(), 40);
}

#[test]
fn test_generic_stage_resolves() {
    let p = pipeline([add(), identity(), double()]).unwrap();
    assert_eq!(p.signature().ret, Ty::Int);
    assert_eq!(p.call(args![2_i64, 3_i64]).unwrap().get::<i64>().unwrap(), 10);

    let shout = Stage::from_fn1("shout", ["s"], |s: String| s.to_uppercase());
    assert!(matches!(
        pipeline([add(), identity(), shout]),
        Err(PipeError::OutputInputMismatch { .. })
    ));
}

#[derive(Debug, Clone, PartialEq)]
struct Range {
    low: i64,
    high: i64,
}

impl Typed for Range {
    fn ty() -> Ty {
        Ty::named(&Nominal::new("Range"))
    }
}

impl Record for Range {
    fn fields() -> Vec<(&'static str, Ty)> {
        vec![("low", Ty::Int), ("high", Ty::Int)]
    }

    fn construct(values: Vec<Value>) -> Result<Self, BoxError> {
        let mut args = Args::new(values);
        Ok(Range {
            low: args.next()?,
            high: args.next()?,
        })
    }
}

#[test]
fn test_fork_into_record() {
    let minus = Stage::from_fn1("minus", ["v"], |v: i64| v - 1);
    let plus = Stage::from_fn1("plus", ["v"], |v: i64| v + 1);
    let width = Stage::from_fn1("width", ["r"], |r: Range| r.high - r.low);

    let p = pipeline([fork([minus, plus]).unwrap(), to::<Range>(&[]).unwrap(), width]).unwrap();
    assert_eq!(p.call(args![10_i64]).unwrap().get::<i64>().unwrap(), 2);

    let three = fork([double(), double(), double()]).unwrap();
    assert!(matches!(
        pipeline([three, to::<Range>(&[]).unwrap()]),
        Err(PipeError::ConstructArity { .. })
    ));
}

#[test]
fn test_nested_fork_flattens_into_merge() {
    let sum3 = Stage::from_fn3("sum3", ["a", "b", "c"], |a: i64, b: i64, c: i64| a + b + c);
    let inner = fork([double(), identity()]).unwrap();
    let outer = fork([identity(), inner]).unwrap();
    let p = pipeline([outer, merge(sum3)]).unwrap();
    // 3 + (6 + 3)
    assert_eq!(p.call(args![3_i64]).unwrap().get::<i64>().unwrap(), 12);
}

#[test]
fn test_merge_arity_checked_at_assembly() {
    let err = pipeline([fork([double(), double(), double()]).unwrap(), merge(add())]).unwrap_err();
    assert!(matches!(err, PipeError::MergeArity { .. }));
}

#[test]
fn test_compose_is_a_stage() {
    let twice = compose(&double(), &double()).unwrap();
    assert_eq!(twice.name(), "double >> double");
    let p = pipeline([add(), twice]).unwrap();
    assert_eq!(p.call(args![1_i64, 1_i64]).unwrap().get::<i64>().unwrap(), 8);
}

#[derive(Debug, thiserror::Error)]
#[error("division by zero")]
struct DivByZero;

#[test]
fn test_failure_reports_stage() {
    let div = Stage::try_fn2("div", ["a", "b"], |a: i64, b: i64| {
        if b == 0 {
            Err(DivByZero)
        } else {
            Ok(a / b)
        }
    });
    let p = pipeline([div, double()]).unwrap();
    assert_eq!(p.call(args![8_i64, 2_i64]).unwrap().get::<i64>().unwrap(), 8);

    let err = p.call(args![1_i64, 0_i64]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(matches!(err, PipeError::StepFailed { ref stage, .. } if stage == "div"));
    assert_eq!(std::error::Error::source(&err).map(|s| s.to_string()).as_deref(), Some("division by zero"));
}

#[test]
fn test_trace_records_tree() {
    let p = pipeline([add(), fork([double(), double()]).unwrap(), merge(add())]).unwrap();
    let mut ctx = Context::with_config(RunConfig::default().with_record_trace(true));
    p.call_in(&mut ctx, args![1_i64, 1_i64]).unwrap();

    let traces = ctx.take_trace();
    assert_eq!(traces.len(), 1);
    let root = &traces[0];
    assert!(root.name.starts_with("pipeline("));
    assert!(!root.failed);
    assert!(root.display().contains("double"));
}

#[test]
fn test_fan_value_is_forwarded_whole() {
    let f = fork([double(), identity()]).unwrap();
    let out = f.call(args![4_i64]).unwrap();
    let fan = FanOut::from_value(&out).unwrap();
    assert_eq!(fan.len(), 2);
}
