//! Algebraic properties of composition, fan-out and the store.

use compositional_pipe::{args, compose, fork, identity, merge, pipeline, FanOut, Stage, Store, Value};
use proptest::prelude::*;

fn op(index: usize) -> Stage {
    match index % 4 {
        0 => Stage::from_fn1("double", ["v"], |v: i64| v.wrapping_mul(2)),
        1 => Stage::from_fn1("inc", ["v"], |v: i64| v.wrapping_add(1)),
        2 => Stage::from_fn1("neg", ["v"], |v: i64| v.wrapping_neg()),
        _ => identity(),
    }
}

fn run(stage: &Stage, x: i64) -> i64 {
    stage.call(args![x]).unwrap().get::<i64>().unwrap()
}

#[derive(Debug, Clone)]
enum Tree {
    Leaf(i64),
    Fan(Vec<Tree>),
}

impl Tree {
    fn to_value(&self) -> Value {
        match self {
            Tree::Leaf(n) => Value::new(*n),
            Tree::Fan(items) => Value::Fan(FanOut::new(items.iter().map(Tree::to_value).collect())),
        }
    }

    fn leaves(&self, out: &mut Vec<i64>) {
        match self {
            Tree::Leaf(n) => out.push(*n),
            Tree::Fan(items) => items.iter().for_each(|t| t.leaves(out)),
        }
    }
}

fn tree() -> impl Strategy<Value = Tree> {
    any::<i64>()
        .prop_map(Tree::Leaf)
        .prop_recursive(4, 32, 4, |inner| prop::collection::vec(inner, 0..4).prop_map(Tree::Fan))
}

fn ints(fan: &FanOut) -> Vec<i64> {
    fan.values().iter().map(|v| v.get::<i64>().unwrap()).collect()
}

proptest! {
    #[test]
    fn composition_is_associative(f in 0usize..4, g in 0usize..4, h in 0usize..4, x in any::<i64>()) {
        let (f, g, h) = (op(f), op(g), op(h));
        let left = compose(&compose(&f, &g).unwrap(), &h).unwrap();
        let right = compose(&f, &compose(&g, &h).unwrap()).unwrap();

        prop_assert_eq!(left.signature().to_string(), right.signature().to_string());
        prop_assert_eq!(run(&left, x), run(&right, x));
        prop_assert_eq!(left.node(), right.node());
    }

    #[test]
    fn pipeline_matches_manual_chaining(ops in prop::collection::vec(0usize..4, 1..6), x in any::<i64>()) {
        let stages: Vec<Stage> = ops.iter().map(|i| op(*i)).collect();
        let expected = stages.iter().fold(x, |acc, s| run(s, acc));
        let p = pipeline(stages).unwrap();
        prop_assert_eq!(run(&p, x), expected);
    }

    #[test]
    fn fork_merge_applies_each_branch(f in 0usize..3, g in 0usize..3, x in -1_000_000i64..1_000_000) {
        let add = Stage::from_fn2("add", ["a", "b"], |a: i64, b: i64| a + b);
        let p = pipeline([fork([op(f), op(g)]).unwrap(), merge(add)]).unwrap();
        prop_assert_eq!(run(&p, x), run(&op(f), x) + run(&op(g), x));
    }

    #[test]
    fn flatten_is_idempotent_and_ordered(items in prop::collection::vec(tree(), 0..5)) {
        let fan = FanOut::new(items.iter().map(Tree::to_value).collect());
        let mut expected = Vec::new();
        items.iter().for_each(|t| t.leaves(&mut expected));

        let once = fan.flatten();
        prop_assert!(once.is_flat());
        prop_assert_eq!(ints(&once), expected.clone());

        let twice = once.flatten();
        prop_assert_eq!(ints(&twice), expected);
    }

    #[test]
    fn store_round_trip(entries in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..10)) {
        let mut store = Store::new();
        for (name, value) in &entries {
            store.insert(name, *value).unwrap();
        }
        prop_assert_eq!(store.len(), entries.len());
        for (name, value) in &entries {
            prop_assert_eq!(store.get::<i64>(name).unwrap(), *value);
            prop_assert!(store.insert(name, *value).is_err());
        }
    }
}
