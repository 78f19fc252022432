//! Step tree and flow graph export of assembled pipelines.

use compositional_pipe::{fork, merge, pipeline, Node, Stage, StepGraph, StepKind};

fn add() -> Stage {
    Stage::from_fn2("add", ["x", "y"], |x: i64, y: i64| x + y)
}

fn double() -> Stage {
    Stage::from_fn1("double", ["v"], |v: i64| v * 2)
}

fn sub() -> Stage {
    Stage::from_fn2("sub", ["a", "b"], |a: i64, b: i64| a - b)
}

fn fan_pipeline() -> Stage {
    pipeline([
        add().write_to("sum").unwrap(),
        fork([double(), sub().read_first("sum").unwrap()]).unwrap(),
        merge(add()),
    ])
    .unwrap()
}

#[test]
fn test_walk_real_pipeline() {
    let tree = fan_pipeline().node();
    let mut labels = Vec::new();
    tree.walk(&mut |node, depth| labels.push(format!("{depth}:{}", node.label())));
    assert_eq!(
        labels,
        vec!["0:pipeline", "1:add", "2:add", "1:fork(2)", "2:double", "2:sub", "3:sub", "1:merge(add)", "2:add"]
    );

    let rendered = tree.render();
    assert!(rendered.contains("bound [-> sum]"), "{rendered}");
    assert!(rendered.contains("bound [a <- sum]"), "{rendered}");
}

#[test]
fn test_tree_serializes() {
    let json = serde_json::to_value(fan_pipeline().node()).unwrap();
    assert_eq!(json["kind"], "pipeline");
    assert_eq!(json["steps"][0]["kind"], "bound");
    assert_eq!(json["steps"][0]["write"], "sum");
    assert_eq!(json["steps"][0]["stage"]["signature"], "(x: int, y: int) -> int");
    assert_eq!(json["steps"][1]["branches"][1]["reads"][0]["param"], "a");
}

#[test]
fn test_graph_of_pipeline_validates() {
    let graph = StepGraph::from_stage(&fan_pipeline());
    assert!(graph.validate().is_ok());
    assert_eq!(graph.node_count(), 7);

    let entry = graph.entry.unwrap();
    assert_eq!(graph.graph[entry].kind, StepKind::Pipeline);
    let sum = graph
        .graph
        .node_weights()
        .find(|s| s.write.as_deref() == Some("sum"))
        .unwrap();
    assert_eq!(sum.scope, 1);
}

#[test]
fn test_graph_catches_reordered_tree() {
    // Trees built by hand skip assembly checks; the graph still sees the order.
    let tree = Node::Pipeline {
        steps: vec![
            Node::Bound {
                stage: Box::new(Node::stage("sub", "(a: int, b: int) -> int")),
                reads: vec![compositional_pipe::ReadBind {
                    name: "sum".into(),
                    param: "a".into(),
                }],
                write: None,
            },
            Node::Bound {
                stage: Box::new(Node::stage("add", "(x: int, y: int) -> int")),
                reads: Vec::new(),
                write: Some("sum".into()),
            },
        ],
    };
    assert!(StepGraph::from_node(&tree).validate().is_err());
}
