//! Read-only step tree of an assembled pipeline.
//!
//! Every [`crate::Stage`] exposes its structure through [`crate::Stage::node`].
//! The tree is plain data: it can be walked, printed, serialized, or turned
//! into a graph (see [`crate::diagram`]). Nothing here is consulted while a
//! pipeline runs.

use serde::Serialize;

/// A parameter fed from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadBind {
    /// Store entry name.
    pub name: String,
    /// Parameter it fills.
    pub param: String,
}

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// A plain stage.
    Stage { name: String, signature: String },
    /// A stage with store binds.
    Bound {
        stage: Box<Node>,
        reads: Vec<ReadBind>,
        write: Option<String>,
    },
    /// Branches called with the same input.
    Fork { branches: Vec<Node> },
    /// Fan-in through a combiner stage.
    Merge { combiner: Box<Node> },
    /// Fan-in into a record type.
    Construct { target: String, fields: Vec<String> },
    /// Stages composed in sequence, sharing the caller's scope.
    Chain { steps: Vec<Node> },
    /// Stages composed in sequence, running in their own scope.
    Pipeline { steps: Vec<Node> },
}

impl Node {
    pub fn stage(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Node::Stage {
            name: name.into(),
            signature: signature.into(),
        }
    }

    /// Sequence two nodes, splicing nested chains.
    pub(crate) fn chain(first: Node, second: Node) -> Self {
        let mut steps = Vec::new();
        for node in [first, second] {
            match node {
                Node::Chain { steps: inner } => steps.extend(inner),
                other => steps.push(other),
            }
        }
        Node::Chain { steps }
    }

    /// Short label for this node alone.
    pub fn label(&self) -> String {
        match self {
            Node::Stage { name, .. } => name.clone(),
            Node::Bound { stage, .. } => stage.label(),
            Node::Fork { branches } => format!("fork({})", branches.len()),
            Node::Merge { combiner } => format!("merge({})", combiner.label()),
            Node::Construct { target, .. } => format!("to({target})"),
            Node::Chain { .. } => "chain".to_string(),
            Node::Pipeline { .. } => "pipeline".to_string(),
        }
    }

    /// Direct children, in order.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::Stage { .. } | Node::Construct { .. } => Vec::new(),
            Node::Bound { stage, .. } => vec![stage.as_ref()],
            Node::Merge { combiner } => vec![combiner.as_ref()],
            Node::Fork { branches } => branches.iter().collect(),
            Node::Chain { steps } | Node::Pipeline { steps } => steps.iter().collect(),
        }
    }

    /// Depth-first, parents before children. `visit` gets each node and its depth.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node, usize)) {
        self.walk_at(0, visit);
    }

    fn walk_at<'a>(&'a self, depth: usize, visit: &mut impl FnMut(&'a Node, usize)) {
        visit(self, depth);
        for child in self.children() {
            child.walk_at(depth + 1, visit);
        }
    }

    /// Number of nodes in the tree.
    pub fn count(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |_, _| n += 1);
        n
    }

    /// Indented, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.walk(&mut |node, depth| {
            out.push_str(&"  ".repeat(depth));
            out.push_str(&node.line());
            out.push('\n');
        });
        out
    }

    fn line(&self) -> String {
        match self {
            Node::Stage { name, signature } => format!("{name} {signature}"),
            Node::Bound { reads, write, .. } => {
                let mut parts: Vec<String> = reads
                    .iter()
                    .map(|r| format!("{} <- {}", r.param, r.name))
                    .collect();
                if let Some(name) = write {
                    parts.push(format!("-> {name}"));
                }
                format!("bound [{}]", parts.join(", "))
            }
            Node::Construct { target, fields } if !fields.is_empty() => {
                format!("to({target}) [{}]", fields.join(", "))
            }
            other => other.label(),
        }
    }
}
