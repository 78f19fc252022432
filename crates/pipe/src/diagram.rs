//! # Step Graphs
//!
//! A flow graph of an assembled pipeline, built from its [`Node`] tree for
//! external renderers and static checks.
//!
//! ## Structure
//!
//! - every stage, fork, fan-in and nested pipeline is a [`Step`];
//! - [`Link::Flow`] edges follow the data;
//! - a nested pipeline is a single step in its caller's flow, with
//!   [`Link::Contains`] edges to the steps it runs in its own scope.
//!
//! Steps carry the store names they read and write, tagged with their scope,
//! which is what [`StepGraph::validate`] checks.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::PipeError;
use crate::node::Node;
use crate::stage::Stage;

/// What a step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Stage,
    Fork,
    Merge,
    Construct,
    Pipeline,
    /// Collects branch exits before a store write.
    Join,
}

/// A node of the graph.
#[derive(Debug, Clone)]
pub struct Step {
    pub label: String,
    pub kind: StepKind,
    /// Store scope the step runs in; `0` is the caller's.
    pub scope: usize,
    /// Position in execution order.
    pub order: usize,
    pub reads: Vec<String>,
    pub write: Option<String>,
}

/// An edge of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Flow,
    Contains,
}

/// A pipeline as a directed graph of steps.
#[derive(Debug, Clone)]
pub struct StepGraph {
    pub graph: DiGraph<Step, Link>,
    /// The first step, if the tree had any.
    pub entry: Option<NodeIndex>,
    next_scope: usize,
}

impl StepGraph {
    /// The graph of a stage's step tree.
    pub fn from_stage(stage: &Stage) -> Self {
        Self::from_node(&stage.node())
    }

    pub fn from_node(node: &Node) -> Self {
        let mut graph = Self {
            graph: DiGraph::new(),
            entry: None,
            next_scope: 1,
        };
        let (entry, _) = graph.add(node, 0, &[]);
        graph.entry = entry;
        graph
    }

    fn step(&mut self, label: String, kind: StepKind, scope: usize, preds: &[NodeIndex]) -> NodeIndex {
        let order = self.graph.node_count();
        let idx = self.graph.add_node(Step {
            label,
            kind,
            scope,
            order,
            reads: Vec::new(),
            write: None,
        });
        for pred in preds {
            self.graph.add_edge(*pred, idx, Link::Flow);
        }
        idx
    }

    /// Add `node` after `preds`; returns its entry step and exit steps.
    fn add(&mut self, node: &Node, scope: usize, preds: &[NodeIndex]) -> (Option<NodeIndex>, Vec<NodeIndex>) {
        match node {
            Node::Stage { name, .. } => {
                let idx = self.step(name.clone(), StepKind::Stage, scope, preds);
                (Some(idx), vec![idx])
            }
            Node::Construct { .. } => {
                let idx = self.step(node.label(), StepKind::Construct, scope, preds);
                (Some(idx), vec![idx])
            }
            Node::Bound { stage, reads, write } => {
                let (entry, mut exits) = self.add(stage, scope, preds);
                if let Some(entry) = entry {
                    self.graph[entry].reads.extend(reads.iter().map(|r| r.name.clone()));
                }
                if let Some(name) = write {
                    if exits.len() != 1 {
                        let join = self.step("join".to_string(), StepKind::Join, scope, &exits);
                        exits = vec![join];
                    }
                    if let Some(exit) = exits.first() {
                        self.graph[*exit].write = Some(name.clone());
                    }
                }
                (entry, exits)
            }
            Node::Fork { branches } => {
                let idx = self.step(node.label(), StepKind::Fork, scope, preds);
                let mut exits = Vec::new();
                for branch in branches {
                    let (_, branch_exits) = self.add(branch, scope, &[idx]);
                    exits.extend(branch_exits);
                }
                (Some(idx), exits)
            }
            Node::Merge { combiner } => {
                let idx = self.step(node.label(), StepKind::Merge, scope, preds);
                let (_, exits) = self.add(combiner, scope, &[idx]);
                (Some(idx), exits)
            }
            Node::Chain { steps } => self.add_sequence(steps, scope, preds),
            Node::Pipeline { steps } => {
                let idx = self.step(node.label(), StepKind::Pipeline, scope, preds);
                let inner = self.next_scope;
                self.next_scope += 1;
                let (entry, _) = self.add_sequence(steps, inner, &[]);
                if let Some(entry) = entry {
                    self.graph.add_edge(idx, entry, Link::Contains);
                }
                (Some(idx), vec![idx])
            }
        }
    }

    fn add_sequence(&mut self, steps: &[Node], scope: usize, preds: &[NodeIndex]) -> (Option<NodeIndex>, Vec<NodeIndex>) {
        let mut entry = None;
        let mut exits = preds.to_vec();
        for step in steps {
            let (first, next) = self.add(step, scope, &exits);
            entry = entry.or(first);
            exits = next;
        }
        (entry, exits)
    }

    /// Check that, within each scope, every store read comes after a write
    /// of the same name, and that no name is written twice.
    pub fn validate(&self) -> Result<(), PipeError> {
        let mut scopes: BTreeMap<usize, Vec<&Step>> = BTreeMap::new();
        for step in self.graph.node_weights() {
            scopes.entry(step.scope).or_default().push(step);
        }

        for steps in scopes.values_mut() {
            steps.sort_by_key(|s| s.order);
            let mut written: HashSet<&str> = HashSet::new();
            for step in steps.iter() {
                for name in &step.reads {
                    if !written.contains(name.as_str()) {
                        let mut available: Vec<String> = written.iter().map(|n| n.to_string()).collect();
                        available.sort();
                        return Err(PipeError::AttributeNotFound {
                            name: name.clone(),
                            available,
                        });
                    }
                }
                if let Some(name) = &step.write {
                    if !written.insert(name.as_str()) {
                        return Err(PipeError::AttributeExists { name: name.clone() });
                    }
                }
            }
        }
        Ok(())
    }

    /// Steps a given step flows into.
    pub fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self
            .graph
            .edges(idx)
            .filter(|e| *e.weight() == Link::Flow)
            .map(|e| e.target())
            .collect();
        next.sort();
        next
    }

    /// Labels of the steps, in execution order.
    pub fn labels(&self) -> Vec<&str> {
        let mut steps: Vec<&Step> = self.graph.node_weights().collect();
        steps.sort_by_key(|s| s.order);
        steps.into_iter().map(|s| s.label.as_str()).collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl fmt::Display for StepGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StepGraph({} steps, {} edges)", self.node_count(), self.edge_count())?;
        for edge in self.graph.edge_references() {
            let arrow = match edge.weight() {
                Link::Flow => "->",
                Link::Contains => "=>",
            };
            writeln!(
                f,
                "  {} {} {}",
                self.graph[edge.source()].label,
                arrow,
                self.graph[edge.target()].label
            )?;
        }
        Ok(())
    }
}
