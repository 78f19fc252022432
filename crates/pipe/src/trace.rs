//! # Execution Traces
//!
//! With [`crate::RunConfig::record_trace`] enabled, every stage body,
//! pipeline, fork and fan-in records a [`TraceNode`] with its wall time.
//! Nested calls become children, so a pipeline call yields one tree:
//!
//! ```text
//! [12µs] pipeline
//!   [2µs] add
//!   [5µs] fork
//!     [1µs] double
//!     [1µs] double
//!   [2µs] merge(add)
//!     [1µs] add
//! ```
//!
//! Recording is off by default and costs one branch per call when off.

use serde::Serialize;
use std::time::{Duration, Instant};

/// A node in the trace tree, recording timing and hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct TraceNode {
    /// The stage that ran.
    pub name: String,
    pub duration: Duration,
    /// Whether the call returned an error.
    pub failed: bool,
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
            failed: false,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: TraceNode) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes in this tree, including itself.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TraceNode::size).sum::<usize>()
    }

    /// Pretty-print the trace tree.
    pub fn display(&self) -> String {
        self.display_indent(0)
    }

    fn display_indent(&self, indent: usize) -> String {
        let prefix = "  ".repeat(indent);
        let marker = if self.failed { " (failed)" } else { "" };
        let mut out = format!("{}[{:?}] {}{}\n", prefix, self.duration, self.name, marker);
        for child in &self.children {
            out.push_str(&child.display_indent(indent + 1));
        }
        out
    }
}

impl std::fmt::Display for TraceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

struct Frame {
    name: String,
    started: Instant,
    children: Vec<TraceNode>,
}

/// Collects trace nodes for calls in progress.
#[derive(Default)]
pub(crate) struct Recorder {
    enabled: bool,
    open: Vec<Frame>,
    finished: Vec<TraceNode>,
}

impl Recorder {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub(crate) fn enter(&mut self, name: &str) {
        if self.enabled {
            self.open.push(Frame {
                name: name.to_string(),
                started: Instant::now(),
                children: Vec::new(),
            });
        }
    }

    pub(crate) fn exit(&mut self, failed: bool) {
        let Some(frame) = self.open.pop() else {
            return;
        };
        let node = TraceNode {
            name: frame.name,
            duration: frame.started.elapsed(),
            failed,
            children: frame.children,
        };
        match self.open.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.finished.push(node),
        }
    }

    /// Completed top-level traces, oldest first.
    pub(crate) fn take(&mut self) -> Vec<TraceNode> {
        std::mem::take(&mut self.finished)
    }
}
