use serde::{Deserialize, Serialize};

use crate::graph_utils::graph::{Edge, FlowGraph, Node};

/// Immutable deep copy of `(nodes, edges)`.
///
/// Captured strictly before a mutating gesture is applied, so restoring a
/// snapshot always yields pre-gesture state. Everything inside is owned, so
/// a restored graph shares no mutable state with whatever was live before.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Snapshot {
    pub fn capture(graph: &FlowGraph) -> Self {
        Self { nodes: graph.nodes.clone(), edges: graph.edges.clone() }
    }

    pub fn restore_into(&self, graph: &mut FlowGraph) {
        graph.nodes = self.nodes.clone();
        graph.edges = self.edges.clone();
    }

    pub fn matches(&self, graph: &FlowGraph) -> bool {
        self.nodes == graph.nodes && self.edges == graph.edges
    }
}

/// Bounded undo/redo stack over graph snapshots.
pub struct UndoRedoStack {
    undo: Vec<Snapshot>,
    redo: Vec<Snapshot>,
    limit: usize,
}

impl Default for UndoRedoStack {
    fn default() -> Self {
        Self::new(100)
    }
}

impl UndoRedoStack {
    pub fn new(limit: usize) -> Self {
        Self { undo: Vec::new(), redo: Vec::new(), limit: limit.max(1) }
    }

    /// Push the current state. Call this at the start of every undoable
    /// gesture (drag start, connect, delete, drop, paste), before the
    /// gesture's effect reaches the store.
    pub fn take_snapshot(&mut self, graph: &FlowGraph) {
        // A fresh gesture invalidates the redo branch.
        self.redo.clear();
        if self.undo.len() == self.limit {
            self.undo.remove(0);
        }
        self.undo.push(Snapshot::capture(graph));
    }

    /// Swap the live graph with the most recent snapshot. Returns false when
    /// there is nothing to undo.
    pub fn undo(&mut self, graph: &mut FlowGraph) -> bool {
        let Some(snapshot) = self.undo.pop() else {
            return false;
        };
        self.redo.push(Snapshot::capture(graph));
        snapshot.restore_into(graph);
        true
    }

    pub fn redo(&mut self, graph: &mut FlowGraph) -> bool {
        let Some(snapshot) = self.redo.pop() else {
            return false;
        };
        self.undo.push(Snapshot::capture(graph));
        snapshot.restore_into(graph);
        true
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }
}
