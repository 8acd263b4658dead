use serde::{Deserialize, Serialize};

use super::validate::{self, Connection, ConnectionError};

// Node ids are reactflow-style strings: "<component kind>-<suffix>".
pub type NodeId = String;
pub type EdgeId = String;

/// Component kind whose upload file types are derived from downstream
/// connections rather than authored.
pub const FILE_INPUT_KIND: &str = "InputFileNode";

/// Marker extension meaning "no valid upload type". Written into a file-input
/// node whenever its downstream intersection comes up empty, so the previous
/// value can never go stale.
pub const NO_VALID_SUFFIX: &str = "xxx";

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 1.0, y: 0.0, zoom: 0.5 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// A typed connection point. `handle` is "<TypeTag>|<name>"; the leading tag
/// gates connection validity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortDef {
    pub handle: String,
    pub direction: PortDirection,
}

impl PortDef {
    pub fn input(handle: impl Into<String>) -> Self {
        Self { handle: handle.into(), direction: PortDirection::Input }
    }

    pub fn output(handle: impl Into<String>) -> Self {
        Self { handle: handle.into(), direction: PortDirection::Output }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub ports: Vec<PortDef>,
    // Upload constraint; derived on file-input nodes, authored elsewhere.
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub suffixes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub kind: String,
    pub template: NodeTemplate,
    // Runtime value; reset to None when a node is created from a palette drop.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_type: String,
    pub position: Position,
    pub data: NodeData,
}

impl Node {
    pub fn is_file_input(&self) -> bool {
        self.data.kind == FILE_INPUT_KIND
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub source_handle: String,
    pub target: NodeId,
    pub target_handle: String,
    pub animated: bool,
    pub class_name: String,
}

/// Deep snapshot of the currently selected subgraph; produced on
/// selection-change, consumed by copy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Position moves and removals coming back from the rendering layer.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeChange {
    Moved { id: NodeId, position: Position },
    Removed { id: NodeId },
}

#[derive(Clone, Debug, PartialEq)]
pub enum EdgeChange {
    Removed { id: EdgeId },
}

/// The canonical nodes/edges of one open document.
///
/// All mutation goes through the methods here so the cascade invariant (no
/// edge may outlive either endpoint) and the derived file-type constraint
/// hold after every call. Mutators report whether anything changed; the
/// owning document uses that to flip its dirty flag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn get_edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.get_node(id).is_some()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges leaving `id`.
    pub fn outgoing_edges<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.source == id)
    }

    // Append a node. Rejects duplicate ids so the uniqueness invariant can
    // never be broken by a buggy caller; the node is appended, never a
    // replacement.
    pub fn add_node(&mut self, node: Node) -> bool {
        if self.has_node(&node.id) {
            log::warn!("refusing to add duplicate node id {}", node.id);
            return false;
        }
        self.nodes.push(node);
        true
    }

    /// Remove the listed nodes and, synchronously, every edge touching them.
    pub fn remove_nodes(&mut self, ids: &[NodeId]) -> bool {
        let before_nodes = self.nodes.len();
        self.nodes.retain(|n| !ids.iter().any(|id| *id == n.id));
        if self.nodes.len() == before_nodes {
            return false;
        }
        // Cascade: drop edges into or out of the removed set, then refresh
        // the upload constraint of any file-input node that lost a neighbor.
        let affected_sources: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|e| ids.iter().any(|id| *id == e.source || *id == e.target))
            .map(|e| e.source.clone())
            .collect();
        self.edges
            .retain(|e| !ids.iter().any(|id| *id == e.source || *id == e.target));
        for source in affected_sources {
            self.refresh_file_types(&source);
        }
        true
    }

    /// Validate and insert a new edge, then recompute the source's derived
    /// file types from the post-connection edge set. Returns the new edge id.
    pub fn connect(&mut self, candidate: Connection) -> Result<EdgeId, ConnectionError> {
        validate::validate_connection(&candidate, self)?;
        let edge = build_edge(&candidate);
        let id = edge.id.clone();
        self.edges.push(edge);
        self.refresh_file_types(&candidate.source);
        Ok(id)
    }

    /// Re-point an existing edge at a new endpoint tuple. The edge being
    /// replaced is excluded from duplicate detection, so dropping back on
    /// the same port revalidates cleanly. On success the file types of the
    /// old and new source are both recomputed; on rejection the edge is
    /// kept exactly as it was.
    pub fn reconnect(
        &mut self,
        edge_id: &str,
        candidate: Connection,
    ) -> Result<EdgeId, ConnectionError> {
        let Some(pos) = self.edges.iter().position(|e| e.id == edge_id) else {
            return Err(ConnectionError::UnknownEdge(edge_id.to_string()));
        };
        let old = self.edges.remove(pos);
        match validate::validate_connection(&candidate, self) {
            Ok(()) => {
                let edge = build_edge(&candidate);
                let id = edge.id.clone();
                self.edges.push(edge);
                if old.source != candidate.source {
                    self.refresh_file_types(&old.source);
                }
                self.refresh_file_types(&candidate.source);
                Ok(id)
            }
            Err(err) => {
                self.edges.insert(pos, old);
                Err(err)
            }
        }
    }

    pub fn remove_edges(&mut self, ids: &[EdgeId]) -> bool {
        let affected_sources: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|e| ids.iter().any(|id| *id == e.id))
            .map(|e| e.source.clone())
            .collect();
        let before = self.edges.len();
        self.edges.retain(|e| !ids.iter().any(|id| *id == e.id));
        if self.edges.len() == before {
            return false;
        }
        for source in affected_sources {
            self.refresh_file_types(&source);
        }
        true
    }

    /// Apply position/removal changes reported by the rendering layer.
    /// Changes naming a node id that no longer exists are dropped silently;
    /// they are late reports about an already-removed node, not errors.
    pub fn apply_node_changes(&mut self, changes: &[NodeChange]) -> bool {
        let mut mutated = false;
        let mut removals: Vec<NodeId> = Vec::new();
        for change in changes {
            match change {
                NodeChange::Moved { id, position } => {
                    match self.nodes.iter_mut().find(|n| n.id == *id) {
                        Some(node) => {
                            if node.position != *position {
                                node.position = *position;
                                mutated = true;
                            }
                        }
                        None => log::debug!("dropping move for missing node {}", id),
                    }
                }
                NodeChange::Removed { id } => removals.push(id.clone()),
            }
        }
        if !removals.is_empty() {
            mutated |= self.remove_nodes(&removals);
        }
        mutated
    }

    pub fn apply_edge_changes(&mut self, changes: &[EdgeChange]) -> bool {
        let removals: Vec<EdgeId> = changes
            .iter()
            .map(|EdgeChange::Removed { id }| id.clone())
            .collect();
        if removals.is_empty() {
            return false;
        }
        self.remove_edges(&removals)
    }

    /// Snapshot the named nodes plus every edge with both endpoints inside
    /// the set.
    pub fn selection_of(&self, node_ids: &[NodeId]) -> Selection {
        let nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| node_ids.iter().any(|id| *id == n.id))
            .cloned()
            .collect();
        let edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| {
                node_ids.iter().any(|id| *id == e.source)
                    && node_ids.iter().any(|id| *id == e.target)
            })
            .cloned()
            .collect();
        Selection { nodes, edges }
    }

    // Recompute the derived upload constraint of `source` if it is a
    // file-input node. Always runs against the edge set currently stored,
    // i.e. the post-mutation set.
    fn refresh_file_types(&mut self, source: &str) {
        let is_file_input = self.get_node(source).is_some_and(Node::is_file_input);
        if !is_file_input {
            return;
        }
        let types = validate::derived_file_types(source, &self.edges, &self.nodes);
        let suffixes: Vec<String> = types.iter().map(|t| format!(".{t}")).collect();
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == source) {
            node.data.template.file_types = types;
            node.data.template.suffixes = suffixes;
        }
    }
}

// Edge identity is deterministic from the endpoint tuple; the tuple itself is
// what duplicate detection keys on.
fn build_edge(c: &Connection) -> Edge {
    let target_tag = validate::type_tag(&c.target_handle);
    Edge {
        id: format!(
            "reactflow__edge-{}{}-{}{}",
            c.source, c.source_handle, c.target, c.target_handle
        ),
        source: c.source.clone(),
        source_handle: c.source_handle.clone(),
        target: c.target.clone(),
        target_handle: c.target_handle.clone(),
        animated: true,
        class_name: format!("stroke-{}", target_tag.to_ascii_lowercase()),
    }
}
