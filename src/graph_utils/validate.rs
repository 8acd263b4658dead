use thiserror::Error;

use super::graph::{Edge, FlowGraph, Node, NO_VALID_SUFFIX};

/// Tag that connects to anything, on either side.
pub const WILDCARD_TAG: &str = "any";

/// A proposed edge between two ports, before validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub source: String,
    pub source_handle: String,
    pub target: String,
    pub target_handle: String,
}

impl Connection {
    pub fn new(
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_handle: source_handle.into(),
            target: target.into(),
            target_handle: target_handle.into(),
        }
    }
}

/// Why a candidate connection was refused. Rejections are local and silent
/// from the user's point of view; the edge simply does not appear.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("a port cannot be connected to itself")]
    SelfLoop,

    #[error("port type '{source_tag}' is not compatible with '{target_tag}'")]
    IncompatibleTypes { source_tag: String, target_tag: String },

    #[error("an identical connection already exists")]
    DuplicateEdge,

    #[error("connection references unknown node '{0}'")]
    UnknownEndpoint(String),

    #[error("reconnection references unknown edge '{0}'")]
    UnknownEdge(String),
}

/// The leading token of a "<TypeTag>|<name>" handle. A handle without a
/// separator is its own tag.
pub fn type_tag(handle: &str) -> &str {
    handle.split_once('|').map_or(handle, |(tag, _)| tag)
}

pub fn tags_compatible(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
        || a.eq_ignore_ascii_case(WILDCARD_TAG)
        || b.eq_ignore_ascii_case(WILDCARD_TAG)
}

pub fn validate_connection(c: &Connection, graph: &FlowGraph) -> Result<(), ConnectionError> {
    if c.source == c.target && c.source_handle == c.target_handle {
        return Err(ConnectionError::SelfLoop);
    }
    for id in [&c.source, &c.target] {
        if !graph.has_node(id) {
            return Err(ConnectionError::UnknownEndpoint(id.clone()));
        }
    }
    let source_tag = type_tag(&c.source_handle);
    let target_tag = type_tag(&c.target_handle);
    if !tags_compatible(source_tag, target_tag) {
        return Err(ConnectionError::IncompatibleTypes {
            source_tag: source_tag.to_string(),
            target_tag: target_tag.to_string(),
        });
    }
    let duplicate = graph.edges.iter().any(|e| {
        e.source == c.source
            && e.source_handle == c.source_handle
            && e.target == c.target
            && e.target_handle == c.target_handle
    });
    if duplicate {
        return Err(ConnectionError::DuplicateEdge);
    }
    Ok(())
}

pub fn is_valid_connection(c: &Connection, graph: &FlowGraph) -> bool {
    validate_connection(c, graph).is_ok()
}

/// Upload constraint of a file-input node as a pure function of the graph:
/// the duplicate-free intersection of `file_types` across every node one
/// outgoing edge away from `source`. No downstream neighbors, or an empty
/// intersection, yields the accepts-nothing sentinel.
pub fn derived_file_types(source: &str, edges: &[Edge], nodes: &[Node]) -> Vec<String> {
    let downstream: Vec<&Node> = edges
        .iter()
        .filter(|e| e.source == source)
        .filter_map(|e| nodes.iter().find(|n| n.id == e.target))
        .collect();
    if downstream.is_empty() {
        return vec![NO_VALID_SUFFIX.to_string()];
    }
    let mut result: Vec<String> = Vec::new();
    for (i, node) in downstream.iter().enumerate() {
        let types = &node.data.template.file_types;
        if i == 0 {
            for t in types {
                if !result.contains(t) {
                    result.push(t.clone());
                }
            }
        } else {
            result.retain(|t| types.contains(t));
        }
    }
    if result.is_empty() {
        result.push(NO_VALID_SUFFIX.to_string());
    }
    result
}
