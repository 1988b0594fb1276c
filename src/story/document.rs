use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::story::node::{flexible_opt_id, NodeId, StoryNode, StoryOption};
use crate::story::StoryError;

/// The complete narrative graph for one story: keyed nodes plus a root pointer.
///
/// Read-only once built. The graph may contain cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryDocument {
    pub id: String,
    pub title: String,
    pub root_node_id: NodeId,
    pub nodes: HashMap<NodeId, StoryNode>,
}

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RootRef {
    id: NodeId,
}

/// Story as the backend serves it from `/stories/{id}/complete`.
///
/// `root_node_id` is accepted as an alternative to `root_node` so that story
/// files can be written by hand.
#[derive(Debug, Deserialize)]
struct StoryPayload {
    #[serde(default, deserialize_with = "flexible_opt_id")]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    root_node: Option<RootRef>,
    #[serde(default)]
    root_node_id: Option<NodeId>,
    all_nodes: HashMap<String, StoryNode>,
}

impl StoryDocument {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        root_node_id: impl Into<NodeId>,
        nodes: Vec<StoryNode>,
    ) -> Self {
        let nodes = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        Self {
            id: id.into(),
            title: title.into(),
            root_node_id: root_node_id.into(),
            nodes,
        }
    }

    /// Decode a story document from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, StoryError> {
        let payload: StoryPayload = serde_json::from_str(json)?;
        Self::from_payload(payload)
    }

    /// Decode from an already parsed JSON value (as returned by the HTTP client).
    pub fn from_value(value: serde_json::Value) -> Result<Self, StoryError> {
        let payload: StoryPayload = serde_json::from_value(value)?;
        Self::from_payload(payload)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read story file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid story file {}", path.display()))
    }

    fn from_payload(payload: StoryPayload) -> Result<Self, StoryError> {
        let root_node_id = payload
            .root_node
            .map(|r| r.id)
            .or(payload.root_node_id)
            .ok_or(StoryError::NoRoot)?;

        // Keys stay authoritative for lookups; a mismatched inner id is
        // reported by `audit`.
        let nodes = payload
            .all_nodes
            .into_iter()
            .map(|(key, node)| (NodeId::new(key), node))
            .collect();

        Ok(Self {
            id: payload.id.unwrap_or_default(),
            title: payload.title.unwrap_or_default(),
            root_node_id,
            nodes,
        })
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn node(&self, id: &NodeId) -> Result<&StoryNode, StoryError> {
        self.nodes
            .get(id)
            .ok_or_else(|| StoryError::MissingNode(id.clone()))
    }

    pub fn root(&self) -> Result<&StoryNode, StoryError> {
        self.node(&self.root_node_id)
    }

    /// Resolve the node an option leads to.
    pub fn follow(&self, from: &NodeId, option: &StoryOption) -> Result<&StoryNode, StoryError> {
        match &option.target {
            Some(target) if self.nodes.contains_key(target) => self.node(target),
            target => Err(StoryError::DanglingOption {
                node: from.clone(),
                option: option.text.clone(),
                target: target.clone(),
            }),
        }
    }

    /// Number of (winning, total) endings in the document.
    pub fn ending_counts(&self) -> (usize, usize) {
        self.nodes
            .values()
            .filter(|n| n.is_ending)
            .fold((0, 0), |(won, all), n| (won + usize::from(n.is_winning_ending), all + 1))
    }

    /// Every integrity problem in the document, sorted by node id.
    pub fn audit(&self) -> Vec<Problem> {
        let mut problems = Vec::new();

        if !self.nodes.contains_key(&self.root_node_id) {
            problems.push(Problem::MissingRoot(self.root_node_id.clone()));
        }

        let mut keys: Vec<&NodeId> = self.nodes.keys().collect();
        keys.sort();

        for key in keys {
            let node = &self.nodes[key];
            if &node.id != key {
                problems.push(Problem::MismatchedKey {
                    key: key.clone(),
                    id: node.id.clone(),
                });
            }
            if node.is_ending {
                continue;
            }
            if node.options.is_empty() {
                problems.push(Problem::DeadEnd(key.clone()));
            }
            for option in &node.options {
                match &option.target {
                    None => problems.push(Problem::Untargeted {
                        node: key.clone(),
                        option: option.text.clone(),
                    }),
                    Some(target) if !self.nodes.contains_key(target) => {
                        problems.push(Problem::Dangling {
                            node: key.clone(),
                            option: option.text.clone(),
                            target: target.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        problems
    }
}

/// An integrity defect found by [`StoryDocument::audit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    MissingRoot(NodeId),
    MismatchedKey { key: NodeId, id: NodeId },
    DeadEnd(NodeId),
    Untargeted { node: NodeId, option: String },
    Dangling { node: NodeId, option: String, target: NodeId },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::MissingRoot(id) => write!(f, "root node '{id}' is not in the document"),
            Problem::MismatchedKey { key, id } => {
                write!(f, "node stored under '{key}' calls itself '{id}'")
            }
            Problem::DeadEnd(id) => write!(f, "node '{id}' is not an ending but has no options"),
            Problem::Untargeted { node, option } => {
                write!(f, "option '{option}' of node '{node}' has no target")
            }
            Problem::Dangling { node, option, target } => write!(
                f,
                "option '{option}' of node '{node}' points at missing node '{target}'"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in demo story
// ---------------------------------------------------------------------------

pub fn cave_scenario() -> StoryDocument {
    StoryDocument::new(
        "demo",
        "The Cave",
        "n1",
        vec![
            StoryNode::passage(
                "n1",
                "You enter a cave.",
                vec![
                    StoryOption::new("Go left", "n2"),
                    StoryOption::new("Go right", "n3"),
                ],
            ),
            StoryNode::ending("n2", "You find treasure!", true),
            StoryNode::ending("n3", "You fall into a pit.", false),
        ],
    )
}
