//! Story data model: nodes, options and the document graph that holds them.

pub mod document;
pub mod node;

use thiserror::Error;

pub use document::{cave_scenario, StoryDocument};
pub use node::{NodeId, StoryNode, StoryOption};

/// Data-integrity and traversal errors.
///
/// A reachable defect in a document always surfaces as one of these; the
/// player never renders a half-resolved node.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("no story loaded")]
    NoStory,

    #[error("story document has no root node")]
    NoRoot,

    #[error("node '{0}' is not in the story")]
    MissingNode(NodeId),

    #[error("option '{option}' of node '{node}' leads to {dest}", dest = describe_target(.target))]
    DanglingOption {
        node: NodeId,
        option: String,
        target: Option<NodeId>,
    },

    #[error("node '{0}' is not an ending but offers no choices")]
    DeadEnd(NodeId),

    #[error("node '{0}' is an ending; there is nothing to choose")]
    EndingHasNoChoices(NodeId),

    #[error("node '{node}' has {available} option(s), no option #{index}")]
    NoSuchOption {
        node: NodeId,
        index: usize,
        available: usize,
    },

    #[error("malformed story document: {0}")]
    Decode(#[from] serde_json::Error),
}

fn describe_target(target: &Option<NodeId>) -> String {
    match target {
        Some(id) => format!("missing node '{id}'"),
        None => "no node at all".to_string(),
    }
}
