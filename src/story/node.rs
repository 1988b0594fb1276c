use std::fmt;

use serde::{Deserialize, Deserializer};

/// Identifier of a node inside one story document.
///
/// The backend hands out integer ids while hand-written story files tend to
/// use names ("cave", "n1"), so both decode into the same string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Int(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

/// Decode an id that may be sent as a number or a string.
pub(crate) fn flexible_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(RawId::deserialize(deserializer)?.into_string())
}

pub(crate) fn flexible_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(deserializer)?.map(RawId::into_string))
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        flexible_id(deserializer).map(NodeId)
    }
}

/// A labelled edge from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoryOption {
    /// Label shown on the choice.
    pub text: String,
    /// Node reached by picking this option. `None` only in damaged documents.
    #[serde(rename = "node_id", default)]
    pub target: Option<NodeId>,
}

impl StoryOption {
    pub fn new(text: impl Into<String>, target: impl Into<NodeId>) -> Self {
        Self {
            text: text.into(),
            target: Some(target.into()),
        }
    }
}

/// One narrative beat.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoryNode {
    pub id: NodeId,
    /// Narrative text, also used as the scene description for image requests.
    pub content: String,
    #[serde(default)]
    pub is_ending: bool,
    /// Only meaningful when `is_ending` is set.
    #[serde(default)]
    pub is_winning_ending: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub options: Vec<StoryOption>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<StoryOption>, D::Error> {
    Ok(Option::<Vec<StoryOption>>::deserialize(deserializer)?.unwrap_or_default())
}

impl StoryNode {
    /// A node with outgoing choices.
    pub fn passage(id: impl Into<NodeId>, content: impl Into<String>, options: Vec<StoryOption>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_ending: false,
            is_winning_ending: false,
            options,
        }
    }

    /// A terminal node.
    pub fn ending(id: impl Into<NodeId>, content: impl Into<String>, winning: bool) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_ending: true,
            is_winning_ending: winning,
            options: Vec::new(),
        }
    }
}
