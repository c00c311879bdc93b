use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identity of a protocol participant: charging station, management system or relay node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId(id.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        NodeId(id)
    }
}

/// Ordered list of hops a message has traversed, oldest first.
///
/// Never empty: the first hop is the [source](NetworkPath::source) of the message.
/// Hops are only ever appended, so the path is the full traversal history.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<NodeId>", into = "Vec<NodeId>")]
pub struct NetworkPath {
    hops: Vec<NodeId>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Network path must contain at least one hop")]
pub struct EmptyNetworkPath;

impl NetworkPath {
    /// Path that starts (and so far ends) at `source`.
    pub fn new(source: NodeId) -> Self {
        NetworkPath { hops: vec![source] }
    }

    pub fn try_from_hops(hops: Vec<NodeId>) -> Result<Self, EmptyNetworkPath> {
        if hops.is_empty() {
            return Err(EmptyNetworkPath);
        }
        Ok(NetworkPath { hops })
    }

    /// Node that originated the message.
    pub fn source(&self) -> &NodeId {
        &self.hops[0]
    }

    /// Node the message was most recently received from.
    pub fn last_hop(&self) -> &NodeId {
        &self.hops[self.hops.len() - 1]
    }

    /// Copy of this path with `hop` recorded at the end.
    pub fn append(&self, hop: NodeId) -> NetworkPath {
        let mut hops = self.hops.clone();
        hops.push(hop);
        NetworkPath { hops }
    }

    pub fn hops(&self) -> &[NodeId] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.hops.contains(node)
    }
}

impl From<NodeId> for NetworkPath {
    fn from(source: NodeId) -> Self {
        NetworkPath::new(source)
    }
}

impl TryFrom<Vec<NodeId>> for NetworkPath {
    type Error = EmptyNetworkPath;

    fn try_from(hops: Vec<NodeId>) -> Result<Self, Self::Error> {
        NetworkPath::try_from_hops(hops)
    }
}

impl From<NetworkPath> for Vec<NodeId> {
    fn from(path: NetworkPath) -> Self {
        path.hops
    }
}

impl Display for NetworkPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, hop) in self.hops.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            f.write_str(hop.as_str())?;
        }
        Ok(())
    }
}
