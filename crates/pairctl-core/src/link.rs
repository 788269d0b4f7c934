//! Replication links between a replica and its primary.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::node::NodeId;

/// Opaque marker for a point in the replication stream.
///
/// For MySQL this is the executed GTID set. The token is compared for
/// equality only; its ordering belongs to the database engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionToken(String);

impl PositionToken {
    /// Creates a token, normalizing the whitespace and line breaks the
    /// client inserts into long GTID sets.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized: String = raw
            .as_ref()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("");
        Self(normalized)
    }

    /// Returns the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if no position has been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PositionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Connection state of a replication link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Replication threads are stopped.
    #[default]
    Disconnected,

    /// The replica is trying to reach its source.
    Connecting,

    /// Both replication threads are running.
    Streaming,

    /// A replication thread stopped with an error.
    Error,
}

impl LinkState {
    /// Returns the name of this state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Association from one replica to exactly one primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationLink {
    /// The replica applying the stream.
    pub replica: NodeId,

    /// The primary the replica reads from.
    pub primary: NodeId,

    /// Connection state.
    pub state: LinkState,

    /// Last applied position.
    #[serde(default)]
    pub position: PositionToken,

    /// Seconds behind the source, when reported.
    pub lag_secs: Option<u64>,

    /// Last replication error, if any.
    pub last_error: Option<String>,
}

impl ReplicationLink {
    /// Creates a disconnected link.
    pub fn new(replica: NodeId, primary: NodeId) -> Self {
        Self {
            replica,
            primary,
            state: LinkState::Disconnected,
            position: PositionToken::default(),
            lag_secs: None,
            last_error: None,
        }
    }

    /// Sets the connection state.
    pub fn with_state(mut self, state: LinkState) -> Self {
        self.state = state;
        self
    }

    /// Sets the applied position.
    pub fn with_position(mut self, position: PositionToken) -> Self {
        self.position = position;
        self
    }

    /// Sets the last error and moves the link to [`LinkState::Error`].
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self.state = LinkState::Error;
        self
    }

    /// Returns true if the link is streaming.
    pub fn is_streaming(&self) -> bool {
        self.state == LinkState::Streaming
    }
}
