use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix of ids assigned locally to entities the server has not created yet.
pub const PROVISIONAL_PREFIX: &str = "local-";

/// Returns true if `id` was assigned locally rather than by the server.
pub fn is_provisional(id: &str) -> bool {
    id.starts_with(PROVISIONAL_PREFIX)
}

/// Identifier of a queued mutation.
///
/// Uses UUIDv7 so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(pub Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// A provisional entity id derived from this mutation id.
    pub fn provisional(&self) -> String {
        format!("{PROVISIONAL_PREFIX}{}", self.0)
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
