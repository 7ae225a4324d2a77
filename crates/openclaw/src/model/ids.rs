use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of the abbreviated form used in log lines.
const SHORT_ID_LEN: usize = 8;

/// Identifier assigned to every run, fresh per request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new unique run ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for human-facing output only.
    #[must_use]
    pub fn short(&self) -> String {
        self.0
            .simple()
            .to_string()
            .chars()
            .take(SHORT_ID_LEN)
            .collect()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
