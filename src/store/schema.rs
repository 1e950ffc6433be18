//! Row types of the capture log

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity tag of the tool that produced a stored capture
///
/// Stored as plain text so new kinds can be added without a schema change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogKind(String);

impl LogKind {
    /// Output of the slow-query digest tool
    pub const DIGEST: &'static str = "digest";
    /// Output of the HTTP access-log aggregator
    pub const ACCESS_LOG: &'static str = "access-log";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn digest() -> Self {
        Self::new(Self::DIGEST)
    }

    pub fn access_log() -> Self {
        Self::new(Self::ACCESS_LOG)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One persisted capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: LogKind,
    /// Raw tool output, kept byte for byte
    pub content: Vec<u8>,
    /// Source revision at capture time (empty when it could not be resolved)
    pub revision: String,
    /// Unix seconds, shared by every entry of one capture cycle
    pub created_at: i64,
}

/// Distinct revision/timestamp pair, the index of what has been captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionSummary {
    pub revision: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_kinds() {
        assert_eq!(LogKind::digest().as_str(), "digest");
        assert_eq!(LogKind::access_log().to_string(), "access-log");
        assert_eq!(LogKind::new("digest"), LogKind::digest());
    }

    #[test]
    fn test_revision_summary_json_shape() {
        let summary = RevisionSummary {
            revision: "abc123".to_string(),
            created_at: 1000,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert_eq!(json, r#"{"revision":"abc123","created_at":1000}"#);
    }
}
