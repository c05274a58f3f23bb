//! Engine error taxonomy
//!
//! Three failure classes exist: malformed caller input (`InvalidAddress`),
//! ingestion-cycle failures (`Ingestion`), and snapshot validation
//! rejections (`SnapshotRejected`). "Not found" is deliberately not an
//! error: a valid address with no covering prefix or an ASN with no
//! observed relationships is represented as `None` or an empty collection,
//! so callers can distinguish "no route" from "bad input".
//!
//! Ingestion failures are logged and retried by the refresher; they never
//! propagate to query callers, and the previously published snapshot
//! remains authoritative.

/// Stage of the ingestion cycle in which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStage {
    Fetching,
    Building,
    Validating,
    Publishing,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestStage::Fetching => write!(f, "fetching"),
            IngestStage::Building => write!(f, "building"),
            IngestStage::Validating => write!(f, "validating"),
            IngestStage::Publishing => write!(f, "publishing"),
        }
    }
}

/// Errors surfaced by the resolution engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed address or prefix input; immediate, no state change
    #[error("invalid address input: {input}")]
    InvalidAddress { input: String },

    /// A refresh cycle failed before publishing; the previous snapshot
    /// keeps serving
    #[error("ingestion failed during {stage}: {message}")]
    Ingestion { stage: IngestStage, message: String },

    /// Validation heuristics rejected a fully built snapshot
    #[error("snapshot rejected: {reason}")]
    SnapshotRejected { reason: String },
}

impl EngineError {
    pub fn invalid_address(input: impl Into<String>) -> Self {
        EngineError::InvalidAddress {
            input: input.into(),
        }
    }

    pub fn ingestion(stage: IngestStage, message: impl Into<String>) -> Self {
        EngineError::Ingestion {
            stage,
            message: message.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        EngineError::SnapshotRejected {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::invalid_address("not-an-ip");
        assert_eq!(err.to_string(), "invalid address input: not-an-ip");

        let err = EngineError::ingestion(IngestStage::Fetching, "timed out");
        assert_eq!(err.to_string(), "ingestion failed during fetching: timed out");

        let err = EngineError::rejected("ipv4 prefix count is zero");
        assert_eq!(err.to_string(), "snapshot rejected: ipv4 prefix count is zero");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(IngestStage::Building.to_string(), "building");
        assert_eq!(IngestStage::Publishing.to_string(), "publishing");
    }
}
