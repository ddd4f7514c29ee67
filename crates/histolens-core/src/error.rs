//! Error taxonomy for the histolens streaming core.
//!
//! Per-commit consume failures and aggregation refusals are deliberately
//! *not* represented here: they are `None`/drop outcomes at the call site,
//! not `Error` variants. This enum is reserved for failures that abort a
//! run or a component boundary.

use thiserror::Error;

/// Result type alias for histolens operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown analyzer: {0}")]
    UnknownAnalyzer(String),

    #[error("analyzer '{0}' rejected configuration: {1}")]
    InvalidConfig(String, String),

    #[error("store I/O error for analyzer '{analyzer}': {source}")]
    StoreIo {
        analyzer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store is closed for analyzer '{0}'")]
    StoreClosed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run cancelled")]
    Cancelled,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure aborts the whole run, as opposed to being
    /// something a caller could plausibly retry after adjusting input.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StoreIo { .. } | Self::StoreClosed(_) | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_carry_context() {
        let err = Error::InvalidConfig("temporal_anomaly".into(), "window_size must be > 0".into());
        assert_eq!(
            err.to_string(),
            "analyzer 'temporal_anomaly' rejected configuration: window_size must be > 0"
        );

        let err = Error::StoreClosed("quality".into());
        assert_eq!(err.to_string(), "store is closed for analyzer 'quality'");
    }

    #[test]
    fn cancellation_is_not_fatal() {
        assert!(!Error::Cancelled.is_fatal());
        assert!(!Error::UnknownAnalyzer("x".into()).is_fatal());
    }

    #[test]
    fn store_errors_are_fatal() {
        assert!(Error::StoreClosed("time_series".into()).is_fatal());
        assert!(
            Error::StoreIo {
                analyzer: "quality".into(),
                source: std::io::Error::other("disk full"),
            }
            .is_fatal()
        );
    }
}
