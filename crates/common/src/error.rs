use thiserror::Error;

/// Canonical CPQ error taxonomy used across crates.
///
/// Classification guidance:
/// - [`QueryError::MalformedContinuationToken`]: a resumed token failed to parse
///   as its owning stage's expected shape; raised at construction, never mid-drain
/// - [`QueryError::UnsupportedQueryFeatures`]: plan/caller feature negotiation failed
/// - [`QueryError::InvalidArgument`]: programming-contract violations at construction
/// - [`QueryError::Cancelled`]: the caller's cancellation token fired during a drain
/// - [`QueryError::Internal`]: unexpected faults; the catch-all wrapper converts
///   these into a terminal failed page
///
/// Transport failures (throttles, splits, stale routing metadata, backend errors)
/// are never `QueryError`s: they travel upward as failed pages carrying the
/// status/sub-status pair, so the cursor never throws for ordinary query outcomes.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A caller-supplied continuation token did not parse as the named
    /// pipeline stage's token shape.
    ///
    /// Examples:
    /// - composite token that is not a JSON array of range entries
    /// - count accumulator token that is not a non-negative integer
    /// - distinct map token with an unknown variant tag
    #[error("malformed continuation token for {stage}: {message}")]
    MalformedContinuationToken {
        /// Pipeline stage that owns the unparsable token slice.
        stage: &'static str,
        /// Parse-level detail.
        message: String,
    },

    /// The compiled plan requires features the caller did not declare support
    /// for. The message enumerates every missing feature, never just the first.
    #[error("{message}")]
    UnsupportedQueryFeatures {
        /// Names of all missing features.
        missing: Vec<String>,
        /// Combined message listing each missing feature.
        message: String,
    },

    /// Invalid or missing required argument at construction time.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A continuation token was requested at a point where the owning stage
    /// cannot produce one (e.g. GROUP BY while still aggregating).
    #[error("continuation token not supported: {0}")]
    ContinuationNotSupported(String),

    /// The drain was aborted by the caller's cancellation token. Committed
    /// per-producer tokens remain valid for retry.
    #[error("query drain was cancelled")]
    Cancelled,

    /// Unexpected internal fault after construction succeeded.
    #[error("internal query engine error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Builds a malformed-token error for `stage` from any parse-level detail.
    pub fn malformed_token(stage: &'static str, message: impl Into<String>) -> Self {
        QueryError::MalformedContinuationToken {
            stage,
            message: message.into(),
        }
    }
}

/// Standard CPQ result alias.
pub type Result<T> = std::result::Result<T, QueryError>;
