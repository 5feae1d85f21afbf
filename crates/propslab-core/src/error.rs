use thiserror::Error;

/// Failure classifications for the collection pipeline.
///
/// Clonable so that scripted test fetchers and the failure report can
/// both hold onto error values.
#[derive(Error, Debug, Clone)]
pub enum CollectError {
    /// Request exceeded the per-strategy timeout.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Connection-level failure (refused, reset, DNS).
    #[error("connection error: {0}")]
    Connection(String),

    /// Remote returned a non-2xx status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Remote served an anti-automation challenge instead of content.
    #[error("anti-automation challenge at {0}")]
    BlockedByDefense(String),

    /// Response body could not be read or decoded.
    #[error("malformed response body: {0}")]
    ParseFailure(String),

    /// A required schema field matched nothing in the markup.
    #[error("required field '{field}' missing from markup")]
    ExtractionFailure { field: String },

    /// Browser driver failure (launch, CDP, navigation plumbing).
    #[error("browser error: {0}")]
    Browser(String),

    /// Extraction schema could not be loaded or is invalid.
    #[error("schema error: {0}")]
    Schema(String),

    /// Target is malformed (bad URL, unknown schema reference).
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Writing the dataset or report to its output failed.
    #[error("export error: {0}")]
    Export(String),

    /// The run was cancelled before this operation completed.
    #[error("run cancelled")]
    Cancelled,
}

impl CollectError {
    /// True if another attempt with the same strategy may succeed.
    ///
    /// 429/503 are treated as transient per the usual semantics of
    /// rate limiting and overload shedding; other status codes are
    /// terminal for the current strategy.
    pub fn is_retryable(&self) -> bool {
        match self {
            CollectError::Timeout(_)
            | CollectError::Connection(_)
            | CollectError::BlockedByDefense(_) => true,
            CollectError::HttpStatus { status, .. } => matches!(status, 429 | 503),
            _ => false,
        }
    }

    /// True if the remote is serving challenge pages; these attempts
    /// are budgeted separately since hammering worsens detection.
    pub fn is_blocked(&self) -> bool {
        matches!(self, CollectError::BlockedByDefense(_))
    }

    /// True if the failure is final for the whole target: no retry and
    /// no fallback will change the outcome.
    pub fn is_terminal_for_target(&self) -> bool {
        matches!(
            self,
            CollectError::ExtractionFailure { .. }
                | CollectError::Schema(_)
                | CollectError::InvalidTarget(_)
                | CollectError::Cancelled
        )
    }

    /// Short stable label for the failure report.
    pub fn classification(&self) -> &'static str {
        match self {
            CollectError::Timeout(_) => "timeout",
            CollectError::Connection(_) => "connection",
            CollectError::HttpStatus { .. } => "http_status",
            CollectError::BlockedByDefense(_) => "blocked_by_defense",
            CollectError::ParseFailure(_) => "parse_failure",
            CollectError::ExtractionFailure { .. } => "extraction_failure",
            CollectError::Browser(_) => "browser",
            CollectError::Schema(_) => "schema",
            CollectError::InvalidTarget(_) => "invalid_target",
            CollectError::Export(_) => "export",
            CollectError::Cancelled => "cancelled",
        }
    }
}
