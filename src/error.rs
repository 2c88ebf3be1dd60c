//! Error types for the pagewise pipeline.

use std::io;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for pagewise operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Whether a failed operation is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, upstream 5xx, quota with a known reset time.
    Transient,
    /// Malformed input, auth failures, everything else.
    Fatal,
}

/// Error types that can occur while running the pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error when reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The source cannot be decomposed into units. Aborts the whole run.
    #[error("Cannot split source: {0}")]
    FatalSplit(String),

    /// Extraction failed for a single unit.
    #[error("Unit {index} failed: {message}")]
    Unit {
        /// 1-based unit index
        index: u32,
        /// Failure description
        message: String,
    },

    /// A whole enrichment stage failed. The checkpoint was saved first.
    #[error("Stage {stage} failed: {source}")]
    Stage {
        /// Stage name (e.g. "unit-repair")
        stage: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The checkpoint was written by an incompatible schema version.
    #[error("Checkpoint schema version {found} is not supported (supported: {supported})")]
    CheckpointVersion {
        /// Version found in the file
        found: String,
        /// Version this build writes
        supported: String,
    },

    /// An upstream quota was exhausted.
    #[error("Quota exceeded{}", reset_suffix(.reset_at))]
    QuotaExceeded {
        /// When the quota resets, if the upstream said so
        reset_at: Option<DateTime<Utc>>,
    },

    /// A stage was requested before its predecessor completed.
    #[error("Stage {stage} cannot run before {required} is complete")]
    StageOrder {
        /// Stage that was about to run
        stage: String,
        /// Predecessor that is incomplete
        required: String,
    },

    /// An operation ran past its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// An upstream collaborator answered with an error status.
    #[error("Upstream error {status}: {message}")]
    Upstream {
        /// HTTP-style status code
        status: u16,
        /// Response message
        message: String,
    },

    /// Authentication or authorization failure.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Input that a collaborator cannot work with.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A call returned, but its result did not pass the success check.
    #[error("Result rejected: {0}")]
    Rejected(String),

    /// A schema invariant would be broken.
    #[error("Schema invariant violated: {0}")]
    Invariant(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error for retry purposes.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Timeout(_) | Error::Rejected(_) => ErrorClass::Transient,
            Error::Upstream { status, .. } if *status >= 500 || *status == 429 => {
                ErrorClass::Transient
            }
            Error::QuotaExceeded { reset_at: Some(_) } => ErrorClass::Transient,
            Error::Io(e) => match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            Error::Stage { source, .. } => source.class(),
            _ => ErrorClass::Fatal,
        }
    }

    /// Whether the error is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Errors that abort the run instead of being reported as a stage failure.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Error::FatalSplit(_) | Error::CheckpointVersion { .. } | Error::StageOrder { .. }
        )
    }
}

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(t) => format!(" (resets at {})", t.to_rfc3339()),
        None => String::new(),
    }
}
