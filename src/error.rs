//! Error and warning types for the analysis engine
use serde::Serialize;
use thiserror::Error;

use crate::translation::paging::PagingLevel;

/// Failures that stop the operation that raised them.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A read would fall outside the image. Never clamped.
    #[error("read of {length} bytes at 0x{offset:x} exceeds image size 0x{size:x}")]
    OutOfRange { offset: u64, length: usize, size: u64 },

    /// A paging structure along the walk is not present.
    #[error("virtual address 0x{address:x} is unmapped ({level} not present)")]
    Unmapped { address: u64, level: PagingLevel },

    /// A pointer read from a kernel structure cannot refer to a valid record.
    #[error("invalid kernel structure: {0}")]
    InvalidStructure(String),

    /// No "System" candidate validated anywhere in the image.
    #[error("System process record not found in image")]
    SignatureNotFound,

    #[error("Invalid kernel layout: {0}")]
    InvalidLayout(String),

    #[error("Plugin error: {0}")]
    PluginError(String),

    #[error("JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("CSV into_inner error: {0}")]
    CsvIntoInnerError(#[from] csv::IntoInnerError<csv::Writer<Vec<u8>>>),

    #[error("UTF-8 conversion error: {0}")]
    FromUtf8Error(#[from] std::string::FromUtf8Error),
}

impl AnalysisError {
    /// True for failures caused by the image contents rather than the
    /// environment. Walkers downgrade these to warnings instead of aborting.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            AnalysisError::OutOfRange { .. }
                | AnalysisError::Unmapped { .. }
                | AnalysisError::InvalidStructure(_)
        )
    }
}

/// Recoverable conditions. They are attached to the result they degraded
/// (a process list or a VAD tree) rather than returned as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisWarning {
    /// The process list did not close within the configured bound.
    #[error("process list walk stopped after {limit} records without closing the cycle")]
    TraversalLimitExceeded { limit: usize },

    /// A forward link could not be read or translated.
    #[error("process list link at record 0x{kprocess:x} is broken: {reason}")]
    BrokenProcessLink { kprocess: u64, reason: String },

    /// The list looped back to a record other than the anchor.
    #[error("process list revisits record 0x{kprocess:x} before returning to the anchor")]
    ProcessListCycle { kprocess: u64 },

    /// Part of a VAD tree could not be recovered.
    #[error("VAD subtree at 0x{node:x} dropped: {reason}")]
    MalformedSubtree { node: u64, reason: String },
}
