//! Error types for the PDF cleaning library

use std::fmt;
use std::path::PathBuf;
use lopdf::ObjectId;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The cleaning phase a failure was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanPhase {
    /// Top-level page content stream and resource dictionary
    Page,
    /// Embedded stream object (form XObject, soft-mask group, tiling pattern)
    XObject,
    /// Type3 font glyph procedure table
    Type3,
}

impl fmt::Display for CleanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanPhase::Page => f.write_str("page"),
            CleanPhase::XObject => f.write_str("xobject"),
            CleanPhase::Type3 => f.write_str("type3 glyph procedures"),
        }
    }
}

/// Main error type for the PDF cleaning library
#[derive(Error, Debug)]
pub enum Error {
    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Invalid PDF (no pages)
    #[error("PDF has no pages: {}", .0.display())]
    EmptyPdf(PathBuf),

    /// Requested page number does not exist
    #[error("Page {0} not found")]
    PageNotFound(u32),

    /// Object expected to carry a content stream does not
    #[error("Object {} {} R is not a stream", .0.0, .0.1)]
    NotAStream(ObjectId),

    /// Content stream operator with wrong operand count or types
    #[error("Malformed '{operator}' operator: {reason}")]
    MalformedOperator { operator: String, reason: String },

    /// Interpretation stopped through the cookie
    #[error("Operation aborted")]
    Aborted,

    /// Nested objects deeper than the configured limit
    #[error("Nested object depth exceeds limit of {0}")]
    RecursionLimit(usize),

    /// A cleaning phase failed; `source` holds the underlying failure
    #[error("failed while cleaning {phase}")]
    Clean {
        phase: CleanPhase,
        #[source]
        source: Box<Error>,
    },

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Wrap this error with the tag of the phase it was raised in
    pub fn in_phase(self, phase: CleanPhase) -> Self {
        Error::Clean {
            phase,
            source: Box::new(self),
        }
    }

    /// The phase tag of the outermost cleaning failure, if any
    pub fn phase(&self) -> Option<CleanPhase> {
        match self {
            Error::Clean { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The innermost error beneath any phase tags
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Clean { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
