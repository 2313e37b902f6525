use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlaytreeError {
    #[error("XML syntax error at byte {offset}: {message}")]
    XmlSyntax { offset: u64, message: String },

    #[error("Invalid playlist document: {0}")]
    DocumentFormat(String),

    #[error("Invalid time or count literal: {0}")]
    Grammar(String),

    #[error("Disallowed reference: {0}")]
    Policy(String),

    #[error("Playlist indirection nested too deep")]
    RecursionLimit,

    #[error("Unrecognized playlist format")]
    UnknownFormat,

    #[error(transparent)]
    Transport(#[from] std::io::Error),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
}

pub type PlaytreeResult<T> = Result<T, PlaytreeError>;

/// Numeric diagnostic codes, wire-compatible with the error table the three
/// dialects were specified against.
pub mod codes {
    pub const UNKNOWN: u32 = 1001;
    pub const INVALID_ARGUMENT: u32 = 2210;
    pub const SYNTAX: u32 = 3000;
    pub const INVALID_ELEMENT: u32 = 3004;
    pub const INVALID_ATTRIBUTE: u32 = 3005;
    pub const UNSUPPORTED_ELEMENT: u32 = 3006;
    pub const UNSUPPORTED_ATTRIBUTE: u32 = 3007;
    pub const PARSE: u32 = 3008;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCategory {
    DocumentFormat,
    Grammar,
    Policy,
    Syntax,
}

/// A structured, possibly non-fatal report. Fatal conditions additionally
/// surface as a [`PlaytreeError`] from the operation that hit them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub category: DiagnosticCategory,
    pub code: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(category: DiagnosticCategory, code: u32, message: impl Into<String>) -> Self {
        Self {
            category,
            code,
            message: message.into(),
        }
    }
}

/// Receiver for structured diagnostics raised while parsing or sequencing.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}
