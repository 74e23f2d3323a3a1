//! Custom error types for gapfuzz
//!
//! Provides structured error handling with context propagation
//! and user-friendly error messages.

use thiserror::Error;

/// Main error type for gapfuzz operations
#[derive(Error, Debug)]
pub enum GapfuzzError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP transport and message errors
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Fuzzing setup and execution errors
    #[error("Fuzzer error: {0}")]
    Fuzzer(#[from] FuzzerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Configuration file not found: {0}")]
    NotFound(String),
}

/// HTTP transport and message errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Malformed header: {0}")]
    MalformedHeader(String),
}

/// Errors raised while preparing or running a fuzzing session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FuzzerError {
    #[error("Location [{begin}, {end}) is invalid for a message of {len} bytes")]
    InvalidLocation { begin: usize, end: usize, len: usize },

    #[error("Locations [{first_begin}, {first_end}) and [{second_begin}, {second_end}) overlap")]
    OverlappingGaps {
        first_begin: usize,
        first_end: usize,
        second_begin: usize,
        second_end: usize,
    },

    #[error("Location [{begin}, {end}) straddles the header/body boundary at {boundary}")]
    StraddlesBoundary { begin: usize, end: usize, boundary: usize },

    #[error("No fuzz gaps defined")]
    NoGaps,

    #[error("Gap at [{begin}, {end}) has no payloads")]
    NoPayloads { begin: usize, end: usize },

    #[error("No entry at index {0}")]
    NoSuchEntry(usize),

    #[error("Entry at index {0} is not a group")]
    NotAGroup(usize),

    #[error("Unmatched fuzz marker at offset {offset}")]
    UnbalancedMarker { offset: usize },
}

/// Failure of a single pre- or post-processor step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Processor '{processor}' failed: {reason}")]
pub struct ProcessorError {
    pub processor: String,
    pub reason: String,
}

impl ProcessorError {
    pub fn new(processor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            processor: processor.into(),
            reason: reason.into(),
        }
    }
}

impl GapfuzzError {
    /// Create an error with additional context
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        GapfuzzError::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            GapfuzzError::Config(e) => format!("Configuration problem: {}", e.user_hint()),
            GapfuzzError::Http(e) => format!("Network issue: {}", e.user_hint()),
            GapfuzzError::Fuzzer(e) => format!("Fuzzer setup issue: {}", e.user_hint()),
            GapfuzzError::Io(e) => format!("File system issue: {}", e),
            GapfuzzError::WithContext { context, source } => {
                format!("{}: {}", context, source)
            }
        }
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
            ConfigError::NotFound(path) => {
                format!("Configuration file '{}' not found. Run with --generate-config to create one.", path)
            }
        }
    }
}

impl UserHint for HttpError {
    fn user_hint(&self) -> String {
        match self {
            HttpError::ConnectionError(_) => {
                "Could not connect to the server. Check if it's running and accessible.".into()
            }
            HttpError::Timeout(ms) => {
                format!("Request timed out after {}ms. The server may be slow or unresponsive.", ms)
            }
            HttpError::InvalidUrl(url) => {
                format!("'{}' is not a valid URL. Use an absolute request-URI or a Host header.", url)
            }
            HttpError::MalformedHeader(_) => {
                "The request header could not be parsed. Check the request line and header lines.".into()
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for FuzzerError {
    fn user_hint(&self) -> String {
        match self {
            FuzzerError::OverlappingGaps { .. } => {
                "Two fuzz markers overlap. Each gap must cover a distinct span.".into()
            }
            FuzzerError::StraddlesBoundary { .. } => {
                "A fuzz marker spans both header and body. Split it into two gaps.".into()
            }
            FuzzerError::NoGaps => {
                "No fuzz markers found. Wrap each value to fuzz in §...§.".into()
            }
            FuzzerError::NoPayloads { .. } => {
                "A gap has an empty payload list. Check the wordlist files.".into()
            }
            FuzzerError::UnbalancedMarker { .. } => {
                "Every § must be closed by a second § in the same part of the request.".into()
            }
            _ => self.to_string(),
        }
    }
}

/// Extension trait for adding context to Result types
pub trait ResultExt<T, E> {
    fn with_context<C>(self, context: C) -> Result<T, GapfuzzError>
    where
        C: Into<String>;
}

impl<T, E> ResultExt<T, E> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<C>(self, context: C) -> Result<T, GapfuzzError>
    where
        C: Into<String>,
    {
        self.map_err(|e| GapfuzzError::with_context(context, e))
    }
}
