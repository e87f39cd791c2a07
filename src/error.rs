use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Main pipeline error type that encompasses all failure modes of the
/// formatting and link validation pipeline.
///
/// The enum is `Clone` so results can be shared between coalesced waiters;
/// non-cloneable sources (`std::io::Error`, `reqwest::Error`) are wrapped in
/// `Arc`.
#[derive(Error, Debug, Clone)]
pub enum CheckError {
    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("HTTP error: {0}")]
    Http(#[source] Arc<reqwest::Error>),

    /// Local link target does not exist on disk.
    #[error("file not found")]
    FileNotFound,

    /// Local link target exists but has no matching header anchor.
    #[error("file exists, but does not have such id")]
    IdNotFound,

    #[error("provided mailto link is not a valid email, got {dest}")]
    InvalidEmail { dest: String },

    #[error("no MX records for domain {domain}")]
    NoMxRecords { domain: String },

    #[error("MX lookup for domain {domain}: {details}")]
    MxLookup { domain: String, details: String },

    #[error("{url:?} not accessible; status code {status}")]
    NotAccessible { url: String, status: u16 },

    #[error("{url:?} rate limited even after retry; status code {status}")]
    RateLimited { url: String, status: u16 },

    #[error("{url:?} not accessible even after retry; status code {status}")]
    NotAccessibleAfterRetry { url: String, status: u16 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("formatting {path}: {details}")]
    Format { path: PathBuf, details: String },

    #[error("cancelled")]
    Cancelled,

    /// An error annotated with additional context, rendered as
    /// `<context>: <source>` the way wrapped errors chain their messages.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<CheckError>,
    },

    /// Multiple errors combined into one. Rendered as the single error's
    /// text for one element and `N errors: e1; e2; …` otherwise.
    #[error("{}", format_multi(.0))]
    Multi(Vec<CheckError>),
}

/// Broad error classification used for counting and filtering diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Http,
    LocalLink,
    Mail,
    RemoteLink,
    Config,
    Cache,
    Format,
    Cancelled,
    Multi,
}

impl CheckError {
    /// Wrap the error with a context message, mirroring error-wrap chains:
    /// the rendered message becomes `<context>: <inner>`.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        CheckError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The kind of the innermost error, looking through `Context` wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckError::Io(_) => ErrorKind::Io,
            CheckError::Http(_) => ErrorKind::Http,
            CheckError::FileNotFound | CheckError::IdNotFound => ErrorKind::LocalLink,
            CheckError::InvalidEmail { .. }
            | CheckError::NoMxRecords { .. }
            | CheckError::MxLookup { .. } => ErrorKind::Mail,
            CheckError::NotAccessible { .. }
            | CheckError::RateLimited { .. }
            | CheckError::NotAccessibleAfterRetry { .. } => ErrorKind::RemoteLink,
            CheckError::Config(_) => ErrorKind::Config,
            CheckError::Cache(_) => ErrorKind::Cache,
            CheckError::Format { .. } => ErrorKind::Format,
            CheckError::Cancelled => ErrorKind::Cancelled,
            CheckError::Context { source, .. } => source.kind(),
            CheckError::Multi(_) => ErrorKind::Multi,
        }
    }

    /// Whether this error (or any error nested in it) matches the kind.
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        match self {
            CheckError::Multi(errs) => errs.iter().any(|e| e.is_kind(kind)),
            CheckError::Context { source, .. } => source.is_kind(kind),
            other => other.kind() == kind,
        }
    }

    /// Count the leaf errors matching the kind, recursing into nested
    /// composites and context wrappers.
    pub fn count_kind(&self, kind: ErrorKind) -> usize {
        match self {
            CheckError::Multi(errs) => errs.iter().map(|e| e.count_kind(kind)).sum(),
            CheckError::Context { source, .. } => source.count_kind(kind),
            other => usize::from(other.kind() == kind),
        }
    }
}

fn format_multi(errs: &[CheckError]) -> String {
    let mut out = String::new();
    if errs.len() > 1 {
        out.push_str(&format!("{} errors: ", errs.len()));
    }
    for (i, err) in errs.iter().enumerate() {
        if i != 0 {
            out.push_str("; ");
        }
        out.push_str(&err.to_string());
    }
    out
}

impl From<std::io::Error> for CheckError {
    fn from(err: std::io::Error) -> Self {
        CheckError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for CheckError {
    fn from(err: reqwest::Error) -> Self {
        CheckError::Http(Arc::new(err))
    }
}

impl From<rusqlite::Error> for CheckError {
    fn from(err: rusqlite::Error) -> Self {
        CheckError::Cache(err.to_string())
    }
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, CheckError>;
