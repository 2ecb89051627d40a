use std::borrow::Cow;
use std::{error, fmt, io, result};

/// Type alias for convenience when using the Result type with our Error.
pub type MarctabResult<T> = result::Result<T, MarctabError>;

/// Error classification for the MARC transform.
///
/// Per-record data defects never surface through this type: the decoder and
/// the normalizer report them as skips. Everything here aborts the run (or,
/// for [`ErrorKind::Parse`], aborts the record inside the normalizer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed MARC JSON; confined to a single record.
    Parse,
    /// A database request failed.
    QueryFailed,
    /// A filesystem operation failed.
    Io,
    /// Invalid or missing runtime configuration.
    Config,
    /// A required server capability is not installed.
    CapabilityAbsent,
    /// An operating-system resource limit was hit.
    ResourceExhausted,
    /// An API was used out of its lifecycle order.
    InvalidState,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse error",
            ErrorKind::QueryFailed => "query failed",
            ErrorKind::Io => "i/o error",
            ErrorKind::Config => "configuration error",
            ErrorKind::CapabilityAbsent => "capability absent",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::InvalidState => "invalid state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal error representation with kind, description, and optional
/// detail and source.
///
/// Boxed to keep the public error one pointer wide on the success path.
#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<String>,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

/// Error type for all marctab operations.
#[derive(Debug)]
pub struct MarctabError {
    inner: Box<ErrorInner>,
}

impl MarctabError {
    /// Creates an error with a source attached.
    pub fn with_source<E>(
        kind: ErrorKind,
        description: impl Into<Cow<'static, str>>,
        source: E,
    ) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        MarctabError {
            inner: Box::new(ErrorInner {
                kind,
                description: description.into(),
                detail: None,
                source: Some(Box::new(source)),
            }),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn detail(&self) -> Option<&str> {
        self.inner.detail.as_deref()
    }
}

impl fmt::Display for MarctabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.description)?;
        if let Some(detail) = &self.inner.detail {
            write!(f, ": {detail}")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl error::Error for MarctabError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

impl<D> From<(ErrorKind, D)> for MarctabError
where
    D: Into<Cow<'static, str>>,
{
    fn from((kind, description): (ErrorKind, D)) -> Self {
        MarctabError {
            inner: Box::new(ErrorInner {
                kind,
                description: description.into(),
                detail: None,
                source: None,
            }),
        }
    }
}

impl<D> From<(ErrorKind, D, String)> for MarctabError
where
    D: Into<Cow<'static, str>>,
{
    fn from((kind, description, detail): (ErrorKind, D, String)) -> Self {
        MarctabError {
            inner: Box::new(ErrorInner {
                kind,
                description: description.into(),
                detail: Some(detail),
                source: None,
            }),
        }
    }
}

impl From<tokio_postgres::Error> for MarctabError {
    fn from(err: tokio_postgres::Error) -> Self {
        MarctabError::with_source(ErrorKind::QueryFailed, "database request failed", err)
    }
}

impl From<io::Error> for MarctabError {
    fn from(err: io::Error) -> Self {
        MarctabError::with_source(ErrorKind::Io, "i/o error", err)
    }
}

impl From<serde_json::Error> for MarctabError {
    fn from(err: serde_json::Error) -> Self {
        MarctabError::with_source(ErrorKind::Parse, "parsing", err)
    }
}

impl From<bincode::error::EncodeError> for MarctabError {
    fn from(err: bincode::error::EncodeError) -> Self {
        MarctabError::with_source(ErrorKind::Io, "encoding row", err)
    }
}

impl From<bincode::error::DecodeError> for MarctabError {
    fn from(err: bincode::error::DecodeError) -> Self {
        MarctabError::with_source(ErrorKind::Io, "decoding row", err)
    }
}
