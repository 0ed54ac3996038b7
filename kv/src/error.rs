use std::fmt;

/// A validation issue produced by a user-supplied schema (see [`crate::validator`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub message: String,
    pub path: Option<String>,
}

impl Issue {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), path: None }
    }

    pub fn with_path(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self { message: message.into(), path: Some(path.into()) }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(p) => write!(f, "{} (at {})", self.message, p),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug)]
pub enum Error {
    /// Any API call made after `close()`, or on an already-disposed handle.
    Closed,
    /// Key is not a sequence, contains an unsupported part, is empty where
    /// non-empty is required, carries the reserved wildcard text, or exceeds
    /// the key size limit.
    InvalidKey(String),
    /// Forbidden combination of bounds passed to `list`.
    InvalidSelector(String),
    /// Malformed versionstamp, unknown mutation type, missing/surplus value,
    /// non-KvU64 operand for an arithmetic mutation, or an over-budget
    /// atomic commit.
    InvalidMutation(String),
    /// An arithmetic mutation ran against an existing value that is not a
    /// KvU64.
    TypeMismatch(String),
    /// A registered schema rejected a value.
    Validation { key: String, issues: Vec<Issue> },
    /// A stored key's bytes could not be decoded back into a `Key`.
    DecodeError(String),
    /// The store's transaction facility exhausted its retry budget.
    Contention,
    /// Any other failure surfaced by the underlying ordered store.
    StoreError(String),

    // Lower-level variants used by the storage and codec layers; these are
    // folded into `StoreError` once they cross the `Database` boundary.
    Internal(String),
    Parse(String),
    Value(String),
    Io(String),
}

pub type CResult<T> = Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Closed => write!(f, "database is closed"),
            Error::InvalidKey(msg) => write!(f, "invalid key: {}", msg),
            Error::InvalidSelector(msg) => write!(f, "invalid selector: {}", msg),
            Error::InvalidMutation(msg) => write!(f, "invalid mutation: {}", msg),
            Error::TypeMismatch(msg) => write!(f, "type mismatch: {}", msg),
            Error::Validation { key, issues } => {
                write!(f, "validation failed for key {}: ", key)?;
                for (i, issue) in issues.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", issue)?;
                }
                Ok(())
            }
            Error::DecodeError(msg) => write!(f, "decode error: {}", msg),
            Error::Contention => write!(f, "contention: transaction retries exhausted"),
            Error::StoreError(msg) => write!(f, "store error: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
            Error::Parse(msg) => write!(f, "parse error: {}", msg),
            Error::Value(msg) => write!(f, "value error: {}", msg),
            Error::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
