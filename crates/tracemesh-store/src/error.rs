use std::fmt;

/// Result type for tracemesh-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the storage layer.
#[derive(Debug)]
pub enum Error {
    /// Database operation failed.
    Database(rusqlite::Error),

    /// IO operation failed (opening the db file, creating its parent directory).
    Io(std::io::Error),

    /// Stored `event_data` failed to decompress or parse back into an `Event`.
    Corrupt(String),

    /// Query-specific error (invalid input, not found, etc.)
    Query(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Database(err) => write!(f, "database error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Corrupt(msg) => write!(f, "corrupt trace row: {}", msg),
            Error::Query(msg) => write!(f, "query error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Corrupt(_) | Error::Query(_) => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corrupt(err.to_string())
    }
}

impl From<tracemesh_types::Error> for Error {
    fn from(err: tracemesh_types::Error) -> Self {
        Error::Corrupt(err.to_string())
    }
}
