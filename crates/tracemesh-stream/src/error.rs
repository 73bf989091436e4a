use std::fmt;

/// Result type for tracemesh-stream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur talking to the stream substrate.
#[derive(Debug)]
pub enum Error {
    /// The underlying Redis command failed.
    Redis(redis::RedisError),

    /// A stream entry's `event` field was missing or not valid UTF-8/JSON.
    MalformedEntry(String),

    /// The named consumer group or stream does not exist and could not be created.
    Setup(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Redis(err) => write!(f, "redis error: {}", err),
            Error::MalformedEntry(msg) => write!(f, "malformed stream entry: {}", msg),
            Error::Setup(msg) => write!(f, "stream setup error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Redis(err) => Some(err),
            Error::MalformedEntry(_) | Error::Setup(_) => None,
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Redis(err)
    }
}
