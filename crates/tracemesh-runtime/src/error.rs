use std::fmt;

/// Result type for tracemesh-runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while orchestrating the fast path, worker pool, and
/// backpressure monitor.
#[derive(Debug)]
pub enum Error {
    Stream(tracemesh_stream::Error),
    Store(tracemesh_store::Error),
    Event(tracemesh_types::Error),
    Task(tokio::task::JoinError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Stream(err) => write!(f, "stream error: {}", err),
            Error::Store(err) => write!(f, "store error: {}", err),
            Error::Event(err) => write!(f, "event error: {}", err),
            Error::Task(err) => write!(f, "task error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Stream(err) => Some(err),
            Error::Store(err) => Some(err),
            Error::Event(err) => Some(err),
            Error::Task(err) => Some(err),
        }
    }
}

impl From<tracemesh_stream::Error> for Error {
    fn from(err: tracemesh_stream::Error) -> Self {
        Error::Stream(err)
    }
}

impl From<tracemesh_store::Error> for Error {
    fn from(err: tracemesh_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<tracemesh_types::Error> for Error {
    fn from(err: tracemesh_types::Error) -> Self {
        Error::Event(err)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err)
    }
}
