use std::fmt;

/// Result type for convolens-skill operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the skill runtime
#[derive(Debug)]
pub enum Error {
    /// Bad invocation: unsupported provider, missing skill file, missing API
    /// key. Maps to exit code 2 at the CLI boundary.
    Invocation(String),

    /// Inference failed after retries, or the batch produced nothing usable.
    /// Maps to exit code 1 at the CLI boundary.
    Inference(String),

    /// IO operation failed
    Io(std::io::Error),

    /// Store layer error
    Store(convolens_store::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Invocation(msg) => write!(f, "{}", msg),
            Error::Inference(msg) => write!(f, "{}", msg),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Store(err) => write!(f, "Store error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Store(err) => Some(err),
            Error::Invocation(_) | Error::Inference(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<convolens_store::Error> for Error {
    fn from(err: convolens_store::Error) -> Self {
        Error::Store(err)
    }
}

impl Error {
    /// CLI exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Invocation(_) => 2,
            Error::Inference(_) | Error::Io(_) | Error::Store(_) => 1,
        }
    }
}
