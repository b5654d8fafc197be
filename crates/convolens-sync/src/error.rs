use std::fmt;

/// Result type for convolens-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while syncing reports
#[derive(Debug)]
pub enum Error {
    /// Contract validation failed; one entry per violation
    Validation(Vec<String>),

    /// Quality gate rejected the payload; one entry per reason
    Quality(Vec<String>),

    /// Configuration problem (missing file, missing token or database id)
    Config(String),

    /// External database request failed
    Db(String),

    /// Some report pages failed to write
    Partial { written: usize, total: usize },

    /// IO operation failed
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(errors) => {
                write!(f, "mechanism validation failed ({} errors)", errors.len())
            }
            Error::Quality(reasons) => {
                write!(f, "quality gate failed ({} reasons)", reasons.len())
            }
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Db(msg) => write!(f, "Database error: {}", msg),
            Error::Partial { written, total } => {
                write!(f, "written {}/{} reports", written, total)
            }
            Error::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
