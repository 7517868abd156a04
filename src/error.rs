//! Error handling for the shuffle pipeline

use std::io;
use thiserror::Error;

/// Custom error type for shuffle operations
#[derive(Error, Debug)]
pub enum ShuffleError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No input file matches any of the patterns: {patterns}")]
    NoInputFound { patterns: String },

    #[error("Malformed record: {message}")]
    MalformedRecord { message: String },

    #[error("Input changed between passes: expected {expected} records, found {actual}")]
    InputChanged { expected: u64, actual: u64 },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ShuffleError {
    /// Returns the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ShuffleError::Config { .. } => crate::EXIT_FAILURE,

            ShuffleError::NoInputFound { .. }
            | ShuffleError::Io(_)
            | ShuffleError::MalformedRecord { .. }
            | ShuffleError::InputChanged { .. }
            | ShuffleError::Internal { .. } => crate::SHUFFLE_FAILURE,
        }
    }

    /// Create a no input found error
    pub fn no_input_found(patterns: &[String]) -> Self {
        ShuffleError::NoInputFound {
            patterns: patterns.join(","),
        }
    }

    /// Create a malformed record error
    pub fn malformed(message: &str) -> Self {
        ShuffleError::MalformedRecord {
            message: message.to_string(),
        }
    }

    /// Create an input changed error
    pub fn input_changed(expected: u64, actual: u64) -> Self {
        ShuffleError::InputChanged { expected, actual }
    }

    /// Create a configuration error
    pub fn config(message: &str) -> Self {
        ShuffleError::Config {
            message: message.to_string(),
        }
    }

    /// Create an internal error
    pub fn internal(message: &str) -> Self {
        ShuffleError::Internal {
            message: message.to_string(),
        }
    }
}

/// Result type for shuffle operations
pub type ShuffleResult<T> = Result<T, ShuffleError>;

/// Context trait for attaching a file name or description to I/O errors
pub trait ShuffleContext<T> {
    fn with_context<F>(self, f: F) -> ShuffleResult<T>
    where
        F: FnOnce() -> String;

    fn with_file_context(self, filename: &str) -> ShuffleResult<T>;
}

impl<T> ShuffleContext<T> for ShuffleResult<T> {
    fn with_context<F>(self, f: F) -> ShuffleResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| match err {
            ShuffleError::Io(io_err) => ShuffleError::Io(io::Error::new(
                io_err.kind(),
                format!("{}: {}", f(), io_err),
            )),
            ShuffleError::MalformedRecord { message } => ShuffleError::MalformedRecord {
                message: format!("{}: {}", f(), message),
            },
            other => other,
        })
    }

    fn with_file_context(self, filename: &str) -> ShuffleResult<T> {
        self.with_context(|| filename.to_string())
    }
}

impl<T> ShuffleContext<T> for Result<T, io::Error> {
    fn with_context<F>(self, f: F) -> ShuffleResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|io_err| {
            ShuffleError::Io(io::Error::new(
                io_err.kind(),
                format!("{}: {}", f(), io_err),
            ))
        })
    }

    fn with_file_context(self, filename: &str) -> ShuffleResult<T> {
        self.with_context(|| filename.to_string())
    }
}
