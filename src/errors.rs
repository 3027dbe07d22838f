//! Error types for the responsiveness test.
//!
//! Policy: recover locally whenever the test can still produce any useful
//! number; escalate to fatal only when the test cannot proceed at all.
//! Individual connection or probe failures are swallowed at the source and
//! show up only as absent measurements.

use std::error::Error;
use std::fmt;

/// Exit codes for the application.
pub mod exit_codes {
    /// Invalid or unreachable test configuration.
    pub const CONFIG_ERROR: i32 = 1;
    /// The sockets needed to run the test could not be used at all.
    pub const NETWORK_ERROR: i32 = 2;
}

/// Categories of errors that can occur during a responsiveness test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid URL or unreachable discovery endpoint. Fatal at startup.
    Config,
    /// A transport-level failure that left the test unable to proceed.
    Transport,
    /// A requested capability is not available on this platform.
    Platform,
}

impl ErrorKind {
    /// Get the exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Config => exit_codes::CONFIG_ERROR,
            ErrorKind::Transport => exit_codes::NETWORK_ERROR,
            ErrorKind::Platform => exit_codes::CONFIG_ERROR,
        }
    }

    /// Get a short description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Config => "Configuration error",
            ErrorKind::Transport => "Transport error",
            ErrorKind::Platform => "Platform capability error",
        }
    }
}

/// A test-level error carrying its category and, when available, the
/// underlying cause.
#[derive(Debug)]
pub struct TestError {
    /// The kind of error.
    pub kind: ErrorKind,
    /// Human-readable error message.
    pub message: String,
    /// The underlying error, if any.
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl TestError {
    /// Create a new TestError.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    /// Add the underlying error source.
    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Create a platform-capability error.
    pub fn platform(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Platform, message)
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.description(), self.message)
    }
}

impl Error for TestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_exit_codes() {
        assert_eq!(ErrorKind::Config.exit_code(), exit_codes::CONFIG_ERROR);
        assert_eq!(
            ErrorKind::Transport.exit_code(),
            exit_codes::NETWORK_ERROR
        );
        assert_eq!(ErrorKind::Platform.exit_code(), exit_codes::CONFIG_ERROR);
    }

    #[test]
    fn test_test_error_display() {
        let error = TestError::config("could not parse discovery URL");
        let display = format!("{}", error);
        assert!(display.contains("Configuration error"));
        assert!(display.contains("could not parse"));
    }

    #[test]
    fn test_test_error_source_chain() {
        let io = std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        );
        let error = TestError::transport("first connection failed")
            .with_source(io);
        assert!(error.source().is_some());
        assert_eq!(error.exit_code(), exit_codes::NETWORK_ERROR);
    }
}
