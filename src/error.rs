//! Error types for the AMI proxy

use thiserror::Error;

/// Result type alias for proxy operations
pub type AmiResult<T> = Result<T, AmiError>;

/// Errors surfaced by the transport, the dispatcher and the command plugins
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AmiError {
    /// I/O error from the underlying TCP connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out (TCP connect, login or command reply)
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// The link dropped while the command was waiting for its reply
    #[error("Connection lost while command was in flight")]
    ConnectionLost,

    /// Command issued while the link is not logged in
    #[error("Not connected to the manager interface")]
    NotConnected,

    /// Generic protocol violation
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// A frame that could not be decoded; the reader drops it and continues
    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },

    /// Login rejected by the PBX
    #[error("Authentication failed: {reason}")]
    AuthFailed { reason: String },

    /// No command plugin is registered under this name
    #[error("Unsupported command: {command}")]
    UnsupportedCommand { command: String },

    /// A required command parameter was not supplied
    #[error("Missing parameter: {param}")]
    MissingParameter { param: String },

    /// The PBX answered `Response: Error`
    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    /// A plugin panicked while handling a frame
    #[error("Plugin '{plugin}' failed: {reason}")]
    PluginFailure { plugin: String, reason: String },

    /// `start()` called twice
    #[error("Proxy already started")]
    AlreadyStarted,

    /// Operation requires a started proxy
    #[error("Proxy not started")]
    NotStarted,

    /// The proxy was shut down while the command was pending
    #[error("Proxy shut down")]
    Shutdown,

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The structural description could not be loaded
    #[error("Structure description error: {message}")]
    Structure { message: String },
}

impl AmiError {
    /// Create a protocol error
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            reason: reason.into(),
        }
    }

    /// Create a malformed frame error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// Create a missing parameter error
    pub fn missing_param(param: impl Into<String>) -> Self {
        Self::MissingParameter {
            param: param.into(),
        }
    }

    /// Whether the error is a transport fault that the reconnect policy recovers from
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            AmiError::Io(_)
                | AmiError::Timeout { .. }
                | AmiError::ConnectionClosed
                | AmiError::AuthFailed { .. }
                | AmiError::Protocol { .. }
        )
    }
}
