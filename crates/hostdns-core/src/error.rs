//! Error types for the host DNS synchronizer
//!
//! This module defines all error types used throughout the crate.

use crate::traits::ResponseCode;
use thiserror::Error;

/// Result type alias for hostdns operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the host DNS synchronizer
#[derive(Error, Debug)]
pub enum Error {
    /// The container runtime could not be reached or refused the handshake
    #[error("Container runtime connection error: {0}")]
    Connection(String),

    /// The container runtime answered, but the request failed
    #[error("Container runtime error: {0}")]
    Runtime(String),

    /// A DNS update was rejected or could not be delivered
    #[error("DNS update failed: {reason}")]
    DnsUpdate {
        /// Human readable description of the failure
        reason: String,
        /// Response code returned by the nameserver, if one was received
        code: Option<ResponseCode>,
    },

    /// DNS query or transport-level errors
    #[error("DNS transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a container runtime connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a container runtime error
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a DNS update error that carries no response code
    pub fn dns_update(msg: impl Into<String>) -> Self {
        Self::DnsUpdate {
            reason: msg.into(),
            code: None,
        }
    }

    /// Create a DNS update error for a non-success response code
    pub fn rejected(code: ResponseCode) -> Self {
        Self::DnsUpdate {
            reason: format!("server answered {code}"),
            code: Some(code),
        }
    }

    /// Create a DNS transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Response code carried by a [`Error::DnsUpdate`], if any
    pub fn response_code(&self) -> Option<ResponseCode> {
        match self {
            Self::DnsUpdate { code, .. } => *code,
            _ => None,
        }
    }

    /// Whether this error is fatal at startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Config(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
