// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error model.
//!
//! Errors are cloneable so one transport failure can complete many
//! pending futures; transport filters wrap lower errors with context but
//! never change the kind.

use std::time::Duration;

use openwire::WireError;

/// Machine-readable error taxonomy; see [`Error::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    WireFormat,
    Broker,
    Timeout,
    IllegalState,
    Unsupported,
    PoisonMessage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Io => "IO",
            Self::WireFormat => "WIRE_FORMAT",
            Self::Broker => "BROKER",
            Self::Timeout => "TIMEOUT",
            Self::IllegalState => "ILLEGAL_STATE",
            Self::Unsupported => "UNSUPPORTED",
            Self::PoisonMessage => "POISON_MESSAGE",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Socket read/write failure, EOF, or lazy property corruption.
    #[error("i/o error: {0}")]
    Io(String),

    /// Structural wire corruption; terminal for the connection.
    #[error("wire format error: {0}")]
    WireFormat(String),

    /// The broker answered with an ExceptionResponse.
    #[error("broker error [{class}]: {message}")]
    Broker { class: String, message: String },

    /// A request or receive exceeded its budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Use of a closed resource, commit outside a transaction, and the
    /// like.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Feature disabled by the negotiated wire format or configuration.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Redelivery count exceeded the policy maximum.
    #[error("poison message {message_id} after {attempts} delivery attempts")]
    PoisonMessage { message_id: String, attempts: i32 },
}

impl Error {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn wire_format(message: impl Into<String>) -> Self {
        Self::WireFormat(message.into())
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::WireFormat(_) => ErrorKind::WireFormat,
            Self::Broker { .. } => ErrorKind::Broker,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::PoisonMessage { .. } => ErrorKind::PoisonMessage,
        }
    }

    /// Prefix the message with filter context, preserving the kind.
    pub fn context(self, context: &str) -> Self {
        match self {
            Self::Io(m) => Self::Io(format!("{context}: {m}")),
            Self::WireFormat(m) => Self::WireFormat(format!("{context}: {m}")),
            Self::Broker { class, message } => {
                Self::Broker { class, message: format!("{context}: {message}") }
            }
            Self::Timeout(d) => Self::Timeout(d),
            Self::IllegalState(m) => Self::IllegalState(format!("{context}: {m}")),
            Self::Unsupported(m) => Self::Unsupported(format!("{context}: {m}")),
            poison @ Self::PoisonMessage { .. } => poison,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        if err.is_structural() {
            Self::WireFormat(err.to_string())
        } else {
            // Property conversion failures surface as i/o at the accessor.
            Self::Io(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
