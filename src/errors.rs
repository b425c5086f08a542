//! The error taxonomy shared by the whole crate.

use std::io;
use thiserror::Error;

/// A convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All the ways a responder operation can fail.
#[derive(Error, Debug)]
pub enum Error {
    /// A packet on the wire (or a record being written) did not follow
    /// [rfc1035] / [rfc6762] layout. The offending packet is discarded by
    /// the caller.
    ///
    /// [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
    /// [rfc6762]: https://datatracker.ietf.org/doc/html/rfc6762
    #[error("{operation}: malformed message at offset {offset}: {message}")]
    WireFormat {
        operation: &'static str,
        offset: u64,
        message: String,
    },

    /// A service (or one of its fields) failed validation before it was
    /// placed in the registry.
    #[error("invalid {field} {value:?}: {message}")]
    Validation {
        field: &'static str,
        value: String,
        message: String,
    },

    /// A socket operation failed. `operation` describes what was being
    /// attempted ("create socket", "send packet", ...) for operator
    /// diagnosis.
    #[error("{operation}: {details}")]
    Network {
        operation: &'static str,
        details: String,
        #[source]
        source: io::Error,
    },

    /// Probing kept losing the tiebreak and the rename budget is spent.
    #[error("'{service_id}' still conflicted after {attempts} rename attempts")]
    Conflict { service_id: String, attempts: u32 },

    /// The operation was attempted after `close()`.
    #[error("responder is shut down")]
    Shutdown,

    /// The operation was aborted by shutdown or task cancellation before it
    /// could complete.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Builds a [`Error::WireFormat`] from a failed low-level read.
    pub(crate) fn wire(operation: &'static str, offset: u64, err: impl ToString) -> Error {
        Error::WireFormat {
            operation,
            offset,
            message: err.to_string(),
        }
    }

    /// Builds a [`Error::Network`] around an [`io::Error`].
    pub(crate) fn network(operation: &'static str, source: io::Error) -> Error {
        Error::Network {
            operation,
            details: source.to_string(),
            source,
        }
    }
}

/// Early-returns a [`Error::WireFormat`] with a formatted message.
#[macro_export]
macro_rules! wire_error {
    ($op:expr, $offset:expr, $($arg:tt)*) => {
        return Err($crate::Error::WireFormat {
            operation: $op,
            offset: $offset as u64,
            message: format!($($arg)*),
        })
    };
}

/// Early-returns a [`Error::Validation`] with a formatted message.
#[macro_export]
macro_rules! validation_error {
    ($field:expr, $value:expr, $($arg:tt)*) => {
        return Err($crate::Error::Validation {
            field: $field,
            value: $value.to_string(),
            message: format!($($arg)*),
        })
    };
}
