//! Error types for subflow operations.
//!
//! Every OS failure keeps its raw errno and is classified into an
//! [`ErrorKind`]. The kernel reuses `EINVAL` for several conditions, so the
//! classification is keyed by the [`Operation`] that produced the errno.

use std::fmt;
use std::io;

use crate::types::Operation;

/// Result type for subflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Normalized failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The reply buffer was too small for the kernel's answer.
    BufferTooSmall,
    /// The subflow id does not name an open subflow.
    UnknownSubflow,
    /// The request was rejected as malformed or out of range.
    InvalidArgument,
    /// The caller lacks the privilege for this operation.
    PermissionDenied,
    /// The kernel ran out of memory, descriptors or subflow slots.
    ResourceExhausted,
    /// The socket, option or address family does not support the request.
    Unsupported,
    /// An address record in a kernel buffer could not be decoded.
    MalformedAddress,
    /// A kernel reply was shorter than its own header declared.
    Truncated,
    /// The subflow list kept growing past the configured cap.
    ListOverflow,
    /// An I/O failure that carried no errno.
    Io,
    /// Any errno not listed above.
    Other(i32),
}

impl ErrorKind {
    /// Map a raw errno through the fixed lookup table.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EINVAL => Self::InvalidArgument,
            libc::ENOENT | libc::ESRCH => Self::UnknownSubflow,
            libc::EPERM | libc::EACCES => Self::PermissionDenied,
            libc::ENOMEM
            | libc::ENOBUFS
            | libc::ENOSPC
            | libc::EMFILE
            | libc::ENFILE
            | libc::EAGAIN => Self::ResourceExhausted,
            libc::EOPNOTSUPP | libc::ENOPROTOOPT | libc::EAFNOSUPPORT | libc::EPROTONOSUPPORT => {
                Self::Unsupported
            }
            other => Self::Other(other),
        }
    }

    /// Map a raw errno reported by a specific subflow operation.
    ///
    /// The MPTCP socket API answers `EINVAL` both for a short reply buffer
    /// (when listing) and for an id that names no subflow (every request
    /// that carries an id). Everything else goes through
    /// [`ErrorKind::from_errno`].
    pub fn classify(operation: Operation, errno: i32) -> Self {
        match (operation, Self::from_errno(errno)) {
            (Operation::List, Self::InvalidArgument) => Self::BufferTooSmall,
            (
                Operation::Close
                | Operation::Inspect
                | Operation::GetOption
                | Operation::SetOption,
                Self::InvalidArgument,
            ) => Self::UnknownSubflow,
            (_, kind) => kind,
        }
    }

    /// Short name of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BufferTooSmall => "buffer too small",
            Self::UnknownSubflow => "unknown subflow",
            Self::InvalidArgument => "invalid argument",
            Self::PermissionDenied => "permission denied",
            Self::ResourceExhausted => "resource exhausted",
            Self::Unsupported => "unsupported",
            Self::MalformedAddress => "malformed address",
            Self::Truncated => "truncated reply",
            Self::ListOverflow => "list overflow",
            Self::Io => "I/O error",
            Self::Other(_) => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(errno) => write!(f, "other (errno {errno})"),
            kind => f.write_str(kind.as_str()),
        }
    }
}

/// Errors that can occur during subflow operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error without an errno attached.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The kernel refused a socket option call.
    #[error("{operation}: {message} (errno {errno})")]
    Os {
        /// The operation that failed.
        operation: Operation,
        /// The errno value, unchanged.
        errno: i32,
        /// Classification of `errno` for this operation.
        kind: ErrorKind,
        /// Human-readable error message.
        message: String,
    },

    /// An address record could not be decoded.
    #[error("malformed address at offset {offset}: {reason}")]
    MalformedAddress {
        /// Byte offset of the offending record.
        offset: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Reply was shorter than its header declared.
    #[error("reply truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected reply length.
        expected: usize,
        /// Bytes actually returned.
        actual: usize,
    },

    /// The subflow list never fit within the configured limits.
    #[error("subflow list still too small after {attempts} attempts ({size} bytes)")]
    ListOverflow {
        /// Number of getsockopt calls made.
        attempts: u32,
        /// Buffer size of the last attempt.
        size: usize,
    },

    /// Invalid list negotiation settings.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an OS error for `operation` from a positive errno value.
    pub fn from_errno(operation: Operation, errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(errno).to_string();
        Self::Os {
            operation,
            errno,
            kind: ErrorKind::classify(operation, errno),
            message,
        }
    }

    /// Create an OS error for `operation` from an I/O error.
    ///
    /// Errors that carry no errno are kept as [`Error::Io`].
    pub fn from_io(operation: Operation, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self::from_errno(operation, errno),
            None => Self::Io(err),
        }
    }

    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedAddress {
            offset,
            reason: reason.into(),
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(err) => err
                .raw_os_error()
                .map_or(ErrorKind::Io, ErrorKind::from_errno),
            Self::Os { kind, .. } => *kind,
            Self::MalformedAddress { .. } => ErrorKind::MalformedAddress,
            Self::Truncated { .. } => ErrorKind::Truncated,
            Self::ListOverflow { .. } => ErrorKind::ListOverflow,
            Self::InvalidConfig(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Get the errno value if the kernel reported one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Os { errno, .. } => Some(*errno),
            Self::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }

    /// Check if the subflow id named no open subflow.
    pub fn is_unknown_subflow(&self) -> bool {
        self.kind() == ErrorKind::UnknownSubflow
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        self.kind() == ErrorKind::PermissionDenied
    }

    /// Check if the socket or kernel lacks support for the request.
    ///
    /// This is what a plain TCP socket, or a kernel without the MPTCP
    /// subflow API, reports.
    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::Unsupported
    }

    /// Check if this is a resource exhaustion error, including a list that
    /// exceeded its negotiation cap.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ResourceExhausted | ErrorKind::ListOverflow
        )
    }
}
