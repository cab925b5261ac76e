use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic, ReadExecutor};

/// Error kinds for ostx operations
///
/// The first four variants are the transaction taxonomy: two of them describe contention
/// (the caller should retry the whole transaction), one describes a fault after the point of
/// no return and one a malformed encoded payload. The remaining variants describe misuse or
/// plain I/O failures of the wrapped primitives.
///
/// # Examples
///
/// ```rust
/// use ostx::errors::{ErrorKind, OstxError, OstxResult};
///
/// fn example() -> OstxResult<()> {
///     Err(OstxError::new("descriptor is locked", ErrorKind::ResourceBusy))
/// }
///
/// assert!(example().unwrap_err().kind().is_retryable());
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Contention - retry the transaction
    /// A resource lock could not be acquired within the configured timeout
    ResourceBusy,
    /// A concurrently committed transaction invalidated a snapshot
    ValidationConflict,

    // Faults
    /// Apply or undo failed for a reason unrelated to contention
    ModuleInternalError,
    /// Encoded payload is malformed
    DecodingError,

    // Misuse - do not retry
    /// The operation is not valid in the current transaction phase
    InvalidOperation,
    /// The referenced descriptor or resource is unknown to the transaction
    NotFound,
    /// Configuration value rejected
    InvalidConfig,

    // IO
    /// Error reported by the operating system
    IOError,

    /// Error in event processing
    EventError,

    /// Internal error (usually indicates a bug)
    InternalError,
}

impl ErrorKind {
    /// Returns `true` when the failure was caused by contention and the whole transaction
    /// may be run again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ResourceBusy | ErrorKind::ValidationConflict)
    }

    /// Stable numeric code used when no operating system error code is available.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::ResourceBusy => 1001,
            ErrorKind::ValidationConflict => 1002,
            ErrorKind::ModuleInternalError => 1003,
            ErrorKind::DecodingError => 1004,
            ErrorKind::InvalidOperation => 1005,
            ErrorKind::NotFound => 1006,
            ErrorKind::InvalidConfig => 1007,
            ErrorKind::IOError => 1008,
            ErrorKind::EventError => 1009,
            ErrorKind::InternalError => 1010,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ResourceBusy => write!(f, "Resource busy"),
            ErrorKind::ValidationConflict => write!(f, "Validation conflict"),
            ErrorKind::ModuleInternalError => write!(f, "Module internal error"),
            ErrorKind::DecodingError => write!(f, "Decoding error"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::InvalidConfig => write!(f, "Invalid configuration"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom ostx error type.
///
/// `OstxError` carries a message, an [`ErrorKind`], an optional cause, the raw operating
/// system error code when the failure came from the OS, and a backtrace captured at creation.
///
/// # Examples
///
/// ```rust
/// use ostx::errors::{ErrorKind, OstxError};
///
/// let cause = OstxError::new("write failed", ErrorKind::IOError);
/// let err = OstxError::new_with_cause("apply failed", ErrorKind::ModuleInternalError, cause);
/// assert!(err.cause().is_some());
/// ```
#[derive(Clone)]
pub struct OstxError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<OstxError>>,
    os_code: Option<i32>,
    backtrace: Atomic<Backtrace>,
}

impl OstxError {
    /// Creates a new `OstxError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        OstxError {
            message: message.to_string(),
            error_kind,
            cause: None,
            os_code: None,
            backtrace: atomic(Backtrace::new_unresolved()),
        }
    }

    /// Creates a new `OstxError` with a cause error.
    ///
    /// The OS error code of the cause, if any, is carried over so that callers see the same
    /// code as the non-transactional primitive would have reported.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: OstxError) -> Self {
        OstxError {
            message: message.to_string(),
            error_kind,
            os_code: cause.os_code,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new_unresolved()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&OstxError> {
        self.cause.as_deref()
    }

    /// Raw operating system error code, when the error originated in a system call.
    pub fn os_code(&self) -> Option<i32> {
        self.os_code
    }

    /// Numeric code reported in `AbortReason::ModuleError`.
    pub fn code(&self) -> i32 {
        self.os_code.unwrap_or_else(|| self.error_kind.code())
    }

    pub fn is_retryable(&self) -> bool {
        self.error_kind.is_retryable()
    }
}

impl Display for OstxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for OstxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => {
                let backtrace = self.backtrace.read_with(|bt| {
                    let mut bt = bt.clone();
                    bt.resolve();
                    bt
                });
                write!(f, "{}\n{:?}", self.message, backtrace)
            }
        }
    }
}

impl Error for OstxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for ostx operations.
pub type OstxResult<T> = Result<T, OstxError>;

impl From<std::io::Error> for OstxError {
    fn from(err: std::io::Error) -> Self {
        let error_kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::WouldBlock => ErrorKind::ResourceBusy,
            _ => ErrorKind::IOError,
        };
        let mut error = OstxError::new(&format!("IO error: {}", err), error_kind);
        error.os_code = err.raw_os_error();
        error
    }
}

impl From<std::fmt::Error> for OstxError {
    fn from(err: std::fmt::Error) -> Self {
        OstxError::new(
            &format!("Formatting error: {}", err),
            ErrorKind::InternalError,
        )
    }
}

impl From<String> for OstxError {
    fn from(msg: String) -> Self {
        OstxError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for OstxError {
    fn from(msg: &str) -> Self {
        OstxError::new(msg, ErrorKind::InternalError)
    }
}
