//! Error Module - Aura VM Error Types
//!
//! Defines all error types used by the execution core.
//!
//! # Error Categories
//!
//! ## Recoverable (surface as managed exceptions)
//! - `IllegalMonitorState` - release/wait/notify by a thread that does not own the monitor
//! - `MonitorRecordExhaustion` - the monitor side table is full at an inflation site
//! - `StackOverflow` - the shadow call stack reached its configured depth
//!
//! ## Thread-terminating
//! - `UncaughtException` - unwinding exhausted the stack
//! - `ThreadTerminated` - operation on a thread that already terminated
//!
//! ## Fatal
//! - `UnrecognizedTrap` - hardware fault at a PC the metadata does not cover
//!
//! ## Runtime misuse
//! - `ThreadNotAttached`, `InvalidState`, `InvalidArgument`, `Configuration`,
//!   `SafepointTimeout`, `Internal`

use crate::thread::ThreadId;
use crate::unwind::ExceptionKind;
use thiserror::Error;

/// Main error type for all execution core operations
///
/// # Examples
///
/// ```rust
/// use aura_core::error::VmError;
/// use aura_core::unwind::ExceptionKind;
///
/// fn surface(err: &VmError) -> Option<ExceptionKind> {
///     // Recoverable faults become managed exceptions
///     err.exception_kind()
/// }
///
/// let err = VmError::MonitorRecordExhaustion { capacity: 16 };
/// assert_eq!(surface(&err), Some(ExceptionKind::OutOfMemory));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Monitor operation by a thread that does not own the monitor
    ///
    /// **When returned:** `release`, `wait`, `notify` or `notify_all` called by a
    /// non-owner, or `release` called more times than `acquire`
    ///
    /// **Recovery strategy:** Raised as IllegalMonitorStateException in the caller
    #[error("Illegal monitor state: thread {thread} does not own the monitor of object {object:#x}")]
    IllegalMonitorState { thread: ThreadId, object: usize },

    /// Monitor side table is full
    ///
    /// **When returned:** Inflation needs a new record but all slots are in use
    ///
    /// **Recovery strategy:** Raised as OutOfMemoryError at the inflation site
    #[error("Monitor record exhaustion: all {capacity} monitor records are in use")]
    MonitorRecordExhaustion { capacity: usize },

    /// Hardware trap at a PC that is not marked translatable
    ///
    /// **When returned:** The trap handler cannot map the faulting PC to an exception
    ///
    /// **Recovery strategy:** None. Register and stack state cannot be trusted,
    /// the process must abort without unwinding.
    #[error("Unrecognized {signal} trap at pc {pc:#x} (fault address {fault_address:#x})")]
    UnrecognizedTrap {
        signal: String,
        pc: usize,
        fault_address: usize,
    },

    /// Exception reached the outermost frame without a handler
    #[error("Uncaught exception {exception:#x} terminated thread {thread}")]
    UncaughtException { thread: ThreadId, exception: usize },

    /// Thread id is not (or no longer) registered
    #[error("Thread {0} is not attached to the runtime")]
    ThreadNotAttached(ThreadId),

    /// Thread already stopped after an uncaught exception
    #[error("Thread {0} has terminated")]
    ThreadTerminated(ThreadId),

    /// Shadow stack depth limit reached
    ///
    /// **Recovery strategy:** Raised as StackOverflowError in the caller
    #[error("Stack overflow: frame depth limit {limit} reached")]
    StackOverflow { limit: usize },

    /// Stop-the-world request could not be satisfied in time
    ///
    /// **Recovery strategy:** The request is rolled back, retry later
    #[error("Safepoint timeout: {pending} thread(s) did not reach a safepoint within {timeout_ms}ms")]
    SafepointTimeout { pending: usize, timeout_ms: u64 },

    /// Invalid state
    ///
    /// **Example scenario:** `resume_all` without a pending stop-the-world
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error - indicates a bug in the core
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VmError {
    /// Managed exception this error is surfaced as, if it is recoverable
    pub fn exception_kind(&self) -> Option<ExceptionKind> {
        match self {
            VmError::IllegalMonitorState { .. } => Some(ExceptionKind::IllegalMonitorState),
            VmError::MonitorRecordExhaustion { .. } => Some(ExceptionKind::OutOfMemory),
            VmError::StackOverflow { .. } => Some(ExceptionKind::StackOverflow),
            _ => None,
        }
    }

    /// Check if this error is recoverable by managed code
    pub fn is_recoverable(&self) -> bool {
        self.exception_kind().is_some()
    }

    /// Check if this error requires the process to abort
    pub fn is_fatal(&self) -> bool {
        matches!(self, VmError::UnrecognizedTrap { .. })
    }

    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(self, VmError::InvalidState { .. } | VmError::Internal(_))
    }

    pub(crate) fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        VmError::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type alias for execution core operations
pub type Result<T> = std::result::Result<T, VmError>;
