//! Util Module - Shared Utilities
//!
//! Utilities and helper functions used throughout the execution core.

pub mod atomic;

pub use atomic::AtomicUtils;

/// Constants for the execution core
pub mod constants {
    /// Reserved shadow frames beyond the configured limit
    ///
    /// Trap translation may need to push a reconstructed frame on a stack
    /// that just overflowed.
    pub const TRAP_FRAME_RESERVE: usize = 4;

    /// Default maximum number of retained runtime events
    pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

    /// Word size of the host
    pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

    /// Object header alignment
    pub const OBJECT_ALIGNMENT: usize = 8;
}
