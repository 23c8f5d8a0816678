//! Aura Runtime Library
//!
//! C ABI over `aura-core` for compiled managed code:
//! - Runtime initialization and method registration
//! - Thread attach/detach and shadow frames
//! - Monitor enter/exit, wait and notify
//! - Throw and hardware trap entry points
//! - Stop-the-world control for the collector

mod ffi;

pub use ffi::*;
