//! # Aura Core - Monitors, Unwinding and Safepoints
//!
//! The execution core of the Aura VM: the subsystem that gives every managed
//! object a synchronizable identity and gives every thread GC-safe recovery
//! from faults, whether raised by an explicit `throw` or by a hardware trap.
//!
//! ## Overview
//!
//! - **Object monitors**: thin locks in the object header updated by CAS,
//!   inflated into a side-table record under contention or `wait`
//! - **Exception unwinding**: shadow-stack walk with try-region matching,
//!   releasing the monitors of abandoned frames
//! - **Trap translation**: null dereference, divide-by-zero and stack
//!   overflow faults re-enter the same unwind path
//! - **Safepoints**: stop-the-world with cooperative polls; blocked and native
//!   threads count as safe
//! - **Root enumeration**: precise per-thread roots plus an optional
//!   conservative scan of suspended native stacks
//!
//! ## Quick Start
//!
//! ```rust
//! use aura_core::object::builtin;
//!
//! fn main() -> Result<(), aura_core::VmError> {
//!     let runtime = aura_core::init()?;
//!     let ctx = runtime.attach(Some("main"))?;
//!
//!     let obj = runtime.allocate(builtin::OBJECT)?;
//!     runtime.monitor_enter(&ctx, obj)?;
//!     assert!(runtime.holds_lock(&ctx, obj));
//!     runtime.monitor_exit(&ctx, obj)?;
//!
//!     runtime.detach(&ctx)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Compiled managed code                     │
//! │   enter/exit   wait/notify   throw   push/pop frame       │
//! └──────┬───────────────┬──────────┬──────────┬──────────────┘
//!        ▼               ▼          ▼          ▼
//! ┌─────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │  Monitors   │◄─│  Unwind engine   │◄─│ Trap translator  │
//! │ thin/inflated│  │ regions, locks   │  │ fault → throw    │
//! └──────┬──────┘  └────────┬─────────┘  └──────────────────┘
//!        │                  │
//!        ▼                  ▼
//! ┌──────────────────────────────────────┐   ┌────────────────┐
//! │ Safepoint coordinator                │──►│ Thread registry│
//! │ stop-the-world, resume, deflation    │   └────────────────┘
//! └──────────────────────────────────────┘
//! ```
//!
//! ## Lock order
//!
//! monitor record → coordinator → registry. The unwinder may hold its own
//! shadow stack while taking a record lock. Nothing polls for a safepoint
//! while holding a shadow stack or record lock.

pub mod config;
pub mod error;
pub mod logging;
pub mod stats;

// Object model and threads
pub mod object;
pub mod thread;

// Synchronization and control flow
pub mod monitor;
pub mod safepoint;
pub mod unwind;

// Collector interface
pub mod roots;
pub mod runtime;

// Utilities
pub mod util;

pub use config::VmConfig;
pub use error::{Result, VmError};
pub use monitor::{MonitorState, WaitStatus};
pub use object::{ObjRef, TypeId};
pub use roots::{Root, RootKind};
pub use runtime::{Completion, Runtime, RuntimeBuilder};
pub use thread::{ThreadContext, ThreadId};

/// Aura core version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize a runtime with the default configuration
///
/// # Examples
///
/// ```rust
/// let runtime = aura_core::init()?;
/// assert_eq!(runtime.registry().len(), 0);
/// # Ok::<(), aura_core::VmError>(())
/// ```
pub fn init() -> Result<Runtime> {
    runtime::init::init_default()
}

/// Initialize a runtime with a custom configuration
///
/// # Examples
///
/// ```rust
/// let config = aura_core::VmConfig {
///     max_monitors: 1024,
///     spin_limit: 0,
///     ..Default::default()
/// };
///
/// let runtime = aura_core::init_with_config(config)?;
/// # Ok::<(), aura_core::VmError>(())
/// ```
pub fn init_with_config(config: VmConfig) -> Result<Runtime> {
    runtime::init::init_with_config(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_default() {
        assert!(init().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(VmConfig::default().validate().is_ok());
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
