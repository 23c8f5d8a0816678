//! Unwind Module - Exceptions, stack unwinding and trap translation
//!
//! - `metadata` - per-method try regions and trap sites
//! - `exception` - exceptions the core synthesizes and the uncaught sink
//! - `engine` - the throw/unwind state machine
//! - `trap` - hardware fault translation into `throw`

pub mod engine;
pub mod exception;
pub mod metadata;
pub mod trap;

pub use engine::{Landing, UnwindEngine, UnwindOutcome};
pub use exception::{
    ExceptionFactory, ExceptionKind, HeapExceptionFactory, LogUncaughtHandler, UncaughtExceptionHandler,
};
pub use metadata::{CodeMetadata, MethodId, MethodInfo, MethodTable, Pc, PcRange, TryRegion};
pub use trap::{
    deliver_trap, is_translatable, register_trap_handler, unregister_trap_handler, TrapContext, TrapHandler,
    TrapSignal, TrapTranslator,
};
