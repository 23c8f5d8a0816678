//! Exceptions synthesized by the core and the uncaught-exception sink

use crate::error::Result;
use crate::object::{builtin, ObjRef, ObjectSpace, TypeId};
use crate::thread::ThreadId;
use crate::unwind::trap::TrapSignal;
use serde::Serialize;
use std::sync::Arc;

/// Exceptions the core raises on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExceptionKind {
    NullPointer,
    Arithmetic,
    StackOverflow,
    IllegalMonitorState,
    OutOfMemory,
}

impl ExceptionKind {
    /// Built-in type of the synthesized exception
    pub fn type_id(self) -> TypeId {
        match self {
            ExceptionKind::NullPointer => builtin::NULL_POINTER_EXCEPTION,
            ExceptionKind::Arithmetic => builtin::ARITHMETIC_EXCEPTION,
            ExceptionKind::StackOverflow => builtin::STACK_OVERFLOW_ERROR,
            ExceptionKind::IllegalMonitorState => builtin::ILLEGAL_MONITOR_STATE_EXCEPTION,
            ExceptionKind::OutOfMemory => builtin::OUT_OF_MEMORY_ERROR,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::NullPointer => "NullPointerException",
            ExceptionKind::Arithmetic => "ArithmeticException",
            ExceptionKind::StackOverflow => "StackOverflowError",
            ExceptionKind::IllegalMonitorState => "IllegalMonitorStateException",
            ExceptionKind::OutOfMemory => "OutOfMemoryError",
        }
    }

    /// Check if a trap delivered as `signal` can translate to this kind
    pub fn accepts(self, signal: TrapSignal) -> bool {
        match self {
            ExceptionKind::NullPointer => matches!(signal, TrapSignal::Segv | TrapSignal::Bus),
            ExceptionKind::Arithmetic => signal == TrapSignal::Fpe,
            ExceptionKind::StackOverflow => matches!(signal, TrapSignal::Segv | TrapSignal::Bus),
            ExceptionKind::IllegalMonitorState | ExceptionKind::OutOfMemory => false,
        }
    }
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Allocates exception objects for synthesized exceptions
pub trait ExceptionFactory: Send + Sync {
    fn create(&self, kind: ExceptionKind) -> Result<ObjRef>;

    /// Instances allocated ahead of time, which must survive every collection
    fn reserved(&self) -> Vec<ObjRef> {
        Vec::new()
    }
}

/// Factory allocating from an `ObjectSpace`
///
/// The OutOfMemoryError instance is allocated up front, since the situations
/// that raise it are exactly those where allocation may fail.
pub struct HeapExceptionFactory {
    space: Arc<ObjectSpace>,
    out_of_memory: ObjRef,
}

impl HeapExceptionFactory {
    pub fn new(space: Arc<ObjectSpace>) -> Result<Self> {
        let out_of_memory = space.allocate(ExceptionKind::OutOfMemory.type_id())?;
        Ok(Self {
            space,
            out_of_memory,
        })
    }

    /// The preallocated OutOfMemoryError
    pub fn out_of_memory(&self) -> ObjRef {
        self.out_of_memory
    }
}

impl ExceptionFactory for HeapExceptionFactory {
    fn create(&self, kind: ExceptionKind) -> Result<ObjRef> {
        match kind {
            ExceptionKind::OutOfMemory => Ok(self.out_of_memory),
            _ => self.space.allocate(kind.type_id()).or_else(|err| {
                log::warn!("Allocating {} failed ({}), raising OutOfMemoryError", kind, err);
                Ok(self.out_of_memory)
            }),
        }
    }

    fn reserved(&self) -> Vec<ObjRef> {
        vec![self.out_of_memory]
    }
}

/// Diagnostics sink for exceptions that terminate a thread
pub trait UncaughtExceptionHandler: Send + Sync {
    fn report_uncaught(&self, exception: ObjRef, thread: ThreadId);
}

/// Reports uncaught exceptions through the `log` facade
#[derive(Debug, Default)]
pub struct LogUncaughtHandler;

impl UncaughtExceptionHandler for LogUncaughtHandler {
    fn report_uncaught(&self, exception: ObjRef, thread: ThreadId) {
        log::error!(
            "Exception {} (type {}) terminated thread {}",
            exception,
            exception.type_id().0,
            thread
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{TypeHierarchy, TypeRegistry};

    #[test]
    fn test_kinds_are_throwables() {
        let types = TypeRegistry::with_builtins();
        for kind in [
            ExceptionKind::NullPointer,
            ExceptionKind::Arithmetic,
            ExceptionKind::StackOverflow,
            ExceptionKind::IllegalMonitorState,
            ExceptionKind::OutOfMemory,
        ] {
            assert!(types.is_ancestor(builtin::THROWABLE, kind.type_id()), "{}", kind);
        }
    }

    #[test]
    fn test_signal_acceptance() {
        assert!(ExceptionKind::NullPointer.accepts(TrapSignal::Segv));
        assert!(!ExceptionKind::NullPointer.accepts(TrapSignal::Fpe));
        assert!(ExceptionKind::Arithmetic.accepts(TrapSignal::Fpe));
        assert!(!ExceptionKind::OutOfMemory.accepts(TrapSignal::Segv));
    }

    #[test]
    fn test_factory_reuses_out_of_memory() {
        let space = Arc::new(ObjectSpace::with_capacity(2));
        let factory = HeapExceptionFactory::new(space.clone()).unwrap();

        let npe = factory.create(ExceptionKind::NullPointer).unwrap();
        assert_eq!(npe.type_id(), builtin::NULL_POINTER_EXCEPTION);

        // Space is full now, every kind degrades to the preallocated error
        let degraded = factory.create(ExceptionKind::Arithmetic).unwrap();
        assert_eq!(degraded, factory.out_of_memory());
        assert_eq!(factory.create(ExceptionKind::OutOfMemory).unwrap(), factory.out_of_memory());
        assert_eq!(factory.reserved(), vec![factory.out_of_memory()]);
    }
}
