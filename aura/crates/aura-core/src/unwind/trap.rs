//! Hardware trap translation
//!
//! The embedder's fault handler (see `aura-runtime`) hands the faulting PC,
//! fault address and signal to `deliver_trap`. The translator checks the PC
//! against the code metadata, synthesizes the exception the PC maps to and
//! re-enters `throw` with the faulting PC as the starting frame.
//!
//! A fault inside the guard zone below a thread's stack is a stack overflow
//! regardless of the PC's trap table. A fault at any other PC the metadata
//! does not mark translatable is unrecoverable.

use crate::error::{Result, VmError};
use crate::logging::{VmEvent, VmLogger};
use crate::stats::VmStats;
use crate::thread::{Frame, ThreadContext};
use crate::unwind::engine::{UnwindEngine, UnwindOutcome};
use crate::unwind::exception::ExceptionKind;
use crate::unwind::metadata::{CodeMetadata, Pc};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Signals that may carry a translatable fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapSignal {
    Segv,
    Bus,
    Fpe,
    Ill,
}

impl TrapSignal {
    /// Map a raw signal number
    #[cfg(unix)]
    pub fn from_signal(signal: i32) -> Option<Self> {
        match signal {
            libc::SIGSEGV => Some(TrapSignal::Segv),
            libc::SIGBUS => Some(TrapSignal::Bus),
            libc::SIGFPE => Some(TrapSignal::Fpe),
            libc::SIGILL => Some(TrapSignal::Ill),
            _ => None,
        }
    }

    #[cfg(not(unix))]
    pub fn from_signal(_signal: i32) -> Option<Self> {
        None
    }

    pub fn name(self) -> &'static str {
        match self {
            TrapSignal::Segv => "SIGSEGV",
            TrapSignal::Bus => "SIGBUS",
            TrapSignal::Fpe => "SIGFPE",
            TrapSignal::Ill => "SIGILL",
        }
    }

    fn is_memory_fault(self) -> bool {
        matches!(self, TrapSignal::Segv | TrapSignal::Bus)
    }
}

impl fmt::Display for TrapSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Register state delivered with a trap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapContext {
    pub signal: TrapSignal,
    /// Faulting instruction
    pub pc: Pc,
    /// Faulting data address, 0 when not applicable
    pub fault_address: usize,
    /// Native stack pointer at the fault
    pub sp: usize,
}

impl TrapContext {
    pub fn new(signal: TrapSignal, pc: Pc, fault_address: usize, sp: usize) -> Self {
        Self {
            signal,
            pc,
            fault_address,
            sp,
        }
    }

    fn unrecognized(&self) -> VmError {
        VmError::UnrecognizedTrap {
            signal: self.signal.name().to_string(),
            pc: self.pc,
            fault_address: self.fault_address,
        }
    }
}

/// Receiver of hardware traps for attached threads
pub trait TrapHandler: Send + Sync {
    /// Translate `trap` raised on `ctx` and unwind
    ///
    /// # Returns
    /// `UnrecognizedTrap` if the fault cannot be translated; the caller must
    /// abort the process without unwinding
    fn handle_trap(&self, ctx: &ThreadContext, trap: &TrapContext) -> Result<UnwindOutcome>;

    fn is_translatable(&self, pc: Pc) -> bool;
}

lazy_static! {
    static ref TRAP_HANDLER: RwLock<Option<Arc<dyn TrapHandler>>> = RwLock::new(None);
}

/// Install the process-wide trap handler, returning the previous one
pub fn register_trap_handler(handler: Arc<dyn TrapHandler>) -> Option<Arc<dyn TrapHandler>> {
    TRAP_HANDLER.write().replace(handler)
}

/// Remove the process-wide trap handler
pub fn unregister_trap_handler() -> Option<Arc<dyn TrapHandler>> {
    TRAP_HANDLER.write().take()
}

/// Check the installed handler for a translatable `pc`
pub fn is_translatable(pc: Pc) -> bool {
    TRAP_HANDLER
        .read()
        .as_ref()
        .map_or(false, |handler| handler.is_translatable(pc))
}

/// Hand a trap to the installed handler
///
/// # Returns
/// `UnrecognizedTrap` when no handler is installed
pub fn deliver_trap(ctx: &ThreadContext, trap: &TrapContext) -> Result<UnwindOutcome> {
    let handler = TRAP_HANDLER.read().clone();
    match handler {
        Some(handler) => handler.handle_trap(ctx, trap),
        None => Err(trap.unrecognized()),
    }
}

/// Maps traps to exceptions using code metadata
pub struct TrapTranslator {
    metadata: Arc<dyn CodeMetadata>,
    guard_size: usize,
    stats: Arc<VmStats>,
    logger: Arc<VmLogger>,
}

impl TrapTranslator {
    /// Create a translator
    ///
    /// # Arguments
    /// * `guard_pages` - Pages below each stack treated as the overflow guard
    pub fn new(metadata: Arc<dyn CodeMetadata>, guard_pages: usize, stats: Arc<VmStats>, logger: Arc<VmLogger>) -> Self {
        Self {
            metadata,
            guard_size: guard_pages * page_size::get(),
            stats,
            logger,
        }
    }

    pub fn is_translatable(&self, pc: Pc) -> bool {
        self.metadata.is_translatable(pc)
    }

    /// Size in bytes of the stack guard zone
    pub fn guard_size(&self) -> usize {
        self.guard_size
    }

    fn in_guard_zone(&self, ctx: &ThreadContext, addr: usize) -> bool {
        let bounds = ctx.stack_bounds();
        bounds.is_known() && addr < bounds.low && addr >= bounds.low.saturating_sub(self.guard_size)
    }

    /// Exception kind `trap` translates to
    pub fn classify(&self, ctx: &ThreadContext, trap: &TrapContext) -> Result<ExceptionKind> {
        if self.metadata.method_at(trap.pc).is_none() {
            return Err(trap.unrecognized());
        }

        if trap.signal.is_memory_fault() && self.in_guard_zone(ctx, trap.fault_address) {
            return Ok(ExceptionKind::StackOverflow);
        }

        match self.metadata.trap_kind(trap.pc) {
            Some(kind) if kind.accepts(trap.signal) => Ok(kind),
            _ => Err(trap.unrecognized()),
        }
    }

    /// Translate `trap` into an exception and unwind from the faulting PC
    pub fn translate(&self, engine: &UnwindEngine, ctx: &ThreadContext, trap: &TrapContext) -> Result<UnwindOutcome> {
        let kind = match self.classify(ctx, trap) {
            Ok(kind) => kind,
            Err(err) => {
                self.logger.log(VmEvent::FatalTrap {
                    signal: trap.signal.name().to_string(),
                    pc: trap.pc,
                    fault_address: trap.fault_address,
                });
                return Err(err);
            },
        };
        let exception = engine.factory().create(kind)?;

        {
            let mut stack = ctx.stack();
            let method = self.metadata.method_at(trap.pc).map(|method| method.id());
            let in_top = match (stack.top(), method) {
                (Some(top), Some(method)) => top.method == method,
                _ => false,
            };
            if in_top {
                if let Some(top) = stack.top_mut() {
                    top.pc = trap.pc;
                }
            } else if let Some(method) = method {
                // Fault in a leaf that never pushed a frame
                stack.push_trap_frame(Frame::new(method, trap.pc, trap.sp))?;
            }
        }

        self.stats.record_trap();
        self.logger.log(VmEvent::TrapTranslated {
            thread: ctx.id().as_u32(),
            signal: trap.signal.name().to_string(),
            pc: trap.pc,
            kind: kind.name().to_string(),
        });

        engine.throw(ctx, exception)
    }
}
