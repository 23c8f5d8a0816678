//! Per-thread runtime state
//!
//! ```text
//!            enter_blocked / enter_native
//!   RUNNING ──────────────────────────────► BLOCKED / NATIVE
//!      │  ▲                                        │
//!      │  └──────── leave_blocked (waits out STW) ─┘
//!      │ poll while stop requested
//!      ▼
//!   SUSPENDED ── resume_all ──► RUNNING
//! ```
//!
//! The register snapshot is published before a thread leaves RUNNING and is
//! only meaningful while the thread is not RUNNING.

use crate::error::Result;
use crate::object::ObjRef;
use crate::thread::{ShadowStack, ThreadId};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

/// Execution state of an attached thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ExecState {
    /// Executing managed code, not safe for collection
    Running = 0,
    /// Blocked on a monitor or in `wait`
    Blocked = 1,
    /// Stopped at a safe point
    Suspended = 2,
    /// Executing native code that does not touch the heap
    Native = 3,
}

impl ExecState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ExecState::Blocked,
            2 => ExecState::Suspended,
            3 => ExecState::Native,
            _ => ExecState::Running,
        }
    }

    /// Whether the collector may scan a thread in this state
    #[inline]
    pub fn is_safe(self) -> bool {
        self != ExecState::Running
    }
}

/// Exception state machine of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum UnwindState {
    Normal = 0,
    Unwinding = 1,
    /// Stack exhausted by an uncaught exception, the thread stops
    Terminating = 2,
}

impl UnwindState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => UnwindState::Unwinding,
            2 => UnwindState::Terminating,
            _ => UnwindState::Normal,
        }
    }
}

/// Native stack range of a thread, `low..high`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackBounds {
    pub low: usize,
    pub high: usize,
}

impl StackBounds {
    /// Bounds of a thread whose stack is not scanned conservatively
    pub const fn unknown() -> Self {
        Self { low: 0, high: 0 }
    }

    /// Create bounds, `InvalidArgument` when `low > high`
    pub fn new(low: usize, high: usize) -> Result<Self> {
        if low > high {
            return Err(crate::error::VmError::InvalidArgument(format!(
                "stack bounds {:#x}..{:#x} are inverted",
                low, high
            )));
        }
        Ok(Self { low, high })
    }

    pub fn is_known(&self) -> bool {
        self.high > self.low
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.low && addr < self.high
    }

    /// Stack bounds of the calling thread
    #[cfg(target_os = "linux")]
    pub fn for_current_thread() -> Self {
        // SAFETY: attr is initialized by pthread_getattr_np before use and
        // destroyed exactly once.
        unsafe {
            let mut attr: libc::pthread_attr_t = std::mem::zeroed();
            if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
                return Self::unknown();
            }

            let mut addr: *mut libc::c_void = std::ptr::null_mut();
            let mut size: libc::size_t = 0;
            let rc = libc::pthread_attr_getstack(&attr, &mut addr, &mut size);
            libc::pthread_attr_destroy(&mut attr);

            if rc != 0 {
                return Self::unknown();
            }

            let low = addr as usize;
            Self {
                low,
                high: low + size,
            }
        }
    }

    /// Stack bounds of the calling thread
    #[cfg(target_os = "macos")]
    pub fn for_current_thread() -> Self {
        // SAFETY: both calls only read the calling thread's attributes
        unsafe {
            let thread = libc::pthread_self();
            let high = libc::pthread_get_stackaddr_np(thread) as usize;
            let size = libc::pthread_get_stacksize_np(thread);
            Self {
                low: high - size,
                high,
            }
        }
    }

    /// Stack bounds of the calling thread
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    pub fn for_current_thread() -> Self {
        Self::unknown()
    }
}

/// Saved machine state of a thread that left RUNNING
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegisterSnapshot {
    /// Managed PC of the top frame
    pub pc: usize,
    /// Native stack pointer
    pub sp: usize,
    /// Native frame pointer
    pub fp: usize,
}

impl RegisterSnapshot {
    /// Capture the caller's stack and frame pointer
    #[inline(never)]
    pub fn capture(pc: usize) -> Self {
        Self {
            pc,
            sp: approximate_stack_pointer(),
            fp: frame_pointer(),
        }
    }
}

/// Current stack pointer using inline assembly
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn approximate_stack_pointer() -> usize {
    let sp: usize;
    unsafe {
        std::arch::asm!(
            "mov {}, rsp",
            out(reg) sp,
            options(nomem, nostack, preserves_flags)
        );
    }
    sp
}

/// Current stack pointer using inline assembly
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn approximate_stack_pointer() -> usize {
    let sp: usize;
    unsafe {
        std::arch::asm!(
            "mov {}, sp",
            out(reg) sp,
            options(nomem, nostack, preserves_flags)
        );
    }
    sp
}

/// Current stack pointer (address of a local on unsupported architectures)
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(never)]
pub fn approximate_stack_pointer() -> usize {
    let marker = 0usize;
    std::hint::black_box(&marker) as *const usize as usize
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn frame_pointer() -> usize {
    let fp: usize;
    unsafe {
        std::arch::asm!(
            "mov {}, rbp",
            out(reg) fp,
            options(nomem, nostack, preserves_flags)
        );
    }
    fp
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
fn frame_pointer() -> usize {
    let fp: usize;
    unsafe {
        std::arch::asm!(
            "mov {}, x29",
            out(reg) fp,
            options(nomem, nostack, preserves_flags)
        );
    }
    fp
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn frame_pointer() -> usize {
    0
}

/// Runtime state of one attached thread
pub struct ThreadContext {
    id: ThreadId,
    name: Option<String>,
    state: AtomicU8,
    unwind_state: AtomicU8,
    bounds: StackBounds,
    registers: Mutex<Option<RegisterSnapshot>>,
    pending_exception: Mutex<Option<ObjRef>>,
    uncaught: Mutex<Option<ObjRef>>,
    stack: Mutex<ShadowStack>,
}

impl ThreadContext {
    /// Create a context in RUNNING / NORMAL state
    ///
    /// # Arguments
    /// * `id` - Registry-assigned id
    /// * `name` - Optional diagnostic name
    /// * `bounds` - Native stack range used for conservative scanning
    /// * `max_frames` - Shadow stack depth limit
    pub fn new(id: ThreadId, name: Option<String>, bounds: StackBounds, max_frames: usize) -> Self {
        Self {
            id,
            name,
            state: AtomicU8::new(ExecState::Running as u8),
            unwind_state: AtomicU8::new(UnwindState::Normal as u8),
            bounds,
            registers: Mutex::new(None),
            pending_exception: Mutex::new(None),
            uncaught: Mutex::new(None),
            stack: Mutex::new(ShadowStack::new(max_frames)),
        }
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn state(&self) -> ExecState {
        ExecState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ExecState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    #[inline]
    pub fn unwind_state(&self) -> UnwindState {
        UnwindState::from_u8(self.unwind_state.load(Ordering::Acquire))
    }

    pub(crate) fn set_unwind_state(&self, state: UnwindState) {
        self.unwind_state.store(state as u8, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.unwind_state() == UnwindState::Terminating
    }

    pub fn stack_bounds(&self) -> StackBounds {
        self.bounds
    }

    /// Saved registers, present while the thread is not RUNNING
    pub fn registers(&self) -> Option<RegisterSnapshot> {
        *self.registers.lock()
    }

    pub(crate) fn publish_registers(&self, snapshot: RegisterSnapshot) {
        *self.registers.lock() = Some(snapshot);
    }

    pub(crate) fn clear_registers(&self) {
        *self.registers.lock() = None;
    }

    /// In-flight exception, if any
    pub fn pending_exception(&self) -> Option<ObjRef> {
        *self.pending_exception.lock()
    }

    /// Replace the in-flight exception, returning the previous one
    pub(crate) fn set_pending_exception(&self, exception: Option<ObjRef>) -> Option<ObjRef> {
        std::mem::replace(&mut *self.pending_exception.lock(), exception)
    }

    /// Exception that terminated this thread
    pub fn uncaught_exception(&self) -> Option<ObjRef> {
        *self.uncaught.lock()
    }

    pub(crate) fn set_uncaught_exception(&self, exception: ObjRef) {
        *self.uncaught.lock() = Some(exception);
    }

    /// Lock the shadow stack
    ///
    /// Never hold the guard across a safepoint poll.
    pub fn stack(&self) -> MutexGuard<'_, ShadowStack> {
        self.stack.lock()
    }

    /// Managed PC of the top frame, 0 with an empty stack
    pub fn current_pc(&self) -> usize {
        self.stack.lock().top().map_or(0, |frame| frame.pc)
    }
}

impl std::fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("unwind_state", &self.unwind_state())
            .finish()
    }
}
