//! Runtime Module - Execution core facade
//!
//! `Runtime` owns every subsystem and exposes the operations compiled code
//! calls into: monitor enter/exit, wait/notify, throw, trap delivery, shadow
//! frame maintenance, and the collector-facing stop-the-world, resume and
//! root enumeration.
//!
//! Recoverable faults (illegal monitor state, monitor table exhaustion,
//! shadow stack overflow) never escape as `Err`: they are turned into the
//! matching exception and thrown, and the caller receives a `Completion`
//! telling it where execution continues.

pub mod init;

pub use init::RuntimeBuilder;

use crate::config::VmConfig;
use crate::error::{Result, VmError};
use crate::logging::{VmEvent, VmLogger};
use crate::monitor::{MonitorState, Monitors, WaitStatus};
use crate::object::{ObjRef, ObjectSpace, TypeId};
use crate::roots::{Root, RootScanner};
use crate::safepoint::{SafepointCoordinator, SafepointSummary};
use crate::stats::{metrics::VmMetrics, VmStats};
use crate::thread::{Frame, StackBounds, ThreadContext, ThreadId, ThreadRegistry};
use crate::unwind::{
    ExceptionKind, Landing, MethodId, Pc, TrapContext, TrapHandler, TrapTranslator, UnwindEngine, UnwindOutcome,
};
use std::sync::Arc;
use std::time::Duration;

/// How a runtime operation completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<T = ()> {
    /// Operation succeeded, continue after the call site
    Normal(T),
    /// An exception was raised and caught, continue at the handler
    Handler(Landing),
    /// An exception was raised and not caught, the thread must stop
    Terminated { exception: ObjRef },
}

impl<T> Completion<T> {
    pub fn is_normal(&self) -> bool {
        matches!(self, Completion::Normal(_))
    }

    /// Value of a normal completion
    pub fn normal(self) -> Option<T> {
        match self {
            Completion::Normal(value) => Some(value),
            _ => None,
        }
    }

    /// Landing of a caught exception
    pub fn landing(&self) -> Option<&Landing> {
        match self {
            Completion::Handler(landing) => Some(landing),
            _ => None,
        }
    }
}

impl<T> From<UnwindOutcome> for Completion<T> {
    fn from(outcome: UnwindOutcome) -> Self {
        match outcome {
            UnwindOutcome::Caught(landing) => Completion::Handler(landing),
            UnwindOutcome::Uncaught { exception } => Completion::Terminated { exception },
        }
    }
}

/// Execution core runtime
///
/// # Examples
///
/// ```rust
/// use aura_core::object::builtin;
/// use aura_core::runtime::Completion;
///
/// let runtime = aura_core::init()?;
/// let ctx = runtime.attach(Some("main"))?;
/// let obj = runtime.allocate(builtin::OBJECT)?;
///
/// assert!(runtime.monitor_enter(&ctx, obj)?.is_normal());
/// assert!(runtime.monitor_exit(&ctx, obj)?.is_normal());
///
/// // Releasing again is an IllegalMonitorStateException; with no frames
/// // to catch it the thread terminates
/// assert!(matches!(runtime.monitor_exit(&ctx, obj)?, Completion::Terminated { .. }));
/// runtime.detach(&ctx)?;
/// # Ok::<(), aura_core::VmError>(())
/// ```
pub struct Runtime {
    config: VmConfig,
    registry: Arc<ThreadRegistry>,
    safepoint: Arc<SafepointCoordinator>,
    monitors: Arc<Monitors>,
    engine: UnwindEngine,
    traps: TrapTranslator,
    roots: RootScanner,
    space: Arc<ObjectSpace>,
    stats: Arc<VmStats>,
    logger: Arc<VmLogger>,
}

impl Runtime {
    /// Create a runtime with default collaborators
    pub fn new(config: VmConfig) -> Result<Self> {
        RuntimeBuilder::new().with_config(config).build()
    }

    // ------------------------------------------------------------------
    // Thread lifecycle
    // ------------------------------------------------------------------

    /// Attach the calling native thread
    pub fn attach(&self, name: Option<&str>) -> Result<Arc<ThreadContext>> {
        self.attach_with_bounds(name, StackBounds::for_current_thread())
    }

    /// Attach a thread with explicit native stack bounds
    ///
    /// A thread attaching during a stop-the-world parks until it ends.
    pub fn attach_with_bounds(&self, name: Option<&str>, bounds: StackBounds) -> Result<Arc<ThreadContext>> {
        let ctx = self.registry.attach(name, bounds)?;
        self.logger.log(VmEvent::ThreadAttached {
            thread: ctx.id().as_u32(),
            name: name.map(str::to_string),
        });
        self.safepoint.poll(&ctx);
        Ok(ctx)
    }

    /// Detach a thread, releasing every monitor it still holds
    ///
    /// # Returns
    /// Number of monitor acquisitions released
    pub fn detach(&self, ctx: &ThreadContext) -> Result<usize> {
        self.safepoint.poll(ctx);

        let held = ctx.stack().drain_locks();
        let mut released = 0;
        for lock in &held {
            match self.monitors.release(ctx, lock.object) {
                Ok(()) => released += 1,
                Err(err) => log::warn!("Thread {} detaching: releasing {} failed: {}", ctx.id(), lock.object, err),
            }
        }

        self.registry.detach(ctx.id())?;
        self.safepoint.thread_detached();
        self.logger.log(VmEvent::ThreadDetached {
            thread: ctx.id().as_u32(),
            locks_released: released,
        });
        Ok(released)
    }

    /// Look up an attached thread
    pub fn thread(&self, id: ThreadId) -> Result<Arc<ThreadContext>> {
        self.registry.require(id)
    }

    fn ensure_live(ctx: &ThreadContext) -> Result<()> {
        if ctx.is_terminated() {
            return Err(VmError::ThreadTerminated(ctx.id()));
        }
        Ok(())
    }

    /// Turn a recoverable error into a thrown exception
    fn complete<T>(&self, ctx: &ThreadContext, result: Result<T>) -> Result<Completion<T>> {
        match result {
            Ok(value) => Ok(Completion::Normal(value)),
            Err(err) => match err.exception_kind() {
                Some(kind) => {
                    log::debug!("Thread {}: {} raised as {}", ctx.id(), err, kind);
                    self.engine.raise(ctx, kind).map(Completion::from)
                },
                None => Err(err),
            },
        }
    }

    // ------------------------------------------------------------------
    // Shadow frames
    // ------------------------------------------------------------------

    /// Push a frame on method entry
    ///
    /// Method entry is a safe point. A full shadow stack raises
    /// StackOverflowError in the caller's frame.
    ///
    /// # Returns
    /// Index of the new frame
    pub fn push_frame(&self, ctx: &ThreadContext, method: MethodId, pc: Pc, sp: usize) -> Result<Completion<usize>> {
        Self::ensure_live(ctx)?;
        self.safepoint.poll(ctx);
        let pushed = ctx.stack().push(Frame::new(method, pc, sp));
        self.complete(ctx, pushed)
    }

    /// Pop the top frame on normal return
    ///
    /// Locks still recorded against the frame are released with a warning.
    pub fn pop_frame(&self, ctx: &ThreadContext) -> Result<Option<Frame>> {
        let mut stack = ctx.stack();
        let Some(index) = stack.depth().checked_sub(1) else {
            return Ok(None);
        };

        while let Some(lock) = stack.take_frame_lock(Some(index), None) {
            log::warn!(
                "Frame {} of thread {} returned holding {}, releasing",
                index,
                ctx.id(),
                lock.object
            );
            if let Err(err) = self.monitors.release(ctx, lock.object) {
                log::warn!("Releasing {} on return failed: {}", lock.object, err);
            }
        }
        Ok(stack.pop())
    }

    /// Update the current PC of the top frame
    pub fn set_pc(&self, ctx: &ThreadContext, pc: Pc) -> Result<()> {
        match ctx.stack().top_mut() {
            Some(top) => {
                top.pc = pc;
                Ok(())
            },
            None => Err(VmError::invalid_state("a pushed frame", "empty shadow stack")),
        }
    }

    /// Safepoint poll for back edges and other compiler-chosen sites
    #[inline]
    pub fn poll(&self, ctx: &ThreadContext) {
        self.safepoint.poll(ctx);
    }

    // ------------------------------------------------------------------
    // Monitors
    // ------------------------------------------------------------------

    /// Enter the monitor of `obj`, recording it against the top frame
    pub fn monitor_enter(&self, ctx: &ThreadContext, obj: ObjRef) -> Result<Completion> {
        Self::ensure_live(ctx)?;
        let acquired = self.monitors.acquire(ctx, obj);
        if acquired.is_ok() {
            ctx.stack().record_lock(obj);
        }
        self.complete(ctx, acquired)
    }

    /// Exit the monitor of `obj`
    pub fn monitor_exit(&self, ctx: &ThreadContext, obj: ObjRef) -> Result<Completion> {
        Self::ensure_live(ctx)?;
        let released = self.monitors.release(ctx, obj);
        if released.is_ok() && !ctx.stack().forget_lock(obj) {
            log::trace!("Thread {} released unrecorded monitor {}", ctx.id(), obj);
        }
        self.complete(ctx, released)
    }

    /// Wait on the monitor of `obj`
    pub fn wait(&self, ctx: &ThreadContext, obj: ObjRef, timeout: Option<Duration>) -> Result<Completion<WaitStatus>> {
        Self::ensure_live(ctx)?;
        let waited = self.monitors.wait(ctx, obj, timeout);
        self.complete(ctx, waited)
    }

    /// Wake one waiter of `obj`
    pub fn notify(&self, ctx: &ThreadContext, obj: ObjRef) -> Result<Completion<usize>> {
        Self::ensure_live(ctx)?;
        let notified = self.monitors.notify(ctx, obj);
        self.complete(ctx, notified)
    }

    /// Wake every waiter of `obj`
    pub fn notify_all(&self, ctx: &ThreadContext, obj: ObjRef) -> Result<Completion<usize>> {
        Self::ensure_live(ctx)?;
        let notified = self.monitors.notify_all(ctx, obj);
        self.complete(ctx, notified)
    }

    pub fn monitor_state(&self, obj: ObjRef) -> MonitorState {
        self.monitors.state(obj)
    }

    pub fn holds_lock(&self, ctx: &ThreadContext, obj: ObjRef) -> bool {
        self.monitors.holds_lock(ctx, obj)
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    /// Throw `exception` from the current PC
    pub fn throw(&self, ctx: &ThreadContext, exception: ObjRef) -> Result<Completion> {
        self.engine.throw(ctx, exception).map(Completion::from)
    }

    /// Throw `exception` from `pc` in the top frame
    pub fn throw_at(&self, ctx: &ThreadContext, exception: ObjRef, pc: Pc) -> Result<Completion> {
        self.engine.throw_at(ctx, exception, pc).map(Completion::from)
    }

    /// Synthesize and throw an exception of `kind`
    pub fn raise(&self, ctx: &ThreadContext, kind: ExceptionKind) -> Result<Completion> {
        Self::ensure_live(ctx)?;
        self.engine.raise(ctx, kind).map(Completion::from)
    }

    /// Translate a hardware trap and unwind from the faulting PC
    ///
    /// # Returns
    /// `UnrecognizedTrap` when the PC is not translatable; the process must
    /// abort without unwinding
    pub fn handle_trap(&self, ctx: &ThreadContext, trap: &TrapContext) -> Result<Completion> {
        self.traps.translate(&self.engine, ctx, trap).map(Completion::from)
    }

    pub fn is_translatable(&self, pc: Pc) -> bool {
        self.traps.is_translatable(pc)
    }

    // ------------------------------------------------------------------
    // Collector interface
    // ------------------------------------------------------------------

    /// Mark the thread as running native code, safe for collection
    pub fn enter_native(&self, ctx: &ThreadContext) {
        self.safepoint.enter_native(ctx);
    }

    /// Return from native code, parking first if the world is stopped
    pub fn leave_native(&self, ctx: &ThreadContext) {
        self.safepoint.leave_native(ctx);
    }

    /// Stop every attached thread at a safe point
    ///
    /// A request that times out is rolled back, and records whose deflation
    /// it deferred are reclaimed before the error is returned.
    ///
    /// # Arguments
    /// * `requester` - Calling thread when the collector runs on a mutator
    pub fn request_stop_the_world(&self, requester: Option<&ThreadContext>) -> Result<SafepointSummary> {
        let result = self.safepoint.request_stop_the_world(requester);
        if let Err(VmError::SafepointTimeout { .. }) = &result {
            let deflated = self.monitors.deflate_idle_after_rollback();
            if deflated > 0 {
                log::debug!("Deflated {} idle monitor(s) after an abandoned safepoint", deflated);
            }
        }
        result
    }

    /// Resume all threads after deflating monitors left idle during the pause
    pub fn resume_all(&self) -> Result<Duration> {
        let (pause, deflated) = self.safepoint.resume_with(|| self.monitors.deflate_idle())?;
        if deflated > 0 {
            log::debug!("Deflated {} idle monitor(s) before resuming", deflated);
        }
        Ok(pause)
    }

    /// GC roots contributed by one thread
    ///
    /// The thread must be at a safe point, or the world must be stopped.
    pub fn enumerate_gc_roots(&self, thread: ThreadId) -> Result<Vec<Root>> {
        let ctx = self.registry.require(thread)?;
        if !ctx.state().is_safe() && !self.safepoint.is_at_safepoint() {
            return Err(VmError::invalid_state(
                "thread at a safe point",
                format!("thread {} is {:?}", thread, ctx.state()),
            ));
        }
        Ok(self.roots.thread_roots(&ctx))
    }

    /// GC roots owned by no thread
    ///
    /// Preallocated exceptions and the objects of every inflated monitor. A
    /// collection must mark these together with every thread's roots.
    pub fn enumerate_global_roots(&self) -> Vec<Root> {
        let reserved = self.engine.factory().reserved();
        self.roots.global_roots(&self.monitors, &reserved)
    }

    // ------------------------------------------------------------------
    // Objects and observability
    // ------------------------------------------------------------------

    /// Allocate an object in the runtime's object space
    pub fn allocate(&self, type_id: TypeId) -> Result<ObjRef> {
        self.space.allocate(type_id)
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    pub fn safepoint(&self) -> &Arc<SafepointCoordinator> {
        &self.safepoint
    }

    pub fn monitors(&self) -> &Arc<Monitors> {
        &self.monitors
    }

    pub fn space(&self) -> &Arc<ObjectSpace> {
        &self.space
    }

    pub fn stats(&self) -> &Arc<VmStats> {
        &self.stats
    }

    pub fn logger(&self) -> &Arc<VmLogger> {
        &self.logger
    }

    /// Export counters and histograms
    pub fn metrics(&self) -> VmMetrics {
        self.stats.to_metrics()
    }
}

impl TrapHandler for Runtime {
    fn handle_trap(&self, ctx: &ThreadContext, trap: &TrapContext) -> Result<UnwindOutcome> {
        self.traps.translate(&self.engine, ctx, trap)
    }

    fn is_translatable(&self, pc: Pc) -> bool {
        self.traps.is_translatable(pc)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("threads", &self.registry.len())
            .field("inflated_monitors", &self.monitors.inflated_count())
            .field("safepoint_epoch", &self.safepoint.epoch())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::builtin;
    use crate::unwind::{MethodInfo, MethodTable, PcRange, TrapSignal, TryRegion};

    fn runtime() -> Runtime {
        let methods = MethodTable::new();
        methods
            .register(
                MethodInfo::new(MethodId(1), "main", PcRange::new(0x100, 0x200))
                    .with_region(TryRegion::catch_all(PcRange::new(0x100, 0x180), 0x1c0))
                    .with_trap_site(0x140, ExceptionKind::NullPointer),
            )
            .unwrap();
        RuntimeBuilder::new().with_metadata(Arc::new(methods)).build().unwrap()
    }

    #[test]
    fn test_over_release_is_thrown() {
        let rt = runtime();
        let ctx = rt.attach_with_bounds(None, StackBounds::unknown()).unwrap();
        let obj = rt.allocate(builtin::OBJECT).unwrap();
        rt.push_frame(&ctx, MethodId(1), 0x110, 0).unwrap();

        assert!(rt.monitor_enter(&ctx, obj).unwrap().is_normal());
        assert!(rt.monitor_exit(&ctx, obj).unwrap().is_normal());

        let landing = *rt.monitor_exit(&ctx, obj).unwrap().landing().unwrap();
        assert_eq!(landing.handler_pc, 0x1c0);
        assert_eq!(landing.exception.type_id(), builtin::ILLEGAL_MONITOR_STATE_EXCEPTION);
        assert!(rt.monitor_state(obj).is_unlocked());
    }

    #[test]
    fn test_stack_overflow_is_thrown() {
        let config = VmConfig {
            max_frames: 2,
            ..Default::default()
        };
        let methods = MethodTable::new();
        methods
            .register(
                MethodInfo::new(MethodId(1), "f", PcRange::new(0x100, 0x200))
                    .with_region(TryRegion::new(PcRange::new(0x100, 0x200), Some(builtin::ERROR), 0x1f0)),
            )
            .unwrap();
        let rt = RuntimeBuilder::new()
            .with_config(config)
            .with_metadata(Arc::new(methods))
            .build()
            .unwrap();
        let ctx = rt.attach_with_bounds(None, StackBounds::unknown()).unwrap();

        assert_eq!(rt.push_frame(&ctx, MethodId(1), 0x110, 0).unwrap(), Completion::Normal(0));
        assert_eq!(rt.push_frame(&ctx, MethodId(1), 0x110, 0).unwrap(), Completion::Normal(1));
        match rt.push_frame(&ctx, MethodId(1), 0x110, 0).unwrap() {
            Completion::Handler(landing) => {
                assert_eq!(landing.exception.type_id(), builtin::STACK_OVERFLOW_ERROR);
                assert_eq!(landing.depth, 1);
            },
            other => panic!("expected StackOverflowError to be caught, got {:?}", other),
        }
    }

    #[test]
    fn test_trap_translation() {
        let rt = runtime();
        let ctx = rt.attach_with_bounds(None, StackBounds::unknown()).unwrap();
        rt.push_frame(&ctx, MethodId(1), 0x110, 0).unwrap();

        assert!(rt.is_translatable(0x140));
        let trap = TrapContext::new(TrapSignal::Segv, 0x140, 0, 0);
        let landing = *rt.handle_trap(&ctx, &trap).unwrap().landing().unwrap();
        assert_eq!(landing.exception.type_id(), builtin::NULL_POINTER_EXCEPTION);
        assert_eq!(rt.stats().snapshot().traps_translated, 1);

        let fatal = TrapContext::new(TrapSignal::Segv, 0x150, 0, 0);
        assert!(rt.handle_trap(&ctx, &fatal).unwrap_err().is_fatal());
    }

    #[test]
    fn test_detach_releases_monitors() {
        let rt = runtime();
        let ctx = rt.attach_with_bounds(Some("worker"), StackBounds::unknown()).unwrap();
        let obj = rt.allocate(builtin::OBJECT).unwrap();

        rt.monitor_enter(&ctx, obj).unwrap();
        rt.monitor_enter(&ctx, obj).unwrap();
        assert_eq!(rt.detach(&ctx).unwrap(), 2);
        assert!(rt.monitor_state(obj).is_unlocked());
        assert!(rt.thread(ctx.id()).is_err());
    }

    #[test]
    fn test_roots_require_safe_point() {
        let rt = runtime();
        let ctx = rt.attach_with_bounds(None, StackBounds::unknown()).unwrap();
        assert!(matches!(
            rt.enumerate_gc_roots(ctx.id()),
            Err(VmError::InvalidState { .. })
        ));

        rt.enter_native(&ctx);
        assert!(rt.enumerate_gc_roots(ctx.id()).unwrap().is_empty());
        rt.leave_native(&ctx);
    }
}
