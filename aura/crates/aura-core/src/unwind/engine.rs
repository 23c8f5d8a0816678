//! Unwind Engine
//!
//! Walks a thread's shadow stack from the top frame looking for a try region
//! that covers the frame's PC and handles the in-flight exception.
//!
//! ## Per-thread states
//!
//! ```text
//! NORMAL ──throw──► UNWINDING ──handler found──► NORMAL
//!                        │
//!                        └──stack exhausted──► TERMINATING
//! ```
//!
//! Monitors recorded against an abandoned frame are released through the
//! monitor subsystem, most recent first. A frame is only popped after the
//! thread has polled for a pending safepoint. An exception raised while
//! releasing (for example by an unbalanced monitor) replaces the in-flight
//! one and the walk resumes at the current frame.

use crate::error::{Result, VmError};
use crate::logging::{VmEvent, VmLogger};
use crate::monitor::Monitors;
use crate::object::{ObjRef, TypeHierarchy};
use crate::safepoint::SafepointCoordinator;
use crate::stats::VmStats;
use crate::thread::{Frame, ShadowStack, ThreadContext, UnwindState};
use crate::unwind::exception::{ExceptionFactory, ExceptionKind, UncaughtExceptionHandler};
use crate::unwind::metadata::{CodeMetadata, MethodId, Pc, PcRange, TryRegion};
use std::sync::Arc;

/// Where a caught exception resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Landing {
    /// Index of the handling frame (0 = outermost)
    pub depth: usize,
    pub method: MethodId,
    pub handler_pc: Pc,
    /// Stack pointer restored on handler entry
    pub sp: usize,
    pub exception: ObjRef,
    pub frames_unwound: usize,
}

/// Result of unwinding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindOutcome {
    Caught(Landing),
    /// Stack exhausted, the thread is TERMINATING
    Uncaught { exception: ObjRef },
}

/// Outcome of releasing one group of frame locks
enum Release {
    Done,
    /// Exception replaced while releasing, restart at the current frame
    Replaced(ObjRef),
}

/// Exception/unwind engine
pub struct UnwindEngine {
    metadata: Arc<dyn CodeMetadata>,
    types: Arc<dyn TypeHierarchy>,
    monitors: Arc<Monitors>,
    safepoint: Arc<SafepointCoordinator>,
    factory: Arc<dyn ExceptionFactory>,
    uncaught: Arc<dyn UncaughtExceptionHandler>,
    stats: Arc<VmStats>,
    logger: Arc<VmLogger>,
}

impl UnwindEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metadata: Arc<dyn CodeMetadata>,
        types: Arc<dyn TypeHierarchy>,
        monitors: Arc<Monitors>,
        safepoint: Arc<SafepointCoordinator>,
        factory: Arc<dyn ExceptionFactory>,
        uncaught: Arc<dyn UncaughtExceptionHandler>,
        stats: Arc<VmStats>,
        logger: Arc<VmLogger>,
    ) -> Self {
        Self {
            metadata,
            types,
            monitors,
            safepoint,
            factory,
            uncaught,
            stats,
            logger,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn CodeMetadata> {
        &self.metadata
    }

    pub fn factory(&self) -> &Arc<dyn ExceptionFactory> {
        &self.factory
    }

    /// Throw `exception` from the current PC of `ctx`
    ///
    /// # Returns
    /// Where execution resumes, or `Uncaught` once the thread terminated.
    /// `ThreadTerminated` if the thread already stopped.
    pub fn throw(&self, ctx: &ThreadContext, exception: ObjRef) -> Result<UnwindOutcome> {
        if ctx.is_terminated() {
            return Err(VmError::ThreadTerminated(ctx.id()));
        }

        if let Some(previous) = ctx.set_pending_exception(Some(exception)) {
            if previous != exception {
                self.log_replaced(ctx, previous, exception);
            }
        }
        ctx.set_unwind_state(UnwindState::Unwinding);

        self.stats.record_throw();
        self.logger.log(VmEvent::ExceptionThrown {
            thread: ctx.id().as_u32(),
            exception: exception.addr(),
            type_id: exception.type_id().0,
            pc: ctx.current_pc(),
        });

        self.unwind(ctx, exception)
    }

    /// Throw `exception` as if raised at `pc` in the top frame
    pub fn throw_at(&self, ctx: &ThreadContext, exception: ObjRef, pc: Pc) -> Result<UnwindOutcome> {
        if let Some(top) = ctx.stack().top_mut() {
            top.pc = pc;
        }
        self.throw(ctx, exception)
    }

    /// Synthesize an exception of `kind` and throw it
    pub fn raise(&self, ctx: &ThreadContext, kind: ExceptionKind) -> Result<UnwindOutcome> {
        let exception = self.factory.create(kind)?;
        self.throw(ctx, exception)
    }

    /// First region of `frame` that handles `exception`
    fn find_handler(&self, frame: &Frame, exception: ObjRef) -> Option<TryRegion> {
        let method = match self.metadata.method(frame.method) {
            Some(method) => method,
            None => {
                log::warn!("No metadata for method {}, unwinding through it", frame.method.0);
                return None;
            },
        };
        let thrown = exception.type_id();
        let found = method
            .regions_at(frame.pc)
            .find(|region| match region.catch_type {
                None => true,
                Some(handled) => handled == thrown || self.types.is_ancestor(handled, thrown),
            })
            .copied();
        found
    }

    fn unwind(&self, ctx: &ThreadContext, mut exception: ObjRef) -> Result<UnwindOutcome> {
        let mut unwound = 0;

        'walk: loop {
            let mut stack = ctx.stack();
            let Some(index) = stack.depth().checked_sub(1) else {
                // Locks taken with an empty stack are the last to go
                if let Release::Replaced(replaced) = self.release_locks(ctx, &mut stack, None, None, exception)? {
                    exception = replaced;
                    continue 'walk;
                }
                drop(stack);
                return Ok(self.terminate(ctx, exception, unwound));
            };

            let frame = match stack.frame(index) {
                Some(frame) => *frame,
                None => return Err(VmError::Internal(format!("frame {} vanished during unwind", index))),
            };

            if let Some(region) = self.find_handler(&frame, exception) {
                if let Release::Replaced(replaced) =
                    self.release_locks(ctx, &mut stack, Some(index), Some(region.range), exception)?
                {
                    exception = replaced;
                    continue 'walk;
                }

                if let Some(target) = stack.frame_mut(index) {
                    target.pc = region.handler_pc;
                    target.exception = Some(exception);
                }
                drop(stack);
                return Ok(UnwindOutcome::Caught(self.land(ctx, index, &frame, region, exception, unwound)));
            }

            if let Release::Replaced(replaced) = self.release_locks(ctx, &mut stack, Some(index), None, exception)? {
                exception = replaced;
                continue 'walk;
            }

            // Frames are only popped at a safe point
            drop(stack);
            self.safepoint.poll(ctx);
            ctx.stack().pop();
            unwound += 1;
            self.stats.record_frames_unwound(1);
        }
    }

    /// Release the locks of `frame` taken inside `within`, most recent first
    fn release_locks(
        &self,
        ctx: &ThreadContext,
        stack: &mut ShadowStack,
        frame: Option<usize>,
        within: Option<PcRange>,
        exception: ObjRef,
    ) -> Result<Release> {
        while let Some(lock) = stack.take_frame_lock(frame, within) {
            if let Err(err) = self.monitors.release(ctx, lock.object) {
                log::debug!(
                    "Releasing {} for thread {} during unwind failed: {}",
                    lock.object,
                    ctx.id(),
                    err
                );
                return self.replace(ctx, exception, err).map(Release::Replaced);
            }
        }
        Ok(Release::Done)
    }

    /// Replace the in-flight exception with the one `err` surfaces as
    fn replace(&self, ctx: &ThreadContext, discarded: ObjRef, err: VmError) -> Result<ObjRef> {
        let kind = err.exception_kind().ok_or(err)?;
        let exception = self.factory.create(kind)?;
        ctx.set_pending_exception(Some(exception));
        self.stats.record_throw();
        self.log_replaced(ctx, discarded, exception);
        Ok(exception)
    }

    fn log_replaced(&self, ctx: &ThreadContext, discarded: ObjRef, exception: ObjRef) {
        self.logger.log(VmEvent::ExceptionReplaced {
            thread: ctx.id().as_u32(),
            discarded: discarded.addr(),
            exception: exception.addr(),
        });
    }

    fn land(
        &self,
        ctx: &ThreadContext,
        depth: usize,
        frame: &Frame,
        region: TryRegion,
        exception: ObjRef,
        unwound: usize,
    ) -> Landing {
        ctx.set_pending_exception(None);
        ctx.set_unwind_state(UnwindState::Normal);

        self.stats.record_handler_found();
        self.logger.log(VmEvent::HandlerFound {
            thread: ctx.id().as_u32(),
            exception: exception.addr(),
            handler_pc: region.handler_pc,
            depth,
            frames_unwound: unwound,
        });

        Landing {
            depth,
            method: frame.method,
            handler_pc: region.handler_pc,
            sp: frame.sp,
            exception,
            frames_unwound: unwound,
        }
    }

    fn terminate(&self, ctx: &ThreadContext, exception: ObjRef, unwound: usize) -> UnwindOutcome {
        ctx.set_unwind_state(UnwindState::Terminating);
        ctx.set_pending_exception(None);
        ctx.set_uncaught_exception(exception);

        self.stats.record_uncaught();
        self.logger.log(VmEvent::Uncaught {
            thread: ctx.id().as_u32(),
            exception: exception.addr(),
        });
        log::debug!("Thread {} terminated after unwinding {} frame(s)", ctx.id(), unwound);

        self.uncaught.report_uncaught(exception, ctx.id());
        UnwindOutcome::Uncaught { exception }
    }
}
