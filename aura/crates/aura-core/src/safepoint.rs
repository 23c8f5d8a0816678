//! Safepoint Coordination
//!
//! A safepoint is a point where a thread can be stopped so the collector may
//! scan its stack and registers. Threads observe a stop request at their
//! next poll (method entry, back edges, before inflation, before blocking in
//! `wait`) and suspend after publishing a register snapshot. Threads that are
//! BLOCKED or NATIVE already count as safe.
//!
//! ## Safepoint States
//!
//! ```text
//! SAFEPOINT_NONE (0) ─────┐
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REQUESTED (1) │ (timeout rolls back)
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REACHED (2) ──┘ (resume_all)
//! ```
//!
//! ## Lock order
//!
//! monitor record lock → coordinator lock → registry lock. The coordinator
//! never takes a record lock, and no thread polls while holding its own
//! shadow stack lock.

use crate::error::{Result, VmError};
use crate::logging::{VmEvent, VmLogger};
use crate::stats::VmStats;
use crate::thread::{ExecState, RegisterSnapshot, ThreadContext, ThreadRegistry};
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Safepoint state constants
pub const SAFEPOINT_NONE: u8 = 0;
pub const SAFEPOINT_REQUESTED: u8 = 1;
pub const SAFEPOINT_REACHED: u8 = 2;

/// Interval between "still waiting" warnings for unbounded requests
const WAIT_WARNING_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a successful stop-the-world request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafepointSummary {
    /// Monotonic safepoint number
    pub epoch: u64,
    /// Attached threads at the time the world stopped
    pub threads: usize,
    /// Time from request to every thread being safe
    pub time_to_safepoint: Duration,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    reached_at: Option<Instant>,
}

/// SafepointCoordinator - drives stop-the-world and cooperative suspension
///
/// # Examples
///
/// ```rust
/// use aura_core::safepoint::SafepointCoordinator;
/// use aura_core::thread::{StackBounds, ThreadRegistry};
/// use std::sync::Arc;
///
/// let registry = Arc::new(ThreadRegistry::new(64));
/// let coordinator = SafepointCoordinator::new(registry.clone(), None);
///
/// // A thread parked in native code is already safe
/// let ctx = registry.attach(Some("worker"), StackBounds::unknown()).unwrap();
/// coordinator.enter_native(&ctx);
///
/// let summary = coordinator.request_stop_the_world(None).unwrap();
/// assert_eq!(summary.threads, 1);
/// coordinator.resume_all().unwrap();
/// ```
pub struct SafepointCoordinator {
    /// Current safepoint state, polled by every thread
    state: CachePadded<AtomicU8>,

    /// Requesting mutator thread (0 when the collector is not a mutator)
    requester: AtomicU32,

    epoch: AtomicU64,
    registry: Arc<ThreadRegistry>,
    lock: Mutex<CoordinatorState>,

    /// Signalled when a thread leaves RUNNING or detaches
    arrived: Condvar,

    /// Signalled when the world is resumed
    released: Condvar,

    timeout: Option<Duration>,
    stats: Arc<VmStats>,
    logger: Arc<VmLogger>,
}

impl SafepointCoordinator {
    /// Create new coordinator with default stats and logger
    ///
    /// # Arguments
    /// * `registry` - Threads that must reach safepoints
    /// * `timeout` - Give up on a request after this long, `None` waits forever
    pub fn new(registry: Arc<ThreadRegistry>, timeout: Option<Duration>) -> Self {
        Self::with_observers(
            registry,
            timeout,
            Arc::new(VmStats::default()),
            Arc::new(VmLogger::default()),
        )
    }

    /// Create new coordinator sharing the runtime's stats and logger
    pub fn with_observers(
        registry: Arc<ThreadRegistry>,
        timeout: Option<Duration>,
        stats: Arc<VmStats>,
        logger: Arc<VmLogger>,
    ) -> Self {
        Self {
            state: CachePadded::new(AtomicU8::new(SAFEPOINT_NONE)),
            requester: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            registry,
            lock: Mutex::new(CoordinatorState::default()),
            arrived: Condvar::new(),
            released: Condvar::new(),
            timeout,
            stats,
            logger,
        }
    }

    /// Check if a stop-the-world is requested or in effect
    ///
    /// # Memory Ordering
    /// Uses Acquire to synchronize with the requester's store.
    #[inline]
    pub fn is_stop_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) != SAFEPOINT_NONE
    }

    /// Check if every thread has reached a safe point
    #[inline]
    pub fn is_at_safepoint(&self) -> bool {
        self.state.load(Ordering::Acquire) == SAFEPOINT_REACHED
    }

    /// Get current safepoint state
    pub fn get_state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Number of stop-the-world requests so far
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Check if `ctx` must stop at its next safe point
    ///
    /// The requesting thread itself never stops.
    #[inline]
    pub fn should_block(&self, ctx: &ThreadContext) -> bool {
        self.is_stop_requested() && self.requester.load(Ordering::Acquire) != ctx.id().as_u32()
    }

    /// Safepoint poll
    ///
    /// Fast path is a single load. Must not be called while holding the
    /// thread's shadow stack lock or any monitor record lock.
    #[inline]
    pub fn poll(&self, ctx: &ThreadContext) {
        if self.should_block(ctx) {
            self.block_at_safepoint(ctx);
        }
    }

    /// Suspend until the world is resumed
    #[cold]
    fn block_at_safepoint(&self, ctx: &ThreadContext) {
        ctx.publish_registers(RegisterSnapshot::capture(ctx.current_pc()));

        let mut guard = self.lock.lock();
        if !self.should_block(ctx) {
            drop(guard);
            ctx.clear_registers();
            return;
        }

        let previous = ctx.state();
        ctx.set_state(ExecState::Suspended);
        self.arrived.notify_all();

        while self.is_stop_requested() {
            self.released.wait(&mut guard);
        }

        ctx.set_state(previous);
        drop(guard);
        ctx.clear_registers();
    }

    /// Leave RUNNING for a state that counts as safe
    ///
    /// # Arguments
    /// * `state` - `Blocked` or `Native`
    ///
    /// May be called while holding a monitor record lock.
    pub fn enter_blocked(&self, ctx: &ThreadContext, state: ExecState) {
        debug_assert!(state.is_safe());
        ctx.publish_registers(RegisterSnapshot::capture(ctx.current_pc()));

        let _guard = self.lock.lock();
        ctx.set_state(state);
        self.arrived.notify_all();
    }

    /// Return to RUNNING, waiting out any stop-the-world in effect
    ///
    /// Must not be called while holding a monitor record lock.
    pub fn leave_blocked(&self, ctx: &ThreadContext) {
        let mut guard = self.lock.lock();
        while self.should_block(ctx) {
            self.released.wait(&mut guard);
        }
        ctx.set_state(ExecState::Running);
        drop(guard);
        ctx.clear_registers();
    }

    /// Enter native code; the thread counts as safe until `leave_native`
    pub fn enter_native(&self, ctx: &ThreadContext) {
        self.enter_blocked(ctx, ExecState::Native);
    }

    /// Return from native code
    pub fn leave_native(&self, ctx: &ThreadContext) {
        self.leave_blocked(ctx);
    }

    /// Enter a safe region for the lifetime of the returned guard
    pub fn safe_region<'a>(&'a self, ctx: &'a ThreadContext) -> SafeRegion<'a> {
        self.enter_native(ctx);
        SafeRegion {
            coordinator: self,
            ctx,
        }
    }

    /// Wake a requester waiting for a thread that just detached
    pub fn thread_detached(&self) {
        let _guard = self.lock.lock();
        self.arrived.notify_all();
    }

    /// Stop every attached thread at a safe point
    ///
    /// Blocks until no thread other than the requester is RUNNING.
    ///
    /// # Arguments
    /// * `requester` - Calling thread when it is itself attached
    ///
    /// # Returns
    /// `SafepointSummary` once the world is stopped. With a configured
    /// timeout the request is rolled back and `SafepointTimeout` returned if
    /// some thread fails to arrive in time.
    pub fn request_stop_the_world(&self, requester: Option<&ThreadContext>) -> Result<SafepointSummary> {
        let started = Instant::now();
        let requester_id = requester.map(|ctx| ctx.id());
        let mut guard = self.lock.lock();

        if self.is_stop_requested() {
            return Err(VmError::invalid_state(
                "no stop-the-world in progress",
                "stop-the-world already requested",
            ));
        }

        self.requester
            .store(requester_id.map_or(0, |id| id.as_u32()), Ordering::Release);
        self.state.store(SAFEPOINT_REQUESTED, Ordering::SeqCst);
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let threads = self.registry.len();
        self.logger.log(VmEvent::SafepointBegin { epoch, threads });

        let deadline = self.timeout.map(|timeout| started + timeout);
        loop {
            let pending = self.registry.count_running(requester_id);
            if pending == 0 {
                break;
            }

            match deadline {
                Some(deadline) => {
                    let timed_out = self.arrived.wait_until(&mut guard, deadline).timed_out();
                    if timed_out {
                        let pending = self.registry.count_running(requester_id);
                        if pending > 0 {
                            self.rollback();
                            let timeout_ms = self.timeout.map_or(0, |t| t.as_millis() as u64);
                            log::warn!(
                                "Safepoint {} abandoned: {} thread(s) still running after {}ms",
                                epoch,
                                pending,
                                timeout_ms
                            );
                            return Err(VmError::SafepointTimeout {
                                pending,
                                timeout_ms,
                            });
                        }
                    }
                },
                None => {
                    if self
                        .arrived
                        .wait_for(&mut guard, WAIT_WARNING_INTERVAL)
                        .timed_out()
                    {
                        log::warn!(
                            "Safepoint {}: still waiting for {} thread(s) after {:?}",
                            epoch,
                            self.registry.count_running(requester_id),
                            started.elapsed()
                        );
                    }
                },
            }
        }

        self.state.store(SAFEPOINT_REACHED, Ordering::SeqCst);
        guard.reached_at = Some(Instant::now());

        let time_to_safepoint = started.elapsed();
        self.stats.record_safepoint(time_to_safepoint);
        self.logger.log(VmEvent::SafepointReached {
            epoch,
            threads: self.registry.len(),
            elapsed_us: time_to_safepoint.as_micros() as u64,
        });

        Ok(SafepointSummary {
            epoch,
            threads: self.registry.len(),
            time_to_safepoint,
        })
    }

    fn rollback(&self) {
        self.state.store(SAFEPOINT_NONE, Ordering::SeqCst);
        self.requester.store(0, Ordering::Release);
        self.released.notify_all();
    }

    /// Clear the stop request and wake every suspended thread
    ///
    /// # Returns
    /// How long the world was stopped
    pub fn resume_all(&self) -> Result<Duration> {
        self.resume_with(|| 0).map(|(pause, _)| pause)
    }

    /// Resume, running `while_stopped` just before threads are released
    ///
    /// Used for work that must happen while no mutator runs, such as the
    /// idle monitor sweep.
    pub fn resume_with<F>(&self, while_stopped: F) -> Result<(Duration, usize)>
    where
        F: FnOnce() -> usize,
    {
        if !self.is_stop_requested() {
            return Err(VmError::invalid_state(
                "stop-the-world in progress",
                "no stop-the-world requested",
            ));
        }

        // Runs without the coordinator lock: blocked threads may hold a
        // record lock while they wait for it.
        let swept = while_stopped();

        let mut guard = self.lock.lock();
        let pause = guard
            .reached_at
            .take()
            .map_or(Duration::ZERO, |reached| reached.elapsed());

        self.rollback();
        drop(guard);

        self.stats.record_safepoint_pause(pause);
        self.logger.log(VmEvent::SafepointEnd {
            epoch: self.epoch(),
            pause_us: pause.as_micros() as u64,
            deflated: swept,
        });

        Ok((pause, swept))
    }
}

/// RAII guard for a native (safe) region
pub struct SafeRegion<'a> {
    coordinator: &'a SafepointCoordinator,
    ctx: &'a ThreadContext,
}

impl Drop for SafeRegion<'_> {
    fn drop(&mut self) {
        self.coordinator.leave_native(self.ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::StackBounds;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn setup(timeout: Option<Duration>) -> (Arc<ThreadRegistry>, Arc<SafepointCoordinator>) {
        let registry = Arc::new(ThreadRegistry::new(64));
        let coordinator = Arc::new(SafepointCoordinator::new(registry.clone(), timeout));
        (registry, coordinator)
    }

    #[test]
    fn test_empty_world_stops_immediately() {
        let (_registry, coordinator) = setup(None);
        assert_eq!(coordinator.get_state(), SAFEPOINT_NONE);

        let summary = coordinator.request_stop_the_world(None).unwrap();
        assert_eq!(summary.epoch, 1);
        assert!(coordinator.is_at_safepoint());

        coordinator.resume_all().unwrap();
        assert!(!coordinator.is_stop_requested());
    }

    #[test]
    fn test_resume_without_request_fails() {
        let (_registry, coordinator) = setup(None);
        assert!(matches!(
            coordinator.resume_all(),
            Err(VmError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_double_request_fails() {
        let (_registry, coordinator) = setup(None);
        coordinator.request_stop_the_world(None).unwrap();
        assert!(coordinator.request_stop_the_world(None).is_err());
        coordinator.resume_all().unwrap();
    }

    #[test]
    fn test_polling_thread_suspends() {
        let (registry, coordinator) = setup(None);
        let ctx = registry.attach(None, StackBounds::unknown()).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let coordinator = coordinator.clone();
            let ctx = ctx.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    coordinator.poll(&ctx);
                    std::hint::spin_loop();
                }
            })
        };

        coordinator.request_stop_the_world(None).unwrap();
        assert_eq!(ctx.state(), ExecState::Suspended);
        assert!(ctx.registers().is_some());

        stop.store(true, Ordering::Relaxed);
        coordinator.resume_all().unwrap();
        worker.join().unwrap();
        assert_eq!(ctx.state(), ExecState::Running);
        assert!(ctx.registers().is_none());
    }

    #[test]
    fn test_timeout_rolls_back() {
        let (registry, coordinator) = setup(Some(Duration::from_millis(20)));
        // Attached but never polls
        let _ctx = registry.attach(None, StackBounds::unknown()).unwrap();

        let err = coordinator.request_stop_the_world(None).unwrap_err();
        assert!(matches!(err, VmError::SafepointTimeout { pending: 1, .. }));
        assert!(!coordinator.is_stop_requested());
    }

    #[test]
    fn test_requester_does_not_block() {
        let (registry, coordinator) = setup(None);
        let ctx = registry.attach(None, StackBounds::unknown()).unwrap();

        coordinator.request_stop_the_world(Some(&ctx)).unwrap();
        assert!(!coordinator.should_block(&ctx));
        coordinator.poll(&ctx);
        assert_eq!(ctx.state(), ExecState::Running);
        coordinator.resume_all().unwrap();
    }

    #[test]
    fn test_leave_native_waits_for_resume() {
        let (registry, coordinator) = setup(None);
        let ctx = registry.attach(None, StackBounds::unknown()).unwrap();
        coordinator.enter_native(&ctx);

        coordinator.request_stop_the_world(None).unwrap();

        let returned = Arc::new(AtomicBool::new(false));
        let worker = {
            let coordinator = coordinator.clone();
            let ctx = ctx.clone();
            let returned = returned.clone();
            thread::spawn(move || {
                coordinator.leave_native(&ctx);
                returned.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!returned.load(Ordering::SeqCst));
        assert_eq!(ctx.state(), ExecState::Native);

        coordinator.resume_all().unwrap();
        worker.join().unwrap();
        assert!(returned.load(Ordering::SeqCst));
        assert_eq!(ctx.state(), ExecState::Running);
    }

    #[test]
    fn test_safe_region_guard() {
        let (registry, coordinator) = setup(None);
        let ctx = registry.attach(None, StackBounds::unknown()).unwrap();
        {
            let _region = coordinator.safe_region(&ctx);
            assert_eq!(ctx.state(), ExecState::Native);
        }
        assert_eq!(ctx.state(), ExecState::Running);
    }
}
