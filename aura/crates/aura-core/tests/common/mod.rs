//! Test Utilities for the Aura Core Test Suite
//!
//! Runtime fixture with a small fixed method layout, thread helpers and
//! strict assertion helpers shared by the integration tests.
//!
//! ============================================================================
//! Method layout used by every fixture
//! ============================================================================
//!
//! | Method | Code          | Regions                                   | Trap sites            |
//! |--------|---------------|-------------------------------------------|-----------------------|
//! | OUTER  | 0x1000-0x1100 | 0x1000-0x1080 RuntimeException -> 0x10f0  |                       |
//! | MIDDLE | 0x2000-0x2100 |                                           |                       |
//! | INNER  | 0x3000-0x3100 |                                           | 0x3040 NPE, 0x3050 AE |

#![allow(dead_code)]

use aura_core::object::builtin;
use aura_core::thread::StackBounds;
use aura_core::unwind::{ExceptionKind, MethodId, MethodInfo, MethodTable, Pc, PcRange, TryRegion};
use aura_core::{Completion, ObjRef, Runtime, RuntimeBuilder, ThreadContext, VmConfig};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Maximum test duration before timeout
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const OUTER: MethodId = MethodId(1);
pub const MIDDLE: MethodId = MethodId(2);
pub const INNER: MethodId = MethodId(3);

pub const OUTER_CALL_PC: Pc = 0x1040;
pub const OUTER_HANDLER_PC: Pc = 0x10f0;
pub const MIDDLE_CALL_PC: Pc = 0x2040;
pub const INNER_PC: Pc = 0x3010;
pub const NPE_TRAP_PC: Pc = 0x3040;
pub const AE_TRAP_PC: Pc = 0x3050;

/// Fake native stack pointers, one per method
pub fn frame_sp(method: MethodId) -> usize {
    0x7fff_0000 - method.0 as usize * 0x100
}

/// Method table with the fixture layout
pub fn method_table() -> MethodTable {
    let methods = MethodTable::new();
    methods
        .register(
            MethodInfo::new(OUTER, "Outer.run", PcRange::new(0x1000, 0x1100)).with_region(TryRegion::new(
                PcRange::new(0x1000, 0x1080),
                Some(builtin::RUNTIME_EXCEPTION),
                OUTER_HANDLER_PC,
            )),
        )
        .expect("outer method registers");
    methods
        .register(MethodInfo::new(MIDDLE, "Middle.call", PcRange::new(0x2000, 0x2100)))
        .expect("middle method registers");
    methods
        .register(
            MethodInfo::new(INNER, "Inner.work", PcRange::new(0x3000, 0x3100))
                .with_trap_site(NPE_TRAP_PC, ExceptionKind::NullPointer)
                .with_trap_site(AE_TRAP_PC, ExceptionKind::Arithmetic),
        )
        .expect("inner method registers");
    methods
}

/// ============================================================================
/// RUNTIME FIXTURE
/// ============================================================================

/// Test fixture owning a runtime built over the fixture method layout
pub struct RuntimeFixture {
    pub runtime: Arc<Runtime>,
    pub config: VmConfig,
}

impl RuntimeFixture {
    /// Fixture with default configuration and no spinning
    pub fn with_defaults() -> Self {
        Self::with_config(VmConfig {
            spin_limit: 0,
            ..Default::default()
        })
    }

    /// Fixture with a custom configuration
    pub fn with_config(config: VmConfig) -> Self {
        let runtime = RuntimeBuilder::new()
            .with_config(config.clone())
            .with_metadata(Arc::new(method_table()))
            .build()
            .expect("runtime initialization should succeed with valid config");
        Self {
            runtime: Arc::new(runtime),
            config,
        }
    }

    /// Attach a thread without native stack bounds
    pub fn attach(&self, name: &str) -> Arc<ThreadContext> {
        self.runtime
            .attach_with_bounds(Some(name), StackBounds::unknown())
            .expect("attach should succeed")
    }

    pub fn object(&self) -> ObjRef {
        self.runtime
            .allocate(builtin::OBJECT)
            .expect("object allocation should succeed")
    }

    /// Push OUTER -> MIDDLE -> INNER
    pub fn push_three_frames(&self, ctx: &ThreadContext) {
        self.push(ctx, OUTER, OUTER_CALL_PC);
        self.push(ctx, MIDDLE, MIDDLE_CALL_PC);
        self.push(ctx, INNER, INNER_PC);
    }

    pub fn push(&self, ctx: &ThreadContext, method: MethodId, pc: Pc) {
        let pushed = self
            .runtime
            .push_frame(ctx, method, pc, frame_sp(method))
            .expect("push_frame should succeed");
        assert!(pushed.is_normal(), "push_frame raised: {:?}", pushed);
    }

    /// Enter a monitor and assert it completed normally
    pub fn enter(&self, ctx: &ThreadContext, obj: ObjRef) {
        let completion = self.runtime.monitor_enter(ctx, obj).expect("monitor_enter");
        assert_eq!(completion, Completion::Normal(()), "monitor_enter raised");
    }

    /// Exit a monitor and assert it completed normally
    pub fn exit(&self, ctx: &ThreadContext, obj: ObjRef) {
        let completion = self.runtime.monitor_exit(ctx, obj).expect("monitor_exit");
        assert_eq!(completion, Completion::Normal(()), "monitor_exit raised");
    }
}

/// ============================================================================
/// THREAD HELPERS
/// ============================================================================

/// Spin until `condition` holds
///
/// Panics after `TEST_TIMEOUT`, which turns a deadlock into a failure.
#[track_caller]
pub fn wait_until<F>(mut condition: F, context: &str)
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while !condition() {
        assert!(
            start.elapsed() < TEST_TIMEOUT,
            "{}: condition not reached within {:?} - possible deadlock",
            context,
            TEST_TIMEOUT
        );
        thread::sleep(Duration::from_millis(1));
    }
}

/// Spawn a thread that attaches itself, runs `body` and detaches
pub fn spawn_attached<F, R>(fixture: &RuntimeFixture, name: &str, body: F) -> thread::JoinHandle<R>
where
    F: FnOnce(&Runtime, &ThreadContext) -> R + Send + 'static,
    R: Send + 'static,
{
    let runtime = Arc::clone(&fixture.runtime);
    let name = name.to_string();
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let ctx = runtime
                .attach_with_bounds(Some(&name), StackBounds::unknown())
                .expect("attach should succeed");
            let result = body(&runtime, &ctx);
            runtime.detach(&ctx).expect("detach should succeed");
            result
        })
        .expect("thread spawn should succeed")
}

/// Assert that operation completed within timeout
#[track_caller]
pub fn assert_completed_within_timeout<F, R>(operation: F, timeout: Duration, context: &str) -> R
where
    F: FnOnce() -> R,
{
    let start = Instant::now();
    let result = operation();
    let elapsed = start.elapsed();

    assert!(
        elapsed < timeout,
        "{}: Operation took {:?}, exceeded timeout of {:?} - possible deadlock or performance bug",
        context,
        elapsed,
        timeout
    );

    result
}
