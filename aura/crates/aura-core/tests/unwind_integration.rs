//! Unwind Integration Tests
//!
//! Exercises the unwinder through the runtime surface:
//! - Handler search across a three-frame chain with held monitors
//! - Trap translation lands exactly where the equivalent throw lands
//! - Exceptions raised during unwinding replace the in-flight one
//! - Uncaught exceptions terminate the thread

mod common;

use aura_core::logging::VmEvent;
use aura_core::object::builtin;
use aura_core::thread::StackBounds;
use aura_core::unwind::{self, TrapContext, TrapSignal, UnwindOutcome};
use aura_core::{Completion, MonitorState, VmError};
use common::{
    frame_sp, RuntimeFixture, AE_TRAP_PC, INNER, INNER_PC, MIDDLE, MIDDLE_CALL_PC, NPE_TRAP_PC, OUTER,
    OUTER_CALL_PC, OUTER_HANDLER_PC,
};

/// PC inside OUTER but outside its try region
const OUTER_UNGUARDED_PC: usize = 0x1090;

fn segv_at(pc: usize) -> TrapContext {
    TrapContext::new(TrapSignal::Segv, pc, 0, frame_sp(INNER))
}

/// ============================================================================
/// HANDLER SEARCH
/// ============================================================================

/// Locks of abandoned frames and of the guarded region are released; a lock
/// the handler frame took outside its region stays held
#[test]
fn test_three_frame_unwind_releases_abandoned_monitors() {
    let fx = RuntimeFixture::with_defaults();
    let ctx = fx.attach("main");
    let outside = fx.object();
    let guarded = fx.object();
    let middle = fx.object();
    let inner = fx.object();

    fx.push(&ctx, OUTER, OUTER_UNGUARDED_PC);
    fx.enter(&ctx, outside);
    fx.runtime.set_pc(&ctx, OUTER_CALL_PC).unwrap();
    fx.enter(&ctx, guarded);
    fx.push(&ctx, MIDDLE, MIDDLE_CALL_PC);
    fx.enter(&ctx, middle);
    fx.push(&ctx, INNER, INNER_PC);
    fx.enter(&ctx, inner);
    fx.enter(&ctx, inner);

    let exception = fx.runtime.allocate(builtin::RUNTIME_EXCEPTION).unwrap();
    let landing = match fx.runtime.throw(&ctx, exception).unwrap() {
        Completion::Handler(landing) => landing,
        other => panic!("expected OUTER to catch, got {:?}", other),
    };

    assert_eq!(landing.depth, 0);
    assert_eq!(landing.method, OUTER);
    assert_eq!(landing.handler_pc, OUTER_HANDLER_PC);
    assert_eq!(landing.sp, frame_sp(OUTER));
    assert_eq!(landing.exception, exception);
    assert_eq!(landing.frames_unwound, 2);

    for obj in [guarded, middle, inner] {
        assert_eq!(fx.runtime.monitor_state(obj), MonitorState::Unlocked);
    }
    assert!(fx.runtime.holds_lock(&ctx, outside));

    let stack = ctx.stack();
    assert_eq!(stack.depth(), 1);
    assert_eq!(stack.top().unwrap().pc, OUTER_HANDLER_PC);
    assert_eq!(stack.top().unwrap().exception, Some(exception));
    assert_eq!(stack.lock_count(), 1);
    drop(stack);

    assert!(ctx.pending_exception().is_none());
    let snapshot = fx.runtime.stats().snapshot();
    assert_eq!(snapshot.throws, 1);
    assert_eq!(snapshot.frames_unwound, 2);
    assert_eq!(snapshot.handlers_found, 1);
}

#[test]
fn test_uncaught_exception_terminates_thread() {
    let fx = RuntimeFixture::with_defaults();
    let ctx = fx.attach("main");
    let obj = fx.object();
    fx.push_three_frames(&ctx);
    fx.enter(&ctx, obj);

    // Error is not a RuntimeException, so OUTER does not catch it
    let error = fx.runtime.allocate(builtin::ERROR).unwrap();
    assert_eq!(
        fx.runtime.throw(&ctx, error).unwrap(),
        Completion::Terminated { exception: error }
    );

    assert!(ctx.is_terminated());
    assert_eq!(ctx.uncaught_exception(), Some(error));
    assert_eq!(ctx.stack().depth(), 0);
    assert!(fx.runtime.monitor_state(obj).is_unlocked());

    assert!(matches!(
        fx.runtime.monitor_enter(&ctx, obj),
        Err(VmError::ThreadTerminated(id)) if id == ctx.id()
    ));
    assert!(matches!(fx.runtime.throw(&ctx, error), Err(VmError::ThreadTerminated(_))));
    assert!(fx
        .runtime
        .logger()
        .events()
        .iter()
        .any(|event| matches!(event, VmEvent::Uncaught { exception, .. } if *exception == error.addr())));
}

/// A failed release while unwinding swaps in IllegalMonitorStateException
#[test]
fn test_release_failure_replaces_in_flight_exception() {
    let fx = RuntimeFixture::with_defaults();
    let ctx = fx.attach("main");
    let obj = fx.object();

    fx.push(&ctx, OUTER, OUTER_CALL_PC);
    fx.push(&ctx, MIDDLE, MIDDLE_CALL_PC);
    fx.enter(&ctx, obj);
    // Released behind the shadow stack's back: the record stays
    fx.runtime.monitors().release(&ctx, obj).unwrap();

    let error = fx.runtime.allocate(builtin::ERROR).unwrap();
    let landing = match fx.runtime.throw(&ctx, error).unwrap() {
        Completion::Handler(landing) => landing,
        other => panic!("replacement should be caught by OUTER, got {:?}", other),
    };
    assert_eq!(landing.method, OUTER);
    assert_eq!(landing.exception.type_id(), builtin::ILLEGAL_MONITOR_STATE_EXCEPTION);
    assert_ne!(landing.exception, error);
    assert_eq!(ctx.stack().lock_count(), 0);

    let replaced = fx.runtime.logger().events().into_iter().any(|event| {
        matches!(event, VmEvent::ExceptionReplaced { discarded, exception, .. }
            if discarded == error.addr() && exception == landing.exception.addr())
    });
    assert!(replaced, "ExceptionReplaced event should be retained");
}

/// Handler code that rethrows continues the search from the handler PC
#[test]
fn test_rethrow_from_handler_continues_outward() {
    let fx = RuntimeFixture::with_defaults();
    let ctx = fx.attach("main");
    fx.push_three_frames(&ctx);

    let first = fx.runtime.raise(&ctx, unwind::ExceptionKind::Arithmetic).unwrap();
    let landing = *first.landing().expect("OUTER catches ArithmeticException");
    assert_eq!(landing.exception.type_id(), builtin::ARITHMETIC_EXCEPTION);

    // The handler PC lies outside the region, so the rethrow is uncaught
    match fx.runtime.throw(&ctx, landing.exception).unwrap() {
        Completion::Terminated { exception } => assert_eq!(exception, landing.exception),
        other => panic!("expected termination, got {:?}", other),
    }
}

/// ============================================================================
/// TRAP TRANSLATION
/// ============================================================================

/// A null-dereference trap lands exactly where the equivalent throw lands
#[test]
fn test_trap_equivalent_to_throw() {
    let trapped = RuntimeFixture::with_defaults();
    let trap_ctx = trapped.attach("trapped");
    trapped.push_three_frames(&trap_ctx);
    let via_trap = trapped.runtime.handle_trap(&trap_ctx, &segv_at(NPE_TRAP_PC)).unwrap();

    let thrown = RuntimeFixture::with_defaults();
    let throw_ctx = thrown.attach("thrown");
    thrown.push_three_frames(&throw_ctx);
    let npe = thrown.runtime.allocate(builtin::NULL_POINTER_EXCEPTION).unwrap();
    let via_throw = thrown.runtime.throw_at(&throw_ctx, npe, NPE_TRAP_PC).unwrap();

    let (a, b) = match (via_trap, via_throw) {
        (Completion::Handler(a), Completion::Handler(b)) => (a, b),
        other => panic!("both paths should be caught, got {:?}", other),
    };
    assert_eq!(a.depth, b.depth);
    assert_eq!(a.method, b.method);
    assert_eq!(a.handler_pc, b.handler_pc);
    assert_eq!(a.sp, b.sp);
    assert_eq!(a.frames_unwound, b.frames_unwound);
    assert_eq!(a.exception.type_id(), b.exception.type_id());
    assert_eq!(a.exception.type_id(), builtin::NULL_POINTER_EXCEPTION);

    assert_eq!(trapped.runtime.stats().snapshot().traps_translated, 1);
    assert_eq!(thrown.runtime.stats().snapshot().traps_translated, 0);
}

#[test]
fn test_divide_trap_raises_arithmetic_exception() {
    let fx = RuntimeFixture::with_defaults();
    let ctx = fx.attach("main");
    fx.push_three_frames(&ctx);

    let trap = TrapContext::new(TrapSignal::Fpe, AE_TRAP_PC, 0, frame_sp(INNER));
    let landing = *fx.runtime.handle_trap(&ctx, &trap).unwrap().landing().unwrap();
    assert_eq!(landing.exception.type_id(), builtin::ARITHMETIC_EXCEPTION);
    assert_eq!(landing.handler_pc, OUTER_HANDLER_PC);
}

/// A fault in a leaf that never pushed a frame unwinds through a trap frame
#[test]
fn test_leaf_trap_without_frame() {
    let fx = RuntimeFixture::with_defaults();
    let ctx = fx.attach("main");
    fx.push(&ctx, OUTER, OUTER_CALL_PC);
    fx.push(&ctx, MIDDLE, MIDDLE_CALL_PC);

    let landing = *fx
        .runtime
        .handle_trap(&ctx, &segv_at(NPE_TRAP_PC))
        .unwrap()
        .landing()
        .expect("OUTER catches the NullPointerException");
    assert_eq!(landing.frames_unwound, 2);
    assert_eq!(landing.method, OUTER);
    assert_eq!(ctx.stack().depth(), 1);
}

#[test]
fn test_guard_page_fault_is_stack_overflow() {
    let fx = RuntimeFixture::with_defaults();
    let bounds = StackBounds::new(0x7000_0000, 0x7010_0000).unwrap();
    let ctx = fx.runtime.attach_with_bounds(Some("bounded"), bounds).unwrap();
    fx.push_three_frames(&ctx);

    // Any PC in managed code, the fault address decides
    let trap = TrapContext::new(TrapSignal::Segv, INNER_PC, bounds.low - 8, bounds.low - 64);
    match fx.runtime.handle_trap(&ctx, &trap).unwrap() {
        Completion::Terminated { exception } => {
            assert_eq!(exception.type_id(), builtin::STACK_OVERFLOW_ERROR);
        },
        other => panic!("StackOverflowError is an Error and goes uncaught, got {:?}", other),
    }
}

/// Traps outside managed code or at the wrong site are not translated
#[test]
fn test_unrecognized_traps_are_fatal() {
    let fx = RuntimeFixture::with_defaults();
    let ctx = fx.attach("main");
    fx.push_three_frames(&ctx);

    let native = segv_at(0x9000);
    assert!(!fx.runtime.is_translatable(0x9000));
    assert!(matches!(
        fx.runtime.handle_trap(&ctx, &native),
        Err(VmError::UnrecognizedTrap { .. })
    ));

    // Managed PC, but not a registered NullPointer site
    assert!(matches!(
        fx.runtime.handle_trap(&ctx, &segv_at(INNER_PC)),
        Err(VmError::UnrecognizedTrap { .. })
    ));
    // Registered site, wrong signal
    assert!(matches!(
        fx.runtime.handle_trap(&ctx, &segv_at(AE_TRAP_PC)),
        Err(VmError::UnrecognizedTrap { .. })
    ));

    // Nothing was unwound
    assert_eq!(ctx.stack().depth(), 3);
    assert!(!ctx.is_terminated());
    let fatal = fx
        .runtime
        .logger()
        .events()
        .iter()
        .filter(|event| matches!(event, VmEvent::FatalTrap { .. }))
        .count();
    assert_eq!(fatal, 3);
}

/// The process-wide handler routes delivered traps to the runtime
#[test]
fn test_global_trap_handler_delivery() {
    let fx = RuntimeFixture::with_defaults();
    let ctx = fx.attach("main");
    fx.push_three_frames(&ctx);

    assert!(matches!(
        unwind::deliver_trap(&ctx, &segv_at(NPE_TRAP_PC)),
        Err(VmError::UnrecognizedTrap { .. })
    ));

    unwind::register_trap_handler(fx.runtime.clone());
    assert!(unwind::is_translatable(NPE_TRAP_PC));
    assert!(!unwind::is_translatable(0x9000));

    let outcome = unwind::deliver_trap(&ctx, &segv_at(NPE_TRAP_PC)).unwrap();
    match outcome {
        UnwindOutcome::Caught(landing) => assert_eq!(landing.handler_pc, OUTER_HANDLER_PC),
        other => panic!("expected a landing, got {:?}", other),
    }

    assert!(unwind::unregister_trap_handler().is_some());
    assert!(!unwind::is_translatable(NPE_TRAP_PC));
}
