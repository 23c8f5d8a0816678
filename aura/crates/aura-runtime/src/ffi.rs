//! C ABI for compiled managed code
//!
//! One process-wide runtime, one attached context per OS thread. Every
//! operation that can transfer control returns an `AuraCompletion` telling
//! the caller where execution continues.

use aura_core::logging::{self, VmEvent, VmLoggerConfig};
use aura_core::runtime::Completion;
use aura_core::thread::ThreadContext;
use aura_core::unwind::{
    self, ExceptionKind, MethodId, MethodInfo, MethodTable, PcRange, TrapContext, TrapSignal, TryRegion,
};
use aura_core::{ObjRef, Runtime, RuntimeBuilder, TypeId, VmConfig, VmError, WaitStatus};
use std::cell::RefCell;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

static METHODS: OnceLock<Arc<MethodTable>> = OnceLock::new();
static RUNTIME: OnceLock<Arc<Runtime>> = OnceLock::new();

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadContext>>> = const { RefCell::new(None) };
}

/// Continue at the next instruction
pub const AURA_NORMAL: u32 = 0;
/// Jump to `handler_pc` with the stack pointer reset to `sp`
pub const AURA_HANDLER: u32 = 1;
/// The thread terminated with an uncaught exception
pub const AURA_TERMINATED: u32 = 2;
/// The call failed without transferring control
pub const AURA_ERROR: u32 = 3;

/// Trap site kinds accepted by `aura_register_method`
pub const AURA_TRAP_NULL_POINTER: u32 = 1;
pub const AURA_TRAP_ARITHMETIC: u32 = 2;

/// Where execution continues after a runtime call
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuraCompletion {
    pub kind: u32,
    /// Result of a normal completion: notify count, or 1 if a wait timed out
    pub value: usize,
    pub handler_pc: usize,
    pub sp: usize,
    /// Delivered or uncaught exception object
    pub exception: usize,
}

impl AuraCompletion {
    fn normal(value: usize) -> Self {
        Self {
            kind: AURA_NORMAL,
            value,
            handler_pc: 0,
            sp: 0,
            exception: 0,
        }
    }

    fn error() -> Self {
        Self {
            kind: AURA_ERROR,
            ..Self::normal(0)
        }
    }

    fn from_completion<T>(completion: Completion<T>, value: impl FnOnce(T) -> usize) -> Self {
        match completion {
            Completion::Normal(result) => Self::normal(value(result)),
            Completion::Handler(landing) => Self {
                kind: AURA_HANDLER,
                value: 0,
                handler_pc: landing.handler_pc,
                sp: landing.sp,
                exception: landing.exception.addr(),
            },
            Completion::Terminated { exception } => Self {
                kind: AURA_TERMINATED,
                exception: exception.addr(),
                ..Self::normal(0)
            },
        }
    }
}

/// Try region descriptor, `catch_type` 0 catches everything
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AuraTryRegion {
    pub start: usize,
    pub end: usize,
    pub catch_type: u32,
    pub handler_pc: usize,
}

/// Instruction that may fault, with the exception it raises
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AuraTrapSite {
    pub pc: usize,
    pub kind: u32,
}

fn runtime() -> Option<&'static Arc<Runtime>> {
    if RUNTIME.get().is_none() && !aura_init() {
        return None;
    }
    RUNTIME.get()
}

fn current() -> Option<Arc<ThreadContext>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Run `op` for the calling thread's context
fn with_thread<F>(name: &str, op: F) -> AuraCompletion
where
    F: FnOnce(&Runtime, &ThreadContext) -> Result<AuraCompletion, VmError>,
{
    let Some(runtime) = runtime() else {
        return AuraCompletion::error();
    };
    let Some(ctx) = current() else {
        log::error!("{} called from a thread that is not attached", name);
        return AuraCompletion::error();
    };
    match op(runtime, &ctx) {
        Ok(completion) => completion,
        Err(e) => {
            log::error!("{} failed: {}", name, e);
            AuraCompletion::error()
        },
    }
}

/// Object at `addr`, or a NullPointerException raised in the caller
fn object_or_raise(
    runtime: &Runtime,
    ctx: &ThreadContext,
    addr: usize,
) -> Result<Result<ObjRef, AuraCompletion>, VmError> {
    match runtime.space().resolve(addr) {
        Some(obj) => Ok(Ok(obj)),
        None => {
            let raised = runtime.raise(ctx, ExceptionKind::NullPointer)?;
            Ok(Err(AuraCompletion::from_completion(raised, |()| 0)))
        },
    }
}

#[no_mangle]
pub extern "C" fn aura_init() -> bool {
    if RUNTIME.get().is_some() {
        return true;
    }

    let config = VmConfig::from_env();
    logging::configure_logger(VmLoggerConfig::from_vm_config(&config));

    let methods = METHODS.get_or_init(|| Arc::new(MethodTable::new())).clone();
    match RuntimeBuilder::new().with_config(config).with_metadata(methods).build() {
        Ok(runtime) => {
            let runtime = Arc::new(runtime);
            if RUNTIME.set(runtime.clone()).is_ok() {
                unwind::register_trap_handler(runtime);
            }
            true
        },
        Err(e) => {
            eprintln!("Failed to create Aura runtime: {}", e);
            false
        },
    }
}

/// Register a compiled method with its try regions and trap sites
///
/// # Safety
/// `regions` and `traps` must point to `region_count` and `trap_count`
/// readable elements, or be null when the count is zero.
#[no_mangle]
pub unsafe extern "C" fn aura_register_method(
    id: u32,
    start: usize,
    end: usize,
    regions: *const AuraTryRegion,
    region_count: usize,
    traps: *const AuraTrapSite,
    trap_count: usize,
) -> bool {
    let regions = if region_count == 0 || regions.is_null() {
        &[][..]
    } else {
        std::slice::from_raw_parts(regions, region_count)
    };
    let traps = if trap_count == 0 || traps.is_null() {
        &[][..]
    } else {
        std::slice::from_raw_parts(traps, trap_count)
    };

    let mut method = MethodInfo::new(MethodId(id), format!("method#{}", id), PcRange::new(start, end));
    for region in regions {
        let catch_type = (region.catch_type != 0).then_some(TypeId(region.catch_type));
        method = method.with_region(TryRegion::new(
            PcRange::new(region.start, region.end),
            catch_type,
            region.handler_pc,
        ));
    }
    for site in traps {
        let kind = match site.kind {
            AURA_TRAP_NULL_POINTER => ExceptionKind::NullPointer,
            AURA_TRAP_ARITHMETIC => ExceptionKind::Arithmetic,
            other => {
                log::error!("Method {}: unknown trap kind {} at {:#x}", id, other, site.pc);
                return false;
            },
        };
        method = method.with_trap_site(site.pc, kind);
    }

    let methods = METHODS.get_or_init(|| Arc::new(MethodTable::new()));
    match methods.register(method) {
        Ok(_) => true,
        Err(e) => {
            log::error!("Registering method {} failed: {}", id, e);
            false
        },
    }
}

#[no_mangle]
pub extern "C" fn aura_attach() -> bool {
    if current().is_some() {
        return true;
    }
    let Some(runtime) = runtime() else {
        return false;
    };
    let name = std::thread::current().name().map(str::to_string);
    match runtime.attach(name.as_deref()) {
        Ok(ctx) => {
            CURRENT.with(|current| *current.borrow_mut() = Some(ctx));
            true
        },
        Err(e) => {
            log::error!("aura_attach failed: {}", e);
            false
        },
    }
}

/// Detach the calling thread
///
/// # Returns
/// Number of monitor acquisitions released on the way out
#[no_mangle]
pub extern "C" fn aura_detach() -> usize {
    let Some(ctx) = CURRENT.with(|current| current.borrow_mut().take()) else {
        return 0;
    };
    let Some(runtime) = RUNTIME.get() else {
        return 0;
    };
    match runtime.detach(&ctx) {
        Ok(released) => released,
        Err(e) => {
            log::error!("aura_detach failed: {}", e);
            0
        },
    }
}

/// Allocate an object of `type_id`, 0 on failure
#[no_mangle]
pub extern "C" fn aura_allocate(type_id: u32) -> usize {
    let Some(runtime) = runtime() else {
        return 0;
    };
    match runtime.allocate(TypeId(type_id)) {
        Ok(obj) => obj.addr(),
        Err(e) => {
            log::error!("aura_allocate failed: {}", e);
            0
        },
    }
}

#[no_mangle]
pub extern "C" fn aura_push_frame(method: u32, pc: usize, sp: usize) -> AuraCompletion {
    with_thread("aura_push_frame", |runtime, ctx| {
        let pushed = runtime.push_frame(ctx, MethodId(method), pc, sp)?;
        Ok(AuraCompletion::from_completion(pushed, |depth| depth))
    })
}

#[no_mangle]
pub extern "C" fn aura_pop_frame() -> bool {
    let (Some(runtime), Some(ctx)) = (RUNTIME.get(), current()) else {
        return false;
    };
    matches!(runtime.pop_frame(&ctx), Ok(Some(_)))
}

#[no_mangle]
pub extern "C" fn aura_set_pc(pc: usize) -> bool {
    let (Some(runtime), Some(ctx)) = (RUNTIME.get(), current()) else {
        return false;
    };
    runtime.set_pc(&ctx, pc).is_ok()
}

#[no_mangle]
pub extern "C" fn aura_poll() {
    if let (Some(runtime), Some(ctx)) = (RUNTIME.get(), current()) {
        runtime.poll(&ctx);
    }
}

#[no_mangle]
pub extern "C" fn aura_monitor_enter(obj: usize) -> AuraCompletion {
    with_thread("aura_monitor_enter", |runtime, ctx| {
        let obj = match object_or_raise(runtime, ctx, obj)? {
            Ok(obj) => obj,
            Err(raised) => return Ok(raised),
        };
        Ok(AuraCompletion::from_completion(runtime.monitor_enter(ctx, obj)?, |()| 0))
    })
}

#[no_mangle]
pub extern "C" fn aura_monitor_exit(obj: usize) -> AuraCompletion {
    with_thread("aura_monitor_exit", |runtime, ctx| {
        let obj = match object_or_raise(runtime, ctx, obj)? {
            Ok(obj) => obj,
            Err(raised) => return Ok(raised),
        };
        Ok(AuraCompletion::from_completion(runtime.monitor_exit(ctx, obj)?, |()| 0))
    })
}

/// Wait on `obj`; a negative timeout waits until notified
#[no_mangle]
pub extern "C" fn aura_wait(obj: usize, timeout_ms: i64) -> AuraCompletion {
    with_thread("aura_wait", |runtime, ctx| {
        let obj = match object_or_raise(runtime, ctx, obj)? {
            Ok(obj) => obj,
            Err(raised) => return Ok(raised),
        };
        let timeout = u64::try_from(timeout_ms).ok().map(Duration::from_millis);
        let waited = runtime.wait(ctx, obj, timeout)?;
        Ok(AuraCompletion::from_completion(waited, |status| {
            usize::from(status == WaitStatus::TimedOut)
        }))
    })
}

#[no_mangle]
pub extern "C" fn aura_notify(obj: usize) -> AuraCompletion {
    with_thread("aura_notify", |runtime, ctx| {
        let obj = match object_or_raise(runtime, ctx, obj)? {
            Ok(obj) => obj,
            Err(raised) => return Ok(raised),
        };
        Ok(AuraCompletion::from_completion(runtime.notify(ctx, obj)?, |woken| woken))
    })
}

#[no_mangle]
pub extern "C" fn aura_notify_all(obj: usize) -> AuraCompletion {
    with_thread("aura_notify_all", |runtime, ctx| {
        let obj = match object_or_raise(runtime, ctx, obj)? {
            Ok(obj) => obj,
            Err(raised) => return Ok(raised),
        };
        Ok(AuraCompletion::from_completion(runtime.notify_all(ctx, obj)?, |woken| woken))
    })
}

/// Throw `exception` from the current PC; a null exception raises
/// NullPointerException
#[no_mangle]
pub extern "C" fn aura_throw(exception: usize) -> AuraCompletion {
    with_thread("aura_throw", |runtime, ctx| {
        let exception = match object_or_raise(runtime, ctx, exception)? {
            Ok(exception) => exception,
            Err(raised) => return Ok(raised),
        };
        Ok(AuraCompletion::from_completion(runtime.throw(ctx, exception)?, |()| 0))
    })
}

#[no_mangle]
pub extern "C" fn aura_is_translatable(pc: usize) -> bool {
    unwind::is_translatable(pc)
}

/// Translate a hardware trap raised at `pc`
///
/// Called from the platform signal handler. A trap that does not
/// translate aborts the process.
#[no_mangle]
pub extern "C" fn aura_trap(signal: libc::c_int, pc: usize, fault_address: usize, sp: usize) -> AuraCompletion {
    let Some(trap_signal) = TrapSignal::from_signal(signal) else {
        fatal_trap(format!("signal {}", signal), pc, fault_address, "unsupported signal");
    };
    let Some(ctx) = current() else {
        fatal_trap(trap_signal.to_string(), pc, fault_address, "thread is not attached");
    };

    let trap = TrapContext::new(trap_signal, pc, fault_address, sp);
    match unwind::deliver_trap(&ctx, &trap) {
        Ok(outcome) => AuraCompletion::from_completion(Completion::<()>::from(outcome), |()| 0),
        Err(e) => fatal_trap(trap_signal.to_string(), pc, fault_address, &e.to_string()),
    }
}

/// Record a trap that cannot be translated and abort without unwinding
fn fatal_trap(signal: String, pc: usize, fault_address: usize, reason: &str) -> ! {
    eprintln!("Aura: fatal {} at {:#x} (fault address {:#x}): {}", signal, pc, fault_address, reason);
    logging::log_event(VmEvent::FatalTrap {
        signal,
        pc,
        fault_address,
    });
    std::process::abort();
}

#[no_mangle]
pub extern "C" fn aura_enter_native() {
    if let (Some(runtime), Some(ctx)) = (RUNTIME.get(), current()) {
        runtime.enter_native(&ctx);
    }
}

#[no_mangle]
pub extern "C" fn aura_leave_native() {
    if let (Some(runtime), Some(ctx)) = (RUNTIME.get(), current()) {
        runtime.leave_native(&ctx);
    }
}

/// Stop the world; the calling thread keeps running if attached
#[no_mangle]
pub extern "C" fn aura_request_stop_the_world() -> bool {
    let Some(runtime) = runtime() else {
        return false;
    };
    let ctx = current();
    match runtime.request_stop_the_world(ctx.as_deref()) {
        Ok(_) => true,
        Err(e) => {
            log::error!("aura_request_stop_the_world failed: {}", e);
            false
        },
    }
}

#[no_mangle]
pub extern "C" fn aura_resume_all() -> bool {
    let Some(runtime) = RUNTIME.get() else {
        return false;
    };
    match runtime.resume_all() {
        Ok(_) => true,
        Err(e) => {
            log::error!("aura_resume_all failed: {}", e);
            false
        },
    }
}
