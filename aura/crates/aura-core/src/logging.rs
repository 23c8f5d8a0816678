//! Runtime Event Logging
//!
//! Structured record of the events that matter when diagnosing lock and
//! exception behaviour. Every event is forwarded to the `log` facade and
//! kept in a bounded in-memory ring; console echo is optional.
//!
//! Log Levels:
//! - ERROR: fatal traps, uncaught exceptions
//! - INFO: safepoints, thread lifecycle
//! - DEBUG: throws, handlers, inflation, trap translation
//! - TRACE: deflation

use crate::util::constants::DEFAULT_EVENT_CAPACITY;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for runtime events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// Runtime event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VmEvent {
    ThreadAttached {
        thread: u32,
        name: Option<String>,
    },

    ThreadDetached {
        thread: u32,
        locks_released: usize,
    },

    /// Monitor moved to the side table
    Inflated {
        object: usize,
        index: usize,
        thread: u32,
    },

    /// Idle monitor returned to the header
    Deflated { object: usize, index: usize },

    SafepointBegin { epoch: u64, threads: usize },

    SafepointReached {
        epoch: u64,
        threads: usize,
        elapsed_us: u64,
    },

    SafepointEnd {
        epoch: u64,
        pause_us: u64,
        deflated: usize,
    },

    ExceptionThrown {
        thread: u32,
        exception: usize,
        type_id: u32,
        pc: usize,
    },

    /// Exception raised while another one was unwinding
    ExceptionReplaced {
        thread: u32,
        discarded: usize,
        exception: usize,
    },

    HandlerFound {
        thread: u32,
        exception: usize,
        handler_pc: usize,
        depth: usize,
        frames_unwound: usize,
    },

    Uncaught { thread: u32, exception: usize },

    TrapTranslated {
        thread: u32,
        signal: String,
        pc: usize,
        kind: String,
    },

    FatalTrap {
        signal: String,
        pc: usize,
        fault_address: usize,
    },
}

impl VmEvent {
    /// Get log level for event
    pub fn level(&self) -> LogLevel {
        match self {
            VmEvent::FatalTrap { .. } | VmEvent::Uncaught { .. } => LogLevel::Error,
            VmEvent::ExceptionReplaced { .. } => LogLevel::Warn,
            VmEvent::ThreadAttached { .. }
            | VmEvent::ThreadDetached { .. }
            | VmEvent::SafepointBegin { .. }
            | VmEvent::SafepointReached { .. }
            | VmEvent::SafepointEnd { .. } => LogLevel::Info,
            VmEvent::Inflated { .. }
            | VmEvent::ExceptionThrown { .. }
            | VmEvent::HandlerFound { .. }
            | VmEvent::TrapTranslated { .. } => LogLevel::Debug,
            VmEvent::Deflated { .. } => LogLevel::Trace,
        }
    }

    /// Human-readable one-line description
    pub fn describe(&self) -> String {
        match self {
            VmEvent::ThreadAttached { thread, name } => match name {
                Some(name) => format!("[AURA] Thread #{} attached ({})", thread, name),
                None => format!("[AURA] Thread #{} attached", thread),
            },
            VmEvent::ThreadDetached {
                thread,
                locks_released,
            } => format!(
                "[AURA] Thread #{} detached ({} held locks released)",
                thread, locks_released
            ),
            VmEvent::Inflated {
                object,
                index,
                thread,
            } => format!(
                "[AURA] Monitor of {:#x} inflated to record {} by thread #{}",
                object, index, thread
            ),
            VmEvent::Deflated { object, index } => {
                format!("[AURA] Monitor of {:#x} deflated (record {})", object, index)
            },
            VmEvent::SafepointBegin { epoch, threads } => format!(
                "[AURA] Safepoint {} requested ({} threads)",
                epoch, threads
            ),
            VmEvent::SafepointReached {
                epoch,
                threads,
                elapsed_us,
            } => format!(
                "[AURA] Safepoint {} reached: {} threads stopped in {} us",
                epoch, threads, elapsed_us
            ),
            VmEvent::SafepointEnd {
                epoch,
                pause_us,
                deflated,
            } => format!(
                "[AURA] Safepoint {} released after {} us ({} monitors deflated)",
                epoch, pause_us, deflated
            ),
            VmEvent::ExceptionThrown {
                thread,
                exception,
                type_id,
                pc,
            } => format!(
                "[AURA] Thread #{} threw {:#x} (type {}) at pc {:#x}",
                thread, exception, type_id, pc
            ),
            VmEvent::ExceptionReplaced {
                thread,
                discarded,
                exception,
            } => format!(
                "[AURA] Thread #{} discarded in-flight exception {:#x} for {:#x}",
                thread, discarded, exception
            ),
            VmEvent::HandlerFound {
                thread,
                exception,
                handler_pc,
                depth,
                frames_unwound,
            } => format!(
                "[AURA] Thread #{} caught {:#x} at pc {:#x} (depth {}, {} frames unwound)",
                thread, exception, handler_pc, depth, frames_unwound
            ),
            VmEvent::Uncaught { thread, exception } => format!(
                "[AURA] Uncaught exception {:#x} terminated thread #{}",
                exception, thread
            ),
            VmEvent::TrapTranslated {
                thread,
                signal,
                pc,
                kind,
            } => format!(
                "[AURA] Thread #{}: {} at pc {:#x} translated to {}",
                thread, signal, pc, kind
            ),
            VmEvent::FatalTrap {
                signal,
                pc,
                fault_address,
            } => format!(
                "[AURA] Fatal {} at pc {:#x} (fault address {:#x})",
                signal, pc, fault_address
            ),
        }
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct VmLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Echo events to the console
    pub console: bool,

    /// Emit console output as JSON lines
    pub json: bool,

    /// Prefix console output with timestamps
    pub timestamps: bool,

    /// Number of events retained in memory
    pub capacity: usize,
}

impl Default for VmLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl VmLoggerConfig {
    /// Logger configuration derived from runtime configuration
    pub fn from_vm_config(config: &crate::VmConfig) -> Self {
        Self {
            level: if config.verbose {
                LogLevel::Debug
            } else {
                LogLevel::Info
            },
            console: config.verbose,
            json: config.log_json,
            ..Default::default()
        }
    }
}

/// VmLogger - centralized event log for the execution core
pub struct VmLogger {
    config: VmLoggerConfig,
    events: Mutex<VecDeque<(Instant, VmEvent)>>,
    enabled: AtomicBool,
}

impl VmLogger {
    /// Create new logger
    pub fn new(config: VmLoggerConfig) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(config.capacity.min(64))),
            config,
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a runtime event
    pub fn log(&self, event: VmEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = event.level();
        let facade_level: log::Level = level.into();
        log::log!(target: "aura", facade_level, "{}", event.describe());

        if level > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if events.len() >= self.config.capacity {
            events.pop_front();
        }
        if self.config.capacity > 0 {
            events.push_back((Instant::now(), event));
        }
    }

    /// Output to console
    fn output_console(&self, event: &VmEvent) {
        let stamp = if self.config.timestamps {
            format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        } else {
            String::new()
        };

        let line = if self.config.json {
            match serde_json::to_string(event) {
                Ok(json) => json,
                Err(_) => return,
            }
        } else {
            event.describe()
        };

        if event.level() <= LogLevel::Warn {
            eprintln!("{}{}", stamp, line);
        } else {
            println!("{}{}", stamp, line);
        }
    }

    /// Get all retained events
    pub fn events(&self) -> Vec<VmEvent> {
        self.events
            .lock()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Retained events as JSON lines
    pub fn to_json_lines(&self) -> String {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, event)| serde_json::to_string(event).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Clear all events
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for VmLogger {
    fn default() -> Self {
        Self::new(VmLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    /// Global runtime logger
    static ref GLOBAL_LOGGER: Mutex<VmLogger> = Mutex::new(VmLogger::default());
}

/// Log an event to the global logger
pub fn log_event(event: VmEvent) {
    GLOBAL_LOGGER.lock().log(event);
}

/// Configure global logger
pub fn configure_logger(config: VmLoggerConfig) {
    *GLOBAL_LOGGER.lock() = VmLogger::new(config);
}

/// Get global logger event count
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.lock().event_count()
}
