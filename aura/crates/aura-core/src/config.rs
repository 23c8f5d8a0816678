//! Configuration Module - Execution Core Tuning Parameters
//!
//! Manages the parameters that shape monitor inflation, unwinding limits and
//! safepoint behaviour. Every parameter has a sensible default.

use crate::monitor::word::MAX_MONITOR_INDEX;
use std::time::Duration;

/// Main configuration for the Aura execution core
///
/// # Examples
///
/// ```rust
/// use aura_core::VmConfig;
///
/// // Use default configuration
/// let config = VmConfig::default();
/// assert!(config.validate().is_ok());
///
/// // Small embedded target
/// let config = VmConfig {
///     max_monitors: 256,
///     max_frames: 512,
///     spin_limit: 0,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Capacity of the monitor side table
    ///
    /// Inflation beyond this many live records raises OutOfMemoryError at
    /// the inflation site.
    ///
    /// Default: 65536
    pub max_monitors: usize,

    /// Spin iterations before a contended thin lock is inflated
    ///
    /// Spinning only pays off when the owner can make progress on another
    /// CPU, so single-CPU hosts default to 0.
    ///
    /// Default: 64 (0 on single-CPU hosts)
    pub spin_limit: u32,

    /// Maximum shadow stack depth per thread
    ///
    /// Pushing a frame beyond this raises StackOverflowError.
    ///
    /// Default: 4096
    pub max_frames: usize,

    /// How long `request_stop_the_world` waits for threads (milliseconds)
    ///
    /// 0 waits indefinitely, logging a warning every second.
    ///
    /// Default: 0
    pub safepoint_timeout_ms: u64,

    /// Guard pages below every thread stack
    ///
    /// Faults that land in the guard zone are translated to
    /// StackOverflowError instead of NullPointerException.
    ///
    /// Default: 1
    pub stack_guard_pages: usize,

    /// Conservatively scan published stack ranges when enumerating roots
    ///
    /// Default: true
    pub conservative_stack_scan: bool,

    /// Echo runtime events to the console
    ///
    /// Default: false
    pub verbose: bool,

    /// Emit console events as JSON lines instead of text
    ///
    /// Default: false
    pub log_json: bool,

    /// Collect runtime counters
    ///
    /// Default: true
    pub stats_enabled: bool,
}

impl Default for VmConfig {
    /// Default configuration for the execution core
    fn default() -> Self {
        let cpus = num_cpus::get();

        VmConfig {
            // Monitors
            max_monitors: 64 * 1024,
            spin_limit: if cpus > 1 { 64 } else { 0 },

            // Unwinding
            max_frames: 4096,
            stack_guard_pages: 1,

            // Safepoints
            safepoint_timeout_ms: 0,
            conservative_stack_scan: true,

            // Debug
            verbose: false,
            log_json: false,
            stats_enabled: true,
        }
    }
}

impl VmConfig {
    /// Validate configuration
    ///
    /// Checks if all values are in valid ranges.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use aura_core::VmConfig;
    ///
    /// let config = VmConfig {
    ///     max_monitors: 0,  // Invalid!
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_monitors == 0 {
            return Err(ConfigError::InvalidMonitorCapacity(
                "max_monitors must be > 0".to_string(),
            ));
        }

        if self.max_monitors > MAX_MONITOR_INDEX {
            return Err(ConfigError::InvalidMonitorCapacity(format!(
                "max_monitors cannot exceed {} (monitor word index width)",
                MAX_MONITOR_INDEX
            )));
        }

        if self.max_frames == 0 {
            return Err(ConfigError::InvalidFrameLimit(
                "max_frames must be > 0".to_string(),
            ));
        }

        if self.max_frames > MAX_FRAMES_LIMIT {
            return Err(ConfigError::InvalidFrameLimit(format!(
                "max_frames cannot exceed {}",
                MAX_FRAMES_LIMIT
            )));
        }

        if self.spin_limit > MAX_SPIN_LIMIT {
            return Err(ConfigError::InvalidSpinLimit(format!(
                "spin_limit cannot exceed {}",
                MAX_SPIN_LIMIT
            )));
        }

        if self.stack_guard_pages > 64 {
            return Err(ConfigError::InvalidGuardPages(
                "stack_guard_pages must be between 0 and 64".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - AURA_MAX_MONITORS
    /// - AURA_SPIN_LIMIT
    /// - AURA_MAX_FRAMES
    /// - AURA_SAFEPOINT_TIMEOUT_MS
    /// - AURA_VERBOSE
    ///
    /// # Examples
    ///
    /// ```bash
    /// export AURA_MAX_MONITORS=1024
    /// export AURA_SPIN_LIMIT=0
    /// export AURA_VERBOSE=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("AURA_MAX_MONITORS") {
            if let Ok(count) = val.parse::<usize>() {
                config.max_monitors = count;
            }
        }

        if let Ok(val) = std::env::var("AURA_SPIN_LIMIT") {
            if let Ok(spins) = val.parse::<u32>() {
                config.spin_limit = spins;
            }
        }

        if let Ok(val) = std::env::var("AURA_MAX_FRAMES") {
            if let Ok(frames) = val.parse::<usize>() {
                config.max_frames = frames;
            }
        }

        if let Ok(val) = std::env::var("AURA_SAFEPOINT_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.safepoint_timeout_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("AURA_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Stop-the-world timeout, `None` when waiting indefinitely
    pub fn safepoint_timeout(&self) -> Option<Duration> {
        match self.safepoint_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid monitor capacity: {0}")]
    InvalidMonitorCapacity(String),

    #[error("Invalid frame limit: {0}")]
    InvalidFrameLimit(String),

    #[error("Invalid spin limit: {0}")]
    InvalidSpinLimit(String),

    #[error("Invalid guard pages: {0}")]
    InvalidGuardPages(String),
}

// ============================================================================
// CONSTANTS
// ============================================================================

const MAX_FRAMES_LIMIT: usize = 1 << 20;
const MAX_SPIN_LIMIT: u32 = 1_000_000;
