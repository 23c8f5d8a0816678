//! Runtime Initialization
//!
//! Assembles a `Runtime` from a configuration and the external
//! collaborators: code metadata, the type hierarchy, the object space, the
//! exception factory and the uncaught-exception sink. Any collaborator not
//! supplied gets a default.

use crate::config::VmConfig;
use crate::error::{Result, VmError};
use crate::logging::{VmLogger, VmLoggerConfig};
use crate::monitor::Monitors;
use crate::object::{ObjectSpace, TypeHierarchy, TypeRegistry};
use crate::roots::RootScanner;
use crate::runtime::Runtime;
use crate::safepoint::SafepointCoordinator;
use crate::stats::VmStats;
use crate::thread::ThreadRegistry;
use crate::unwind::{
    CodeMetadata, ExceptionFactory, HeapExceptionFactory, LogUncaughtHandler, MethodTable, TrapTranslator,
    UncaughtExceptionHandler, UnwindEngine,
};
use std::sync::Arc;

/// RuntimeBuilder - builder for `Runtime`
///
/// # Examples
///
/// ```rust
/// use aura_core::runtime::RuntimeBuilder;
/// use aura_core::unwind::{MethodId, MethodInfo, MethodTable, PcRange};
/// use aura_core::VmConfig;
/// use std::sync::Arc;
///
/// let methods = Arc::new(MethodTable::new());
/// methods.register(MethodInfo::new(MethodId(1), "main", PcRange::new(0x1000, 0x1100)))?;
///
/// let runtime = RuntimeBuilder::new()
///     .with_config(VmConfig { max_monitors: 128, ..Default::default() })
///     .with_metadata(methods)
///     .build()?;
/// assert_eq!(runtime.monitors().table().capacity(), 128);
/// # Ok::<(), aura_core::VmError>(())
/// ```
#[derive(Default)]
pub struct RuntimeBuilder {
    config: VmConfig,
    metadata: Option<Arc<dyn CodeMetadata>>,
    types: Option<Arc<dyn TypeHierarchy>>,
    space: Option<Arc<ObjectSpace>>,
    factory: Option<Arc<dyn ExceptionFactory>>,
    uncaught: Option<Arc<dyn UncaughtExceptionHandler>>,
    logger: Option<Arc<VmLogger>>,
}

impl RuntimeBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: VmConfig) -> Self {
        self.config = config;
        self
    }

    /// Compiled-method metadata, an empty method table by default
    pub fn with_metadata(mut self, metadata: Arc<dyn CodeMetadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Type hierarchy, the built-in registry by default
    pub fn with_types(mut self, types: Arc<dyn TypeHierarchy>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn with_space(mut self, space: Arc<ObjectSpace>) -> Self {
        self.space = Some(space);
        self
    }

    pub fn with_exception_factory(mut self, factory: Arc<dyn ExceptionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_uncaught_handler(mut self, handler: Arc<dyn UncaughtExceptionHandler>) -> Self {
        self.uncaught = Some(handler);
        self
    }

    /// Share an event logger instead of creating one from the config
    pub fn with_logger(mut self, logger: Arc<VmLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Validate the configuration and assemble the runtime
    pub fn build(self) -> Result<Runtime> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| VmError::Configuration(format!("Invalid config: {}", e)))?;

        let stats = Arc::new(VmStats::new(config.stats_enabled));
        let logger = self
            .logger
            .unwrap_or_else(|| Arc::new(VmLogger::new(VmLoggerConfig::from_vm_config(&config))));

        let registry = Arc::new(ThreadRegistry::new(config.max_frames));
        let safepoint = Arc::new(SafepointCoordinator::with_observers(
            registry.clone(),
            config.safepoint_timeout(),
            stats.clone(),
            logger.clone(),
        ));
        let monitors = Arc::new(Monitors::new(
            config.max_monitors,
            config.spin_limit,
            safepoint.clone(),
            stats.clone(),
            logger.clone(),
        ));

        let space = self.space.unwrap_or_else(|| Arc::new(ObjectSpace::new()));
        let metadata = self
            .metadata
            .unwrap_or_else(|| Arc::new(MethodTable::new()) as Arc<dyn CodeMetadata>);
        let types = self
            .types
            .unwrap_or_else(|| Arc::new(TypeRegistry::with_builtins()) as Arc<dyn TypeHierarchy>);
        let factory = match self.factory {
            Some(factory) => factory,
            None => Arc::new(HeapExceptionFactory::new(space.clone())?),
        };
        let uncaught = self
            .uncaught
            .unwrap_or_else(|| Arc::new(LogUncaughtHandler) as Arc<dyn UncaughtExceptionHandler>);

        let engine = UnwindEngine::new(
            metadata.clone(),
            types,
            monitors.clone(),
            safepoint.clone(),
            factory,
            uncaught,
            stats.clone(),
            logger.clone(),
        );
        let traps = TrapTranslator::new(metadata, config.stack_guard_pages, stats.clone(), logger.clone());
        let roots = RootScanner::new(space.clone(), config.conservative_stack_scan);

        log::info!(
            "Aura runtime initialized: {} monitor records, spin limit {}, {} frames per thread",
            config.max_monitors,
            config.spin_limit,
            config.max_frames
        );

        Ok(Runtime {
            config,
            registry,
            safepoint,
            monitors,
            engine,
            traps,
            roots,
            space,
            stats,
            logger,
        })
    }
}

/// Initialize a runtime with default config
pub fn init_default() -> Result<Runtime> {
    RuntimeBuilder::new().build()
}

/// Initialize a runtime with custom config
pub fn init_with_config(config: VmConfig) -> Result<Runtime> {
    RuntimeBuilder::new().with_config(config).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let config = VmConfig {
            max_monitors: 0,
            ..Default::default()
        };
        assert!(matches!(
            init_with_config(config),
            Err(VmError::Configuration(_))
        ));
    }

    #[test]
    fn test_default_collaborators() {
        let runtime = init_default().unwrap();
        // Preallocated OutOfMemoryError
        assert_eq!(runtime.space().len(), 1);
        assert!(!runtime.is_translatable(0x1000));
        assert_eq!(runtime.monitors().table().capacity(), VmConfig::default().max_monitors);
    }

    #[test]
    fn test_shared_logger() {
        let logger = Arc::new(VmLogger::default());
        let runtime = RuntimeBuilder::new().with_logger(logger.clone()).build().unwrap();
        assert!(Arc::ptr_eq(runtime.logger(), &logger));
    }
}
