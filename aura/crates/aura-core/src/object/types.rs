//! Type hierarchy collaborator
//!
//! The core only needs one question answered about types: is one type a
//! proper ancestor of another. `TypeHierarchy` is that contract. The
//! `TypeRegistry` is a simple parent-chain implementation that also carries
//! the built-in throwable hierarchy synthesized exceptions belong to.

use crate::error::{Result, VmError};
use crate::object::TypeId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Built-in type ids
pub mod builtin {
    use crate::object::TypeId;

    pub const OBJECT: TypeId = TypeId(1);
    pub const THROWABLE: TypeId = TypeId(2);
    pub const EXCEPTION: TypeId = TypeId(3);
    pub const RUNTIME_EXCEPTION: TypeId = TypeId(4);
    pub const ERROR: TypeId = TypeId(5);
    pub const VIRTUAL_MACHINE_ERROR: TypeId = TypeId(6);
    pub const NULL_POINTER_EXCEPTION: TypeId = TypeId(7);
    pub const ARITHMETIC_EXCEPTION: TypeId = TypeId(8);
    pub const ILLEGAL_MONITOR_STATE_EXCEPTION: TypeId = TypeId(9);
    pub const STACK_OVERFLOW_ERROR: TypeId = TypeId(10);
    pub const OUT_OF_MEMORY_ERROR: TypeId = TypeId(11);

    /// First id handed out by `TypeRegistry::register`
    pub const FIRST_USER_TYPE: u32 = 64;
}

/// Type hierarchy queries consumed by the unwinder
pub trait TypeHierarchy: Send + Sync {
    /// True if `ancestor` is a proper ancestor of `descendant`
    fn is_ancestor(&self, ancestor: TypeId, descendant: TypeId) -> bool;

    /// Human readable type name for diagnostics
    fn type_name(&self, _id: TypeId) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
struct TypeEntry {
    name: String,
    parent: Option<TypeId>,
}

/// Parent-chain type registry
pub struct TypeRegistry {
    types: RwLock<FxHashMap<TypeId, TypeEntry>>,
    next_id: AtomicU32,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            types: RwLock::new(FxHashMap::default()),
            next_id: AtomicU32::new(builtin::FIRST_USER_TYPE),
        }
    }

    /// Create a registry pre-populated with the built-in throwable hierarchy
    pub fn with_builtins() -> Self {
        use builtin::*;

        let registry = Self::new();
        {
            let mut types = registry.types.write();
            let mut define = |id: TypeId, name: &str, parent: Option<TypeId>| {
                types.insert(
                    id,
                    TypeEntry {
                        name: name.to_string(),
                        parent,
                    },
                );
            };

            define(OBJECT, "java.lang.Object", None);
            define(THROWABLE, "java.lang.Throwable", Some(OBJECT));
            define(EXCEPTION, "java.lang.Exception", Some(THROWABLE));
            define(RUNTIME_EXCEPTION, "java.lang.RuntimeException", Some(EXCEPTION));
            define(ERROR, "java.lang.Error", Some(THROWABLE));
            define(VIRTUAL_MACHINE_ERROR, "java.lang.VirtualMachineError", Some(ERROR));
            define(NULL_POINTER_EXCEPTION, "java.lang.NullPointerException", Some(RUNTIME_EXCEPTION));
            define(ARITHMETIC_EXCEPTION, "java.lang.ArithmeticException", Some(RUNTIME_EXCEPTION));
            define(
                ILLEGAL_MONITOR_STATE_EXCEPTION,
                "java.lang.IllegalMonitorStateException",
                Some(RUNTIME_EXCEPTION),
            );
            define(STACK_OVERFLOW_ERROR, "java.lang.StackOverflowError", Some(VIRTUAL_MACHINE_ERROR));
            define(OUT_OF_MEMORY_ERROR, "java.lang.OutOfMemoryError", Some(VIRTUAL_MACHINE_ERROR));
        }
        registry
    }

    /// Register a new type under `parent`
    ///
    /// # Arguments
    /// * `name` - Fully qualified type name
    /// * `parent` - Direct supertype, `None` for a root type
    ///
    /// # Returns
    /// The new type id, or `InvalidArgument` if the parent is unknown
    pub fn register(&self, name: &str, parent: Option<TypeId>) -> Result<TypeId> {
        let mut types = self.types.write();
        if let Some(parent) = parent {
            if !types.contains_key(&parent) {
                return Err(VmError::InvalidArgument(format!(
                    "unknown parent type {} for {}",
                    parent.0, name
                )));
            }
        }

        let id = TypeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        types.insert(
            id,
            TypeEntry {
                name: name.to_string(),
                parent,
            },
        );
        Ok(id)
    }

    /// Direct supertype of `id`
    pub fn parent(&self, id: TypeId) -> Option<TypeId> {
        self.types.read().get(&id).and_then(|entry| entry.parent)
    }

    /// Check if `id` is registered
    pub fn contains(&self, id: TypeId) -> bool {
        self.types.read().contains_key(&id)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// Check if no types are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TypeHierarchy for TypeRegistry {
    fn is_ancestor(&self, ancestor: TypeId, descendant: TypeId) -> bool {
        let types = self.types.read();
        let mut current = types.get(&descendant).and_then(|entry| entry.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = types.get(&id).and_then(|entry| entry.parent);
        }
        false
    }

    fn type_name(&self, id: TypeId) -> Option<String> {
        self.types.read().get(&id).map(|entry| entry.name.clone())
    }
}
