//! Object Module - Managed object model
//!
//! Header layout, object references, the object space and the type
//! hierarchy collaborator.

pub mod header;
pub mod space;
pub mod types;

pub use header::{ObjRef, ObjectHeader, HEADER_SIZE};
pub use space::ObjectSpace;
pub use types::{builtin, TypeHierarchy, TypeRegistry};

use serde::Serialize;

/// Type descriptor reference stored in every object header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
pub struct TypeId(pub u32);
