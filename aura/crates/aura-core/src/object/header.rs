//! Object Header - Fixed-offset metadata for every managed object
//!
//! Object Header Layout (24 bytes on 64-bit):
//! ┌─────────────────────────────────────────┐
//! │     Type Id (4 bytes) + padding         │  <- TypeId
//! ├─────────────────────────────────────────┤
//! │        Monitor Word (8 bytes)           │  <- AtomicUsize, see monitor::word
//! ├─────────────────────────────────────────┤
//! │          GC Word (8 bytes)              │  <- AtomicUsize
//! │  - Bit 0: Marked                        │
//! │  - Bit 1: Forwarded                     │
//! │  - Bits 3-63: Forwarding address        │
//! └─────────────────────────────────────────┘
//!
//! The monitor word is only ever changed by compare-and-swap. The GC word is
//! owned by the collector during stop-the-world.

use crate::object::TypeId;
use crate::util::AtomicUtils;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Size of object header in bytes
pub const HEADER_SIZE: usize = std::mem::size_of::<ObjectHeader>();

/// GC word bit positions
pub const MARKED_BIT: usize = 0;
pub const FORWARDED_BIT: usize = 1;

/// Masks for GC word fields
pub const MARKED_MASK: usize = 1 << MARKED_BIT;
pub const FORWARDED_MASK: usize = 1 << FORWARDED_BIT;
pub const FORWARDING_MASK: usize = !0b111;

/// Object Header
///
/// Every managed object starts with this header. The layout is identical for
/// all objects regardless of type.
#[repr(C)]
pub struct ObjectHeader {
    type_id: TypeId,
    monitor: AtomicUsize,
    gc_word: AtomicUsize,
}

impl ObjectHeader {
    /// Create new object header with an unlocked monitor word
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            monitor: AtomicUsize::new(0),
            gc_word: AtomicUsize::new(0),
        }
    }

    /// Type descriptor of the object
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    // === Monitor Word ===

    /// Load the raw monitor word
    #[inline]
    pub fn load_monitor(&self) -> usize {
        AtomicUtils::load_acquire(&self.monitor)
    }

    /// Compare-and-swap the raw monitor word
    ///
    /// # Returns
    /// `Ok(previous)` if the word was `current`, `Err(actual)` otherwise
    #[inline]
    pub fn cas_monitor(&self, current: usize, new: usize) -> Result<usize, usize> {
        AtomicUtils::compare_and_swap(&self.monitor, current, new)
    }

    // === GC Word ===

    /// Check if object is marked
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.gc_word.load(Ordering::Acquire) & MARKED_MASK != 0
    }

    /// Set mark bit atomically
    /// Returns true if bit was already set
    #[inline]
    pub fn set_marked(&self) -> bool {
        self.gc_word.fetch_or(MARKED_MASK, Ordering::AcqRel) & MARKED_MASK != 0
    }

    /// Clear mark bit atomically
    #[inline]
    pub fn clear_mark(&self) {
        self.gc_word.fetch_and(!MARKED_MASK, Ordering::AcqRel);
    }

    /// Check if object has been forwarded
    #[inline]
    pub fn is_forwarded(&self) -> bool {
        self.gc_word.load(Ordering::Acquire) & FORWARDED_MASK != 0
    }

    /// Forwarding address, 0 if not forwarded
    #[inline]
    pub fn forwarding_address(&self) -> usize {
        let word = self.gc_word.load(Ordering::Acquire);
        if word & FORWARDED_MASK != 0 {
            word & FORWARDING_MASK
        } else {
            0
        }
    }

    /// Install a forwarding address
    ///
    /// Returns false if another forwarding address is already installed.
    pub fn try_set_forwarding(&self, new_addr: usize) -> bool {
        debug_assert_eq!(new_addr & !FORWARDING_MASK, 0, "forwarding address must be aligned");
        let current = self.gc_word.load(Ordering::Acquire);
        if current & FORWARDED_MASK != 0 {
            return false;
        }
        let new_word = (new_addr & FORWARDING_MASK) | FORWARDED_MASK | (current & MARKED_MASK);
        self.gc_word
            .compare_exchange(current, new_word, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("type_id", &self.type_id)
            .field("monitor", &format_args!("{:#x}", self.load_monitor()))
            .field("marked", &self.is_marked())
            .finish()
    }
}

/// Reference to a managed object
///
/// A thin, copyable handle to an object header. Validity is maintained by the
/// object space: a reference stays valid while the object is reachable from a
/// root.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(NonNull<ObjectHeader>);

// Headers are only mutated through atomics.
unsafe impl Send for ObjRef {}
unsafe impl Sync for ObjRef {}

impl ObjRef {
    /// Create a reference from a raw header address
    ///
    /// # Safety
    /// `addr` must point to a live `ObjectHeader` that outlives every use of
    /// the returned reference.
    #[inline]
    pub unsafe fn from_addr(addr: usize) -> Option<Self> {
        NonNull::new(addr as *mut ObjectHeader).map(ObjRef)
    }

    pub(crate) fn from_header(header: &ObjectHeader) -> Self {
        ObjRef(NonNull::from(header))
    }

    /// Address of the object header
    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Borrow the object header
    #[inline]
    pub fn header(&self) -> &ObjectHeader {
        // SAFETY: ObjRef is only created for live headers (see `from_addr`)
        unsafe { self.0.as_ref() }
    }

    /// Type descriptor of the object
    #[inline]
    pub fn type_id(self) -> TypeId {
        self.header().type_id()
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:#x})", self.addr())
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_SIZE % 8, 0);
        let header = ObjectHeader::new(TypeId(7));
        assert_eq!(header.type_id(), TypeId(7));
        assert_eq!(header.load_monitor(), 0);
        assert!(!header.is_marked());
    }

    #[test]
    fn test_monitor_cas() {
        let header = ObjectHeader::new(TypeId(1));
        assert_eq!(header.cas_monitor(0, 0x41), Ok(0));
        assert_eq!(header.cas_monitor(0, 0x81), Err(0x41));
        assert_eq!(header.load_monitor(), 0x41);
    }

    #[test]
    fn test_mark_bits() {
        let header = ObjectHeader::new(TypeId(1));
        assert!(!header.set_marked());
        assert!(header.set_marked());
        header.clear_mark();
        assert!(!header.is_marked());
    }

    #[test]
    fn test_forwarding() {
        let header = ObjectHeader::new(TypeId(1));
        header.set_marked();
        assert!(header.try_set_forwarding(0x1000));
        assert!(header.is_forwarded());
        assert!(header.is_marked());
        assert_eq!(header.forwarding_address(), 0x1000);
        assert!(!header.try_set_forwarding(0x2000));
    }

    #[test]
    fn test_obj_ref() {
        let header = Box::new(ObjectHeader::new(TypeId(3)));
        let obj = ObjRef::from_header(&header);
        assert_eq!(obj.type_id(), TypeId(3));
        assert_eq!(unsafe { ObjRef::from_addr(obj.addr()) }, Some(obj));
        assert_eq!(unsafe { ObjRef::from_addr(0) }, None);
        assert!(obj.to_string().starts_with("0x"));
    }
}
