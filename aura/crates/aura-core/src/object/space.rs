//! Object Space - registry of live managed objects
//!
//! The execution core does not allocate or move objects itself; the space is
//! the minimal heap it needs: stable header addresses, an address validity
//! check for conservative scanning and a mark/sweep hook for tests and
//! embedders without a collector of their own.

use crate::error::{Result, VmError};
use crate::monitor::MonitorWord;
use crate::object::{ObjRef, ObjectHeader, TypeId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Registry of live objects keyed by header address
pub struct ObjectSpace {
    objects: Mutex<FxHashMap<usize, Box<ObjectHeader>>>,
    capacity: Option<usize>,
}

impl ObjectSpace {
    /// Create an unbounded object space
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(FxHashMap::default()),
            capacity: None,
        }
    }

    /// Create an object space holding at most `capacity` objects
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            objects: Mutex::new(FxHashMap::default()),
            capacity: Some(capacity),
        }
    }

    /// Allocate a new object of type `type_id`
    pub fn allocate(&self, type_id: TypeId) -> Result<ObjRef> {
        let mut objects = self.objects.lock();
        if let Some(capacity) = self.capacity {
            if objects.len() >= capacity {
                return Err(VmError::Internal(format!(
                    "object space exhausted ({} objects)",
                    capacity
                )));
            }
        }

        let header = Box::new(ObjectHeader::new(type_id));
        let obj = ObjRef::from_header(&header);
        objects.insert(obj.addr(), header);
        Ok(obj)
    }

    /// Look up a live object by header address
    pub fn resolve(&self, addr: usize) -> Option<ObjRef> {
        self.objects
            .lock()
            .get(&addr)
            .map(|header| ObjRef::from_header(header))
    }

    /// Check if `addr` is the header address of a live object
    pub fn contains(&self, addr: usize) -> bool {
        self.objects.lock().contains_key(&addr)
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Check if the space is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear mark bits on every object
    pub fn clear_marks(&self) {
        for header in self.objects.lock().values() {
            header.clear_mark();
        }
    }

    /// Free every unmarked object and clear surviving marks
    ///
    /// Must only be called while the world is stopped, after every root has
    /// been marked. Objects whose monitor word is not unlocked survive even
    /// when unmarked, since a lock record or side-table entry still names
    /// them.
    ///
    /// # Returns
    /// Number of objects freed
    pub fn sweep_unmarked(&self) -> usize {
        let mut objects = self.objects.lock();
        let before = objects.len();
        let mut pinned = 0usize;
        objects.retain(|_, header| {
            if header.is_marked() {
                return true;
            }
            let locked = !MonitorWord::decode(header.load_monitor()).is_some_and(MonitorWord::is_unlocked);
            pinned += locked as usize;
            locked
        });
        for header in objects.values() {
            header.clear_mark();
        }
        if pinned > 0 {
            log::warn!("Sweep kept {} unmarked object(s) with a live monitor", pinned);
        }
        before - objects.len()
    }
}

impl Default for ObjectSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_resolve() {
        let space = ObjectSpace::new();
        let obj = space.allocate(TypeId(5)).unwrap();
        assert!(space.contains(obj.addr()));
        assert_eq!(space.resolve(obj.addr()), Some(obj));
        assert!(!space.contains(obj.addr() + 8));
        assert_eq!(space.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let space = ObjectSpace::with_capacity(1);
        space.allocate(TypeId(1)).unwrap();
        assert!(space.allocate(TypeId(1)).is_err());
    }

    #[test]
    fn test_sweep_unmarked() {
        let space = ObjectSpace::new();
        let live = space.allocate(TypeId(1)).unwrap();
        space.allocate(TypeId(1)).unwrap();
        space.allocate(TypeId(1)).unwrap();

        live.header().set_marked();
        assert_eq!(space.sweep_unmarked(), 2);
        assert!(space.contains(live.addr()));
        assert!(!live.header().is_marked());
    }

    #[test]
    fn test_sweep_keeps_locked_objects() {
        let space = ObjectSpace::new();
        let thin = space.allocate(TypeId(1)).unwrap();
        let inflated = space.allocate(TypeId(1)).unwrap();
        let garbage = space.allocate(TypeId(1)).unwrap();

        let owner = crate::thread::ThreadId::new(3).unwrap();
        let thin_word = MonitorWord::ThinLocked { owner, recursion: 1 }.encode();
        thin.header().cas_monitor(0, thin_word).unwrap();
        inflated.header().cas_monitor(0, MonitorWord::Inflated(0).encode()).unwrap();

        assert_eq!(space.sweep_unmarked(), 1);
        assert!(space.contains(thin.addr()));
        assert!(space.contains(inflated.addr()));
        assert!(!space.contains(garbage.addr()));
    }
}
