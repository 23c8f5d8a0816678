//! Monitor side table
//!
//! Slots are mutated only under the table latch. The collector enumerates
//! record back-references through the latch alone, never through a record
//! lock, so root enumeration cannot block behind a contended monitor.

use crate::error::{Result, VmError};
use crate::monitor::record::MonitorRecord;
use crate::monitor::word::MonitorIndex;
use crate::object::ObjRef;
use crate::thread::ThreadId;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Slots {
    slots: Vec<Option<Arc<MonitorRecord>>>,
    free: Vec<MonitorIndex>,
    live: usize,
}

/// Fixed-capacity table of inflated monitor records
pub struct MonitorTable {
    latch: Mutex<Slots>,
    capacity: usize,
}

impl MonitorTable {
    /// Create an empty table
    pub fn new(capacity: usize) -> Self {
        Self {
            latch: Mutex::new(Slots::default()),
            capacity,
        }
    }

    /// Allocate a record for `object`
    ///
    /// # Returns
    /// The new record, or `MonitorRecordExhaustion` when every slot is live
    pub fn allocate(&self, object: ObjRef, owner: Option<ThreadId>, recursion: u32) -> Result<Arc<MonitorRecord>> {
        let mut latch = self.latch.lock();

        let index = match latch.free.pop() {
            Some(index) => index,
            None if latch.slots.len() < self.capacity => {
                latch.slots.push(None);
                latch.slots.len() - 1
            },
            None => {
                return Err(VmError::MonitorRecordExhaustion {
                    capacity: self.capacity,
                })
            },
        };

        let record = Arc::new(MonitorRecord::new(index, object, owner, recursion));
        latch.slots[index] = Some(record.clone());
        latch.live += 1;
        Ok(record)
    }

    /// Look up a record by index
    pub fn get(&self, index: MonitorIndex) -> Option<Arc<MonitorRecord>> {
        self.latch.lock().slots.get(index).and_then(|slot| slot.clone())
    }

    /// Return a slot to the free list
    pub fn free(&self, index: MonitorIndex) {
        let mut latch = self.latch.lock();
        if let Some(slot) = latch.slots.get_mut(index) {
            if slot.take().is_some() {
                latch.free.push(index);
                latch.live -= 1;
            }
        }
    }

    /// Objects of every occupied slot
    pub fn objects(&self) -> Vec<ObjRef> {
        self.latch
            .lock()
            .slots
            .iter()
            .flatten()
            .map(|record| record.object())
            .collect()
    }

    /// Every occupied record
    pub fn records(&self) -> Vec<Arc<MonitorRecord>> {
        self.latch.lock().slots.iter().flatten().cloned().collect()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.latch.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjectHeader, TypeId};

    #[test]
    fn test_allocate_free_reuse() {
        let header = Box::new(ObjectHeader::new(TypeId(1)));
        let obj = ObjRef::from_header(&header);
        let table = MonitorTable::new(2);

        let a = table.allocate(obj, None, 0).unwrap();
        let b = table.allocate(obj, None, 0).unwrap();
        assert_ne!(a.index(), b.index());
        assert_eq!(table.len(), 2);

        assert!(matches!(
            table.allocate(obj, None, 0),
            Err(VmError::MonitorRecordExhaustion { capacity: 2 })
        ));

        table.free(a.index());
        assert!(table.get(a.index()).is_none());
        let c = table.allocate(obj, None, 0).unwrap();
        assert_eq!(c.index(), a.index());
    }

    #[test]
    fn test_objects_enumeration() {
        let headers: Vec<Box<ObjectHeader>> =
            (0..3).map(|_| Box::new(ObjectHeader::new(TypeId(1)))).collect();
        let table = MonitorTable::new(8);
        for header in &headers {
            table.allocate(ObjRef::from_header(header), None, 0).unwrap();
        }
        table.free(1);

        let objects = table.objects();
        assert_eq!(objects.len(), 2);
        assert!(objects.contains(&ObjRef::from_header(&headers[0])));
        assert!(!objects.contains(&ObjRef::from_header(&headers[1])));
    }

    #[test]
    fn test_double_free_is_harmless() {
        let header = Box::new(ObjectHeader::new(TypeId(1)));
        let table = MonitorTable::new(1);
        let record = table.allocate(ObjRef::from_header(&header), None, 0).unwrap();
        table.free(record.index());
        table.free(record.index());
        assert_eq!(table.len(), 0);
        assert!(table.allocate(ObjRef::from_header(&header), None, 0).is_ok());
    }
}
