//! Compiled-method metadata
//!
//! The code generator supplies, per method, its PC range, the try-region
//! table in source order and the PCs at which a hardware trap may be
//! translated into an exception. The unwinder only reads it.

use crate::error::{Result, VmError};
use crate::object::TypeId;
use crate::unwind::ExceptionKind;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Code address
pub type Pc = usize;

/// Compiled method identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
pub struct MethodId(pub u32);

/// Half-open PC range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PcRange {
    pub start: Pc,
    pub end: Pc,
}

impl PcRange {
    pub const fn new(start: Pc, end: Pc) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, pc: Pc) -> bool {
        self.start <= pc && pc < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    fn covers(&self, other: &PcRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// One entry of a try-region table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRegion {
    pub range: PcRange,
    /// Handled type, `None` catches everything
    pub catch_type: Option<TypeId>,
    pub handler_pc: Pc,
}

impl TryRegion {
    pub fn new(range: PcRange, catch_type: Option<TypeId>, handler_pc: Pc) -> Self {
        Self {
            range,
            catch_type,
            handler_pc,
        }
    }

    /// Catch-all region, as emitted for `finally` and synchronized cleanup
    pub fn catch_all(range: PcRange, handler_pc: Pc) -> Self {
        Self::new(range, None, handler_pc)
    }
}

/// Metadata of one compiled method
#[derive(Debug, Clone)]
pub struct MethodInfo {
    id: MethodId,
    name: String,
    code: PcRange,
    regions: Vec<TryRegion>,
    trap_sites: FxHashMap<Pc, ExceptionKind>,
}

impl MethodInfo {
    pub fn new(id: MethodId, name: impl Into<String>, code: PcRange) -> Self {
        Self {
            id,
            name: name.into(),
            code,
            regions: Vec::new(),
            trap_sites: FxHashMap::default(),
        }
    }

    /// Append a try region; table order is source order
    pub fn with_region(mut self, region: TryRegion) -> Self {
        self.regions.push(region);
        self
    }

    /// Mark `pc` as a translatable trap site
    pub fn with_trap_site(mut self, pc: Pc, kind: ExceptionKind) -> Self {
        self.trap_sites.insert(pc, kind);
        self
    }

    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> PcRange {
        self.code
    }

    pub fn regions(&self) -> &[TryRegion] {
        &self.regions
    }

    /// Regions whose range contains `pc`, in table order
    pub fn regions_at(&self, pc: Pc) -> impl Iterator<Item = &TryRegion> {
        self.regions.iter().filter(move |region| region.range.contains(pc))
    }

    /// Exception kind a trap at `pc` translates to
    pub fn trap_kind(&self, pc: Pc) -> Option<ExceptionKind> {
        self.trap_sites.get(&pc).copied()
    }

    fn validate(&self) -> Result<()> {
        if self.code.is_empty() {
            return Err(VmError::InvalidArgument(format!(
                "method {} has an empty code range",
                self.name
            )));
        }
        for region in &self.regions {
            if region.range.is_empty() || !self.code.covers(&region.range) {
                return Err(VmError::InvalidArgument(format!(
                    "try region {:#x}..{:#x} is outside method {}",
                    region.range.start, region.range.end, self.name
                )));
            }
            if !self.code.contains(region.handler_pc) {
                return Err(VmError::InvalidArgument(format!(
                    "handler pc {:#x} is outside method {}",
                    region.handler_pc, self.name
                )));
            }
        }
        if let Some(pc) = self.trap_sites.keys().find(|pc| !self.code.contains(**pc)) {
            return Err(VmError::InvalidArgument(format!(
                "trap site {:#x} is outside method {}",
                pc, self.name
            )));
        }
        Ok(())
    }
}

/// Metadata queries consumed by the unwinder and the trap translator
pub trait CodeMetadata: Send + Sync {
    /// Method by id
    fn method(&self, id: MethodId) -> Option<Arc<MethodInfo>>;

    /// Method whose code range contains `pc`
    fn method_at(&self, pc: Pc) -> Option<Arc<MethodInfo>>;

    /// Exception kind for a trap at `pc`, `None` if not translatable
    fn trap_kind(&self, pc: Pc) -> Option<ExceptionKind> {
        self.method_at(pc).and_then(|method| method.trap_kind(pc))
    }

    fn is_translatable(&self, pc: Pc) -> bool {
        self.trap_kind(pc).is_some()
    }
}

#[derive(Default)]
struct Methods {
    by_id: FxHashMap<MethodId, Arc<MethodInfo>>,
    /// Code range start -> method
    by_pc: BTreeMap<Pc, Arc<MethodInfo>>,
}

/// In-memory method table
#[derive(Default)]
pub struct MethodTable {
    methods: RwLock<Methods>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method
    ///
    /// # Returns
    /// `InvalidArgument` for a duplicate id, overlapping code ranges or
    /// regions and trap sites outside the method
    pub fn register(&self, info: MethodInfo) -> Result<Arc<MethodInfo>> {
        info.validate()?;
        let mut methods = self.methods.write();

        if methods.by_id.contains_key(&info.id) {
            return Err(VmError::InvalidArgument(format!(
                "method id {} registered twice",
                info.id.0
            )));
        }

        let code = info.code;
        let overlaps_prev = methods
            .by_pc
            .range(..code.end)
            .next_back()
            .map_or(false, |(_, prev)| prev.code.end > code.start);
        if overlaps_prev {
            return Err(VmError::InvalidArgument(format!(
                "code range {:#x}..{:#x} of {} overlaps another method",
                code.start, code.end, info.name
            )));
        }

        let info = Arc::new(info);
        methods.by_id.insert(info.id, info.clone());
        methods.by_pc.insert(code.start, info.clone());
        Ok(info)
    }

    pub fn len(&self) -> usize {
        self.methods.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CodeMetadata for MethodTable {
    fn method(&self, id: MethodId) -> Option<Arc<MethodInfo>> {
        self.methods.read().by_id.get(&id).cloned()
    }

    fn method_at(&self, pc: Pc) -> Option<Arc<MethodInfo>> {
        self.methods
            .read()
            .by_pc
            .range(..=pc)
            .next_back()
            .filter(|(_, method)| method.code.contains(pc))
            .map(|(_, method)| method.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::builtin;

    fn method(id: u32, start: Pc, end: Pc) -> MethodInfo {
        MethodInfo::new(MethodId(id), format!("m{}", id), PcRange::new(start, end))
    }

    #[test]
    fn test_pc_range_half_open() {
        let range = PcRange::new(0x10, 0x20);
        assert!(range.contains(0x10));
        assert!(range.contains(0x1f));
        assert!(!range.contains(0x20));
        assert!(PcRange::new(5, 5).is_empty());
    }

    #[test]
    fn test_lookup_by_pc() {
        let table = MethodTable::new();
        table.register(method(1, 0x100, 0x200)).unwrap();
        table.register(method(2, 0x200, 0x280)).unwrap();

        assert_eq!(table.method_at(0x100).unwrap().id(), MethodId(1));
        assert_eq!(table.method_at(0x1ff).unwrap().id(), MethodId(1));
        assert_eq!(table.method_at(0x200).unwrap().id(), MethodId(2));
        assert!(table.method_at(0x280).is_none());
        assert!(table.method_at(0x50).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_overlap_and_duplicates_rejected() {
        let table = MethodTable::new();
        table.register(method(1, 0x100, 0x200)).unwrap();
        assert!(table.register(method(2, 0x180, 0x300)).is_err());
        assert!(table.register(method(1, 0x400, 0x500)).is_err());
        assert!(table.register(method(3, 0x80, 0x101)).is_err());
    }

    #[test]
    fn test_region_validation() {
        let bad = method(1, 0x100, 0x200).with_region(TryRegion::catch_all(PcRange::new(0x180, 0x240), 0x1f0));
        assert!(MethodTable::new().register(bad).is_err());

        let bad_handler =
            method(1, 0x100, 0x200).with_region(TryRegion::catch_all(PcRange::new(0x110, 0x120), 0x300));
        assert!(MethodTable::new().register(bad_handler).is_err());
    }

    #[test]
    fn test_regions_in_source_order() {
        let info = method(1, 0x100, 0x200)
            .with_region(TryRegion::new(
                PcRange::new(0x110, 0x150),
                Some(builtin::ARITHMETIC_EXCEPTION),
                0x1a0,
            ))
            .with_region(TryRegion::catch_all(PcRange::new(0x100, 0x180), 0x1c0));

        let at: Vec<Pc> = info.regions_at(0x120).map(|r| r.handler_pc).collect();
        assert_eq!(at, vec![0x1a0, 0x1c0]);
        let at: Vec<Pc> = info.regions_at(0x160).map(|r| r.handler_pc).collect();
        assert_eq!(at, vec![0x1c0]);
    }

    #[test]
    fn test_trap_sites() {
        let table = MethodTable::new();
        table
            .register(
                method(1, 0x100, 0x200).with_trap_site(0x120, ExceptionKind::NullPointer),
            )
            .unwrap();

        assert_eq!(table.trap_kind(0x120), Some(ExceptionKind::NullPointer));
        assert!(table.is_translatable(0x120));
        assert!(!table.is_translatable(0x121));
        assert!(!table.is_translatable(0x900));
    }
}
