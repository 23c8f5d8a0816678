//! Monitor word encoding
//!
//! ```text
//! Unlocked     ...0000000000000000000000000000000 00
//! ThinLocked   [owner:22][recursion:8]              01
//! Inflated     [record index]                       10
//! ```
//!
//! A thin recursion count is stored as is (1..=255). The owner field holds a
//! nonzero thread id.

use crate::thread::ThreadId;

pub const TAG_BITS: usize = 2;
pub const TAG_MASK: usize = (1 << TAG_BITS) - 1;

pub const TAG_UNLOCKED: usize = 0b00;
pub const TAG_THIN: usize = 0b01;
pub const TAG_INFLATED: usize = 0b10;

pub const RECURSION_SHIFT: usize = TAG_BITS;
pub const RECURSION_BITS: usize = 8;
pub const RECURSION_MASK: usize = ((1 << RECURSION_BITS) - 1) << RECURSION_SHIFT;

pub const OWNER_SHIFT: usize = RECURSION_SHIFT + RECURSION_BITS;
pub const OWNER_BITS: usize = 22;
pub const OWNER_MASK: usize = ((1 << OWNER_BITS) - 1) << OWNER_SHIFT;

pub const INDEX_SHIFT: usize = TAG_BITS;

/// Largest recursion count a thin lock can hold before it must inflate
pub const MAX_THIN_RECURSION: u32 = (1 << RECURSION_BITS) - 1;

/// Largest thread id a thin lock can name
pub const MAX_OWNER: u32 = (1 << OWNER_BITS) - 1;

/// Largest side-table index an inflated word can name
pub const MAX_MONITOR_INDEX: usize = usize::MAX >> INDEX_SHIFT;

/// Index into the monitor side table
pub type MonitorIndex = usize;

/// Decoded monitor word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorWord {
    Unlocked,
    ThinLocked { owner: ThreadId, recursion: u32 },
    Inflated(MonitorIndex),
}

impl MonitorWord {
    /// Encode into a raw header word
    pub fn encode(self) -> usize {
        match self {
            MonitorWord::Unlocked => TAG_UNLOCKED,
            MonitorWord::ThinLocked { owner, recursion } => {
                debug_assert!((1..=MAX_THIN_RECURSION).contains(&recursion));
                ((owner.as_u32() as usize) << OWNER_SHIFT)
                    | ((recursion as usize) << RECURSION_SHIFT)
                    | TAG_THIN
            },
            MonitorWord::Inflated(index) => {
                debug_assert!(index <= MAX_MONITOR_INDEX);
                (index << INDEX_SHIFT) | TAG_INFLATED
            },
        }
    }

    /// Decode a raw header word
    ///
    /// Returns `None` for bit patterns no valid transition produces.
    pub fn decode(raw: usize) -> Option<Self> {
        match raw & TAG_MASK {
            TAG_UNLOCKED if raw == TAG_UNLOCKED => Some(MonitorWord::Unlocked),
            TAG_THIN if raw & !(OWNER_MASK | RECURSION_MASK | TAG_MASK) == 0 => {
                let owner = ThreadId::new(((raw & OWNER_MASK) >> OWNER_SHIFT) as u32)?;
                let recursion = ((raw & RECURSION_MASK) >> RECURSION_SHIFT) as u32;
                if recursion == 0 {
                    return None;
                }
                Some(MonitorWord::ThinLocked { owner, recursion })
            },
            TAG_INFLATED => Some(MonitorWord::Inflated(raw >> INDEX_SHIFT)),
            _ => None,
        }
    }

    pub fn is_unlocked(self) -> bool {
        self == MonitorWord::Unlocked
    }

    pub fn is_inflated(self) -> bool {
        matches!(self, MonitorWord::Inflated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(raw: u32) -> ThreadId {
        ThreadId::new(raw).unwrap()
    }

    #[test]
    fn test_unlocked_is_zero() {
        assert_eq!(MonitorWord::Unlocked.encode(), 0);
        assert_eq!(MonitorWord::decode(0), Some(MonitorWord::Unlocked));
    }

    #[test]
    fn test_thin_word_fields() {
        let word = MonitorWord::ThinLocked {
            owner: tid(MAX_OWNER),
            recursion: MAX_THIN_RECURSION,
        };
        let raw = word.encode();
        assert_eq!(raw & TAG_MASK, TAG_THIN);
        assert_eq!(MonitorWord::decode(raw), Some(word));

        let word = MonitorWord::ThinLocked {
            owner: tid(1),
            recursion: 1,
        };
        assert_eq!(word.encode(), (1 << OWNER_SHIFT) | (1 << RECURSION_SHIFT) | TAG_THIN);
    }

    #[test]
    fn test_inflated_word() {
        let raw = MonitorWord::Inflated(12345).encode();
        assert_eq!(MonitorWord::decode(raw), Some(MonitorWord::Inflated(12345)));
        assert!(MonitorWord::Inflated(0).is_inflated());
    }

    #[test]
    fn test_invalid_patterns() {
        // Reserved tag
        assert_eq!(MonitorWord::decode(0b11), None);
        // Thin lock without owner
        assert_eq!(MonitorWord::decode((1 << RECURSION_SHIFT) | TAG_THIN), None);
        // Thin lock with zero recursion
        assert_eq!(MonitorWord::decode((1 << OWNER_SHIFT) | TAG_THIN), None);
        // Stray bits on an unlocked word
        assert_eq!(MonitorWord::decode(0b100), None);
    }
}
