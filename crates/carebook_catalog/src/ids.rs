//! Record identifiers.
//!
//! Every catalog record kind uses the same identifier scheme: servers assign
//! strictly positive ids, and anything `<= 0` was minted on the client for a
//! record that has not been created remotely yet.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// Returns true if a raw identifier value is client-minted.
#[inline]
#[must_use]
pub const fn is_temporary(raw: i64) -> bool {
    raw <= 0
}

/// Common behaviour of all catalog identifiers.
pub trait RecordId: Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync {
    /// Wraps a raw identifier value.
    fn from_raw(raw: i64) -> Self;

    /// Returns the raw identifier value.
    fn as_i64(self) -> i64;

    /// Returns true if this id was minted locally and not yet assigned by a server.
    fn is_temporary(self) -> bool {
        is_temporary(self.as_i64())
    }
}

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Creates an identifier from its raw value.
            #[inline]
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl RecordId for $name {
            #[inline]
            fn from_raw(raw: i64) -> Self {
                Self(raw)
            }

            #[inline]
            fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if is_temporary(self.0) {
                    write!(f, "{}:tmp{}", $label, self.0)
                } else {
                    write!(f, "{}", self.0)
                }
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

record_id!(
    /// Identifier of an offerable service item.
    ServiceItemId,
    "service"
);
record_id!(
    /// Identifier of a service group.
    GroupId,
    "group"
);
record_id!(
    /// Identifier of a practitioner. Practitioners are never created by a
    /// staging session, so these are always server-assigned.
    PractitionerId,
    "practitioner"
);
record_id!(
    /// Identifier of a billing scenario.
    ScenarioId,
    "scenario"
);
record_id!(
    /// Identifier of a resource requirement.
    RequirementId,
    "requirement"
);
record_id!(
    /// Identifier of a bookable resource type (room, device, ...).
    ResourceTypeId,
    "resource-type"
);

/// Mints temporary identifiers for a single staging session.
///
/// Ids are handed out as `-1, -2, -3, ...` and shared across record kinds, so
/// a temporary id is never reused within the session regardless of kind.
#[derive(Debug, Clone)]
pub struct TempIdAllocator {
    next: i64,
}

impl TempIdAllocator {
    /// Creates an allocator starting at `-1`.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: -1 }
    }

    /// Returns a fresh temporary id of the requested kind.
    pub fn next<I: RecordId>(&mut self) -> I {
        let raw = self.next;
        self.next -= 1;
        I::from_raw(raw)
    }

    /// Records a temporary id supplied by a caller so that later allocations
    /// never collide with it.
    pub fn observe<I: RecordId>(&mut self, id: I) {
        let raw = id.as_i64();
        if is_temporary(raw) && raw <= self.next {
            self.next = raw - 1;
        }
    }
}

impl Default for TempIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn classifier_boundaries() {
        assert!(is_temporary(-1));
        assert!(is_temporary(0));
        assert!(!is_temporary(1));
        assert!(ServiceItemId(-7).is_temporary());
        assert!(!GroupId(42).is_temporary());
    }

    #[test]
    fn allocator_is_shared_across_kinds() {
        let mut alloc = TempIdAllocator::new();
        let a: ServiceItemId = alloc.next();
        let b: GroupId = alloc.next();
        let c: ScenarioId = alloc.next();
        assert_eq!(a.as_i64(), -1);
        assert_eq!(b.as_i64(), -2);
        assert_eq!(c.as_i64(), -3);
    }

    #[test]
    fn allocator_skips_observed_ids() {
        let mut alloc = TempIdAllocator::new();
        alloc.observe(ScenarioId(-5));
        alloc.observe(ScenarioId(12));
        let next: ScenarioId = alloc.next();
        assert_eq!(next, ScenarioId(-6));
    }

    #[test]
    fn display_marks_temporary_ids() {
        assert_eq!(ServiceItemId(42).to_string(), "42");
        assert_eq!(ServiceItemId(-3).to_string(), "service:tmp-3");
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&ServiceItemId(42)).unwrap();
        assert_eq!(json, "42");
        let back: GroupId = serde_json::from_str("-2").unwrap();
        assert_eq!(back, GroupId(-2));
    }

    proptest! {
        #[test]
        fn minted_ids_are_always_temporary(count in 1usize..200) {
            let mut alloc = TempIdAllocator::new();
            let mut seen = std::collections::HashSet::new();
            for _ in 0..count {
                let id: RequirementId = alloc.next();
                prop_assert!(id.is_temporary());
                prop_assert!(seen.insert(id));
            }
        }

        #[test]
        fn positive_ids_are_real(raw in 1i64..i64::MAX) {
            prop_assert!(!PractitionerId(raw).is_temporary());
        }
    }
}
