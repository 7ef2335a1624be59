//! Temporary-to-real identifier translation.

use carebook_catalog::{GroupId, RecordId, ServiceItemId};
use std::collections::BTreeMap;

/// Translation table built while owners are created remotely.
///
/// Only owner kinds appear here: service items and groups are the only
/// records other records refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdRemap {
    service_items: BTreeMap<ServiceItemId, ServiceItemId>,
    groups: BTreeMap<GroupId, GroupId>,
}

impl IdRemap {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that temporary service item `temp` now exists as `real`.
    pub fn record_service_item(&mut self, temp: ServiceItemId, real: ServiceItemId) {
        debug_assert!(temp.is_temporary() && !real.is_temporary());
        self.service_items.insert(temp, real);
    }

    /// Records that temporary group `temp` now exists as `real`.
    pub fn record_group(&mut self, temp: GroupId, real: GroupId) {
        debug_assert!(temp.is_temporary() && !real.is_temporary());
        self.groups.insert(temp, real);
    }

    /// Resolves a service item id, returning it unchanged if not remapped.
    pub fn service_item(&self, id: ServiceItemId) -> ServiceItemId {
        self.service_items.get(&id).copied().unwrap_or(id)
    }

    /// Resolves a group id, returning it unchanged if not remapped.
    pub fn group(&self, id: GroupId) -> GroupId {
        self.groups.get(&id).copied().unwrap_or(id)
    }

    /// Number of recorded translations.
    pub fn len(&self) -> usize {
        self.service_items.len() + self.groups.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identifier types that can be translated through an [`IdRemap`].
pub trait Remap: RecordId {
    /// Returns the real id for `self`, or `self` if it was not remapped.
    fn remapped(self, remap: &IdRemap) -> Self;
}

impl Remap for ServiceItemId {
    fn remapped(self, remap: &IdRemap) -> Self {
        remap.service_item(self)
    }
}

impl Remap for GroupId {
    fn remapped(self, remap: &IdRemap) -> Self {
        remap.group(self)
    }
}
