//! Staged owner collections.
//!
//! A [`StagedCollection`] keeps two id-keyed copies of a record kind: the
//! `current` state edited by the operator and the `baseline` last known to be
//! persisted. Change detection is plain structural equality between them.

use crate::remap::{IdRemap, Remap};
use carebook_catalog::{Group, GroupId, RecordId, ServiceItem, ServiceItemId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A record kind that can live in a [`StagedCollection`].
pub trait StagedRecord: Clone + PartialEq + fmt::Debug + Send + Sync {
    /// Identifier type.
    type Id: Remap;

    /// Returns the record id.
    fn id(&self) -> Self::Id;

    /// Replaces the record id.
    fn set_id(&mut self, id: Self::Id);

    /// Returns the listing position.
    fn display_order(&self) -> u32;

    /// Replaces the listing position.
    fn set_display_order(&mut self, order: u32);

    /// Human-readable label used in error messages.
    fn label(&self) -> &str;

    /// Rewrites foreign references through `remap`.
    fn remap_references(&mut self, _remap: &IdRemap) {}

    /// Returns true if a foreign reference still names an unsaved record.
    fn has_temporary_reference(&self) -> bool {
        false
    }

    /// Compares everything except the listing position.
    fn same_content(&self, other: &Self) -> bool {
        let mut normalized = self.clone();
        normalized.set_display_order(other.display_order());
        normalized == *other
    }
}

impl StagedRecord for ServiceItem {
    type Id = ServiceItemId;

    fn id(&self) -> ServiceItemId {
        self.id
    }

    fn set_id(&mut self, id: ServiceItemId) {
        self.id = id;
    }

    fn display_order(&self) -> u32 {
        self.display_order
    }

    fn set_display_order(&mut self, order: u32) {
        self.display_order = order;
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn remap_references(&mut self, remap: &IdRemap) {
        self.group_id = self.group_id.map(|group| group.remapped(remap));
    }

    fn has_temporary_reference(&self) -> bool {
        self.group_id.is_some_and(|group| group.is_temporary())
    }
}

impl StagedRecord for Group {
    type Id = GroupId;

    fn id(&self) -> GroupId {
        self.id
    }

    fn set_id(&mut self, id: GroupId) {
        self.id = id;
    }

    fn display_order(&self) -> u32 {
        self.display_order
    }

    fn set_display_order(&mut self, order: u32) {
        self.display_order = order;
    }

    fn label(&self) -> &str {
        &self.name
    }
}

/// Current and baseline state of one owner record kind.
#[derive(Debug, Clone)]
pub struct StagedCollection<T: StagedRecord> {
    current: BTreeMap<T::Id, T>,
    baseline: BTreeMap<T::Id, T>,
}

impl<T: StagedRecord> StagedCollection<T> {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            current: BTreeMap::new(),
            baseline: BTreeMap::new(),
        }
    }

    /// Replaces both current and baseline with `records`.
    pub fn load(&mut self, records: impl IntoIterator<Item = T>) {
        self.current = records.into_iter().map(|r| (r.id(), r)).collect();
        self.baseline = self.current.clone();
    }

    /// Returns a record from the current state.
    pub fn get(&self, id: T::Id) -> Option<&T> {
        self.current.get(&id)
    }

    /// Returns a record from the baseline.
    pub fn baseline_record(&self, id: T::Id) -> Option<&T> {
        self.baseline.get(&id)
    }

    /// Returns true if the current state holds `id`.
    pub fn contains(&self, id: T::Id) -> bool {
        self.current.contains_key(&id)
    }

    /// Number of records in the current state.
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Returns true if the current state is empty.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Current records keyed by id.
    pub fn current(&self) -> &BTreeMap<T::Id, T> {
        &self.current
    }

    /// Baseline records keyed by id.
    pub fn baseline(&self) -> &BTreeMap<T::Id, T> {
        &self.baseline
    }

    /// Current records in listing order.
    pub fn ordered(&self) -> Vec<&T> {
        let mut records: Vec<&T> = self.current.values().collect();
        records.sort_by_key(|r| (r.display_order(), r.id()));
        records
    }

    /// Current ids in listing order.
    pub fn ordered_ids(&self) -> Vec<T::Id> {
        self.ordered().into_iter().map(StagedRecord::id).collect()
    }

    /// Listing position for a record appended at the end.
    pub fn next_display_order(&self) -> u32 {
        self.current
            .values()
            .map(StagedRecord::display_order)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Appends a record to the current state at the end of the listing.
    pub fn add(&mut self, mut record: T) -> T::Id {
        record.set_display_order(self.next_display_order());
        let id = record.id();
        self.current.insert(id, record);
        id
    }

    /// Applies `edit` to the record `id`. The record id cannot be changed.
    ///
    /// Returns false (and does nothing) if `id` is absent.
    pub fn update_with(&mut self, id: T::Id, edit: impl FnOnce(&mut T)) -> bool {
        match self.current.get_mut(&id) {
            Some(record) => {
                edit(record);
                record.set_id(id);
                true
            }
            None => false,
        }
    }

    /// Applies `edit` to every current record.
    pub fn update_all(&mut self, mut edit: impl FnMut(&mut T)) {
        for (id, record) in self.current.iter_mut() {
            edit(record);
            record.set_id(*id);
        }
    }

    /// Removes a record from the current state.
    pub fn remove(&mut self, id: T::Id) -> Option<T> {
        self.current.remove(&id)
    }

    /// Assigns sequential listing positions.
    ///
    /// Records named in `ordered_ids` come first, in that order; every other
    /// record follows in its existing relative order. Unknown and duplicate
    /// ids are ignored.
    pub fn reorder(&mut self, ordered_ids: &[T::Id]) {
        let mut seen = BTreeSet::new();
        let mut sequence: Vec<T::Id> = ordered_ids
            .iter()
            .copied()
            .filter(|id| self.current.contains_key(id) && seen.insert(*id))
            .collect();
        sequence.extend(
            self.ordered_ids()
                .into_iter()
                .filter(|id| !seen.contains(id)),
        );

        for (position, id) in sequence.into_iter().enumerate() {
            if let Some(record) = self.current.get_mut(&id) {
                record.set_display_order(position as u32);
            }
        }
    }

    /// Returns true if any current record still carries a temporary id.
    pub fn has_temporary_ids(&self) -> bool {
        self.current.keys().any(|id| id.is_temporary())
    }

    /// Returns true if the current state differs from the baseline.
    pub fn is_dirty(&self) -> bool {
        self.current != self.baseline || self.has_temporary_ids()
    }

    /// Rewrites primary ids and foreign references in the current state.
    ///
    /// Baseline entries still filed under a remapped temporary id are
    /// dropped; the confirmed record is folded in under its real id.
    pub fn remap_ids(&mut self, remap: &IdRemap) {
        if remap.is_empty() {
            return;
        }
        self.baseline.retain(|id, _| id.remapped(remap) == *id);
        let current = std::mem::take(&mut self.current);
        self.current = current
            .into_values()
            .map(|mut record| {
                record.set_id(record.id().remapped(remap));
                record.remap_references(remap);
                (record.id(), record)
            })
            .collect();
    }

    /// Reverts the current state to the baseline.
    pub fn discard(&mut self) {
        self.current = self.baseline.clone();
    }

    /// Accepts the current state as the new baseline.
    pub fn commit(&mut self) {
        self.baseline = self.current.clone();
    }

    /// Folds a confirmed create into the baseline.
    pub(crate) fn confirm_created(&mut self, id: T::Id) {
        if let Some(record) = self.current.get(&id) {
            self.baseline.insert(id, record.clone());
        }
    }

    /// Folds a confirmed content update into the baseline, keeping the
    /// baseline listing position.
    pub(crate) fn confirm_updated(&mut self, id: T::Id) {
        if let Some(record) = self.current.get(&id) {
            let mut confirmed = record.clone();
            if let Some(previous) = self.baseline.get(&id) {
                confirmed.set_display_order(previous.display_order());
            }
            self.baseline.insert(id, confirmed);
        }
    }

    /// Folds a confirmed delete into the baseline.
    pub(crate) fn confirm_deleted(&mut self, id: T::Id) {
        self.baseline.remove(&id);
    }

    /// Folds confirmed listing positions into the baseline.
    pub(crate) fn confirm_order(&mut self, ids: &[T::Id]) {
        for id in ids {
            if let (Some(record), Some(confirmed)) =
                (self.current.get(id), self.baseline.get_mut(id))
            {
                confirmed.set_display_order(record.display_order());
            }
        }
    }
}

impl<T: StagedRecord> Default for StagedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, name: &str, order: u32) -> ServiceItem {
        ServiceItem::new(ServiceItemId(id), name).with_display_order(order)
    }

    fn loaded() -> StagedCollection<ServiceItem> {
        let mut items = StagedCollection::new();
        items.load(vec![item(1, "A", 0), item(2, "B", 1), item(3, "C", 2)]);
        items
    }

    #[test]
    fn add_appends_after_max_order() {
        let mut items = loaded();
        let id = items.add(item(-1, "D", 0));
        assert_eq!(items.get(id).unwrap().display_order, 3);
        assert!(items.is_dirty());
        assert!(items.has_temporary_ids());
    }

    #[test]
    fn add_to_empty_starts_at_zero() {
        let mut items: StagedCollection<ServiceItem> = StagedCollection::new();
        let id = items.add(item(-1, "A", 9));
        assert_eq!(items.get(id).unwrap().display_order, 0);
    }

    #[test]
    fn update_missing_is_noop() {
        let mut items = loaded();
        assert!(!items.update_with(ServiceItemId(99), |r| r.name = "X".into()));
        assert!(!items.is_dirty());
    }

    #[test]
    fn update_cannot_change_id() {
        let mut items = loaded();
        assert!(items.update_with(ServiceItemId(1), |r| {
            r.id = ServiceItemId(77);
            r.name = "Renamed".into();
        }));
        assert_eq!(items.get(ServiceItemId(1)).unwrap().name, "Renamed");
        assert!(items.get(ServiceItemId(77)).is_none());
    }

    #[test]
    fn reverting_an_edit_is_clean() {
        let mut items = loaded();
        items.update_with(ServiceItemId(2), |r| r.name = "Changed".into());
        assert!(items.is_dirty());
        items.update_with(ServiceItemId(2), |r| r.name = "B".into());
        assert!(!items.is_dirty());
    }

    #[test]
    fn partial_reorder_keeps_unmentioned_records() {
        let mut items = loaded();
        items.reorder(&[ServiceItemId(3)]);

        assert_eq!(
            items.ordered_ids(),
            vec![ServiceItemId(3), ServiceItemId(1), ServiceItemId(2)]
        );
        assert_eq!(items.len(), 3);
        assert_eq!(items.get(ServiceItemId(2)).unwrap().display_order, 2);
    }

    #[test]
    fn reorder_ignores_unknown_and_duplicate_ids() {
        let mut items = loaded();
        items.reorder(&[
            ServiceItemId(2),
            ServiceItemId(99),
            ServiceItemId(2),
            ServiceItemId(1),
        ]);
        assert_eq!(
            items.ordered_ids(),
            vec![ServiceItemId(2), ServiceItemId(1), ServiceItemId(3)]
        );
    }

    #[test]
    fn remap_rewrites_ids_and_references() {
        let mut items = loaded();
        items.add(item(-1, "New", 0).with_group(GroupId(-2)));

        let mut remap = IdRemap::new();
        remap.record_service_item(ServiceItemId(-1), ServiceItemId(42));
        remap.record_group(GroupId(-2), GroupId(7));
        items.remap_ids(&remap);

        let remapped = items.get(ServiceItemId(42)).unwrap();
        assert_eq!(remapped.group_id, Some(GroupId(7)));
        assert!(!items.has_temporary_ids());
    }

    #[test]
    fn discard_and_commit() {
        let mut items = loaded();
        items.remove(ServiceItemId(1));
        items.discard();
        assert!(!items.is_dirty());
        assert!(items.contains(ServiceItemId(1)));

        items.remove(ServiceItemId(1));
        items.commit();
        assert!(!items.is_dirty());
        assert!(!items.contains(ServiceItemId(1)));
    }

    #[test]
    fn same_content_ignores_display_order() {
        let a = item(1, "A", 0);
        let b = item(1, "A", 5);
        assert!(a.same_content(&b));
        assert!(!a.same_content(&item(1, "Z", 0)));
    }

    #[test]
    fn confirm_updated_keeps_baseline_order() {
        let mut items = loaded();
        items.update_with(ServiceItemId(1), |r| r.name = "A2".into());
        items.reorder(&[ServiceItemId(2), ServiceItemId(1)]);

        items.confirm_updated(ServiceItemId(1));
        let confirmed = items.baseline_record(ServiceItemId(1)).unwrap();
        assert_eq!(confirmed.name, "A2");
        assert_eq!(confirmed.display_order, 0);
        assert!(items.is_dirty());

        let order = items.ordered_ids();
        items.confirm_order(&order);
        assert!(!items.is_dirty());
    }
}
