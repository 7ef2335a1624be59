//! Association maps for dependent records.
//!
//! Dependent records have no life of their own: they hang off an owning
//! service item (directly, or through a `(service item, practitioner)` key).
//! A key that is absent from the current map has never been loaded or
//! touched this session; a key mapped to an empty value is an explicit
//! "nothing here" and is persisted as such.

use crate::remap::{IdRemap, Remap};
use carebook_catalog::{
    BillingScenario, PractitionerId, RecordId, RequirementId, ResourceRequirement, ScenarioId,
    ScenarioKey, ServiceItemId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A key of an association map.
pub trait AssociationKey: Copy + Ord + fmt::Debug + fmt::Display + Send + Sync {
    /// The service item owning everything stored under this key.
    fn owner(&self) -> ServiceItemId;

    /// Returns the key with its owner translated through `remap`.
    fn remapped(self, remap: &IdRemap) -> Self;
}

impl AssociationKey for ServiceItemId {
    fn owner(&self) -> ServiceItemId {
        *self
    }

    fn remapped(self, remap: &IdRemap) -> Self {
        Remap::remapped(self, remap)
    }
}

impl AssociationKey for ScenarioKey {
    fn owner(&self) -> ServiceItemId {
        self.service_item_id
    }

    fn remapped(self, remap: &IdRemap) -> Self {
        ScenarioKey::new(
            Remap::remapped(self.service_item_id, remap),
            self.practitioner_id,
        )
    }
}

/// A value stored in an association map.
pub trait AssociationValue: Clone + PartialEq + fmt::Debug + Send + Sync {
    /// Returns true if the value holds a record not yet created remotely.
    fn has_temporary_ids(&self) -> bool;
}

impl AssociationValue for BTreeSet<PractitionerId> {
    fn has_temporary_ids(&self) -> bool {
        false
    }
}

impl<V: ChildRecord> AssociationValue for Vec<V> {
    fn has_temporary_ids(&self) -> bool {
        self.iter().any(|record| record.id().is_temporary())
    }
}

/// A dependent record with its own identifier.
pub trait ChildRecord: Clone + PartialEq + fmt::Debug + Send + Sync {
    /// Identifier type.
    type Id: RecordId;

    /// Returns the record id.
    fn id(&self) -> Self::Id;

    /// Returns a copy carrying a different id.
    fn with_id(&self, id: Self::Id) -> Self;

    /// Human-readable label used in error messages.
    fn label(&self) -> String;
}

impl ChildRecord for BillingScenario {
    type Id = ScenarioId;

    fn id(&self) -> ScenarioId {
        self.id
    }

    fn with_id(&self, id: ScenarioId) -> Self {
        Self { id, ..self.clone() }
    }

    fn label(&self) -> String {
        format!("\"{}\"", self.name)
    }
}

impl ChildRecord for ResourceRequirement {
    type Id = RequirementId;

    fn id(&self) -> RequirementId {
        self.id
    }

    fn with_id(&self, id: RequirementId) -> Self {
        Self { id, ..self.clone() }
    }

    fn label(&self) -> String {
        format!("{} x resource type {}", self.quantity, self.resource_type_id)
    }
}

/// Current and baseline values of one association kind.
#[derive(Debug, Clone)]
pub struct AssociationMap<K: AssociationKey, V: AssociationValue> {
    current: BTreeMap<K, V>,
    baseline: BTreeMap<K, V>,
}

impl<K: AssociationKey, V: AssociationValue> AssociationMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            current: BTreeMap::new(),
            baseline: BTreeMap::new(),
        }
    }

    /// Replaces both current and baseline with `entries`.
    pub fn load(&mut self, entries: impl IntoIterator<Item = (K, V)>) {
        self.current = entries.into_iter().collect();
        self.baseline = self.current.clone();
    }

    /// Returns the current value for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.current.get(key)
    }

    /// Returns the baseline value for `key`.
    pub fn baseline_value(&self, key: &K) -> Option<&V> {
        self.baseline.get(key)
    }

    /// Replaces the value for `key` in full.
    pub fn set(&mut self, key: K, value: V) {
        self.current.insert(key, value);
    }

    /// Removes `key` from the current state.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.current.remove(key)
    }

    /// Returns true if `key` has been loaded or set.
    pub fn contains_key(&self, key: &K) -> bool {
        self.current.contains_key(key)
    }

    /// Current entries.
    pub fn current(&self) -> &BTreeMap<K, V> {
        &self.current
    }

    /// Baseline entries.
    pub fn baseline(&self) -> &BTreeMap<K, V> {
        &self.baseline
    }

    /// Stores a freshly fetched remote value.
    ///
    /// The baseline always takes the fetched value; the current state only
    /// does if the key has not been set already.
    pub fn set_loaded(&mut self, key: K, value: V) {
        self.current.entry(key).or_insert_with(|| value.clone());
        self.baseline.insert(key, value);
    }

    /// Replaces the baseline value for `key`.
    pub(crate) fn fold_baseline(&mut self, key: K, value: V) {
        self.baseline.insert(key, value);
    }

    /// Drops the baseline value for `key`.
    pub(crate) fn drop_baseline(&mut self, key: &K) {
        self.baseline.remove(key);
    }

    /// Keeps only keys (in both states) for which `keep` returns true.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.current.retain(|k, _| keep(k));
        self.baseline.retain(|k, _| keep(k));
    }

    /// Removes every current key owned by `owner`.
    pub fn remove_owner(&mut self, owner: ServiceItemId) {
        self.current.retain(|k, _| k.owner() != owner);
    }

    /// Drops every baseline key owned by `owner`.
    pub(crate) fn drop_owner_baseline(&mut self, owner: ServiceItemId) {
        self.baseline.retain(|k, _| k.owner() != owner);
    }

    /// Current keys whose value differs from the baseline (or has none).
    pub fn dirty_keys(&self) -> Vec<K> {
        self.current
            .iter()
            .filter(|(k, v)| self.baseline.get(*k) != Some(*v))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Rewrites current keys through `remap`. Baseline entries under a
    /// remapped key are dropped.
    pub fn remap_keys(&mut self, remap: &IdRemap) {
        if remap.is_empty() {
            return;
        }
        self.baseline.retain(|k, _| k.remapped(remap) == *k);
        let current = std::mem::take(&mut self.current);
        self.current = current
            .into_iter()
            .map(|(k, v)| (k.remapped(remap), v))
            .collect();
    }

    /// Returns true if any current key or value references an unsaved record.
    pub fn has_temporary_ids(&self) -> bool {
        self.current
            .iter()
            .any(|(k, v)| k.owner().is_temporary() || v.has_temporary_ids())
    }

    /// Returns true if the current state differs from the baseline.
    pub fn is_dirty(&self) -> bool {
        self.current != self.baseline || self.has_temporary_ids()
    }

    /// Reverts the current state to the baseline.
    pub fn discard(&mut self) {
        self.current = self.baseline.clone();
    }

    /// Accepts the current state as the new baseline.
    pub fn commit(&mut self) {
        self.baseline = self.current.clone();
    }
}

impl<K: AssociationKey, V: AssociationValue> Default for AssociationMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Staged practitioner eligibility.
///
/// Locally the map is keyed by service item; remotely each practitioner owns
/// a full list. `rosters` holds the last server-confirmed list of every
/// practitioner fetched this session.
#[derive(Debug, Clone, Default)]
pub struct AssignmentBook {
    /// Practitioners eligible for each service item.
    pub map: AssociationMap<ServiceItemId, BTreeSet<PractitionerId>>,
    rosters: BTreeMap<PractitionerId, BTreeSet<ServiceItemId>>,
}

impl AssignmentBook {
    /// Creates an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last confirmed service items of a practitioner, if fetched.
    pub fn roster(&self, practitioner: PractitionerId) -> Option<&BTreeSet<ServiceItemId>> {
        self.rosters.get(&practitioner)
    }

    /// All fetched rosters.
    pub fn rosters(&self) -> &BTreeMap<PractitionerId, BTreeSet<ServiceItemId>> {
        &self.rosters
    }

    /// Stores a server-confirmed roster.
    pub(crate) fn set_roster(
        &mut self,
        practitioner: PractitionerId,
        items: BTreeSet<ServiceItemId>,
    ) {
        self.rosters.insert(practitioner, items);
    }

    /// Removes a deleted service item from every roster.
    pub(crate) fn evict_service_item(&mut self, id: ServiceItemId) {
        for roster in self.rosters.values_mut() {
            roster.remove(&id);
        }
    }

    /// Forgets every fetched roster.
    pub(crate) fn clear_rosters(&mut self) {
        self.rosters.clear();
    }

    /// Practitioners whose fetched roster contains `id`.
    pub fn practitioners_with(&self, id: ServiceItemId) -> BTreeSet<PractitionerId> {
        self.rosters
            .iter()
            .filter(|(_, items)| items.contains(&id))
            .map(|(p, _)| *p)
            .collect()
    }

    /// Folds one practitioner's fetched roster into the entries already loaded.
    ///
    /// Only that practitioner's membership changes. The baseline takes the
    /// server's answer; the current entry follows it unless the operator has
    /// changed that practitioner's membership since. Service items without a
    /// loaded entry stay unloaded: one roster says nothing about the others.
    pub(crate) fn merge_roster(&mut self, practitioner: PractitionerId) {
        let Some(roster) = self.rosters.get(&practitioner) else {
            return;
        };
        let loaded: Vec<ServiceItemId> = self.map.baseline().keys().copied().collect();
        for id in loaded {
            let Some(mut baseline) = self.map.baseline_value(&id).cloned() else {
                continue;
            };
            let confirmed = roster.contains(&id);
            let previous = baseline.contains(&practitioner);
            if previous == confirmed {
                continue;
            }
            set_membership(&mut baseline, practitioner, confirmed);
            if let Some(mut current) = self.map.get(&id).cloned() {
                if current.contains(&practitioner) == previous {
                    set_membership(&mut current, practitioner, confirmed);
                    self.map.set(id, current);
                }
            }
            self.map.fold_baseline(id, baseline);
        }
    }

    /// Gives every unloaded id in `service_items` an entry built from the
    /// fetched rosters.
    ///
    /// Only sound once the rosters of every practitioner have been fetched.
    pub(crate) fn fill_unloaded(&mut self, service_items: impl IntoIterator<Item = ServiceItemId>) {
        for id in service_items {
            if self.map.baseline_value(&id).is_some() {
                continue;
            }
            let confirmed = self.practitioners_with(id);
            self.map.set_loaded(id, confirmed);
        }
    }
}

fn set_membership(
    practitioners: &mut BTreeSet<PractitionerId>,
    practitioner: PractitionerId,
    member: bool,
) {
    if member {
        practitioners.insert(practitioner);
    } else {
        practitioners.remove(&practitioner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Scenarios = AssociationMap<ScenarioKey, Vec<BillingScenario>>;

    fn key(service: i64, practitioner: i64) -> ScenarioKey {
        ScenarioKey::new(ServiceItemId(service), PractitionerId(practitioner))
    }

    fn standard(id: i64) -> BillingScenario {
        BillingScenario::new(ScenarioId(id), "Standard", 100.0, 0.5).as_default()
    }

    #[test]
    fn explicit_empty_differs_from_never_loaded() {
        let mut map = Scenarios::new();
        assert!(!map.contains_key(&key(10, 5)));

        map.set(key(10, 5), Vec::new());
        assert!(map.contains_key(&key(10, 5)));
        assert_eq!(map.dirty_keys(), vec![key(10, 5)]);
        assert!(map.is_dirty());
    }

    #[test]
    fn set_loaded_does_not_clobber_edits() {
        let mut map = Scenarios::new();
        map.set(key(10, 5), vec![standard(-1)]);
        map.set_loaded(key(10, 5), vec![standard(3)]);

        assert_eq!(map.get(&key(10, 5)).unwrap()[0].id, ScenarioId(-1));
        assert_eq!(map.baseline_value(&key(10, 5)).unwrap()[0].id, ScenarioId(3));
    }

    #[test]
    fn remove_owner_purges_composite_keys() {
        let mut map = Scenarios::new();
        map.load(vec![
            (key(10, 5), vec![standard(1)]),
            (key(10, 6), vec![]),
            (key(11, 5), vec![standard(2)]),
        ]);
        map.remove_owner(ServiceItemId(10));

        assert_eq!(map.current().len(), 1);
        assert!(map.contains_key(&key(11, 5)));
        assert_eq!(map.baseline().len(), 3);
    }

    #[test]
    fn remap_rewrites_owner_part_of_key() {
        let mut map = Scenarios::new();
        map.set(key(-1, 5), vec![standard(-2)]);

        let mut remap = IdRemap::new();
        remap.record_service_item(ServiceItemId(-1), ServiceItemId(42));
        map.remap_keys(&remap);

        assert!(map.contains_key(&key(42, 5)));
        assert!(!map.contains_key(&key(-1, 5)));
    }

    #[test]
    fn temporary_records_keep_map_dirty() {
        let mut map = Scenarios::new();
        map.set(key(10, 5), vec![standard(-1)]);
        map.commit();
        assert!(map.is_dirty());
    }

    #[test]
    fn complete_rosters_fill_unloaded_entries() {
        let mut book = AssignmentBook::new();
        book.set_roster(PractitionerId(5), [ServiceItemId(1), ServiceItemId(2)].into());
        book.set_roster(PractitionerId(6), [ServiceItemId(2)].into());
        book.map.set(ServiceItemId(1), [PractitionerId(9)].into());

        book.fill_unloaded([ServiceItemId(1), ServiceItemId(2), ServiceItemId(3)]);

        assert_eq!(
            book.map.get(&ServiceItemId(2)).unwrap(),
            &BTreeSet::from([PractitionerId(5), PractitionerId(6)])
        );
        assert_eq!(book.map.get(&ServiceItemId(3)).unwrap(), &BTreeSet::new());
        // edited entry keeps the operator's value, baseline follows the server
        assert_eq!(
            book.map.get(&ServiceItemId(1)).unwrap(),
            &BTreeSet::from([PractitionerId(9)])
        );
        assert_eq!(
            book.map.baseline_value(&ServiceItemId(1)).unwrap(),
            &BTreeSet::from([PractitionerId(5)])
        );
    }

    #[test]
    fn one_roster_changes_only_its_own_membership() {
        let mut book = AssignmentBook::new();
        book.map.load([
            (ServiceItemId(1), BTreeSet::from([PractitionerId(5), PractitionerId(6)])),
            (ServiceItemId(2), BTreeSet::from([PractitionerId(6)])),
        ]);
        book.set_roster(PractitionerId(5), [ServiceItemId(2)].into());

        book.merge_roster(PractitionerId(5));

        assert_eq!(
            book.map.get(&ServiceItemId(1)).unwrap(),
            &BTreeSet::from([PractitionerId(6)])
        );
        assert_eq!(
            book.map.get(&ServiceItemId(2)).unwrap(),
            &BTreeSet::from([PractitionerId(5), PractitionerId(6)])
        );
        assert!(!book.map.is_dirty());
        assert!(book.map.get(&ServiceItemId(3)).is_none());
    }

    #[test]
    fn merged_roster_keeps_an_edited_membership() {
        let mut book = AssignmentBook::new();
        book.map
            .load([(ServiceItemId(1), BTreeSet::from([PractitionerId(6)]))]);
        book.map.set(ServiceItemId(1), BTreeSet::new());
        book.set_roster(PractitionerId(5), [ServiceItemId(1)].into());
        book.set_roster(PractitionerId(6), [ServiceItemId(1)].into());

        book.merge_roster(PractitionerId(5));
        book.merge_roster(PractitionerId(6));

        // 5 was never touched by the operator and follows the server; the
        // removal of 6 stays staged.
        assert_eq!(
            book.map.get(&ServiceItemId(1)).unwrap(),
            &BTreeSet::from([PractitionerId(5)])
        );
        assert_eq!(
            book.map.baseline_value(&ServiceItemId(1)).unwrap(),
            &BTreeSet::from([PractitionerId(5), PractitionerId(6)])
        );
    }

    #[test]
    fn evicting_removes_from_all_rosters() {
        let mut book = AssignmentBook::new();
        book.set_roster(PractitionerId(5), [ServiceItemId(1), ServiceItemId(2)].into());
        book.set_roster(PractitionerId(6), [ServiceItemId(1)].into());
        book.evict_service_item(ServiceItemId(1));
        assert!(book.practitioners_with(ServiceItemId(1)).is_empty());
        assert_eq!(book.roster(PractitionerId(5)).unwrap().len(), 1);
    }
}
