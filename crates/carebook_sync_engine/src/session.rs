//! The staging session: all staged catalog state for one editor.
//!
//! A session is an explicit value owned by the caller. Every mutation goes
//! through `&mut self`, so there is a single writer by construction.

use crate::associations::{AssignmentBook, AssociationMap, ChildRecord};
use crate::loader::LoadTracker;
use crate::remap::IdRemap;
use crate::staged::StagedCollection;
use carebook_catalog::{
    BillingScenario, Group, GroupId, GroupPatch, PractitionerId, RecordId, ResourceRequirement,
    ScenarioKey, ServiceItem, ServiceItemId, ServiceItemPatch, TempIdAllocator,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Server-confirmed association data handed to [`StagingSession::initialize_full`].
#[derive(Debug, Clone, Default)]
pub struct AssociationSnapshot {
    /// Eligible practitioners per service item.
    pub assignments: BTreeMap<ServiceItemId, BTreeSet<PractitionerId>>,
    /// Billing scenarios per (service item, practitioner).
    pub scenarios: BTreeMap<ScenarioKey, Vec<BillingScenario>>,
    /// Resource requirements per service item.
    pub requirements: BTreeMap<ServiceItemId, Vec<ResourceRequirement>>,
}

/// Staged catalog state for one editing session.
#[derive(Debug, Clone, Default)]
pub struct StagingSession {
    pub(crate) service_items: StagedCollection<ServiceItem>,
    pub(crate) groups: StagedCollection<Group>,
    pub(crate) assignments: AssignmentBook,
    pub(crate) scenarios: AssociationMap<ScenarioKey, Vec<BillingScenario>>,
    pub(crate) requirements: AssociationMap<ServiceItemId, Vec<ResourceRequirement>>,
    pub(crate) temp_ids: TempIdAllocator,
    pub(crate) scenario_loads: LoadTracker<ScenarioKey>,
    pub(crate) requirement_loads: LoadTracker<ServiceItemId>,
    pub(crate) roster_loads: LoadTracker<PractitionerId>,
}

impl StagingSession {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session from server state, replacing everything staged.
    pub fn initialize_full(
        &mut self,
        items: Vec<ServiceItem>,
        groups: Vec<Group>,
        associations: AssociationSnapshot,
    ) {
        self.load_owners(items, groups);
        self.assignments = AssignmentBook::new();
        self.assignments.map.load(associations.assignments);
        self.scenarios.load(associations.scenarios);
        self.requirements.load(associations.requirements);
        self.scenario_loads.clear();
        self.requirement_loads.clear();
        self.roster_loads.clear();
        self.prune_orphaned_associations();
        debug!(
            service_items = self.service_items.len(),
            groups = self.groups.len(),
            "staging session initialized"
        );
    }

    /// Restarts the session from server state but keeps association data.
    ///
    /// Used after a partially successful save, where some association data
    /// is already server-confirmed and must not be thrown away. Entries whose
    /// service item no longer exists are pruned.
    pub fn initialize_preserving_associations(
        &mut self,
        items: Vec<ServiceItem>,
        groups: Vec<Group>,
    ) {
        self.load_owners(items, groups);
        self.prune_orphaned_associations();
        debug!(
            service_items = self.service_items.len(),
            groups = self.groups.len(),
            "staging session re-initialized, associations preserved"
        );
    }

    fn load_owners(&mut self, items: Vec<ServiceItem>, groups: Vec<Group>) {
        for item in &items {
            self.temp_ids.observe(item.id);
        }
        for group in &groups {
            self.temp_ids.observe(group.id);
        }
        self.service_items.load(items);
        self.groups.load(groups);
    }

    fn prune_orphaned_associations(&mut self) {
        let items = &self.service_items;
        self.assignments.map.retain_keys(|id| items.contains(*id));
        self.scenarios
            .retain_keys(|key| items.contains(key.service_item_id));
        self.requirements.retain_keys(|id| items.contains(*id));
    }

    /// Mints a temporary id of any record kind.
    pub fn next_temp_id<I: RecordId>(&mut self) -> I {
        self.temp_ids.next()
    }

    // -- service items --------------------------------------------------

    /// Staged service items.
    pub fn service_items(&self) -> &StagedCollection<ServiceItem> {
        &self.service_items
    }

    /// Stages a new service item at the end of the listing.
    ///
    /// A temporary id is minted unless the record already carries an unused
    /// one. Returns the id the item is staged under.
    pub fn add_service_item(&mut self, mut item: ServiceItem) -> ServiceItemId {
        if !item.id.is_temporary() || self.service_items.contains(item.id) {
            item.id = self.temp_ids.next();
        } else {
            self.temp_ids.observe(item.id);
        }
        self.service_items.add(item)
    }

    /// Merges `patch` into a staged service item. No-op if `id` is unknown.
    pub fn update_service_item(&mut self, id: ServiceItemId, patch: ServiceItemPatch) -> bool {
        self.service_items.update_with(id, |item| patch.apply(item))
    }

    /// Removes a service item and, in the same step, every association
    /// entry keyed by it.
    pub fn delete_service_item(&mut self, id: ServiceItemId) -> bool {
        if self.service_items.remove(id).is_none() {
            return false;
        }
        self.assignments.map.remove(&id);
        self.scenarios.remove_owner(id);
        self.requirements.remove(&id);
        true
    }

    /// Assigns listing positions; unmentioned items keep their relative order
    /// after the listed ones.
    pub fn reorder_service_items(&mut self, ordered: &[ServiceItemId]) {
        self.service_items.reorder(ordered);
    }

    // -- groups ---------------------------------------------------------

    /// Staged groups.
    pub fn groups(&self) -> &StagedCollection<Group> {
        &self.groups
    }

    /// Stages a new group at the end of the listing.
    pub fn add_group(&mut self, mut group: Group) -> GroupId {
        if !group.id.is_temporary() || self.groups.contains(group.id) {
            group.id = self.temp_ids.next();
        } else {
            self.temp_ids.observe(group.id);
        }
        self.groups.add(group)
    }

    /// Merges `patch` into a staged group. No-op if `id` is unknown.
    pub fn update_group(&mut self, id: GroupId, patch: GroupPatch) -> bool {
        self.groups.update_with(id, |group| patch.apply(group))
    }

    /// Removes a group. Service items in it are unassigned, never deleted.
    pub fn delete_group(&mut self, id: GroupId) -> bool {
        if self.groups.remove(id).is_none() {
            return false;
        }
        self.service_items.update_all(|item| {
            if item.group_id == Some(id) {
                item.group_id = None;
            }
        });
        true
    }

    /// Assigns listing positions to groups.
    pub fn reorder_groups(&mut self, ordered: &[GroupId]) {
        self.groups.reorder(ordered);
    }

    // -- associations ---------------------------------------------------

    /// Staged practitioner eligibility.
    pub fn assignments(&self) -> &AssignmentBook {
        &self.assignments
    }

    /// Staged billing scenarios.
    pub fn billing_scenarios(&self) -> &AssociationMap<ScenarioKey, Vec<BillingScenario>> {
        &self.scenarios
    }

    /// Staged resource requirements.
    pub fn resource_requirements(
        &self,
    ) -> &AssociationMap<ServiceItemId, Vec<ResourceRequirement>> {
        &self.requirements
    }

    /// Replaces the practitioners eligible for a service item.
    ///
    /// Returns false if the service item is not staged.
    pub fn update_practitioner_assignments(
        &mut self,
        service_item: ServiceItemId,
        practitioners: impl IntoIterator<Item = PractitionerId>,
    ) -> bool {
        if !self.service_items.contains(service_item) {
            return false;
        }
        self.assignments
            .map
            .set(service_item, practitioners.into_iter().collect());
        true
    }

    /// Replaces the billing scenarios of a (service item, practitioner) pair.
    ///
    /// An empty list is an explicit instruction to delete every scenario of
    /// the pair on the next save. A temporary id repeated within the list is
    /// re-minted for every occurrence after the first. Returns false if the
    /// service item is not staged.
    pub fn update_billing_scenarios(
        &mut self,
        key: ScenarioKey,
        scenarios: Vec<BillingScenario>,
    ) -> bool {
        if !self.service_items.contains(key.service_item_id) {
            return false;
        }
        let scenarios = distinct_temporary_ids(&mut self.temp_ids, scenarios);
        self.scenarios.set(key, scenarios);
        true
    }

    /// Replaces the resource requirements of a service item.
    ///
    /// Repeated temporary ids are re-minted as for billing scenarios.
    /// Returns false if the service item is not staged.
    pub fn update_resource_requirements(
        &mut self,
        service_item: ServiceItemId,
        requirements: Vec<ResourceRequirement>,
    ) -> bool {
        if !self.service_items.contains(service_item) {
            return false;
        }
        let requirements = distinct_temporary_ids(&mut self.temp_ids, requirements);
        self.requirements.set(service_item, requirements);
        true
    }

    // -- lifecycle ------------------------------------------------------

    /// Returns true if anything staged differs from the baseline or still
    /// carries a temporary id.
    pub fn has_unsaved_changes(&self) -> bool {
        self.service_items.is_dirty()
            || self.groups.is_dirty()
            || self.assignments.map.is_dirty()
            || self.scenarios.is_dirty()
            || self.requirements.is_dirty()
    }

    /// Reverts every kind to its baseline.
    pub fn discard_changes(&mut self) {
        self.service_items.discard();
        self.groups.discard();
        self.assignments.map.discard();
        self.scenarios.discard();
        self.requirements.discard();
        debug!("staged changes discarded");
    }

    /// Accepts the current state of every kind as the new baseline.
    ///
    /// Call after a synchronization pass so already-applied changes stop
    /// being reported as unsaved.
    pub fn sync_originals(&mut self) {
        self.service_items.commit();
        self.groups.commit();
        self.assignments.map.commit();
        self.scenarios.commit();
        self.requirements.commit();
        debug!("staged state committed as baseline");
    }

    /// Replaces every occurrence of a temporary owner id with its real id.
    pub(crate) fn apply_remap(&mut self, remap: &IdRemap) {
        if remap.is_empty() {
            return;
        }
        self.groups.remap_ids(remap);
        self.service_items.remap_ids(remap);
        self.assignments.map.remap_keys(remap);
        self.scenarios.remap_keys(remap);
        self.requirements.remap_keys(remap);
        debug!(entries = remap.len(), "temporary ids remapped");
    }

    /// Forgets every association baseline tied to a service item that was
    /// deleted remotely.
    pub(crate) fn forget_deleted_service_item(&mut self, id: ServiceItemId) {
        self.assignments.map.drop_baseline(&id);
        self.assignments.evict_service_item(id);
        self.scenarios.drop_owner_baseline(id);
        self.requirements.drop_baseline(&id);
    }

    /// Persisted service item ids in the current state.
    pub(crate) fn persisted_service_item_ids(&self) -> Vec<ServiceItemId> {
        self.service_items
            .current()
            .keys()
            .filter(|id| !id.is_temporary())
            .copied()
            .collect()
    }
}

/// Gives every new record in `records` its own temporary id.
///
/// Each created record is matched back to its staged copy by temporary id,
/// so two records sharing one would both end up under the same real id.
fn distinct_temporary_ids<V: ChildRecord>(
    temp_ids: &mut TempIdAllocator,
    records: Vec<V>,
) -> Vec<V> {
    for record in &records {
        temp_ids.observe(record.id());
    }
    let mut seen = BTreeSet::new();
    records
        .into_iter()
        .map(|record| {
            let id = record.id();
            if !id.is_temporary() || seen.insert(id) {
                record
            } else {
                record.with_id(temp_ids.next())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebook_catalog::{RequirementId, ResourceTypeId, ScenarioId};

    fn key(service: i64, practitioner: i64) -> ScenarioKey {
        ScenarioKey::new(ServiceItemId(service), PractitionerId(practitioner))
    }

    fn session() -> StagingSession {
        let mut session = StagingSession::new();
        let mut snapshot = AssociationSnapshot::default();
        snapshot
            .assignments
            .insert(ServiceItemId(10), [PractitionerId(5)].into());
        snapshot.scenarios.insert(
            key(10, 5),
            vec![BillingScenario::new(ScenarioId(100), "Standard", 100.0, 0.5)],
        );
        snapshot.requirements.insert(
            ServiceItemId(10),
            vec![ResourceRequirement::new(RequirementId(7), ResourceTypeId(1), 1)],
        );
        session.initialize_full(
            vec![
                ServiceItem::new(ServiceItemId(10), "Consult").with_group(GroupId(1)),
                ServiceItem::new(ServiceItemId(11), "Follow-up")
                    .with_group(GroupId(1))
                    .with_display_order(1),
                ServiceItem::new(ServiceItemId(12), "Massage").with_display_order(2),
            ],
            vec![Group::new(GroupId(1), "General")],
            snapshot,
        );
        session
    }

    #[test]
    fn initialized_session_is_clean() {
        assert!(!session().has_unsaved_changes());
    }

    #[test]
    fn add_mints_temporary_id() {
        let mut session = session();
        let id = session.add_service_item(ServiceItem::new(ServiceItemId(999), "New"));
        assert!(id.is_temporary());
        assert_eq!(session.service_items().get(id).unwrap().display_order, 3);
        assert!(session.has_unsaved_changes());
    }

    #[test]
    fn delete_service_item_cascades_to_associations() {
        let mut session = session();
        session.update_billing_scenarios(key(10, 6), Vec::new());
        assert!(session.delete_service_item(ServiceItemId(10)));

        assert!(session.assignments().map.get(&ServiceItemId(10)).is_none());
        assert!(session
            .billing_scenarios()
            .current()
            .keys()
            .all(|k| k.service_item_id != ServiceItemId(10)));
        assert!(session
            .resource_requirements()
            .get(&ServiceItemId(10))
            .is_none());
    }

    #[test]
    fn delete_group_unassigns_items() {
        let mut session = session();
        assert!(session.delete_group(GroupId(1)));

        assert_eq!(session.service_items().len(), 3);
        assert!(session
            .service_items()
            .current()
            .values()
            .all(|item| item.group_id.is_none()));
    }

    #[test]
    fn association_setters_reject_unknown_owner() {
        let mut session = session();
        assert!(!session.update_billing_scenarios(key(99, 5), Vec::new()));
        assert!(!session.update_resource_requirements(ServiceItemId(99), Vec::new()));
        assert!(!session.update_practitioner_assignments(ServiceItemId(99), [PractitionerId(1)]));
        assert!(!session.has_unsaved_changes());
    }

    #[test]
    fn discard_reverts_everything() {
        let mut session = session();
        session.add_group(Group::new(GroupId(-1), "Extra"));
        session.delete_service_item(ServiceItemId(10));
        session.update_practitioner_assignments(ServiceItemId(11), [PractitionerId(5)]);
        session.reorder_service_items(&[ServiceItemId(12)]);

        session.discard_changes();
        assert!(!session.has_unsaved_changes());
        assert!(session.service_items().contains(ServiceItemId(10)));
        assert!(session.billing_scenarios().contains_key(&key(10, 5)));
    }

    #[test]
    fn sync_originals_clears_unsaved_flag() {
        let mut session = session();
        session.update_service_item(
            ServiceItemId(11),
            ServiceItemPatch {
                price_cents: Some(9000),
                ..Default::default()
            },
        );
        session.sync_originals();
        assert!(!session.has_unsaved_changes());
    }

    #[test]
    fn preserving_initialize_keeps_associations_and_prunes_orphans() {
        let mut session = session();
        session.update_resource_requirements(ServiceItemId(11), Vec::new());

        session.initialize_preserving_associations(
            vec![
                ServiceItem::new(ServiceItemId(11), "Follow-up"),
                ServiceItem::new(ServiceItemId(12), "Massage"),
            ],
            vec![],
        );

        assert!(session
            .resource_requirements()
            .contains_key(&ServiceItemId(11)));
        assert!(!session.billing_scenarios().contains_key(&key(10, 5)));
        assert!(session.assignments().map.get(&ServiceItemId(10)).is_none());
    }

    #[test]
    fn full_initialize_replaces_associations() {
        let mut session = session();
        session.initialize_full(
            vec![ServiceItem::new(ServiceItemId(10), "Consult")],
            vec![],
            AssociationSnapshot::default(),
        );
        assert!(!session.billing_scenarios().contains_key(&key(10, 5)));
        assert!(!session.has_unsaved_changes());
    }

    #[test]
    fn apply_remap_rewrites_every_reference() {
        let mut session = session();
        let group = session.add_group(Group::new(GroupId(-1), "Physio"));
        let item = session
            .add_service_item(ServiceItem::new(ServiceItemId(-1), "Rehab").with_group(group));
        session.update_billing_scenarios(ScenarioKey::new(item, PractitionerId(5)), Vec::new());
        session.update_resource_requirements(item, Vec::new());
        session.update_practitioner_assignments(item, [PractitionerId(5)]);

        let mut remap = IdRemap::new();
        remap.record_group(group, GroupId(70));
        remap.record_service_item(item, ServiceItemId(42));
        session.apply_remap(&remap);

        assert_eq!(
            session.service_items().get(ServiceItemId(42)).unwrap().group_id,
            Some(GroupId(70))
        );
        assert!(session
            .billing_scenarios()
            .contains_key(&key(42, 5)));
        assert!(session.resource_requirements().contains_key(&ServiceItemId(42)));
        assert!(session.assignments().map.contains_key(&ServiceItemId(42)));
    }

    #[test]
    fn repeated_temporary_ids_are_reminted() {
        let mut session = session();
        session.update_billing_scenarios(
            key(11, 5),
            vec![
                BillingScenario::new(ScenarioId(-1), "A", 10.0, 0.5),
                BillingScenario::new(ScenarioId(-1), "B", 20.0, 0.5),
                BillingScenario::new(ScenarioId(100), "Kept", 30.0, 0.5),
            ],
        );

        let ids: Vec<ScenarioId> = session
            .billing_scenarios()
            .get(&key(11, 5))
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids[0], ScenarioId(-1));
        assert!(ids[1].is_temporary());
        assert_ne!(ids[1], ids[0]);
        assert_eq!(ids[2], ScenarioId(100));

        // re-submitting the staged list keeps its ids
        let staged = session.billing_scenarios().get(&key(11, 5)).unwrap().clone();
        session.update_billing_scenarios(key(11, 5), staged.clone());
        assert_eq!(session.billing_scenarios().get(&key(11, 5)), Some(&staged));
    }
}
