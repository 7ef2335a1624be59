//! Delta computation between current and baseline state.

use crate::associations::{AssignmentBook, ChildRecord};
use crate::staged::{StagedCollection, StagedRecord};
use carebook_catalog::{PractitionerId, RecordId, ServiceItemId};
use std::collections::{BTreeMap, BTreeSet};

/// Minimal changes needed to bring the remote copy of an owner kind in line
/// with the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDelta<T: StagedRecord> {
    /// Records carrying a temporary id.
    pub creates: Vec<T>,
    /// Persisted records whose content (ignoring listing position) changed.
    pub updates: Vec<T>,
    /// Persisted ids no longer present. Temporary ids are never deleted
    /// remotely.
    pub deletes: Vec<T::Id>,
    /// Full listing order to send, if any persisted record moved.
    pub reorder: Option<Vec<T::Id>>,
}

impl<T: StagedRecord> CollectionDelta<T> {
    /// Returns true if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.reorder.is_none()
    }
}

/// Computes the delta of an owner collection.
pub fn diff_collection<T: StagedRecord>(collection: &StagedCollection<T>) -> CollectionDelta<T> {
    let current = collection.current();
    let baseline = collection.baseline();

    let deletes = baseline
        .keys()
        .filter(|id| !id.is_temporary() && !current.contains_key(*id))
        .copied()
        .collect();

    let mut creates = Vec::new();
    let mut updates = Vec::new();
    let mut moved = false;
    for (id, record) in current {
        if id.is_temporary() {
            creates.push(record.clone());
            continue;
        }
        match baseline.get(id) {
            Some(previous) => {
                if !record.same_content(previous) {
                    updates.push(record.clone());
                }
                moved |= record.display_order() != previous.display_order();
            }
            // Persisted id unknown to the baseline: let the store decide.
            None => updates.push(record.clone()),
        }
    }

    CollectionDelta {
        creates,
        updates,
        deletes,
        reorder: moved.then(|| collection.ordered_ids()),
    }
}

/// Changes to the records stored under one association key.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDelta<V: ChildRecord> {
    /// Records carrying a temporary id.
    pub creates: Vec<V>,
    /// Persisted records whose value changed.
    pub updates: Vec<V>,
    /// Persisted records no longer present.
    pub deletes: Vec<V>,
}

impl<V: ChildRecord> RecordDelta<V> {
    /// Returns true if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Number of requests the delta needs.
    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

/// Computes the delta for one association key.
///
/// Callers must only pass keys present in the current map: a key that was
/// never loaded or touched has no delta at all, not "delete everything".
pub fn diff_records<V: ChildRecord>(current: &[V], baseline: &[V]) -> RecordDelta<V> {
    let previous: BTreeMap<V::Id, &V> = baseline.iter().map(|r| (r.id(), r)).collect();
    let kept: BTreeSet<V::Id> = current.iter().map(ChildRecord::id).collect();

    let mut creates = Vec::new();
    let mut updates = Vec::new();
    for record in current {
        if record.id().is_temporary() {
            creates.push(record.clone());
        } else if previous.get(&record.id()).map_or(true, |p| *p != record) {
            updates.push(record.clone());
        }
    }

    let deletes = baseline
        .iter()
        .filter(|r| !kept.contains(&r.id()))
        .cloned()
        .collect();

    RecordDelta {
        creates,
        updates,
        deletes,
    }
}

/// One full-replacement request for a practitioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterChange {
    /// The practitioner whose list is replaced.
    pub practitioner: PractitionerId,
    /// Complete list to send.
    pub desired: BTreeSet<ServiceItemId>,
}

/// Practitioners affected by the given dirty service-item keys.
///
/// Anyone currently or previously assigned to a dirty key, or whose fetched
/// roster lists it, may need a new full list.
pub fn affected_practitioners(
    book: &AssignmentBook,
    dirty: &[ServiceItemId],
) -> BTreeSet<PractitionerId> {
    let mut affected = BTreeSet::new();
    for id in dirty {
        if let Some(current) = book.map.get(id) {
            affected.extend(current.iter().copied());
        }
        if let Some(previous) = book.map.baseline_value(id) {
            affected.extend(previous.iter().copied());
        }
        affected.extend(book.practitioners_with(*id));
    }
    affected
}

/// Builds the replacement list of one practitioner.
///
/// Starts from the confirmed roster and sets membership of every dirty key
/// from the staged state. Service items deleted remotely have already been
/// evicted from the roster; one whose delete failed still exists and keeps
/// its place. Returns `None` when the roster would not change.
pub fn roster_change(
    book: &AssignmentBook,
    practitioner: PractitionerId,
    roster: &BTreeSet<ServiceItemId>,
    dirty: &[ServiceItemId],
) -> Option<RosterChange> {
    let mut desired = roster.clone();

    for id in dirty {
        let assigned = book
            .map
            .get(id)
            .is_some_and(|practitioners| practitioners.contains(&practitioner));
        if assigned {
            desired.insert(*id);
        } else {
            desired.remove(id);
        }
    }

    (desired != *roster).then_some(RosterChange {
        practitioner,
        desired,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebook_catalog::{BillingScenario, ScenarioId, ServiceItem};

    fn scenario(id: i64, amount: f64) -> BillingScenario {
        BillingScenario::new(ScenarioId(id), "Standard", amount, 0.5)
    }

    #[test]
    fn collection_delta_classifies_records() {
        let mut items = StagedCollection::new();
        items.load(vec![
            ServiceItem::new(ServiceItemId(1), "A"),
            ServiceItem::new(ServiceItemId(2), "B").with_display_order(1),
            ServiceItem::new(ServiceItemId(3), "C").with_display_order(2),
        ]);
        items.add(ServiceItem::new(ServiceItemId(-1), "D"));
        items.update_with(ServiceItemId(2), |r| r.name = "B2".into());
        items.remove(ServiceItemId(3));

        let delta = diff_collection(&items);
        assert_eq!(delta.creates.len(), 1);
        assert_eq!(delta.creates[0].id, ServiceItemId(-1));
        assert_eq!(delta.updates.len(), 1);
        assert_eq!(delta.updates[0].id, ServiceItemId(2));
        assert_eq!(delta.deletes, vec![ServiceItemId(3)]);
        assert!(delta.reorder.is_none());
    }

    #[test]
    fn reorder_is_not_a_content_update() {
        let mut items = StagedCollection::new();
        items.load(vec![
            ServiceItem::new(ServiceItemId(1), "A"),
            ServiceItem::new(ServiceItemId(2), "B").with_display_order(1),
        ]);
        items.reorder(&[ServiceItemId(2)]);

        let delta = diff_collection(&items);
        assert!(delta.updates.is_empty());
        assert_eq!(delta.reorder, Some(vec![ServiceItemId(2), ServiceItemId(1)]));
    }

    #[test]
    fn clean_collection_has_empty_delta() {
        let mut items = StagedCollection::new();
        items.load(vec![ServiceItem::new(ServiceItemId(1), "A")]);
        assert!(diff_collection(&items).is_empty());
    }

    #[test]
    fn record_delta_classifies_records() {
        let baseline = vec![scenario(1, 100.0), scenario(2, 200.0), scenario(3, 300.0)];
        let current = vec![scenario(1, 100.0), scenario(2, 250.0), scenario(-1, 50.0)];

        let delta = diff_records(&current, &baseline);
        assert_eq!(delta.creates, vec![scenario(-1, 50.0)]);
        assert_eq!(delta.updates, vec![scenario(2, 250.0)]);
        assert_eq!(delta.deletes, vec![scenario(3, 300.0)]);
        assert_eq!(delta.len(), 3);
    }

    #[test]
    fn explicit_empty_deletes_everything() {
        let baseline = vec![scenario(1, 100.0), scenario(2, 200.0)];
        let delta = diff_records::<BillingScenario>(&[], &baseline);
        assert_eq!(delta.deletes.len(), 2);
        assert!(delta.creates.is_empty());
    }

    #[test]
    fn roster_change_applies_dirty_keys_only() {
        let mut book = AssignmentBook::new();
        book.set_roster(PractitionerId(5), [ServiceItemId(1), ServiceItemId(2)].into());
        book.fill_unloaded([ServiceItemId(1), ServiceItemId(2), ServiceItemId(3)]);
        book.map.set(ServiceItemId(2), BTreeSet::new());
        book.map.set(ServiceItemId(3), [PractitionerId(5)].into());

        let dirty = book.map.dirty_keys();
        assert_eq!(dirty, vec![ServiceItemId(2), ServiceItemId(3)]);
        assert_eq!(
            affected_practitioners(&book, &dirty),
            BTreeSet::from([PractitionerId(5)])
        );

        let roster = book.roster(PractitionerId(5)).unwrap().clone();
        let change = roster_change(&book, PractitionerId(5), &roster, &dirty).unwrap();
        assert_eq!(
            change.desired,
            BTreeSet::from([ServiceItemId(1), ServiceItemId(3)])
        );
    }

    #[test]
    fn roster_change_keeps_items_missing_from_the_staged_map() {
        let mut book = AssignmentBook::new();
        book.set_roster(PractitionerId(5), [ServiceItemId(1), ServiceItemId(2)].into());
        book.fill_unloaded([ServiceItemId(1), ServiceItemId(2), ServiceItemId(3)]);
        // 2 is deleted locally, 3 gains the practitioner
        book.map.remove(&ServiceItemId(2));
        book.map.set(ServiceItemId(3), [PractitionerId(5)].into());

        let roster = book.roster(PractitionerId(5)).unwrap().clone();
        let change =
            roster_change(&book, PractitionerId(5), &roster, &book.map.dirty_keys()).unwrap();
        assert_eq!(
            change.desired,
            BTreeSet::from([ServiceItemId(1), ServiceItemId(2), ServiceItemId(3)])
        );
    }

    #[test]
    fn unchanged_roster_needs_no_request() {
        let mut book = AssignmentBook::new();
        book.set_roster(PractitionerId(5), [ServiceItemId(1)].into());
        book.fill_unloaded([ServiceItemId(1)]);
        let roster = book.roster(PractitionerId(5)).unwrap().clone();
        assert!(roster_change(&book, PractitionerId(5), &roster, &[ServiceItemId(1)]).is_none());
    }
}
