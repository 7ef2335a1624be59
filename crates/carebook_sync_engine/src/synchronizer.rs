//! The synchronization pass.
//!
//! A pass moves through `Idle → PersistingOwners → RemappingIdentifiers →
//! PersistingAssociations → Idle`:
//!
//! 1. Owners (groups, then service items) are created, updated and deleted.
//!    Server-assigned ids are collected into an [`IdRemap`].
//! 2. The remap is applied to the whole session: primary ids, group
//!    references and association keys.
//! 3. Dependent records are persisted against real owner ids only.
//!
//! Each phase is planned from a shared borrow of the session, executed
//! against the remote store without touching the session, and folded back
//! in afterwards. Requests within a phase run concurrently and settle
//! independently: a failing request is reported in the [`SaveOutcome`],
//! leaves its change pending, and never cancels its siblings.

use crate::associations::{AssignmentBook, AssociationKey, AssociationValue, ChildRecord};
use crate::config::SyncConfig;
use crate::diff::{
    affected_practitioners, diff_collection, diff_records, roster_change, RosterChange,
};
use crate::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use crate::kinds::{ChildKind, OwnerKind, Requirements, Scenarios};
use crate::remap::{IdRemap, Remap};
use crate::remote::RemoteCatalog;
use crate::session::StagingSession;
use carebook_catalog::{Group, PractitionerId, RecordId, ServiceItem, ServiceItemId};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The current phase of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pass is running.
    Idle,
    /// Creating, updating and deleting groups or service items.
    PersistingOwners,
    /// Rewriting temporary ids to server-assigned ones.
    RemappingIdentifiers,
    /// Persisting assignments, billing scenarios and resource requirements.
    PersistingAssociations,
}

impl SyncState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }

    /// Returns true if a new pass may start.
    pub fn can_start_pass(&self) -> bool {
        matches!(self, SyncState::Idle)
    }

    /// Returns true if a pass may move from this phase to `next`.
    pub fn can_transition_to(&self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (*self, next),
            (Idle, PersistingOwners)
                | (Idle, PersistingAssociations)
                | (PersistingOwners, RemappingIdentifiers)
                | (RemappingIdentifiers, PersistingOwners)
                | (RemappingIdentifiers, PersistingAssociations)
        )
    }
}

/// Statistics about synchronization passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that ran to completion, with or without errors.
    pub passes_completed: u64,
    /// Completed passes that left at least one change unresolved.
    pub partial_passes: u64,
    /// Remote requests issued, including lists fetched during a pass.
    pub requests_sent: u64,
    /// Remote requests that failed (a "not found" is not counted).
    pub requests_failed: u64,
    /// Temporary ids replaced by server-assigned ones.
    pub ids_remapped: u64,
    /// When the last pass finished.
    pub last_pass_time: Option<Instant>,
    /// First error of the last pass, if it had any.
    pub last_error: Option<String>,
}

/// How a pass ended, as presented to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    /// Every staged change was persisted.
    Saved,
    /// Some changes were persisted; `unresolved` still need a retry.
    Partial {
        /// Number of reported failures.
        unresolved: usize,
    },
}

/// Result of a synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// True only if `errors` is empty.
    pub success: bool,
    /// One user-facing message per failed record or request.
    pub errors: Vec<String>,
}

impl SaveOutcome {
    /// Builds an outcome from the collected errors.
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            success: errors.is_empty(),
            errors,
        }
    }

    /// Classifies the outcome.
    pub fn status(&self) -> SaveStatus {
        if self.success {
            SaveStatus::Saved
        } else {
            SaveStatus::Partial {
                unresolved: self.errors.len(),
            }
        }
    }
}

/// Resets the state to `Idle` when a pass ends, however it ends.
struct PassGuard<'a> {
    state: &'a RwLock<SyncState>,
    started: Instant,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *self.state.write() = SyncState::Idle;
    }
}

fn failure(context: String, err: &RemoteError) -> String {
    warn!(%context, error = %err, "remote request failed");
    format!("{context}: {err}")
}

// -- owners -------------------------------------------------------------

enum OwnerOp<T: OwnerKind> {
    Create(T),
    Update(T),
    Delete { id: T::Id, label: String },
}

enum OwnerSettled<I> {
    Created { temp: I, real: I },
    Updated(I),
    Deleted(I),
    Failed(String),
}

fn plan_owners<T: OwnerKind>(
    session: &StagingSession,
    errors: &mut Vec<String>,
) -> (Vec<OwnerOp<T>>, bool) {
    let staged = T::staged(session);
    let delta = diff_collection(staged);
    let mut ops = Vec::new();

    for (record, create) in delta
        .creates
        .into_iter()
        .map(|r| (r, true))
        .chain(delta.updates.into_iter().map(|r| (r, false)))
    {
        if record.has_temporary_reference() {
            errors.push(format!(
                "{} \"{}\": references a record that has not been saved",
                T::KIND,
                record.label()
            ));
            continue;
        }
        ops.push(if create {
            OwnerOp::Create(record)
        } else {
            OwnerOp::Update(record)
        });
    }

    for id in delta.deletes {
        let label = staged
            .baseline_record(id)
            .map(|r| r.label().to_string())
            .unwrap_or_else(|| id.to_string());
        ops.push(OwnerOp::Delete { id, label });
    }

    (ops, delta.reorder.is_some())
}

// -- practitioner assignments -------------------------------------------

struct AssignmentPlan {
    book: AssignmentBook,
    dirty: Vec<ServiceItemId>,
    affected: BTreeSet<PractitionerId>,
}

#[derive(Default)]
struct AssignmentReport {
    dirty: Vec<ServiceItemId>,
    fetched: Vec<(PractitionerId, BTreeSet<ServiceItemId>)>,
    replaced: Vec<RosterChange>,
    failed: BTreeSet<PractitionerId>,
    errors: Vec<String>,
}

fn plan_assignments(session: &StagingSession, errors: &mut Vec<String>) -> AssignmentPlan {
    let map = &session.assignments.map;
    let mut dirty = Vec::new();
    for (id, practitioners) in map.current() {
        if map.baseline_value(id) == Some(practitioners) {
            continue;
        }
        if id.is_temporary() {
            errors.push(format!(
                "practitioner assignments of service item {id}: the service item has not been saved"
            ));
            continue;
        }
        dirty.push(*id);
    }

    AssignmentPlan {
        affected: affected_practitioners(&session.assignments, &dirty),
        book: session.assignments.clone(),
        dirty,
    }
}

fn fold_assignments(
    session: &mut StagingSession,
    report: AssignmentReport,
    errors: &mut Vec<String>,
) {
    for (practitioner, items) in report.fetched {
        session.assignments.set_roster(practitioner, items);
    }
    for change in report.replaced {
        session
            .assignments
            .set_roster(change.practitioner, change.desired);
    }
    for id in report.dirty {
        let involved = affected_practitioners(&session.assignments, &[id]);
        if !involved.is_disjoint(&report.failed) {
            continue;
        }
        if let Some(value) = session.assignments.map.get(&id).cloned() {
            session.assignments.map.fold_baseline(id, value);
        }
    }
    errors.extend(report.errors);
}

// -- billing scenarios and resource requirements ------------------------

struct ChildPlan<C: ChildKind> {
    key: C::Key,
    current: Vec<C::Record>,
    baseline: Option<Vec<C::Record>>,
}

enum ChildOp<V> {
    Create(V),
    Update(V),
    Delete(V),
}

enum ChildSettled<V: ChildRecord> {
    Created { temp: V::Id, real: V::Id },
    Confirmed,
    Failed { id: V::Id, message: String },
}

type ChildId<C> = <<C as ChildKind>::Record as ChildRecord>::Id;

struct ChildReport<C: ChildKind> {
    keys: Vec<C::Key>,
    fetched: Vec<(C::Key, Vec<C::Record>)>,
    settled: Vec<(C::Key, ChildSettled<C::Record>)>,
    errors: Vec<String>,
}

fn plan_children<C: ChildKind>(
    session: &StagingSession,
    errors: &mut Vec<String>,
) -> Vec<ChildPlan<C>> {
    let staged = C::staged(session);
    let mut plans = Vec::new();
    for (key, current) in staged.current() {
        let baseline = staged.baseline_value(key);
        if baseline == Some(current) && !current.has_temporary_ids() {
            continue;
        }
        if key.owner().is_temporary() {
            errors.push(format!(
                "{}s for {key}: the service item has not been saved",
                C::KIND
            ));
            continue;
        }
        plans.push(ChildPlan {
            key: *key,
            current: current.clone(),
            baseline: baseline.cloned(),
        });
    }
    plans
}

/// Folds settled child requests into the session.
///
/// The new baseline of a key is its current list, except that records whose
/// request failed keep their previous confirmed value (or stay out of the
/// baseline if they never existed remotely). A fully settled key therefore
/// ends up clean, and every failure stays pending for the next pass.
fn fold_children<C: ChildKind>(
    session: &mut StagingSession,
    report: ChildReport<C>,
    errors: &mut Vec<String>,
) {
    let staged = C::staged_mut(session);
    for (key, records) in report.fetched {
        staged.fold_baseline(key, records);
    }

    let mut created: BTreeMap<C::Key, BTreeMap<ChildId<C>, ChildId<C>>> = BTreeMap::new();
    let mut failed: BTreeMap<C::Key, BTreeSet<ChildId<C>>> = BTreeMap::new();
    for (key, settled) in report.settled {
        match settled {
            ChildSettled::Created { temp, real } => {
                created.entry(key).or_default().insert(temp, real);
            }
            ChildSettled::Confirmed => {}
            ChildSettled::Failed { id, message } => {
                failed.entry(key).or_default().insert(id);
                errors.push(message);
            }
        }
    }

    let none_created = BTreeMap::new();
    let none_failed = BTreeSet::new();
    for key in report.keys {
        let Some(current) = staged.get(&key) else {
            continue;
        };
        let created = created.get(&key).unwrap_or(&none_created);
        let failed = failed.get(&key).unwrap_or(&none_failed);

        let current: Vec<C::Record> = current
            .iter()
            .map(|r| match created.get(&r.id()) {
                Some(real) => r.with_id(*real),
                None => r.clone(),
            })
            .collect();
        let previous: BTreeMap<ChildId<C>, C::Record> = staged
            .baseline_value(&key)
            .map(|records| records.iter().map(|r| (r.id(), r.clone())).collect())
            .unwrap_or_default();

        let mut confirmed = Vec::with_capacity(current.len());
        for record in &current {
            if record.id().is_temporary() {
                continue;
            }
            if failed.contains(&record.id()) {
                confirmed.extend(previous.get(&record.id()).cloned());
            } else {
                confirmed.push(record.clone());
            }
        }
        let kept: BTreeSet<ChildId<C>> = current.iter().map(ChildRecord::id).collect();
        confirmed.extend(
            previous
                .into_values()
                .filter(|r| !kept.contains(&r.id()) && failed.contains(&r.id())),
        );

        staged.set(key, current);
        staged.fold_baseline(key, confirmed);
    }
    errors.extend(report.errors);
}

/// Runs synchronization passes against a remote catalog.
///
/// One synchronizer serves any number of sessions, one pass at a time.
pub struct Synchronizer<R: RemoteCatalog> {
    remote: Arc<R>,
    config: SyncConfig,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<R: RemoteCatalog> Synchronizer<R> {
    /// Creates a synchronizer.
    pub fn new(remote: Arc<R>, config: SyncConfig) -> Self {
        Self {
            remote,
            config,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    fn begin_pass(&self, first: SyncState) -> SyncResult<PassGuard<'_>> {
        let mut state = self.state.write();
        if !state.can_start_pass() {
            warn!(state = ?*state, "synchronization pass refused");
            return Err(SyncError::PassInProgress);
        }
        if !state.can_transition_to(first) {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{first:?}"),
            });
        }
        *state = first;
        debug!(state = ?first, "synchronization pass started");
        Ok(PassGuard {
            state: &self.state,
            started: Instant::now(),
        })
    }

    fn transition(&self, next: SyncState) -> SyncResult<()> {
        let mut state = self.state.write();
        if *state == next {
            return Ok(());
        }
        if !state.can_transition_to(next) {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{next:?}"),
            });
        }
        debug!(from = ?*state, to = ?next, "sync state transition");
        *state = next;
        Ok(())
    }

    fn finish_pass(&self, pass: PassGuard<'_>, errors: Vec<String>) -> SaveOutcome {
        let outcome = SaveOutcome::from_errors(errors);
        {
            let mut stats = self.stats.write();
            stats.passes_completed += 1;
            if !outcome.success {
                stats.partial_passes += 1;
            }
            stats.last_error = outcome.errors.first().cloned();
            stats.last_pass_time = Some(Instant::now());
        }
        info!(
            errors = outcome.errors.len(),
            elapsed_ms = pass.started.elapsed().as_millis() as u64,
            "synchronization pass finished"
        );
        outcome
    }

    /// Issues one remote request, bounded by the configured timeout.
    async fn call<T>(&self, request: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        self.stats.write().requests_sent += 1;
        let result = match tokio::time::timeout(self.config.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };
        if matches!(&result, Err(err) if !err.is_not_found()) {
            self.stats.write().requests_failed += 1;
        }
        result
    }

    /// Persists staged group changes.
    pub async fn save_groups(&self, session: &mut StagingSession) -> SyncResult<SaveOutcome> {
        let pass = self.begin_pass(SyncState::PersistingOwners)?;
        let mut errors = Vec::new();
        self.persist_owners::<Group>(session, &mut errors).await?;
        Ok(self.finish_pass(pass, errors))
    }

    /// Persists staged service item changes.
    ///
    /// Items still referencing an unsaved group are not sent.
    pub async fn save_service_items(
        &self,
        session: &mut StagingSession,
    ) -> SyncResult<SaveOutcome> {
        let pass = self.begin_pass(SyncState::PersistingOwners)?;
        let mut errors = Vec::new();
        self.persist_owners::<ServiceItem>(session, &mut errors).await?;
        Ok(self.finish_pass(pass, errors))
    }

    /// Persists staged practitioner eligibility as full per-practitioner lists.
    pub async fn save_practitioner_assignments(
        &self,
        session: &mut StagingSession,
    ) -> SyncResult<SaveOutcome> {
        let pass = self.begin_pass(SyncState::PersistingAssociations)?;
        let mut errors = Vec::new();
        let plan = plan_assignments(session, &mut errors);
        let report = self.execute_assignments(plan).await;
        fold_assignments(session, report, &mut errors);
        Ok(self.finish_pass(pass, errors))
    }

    /// Persists staged billing scenarios.
    pub async fn save_billing_scenarios(
        &self,
        session: &mut StagingSession,
    ) -> SyncResult<SaveOutcome> {
        self.save_children::<Scenarios>(session).await
    }

    /// Persists staged resource requirements.
    pub async fn save_resource_requirements(
        &self,
        session: &mut StagingSession,
    ) -> SyncResult<SaveOutcome> {
        self.save_children::<Requirements>(session).await
    }

    /// Persists everything staged in one pass.
    ///
    /// Groups go first so service items can reference their real ids; service
    /// items go next so every association key can be remapped before any
    /// dependent request is issued. The three association kinds are then
    /// persisted concurrently.
    pub async fn save_all(&self, session: &mut StagingSession) -> SyncResult<SaveOutcome> {
        let pass = self.begin_pass(SyncState::PersistingOwners)?;
        let mut errors = Vec::new();

        self.persist_owners::<Group>(session, &mut errors).await?;
        self.persist_owners::<ServiceItem>(session, &mut errors).await?;

        self.transition(SyncState::PersistingAssociations)?;
        let assignments = plan_assignments(session, &mut errors);
        let scenarios = plan_children::<Scenarios>(session, &mut errors);
        let requirements = plan_children::<Requirements>(session, &mut errors);

        let (assignments, scenarios, requirements) = futures::join!(
            self.execute_assignments(assignments),
            self.execute_children::<Scenarios>(scenarios),
            self.execute_children::<Requirements>(requirements),
        );

        fold_assignments(session, assignments, &mut errors);
        fold_children(session, scenarios, &mut errors);
        fold_children(session, requirements, &mut errors);

        Ok(self.finish_pass(pass, errors))
    }

    async fn save_children<C: ChildKind>(
        &self,
        session: &mut StagingSession,
    ) -> SyncResult<SaveOutcome> {
        let pass = self.begin_pass(SyncState::PersistingAssociations)?;
        let mut errors = Vec::new();
        let plans = plan_children::<C>(session, &mut errors);
        let report = self.execute_children::<C>(plans).await;
        fold_children(session, report, &mut errors);
        Ok(self.finish_pass(pass, errors))
    }

    /// Persists one owner kind and remaps its new ids through the session.
    async fn persist_owners<T: OwnerKind>(
        &self,
        session: &mut StagingSession,
        errors: &mut Vec<String>,
    ) -> SyncResult<()> {
        self.transition(SyncState::PersistingOwners)?;
        let (ops, reorder) = plan_owners::<T>(session, errors);
        debug!(kind = T::KIND, requests = ops.len(), reorder, "persisting owners");

        let settled: Vec<OwnerSettled<T::Id>> = stream::iter(ops)
            .map(|op| self.settle_owner(op))
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;

        let mut remap = IdRemap::new();
        let mut created = Vec::new();
        let mut updated = Vec::new();
        let mut deleted = Vec::new();
        for outcome in settled {
            match outcome {
                OwnerSettled::Created { temp, real } => {
                    T::record_created(&mut remap, temp, real);
                    created.push(real);
                }
                OwnerSettled::Updated(id) => updated.push(id),
                OwnerSettled::Deleted(id) => deleted.push(id),
                OwnerSettled::Failed(message) => errors.push(message),
            }
        }

        // Listing order is sent once creates have settled, with real ids only.
        let mut confirmed_order = None;
        if reorder {
            let ids: Vec<T::Id> = T::staged(session)
                .ordered_ids()
                .into_iter()
                .map(|id| id.remapped(&remap))
                .filter(|id| !id.is_temporary())
                .collect();
            match self.call(T::reorder(self.remote.as_ref(), &ids)).await {
                Ok(()) => confirmed_order = Some(ids),
                Err(err) => errors.push(failure(format!("reordering {}s", T::KIND), &err)),
            }
        }

        self.transition(SyncState::RemappingIdentifiers)?;
        session.apply_remap(&remap);
        self.stats.write().ids_remapped += remap.len() as u64;

        let staged = T::staged_mut(session);
        for id in created {
            staged.confirm_created(id);
        }
        for id in updated {
            staged.confirm_updated(id);
        }
        for id in &deleted {
            staged.confirm_deleted(*id);
        }
        if let Some(ids) = confirmed_order {
            staged.confirm_order(&ids);
        }
        for id in deleted {
            T::forget_deleted(session, id);
        }
        Ok(())
    }

    async fn settle_owner<T: OwnerKind>(&self, op: OwnerOp<T>) -> OwnerSettled<T::Id> {
        let remote = self.remote.as_ref();
        match op {
            OwnerOp::Create(record) => match self.call(T::create(remote, &record)).await {
                Ok(real) => OwnerSettled::Created {
                    temp: record.id(),
                    real,
                },
                Err(err) => OwnerSettled::Failed(failure(
                    format!("creating {} \"{}\"", T::KIND, record.label()),
                    &err,
                )),
            },
            OwnerOp::Update(record) => match self.call(T::update(remote, &record)).await {
                Ok(()) => OwnerSettled::Updated(record.id()),
                Err(err) => OwnerSettled::Failed(failure(
                    format!("updating {} \"{}\"", T::KIND, record.label()),
                    &err,
                )),
            },
            OwnerOp::Delete { id, label } => match self.call(T::delete(remote, id)).await {
                Ok(()) | Err(RemoteError::NotFound) => OwnerSettled::Deleted(id),
                Err(err) => OwnerSettled::Failed(failure(
                    format!("deleting {} \"{label}\"", T::KIND),
                    &err,
                )),
            },
        }
    }

    async fn execute_assignments(&self, mut plan: AssignmentPlan) -> AssignmentReport {
        let mut report = AssignmentReport::default();
        if plan.dirty.is_empty() {
            return report;
        }
        let remote = self.remote.as_ref();

        let missing: Vec<PractitionerId> = plan
            .affected
            .iter()
            .filter(|p| plan.book.roster(**p).is_none())
            .copied()
            .collect();
        let fetched: Vec<_> = stream::iter(missing)
            .map(|practitioner| async move {
                let result = self.call(remote.read_assignments(practitioner)).await;
                (practitioner, result)
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;
        for (practitioner, result) in fetched {
            let items: BTreeSet<ServiceItemId> = match result {
                Ok(items) => items.into_iter().collect(),
                Err(RemoteError::NotFound) => BTreeSet::new(),
                Err(err) => {
                    report.failed.insert(practitioner);
                    report.errors.push(failure(
                        format!("loading assignments of practitioner {practitioner}"),
                        &err,
                    ));
                    continue;
                }
            };
            plan.book.set_roster(practitioner, items.clone());
            report.fetched.push((practitioner, items));
        }

        let changes: Vec<RosterChange> = plan
            .affected
            .iter()
            .filter(|p| !report.failed.contains(*p))
            .filter_map(|p| {
                let roster = plan.book.roster(*p)?;
                roster_change(&plan.book, *p, roster, &plan.dirty)
            })
            .collect();
        debug!(
            service_items = plan.dirty.len(),
            practitioners = changes.len(),
            "persisting practitioner assignments"
        );

        let sent: Vec<_> = stream::iter(changes)
            .map(|change| async move {
                let ids: Vec<ServiceItemId> = change.desired.iter().copied().collect();
                let result = self
                    .call(remote.replace_assignments(change.practitioner, &ids))
                    .await;
                (change, result)
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;
        for (change, result) in sent {
            match result {
                Ok(()) => report.replaced.push(change),
                Err(err) => {
                    report.failed.insert(change.practitioner);
                    report.errors.push(failure(
                        format!("saving assignments of practitioner {}", change.practitioner),
                        &err,
                    ));
                }
            }
        }

        report.dirty = plan.dirty;
        report
    }

    async fn execute_children<C: ChildKind>(&self, plans: Vec<ChildPlan<C>>) -> ChildReport<C> {
        let mut report = ChildReport {
            keys: Vec::new(),
            fetched: Vec::new(),
            settled: Vec::new(),
            errors: Vec::new(),
        };
        if plans.is_empty() {
            return report;
        }
        let remote = self.remote.as_ref();

        // Keys set without ever being loaded need their remote records first,
        // otherwise an explicit empty list could not delete anything.
        let (mut ready, missing): (Vec<_>, Vec<_>) =
            plans.into_iter().partition(|plan| plan.baseline.is_some());
        let fetched: Vec<_> = stream::iter(missing)
            .map(|plan| async move {
                let result = self.call(C::list(remote, plan.key)).await;
                (plan, result)
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;
        for (mut plan, result) in fetched {
            let records = match result {
                Ok(records) => records,
                Err(RemoteError::NotFound) => Vec::new(),
                Err(err) => {
                    report.errors.push(failure(
                        format!("loading {}s for {}", C::KIND, plan.key),
                        &err,
                    ));
                    continue;
                }
            };
            report.fetched.push((plan.key, records.clone()));
            plan.baseline = Some(records);
            ready.push(plan);
        }

        let mut ops = Vec::new();
        for plan in &ready {
            let delta = diff_records(&plan.current, plan.baseline.as_deref().unwrap_or(&[]));
            ops.extend(delta.creates.into_iter().map(|r| (plan.key, ChildOp::Create(r))));
            ops.extend(delta.updates.into_iter().map(|r| (plan.key, ChildOp::Update(r))));
            ops.extend(
                delta
                    .deletes
                    .into_iter()
                    .filter(|r| !r.id().is_temporary())
                    .map(|r| (plan.key, ChildOp::Delete(r))),
            );
        }
        debug!(kind = C::KIND, keys = ready.len(), requests = ops.len(), "persisting associations");

        report.settled = stream::iter(ops)
            .map(|(key, op)| self.settle_child::<C>(key, op))
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;
        report.keys = ready.into_iter().map(|plan| plan.key).collect();
        report
    }

    async fn settle_child<C: ChildKind>(
        &self,
        key: C::Key,
        op: ChildOp<C::Record>,
    ) -> (C::Key, ChildSettled<C::Record>) {
        let remote = self.remote.as_ref();
        let settled = match op {
            ChildOp::Create(record) => match self.call(C::create(remote, key, &record)).await {
                Ok(real) => ChildSettled::Created {
                    temp: record.id(),
                    real,
                },
                Err(err) => ChildSettled::Failed {
                    id: record.id(),
                    message: failure(
                        format!("creating {} {} for {key}", C::KIND, record.label()),
                        &err,
                    ),
                },
            },
            ChildOp::Update(record) => match self.call(C::update(remote, key, &record)).await {
                Ok(()) => ChildSettled::Confirmed,
                Err(err) => ChildSettled::Failed {
                    id: record.id(),
                    message: failure(
                        format!("updating {} {} for {key}", C::KIND, record.label()),
                        &err,
                    ),
                },
            },
            ChildOp::Delete(record) => match self.call(C::delete(remote, key, record.id())).await {
                Ok(()) | Err(RemoteError::NotFound) => ChildSettled::Confirmed,
                Err(err) => ChildSettled::Failed {
                    id: record.id(),
                    message: failure(
                        format!("deleting {} {} for {key}", C::KIND, record.label()),
                        &err,
                    ),
                },
            },
        };
        (key, settled)
    }
}
