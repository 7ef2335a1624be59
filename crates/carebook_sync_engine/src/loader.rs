//! Lazy loading of association data.
//!
//! Association data is fetched on demand, per key. A load is split into a
//! synchronous `begin_*` step that decides whether a fetch is needed and a
//! `complete_*` step that folds the fetched value into the session. The
//! fetch in between needs no access to the session, so many fetches can be
//! in flight at once while the session keeps a single writer.
//! [`LazyLoader`] wires the three steps together.

use crate::associations::AssociationKey;
use crate::config::SyncConfig;
use crate::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use crate::kinds::{ChildKind, Requirements, Scenarios};
use crate::remote::RemoteCatalog;
use crate::session::StagingSession;
use carebook_catalog::{
    BillingScenario, PractitionerId, RecordId, ResourceRequirement, ScenarioKey, ServiceItemId,
};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Data was fetched and stored.
    Loaded,
    /// The key was already loaded or set; nothing was fetched.
    Cached,
    /// A fetch for the key is already in flight.
    InFlight,
    /// The owner has not been created remotely yet; there is nothing to fetch.
    SkippedTemporaryOwner,
    /// The session was re-initialized or the owner deleted while fetching;
    /// the result was dropped.
    Discarded,
}

/// Keys with a fetch in flight.
#[derive(Debug, Clone)]
pub struct LoadTracker<K: Ord> {
    in_flight: BTreeSet<K>,
}

impl<K: Ord + Copy> LoadTracker<K> {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            in_flight: BTreeSet::new(),
        }
    }

    /// Marks `key` in flight. Returns false if it already was.
    pub fn start(&mut self, key: K) -> bool {
        self.in_flight.insert(key)
    }

    /// Clears the in-flight mark. Returns false if `key` was not in flight.
    pub fn finish(&mut self, key: &K) -> bool {
        self.in_flight.remove(key)
    }

    /// Returns true if a fetch for `key` is in flight.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.contains(key)
    }

    /// Forgets every in-flight key; their results will be discarded.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

impl<K: Ord + Copy> Default for LoadTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Permission to fetch one key, handed out by a `begin_*` call.
#[derive(Debug)]
#[must_use = "a ticket must be completed or the key stays in flight"]
pub struct LoadTicket<K> {
    key: K,
}

impl<K: Copy> LoadTicket<K> {
    /// The key to fetch.
    pub fn key(&self) -> K {
        self.key
    }
}

/// Either a ticket to fetch, or the reason no fetch is needed.
pub type LoadStart<K> = Result<LoadTicket<K>, LoadStatus>;

fn begin_child<C: ChildKind>(session: &mut StagingSession, key: C::Key) -> LoadStart<C::Key> {
    if key.owner().is_temporary() {
        return Err(LoadStatus::SkippedTemporaryOwner);
    }
    if C::staged(session).contains_key(&key) {
        return Err(LoadStatus::Cached);
    }
    if !C::loads(session).start(key) {
        return Err(LoadStatus::InFlight);
    }
    Ok(LoadTicket { key })
}

fn complete_child<C: ChildKind>(
    session: &mut StagingSession,
    ticket: LoadTicket<C::Key>,
    fetched: RemoteResult<Vec<C::Record>>,
) -> SyncResult<LoadStatus> {
    let key = ticket.key;
    if !C::loads(session).finish(&key) || !session.service_items.contains(key.owner()) {
        debug!(kind = C::KIND, %key, "discarding stale load result");
        return Ok(LoadStatus::Discarded);
    }
    let records = match fetched {
        Ok(records) => records,
        Err(RemoteError::NotFound) => Vec::new(),
        Err(err) => {
            warn!(kind = C::KIND, %key, error = %err, "load failed");
            return Err(SyncError::remote(format!("loading {} for {key}", C::KIND), err));
        }
    };
    C::staged_mut(session).set_loaded(key, records);
    Ok(LoadStatus::Loaded)
}

impl StagingSession {
    /// Decides whether the billing scenarios of `key` need fetching.
    pub fn begin_billing_scenario_load(&mut self, key: ScenarioKey) -> LoadStart<ScenarioKey> {
        begin_child::<Scenarios>(self, key)
    }

    /// Stores fetched billing scenarios. "Not found" is stored as an empty
    /// list; any other failure leaves the key unloaded for a retry.
    pub fn complete_billing_scenario_load(
        &mut self,
        ticket: LoadTicket<ScenarioKey>,
        fetched: RemoteResult<Vec<BillingScenario>>,
    ) -> SyncResult<LoadStatus> {
        complete_child::<Scenarios>(self, ticket, fetched)
    }

    /// Decides whether the resource requirements of a service item need fetching.
    pub fn begin_resource_requirement_load(
        &mut self,
        service_item: ServiceItemId,
    ) -> LoadStart<ServiceItemId> {
        begin_child::<Requirements>(self, service_item)
    }

    /// Stores fetched resource requirements.
    pub fn complete_resource_requirement_load(
        &mut self,
        ticket: LoadTicket<ServiceItemId>,
        fetched: RemoteResult<Vec<ResourceRequirement>>,
    ) -> SyncResult<LoadStatus> {
        complete_child::<Requirements>(self, ticket, fetched)
    }

    /// Decides whether a practitioner's roster needs fetching.
    pub fn begin_roster_load(&mut self, practitioner: PractitionerId) -> LoadStart<PractitionerId> {
        if self.assignments.roster(practitioner).is_some() {
            return Err(LoadStatus::Cached);
        }
        if !self.roster_loads.start(practitioner) {
            return Err(LoadStatus::InFlight);
        }
        Ok(LoadTicket { key: practitioner })
    }

    /// Stores a fetched roster and folds that practitioner's membership into
    /// every loaded eligibility entry.
    pub fn complete_roster_load(
        &mut self,
        ticket: LoadTicket<PractitionerId>,
        fetched: RemoteResult<Vec<ServiceItemId>>,
    ) -> SyncResult<LoadStatus> {
        let practitioner = ticket.key;
        if !self.roster_loads.finish(&practitioner) {
            return Ok(LoadStatus::Discarded);
        }
        let items = match fetched {
            Ok(items) => items,
            Err(RemoteError::NotFound) => Vec::new(),
            Err(err) => {
                warn!(%practitioner, error = %err, "roster load failed");
                return Err(SyncError::remote(
                    format!("loading assignments of practitioner {practitioner}"),
                    err,
                ));
            }
        };
        self.assignments
            .set_roster(practitioner, items.into_iter().collect());
        self.assignments.merge_roster(practitioner);
        Ok(LoadStatus::Loaded)
    }

    /// Gives every persisted service item without loaded eligibility an entry
    /// built from the fetched rosters.
    ///
    /// `practitioners` must name every practitioner of the clinic. Returns
    /// false, changing nothing, unless all of their rosters have been fetched.
    pub fn fill_assignments_from_rosters(
        &mut self,
        practitioners: &BTreeSet<PractitionerId>,
    ) -> bool {
        if practitioners
            .iter()
            .any(|p| self.assignments.roster(*p).is_none())
        {
            return false;
        }
        let persisted = self.persisted_service_item_ids();
        self.assignments.fill_unloaded(persisted);
        true
    }
}

/// Fetches association data into a session on demand.
///
/// Fetches run concurrently, bounded by [`SyncConfig::max_in_flight`], and
/// each is cut off after [`SyncConfig::request_timeout`].
pub struct LazyLoader<R: RemoteCatalog> {
    remote: Arc<R>,
    config: SyncConfig,
}

impl<R: RemoteCatalog> LazyLoader<R> {
    /// Creates a loader.
    pub fn new(remote: Arc<R>, config: SyncConfig) -> Self {
        Self { remote, config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn fetch<T>(&self, request: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        match tokio::time::timeout(self.config.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    /// Loads the billing scenarios of one (service item, practitioner) pair.
    pub async fn load_billing_scenarios(
        &self,
        session: &mut StagingSession,
        key: ScenarioKey,
    ) -> SyncResult<LoadStatus> {
        self.load_one::<Scenarios>(session, key).await
    }

    /// Loads the resource requirements of one service item.
    pub async fn load_resource_requirements(
        &self,
        session: &mut StagingSession,
        service_item: ServiceItemId,
    ) -> SyncResult<LoadStatus> {
        self.load_one::<Requirements>(session, service_item).await
    }

    /// Loads the billing scenarios of many pairs concurrently. Every key is
    /// reported; one failure does not affect the others.
    pub async fn load_many_billing_scenarios(
        &self,
        session: &mut StagingSession,
        keys: impl IntoIterator<Item = ScenarioKey>,
    ) -> Vec<(ScenarioKey, SyncResult<LoadStatus>)> {
        self.load_many::<Scenarios>(session, keys).await
    }

    /// Loads the resource requirements of many service items concurrently.
    pub async fn load_many_resource_requirements(
        &self,
        session: &mut StagingSession,
        service_items: impl IntoIterator<Item = ServiceItemId>,
    ) -> Vec<(ServiceItemId, SyncResult<LoadStatus>)> {
        self.load_many::<Requirements>(session, service_items).await
    }

    /// Loads practitioner rosters concurrently.
    ///
    /// Each roster only updates its own practitioner's membership in entries
    /// that are already loaded. Use [`Self::load_all_practitioner_assignments`]
    /// to build entries for service items loaded from nowhere else.
    pub async fn load_practitioner_assignments(
        &self,
        session: &mut StagingSession,
        practitioners: impl IntoIterator<Item = PractitionerId>,
    ) -> Vec<(PractitionerId, SyncResult<LoadStatus>)> {
        let mut report = Vec::new();
        let mut tickets = Vec::new();
        for practitioner in practitioners {
            match session.begin_roster_load(practitioner) {
                Ok(ticket) => tickets.push(ticket),
                Err(status) => report.push((practitioner, Ok(status))),
            }
        }

        let fetched: Vec<_> = stream::iter(tickets)
            .map(|ticket| async move {
                let result = self.fetch(self.remote.read_assignments(ticket.key())).await;
                (ticket, result)
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;

        for (ticket, result) in fetched {
            let practitioner = ticket.key();
            report.push((practitioner, session.complete_roster_load(ticket, result)));
        }
        debug!(practitioners = report.len(), "practitioner rosters loaded");
        report
    }

    /// Loads the rosters of every practitioner of the clinic, then fills the
    /// eligibility of every persisted service item not yet loaded.
    ///
    /// Nothing is filled if any roster fails to load.
    pub async fn load_all_practitioner_assignments(
        &self,
        session: &mut StagingSession,
        practitioners: impl IntoIterator<Item = PractitionerId>,
    ) -> Vec<(PractitionerId, SyncResult<LoadStatus>)> {
        let practitioners: BTreeSet<PractitionerId> = practitioners.into_iter().collect();
        let report = self
            .load_practitioner_assignments(session, practitioners.iter().copied())
            .await;
        if !session.fill_assignments_from_rosters(&practitioners) {
            warn!("practitioner rosters incomplete, eligibility left unloaded");
        }
        report
    }

    async fn load_one<C: ChildKind>(
        &self,
        session: &mut StagingSession,
        key: C::Key,
    ) -> SyncResult<LoadStatus> {
        match begin_child::<C>(session, key) {
            Ok(ticket) => {
                let fetched = self.fetch(C::list(self.remote.as_ref(), key)).await;
                complete_child::<C>(session, ticket, fetched)
            }
            Err(status) => Ok(status),
        }
    }

    async fn load_many<C: ChildKind>(
        &self,
        session: &mut StagingSession,
        keys: impl IntoIterator<Item = C::Key>,
    ) -> Vec<(C::Key, SyncResult<LoadStatus>)> {
        let mut report = Vec::new();
        let mut tickets = Vec::new();
        for key in keys {
            match begin_child::<C>(session, key) {
                Ok(ticket) => tickets.push(ticket),
                Err(status) => report.push((key, Ok(status))),
            }
        }

        let remote = self.remote.as_ref();
        let fetched: Vec<_> = stream::iter(tickets)
            .map(|ticket| async move {
                let result = self.fetch(C::list(remote, ticket.key())).await;
                (ticket, result)
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;

        for (ticket, result) in fetched {
            let key = ticket.key();
            report.push((key, complete_child::<C>(session, ticket, result)));
        }
        debug!(kind = C::KIND, keys = report.len(), "batch load finished");
        report
    }
}
