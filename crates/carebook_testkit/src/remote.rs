//! In-memory remote catalog.
//!
//! Behaves like the real store closely enough to exercise the engine: ids
//! are assigned by the store, missing records answer "not found", and
//! deleting a service item cascades to everything keyed by it. Every request
//! is recorded in issue order so tests can assert on sequencing, and
//! failures can be injected per request.

use async_trait::async_trait;
use carebook_catalog::{
    BillingScenario, Group, GroupFields, GroupId, PractitionerId, RecordId, RequirementFields,
    RequirementId, ResourceRequirement, ResourceTypeId, ScenarioFields, ScenarioId, ScenarioKey,
    ServiceItem, ServiceItemFields, ServiceItemId,
};
use carebook_sync_engine::{
    AssociationSnapshot, BillingScenarioRemote, GroupRemote, PractitionerAssignmentRemote,
    RemoteError, RemoteResult, ResourceRequirementRemote, ServiceItemRemote, StagingSession,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// One request received by an [`InMemoryCatalog`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// `create` of a service item, identified by name.
    CreateServiceItem {
        /// Name sent.
        name: String,
        /// Group reference sent.
        group_id: Option<GroupId>,
    },
    /// `update` of a service item.
    UpdateServiceItem(ServiceItemId),
    /// `delete` of a service item.
    DeleteServiceItem(ServiceItemId),
    /// `bulkReorder` of service items.
    ReorderServiceItems(Vec<ServiceItemId>),
    /// `create` of a group, identified by name.
    CreateGroup(String),
    /// `update` of a group.
    UpdateGroup(GroupId),
    /// `delete` of a group.
    DeleteGroup(GroupId),
    /// `bulkReorder` of groups.
    ReorderGroups(Vec<GroupId>),
    /// Read of a practitioner's full list.
    ReadAssignments(PractitionerId),
    /// Replacement of a practitioner's full list.
    ReplaceAssignments(PractitionerId, Vec<ServiceItemId>),
    /// List of billing scenarios.
    ListScenarios(ScenarioKey),
    /// `create` of a billing scenario, identified by name.
    CreateScenario(ScenarioKey, String),
    /// `update` of a billing scenario.
    UpdateScenario(ScenarioKey, ScenarioId),
    /// `delete` of a billing scenario.
    DeleteScenario(ScenarioKey, ScenarioId),
    /// List of resource requirements.
    ListRequirements(ServiceItemId),
    /// `create` of a resource requirement.
    CreateRequirement(ServiceItemId, ResourceTypeId),
    /// `update` of a resource requirement.
    UpdateRequirement(ServiceItemId, RequirementId),
    /// `delete` of a resource requirement.
    DeleteRequirement(ServiceItemId, RequirementId),
}

impl RemoteCall {
    /// Returns true for requests that change remote state.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            RemoteCall::ReadAssignments(_)
                | RemoteCall::ListScenarios(_)
                | RemoteCall::ListRequirements(_)
        )
    }

    /// Service item the request is addressed to or keyed by, if any.
    pub fn service_item(&self) -> Option<ServiceItemId> {
        match self {
            RemoteCall::UpdateServiceItem(id) | RemoteCall::DeleteServiceItem(id) => Some(*id),
            RemoteCall::ListScenarios(key)
            | RemoteCall::CreateScenario(key, _)
            | RemoteCall::UpdateScenario(key, _)
            | RemoteCall::DeleteScenario(key, _) => Some(key.service_item_id),
            RemoteCall::ListRequirements(id)
            | RemoteCall::CreateRequirement(id, _)
            | RemoteCall::UpdateRequirement(id, _)
            | RemoteCall::DeleteRequirement(id, _) => Some(*id),
            _ => None,
        }
    }
}

type FailureRule = Box<dyn Fn(&RemoteCall) -> Option<RemoteError> + Send + Sync>;

#[derive(Debug)]
struct Store {
    service_items: BTreeMap<ServiceItemId, ServiceItem>,
    groups: BTreeMap<GroupId, Group>,
    assignments: BTreeMap<PractitionerId, BTreeSet<ServiceItemId>>,
    scenarios: BTreeMap<ScenarioKey, Vec<BillingScenario>>,
    requirements: BTreeMap<ServiceItemId, Vec<ResourceRequirement>>,
    next_id: i64,
}

impl Store {
    fn mint(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// A remote catalog held in memory.
pub struct InMemoryCatalog {
    store: Mutex<Store>,
    calls: Mutex<Vec<RemoteCall>>,
    failures: Mutex<Vec<FailureRule>>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog. The first id it assigns is 42.
    pub fn new() -> Self {
        Self::with_first_id(42)
    }

    /// Creates an empty catalog assigning ids from `first_id` upwards.
    pub fn with_first_id(first_id: i64) -> Self {
        assert!(first_id > 0, "remote ids must be positive");
        Self {
            store: Mutex::new(Store {
                service_items: BTreeMap::new(),
                groups: BTreeMap::new(),
                assignments: BTreeMap::new(),
                scenarios: BTreeMap::new(),
                requirements: BTreeMap::new(),
                next_id: first_id,
            }),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
        }
    }

    /// Delays every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Fails every request matching `predicate` with `error`.
    pub fn fail_when(
        &self,
        predicate: impl Fn(&RemoteCall) -> bool + Send + Sync + 'static,
        error: RemoteError,
    ) {
        self.failures
            .lock()
            .push(Box::new(move |call: &RemoteCall| {
                predicate(call).then(|| error.clone())
            }));
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Requests received so far, in issue order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Requests received so far that change remote state.
    pub fn writes(&self) -> Vec<RemoteCall> {
        self.calls.lock().iter().filter(|c| c.is_write()).cloned().collect()
    }

    /// Forgets the recorded requests.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    // -- seeding ----------------------------------------------------------

    /// Stores a service item as if it had been created earlier.
    pub fn seed_service_item(&self, item: ServiceItem) {
        assert!(!item.id.is_temporary(), "seeded ids must be real");
        self.store.lock().service_items.insert(item.id, item);
    }

    /// Stores a group as if it had been created earlier.
    pub fn seed_group(&self, group: Group) {
        assert!(!group.id.is_temporary(), "seeded ids must be real");
        self.store.lock().groups.insert(group.id, group);
    }

    /// Stores a practitioner's full list of service items.
    pub fn seed_assignments(
        &self,
        practitioner: PractitionerId,
        items: impl IntoIterator<Item = ServiceItemId>,
    ) {
        self.store
            .lock()
            .assignments
            .insert(practitioner, items.into_iter().collect());
    }

    /// Stores the billing scenarios of a pair.
    pub fn seed_scenarios(&self, key: ScenarioKey, scenarios: Vec<BillingScenario>) {
        self.store.lock().scenarios.insert(key, scenarios);
    }

    /// Stores the resource requirements of a service item.
    pub fn seed_requirements(
        &self,
        service_item: ServiceItemId,
        requirements: Vec<ResourceRequirement>,
    ) {
        self.store.lock().requirements.insert(service_item, requirements);
    }

    // -- inspection -------------------------------------------------------

    /// Stored service items, by listing order.
    pub fn service_items(&self) -> Vec<ServiceItem> {
        let mut items: Vec<_> = self.store.lock().service_items.values().cloned().collect();
        items.sort_by_key(|item| (item.display_order, item.id));
        items
    }

    /// Stored groups, by listing order.
    pub fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<_> = self.store.lock().groups.values().cloned().collect();
        groups.sort_by_key(|group| (group.display_order, group.id));
        groups
    }

    /// Stored service item with the given id.
    pub fn service_item(&self, id: ServiceItemId) -> Option<ServiceItem> {
        self.store.lock().service_items.get(&id).cloned()
    }

    /// Stored full list of a practitioner.
    pub fn assignments(&self, practitioner: PractitionerId) -> Option<BTreeSet<ServiceItemId>> {
        self.store.lock().assignments.get(&practitioner).cloned()
    }

    /// Stored billing scenarios of a pair.
    pub fn scenarios(&self, key: ScenarioKey) -> Vec<BillingScenario> {
        self.store
            .lock()
            .scenarios
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// Stored resource requirements of a service item.
    pub fn requirements(&self, service_item: ServiceItemId) -> Vec<ResourceRequirement> {
        self.store
            .lock()
            .requirements
            .get(&service_item)
            .cloned()
            .unwrap_or_default()
    }

    /// Everything stored, inverted into the shape a session is initialized
    /// from.
    pub fn association_snapshot(&self) -> AssociationSnapshot {
        let store = self.store.lock();
        let mut snapshot = AssociationSnapshot::default();
        for id in store.service_items.keys() {
            let practitioners = store
                .assignments
                .iter()
                .filter(|(_, items)| items.contains(id))
                .map(|(p, _)| *p)
                .collect();
            snapshot.assignments.insert(*id, practitioners);
        }
        snapshot.scenarios = store.scenarios.clone();
        snapshot.requirements = store.requirements.clone();
        snapshot
    }

    /// A session initialized from the stored owners only; associations are
    /// left to lazy loading.
    pub fn owners_session(&self) -> StagingSession {
        let mut session = StagingSession::new();
        session.initialize_full(
            self.service_items(),
            self.groups(),
            AssociationSnapshot::default(),
        );
        session
    }

    /// A session initialized from everything stored.
    pub fn full_session(&self) -> StagingSession {
        let mut session = StagingSession::new();
        session.initialize_full(self.service_items(), self.groups(), self.association_snapshot());
        session
    }

    // -- request handling -------------------------------------------------

    async fn receive(&self, call: RemoteCall) -> RemoteResult<()> {
        self.calls.lock().push(call.clone());
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.failures.lock().iter().find_map(|rule| rule(&call)) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCatalog")
            .field("store", &*self.store.lock())
            .field("calls", &self.calls.lock().len())
            .field("failures", &self.failures.lock().len())
            .finish()
    }
}

fn reject_temporary<I: RecordId>(id: I) -> RemoteResult<()> {
    if id.is_temporary() {
        return Err(RemoteError::Validation(format!("{id} is not a server id")));
    }
    Ok(())
}

#[async_trait]
impl ServiceItemRemote for InMemoryCatalog {
    async fn create_service_item(&self, fields: &ServiceItemFields) -> RemoteResult<ServiceItemId> {
        self.receive(RemoteCall::CreateServiceItem {
            name: fields.name.clone(),
            group_id: fields.group_id,
        })
        .await?;
        let mut store = self.store.lock();
        if let Some(group) = fields.group_id {
            reject_temporary(group)?;
            if !store.groups.contains_key(&group) {
                return Err(RemoteError::Validation(format!("unknown group {group}")));
            }
        }
        let id = ServiceItemId(store.mint());
        store.service_items.insert(id, fields.clone().into_record(id));
        Ok(id)
    }

    async fn update_service_item(
        &self,
        id: ServiceItemId,
        fields: &ServiceItemFields,
    ) -> RemoteResult<()> {
        self.receive(RemoteCall::UpdateServiceItem(id)).await?;
        let mut store = self.store.lock();
        if !store.service_items.contains_key(&id) {
            return Err(RemoteError::NotFound);
        }
        store.service_items.insert(id, fields.clone().into_record(id));
        Ok(())
    }

    async fn delete_service_item(&self, id: ServiceItemId) -> RemoteResult<()> {
        self.receive(RemoteCall::DeleteServiceItem(id)).await?;
        let mut store = self.store.lock();
        if store.service_items.remove(&id).is_none() {
            return Err(RemoteError::NotFound);
        }
        for items in store.assignments.values_mut() {
            items.remove(&id);
        }
        store.scenarios.retain(|key, _| key.service_item_id != id);
        store.requirements.remove(&id);
        Ok(())
    }

    async fn reorder_service_items(&self, ids: &[ServiceItemId]) -> RemoteResult<()> {
        self.receive(RemoteCall::ReorderServiceItems(ids.to_vec())).await?;
        let mut store = self.store.lock();
        for (position, id) in ids.iter().enumerate() {
            let item = store
                .service_items
                .get_mut(id)
                .ok_or_else(|| RemoteError::Validation(format!("unknown service item {id}")))?;
            item.display_order = position as u32;
        }
        Ok(())
    }
}

#[async_trait]
impl GroupRemote for InMemoryCatalog {
    async fn create_group(&self, fields: &GroupFields) -> RemoteResult<GroupId> {
        self.receive(RemoteCall::CreateGroup(fields.name.clone())).await?;
        let mut store = self.store.lock();
        let id = GroupId(store.mint());
        store.groups.insert(id, fields.clone().into_record(id));
        Ok(id)
    }

    async fn update_group(&self, id: GroupId, fields: &GroupFields) -> RemoteResult<()> {
        self.receive(RemoteCall::UpdateGroup(id)).await?;
        let mut store = self.store.lock();
        if !store.groups.contains_key(&id) {
            return Err(RemoteError::NotFound);
        }
        store.groups.insert(id, fields.clone().into_record(id));
        Ok(())
    }

    async fn delete_group(&self, id: GroupId) -> RemoteResult<()> {
        self.receive(RemoteCall::DeleteGroup(id)).await?;
        let mut store = self.store.lock();
        if store.groups.remove(&id).is_none() {
            return Err(RemoteError::NotFound);
        }
        for item in store.service_items.values_mut() {
            if item.group_id == Some(id) {
                item.group_id = None;
            }
        }
        Ok(())
    }

    async fn reorder_groups(&self, ids: &[GroupId]) -> RemoteResult<()> {
        self.receive(RemoteCall::ReorderGroups(ids.to_vec())).await?;
        let mut store = self.store.lock();
        for (position, id) in ids.iter().enumerate() {
            let group = store
                .groups
                .get_mut(id)
                .ok_or_else(|| RemoteError::Validation(format!("unknown group {id}")))?;
            group.display_order = position as u32;
        }
        Ok(())
    }
}

#[async_trait]
impl PractitionerAssignmentRemote for InMemoryCatalog {
    async fn read_assignments(
        &self,
        practitioner: PractitionerId,
    ) -> RemoteResult<Vec<ServiceItemId>> {
        self.receive(RemoteCall::ReadAssignments(practitioner)).await?;
        self.store
            .lock()
            .assignments
            .get(&practitioner)
            .map(|items| items.iter().copied().collect())
            .ok_or(RemoteError::NotFound)
    }

    async fn replace_assignments(
        &self,
        practitioner: PractitionerId,
        service_items: &[ServiceItemId],
    ) -> RemoteResult<()> {
        self.receive(RemoteCall::ReplaceAssignments(
            practitioner,
            service_items.to_vec(),
        ))
        .await?;
        let mut store = self.store.lock();
        for id in service_items {
            reject_temporary(*id)?;
            if !store.service_items.contains_key(id) {
                return Err(RemoteError::Validation(format!("unknown service item {id}")));
            }
        }
        store
            .assignments
            .insert(practitioner, service_items.iter().copied().collect());
        Ok(())
    }
}

#[async_trait]
impl BillingScenarioRemote for InMemoryCatalog {
    async fn list_scenarios(&self, key: ScenarioKey) -> RemoteResult<Vec<BillingScenario>> {
        self.receive(RemoteCall::ListScenarios(key)).await?;
        let store = self.store.lock();
        if !store.service_items.contains_key(&key.service_item_id) {
            return Err(RemoteError::NotFound);
        }
        Ok(store.scenarios.get(&key).cloned().unwrap_or_default())
    }

    async fn create_scenario(
        &self,
        key: ScenarioKey,
        fields: &ScenarioFields,
    ) -> RemoteResult<ScenarioId> {
        self.receive(RemoteCall::CreateScenario(key, fields.name.clone()))
            .await?;
        reject_temporary(key.service_item_id)?;
        if fields.name.trim().is_empty() {
            return Err(RemoteError::Validation("name is required".into()));
        }
        let mut store = self.store.lock();
        if !store.service_items.contains_key(&key.service_item_id) {
            return Err(RemoteError::NotFound);
        }
        let id = ScenarioId(store.mint());
        store.scenarios.entry(key).or_default().push(BillingScenario {
            id,
            name: fields.name.clone(),
            amount: fields.amount,
            revenue_share: fields.revenue_share,
            is_default: fields.is_default,
        });
        Ok(id)
    }

    async fn update_scenario(
        &self,
        key: ScenarioKey,
        id: ScenarioId,
        fields: &ScenarioFields,
    ) -> RemoteResult<()> {
        self.receive(RemoteCall::UpdateScenario(key, id)).await?;
        let mut store = self.store.lock();
        let scenario = store
            .scenarios
            .get_mut(&key)
            .and_then(|list| list.iter_mut().find(|s| s.id == id))
            .ok_or(RemoteError::NotFound)?;
        scenario.name = fields.name.clone();
        scenario.amount = fields.amount;
        scenario.revenue_share = fields.revenue_share;
        scenario.is_default = fields.is_default;
        Ok(())
    }

    async fn delete_scenario(&self, key: ScenarioKey, id: ScenarioId) -> RemoteResult<()> {
        self.receive(RemoteCall::DeleteScenario(key, id)).await?;
        let mut store = self.store.lock();
        let list = store.scenarios.get_mut(&key).ok_or(RemoteError::NotFound)?;
        let before = list.len();
        list.retain(|s| s.id != id);
        if list.len() == before {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceRequirementRemote for InMemoryCatalog {
    async fn list_requirements(
        &self,
        service_item: ServiceItemId,
    ) -> RemoteResult<Vec<ResourceRequirement>> {
        self.receive(RemoteCall::ListRequirements(service_item)).await?;
        let store = self.store.lock();
        if !store.service_items.contains_key(&service_item) {
            return Err(RemoteError::NotFound);
        }
        Ok(store
            .requirements
            .get(&service_item)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_requirement(
        &self,
        service_item: ServiceItemId,
        fields: &RequirementFields,
    ) -> RemoteResult<RequirementId> {
        self.receive(RemoteCall::CreateRequirement(
            service_item,
            fields.resource_type_id,
        ))
        .await?;
        reject_temporary(service_item)?;
        if fields.quantity == 0 {
            return Err(RemoteError::Validation("quantity must be positive".into()));
        }
        let mut store = self.store.lock();
        if !store.service_items.contains_key(&service_item) {
            return Err(RemoteError::NotFound);
        }
        let id = RequirementId(store.mint());
        store
            .requirements
            .entry(service_item)
            .or_default()
            .push(ResourceRequirement::new(id, fields.resource_type_id, fields.quantity));
        Ok(id)
    }

    async fn update_requirement(
        &self,
        service_item: ServiceItemId,
        id: RequirementId,
        fields: &RequirementFields,
    ) -> RemoteResult<()> {
        self.receive(RemoteCall::UpdateRequirement(service_item, id))
            .await?;
        let mut store = self.store.lock();
        let requirement = store
            .requirements
            .get_mut(&service_item)
            .and_then(|list| list.iter_mut().find(|r| r.id == id))
            .ok_or(RemoteError::NotFound)?;
        requirement.resource_type_id = fields.resource_type_id;
        requirement.quantity = fields.quantity;
        Ok(())
    }

    async fn delete_requirement(
        &self,
        service_item: ServiceItemId,
        id: RequirementId,
    ) -> RemoteResult<()> {
        self.receive(RemoteCall::DeleteRequirement(service_item, id))
            .await?;
        let mut store = self.store.lock();
        let list = store
            .requirements
            .get_mut(&service_item)
            .ok_or(RemoteError::NotFound)?;
        let before = list.len();
        list.retain(|r| r.id != id);
        if list.len() == before {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }
}
