//! Per-kind glue between staged state and the remote store.
//!
//! The synchronizer and loader are written once, generically; these traits
//! tell them where each kind lives in a session and which remote calls
//! persist it.

use crate::associations::{AssociationKey, AssociationMap, ChildRecord};
use crate::error::RemoteResult;
use crate::loader::LoadTracker;
use crate::remap::IdRemap;
use crate::remote::RemoteCatalog;
use crate::session::StagingSession;
use crate::staged::{StagedCollection, StagedRecord};
use carebook_catalog::{
    BillingScenario, Group, ResourceRequirement, ScenarioKey, ServiceItem, ServiceItemId,
};
use futures::future::BoxFuture;
use futures::FutureExt;

/// An owner record kind (service items, groups).
pub(crate) trait OwnerKind: StagedRecord + 'static {
    /// Name used in logs and error messages.
    const KIND: &'static str;

    fn staged(session: &StagingSession) -> &StagedCollection<Self>;

    fn staged_mut(session: &mut StagingSession) -> &mut StagedCollection<Self>;

    fn record_created(remap: &mut IdRemap, temp: Self::Id, real: Self::Id);

    /// Called once a remote delete is confirmed.
    fn forget_deleted(_session: &mut StagingSession, _id: Self::Id) {}

    fn create<'a, R: RemoteCatalog>(
        remote: &'a R,
        record: &'a Self,
    ) -> BoxFuture<'a, RemoteResult<Self::Id>>;

    fn update<'a, R: RemoteCatalog>(
        remote: &'a R,
        record: &'a Self,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    fn delete<R: RemoteCatalog>(remote: &R, id: Self::Id) -> BoxFuture<'_, RemoteResult<()>>;

    fn reorder<'a, R: RemoteCatalog>(
        remote: &'a R,
        ids: &'a [Self::Id],
    ) -> BoxFuture<'a, RemoteResult<()>>;
}

impl OwnerKind for ServiceItem {
    const KIND: &'static str = "service item";

    fn staged(session: &StagingSession) -> &StagedCollection<Self> {
        &session.service_items
    }

    fn staged_mut(session: &mut StagingSession) -> &mut StagedCollection<Self> {
        &mut session.service_items
    }

    fn record_created(remap: &mut IdRemap, temp: ServiceItemId, real: ServiceItemId) {
        remap.record_service_item(temp, real);
    }

    fn forget_deleted(session: &mut StagingSession, id: ServiceItemId) {
        session.forget_deleted_service_item(id);
    }

    fn create<'a, R: RemoteCatalog>(
        remote: &'a R,
        record: &'a Self,
    ) -> BoxFuture<'a, RemoteResult<ServiceItemId>> {
        async move { remote.create_service_item(&record.fields()).await }.boxed()
    }

    fn update<'a, R: RemoteCatalog>(
        remote: &'a R,
        record: &'a Self,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        async move { remote.update_service_item(record.id, &record.fields()).await }.boxed()
    }

    fn delete<R: RemoteCatalog>(remote: &R, id: ServiceItemId) -> BoxFuture<'_, RemoteResult<()>> {
        remote.delete_service_item(id)
    }

    fn reorder<'a, R: RemoteCatalog>(
        remote: &'a R,
        ids: &'a [ServiceItemId],
    ) -> BoxFuture<'a, RemoteResult<()>> {
        remote.reorder_service_items(ids)
    }
}

impl OwnerKind for Group {
    const KIND: &'static str = "group";

    fn staged(session: &StagingSession) -> &StagedCollection<Self> {
        &session.groups
    }

    fn staged_mut(session: &mut StagingSession) -> &mut StagedCollection<Self> {
        &mut session.groups
    }

    fn record_created(remap: &mut IdRemap, temp: Self::Id, real: Self::Id) {
        remap.record_group(temp, real);
    }

    fn create<'a, R: RemoteCatalog>(
        remote: &'a R,
        record: &'a Self,
    ) -> BoxFuture<'a, RemoteResult<Self::Id>> {
        async move { remote.create_group(&record.fields()).await }.boxed()
    }

    fn update<'a, R: RemoteCatalog>(
        remote: &'a R,
        record: &'a Self,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        async move { remote.update_group(record.id, &record.fields()).await }.boxed()
    }

    fn delete<R: RemoteCatalog>(remote: &R, id: Self::Id) -> BoxFuture<'_, RemoteResult<()>> {
        remote.delete_group(id)
    }

    fn reorder<'a, R: RemoteCatalog>(
        remote: &'a R,
        ids: &'a [Self::Id],
    ) -> BoxFuture<'a, RemoteResult<()>> {
        remote.reorder_groups(ids)
    }
}

/// A dependent record kind stored as lists under an association key.
pub(crate) trait ChildKind: Send + Sync + 'static {
    type Key: AssociationKey + 'static;
    type Record: ChildRecord + 'static;

    /// Name used in logs and error messages.
    const KIND: &'static str;

    fn staged(session: &StagingSession) -> &AssociationMap<Self::Key, Vec<Self::Record>>;

    fn staged_mut(
        session: &mut StagingSession,
    ) -> &mut AssociationMap<Self::Key, Vec<Self::Record>>;

    fn loads(session: &mut StagingSession) -> &mut LoadTracker<Self::Key>;

    fn list<R: RemoteCatalog>(
        remote: &R,
        key: Self::Key,
    ) -> BoxFuture<'_, RemoteResult<Vec<Self::Record>>>;

    fn create<'a, R: RemoteCatalog>(
        remote: &'a R,
        key: Self::Key,
        record: &'a Self::Record,
    ) -> BoxFuture<'a, RemoteResult<<Self::Record as ChildRecord>::Id>>;

    fn update<'a, R: RemoteCatalog>(
        remote: &'a R,
        key: Self::Key,
        record: &'a Self::Record,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    fn delete<R: RemoteCatalog>(
        remote: &R,
        key: Self::Key,
        id: <Self::Record as ChildRecord>::Id,
    ) -> BoxFuture<'_, RemoteResult<()>>;
}

/// Billing scenarios keyed by (service item, practitioner).
pub(crate) struct Scenarios;

impl ChildKind for Scenarios {
    type Key = ScenarioKey;
    type Record = BillingScenario;

    const KIND: &'static str = "billing scenario";

    fn staged(session: &StagingSession) -> &AssociationMap<ScenarioKey, Vec<BillingScenario>> {
        &session.scenarios
    }

    fn staged_mut(
        session: &mut StagingSession,
    ) -> &mut AssociationMap<ScenarioKey, Vec<BillingScenario>> {
        &mut session.scenarios
    }

    fn loads(session: &mut StagingSession) -> &mut LoadTracker<ScenarioKey> {
        &mut session.scenario_loads
    }

    fn list<R: RemoteCatalog>(
        remote: &R,
        key: ScenarioKey,
    ) -> BoxFuture<'_, RemoteResult<Vec<BillingScenario>>> {
        remote.list_scenarios(key)
    }

    fn create<'a, R: RemoteCatalog>(
        remote: &'a R,
        key: ScenarioKey,
        record: &'a BillingScenario,
    ) -> BoxFuture<'a, RemoteResult<carebook_catalog::ScenarioId>> {
        async move { remote.create_scenario(key, &record.fields()).await }.boxed()
    }

    fn update<'a, R: RemoteCatalog>(
        remote: &'a R,
        key: ScenarioKey,
        record: &'a BillingScenario,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        async move { remote.update_scenario(key, record.id, &record.fields()).await }.boxed()
    }

    fn delete<R: RemoteCatalog>(
        remote: &R,
        key: ScenarioKey,
        id: carebook_catalog::ScenarioId,
    ) -> BoxFuture<'_, RemoteResult<()>> {
        remote.delete_scenario(key, id)
    }
}

/// Resource requirements keyed by service item.
pub(crate) struct Requirements;

impl ChildKind for Requirements {
    type Key = ServiceItemId;
    type Record = ResourceRequirement;

    const KIND: &'static str = "resource requirement";

    fn staged(
        session: &StagingSession,
    ) -> &AssociationMap<ServiceItemId, Vec<ResourceRequirement>> {
        &session.requirements
    }

    fn staged_mut(
        session: &mut StagingSession,
    ) -> &mut AssociationMap<ServiceItemId, Vec<ResourceRequirement>> {
        &mut session.requirements
    }

    fn loads(session: &mut StagingSession) -> &mut LoadTracker<ServiceItemId> {
        &mut session.requirement_loads
    }

    fn list<R: RemoteCatalog>(
        remote: &R,
        key: ServiceItemId,
    ) -> BoxFuture<'_, RemoteResult<Vec<ResourceRequirement>>> {
        remote.list_requirements(key)
    }

    fn create<'a, R: RemoteCatalog>(
        remote: &'a R,
        key: ServiceItemId,
        record: &'a ResourceRequirement,
    ) -> BoxFuture<'a, RemoteResult<carebook_catalog::RequirementId>> {
        async move { remote.create_requirement(key, &record.fields()).await }.boxed()
    }

    fn update<'a, R: RemoteCatalog>(
        remote: &'a R,
        key: ServiceItemId,
        record: &'a ResourceRequirement,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        async move { remote.update_requirement(key, record.id, &record.fields()).await }.boxed()
    }

    fn delete<R: RemoteCatalog>(
        remote: &R,
        key: ServiceItemId,
        id: carebook_catalog::RequirementId,
    ) -> BoxFuture<'_, RemoteResult<()>> {
        remote.delete_requirement(key, id)
    }
}
