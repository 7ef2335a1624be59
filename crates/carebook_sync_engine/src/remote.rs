//! Remote catalog store abstraction.
//!
//! The engine never talks HTTP itself. Each record kind has a small async
//! trait describing the calls the synchronizer and loader issue; an
//! application implements them on top of whatever API client it has.

use crate::error::RemoteResult;
use async_trait::async_trait;
use carebook_catalog::{
    BillingScenario, GroupFields, GroupId, PractitionerId, RequirementFields, RequirementId,
    ResourceRequirement, ScenarioFields, ScenarioId, ScenarioKey, ServiceItemFields,
    ServiceItemId,
};

/// Remote operations on service items.
#[async_trait]
pub trait ServiceItemRemote: Send + Sync {
    /// Creates a service item and returns its server-assigned id.
    async fn create_service_item(&self, fields: &ServiceItemFields) -> RemoteResult<ServiceItemId>;

    /// Replaces the fields of an existing service item.
    async fn update_service_item(
        &self,
        id: ServiceItemId,
        fields: &ServiceItemFields,
    ) -> RemoteResult<()>;

    /// Deletes a service item.
    async fn delete_service_item(&self, id: ServiceItemId) -> RemoteResult<()>;

    /// Persists the listing order of all service items.
    async fn reorder_service_items(&self, ids: &[ServiceItemId]) -> RemoteResult<()>;
}

/// Remote operations on groups.
#[async_trait]
pub trait GroupRemote: Send + Sync {
    /// Creates a group and returns its server-assigned id.
    async fn create_group(&self, fields: &GroupFields) -> RemoteResult<GroupId>;

    /// Replaces the fields of an existing group.
    async fn update_group(&self, id: GroupId, fields: &GroupFields) -> RemoteResult<()>;

    /// Deletes a group.
    async fn delete_group(&self, id: GroupId) -> RemoteResult<()>;

    /// Persists the listing order of all groups.
    async fn reorder_groups(&self, ids: &[GroupId]) -> RemoteResult<()>;
}

/// Remote operations on practitioner eligibility.
///
/// The store is practitioner-centric: each practitioner owns the full list
/// of service items they may perform.
#[async_trait]
pub trait PractitionerAssignmentRemote: Send + Sync {
    /// Reads every service item a practitioner may perform.
    async fn read_assignments(
        &self,
        practitioner: PractitionerId,
    ) -> RemoteResult<Vec<ServiceItemId>>;

    /// Replaces the full list of service items a practitioner may perform.
    async fn replace_assignments(
        &self,
        practitioner: PractitionerId,
        service_items: &[ServiceItemId],
    ) -> RemoteResult<()>;
}

/// Remote operations on billing scenarios.
#[async_trait]
pub trait BillingScenarioRemote: Send + Sync {
    /// Lists the scenarios configured for a (service item, practitioner) pair.
    async fn list_scenarios(&self, key: ScenarioKey) -> RemoteResult<Vec<BillingScenario>>;

    /// Creates a scenario and returns its server-assigned id.
    async fn create_scenario(
        &self,
        key: ScenarioKey,
        fields: &ScenarioFields,
    ) -> RemoteResult<ScenarioId>;

    /// Replaces the fields of an existing scenario.
    async fn update_scenario(
        &self,
        key: ScenarioKey,
        id: ScenarioId,
        fields: &ScenarioFields,
    ) -> RemoteResult<()>;

    /// Deletes a scenario.
    async fn delete_scenario(&self, key: ScenarioKey, id: ScenarioId) -> RemoteResult<()>;
}

/// Remote operations on resource requirements.
#[async_trait]
pub trait ResourceRequirementRemote: Send + Sync {
    /// Lists the requirements of a service item.
    async fn list_requirements(
        &self,
        service_item: ServiceItemId,
    ) -> RemoteResult<Vec<ResourceRequirement>>;

    /// Creates a requirement and returns its server-assigned id.
    async fn create_requirement(
        &self,
        service_item: ServiceItemId,
        fields: &RequirementFields,
    ) -> RemoteResult<RequirementId>;

    /// Replaces the fields of an existing requirement.
    async fn update_requirement(
        &self,
        service_item: ServiceItemId,
        id: RequirementId,
        fields: &RequirementFields,
    ) -> RemoteResult<()>;

    /// Deletes a requirement.
    async fn delete_requirement(
        &self,
        service_item: ServiceItemId,
        id: RequirementId,
    ) -> RemoteResult<()>;
}

/// Everything the engine needs from the remote store.
pub trait RemoteCatalog:
    ServiceItemRemote
    + GroupRemote
    + PractitionerAssignmentRemote
    + BillingScenarioRemote
    + ResourceRequirementRemote
{
}

impl<T> RemoteCatalog for T where
    T: ServiceItemRemote
        + GroupRemote
        + PractitionerAssignmentRemote
        + BillingScenarioRemote
        + ResourceRequirementRemote
{
}
