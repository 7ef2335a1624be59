//! # Carebook Catalog
//!
//! Record types and identifiers for the clinic service catalog.
//!
//! This crate provides:
//! - Identifier newtypes for every catalog record kind
//! - The temporary/real identifier classifier
//! - A session-wide temporary identifier allocator
//! - Service items, groups, billing scenarios and resource requirements
//! - The `(service item, practitioner)` composite key
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod ids;
mod records;

pub use ids::{
    is_temporary, GroupId, PractitionerId, RecordId, RequirementId, ResourceTypeId, ScenarioId,
    ServiceItemId, TempIdAllocator,
};
pub use records::{
    BillingScenario, Group, GroupFields, GroupPatch, RequirementFields, ResourceRequirement,
    ScenarioFields, ScenarioKey, ServiceItem, ServiceItemFields, ServiceItemPatch,
};
