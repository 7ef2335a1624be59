//! Test fixtures.
//!
//! A small but complete clinic catalog, described as JSON so the same data
//! can be shared with non-Rust tooling, plus helpers to seed an
//! [`InMemoryCatalog`] from it.

use crate::remote::InMemoryCatalog;
use carebook_catalog::{
    BillingScenario, Group, PractitionerId, ResourceRequirement, ScenarioKey, ServiceItem,
    ServiceItemId,
};
use serde::{Deserialize, Serialize};

/// Practitioner used throughout the sample catalog.
pub const DR_ADAMS: PractitionerId = PractitionerId(5);

/// Second practitioner of the sample catalog.
pub const DR_BAKER: PractitionerId = PractitionerId(6);

/// "Consult" in the sample catalog.
pub const CONSULT: ServiceItemId = ServiceItemId(10);

/// "Follow-up" in the sample catalog.
pub const FOLLOW_UP: ServiceItemId = ServiceItemId(11);

/// "Massage" in the sample catalog.
pub const MASSAGE: ServiceItemId = ServiceItemId(12);

/// The sample catalog.
///
/// Ids stay below 42 so that ids assigned by a fresh [`InMemoryCatalog`]
/// never collide with them.
pub const SAMPLE_CATALOG_JSON: &str = r##"{
  "groups": [
    { "id": 1, "display_order": 0, "name": "General" },
    { "id": 2, "display_order": 1, "name": "Therapy" }
  ],
  "service_items": [
    { "id": 10, "display_order": 0, "group_id": 1, "name": "Consult",
      "description": "Initial consultation", "duration_minutes": 30,
      "price_cents": 8000, "color": "#3366ff", "is_active": true },
    { "id": 11, "display_order": 1, "group_id": 1, "name": "Follow-up",
      "description": null, "duration_minutes": 15,
      "price_cents": 4000, "color": null, "is_active": true },
    { "id": 12, "display_order": 2, "group_id": 2, "name": "Massage",
      "description": null, "duration_minutes": 60,
      "price_cents": 9000, "color": "#33aa66", "is_active": true }
  ],
  "assignments": [
    { "practitioner_id": 5, "service_item_ids": [10, 11] },
    { "practitioner_id": 6, "service_item_ids": [10, 12] }
  ],
  "scenarios": [
    { "key": { "service_item_id": 10, "practitioner_id": 5 },
      "scenarios": [
        { "id": 20, "name": "Standard", "amount": 100.0, "revenue_share": 0.5, "is_default": true },
        { "id": 21, "name": "Insurance", "amount": 80.0, "revenue_share": 0.4, "is_default": false },
        { "id": 22, "name": "Student", "amount": 60.0, "revenue_share": 0.5, "is_default": false }
      ] }
  ],
  "requirements": [
    { "service_item_id": 12,
      "requirements": [ { "id": 30, "resource_type_id": 3, "quantity": 1 } ] }
  ]
}"##;

/// A practitioner's full list of service items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentFixture {
    /// The practitioner.
    pub practitioner_id: PractitionerId,
    /// Everything the practitioner may perform.
    pub service_item_ids: Vec<ServiceItemId>,
}

/// Billing scenarios of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFixture {
    /// The pair.
    pub key: ScenarioKey,
    /// Its scenarios.
    pub scenarios: Vec<BillingScenario>,
}

/// Resource requirements of one service item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementFixture {
    /// The service item.
    pub service_item_id: ServiceItemId,
    /// Its requirements.
    pub requirements: Vec<ResourceRequirement>,
}

/// A complete remote catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogFixture {
    /// Groups.
    pub groups: Vec<Group>,
    /// Service items.
    pub service_items: Vec<ServiceItem>,
    /// Practitioner eligibility.
    #[serde(default)]
    pub assignments: Vec<AssignmentFixture>,
    /// Billing scenarios.
    #[serde(default)]
    pub scenarios: Vec<ScenarioFixture>,
    /// Resource requirements.
    #[serde(default)]
    pub requirements: Vec<RequirementFixture>,
}

impl CatalogFixture {
    /// Parses a fixture from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// The sample catalog.
    pub fn sample() -> Self {
        Self::from_json(SAMPLE_CATALOG_JSON).expect("sample catalog fixture is valid JSON")
    }

    /// Seeds `catalog` with everything in the fixture.
    pub fn seed(&self, catalog: &InMemoryCatalog) {
        for group in &self.groups {
            catalog.seed_group(group.clone());
        }
        for item in &self.service_items {
            catalog.seed_service_item(item.clone());
        }
        for assignment in &self.assignments {
            catalog.seed_assignments(
                assignment.practitioner_id,
                assignment.service_item_ids.iter().copied(),
            );
        }
        for entry in &self.scenarios {
            catalog.seed_scenarios(entry.key, entry.scenarios.clone());
        }
        for entry in &self.requirements {
            catalog.seed_requirements(entry.service_item_id, entry.requirements.clone());
        }
    }
}

/// A fresh in-memory catalog seeded with the sample catalog.
pub fn sample_catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    CatalogFixture::sample().seed(&catalog);
    catalog
}
