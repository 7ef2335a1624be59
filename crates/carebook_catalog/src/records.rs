//! Catalog records.
//!
//! Records are plain values: two records are "the same" exactly when every
//! field compares equal, which is what change detection relies on.

use crate::ids::{
    GroupId, PractitionerId, RequirementId, ResourceTypeId, ScenarioId, ServiceItemId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An offerable service (consultation, treatment, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceItem {
    /// Identifier; temporary until the item is created remotely.
    pub id: ServiceItemId,
    /// Position within the catalog listing.
    pub display_order: u32,
    /// Owning group, if any.
    pub group_id: Option<GroupId>,
    /// Display name.
    pub name: String,
    /// Optional long description.
    pub description: Option<String>,
    /// Default appointment length.
    pub duration_minutes: u32,
    /// List price in minor currency units.
    pub price_cents: i64,
    /// Optional calendar colour.
    pub color: Option<String>,
    /// Whether the service can currently be booked.
    pub is_active: bool,
}

impl ServiceItem {
    /// Creates an active service item with the given id and name.
    pub fn new(id: ServiceItemId, name: impl Into<String>) -> Self {
        Self {
            id,
            display_order: 0,
            group_id: None,
            name: name.into(),
            description: None,
            duration_minutes: 30,
            price_cents: 0,
            color: None,
            is_active: true,
        }
    }

    /// Sets the owning group.
    pub fn with_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Sets the display order.
    pub fn with_display_order(mut self, display_order: u32) -> Self {
        self.display_order = display_order;
        self
    }

    /// Sets the duration.
    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    /// Sets the price.
    pub fn with_price_cents(mut self, price_cents: i64) -> Self {
        self.price_cents = price_cents;
        self
    }

    /// Returns the payload sent to the remote store.
    pub fn fields(&self) -> ServiceItemFields {
        ServiceItemFields {
            display_order: self.display_order,
            group_id: self.group_id,
            name: self.name.clone(),
            description: self.description.clone(),
            duration_minutes: self.duration_minutes,
            price_cents: self.price_cents,
            color: self.color.clone(),
            is_active: self.is_active,
        }
    }
}

/// Persisted fields of a service item (everything except its id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceItemFields {
    /// Position within the catalog listing.
    pub display_order: u32,
    /// Owning group, if any.
    pub group_id: Option<GroupId>,
    /// Display name.
    pub name: String,
    /// Optional long description.
    pub description: Option<String>,
    /// Default appointment length.
    pub duration_minutes: u32,
    /// List price in minor currency units.
    pub price_cents: i64,
    /// Optional calendar colour.
    pub color: Option<String>,
    /// Whether the service can currently be booked.
    pub is_active: bool,
}

impl ServiceItemFields {
    /// Attaches an id, producing a full record.
    pub fn into_record(self, id: ServiceItemId) -> ServiceItem {
        ServiceItem {
            id,
            display_order: self.display_order,
            group_id: self.group_id,
            name: self.name,
            description: self.description,
            duration_minutes: self.duration_minutes,
            price_cents: self.price_cents,
            color: self.color,
            is_active: self.is_active,
        }
    }
}

/// A partial update to a service item. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceItemPatch {
    /// New group assignment; `Some(None)` unassigns.
    pub group_id: Option<Option<GroupId>>,
    /// New name.
    pub name: Option<String>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
    /// New duration.
    pub duration_minutes: Option<u32>,
    /// New price.
    pub price_cents: Option<i64>,
    /// New colour; `Some(None)` clears it.
    pub color: Option<Option<String>>,
    /// New active flag.
    pub is_active: Option<bool>,
}

impl ServiceItemPatch {
    /// Merges the patch into a record.
    pub fn apply(self, item: &mut ServiceItem) {
        if let Some(group_id) = self.group_id {
            item.group_id = group_id;
        }
        if let Some(name) = self.name {
            item.name = name;
        }
        if let Some(description) = self.description {
            item.description = description;
        }
        if let Some(minutes) = self.duration_minutes {
            item.duration_minutes = minutes;
        }
        if let Some(price) = self.price_cents {
            item.price_cents = price;
        }
        if let Some(color) = self.color {
            item.color = color;
        }
        if let Some(active) = self.is_active {
            item.is_active = active;
        }
    }
}

/// A named grouping of service items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Identifier; temporary until the group is created remotely.
    pub id: GroupId,
    /// Position within the catalog listing.
    pub display_order: u32,
    /// Display name.
    pub name: String,
}

impl Group {
    /// Creates a group.
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            display_order: 0,
            name: name.into(),
        }
    }

    /// Sets the display order.
    pub fn with_display_order(mut self, display_order: u32) -> Self {
        self.display_order = display_order;
        self
    }

    /// Returns the payload sent to the remote store.
    pub fn fields(&self) -> GroupFields {
        GroupFields {
            display_order: self.display_order,
            name: self.name.clone(),
        }
    }
}

/// Persisted fields of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupFields {
    /// Position within the catalog listing.
    pub display_order: u32,
    /// Display name.
    pub name: String,
}

impl GroupFields {
    /// Attaches an id, producing a full record.
    pub fn into_record(self, id: GroupId) -> Group {
        Group {
            id,
            display_order: self.display_order,
            name: self.name,
        }
    }
}

/// A partial update to a group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupPatch {
    /// New name.
    pub name: Option<String>,
}

impl GroupPatch {
    /// Merges the patch into a record.
    pub fn apply(self, group: &mut Group) {
        if let Some(name) = self.name {
            group.name = name;
        }
    }
}

/// Composite key of a billing scenario list: one service item performed by
/// one practitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScenarioKey {
    /// The service item.
    pub service_item_id: ServiceItemId,
    /// The practitioner performing it.
    pub practitioner_id: PractitionerId,
}

impl ScenarioKey {
    /// Creates a key.
    pub const fn new(service_item_id: ServiceItemId, practitioner_id: PractitionerId) -> Self {
        Self {
            service_item_id,
            practitioner_id,
        }
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.service_item_id, self.practitioner_id)
    }
}

/// A priced way of billing a service when a given practitioner performs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingScenario {
    /// Identifier; temporary until created remotely.
    pub id: ScenarioId,
    /// Display name.
    pub name: String,
    /// Amount charged.
    pub amount: f64,
    /// Share of the amount paid out to the practitioner, in `0.0..=1.0`.
    pub revenue_share: f64,
    /// Whether this scenario is preselected when booking.
    pub is_default: bool,
}

impl BillingScenario {
    /// Creates a scenario.
    pub fn new(id: ScenarioId, name: impl Into<String>, amount: f64, revenue_share: f64) -> Self {
        Self {
            id,
            name: name.into(),
            amount,
            revenue_share,
            is_default: false,
        }
    }

    /// Marks the scenario as the default one.
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Returns the payload sent to the remote store.
    pub fn fields(&self) -> ScenarioFields {
        ScenarioFields {
            name: self.name.clone(),
            amount: self.amount,
            revenue_share: self.revenue_share,
            is_default: self.is_default,
        }
    }
}

/// Persisted fields of a billing scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFields {
    /// Display name.
    pub name: String,
    /// Amount charged.
    pub amount: f64,
    /// Practitioner share.
    pub revenue_share: f64,
    /// Default flag.
    pub is_default: bool,
}

/// A resource a service needs while it is performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    /// Identifier; temporary until created remotely.
    pub id: RequirementId,
    /// Kind of resource required.
    pub resource_type_id: ResourceTypeId,
    /// Units needed.
    pub quantity: u32,
}

impl ResourceRequirement {
    /// Creates a requirement.
    pub fn new(id: RequirementId, resource_type_id: ResourceTypeId, quantity: u32) -> Self {
        Self {
            id,
            resource_type_id,
            quantity,
        }
    }

    /// Returns the payload sent to the remote store.
    pub fn fields(&self) -> RequirementFields {
        RequirementFields {
            resource_type_id: self.resource_type_id,
            quantity: self.quantity,
        }
    }
}

/// Persisted fields of a resource requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementFields {
    /// Kind of resource required.
    pub resource_type_id: ResourceTypeId,
    /// Units needed.
    pub quantity: u32,
}
