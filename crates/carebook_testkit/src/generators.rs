//! Property-based test generators using proptest.
//!
//! Edits are generated as data and applied to a session afterwards, so a
//! failing sequence shrinks to a readable list of operator actions.

use carebook_catalog::{
    BillingScenario, Group, GroupPatch, PractitionerId, RequirementId, ResourceRequirement,
    ResourceTypeId, ScenarioId, ScenarioKey, ServiceItem, ServiceItemId, ServiceItemPatch,
};
use carebook_sync_engine::StagingSession;
use proptest::prelude::*;

/// Practitioners edits are drawn from.
pub const PRACTITIONERS: [PractitionerId; 3] =
    [PractitionerId(5), PractitionerId(6), PractitionerId(7)];

/// One operator action against a staging session.
///
/// Records are addressed by position in the current listing (modulo its
/// length) so every generated edit is applicable to any session.
#[derive(Debug, Clone)]
pub enum Edit {
    /// Stage a new service item.
    AddServiceItem {
        /// Name.
        name: String,
        /// Price in minor units.
        price_cents: i64,
    },
    /// Change the price of a service item.
    RepriceServiceItem {
        /// Listing position.
        index: usize,
        /// New price.
        price_cents: i64,
    },
    /// Delete a service item.
    DeleteServiceItem {
        /// Listing position.
        index: usize,
    },
    /// Move a service item to the front of the listing.
    MoveServiceItemToFront {
        /// Listing position.
        index: usize,
    },
    /// Stage a new group.
    AddGroup {
        /// Name.
        name: String,
    },
    /// Rename a group.
    RenameGroup {
        /// Listing position.
        index: usize,
        /// New name.
        name: String,
    },
    /// Delete a group.
    DeleteGroup {
        /// Listing position.
        index: usize,
    },
    /// Put a service item into a group.
    AssignGroup {
        /// Service item listing position.
        item: usize,
        /// Group listing position.
        group: usize,
    },
    /// Replace the eligible practitioners of a service item.
    SetPractitioners {
        /// Listing position.
        index: usize,
        /// Indexes into [`PRACTITIONERS`].
        practitioners: Vec<usize>,
    },
    /// Replace the billing scenarios of a pair.
    SetScenarios {
        /// Service item listing position.
        index: usize,
        /// Index into [`PRACTITIONERS`].
        practitioner: usize,
        /// Amounts of the scenarios to stage.
        amounts: Vec<u32>,
    },
    /// Replace the resource requirements of a service item.
    SetRequirements {
        /// Listing position.
        index: usize,
        /// Quantities of the requirements to stage.
        quantities: Vec<u32>,
    },
}

impl Edit {
    /// Returns true if applying the edit stages records under temporary ids.
    pub fn mints_ids(&self) -> bool {
        match self {
            Edit::AddServiceItem { .. } | Edit::AddGroup { .. } => true,
            Edit::SetScenarios { amounts, .. } => !amounts.is_empty(),
            Edit::SetRequirements { quantities, .. } => !quantities.is_empty(),
            _ => false,
        }
    }

    /// Applies the edit. Edits addressing an empty listing do nothing.
    pub fn apply(&self, session: &mut StagingSession) {
        let items = session.service_items().ordered_ids();
        let groups = session.groups().ordered_ids();
        let item_at = |index: usize| pick(&items, index);

        match self {
            Edit::AddServiceItem { name, price_cents } => {
                let id = session.next_temp_id();
                session.add_service_item(
                    ServiceItem::new(id, name.clone()).with_price_cents(*price_cents),
                );
            }
            Edit::RepriceServiceItem { index, price_cents } => {
                if let Some(id) = item_at(*index) {
                    session.update_service_item(
                        id,
                        ServiceItemPatch {
                            price_cents: Some(*price_cents),
                            ..Default::default()
                        },
                    );
                }
            }
            Edit::DeleteServiceItem { index } => {
                if let Some(id) = item_at(*index) {
                    session.delete_service_item(id);
                }
            }
            Edit::MoveServiceItemToFront { index } => {
                if let Some(id) = item_at(*index) {
                    session.reorder_service_items(&[id]);
                }
            }
            Edit::AddGroup { name } => {
                let id = session.next_temp_id();
                session.add_group(Group::new(id, name.clone()));
            }
            Edit::RenameGroup { index, name } => {
                if let Some(id) = pick(&groups, *index) {
                    session.update_group(
                        id,
                        GroupPatch {
                            name: Some(name.clone()),
                        },
                    );
                }
            }
            Edit::DeleteGroup { index } => {
                if let Some(id) = pick(&groups, *index) {
                    session.delete_group(id);
                }
            }
            Edit::AssignGroup { item, group } => {
                if let (Some(item), Some(group)) = (item_at(*item), pick(&groups, *group)) {
                    session.update_service_item(
                        item,
                        ServiceItemPatch {
                            group_id: Some(Some(group)),
                            ..Default::default()
                        },
                    );
                }
            }
            Edit::SetPractitioners {
                index,
                practitioners,
            } => {
                if let Some(id) = item_at(*index) {
                    session.update_practitioner_assignments(
                        id,
                        practitioners.iter().map(|p| practitioner(*p)),
                    );
                }
            }
            Edit::SetScenarios {
                index,
                practitioner: which,
                amounts,
            } => {
                if let Some(id) = item_at(*index) {
                    let scenarios = amounts
                        .iter()
                        .enumerate()
                        .map(|(n, amount)| {
                            let scenario_id: ScenarioId = session.next_temp_id();
                            BillingScenario::new(
                                scenario_id,
                                format!("Scenario {n}"),
                                f64::from(*amount),
                                0.5,
                            )
                        })
                        .collect();
                    session.update_billing_scenarios(
                        ScenarioKey::new(id, practitioner(*which)),
                        scenarios,
                    );
                }
            }
            Edit::SetRequirements { index, quantities } => {
                if let Some(id) = item_at(*index) {
                    let requirements = quantities
                        .iter()
                        .map(|quantity| {
                            let requirement_id: RequirementId = session.next_temp_id();
                            ResourceRequirement::new(requirement_id, ResourceTypeId(1), *quantity)
                        })
                        .collect();
                    session.update_resource_requirements(id, requirements);
                }
            }
        }
    }
}

fn pick<T: Copy>(ids: &[T], index: usize) -> Option<T> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[index % ids.len()])
    }
}

fn practitioner(index: usize) -> PractitionerId {
    PRACTITIONERS[index % PRACTITIONERS.len()]
}

/// Strategy for generating record names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,12}").expect("Invalid regex")
}

/// Strategy for generating a single edit.
pub fn edit_strategy() -> impl Strategy<Value = Edit> {
    let index = 0usize..16;
    prop_oneof![
        (name_strategy(), 0i64..100_000)
            .prop_map(|(name, price_cents)| Edit::AddServiceItem { name, price_cents }),
        (index.clone(), 0i64..100_000).prop_map(|(index, price_cents)| {
            Edit::RepriceServiceItem { index, price_cents }
        }),
        index.clone().prop_map(|index| Edit::DeleteServiceItem { index }),
        index
            .clone()
            .prop_map(|index| Edit::MoveServiceItemToFront { index }),
        name_strategy().prop_map(|name| Edit::AddGroup { name }),
        (index.clone(), name_strategy())
            .prop_map(|(index, name)| Edit::RenameGroup { index, name }),
        index.clone().prop_map(|index| Edit::DeleteGroup { index }),
        (index.clone(), index.clone()).prop_map(|(item, group)| Edit::AssignGroup { item, group }),
        (index.clone(), prop::collection::vec(0usize..3, 0..3)).prop_map(
            |(index, practitioners)| Edit::SetPractitioners {
                index,
                practitioners,
            }
        ),
        (
            index.clone(),
            0usize..3,
            prop::collection::vec(1u32..500, 0..3)
        )
            .prop_map(|(index, practitioner, amounts)| Edit::SetScenarios {
                index,
                practitioner,
                amounts,
            }),
        (index, prop::collection::vec(1u32..4, 0..3))
            .prop_map(|(index, quantities)| Edit::SetRequirements { index, quantities }),
    ]
}

/// Strategy for generating a sequence of edits.
pub fn edit_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(edit_strategy(), 0..=max_len)
}

/// Strategy for generating service item ids, temporary or real.
pub fn service_item_id_strategy() -> impl Strategy<Value = ServiceItemId> {
    prop_oneof![(-50i64..=0), (1i64..1_000)].prop_map(ServiceItemId)
}
