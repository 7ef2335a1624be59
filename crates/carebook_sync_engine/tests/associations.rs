//! Integration tests for persisting dependent records.

use carebook_catalog::{
    BillingScenario, PractitionerId, RecordId, RequirementId, ResourceRequirement,
    ResourceTypeId, ScenarioId, ScenarioKey, ServiceItem, ServiceItemId,
};
use carebook_sync_engine::{RemoteError, SyncConfig, Synchronizer};
use carebook_testkit::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn synchronizer(catalog: &Arc<InMemoryCatalog>) -> Synchronizer<InMemoryCatalog> {
    Synchronizer::new(Arc::clone(catalog), SyncConfig::default())
}

fn consult_with_adams() -> ScenarioKey {
    ScenarioKey::new(CONSULT, DR_ADAMS)
}

fn names(scenarios: &[BillingScenario]) -> Vec<&str> {
    scenarios.iter().map(|s| s.name.as_str()).collect()
}

#[tokio::test]
async fn failed_scenario_delete_stays_pending_while_siblings_settle() {
    init_tracing();
    let catalog = Arc::new(sample_catalog());
    let sync = synchronizer(&catalog);
    let mut session = catalog.full_session();
    let key = consult_with_adams();

    session.update_billing_scenarios(key, Vec::new());
    catalog.fail_when(
        |call| matches!(call, RemoteCall::DeleteScenario(_, ScenarioId(21))),
        RemoteError::Conflict("scenario in use".into()),
    );

    let outcome = sync.save_billing_scenarios(&mut session).await.unwrap();
    assert_eq!(
        outcome.errors,
        vec![
            "deleting billing scenario \"Insurance\" for 10#5: conflict: scenario in use"
                .to_string()
        ]
    );
    assert_eq!(names(&catalog.scenarios(key)), ["Insurance"]);

    // The two deletes that went through are folded; the failed one is not.
    assert_eq!(session.billing_scenarios().get(&key), Some(&Vec::new()));
    assert_eq!(
        names(session.billing_scenarios().baseline_value(&key).unwrap()),
        ["Insurance"]
    );
    assert!(session.has_unsaved_changes());

    catalog.clear_failures();
    catalog.clear_calls();
    let outcome = sync.save_billing_scenarios(&mut session).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.errors);
    assert_eq!(catalog.calls(), vec![RemoteCall::DeleteScenario(key, ScenarioId(21))]);
    assert!(catalog.scenarios(key).is_empty());
    assert!(!session.has_unsaved_changes());
}

#[tokio::test]
async fn explicit_empty_list_on_an_unloaded_key_deletes_everything() {
    let catalog = Arc::new(sample_catalog());
    let mut session = catalog.owners_session();
    let key = consult_with_adams();
    session.update_billing_scenarios(key, Vec::new());

    let outcome = synchronizer(&catalog)
        .save_billing_scenarios(&mut session)
        .await
        .unwrap();
    assert!(outcome.success, "{:?}", outcome.errors);

    let calls = catalog.calls();
    assert_eq!(calls[0], RemoteCall::ListScenarios(key));
    let mut deleted: Vec<_> = calls[1..]
        .iter()
        .map(|call| match call {
            RemoteCall::DeleteScenario(k, id) if *k == key => *id,
            other => panic!("unexpected request {other:?}"),
        })
        .collect();
    deleted.sort();
    assert_eq!(deleted, [ScenarioId(20), ScenarioId(21), ScenarioId(22)]);
    assert!(catalog.scenarios(key).is_empty());
    assert!(!session.has_unsaved_changes());
}

#[tokio::test]
async fn untouched_keys_are_never_deleted() {
    let catalog = Arc::new(sample_catalog());
    let mut session = catalog.owners_session();
    session.update_billing_scenarios(
        ScenarioKey::new(MASSAGE, DR_BAKER),
        vec![BillingScenario::new(ScenarioId(-100), "Standard", 90.0, 0.6)],
    );

    let outcome = synchronizer(&catalog).save_all(&mut session).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.errors);

    assert!(catalog
        .calls()
        .iter()
        .all(|call| call.service_item() == Some(MASSAGE)));
    assert_eq!(catalog.scenarios(consult_with_adams()).len(), 3);
    assert_eq!(catalog.requirements(MASSAGE).len(), 1);
}

#[tokio::test]
async fn scenario_update_is_sent_for_a_changed_amount_only() {
    let catalog = Arc::new(sample_catalog());
    let mut session = catalog.full_session();
    let key = consult_with_adams();

    let mut scenarios = session.billing_scenarios().get(&key).unwrap().clone();
    scenarios[1].amount = 85.0;
    session.update_billing_scenarios(key, scenarios);

    let outcome = synchronizer(&catalog)
        .save_billing_scenarios(&mut session)
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(catalog.calls(), vec![RemoteCall::UpdateScenario(key, ScenarioId(21))]);
    assert_eq!(catalog.scenarios(key)[1].amount, 85.0);
    assert!(!session.has_unsaved_changes());
}

#[tokio::test]
async fn scenarios_of_an_unsaved_service_item_are_held_back() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let mut session = catalog.full_session();
    let temp: ServiceItemId = session.next_temp_id();
    let temp = session.add_service_item(ServiceItem::new(temp, "Consult"));
    let scenario: ScenarioId = session.next_temp_id();
    session.update_billing_scenarios(
        ScenarioKey::new(temp, PractitionerId(5)),
        vec![BillingScenario::new(scenario, "Standard", 100.0, 0.5)],
    );
    catalog.fail_when(
        |call| matches!(call, RemoteCall::CreateServiceItem { .. }),
        RemoteError::Network("connection reset".into()),
    );

    let outcome = synchronizer(&catalog).save_all(&mut session).await.unwrap();
    assert_eq!(
        outcome.errors,
        vec![
            "creating service item \"Consult\": network error: connection reset".to_string(),
            "billing scenarios for service:tmp-1#5: the service item has not been saved"
                .to_string(),
        ]
    );
    assert_eq!(catalog.calls().len(), 1);
    assert!(session.has_unsaved_changes());
}

#[tokio::test]
async fn a_deleted_scenario_that_is_already_gone_counts_as_deleted() {
    let catalog = Arc::new(sample_catalog());
    let mut session = catalog.full_session();
    let key = consult_with_adams();

    let remaining: Vec<_> = session.billing_scenarios().get(&key).unwrap()[1..].to_vec();
    session.update_billing_scenarios(key, remaining);
    catalog.fail_when(
        |call| matches!(call, RemoteCall::DeleteScenario(..)),
        RemoteError::NotFound,
    );

    let outcome = synchronizer(&catalog)
        .save_billing_scenarios(&mut session)
        .await
        .unwrap();
    assert!(outcome.success);
    assert!(!session.has_unsaved_changes());
}

#[tokio::test]
async fn assignments_are_sent_as_full_practitioner_lists() {
    init_tracing();
    let catalog = Arc::new(sample_catalog());
    let mut session = catalog.full_session();

    // Follow-up moves from Dr Adams to Dr Baker.
    session.update_practitioner_assignments(FOLLOW_UP, [DR_BAKER]);
    let outcome = synchronizer(&catalog)
        .save_practitioner_assignments(&mut session)
        .await
        .unwrap();
    assert!(outcome.success, "{:?}", outcome.errors);

    let mut writes = catalog.writes();
    writes.sort_by_key(|call| match call {
        RemoteCall::ReplaceAssignments(p, _) => *p,
        _ => PractitionerId(0),
    });
    assert_eq!(
        writes,
        vec![
            RemoteCall::ReplaceAssignments(DR_ADAMS, vec![CONSULT]),
            RemoteCall::ReplaceAssignments(DR_BAKER, vec![CONSULT, FOLLOW_UP, MASSAGE]),
        ]
    );
    assert_eq!(catalog.assignments(DR_ADAMS), Some(BTreeSet::from([CONSULT])));
    assert_eq!(
        session.assignments().roster(DR_BAKER),
        Some(&BTreeSet::from([CONSULT, FOLLOW_UP, MASSAGE]))
    );
    assert!(!session.has_unsaved_changes());
}

#[tokio::test]
async fn failed_practitioner_list_keeps_its_service_items_pending() {
    let catalog = Arc::new(sample_catalog());
    let sync = synchronizer(&catalog);
    let mut session = catalog.full_session();

    session.update_practitioner_assignments(FOLLOW_UP, [DR_BAKER]);
    session.update_practitioner_assignments(MASSAGE, [DR_BAKER, PractitionerId(7)]);
    catalog.fail_when(
        |call| matches!(call, RemoteCall::ReplaceAssignments(p, _) if *p == DR_ADAMS),
        RemoteError::Network("connection reset".into()),
    );

    let outcome = sync.save_practitioner_assignments(&mut session).await.unwrap();
    assert_eq!(
        outcome.errors,
        vec!["saving assignments of practitioner 5: network error: connection reset".to_string()]
    );

    // Massage only involves practitioners whose lists were saved.
    let map = &session.assignments().map;
    assert_eq!(map.get(&MASSAGE), map.baseline_value(&MASSAGE));
    assert_ne!(map.get(&FOLLOW_UP), map.baseline_value(&FOLLOW_UP));
    assert_eq!(
        catalog.assignments(PractitionerId(7)),
        Some(BTreeSet::from([MASSAGE]))
    );

    catalog.clear_failures();
    catalog.clear_calls();
    let outcome = sync.save_practitioner_assignments(&mut session).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.errors);
    assert_eq!(
        catalog.writes(),
        vec![RemoteCall::ReplaceAssignments(DR_ADAMS, vec![CONSULT])]
    );
    assert!(!session.has_unsaved_changes());
}

#[tokio::test]
async fn requirement_failures_are_reported_per_record() {
    let catalog = Arc::new(sample_catalog());
    let mut session = catalog.full_session();

    let mut requirements = session
        .resource_requirements()
        .get(&MASSAGE)
        .unwrap()
        .clone();
    let good: RequirementId = session.next_temp_id();
    let bad: RequirementId = session.next_temp_id();
    requirements.push(ResourceRequirement::new(good, ResourceTypeId(4), 2));
    requirements.push(ResourceRequirement::new(bad, ResourceTypeId(5), 0));
    session.update_resource_requirements(MASSAGE, requirements);

    let outcome = synchronizer(&catalog)
        .save_resource_requirements(&mut session)
        .await
        .unwrap();
    assert_eq!(
        outcome.errors,
        vec![
            "creating resource requirement 0 x resource type 5 for 12: validation failed: quantity must be positive"
                .to_string()
        ]
    );
    assert_eq!(catalog.requirements(MASSAGE).len(), 2);

    let staged = session.resource_requirements().get(&MASSAGE).unwrap();
    assert_eq!(staged.len(), 3);
    assert_eq!(
        staged.iter().filter(|r| r.id.is_temporary()).count(),
        1,
        "only the rejected requirement keeps its temporary id"
    );
    assert_eq!(
        session
            .resource_requirements()
            .baseline_value(&MASSAGE)
            .unwrap()
            .len(),
        2
    );
    assert!(session.has_unsaved_changes());
}

#[tokio::test]
async fn new_scenarios_sharing_a_temporary_id_are_saved_apart() {
    let catalog = Arc::new(sample_catalog());
    let sync = synchronizer(&catalog);
    let mut session = catalog.full_session();
    let key = ScenarioKey::new(FOLLOW_UP, DR_ADAMS);
    session.update_billing_scenarios(
        key,
        vec![
            BillingScenario::new(ScenarioId(-1), "A", 10.0, 0.5),
            BillingScenario::new(ScenarioId(-1), "B", 20.0, 0.5),
        ],
    );

    let outcome = sync.save_all(&mut session).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.errors);

    let by_name = |mut scenarios: Vec<BillingScenario>| {
        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        scenarios
    };
    let staged = by_name(session.billing_scenarios().get(&key).unwrap().clone());
    assert_ne!(staged[0].id, staged[1].id);
    assert_eq!(staged, by_name(catalog.scenarios(key)));

    // Editing one of them must reach that record only.
    let mut edited = staged.clone();
    edited[0].amount = 15.0;
    session.update_billing_scenarios(key, edited);
    catalog.clear_calls();
    let outcome = sync.save_billing_scenarios(&mut session).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.errors);
    assert_eq!(catalog.calls(), vec![RemoteCall::UpdateScenario(key, staged[0].id)]);

    let remote = by_name(catalog.scenarios(key));
    assert_eq!(remote[0].amount, 15.0);
    assert_eq!(remote[1].amount, 20.0);
    assert!(!session.has_unsaved_changes());
}

#[tokio::test]
async fn service_item_whose_delete_failed_keeps_its_practitioners() {
    let catalog = Arc::new(sample_catalog());
    let mut session = catalog.full_session();
    session.delete_service_item(FOLLOW_UP);
    session.update_practitioner_assignments(MASSAGE, [DR_ADAMS, DR_BAKER]);
    catalog.fail_when(
        |call| *call == RemoteCall::DeleteServiceItem(FOLLOW_UP),
        RemoteError::Conflict("service item in use".into()),
    );

    let outcome = synchronizer(&catalog).save_all(&mut session).await.unwrap();
    assert_eq!(
        outcome.errors,
        vec!["deleting service item \"Follow-up\": conflict: service item in use".to_string()]
    );

    let replaced: Vec<_> = catalog
        .writes()
        .into_iter()
        .filter(|call| matches!(call, RemoteCall::ReplaceAssignments(..)))
        .collect();
    assert_eq!(
        replaced,
        vec![RemoteCall::ReplaceAssignments(
            DR_ADAMS,
            vec![CONSULT, FOLLOW_UP, MASSAGE]
        )]
    );
    assert_eq!(
        catalog.assignments(DR_ADAMS),
        Some(BTreeSet::from([CONSULT, FOLLOW_UP, MASSAGE]))
    );
}
