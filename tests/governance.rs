mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{TestWorkspace, coordinator};
use schema_governor::drift::{ChangeKind, Impact, Verdict};
use schema_governor::governance::{
    ApprovalDecision, BreakingChangePolicy, CoordinatorConfig, Decision, GovernanceState,
};
use schema_governor::source::InMemorySource;
use schema_governor::store::VersionStorage;
use schema_governor::types::CanonicalType;
use serde_json::json;

fn orders() -> InMemorySource {
    InMemorySource::new()
        .with_json(
            "nullable-name",
            json!([{"id": 1, "name": "a"}, {"id": 2, "name": null}]),
        )
        .with_json("int-amount", json!([{"id": 1, "amount": 10}]))
        .with_json("float-amount", json!([{"id": 2, "amount": 10.5}]))
        .with_json("float-amount-b", json!([{"id": 3, "amount": 99.25}]))
        .with_json("no-amount", json!([{"id": 4}]))
        .with_json(
            "with-coupon",
            json!([{"id": 5, "amount": 3, "coupon": "X"}, {"id": 6, "amount": 4}]),
        )
}

#[test]
fn nullability_is_inferred_across_records() {
    let workspace = TestWorkspace::new();
    let coordinator = coordinator(orders(), workspace.file_store(), CoordinatorConfig::default());
    let outcome = coordinator.submit("people", "nullable-name").unwrap();
    let plan = outcome.plan().expect("accepted");
    let schema = &plan.version.canonical_schema;

    let id = schema.field("id").unwrap();
    assert_eq!(id.field_type, CanonicalType::int64());
    assert!(!id.nullable);
    let name = schema.field("name").unwrap();
    assert_eq!(name.field_type, CanonicalType::String);
    assert!(name.nullable);
}

#[test]
fn widening_a_numeric_type_is_accepted_as_a_new_version() {
    let workspace = TestWorkspace::new();
    let store = workspace.file_store();
    let coordinator = coordinator(orders(), store.clone(), CoordinatorConfig::default());
    coordinator.submit("orders", "int-amount").unwrap();

    let outcome = coordinator.submit("orders", "float-amount").unwrap();
    assert_eq!(outcome.state(), GovernanceState::Accepted);
    assert_eq!(
        outcome.plan().unwrap().migration.statements,
        vec!["ALTER TABLE `orders` ALTER COLUMN `amount` SET DATA TYPE FLOAT64;"]
    );
    assert_eq!(outcome.drift.verdict, Verdict::Compatible);
    let widened = outcome
        .drift
        .changes
        .iter()
        .find(|change| change.path == "amount")
        .unwrap();
    assert_eq!(widened.kind, ChangeKind::TypeWidened);
    assert_eq!(widened.impact, Impact::Compatible);

    let history = store.history("orders").unwrap();
    assert_eq!(
        history
            .iter()
            .map(|version| version.version_number)
            .collect::<Vec<_>>(),
        vec![1, 2]
    );
    let summary = history[1].drift_summary.unwrap();
    assert_eq!(summary.from_version, Some(1));
    assert_eq!(summary.changed, 1);
}

#[test]
fn removing_a_required_field_is_rejected_by_default() {
    let workspace = TestWorkspace::new();
    let store = workspace.file_store();
    let coordinator = coordinator(orders(), store.clone(), CoordinatorConfig::default());
    coordinator.submit("orders", "int-amount").unwrap();

    let outcome = coordinator.submit("orders", "no-amount").unwrap();
    assert_eq!(outcome.drift.verdict, Verdict::Breaking);
    let Decision::Rejected(rejection) = &outcome.decision else {
        panic!("expected rejection, got {:?}", outcome.decision);
    };
    assert_eq!(rejection.breaking_changes[0].kind, ChangeKind::Removed);
    assert_eq!(store.history("orders").unwrap().len(), 1);
}

#[test]
fn breaking_changes_wait_for_approval_when_configured() {
    let workspace = TestWorkspace::new();
    let store = workspace.file_store();
    let config = CoordinatorConfig {
        breaking_change_policy: BreakingChangePolicy::RequireApproval,
        ..CoordinatorConfig::default()
    };
    let coordinator = coordinator(orders(), store.clone(), config);
    coordinator.submit("orders", "int-amount").unwrap();

    let outcome = coordinator.submit("orders", "no-amount").unwrap();
    let Decision::PendingApproval(ticket) = outcome.decision else {
        panic!("expected pending approval");
    };
    let resolved = coordinator
        .resolve(
            ticket,
            ApprovalDecision::Approve {
                decided_by: "data-platform".to_string(),
                note: Some("amount moved to billing".to_string()),
            },
        )
        .unwrap();
    let plan = resolved.plan().unwrap();
    assert_eq!(plan.version.version_number, 2);
    let stored = store.get("orders", 2).unwrap().unwrap();
    assert_eq!(stored.approval.unwrap().decided_by, "data-platform");
}

#[test]
fn optional_addition_is_held_then_approved() {
    let workspace = TestWorkspace::new();
    let store = workspace.file_store();
    let coordinator = coordinator(orders(), store.clone(), CoordinatorConfig::default());
    let first = coordinator.submit("orders", "int-amount").unwrap();
    assert!(first.plan().unwrap().migration.statements[0].starts_with("CREATE TABLE `orders`"));

    let outcome = coordinator.submit("orders", "with-coupon").unwrap();
    assert_eq!(outcome.state(), GovernanceState::PendingApproval);
    assert_eq!(outcome.drift.verdict, Verdict::RequiresApproval);
    assert_eq!(store.history("orders").unwrap().len(), 1);

    let Decision::PendingApproval(ticket) = outcome.decision else {
        panic!("expected pending approval");
    };
    assert_eq!(ticket.proposed_version, 2);
    let rejected = coordinator
        .resolve(
            ticket.clone(),
            ApprovalDecision::Reject {
                decided_by: "reviewer".to_string(),
                reason: "coupon is PII".to_string(),
            },
        )
        .unwrap();
    assert_eq!(rejected.state(), GovernanceState::Rejected);
    assert_eq!(store.history("orders").unwrap().len(), 1);

    let approved = coordinator
        .resolve(
            ticket,
            ApprovalDecision::Approve {
                decided_by: "reviewer".to_string(),
                note: None,
            },
        )
        .unwrap();
    assert_eq!(approved.state(), GovernanceState::Accepted);
    let plan = approved.plan().unwrap();
    assert_eq!(
        plan.migration.statements,
        vec!["ALTER TABLE `orders` ADD COLUMN `coupon` STRING;"]
    );
    assert!(plan.migration.is_additive());
    assert!(
        store
            .latest("orders")
            .unwrap()
            .unwrap()
            .canonical_schema
            .field("coupon")
            .unwrap()
            .nullable
    );
}

#[test]
fn racing_submissions_produce_one_version_and_one_conflict() {
    let workspace = TestWorkspace::new();
    let store = workspace.file_store();
    let coordinator = Arc::new(coordinator(
        orders(),
        store.clone(),
        CoordinatorConfig::default(),
    ));
    coordinator.submit("orders", "int-amount").unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["float-amount", "float-amount-b"]
        .into_iter()
        .map(|input| {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            let source = orders();
            thread::spawn(move || {
                use schema_governor::document::DocumentSource;
                let document = source.fetch(input).unwrap();
                let evaluation = coordinator.evaluate_document("orders", &document).unwrap();
                barrier.wait();
                coordinator.decide(evaluation)
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let accepted = results.iter().filter(|result| result.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|result| matches!(result, Err(err) if err.is_conflict()))
        .count();
    assert_eq!((accepted, conflicts), (1, 1));
    assert_eq!(store.history("orders").unwrap().len(), 2);
}

#[test]
fn versions_stay_contiguous_across_coordinators() {
    let workspace = TestWorkspace::new();
    let first = coordinator(orders(), workspace.file_store(), CoordinatorConfig::default());
    let second = coordinator(orders(), workspace.file_store(), CoordinatorConfig::default());

    first.submit("orders", "int-amount").unwrap();
    second.submit("orders", "float-amount").unwrap();
    let outcome = first.submit("orders", "float-amount-b").unwrap();
    assert!(!outcome.plan().unwrap().appended);

    let numbers: Vec<u32> = workspace
        .file_store()
        .history("orders")
        .unwrap()
        .iter()
        .map(|version| version.version_number)
        .collect();
    assert_eq!(numbers, vec![1, 2]);
}
