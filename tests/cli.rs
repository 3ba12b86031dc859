mod common;

use assert_cmd::Command;
use common::TestWorkspace;
use predicates::str::contains;
use serde_json::json;

fn governor() -> Command {
    Command::cargo_bin("schema-governor").expect("binary exists")
}

#[test]
fn probe_prints_canonical_schema_as_yaml() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_json(
        "orders.json",
        &json!([{"id": 1, "placed_at": "2024-03-01T10:00:00Z", "lines": [{"sku": "A"}]}]),
    );
    governor()
        .args(["probe", "-i", input.to_str().unwrap(), "-d", "orders"])
        .assert()
        .success()
        .stdout(contains("dataset_id: orders"))
        .stdout(contains("name: placed_at"))
        .stdout(contains("repeated: true"));
}

#[test]
fn map_writes_bigquery_schema_for_csv() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "orders.csv",
        "id;Amount Due;ordered_at\n1;42.5;2024-01-01\n2;13.37;2024-01-03\n",
    );
    let output = workspace.path().join("orders.bq.json");
    let report = workspace.path().join("validation.json");
    governor()
        .args([
            "map",
            "-i",
            input.to_str().unwrap(),
            "-d",
            "orders",
            "--delimiter",
            ";",
            "-o",
            output.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ])
        .assert()
        .success();

    let schema = workspace.read_json(&output);
    let names: Vec<&str> = schema
        .as_array()
        .unwrap()
        .iter()
        .map(|column| column["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["id", "amount_due", "ordered_at"]);
    assert_eq!(schema[0]["type"], "INT64");
    assert_eq!(schema[0]["mode"], "REQUIRED");
    assert_eq!(schema[1]["type"], "NUMERIC");
    assert_eq!(schema[2]["type"], "DATE");

    let validation = workspace.read_json(&report);
    assert_eq!(validation["errors"], json!([]));
}

#[test]
fn map_fails_on_colliding_names() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_json("users.json", &json!([{"User Name": "a", "user_name": "b"}]));
    governor()
        .args(["map", "-i", input.to_str().unwrap(), "-d", "users"])
        .assert()
        .failure()
        .stderr(contains("user_name"));
}

#[test]
fn unsupported_inputs_are_reported() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("users.xml", "<users/>");
    governor()
        .args(["probe", "-i", input.to_str().unwrap(), "-d", "users"])
        .assert()
        .failure()
        .stderr(contains("Unsupported input format"));
}

#[test]
fn governed_lifecycle_through_the_cli() {
    let workspace = TestWorkspace::new();
    let store = workspace.store_root();
    let store = store.to_str().unwrap();
    let v1 = workspace.write_json("v1.json", &json!([{"id": 1, "amount": 5}]));
    let removed = workspace.write_json("removed.json", &json!([{"id": 2}]));
    let added = workspace.write_json(
        "added.json",
        &json!([{"id": 3, "amount": 7, "coupon": "SPRING"}, {"id": 4, "amount": 8}]),
    );
    let plan = workspace.path().join("plan.json");
    let ticket = workspace.path().join("ticket.json");

    governor()
        .args(["submit", "-i", v1.to_str().unwrap(), "-d", "orders", "-s", store])
        .args(["-o", plan.to_str().unwrap()])
        .assert()
        .success();
    let accepted = workspace.read_json(&plan);
    assert_eq!(accepted["version"]["versionNumber"], 1);
    assert_eq!(accepted["appended"], true);

    governor()
        .args(["submit", "-i", removed.to_str().unwrap(), "-d", "orders", "-s", store])
        .assert()
        .failure()
        .stderr(contains("rejected"));

    governor()
        .args(["submit", "-i", added.to_str().unwrap(), "-d", "orders", "-s", store])
        .args(["-o", ticket.to_str().unwrap()])
        .assert()
        .success();
    let pending = workspace.read_json(&ticket);
    assert_eq!(pending["proposedVersion"], 2);

    governor()
        .args(["approve", "-t", ticket.to_str().unwrap(), "-s", store, "--by", "ops"])
        .args(["-o", plan.to_str().unwrap()])
        .assert()
        .success();
    assert_eq!(workspace.read_json(&plan)["version"]["approval"]["decidedBy"], "ops");

    governor()
        .args(["approve", "-t", ticket.to_str().unwrap(), "-s", store, "--by", "ops"])
        .assert()
        .failure()
        .stderr(contains("cannot accept version 2"));

    governor()
        .args(["history", "-s", store, "-d", "orders"])
        .assert()
        .success()
        .stdout(contains("RequiresApproval"))
        .stdout(contains("ops"));

    governor()
        .args(["diff", "-s", store, "-d", "orders", "--from", "1"])
        .assert()
        .success()
        .stdout(contains("\"Added\""))
        .stdout(contains("+    \"name\": \"coupon\""));

    governor()
        .args(["diff", "-s", store, "-d", "orders", "--from", "1", "--ddl"])
        .assert()
        .success()
        .stdout(contains("ALTER TABLE `orders` ADD COLUMN `coupon` STRING;"));
}
