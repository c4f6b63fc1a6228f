#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const CREATED: &str = "2026-01-01T00:00:00Z";
const THREE_HOURS_LATER: &str = "2026-01-01T03:00:00Z";

fn tierwatch(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tierwatch").unwrap();
    cmd.current_dir(dir.path())
        .env("TIERWATCH_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn init(dir: &TempDir) {
    tierwatch(dir).arg("init").assert().success();
}

fn add_ticket(dir: &TempDir, priority: &str) {
    tierwatch(dir)
        .args([
            "ticket",
            "add",
            "--subject",
            "Card charged twice",
            "--category",
            "billing",
            "--priority",
            priority,
            "--customer",
            "cust@example.com",
            "--created-at",
            CREATED,
        ])
        .assert()
        .success();
}

fn json_output(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.arg("--json").output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// tierwatch init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_database() {
    let dir = TempDir::new().unwrap();
    tierwatch(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote .tierwatch/config.yaml"));

    assert!(dir.path().join(".tierwatch/config.yaml").exists());
    assert!(dir.path().join(".tierwatch/tickets.db").exists());
}

#[test]
fn init_is_idempotent_and_keeps_config() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let path = dir.path().join(".tierwatch/config.yaml");
    let edited = std::fs::read_to_string(&path).unwrap() + "# operator note\n";
    std::fs::write(&path, &edited).unwrap();

    tierwatch(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("kept existing"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), edited);
}

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    tierwatch(&dir)
        .args(["ticket", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
    tierwatch(&dir)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// tierwatch ticket
// ---------------------------------------------------------------------------

#[test]
fn ticket_add_and_list() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    add_ticket(&dir, "high");

    let tickets = json_output(tierwatch(&dir).args(["ticket", "list"]));
    let t = &tickets[0];
    assert_eq!(t["id"], 1);
    assert_eq!(t["priority"], "high");
    assert_eq!(t["status"], "open");
    assert_eq!(t["tier"], "L1");
    assert_eq!(t["version"], 1);
}

#[test]
fn ticket_add_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    tierwatch(&dir)
        .args(["ticket", "add", "--subject", "x", "--category", "billing", "--priority", "asap"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid priority"));
    tierwatch(&dir)
        .args(["ticket", "add", "--subject", "x", "--category", "Billing Dept"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid category"));
}

#[test]
fn ticket_status_hides_resolved_from_default_list() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    add_ticket(&dir, "low");
    tierwatch(&dir)
        .args(["ticket", "status", "1", "resolved"])
        .assert()
        .success()
        .stdout(predicate::str::contains("now resolved (v2)"));

    tierwatch(&dir)
        .args(["ticket", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no tickets"));
    let all = json_output(tierwatch(&dir).args(["ticket", "list", "--all"]));
    assert_eq!(all.as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// tierwatch run
// ---------------------------------------------------------------------------

#[test]
fn run_escalates_overdue_high_ticket_once() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    add_ticket(&dir, "high");
    add_ticket(&dir, "low");

    let out = json_output(tierwatch(&dir).args(["run", "--now", THREE_HOURS_LATER]));
    let summary = &out["run"]["summary"];
    assert_eq!(summary["candidates"], 2);
    assert_eq!(summary["applied"], 1);
    assert_eq!(out["run"]["outcomes"][0]["ticket_id"], 1);
    assert_eq!(out["run"]["outcomes"][0]["outcome"], "applied");

    let ticket = json_output(tierwatch(&dir).args(["ticket", "show", "1"]));
    assert_eq!(ticket["tier"], "L2");
    assert_eq!(ticket["version"], 2);
    assert_eq!(ticket["history"].as_array().unwrap().len(), 1);
    assert_eq!(ticket["tier_changed_at"], "2026-01-01T03:00:00Z");

    let again = json_output(tierwatch(&dir).args(["run", "--now", THREE_HOURS_LATER]));
    assert_eq!(again["run"]["summary"]["decisions"], 0);
    assert_eq!(again["run"]["summary"]["applied"], 0);
}

#[test]
fn run_never_escalates_resolved_ticket() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    add_ticket(&dir, "urgent");
    tierwatch(&dir)
        .args(["ticket", "status", "1", "resolved"])
        .assert()
        .success();

    let out = json_output(tierwatch(&dir).args(["run", "--now", "2026-02-01T00:00:00Z"]));
    assert_eq!(out["run"]["summary"]["candidates"], 0);
    let ticket = json_output(tierwatch(&dir).args(["ticket", "show", "1"]));
    assert_eq!(ticket["tier"], "L1");
}

#[test]
fn run_reports_policy_gap() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    std::fs::write(
        dir.path().join(".tierwatch/config.yaml"),
        r#"version: 1
policy:
  max_tier: L4
  rules:
    - { priority: high, tier: L1, threshold_minutes: 120, next: L2 }
"#,
    )
    .unwrap();
    add_ticket(&dir, "low");

    tierwatch(&dir)
        .args(["run", "--now", THREE_HOURS_LATER])
        .assert()
        .success()
        .stdout(predicate::str::contains("ticket #1 skipped: no rule for low at L1"));
}

#[test]
fn run_rejects_malformed_now() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    tierwatch(&dir)
        .args(["run", "--now", "yesterday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected RFC 3339"));
}

#[test]
fn runs_list_records_each_run() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    add_ticket(&dir, "high");
    tierwatch(&dir)
        .args(["run", "--now", THREE_HOURS_LATER])
        .assert()
        .success();

    let runs = json_output(tierwatch(&dir).args(["runs", "list"]));
    assert_eq!(runs.as_array().unwrap().len(), 1);
    assert_eq!(runs[0]["state"], "completed");
    assert_eq!(runs[0]["summary"]["applied"], 1);
}

// ---------------------------------------------------------------------------
// tierwatch notify
// ---------------------------------------------------------------------------

#[test]
fn notify_drain_delivers_known_recipients_once() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    add_ticket(&dir, "high");
    tierwatch(&dir)
        .args(["run", "--now", THREE_HOURS_LATER])
        .assert()
        .success();

    let pending = json_output(tierwatch(&dir).args(["notify", "pending"]));
    assert_eq!(pending.as_array().unwrap().len(), 1);

    // Only the customer has an address in the default config.
    let report = json_output(tierwatch(&dir).args(["notify", "drain"]));
    assert_eq!(report["requests"], 1);
    assert_eq!(report["delivered"], 1);
    assert_eq!(report["skipped"], 2);

    let again = json_output(tierwatch(&dir).args(["notify", "drain"]));
    assert_eq!(again["requests"], 0);
}

// ---------------------------------------------------------------------------
// tierwatch policy
// ---------------------------------------------------------------------------

#[test]
fn policy_show_lists_default_ladder() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    let policy = json_output(tierwatch(&dir).args(["policy", "show"]));
    assert_eq!(policy["max_tier"], "L4");
    assert_eq!(policy["rules"].as_array().unwrap().len(), 12);
    assert!(policy["gaps"].as_array().unwrap().is_empty());
}

#[test]
fn policy_validate_warns_on_missing_owners() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    tierwatch(&dir)
        .args(["policy", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[warning] no default owner for L2"));
}

#[test]
fn policy_validate_fails_on_duplicate_rule() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    std::fs::write(
        dir.path().join(".tierwatch/config.yaml"),
        r#"version: 1
policy:
  rules:
    - { priority: high, tier: L1, threshold_minutes: 60, next: L2 }
    - { priority: high, tier: L1, threshold_minutes: 90, next: L2 }
"#,
    )
    .unwrap();

    tierwatch(&dir)
        .args(["policy", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("duplicate"))
        .stderr(predicate::str::contains("config validation found errors"));
}
