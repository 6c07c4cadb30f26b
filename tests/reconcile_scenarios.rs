//! End-to-end reconciliation passes against the in-memory aptly.
//!
//! cargo test --features integration-tests --test reconcile_scenarios

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use aptly_reconcile::config::{self, Config, Format, PublishKey};
use aptly_reconcile::error::Error;
use aptly_reconcile::fake::FakeAptly;
use aptly_reconcile::operation::Operation;
use aptly_reconcile::reconcile::{self, execute::execute, Options, Plan};
use aptly_reconcile::report::{RunSummary, Status, Warning};
use aptly_reconcile::resolver;
use aptly_reconcile::state::StateReader;

const NIGHTLY: &str = r#"
[mirror.repo1]
archive = "http://localhost:3123/repo1"
distribution = "main"
gpg-keys = ["2841988729C7F3FF", "7FAC5991ABCD1234"]

[snapshot."nightly-%T"]
mirror = "repo1"
timestamp = { time = "00:00" }
retention = { keep-count = 3 }

[[publish.stable]]
distribution = "main"
snapshots = [{ name = "nightly-%T", timestamp = "current" }]
"#;

fn load(content: &str) -> Config {
    config::parse(content, Format::Toml).unwrap()
}

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
}

fn options(now: DateTime<Utc>, refresh: bool) -> Options {
    Options { now, refresh }
}

fn plan_against(config: &Config, aptly: &Arc<FakeAptly>, options: &Options) -> Plan {
    let reader = StateReader::new(aptly.clone());
    let live = reader.live().unwrap();
    reconcile::plan(config, &live, options).unwrap()
}

/// Plan and execute one pass; returns the plan and what happened.
fn run_pass(config: &Config, aptly: &Arc<FakeAptly>, options: &Options) -> (Plan, RunSummary) {
    let reader = StateReader::new(aptly.clone());
    let live = reader.live().unwrap();
    let plan = reconcile::plan(config, &live, options).unwrap();
    let summary = execute(&plan, aptly.as_ref(), Some(&reader));
    (plan, summary)
}

/// Existing mirror with both keys trusted and daily instances `from..=to` of January 2024.
fn seeded(from: u32, to: u32) -> FakeAptly {
    let mut aptly = FakeAptly::new()
        .with_mirror("repo1", "http://localhost:3123/repo1", "main", &["main"])
        .with_gpg_key("2841988729C7F3FF")
        .with_gpg_key("7FAC5991ABCD1234");
    for day in from..=to {
        aptly = aptly.with_snapshot(&format!("nightly-202401{:02}T0000Z", day), &[]);
    }
    aptly
}

fn kinds(plan: &Plan) -> Vec<(&'static str, String)> {
    plan.operations()
        .into_iter()
        .map(|op| (op.kind(), op.target()))
        .collect()
}

fn kind_target(kind: &'static str, target: &str) -> (&'static str, String) {
    (kind, target.to_string())
}

#[test]
fn test_new_mirror_imports_keys_before_creation() {
    let config = load(
        r#"
[mirror.repo1]
archive = "http://localhost:3123/repo1"
distribution = "main"
gpg-keys = ["2841988729C7F3FF", "7FAC5991ABCD1234"]
"#,
    );
    let aptly = Arc::new(FakeAptly::new());
    let plan = plan_against(&config, &aptly, &options(at(2, 10, 30), false));

    assert_eq!(
        kinds(&plan),
        vec![
            kind_target("import-gpg-key", "2841988729C7F3FF"),
            kind_target("import-gpg-key", "7FAC5991ABCD1234"),
            kind_target("create-mirror", "repo1"),
            kind_target("update-mirror", "repo1"),
        ]
    );
}

#[test]
fn test_full_pass_on_empty_installation() {
    let config = load(NIGHTLY);
    let aptly = Arc::new(FakeAptly::new());
    let (plan, summary) = run_pass(&config, &aptly, &options(at(2, 10, 30), true));

    assert!(summary.is_success(), "{}", summary);
    assert_eq!(plan.operations().len(), 6);

    let live = aptly.live();
    assert!(live.mirrors.contains_key("repo1"));
    assert!(live.snapshots.contains_key("nightly-20240102T0000Z"));
    assert_eq!(
        live.publishes[&PublishKey::new("stable", "main")].snapshots(),
        vec!["nightly-20240102T0000Z"]
    );
    assert!(live.has_gpg_key("29C7F3FF"));
}

#[test]
fn test_rotation_deletes_oldest_beyond_keep_count() {
    let config = load(NIGHTLY);
    let aptly = Arc::new(seeded(1, 5));
    let (plan, summary) = run_pass(&config, &aptly, &options(at(6, 8, 0), false));

    assert!(summary.is_success(), "{}", summary);
    let deleted: Vec<String> = plan
        .operations()
        .into_iter()
        .filter(|op| op.kind() == "delete-snapshot")
        .map(Operation::target)
        .collect();
    assert_eq!(
        deleted,
        vec!["nightly-20240101T0000Z", "nightly-20240102T0000Z"]
    );
    assert_eq!(
        aptly.snapshot_names(),
        vec![
            "nightly-20240103T0000Z",
            "nightly-20240104T0000Z",
            "nightly-20240105T0000Z",
            "nightly-20240106T0000Z",
        ]
    );
}

#[test]
fn test_published_instance_is_withheld_until_switched() {
    let config = load(NIGHTLY);
    let aptly = Arc::new(
        seeded(2, 5).with_publish("stable", "main", &[("main", "nightly-20240102T0000Z")]),
    );
    let (plan, summary) = run_pass(&config, &aptly, &options(at(6, 8, 0), false));
    assert!(summary.is_success(), "{}", summary);

    // 0102 is still published while planning, so it survives this pass
    let ops = kinds(&plan);
    assert!(ops.contains(&kind_target("create-snapshot", "nightly-20240106T0000Z")));
    assert!(ops.contains(&kind_target("switch-publish", "stable/main")));
    assert!(!ops.iter().any(|(kind, _)| *kind == "delete-snapshot"));
    assert!(plan.warnings().any(|w| matches!(
        w,
        Warning::RetentionGuardSkipped { snapshot, .. } if snapshot == "nightly-20240102T0000Z"
    )));

    // The next rotation retires it along with the next oldest
    let (plan, summary) = run_pass(&config, &aptly, &options(at(7, 8, 0), false));
    assert!(summary.is_success(), "{}", summary);
    let deleted: Vec<String> = plan
        .operations()
        .into_iter()
        .filter(|op| op.kind() == "delete-snapshot")
        .map(Operation::target)
        .collect();
    assert_eq!(
        deleted,
        vec!["nightly-20240102T0000Z", "nightly-20240103T0000Z"]
    );
}

#[test]
fn test_publish_switches_to_current_instance() {
    let config = load(NIGHTLY);
    let aptly = Arc::new(
        seeded(1, 2).with_publish("stable", "main", &[("main", "nightly-20240101T0000Z")]),
    );
    let plan = plan_against(&config, &aptly, &options(at(2, 10, 30), false));

    let changes = plan.state_changing();
    assert_eq!(changes.len(), 1, "{}", plan);
    assert_eq!(
        changes[0],
        &Operation::SwitchPublish {
            key: PublishKey::new("stable", "main"),
            snapshots: vec!["nightly-20240102T0000Z".to_string()],
            components: vec!["main".to_string()],
            skip_contents: false,
        }
    );
}

#[test]
fn test_switch_archives_outgoing_snapshot() {
    let config = load(
        r#"
[mirror.repo1]
archive = "http://localhost:3123/repo1"
distribution = "main"

[snapshot."nightly-%T"]
mirror = "repo1"
timestamp = { time = "00:00" }

[[publish.stable]]
distribution = "main"
snapshots = [{ name = "nightly-%T", timestamp = "current", archive-on-update = "archived-nightly-%T" }]

[[publish.mirrored]]
distribution = "main"
publish = "stable/main"
"#,
    );
    let aptly = Arc::new(
        seeded(1, 2)
            .with_publish("stable", "main", &[("main", "nightly-20240101T0000Z")])
            .with_publish("mirrored", "main", &[("main", "nightly-20240101T0000Z")]),
    );
    let (plan, summary) = run_pass(&config, &aptly, &options(at(2, 10, 30), false));
    assert!(summary.is_success(), "{}", summary);

    // The publish of a publish reuses the archive made for its source
    assert_eq!(
        kinds(&plan),
        vec![
            kind_target("merge-snapshot", "archived-nightly-20240102T1030Z"),
            kind_target("switch-publish", "stable/main"),
            kind_target("switch-publish", "mirrored/main"),
        ]
    );

    let live = aptly.live();
    assert!(live.has_dependency("archived-nightly-20240102T1030Z", "nightly-20240101T0000Z"));
    assert_eq!(
        live.publishes[&PublishKey::new("mirrored", "main")].snapshots(),
        vec!["nightly-20240102T0000Z"]
    );
}

#[test]
fn test_undefined_merge_source_plans_nothing() {
    let config = load(
        r#"
[mirror.a]
archive = "http://localhost:3123/a"
distribution = "main"

[snapshot.A]
mirror = "a"

[snapshot.merged]
merge = ["A", "B"]
"#,
    );
    let aptly = Arc::new(FakeAptly::new());
    let reader = StateReader::new(aptly.clone());
    let live = reader.live().unwrap();

    match reconcile::plan(&config, &live, &options(at(2, 10, 30), true)) {
        Err(Error::ConfigReference { entity, missing }) => {
            assert_eq!(entity, "snapshot merged");
            assert_eq!(missing, "snapshot B");
        }
        other => panic!("Expected ConfigReference, got {:?}", other),
    }
    assert!(aptly.executed().is_empty());
}

#[test]
fn test_merge_cycle_is_rejected() {
    let config = load(
        r#"
[snapshot.a]
merge = ["b"]

[snapshot.b]
merge = ["a"]
"#,
    );
    let aptly = Arc::new(FakeAptly::new());
    let reader = StateReader::new(aptly);
    let live = reader.live().unwrap();

    let result = reconcile::plan(&config, &live, &options(at(2, 10, 30), true));
    assert!(matches!(result, Err(Error::CycleDetected { .. })), "{:?}", result);
}

#[test]
fn test_second_pass_converges() {
    let config = load(NIGHTLY);
    let aptly = Arc::new(FakeAptly::new());
    let now = at(2, 10, 30);

    let (_, first) = run_pass(&config, &aptly, &options(now, true));
    assert!(first.is_success(), "{}", first);

    let again = plan_against(&config, &aptly, &options(now, false));
    assert!(again.converged(), "{}", again);
    assert!(again.operations().is_empty());

    // With refresh on, only the mirror update is left
    let refreshed = plan_against(&config, &aptly, &options(now, true));
    assert!(refreshed.converged());
    assert_eq!(kinds(&refreshed), vec![kind_target("update-mirror", "repo1")]);
}

#[test]
fn test_planning_is_deterministic() {
    let content = r#"
[mirror.b]
archive = "http://localhost:3123/b"
distribution = "main"

[mirror.a]
archive = "http://localhost:3123/a"
distribution = "main"

[snapshot."b-%T"]
mirror = "b"
timestamp = { time = "00:00" }

[snapshot."a-%T"]
mirror = "a"
timestamp = { time = "00:00" }

[snapshot."both-%T"]
merge = ["a-%T", "b-%T"]
timestamp = { time = "00:00" }

[[publish.both]]
snapshots = ["both-%T"]
"#;
    let aptly = Arc::new(FakeAptly::new());
    let opts = options(at(2, 10, 30), true);

    let first = plan_against(&load(content), &aptly, &opts);
    for _ in 0..5 {
        let config = load(content);
        assert_eq!(resolver::order(&config).unwrap(), resolver::order(&load(content)).unwrap());
        assert_eq!(plan_against(&config, &aptly, &opts), first);
    }
    assert_eq!(first.to_string(), plan_against(&load(content), &aptly, &opts).to_string());
}

#[test]
fn test_published_and_source_snapshots_survive_retention() {
    let config = load(
        r#"
[mirror.repo1]
archive = "http://localhost:3123/repo1"
distribution = "main"

[snapshot."nightly-%T"]
mirror = "repo1"
timestamp = { time = "00:00" }
retention = { keep-count = 3 }

[[publish.stable]]
distribution = "main"
snapshots = ["nightly-%T"]
automatic-update = false
"#,
    );
    let aptly = Arc::new(
        seeded(1, 5)
            .with_publish("stable", "main", &[("main", "nightly-20240101T0000Z")])
            .with_snapshot("hotfix", &["nightly-20240102T0000Z"]),
    );
    let (plan, summary) = run_pass(&config, &aptly, &options(at(6, 8, 0), false));
    assert!(summary.is_success(), "{}", summary);

    assert!(!plan
        .operations()
        .into_iter()
        .any(|op| matches!(op, Operation::DeleteSnapshot { .. })));
    let withheld: Vec<&str> = plan
        .warnings()
        .filter_map(|w| match w {
            Warning::RetentionGuardSkipped { snapshot, .. } => Some(snapshot.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(withheld, vec!["nightly-20240101T0000Z", "nightly-20240102T0000Z"]);
    assert!(plan
        .warnings()
        .any(|w| matches!(w, Warning::PublishPinned { .. })));

    let names = aptly.snapshot_names();
    assert!(names.contains(&"nightly-20240101T0000Z".to_string()));
    assert!(names.contains(&"nightly-20240102T0000Z".to_string()));
}

#[test]
fn test_failed_mirror_skips_dependents() {
    let config = load(NIGHTLY);
    let aptly = Arc::new(FakeAptly::new().fail_on(
        "create-mirror",
        "repo1",
        "ERROR: unable to fetch mirror: network unreachable",
    ));
    let (_, summary) = run_pass(&config, &aptly, &options(at(2, 10, 30), true));

    assert!(!summary.is_success());
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.completed().count(), 2);
    assert_eq!(summary.failed().count(), 1);

    let skipped: Vec<(&str, String)> = summary
        .skipped()
        .map(|r| match &r.status {
            Status::Skipped { reason } => (r.operation.kind(), reason.clone()),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(
        skipped,
        vec![
            ("update-mirror", "earlier operation failed".to_string()),
            ("create-snapshot", "dependency failed: mirror repo1".to_string()),
            ("create-publish", "dependency failed: snapshot nightly-%T".to_string()),
        ]
    );

    let errors = summary.errors();
    assert!(errors[0].to_string().contains("network unreachable"));
    assert!(aptly.live().snapshots.is_empty());
}

#[test]
fn test_failed_publish_does_not_block_independent_entities() {
    let config = load(
        r#"
[mirror.a]
archive = "http://localhost:3123/a"
distribution = "main"

[mirror.b]
archive = "http://localhost:3123/b"
distribution = "main"

[snapshot.a-snap]
mirror = "a"

[snapshot.b-snap]
mirror = "b"

[[publish.a]]
snapshots = ["a-snap"]

[[publish.b]]
snapshots = ["b-snap"]
"#,
    );
    let aptly = Arc::new(FakeAptly::new().fail_on(
        "create-publish",
        "a/main",
        "ERROR: unable to sign: gpg failed",
    ));
    let (_, summary) = run_pass(&config, &aptly, &options(at(2, 10, 30), false));

    assert!(!summary.is_success());
    assert_eq!(summary.failed().count(), 1);
    assert_eq!(summary.skipped().count(), 0);

    let live = aptly.live();
    assert!(!live.publishes.contains_key(&PublishKey::new("a", "main")));
    assert_eq!(
        live.publishes[&PublishKey::new("b", "main")].snapshots(),
        vec!["b-snap"]
    );
}

#[test]
fn test_publish_of_pinned_publish_is_not_switched() {
    let config = load(
        r#"
[mirror.repo1]
archive = "http://localhost:3123/repo1"
distribution = "main"

[snapshot."nightly-%T"]
mirror = "repo1"
timestamp = { time = "00:00" }

[[publish.root]]
distribution = "main"
snapshots = ["nightly-%T"]
automatic-update = false

[[publish.copy]]
distribution = "main"
publish = "root/main"
"#,
    );
    let aptly = Arc::new(
        seeded(1, 1)
            .with_publish("root", "main", &[("main", "nightly-20240101T0000Z")])
            .with_publish("copy", "main", &[("main", "nightly-20240101T0000Z")]),
    );
    let (plan, summary) = run_pass(&config, &aptly, &options(at(2, 10, 30), false));
    assert!(summary.is_success(), "{}", summary);

    assert_eq!(
        kinds(&plan),
        vec![kind_target("create-snapshot", "nightly-20240102T0000Z")]
    );
    assert!(plan
        .warnings()
        .any(|w| matches!(w, Warning::PublishPinned { publish, .. } if publish == &PublishKey::new("root", "main"))));

    let live = aptly.live();
    assert_eq!(
        live.publishes[&PublishKey::new("copy", "main")].snapshots(),
        live.publishes[&PublishKey::new("root", "main")].snapshots()
    );
}

#[test]
fn test_rotating_snapshot_picks_up_refreshed_mirror() {
    let config = load(
        r#"
[mirror.repo1]
archive = "http://localhost:3123/repo1"
distribution = "main"

[snapshot.repo1-current]
mirror = "repo1"
rotate = true

[[publish.stable]]
distribution = "main"
snapshots = ["repo1-current"]
"#,
    );
    let aptly = Arc::new(
        seeded(1, 0)
            .with_snapshot("repo1-current", &[])
            .with_publish("stable", "main", &[("main", "repo1-current")]),
    );
    let (plan, summary) = run_pass(&config, &aptly, &options(at(2, 10, 30), true));
    assert!(summary.is_success(), "{}", summary);

    assert_eq!(
        kinds(&plan),
        vec![
            kind_target("update-mirror", "repo1"),
            kind_target("rename-snapshot", "repo1-current"),
            kind_target("create-snapshot", "repo1-current"),
            kind_target("switch-publish", "stable/main"),
        ]
    );

    let live = aptly.live();
    assert!(live.snapshots.contains_key("repo1-current-rotated-20240102T1030Z"));
    assert_eq!(
        live.publishes[&PublishKey::new("stable", "main")].snapshots(),
        vec!["repo1-current"]
    );

    // Without refresh nothing is rebuilt and the state is converged
    let again = plan_against(&config, &aptly, &options(at(2, 11, 0), false));
    assert!(again.converged(), "{}", again);
}
