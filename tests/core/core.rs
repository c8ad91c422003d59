use hivemined::core::broker::read_audit_log;
use hivemined::core::config::{Config, LogFormat};
use hivemined::core::engine::{ContainerEngine, EngineCall, InMemoryEngine};
use hivemined::core::entity::{Entity, EntityDetail, EntityKind, EntityRef, LifecycleState};
use hivemined::core::error::{EntityError, HiveError, PersistenceError};
use hivemined::core::hive::Hive;
use hivemined::core::image::ImageRef;
use hivemined::core::logging;
use hivemined::core::registry::Registry;
use hivemined::core::store::{MemoryStore, PersistenceAdapter, Record, SqliteStore};
use hivemined::plugins::coordinator::adopt;
use hivemined::plugins::drone::launch;
use hivemined::plugins::worker::{WorkerSpec, create_worker, worker_ref};
use serde_json::json;
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

fn baseline(name: &str) -> Entity {
    Entity::new(name, ImageRef::new("vanilla"), EntityDetail::Baseline, "hivemined")
        .unwrap()
        .with_command(["true"])
}

fn baseline_key(name: &str) -> EntityRef {
    EntityRef::new(EntityKind::Baseline, name)
}

#[test]
fn test_sqlite_state_survives_reopen_and_resets_stale_ids() {
    let tmp = tempdir().expect("tempdir");
    let engine = Arc::new(InMemoryEngine::new().with_local_image("vanilla"));

    let id = {
        let store = Arc::new(SqliteStore::open(tmp.path()).expect("open store"));
        let hive = Hive::open(engine.clone(), store, Config::default()).unwrap();
        hive.create(baseline("vanilla")).unwrap();
        hive.create(baseline("paper")).unwrap();
        let started = hive.start(&baseline_key("vanilla")).unwrap();
        started.runtime_id().unwrap().to_string()
    };
    assert!(engine.remove_externally(&id));

    let store = Arc::new(SqliteStore::open(tmp.path()).expect("reopen store"));
    let hive = Hive::open(engine.clone(), store.clone(), Config::default()).unwrap();
    let vanilla = hive.get(&baseline_key("vanilla")).unwrap().unwrap();
    let paper = hive.get(&baseline_key("paper")).unwrap().unwrap();
    assert_eq!(vanilla.state(), LifecycleState::Absent);
    assert_eq!(paper.state(), LifecycleState::Created);

    let persisted = store.get("baseline/vanilla").unwrap().unwrap();
    assert!(persisted.body["runtime"].is_null());

    let events = read_audit_log(store.audit_log_path()).unwrap();
    assert!(events.iter().any(|e| e.op == "records.init"));
    assert!(
        events
            .iter()
            .any(|e| e.op == "records.put" && e.record_key.as_deref() == Some("baseline/vanilla"))
    );
    assert!(events.iter().all(|e| e.status == "success"));
}

#[test]
fn test_registry_skips_foreign_and_corrupt_records() {
    let store = Arc::new(MemoryStore::new());
    let good = baseline("vanilla");
    store
        .put(&Record::new(
            good.key(),
            "baseline",
            serde_json::to_value(&good).unwrap(),
        ))
        .unwrap();
    store
        .put(&Record::new("baseline/broken", "baseline", json!({"name": 7})))
        .unwrap();
    store
        .put(&Record::new("baseline/odd", "worker", json!({})))
        .unwrap();

    let registry = Registry::load(EntityKind::Baseline, store).unwrap();
    assert_eq!(registry.names().unwrap(), vec!["vanilla".to_string()]);
}

#[test]
fn test_commit_failure_surfaces_and_keeps_memory_state() {
    let engine = Arc::new(InMemoryEngine::new().with_local_image("vanilla"));
    let store = Arc::new(MemoryStore::new());
    let hive = Hive::open(engine.clone(), store.clone(), Config::default()).unwrap();
    hive.create(baseline("vanilla")).unwrap();

    store.set_read_only(true);
    let err = hive.start(&baseline_key("vanilla")).unwrap_err();
    assert!(matches!(err, HiveError::Persistence(PersistenceError::Io(_))));

    let entity = hive.get(&baseline_key("vanilla")).unwrap().unwrap();
    assert_eq!(entity.state(), LifecycleState::Running);
    let persisted = store.get("baseline/vanilla").unwrap().unwrap();
    assert_eq!(persisted.body["runtime"]["status"], "created");
}

#[test]
fn test_dependency_cycle_is_reported() {
    let engine = Arc::new(InMemoryEngine::new().with_local_image("vanilla"));
    let hive = Hive::open(engine.clone(), Arc::new(MemoryStore::new()), Config::default()).unwrap();
    let registry = hive.registry(EntityKind::Baseline);
    registry
        .insert_new(baseline("a").with_dependents(vec![baseline_key("b")]))
        .unwrap();
    registry
        .insert_new(baseline("b").with_dependents(vec![baseline_key("a")]))
        .unwrap();

    let err = hive.start(&baseline_key("a")).unwrap_err();
    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::DependencyCycle { .. })
    ));
    assert_eq!(
        engine.count_calls(|c| matches!(c, EngineCall::CreateContainer { .. })),
        0
    );
}

#[test]
fn test_missing_dependency_record_fails_create() {
    let engine = Arc::new(InMemoryEngine::new().with_local_image("vanilla"));
    let hive = Hive::open(engine.clone(), Arc::new(MemoryStore::new()), Config::default()).unwrap();
    let err = hive
        .create(baseline("top").with_dependents(vec![baseline_key("nowhere")]))
        .unwrap_err();

    match &err {
        HiveError::Dependency(dep) => assert_eq!(dep.dependency, "nowhere"),
        other => panic!("expected dependency error, got {other:?}"),
    }
    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::Missing { .. })
    ));
    assert_eq!(engine.container_count(), 0);
    assert!(hive.get(&baseline_key("top")).unwrap().is_none());
}

#[test]
fn test_concurrent_starts_share_one_dependency() {
    let engine = Arc::new(InMemoryEngine::new().with_local_image("vanilla"));
    let hive = Arc::new(
        Hive::open(engine.clone(), Arc::new(MemoryStore::new()), Config::default()).unwrap(),
    );
    let registry = hive.registry(EntityKind::Baseline);
    registry.insert_new(baseline("shared")).unwrap();
    for name in ["left", "right"] {
        registry
            .insert_new(baseline(name).with_dependents(vec![baseline_key("shared")]))
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|name| {
            let hive = hive.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                hive.start(&baseline_key(name))
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(
            handle.join().unwrap().unwrap().state(),
            LifecycleState::Running
        );
    }

    let shared = hive.get(&baseline_key("shared")).unwrap().unwrap();
    let shared_id = shared.runtime_id().unwrap().to_string();
    assert_eq!(
        engine.count_calls(|c| matches!(c, EngineCall::StartContainer(id) if *id == shared_id)),
        1
    );
    assert_eq!(engine.container_count(), 3);
}

#[test]
fn test_config_file_and_overrides() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("hivemined.toml");
    fs::write(
        &path,
        r#"
[labels]
prefix = "hive"

[coordinator]
name = "overseer"

[images.worker]
name = "example/worker"
tag = "17"

[logging]
level = "debug"
format = "json"
"#,
    )
    .unwrap();

    let mut config = Config::load(&path).unwrap();
    config.apply_overrides(|key| match key {
        "HIVEMINED_ENGINE_HOST" => Some("unix:///run/podman.sock".to_string()),
        _ => None,
    });
    config.validate().unwrap();

    assert_eq!(config.labels.prefix, "hive");
    assert_eq!(config.coordinator.name, "overseer");
    assert_eq!(config.images.worker.to_image_ref().reference(), "example/worker:17");
    assert_eq!(config.images.drone.name, "hivemined/drone");
    assert_eq!(config.engine.host.as_deref(), Some("unix:///run/podman.sock"));
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(
        logging::filter_directive(&config.logging, |_| None),
        "debug"
    );
}

#[test]
fn test_malformed_config_is_rejected() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("hivemined.toml");
    fs::write(&path, "[labels\nprefix = ").unwrap();
    assert!(matches!(Config::load(&path), Err(HiveError::Config(_))));
}

#[test]
fn test_custom_label_prefix_reaches_engine() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("hivemined.toml");
    fs::write(&path, "[labels]\nprefix = \"hive\"\n").unwrap();
    let config = Config::load(&path).unwrap();

    let engine = Arc::new(InMemoryEngine::new().with_local_image("vanilla"));
    let hive = Hive::open(engine.clone(), Arc::new(MemoryStore::new()), config).unwrap();
    let entity = Entity::new(
        "vanilla",
        ImageRef::new("vanilla"),
        EntityDetail::Baseline,
        hive.label_prefix(),
    )
    .unwrap();
    hive.create(entity).unwrap();

    let listed = engine.list_containers("hive.baseline").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed[0].labels.get("hive.baseline").map(String::as_str),
        Some("vanilla")
    );
}

#[test]
fn test_dry_run_hive_plans_a_full_session() {
    let tmp = tempdir().expect("tempdir");
    let hive = hivemined::open_hive(Config::default(), tmp.path(), true).unwrap();

    let queen = adopt(&hive).unwrap();
    assert_eq!(queen.state(), LifecycleState::Running);

    let worker = create_worker(&hive, WorkerSpec::new(&hive, "alpha", "paper")).unwrap();
    assert_eq!(worker.state(), LifecycleState::Created);
    let started = hive.start(&worker_ref("alpha")).unwrap();
    assert_eq!(started.state(), LifecycleState::Running);

    let drone = launch(&hive, "backup", None, worker_ref("alpha")).unwrap();
    assert_eq!(drone.state(), LifecycleState::Running);
    assert!(fs::read_dir(tmp.path()).unwrap().next().is_none());
}
