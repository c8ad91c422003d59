use hivemined::core::config::Config;
use hivemined::core::engine::{ContainerStatus, EngineCall, InMemoryEngine};
use hivemined::core::entity::{DroneTask, EntityDetail, EntityKind, LifecycleState};
use hivemined::core::error::{EntityError, HiveError};
use hivemined::core::hive::Hive;
use hivemined::core::store::MemoryStore;
use hivemined::plugins::coordinator::{adopt, coordinator_ref};
use hivemined::plugins::drone::{launch, prune};
use hivemined::plugins::worker::{WorkerSpec, create_worker, worker_ref};
use std::sync::Arc;

struct Fixture {
    engine: Arc<InMemoryEngine>,
    hive: Hive,
    queen_id: String,
}

fn fixture() -> Fixture {
    let engine = Arc::new(
        InMemoryEngine::new()
            .with_local_image("hivemined/worker")
            .with_local_image("hivemined/drone")
            .with_local_image("vanilla"),
    );
    let queen_id =
        engine.add_external_container("hivemined.coordinator", "queen", ContainerStatus::Running);
    let hive = Hive::open(engine.clone(), Arc::new(MemoryStore::new()), Config::default()).unwrap();
    create_worker(&hive, WorkerSpec::new(&hive, "alpha", "vanilla")).unwrap();
    engine.clear_calls();
    Fixture {
        engine,
        hive,
        queen_id,
    }
}

#[test]
fn test_backup_drone_mounts_coordinator_then_target() {
    let Fixture {
        engine,
        hive,
        queen_id,
    } = fixture();
    let drone = launch(&hive, "backup", None, worker_ref("alpha")).unwrap();

    assert_eq!(drone.state(), LifecycleState::Running);
    assert_eq!(drone.command, vec!["backup".to_string()]);
    assert!(drone.name.starts_with("drone-backup-alpha-"));

    let drone_creates = engine.count_calls(
        |c| matches!(c, EngineCall::CreateContainer { name, .. } if name.contains("drone-backup-alpha")),
    );
    assert_eq!(drone_creates, 1);
    let drone_id = drone.runtime_id().unwrap().to_string();
    assert_eq!(
        engine.count_calls(|c| matches!(c, EngineCall::StartContainer(id) if *id == drone_id)),
        1
    );

    let queen = hive.get(&coordinator_ref(&hive)).unwrap().unwrap();
    let alpha = hive.get(&worker_ref("alpha")).unwrap().unwrap();
    assert_eq!(queen.runtime_id(), Some(queen_id.as_str()));
    assert_eq!(queen.state(), LifecycleState::Running);
    assert_eq!(alpha.state(), LifecycleState::Running);

    let request = engine.create_request(&drone_id).unwrap();
    assert_eq!(
        request.mounts,
        vec![queen_id, alpha.runtime_id().unwrap().to_string()]
    );
}

#[test]
fn test_restore_passes_backup_path() {
    let Fixture { hive, .. } = fixture();
    let drone = launch(
        &hive,
        "restore",
        Some("/backups/alpha.tar.gz"),
        worker_ref("alpha"),
    )
    .unwrap();
    assert_eq!(
        drone.command,
        vec!["restore".to_string(), "/backups/alpha.tar.gz".to_string()]
    );
    assert!(matches!(
        drone.detail,
        EntityDetail::Drone {
            task: DroneTask::Restore { .. },
            ..
        }
    ));
}

#[test]
fn test_restore_without_path_touches_nothing() {
    let Fixture { engine, hive, .. } = fixture();
    let err = launch(&hive, "restore", Some("  "), worker_ref("alpha")).unwrap_err();

    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::InvalidTask { .. })
    ));
    assert!(engine.calls().is_empty());
    assert!(hive.list(EntityKind::Drone).unwrap().is_empty());
}

#[test]
fn test_unknown_task_is_rejected() {
    let Fixture { engine, hive, .. } = fixture();
    let err = launch(&hive, "migrate", None, worker_ref("alpha")).unwrap_err();
    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::InvalidTask { .. })
    ));
    assert!(engine.calls().is_empty());
}

#[test]
fn test_missing_coordinator_container_fails_dependency() {
    let engine = Arc::new(
        InMemoryEngine::new()
            .with_local_image("hivemined/worker")
            .with_local_image("hivemined/drone")
            .with_local_image("vanilla"),
    );
    let hive = Hive::open(engine.clone(), Arc::new(MemoryStore::new()), Config::default()).unwrap();
    create_worker(&hive, WorkerSpec::new(&hive, "alpha", "vanilla")).unwrap();

    let err = launch(&hive, "backup", None, worker_ref("alpha")).unwrap_err();
    match &err {
        HiveError::Dependency(dep) => assert_eq!(dep.dependency, "queen"),
        other => panic!("expected dependency error, got {other:?}"),
    }
    assert!(hive.list(EntityKind::Drone).unwrap().is_empty());
}

#[test]
fn test_coordinator_refuses_lifecycle_operations() {
    let Fixture { engine, hive, .. } = fixture();
    launch(&hive, "backup", None, worker_ref("alpha")).unwrap();
    let queen = coordinator_ref(&hive);
    engine.clear_calls();

    for result in [hive.start(&queen), hive.stop(&queen), hive.restart(&queen)] {
        let err = result.unwrap_err();
        assert!(matches!(
            err.root_entity_error(),
            Some(EntityError::Unsupported { .. })
        ));
    }
    assert!(matches!(
        hive.delete(&queen, false).unwrap_err().root_entity_error(),
        Some(EntityError::Unsupported { .. })
    ));
    assert!(engine.mutating_calls().is_empty());
}

#[test]
fn test_prune_removes_finished_drones() {
    let Fixture { engine, hive, .. } = fixture();
    let drone = launch(&hive, "backup", None, worker_ref("alpha")).unwrap();
    let drone_id = drone.runtime_id().unwrap().to_string();

    let report = prune(&hive, true).unwrap();
    assert!(report.removed.is_empty());

    engine.set_status(&drone_id, ContainerStatus::Exited);
    let report = prune(&hive, false).unwrap();
    assert!(report.removed.is_empty());

    let report = prune(&hive, true).unwrap();
    assert_eq!(report.removed, vec![drone.name.clone()]);
    assert!(!engine.container_exists(&drone_id));
    assert!(hive.list(EntityKind::Drone).unwrap().is_empty());
}

#[test]
fn test_coordinator_adoption_is_idempotent() {
    let Fixture {
        engine,
        hive,
        queen_id,
    } = fixture();
    let first = adopt(&hive).unwrap();
    let second = adopt(&hive).unwrap();

    assert_eq!(first.runtime_id(), Some(queen_id.as_str()));
    assert_eq!(second.runtime_id(), first.runtime_id());
    assert!(engine.mutating_calls().is_empty());
}
