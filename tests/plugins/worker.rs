use hivemined::core::config::Config;
use hivemined::core::engine::{ContainerStatus, EngineCall, InMemoryEngine, memory::FailOp};
use hivemined::core::entity::{EntityKind, LifecycleState, PortPolicy};
use hivemined::core::error::{EntityError, HiveError};
use hivemined::core::hive::Hive;
use hivemined::core::store::MemoryStore;
use hivemined::plugins::baseline::baseline_ref;
use hivemined::plugins::worker::{
    SERVER_PORT, WorkerSpec, companion_name, create_worker, delete_worker, list_workers,
    open_shell, send_command, worker_ref,
};
use std::sync::{Arc, Barrier};
use std::thread;

fn test_config() -> Config {
    let mut config = Config::default();
    config.images.worker.build_path = None;
    config
}

fn test_hive() -> (Arc<InMemoryEngine>, Arc<MemoryStore>, Hive) {
    let engine = Arc::new(
        InMemoryEngine::new()
            .with_local_image("hivemined/worker")
            .with_remote_image("hivemined/worker")
            .with_local_image("vanilla"),
    );
    let store = Arc::new(MemoryStore::new());
    let hive = Hive::open(engine.clone(), store.clone(), test_config()).unwrap();
    (engine, store, hive)
}

fn create_alpha(hive: &Hive) {
    create_worker(hive, WorkerSpec::new(hive, "alpha", "vanilla")).unwrap();
}

#[test]
fn test_create_worker_on_unregistered_baseline() {
    let (engine, _store, hive) = test_hive();
    let worker = create_worker(&hive, WorkerSpec::new(&hive, "alpha", "vanilla")).unwrap();
    assert_eq!(worker.state(), LifecycleState::Created);

    let data = hive.get(&worker_ref("alpha-data")).unwrap().unwrap();
    let comb = hive.get(&baseline_ref("vanilla")).unwrap().unwrap();
    assert_eq!(comb.state(), LifecycleState::Running);
    assert_eq!(data.state(), LifecycleState::Created);
    assert!(data.is_storage_only());

    let request = engine.create_request(worker.runtime_id().unwrap()).unwrap();
    assert_eq!(
        request.mounts,
        vec![
            data.runtime_id().unwrap().to_string(),
            comb.runtime_id().unwrap().to_string()
        ]
    );
    assert_eq!(
        request.labels.get("hivemined.worker").map(String::as_str),
        Some("alpha")
    );
}

#[test]
fn test_create_worker_binds_requested_port() {
    let (engine, _store, hive) = test_hive();
    let mut spec = WorkerSpec::new(&hive, "alpha", "vanilla");
    spec.port = Some(25570);
    let worker = create_worker(&hive, spec).unwrap();
    let request = engine.create_request(worker.runtime_id().unwrap()).unwrap();
    assert_eq!(
        request.ports,
        PortPolicy::Bind {
            host: 25570,
            container: SERVER_PORT
        }
    );
}

#[test]
fn test_create_worker_without_data_mounts_only_baseline() {
    let (engine, _store, hive) = test_hive();
    let mut spec = WorkerSpec::new(&hive, "alpha", "vanilla");
    spec.data = false;
    let worker = create_worker(&hive, spec).unwrap();
    assert!(hive.get(&worker_ref("alpha-data")).unwrap().is_none());
    let request = engine.create_request(worker.runtime_id().unwrap()).unwrap();
    assert_eq!(request.mounts.len(), 1);
}

#[test]
fn test_start_running_worker_makes_no_engine_calls() {
    let (engine, _store, hive) = test_hive();
    create_alpha(&hive);
    hive.start(&worker_ref("alpha")).unwrap();
    engine.clear_calls();

    let worker = hive.start(&worker_ref("alpha")).unwrap();
    assert_eq!(worker.state(), LifecycleState::Running);
    assert!(engine.calls().is_empty());
}

#[test]
fn test_delete_with_volumes_removes_worker_and_companion() {
    let (engine, _store, hive) = test_hive();
    create_alpha(&hive);
    let worker = hive.start(&worker_ref("alpha")).unwrap();
    let data = hive.get(&worker_ref("alpha-data")).unwrap().unwrap();

    delete_worker(&hive, "alpha", true).unwrap();
    assert!(!engine.container_exists(worker.runtime_id().unwrap()));
    assert!(!engine.container_exists(data.runtime_id().unwrap()));
    assert!(hive.get(&worker_ref("alpha")).unwrap().is_none());
    assert!(hive.get(&worker_ref("alpha-data")).unwrap().is_none());
    assert_eq!(
        engine.count_calls(|c| matches!(
            c,
            EngineCall::RemoveContainer {
                with_volumes: true,
                ..
            }
        )),
        2
    );
    assert!(hive.get(&baseline_ref("vanilla")).unwrap().is_some());
}

#[test]
fn test_delete_keep_data_leaves_companion() {
    let (engine, _store, hive) = test_hive();
    create_alpha(&hive);
    delete_worker(&hive, "alpha", false).unwrap();
    let data = hive.get(&worker_ref("alpha-data")).unwrap().unwrap();
    assert!(engine.container_exists(data.runtime_id().unwrap()));
}

#[test]
fn test_companion_cannot_be_deleted_directly() {
    let (_engine, _store, hive) = test_hive();
    create_alpha(&hive);
    let err = delete_worker(&hive, &companion_name("alpha"), true).unwrap_err();
    assert!(matches!(err, HiveError::Validation(_)));
}

#[test]
fn test_delete_failure_keeps_record() {
    let (engine, _store, hive) = test_hive();
    create_alpha(&hive);
    engine.fail_on(FailOp::Remove);
    let err = delete_worker(&hive, "alpha", true).unwrap_err();
    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::DeleteFailed { .. })
    ));
    assert!(hive.get(&worker_ref("alpha")).unwrap().is_some());
}

#[test]
fn test_companion_deletion_failure_does_not_bring_worker_back() {
    let (engine, _store, hive) = test_hive();
    create_alpha(&hive);
    let worker = hive.start(&worker_ref("alpha")).unwrap();
    let data = hive.get(&worker_ref("alpha-data")).unwrap().unwrap();
    let data_id = data.runtime_id().unwrap().to_string();
    engine.fail_on_container(FailOp::Remove, &data_id);

    let err = delete_worker(&hive, "alpha", true).unwrap_err();
    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::DeleteFailed { name, .. }) if name == "alpha-data"
    ));
    assert!(hive.get(&worker_ref("alpha")).unwrap().is_none());
    assert!(!engine.container_exists(worker.runtime_id().unwrap()));

    let data = hive.get(&worker_ref("alpha-data")).unwrap().unwrap();
    assert_eq!(data.runtime_id(), Some(data_id.as_str()));
    assert!(engine.container_exists(&data_id));
}

#[test]
fn test_companion_is_never_run_as_a_service() {
    let (engine, _store, hive) = test_hive();
    create_alpha(&hive);
    let data = worker_ref(&companion_name("alpha"));
    engine.clear_calls();

    for result in [hive.start(&data), hive.stop(&data), hive.restart(&data), hive.update(&data)] {
        assert!(matches!(
            result.unwrap_err().root_entity_error(),
            Some(EntityError::Unsupported { .. })
        ));
    }
    let args = vec!["say".to_string()];
    assert!(matches!(
        send_command(&hive, "alpha-data", &args).unwrap_err().root_entity_error(),
        Some(EntityError::Unsupported { .. })
    ));
    assert!(matches!(
        open_shell(&hive, "alpha-data").unwrap_err().root_entity_error(),
        Some(EntityError::Unsupported { .. })
    ));
    assert!(engine.mutating_calls().is_empty());
    assert_eq!(
        hive.get(&data).unwrap().unwrap().state(),
        LifecycleState::Created
    );
}

#[test]
fn test_send_command_requires_running_worker() {
    let (engine, _store, hive) = test_hive();
    create_alpha(&hive);
    let args = vec!["say".to_string(), "hello".to_string()];

    let err = send_command(&hive, "alpha", &args).unwrap_err();
    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::CommandFailed { .. })
    ));
    assert_eq!(
        engine.count_calls(|c| matches!(c, EngineCall::Exec { .. })),
        0
    );

    hive.start(&worker_ref("alpha")).unwrap();
    assert_eq!(send_command(&hive, "alpha", &args).unwrap(), "cmd say hello");
    open_shell(&hive, "alpha").unwrap();
    assert_eq!(
        engine.count_calls(|c| matches!(
            c,
            EngineCall::Exec {
                interactive: true,
                ..
            }
        )),
        1
    );
}

#[test]
fn test_update_replaces_container_and_keeps_running() {
    let (engine, _store, hive) = test_hive();
    create_alpha(&hive);
    let before = hive.start(&worker_ref("alpha")).unwrap();
    let old_id = before.runtime_id().unwrap().to_string();

    let after = hive.update(&worker_ref("alpha")).unwrap();
    assert_eq!(after.state(), LifecycleState::Running);
    assert_ne!(after.runtime_id().unwrap(), old_id);
    assert!(!engine.container_exists(&old_id));
    assert!(engine.container_exists(after.runtime_id().unwrap()));
}

#[test]
fn test_failed_update_keeps_old_container_tracked() {
    let (engine, _store, hive) = test_hive();
    create_alpha(&hive);
    let before = hive.start(&worker_ref("alpha")).unwrap();
    let old_id = before.runtime_id().unwrap().to_string();
    let containers = engine.container_count();
    engine.fail_on(FailOp::Stop);

    let err = hive.update(&worker_ref("alpha")).unwrap_err();
    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::DeleteFailed { .. })
    ));
    let after = hive.get(&worker_ref("alpha")).unwrap().unwrap();
    assert_eq!(after.runtime_id(), Some(old_id.as_str()));
    assert_eq!(after.state(), LifecycleState::Running);
    assert!(engine.container_exists(&old_id));
    assert_eq!(engine.container_count(), containers);
}

#[test]
fn test_stale_worker_is_recreated_on_start() {
    let (engine, store, hive) = test_hive();
    create_alpha(&hive);
    let stale = hive.get(&worker_ref("alpha")).unwrap().unwrap();
    drop(hive);

    engine.remove_externally(stale.runtime_id().unwrap());
    let hive = Hive::open(engine.clone(), store, test_config()).unwrap();
    assert_eq!(
        hive.get(&worker_ref("alpha")).unwrap().unwrap().state(),
        LifecycleState::Absent
    );
    let worker = hive.start(&worker_ref("alpha")).unwrap();
    assert_eq!(worker.state(), LifecycleState::Running);
    assert_ne!(worker.runtime_id(), stale.runtime_id());
}

#[test]
fn test_externally_stopped_worker_is_refreshed() {
    let (engine, store, hive) = test_hive();
    create_alpha(&hive);
    let worker = hive.start(&worker_ref("alpha")).unwrap();
    engine.set_status(worker.runtime_id().unwrap(), ContainerStatus::Exited);
    drop(hive);

    let hive = Hive::open(engine, store, test_config()).unwrap();
    assert_eq!(
        hive.get(&worker_ref("alpha")).unwrap().unwrap().state(),
        LifecycleState::Stopped
    );
}

#[test]
fn test_concurrent_creates_of_same_worker() {
    let (engine, _store, hive) = test_hive();
    let hive = Arc::new(hive);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let hive = hive.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                create_worker(&hive, WorkerSpec::new(&hive, "alpha", "vanilla"))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::Duplicate { .. })
    ));
    let worker_creates = engine.count_calls(|c| {
        matches!(c, EngineCall::CreateContainer { name, .. } if name.starts_with("hivemined-worker-alpha-") && !name.contains("alpha-data"))
    });
    assert_eq!(worker_creates, 1);
}

#[test]
fn test_list_workers_hides_companions() {
    let (_engine, _store, hive) = test_hive();
    create_alpha(&hive);
    let names: Vec<String> = list_workers(&hive, false)
        .unwrap()
        .into_iter()
        .map(|w| w.name)
        .collect();
    assert_eq!(names, vec!["alpha".to_string()]);
    assert_eq!(list_workers(&hive, true).unwrap().len(), 2);
    assert_eq!(hive.list(EntityKind::Worker).unwrap().len(), 2);
}
