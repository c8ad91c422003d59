use hivemined::core::config::Config;
use hivemined::core::engine::{EngineCall, InMemoryEngine};
use hivemined::core::entity::{EntityKind, LifecycleState};
use hivemined::core::error::{EntityError, ImageError};
use hivemined::core::hive::Hive;
use hivemined::core::image::ImageRef;
use hivemined::core::store::MemoryStore;
use hivemined::plugins::baseline::{baseline_ref, create_baseline};
use std::sync::Arc;
use tempfile::tempdir;

fn test_hive(engine: InMemoryEngine) -> (Arc<InMemoryEngine>, Hive) {
    let engine = Arc::new(engine);
    let hive = Hive::open(engine.clone(), Arc::new(MemoryStore::new()), Config::default()).unwrap();
    (engine, hive)
}

#[test]
fn test_create_baseline_pulls_missing_image() {
    let (engine, hive) = test_hive(InMemoryEngine::new().with_remote_image("itzg/paper:1.20"));
    let baseline =
        create_baseline(&hive, "paper", ImageRef::new("itzg/paper").with_tag("1.20")).unwrap();

    assert_eq!(baseline.state(), LifecycleState::Created);
    assert!(engine.has_local_image("itzg/paper:1.20"));
    assert_eq!(
        engine.count_calls(|c| matches!(c, EngineCall::PullImage(r) if r == "itzg/paper:1.20")),
        1
    );
    assert_eq!(
        engine.count_calls(|c| matches!(c, EngineCall::InspectImage(_))),
        1
    );
}

#[test]
fn test_unknown_image_fails_without_containers() {
    let (engine, hive) = test_hive(InMemoryEngine::new());
    let err = create_baseline(&hive, "ghost", ImageRef::new("missing/image")).unwrap_err();

    assert!(matches!(
        err.root_image_error(),
        Some(ImageError::Missing(name)) if name == "missing/image"
    ));
    assert_eq!(engine.container_count(), 0);
    assert!(hive.list(EntityKind::Baseline).unwrap().is_empty());
}

#[test]
fn test_create_builds_from_path() {
    let context = tempdir().unwrap();
    let (engine, hive) = test_hive(InMemoryEngine::new());
    let image = ImageRef::new("custom").with_build_path(context.path());
    create_baseline(&hive, "custom", image).unwrap();

    assert_eq!(
        engine.count_calls(|c| matches!(c, EngineCall::BuildImage { tag, .. } if tag == "custom")),
        1
    );
    assert_eq!(
        engine.count_calls(|c| matches!(c, EngineCall::PullImage(_))),
        0
    );
}

#[test]
fn test_duplicate_baseline_is_rejected() {
    let (engine, hive) = test_hive(InMemoryEngine::new().with_local_image("vanilla"));
    create_baseline(&hive, "vanilla", ImageRef::new("vanilla")).unwrap();
    engine.clear_calls();

    let err = create_baseline(&hive, "vanilla", ImageRef::new("vanilla")).unwrap_err();
    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::Duplicate { .. })
    ));
    assert!(engine.mutating_calls().is_empty());
}

#[test]
fn test_baseline_rejects_console_commands() {
    let (_engine, hive) = test_hive(InMemoryEngine::new().with_local_image("vanilla"));
    create_baseline(&hive, "vanilla", ImageRef::new("vanilla")).unwrap();
    hive.start(&baseline_ref("vanilla")).unwrap();

    let err = hive
        .exec(&baseline_ref("vanilla"), &["cmd".to_string()], false)
        .unwrap_err();
    assert!(matches!(
        err.root_entity_error(),
        Some(EntityError::Unsupported { operation: "command", .. })
    ));
}

#[test]
fn test_update_rebuilds_and_keeps_created_state() {
    let context = tempdir().unwrap();
    let (engine, hive) = test_hive(InMemoryEngine::new());
    let image = ImageRef::new("custom").with_build_path(context.path());
    let before = create_baseline(&hive, "custom", image).unwrap();

    let after = hive.update(&baseline_ref("custom")).unwrap();
    assert_eq!(after.state(), LifecycleState::Created);
    assert_ne!(after.runtime_id(), before.runtime_id());
    assert!(!engine.container_exists(before.runtime_id().unwrap()));
    assert_eq!(
        engine.count_calls(|c| matches!(c, EngineCall::BuildImage { .. })),
        2
    );
}
