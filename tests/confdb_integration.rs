use confdb::seed::{demo_configuration, seed_demo_release, DEMO_RELEASE};
use confdb::store::rows::EdgeKind;
use confdb::{
    ConfDb, ConfDbError, Configuration, ConsistencyWarning, Id, MemoryStore, ParameterValue,
    Reference, SaveRequest,
};
use std::collections::HashMap;
use std::sync::Arc;

// Shared setup: seeded release, a `/Group` directory and the demo graph.
async fn setup() -> (Arc<MemoryStore>, ConfDb<MemoryStore>, Configuration) {
    let store = Arc::new(MemoryStore::new());
    seed_demo_release(&store).expect("seed release");
    let db = ConfDb::open(store.clone()).await.expect("open");
    let group = db
        .directories()
        .create_directory(store.root_directory_id(), "Group")
        .await
        .expect("create directory");
    let release = db.release(DEMO_RELEASE).await.expect("release").value;
    let config = demo_configuration(&release, group.id).expect("demo graph");
    (store, db, config)
}

fn request() -> SaveRequest {
    SaveRequest::new("alice", "HLT")
}

fn identities(config: &Configuration) -> HashMap<String, Id> {
    let mut ids = HashMap::new();
    for module in &config.modules {
        ids.insert(format!("module:{}", module.name), module.id().unwrap());
    }
    for path in &config.paths {
        ids.insert(format!("path:{}", path.name), path.stored.as_ref().unwrap().id);
    }
    for sequence in &config.sequences {
        ids.insert(format!("sequence:{}", sequence.name), sequence.stored.as_ref().unwrap().id);
    }
    for stream in &config.streams {
        ids.insert(format!("stream:{}", stream.label), stream.stored.as_ref().unwrap().id);
    }
    for pset in &config.psets {
        ids.insert(format!("pset:{}", pset.set.name), pset.stored.as_ref().unwrap().id);
    }
    ids
}

#[tokio::test]
async fn saved_graph_loads_back_unchanged() {
    let (_store, db, mut config) = setup().await;

    let v1 = db.save_configuration(&mut config, &request()).await.unwrap();
    assert_eq!(v1.version, 1);
    assert_eq!(v1.release_tag, DEMO_RELEASE);

    let loaded = db.load_configuration(v1.id).await.unwrap();
    assert!(loaded.is_clean(), "unexpected warnings: {:?}", loaded.warnings);
    assert_eq!(loaded.value, config);

    let by_name = db.load_configuration_by_name("/Group/MyConfig").await.unwrap();
    assert_eq!(by_name.value.version.as_ref().map(|v| v.id), Some(v1.id));
}

#[tokio::test]
async fn path_and_parameter_order_is_preserved() {
    let (_store, db, mut config) = setup().await;
    let v1 = db.save_configuration(&mut config, &request()).await.unwrap();
    let loaded = db.load_configuration(v1.id).await.unwrap().value;

    let path = loaded.path("P").unwrap();
    assert_eq!(
        path.entries,
        vec![
            Reference::Module("a".into()),
            Reference::Sequence("S".into()),
            Reference::Module("b".into()),
        ]
    );
    assert_eq!(loaded.sequence("S").unwrap().entries, vec![Reference::Module("c".into())]);
    assert!(loaded.path("E").unwrap().end_path);
    assert_eq!(loaded.stream("A").unwrap().paths, vec!["E".to_string()]);

    let names: Vec<&str> = loaded.modules().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c", "out"]);

    let b = loaded.module("b").unwrap();
    let params: Vec<&str> = b.parameters().map(|p| p.name.as_str()).collect();
    assert_eq!(params, ["src", "TrajectoryBuilder", "seedCuts", "mask"]);
    assert_eq!(
        b.parameter("mask").unwrap().value,
        ParameterValue::Int32 { value: Some(0xff), hex: true }
    );
    assert!(loaded.essources[0].kind.preferred());
}

#[tokio::test]
async fn unchanged_entities_keep_their_identities() {
    let (store, db, mut config) = setup().await;
    let v1 = db.save_configuration(&mut config, &request()).await.unwrap();
    let entities_after_v1 = store.entity_count();

    let mut loaded = db.load_configuration(v1.id).await.unwrap().value;
    let before = identities(&loaded);
    let v2 = db.save_configuration(&mut loaded, &request()).await.unwrap();

    assert_eq!(v2.version, 2);
    assert_ne!(v2.id, v1.id);
    assert_eq!(identities(&loaded), before);
    assert_eq!(store.entity_count(), entities_after_v1);
    assert_eq!(store.configuration_count(), 2);
}

#[tokio::test]
async fn modified_module_reidentifies_its_containers_only() {
    let (_store, db, mut config) = setup().await;
    let v1 = db.save_configuration(&mut config, &request()).await.unwrap();

    let mut loaded = db.load_configuration(v1.id).await.unwrap().value;
    let before = identities(&loaded);
    assert!(loaded
        .module_mut("b")
        .unwrap()
        .set_parameter("mask", ParameterValue::Int32 { value: Some(0x0f), hex: true }));
    db.save_configuration(&mut loaded, &request()).await.unwrap();
    let after = identities(&loaded);

    for key in ["module:b", "path:P"] {
        assert_ne!(before[key], after[key], "{} kept its identity", key);
    }
    for key in ["module:a", "module:c", "module:out", "sequence:S", "path:E", "stream:A", "pset:options"] {
        assert_eq!(before[key], after[key], "{} was re-identified", key);
    }
}

#[tokio::test]
async fn swapping_in_an_equal_module_from_another_configuration_rewrites_its_path() {
    let (_store, db, mut config) = setup().await;
    let v1 = db.save_configuration(&mut config, &request()).await.unwrap();

    let release = db.release(DEMO_RELEASE).await.unwrap().value;
    let mut other = demo_configuration(&release, config.directory_id).unwrap();
    other.name = "Other".into();
    db.save_configuration(&mut other, &request()).await.unwrap();
    let foreign_a = other.module("a").unwrap().clone();

    let mut loaded = db.load_configuration(v1.id).await.unwrap().value;
    let before = identities(&loaded);
    assert_ne!(foreign_a.id(), Some(before["module:a"]));
    *loaded.module_mut("a").unwrap() = foreign_a.clone();
    let v2 = db.save_configuration(&mut loaded, &request()).await.unwrap();
    let after = identities(&loaded);

    assert_eq!(after["module:a"], foreign_a.id().unwrap());
    assert_ne!(before["path:P"], after["path:P"]);
    assert_eq!(before["sequence:S"], after["sequence:S"]);

    let reloaded = db.load_configuration(v2.id).await.unwrap();
    assert!(reloaded.is_clean(), "unexpected warnings: {:?}", reloaded.warnings);
    assert_eq!(
        reloaded.value.path("P").unwrap().entries,
        vec![
            Reference::Module("a".into()),
            Reference::Sequence("S".into()),
            Reference::Module("b".into()),
        ]
    );
    assert_eq!(reloaded.value.module("a").unwrap().id(), foreign_a.id());
}

#[tokio::test]
async fn saving_a_repaired_graph_rewrites_the_repaired_path() {
    let (store, db, mut config) = setup().await;
    let v1 = db.save_configuration(&mut config, &request()).await.unwrap();
    let b = config.module("b").unwrap().id().unwrap();
    let parameter = store.parameter_id(b, "mask").unwrap();
    assert_eq!(store.remove_values(parameter), 1);

    let mut loaded = db.load_configuration(v1.id).await.unwrap().value;
    let before = identities(&loaded);
    let v2 = db.save_configuration(&mut loaded, &request()).await.unwrap();
    let after = identities(&loaded);

    assert_ne!(before["path:P"], after["path:P"]);
    for key in ["module:a", "sequence:S", "path:E", "stream:A"] {
        assert_eq!(before[key], after[key], "{} was re-identified", key);
    }

    let reloaded = db.load_configuration(v2.id).await.unwrap();
    assert!(reloaded.is_clean(), "unexpected warnings: {:?}", reloaded.warnings);
    assert_eq!(
        reloaded.value.path("P").unwrap().entries,
        vec![Reference::Module("a".into()), Reference::Sequence("S".into())]
    );
}

#[tokio::test]
async fn missing_untracked_value_loads_as_unset() {
    let (store, db, mut config) = setup().await;
    let v1 = db.save_configuration(&mut config, &request()).await.unwrap();

    let source_id = config.edsources[0].id().unwrap();
    let parameter = store.parameter_id(source_id, "maxEvents").unwrap();
    assert_eq!(store.remove_values(parameter), 1);

    let loaded = db.load_configuration(v1.id).await.unwrap();
    let source = &loaded.value.edsources[0];
    assert!(!source.parameter("maxEvents").unwrap().is_set());
    assert!(source.parameter("fileNames").unwrap().is_set());
}

#[tokio::test]
async fn missing_tracked_value_drops_only_that_module() {
    let (store, db, mut config) = setup().await;
    let v1 = db.save_configuration(&mut config, &request()).await.unwrap();

    let b = config.module("b").unwrap().id().unwrap();
    let parameter = store.parameter_id(b, "mask").unwrap();
    assert_eq!(store.remove_values(parameter), 1);

    let loaded = db.load_configuration(v1.id).await.unwrap();
    assert!(loaded.value.module("b").is_none());
    assert!(loaded.value.module("a").is_some());
    assert!(loaded
        .warnings
        .iter()
        .any(|w| matches!(w, ConsistencyWarning::InstanceDropped { .. })));
    assert!(loaded
        .warnings
        .iter()
        .any(|w| matches!(w, ConsistencyWarning::UnresolvedReference { target, .. } if *target == b)));
    assert_eq!(
        loaded.value.path("P").unwrap().entries,
        vec![Reference::Module("a".into()), Reference::Sequence("S".into())]
    );
}

#[tokio::test]
async fn failed_stage_rolls_back_the_whole_save() {
    let (store, db, mut config) = setup().await;
    let untouched = config.clone();
    let entities = store.entity_count();
    let parameters = store.parameter_count();

    store.fail_at_stage(Some("modules"));
    let err = db.save_configuration(&mut config, &request()).await.unwrap_err();
    assert!(matches!(err, ConfDbError::Transaction { .. }), "got {:?}", err);
    assert!(err.to_string().contains("/Group/MyConfig/V1"));

    assert_eq!(config, untouched);
    assert_eq!(store.configuration_count(), 0);
    assert_eq!(store.entity_count(), entities);
    assert_eq!(store.parameter_count(), parameters);
    assert_eq!(store.edge_count(EdgeKind::PathModule), 0);

    store.fail_at_stage(None);
    let v1 = db.save_configuration(&mut config, &request()).await.unwrap();
    assert_eq!(v1.version, 1);
}

#[tokio::test]
async fn second_user_cannot_take_a_held_lock() {
    let (_store, db, mut config) = setup().await;
    db.save_configuration(&mut config, &request()).await.unwrap();
    let directories = db.directories();
    let group = directories.find_directory("/Group").await.unwrap();

    directories.lock(group, "MyConfig", "alice").await.unwrap();
    let err = directories.lock(group, "MyConfig", "bob").await.unwrap_err();
    match err {
        ConfDbError::LockConflict { holder, path, .. } => {
            assert_eq!(holder, "alice");
            assert_eq!(path, "/Group/MyConfig");
        }
        other => panic!("expected lock conflict, got {:?}", other),
    }

    let err = directories.unlock(group, "MyConfig", "bob").await.unwrap_err();
    assert!(matches!(err, ConfDbError::LockConflict { .. }));

    let v1 = db
        .directories()
        .resolve_configuration_id("/Group/MyConfig")
        .await
        .unwrap();
    let info = directories.configuration_info(v1).await.unwrap();
    assert_eq!(info.locked_by.as_deref(), Some("alice"));

    directories.unlock(group, "MyConfig", "alice").await.unwrap();
    assert!(!directories.configuration_info(v1).await.unwrap().is_locked());
}

#[tokio::test]
async fn partial_release_covers_referenced_templates() {
    let (_store, db, mut config) = setup().await;
    let v1 = db.save_configuration(&mut config, &request()).await.unwrap();

    let partial = db.catalog().load_partial_release(v1.id).await.unwrap().value;
    assert!(partial.partial);
    assert_eq!(partial.template_count(), 8);

    let loaded = db.load_configuration_partial(v1.id).await.unwrap();
    assert_eq!(loaded.value.modules, config.modules);
}

#[tokio::test]
async fn unknown_configuration_is_not_found() {
    let (_store, db, _config) = setup().await;
    let err = db.load_configuration_by_name("/Group/Missing").await.unwrap_err();
    assert!(matches!(err, ConfDbError::NotFound { .. }));
    let err = db.load_configuration(9_999).await.unwrap_err();
    assert!(matches!(err, ConfDbError::NotFound { .. }));
}

#[tokio::test]
async fn cleared_release_cache_reloads_the_catalog() {
    let (_store, db, _config) = setup().await;
    let first = db.release(DEMO_RELEASE).await.unwrap().value;
    let cached = db.release(DEMO_RELEASE).await.unwrap().value;
    assert!(Arc::ptr_eq(&first, &cached));

    db.clear_releases().await;
    let reloaded = db.release(DEMO_RELEASE).await.unwrap().value;
    assert!(!Arc::ptr_eq(&first, &reloaded));
    assert_eq!(reloaded.template_count(), first.template_count());
}
