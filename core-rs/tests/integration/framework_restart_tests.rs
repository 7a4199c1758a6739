//! Framework Restart Integration Tests
//!
//! Persistence across framework instances sharing one storage directory,
//! launch configuration and framework shutdown.

use kf_framework::{
    ArchiveBuilder, BoxError, Bundle, BundleActivator, BundleContext, BundleState, Framework, FrameworkConfig,
    FrameworkEvent, FrameworkEventKind, StartOptions, StorageClean,
};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn framework_at(storage: &Path) -> Framework {
    Framework::new(FrameworkConfig::default_for(storage)).unwrap()
}

fn install(framework: &Framework, name: &str) -> Bundle {
    let bytes = ArchiveBuilder::new().symbolic_name(name).version("1.0.0").build().unwrap();
    framework.install_bundle(name, bytes.as_slice()).unwrap()
}

fn ids_and_states(framework: &Framework) -> Vec<(u64, String, BundleState)> {
    framework
        .bundles()
        .into_iter()
        .filter(|b| b.id() != 0)
        .map(|b| (b.id(), b.location().to_string(), b.state()))
        .collect()
}

struct RecordingActivator {
    stops: Arc<Mutex<Vec<u64>>>,
}

impl BundleActivator for RecordingActivator {
    fn start(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        Ok(())
    }

    fn stop(&mut self, context: &BundleContext) -> Result<(), BoxError> {
        self.stops.lock().unwrap().push(context.bundle().id());
        Ok(())
    }
}

#[test]
fn test_bundles_survive_restart_with_same_ids() {
    let temp = TempDir::new().unwrap();
    let storage = temp.path().join("storage");

    let before = {
        let framework = framework_at(&storage);
        framework.start().unwrap();
        install(&framework, "a");
        install(&framework, "b");
        framework.stop().unwrap();
        ids_and_states(&framework)
    };

    let framework = framework_at(&storage);
    framework.init().unwrap();
    let after: Vec<(u64, String)> = ids_and_states(&framework)
        .into_iter()
        .map(|(id, location, _)| (id, location))
        .collect();
    let expected: Vec<(u64, String)> = before.into_iter().map(|(id, location, _)| (id, location)).collect();
    assert_eq!(after, expected);
    assert!(framework.bundles().iter().skip(1).all(|b| b.state() == BundleState::Installed));
}

#[test]
fn test_persistently_started_bundles_restart() {
    let temp = TempDir::new().unwrap();
    let storage = temp.path().join("storage");

    {
        let framework = framework_at(&storage);
        framework.start().unwrap();
        install(&framework, "persistent").start().unwrap();
        install(&framework, "transient").start_with(StartOptions::transient()).unwrap();
        let stopped = install(&framework, "stopped");
        stopped.start().unwrap();
        stopped.stop().unwrap();
        install(&framework, "never");
        framework.stop().unwrap();
    }

    let framework = framework_at(&storage);
    framework.start().unwrap();
    let state_of = |location: &str| framework.bundle_by_location(location).unwrap().state();

    assert_eq!(state_of("persistent"), BundleState::Active);
    assert_eq!(state_of("transient"), BundleState::Resolved);
    assert_eq!(state_of("stopped"), BundleState::Resolved);
    assert_eq!(state_of("never"), BundleState::Resolved);
}

#[test]
fn test_ids_are_not_reused_after_restart() {
    let temp = TempDir::new().unwrap();
    let storage = temp.path().join("storage");

    let removed_id = {
        let framework = framework_at(&storage);
        framework.start().unwrap();
        install(&framework, "a");
        let b = install(&framework, "b");
        b.uninstall().unwrap();
        framework.stop().unwrap();
        b.id()
    };

    let framework = framework_at(&storage);
    framework.start().unwrap();
    assert!(framework.bundle(removed_id).is_none());
    let c = install(&framework, "c");
    assert!(c.id() > removed_id);
}

#[test]
fn test_clean_on_first_init_wipes_storage() {
    let temp = TempDir::new().unwrap();
    let storage = temp.path().join("storage");

    {
        let framework = framework_at(&storage);
        framework.start().unwrap();
        install(&framework, "a");
        framework.stop().unwrap();
    }

    let mut config = FrameworkConfig::default_for(&storage);
    config.storage_clean = StorageClean::OnFirstInit;
    let framework = Framework::new(config).unwrap();
    framework.start().unwrap();

    assert_eq!(framework.bundles().len(), 1, "only the system bundle remains");
    assert_eq!(install(&framework, "b").id(), 1);

    // a second start of the same instance keeps what it installed
    framework.stop().unwrap();
    framework.start().unwrap();
    assert!(framework.bundle_by_location("b").is_some());
}

#[test]
fn test_config_loaded_from_yaml() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("framework.yaml");
    fs::write(
        &path,
        r#"apiVersion: kf/v1
kind: Framework
storageDir: data
systemPackages: org.osgi.framework;version=1.6,com.example.api;version=2.0
logLevel: debug
properties:
  app.name: demo
"#,
    )
    .unwrap();

    let config = FrameworkConfig::load(&path).unwrap();
    assert_eq!(config.storage_dir, temp.path().join("data"));
    assert_eq!(config.storage_clean, StorageClean::None);
    assert_eq!(config.log_level.as_deref(), Some("debug"));

    let framework = Framework::new(config).unwrap();
    framework.start().unwrap();
    assert_eq!(framework.property("app.name").as_deref(), Some("demo"));
    assert_eq!(framework.property("org.osgi.framework.version").as_deref(), Some("1.6.0"));

    let bytes = ArchiveBuilder::new()
        .symbolic_name("consumer")
        .version("1.0.0")
        .imports("com.example.api;version=\"[2.0,3.0)\"")
        .build()
        .unwrap();
    let consumer = framework.install_bundle("consumer", bytes.as_slice()).unwrap();
    consumer.start().unwrap();
    assert_eq!(consumer.wiring().unwrap().provider_of("com.example.api").map(|r| r.bundle), Some(0));
}

#[test]
fn test_config_with_wrong_kind_is_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("framework.yaml");
    fs::write(&path, "apiVersion: kf/v1\nkind: Workflow\nstorageDir: data\n").unwrap();

    let err = FrameworkConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("Invalid kind"));
}

#[test]
fn test_stop_stops_bundles_in_reverse_order() {
    let temp = TempDir::new().unwrap();
    let framework = framework_at(&temp.path().join("storage"));
    let stops = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&stops);
    framework.register_activator("test.Recording", move || RecordingActivator {
        stops: Arc::clone(&shared),
    });
    framework.start().unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    framework
        .context()
        .unwrap()
        .add_framework_listener(move |e: &FrameworkEvent| sink.lock().unwrap().push(e.kind))
        .unwrap();

    let mut ids = Vec::new();
    for name in ["one", "two", "three"] {
        let bytes = ArchiveBuilder::new()
            .symbolic_name(name)
            .version("1.0.0")
            .activator("test.Recording")
            .build()
            .unwrap();
        let bundle = framework.install_bundle(name, bytes.as_slice()).unwrap();
        bundle.start().unwrap();
        ids.push(bundle.id());
    }

    framework.stop().unwrap();

    ids.reverse();
    assert_eq!(*stops.lock().unwrap(), ids);
    assert_eq!(*events.lock().unwrap(), vec![FrameworkEventKind::Stopped]);
    assert_eq!(framework.state(), BundleState::Resolved);
    assert!(framework.context().is_none());
    assert!(framework
        .bundles()
        .iter()
        .skip(1)
        .all(|b| b.state() == BundleState::Resolved && b.is_persistently_started()));
}
