//! Bundle Lifecycle Integration Tests
//!
//! Install, start, stop, update and uninstall through the public
//! `Framework` and `Bundle` API, with native activators registered by name.
//!
//! Uses tempfile for isolation - every test gets its own storage root

use kf_framework::{
    ActivatorFailure, ArchiveBuilder, BoxError, Bundle, BundleActivator, BundleContext, BundleErrorKind,
    BundleEvent, BundleEventKind, BundleState, Framework, FrameworkConfig, FrameworkEvent, FrameworkEventKind,
    Properties, ServiceProvider, StopOptions,
};
use std::error::Error as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Helper to create a started framework over a fresh storage directory
fn started_framework() -> (TempDir, Framework) {
    let temp = TempDir::new().unwrap();
    let framework = Framework::new(FrameworkConfig::default_for(temp.path().join("storage"))).unwrap();
    framework.start().unwrap();
    (temp, framework)
}

fn install(framework: &Framework, location: &str, builder: ArchiveBuilder) -> Bundle {
    let bytes = builder.build().unwrap();
    framework.install_bundle(location, bytes.as_slice()).unwrap()
}

fn simple(name: &str, version: &str) -> ArchiveBuilder {
    ArchiveBuilder::new().symbolic_name(name).version(version)
}

fn record_bundle_events(framework: &Framework) -> Arc<Mutex<Vec<(u64, BundleEventKind)>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    framework
        .context()
        .unwrap()
        .add_bundle_listener(move |e: &BundleEvent| sink.lock().unwrap().push((e.bundle.id(), e.kind)))
        .unwrap();
    events
}

fn record_framework_events(framework: &Framework) -> Arc<Mutex<Vec<(FrameworkEventKind, Option<String>)>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    framework
        .context()
        .unwrap()
        .add_framework_listener(move |e: &FrameworkEvent| sink.lock().unwrap().push((e.kind, e.message.clone())))
        .unwrap();
    events
}

fn kinds_for(events: &Mutex<Vec<(u64, BundleEventKind)>>, id: u64) -> Vec<BundleEventKind> {
    events.lock().unwrap().iter().filter(|(b, _)| *b == id).map(|(_, k)| *k).collect()
}

#[derive(Default)]
struct Counters {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

struct CountingActivator {
    counters: Arc<Counters>,
}

impl BundleActivator for CountingActivator {
    fn start(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn register_counting(framework: &Framework, name: &str) -> Arc<Counters> {
    let counters = Arc::new(Counters::default());
    let shared = Arc::clone(&counters);
    framework.register_activator(name, move || CountingActivator {
        counters: Arc::clone(&shared),
    });
    counters
}

struct FailingStart;

impl BundleActivator for FailingStart {
    fn start(&mut self, context: &BundleContext) -> Result<(), BoxError> {
        context.register_service(&["test.Leaked"], ServiceProvider::singleton(1u32), Properties::new())?;
        Err(ActivatorFailure::new("boom").into())
    }

    fn stop(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        Ok(())
    }
}

struct FailingStop;

impl BundleActivator for FailingStop {
    fn start(&mut self, context: &BundleContext) -> Result<(), BoxError> {
        context.register_service(&["test.Held"], ServiceProvider::singleton(2u32), Properties::new())?;
        Ok(())
    }

    fn stop(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        Err("stop failed".into())
    }
}

#[test]
fn test_start_walks_resolved_starting_active() {
    let (_temp, framework) = started_framework();
    let events = record_bundle_events(&framework);
    let counters = register_counting(&framework, "test.Counting");

    let bundle = install(&framework, "a", simple("a", "1.0.0").activator("test.Counting"));
    assert_eq!(bundle.state(), BundleState::Installed);

    bundle.start().unwrap();
    assert_eq!(bundle.state(), BundleState::Active);
    assert!(bundle.context().is_some());
    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);

    bundle.stop().unwrap();
    assert_eq!(bundle.state(), BundleState::Resolved, "stop returns to RESOLVED, not INSTALLED");
    assert!(bundle.context().is_none());
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);

    assert_eq!(
        kinds_for(&events, bundle.id()),
        vec![
            BundleEventKind::Installed,
            BundleEventKind::Resolved,
            BundleEventKind::Starting,
            BundleEventKind::Started,
            BundleEventKind::Stopping,
            BundleEventKind::Stopped,
        ]
    );
}

#[test]
fn test_start_is_noop_when_active() {
    let (_temp, framework) = started_framework();
    let counters = register_counting(&framework, "test.Counting");
    let bundle = install(&framework, "a", simple("a", "1.0.0").activator("test.Counting"));

    bundle.start().unwrap();
    bundle.start().unwrap();
    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_activator_failure_leaves_bundle_resolved() {
    let (_temp, framework) = started_framework();
    let events = record_bundle_events(&framework);
    let framework_events = record_framework_events(&framework);
    framework.register_activator("test.FailingStart", || FailingStart);

    let bundle = install(&framework, "a", simple("a", "1.0.0").activator("test.FailingStart"));
    let err = bundle.start().unwrap_err();

    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::ActivatorError));
    assert_eq!(err.source().unwrap().to_string(), "boom");
    assert_eq!(bundle.state(), BundleState::Resolved);
    assert!(bundle.context().is_none());
    assert!(bundle.registered_services().is_empty(), "services from a failed start are unregistered");

    assert_eq!(
        kinds_for(&events, bundle.id()),
        vec![
            BundleEventKind::Installed,
            BundleEventKind::Resolved,
            BundleEventKind::Starting,
            BundleEventKind::Stopping,
            BundleEventKind::Stopped,
        ]
    );
    assert!(framework_events
        .lock()
        .unwrap()
        .iter()
        .any(|(kind, message)| *kind == FrameworkEventKind::Error
            && message.as_deref().map_or(false, |m| m.contains("boom"))));
}

#[test]
fn test_missing_activator_is_activator_error() {
    let (_temp, framework) = started_framework();
    let bundle = install(&framework, "a", simple("a", "1.0.0").activator("test.NotRegistered"));

    let err = bundle.start().unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::ActivatorError));
    assert_eq!(bundle.state(), BundleState::Resolved);
}

#[test]
fn test_stop_failure_still_cleans_up() {
    let (_temp, framework) = started_framework();
    let framework_events = record_framework_events(&framework);
    framework.register_activator("test.FailingStop", || FailingStop);

    let bundle = install(&framework, "a", simple("a", "1.0.0").activator("test.FailingStop"));
    bundle.start().unwrap();
    assert_eq!(bundle.registered_services().len(), 1);

    let err = bundle.stop().unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::ActivatorError));
    assert_eq!(bundle.state(), BundleState::Resolved);
    assert!(bundle.registered_services().is_empty());
    assert!(framework_events
        .lock()
        .unwrap()
        .iter()
        .any(|(kind, _)| *kind == FrameworkEventKind::Error));
}

#[test]
fn test_unresolvable_bundle_fails_with_resolve_error() {
    let (_temp, framework) = started_framework();
    let bundle = install(&framework, "b", simple("b", "1.0.0").imports("org.missing;version=\"[1.0,2.0)\""));

    let err = bundle.start().unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::ResolveError));
    assert!(err.to_string().contains("org.missing"));
    assert_eq!(bundle.state(), BundleState::Installed);
}

#[test]
fn test_install_rejects_duplicates_and_invalid_manifests() {
    let (_temp, framework) = started_framework();
    install(&framework, "a", simple("a", "1.0.0"));

    let dup = simple("a", "1.0.0").build().unwrap();
    let err = framework.install_bundle("a-copy", dup.as_slice()).unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::DuplicateBundle));

    let bad = simple("c", "1.0.0").header("Bundle-ManifestVersion", "3").build().unwrap();
    let err = framework.install_bundle("c", bad.as_slice()).unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::Invalid));

    let err = framework.install_bundle("garbage", &b"not an archive"[..]).unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::Invalid));

    assert_eq!(framework.bundles().len(), 2, "system bundle plus a");
}

#[test]
fn test_reinstalling_location_returns_existing_bundle() {
    let (_temp, framework) = started_framework();
    let first = install(&framework, "shared", simple("a", "1.0.0"));
    let second = install(&framework, "shared", simple("a", "2.0.0"));
    assert_eq!(first, second);
    assert_eq!(second.version().to_string(), "1.0.0");
}

#[test]
fn test_install_before_init_is_illegal_state() {
    let temp = TempDir::new().unwrap();
    let framework = Framework::new(FrameworkConfig::default_for(temp.path())).unwrap();
    let bytes = simple("a", "1.0.0").build().unwrap();
    let err = framework.install_bundle("a", bytes.as_slice()).unwrap_err();
    assert!(err.is_illegal_state());
}

#[test]
fn test_uninstall_is_final() {
    let (_temp, framework) = started_framework();
    let events = record_bundle_events(&framework);
    let a = install(&framework, "a", simple("a", "1.0.0"));
    a.start().unwrap();

    a.uninstall().unwrap();
    assert_eq!(a.state(), BundleState::Uninstalled);
    assert!(framework.bundle(a.id()).is_none());
    assert!(a.start().unwrap_err().is_illegal_state());
    assert!(a.uninstall().unwrap_err().is_illegal_state());
    assert_eq!(kinds_for(&events, a.id()).last(), Some(&BundleEventKind::Uninstalled));

    let b = install(&framework, "b", simple("a", "1.0.0"));
    assert!(b.id() > a.id(), "ids are never reused");
}

#[test]
fn test_update_active_bundle_restarts_it() {
    let (_temp, framework) = started_framework();
    let events = record_bundle_events(&framework);
    let counters = register_counting(&framework, "test.Counting");
    let bundle = install(&framework, "a", simple("a", "1.0.0").activator("test.Counting"));
    bundle.start().unwrap();

    let v2 = simple("a", "2.0.0").activator("test.Counting").entry("data.txt", "v2").build().unwrap();
    bundle.update_from(v2.as_slice()).unwrap();

    assert_eq!(bundle.state(), BundleState::Active);
    assert_eq!(bundle.version().to_string(), "2.0.0");
    assert_eq!(bundle.entry("data.txt").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(bundle.revisions().len(), 1, "unwired old revision is dropped at once");
    assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);

    let kinds = kinds_for(&events, bundle.id());
    let updated = kinds.iter().position(|k| *k == BundleEventKind::Updated).unwrap();
    assert_eq!(kinds[updated - 1], BundleEventKind::Unresolved);
    assert_eq!(kinds.last(), Some(&BundleEventKind::Started));
}

#[test]
fn test_failed_update_keeps_running_revision() {
    let (_temp, framework) = started_framework();
    let counters = register_counting(&framework, "test.Counting");
    let bundle = install(&framework, "a", simple("a", "1.0.0").activator("test.Counting"));
    bundle.start().unwrap();

    let err = bundle.update_from(&b"broken"[..]).unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::Invalid));
    assert_eq!(bundle.state(), BundleState::Active, "invalid content is rejected before stopping");
    assert_eq!(bundle.version().to_string(), "1.0.0");
    assert_eq!(counters.stops.load(Ordering::SeqCst), 0);
}

#[test]
fn test_storage_failure_during_update_restarts_old_revision() {
    let (temp, framework) = started_framework();
    let counters = register_counting(&framework, "test.Counting");
    let bundle = install(&framework, "a", simple("a", "1.0.0").activator("test.Counting"));
    bundle.start().unwrap();
    let revision = bundle.current_revision().id();

    // occupy the directory the next revision would be moved into
    let blocked = temp.path().join("storage").join("bundles").join(bundle.id().to_string()).join("r2");
    std::fs::create_dir_all(&blocked).unwrap();
    std::fs::write(blocked.join("blocker"), "x").unwrap();

    let v2 = simple("a", "2.0.0").activator("test.Counting").build().unwrap();
    assert!(bundle.update_from(v2.as_slice()).is_err());

    assert_eq!(bundle.state(), BundleState::Active, "previously active bundle is restarted");
    assert_eq!(bundle.current_revision().id(), revision);
    assert_eq!(bundle.version().to_string(), "1.0.0");
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_update_inactive_bundle_only_swaps_content() {
    let (_temp, framework) = started_framework();
    let bundle = install(&framework, "a", simple("a", "1.0.0"));
    let v2 = simple("a", "1.1.0").build().unwrap();
    bundle.update_from(v2.as_slice()).unwrap();
    assert_eq!(bundle.state(), BundleState::Installed);
    assert_eq!(bundle.version().to_string(), "1.1.0");
}

#[test]
fn test_system_bundle_protections() {
    let (_temp, framework) = started_framework();
    let system = framework.system_bundle();
    assert_eq!(system.id(), 0);
    assert_eq!(system.symbolic_name().as_deref(), Some("system.bundle"));
    assert_eq!(system.state(), BundleState::Active);

    let err = system.uninstall().unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::InvalidOperation));
    let err = system.update_from(&b""[..]).unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::Unsupported));
}

#[test]
fn test_fragments_cannot_be_started() {
    let (_temp, framework) = started_framework();
    install(&framework, "host", simple("host", "1.0.0"));
    let fragment = install(
        &framework,
        "frag",
        simple("frag", "1.0.0").header("Fragment-Host", "host"),
    );
    let err = fragment.start().unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::InvalidOperation));
}

#[test]
fn test_reentrant_transition_is_state_change_error() {
    struct StopsItself {
        seen: Arc<Mutex<Option<BundleErrorKind>>>,
    }

    impl BundleActivator for StopsItself {
        fn start(&mut self, context: &BundleContext) -> Result<(), BoxError> {
            let err = context.bundle().stop().unwrap_err();
            *self.seen.lock().unwrap() = err.bundle_error_kind();
            Ok(())
        }

        fn stop(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
            Ok(())
        }
    }

    let (_temp, framework) = started_framework();
    let seen = Arc::new(Mutex::new(None));
    let shared = Arc::clone(&seen);
    framework.register_activator("test.StopsItself", move || StopsItself {
        seen: Arc::clone(&shared),
    });

    let bundle = install(&framework, "a", simple("a", "1.0.0").activator("test.StopsItself"));
    bundle.start().unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(BundleErrorKind::StateChange));
    assert_eq!(bundle.state(), BundleState::Active);
}

#[test]
fn test_concurrent_stop_runs_activator_once() {
    struct SlowStop {
        stops: Arc<AtomicUsize>,
    }

    impl BundleActivator for SlowStop {
        fn start(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
            Ok(())
        }

        fn stop(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
            thread::sleep(Duration::from_millis(50));
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let (_temp, framework) = started_framework();
    let stops = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&stops);
    framework.register_activator("test.SlowStop", move || SlowStop {
        stops: Arc::clone(&shared),
    });
    let bundle = install(&framework, "a", simple("a", "1.0.0").activator("test.SlowStop"));
    bundle.start().unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let b = bundle.clone();
            thread::spawn(move || b.stop_with(StopOptions::transient()))
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }

    assert_eq!(bundle.state(), BundleState::Resolved);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_independent_bundles_start_concurrently() {
    let (_temp, framework) = started_framework();
    let bundles: Vec<Bundle> = (0..4)
        .map(|i| install(&framework, &format!("b{}", i), simple(&format!("b{}", i), "1.0.0")))
        .collect();

    let handles: Vec<_> = bundles
        .iter()
        .cloned()
        .map(|b| thread::spawn(move || b.start()))
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }
    assert!(bundles.iter().all(|b| b.state() == BundleState::Active));
}
