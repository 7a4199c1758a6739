//! Bundle Lifecycle Contract Tests
//!
//! These tests verify INVARIANTS that MUST NEVER BREAK regardless of implementation.
//! They document WHY each guarantee exists so a refactor cannot quietly drop it.
//!
//! **Problem**: lifecycle code gets "simplified" without understanding what bundles rely on
//! **Solution**: Contract tests that fail with a clear explanation of what's being sacrificed

use kf_framework::{
    ActivatorFailure, ArchiveBuilder, BoxError, Bundle, BundleActivator, BundleContext, BundleErrorKind,
    BundleEvent, BundleEventKind, BundleState, Framework, FrameworkConfig, FrameworkEvent, FrameworkEventKind,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn started_framework() -> (TempDir, Framework) {
    let temp = TempDir::new().unwrap();
    let framework = Framework::new(FrameworkConfig::default_for(temp.path().join("storage"))).unwrap();
    framework.start().unwrap();
    (temp, framework)
}

fn install(framework: &Framework, name: &str, version: &str) -> Bundle {
    let bytes = ArchiveBuilder::new().symbolic_name(name).version(version).build().unwrap();
    framework.install_bundle(name, bytes.as_slice()).unwrap()
}

/// State a bundle is in right after the event is fired
fn state_after(kind: BundleEventKind) -> BundleState {
    match kind {
        BundleEventKind::Installed | BundleEventKind::Unresolved | BundleEventKind::Updated => BundleState::Installed,
        BundleEventKind::Resolved | BundleEventKind::Stopped => BundleState::Resolved,
        BundleEventKind::Starting => BundleState::Starting,
        BundleEventKind::Started => BundleState::Active,
        BundleEventKind::Stopping => BundleState::Stopping,
        BundleEventKind::Uninstalled => BundleState::Uninstalled,
    }
}

/// WHY: Bundle state only moves along the edges of the lifecycle graph
/// REASON: Listeners and tools infer what happened from consecutive states
/// BREAKS: Any observer that tracks bundle state from events
/// SACRIFICES: If this fails, a bundle skipped or reversed a transition
#[test]
fn bundle_states_follow_lifecycle_graph() {
    let (_temp, framework) = started_framework();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    framework
        .context()
        .unwrap()
        .add_bundle_listener(move |e: &BundleEvent| sink.lock().unwrap().push((e.bundle.id(), e.kind)))
        .unwrap();

    let bundle = install(&framework, "walker", "1.0.0");
    bundle.start().unwrap();
    bundle.stop().unwrap();
    let v2 = ArchiveBuilder::new().symbolic_name("walker").version("2.0.0").build().unwrap();
    bundle.update_from(v2.as_slice()).unwrap();
    bundle.start().unwrap();
    bundle.uninstall().unwrap();

    let kinds: Vec<BundleEventKind> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|(id, _)| *id == bundle.id())
        .map(|(_, k)| *k)
        .collect();
    assert_eq!(kinds.first(), Some(&BundleEventKind::Installed));
    assert_eq!(kinds.last(), Some(&BundleEventKind::Uninstalled));

    let mut current = BundleState::Installed;
    for kind in kinds.iter().skip(1) {
        let next = state_after(*kind);
        if next == current {
            continue;
        }
        assert!(
            current.can_transition_to(next),
            "{:?} -> {:?} (on {}) is not a lifecycle edge; events: {:?}",
            current,
            next,
            kind,
            kinds
        );
        current = next;
    }
}

/// WHY: UNINSTALLED is terminal
/// REASON: A bundle id is never reused and its handle must not come back to life
/// BREAKS: Code holding stale `Bundle` handles would act on a different bundle
/// SACRIFICES: If this fails, uninstalled bundles accept operations again
#[test]
fn uninstalled_is_final() {
    let (_temp, framework) = started_framework();
    let bundle = install(&framework, "gone", "1.0.0");
    bundle.uninstall().unwrap();

    for kind in [
        BundleState::Installed,
        BundleState::Resolved,
        BundleState::Starting,
        BundleState::Active,
        BundleState::Stopping,
        BundleState::Uninstalled,
    ] {
        assert!(!BundleState::Uninstalled.can_transition_to(kind));
    }

    assert!(bundle.start().unwrap_err().is_illegal_state());
    assert!(bundle.stop().unwrap_err().is_illegal_state());
    assert!(bundle.uninstall().unwrap_err().is_illegal_state());
    assert_eq!(bundle.state(), BundleState::Uninstalled);
    assert!(framework.bundle(bundle.id()).is_none());
}

/// WHY: One misbehaving listener must not silence the others
/// REASON: Listeners belong to unrelated bundles; delivery is the framework's job
/// BREAKS: Service trackers stop seeing events after any third-party panic
/// SACRIFICES: If this fails, a panic in user code aborts event delivery
#[test]
fn panicking_listener_does_not_stop_delivery() {
    let (_temp, framework) = started_framework();
    let ctx = framework.context().unwrap();

    ctx.add_bundle_listener(|_: &BundleEvent| panic!("listener bug")).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ctx.add_bundle_listener(move |e: &BundleEvent| sink.lock().unwrap().push(e.kind))
        .unwrap();

    let bundle = install(&framework, "observed", "1.0.0");
    bundle.start().unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            BundleEventKind::Installed,
            BundleEventKind::Resolved,
            BundleEventKind::Starting,
            BundleEventKind::Started,
        ]
    );
    assert_eq!(bundle.state(), BundleState::Active);
}

struct Refuses;

impl BundleActivator for Refuses {
    fn start(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        Err(ActivatorFailure::new("refused").into())
    }

    fn stop(&mut self, _context: &BundleContext) -> Result<(), BoxError> {
        Ok(())
    }
}

/// WHY: A failed activator start is reported to the caller AND as a framework event
/// REASON: The caller needs the error; management tools only see events
/// BREAKS: Start failures during framework launch or refresh go unnoticed
/// SACRIFICES: If this fails, start errors are swallowed or leave a half-started bundle
#[test]
fn start_failure_is_reported_synchronously() {
    let (_temp, framework) = started_framework();
    framework.register_activator("test.Refuses", || Refuses);
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    framework
        .context()
        .unwrap()
        .add_framework_listener(move |e: &FrameworkEvent| {
            if e.kind == FrameworkEventKind::Error {
                sink.lock().unwrap().push(e.bundle.id());
            }
        })
        .unwrap();

    let bytes = ArchiveBuilder::new()
        .symbolic_name("refuser")
        .version("1.0.0")
        .activator("test.Refuses")
        .build()
        .unwrap();
    let bundle = framework.install_bundle("refuser", bytes.as_slice()).unwrap();

    let err = bundle.start().unwrap_err();
    assert_eq!(err.bundle_error_kind(), Some(BundleErrorKind::ActivatorError));
    assert_eq!(*errors.lock().unwrap(), vec![bundle.id()], "event is fired before start returns");
    assert_eq!(bundle.state(), BundleState::Resolved);
    assert!(bundle.context().is_none());
}
