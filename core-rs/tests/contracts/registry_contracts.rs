//! Service Registry Contract Tests
//!
//! These tests verify INVARIANTS that MUST NEVER BREAK regardless of implementation.
//! Consumers pick services by order and rely on balanced use counts; these
//! tests pin both down.

use kf_framework::{
    ArchiveBuilder, BundleContext, Framework, FrameworkConfig, Properties, ServiceEvent, ServiceEventKind,
    ServiceProvider,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const CLASS: &str = "contract.Service";

fn started_framework() -> (TempDir, Framework) {
    let temp = TempDir::new().unwrap();
    let framework = Framework::new(FrameworkConfig::default_for(temp.path().join("storage"))).unwrap();
    framework.start().unwrap();
    (temp, framework)
}

fn active_context(framework: &Framework, name: &str) -> BundleContext {
    let bytes = ArchiveBuilder::new().symbolic_name(name).version("1.0.0").build().unwrap();
    let bundle = framework.install_bundle(name, bytes.as_slice()).unwrap();
    bundle.start().unwrap();
    bundle.context().unwrap()
}

/// WHY: Lookup order is ranking descending, then service id ascending
/// REASON: `service_reference` must pick the same service on every call
/// BREAKS: Consumers flip between providers nondeterministically
/// SACRIFICES: If this fails, "best service" is no longer well defined
#[test]
fn lookup_order_is_deterministic() {
    let (_temp, framework) = started_framework();
    let ctx = active_context(&framework, "provider");

    let rankings = [0i64, 7, -3, 7, 0, 12];
    let mut registered = Vec::new();
    for ranking in rankings {
        let registration = ctx
            .register_service(
                &[CLASS],
                ServiceProvider::singleton(ranking),
                Properties::new().with("service.ranking", ranking),
            )
            .unwrap();
        registered.push((ranking, registration.id()));
    }

    let mut expected = registered.clone();
    expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    let expected: Vec<u64> = expected.into_iter().map(|(_, id)| id).collect();

    for _ in 0..3 {
        let order: Vec<u64> = ctx
            .service_references(Some(CLASS), None)
            .unwrap()
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(order, expected);
    }
}

/// WHY: Every get is balanced by exactly one unget
/// REASON: Use counts decide when factory objects are released
/// BREAKS: Leaked or prematurely released per-consumer objects
/// SACRIFICES: If this fails, counts drift and `using_bundles` lies
#[test]
fn use_count_round_trip() {
    let (_temp, framework) = started_framework();
    let provider = active_context(&framework, "provider");
    let consumer = active_context(&framework, "consumer");

    provider
        .register_service(&[CLASS], ServiceProvider::singleton("value"), Properties::new())
        .unwrap();
    let reference = consumer.service_reference(CLASS).unwrap().unwrap();

    for n in 1..=5 {
        for _ in 0..n {
            assert!(consumer.get_service(&reference).unwrap().is_some());
        }
        assert_eq!(reference.using_bundles(), vec![consumer.bundle().clone()]);
        for _ in 0..n {
            assert!(consumer.unget_service(&reference).unwrap());
        }
        assert!(reference.using_bundles().is_empty());
        assert!(!consumer.unget_service(&reference).unwrap());
    }
}

/// WHY: UNREGISTERING is delivered while the service can still be used
/// REASON: Consumers need a last chance to release what they got
/// BREAKS: Shutdown paths that call into the service while letting it go
/// SACRIFICES: If this fails, consumers lose the service before being told
#[test]
fn service_usable_until_unregistering_delivered() {
    let (_temp, framework) = started_framework();
    let provider = active_context(&framework, "provider");
    let consumer = active_context(&framework, "consumer");

    let registration = provider
        .register_service(&[CLASS], ServiceProvider::singleton(42u32), Properties::new())
        .unwrap();

    let observed = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&observed);
    let listener_ctx = consumer.clone();
    consumer
        .add_service_listener(
            move |e: &ServiceEvent| {
                if e.kind == ServiceEventKind::Unregistering {
                    let value = listener_ctx
                        .get_service_as::<u32>(&e.reference)
                        .unwrap()
                        .map(|v| *v);
                    *sink.lock().unwrap() = Some(value);
                }
            },
            None,
        )
        .unwrap();

    let reference = registration.reference().unwrap();
    registration.unregister().unwrap();

    assert_eq!(*observed.lock().unwrap(), Some(Some(42)));
    assert!(consumer.get_service(&reference).unwrap().is_none());
    assert!(reference.using_bundles().is_empty(), "remaining uses are dropped after delivery");
}
