//! Service Registry Integration Tests
//!
//! Registration, lookup, use counting, factories and service events as
//! seen through bundle contexts.

use kf_framework::{
    ArchiveBuilder, Bundle, BundleContext, FrameworkError, Framework, FrameworkConfig, Properties, PropertyValue,
    ServiceEvent, ServiceEventKind, ServiceFactory, ServiceObject, ServiceProvider, ServiceRegistration,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const GREETER: &str = "com.example.Greeter";

struct Greeter {
    greeting: String,
}

fn started_framework() -> (TempDir, Framework) {
    let temp = TempDir::new().unwrap();
    let framework = Framework::new(FrameworkConfig::default_for(temp.path().join("storage"))).unwrap();
    framework.start().unwrap();
    (temp, framework)
}

/// Install and start a bundle without activator, returning its context
fn active_bundle(framework: &Framework, name: &str) -> (Bundle, BundleContext) {
    let bytes = ArchiveBuilder::new().symbolic_name(name).version("1.0.0").build().unwrap();
    let bundle = framework.install_bundle(name, bytes.as_slice()).unwrap();
    bundle.start().unwrap();
    let context = bundle.context().unwrap();
    (bundle, context)
}

fn greeter(text: &str) -> ServiceProvider {
    ServiceProvider::singleton(Greeter {
        greeting: text.to_string(),
    })
}

#[test]
fn test_higher_ranking_is_returned_first() {
    let (_temp, framework) = started_framework();
    let (_provider, ctx) = active_bundle(&framework, "provider");

    let low = ctx
        .register_service(&[GREETER], greeter("low"), Properties::new().with("service.ranking", 5i64))
        .unwrap();
    let high = ctx
        .register_service(&[GREETER], greeter("high"), Properties::new().with("service.ranking", 10i64))
        .unwrap();

    let refs = ctx.service_references(Some(GREETER), None).unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].id(), high.id());
    assert_eq!(refs[1].id(), low.id());
    assert_eq!(ctx.service_reference(GREETER).unwrap().unwrap().id(), high.id());
}

#[test]
fn test_equal_ranking_orders_by_service_id() {
    let (_temp, framework) = started_framework();
    let (_provider, ctx) = active_bundle(&framework, "provider");

    let first = ctx.register_service(&[GREETER], greeter("1"), Properties::new()).unwrap();
    let second = ctx.register_service(&[GREETER], greeter("2"), Properties::new()).unwrap();
    assert!(second.id() > first.id());

    let ids: Vec<u64> = ctx
        .service_references(Some(GREETER), None)
        .unwrap()
        .iter()
        .map(|r| r.id())
        .collect();
    assert_eq!(ids, vec![first.id(), second.id()]);
}

#[test]
fn test_non_long_ranking_is_ignored() {
    let (_temp, framework) = started_framework();
    let (_provider, ctx) = active_bundle(&framework, "provider");

    let text_ranked = ctx
        .register_service(&[GREETER], greeter("t"), Properties::new().with("service.ranking", "100"))
        .unwrap();
    assert_eq!(text_ranked.reference().unwrap().ranking(), 0);
}

#[test]
fn test_filter_selects_by_properties() {
    let (_temp, framework) = started_framework();
    let (_provider, ctx) = active_bundle(&framework, "provider");

    ctx.register_service(&[GREETER], greeter("en"), Properties::new().with("lang", "en").with("level", 3i64))
        .unwrap();
    let fr = ctx
        .register_service(&[GREETER], greeter("fr"), Properties::new().with("lang", "fr").with("level", 7i64))
        .unwrap();

    let refs = ctx
        .service_references(Some(GREETER), Some("(&(lang=f*)(level>=5))"))
        .unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].id(), fr.id());

    let by_class = ctx
        .service_references(None, Some(&format!("(objectClass={})", GREETER)))
        .unwrap();
    assert_eq!(by_class.len(), 2);
}

#[test]
fn test_malformed_filter_is_syntax_error() {
    let (_temp, framework) = started_framework();
    let (_provider, ctx) = active_bundle(&framework, "provider");

    match ctx.service_references(None, Some("(&(a=b)")) {
        Err(FrameworkError::InvalidSyntax { filter, .. }) => assert_eq!(filter, "(&(a=b)"),
        other => panic!("expected syntax error, got {:?}", other),
    }
}

#[test]
fn test_standard_properties_are_set() {
    let (_temp, framework) = started_framework();
    let (provider, ctx) = active_bundle(&framework, "provider");

    let registration = ctx
        .register_service(&[GREETER, "com.example.Named"], greeter("x"), Properties::new().with("service.id", 999i64))
        .unwrap();
    let reference = registration.reference().unwrap();

    assert_eq!(reference.property("service.id"), Some(PropertyValue::Long(registration.id() as i64)));
    assert_eq!(reference.property("service.bundleid"), Some(PropertyValue::Long(provider.id() as i64)));
    assert_eq!(reference.property("service.scope").unwrap().as_str(), Some("singleton"));
    assert!(reference.is_assignable_to("com.example.Named"));
    assert_eq!(reference.bundle(), Some(provider));
}

#[test]
fn test_typed_get_and_use_counting() {
    let (_temp, framework) = started_framework();
    let (_provider, provider_ctx) = active_bundle(&framework, "provider");
    let (consumer, consumer_ctx) = active_bundle(&framework, "consumer");

    provider_ctx
        .register_service(&[GREETER], greeter("hello"), Properties::new())
        .unwrap();
    let reference = consumer_ctx.service_reference(GREETER).unwrap().unwrap();

    let service = consumer_ctx.get_service_as::<Greeter>(&reference).unwrap().unwrap();
    assert_eq!(service.greeting, "hello");
    consumer_ctx.get_service(&reference).unwrap().unwrap();
    assert_eq!(reference.using_bundles(), vec![consumer.clone()]);
    assert_eq!(consumer.services_in_use().len(), 1);

    assert!(consumer_ctx.unget_service(&reference).unwrap());
    assert!(consumer_ctx.unget_service(&reference).unwrap());
    assert!(!consumer_ctx.unget_service(&reference).unwrap(), "count never goes below zero");
    assert!(reference.using_bundles().is_empty());
}

#[test]
fn test_unregister_while_in_use() {
    let (_temp, framework) = started_framework();
    let (_provider, provider_ctx) = active_bundle(&framework, "provider");
    let (_consumer, consumer_ctx) = active_bundle(&framework, "consumer");

    let registration = provider_ctx
        .register_service(&[GREETER], greeter("hello"), Properties::new())
        .unwrap();
    let reference = consumer_ctx.service_reference(GREETER).unwrap().unwrap();
    consumer_ctx.get_service(&reference).unwrap().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener_ctx = consumer_ctx.clone();
    consumer_ctx
        .add_service_listener(
            move |e: &ServiceEvent| {
                let still_usable = listener_ctx.get_service(&e.reference).unwrap().is_some();
                let visible = listener_ctx.service_references(Some(GREETER), None).unwrap().len();
                sink.lock().unwrap().push((e.kind, still_usable, visible));
            },
            None,
        )
        .unwrap();

    registration.unregister().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (kind, still_usable, visible) = seen[0];
    assert_eq!(kind, ServiceEventKind::Unregistering);
    assert!(still_usable, "listeners can still get the service during UNREGISTERING");
    assert_eq!(visible, 0, "the registration is hidden before UNREGISTERING is delivered");

    assert!(consumer_ctx.get_service(&reference).unwrap().is_none());
    assert!(reference.is_unregistered());
    assert!(reference.bundle().is_none());
    assert!(registration.reference().unwrap_err().is_illegal_state());
    assert!(registration.unregister().unwrap_err().is_illegal_state());
}

struct CountingFactory {
    created: AtomicUsize,
    released: AtomicUsize,
}

impl ServiceFactory for CountingFactory {
    fn get_service(&self, bundle: &Bundle, _registration: &ServiceRegistration) -> Option<ServiceObject> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(Greeter {
            greeting: format!("hello {}", bundle.id()),
        }))
    }

    fn unget_service(&self, _bundle: &Bundle, _registration: &ServiceRegistration, _service: ServiceObject) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_factory_creates_one_object_per_consumer() {
    let (_temp, framework) = started_framework();
    let (_provider, provider_ctx) = active_bundle(&framework, "provider");
    let (c1, ctx1) = active_bundle(&framework, "c1");
    let (c2, ctx2) = active_bundle(&framework, "c2");

    let factory = Arc::new(CountingFactory {
        created: AtomicUsize::new(0),
        released: AtomicUsize::new(0),
    });
    let registration = provider_ctx
        .register_service(&[GREETER], ServiceProvider::PerConsumerFactory(factory.clone()), Properties::new())
        .unwrap();
    let reference = registration.reference().unwrap();
    assert_eq!(reference.property("service.scope").unwrap().as_str(), Some("bundle"));

    let a = ctx1.get_service_as::<Greeter>(&reference).unwrap().unwrap();
    let again = ctx1.get_service_as::<Greeter>(&reference).unwrap().unwrap();
    let b = ctx2.get_service_as::<Greeter>(&reference).unwrap().unwrap();

    assert!(Arc::ptr_eq(&a, &again), "cached per consuming bundle");
    assert_eq!(a.greeting, format!("hello {}", c1.id()));
    assert_eq!(b.greeting, format!("hello {}", c2.id()));
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);

    ctx1.unget_service(&reference).unwrap();
    assert_eq!(factory.released.load(Ordering::SeqCst), 0);
    ctx1.unget_service(&reference).unwrap();
    assert_eq!(factory.released.load(Ordering::SeqCst), 1, "released when the count reaches zero");

    registration.unregister().unwrap();
    assert_eq!(factory.released.load(Ordering::SeqCst), 2, "remaining holders are released on unregister");
}

#[test]
fn test_stopping_consumer_releases_its_services() {
    let (_temp, framework) = started_framework();
    let (_provider, provider_ctx) = active_bundle(&framework, "provider");
    let (consumer, consumer_ctx) = active_bundle(&framework, "consumer");

    let registration = provider_ctx
        .register_service(&[GREETER], greeter("hello"), Properties::new())
        .unwrap();
    let reference = registration.reference().unwrap();
    consumer_ctx.get_service(&reference).unwrap();
    assert_eq!(reference.using_bundles().len(), 1);

    consumer.stop().unwrap();
    assert!(reference.using_bundles().is_empty());
    assert!(!consumer_ctx.is_valid());
    assert!(consumer_ctx.get_service(&reference).unwrap_err().is_illegal_state());
}

#[test]
fn test_stopping_provider_unregisters_its_services() {
    let (_temp, framework) = started_framework();
    let (provider, provider_ctx) = active_bundle(&framework, "provider");
    let (_consumer, consumer_ctx) = active_bundle(&framework, "consumer");

    provider_ctx
        .register_service(&[GREETER], greeter("hello"), Properties::new())
        .unwrap();
    assert_eq!(provider.registered_services().len(), 1);

    provider.stop().unwrap();
    assert!(consumer_ctx.service_references(Some(GREETER), None).unwrap().is_empty());
}

#[test]
fn test_listener_filters_and_modified_endmatch() {
    let (_temp, framework) = started_framework();
    let (_provider, provider_ctx) = active_bundle(&framework, "provider");
    let (_consumer, consumer_ctx) = active_bundle(&framework, "consumer");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    consumer_ctx
        .add_service_listener(move |e: &ServiceEvent| sink.lock().unwrap().push(e.kind), Some("(lang=en)"))
        .unwrap();

    provider_ctx
        .register_service(&[GREETER], greeter("fr"), Properties::new().with("lang", "fr"))
        .unwrap();
    let registration = provider_ctx
        .register_service(&[GREETER], greeter("en"), Properties::new().with("lang", "en"))
        .unwrap();
    registration.set_properties(Properties::new().with("lang", "en").with("x", 1i64)).unwrap();
    registration.set_properties(Properties::new().with("lang", "de")).unwrap();
    registration.unregister().unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ServiceEventKind::Registered,
            ServiceEventKind::Modified,
            ServiceEventKind::ModifiedEndmatch,
        ]
    );
}

#[test]
fn test_registering_without_class_is_rejected() {
    let (_temp, framework) = started_framework();
    let (_provider, ctx) = active_bundle(&framework, "provider");

    match ctx.register_service(&[], greeter("x"), Properties::new()) {
        Err(FrameworkError::InvalidArgument(_)) => {}
        other => panic!("expected invalid argument, got {:?}", other.map(|r| r.id())),
    }
}
