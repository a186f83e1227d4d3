//! Proxy Tests - Dispatch Call Shape and Typed Wrappers
//!
//! These tests check what actually reaches the external object:
//! - Argument order, flags and named arguments per member kind
//! - Locale threading and fixed dispatch ids
//! - Exception info and argument error indexes
//! - Typed wrappers over dynamic proxies

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::*;
use oleauto::decl::{InterfaceBuilder, InterfaceDecl, MemberDecl};
use oleauto::loopback::{HostedObject, LoopbackRuntime};
use oleauto::runtime::{DispatchFlags, RawDispatch};
use oleauto::types::hresult;
use oleauto::{
    AutomationError, ComInterface, DispId, DynamicProxy, HResult, Lcid, ObjectFactory, Result, Value, ValueKind,
    Variant,
};

fn recording_decl() -> Arc<InterfaceDecl> {
    InterfaceBuilder::new("Recorder")
        .member(
            MemberDecl::method("Add3")
                .params([ValueKind::I32, ValueKind::Str, ValueKind::Bool])
                .returning(ValueKind::Any),
        )
        .member(MemberDecl::get("Caption").returning(ValueKind::Str))
        .member(MemberDecl::put("Caption").param(ValueKind::Str))
        .member(MemberDecl::method("Fixed").with_dispid(9))
        .member(MemberDecl::method("Small").returning(ValueKind::I16))
        .build()
        .unwrap()
}

fn recording_proxy(factory: &ObjectFactory) -> (Arc<RecordingDispatch>, DynamicProxy) {
    let recorder = RecordingDispatch::new(&[("Add3", 5), ("Caption", 6), ("Small", 7)]);
    let raw: RawDispatch = recorder.clone();
    let proxy = factory.create_proxy(&raw, recording_decl()).unwrap();
    (recorder, proxy)
}

/// Test: arguments arrive last-first, with method and get flags
#[test]
fn test_arguments_reach_native_reversed() {
    init_logging();

    let fixture = Fixture::new();
    let (recorder, proxy) = recording_proxy(&fixture.factory);

    proxy
        .invoke("Add3", vec![Value::I32(1), Value::from("b"), Value::Bool(true)])
        .unwrap();

    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].dispid, DispId(5));
    assert_eq!(calls[0].flags, DispatchFlags::METHOD | DispatchFlags::PROPERTYGET);
    assert_eq!(
        calls[0].params.args,
        vec![Variant::Bool(true), Variant::BStr("b".into()), Variant::I4(1)]
    );
    assert!(calls[0].params.named_args.is_empty());
}

/// Test: a property put carries one value named DISPID_PROPERTYPUT
#[test]
fn test_property_put_shape() {
    init_logging();

    let fixture = Fixture::new();
    let (recorder, proxy) = recording_proxy(&fixture.factory);

    proxy.invoke("setCaption", vec![Value::from("Report")]).unwrap();
    let calls = recorder.calls();
    assert_eq!(calls[0].dispid, DispId(6));
    assert_eq!(calls[0].flags, DispatchFlags::PROPERTYPUT);
    assert_eq!(calls[0].params.named_args, vec![DispId::PROPERTYPUT]);
    assert_eq!(calls[0].params.args, vec![Variant::BStr("Report".into())]);

    // A put takes exactly one value
    let err = proxy.invoke("setCaption", vec![]).unwrap_err();
    assert!(matches!(err, AutomationError::Marshaling(_)));
    assert_eq!(recorder.calls().len(), 1);
}

/// Test: the factory locale reaches every call, falling back to the runtime default
#[test]
fn test_locale_threaded() {
    init_logging();

    let runtime = Arc::new(LoopbackRuntime::new().with_locale(Lcid(0x0407)));
    let factory = ObjectFactory::new(runtime);
    let (recorder, proxy) = recording_proxy(&factory);

    proxy.invoke("Caption", vec![]).unwrap();
    factory.set_locale(Some(Lcid::EN_US));
    proxy.invoke("Caption", vec![]).unwrap();

    let locales: Vec<Lcid> = recorder.calls().iter().map(|c| c.lcid).collect();
    assert_eq!(locales, vec![Lcid(0x0407), Lcid::EN_US]);
}

/// Test: members with a fixed id never go through name lookup
#[test]
fn test_fixed_dispid_skips_lookup() {
    init_logging();

    let fixture = Fixture::new();
    let (recorder, proxy) = recording_proxy(&fixture.factory);

    // "Fixed" is unknown to the recorder's name table
    proxy.invoke("Fixed", vec![]).unwrap();
    assert_eq!(recorder.calls()[0].dispid, DispId(9));
}

/// Test: results that do not fit the declared shape are rejected
#[test]
fn test_result_out_of_range() {
    init_logging();

    let fixture = Fixture::new();
    let (recorder, proxy) = recording_proxy(&fixture.factory);
    recorder.reply_with(Variant::I4(70_000));

    let err = proxy.invoke("Small", vec![]).unwrap_err();
    assert!(matches!(err, AutomationError::Marshaling(ref m) if m.contains("70000")));
}

/// Test: declared order survives the round trip through a hosted object
#[test]
fn test_hosted_argument_order() {
    init_logging();

    let fixture = Fixture::new();
    let tally = fixture.factory.create_object(&tally_decl()).unwrap();
    let joined = tally
        .invoke("Concat", vec![Value::from("a"), Value::from("b"), Value::from("c")])
        .unwrap();
    assert_eq!(joined, Value::from("a,b,c"));
}

/// Test: exception source, description and argument index reach the caller
#[test]
fn test_failures_carry_details() {
    init_logging();

    let fixture = Fixture::new();
    let tally = fixture.factory.create_object(&tally_decl()).unwrap();

    let err = tally.invoke("Fail", vec![]).unwrap_err();
    match &err {
        AutomationError::Com(com) => {
            assert_eq!(com.hresult, HResult(hresult::DISP_E_EXCEPTION));
            assert_eq!(com.exception_source.as_deref(), Some("Integration.Tally"));
            assert_eq!(com.description.as_deref(), Some("tally refused"));
            assert_eq!(com.context, "Tally.Fail");
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = tally.invoke("Sleep", vec![Value::from("soon")]).unwrap_err();
    assert_eq!(err.hresult(), Some(HResult(hresult::DISP_E_TYPEMISMATCH)));
    assert!(err.to_string().ends_with("(puArgErr=0)"));
}

/// Test: proxies hash and compare by object identity
#[test]
fn test_identity_in_collections() {
    init_logging();

    let fixture = Fixture::new();
    let decl = tally_decl();
    let first = fixture.factory.create_object(&decl).unwrap();
    let second = fixture.factory.create_object(&decl).unwrap();
    let again = first.query_interface(&InterfaceDecl::dispatch()).unwrap();

    let set: HashSet<DynamicProxy> = [first.clone(), second, again, first].into_iter().collect();
    assert_eq!(set.len(), 2);
}

/// Typed wrapper over the Tally class
struct TallyHandle {
    proxy: DynamicProxy,
}

impl TallyHandle {
    fn increment(&self) -> Result<i64> {
        self.proxy
            .invoke("Increment", vec![])?
            .as_i64()
            .ok_or_else(|| AutomationError::Marshaling("Increment returned no number".to_string()))
    }
}

impl ComInterface for TallyHandle {
    fn declaration() -> Arc<InterfaceDecl> {
        tally_decl()
    }

    fn from_proxy(proxy: DynamicProxy) -> Self {
        Self { proxy }
    }

    fn proxy(&self) -> &DynamicProxy {
        &self.proxy
    }
}

/// Test: typed creation and attaching to the running instance
#[test]
fn test_typed_create_and_fetch() {
    init_logging();

    let fixture = Fixture::new();
    let created = fixture.factory.create::<TallyHandle>().unwrap();
    assert_eq!(created.increment().unwrap(), 1);
    assert_eq!(created.increment().unwrap(), 2);

    let err = fixture.factory.fetch::<TallyHandle>().err().unwrap();
    assert_eq!(err.hresult(), Some(HResult(hresult::MK_E_UNAVAILABLE)));

    let running = HostedObject::new(Arc::new(Tally::new(fixture.stats.clone())));
    fixture.runtime.register_active_object(TALLY, running.clone());
    let fetched = fixture.factory.fetch::<TallyHandle>().unwrap();
    assert_eq!(fetched.increment().unwrap(), 1);
    assert_eq!(running.ref_count(), 1);

    let again: TallyHandle = fetched.proxy().query().unwrap();
    assert_eq!(again.proxy(), fetched.proxy());
}
