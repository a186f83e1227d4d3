//! Callback Tests - Events From External Objects
//!
//! These tests connect listeners to a hosted event source:
//! - Event arguments decoded in declared order
//! - Listeners running off the apartment, on named threads
//! - Object arguments pinned for the listener and released afterwards
//! - Listener failures reported locally, never to the source

mod common;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use common::*;
use oleauto::decl::{InterfaceBuilder, MemberDecl};
use oleauto::runtime::{DispParams, DispatchFlags, DispatchObject};
use oleauto::types::hresult;
use oleauto::{AutomationError, CallbackError, DispId, EventHandlers, HResult, Lcid, Value};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Test: every fired event reaches the listener with declared-order arguments
#[test]
fn test_events_delivered_in_declared_order() {
    init_logging();

    let fixture = Fixture::new();
    let tally = fixture.factory.create_object(&tally_decl()).unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let listener = EventHandlers::new().on("Tick", move |args| {
        tx.lock().send(args).ok();
        Ok(())
    });
    let subscription = tally.advise(&tally_events(), Arc::new(listener)).unwrap();
    assert!(subscription.cookie() > 0);

    let delivered = tally.invoke("Fire", vec![Value::I32(3)]).unwrap();
    assert_eq!(delivered, Value::I32(3));

    // One thread per event: arrival order is not guaranteed
    let mut events: Vec<Vec<Value>> = (0..3).map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap()).collect();
    events.sort_by_key(|args| args[0].as_i64());
    for (i, args) in events.iter().enumerate() {
        assert_eq!(
            args,
            &vec![Value::I32(i as i32), Value::from(format!("tick {i}")), Value::Bool(i % 2 == 0)]
        );
    }
}

/// Test: listeners run on named callback threads, not on the apartment
#[test]
fn test_listener_runs_off_apartment() {
    init_logging();

    let fixture = Fixture::new();
    let tally = fixture.factory.create_object(&tally_decl()).unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let listener = EventHandlers::new().on("Tick", move |_| {
        let current = thread::current();
        tx.lock().send((current.id(), current.name().map(str::to_string))).ok();
        Ok(())
    });
    let _subscription = tally.advise(&tally_events(), Arc::new(listener)).unwrap();
    tally.invoke("Fire", vec![Value::I32(1)]).unwrap();

    let (id, name) = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_ne!(Some(id), fixture.factory.apartment().worker_thread_id());
    assert_eq!(name.as_deref(), Some("com-callback"));
}

/// Test: after unadvise the source has no sink left to call
#[test]
fn test_unadvise_stops_delivery() {
    init_logging();

    let fixture = Fixture::new();
    let tally = fixture.factory.create_object(&tally_decl()).unwrap();
    let subscription = tally.advise(&tally_events(), Arc::new(EventHandlers::new())).unwrap();
    let hosted = fixture.runtime.instances()[0].clone();
    assert_eq!(hosted.connection_count(&TALLY_EVENTS), 1);

    tally.unadvise(subscription).unwrap();
    assert_eq!(hosted.connection_count(&TALLY_EVENTS), 0);
    assert_eq!(tally.invoke("Fire", vec![Value::I32(2)]).unwrap(), Value::I32(0));
}

/// Test: an object passed to a listener is usable and released afterwards
#[test]
fn test_object_argument_pinned_then_released() {
    init_logging();

    let fixture = Fixture::new();
    let tally = fixture.factory.create_object(&tally_decl()).unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let listener = EventHandlers::new().on("Spawned", move |args| {
        let child = args[0].as_object().expect("object argument");
        let value = child.get_property("Value", vec![])?;
        tx.lock().send(value).ok();
        Ok(())
    });
    let _subscription = tally.advise(&tally_events(), Arc::new(listener)).unwrap();

    tally.invoke("Spawn", vec![]).unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), Value::I64(0));

    let child = fixture.stats.children.lock()[0].clone();
    assert!(wait_until(RECV_TIMEOUT, || child.ref_count() == 0));
}

/// Test: listener errors and panics go to the error channel only
#[test]
fn test_listener_failures_stay_local() {
    init_logging();

    let fixture = Fixture::new();
    let tally = fixture.factory.create_object(&tally_decl()).unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let listener = EventHandlers::new()
        .on("Tick", |args| match args[0].as_i64() {
            Some(0) => Err(AutomationError::InvalidData("first tick rejected".to_string())),
            _ => panic!("listener gave up"),
        })
        .on_error(move |error| {
            tx.lock().send(error).ok();
        });
    let _subscription = tally.advise(&tally_events(), Arc::new(listener)).unwrap();

    // The source sees two successful deliveries
    assert_eq!(tally.invoke("Fire", vec![Value::I32(2)]).unwrap(), Value::I32(2));

    let errors: Vec<CallbackError> = (0..2).map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap()).collect();
    assert!(errors.iter().any(|e| matches!(e, CallbackError::Handler { member, .. } if member == "Tick")));
    assert!(errors
        .iter()
        .any(|e| matches!(e, CallbackError::Panicked { message, .. } if message == "listener gave up")));

    // The object is still fine
    assert_eq!(tally.invoke("Increment", vec![]).unwrap(), Value::I64(1));
}

/// Test: an event id the declaration does not know is reported and ignored
#[test]
fn test_unknown_event_id() {
    init_logging();

    let fixture = Fixture::new();
    let tally = fixture.factory.create_object(&tally_decl()).unwrap();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let listener = EventHandlers::new().on_error(move |error| {
        tx.lock().send(error).ok();
    });
    let subscription = tally.advise(&tally_events(), Arc::new(listener)).unwrap();

    let result = subscription
        .sink()
        .invoke(DispId(42), Lcid::USER_DEFAULT, DispatchFlags::METHOD, &DispParams::default())
        .unwrap();
    assert!(result.is_nothing());
    assert!(matches!(
        rx.recv_timeout(RECV_TIMEOUT).unwrap(),
        CallbackError::UnknownDispId(DispId(42))
    ));
}

/// Test: connecting needs an event IID the object actually sources
#[test]
fn test_advise_preconditions() {
    init_logging();

    let fixture = Fixture::new();
    let tally = fixture.factory.create_object(&tally_decl()).unwrap();

    let no_iid = InterfaceBuilder::new("Anonymous")
        .member(MemberDecl::method("Tick").with_dispid(1))
        .build()
        .unwrap();
    let err = tally.advise(&no_iid, Arc::new(EventHandlers::new())).err().unwrap();
    assert!(matches!(err, AutomationError::Declaration(_)));

    let foreign = InterfaceBuilder::new("ForeignEvents")
        .iid(oleauto::Iid::parse("{0c0c0c0c-0000-4000-8000-000000000001}").unwrap())
        .build()
        .unwrap();
    let err = tally.advise(&foreign, Arc::new(EventHandlers::new())).err().unwrap();
    assert_eq!(err.hresult(), Some(HResult(hresult::CONNECT_E_NOCONNECTION)));
}
