//! Running Object Table Tests - Enumeration and Filtering
//!
//! These tests populate the loopback running object table and walk it:
//! - Every entry enumerated exactly once
//! - Look-ahead that never consumes entries
//! - Filtering by interface
//! - Independent enumerations from concurrent callers

mod common;

use std::sync::Arc;

use futures::future::join_all;

use common::*;
use oleauto::decl::{InterfaceBuilder, InterfaceDecl};
use oleauto::loopback::{AutomationObject, HostedObject, InvokeContext};
use oleauto::runtime::{DispatchFlags, InvokeFailure};
use oleauto::{DispId, Iid, Value, Variant};

const SHEET_IID: Iid = Iid(uuid::Uuid::from_u128(0x5ee70000_0000_4000_8000_000000000001));

/// Object answering for an extra interface
struct Sheet;

impl AutomationObject for Sheet {
    fn interfaces(&self) -> Vec<Iid> {
        vec![SHEET_IID]
    }

    fn dispid_of(&self, name: &str) -> Option<DispId> {
        (name == "Kind").then_some(DispId(1))
    }

    fn invoke(
        &self,
        _ctx: &InvokeContext<'_>,
        _dispid: DispId,
        _flags: DispatchFlags,
        _args: &[Variant],
    ) -> Result<Variant, InvokeFailure> {
        Ok(Variant::BStr("sheet".to_string()))
    }
}

fn sheet_decl() -> Arc<InterfaceDecl> {
    InterfaceBuilder::new("Sheet").iid(SHEET_IID).build().unwrap()
}

/// Register `count` tallies named `Book0..` holding their index
fn populate(fixture: &Fixture, count: usize) -> Vec<Arc<HostedObject>> {
    (0..count)
        .map(|i| {
            let hosted = HostedObject::new(Arc::new(Tally::new(fixture.stats.clone())));
            fixture.runtime.register_running_object(&format!("Book{i}"), hosted.clone());
            hosted
        })
        .collect()
}

/// Test: every registered object comes back once, in table order
#[test]
fn test_enumerate_every_entry() {
    init_logging();

    let fixture = Fixture::new();
    const K: usize = 12;
    let hosted = populate(&fixture, K);
    let table = fixture.factory.running_object_table().unwrap();

    let objects = table.get_active_objects().unwrap();
    assert_eq!(objects.len(), K);

    for (i, object) in objects.iter().enumerate() {
        object.set_property("Value", Value::I64(i as i64)).unwrap();
    }
    for (i, object) in objects.iter().enumerate() {
        assert_eq!(object.get_property("Value", vec![]).unwrap(), Value::I64(i as i64));
    }
    assert!(hosted.iter().all(|h| h.ref_count() == 1));

    drop(objects);
    assert!(hosted.iter().all(|h| h.ref_count() == 0));
}

/// Test: asking for the next entry repeatedly does not move the cursor
#[test]
fn test_has_next_does_not_advance() {
    init_logging();

    let fixture = Fixture::new();
    const K: usize = 5;
    populate(&fixture, K);

    let mut objects = fixture.factory.running_object_table().unwrap().enumerate().unwrap();
    for _ in 0..100 {
        assert!(objects.has_next());
    }
    assert_eq!(fixture.runtime.cursor_steps(), 1);
    assert_eq!(objects.peek_moniker().map(|m| m.display_name.clone()), Some("Book0".to_string()));

    let mut seen = 0;
    while objects.has_next() {
        assert!(objects.next().unwrap().is_ok());
        assert!(objects.has_next() || seen == K - 1);
        seen += 1;
    }
    assert_eq!(seen, K);
    assert_eq!(fixture.runtime.cursor_steps(), K + 1);
    assert!(objects.next().is_none());
}

/// Test: only objects answering the interface are returned
#[test]
fn test_filter_by_interface() {
    init_logging();

    let fixture = Fixture::new();
    let tallies = populate(&fixture, 3);
    let sheets: Vec<_> = (0..2)
        .map(|i| {
            let sheet = HostedObject::new(Arc::new(Sheet));
            fixture.runtime.register_running_object(&format!("Sheet{i}"), sheet.clone());
            sheet
        })
        .collect();

    let table = fixture.factory.running_object_table().unwrap();
    let found = table.get_active_objects_by_interface(&sheet_decl()).unwrap();
    assert_eq!(found.len(), 2);
    for sheet in &found {
        assert_eq!(sheet.interface().name(), "Sheet");
        assert_eq!(sheet.get_property("Kind", vec![]).unwrap(), Value::from("sheet"));
    }

    // Rejected candidates were released on the way
    assert!(tallies.iter().all(|t| t.ref_count() == 0));
    assert!(sheets.iter().all(|s| s.ref_count() == 1));
}

/// Test: the running instance of a class is listed under its class moniker
#[test]
fn test_active_object_listed() {
    init_logging();

    let fixture = Fixture::new();
    let hosted = HostedObject::new(Arc::new(Tally::new(fixture.stats.clone())));
    fixture.runtime.register_active_object(TALLY, hosted);

    let objects = fixture.factory.running_object_table().unwrap().enumerate().unwrap();
    let moniker = objects.peek_moniker().cloned().unwrap();
    assert_eq!(moniker.display_name, format!("!{TALLY}"));

    let fetched = fixture.factory.fetch_object(&tally_decl()).unwrap();
    let listed: Vec<_> = objects.map(Result::unwrap).collect();
    assert_eq!(listed, vec![fetched]);
}

/// Test: concurrent enumerations are independent of each other
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enumerations() {
    init_logging();

    let fixture = Arc::new(Fixture::new());
    const K: usize = 8;
    let hosted = populate(&fixture, K);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let fixture = fixture.clone();
            tokio::task::spawn_blocking(move || {
                let table = fixture.factory.running_object_table().unwrap();
                table.get_active_objects().map(|objects| objects.len())
            })
        })
        .collect();

    let counts: Vec<usize> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    assert_eq!(counts, vec![K; 6]);
    assert!(hosted.iter().all(|h| h.ref_count() == 0));
}
