//! Variant Tests - Values Crossing the Bridge
//!
//! These tests send host values through a hosted echo object and check
//! what the object saw and what came back:
//! - Dates, including the pre-1900 negative encoding
//! - Enum constants marshaled as integers
//! - Nested arrays and column-major transposition
//! - Binary encoding of received values

mod common;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;

use common::*;
use oleauto::decl::{InterfaceBuilder, InterfaceDecl, MemberDecl};
use oleauto::loopback::{AutomationObject, InvokeContext};
use oleauto::runtime::{DispatchFlags, DispatchObject, InvokeFailure};
use oleauto::types::hresult;
use oleauto::variant::{transpose, wire};
use oleauto::{AutomationError, Clsid, DispId, EnumDecl, HResult, Value, ValueKind, Variant};

const ECHO_PROG_ID: &str = "Integration.Echo";

mod echo_dispid {
    pub const ECHO: i32 = 1;
    pub const TRANSPOSE: i32 = 2;
    pub const NOTHING: i32 = 3;
}

/// Returns its first argument and remembers every argument list it got
struct Echo {
    received: Arc<Mutex<Vec<Vec<Variant>>>>,
}

impl AutomationObject for Echo {
    fn dispid_of(&self, name: &str) -> Option<DispId> {
        match name {
            "Echo" => Some(DispId(echo_dispid::ECHO)),
            "Transpose" => Some(DispId(echo_dispid::TRANSPOSE)),
            "Nothing" => Some(DispId(echo_dispid::NOTHING)),
            _ => None,
        }
    }

    fn invoke(
        &self,
        _ctx: &InvokeContext<'_>,
        dispid: DispId,
        _flags: DispatchFlags,
        args: &[Variant],
    ) -> Result<Variant, InvokeFailure> {
        self.received.lock().push(args.to_vec());
        match dispid.0 {
            echo_dispid::ECHO => {
                let value = args.first().cloned().unwrap_or_default();
                // The result carries its own count
                value.for_each_dispatch(&mut |raw| {
                    raw.add_ref();
                });
                Ok(value)
            }
            echo_dispid::TRANSPOSE => {
                let rows = match args.first() {
                    Some(Variant::Array(rows)) => rows
                        .iter()
                        .map(|row| match row {
                            Variant::Array(cells) => Ok(cells.clone()),
                            _ => Err(InvokeFailure::new(hresult::DISP_E_TYPEMISMATCH).with_arg_err(0)),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => return Err(InvokeFailure::new(hresult::DISP_E_TYPEMISMATCH).with_arg_err(0)),
                };
                let columns = transpose(&rows)
                    .map_err(|_| InvokeFailure::new(hresult::DISP_E_TYPEMISMATCH).with_arg_err(0))?;
                Ok(Variant::Array(columns.into_iter().map(Variant::Array).collect()))
            }
            echo_dispid::NOTHING => Ok(Variant::Dispatch(None)),
            _ => Err(InvokeFailure::new(hresult::DISP_E_MEMBERNOTFOUND)),
        }
    }
}

fn direction() -> Arc<EnumDecl> {
    EnumDecl::new("XlDirection", [("xlUp", -4162), ("xlDown", -4121), ("xlToLeft", -4159)])
}

fn echo_decl() -> Arc<InterfaceDecl> {
    InterfaceBuilder::new("Echo")
        .prog_id(ECHO_PROG_ID)
        .member(MemberDecl::method("Echo"))
        .member(
            MemberDecl::method("Echo")
                .named("EchoDate")
                .param(ValueKind::Date)
                .returning(ValueKind::Date),
        )
        .member(
            MemberDecl::method("Echo")
                .named("EchoDirection")
                .param(ValueKind::Enum(direction()))
                .returning(ValueKind::Enum(direction())),
        )
        .member(
            MemberDecl::method("Echo")
                .named("EchoGrid")
                .returning(ValueKind::array_of(ValueKind::array_of(ValueKind::I32))),
        )
        .member(
            MemberDecl::method("Echo")
                .named("EchoTally")
                .returning(ValueKind::object(tally_decl())),
        )
        .member(MemberDecl::method("Transpose").returning(ValueKind::array_of(ValueKind::array_of(ValueKind::Any))))
        .member(MemberDecl::method("Nothing").returning(ValueKind::Object(None)))
        .build()
        .unwrap()
}

/// Fixture with the echo class registered next to the tally
struct EchoFixture {
    fixture: Fixture,
    received: Arc<Mutex<Vec<Vec<Variant>>>>,
}

impl EchoFixture {
    fn new() -> Self {
        let fixture = Fixture::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let shared = received.clone();
        fixture.runtime.register_class(
            Clsid::parse("{ec400000-0000-4000-8000-000000000001}").unwrap(),
            Some(ECHO_PROG_ID),
            move || Echo { received: shared.clone() },
        );
        Self { fixture, received }
    }

    fn last_received(&self) -> Vec<Variant> {
        self.received.lock().last().cloned().unwrap_or_default()
    }
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32, ms: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_milli_opt(h, min, s, ms)
        .unwrap()
}

/// Test: timestamps survive the trip and use the OLE date encoding on the way
#[test]
fn test_dates_cross_the_bridge() {
    init_logging();

    let echo = EchoFixture::new();
    let proxy = echo.fixture.factory.create_object(&echo_decl()).unwrap();

    let cases = [
        (at(1899, 12, 30, 0, 0, 0, 0), 0.0),
        (at(1900, 1, 1, 18, 0, 0, 0), 2.75),
        (at(1899, 12, 29, 6, 0, 0, 0), -1.25),
    ];
    for (when, encoded) in cases {
        let back = proxy.invoke("EchoDate", vec![Value::Date(when)]).unwrap();
        assert_eq!(back, Value::Date(when));
        assert_eq!(echo.last_received(), vec![Variant::Date(encoded)]);
    }

    // Millisecond precision is kept
    let precise = at(2024, 2, 29, 23, 59, 59, 999);
    assert_eq!(proxy.invoke("EchoDate", vec![Value::Date(precise)]).unwrap(), Value::Date(precise));
}

/// Test: enum constants travel as integers and come back as constants
#[test]
fn test_enum_constants() {
    init_logging();

    let echo = EchoFixture::new();
    let proxy = echo.fixture.factory.create_object(&echo_decl()).unwrap();
    let up = direction().value("xlUp").unwrap();

    let back = proxy.invoke("EchoDirection", vec![Value::Enum(up.clone())]).unwrap();
    assert_eq!(echo.last_received(), vec![Variant::I8(-4162)]);
    assert_eq!(back.as_enum().map(|e| e.name()), Some("xlUp"));
    assert_eq!(back, Value::Enum(up));

    // A number with no matching constant is rejected on the way back
    let err = proxy.invoke("EchoDirection", vec![Value::I32(7)]).unwrap_err();
    assert!(matches!(err, AutomationError::Marshaling(ref m) if m.contains("XlDirection")));
}

/// Test: nested arrays keep their shape and element types
#[test]
fn test_nested_arrays() {
    init_logging();

    let echo = EchoFixture::new();
    let proxy = echo.fixture.factory.create_object(&echo_decl()).unwrap();

    let grid = Value::Array(vec![
        Value::Array(vec![Value::I16(1), Value::I16(2)]),
        Value::Array(vec![Value::I16(3), Value::I16(4)]),
    ]);
    let back = proxy.invoke("EchoGrid", vec![grid]).unwrap();
    assert_eq!(
        back,
        Value::Array(vec![
            Value::Array(vec![Value::I32(1), Value::I32(2)]),
            Value::Array(vec![Value::I32(3), Value::I32(4)]),
        ])
    );

    // Undeclared results keep their natural types
    let mixed = Value::Array(vec![Value::I32(1), Value::from("two"), Value::Bool(true), Value::Null]);
    assert_eq!(proxy.invoke("Echo", vec![mixed.clone()]).unwrap(), mixed);
}

/// Test: consumers reading column-first get transposed data
#[test]
fn test_transposed_grid() {
    init_logging();

    let echo = EchoFixture::new();
    let proxy = echo.fixture.factory.create_object(&echo_decl()).unwrap();

    let rows = Value::Array(vec![
        Value::Array(vec![Value::from("a"), Value::I32(1), Value::Bool(false)]),
        Value::Array(vec![Value::from("b"), Value::I32(2), Value::Bool(true)]),
    ]);
    let columns = proxy.invoke("Transpose", vec![rows]).unwrap();
    assert_eq!(
        columns,
        Value::Array(vec![
            Value::Array(vec![Value::from("a"), Value::from("b")]),
            Value::Array(vec![Value::I32(1), Value::I32(2)]),
            Value::Array(vec![Value::Bool(false), Value::Bool(true)]),
        ])
    );

    let ragged = Value::Array(vec![
        Value::Array(vec![Value::I32(1), Value::I32(2)]),
        Value::Array(vec![Value::I32(3)]),
    ]);
    let err = proxy.invoke("Transpose", vec![ragged]).unwrap_err();
    assert_eq!(err.hresult(), Some(HResult(hresult::DISP_E_TYPEMISMATCH)));
}

/// Test: ragged rows are rejected before anything is built
#[test]
fn test_transpose_rejects_ragged_rows() {
    let rows = vec![vec![Variant::I4(1), Variant::I4(2)], vec![Variant::I4(3)]];
    let err = transpose(&rows).unwrap_err();
    assert!(matches!(err, AutomationError::Marshaling(ref m) if m == "row 1 has 1 columns, expected 2"));

    assert!(transpose(&[]).unwrap().is_empty());
}

/// Test: object references echo back as the same object
#[test]
fn test_object_echo_and_null_object() {
    init_logging();

    let echo = EchoFixture::new();
    let factory = &echo.fixture.factory;
    let proxy = factory.create_object(&echo_decl()).unwrap();
    let tally = factory.create_object(&tally_decl()).unwrap();
    tally.invoke("setValue", vec![Value::I64(5)]).unwrap();

    let back = proxy
        .invoke("EchoTally", vec![Value::Object(tally.clone())])
        .unwrap()
        .into_object()
        .unwrap();
    assert_eq!(back, tally);
    assert_eq!(back.interface().name(), "Tally");
    assert_eq!(back.get_property("Value", vec![]).unwrap(), Value::I64(5));

    let hosted = echo.fixture.hosted();
    let tally_hosted = hosted.iter().find(|h| h.ref_count() == 2).cloned().unwrap();
    drop(back);
    assert_eq!(tally_hosted.ref_count(), 1);

    assert_eq!(proxy.invoke("Nothing", vec![]).unwrap(), Value::Null);
}

/// Test: host-only values are refused before the object is called
#[test]
fn test_opaque_values_refused() {
    init_logging();

    let echo = EchoFixture::new();
    let proxy = echo.fixture.factory.create_object(&echo_decl()).unwrap();

    let opaque = Value::Opaque(Arc::new(String::from("host only")));
    let err = proxy.invoke("Echo", vec![Value::Array(vec![Value::I32(1), opaque])]).unwrap_err();
    assert!(matches!(err, AutomationError::Marshaling(ref m) if m.contains("argument 0")));
    assert!(echo.received.lock().is_empty());
}

/// Test: what an object received can be written out and read back
#[test]
fn test_received_values_encode() {
    init_logging();

    let echo = EchoFixture::new();
    let proxy = echo.fixture.factory.create_object(&echo_decl()).unwrap();
    let row = Value::Array(vec![Value::F64(1.5), Value::from("hi"), Value::I64(-2), Value::Empty]);
    proxy.invoke("Echo", vec![row]).unwrap();

    let received = echo.last_received().remove(0);
    let mut buf = BytesMut::with_capacity(wire::encoded_size(&received));
    wire::encode(&received, &mut buf).unwrap();
    assert_eq!(buf.len(), wire::encoded_size(&received));

    let mut bytes = buf.freeze();
    assert_eq!(wire::decode(&mut bytes).unwrap(), received);
    assert!(bytes.is_empty());

    // BSTR payloads are length-prefixed UTF-16LE
    let mut buf = BytesMut::new();
    wire::encode(&Variant::BStr("hi".to_string()), &mut buf).unwrap();
    assert_eq!(&buf[..], &[8, 0, 4, 0, 0, 0, b'h', 0, b'i', 0]);

    // A truncated payload reports how much was missing
    let mut short = Bytes::from_static(&[8, 0, 4, 0, 0, 0, b'h', 0]);
    assert!(matches!(
        wire::decode(&mut short),
        Err(AutomationError::BufferUnderflow { needed: 4, have: 2 })
    ));
}

/// Test: live object references have no binary form
#[test]
fn test_object_references_not_encodable() {
    init_logging();

    let fixture = Fixture::new();
    let tally = fixture.factory.create_object(&tally_decl()).unwrap();
    let raw = tally.raw_dispatch().unwrap();

    let mut buf = BytesMut::new();
    let err = wire::encode(&Variant::Dispatch(Some(raw)), &mut buf).unwrap_err();
    assert!(matches!(err, AutomationError::Marshaling(_)));
}
