//! Automation Hello Example
//!
//! A greeter class hosted by the loopback runtime, and the typed wrapper
//! client code uses to drive it through a dynamic proxy. The greeter raises
//! a `Greeted` event after every greeting.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use oleauto::decl::{InterfaceBuilder, InterfaceDecl, MemberDecl};
use oleauto::loopback::{AutomationObject, InvokeContext, LoopbackRuntime};
use oleauto::runtime::{DispatchFlags, InvokeFailure};
use oleauto::types::hresult;
use oleauto::{AutomationError, Clsid, ComInterface, DispId, DynamicProxy, Iid, Result, Value, ValueKind, Variant};

pub const GREETER_PROG_ID: &str = "Automation.Greeter";

/// Greeter class id
pub const GREETER_CLSID: Clsid = Clsid(Uuid::from_u128(0x6e7e7e70_0000_4000_8000_00000000a001));

/// Greeter event interface id
pub const GREETER_EVENTS: Iid = Iid(Uuid::from_u128(0x6e7e7e70_0000_4000_8000_00000000e001));

/// Greeter dispatch ids
pub mod dispid {
    pub const SAY_HELLO: i32 = 1;
    pub const ECHO: i32 = 2;
    pub const COUNT: i32 = 3;
    pub const GREETING: i32 = 4;

    /// Event ids
    pub const GREETED: i32 = 1;
}

/// Hosted greeter implementation
pub struct Greeter {
    greeting: Mutex<String>,
    count: AtomicI32,
}

impl Default for Greeter {
    fn default() -> Self {
        Self {
            greeting: Mutex::new("Hello".to_string()),
            count: AtomicI32::new(0),
        }
    }
}

fn text_arg(args: &[Variant], index: usize) -> std::result::Result<String, InvokeFailure> {
    match args.get(index) {
        Some(Variant::BStr(s)) => Ok(s.clone()),
        Some(_) => Err(InvokeFailure::new(hresult::DISP_E_TYPEMISMATCH).with_arg_err(index as u32)),
        None => Err(InvokeFailure::new(hresult::DISP_E_PARAMNOTFOUND).with_arg_err(index as u32)),
    }
}

impl AutomationObject for Greeter {
    fn event_interfaces(&self) -> Vec<Iid> {
        vec![GREETER_EVENTS]
    }

    fn dispid_of(&self, name: &str) -> Option<DispId> {
        let id = match name.to_ascii_lowercase().as_str() {
            "sayhello" => dispid::SAY_HELLO,
            "echo" => dispid::ECHO,
            "count" => dispid::COUNT,
            "greeting" => dispid::GREETING,
            _ => return None,
        };
        Some(DispId(id))
    }

    fn invoke(
        &self,
        ctx: &InvokeContext<'_>,
        member: DispId,
        flags: DispatchFlags,
        args: &[Variant],
    ) -> std::result::Result<Variant, InvokeFailure> {
        match member.0 {
            dispid::SAY_HELLO => {
                let name = text_arg(args, 0)?;
                info!("SayHello called with name: {}", name);
                let greeting = format!("{}, {}!", self.greeting.lock(), name);
                let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
                ctx.fire(
                    &GREETER_EVENTS,
                    DispId(dispid::GREETED),
                    vec![Variant::BStr(name), Variant::I4(count)],
                );
                Ok(Variant::BStr(greeting))
            }
            dispid::ECHO => {
                let message = text_arg(args, 0)?;
                info!("Echo called with message: {}", message);
                Ok(Variant::BStr(format!("ECHO: {}", message)))
            }
            dispid::COUNT => Ok(Variant::I4(self.count.load(Ordering::SeqCst))),
            dispid::GREETING if flags.is_put() => {
                *self.greeting.lock() = text_arg(args, 0)?;
                Ok(Variant::Empty)
            }
            dispid::GREETING => Ok(Variant::BStr(self.greeting.lock().clone())),
            _ => Err(InvokeFailure::new(hresult::DISP_E_MEMBERNOTFOUND)),
        }
    }
}

/// Register the greeter class with a loopback runtime
pub fn register(runtime: &LoopbackRuntime) {
    runtime.register_class(GREETER_CLSID, Some(GREETER_PROG_ID), Greeter::default);
}

/// Greeter interface declaration
pub fn greeter_decl() -> Arc<InterfaceDecl> {
    static DECL: OnceLock<Arc<InterfaceDecl>> = OnceLock::new();
    DECL.get_or_init(|| {
        InterfaceBuilder::new("IGreeter")
            .prog_id(GREETER_PROG_ID)
            .member(MemberDecl::method("SayHello").param(ValueKind::Str).returning(ValueKind::Str))
            .member(MemberDecl::method("Echo").param(ValueKind::Str).returning(ValueKind::Str))
            .member(MemberDecl::get("Count").returning(ValueKind::I32))
            .member(MemberDecl::get("Greeting").returning(ValueKind::Str))
            .member(MemberDecl::put("Greeting").param(ValueKind::Str))
            .build()
            .expect("IGreeter is a valid declaration constant")
    })
    .clone()
}

/// Greeter event interface declaration
pub fn greeter_events() -> Arc<InterfaceDecl> {
    static DECL: OnceLock<Arc<InterfaceDecl>> = OnceLock::new();
    DECL.get_or_init(|| {
        InterfaceBuilder::new("IGreeterEvents")
            .iid(GREETER_EVENTS)
            .member(
                MemberDecl::method("Greeted")
                    .with_dispid(dispid::GREETED)
                    .params([ValueKind::Str, ValueKind::I32]),
            )
            .build()
            .expect("IGreeterEvents is a valid declaration constant")
    })
    .clone()
}

/// Typed client for the greeter
pub struct IGreeter {
    proxy: DynamicProxy,
}

impl IGreeter {
    pub fn say_hello(&self, name: &str) -> Result<String> {
        text(self.proxy.invoke("SayHello", vec![Value::from(name)])?)
    }

    pub fn echo(&self, message: &str) -> Result<String> {
        text(self.proxy.invoke("Echo", vec![Value::from(message)])?)
    }

    pub fn count(&self) -> Result<i32> {
        self.proxy
            .invoke("Count", vec![])?
            .as_i32()
            .ok_or_else(|| AutomationError::Marshaling("Count is not a number".to_string()))
    }

    pub fn set_greeting(&self, greeting: &str) -> Result<()> {
        self.proxy.invoke("setGreeting", vec![Value::from(greeting)])?;
        Ok(())
    }
}

fn text(value: Value) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(AutomationError::Marshaling(format!("expected a string, got {other:?}"))),
    }
}

impl ComInterface for IGreeter {
    fn declaration() -> Arc<InterfaceDecl> {
        greeter_decl()
    }

    fn from_proxy(proxy: DynamicProxy) -> Self {
        Self { proxy }
    }

    fn proxy(&self) -> &DynamicProxy {
        &self.proxy
    }
}
