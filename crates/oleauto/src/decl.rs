//! Interface declarations
//!
//! An [`InterfaceDecl`] is the precomputed dispatch table for one
//! host-visible interface: its IID, the class to instantiate, and for every
//! member the invocation kind, the dispatch id (or the name to resolve), and
//! the shapes of its parameters and result.
//!
//! ```
//! use oleauto::decl::{InterfaceBuilder, MemberDecl};
//! use oleauto::variant::ValueKind;
//!
//! let decl = InterfaceBuilder::new("Greeter")
//!     .prog_id("Demo.Greeter")
//!     .member(MemberDecl::get("Name").with_dispid(1).returning(ValueKind::Str))
//!     .member(MemberDecl::put("Name").with_dispid(1).param(ValueKind::Str))
//!     .member(MemberDecl::method("Greet").param(ValueKind::Str).returning(ValueKind::Str))
//!     .build()
//!     .unwrap();
//! assert!(decl.member("setName").is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::proxy::DynamicProxy;
use crate::types::{AutomationError, Clsid, DispId, Iid, Result};
use crate::variant::ValueKind;

/// How a member is invoked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    PropertyGet,
    PropertyPut,
    Method,
}

/// How a member is bound to its dispatch id
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispBinding {
    /// Fixed id from the interface contract
    Id(DispId),
    /// Resolved through `GetIDsOfNames` on first use
    Name(String),
}

/// One member of an interface declaration
#[derive(Clone, Debug)]
pub struct MemberDecl {
    name: String,
    external_name: String,
    kind: MemberKind,
    binding: DispBinding,
    params: Vec<ValueKind>,
    returns: ValueKind,
}

impl MemberDecl {
    fn new(name: String, external_name: &str, kind: MemberKind, returns: ValueKind) -> Self {
        Self {
            name,
            external_name: external_name.to_string(),
            kind,
            binding: DispBinding::Name(external_name.to_string()),
            params: Vec::new(),
            returns,
        }
    }

    /// Property read; the host name is the external name
    pub fn get(external_name: &str) -> Self {
        Self::new(external_name.to_string(), external_name, MemberKind::PropertyGet, ValueKind::Any)
    }

    /// Property write; the host name is `set` + the external name
    pub fn put(external_name: &str) -> Self {
        Self::new(format!("set{external_name}"), external_name, MemberKind::PropertyPut, ValueKind::Void)
    }

    /// Method call; the host name is the external name
    pub fn method(external_name: &str) -> Self {
        Self::new(external_name.to_string(), external_name, MemberKind::Method, ValueKind::Any)
    }

    /// Override the host-visible name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Bind to a fixed dispatch id instead of resolving the name
    pub fn with_dispid(mut self, id: i32) -> Self {
        self.binding = DispBinding::Id(DispId(id));
        self
    }

    /// Append a parameter shape
    pub fn param(mut self, kind: ValueKind) -> Self {
        self.params.push(kind);
        self
    }

    pub fn params(mut self, kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        self.params.extend(kinds);
        self
    }

    pub fn returning(mut self, kind: ValueKind) -> Self {
        self.returns = kind;
        self
    }

    /// Host-visible name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name known to the external object
    pub fn external_name(&self) -> &str {
        &self.external_name
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    pub fn binding(&self) -> &DispBinding {
        &self.binding
    }

    /// The fixed dispatch id, if the member has one
    pub fn dispid(&self) -> Option<DispId> {
        match self.binding {
            DispBinding::Id(id) => Some(id),
            DispBinding::Name(_) => None,
        }
    }

    pub fn param_kinds(&self) -> &[ValueKind] {
        &self.params
    }

    pub fn return_kind(&self) -> &ValueKind {
        &self.returns
    }
}

/// Class used to instantiate an interface
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassRef {
    Clsid(Clsid),
    /// Programmatic identifier resolved by the runtime
    ProgId(String),
}

impl fmt::Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassRef::Clsid(clsid) => write!(f, "{clsid}"),
            ClassRef::ProgId(prog_id) => f.write_str(prog_id),
        }
    }
}

/// Host-visible interface type
#[derive(Debug)]
pub struct InterfaceDecl {
    name: String,
    iid: Option<Iid>,
    class: Option<ClassRef>,
    members: Vec<Arc<MemberDecl>>,
    index: HashMap<String, usize>,
}

impl InterfaceDecl {
    /// Generic dispatch declaration, used for untyped object references
    pub fn dispatch() -> Arc<InterfaceDecl> {
        static DISPATCH: OnceLock<Arc<InterfaceDecl>> = OnceLock::new();
        DISPATCH
            .get_or_init(|| {
                Arc::new(InterfaceDecl {
                    name: "IDispatch".to_string(),
                    iid: Some(Iid::IDISPATCH),
                    class: None,
                    members: Vec::new(),
                    index: HashMap::new(),
                })
            })
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iid(&self) -> Option<Iid> {
        self.iid
    }

    pub fn class(&self) -> Option<&ClassRef> {
        self.class.as_ref()
    }

    pub fn members(&self) -> &[Arc<MemberDecl>] {
        &self.members
    }

    /// Look up a member by host name
    pub fn member(&self, name: &str) -> Option<&Arc<MemberDecl>> {
        self.index.get(name).map(|&i| &self.members[i])
    }

    /// Look up a member by host name, failing with `UnknownMember`
    pub fn require_member(&self, name: &str) -> Result<&Arc<MemberDecl>> {
        self.member(name).ok_or_else(|| AutomationError::UnknownMember {
            interface: self.name.clone(),
            member: name.to_string(),
        })
    }

    /// The IID used when querying for this interface
    ///
    /// Declarations without one are queried as generic dispatch.
    pub fn query_iid(&self) -> Iid {
        self.iid.unwrap_or(Iid::IDISPATCH)
    }
}

/// Builder for [`InterfaceDecl`]
pub struct InterfaceBuilder {
    name: String,
    iid: Option<Iid>,
    class: Option<ClassRef>,
    members: Vec<MemberDecl>,
}

impl InterfaceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            iid: None,
            class: None,
            members: Vec::new(),
        }
    }

    pub fn iid(mut self, iid: Iid) -> Self {
        self.iid = Some(iid);
        self
    }

    pub fn clsid(mut self, clsid: Clsid) -> Self {
        self.class = Some(ClassRef::Clsid(clsid));
        self
    }

    pub fn prog_id(mut self, prog_id: impl Into<String>) -> Self {
        self.class = Some(ClassRef::ProgId(prog_id.into()));
        self
    }

    pub fn member(mut self, member: MemberDecl) -> Self {
        self.members.push(member);
        self
    }

    /// Finish the declaration; host names must be unique
    pub fn build(self) -> Result<Arc<InterfaceDecl>> {
        let mut index = HashMap::with_capacity(self.members.len());
        for (i, member) in self.members.iter().enumerate() {
            if member.kind == MemberKind::PropertyPut && member.params.len() > 1 {
                return Err(AutomationError::Declaration(format!(
                    "{}.{} is a property put with {} parameters",
                    self.name,
                    member.name,
                    member.params.len()
                )));
            }
            if index.insert(member.name.clone(), i).is_some() {
                return Err(AutomationError::Declaration(format!(
                    "{} declares {} twice",
                    self.name, member.name
                )));
            }
        }

        Ok(Arc::new(InterfaceDecl {
            name: self.name,
            iid: self.iid,
            class: self.class,
            members: self.members.into_iter().map(Arc::new).collect(),
            index,
        }))
    }
}

/// Typed wrapper over a [`DynamicProxy`]
///
/// Implemented by hand-written interface types so the factory can hand out
/// `T` directly.
pub trait ComInterface: Sized {
    fn declaration() -> Arc<InterfaceDecl>;

    fn from_proxy(proxy: DynamicProxy) -> Self;

    fn proxy(&self) -> &DynamicProxy;
}
