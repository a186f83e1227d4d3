//! Running object enumeration
//!
//! Walks the session-wide running object table and wraps every registered
//! object in a proxy. The moniker cursor is forward-only, so the iterator
//! keeps one moniker prefetched to answer [`RunningObjects::has_next`]
//! without consuming anything.

use std::sync::Arc;

use tracing::debug;

use crate::decl::InterfaceDecl;
use crate::factory::ObjectFactory;
use crate::proxy::DynamicProxy;
use crate::runtime::{ComRef, Moniker, MonikerCursor, RawRunningObjectTable};
use crate::types::{AutomationError, ComError, Result};

/// Handle on the session's running object table
pub struct RunningObjectTable {
    factory: ObjectFactory,
    raw: Arc<dyn RawRunningObjectTable>,
}

impl RunningObjectTable {
    pub(crate) fn new(factory: ObjectFactory, raw: Arc<dyn RawRunningObjectTable>) -> Self {
        Self { factory, raw }
    }

    /// Start a fresh pass over the table
    pub fn enumerate(&self) -> Result<RunningObjects> {
        let raw = self.raw.clone();
        let (cursor, pending) = self
            .factory
            .apartment()
            .execute(move || -> Result<(Box<dyn MonikerCursor>, Option<Moniker>)> {
                let mut cursor = raw
                    .enum_running()
                    .map_err(|hr| ComError::new("EnumRunning", hr))?;
                cursor.reset();
                let first = cursor.next();
                Ok((cursor, first))
            })??;

        Ok(RunningObjects {
            factory: self.factory.clone(),
            raw: self.raw.clone(),
            cursor: Some(cursor),
            pending,
        })
    }

    /// Proxies for every running object, as generic dispatch
    pub fn get_active_objects(&self) -> Result<Vec<DynamicProxy>> {
        self.enumerate()?.collect()
    }

    /// Proxies for the running objects that implement `decl`
    ///
    /// Objects that refuse the interface are skipped.
    pub fn get_active_objects_by_interface(&self, decl: &Arc<InterfaceDecl>) -> Result<Vec<DynamicProxy>> {
        let mut matching = Vec::new();
        for object in self.enumerate()? {
            let object = object?;
            match object.query_interface(decl) {
                Ok(typed) => matching.push(typed),
                Err(e) => debug!(%object, interface = decl.name(), error = %e, "skipping running object"),
            }
        }
        Ok(matching)
    }
}

/// Iterator over running objects
pub struct RunningObjects {
    factory: ObjectFactory,
    raw: Arc<dyn RawRunningObjectTable>,
    cursor: Option<Box<dyn MonikerCursor>>,
    /// Moniker fetched ahead of the caller
    pending: Option<Moniker>,
}

impl RunningObjects {
    /// Check for a remaining entry; repeated calls consume nothing
    pub fn has_next(&self) -> bool {
        self.pending.is_some()
    }

    /// Moniker of the entry the next call to `next` returns
    pub fn peek_moniker(&self) -> Option<&Moniker> {
        self.pending.as_ref()
    }
}

impl Iterator for RunningObjects {
    type Item = Result<DynamicProxy>;

    fn next(&mut self) -> Option<Self::Item> {
        let moniker = self.pending.take()?;
        let mut cursor = self.cursor.take()?;
        let raw = self.raw.clone();
        let factory = self.factory.clone();

        let job = self.factory.apartment().execute(move || {
            let following = cursor.next();
            let object = raw
                .get_object(&moniker)
                .map_err(|hr| AutomationError::from(ComError::new(format!("GetObject({moniker})"), hr)))
                .and_then(|object| {
                    let object = ComRef::adopt(object);
                    factory.create_proxy(object.raw(), InterfaceDecl::dispatch())
                });
            (cursor, following, object)
        });

        match job {
            Ok((cursor, following, object)) => {
                self.cursor = Some(cursor);
                self.pending = following;
                Some(object)
            }
            // The cursor died with the apartment; nothing further can be read
            Err(e) => Some(Err(e)),
        }
    }
}
