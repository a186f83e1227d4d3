//! Owning handle for external references

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::RawDispatch;

/// One external count on a dispatch object
///
/// Dropping the handle releases exactly that count. There is no `Clone`: a
/// second count must be taken explicitly with [`ComRef::retain`].
pub struct ComRef {
    raw: RawDispatch,
    owned: bool,
}

impl ComRef {
    /// Take ownership of a count the native call already added
    pub fn adopt(raw: RawDispatch) -> Self {
        Self { raw, owned: true }
    }

    /// Add a count for a borrowed pointer and own it
    pub fn retain(raw: &RawDispatch) -> Self {
        let count = raw.add_ref();
        trace!(ptr = ?Arc::as_ptr(raw), count, "retained external reference");
        Self { raw: raw.clone(), owned: true }
    }

    /// Borrow the underlying pointer
    pub fn raw(&self) -> &RawDispatch {
        &self.raw
    }

    /// Stable identity of the referenced object (its address)
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.raw) as *const () as usize
    }

    /// Give up ownership without releasing; the caller now owns the count
    pub fn into_raw(mut self) -> RawDispatch {
        self.owned = false;
        self.raw.clone()
    }
}

impl Drop for ComRef {
    fn drop(&mut self) {
        if self.owned {
            let count = self.raw.release();
            trace!(ptr = ?Arc::as_ptr(&self.raw), count, "released external reference");
        }
    }
}

impl fmt::Debug for ComRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComRef(0x{:x})", self.identity())
    }
}
