//! The process image: where host code lives at resolved addresses.
//!
//! Every call the host makes to a function goes through the slot at that
//! function's resolved address, which makes the slot the trampoline site. The
//! hook manager rewrites a slot exactly once per target through
//! [`ProcessImage::patch`], everything else only reads slots.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::aslr::{Aslr, NominalAddress, ResolvedAddress};
use crate::error::{Error, Result};
use crate::hooks::ForeignFn;

/// Code placed at an address, with the typed signature of its foreign function.
pub type Code<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

struct Slot {
    nominal: NominalAddress,
    code: Box<dyn Any + Send + Sync>,
}

pub struct ProcessImage {
    aslr: Aslr,
    slots: RwLock<HashMap<ResolvedAddress, Slot>>,
}

impl ProcessImage {
    pub fn new(aslr: Aslr) -> Self {
        Self {
            aslr,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn aslr(&self) -> &Aslr {
        &self.aslr
    }

    pub fn resolve(&self, nominal: NominalAddress) -> Result<ResolvedAddress> {
        self.aslr.resolve(nominal)
    }

    /// Places the implementation of `target` in the image.
    pub fn define<A, R, F>(&self, target: &ForeignFn<A, R>, implementation: F) -> Result<ResolvedAddress>
    where
        A: 'static,
        R: 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let resolved = self.resolve(target.address())?;
        let code: Code<A, R> = Arc::new(implementation);

        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                resolved,
                Slot {
                    nominal: target.address(),
                    code: Box::new(code),
                },
            );

        tracing::debug!(target_fn = target.name(), address = %resolved, "defined host function");
        Ok(resolved)
    }

    /// Gets the code currently at `target`'s address, patched or not.
    pub fn code<A: 'static, R: 'static>(&self, target: &ForeignFn<A, R>) -> Result<Code<A, R>> {
        let resolved = self.resolve(target.address())?;
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);

        let slot = slots
            .get(&resolved)
            .ok_or(Error::UnknownTarget { target: target.address() })?;

        slot.code
            .downcast_ref::<Code<A, R>>()
            .cloned()
            .ok_or(Error::SignatureMismatch { target: slot.nominal })
    }

    /// Calls `target` the way the host does: through whatever currently occupies its address.
    pub fn call<A: 'static, R: 'static>(&self, target: &ForeignFn<A, R>, args: A) -> Result<R> {
        let code = self.code(target)?;
        Ok(code(args))
    }

    /// Rewrites the slot at `target`'s address.
    ///
    /// `build` receives the code currently in the slot and returns its replacement. The
    /// slot stays locked for the whole rewrite so no caller observes a half-installed
    /// trampoline.
    pub fn patch<A, R, F>(&self, target: &ForeignFn<A, R>, build: F) -> Result<ResolvedAddress>
    where
        A: 'static,
        R: 'static,
        F: FnOnce(Code<A, R>) -> Code<A, R>,
    {
        let resolved = self.resolve(target.address())?;
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

        let slot = slots
            .get_mut(&resolved)
            .ok_or(Error::UnknownTarget { target: target.address() })?;

        let current = slot
            .code
            .downcast_ref::<Code<A, R>>()
            .cloned()
            .ok_or(Error::SignatureMismatch { target: slot.nominal })?;

        slot.code = Box::new(build(current));

        tracing::debug!(target_fn = target.name(), address = %resolved, "patched host function");
        Ok(resolved)
    }
}

impl std::fmt::Debug for ProcessImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ProcessImage")
            .field("slots", &slots.len())
            .finish()
    }
}
