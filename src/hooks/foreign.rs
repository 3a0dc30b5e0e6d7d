use std::fmt;
use std::marker::PhantomData;

use crate::aslr::NominalAddress;

/// The calling convention a foreign function was compiled with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CallConv {
    C,
    System,
    /// Member function, the first argument is the object pointer.
    ThisCall,
}

/// A typed description of a host function.
///
/// `A` is the argument tuple and `R` the return type. Descriptors are
/// plain constants, so a host's function table can be written as a list of
/// `const` items:
///
/// ```
/// use hookwire::hooks::{CallConv, ForeignFn};
///
/// pub const LEVEL_DOWN: ForeignFn<(u32, u32), ()> =
///     ForeignFn::new("CNWSCreatureStats::LevelDown", 0x0045_21a0, CallConv::ThisCall);
/// ```
pub struct ForeignFn<A, R> {
    name: &'static str,
    address: NominalAddress,
    convention: CallConv,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R> ForeignFn<A, R> {
    pub const fn new(name: &'static str, address: u64, convention: CallConv) -> Self {
        Self {
            name,
            address: NominalAddress(address),
            convention,
            _signature: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn address(&self) -> NominalAddress {
        self.address
    }

    pub fn convention(&self) -> CallConv {
        self.convention
    }
}

impl<A, R> Clone for ForeignFn<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, R> Copy for ForeignFn<A, R> {}

impl<A, R> fmt::Debug for ForeignFn<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignFn")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("convention", &self.convention)
            .finish()
    }
}
