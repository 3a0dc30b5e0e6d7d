//! Address relocation against address-space-layout randomization.
//!
//! Function addresses are supplied by an external symbol table as *nominal*
//! addresses, i.e. where the function lives relative to the image's preferred
//! load base. Before anything can be patched or called, a nominal address is
//! relocated into a [`ResolvedAddress`] for the running process instance.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use object::{Object, ObjectSymbol, SymbolKind};

use crate::error::{Error, Result};

/// An address as it appears in the symbol table, before relocation.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NominalAddress(pub u64);

impl fmt::Display for NominalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for NominalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NominalAddress({:#x})", self.0)
    }
}

/// A code address that is valid for the lifetime of the current process instance.
///
/// This is an opaque handle, nothing in this crate dereferences it. It must never be
/// persisted across a process restart.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolvedAddress(u64);

impl ResolvedAddress {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResolvedAddress({:#x})", self.0)
    }
}

/// The `nominal address -> symbolic name` table the resolver validates against.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    by_address: BTreeMap<NominalAddress, String>,
    by_name: HashMap<String, NominalAddress>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: NominalAddress, name: impl Into<String>) {
        let name = name.into();
        self.by_name.insert(name.clone(), address);
        self.by_address.insert(address, name);
    }

    pub fn with(mut self, address: u64, name: impl Into<String>) -> Self {
        self.insert(NominalAddress(address), name);
        self
    }

    /// Builds a table out of the function symbols of an ELF image
    ///
    /// Both the static and the dynamic symbol tables are read, undefined and
    /// zero-addressed symbols are skipped.
    pub fn from_elf(data: &[u8]) -> Result<Self> {
        let file = object::File::parse(data)?;

        let mut table = Self::new();
        for symbol in file.symbols().chain(file.dynamic_symbols()) {
            if symbol.kind() != SymbolKind::Text || !symbol.is_definition() || symbol.address() == 0 {
                continue;
            }

            if let Ok(name) = symbol.name() {
                if !name.is_empty() {
                    table.insert(NominalAddress(symbol.address()), name);
                }
            }
        }

        Ok(table)
    }

    pub fn name_of(&self, address: NominalAddress) -> Option<&str> {
        self.by_address.get(&address).map(String::as_str)
    }

    pub fn address_of(&self, name: &str) -> Option<NominalAddress> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

/// Relocates nominal addresses by the offset between the preferred and the actual load base.
#[derive(Debug, Clone)]
pub struct Aslr {
    symbols: SymbolTable,
    preferred_base: u64,
    load_base: u64,
}

impl Aslr {
    /// Creates a resolver for an image preferred at `preferred_base` but loaded at `load_base`.
    pub fn new(symbols: SymbolTable, preferred_base: u64, load_base: u64) -> Self {
        Self {
            symbols,
            preferred_base,
            load_base,
        }
    }

    /// A resolver for an image that was loaded at its preferred base.
    pub fn identity(symbols: SymbolTable) -> Self {
        Self::new(symbols, 0, 0)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Gets the runtime address of `nominal`.
    ///
    /// # Errors
    /// * [`Error::AddressResolution`] - the address is not in the symbol table. Callers
    ///   are expected to treat this as fatal, the table is assumed to be pre-validated.
    pub fn resolve(&self, nominal: NominalAddress) -> Result<ResolvedAddress> {
        if self.symbols.name_of(nominal).is_none() {
            return Err(Error::AddressResolution { nominal });
        }

        let relocated = nominal
            .0
            .wrapping_sub(self.preferred_base)
            .wrapping_add(self.load_base);

        Ok(ResolvedAddress(relocated))
    }

    /// Looks up a symbol by name and resolves it.
    pub fn resolve_symbol(&self, name: &str) -> Result<ResolvedAddress> {
        let nominal = self
            .symbols
            .address_of(name)
            .ok_or_else(|| Error::UnknownSymbol { name: name.to_owned() })?;

        self.resolve(nominal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        SymbolTable::new()
            .with(0x40_1000, "CNWSCreatureStats::LevelUp")
            .with(0x40_2000, "CServerExoAppInternal::MainLoop")
    }

    #[test]
    fn relocates_by_base_offset() {
        let aslr = Aslr::new(table(), 0x40_0000, 0x5555_0000_0000);

        let resolved = aslr.resolve(NominalAddress(0x40_1000)).unwrap();
        assert_eq!(resolved.get(), 0x5555_0000_1000);
    }

    #[test]
    fn resolution_is_idempotent() {
        let aslr = Aslr::new(table(), 0x40_0000, 0x7f00_0000);

        let a = aslr.resolve(NominalAddress(0x40_2000)).unwrap();
        let b = aslr.resolve(NominalAddress(0x40_2000)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_address_is_fatal() {
        let aslr = Aslr::identity(table());

        let err = aslr.resolve(NominalAddress(0xdead)).unwrap_err();
        assert!(matches!(err, Error::AddressResolution { nominal } if nominal == NominalAddress(0xdead)));
        assert!(err.is_fatal());
    }

    #[test]
    fn resolves_by_symbol_name() {
        let aslr = Aslr::new(table(), 0x40_0000, 0x10_0000);

        let resolved = aslr.resolve_symbol("CServerExoAppInternal::MainLoop").unwrap();
        assert_eq!(resolved.get(), 0x10_2000);
        assert!(matches!(
            aslr.resolve_symbol("missing"),
            Err(Error::UnknownSymbol { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reads_function_symbols_from_own_executable() {
        let exe = std::env::current_exe().unwrap();
        let data = std::fs::read(exe).unwrap();

        let table = SymbolTable::from_elf(&data).unwrap();
        assert!(!table.is_empty());
    }
}
