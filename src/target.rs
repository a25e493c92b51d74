//! Locations, relocation targets and displacement.
//!
//! Sections are owned by their module in a dense arena and referred to by
//! [`SectionIndex`]; a [`Location`] is a section index plus offset, or an
//! absolute address when no section is attached. Merging modules moves
//! sections between arenas, so every location must be *displaced* through a
//! mapping from old indices to new positions.

use std::collections::BTreeMap;

use crate::module::Module;
use crate::symbol::SymbolName;

/// Dense index into a module's section arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionIndex(pub usize);

/// Where sections land after a merge: old index → new location.
pub type Displacement = BTreeMap<SectionIndex, Location>;

/// A place in the program: `(section, offset)` or an absolute address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location {
    pub section: Option<SectionIndex>,
    pub offset: u64,
}

impl Location {
    pub fn absolute(address: u64) -> Self {
        Location {
            section: None,
            offset: address,
        }
    }

    pub fn section(section: SectionIndex, offset: u64) -> Self {
        Location {
            section: Some(section),
            offset,
        }
    }

    /// Rewrites this location through a displacement map. Returns whether
    /// anything changed.
    pub fn displace(&mut self, map: &Displacement) -> bool {
        if let Some(section) = self.section {
            if let Some(new) = map.get(&section) {
                self.section = new.section;
                self.offset += new.offset;
                return true;
            }
        }
        false
    }
}

/// The value a relocation target resolves through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetBase {
    /// A concrete place
    Location(Location),
    /// An unresolved symbolic reference
    Symbol(SymbolName),
    /// The address of the named symbol's Global Offset Table slot
    GotSlot(String),
}

/// The abstract object of a relocation. With `segment_of` set, the target
/// stands for the segment frame containing the base rather than the base
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub base: TargetBase,
    pub segment_of: bool,
}

impl Target {
    pub fn location(location: Location) -> Self {
        Target {
            base: TargetBase::Location(location),
            segment_of: false,
        }
    }

    pub fn symbol(name: SymbolName) -> Self {
        Target {
            base: TargetBase::Symbol(name),
            segment_of: false,
        }
    }

    pub fn got_slot(name: impl Into<String>) -> Self {
        Target {
            base: TargetBase::GotSlot(name.into()),
            segment_of: false,
        }
    }

    /// The frame/segment containing this target.
    pub fn segment(mut self) -> Self {
        self.segment_of = true;
        self
    }

    pub fn displace(&mut self, map: &Displacement) -> bool {
        match &mut self.base {
            TargetBase::Location(location) => location.displace(map),
            _ => false,
        }
    }

    /// Rewrites a local symbol reference to its concrete location in the
    /// module. Idempotent: once the base is a location there is nothing
    /// left to rewrite. Re-run after every merge, since a merge may fuse
    /// identically named locals from distinct modules and make the name
    /// ambiguous.
    pub fn resolve_locals(&mut self, module: &Module) -> bool {
        if let TargetBase::Symbol(SymbolName::Name(name)) = &self.base {
            if let Some(location) = module.find_local_symbol(name) {
                self.base = TargetBase::Location(location);
                return true;
            }
        }
        false
    }
}
