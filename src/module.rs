//! The module: the unit of linking.
//!
//! A module owns an arena of sections plus the symbols and relocations an
//! object file contributed. Merging modules moves sections between arenas
//! and rewrites every location through a [`Displacement`] map in one pass.
//!
//! # Extended symbol prefixes
//!
//! Most input formats cannot express segmentation, libraries or resources
//! natively. When the output format advertises one of those capabilities
//! and the input format does not, symbol and section names carrying the
//! configured prefix character (`$` by default, `?` for assemblers where
//! `$` is taken) encode the extra semantics:
//!
//! | pattern | meaning |
//! |---|---|
//! | `$$SEG$<section>` | paragraph of the named section |
//! | `$$SEGOF$<symbol>` | paragraph of the symbol's segment |
//! | `$$SEGAT$<symbol>` | selector frame starting at the symbol |
//! | `$$WRTSEG$<sym>$<sect>` | offset of `sym` within `sect`'s frame |
//! | `$$SEGDIF$<a>$<b>` | paragraph difference `a - b` |
//! | `$$IMPORT$<lib>$<ord\|_name>` | imported symbol |
//! | `$$IMPSEG$<lib>$<ord\|_name>` | segment of an imported symbol |
//! | `$$EXPORT$<name>[$<ord>]` | exported symbol |
//! | `$$RSRC$_<type>$<id>` | section is a resource of a type and id |
//! | `$$FIX$<hex>$<rest>` | patch one byte at this local symbol |

use std::collections::BTreeMap;

use crate::diag::{DiagnosticKind, Diagnostics};
use crate::endian::Endian;
use crate::error::{Error, Result};
use crate::formats::Capabilities;
use crate::relocation::Relocation;
use crate::section::{Section, flags};
use crate::symbol::{CommonSymbol, ExportedSymbol, SymbolName};
use crate::target::{Displacement, Location, SectionIndex, Target, TargetBase};

/// Instruction set the module was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cpu {
    Unknown,
    /// 8086/80286 real or protected mode, 16-bit
    I86,
    I386,
    M68k,
    Arm,
}

impl Cpu {
    /// Native word size, which also sizes Global Offset Table slots.
    pub fn word_size(self) -> usize {
        match self {
            Cpu::I86 => 2,
            _ => 4,
        }
    }

    pub fn is_x86(self) -> bool {
        matches!(self, Cpu::I86 | Cpu::I386)
    }
}

/// A collection of sections, symbols and relocations; the unit of linking.
#[derive(Debug)]
pub struct Module {
    pub cpu: Cpu,
    pub endian: Option<Endian>,
    pub file_name: String,
    /// Set once the collector decides this module contributes to the output
    pub included: bool,

    sections: Vec<Section>,
    section_names: BTreeMap<String, SectionIndex>,
    local_symbols: BTreeMap<String, Vec<Location>>,
    global_symbols: BTreeMap<String, Location>,
    weak_symbols: BTreeMap<String, Location>,
    common_symbols: BTreeMap<String, CommonSymbol>,
    imported_symbols: Vec<SymbolName>,
    exported_symbols: BTreeMap<ExportedSymbol, Location>,
    pub relocations: Vec<Relocation>,

    special_prefix: char,
    output_caps: Capabilities,
    input_caps: Capabilities,
}

impl Module {
    pub fn new(file_name: impl Into<String>) -> Self {
        Module {
            cpu: Cpu::Unknown,
            endian: None,
            file_name: file_name.into(),
            included: false,
            sections: Vec::new(),
            section_names: BTreeMap::new(),
            local_symbols: BTreeMap::new(),
            global_symbols: BTreeMap::new(),
            weak_symbols: BTreeMap::new(),
            common_symbols: BTreeMap::new(),
            imported_symbols: Vec::new(),
            exported_symbols: BTreeMap::new(),
            relocations: Vec::new(),
            special_prefix: '$',
            output_caps: Capabilities::none(),
            input_caps: Capabilities::none(),
        }
    }

    /// Snapshots the capability bits that decide whether extended name
    /// prefixes are interpreted or passed through.
    pub fn setup_options(&mut self, special_char: char, output: Capabilities, input: Capabilities) {
        self.special_prefix = special_char;
        self.output_caps = output;
        self.input_caps = input;
    }

    pub fn output_capabilities(&self) -> Capabilities {
        self.output_caps
    }

    fn prefix(&self, word: &str) -> String {
        let c = self.special_prefix;
        format!("{c}{c}{word}{c}")
    }

    fn parse_imported_name(&self, reference: &str) -> Option<SymbolName> {
        // <library>$<hex ordinal> or <library>$_<name>
        let split = reference.find(self.special_prefix)?;
        let library = reference[..split].to_string();
        let rest = &reference[split + 1..];
        if let Some(name) = rest.strip_prefix('_') {
            Some(SymbolName::ImportByName {
                library,
                name: name.to_string(),
            })
        } else {
            let ordinal = u64::from_str_radix(rest, 16).ok()?;
            Some(SymbolName::ImportByOrdinal { library, ordinal })
        }
    }

    fn parse_exported_name(&self, reference: &str) -> Option<ExportedSymbol> {
        // <name>, <name>$<ordinal> or <ordinal>$_<name>
        match reference.find(self.special_prefix) {
            None => Some(ExportedSymbol::by_name(reference)),
            Some(split) => {
                let rest = &reference[split + 1..];
                if let Some(name) = rest.strip_prefix('_') {
                    let ordinal = reference[..split].parse().ok()?;
                    Some(ExportedSymbol::by_ordinal(ordinal, name))
                } else {
                    let ordinal = rest.parse().ok()?;
                    Some(ExportedSymbol::with_ordinal(&reference[..split], ordinal))
                }
            }
        }
    }

    // ---- sections ----

    /// Registers a section, interpreting resource names when the output
    /// can hold resources and the input cannot express them.
    pub fn add_section(&mut self, mut section: Section, diag: &mut Diagnostics) -> SectionIndex {
        section.set_flags((self.output_caps.additional_section_flags)(&section.name));

        let resource_prefix = format!("{}_", self.prefix("RSRC"));
        if self.output_caps.supports_resources
            && !self.input_caps.supports_resources
            && section.name.starts_with(&resource_prefix)
        {
            // $$RSRC$_<type>$<id>
            section.set_flags(flags::RESOURCE);
            let parsed = section
                .name
                .rfind(self.special_prefix)
                .filter(|&sep| sep >= resource_prefix.len())
                .and_then(|sep| {
                    let resource_type = section.name[resource_prefix.len()..sep].to_string();
                    let id = u16::from_str_radix(&section.name[sep + 1..], 16).ok()?;
                    Some((resource_type, id))
                });
            match parsed {
                Some((resource_type, id)) => {
                    log::debug!("resource type {resource_type}, id {id}");
                    section.resource_type = Some(resource_type);
                    section.resource_id = Some(id);
                }
                None => diag.error(
                    DiagnosticKind::BadExtendedName,
                    format!("unable to parse resource section name {}", section.name),
                ),
            }
        }

        self.insert_section(section, diag)
    }

    fn insert_section(&mut self, section: Section, diag: &mut Diagnostics) -> SectionIndex {
        let index = SectionIndex(self.sections.len());
        if !section.name.is_empty() {
            if self.section_names.contains_key(&section.name) {
                diag.warning(
                    DiagnosticKind::Other,
                    format!("section of name `{}' already exists", section.name),
                );
            } else {
                self.section_names.insert(section.name.clone(), index);
            }
        }
        self.sections.push(section);
        index
    }

    pub fn find_section(&self, name: &str) -> Option<SectionIndex> {
        self.section_names.get(name).copied()
    }

    /// Finds a section by name, creating it with `default_flags` if absent.
    pub fn fetch_section(&mut self, name: &str, default_flags: u32) -> SectionIndex {
        if let Some(index) = self.find_section(name) {
            return index;
        }
        let mut section = Section::new(name, default_flags);
        section.set_flags((self.output_caps.additional_section_flags)(name));
        let index = SectionIndex(self.sections.len());
        self.section_names.insert(name.to_string(), index);
        self.sections.push(section);
        index
    }

    pub fn section(&self, index: SectionIndex) -> &Section {
        &self.sections[index.0]
    }

    pub fn section_mut(&mut self, index: SectionIndex) -> &mut Section {
        &mut self.sections[index.0]
    }

    pub fn sections(&self) -> impl Iterator<Item = (SectionIndex, &Section)> {
        self.sections
            .iter()
            .enumerate()
            .map(|(index, section)| (SectionIndex(index), section))
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// The absolute address of a location, meaningful once layout has
    /// assigned section bases.
    pub fn location_address(&self, location: Location) -> Option<u64> {
        match location.section {
            None => Some(location.offset),
            Some(index) => Some(self.section(index).base_address()? + location.offset),
        }
    }

    // ---- symbols ----

    pub fn add_local_symbol(&mut self, name: &str, location: Location) -> Result<()> {
        let fix_prefix = self.prefix("FIX");
        if self.input_caps.requires_data_stream_fix && name.starts_with(&fix_prefix) {
            // $$FIX$<byte>$<rest>: buggy assemblers drop bytes; the symbol
            // smuggles the byte value back in
            let rest = &name[fix_prefix.len()..];
            let end = rest.find(self.special_prefix).unwrap_or(rest.len());
            let byte = u8::from_str_radix(&rest[..end], 16)
                .map_err(|_| Error::Malformed(format!("unparsable fix-up symbol {name}")))?;
            let section = location
                .section
                .ok_or_else(|| Error::Malformed(format!("fix-up symbol {name} has no section")))?;
            log::debug!("patching {byte:#04x} at {name}");
            return self
                .section_mut(section)
                .write_word(1, location.offset, u64::from(byte), Endian::Little);
        }

        // a later local of the same name replaces the earlier one; only
        // merges accumulate same-named locals
        self.local_symbols.insert(name.to_string(), vec![location]);
        Ok(())
    }

    pub fn add_global_symbol(&mut self, name: &str, location: Location, diag: &mut Diagnostics) {
        let export_prefix = self.prefix("EXPORT");
        if self.output_caps.supports_libraries
            && !self.input_caps.supports_libraries
            && name.starts_with(&export_prefix)
        {
            // $$EXPORT$<name> or $$EXPORT$<name>$<ordinal>
            match self.parse_exported_name(&name[export_prefix.len()..]) {
                Some(symbol) => {
                    self.add_exported_symbol(symbol, location);
                    return;
                }
                None => diag.error(
                    DiagnosticKind::BadExtendedName,
                    format!("unable to parse export name {name}, proceeding"),
                ),
            }
        }

        self.weak_symbols.remove(name);
        self.global_symbols.insert(name.to_string(), location);
    }

    pub fn add_weak_symbol(&mut self, name: &str, location: Location) {
        if !self.global_symbols.contains_key(name) {
            self.weak_symbols.insert(name.to_string(), location);
        }
    }

    pub fn add_common_symbol(&mut self, name: &str, symbol: CommonSymbol) {
        self.common_symbols.insert(name.to_string(), symbol);
    }

    pub fn add_imported_symbol(&mut self, name: SymbolName) {
        if !self.imported_symbols.contains(&name) {
            self.imported_symbols.push(name);
        }
    }

    pub fn add_exported_symbol(&mut self, symbol: ExportedSymbol, location: Location) {
        self.exported_symbols.insert(symbol, location);
    }

    /// Undefined symbols are usually satisfied by other modules, but when
    /// the output format supports libraries an undefined `$$IMPORT$` name
    /// declares a runtime import instead.
    pub fn add_undefined_symbol(&mut self, name: &str, diag: &mut Diagnostics) {
        if !self.output_caps.supports_libraries || self.input_caps.supports_libraries {
            return;
        }
        let import_prefix = self.prefix("IMPORT");
        let impseg_prefix = self.prefix("IMPSEG");
        let reference = if let Some(rest) = name.strip_prefix(&import_prefix) {
            rest
        } else if let Some(rest) = name.strip_prefix(&impseg_prefix) {
            rest
        } else {
            return;
        };
        match self.parse_imported_name(reference) {
            Some(symbol) => self.add_imported_symbol(symbol),
            None => diag.error(
                DiagnosticKind::BadExtendedName,
                format!("unable to parse import name {name}, proceeding"),
            ),
        }
    }

    pub fn find_local_symbol(&self, name: &str) -> Option<Location> {
        match self.local_symbols.get(name) {
            Some(locations) if locations.len() == 1 => Some(locations[0]),
            _ => None,
        }
    }

    pub fn find_global_symbol(&self, name: &str) -> Option<Location> {
        self.global_symbols
            .get(name)
            .or_else(|| self.weak_symbols.get(name))
            .copied()
    }

    pub fn global_symbols(&self) -> impl Iterator<Item = (&String, &Location)> {
        self.global_symbols.iter()
    }

    pub fn weak_symbols(&self) -> impl Iterator<Item = (&String, &Location)> {
        self.weak_symbols.iter()
    }

    pub fn common_symbols(&self) -> impl Iterator<Item = (&String, &CommonSymbol)> {
        self.common_symbols.iter()
    }

    pub fn imported_symbols(&self) -> &[SymbolName] {
        &self.imported_symbols
    }

    pub fn exported_symbols(&self) -> impl Iterator<Item = (&ExportedSymbol, &Location)> {
        self.exported_symbols.iter()
    }

    // ---- relocations ----

    /// Registers a relocation, rewriting extended-prefix target names into
    /// the segmented or import relocations they encode. Interpretation
    /// only happens when the output format demands the capability and the
    /// input format cannot express it natively.
    pub fn add_relocation(&mut self, relocation: Relocation, diag: &mut Diagnostics) {
        let mut relocation = relocation;
        if self.cpu.is_x86() {
            if let Some(SymbolName::Name(name)) = relocation.target_symbol_name().cloned() {
                if self.output_caps.supports_segmentation
                    && !self.input_caps.supports_segmentation
                {
                    relocation = self.interpret_segment_prefixes(relocation, &name, diag);
                }
                if self.output_caps.supports_libraries && !self.input_caps.supports_libraries {
                    relocation = self.interpret_import_prefixes(relocation, &name, diag);
                }
            }
        }
        self.relocations.push(relocation);
    }

    fn interpret_segment_prefixes(
        &mut self,
        relocation: Relocation,
        name: &str,
        diag: &mut Diagnostics,
    ) -> Relocation {
        let seg = self.prefix("SEG");
        let segof = self.prefix("SEGOF");
        let segat = self.prefix("SEGAT");
        let wrtseg = self.prefix("WRTSEG");
        let segdif = self.prefix("SEGDIF");

        if let Some(section_name) = name.strip_prefix(&seg) {
            // $$SEG$<section>: can only refer to a currently present section
            if relocation.size != 2 {
                return relocation;
            }
            match self.find_section(section_name) {
                None => {
                    diag.error(
                        DiagnosticKind::BadExtendedName,
                        format!("invalid section in extended relocation `{section_name}'"),
                    );
                    relocation
                }
                Some(index) => Relocation::paragraph(
                    relocation.source,
                    Target::location(Location::section(index, 0)).segment(),
                    relocation.addend,
                ),
            }
        } else if let Some(symbol) = name.strip_prefix(&segof) {
            if relocation.size != 2 {
                return relocation;
            }
            Relocation::paragraph(
                relocation.source,
                Target::symbol(SymbolName::new(symbol)).segment(),
                relocation.addend,
            )
        } else if let Some(symbol) = name.strip_prefix(&segat) {
            if relocation.size != 2 {
                return relocation;
            }
            Relocation::paragraph(
                relocation.source,
                Target::symbol(SymbolName::new(symbol)),
                relocation.addend,
            )
        } else if let Some(rest) = name.strip_prefix(&wrtseg) {
            // $$WRTSEG$<symbol>$<section>
            let Some(sep) = rest.rfind(self.special_prefix) else {
                return relocation;
            };
            let (symbol, section_name) = (&rest[..sep], &rest[sep + 1..]);
            match self.find_section(section_name) {
                None => {
                    diag.error(
                        DiagnosticKind::BadExtendedName,
                        format!("invalid section in extended relocation `{section_name}'"),
                    );
                    relocation
                }
                Some(index) => Relocation::offset_from(
                    relocation.size,
                    relocation.source,
                    Target::symbol(SymbolName::new(symbol)),
                    Target::location(Location::section(index, 0)).segment(),
                    relocation.addend,
                    Endian::Little,
                ),
            }
        } else if let Some(rest) = name.strip_prefix(&segdif) {
            // $$SEGDIF$<section>$<section>
            let Some(sep) = rest.rfind(self.special_prefix) else {
                return relocation;
            };
            let (first_name, second_name) = (&rest[..sep], &rest[sep + 1..]);
            match (self.find_section(first_name), self.find_section(second_name)) {
                (Some(first), Some(second)) => Relocation::paragraph_difference(
                    relocation.source,
                    Target::location(Location::section(first, 0)).segment(),
                    Target::location(Location::section(second, 0)).segment(),
                    relocation.addend,
                ),
                (first, _) => {
                    let bad = if first.is_none() { first_name } else { second_name };
                    diag.error(
                        DiagnosticKind::BadExtendedName,
                        format!("invalid section in extended relocation `{bad}'"),
                    );
                    relocation
                }
            }
        } else {
            relocation
        }
    }

    fn interpret_import_prefixes(
        &mut self,
        relocation: Relocation,
        name: &str,
        diag: &mut Diagnostics,
    ) -> Relocation {
        let import_prefix = self.prefix("IMPORT");
        let impseg_prefix = self.prefix("IMPSEG");

        if let Some(reference) = name.strip_prefix(&import_prefix) {
            // $$IMPORT$<library>$<ordinal> or $$IMPORT$<library>$_<name>
            match self.parse_imported_name(reference) {
                Some(symbol) => {
                    if relocation.is_relative() {
                        Relocation::relative(
                            relocation.size,
                            relocation.source,
                            Target::symbol(symbol),
                            relocation.addend,
                            relocation.endian,
                        )
                    } else if self.output_caps.is_linear {
                        Relocation::absolute(
                            relocation.size,
                            relocation.source,
                            Target::symbol(symbol),
                            relocation.addend,
                            relocation.endian,
                        )
                    } else {
                        Relocation::offset(
                            relocation.size,
                            relocation.source,
                            Target::symbol(symbol),
                            relocation.addend,
                            relocation.endian,
                        )
                    }
                }
                None => {
                    diag.error(
                        DiagnosticKind::BadExtendedName,
                        format!("unable to parse import name {name}, proceeding"),
                    );
                    relocation
                }
            }
        } else if let Some(reference) = name.strip_prefix(&impseg_prefix) {
            match self.parse_imported_name(reference) {
                Some(symbol) => Relocation::paragraph(
                    relocation.source,
                    Target::symbol(symbol),
                    relocation.addend,
                ),
                None => {
                    diag.error(
                        DiagnosticKind::BadExtendedName,
                        format!("unable to parse import name {name}, proceeding"),
                    );
                    relocation
                }
            }
        } else {
            relocation
        }
    }

    /// Rewrites local-name relocation targets to concrete locations.
    /// Idempotent; re-run after every merge since local scopes change.
    pub fn resolve_local_relocations(&mut self) {
        let mut relocations = std::mem::take(&mut self.relocations);
        for relocation in &mut relocations {
            relocation.resolve_locals(self);
        }
        self.relocations = relocations;
    }

    // ---- merging ----

    /// Merges another module in, transferring ownership of its sections.
    /// Same-named sections append to ours; everything the other module
    /// recorded is displaced into our arena in a single pass.
    pub fn append(&mut self, mut other: Module, diag: &mut Diagnostics) -> Result<()> {
        if self.cpu == Cpu::Unknown {
            self.cpu = other.cpu;
        } else if other.cpu != Cpu::Unknown && self.cpu != other.cpu {
            return Err(Error::Malformed(format!(
                "cannot merge {}: cpu {:?} into module of cpu {:?}",
                other.file_name, other.cpu, self.cpu
            )));
        }
        if self.endian.is_none() {
            self.endian = other.endian;
        } else if other.endian.is_some() && self.endian != other.endian {
            return Err(Error::Malformed(format!(
                "cannot merge {}: byte order differs",
                other.file_name
            )));
        }

        let mut displacement = Displacement::new();
        for (old_index, section) in other.sections.drain(..).enumerate() {
            let old = SectionIndex(old_index);
            match self.find_section(&section.name) {
                Some(existing) if !section.name.is_empty() => {
                    let offset = self.sections[existing.0].append_section(&section)?;
                    displacement.insert(old, Location::section(existing, offset));
                }
                _ => {
                    let new_index = self.insert_section(section, diag);
                    displacement.insert(old, Location::section(new_index, 0));
                }
            }
        }

        for (name, mut location) in std::mem::take(&mut other.global_symbols) {
            if self.global_symbols.contains_key(&name) {
                diag.warning(
                    DiagnosticKind::DuplicateSymbol,
                    format!(
                        "symbol {name} defined in both {} and {}, ignoring repetition",
                        self.file_name, other.file_name
                    ),
                );
                continue;
            }
            self.weak_symbols.remove(&name);
            location.displace(&displacement);
            self.global_symbols.insert(name, location);
        }

        for (name, locations) in std::mem::take(&mut other.local_symbols) {
            let ours = self.local_symbols.entry(name).or_default();
            for mut location in locations {
                location.displace(&displacement);
                ours.push(location);
            }
        }

        for (name, mut location) in std::mem::take(&mut other.weak_symbols) {
            if self.global_symbols.contains_key(&name) || self.weak_symbols.contains_key(&name) {
                log::debug!("weak symbol {name} defined in multiple modules, keeping first");
                continue;
            }
            location.displace(&displacement);
            self.weak_symbols.insert(name, location);
        }

        for (name, symbol) in std::mem::take(&mut other.common_symbols) {
            match self.common_symbols.get_mut(&name) {
                None => {
                    self.common_symbols.insert(name, symbol);
                }
                Some(existing) => {
                    existing.size = existing.size.max(symbol.size);
                    existing.align = existing.align.max(symbol.align);
                }
            }
        }

        for import in std::mem::take(&mut other.imported_symbols) {
            self.add_imported_symbol(import);
        }

        for (symbol, mut location) in std::mem::take(&mut other.exported_symbols) {
            if self.exported_symbols.contains_key(&symbol) {
                log::debug!("export {symbol} defined in multiple modules, keeping first");
                continue;
            }
            location.displace(&displacement);
            self.exported_symbols.insert(symbol, location);
        }

        for mut relocation in std::mem::take(&mut other.relocations) {
            relocation.displace(&displacement);
            self.relocations.push(relocation);
        }

        Ok(())
    }

    // ---- common allocation ----

    /// Lays every common symbol down in its preferred section (`.comm` by
    /// default), binding it as a global. Runs once, after all modules are
    /// merged and before resolution.
    pub fn allocate_common_symbols(&mut self) {
        for (name, symbol) in std::mem::take(&mut self.common_symbols) {
            if self.global_symbols.contains_key(&name) || self.weak_symbols.contains_key(&name) {
                continue;
            }
            let section_name = if symbol.section_name.is_empty() {
                ".comm"
            } else {
                &symbol.section_name
            };
            let index = self.fetch_section(
                section_name,
                flags::READABLE | flags::WRITABLE | flags::ZERO_FILLED,
            );
            let align = if symbol.align.is_power_of_two() {
                symbol.align
            } else {
                symbol.align.next_power_of_two()
            };
            let section = self.section_mut(index);
            section.realign_end(align);
            if align > section.align {
                section.align = align;
            }
            let offset = section.size();
            section.expand(offset + symbol.size);
            log::debug!(
                "allocating {name} in {section_name} at {offset:#x}, size {}",
                symbol.size
            );
            self.global_symbols
                .insert(name, Location::section(index, offset));
        }
    }

    /// True when no relocation refers to a section outside this module's
    /// arena; merge and displacement must preserve this.
    pub fn check_relocation_sources(&self) -> bool {
        self.relocations.iter().all(|relocation| {
            relocation
                .source
                .section
                .is_none_or(|section| section.0 < self.sections.len())
        })
    }

    /// Whether the target of the relocation still names an unresolved
    /// non-import symbol.
    pub fn relocation_needs<'a>(&self, relocation: &'a Relocation) -> Option<&'a str> {
        match &relocation.target.base {
            TargetBase::Symbol(name) => name.plain_name(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_with_text(file_name: &str, bytes: &[u8]) -> (Module, SectionIndex) {
        let mut diag = Diagnostics::new();
        let mut module = Module::new(file_name);
        module.cpu = Cpu::I86;
        module.endian = Some(Endian::Little);
        let mut text = Section::new(".text", flags::READABLE | flags::EXECUTABLE);
        text.append(bytes).unwrap();
        let index = module.add_section(text, &mut diag);
        (module, index)
    }

    #[test]
    fn global_overrides_weak() {
        let mut diag = Diagnostics::new();
        let (mut module, text) = module_with_text("a.o", &[0x90]);
        module.add_weak_symbol("f", Location::section(text, 0));
        module.add_global_symbol("f", Location::section(text, 1), &mut diag);
        assert_eq!(
            module.find_global_symbol("f"),
            Some(Location::section(text, 1))
        );
        // a later weak does not shadow the global
        module.add_weak_symbol("f", Location::section(text, 0));
        assert_eq!(
            module.find_global_symbol("f"),
            Some(Location::section(text, 1))
        );
    }

    #[test]
    fn append_displaces_symbols_and_relocations() {
        let mut diag = Diagnostics::new();
        let (mut first, _) = module_with_text("a.o", &[0x90, 0x90]);
        let (mut second, second_text) = module_with_text("b.o", &[0xC3, 0xC3, 0xC3]);
        second.add_global_symbol("f", Location::section(second_text, 1), &mut diag);
        second.add_relocation(
            Relocation::absolute(
                2,
                Location::section(second_text, 0),
                Target::symbol(SymbolName::new("f")),
                0,
                Endian::Little,
            ),
            &mut diag,
        );

        first.append(second, &mut diag).unwrap();
        let text = first.find_section(".text").unwrap();
        // .text of b.o landed after the 2 bytes of a.o
        assert_eq!(
            first.find_global_symbol("f"),
            Some(Location::section(text, 3))
        );
        assert_eq!(
            first.relocations[0].source,
            Location::section(text, 2)
        );
        assert!(first.check_relocation_sources());
    }

    #[test]
    fn duplicate_global_keeps_first_and_warns() {
        let mut diag = Diagnostics::new();
        let (mut first, first_text) = module_with_text("a.o", &[0x90]);
        first.add_global_symbol("f", Location::section(first_text, 0), &mut diag);
        let (mut second, second_text) = module_with_text("b.o", &[0xC3]);
        second.add_global_symbol("f", Location::section(second_text, 0), &mut diag);

        first.append(second, &mut diag).unwrap();
        assert_eq!(
            first.find_global_symbol("f"),
            Some(Location::section(first_text, 0))
        );
        assert_eq!(diag.count_of(DiagnosticKind::DuplicateSymbol), 1);
        assert!(!diag.failed());
    }

    #[test]
    fn common_symbols_merge_by_maximum() {
        let mut diag = Diagnostics::new();
        let (mut first, _) = module_with_text("a.o", &[]);
        first.add_common_symbol("buf", CommonSymbol::new(100, 16));
        let (mut second, _) = module_with_text("b.o", &[]);
        second.add_common_symbol("buf", CommonSymbol::new(64, 32));

        first.append(second, &mut diag).unwrap();
        let (_, merged) = first.common_symbols().next().unwrap();
        assert_eq!(merged.size, 100);
        assert_eq!(merged.align, 32);
    }

    #[test]
    fn common_allocation_in_comm() {
        let mut diag = Diagnostics::new();
        let (mut module, _) = module_with_text("a.o", &[]);
        module.add_common_symbol("buf", CommonSymbol::new(100, 16));
        module.add_common_symbol("tmp", CommonSymbol::new(5, 1));
        module.allocate_common_symbols();

        assert_eq!(module.common_symbols().count(), 0);
        let comm = module.find_section(".comm").unwrap();
        assert!(module.section(comm).size() >= 105);
        assert!(module.section(comm).is_zero_filled());
        let buf = module.find_global_symbol("buf").unwrap();
        assert_eq!(buf.section, Some(comm));
        assert_eq!(buf.offset % 16, 0);
        let tmp = module.find_global_symbol("tmp").unwrap();
        assert!(tmp.offset >= buf.offset + 100);
    }

    #[test]
    fn resolve_locals_is_idempotent() {
        let mut diag = Diagnostics::new();
        let (mut module, text) = module_with_text("a.o", &[0x90; 4]);
        module
            .add_local_symbol("loop", Location::section(text, 2))
            .unwrap();
        module.add_relocation(
            Relocation::relative(
                1,
                Location::section(text, 0),
                Target::symbol(SymbolName::new("loop")),
                0,
                Endian::Little,
            ),
            &mut diag,
        );

        module.resolve_local_relocations();
        let once = module.relocations.clone();
        module.resolve_local_relocations();
        assert_eq!(module.relocations, once);
        assert_eq!(
            module.relocations[0].target,
            Target::location(Location::section(text, 2))
        );
    }

    #[test]
    fn segdif_prefix_becomes_segment_difference() {
        use crate::relocation::RelocationKind;

        let mut diag = Diagnostics::new();
        let (mut module, _) = module_with_text("a.o", &[0u8; 4]);
        let mut caps = Capabilities::none();
        caps.supports_segmentation = true;
        module.setup_options('$', caps, Capabilities::none());
        let mut data = Section::new(".data", flags::READABLE | flags::WRITABLE);
        data.append(&[0u8; 2]).unwrap();
        module.add_section(data, &mut diag);

        let text = module.find_section(".text").unwrap();
        module.add_relocation(
            Relocation::absolute(
                2,
                Location::section(text, 0),
                Target::symbol(SymbolName::new("$$SEGDIF$.text$.data")),
                0,
                Endian::Little,
            ),
            &mut diag,
        );
        assert_eq!(
            module.relocations[0].kind,
            RelocationKind::SegmentDifference
        );
        assert!(module.relocations[0].reference.is_some());
    }

    #[test]
    fn import_prefix_declares_runtime_import() {
        use crate::relocation::RelocationKind;

        let mut diag = Diagnostics::new();
        let (mut module, text) = module_with_text("a.o", &[0u8; 8]);
        let mut caps = Capabilities::none();
        caps.supports_libraries = true;
        module.setup_options('$', caps, Capabilities::none());

        module.add_undefined_symbol("$$IMPORT$KERNEL$5C", &mut diag);
        assert_eq!(
            module.imported_symbols(),
            &[SymbolName::ImportByOrdinal {
                library: "KERNEL".into(),
                ordinal: 0x5C
            }]
        );

        module.add_relocation(
            Relocation::absolute(
                2,
                Location::section(text, 0),
                Target::symbol(SymbolName::new("$$IMPORT$USER$_MessageBox")),
                0,
                Endian::Little,
            ),
            &mut diag,
        );
        // non-linear output: the import is patched as an in-segment offset
        assert_eq!(module.relocations[0].kind, RelocationKind::Offset);
        assert_eq!(
            module.relocations[0].target,
            Target::symbol(SymbolName::ImportByName {
                library: "USER".into(),
                name: "MessageBox".into()
            })
        );
        assert!(!diag.failed());
    }

    #[test]
    fn export_prefix_declares_export() {
        let mut diag = Diagnostics::new();
        let (mut module, text) = module_with_text("a.o", &[0u8; 4]);
        let mut caps = Capabilities::none();
        caps.supports_libraries = true;
        module.setup_options('$', caps, Capabilities::none());

        module.add_global_symbol("$$EXPORT$DoThing$3", Location::section(text, 0), &mut diag);
        let (symbol, location) = module.exported_symbols().next().unwrap();
        assert_eq!(symbol.name, "DoThing");
        assert_eq!(symbol.ordinal, Some(3));
        assert_eq!(*location, Location::section(text, 0));
        // the export does not double as a link-time global
        assert!(module.find_global_symbol("$$EXPORT$DoThing$3").is_none());
    }

    #[test]
    fn resource_section_names_decode_type_and_id() {
        let mut diag = Diagnostics::new();
        let mut module = Module::new("a.o");
        module.cpu = Cpu::M68k;
        let mut caps = Capabilities::none();
        caps.supports_resources = true;
        module.setup_options('$', caps, Capabilities::none());

        let mut icon = Section::new("$$RSRC$_ICN#$80", flags::READABLE);
        icon.append(&[0xFF; 32]).unwrap();
        let icon = module.add_section(icon, &mut diag);

        let section = module.section(icon);
        assert!(section.flags() & flags::RESOURCE != 0);
        assert_eq!(section.resource_type.as_deref(), Some("ICN#"));
        assert_eq!(section.resource_id, Some(0x80));
        assert!(diag.is_empty());
    }

    #[test]
    fn fix_prefix_patches_a_byte() {
        let mut diag = Diagnostics::new();
        let (mut module, text) = module_with_text("a.o", &[0u8; 4]);
        let mut input = Capabilities::none();
        input.requires_data_stream_fix = true;
        module.setup_options('$', Capabilities::none(), input);

        module
            .add_local_symbol("$$FIX$7F$patched", Location::section(text, 2))
            .unwrap();
        assert_eq!(module.section(text).get_byte(2), Some(0x7F));
        // the fix-up symbol itself never lands in the symbol table
        assert!(module.find_local_symbol("$$FIX$7F$patched").is_none());
        assert!(!diag.failed());
    }

    #[test]
    fn segdif_prefix_passes_through_unsegmented() {
        use crate::relocation::RelocationKind;

        let mut diag = Diagnostics::new();
        let (mut module, text) = module_with_text("a.o", &[0u8; 4]);
        module.add_relocation(
            Relocation::absolute(
                2,
                Location::section(text, 0),
                Target::symbol(SymbolName::new("$$SEGDIF$.text$.data")),
                0,
                Endian::Little,
            ),
            &mut diag,
        );
        // without segmentation in the output the name is literal
        assert_eq!(module.relocations[0].kind, RelocationKind::Absolute);
        assert_eq!(
            module.relocation_needs(&module.relocations[0]),
            Some("$$SEGDIF$.text$.data")
        );
    }
}
