//! Collecting modules and resolving libraries on demand.
//!
//! Object modules always contribute to the output. Library modules are only
//! pulled in when they define a symbol some included module needs, which in
//! turn may require further library modules: inclusion is a closure over
//! the relocation targets of everything included so far.

use std::collections::{BTreeMap, BTreeSet};

use crate::diag::{DiagnosticKind, Diagnostics};
use crate::error::Result;
use crate::module::Module;

/// Where a symbol was first defined.
#[derive(Debug, Clone, Copy)]
struct Definition {
    module: usize,
    weak: bool,
}

/// Collects object files and libraries and decides which modules become
/// part of the final binary.
#[derive(Debug, Default)]
pub struct ModuleCollector {
    /// All modules under consideration, in insertion order; not all of
    /// them end up included
    pub modules: Vec<Module>,
    /// Symbols referenced by included modules but not defined by any of
    /// them yet; defining one of these pulls the defining module in
    required_symbols: BTreeSet<String>,
    symbol_definitions: BTreeMap<String, Definition>,
}

impl ModuleCollector {
    pub fn new() -> Self {
        ModuleCollector::default()
    }

    /// Registers a module's definitions and, for libraries, holds it back
    /// until some included module needs it.
    pub fn add_module(&mut self, mut module: Module, is_library: bool, diag: &mut Diagnostics) {
        // local symbols can be lost or duplicated by later merges, so
        // relocations against them are pinned down before anything else
        module.resolve_local_relocations();

        let index = self.modules.len();
        let globals: Vec<String> = module.global_symbols().map(|(n, _)| n.clone()).collect();
        let weaks: Vec<String> = module.weak_symbols().map(|(n, _)| n.clone()).collect();
        self.modules.push(module);

        for name in globals {
            if let Some(existing) = self.symbol_definitions.get(&name) {
                if !existing.weak {
                    diag.warning(
                        DiagnosticKind::DuplicateSymbol,
                        format!(
                            "duplicate symbol {name} in {} (first defined in {}), ignoring duplicate",
                            self.modules[index].file_name,
                            self.modules[existing.module].file_name
                        ),
                    );
                    continue;
                }
                // a strong definition overrides a previously weak one
            }
            self.symbol_definitions
                .insert(name.clone(), Definition { module: index, weak: false });
            if self.required_symbols.contains(&name) {
                self.include_module(index);
            }
        }

        for name in weaks {
            if self.symbol_definitions.contains_key(&name) {
                continue;
            }
            self.symbol_definitions
                .insert(name.clone(), Definition { module: index, weak: true });
            if self.required_symbols.contains(&name) {
                self.include_module(index);
            }
        }

        if !is_library {
            self.include_module(index);
        }
    }

    pub fn add_library_module(&mut self, module: Module, diag: &mut Diagnostics) {
        self.add_module(module, true, diag);
    }

    /// Marks a module included and chases the symbols its relocations
    /// need, including defining modules transitively.
    fn include_module(&mut self, index: usize) {
        if self.modules[index].included {
            return;
        }
        // must be set before recursing, or two modules referencing each
        // other would never terminate
        self.modules[index].included = true;

        let defined: Vec<String> = {
            let module = &self.modules[index];
            module
                .global_symbols()
                .chain(module.weak_symbols())
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in &defined {
            self.required_symbols.remove(name);
        }

        let needed: Vec<String> = self.modules[index]
            .relocations
            .iter()
            .filter_map(|relocation| self.modules[index].relocation_needs(relocation))
            .map(str::to_string)
            .collect();
        for name in needed {
            match self.symbol_definitions.get(&name) {
                Some(definition) => {
                    let defining = definition.module;
                    if !self.modules[defining].included {
                        self.include_module(defining);
                    }
                }
                None => {
                    self.required_symbols.insert(name);
                }
            }
        }
    }

    /// The symbols that remain genuinely unresolved after all modules have
    /// been added.
    pub fn required_symbols(&self) -> &BTreeSet<String> {
        &self.required_symbols
    }

    /// Appends every included module into `output`, in insertion order.
    pub fn combine_into(self, output: &mut Module, diag: &mut Diagnostics) -> Result<()> {
        for module in self.modules {
            if module.included {
                output.append(module, diag)?;
            }
        }
        output.resolve_local_relocations();
        Ok(())
    }
}

/// A synthesized section of address slots, one per distinct imported
/// symbol name; duplicate entries coalesce.
#[derive(Debug, Default)]
pub struct GlobalOffsetTable {
    entries: Vec<String>,
}

impl GlobalOffsetTable {
    pub fn new() -> Self {
        GlobalOffsetTable::default()
    }

    /// Adds an entry, returning its slot index; an existing entry of the
    /// same name is reused.
    pub fn add_entry(&mut self, name: &str) -> usize {
        if let Some(slot) = self.slot_of(name) {
            return slot;
        }
        self.entries.push(name.to_string());
        self.entries.len() - 1
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endian::Endian;
    use crate::module::Cpu;
    use crate::relocation::Relocation;
    use crate::section::{Section, flags};
    use crate::symbol::SymbolName;
    use crate::target::{Location, Target};

    fn module_defining(
        file_name: &str,
        defines: &[&str],
        needs: &[&str],
        diag: &mut Diagnostics,
    ) -> Module {
        let mut module = Module::new(file_name);
        module.cpu = Cpu::I386;
        module.endian = Some(Endian::Little);
        let mut text = Section::new(".text", flags::READABLE | flags::EXECUTABLE);
        text.append(&vec![0x90u8; 4 * (defines.len() + needs.len()).max(1)])
            .unwrap();
        let index = module.add_section(text, diag);
        for (at, name) in defines.iter().enumerate() {
            module.add_global_symbol(name, Location::section(index, at as u64), diag);
        }
        for (at, name) in needs.iter().enumerate() {
            module.add_relocation(
                Relocation::absolute(
                    4,
                    Location::section(index, (at * 4) as u64),
                    Target::symbol(SymbolName::new(*name)),
                    0,
                    Endian::Little,
                ),
                diag,
            );
        }
        module
    }

    #[test]
    fn libraries_include_on_demand_transitively() {
        let mut diag = Diagnostics::new();
        let mut collector = ModuleCollector::new();
        // library L defines strlen but needs memchr, library M defines memchr
        let user = module_defining("user.o", &[], &["strlen"], &mut diag);
        let lib_l = module_defining("l.a(strlen.o)", &["strlen"], &["memchr"], &mut diag);
        let lib_m = module_defining("m.a(memchr.o)", &["memchr"], &[], &mut diag);
        let lib_unused = module_defining("m.a(unused.o)", &["qsort"], &[], &mut diag);

        collector.add_module(user, false, &mut diag);
        assert_eq!(collector.required_symbols().len(), 1);
        collector.add_library_module(lib_l, &mut diag);
        collector.add_library_module(lib_m, &mut diag);
        collector.add_library_module(lib_unused, &mut diag);

        assert!(collector.required_symbols().is_empty());
        let included: Vec<&str> = collector
            .modules
            .iter()
            .filter(|m| m.included)
            .map(|m| m.file_name.as_str())
            .collect();
        assert_eq!(included, ["user.o", "l.a(strlen.o)", "m.a(memchr.o)"]);

        let mut merged = Module::new("a.out");
        collector.combine_into(&mut merged, &mut diag).unwrap();
        assert!(merged.find_global_symbol("strlen").is_some());
        assert!(merged.find_global_symbol("memchr").is_some());
        assert!(merged.find_global_symbol("qsort").is_none());
    }

    #[test]
    fn library_added_before_its_user() {
        let mut diag = Diagnostics::new();
        let mut collector = ModuleCollector::new();
        let lib = module_defining("libc.a(strlen.o)", &["strlen"], &[], &mut diag);
        let user = module_defining("user.o", &[], &["strlen"], &mut diag);

        collector.add_library_module(lib, &mut diag);
        assert!(!collector.modules[0].included);
        collector.add_module(user, false, &mut diag);

        assert!(collector.modules[0].included);
        assert!(collector.required_symbols().is_empty());
    }

    #[test]
    fn mutually_referencing_libraries_terminate() {
        let mut diag = Diagnostics::new();
        let mut collector = ModuleCollector::new();
        let user = module_defining("user.o", &[], &["a"], &mut diag);
        let lib_a = module_defining("a.o", &["a"], &["b"], &mut diag);
        let lib_b = module_defining("b.o", &["b"], &["a"], &mut diag);

        collector.add_module(user, false, &mut diag);
        collector.add_library_module(lib_a, &mut diag);
        collector.add_library_module(lib_b, &mut diag);

        assert!(collector.required_symbols().is_empty());
        assert!(collector.modules.iter().all(|m| m.included));
    }

    #[test]
    fn strong_definition_overrides_weak_without_duplicate_warning() {
        let mut diag = Diagnostics::new();
        let mut collector = ModuleCollector::new();
        let mut weak_module = module_defining("weak.o", &[], &[], &mut diag);
        let text = weak_module.find_section(".text").unwrap();
        weak_module.add_weak_symbol("f", Location::section(text, 0));
        let strong_module = module_defining("strong.o", &["f"], &[], &mut diag);

        collector.add_module(weak_module, false, &mut diag);
        collector.add_module(strong_module, false, &mut diag);
        assert_eq!(diag.count_of(DiagnosticKind::DuplicateSymbol), 0);
    }

    #[test]
    fn got_entries_coalesce() {
        let mut table = GlobalOffsetTable::new();
        assert_eq!(table.add_entry("a"), 0);
        assert_eq!(table.add_entry("b"), 1);
        assert_eq!(table.add_entry("a"), 0);
        assert_eq!(table.len(), 2);
    }
}
