//! ELF relocatable-object reader.
//!
//! Parses ELF32/ELF64 `.o` files in either byte order and produces a
//! [`Module`]. Only relocatable objects are accepted: a linker has no use
//! for an already linked executable. Backends exist for i386 (which also
//! serves 16-bit 8086 output, selected by the output format's word size),
//! m68k and ARM, mirroring the CPUs the supported output formats run on.
//!
//! Extended relocation types above the SVR4 set (`R_386_SEG16` and
//! friends) come from assemblers that target segmented output through
//! ELF; they map directly onto paragraph and selector relocations.

use scroll::{Pread, Pwrite, SizeWith};

use crate::diag::Diagnostics;
use crate::endian::Endian;
use crate::error::{Error, Result};
use crate::formats::{Capabilities, InputFormat};
use crate::io::Reader;
use crate::module::{Cpu, Module};
use crate::relocation::Relocation;
use crate::section::{Section, flags};
use crate::symbol::{CommonSymbol, SymbolName};
use crate::target::{Location, SectionIndex, Target};

pub const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const ELFDATA2MSB: u8 = 2;

pub const ET_REL: u16 = 1;

pub const EM_386: u16 = 3;
pub const EM_68K: u16 = 4;
pub const EM_ARM: u16 = 40;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;

pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;
pub const SHF_MERGE: u64 = 0x10;
pub const SHF_GROUP: u64 = 0x200;

pub const SHN_UNDEF: u16 = 0;
pub const SHN_ABS: u16 = 0xFFF1;
pub const SHN_COMMON: u16 = 0xFFF2;
pub const SHN_XINDEX: u16 = 0xFFFF;

pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

pub const R_386_32: u32 = 1;
pub const R_386_PC32: u32 = 2;
pub const R_386_GOT32: u32 = 3;
pub const R_386_PLT32: u32 = 4;
pub const R_386_GOTOFF: u32 = 9;
pub const R_386_GOTPC: u32 = 10;
pub const R_386_16: u32 = 20;
pub const R_386_PC16: u32 = 21;
pub const R_386_8: u32 = 22;
pub const R_386_PC8: u32 = 23;
// segmented extensions, emitted by ELKS and Open Watcom style toolchains
pub const R_386_SEG16: u32 = 45;
pub const R_386_SUB16: u32 = 46;
pub const R_386_SUB32: u32 = 47;
pub const R_386_SEGRELATIVE: u32 = 48;
pub const R_386_OZSEG16: u32 = 80;
pub const R_386_OZRELSEG16: u32 = 81;

pub const R_68K_32: u32 = 1;
pub const R_68K_16: u32 = 2;
pub const R_68K_8: u32 = 3;
pub const R_68K_PC32: u32 = 4;
pub const R_68K_PC16: u32 = 5;
pub const R_68K_PC8: u32 = 6;
pub const R_68K_GOT32: u32 = 7;
pub const R_68K_GOT16: u32 = 8;
pub const R_68K_GOT8: u32 = 9;
pub const R_68K_GOT32O: u32 = 10;
pub const R_68K_GOT16O: u32 = 11;
pub const R_68K_GOT8O: u32 = 12;

pub const R_ARM_PC24: u32 = 1;
pub const R_ARM_ABS32: u32 = 2;
pub const R_ARM_REL32: u32 = 3;
pub const R_ARM_CALL: u32 = 28;
pub const R_ARM_JUMP24: u32 = 29;
pub const R_ARM_V4BX: u32 = 40;

/// The identification block at the start of every ELF file.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Ident {
    pub magic: [u8; 4],
    pub class: u8,
    pub data: u8,
    pub version: u8,
    pub osabi: u8,
    pub abiversion: u8,
    pub padding: [u8; 7],
}

unsafe impl plain::Plain for Ident {}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pread, Pwrite, SizeWith)]
pub struct Header32 {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pread, Pwrite, SizeWith)]
pub struct Header64 {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pread, Pwrite, SizeWith)]
pub struct SectionHeader32 {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u32,
    pub sh_addr: u32,
    pub sh_offset: u32,
    pub sh_size: u32,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u32,
    pub sh_entsize: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pread, Pwrite, SizeWith)]
pub struct SectionHeader64 {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pread, Pwrite, SizeWith)]
pub struct Sym32 {
    pub st_name: u32,
    pub st_value: u32,
    pub st_size: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pread, Pwrite, SizeWith)]
pub struct Sym64 {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

unsafe impl plain::Plain for Header32 {}
unsafe impl plain::Plain for Header64 {}
unsafe impl plain::Plain for SectionHeader32 {}
unsafe impl plain::Plain for SectionHeader64 {}
unsafe impl plain::Plain for Sym32 {}
unsafe impl plain::Plain for Sym64 {}

/// Parsed section-header data, word size already unified.
#[derive(Debug, Clone, Default)]
struct ElfSection {
    name: String,
    sh_type: u32,
    sh_flags: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
}

#[derive(Debug, Clone)]
struct ElfSymbol {
    name: String,
    value: u64,
    size: u64,
    bind: u8,
    shndx: u16,
}

#[derive(Debug, Clone, Copy)]
struct ElfReloc {
    offset: u64,
    symbol: u32,
    r_type: u32,
    /// Explicit addend for RELA sections; REL sections take the addend
    /// from the section data
    addend: Option<i64>,
}

/// Reader state for one ELF object file.
#[derive(Debug)]
pub struct ElfFormat {
    data: Vec<u8>,
    is_64: bool,
    endian: Endian,
    machine: u16,
    sections: Vec<ElfSection>,
    /// ELF section index of a symbol table → its symbols
    symtabs: Vec<(usize, Vec<ElfSymbol>)>,
    /// (section the relocations apply to, symtab section, entries)
    relocs: Vec<(usize, usize, Vec<ElfReloc>)>,
}

impl Default for ElfFormat {
    fn default() -> Self {
        ElfFormat::new()
    }
}

impl ElfFormat {
    pub fn new() -> Self {
        ElfFormat {
            data: Vec::new(),
            is_64: false,
            endian: Endian::Little,
            machine: 0,
            sections: Vec::new(),
            symtabs: Vec::new(),
            relocs: Vec::new(),
        }
    }

    fn scroll_endian(&self) -> scroll::Endian {
        self.endian.to_scroll().unwrap_or(scroll::Endian::Little)
    }

    fn string_at(&self, strtab: &ElfSection, index: u32) -> String {
        let start = (strtab.offset + u64::from(index)) as usize;
        let end = (strtab.offset + strtab.size) as usize;
        if start >= end || end > self.data.len() {
            return String::new();
        }
        let bytes = &self.data[start..end];
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..len]).into_owned()
    }

    fn parse_section_headers(&mut self, shoff: u64, shnum: usize, shstrndx: usize) -> Result<()> {
        let le = self.scroll_endian();
        let entry_size = if self.is_64 {
            core::mem::size_of::<SectionHeader64>()
        } else {
            core::mem::size_of::<SectionHeader32>()
        };
        for index in 0..shnum {
            let offset = shoff as usize + index * entry_size;
            let section = if self.is_64 {
                let raw: SectionHeader64 = self.data.pread_with(offset, le)?;
                ElfSection {
                    name: String::new(),
                    sh_type: raw.sh_type,
                    sh_flags: raw.sh_flags,
                    offset: raw.sh_offset,
                    size: raw.sh_size,
                    link: raw.sh_link,
                    info: raw.sh_info,
                    addralign: raw.sh_addralign,
                }
            } else {
                let raw: SectionHeader32 = self.data.pread_with(offset, le)?;
                ElfSection {
                    name: String::new(),
                    sh_type: raw.sh_type,
                    sh_flags: u64::from(raw.sh_flags),
                    offset: u64::from(raw.sh_offset),
                    size: u64::from(raw.sh_size),
                    link: raw.sh_link,
                    info: raw.sh_info,
                    addralign: u64::from(raw.sh_addralign),
                }
            };
            self.sections.push(section);
        }

        if shstrndx < self.sections.len() {
            let strtab = self.sections[shstrndx].clone();
            for index in 0..self.sections.len() {
                let name_offset = self.pread_name_offset(shoff, index)?;
                self.sections[index].name = self.string_at(&strtab, name_offset);
            }
        }
        Ok(())
    }

    fn pread_name_offset(&self, shoff: u64, index: usize) -> Result<u32> {
        let entry_size = if self.is_64 {
            core::mem::size_of::<SectionHeader64>()
        } else {
            core::mem::size_of::<SectionHeader32>()
        };
        // sh_name is the first field of both layouts
        Ok(self
            .data
            .pread_with(shoff as usize + index * entry_size, self.scroll_endian())?)
    }

    fn parse_symtab(&self, section: &ElfSection) -> Result<Vec<ElfSymbol>> {
        let le = self.scroll_endian();
        let entry_size = if self.is_64 {
            core::mem::size_of::<Sym64>()
        } else {
            core::mem::size_of::<Sym32>()
        };
        let strtab = self
            .sections
            .get(section.link as usize)
            .cloned()
            .unwrap_or_default();
        let count = (section.size as usize) / entry_size;
        let mut symbols = Vec::with_capacity(count);
        for index in 0..count {
            let offset = section.offset as usize + index * entry_size;
            let symbol = if self.is_64 {
                let raw: Sym64 = self.data.pread_with(offset, le)?;
                ElfSymbol {
                    name: self.string_at(&strtab, raw.st_name),
                    value: raw.st_value,
                    size: raw.st_size,
                    bind: raw.st_info >> 4,
                    shndx: raw.st_shndx,
                }
            } else {
                let raw: Sym32 = self.data.pread_with(offset, le)?;
                ElfSymbol {
                    name: self.string_at(&strtab, raw.st_name),
                    value: u64::from(raw.st_value),
                    size: u64::from(raw.st_size),
                    bind: raw.st_info >> 4,
                    shndx: raw.st_shndx,
                }
            };
            symbols.push(symbol);
        }
        Ok(symbols)
    }

    fn parse_relocs(&self, section: &ElfSection) -> Result<Vec<ElfReloc>> {
        let le = self.scroll_endian();
        let explicit_addend = section.sh_type == SHT_RELA;
        let word = if self.is_64 { 8 } else { 4 };
        let entry_size = word * if explicit_addend { 3 } else { 2 };
        let count = (section.size as usize) / entry_size;
        let mut relocs = Vec::with_capacity(count);
        for index in 0..count {
            let mut offset = section.offset as usize + index * entry_size;
            let (r_offset, r_info, r_addend) = if self.is_64 {
                let r_offset: u64 = self.data.gread_with(&mut offset, le)?;
                let r_info: u64 = self.data.gread_with(&mut offset, le)?;
                let r_addend = if explicit_addend {
                    Some(self.data.gread_with::<i64>(&mut offset, le)?)
                } else {
                    None
                };
                (r_offset, r_info, r_addend)
            } else {
                let r_offset: u32 = self.data.gread_with(&mut offset, le)?;
                let r_info: u32 = self.data.gread_with(&mut offset, le)?;
                let r_addend = if explicit_addend {
                    Some(i64::from(self.data.gread_with::<i32>(&mut offset, le)?))
                } else {
                    None
                };
                (u64::from(r_offset), u64::from(r_info), r_addend)
            };
            let (symbol, r_type) = if self.is_64 {
                ((r_info >> 32) as u32, (r_info & 0xFFFF_FFFF) as u32)
            } else {
                ((r_info >> 8) as u32, (r_info & 0xFF) as u32)
            };
            relocs.push(ElfReloc {
                offset: r_offset,
                symbol,
                r_type,
                addend: r_addend,
            });
        }
        Ok(relocs)
    }

    /// Field width of a relocation type, zero for types that patch
    /// nothing we can express.
    fn reloc_size(&self, r_type: u32) -> usize {
        match self.machine {
            EM_386 => match r_type {
                R_386_8 | R_386_PC8 => 1,
                R_386_16 | R_386_PC16 | R_386_SEG16 | R_386_SUB16 | R_386_SEGRELATIVE
                | R_386_OZSEG16 | R_386_OZRELSEG16 => 2,
                R_386_32 | R_386_PC32 | R_386_SUB32 | R_386_GOT32 | R_386_GOTPC
                | R_386_GOTOFF | R_386_PLT32 => 4,
                _ => 0,
            },
            EM_68K => match r_type {
                R_68K_8 | R_68K_PC8 | R_68K_GOT8 | R_68K_GOT8O => 1,
                R_68K_16 | R_68K_PC16 | R_68K_GOT16 | R_68K_GOT16O => 2,
                R_68K_32 | R_68K_PC32 | R_68K_GOT32 | R_68K_GOT32O => 4,
                _ => 0,
            },
            EM_ARM => 4,
            _ => 0,
        }
    }
}

impl InputFormat for ElfFormat {
    fn read_file(&mut self, rd: &mut Reader<'_>) -> Result<()> {
        self.data = rd.read_to_end()?;
        if self.data.len() < 16 {
            return Err(Error::Malformed("file too short for an ELF ident".into()));
        }
        let ident: &Ident = plain::from_bytes(&self.data[..16])
            .map_err(|_| Error::Malformed("unreadable ELF ident".into()))?;
        if ident.magic != MAGIC {
            return Err(Error::BadMagic(u64::from_be_bytes([
                0,
                0,
                0,
                0,
                ident.magic[0],
                ident.magic[1],
                ident.magic[2],
                ident.magic[3],
            ])));
        }
        self.is_64 = match ident.class {
            ELFCLASS32 => false,
            ELFCLASS64 => true,
            other => {
                return Err(Error::Malformed(format!("illegal ELF class {other}")));
            }
        };
        self.endian = match ident.data {
            ELFDATA2LSB => Endian::Little,
            ELFDATA2MSB => Endian::Big,
            other => {
                return Err(Error::Malformed(format!("illegal ELF byte order {other}")));
            }
        };

        let le = self.scroll_endian();
        let (e_type, machine, shoff, shnum, shstrndx) = if self.is_64 {
            let header: Header64 = self.data.pread_with(16, le)?;
            (
                header.e_type,
                header.e_machine,
                header.e_shoff,
                header.e_shnum as usize,
                header.e_shstrndx as usize,
            )
        } else {
            let header: Header32 = self.data.pread_with(16, le)?;
            (
                header.e_type,
                header.e_machine,
                u64::from(header.e_shoff),
                header.e_shnum as usize,
                header.e_shstrndx as usize,
            )
        };
        if e_type != ET_REL {
            return Err(Error::Malformed(format!(
                "not a relocatable object (e_type {e_type})"
            )));
        }
        self.machine = machine;
        self.parse_section_headers(shoff, shnum, shstrndx)?;

        for index in 0..self.sections.len() {
            let section = self.sections[index].clone();
            match section.sh_type {
                SHT_SYMTAB => {
                    let symbols = self.parse_symtab(&section)?;
                    self.symtabs.push((index, symbols));
                }
                SHT_REL | SHT_RELA => {
                    let entries = self.parse_relocs(&section)?;
                    self.relocs
                        .push((section.info as usize, section.link as usize, entries));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn generate_module(&self, module: &mut Module, diag: &mut Diagnostics) -> Result<()> {
        let output = module.output_capabilities();
        module.cpu = match self.machine {
            EM_386 => {
                if output.is_16bit {
                    Cpu::I86
                } else {
                    Cpu::I386
                }
            }
            EM_68K => Cpu::M68k,
            EM_ARM => Cpu::Arm,
            other => {
                return Err(Error::Malformed(format!(
                    "unknown CPU type in ELF file: {other}"
                )));
            }
        };
        module.endian = Some(self.endian);

        // allocatable progbits and nobits become linker sections
        let mut section_map: Vec<Option<SectionIndex>> = vec![None; self.sections.len()];
        for (index, elf_section) in self.sections.iter().enumerate() {
            if elf_section.sh_flags & SHF_ALLOC == 0 {
                continue;
            }
            if !matches!(elf_section.sh_type, SHT_PROGBITS | SHT_NOBITS) {
                continue;
            }
            if elf_section.sh_flags & SHF_MERGE != 0 {
                log::debug!("mergeable section {} linked as ordinary", elf_section.name);
            }
            if elf_section.sh_flags & SHF_GROUP != 0 {
                log::debug!("section group member {} linked as ordinary", elf_section.name);
            }

            let mut bits = flags::READABLE;
            if elf_section.sh_flags & SHF_WRITE != 0 {
                bits |= flags::WRITABLE;
            }
            if elf_section.sh_flags & SHF_EXECINSTR != 0 {
                bits |= flags::EXECUTABLE;
            }
            if elf_section.sh_type == SHT_NOBITS {
                bits |= flags::ZERO_FILLED;
            }
            if elf_section.sh_flags & SHF_MERGE != 0 {
                bits |= flags::MERGEABLE;
            }
            if elf_section.sh_flags & SHF_GROUP != 0 {
                bits |= flags::GROUP;
            }

            let mut section = Section::new(elf_section.name.clone(), bits);
            section.align = match elf_section.addralign {
                align if align.is_power_of_two() => align,
                0 => 1,
                align => {
                    log::warn!("section {} alignment {align} is not a power of two", elf_section.name);
                    1
                }
            };
            if elf_section.sh_type == SHT_PROGBITS {
                let start = elf_section.offset as usize;
                let end = start + elf_section.size as usize;
                if end > self.data.len() {
                    return Err(Error::Malformed(format!(
                        "section {} extends past end of file",
                        elf_section.name
                    )));
                }
                section.append(&self.data[start..end])?;
            } else {
                section.expand(elf_section.size);
            }
            section_map[index] = Some(module.add_section(section, diag));
        }

        let symbol_location = |symbol: &ElfSymbol| -> Option<Location> {
            match symbol.shndx {
                SHN_ABS => Some(Location::absolute(symbol.value)),
                SHN_UNDEF | SHN_COMMON | SHN_XINDEX => None,
                shndx => section_map
                    .get(shndx as usize)
                    .copied()
                    .flatten()
                    .map(|section| Location::section(section, symbol.value)),
            }
        };

        for (_, symbols) in &self.symtabs {
            for symbol in symbols {
                if symbol.shndx == SHN_XINDEX {
                    log::warn!("extended section numbers not supported, symbol {} dropped", symbol.name);
                    continue;
                }
                if symbol.shndx == SHN_COMMON {
                    // st_value carries the alignment for common symbols
                    module.add_common_symbol(
                        &symbol.name,
                        CommonSymbol::new(symbol.size, symbol.value),
                    );
                    continue;
                }
                let Some(location) = symbol_location(symbol) else {
                    if !symbol.name.is_empty() {
                        module.add_undefined_symbol(&symbol.name, diag);
                    }
                    continue;
                };
                if symbol.name.is_empty() {
                    continue;
                }
                match symbol.bind {
                    STB_LOCAL => module.add_local_symbol(&symbol.name, location)?,
                    STB_GLOBAL => module.add_global_symbol(&symbol.name, location, diag),
                    STB_WEAK => module.add_weak_symbol(&symbol.name, location),
                    other => {
                        log::debug!("unknown symbol binding type {other}, ignoring");
                    }
                }
            }
        }

        for (applies_to, symtab_index, entries) in &self.relocs {
            let Some(source_section) = section_map.get(*applies_to).copied().flatten() else {
                continue;
            };
            let Some((_, symbols)) = self
                .symtabs
                .iter()
                .find(|(index, _)| index == symtab_index)
            else {
                continue;
            };
            for entry in entries {
                let Some(symbol) = symbols.get(entry.symbol as usize) else {
                    diag.error(
                        crate::diag::DiagnosticKind::Other,
                        format!("relocation references symbol {} out of range", entry.symbol),
                    );
                    continue;
                };
                let source = Location::section(source_section, entry.offset);
                let target = match symbol_location(symbol) {
                    Some(location) => Target::location(location),
                    None => Target::symbol(SymbolName::new(symbol.name.clone())),
                };
                let addend = entry.addend.unwrap_or(0);
                let Some(mut relocation) = self.map_relocation(
                    entry,
                    source,
                    target,
                    &symbol.name,
                    addend,
                    &output,
                ) else {
                    continue;
                };
                if entry.addend.is_none() {
                    relocation = relocation.with_addend_from_section_data();
                }
                module.add_relocation(relocation, diag);
            }
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        // plain ELF expresses none of the legacy-format extras natively
        Capabilities::none()
    }
}

impl ElfFormat {
    fn map_relocation(
        &self,
        entry: &ElfReloc,
        source: Location,
        target: Target,
        symbol_name: &str,
        addend: i64,
        output: &Capabilities,
    ) -> Option<Relocation> {
        let size = self.reloc_size(entry.r_type);
        match self.machine {
            EM_386 => {
                if size == 0 {
                    return None;
                }
                match entry.r_type {
                    R_386_8 | R_386_16 | R_386_32 => Some(if output.is_linear {
                        Relocation::absolute(size, source, target, addend, Endian::Little)
                    } else {
                        Relocation::offset(size, source, target, addend, Endian::Little)
                    }),
                    R_386_PC8 | R_386_PC16 | R_386_PC32 => Some(Relocation::relative(
                        size,
                        source,
                        target,
                        addend,
                        Endian::Little,
                    )),
                    R_386_SUB16 | R_386_SUB32 => Some(Relocation::offset_from(
                        size,
                        source,
                        Target::location(Location::absolute(0)),
                        target,
                        addend,
                        Endian::Little,
                    )),
                    R_386_SEG16 => Some(if output.is_protected_mode {
                        Relocation::selector(source, target, addend)
                    } else {
                        Relocation::paragraph(source, target, addend)
                    }),
                    R_386_OZSEG16 => Some(if output.is_protected_mode {
                        Relocation::selector(source, target.segment(), addend)
                    } else {
                        Relocation::paragraph(source, target.segment(), addend)
                    }),
                    R_386_GOT32 => Some(Relocation::got_absolute(
                        size,
                        source,
                        symbol_name,
                        addend,
                        Endian::Little,
                    )),
                    R_386_GOTPC => Some(Relocation::relative(
                        size,
                        source,
                        Target::symbol(SymbolName::new("_GLOBAL_OFFSET_TABLE_")),
                        addend,
                        Endian::Little,
                    )),
                    R_386_GOTOFF => Some(Relocation::offset_from(
                        size,
                        source,
                        target,
                        Target::symbol(SymbolName::new("_GLOBAL_OFFSET_TABLE_")),
                        addend,
                        Endian::Little,
                    )),
                    R_386_SEGRELATIVE | R_386_OZRELSEG16 => {
                        log::warn!("unhandled segment-relative relocation type {}", entry.r_type);
                        None
                    }
                    R_386_PLT32 => {
                        log::warn!("procedure linkage tables not supported, PLT32 dropped");
                        None
                    }
                    _ => {
                        log::warn!("unhandled i386 relocation type {}", entry.r_type);
                        None
                    }
                }
            }
            EM_68K => {
                if size == 0 {
                    return None;
                }
                match entry.r_type {
                    R_68K_8 | R_68K_16 | R_68K_32 => Some(Relocation::absolute(
                        size,
                        source,
                        target,
                        addend,
                        Endian::Big,
                    )),
                    R_68K_PC8 | R_68K_PC16 | R_68K_PC32 => Some(Relocation::relative(
                        size,
                        source,
                        target,
                        addend,
                        Endian::Big,
                    )),
                    R_68K_GOT8 | R_68K_GOT16 | R_68K_GOT32 => Some(Relocation::got_absolute(
                        size,
                        source,
                        symbol_name,
                        addend,
                        Endian::Big,
                    )),
                    R_68K_GOT8O | R_68K_GOT16O | R_68K_GOT32O => Some(Relocation::got_relative(
                        size,
                        source,
                        symbol_name,
                        addend,
                        Endian::Big,
                    )),
                    _ => {
                        log::warn!("unhandled m68k relocation type {}", entry.r_type);
                        None
                    }
                }
            }
            EM_ARM => match entry.r_type {
                R_ARM_ABS32 => Some(Relocation::absolute(
                    4,
                    source,
                    target,
                    addend,
                    Endian::Little,
                )),
                R_ARM_REL32 => Some(Relocation::relative(
                    4,
                    source,
                    target,
                    addend,
                    Endian::Little,
                )),
                R_ARM_CALL | R_ARM_JUMP24 | R_ARM_PC24 => Some(
                    Relocation::relative(4, source, target, addend, Endian::Little)
                        .with_mask(0x00FF_FFFF)
                        .with_shift(2),
                ),
                R_ARM_V4BX => None,
                other => {
                    log::warn!("unhandled ARM relocation type {other}");
                    None
                }
            },
            _ => None,
        }
    }
}
