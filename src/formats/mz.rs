//! MZ .EXE writer for MS-DOS.
//!
//! The native .exe format of MS-DOS, named after the "MZ" identification
//! code in its first two bytes. The header carries the image size in
//! 512-byte blocks, the memory the program needs beyond its image, the
//! initial `ss:sp` and `cs:ip` register values and a table of paragraph
//! fixups the loader adds the start segment to.
//!
//! Paragraph relocations applied by the resolution engine come back as
//! fixups; their source addresses, converted to `segment:offset` pairs,
//! become the header relocation table.

use scroll::{Pread, Pwrite, SizeWith};
use std::collections::BTreeMap;

use crate::diag::{DiagnosticKind, Diagnostics};
use crate::endian::{Endian, align_to};
use crate::error::{Error, Result};
use crate::formats::{Capabilities, OutputFormat};
use crate::io::Writer;
use crate::layout::{Layout, stack_section};
use crate::manager::LinkerManager;
use crate::module::Module;
use crate::relocation::RelocationKind;
use crate::script::MemoryModel;
use crate::section::flags;

pub const MAGIC_MZ: [u8; 2] = *b"MZ";
/// Some early executables reportedly used "ZM" instead
pub const MAGIC_ZM: [u8; 2] = *b"ZM";

pub const HEADER_SIZE: usize = 0x1C;
const BLOCK_SIZE: u32 = 512;
const PARAGRAPH: u32 = 16;
/// Stack paragraphs appended when no module declares a stack section
const DEFAULT_STACK_SIZE: u32 = 0x1000;

/// The on-disk header, fields in file order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pread, Pwrite, SizeWith)]
pub struct MzHeader {
    pub signature: [u8; 2],
    /// Bytes used in the last 512-byte block, 0 if it is full
    pub last_block_size: u16,
    /// File size in 512-byte blocks, rounded up
    pub file_size_blocks: u16,
    pub relocation_count: u16,
    pub header_size_paras: u16,
    /// Minimum extra memory beyond the image, in paragraphs
    pub min_extra_paras: u16,
    pub max_extra_paras: u16,
    pub ss: u16,
    pub sp: u16,
    pub checksum: u16,
    pub ip: u16,
    pub cs: u16,
    pub relocation_offset: u16,
    pub overlay_number: u16,
}

unsafe impl plain::Plain for MzHeader {}

/// One relocation table entry: a `segment:offset` pair naming a word the
/// loader adds the start segment to. The same linear address has many
/// encodings; [`MzRelocation::from_linear`] picks the canonical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MzRelocation {
    pub segment: u16,
    pub offset: u16,
}

impl MzRelocation {
    pub fn from_linear(address: u32) -> Self {
        MzRelocation {
            segment: (address >> 4) as u16,
            offset: (address & 0xF) as u16,
        }
    }

    pub fn linear(&self) -> u32 {
        (u32::from(self.segment) << 4) + u32::from(self.offset)
    }
}

fn mz_section_flags(name: &str) -> u32 {
    match name {
        ".stack" => flags::STACK,
        ".heap" => flags::HEAP,
        _ => 0,
    }
}

/// MZ .EXE output.
#[derive(Debug, Default)]
pub struct MzFormat {
    manager: LinkerManager,
    header: MzHeader,
    relocations: Vec<MzRelocation>,
    image: Vec<u8>,
    /// Zero-filled memory past the stored image, in bytes
    zero_fill: u32,
    option_header_align: u32,
    option_file_align: u32,
}

impl MzFormat {
    pub fn new() -> Self {
        MzFormat {
            header: MzHeader {
                signature: MAGIC_MZ,
                relocation_offset: HEADER_SIZE as u16,
                max_extra_paras: 0xFFFF,
                ..MzHeader::default()
            },
            option_header_align: PARAGRAPH,
            option_file_align: 1,
            ..MzFormat::default()
        }
    }

    fn build_image(module: &Module, layout: &Layout) -> Vec<u8> {
        let base = layout.image_base();
        let end = layout.data_end();
        let mut image = vec![0u8; (end - base) as usize];
        for (_, section) in module.sections() {
            if section.is_zero_filled() {
                continue;
            }
            let Some(address) = section.base_address() else {
                continue;
            };
            let data = section.stored_data();
            if data.is_empty() {
                continue;
            }
            let start = (address - base) as usize;
            image[start..start + data.len()].copy_from_slice(data);
        }
        image
    }

    /// Picks `ss:sp` off the stack section, or synthesizes a stack after
    /// the image when no module declared one.
    fn assign_stack(&mut self, module: &Module, layout: &Layout, diag: &mut Diagnostics) {
        if let Some(index) = stack_section(module, layout) {
            let segment = layout.segment_of(index).expect("stack section laid out");
            let section = module.section(index);
            let top = section.base_address().unwrap_or(segment.base) + section.size();
            self.header.ss = (segment.base >> 4) as u16;
            self.header.sp = (top - segment.base) as u16;
        } else {
            diag.warning(
                DiagnosticKind::Other,
                "no stack section, placing the stack after the image".to_string(),
            );
            let stack_base = align_to(layout.image_end(), u64::from(PARAGRAPH));
            self.header.ss = (stack_base >> 4) as u16;
            self.header.sp = DEFAULT_STACK_SIZE as u16;
            self.zero_fill += DEFAULT_STACK_SIZE;
        }
    }

    /// Entry point: `.entry` (from `-d`), then `_start`, then `start`,
    /// falling back on the image start.
    fn assign_entry(&mut self, module: &Module, layout: &Layout, diag: &mut Diagnostics) {
        let entry = [".entry", "_start", "start"]
            .iter()
            .find_map(|name| module.find_global_symbol(name));
        let (address, section) = match entry {
            Some(location) => (
                module.location_address(location).unwrap_or(0),
                location.section,
            ),
            None => {
                diag.warning(
                    DiagnosticKind::Other,
                    "no entry symbol, execution starts at the image base".to_string(),
                );
                (layout.image_base(), None)
            }
        };
        let frame = section
            .and_then(|index| layout.segment_base(index))
            .unwrap_or(layout.image_base());
        self.header.cs = (frame >> 4) as u16;
        self.header.ip = (address - frame) as u16;
    }
}

impl OutputFormat for MzFormat {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_segmentation: true,
            is_16bit: true,
            additional_section_flags: mz_section_flags,
            ..Capabilities::none()
        }
    }

    fn set_model(&mut self, name: &str) -> Result<()> {
        self.manager.set_model(name)
    }

    fn set_link_script(&mut self, script: Option<String>, params: &BTreeMap<String, String>) {
        self.manager.set_link_script(script, params);
    }

    fn set_options(&mut self, options: &BTreeMap<String, String>) -> Result<()> {
        for (name, value) in options {
            match name.as_str() {
                "header_align" | "file_align" => {
                    let parsed: u32 = value.parse().map_err(|_| {
                        Error::Malformed(format!("option {name} needs a numeric value, got {value}"))
                    })?;
                    if !parsed.is_power_of_two() {
                        return Err(Error::Malformed(format!(
                            "option {name} must be a power of two, got {value}"
                        )));
                    }
                    if name == "header_align" {
                        self.option_header_align = parsed.max(PARAGRAPH);
                    } else {
                        self.option_file_align = parsed;
                    }
                }
                _ => log::warn!("MZ output has no option {name}, ignored"),
            }
        }
        Ok(())
    }

    fn process_module(&mut self, module: &mut Module, diag: &mut Diagnostics) -> Result<()> {
        let result = self
            .manager
            .link(module, MemoryModel::Small, &[("base_address", 0)], diag)?;

        self.image = Self::build_image(module, &result.layout);
        self.zero_fill = (result.layout.image_end() - result.layout.data_end()) as u32;

        // paragraph values change with the load address; the loader fixes
        // them through the header table. Segment differences do not.
        let base = result.layout.image_base();
        self.relocations = result
            .fixups
            .iter()
            .filter(|fixup| fixup.kind == RelocationKind::Paragraph)
            .map(|fixup| MzRelocation::from_linear((fixup.address - base) as u32))
            .collect();
        self.relocations.sort();
        self.relocations.dedup();

        self.assign_stack(module, &result.layout, diag);
        self.assign_entry(module, &result.layout, diag);
        Ok(())
    }

    fn calculate_values(&mut self) -> Result<()> {
        self.header.relocation_count = self.relocations.len() as u16;
        self.header.relocation_offset = HEADER_SIZE as u16;

        let header_size = align_to(
            (HEADER_SIZE + self.relocations.len() * 4) as u64,
            u64::from(self.option_header_align),
        ) as u32;
        self.header.header_size_paras = (header_size / PARAGRAPH) as u16;

        let file_size = align_to(
            u64::from(header_size) + self.image.len() as u64,
            u64::from(self.option_file_align),
        ) as u32;
        self.header.last_block_size = (file_size % BLOCK_SIZE) as u16;
        self.header.file_size_blocks = (file_size.div_ceil(BLOCK_SIZE)) as u16;
        self.header.min_extra_paras = (self.zero_fill.div_ceil(PARAGRAPH)) as u16;
        Ok(())
    }

    fn write_file(&self, wr: &mut Writer<'_>) -> Result<()> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.pwrite_with(self.header, 0, scroll::LE)?;
        wr.write_bytes(&header_bytes)?;
        for relocation in &self.relocations {
            wr.write_word_endian(2, u64::from(relocation.offset), Endian::Little)?;
            wr.write_word_endian(2, u64::from(relocation.segment), Endian::Little)?;
        }
        wr.fill_to(u64::from(self.header.header_size_paras) * u64::from(PARAGRAPH))?;
        wr.write_bytes(&self.image)?;
        let total = u64::from(self.header.header_size_paras) * u64::from(PARAGRAPH)
            + self.image.len() as u64;
        wr.fill_to(align_to(total, u64::from(self.option_file_align)))?;
        Ok(())
    }

    fn default_extension(&self) -> &'static str {
        ".exe"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Cpu;
    use crate::relocation::Relocation;
    use crate::section::Section;
    use crate::symbol::SymbolName;
    use crate::target::{Location, Target};
    use std::io::Cursor;

    fn two_segment_module(format: &MzFormat, diag: &mut Diagnostics) -> Module {
        let mut module = Module::new("prog.o");
        module.cpu = Cpu::I86;
        module.endian = Some(Endian::Little);
        module.setup_options('$', format.capabilities(), Capabilities::none());

        let mut text = Section::new(".text", flags::READABLE | flags::EXECUTABLE);
        // mov si, imm16 with the paragraph patched in
        text.append(&[0xBE, 0x00, 0x00, 0xC3]).unwrap();
        let text = module.add_section(text, diag);
        let mut data = Section::new(".data", flags::READABLE | flags::WRITABLE);
        data.append(&[0x2A; 4]).unwrap();
        let data = module.add_section(data, diag);
        module.add_global_symbol("payload", Location::section(data, 0), diag);
        module.add_global_symbol("_start", Location::section(text, 0), diag);
        module.add_relocation(
            Relocation::paragraph(
                Location::section(text, 1),
                Target::symbol(SymbolName::new("payload")).segment(),
                0,
            ),
            diag,
        );
        module
    }

    fn written_bytes(format: &MzFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        {
            let mut wr = Writer::new(Endian::Little, Box::new(&mut out));
            format.write_file(&mut wr).unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn emits_header_fixups_and_image() {
        let mut diag = Diagnostics::new();
        let mut format = MzFormat::new();
        let mut module = two_segment_module(&format, &mut diag);

        format.process_module(&mut module, &mut diag).unwrap();
        format.calculate_values().unwrap();
        let bytes = written_bytes(&format);

        assert_eq!(&bytes[0..2], b"MZ");
        // one paragraph fixup, at linear address 1
        assert_eq!(format.relocations, vec![MzRelocation::from_linear(1)]);
        assert_eq!(format.header.relocation_count, 1);

        // small model: .text at 0, .data on the next paragraph
        let header_bytes = u64::from(format.header.header_size_paras) * 16;
        let image = &bytes[header_bytes as usize..];
        // the patched word holds .data's paragraph
        assert_eq!(image[0], 0xBE);
        assert_eq!(u16::from_le_bytes([image[1], image[2]]), 0x0001);
        assert_eq!(&image[0x10..0x14], &[0x2A; 4]);

        // cs:ip at _start
        assert_eq!(format.header.cs, 0);
        assert_eq!(format.header.ip, 0);
        assert!(!diag.failed());
    }

    #[test]
    fn file_size_fields_cover_the_last_block() {
        let mut diag = Diagnostics::new();
        let mut format = MzFormat::new();
        let mut module = two_segment_module(&format, &mut diag);
        format.process_module(&mut module, &mut diag).unwrap();
        format.calculate_values().unwrap();

        let bytes = written_bytes(&format);
        let file_size = bytes.len() as u32;
        assert_eq!(
            u32::from(format.header.file_size_blocks),
            file_size.div_ceil(512)
        );
        assert_eq!(u32::from(format.header.last_block_size), file_size % 512);
    }

    #[test]
    fn synthesized_stack_lands_after_the_image() {
        let mut diag = Diagnostics::new();
        let mut format = MzFormat::new();
        let mut module = two_segment_module(&format, &mut diag);
        format.process_module(&mut module, &mut diag).unwrap();

        // no .stack section in the module: warned, synthesized
        assert!(diag.count_of(DiagnosticKind::Other) >= 1);
        assert_eq!(format.header.sp, DEFAULT_STACK_SIZE as u16);
        assert!(format.header.min_extra_paras == 0); // set by calculate_values
        format.calculate_values().unwrap();
        assert!(format.header.min_extra_paras >= (DEFAULT_STACK_SIZE / 16) as u16);
    }

    #[test]
    fn declared_stack_section_sets_ss_sp() {
        let mut diag = Diagnostics::new();
        let mut format = MzFormat::new();
        let mut module = two_segment_module(&format, &mut diag);
        let mut stack = Section::new(".stack", flags::READABLE | flags::WRITABLE | flags::ZERO_FILLED);
        stack.expand(0x200);
        module.add_section(stack, &mut diag);

        format.process_module(&mut module, &mut diag).unwrap();
        // .stack got the STACK flag from the format's section-name rules
        let stack = module.find_section(".stack").unwrap();
        assert!(module.section(stack).flags() & flags::STACK != 0);
        let base = module.section(stack).base_address().unwrap();
        let expected_sp = base + 0x200 - (u64::from(format.header.ss) << 4);
        assert_eq!(u64::from(format.header.sp), expected_sp);
    }
}
