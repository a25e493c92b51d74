//! End-to-end linking scenarios: synthetic ELF objects in, executable
//! images out, driven through the public API the `link` frontend uses.

use std::collections::BTreeMap;
use std::io::Cursor;

use retrolink::collector::ModuleCollector;
use retrolink::diag::Diagnostics;
use retrolink::endian::Endian;
use retrolink::formats::{self, OutputFormat};
use retrolink::io::{Reader, Writer};
use retrolink::module::Module;
use retrolink::relocation::Relocation;
use retrolink::section::{Section, flags};
use retrolink::symbol::SymbolName;
use retrolink::target::{Location, Target};

const EM_386: u16 = 3;
const STB_GLOBAL: u8 = 1;
const R_386_32: u32 = 1;
const R_386_16: u32 = 20;

fn put16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Hand-assembles a minimal ELF32 LSB relocatable object with a single
/// `.text` section, the given symbols and RELA entries.
fn build_elf_object(
    text: &[u8],
    symbols: &[(&str, u8, u16, u32)],
    relocs: &[(u32, u32, u32, i32)],
) -> Vec<u8> {
    let mut strtab = vec![0u8];
    struct Sym {
        name: u32,
        value: u32,
        info: u8,
        shndx: u16,
    }
    let mut syms = vec![Sym {
        name: 0,
        value: 0,
        info: 0,
        shndx: 0,
    }];
    for (name, bind, shndx, value) in symbols {
        syms.push(Sym {
            name: strtab.len() as u32,
            value: *value,
            info: (*bind << 4) | 1,
            shndx: *shndx,
        });
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
    }

    let shstrtab = b"\0.text\0.symtab\0.strtab\0.rela.text\0.shstrtab\0".to_vec();

    let text_off = 52;
    let sym_off = text_off + text.len();
    let sym_size = syms.len() * 16;
    let str_off = sym_off + sym_size;
    let rela_off = str_off + strtab.len();
    let rela_size = relocs.len() * 12;
    let shstr_off = rela_off + rela_size;
    let sh_off = shstr_off + shstrtab.len();
    let mut image = vec![0u8; sh_off + 6 * 40];

    image[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    image[4] = 1; // ELFCLASS32
    image[5] = 1; // ELFDATA2LSB
    image[6] = 1;
    put16(&mut image, 16, 1); // ET_REL
    put16(&mut image, 18, EM_386);
    put32(&mut image, 20, 1); // e_version
    put32(&mut image, 32, sh_off as u32); // e_shoff
    put16(&mut image, 40, 52); // e_ehsize
    put16(&mut image, 46, 40); // e_shentsize
    put16(&mut image, 48, 6); // e_shnum
    put16(&mut image, 50, 5); // e_shstrndx

    image[text_off..text_off + text.len()].copy_from_slice(text);
    for (index, sym) in syms.iter().enumerate() {
        let at = sym_off + index * 16;
        put32(&mut image, at, sym.name);
        put32(&mut image, at + 4, sym.value);
        image[at + 12] = sym.info;
        put16(&mut image, at + 14, sym.shndx);
    }
    image[str_off..str_off + strtab.len()].copy_from_slice(&strtab);
    for (index, (offset, symbol, r_type, addend)) in relocs.iter().enumerate() {
        let at = rela_off + index * 12;
        put32(&mut image, at, *offset);
        put32(&mut image, at + 4, *symbol << 8 | *r_type);
        put32(&mut image, at + 8, *addend as u32);
    }
    image[shstr_off..shstr_off + shstrtab.len()].copy_from_slice(&shstrtab);

    // index, (name, type, flags, offset, size, link, info, entsize)
    let headers: [(u32, u32, u32, usize, usize, u32, u32, u32); 6] = [
        (0, 0, 0, 0, 0, 0, 0, 0),
        (1, 1, 0x6, text_off, text.len(), 0, 0, 0), // .text: SHF_ALLOC|SHF_EXECINSTR
        (7, 2, 0, sym_off, sym_size, 3, 1, 16),     // .symtab
        (15, 3, 0, str_off, strtab.len(), 0, 0, 0), // .strtab
        (23, 4, 0, rela_off, rela_size, 2, 1, 12),  // .rela.text
        (34, 3, 0, shstr_off, shstrtab.len(), 0, 0, 0), // .shstrtab
    ];
    for (index, (name, sh_type, sh_flags, offset, size, link, info, entsize)) in
        headers.iter().enumerate()
    {
        let at = sh_off + index * 40;
        put32(&mut image, at, *name);
        put32(&mut image, at + 4, *sh_type);
        put32(&mut image, at + 8, *sh_flags);
        put32(&mut image, at + 16, *offset as u32);
        put32(&mut image, at + 20, *size as u32);
        put32(&mut image, at + 24, *link);
        put32(&mut image, at + 28, *info);
        put32(&mut image, at + 32, 1); // sh_addralign
        put32(&mut image, at + 36, *entsize);
    }
    image
}

/// Reads one object through format detection, as the frontend does.
fn load_object(
    bytes: Vec<u8>,
    name: &str,
    output: &dyn OutputFormat,
    diag: &mut Diagnostics,
) -> Module {
    let mut rd = Reader::new(Endian::Little, Box::new(Cursor::new(bytes)));
    let mut input = formats::detect_input(&mut rd).unwrap();
    input.read_file(&mut rd).unwrap();
    let mut module = Module::new(name);
    module.setup_options('$', output.capabilities(), input.capabilities());
    input.generate_module(&mut module, diag).unwrap();
    module
}

fn write_to_bytes(format: &dyn OutputFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    {
        let mut wr = Writer::new(Endian::Little, Box::new(&mut out));
        format.write_file(&mut wr).unwrap();
    }
    out.into_inner()
}

#[test]
fn tiny_com_program_gets_absolute_addresses() {
    let object = build_elf_object(
        &[0xB8, 0x34, 0x12, 0xCD, 0x21],
        &[("answer", STB_GLOBAL, 1, 3)],
        &[(1, 1, R_386_32, 0)],
    );

    let mut diag = Diagnostics::new();
    let mut format = formats::output_format("com").unwrap();
    let module = load_object(object, "prog.o", format.as_ref(), &mut diag);

    let mut collector = ModuleCollector::new();
    collector.add_module(module, false, &mut diag);
    assert!(collector.required_symbols().is_empty());

    let mut merged = Module::new("");
    merged.setup_options('$', format.capabilities(), formats::Capabilities::none());
    collector.combine_into(&mut merged, &mut diag).unwrap();
    merged.allocate_common_symbols();

    format.process_module(&mut merged, &mut diag).unwrap();
    format.calculate_values().unwrap();

    // mov ax, imm16 now carries the absolute address 0x100 + 3
    assert_eq!(write_to_bytes(format.as_ref()), vec![0xB8, 0x03, 0x01, 0xCD, 0x21]);
    assert!(!diag.failed());
}

#[test]
fn segmented_paragraph_fixup_across_modules() {
    // module A references the paragraph of a symbol living in module B
    let mut diag = Diagnostics::new();
    let mut format = formats::output_format("mz").unwrap();

    let mut module_a = Module::new("a.o");
    module_a.cpu = retrolink::module::Cpu::I86;
    module_a.endian = Some(Endian::Little);
    module_a.setup_options('$', format.capabilities(), formats::Capabilities::none());
    let mut text = Section::new(".text", flags::READABLE | flags::EXECUTABLE);
    text.append(&[0xBE, 0x00, 0x00, 0xC3]).unwrap();
    let text = module_a.add_section(text, &mut diag);
    module_a.add_global_symbol("_start", Location::section(text, 0), &mut diag);
    module_a.add_relocation(
        Relocation::paragraph(
            Location::section(text, 1),
            Target::symbol(SymbolName::new("foo")).segment(),
            0,
        ),
        &mut diag,
    );

    let mut module_b = Module::new("b.o");
    module_b.cpu = retrolink::module::Cpu::I86;
    module_b.endian = Some(Endian::Little);
    module_b.setup_options('$', format.capabilities(), formats::Capabilities::none());
    let mut data = Section::new(".data", flags::READABLE | flags::WRITABLE);
    data.append(&[0x55; 8]).unwrap();
    let data = module_b.add_section(data, &mut diag);
    module_b.add_global_symbol("foo", Location::section(data, 0), &mut diag);

    let mut collector = ModuleCollector::new();
    collector.add_module(module_a, false, &mut diag);
    collector.add_module(module_b, false, &mut diag);
    let mut merged = Module::new("");
    merged.setup_options('$', format.capabilities(), formats::Capabilities::none());
    collector.combine_into(&mut merged, &mut diag).unwrap();
    merged.allocate_common_symbols();

    // pin the segments where the scenario wants them
    let script = "segment .code at 0x10000 {\n\
                  \tall execute;\n\
                  \talign 16;\n\
                  }\n\
                  segment .data at 0x20000 {\n\
                  \tall;\n\
                  \talign 16;\n\
                  }\n";
    format.set_link_script(Some(script.to_string()), &BTreeMap::new());
    format.process_module(&mut merged, &mut diag).unwrap();
    format.calculate_values().unwrap();

    let text = merged.find_section(".text").unwrap();
    assert_eq!(
        merged
            .section(text)
            .read_word(2, 1, Endian::Little)
            .unwrap(),
        0x2000,
        "the patched word is .data's paragraph"
    );

    let bytes = write_to_bytes(format.as_ref());
    assert_eq!(&bytes[0..2], b"MZ");
    let reloc_count = u16::from_le_bytes([bytes[6], bytes[7]]);
    assert_eq!(reloc_count, 1);
    let reloc_offset = u16::from_le_bytes([bytes[24], bytes[25]]) as usize;
    let fixup_offset = u16::from_le_bytes([bytes[reloc_offset], bytes[reloc_offset + 1]]);
    let fixup_segment = u16::from_le_bytes([bytes[reloc_offset + 2], bytes[reloc_offset + 3]]);
    // the fixup names the patched word at image-linear address 1
    assert_eq!((u32::from(fixup_segment) << 4) + u32::from(fixup_offset), 1);
    assert!(!diag.failed());
}

#[test]
fn extended_prefix_flows_from_elf_to_mz() {
    // the object cannot express segmentation, so it references
    // $$SEGOF$payload; MZ output can, so the name becomes a paragraph
    // relocation
    let object = build_elf_object(
        &[
            0xBE, 0x00, 0x00, // mov si, SEG payload
            0xC3, // ret
            0x2A, 0x2A, 0x2A, 0x2A, // payload bytes
        ],
        &[
            ("payload", STB_GLOBAL, 1, 4),
            ("_start", STB_GLOBAL, 1, 0),
            ("$$SEGOF$payload", STB_GLOBAL, 0, 0),
        ],
        &[(1, 3, R_386_16, 0)],
    );

    let mut diag = Diagnostics::new();
    let mut format = formats::output_format("mz").unwrap();
    let module = load_object(object, "prog.o", format.as_ref(), &mut diag);

    let mut collector = ModuleCollector::new();
    collector.add_module(module, false, &mut diag);
    let mut merged = Module::new("");
    merged.setup_options('$', format.capabilities(), formats::Capabilities::none());
    collector.combine_into(&mut merged, &mut diag).unwrap();
    merged.allocate_common_symbols();

    format.process_module(&mut merged, &mut diag).unwrap();
    format.calculate_values().unwrap();

    // everything lives in .text, laid at paragraph 0 of the image, so the
    // paragraph of `payload' is 0 and the loader still gets a fixup entry
    let bytes = write_to_bytes(format.as_ref());
    let reloc_count = u16::from_le_bytes([bytes[6], bytes[7]]);
    assert_eq!(reloc_count, 1);
    assert!(!diag.failed());
}

#[test]
fn undefined_symbols_fail_the_link_but_still_write() {
    let object = build_elf_object(
        &[0xB8, 0x00, 0x00, 0xCD, 0x21],
        &[("missing", STB_GLOBAL, 0, 0)],
        &[(1, 1, R_386_32, 0)],
    );

    let mut diag = Diagnostics::new();
    let mut format = formats::output_format("com").unwrap();
    let module = load_object(object, "prog.o", format.as_ref(), &mut diag);

    let mut collector = ModuleCollector::new();
    collector.add_module(module, false, &mut diag);
    assert_eq!(collector.required_symbols().len(), 1);

    let mut merged = Module::new("");
    merged.setup_options('$', format.capabilities(), formats::Capabilities::none());
    collector.combine_into(&mut merged, &mut diag).unwrap();
    merged.allocate_common_symbols();

    format.process_module(&mut merged, &mut diag).unwrap();
    format.calculate_values().unwrap();
    // the field was patched with zero and the run is marked failed
    assert_eq!(write_to_bytes(format.as_ref()), vec![0xB8, 0x00, 0x00, 0xCD, 0x21]);
    assert!(diag.failed());
}
