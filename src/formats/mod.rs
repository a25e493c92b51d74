//! Format readers and writers.
//!
//! Formats are external collaborators of the linking core: a reader turns
//! file bytes into a [`Module`], a writer turns a laid-out module into
//! output bytes. Both sides advertise [`Capabilities`], which the module
//! uses to decide whether extended `$$…$` name prefixes are interpreted
//! and the resolution engine uses to police relocation kinds.

pub mod binary;
pub mod elf;
pub mod mz;

use std::collections::BTreeMap;
use std::fs::File;

use crate::diag::Diagnostics;
use crate::error::{Error, Result};
use crate::io::{Reader, Writer};
use crate::module::Module;

fn no_extra_flags(_name: &str) -> u32 {
    0
}

/// What a format can express. Input formats use the `supports_*` bits to
/// say what they provide natively; output formats additionally describe
/// their address space.
#[derive(Clone, Copy)]
pub struct Capabilities {
    /// Multiple segments (paragraph or selector frames)
    pub supports_segmentation: bool,
    pub is_16bit: bool,
    pub is_protected_mode: bool,
    /// Linear address space: symbol values are absolute addresses rather
    /// than offsets within their own segments
    pub is_linear: bool,
    pub supports_resources: bool,
    /// Imports and exports at the file-format level
    pub supports_libraries: bool,
    /// The input was produced by an assembler that drops bytes; honor
    /// `$$FIX$` symbols
    pub requires_data_stream_fix: bool,
    /// Extra section flags the output format imposes by section name
    pub additional_section_flags: fn(&str) -> u32,
}

impl Capabilities {
    /// No capabilities at all; the default for stub and trivial formats.
    pub fn none() -> Self {
        Capabilities {
            supports_segmentation: false,
            is_16bit: false,
            is_protected_mode: false,
            is_linear: false,
            supports_resources: false,
            supports_libraries: false,
            requires_data_stream_fix: false,
            additional_section_flags: no_extra_flags,
        }
    }
}

impl core::fmt::Debug for Capabilities {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        fmt.debug_struct("Capabilities")
            .field("supports_segmentation", &self.supports_segmentation)
            .field("is_16bit", &self.is_16bit)
            .field("is_protected_mode", &self.is_protected_mode)
            .field("is_linear", &self.is_linear)
            .field("supports_resources", &self.supports_resources)
            .field("supports_libraries", &self.supports_libraries)
            .field("requires_data_stream_fix", &self.requires_data_stream_fix)
            .finish()
    }
}

/// A reader for one object-file format.
pub trait InputFormat {
    /// Loads the file into format-internal state.
    fn read_file(&mut self, rd: &mut Reader<'_>) -> Result<()>;

    /// Populates a module from the state loaded by
    /// [`InputFormat::read_file`].
    fn generate_module(&self, module: &mut Module, diag: &mut Diagnostics) -> Result<()>;

    fn capabilities(&self) -> Capabilities;
}

/// A writer for one executable format.
pub trait OutputFormat {
    fn capabilities(&self) -> Capabilities;

    /// Selects a named memory model; the empty string keeps the format's
    /// default.
    fn set_model(&mut self, name: &str) -> Result<()>;

    /// Overrides the built-in model script and supplies `-P` parameters.
    fn set_link_script(&mut self, script: Option<String>, params: &BTreeMap<String, String>);

    /// Passes `-S` command-line settings over to the format.
    fn set_options(&mut self, options: &BTreeMap<String, String>) -> Result<()>;

    /// Runs layout and resolution over the merged module and captures
    /// everything the header needs.
    fn process_module(&mut self, module: &mut Module, diag: &mut Diagnostics) -> Result<()>;

    /// Settles header fields that depend on each other after the module
    /// has been processed.
    fn calculate_values(&mut self) -> Result<()>;

    /// Emits the output file image.
    fn write_file(&self, wr: &mut Writer<'_>) -> Result<()>;

    /// Appended to output names derived from the input file name.
    fn default_extension(&self) -> &'static str {
        ""
    }

    /// The whole back half of the pipeline in one call.
    fn generate_file(
        &mut self,
        path: &str,
        module: &mut Module,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        self.process_module(module, diag)?;
        self.calculate_values()?;
        let file = File::create(path)?;
        let mut wr = Writer::new(crate::endian::Endian::Little, Box::new(file));
        self.write_file(&mut wr)
    }
}

/// Looks an output format up by its `-F` name.
pub fn output_format(name: &str) -> Result<Box<dyn OutputFormat>> {
    match name {
        "binary" | "com" => Ok(Box::new(binary::BinaryFormat::new(name == "com"))),
        "mz" | "exe" | "dos" => Ok(Box::new(mz::MzFormat::new())),
        _ => Err(Error::UnknownFormat(name.to_string())),
    }
}

/// Sniffs the reader's magic and hands back the matching input format.
/// The cursor is rewound to the start of the file.
pub fn detect_input(rd: &mut Reader<'_>) -> Result<Box<dyn InputFormat>> {
    rd.seek(0)?;
    let magic = rd.read_up_to(4)?;
    rd.seek(0)?;
    if magic.len() >= 4 && magic == elf::MAGIC {
        return Ok(Box::new(elf::ElfFormat::new()));
    }
    let mut value = 0u64;
    for byte in &magic {
        value = value << 8 | u64::from(*byte);
    }
    Err(Error::BadMagic(value))
}
