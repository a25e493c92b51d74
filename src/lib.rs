//! # retrolink
//!
//! A multi-format object-file linker aimed at legacy executable formats.
//! It reads relocatable objects (currently ELF), resolves symbols across
//! modules and libraries, lays sections out into segments under a linker
//! script or a named memory model, applies segmented and linear relocations,
//! and emits a target-format executable (currently MS-DOS MZ and flat
//! binaries).
//!
//! The crate is organized around a format-agnostic data model:
//!
//! * [`section::Section`]: a named, flagged byte buffer, the unit of
//!   relocation
//! * [`module::Module`]: sections, symbols and relocations read from one
//!   object file, and the unit of linking
//! * [`collector::ModuleCollector`]: gathers object and library modules,
//!   pulling library members in on demand for unresolved symbols
//! * [`layout::LayoutEngine`]: script-driven assignment of sections into
//!   segments with base addresses
//! * [`resolve::ResolutionEngine`]: evaluates every relocation to a
//!   concrete value and patches it back into section data
//!
//! Format readers and writers live under [`formats`] and communicate with
//! the core exclusively through [`module::Module`] and the capability bits
//! in [`formats::Capabilities`].
//!
//! ```no_run
//! use retrolink::collector::ModuleCollector;
//! use retrolink::diag::Diagnostics;
//! use retrolink::formats;
//! use retrolink::io::Reader;
//! use retrolink::module::Module;
//!
//! # fn main() -> retrolink::error::Result<()> {
//! let mut diag = Diagnostics::new();
//! let output = formats::output_format("mz")?;
//! let mut collector = ModuleCollector::new();
//!
//! let file = std::fs::File::open("crt0.o")?;
//! let mut rd = Reader::new(retrolink::endian::Endian::Little, Box::new(file));
//! let mut input = formats::detect_input(&mut rd)?;
//! input.read_file(&mut rd)?;
//!
//! let mut module = Module::new("crt0.o");
//! module.setup_options('$', output.capabilities(), input.capabilities());
//! input.generate_module(&mut module, &mut diag)?;
//! collector.add_module(module, false, &mut diag);
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod diag;
pub mod endian;
pub mod error;
pub mod formats;
pub mod io;
pub mod layout;
pub mod manager;
pub mod module;
pub mod relocation;
pub mod resolve;
pub mod script;
pub mod section;
pub mod symbol;
pub mod target;
