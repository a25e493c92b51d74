//! Flat binary writer.
//!
//! The simplest output there is: the laid-out image bytes and nothing
//! else. Covers MS-DOS `.com` programs (tiny model, loaded at `0x100`
//! after the PSP) and headerless ROM-style images. Also the fallback when
//! no `-F` format was selected.

use std::collections::BTreeMap;

use crate::diag::Diagnostics;
use crate::error::Result;
use crate::formats::{Capabilities, OutputFormat};
use crate::io::Writer;
use crate::manager::LinkerManager;
use crate::module::Module;
use crate::script::MemoryModel;

/// A headerless memory image.
#[derive(Debug, Default)]
pub struct BinaryFormat {
    manager: LinkerManager,
    /// `.com` flavor: 16-bit, origin 0x100
    com: bool,
    image: Vec<u8>,
}

impl BinaryFormat {
    pub fn new(com: bool) -> Self {
        BinaryFormat {
            com,
            ..BinaryFormat::default()
        }
    }

    /// Copies every stored section byte into a contiguous image starting
    /// at the lowest segment base.
    fn build_image(module: &Module, layout: &crate::layout::Layout) -> Vec<u8> {
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
}

impl OutputFormat for BinaryFormat {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            is_linear: true,
            is_16bit: self.com,
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
        for name in options.keys() {
            log::warn!("flat binary output has no option {name}, ignored");
        }
        Ok(())
    }

    fn process_module(&mut self, module: &mut Module, diag: &mut Diagnostics) -> Result<()> {
        let preferred = if self.com {
            MemoryModel::Tiny
        } else {
            MemoryModel::Flat
        };
        let origin = if self.com { 0x100 } else { 0 };
        let result = self
            .manager
            .link(module, preferred, &[("base_address", origin)], diag)?;
        self.image = Self::build_image(module, &result.layout);
        Ok(())
    }

    fn calculate_values(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_file(&self, wr: &mut Writer<'_>) -> Result<()> {
        wr.write_bytes(&self.image)
    }

    fn default_extension(&self) -> &'static str {
        if self.com { ".com" } else { ".bin" }
    }
}
