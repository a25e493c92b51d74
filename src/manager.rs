//! Shared script and model plumbing for output formats.
//!
//! Every writer needs the same back half: pick a script (user-supplied or
//! model preset), collect parameters, size the GOT, lay sections out and
//! resolve relocations. [`LinkerManager`] bundles that so a format only
//! keeps its header logic.

use std::collections::BTreeMap;

use crate::diag::Diagnostics;
use crate::error::Result;
use crate::layout::{Layout, LayoutEngine};
use crate::module::Module;
use crate::resolve::{self, AppliedFixup, GotPlan, ResolutionEngine};
use crate::script::{self, MemoryModel};

/// The outcome of layout plus resolution, everything a writer needs to
/// emit its image and header.
#[derive(Debug)]
pub struct LinkResult {
    pub layout: Layout,
    pub fixups: Vec<AppliedFixup>,
    pub got: Option<GotPlan>,
}

/// Script/model state every output format embeds.
#[derive(Debug, Default)]
pub struct LinkerManager {
    pub model: MemoryModel,
    script_text: Option<String>,
    raw_params: BTreeMap<String, String>,
}

impl LinkerManager {
    pub fn new() -> Self {
        LinkerManager::default()
    }

    pub fn set_model(&mut self, name: &str) -> Result<()> {
        self.model = MemoryModel::from_name(name)?;
        Ok(())
    }

    /// A user script replaces the model preset entirely.
    pub fn set_link_script(&mut self, script: Option<String>, params: &BTreeMap<String, String>) {
        self.script_text = script;
        self.raw_params = params.clone();
    }

    /// Lays the module out and resolves every relocation.
    ///
    /// `preferred` resolves a defaulted `-M`; `default_params` seeds the
    /// script parameters the writer understands (overridden by `-P`).
    pub fn link(
        &self,
        module: &mut Module,
        preferred: MemoryModel,
        default_params: &[(&str, u64)],
        diag: &mut Diagnostics,
    ) -> Result<LinkResult> {
        let parsed = match &self.script_text {
            Some(text) => script::parse(text)?,
            None => script::parse(self.model.or(preferred).script_text())?,
        };

        let mut params: BTreeMap<String, u64> = default_params
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        params.extend(script::numeric_params(&self.raw_params)?);

        let got = resolve::generate_got(module, diag);
        let layout = LayoutEngine::new(module).run(&parsed, &params, diag)?;
        let fixups = ResolutionEngine::new(module, &layout, got.as_ref()).run(diag)?;
        Ok(LinkResult {
            layout,
            fixups,
            got,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endian::Endian;
    use crate::module::Cpu;
    use crate::section::{Section, flags};

    #[test]
    fn parameters_override_defaults() {
        let mut diag = Diagnostics::new();
        let mut module = Module::new("a.o");
        module.cpu = Cpu::I86;
        module.endian = Some(Endian::Little);
        let mut text = Section::new(".text", flags::READABLE | flags::EXECUTABLE);
        text.append(&[0x90]).unwrap();
        let text = module.add_section(text, &mut diag);

        let mut manager = LinkerManager::new();
        let mut raw = BTreeMap::new();
        raw.insert("base_address".to_string(), "0x200".to_string());
        manager.set_link_script(None, &raw);
        manager.set_model("tiny").unwrap();

        let result = manager
            .link(&mut module, MemoryModel::Tiny, &[("base_address", 0x100)], &mut diag)
            .unwrap();
        assert_eq!(result.layout.segments[0].base, 0x200);
        assert_eq!(module.section(text).base_address(), Some(0x200));
    }
}
