//! Script-driven assignment of sections into segments.
//!
//! The layout pass walks the segment declarations of a
//! [`crate::script::Script`], picks sections off the module in selection
//! order and assigns every one a base address. Afterwards each section
//! belongs to exactly one [`Segment`]; the segment's base is what paragraph
//! and selector relocations measure against.

use std::collections::BTreeMap;

use crate::diag::{DiagnosticKind, Diagnostics};
use crate::endian::align_to;
use crate::error::Result;
use crate::module::Module;
use crate::script::{Script, SegmentSpec, Select};
use crate::section::flags;
use crate::target::SectionIndex;

/// An output-format-level container one or more sections were laid into.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub base: u64,
    /// Protected-mode selector index, assigned in declaration order
    pub selector: u16,
    pub align: u64,
    pub sections: Vec<SectionIndex>,
    /// Total extent including trailing zero fill
    pub size: u64,
    /// Extent of the stored-data part, relative to `base`
    pub data_size: u64,
}

/// The result of the layout pass.
#[derive(Debug, Default)]
pub struct Layout {
    pub segments: Vec<Segment>,
    section_segments: BTreeMap<SectionIndex, usize>,
}

impl Layout {
    pub fn segment_of(&self, section: SectionIndex) -> Option<&Segment> {
        self.section_segments
            .get(&section)
            .map(|&index| &self.segments[index])
    }

    pub fn segment_base(&self, section: SectionIndex) -> Option<u64> {
        self.segment_of(section).map(|segment| segment.base)
    }

    pub fn selector_of(&self, section: SectionIndex) -> Option<u16> {
        self.segment_of(section).map(|segment| segment.selector)
    }

    /// Base address of the whole image: the lowest segment base.
    pub fn image_base(&self) -> u64 {
        self.segments
            .iter()
            .map(|segment| segment.base)
            .min()
            .unwrap_or(0)
    }

    /// One past the last stored-data byte, as an absolute address.
    pub fn data_end(&self) -> u64 {
        self.segments
            .iter()
            .map(|segment| segment.base + segment.data_size)
            .max()
            .unwrap_or(0)
    }

    /// One past the last byte of the image, zero fill included.
    pub fn image_end(&self) -> u64 {
        self.segments
            .iter()
            .map(|segment| segment.base + segment.size)
            .max()
            .unwrap_or(0)
    }
}

/// Runs a parsed script over a module.
pub struct LayoutEngine<'a> {
    module: &'a mut Module,
    layout: Layout,
    current: u64,
}

impl<'a> LayoutEngine<'a> {
    pub fn new(module: &'a mut Module) -> Self {
        LayoutEngine {
            module,
            layout: Layout::default(),
            current: 0,
        }
    }

    /// Assigns every section a base address and a segment. Sections no
    /// declaration selected end up in trailing one-section segments, with
    /// a warning.
    pub fn run(
        mut self,
        script: &Script,
        params: &BTreeMap<String, u64>,
        diag: &mut Diagnostics,
    ) -> Result<Layout> {
        for spec in &script.segments {
            if spec.name == "*" {
                self.run_expanded(spec, params)?;
            } else {
                self.run_segment(spec, params)?;
            }
        }

        let leftover: Vec<SectionIndex> = self
            .module
            .sections()
            .map(|(index, _)| index)
            .filter(|index| !self.layout.section_segments.contains_key(index))
            .collect();
        for index in leftover {
            let name = self.module.section(index).name.clone();
            diag.warning(
                DiagnosticKind::Other,
                format!("section `{name}' not covered by the linker script"),
            );
            let spec = SegmentSpec {
                name,
                base: None,
                selects: Vec::new(),
                align: 1,
            };
            let base = align_to(self.current, spec.align);
            self.open_segment(&spec, base);
            self.place(index);
            self.close_segment(spec.align);
        }

        Ok(self.layout)
    }

    /// A `*` declaration: one segment per selected section.
    fn run_expanded(&mut self, spec: &SegmentSpec, params: &BTreeMap<String, u64>) -> Result<()> {
        let mut base = spec.base.as_ref().map(|expr| expr.eval(params)).transpose()?;
        let matching: Vec<SectionIndex> = self
            .module
            .sections()
            .filter(|(index, section)| {
                !self.layout.section_segments.contains_key(index)
                    && spec.selects.iter().any(|select| match select {
                        Select::Named(name) => *name == section.name,
                        Select::Flags { required, excluded } => {
                            section.flags() & required == *required
                                && section.flags() & excluded == 0
                        }
                    })
            })
            .map(|(index, _)| index)
            .collect();
        for index in matching {
            let name = self.module.section(index).name.clone();
            let start = match base.take() {
                Some(fixed) => fixed,
                None => align_to(self.current, spec.align),
            };
            let single = SegmentSpec {
                name,
                base: None,
                selects: Vec::new(),
                align: spec.align,
            };
            self.open_segment(&single, start);
            self.place(index);
            self.close_segment(spec.align);
        }
        Ok(())
    }

    fn run_segment(&mut self, spec: &SegmentSpec, params: &BTreeMap<String, u64>) -> Result<()> {
        let base = match &spec.base {
            Some(expr) => expr.eval(params)?,
            None => align_to(self.current, spec.align),
        };
        self.open_segment(spec, base);

        for select in &spec.selects {
            match select {
                Select::Named(name) => {
                    if let Some(index) = self.module.find_section(name) {
                        if !self.layout.section_segments.contains_key(&index) {
                            self.place(index);
                        }
                    }
                }
                Select::Flags { required, excluded } => {
                    let matching: Vec<SectionIndex> = self
                        .module
                        .sections()
                        .filter(|(index, section)| {
                            !self.layout.section_segments.contains_key(index)
                                && section.flags() & required == *required
                                && section.flags() & excluded == 0
                        })
                        .map(|(index, _)| index)
                        .collect();
                    for index in matching {
                        self.place(index);
                    }
                }
            }
        }

        self.close_segment(spec.align);
        Ok(())
    }

    fn open_segment(&mut self, spec: &SegmentSpec, base: u64) {
        let selector = self.layout.segments.len() as u16;
        self.layout.segments.push(Segment {
            name: spec.name.clone(),
            base,
            selector,
            align: spec.align,
            sections: Vec::new(),
            size: 0,
            data_size: 0,
        });
        self.current = base;
    }

    fn place(&mut self, index: SectionIndex) {
        let segment_index = self.layout.segments.len() - 1;
        let section = self.module.section_mut(index);
        let address = align_to(self.current, section.align);
        section.set_base_address(address);
        let size = section.size();
        let zero_filled = section.is_zero_filled();
        self.current = address + size;

        let segment = &mut self.layout.segments[segment_index];
        segment.sections.push(index);
        segment.size = self.current - segment.base;
        if !zero_filled && size > 0 {
            segment.data_size = self.current - segment.base;
        }
        self.layout.section_segments.insert(index, segment_index);
    }

    fn close_segment(&mut self, align: u64) {
        let segment = self.layout.segments.last_mut().expect("open segment");
        segment.size = align_to(segment.size, align);
        self.current = align_to(self.current, align);
    }
}

/// The usual predicate order puts data before zero fill; the stack section
/// goes last so `ss:sp` can point at its end.
pub fn stack_section(module: &Module, layout: &Layout) -> Option<SectionIndex> {
    module
        .sections()
        .find(|(index, section)| {
            section.flags() & flags::STACK != 0 && layout.segment_of(*index).is_some()
        })
        .map(|(index, _)| index)
}
