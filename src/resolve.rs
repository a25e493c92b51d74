//! Relocation resolution: evaluating targets and patching section data.
//!
//! Runs after layout, when every section has a base address. Each
//! relocation's target is chased down to a concrete address, the value is
//! computed according to the relocation kind, and the result is written
//! back through the relocation's endianness, mask and shift. Nothing is
//! dropped silently: what cannot be resolved or expressed in the output
//! format leaves a diagnostic behind.
//!
//! Global Offset Table handling is split around the layout pass: the GOT
//! section must be sized before addresses are assigned, but its slots can
//! only be filled once they are.

use crate::collector::GlobalOffsetTable;
use crate::diag::{DiagnosticKind, Diagnostics};
use crate::endian::Endian;
use crate::error::{Error, Result};
use crate::formats::Capabilities;
use crate::layout::Layout;
use crate::module::Module;
use crate::relocation::{Relocation, RelocationKind};
use crate::section::flags;
use crate::symbol::SymbolName;
use crate::target::{Location, SectionIndex, Target, TargetBase};

/// The GOT section created before layout, carried into resolution.
#[derive(Debug)]
pub struct GotPlan {
    pub section: SectionIndex,
    pub table: GlobalOffsetTable,
    pub slot_size: usize,
}

impl GotPlan {
    fn slot_location(&self, name: &str) -> Option<Location> {
        let slot = self.table.slot_of(name)?;
        Some(Location::section(
            self.section,
            (slot * self.slot_size) as u64,
        ))
    }
}

/// Collects every GOT entry used by any relocation and sizes the `.got`
/// section, one native word per distinct name. Must run before layout.
pub fn generate_got(module: &mut Module, diag: &mut Diagnostics) -> Option<GotPlan> {
    let mut table = GlobalOffsetTable::new();
    for relocation in &module.relocations {
        if let TargetBase::GotSlot(name) = &relocation.target.base {
            table.add_entry(name);
        }
        if let Some(reference) = &relocation.reference {
            if let TargetBase::GotSlot(name) = &reference.base {
                table.add_entry(name);
            }
        }
    }
    if table.is_empty() {
        return None;
    }

    let slot_size = module.cpu.word_size();
    let section = module.fetch_section(".got", flags::READABLE | flags::WRITABLE);
    {
        let got = module.section_mut(section);
        got.align = slot_size as u64;
        got.expand((table.len() * slot_size) as u64);
    }
    // GOT-relative code addresses the table through this symbol
    if module.find_global_symbol("_GLOBAL_OFFSET_TABLE_").is_none() {
        module.add_global_symbol("_GLOBAL_OFFSET_TABLE_", Location::section(section, 0), diag);
    }
    Some(GotPlan {
        section,
        table,
        slot_size,
    })
}

/// A relocation that was patched, reported back so writers can emit
/// load-time fixup tables (MZ needs the paragraph sites).
#[derive(Debug, Clone, Copy)]
pub struct AppliedFixup {
    pub kind: RelocationKind,
    /// Absolute address of the patched field
    pub address: u64,
    pub size: usize,
}

/// Evaluates every relocation of a laid-out module and patches section
/// data in place.
pub struct ResolutionEngine<'a> {
    module: &'a mut Module,
    layout: &'a Layout,
    caps: Capabilities,
    got: Option<&'a GotPlan>,
}

impl<'a> ResolutionEngine<'a> {
    pub fn new(module: &'a mut Module, layout: &'a Layout, got: Option<&'a GotPlan>) -> Self {
        let caps = module.output_capabilities();
        ResolutionEngine {
            module,
            layout,
            caps,
            got,
        }
    }

    /// Fills GOT slots, then evaluates and patches every relocation.
    pub fn run(mut self, diag: &mut Diagnostics) -> Result<Vec<AppliedFixup>> {
        self.populate_got(diag)?;

        let mut applied = Vec::new();
        let relocations = std::mem::take(&mut self.module.relocations);
        for relocation in &relocations {
            if let Some(fixup) = self.resolve_one(relocation, diag)? {
                applied.push(fixup);
            }
        }
        self.module.relocations = relocations;
        Ok(applied)
    }

    fn populate_got(&mut self, diag: &mut Diagnostics) -> Result<()> {
        let Some(plan) = self.got else {
            return Ok(());
        };
        let endian = self.module.endian.unwrap_or(Endian::Little);
        let names: Vec<String> = plan.table.iter().map(str::to_string).collect();
        for (slot, name) in names.iter().enumerate() {
            let address = match self.module.find_global_symbol(name) {
                Some(location) => self.address_of(location)?,
                None => {
                    diag.error(
                        DiagnosticKind::UndefinedSymbol,
                        format!("undefined symbol {name} referenced through the GOT"),
                    );
                    0
                }
            };
            self.module.section_mut(plan.section).write_word(
                plan.slot_size,
                (slot * plan.slot_size) as u64,
                address,
                endian,
            )?;
        }
        Ok(())
    }

    fn address_of(&self, location: Location) -> Result<u64> {
        self.module.location_address(location).ok_or_else(|| {
            Error::Malformed(format!(
                "location in section {:?} used before layout",
                location.section
            ))
        })
    }

    /// Chases a target down to `(address, owning section)`. `Ok(None)`
    /// means an undefined symbol, already diagnosed by the caller.
    fn resolve_target(&self, target: &Target) -> Result<Option<(u64, Option<SectionIndex>)>> {
        let location = match &target.base {
            TargetBase::Location(location) => *location,
            TargetBase::Symbol(name) => match name {
                SymbolName::Name(plain) => match self.module.find_global_symbol(plain) {
                    Some(location) => location,
                    None => return Ok(None),
                },
                // runtime imports have no link-time address; output formats
                // with import tables patch these fields themselves
                _ => return Ok(None),
            },
            TargetBase::GotSlot(name) => {
                let Some(plan) = self.got else {
                    return Ok(None);
                };
                match plan.slot_location(name) {
                    Some(location) => location,
                    None => return Ok(None),
                }
            }
        };
        Ok(Some((self.address_of(location)?, location.section)))
    }

    /// The frame base an address belongs to: its segment's base address,
    /// or frame zero for absolute locations.
    fn frame_base(&self, section: Option<SectionIndex>) -> u64 {
        section
            .and_then(|index| self.layout.segment_base(index))
            .unwrap_or(0)
    }

    /// The value a resolved target stands for: the address itself, or the
    /// containing frame's base under a segment-of wrapper.
    fn effective_value(&self, target: &Target, address: u64, section: Option<SectionIndex>) -> u64 {
        if target.segment_of {
            self.frame_base(section)
        } else {
            address
        }
    }

    fn kind_supported(&self, kind: RelocationKind) -> bool {
        match kind {
            RelocationKind::Absolute
            | RelocationKind::Relative
            | RelocationKind::OffsetFrom
            | RelocationKind::GotAbsolute
            | RelocationKind::GotRelative => true,
            RelocationKind::Offset | RelocationKind::SegmentDifference => {
                self.caps.supports_segmentation && !self.caps.is_linear
            }
            RelocationKind::Paragraph => {
                self.caps.supports_segmentation
                    && self.caps.is_16bit
                    && !self.caps.is_linear
                    && !self.caps.is_protected_mode
            }
            RelocationKind::Selector => {
                self.caps.supports_segmentation
                    && self.caps.is_protected_mode
                    && !self.caps.is_linear
            }
        }
    }

    fn resolve_one(
        &mut self,
        relocation: &Relocation,
        diag: &mut Diagnostics,
    ) -> Result<Option<AppliedFixup>> {
        if !self.kind_supported(relocation.kind) {
            diag.error(
                DiagnosticKind::UnsupportedRelocationKind,
                format!(
                    "relocation kind {:?} cannot be expressed in the output format",
                    relocation.kind
                ),
            );
            return Ok(None);
        }

        let source_section = relocation.source.section.ok_or_else(|| {
            Error::Malformed("relocation source is not inside a section".to_string())
        })?;
        let source_address = self.address_of(relocation.source)?;

        let mut addend = relocation.addend;
        if relocation.addend_from_section_data {
            addend += relocation.extract_addend(self.module.section(source_section))?;
        }

        let target = match self.resolve_target(&relocation.target)? {
            Some(resolved) => resolved,
            None => {
                diag.error(
                    DiagnosticKind::UndefinedSymbol,
                    format!("undefined symbol {}", DisplayTarget(&relocation.target)),
                );
                // keep the output deterministic
                self.patch(relocation, source_section, 0, diag)?;
                return Ok(None);
            }
        };
        let reference = match &relocation.reference {
            None => None,
            Some(reference) => match self.resolve_target(reference)? {
                Some(resolved) => Some(resolved),
                None => {
                    diag.error(
                        DiagnosticKind::UndefinedSymbol,
                        format!("undefined symbol {}", DisplayTarget(reference)),
                    );
                    self.patch(relocation, source_section, 0, diag)?;
                    return Ok(None);
                }
            },
        };

        let (target_address, target_section) = target;
        let target_value =
            self.effective_value(&relocation.target, target_address, target_section);

        let value = match relocation.kind {
            RelocationKind::Absolute | RelocationKind::GotAbsolute => {
                target_value as i64 + addend
            }
            RelocationKind::Relative | RelocationKind::GotRelative => {
                target_value as i64 - source_address as i64 + addend
            }
            RelocationKind::Offset => {
                let frame = self.frame_base(target_section);
                target_address as i64 - frame as i64 + addend
            }
            RelocationKind::Paragraph => (target_value >> 4) as i64 + addend,
            RelocationKind::Selector => {
                let selector = target_section
                    .and_then(|index| self.layout.selector_of(index))
                    .unwrap_or(0);
                i64::from(selector) + addend
            }
            RelocationKind::OffsetFrom => {
                let (reference_address, reference_section) =
                    reference.expect("offset-from carries a reference");
                let reference_value = self.effective_value(
                    relocation.reference.as_ref().expect("checked above"),
                    reference_address,
                    reference_section,
                );
                target_value as i64 - reference_value as i64 + addend
            }
            RelocationKind::SegmentDifference => {
                let (reference_address, reference_section) =
                    reference.expect("segment difference carries a reference");
                let reference_value = self.effective_value(
                    relocation.reference.as_ref().expect("checked above"),
                    reference_address,
                    reference_section,
                );
                (target_value >> 4) as i64 - (reference_value >> 4) as i64 + addend
            }
        };

        self.patch(relocation, source_section, value, diag)?;
        Ok(Some(AppliedFixup {
            kind: relocation.kind,
            address: source_address,
            size: relocation.size,
        }))
    }

    fn patch(
        &mut self,
        relocation: &Relocation,
        source_section: SectionIndex,
        value: i64,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let section = self.module.section_mut(source_section);
        let fits = relocation.write_value(section, value)?;
        if !fits {
            diag.warning(
                DiagnosticKind::RelocationOverflow,
                format!(
                    "relocation value {value:#x} at {:#x} overflows its {}-byte field, truncated",
                    relocation.source.offset, relocation.size
                ),
            );
        }
        Ok(())
    }
}

struct DisplayTarget<'a>(&'a Target);

impl core::fmt::Display for DisplayTarget<'_> {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        match &self.0.base {
            TargetBase::Symbol(name) => write!(fmt, "{name}"),
            TargetBase::GotSlot(name) => write!(fmt, "GOT[{name}]"),
            TargetBase::Location(location) => write!(fmt, "{location:?}"),
        }
    }
}
