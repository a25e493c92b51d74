//! Relocations: typed patch records.
//!
//! A relocation asks for a computed value to be stored at a *source*
//! location, pointing at a *target* and optionally measured against a
//! *reference* frame. The stored field is described by a byte count, a bit
//! mask, a shift and a byte order, so sub-field patches (such as the 24-bit
//! ARM branch displacement) go through the same machinery as whole words.

use crate::endian::{self, Endian};
use crate::error::Result;
use crate::section::Section;
use crate::symbol::SymbolName;
use crate::target::{Displacement, Location, Target};

/// How the patched value is computed; see [`crate::resolve`] for the
/// evaluation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationKind {
    /// `target + addend`
    Absolute,
    /// `target - source + addend`, PC-relative
    Relative,
    /// `target - segment_base(target) + addend`, an offset within the
    /// target's own segment frame
    Offset,
    /// `segment_base(target) >> 4 + addend`, a real-mode paragraph
    Paragraph,
    /// `selector_of(target) + addend`, a protected-mode selector
    Selector,
    /// `target - reference + addend`
    OffsetFrom,
    /// `(segment_base(target) - segment_base(reference)) >> 4 + addend`
    SegmentDifference,
    /// `got_slot_address(name) + addend`
    GotAbsolute,
    /// `got_slot_address(name) - source + addend`
    GotRelative,
}

/// A patch descriptor. Built through the kind-specific constructors, which
/// enumerate the legal combinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub kind: RelocationKind,
    /// Width of the patched field in bytes: 1, 2, 4 or 8
    pub size: usize,
    /// The address being patched
    pub source: Location,
    /// What address to write
    pub target: Target,
    /// When present, the relocation is a difference `target - reference`
    pub reference: Option<Target>,
    pub addend: i64,
    pub mask: u64,
    pub shift: u32,
    pub endian: Endian,
    /// Read the pre-existing bytes at the source as an extra addend
    pub addend_from_section_data: bool,
}

impl Relocation {
    fn new(
        kind: RelocationKind,
        size: usize,
        source: Location,
        target: Target,
        addend: i64,
        endian: Endian,
    ) -> Self {
        Relocation {
            kind,
            size,
            source,
            target,
            reference: None,
            addend,
            mask: endian::mask_for(size),
            shift: 0,
            endian,
            addend_from_section_data: false,
        }
    }

    pub fn absolute(
        size: usize,
        source: Location,
        target: Target,
        addend: i64,
        endian: Endian,
    ) -> Self {
        Relocation::new(RelocationKind::Absolute, size, source, target, addend, endian)
    }

    pub fn relative(
        size: usize,
        source: Location,
        target: Target,
        addend: i64,
        endian: Endian,
    ) -> Self {
        Relocation::new(RelocationKind::Relative, size, source, target, addend, endian)
    }

    pub fn offset(
        size: usize,
        source: Location,
        target: Target,
        addend: i64,
        endian: Endian,
    ) -> Self {
        Relocation::new(RelocationKind::Offset, size, source, target, addend, endian)
    }

    /// Real-mode segment paragraphs are always 16-bit little endian fields.
    pub fn paragraph(source: Location, target: Target, addend: i64) -> Self {
        Relocation::new(
            RelocationKind::Paragraph,
            2,
            source,
            target,
            addend,
            Endian::Little,
        )
    }

    /// Protected-mode selectors are 16-bit little endian fields.
    pub fn selector(source: Location, target: Target, addend: i64) -> Self {
        Relocation::new(
            RelocationKind::Selector,
            2,
            source,
            target,
            addend,
            Endian::Little,
        )
    }

    pub fn offset_from(
        size: usize,
        source: Location,
        target: Target,
        reference: Target,
        addend: i64,
        endian: Endian,
    ) -> Self {
        let mut relocation =
            Relocation::new(RelocationKind::OffsetFrom, size, source, target, addend, endian);
        relocation.reference = Some(reference);
        relocation
    }

    pub fn paragraph_difference(
        source: Location,
        target: Target,
        reference: Target,
        addend: i64,
    ) -> Self {
        let mut relocation = Relocation::new(
            RelocationKind::SegmentDifference,
            2,
            source,
            target,
            addend,
            Endian::Little,
        );
        relocation.reference = Some(reference);
        relocation
    }

    pub fn got_absolute(
        size: usize,
        source: Location,
        name: impl Into<String>,
        addend: i64,
        endian: Endian,
    ) -> Self {
        Relocation::new(
            RelocationKind::GotAbsolute,
            size,
            source,
            Target::got_slot(name),
            addend,
            endian,
        )
    }

    pub fn got_relative(
        size: usize,
        source: Location,
        name: impl Into<String>,
        addend: i64,
        endian: Endian,
    ) -> Self {
        Relocation::new(
            RelocationKind::GotRelative,
            size,
            source,
            Target::got_slot(name),
            addend,
            endian,
        )
    }

    /// Restricts the patch to the masked bits of the field.
    pub fn with_mask(mut self, mask: u64) -> Self {
        self.mask = mask;
        self
    }

    /// Stores `value << shift` rather than the value itself.
    pub fn with_shift(mut self, shift: u32) -> Self {
        self.shift = shift;
        self
    }

    /// Marks the pre-patch field contents as an implicit addend, as REL
    /// (addend-less) relocation sections require.
    pub fn with_addend_from_section_data(mut self) -> Self {
        self.addend_from_section_data = true;
        self
    }

    pub fn is_relative(&self) -> bool {
        matches!(
            self.kind,
            RelocationKind::Relative | RelocationKind::GotRelative
        )
    }

    /// A symbolic target name, when the relocation has not been resolved
    /// to a concrete location yet.
    pub fn target_symbol_name(&self) -> Option<&SymbolName> {
        match &self.target.base {
            crate::target::TargetBase::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn displace(&mut self, map: &Displacement) {
        self.source.displace(map);
        self.target.displace(map);
        if let Some(reference) = &mut self.reference {
            reference.displace(map);
        }
    }

    pub fn resolve_locals(&mut self, module: &crate::module::Module) {
        self.target.resolve_locals(module);
        if let Some(reference) = &mut self.reference {
            reference.resolve_locals(module);
        }
    }

    /// Width in bits of the usable field under the mask and shift.
    fn field_bits(&self) -> u32 {
        64 - (self.mask >> self.shift).leading_zeros()
    }

    /// Reads the field at the source as a signed implicit addend, honoring
    /// mask and shift.
    pub fn extract_addend(&self, section: &Section) -> Result<i64> {
        let current = section.read_word(self.size, self.source.offset, self.endian)?;
        let field = (current & self.mask) >> self.shift;
        Ok(endian::sign_extend_bits(self.field_bits(), field))
    }

    /// Patches the evaluated value into the source field. Bits outside the
    /// mask survive. Returns `false` when the value did not fit and a
    /// truncated value had to be written.
    pub fn write_value(&self, section: &mut Section, value: i64) -> Result<bool> {
        let current = section.read_word(self.size, self.source.offset, self.endian)?;
        let shifted = (value as u64) << self.shift;
        let patched = (current & !self.mask) | (shifted & self.mask);
        section.write_word(self.size, self.source.offset, patched, self.endian)?;

        let bits = self.field_bits();
        let fits = if bits == 0 || bits >= 64 {
            true
        } else {
            // accept both the unsigned and two's-complement readings
            let unsigned_fits = (value as u64) >> bits == 0;
            let signed_fits = value >> (bits - 1) == 0 || value >> (bits - 1) == -1;
            unsigned_fits || signed_fits
        };
        Ok(fits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{Section, flags};
    use crate::target::SectionIndex;

    fn scratch() -> Section {
        let mut section = Section::new(".text", flags::READABLE | flags::EXECUTABLE);
        section.append(&[0u8; 8]).unwrap();
        section
    }

    #[test]
    fn whole_word_patch() {
        let mut section = scratch();
        let relocation = Relocation::absolute(
            2,
            Location::section(SectionIndex(0), 2),
            Target::symbol(SymbolName::new("x")),
            0,
            Endian::Little,
        );
        assert!(relocation.write_value(&mut section, 0x1234).unwrap());
        assert_eq!(section.read_word(2, 2, Endian::Little).unwrap(), 0x1234);
    }

    #[test]
    fn masked_shifted_patch_preserves_outside_bits() {
        let mut section = scratch();
        // an ARM branch: opcode byte in the top bits must survive
        section.write_word(4, 0, 0xEB00_0000, Endian::Little).unwrap();
        let relocation = Relocation::relative(
            4,
            Location::section(SectionIndex(0), 0),
            Target::symbol(SymbolName::new("f")),
            0,
            Endian::Little,
        )
        .with_mask(0x00FF_FFFF)
        .with_shift(2);
        assert!(relocation.write_value(&mut section, 0x40).unwrap());
        assert_eq!(
            section.read_word(4, 0, Endian::Little).unwrap(),
            0xEB00_0100
        );
    }

    #[test]
    fn overflow_still_writes_truncated() {
        let mut section = scratch();
        let relocation = Relocation::absolute(
            1,
            Location::section(SectionIndex(0), 0),
            Target::symbol(SymbolName::new("x")),
            0,
            Endian::Little,
        );
        assert!(!relocation.write_value(&mut section, 0x1FF).unwrap());
        assert_eq!(section.get_byte(0), Some(0xFF));
    }

    #[test]
    fn implicit_addend_extraction_sign_extends() {
        let mut section = scratch();
        section.write_word(2, 0, 0xFFFE, Endian::Little).unwrap();
        let relocation = Relocation::relative(
            2,
            Location::section(SectionIndex(0), 0),
            Target::symbol(SymbolName::new("x")),
            0,
            Endian::Little,
        );
        assert_eq!(relocation.extract_addend(&section).unwrap(), -2);
    }
}
