//! Symbol names, exports and common symbols.

use core::fmt;

/// A symbolic reference: either a bare identifier, or an entry of a named
/// library imported by ordinal or by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SymbolName {
    Name(String),
    ImportByOrdinal { library: String, ordinal: u64 },
    ImportByName { library: String, name: String },
}

impl SymbolName {
    pub fn new(name: impl Into<String>) -> Self {
        SymbolName::Name(name.into())
    }

    /// The identifier, for references that are not library imports.
    pub fn plain_name(&self) -> Option<&str> {
        match self {
            SymbolName::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_import(&self) -> bool {
        !matches!(self, SymbolName::Name(_))
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymbolName::Name(name) => write!(fmt, "{name}"),
            SymbolName::ImportByOrdinal { library, ordinal } => {
                write!(fmt, "{library}!#{ordinal}")
            }
            SymbolName::ImportByName { library, name } => write!(fmt, "{library}!{name}"),
        }
    }
}

/// A symbol made visible to other executables, by name and optionally by
/// ordinal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExportedSymbol {
    pub name: String,
    pub ordinal: Option<u64>,
    /// Whether the ordinal, rather than the name, is the binding handle
    pub by_ordinal: bool,
}

impl ExportedSymbol {
    pub fn by_name(name: impl Into<String>) -> Self {
        ExportedSymbol {
            name: name.into(),
            ordinal: None,
            by_ordinal: false,
        }
    }

    /// Exported by name, with an ordinal hint for faster lookup.
    pub fn with_ordinal(name: impl Into<String>, ordinal: u64) -> Self {
        ExportedSymbol {
            name: name.into(),
            ordinal: Some(ordinal),
            by_ordinal: false,
        }
    }

    pub fn by_ordinal(ordinal: u64, internal_name: impl Into<String>) -> Self {
        ExportedSymbol {
            name: internal_name.into(),
            ordinal: Some(ordinal),
            by_ordinal: true,
        }
    }
}

impl fmt::Display for ExportedSymbol {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match (self.by_ordinal, self.ordinal) {
            (true, Some(ordinal)) => write!(fmt, "#{ordinal} ({})", self.name),
            (_, Some(ordinal)) => write!(fmt, "{} @{ordinal}", self.name),
            _ => write!(fmt, "{}", self.name),
        }
    }
}

/// Unallocated storage declared by a module, to be laid down in a shared
/// section at the end of the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonSymbol {
    pub size: u64,
    /// Power of two
    pub align: u64,
    /// Section to allocate in, `.comm` by default
    pub section_name: String,
    /// Used when the preferred section cannot take the symbol
    pub alternative_section_name: Option<String>,
}

impl CommonSymbol {
    pub fn new(size: u64, align: u64) -> Self {
        CommonSymbol {
            size,
            align: align.max(1),
            section_name: ".comm".into(),
            alternative_section_name: None,
        }
    }

    pub fn in_section(size: u64, align: u64, section_name: impl Into<String>) -> Self {
        CommonSymbol {
            size,
            align: align.max(1),
            section_name: section_name.into(),
            alternative_section_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_and_imports() {
        let plain = SymbolName::new("strlen");
        assert_eq!(plain.plain_name(), Some("strlen"));
        assert!(!plain.is_import());

        let import = SymbolName::ImportByOrdinal {
            library: "KERNEL".into(),
            ordinal: 0x5C,
        };
        assert_eq!(import.plain_name(), None);
        assert!(import.is_import());
        assert_eq!(import.to_string(), "KERNEL!#92");
    }

    #[test]
    fn common_alignment_never_zero() {
        let symbol = CommonSymbol::new(10, 0);
        assert_eq!(symbol.align, 1);
    }
}
