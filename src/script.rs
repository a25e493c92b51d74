//! The linker-script language and the built-in memory models.
//!
//! A script is a sequence of segment declarations. Each names a segment,
//! optionally pins its base address, then selects sections by name or by
//! flag predicates; sections are laid out in selection order. A trailing
//! `align` directive sets the segment's alignment. Numeric positions may
//! be `?parameter?` placeholders, substituted from writer defaults and
//! `-P` command-line overrides.
//!
//! ```text
//! segment .code at ?base_address? {
//!     all execute;
//!     align 16;
//! }
//! segment .data {
//!     all not zerofill;
//!     all zerofill;
//!     align 16;
//! }
//! ```
//!
//! A segment named `*` expands to one segment per remaining section,
//! which is how the large memory model gives every section its own
//! paragraph.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::section::flags;

/// A numeric position, literal or parameter-substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(u64),
    Param(String),
}

impl Expr {
    pub fn eval(&self, params: &BTreeMap<String, u64>) -> Result<u64> {
        match self {
            Expr::Number(value) => Ok(*value),
            Expr::Param(name) => params
                .get(name)
                .copied()
                .ok_or_else(|| Error::InvalidScriptParameter(name.clone())),
        }
    }
}

/// One selection step inside a segment declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Select {
    /// A single section picked by exact name
    Named(String),
    /// Every not-yet-placed section whose flags contain `required` and
    /// avoid `excluded`, in module order
    Flags { required: u32, excluded: u32 },
}

/// A segment declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSpec {
    pub name: String,
    /// Fixed base address; consecutive placement when absent
    pub base: Option<Expr>,
    pub selects: Vec<Select>,
    /// Start and end alignment of the segment
    pub align: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    pub segments: Vec<SegmentSpec>,
}

/// Named presets selecting a built-in script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryModel {
    /// Whatever the output format prefers
    #[default]
    Default,
    /// One segment for everything, zero fill at the end
    Tiny,
    /// Separate code and data segments, stack and bss in data
    Small,
    /// Separate code segment, one segment per data section
    Compact,
    /// Every section is its own segment
    Large,
    /// Single linear region
    Flat,
}

impl MemoryModel {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "" | "default" => Ok(MemoryModel::Default),
            "tiny" => Ok(MemoryModel::Tiny),
            "small" => Ok(MemoryModel::Small),
            "compact" => Ok(MemoryModel::Compact),
            "large" => Ok(MemoryModel::Large),
            "flat" => Ok(MemoryModel::Flat),
            _ => Err(Error::InvalidScript(format!("unknown memory model {name}"))),
        }
    }

    /// Replaces `Default` with the output format's preference.
    pub fn or(self, preferred: MemoryModel) -> MemoryModel {
        match self {
            MemoryModel::Default => preferred,
            other => other,
        }
    }

    /// The built-in script for this model. `Default` must be resolved
    /// through [`MemoryModel::or`] first.
    pub fn script_text(self) -> &'static str {
        match self {
            MemoryModel::Default | MemoryModel::Tiny => {
                "segment .main at ?base_address? {\n\
                 \tall not zerofill;\n\
                 \tall zerofill;\n\
                 \talign 16;\n\
                 }\n"
            }
            MemoryModel::Small => {
                "segment .code at ?base_address? {\n\
                 \tall execute;\n\
                 \talign 16;\n\
                 }\n\
                 segment .data {\n\
                 \tall not zerofill;\n\
                 \tall zerofill not stack;\n\
                 \tall stack;\n\
                 \talign 16;\n\
                 }\n"
            }
            MemoryModel::Compact => {
                "segment .code at ?base_address? {\n\
                 \tall execute;\n\
                 \talign 16;\n\
                 }\n\
                 segment * {\n\
                 \tall;\n\
                 \talign 16;\n\
                 }\n"
            }
            MemoryModel::Large => {
                "segment * at ?base_address? {\n\
                 \tall;\n\
                 \talign 16;\n\
                 }\n"
            }
            MemoryModel::Flat => {
                "segment .flat at ?base_address? {\n\
                 \tall not zerofill;\n\
                 \tall zerofill;\n\
                 }\n"
            }
        }
    }
}

/// Converts `-P name=value` strings into numeric script parameters.
pub fn numeric_params(raw: &BTreeMap<String, String>) -> Result<BTreeMap<String, u64>> {
    let mut params = BTreeMap::new();
    for (name, value) in raw {
        let number = parse_number(value)
            .ok_or_else(|| Error::InvalidScriptParameter(format!("{name}={value}")))?;
        params.insert(name.clone(), number);
    }
    Ok(params)
}

fn parse_number(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
    Punct(char),
}

struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(text: &'a str) -> Self {
        Tokenizer { rest: text }
    }

    fn next(&mut self) -> Result<Option<Token<'a>>> {
        loop {
            self.rest = self.rest.trim_start();
            if let Some(rest) = self.rest.strip_prefix('#') {
                // comment to end of line
                self.rest = rest.split_once('\n').map_or("", |(_, tail)| tail);
                continue;
            }
            break;
        }
        let mut chars = self.rest.char_indices();
        let Some((_, first)) = chars.next() else {
            return Ok(None);
        };
        match first {
            '{' | '}' | ';' => {
                self.rest = &self.rest[1..];
                Ok(Some(Token::Punct(first)))
            }
            '"' => {
                let body = &self.rest[1..];
                let Some(end) = body.find('"') else {
                    return Err(Error::InvalidScript("unterminated string".into()));
                };
                self.rest = &body[end + 1..];
                Ok(Some(Token::Quoted(&body[..end])))
            }
            _ => {
                let end = self
                    .rest
                    .find(|c: char| c.is_whitespace() || "{};\"".contains(c))
                    .unwrap_or(self.rest.len());
                let word = &self.rest[..end];
                self.rest = &self.rest[end..];
                Ok(Some(Token::Word(word)))
            }
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<&'a str> {
        match self.next()? {
            Some(Token::Word(word)) => Ok(word),
            Some(Token::Quoted(text)) => Ok(text),
            other => Err(Error::InvalidScript(format!("expected {what}, got {other:?}"))),
        }
    }

    fn expect_punct(&mut self, punct: char) -> Result<()> {
        match self.next()? {
            Some(Token::Punct(c)) if c == punct => Ok(()),
            other => Err(Error::InvalidScript(format!(
                "expected `{punct}', got {other:?}"
            ))),
        }
    }
}

fn flag_bit(word: &str) -> Option<u32> {
    Some(match word {
        "read" => flags::READABLE,
        "write" => flags::WRITABLE,
        "execute" => flags::EXECUTABLE,
        "zerofill" => flags::ZERO_FILLED,
        "mergeable" => flags::MERGEABLE,
        "resource" => flags::RESOURCE,
        "stack" => flags::STACK,
        "heap" => flags::HEAP,
        "group" => flags::GROUP,
        _ => return None,
    })
}

fn parse_expr(word: &str) -> Result<Expr> {
    if let Some(param) = word.strip_prefix('?') {
        let Some(param) = param.strip_suffix('?') else {
            return Err(Error::InvalidScript(format!("malformed parameter {word}")));
        };
        return Ok(Expr::Param(param.to_string()));
    }
    parse_number(word)
        .map(Expr::Number)
        .ok_or_else(|| Error::InvalidScript(format!("expected address, got {word}")))
}

/// Parses a script source into segment declarations.
pub fn parse(text: &str) -> Result<Script> {
    let mut tokens = Tokenizer::new(text);
    let mut script = Script::default();

    while let Some(token) = tokens.next()? {
        match token {
            Token::Word("segment") => {
                script.segments.push(parse_segment(&mut tokens)?);
            }
            other => {
                return Err(Error::InvalidScript(format!(
                    "expected segment declaration, got {other:?}"
                )));
            }
        }
    }
    Ok(script)
}

fn parse_segment(tokens: &mut Tokenizer) -> Result<SegmentSpec> {
    let name = tokens.expect_word("segment name")?.to_string();
    let mut spec = SegmentSpec {
        name,
        base: None,
        selects: Vec::new(),
        align: 1,
    };

    match tokens.next()? {
        Some(Token::Word("at")) => {
            spec.base = Some(parse_expr(tokens.expect_word("base address")?)?);
            tokens.expect_punct('{')?;
        }
        Some(Token::Punct('{')) => {}
        other => {
            return Err(Error::InvalidScript(format!(
                "expected `at' or `{{', got {other:?}"
            )));
        }
    }

    loop {
        match tokens.next()? {
            Some(Token::Punct('}')) => break,
            Some(Token::Word("section")) => {
                spec.selects
                    .push(Select::Named(tokens.expect_word("section name")?.to_string()));
                tokens.expect_punct(';')?;
            }
            Some(Token::Word("align")) => {
                let word = tokens.expect_word("alignment")?;
                let align = parse_number(word).filter(|a| a.is_power_of_two()).ok_or_else(
                    || Error::InvalidScript(format!("bad alignment {word}")),
                )?;
                spec.align = align;
                tokens.expect_punct(';')?;
            }
            Some(Token::Word("all")) => {
                let mut required = 0;
                let mut excluded = 0;
                let mut invert = false;
                loop {
                    match tokens.next()? {
                        Some(Token::Punct(';')) => break,
                        Some(Token::Word("not")) => invert = true,
                        Some(Token::Word(word)) => {
                            let bit = flag_bit(word).ok_or_else(|| {
                                Error::InvalidScript(format!("unknown section flag {word}"))
                            })?;
                            if invert {
                                excluded |= bit;
                            } else {
                                required |= bit;
                            }
                            invert = false;
                        }
                        other => {
                            return Err(Error::InvalidScript(format!(
                                "expected section flag, got {other:?}"
                            )));
                        }
                    }
                }
                spec.selects.push(Select::Flags { required, excluded });
            }
            other => {
                return Err(Error::InvalidScript(format!(
                    "expected selection command, got {other:?}"
                )));
            }
        }
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_segment_declarations() {
        let script = parse(
            "# layout for split I/D\n\
             segment .code at 0x100 {\n\
                 section \".text\";\n\
                 all execute;\n\
                 align 16;\n\
             }\n\
             segment .data {\n\
                 all not zerofill;\n\
                 all zerofill;\n\
             }\n",
        )
        .unwrap();

        assert_eq!(script.segments.len(), 2);
        let code = &script.segments[0];
        assert_eq!(code.name, ".code");
        assert_eq!(code.base, Some(Expr::Number(0x100)));
        assert_eq!(code.align, 16);
        assert_eq!(code.selects[0], Select::Named(".text".into()));
        assert_eq!(
            code.selects[1],
            Select::Flags {
                required: flags::EXECUTABLE,
                excluded: 0
            }
        );
        let data = &script.segments[1];
        assert_eq!(data.base, None);
        assert_eq!(data.align, 1);
        assert_eq!(
            data.selects[0],
            Select::Flags {
                required: 0,
                excluded: flags::ZERO_FILLED
            }
        );
    }

    #[test]
    fn parameters_substitute_and_fail_loudly() {
        let script = parse("segment .main at ?base_address? { all; }").unwrap();
        let base = script.segments[0].base.clone().unwrap();

        let mut params = BTreeMap::new();
        params.insert("base_address".to_string(), 0x100u64);
        assert_eq!(base.eval(&params).unwrap(), 0x100);

        let empty = BTreeMap::new();
        assert!(matches!(
            base.eval(&empty),
            Err(Error::InvalidScriptParameter(_))
        ));
    }

    #[test]
    fn builtin_models_parse() {
        for model in [
            MemoryModel::Tiny,
            MemoryModel::Small,
            MemoryModel::Compact,
            MemoryModel::Large,
            MemoryModel::Flat,
        ] {
            let script = parse(model.script_text()).unwrap();
            assert!(!script.segments.is_empty(), "{model:?}");
        }
    }

    #[test]
    fn numeric_parameter_conversion() {
        let mut raw = BTreeMap::new();
        raw.insert("base_address".to_string(), "0x100".to_string());
        raw.insert("stack_size".to_string(), "4096".to_string());
        let params = numeric_params(&raw).unwrap();
        assert_eq!(params["base_address"], 0x100);
        assert_eq!(params["stack_size"], 4096);

        raw.insert("broken".to_string(), "zzz".to_string());
        assert!(numeric_params(&raw).is_err());
    }

    #[test]
    fn rejects_malformed_scripts() {
        assert!(parse("segment .a at { all; }").is_err());
        assert!(parse("segment .a { all bogus; }").is_err());
        assert!(parse("segment .a { align 3; }").is_err());
        assert!(parse("banana").is_err());
    }
}
