//! The `link` frontend: reads object files, resolves symbols across them,
//! lays the result out for the selected output format and writes the
//! executable.
//!
//! Usage examples:
//!   link -F com -M tiny -o prog.com crt0.o main.o
//!   link -F mz -M large -P base_address=0 main.o
//!   link -F mz -T custom.ld -S header_align=32 main.o

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::process;

use retrolink::collector::ModuleCollector;
use retrolink::diag::Diagnostics;
use retrolink::endian::Endian;
use retrolink::error::Result;
use retrolink::formats::{self, OutputFormat};
use retrolink::io::Reader;
use retrolink::module::Module;
use retrolink::target::Location;

fn usage(program: &str) {
    eprintln!("Usage: {program} [options] <input files>");
    eprintln!("  -h");
    eprintln!("        Display this help page");
    eprintln!("  -F <format>");
    eprintln!("        Select output format: binary, com, mz (exe, dos)");
    eprintln!("  -o <output file>");
    eprintln!("        Specify output binary file name");
    eprintln!("  -M <memory model>");
    eprintln!("        Select memory model: tiny, small, compact, large, flat");
    eprintln!("  -T <linker script>");
    eprintln!("        Use a linker script instead of the model preset");
    eprintln!("  -P <parameter>=<value>");
    eprintln!("        Set a linker script parameter (syntax: ?parameter?)");
    eprintln!("  -S <setting>, -S <setting>=<value>");
    eprintln!("        Set a format-dependent option");
    eprintln!("  -d <symbol>=<value>, -d <symbol>=<segment>:<offset>");
    eprintln!("        Define a symbol, including special names such as .entry");
    eprintln!("  -$=<char>");
    eprintln!("        Set the extended-prefix character (default: '$')");
    eprintln!("  --display-debug-messages");
    eprintln!("        Print information only relevant for linker development");
    eprintln!("  --suppress-warnings");
    eprintln!("        Suppress printing warnings");
}

/// A `-d` symbol override, resolved against the merged module.
struct Define {
    segment: Option<String>,
    value: DefineValue,
}

enum DefineValue {
    Number(u64),
    Symbol(String),
}

fn parse_number(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

fn parse_define(text: &str) -> (String, Define) {
    match text.split_once('=') {
        None => (
            text.to_string(),
            Define {
                segment: None,
                value: DefineValue::Number(1),
            },
        ),
        Some((name, rest)) => {
            let (segment, value_text) = match rest.split_once(':') {
                Some((segment, offset)) => (Some(segment.to_string()), offset),
                None => (None, rest),
            };
            let value = match parse_number(value_text) {
                Some(number) => DefineValue::Number(number),
                None => DefineValue::Symbol(value_text.to_string()),
            };
            (name.to_string(), Define { segment, value })
        }
    }
}

impl Define {
    fn to_location(&self, module: &Module) -> Option<Location> {
        let offset = match &self.value {
            DefineValue::Number(number) => *number,
            DefineValue::Symbol(name) => return module.find_global_symbol(name),
        };
        match &self.segment {
            None => Some(Location::absolute(offset)),
            Some(segment) => module
                .find_section(segment)
                .map(|section| Location::section(section, offset)),
        }
    }
}

struct Invocation {
    inputs: Vec<String>,
    format_name: String,
    output: String,
    model: String,
    script_path: String,
    options: BTreeMap<String, String>,
    parameters: BTreeMap<String, String>,
    defines: Vec<(String, Define)>,
    special_char: char,
    display_debug: bool,
    suppress_warnings: bool,
}

fn parse_args(args: &[String]) -> Invocation {
    let mut invocation = Invocation {
        inputs: Vec::new(),
        format_name: String::new(),
        output: String::new(),
        model: String::new(),
        script_path: String::new(),
        options: BTreeMap::new(),
        parameters: BTreeMap::new(),
        defines: Vec::new(),
        special_char: '$',
        display_debug: false,
        suppress_warnings: false,
    };

    let mut index = 1;
    // options take their value joined (-Fmz) or as the next argument
    let mut take_value = |index: &mut usize, joined: &str| -> String {
        if !joined.is_empty() {
            joined.to_string()
        } else {
            *index += 1;
            args.get(*index).cloned().unwrap_or_default()
        }
    };

    while index < args.len() {
        let arg = &args[index];
        if let Some(rest) = arg.strip_prefix('-') {
            match rest.chars().next() {
                Some('h') => {
                    usage(&args[0]);
                    process::exit(0);
                }
                Some('F') => {
                    let value = take_value(&mut index, &rest[1..]);
                    invocation.format_name = value;
                }
                Some('o') => {
                    let value = take_value(&mut index, &rest[1..]);
                    if !invocation.output.is_empty() {
                        eprintln!("Error: Multiple output files provided, using first one");
                    } else {
                        invocation.output = value;
                    }
                }
                Some('M') => invocation.model = take_value(&mut index, &rest[1..]),
                Some('T') => invocation.script_path = take_value(&mut index, &rest[1..]),
                Some('S') => {
                    let setting = take_value(&mut index, &rest[1..]);
                    match setting.split_once('=') {
                        Some((name, value)) => {
                            invocation.options.insert(name.to_string(), value.to_string());
                        }
                        None => {
                            invocation.options.insert(setting, String::new());
                        }
                    }
                }
                Some('P') => {
                    let setting = take_value(&mut index, &rest[1..]);
                    match setting.split_once('=') {
                        Some((name, value)) => {
                            invocation
                                .parameters
                                .insert(name.to_string(), value.to_string());
                        }
                        None => {
                            invocation.parameters.insert(setting, String::new());
                        }
                    }
                }
                Some('d') => {
                    let setting = take_value(&mut index, &rest[1..]);
                    invocation.defines.push(parse_define(&setting));
                }
                Some('$') => {
                    let value = take_value(&mut index, rest[1..].trim_start_matches('='));
                    invocation.special_char = value.chars().next().unwrap_or('$');
                }
                Some('-') if rest == "-display-debug-messages" => {
                    invocation.display_debug = true;
                }
                Some('-') if rest == "-suppress-warnings" => {
                    invocation.suppress_warnings = true;
                }
                _ => {
                    eprintln!("Fatal error: Unknown option `{arg}'");
                    process::exit(1);
                }
            }
        } else {
            invocation.inputs.push(arg.clone());
        }
        index += 1;
    }
    invocation
}

fn derive_output_name(input: &str, extension: &str) -> String {
    let path = Path::new(input);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "a".to_string());
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(format!("{stem}{extension}")).to_string_lossy().into_owned()
        }
        _ => format!("{stem}{extension}"),
    }
}

fn run(invocation: &Invocation, diag: &mut Diagnostics) -> Result<()> {
    let mut format: Box<dyn OutputFormat> = if invocation.format_name.is_empty() {
        log::warn!("unspecified output format, using flat binary");
        formats::output_format("binary")?
    } else {
        formats::output_format(&invocation.format_name)?
    };

    let mut collector = ModuleCollector::new();
    for input in &invocation.inputs {
        let file = File::open(input)?;
        let mut rd = Reader::new(Endian::Little, Box::new(file));
        let mut input_format = formats::detect_input(&mut rd)?;
        input_format.read_file(&mut rd)?;

        let mut module = Module::new(input.as_str());
        module.setup_options(
            invocation.special_char,
            format.capabilities(),
            input_format.capabilities(),
        );
        input_format.generate_module(&mut module, diag)?;
        collector.add_module(module, false, diag);
    }

    let mut module = Module::new("");
    module.setup_options(
        invocation.special_char,
        format.capabilities(),
        formats::Capabilities::none(),
    );
    collector.combine_into(&mut module, diag)?;

    for (name, define) in &invocation.defines {
        match define.to_location(&module) {
            Some(location) => module.add_global_symbol(name, location, diag),
            None => log::warn!("unable to resolve definition of {name}, ignored"),
        }
    }

    module.allocate_common_symbols();

    format.set_options(&invocation.options)?;
    format.set_model(&invocation.model)?;
    let script = if invocation.script_path.is_empty() {
        None
    } else {
        Some(std::fs::read_to_string(&invocation.script_path)?)
    };
    format.set_link_script(script, &invocation.parameters);

    let output = if !invocation.output.is_empty() {
        invocation.output.clone()
    } else {
        derive_output_name(&invocation.inputs[0], format.default_extension())
    };

    log::debug!("generating {output}");
    format.generate_file(&output, &mut module, diag)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let invocation = parse_args(&args);

    if invocation.inputs.is_empty() {
        usage(&args[0]);
        process::exit(0);
    }

    let verbosity: usize = if invocation.display_debug {
        3
    } else if invocation.suppress_warnings {
        0
    } else {
        1
    };
    stderrlog::new()
        .verbosity(verbosity)
        .init()
        .expect("logger initialized once");

    let mut diag = Diagnostics::new();
    if let Err(err) = run(&invocation, &mut diag) {
        eprintln!("Fatal error: {err}");
        process::exit(1);
    }
    if diag.failed() {
        process::exit(1);
    }
}
