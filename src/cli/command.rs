use crate::assembler::{
    intel_hex,
    phases::types::{Diagnostic, Severity},
    Assembler, Options, Output,
};
use crate::spec::types::hw::Radix;
use ansi_term::Color::{Red, Yellow};
use anyhow::{anyhow, Context};
use num_traits::FromPrimitive;
use std::fmt::Write;
use std::path::PathBuf;
use std::str::FromStr;
use structopt::StructOpt;

pub const DEFAULT_BINARY_EXT: &str = "bin";

#[cfg(windows)]
pub fn terminal_init() {
    let _ = ansi_term::enable_ansi_support();
}

#[cfg(not(windows))]
pub fn terminal_init() {}

#[derive(Debug, Clone, Copy)]
pub struct RadixArg(Radix);

impl FromStr for RadixArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base = i64::from_str(s)?;
        Radix::from_i64(base)
            .map(RadixArg)
            .ok_or_else(|| anyhow!("unsupported radix {} (use 2, 8, 10 or 16)", base))
    }
}

#[derive(StructOpt, Debug)]
#[structopt(name = "zasm", about = "Z80 assembler")]
pub struct CommandRoot {
    #[structopt(name = "in.asm", parse(from_os_str), required = true)]
    in_src: Vec<PathBuf>,

    /// Raw binary output (defaults to the first input with a `.bin` extension).
    #[structopt(short, long = "output", parse(from_os_str))]
    out_bin: Option<PathBuf>,

    #[structopt(long = "hex", parse(from_os_str))]
    out_hex: Option<PathBuf>,

    #[structopt(long = "list", parse(from_os_str))]
    out_list: Option<PathBuf>,

    #[structopt(long = "sym", parse(from_os_str))]
    out_sym: Option<PathBuf>,

    /// Directories searched for `INCLUDE` and `INCBIN` files.
    #[structopt(short = "I", long = "include", parse(from_os_str))]
    include_paths: Vec<PathBuf>,

    #[structopt(long)]
    radix: Option<RadixArg>,

    /// Bytes per listing line.
    #[structopt(long = "list-width", default_value = "4")]
    list_width: usize,

    #[structopt(long = "list-macros")]
    list_macros: bool,

    #[structopt(long = "max-errors", default_value = "100")]
    max_errors: usize,

    /// Print the parsed syntax tree.
    #[structopt(long = "dump-ast")]
    dump_ast: bool,
}

impl CommandRoot {
    fn options(&self) -> Options {
        Options {
            include_paths: self.include_paths.clone(),
            list_width: self.list_width,
            max_errors: self.max_errors,
            radix: self.radix.map(|r| r.0).unwrap_or_default(),
            list_macros: self.list_macros,
        }
    }
}

fn print_diagnostic(asm: &Assembler, diagnostic: &Diagnostic) {
    let line = asm.render_diagnostic(diagnostic);
    match diagnostic.severity {
        Severity::Error => eprintln!("{}", Red.paint(line)),
        Severity::Warning => eprintln!("{}", Yellow.paint(line)),
        Severity::Info => eprintln!("{}", line),
    }
}

fn symbol_file(symbols: &[(String, i64)]) -> String {
    let mut out = String::new();
    for (name, value) in symbols {
        let _ = writeln!(out, "{:<24} EQU {:#06X}", name, value);
    }
    out
}

fn write_outputs(cmd: &CommandRoot, asm: &mut Assembler, output: &Output) -> anyhow::Result<()> {
    let out_bin = match &cmd.out_bin {
        Some(path) => path.clone(),
        None => PathBuf::from(
            cmd.in_src[0]
                .file_stem()
                .ok_or_else(|| anyhow!("no file name in {}", cmd.in_src[0].display()))?,
        )
        .with_extension(DEFAULT_BINARY_EXT),
    };
    std::fs::write(&out_bin, &output.bytes)
        .with_context(|| format!("writing {}", out_bin.display()))?;
    log::info!("wrote {} bytes to {}", output.bytes.len(), out_bin.display());

    if let Some(path) = &cmd.out_hex {
        std::fs::write(path, intel_hex(output))
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(path) = &cmd.out_list {
        std::fs::write(path, &output.listing)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(path) = &cmd.out_sym {
        std::fs::write(path, symbol_file(&asm.symbols()))
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

/// Returns whether the assembly succeeded.
pub fn asm(cmd: &CommandRoot) -> anyhow::Result<bool> {
    let mut asm = Assembler::new(cmd.options());
    let mut parsed = Ok(());
    for path in &cmd.in_src {
        parsed = asm.parse_file(path).map(|_| ());
        if parsed.is_err() {
            break;
        }
    }

    if cmd.dump_ast {
        println!("{}", asm.dump());
    }

    let result = parsed.and_then(|()| asm.assemble());
    for diagnostic in asm.diagnostics() {
        print_diagnostic(&asm, diagnostic);
    }

    let output = match result {
        Ok(output) if asm.error_count() == 0 => output,
        Ok(_) => {
            eprintln!(
                "{}",
                Red.paint(format!("Assembly failed with {} error(s)", asm.error_count()))
            );
            return Ok(false);
        }
        Err(err) => {
            eprintln!("{}", Red.paint(err.to_string()));
            return Ok(false);
        }
    };

    write_outputs(cmd, &mut asm, &output)?;
    if asm.warning_count() > 0 {
        eprintln!(
            "{}",
            Yellow.paint(format!("{} warning(s)", asm.warning_count()))
        );
    }
    Ok(true)
}

pub fn root(cmd: CommandRoot) -> ! {
    let code = match asm(&cmd) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(err) => {
            eprintln!("{}", Red.paint(format!("{:#}", err)));
            2
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn radix_arguments() {
        assert_eq!(RadixArg::from_str("16").map(|r| r.0).ok(), Some(Radix::Hex));
        assert!(RadixArg::from_str("3").is_err());
        assert!(RadixArg::from_str("ten").is_err());
    }

    #[test]
    fn command_line() {
        let cmd = CommandRoot::from_iter(&[
            "zasm", "main.asm", "-I", "inc", "--hex", "out.hex", "--radix", "16",
        ]);
        let options = cmd.options();
        assert_eq!(options.include_paths, vec![PathBuf::from("inc")]);
        assert_eq!(options.radix, Radix::Hex);
        assert_eq!(options.list_width, 4);
        assert_eq!(cmd.out_hex, Some(PathBuf::from("out.hex")));
    }

    #[test]
    fn symbol_file_format() {
        let text = symbol_file(&[("start".to_owned(), 0x100)]);
        assert_eq!(text, format!("{:<24} EQU 0x0100\n", "start"));
    }
}
