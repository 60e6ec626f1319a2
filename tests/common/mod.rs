use std::path::Path;
use zasm::assembler::{conductor::MemoryLoader, Assembler, Options, Output};

/// Assemble `source`, which must not produce any diagnostics, and return the output bytes.
pub fn assemble_clean(source: &str) -> Vec<u8> {
    let (result, diagnostics) = zasm::assembler::assemble_str(source);
    assert!(diagnostics.is_empty(), "unexpected diagnostics: {:#?}", diagnostics);
    match result {
        Ok(output) => output.bytes,
        Err(err) => panic!("assembly failed: {}", err),
    }
}

/// Assemble `source` and return the rendered diagnostics, whatever the outcome.
pub fn diagnostics(source: &str) -> Vec<String> {
    zasm::assembler::assemble_str(source).1
}

pub fn assert_one_diagnostic(source: &str, severity: &str, fragment: &str) {
    let diagnostics = diagnostics(source);
    assert_eq!(diagnostics.len(), 1, "{:#?}", diagnostics);
    assert!(
        diagnostics[0].contains(&format!(": {}: ", severity)) && diagnostics[0].contains(fragment),
        "'{}' is not a {} mentioning '{}'",
        diagnostics[0],
        severity,
        fragment
    );
}

/// Assemble `main.asm` out of a set of in-memory files.
pub fn assemble_files(files: &[(&str, &str)]) -> (Assembler, Output) {
    let loader = files
        .iter()
        .fold(MemoryLoader::default(), |loader, (name, text)| {
            loader.with_file(name, *text)
        });
    let mut asm = Assembler::with_loader(Options::default(), Box::new(loader));
    asm.parse_file(Path::new("main.asm")).unwrap();
    let output = asm.assemble().unwrap();
    assert_eq!(asm.error_count(), 0);
    (asm, output)
}
