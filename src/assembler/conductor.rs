use super::ast::{Ast, NodeId};
use super::data::TypeRef;
use super::eval::Value;
use super::output::{Generator, Output};
use super::phases::parse::{self, ParseContext};
use super::phases::types::{Abort, Diagnostic, FileId, Log, MAX_ERRORS};
use super::phases::walk::{Phase, State, Walker};
use super::scope::{Scopes, Symbol};
use crate::spec::types::hw::{Number, Radix};
use std::collections::HashMap;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};

const BUILTIN_TYPES: [(&str, TypeRef); 8] = [
    ("db", TypeRef::Byte),
    ("defb", TypeRef::Byte),
    ("byte", TypeRef::Byte),
    ("dm", TypeRef::Byte),
    ("defm", TypeRef::Byte),
    ("dw", TypeRef::Word),
    ("defw", TypeRef::Word),
    ("word", TypeRef::Word),
];

#[derive(Debug, Clone)]
pub struct Options {
    pub include_paths: Vec<PathBuf>,
    /// Bytes shown per listing line.
    pub list_width: usize,
    pub max_errors: usize,
    pub radix: Radix,
    pub list_macros: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            include_paths: Vec::new(),
            list_width: 4,
            max_errors: MAX_ERRORS,
            radix: Radix::default(),
            list_macros: false,
        }
    }
}

/// Where source text and binary includes come from.
pub trait SourceLoader {
    /// Find `name`, requested by the file at `including` (if it is a file on disk).
    fn resolve(&self, name: &str, including: Option<&Path>) -> Option<PathBuf>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Resolves names relative to the including file, then in each search path, then as given.
#[derive(Debug, Default)]
pub struct FileLoader {
    search_paths: Vec<PathBuf>,
}

impl FileLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        FileLoader { search_paths }
    }
}

impl SourceLoader for FileLoader {
    fn resolve(&self, name: &str, including: Option<&Path>) -> Option<PathBuf> {
        let relative = including
            .and_then(Path::parent)
            .map(|dir| dir.join(name));
        relative
            .into_iter()
            .chain(self.search_paths.iter().map(|dir| dir.join(name)))
            .chain(std::iter::once(PathBuf::from(name)))
            .find(|path| path.is_file())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

#[derive(Debug, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemoryLoader {
    pub fn with_file(mut self, name: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(PathBuf::from(name), contents.into());
        self
    }
}

impl SourceLoader for MemoryLoader {
    fn resolve(&self, name: &str, _including: Option<&Path>) -> Option<PathBuf> {
        let path = PathBuf::from(name);
        if self.files.contains_key(&path) {
            Some(path)
        } else {
            None
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

#[derive(Debug)]
struct SourceFile {
    name: String,
    path: Option<PathBuf>,
    text: String,
    lines: Vec<(usize, usize)>,
}

/// Every source file read during the compilation, addressed by `FileId`.
#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn add(&mut self, name: String, path: Option<PathBuf>, text: String) -> FileId {
        let mut lines = Vec::new();
        let mut start = 0;
        for line in text.split_inclusive('\n') {
            let content = line.trim_end_matches(&['\n', '\r'][..]);
            lines.push((start, start + content.len()));
            start += line.len();
        }
        self.files.push(SourceFile {
            name,
            path,
            text,
            lines,
        });
        self.files.len() - 1
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn name(&self, file: FileId) -> &str {
        &self.files[file].name
    }

    pub fn path(&self, file: FileId) -> Option<&Path> {
        self.files[file].path.as_deref()
    }

    pub fn text(&self, file: FileId) -> &str {
        &self.files[file].text
    }

    pub fn line_count(&self, file: FileId) -> usize {
        self.files[file].lines.len()
    }

    /// The text of a 1-based line, empty when out of range.
    pub fn line(&self, file: FileId, line: usize) -> &str {
        let source = &self.files[file];
        match line.checked_sub(1).and_then(|idx| source.lines.get(idx)) {
            Some((start, end)) => &source.text[*start..*end],
            None => "",
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Io(String, io::Error),
    Abort(Abort),
    /// The previous passes reported errors, so the requested pass was not run.
    ErrorsReported(usize),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(name, err) => write!(f, "Could not read '{}': {}", name, err),
            Error::Abort(abort) => write!(f, "{}", abort),
            Error::ErrorsReported(n) => write!(f, "Assembly failed with {} error(s)", n),
        }
    }
}

impl std::error::Error for Error {}

impl From<Abort> for Error {
    fn from(abort: Abort) -> Self {
        Error::Abort(abort)
    }
}

/// Drives one compilation: parse any number of root files into a shared root scope, then
/// run the three passes over all of them.
pub struct Assembler {
    options: Options,
    loader: Box<dyn SourceLoader>,
    sources: SourceMap,
    ast: Ast,
    scopes: Scopes,
    state: State,
    log: Log,
}

impl Assembler {
    pub fn new(options: Options) -> Self {
        let loader = Box::new(FileLoader::new(options.include_paths.clone()));
        Assembler::with_loader(options, loader)
    }

    pub fn with_loader(options: Options, loader: Box<dyn SourceLoader>) -> Self {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        for (name, ty) in BUILTIN_TYPES.iter() {
            // Nothing else is defined yet.
            let _ = scopes.define(root, name, Symbol::Type(*ty), true);
        }

        Assembler {
            log: Log::new(options.max_errors),
            options,
            loader,
            sources: SourceMap::default(),
            ast: Ast::new(),
            scopes,
            state: State::default(),
        }
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<NodeId, Error> {
        let name = path.display().to_string();
        let resolved = self
            .loader
            .resolve(&name, None)
            .ok_or_else(|| Error::Io(name.clone(), io::ErrorKind::NotFound.into()))?;
        let bytes = self
            .loader
            .read(&resolved)
            .map_err(|err| Error::Io(name.clone(), err))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let file = self.sources.add(name, Some(resolved), text);
        self.parse(file)
    }

    pub fn parse_literal(&mut self, name: &str, text: &str) -> Result<NodeId, Error> {
        let file = self.sources.add(name.to_owned(), None, text.to_owned());
        self.parse(file)
    }

    fn parse(&mut self, file: FileId) -> Result<NodeId, Error> {
        let mut ctx = ParseContext::new(
            &mut self.ast,
            &mut self.sources,
            self.loader.as_ref(),
            &mut self.log,
            self.options.radix,
        );
        let block = parse::parse_file(&mut ctx, file)?;
        let root = self.ast.root();
        self.ast.append(root, block);
        Ok(block)
    }

    fn run(&mut self, phase: Phase, generator: Option<&mut Generator>) -> Result<(), Error> {
        log::info!("{:?} pass", phase);
        let root = self.ast.root();
        let scope = self.scopes.root();
        let mut walker = Walker::new(
            &self.ast,
            &mut self.scopes,
            &mut self.state,
            &mut self.log,
            &self.options,
            phase,
            generator,
        );
        walker.walk(root, scope)?;
        log::debug!(
            "{:?} pass done: {} error(s), {} warning(s)",
            phase,
            self.log.error_count(),
            self.log.warning_count()
        );
        Ok(())
    }

    pub fn define_symbols(&mut self) -> Result<(), Error> {
        self.run(Phase::DefineSymbols, None)
    }

    pub fn layout(&mut self) -> Result<(), Error> {
        self.run(Phase::Layout, None)
    }

    /// Emit the code. Refused when anything so far reported an error, since addresses
    /// would not be reliable.
    pub fn generate(&mut self) -> Result<Output, Error> {
        if self.log.error_count() > 0 {
            return Err(Error::ErrorsReported(self.log.error_count()));
        }
        let mut generator = Generator::new();
        self.run(Phase::Generate, Some(&mut generator))?;
        Ok(generator.finish(&self.sources, self.options.list_width))
    }

    /// Run all three passes. The output is returned even when generation itself reported
    /// errors; check `error_count()`.
    pub fn assemble(&mut self) -> Result<Output, Error> {
        self.define_symbols()?;
        self.layout()?;
        self.generate()
    }

    /// Every numeric symbol which is not a parameterized `EQU` or local to a macro
    /// expansion, sorted by name.
    pub fn symbols(&mut self) -> Vec<(String, Number)> {
        let entries: Vec<_> = self
            .scopes
            .persistent_entries()
            .filter(|(_, entry)| !entry.name.contains('/'))
            .map(|(_, entry)| (entry.name.clone(), entry.symbol))
            .collect();

        let mut scratch = Log::default();
        let mut walker = Walker::new(
            &self.ast,
            &mut self.scopes,
            &mut self.state,
            &mut scratch,
            &self.options,
            Phase::Generate,
            None,
        );
        let mut symbols: Vec<_> = entries
            .into_iter()
            .filter_map(|(name, symbol)| {
                let value = match symbol {
                    Symbol::Label(site) => walker.state.labels.get(&site).copied(),
                    Symbol::Equ(site) => match walker.equ_value(site) {
                        Ok(Value::Number(n)) => Some(n),
                        _ => None,
                    },
                    _ => None,
                };
                value.map(|value| (name, value))
            })
            .collect();
        symbols.sort_by(|(a, _), (b, _)| a.to_lowercase().cmp(&b.to_lowercase()).then(a.cmp(b)));
        symbols
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.log.diagnostics()
    }

    pub fn error_count(&self) -> usize {
        self.log.error_count()
    }

    pub fn warning_count(&self) -> usize {
        self.log.warning_count()
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    /// `file:line:col: severity: message`
    pub fn render_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        let message = diagnostic.message.as_ref();
        match diagnostic.message.loc() {
            Some(loc) if loc.file < self.sources.len() => format!(
                "{}:{}:{}: {}: {}",
                self.sources.name(loc.file),
                loc.line,
                loc.col,
                diagnostic.severity,
                message
            ),
            _ => format!("{}: {}", diagnostic.severity, message),
        }
    }

    pub fn dump(&self) -> String {
        self.ast.dump()
    }
}

/// Assemble a single in-memory source with default options.
pub fn assemble_str(source: &str) -> (Result<Output, Error>, Vec<String>) {
    let mut asm = Assembler::with_loader(Options::default(), Box::new(MemoryLoader::default()));
    let result = asm
        .parse_literal("<input>", source)
        .and_then(|_| asm.assemble());
    let diagnostics = asm
        .diagnostics()
        .iter()
        .map(|d| asm.render_diagnostic(d))
        .collect();
    (result, diagnostics)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn source_lines() {
        let mut sources = SourceMap::default();
        let file = sources.add("a".to_owned(), None, "one\r\ntwo\n\nfour".to_owned());
        assert_eq!(sources.line_count(file), 4);
        assert_eq!(sources.line(file, 1), "one");
        assert_eq!(sources.line(file, 2), "two");
        assert_eq!(sources.line(file, 3), "");
        assert_eq!(sources.line(file, 4), "four");
        assert_eq!(sources.line(file, 5), "");
        assert_eq!(sources.line(file, 0), "");
    }

    #[test]
    fn memory_loader_resolves_literally() {
        let loader = MemoryLoader::default().with_file("x.inc", "nop");
        let path = loader.resolve("x.inc", Some(Path::new("dir/main.asm")));
        assert_eq!(path, Some(PathBuf::from("x.inc")));
        assert_eq!(loader.read(Path::new("x.inc")).unwrap(), b"nop".to_vec());
        assert!(loader.resolve("y.inc", None).is_none());
    }
}
