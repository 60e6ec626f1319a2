use derive_more::Constructor;
use std::fmt::Display;

/// Index of a source file in the assembler's `SourceMap`.
pub type FileId = usize;

#[derive(Debug, PartialEq, Clone, Copy, Eq, Hash, Constructor)]
pub struct Loc {
    pub file: FileId,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Located<T: Sized> {
    loc: Option<Loc>,
    val: T,
}

impl Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(line: {}, col: {})", self.line, self.col)
    }
}

impl<T: Display> Display for Located<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.loc {
            None => write!(f, "@<unknown location>: {}", self.val),
            Some(loc) => write!(f, "@{}: {}", loc, self.val),
        }
    }
}

impl<T> Located<T> {
    fn new(loc: Option<Loc>, val: T) -> Self {
        Located { loc, val }
    }

    pub fn with_loc(loc: Loc, val: T) -> Self {
        Located::new(Some(loc), val)
    }

    pub fn loc(&self) -> Option<Loc> {
        self.loc
    }

    pub fn value(self) -> T {
        self.val
    }

    pub fn as_ref(&self) -> &T {
        &self.val
    }

    pub fn proximate_to_option_loc(self, loc: Option<Loc>) -> Self {
        match self.loc {
            None => Self { loc, ..self },
            Some(_) => self,
        }
    }

    pub fn proximate_to_loc(self, loc: Loc) -> Self {
        self.proximate_to_option_loc(Some(loc))
    }

    pub fn map<S, F>(self, f: F) -> Located<S>
    where
        F: FnOnce(T) -> S,
    {
        Located::new(self.loc, f(self.val))
    }
}

impl<T> From<T> for Located<T> {
    fn from(val: T) -> Self {
        Located { loc: None, val }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: Located<String>,
}

/// Stops a whole pass. Everything else is recorded in the `Log` and the pass moves on to
/// the next statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Abort {
    TooManyErrors(usize),
    OutputOverwrite(Located<String>),
}

impl Display for Abort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Abort::TooManyErrors(n) => write!(f, "Too many errors ({}), giving up", n),
            Abort::OutputOverwrite(msg) => write!(f, "{}", msg),
        }
    }
}

/// The outcome of one statement: either a located error, which the enclosing block records
/// before moving on, or an `Abort`, which unwinds the whole phase.
#[derive(Debug)]
pub enum Failure<E> {
    Error(Located<E>),
    Abort(Abort),
}

impl<E> From<Located<E>> for Failure<E> {
    fn from(err: Located<E>) -> Self {
        Failure::Error(err)
    }
}

impl<E> From<Abort> for Failure<E> {
    fn from(abort: Abort) -> Self {
        Failure::Abort(abort)
    }
}

pub const MAX_ERRORS: usize = 100;

#[derive(Debug)]
pub struct Log {
    diagnostics: Vec<Diagnostic>,
    errors: usize,
    warnings: usize,
    max_errors: usize,
}

impl Default for Log {
    fn default() -> Self {
        Log::new(MAX_ERRORS)
    }
}

impl Log {
    pub fn new(max_errors: usize) -> Self {
        Log {
            diagnostics: Vec::new(),
            errors: 0,
            warnings: 0,
            max_errors,
        }
    }

    pub fn report<E: Display>(
        &mut self,
        severity: Severity,
        err: Located<E>,
    ) -> Result<(), Abort> {
        let message = err.map(|e| e.to_string());
        match severity {
            Severity::Error => {
                log::debug!("error {}", message);
                self.errors += 1
            }
            Severity::Warning => self.warnings += 1,
            Severity::Info => (),
        }
        self.diagnostics.push(Diagnostic::new(severity, message));

        if self.errors > self.max_errors {
            Err(Abort::TooManyErrors(self.errors))
        } else {
            Ok(())
        }
    }

    pub fn error<E: Display>(&mut self, err: Located<E>) -> Result<(), Abort> {
        self.report(Severity::Error, err)
    }

    pub fn warning<E: Display>(&mut self, warn: Located<E>) -> Result<(), Abort> {
        self.report(Severity::Warning, warn)
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn located_keeps_the_innermost_location() {
        let inner = Located::with_loc(Loc::new(0, 3, 4), "x");
        let moved = inner.proximate_to_loc(Loc::new(0, 9, 9));
        assert_eq!(moved.loc(), Some(Loc::new(0, 3, 4)));

        let bare: Located<&str> = "y".into();
        assert_eq!(bare.proximate_to_loc(Loc::new(0, 1, 1)).loc(), Some(Loc::new(0, 1, 1)));
    }

    #[test]
    fn log_aborts_past_the_error_limit() {
        let mut log = Log::new(2);
        assert!(log.error(Located::from("a")).is_ok());
        assert!(log.warning(Located::from("w")).is_ok());
        assert!(log.error(Located::from("b")).is_ok());
        assert_eq!(
            log.error(Located::from("c")),
            Err(Abort::TooManyErrors(3))
        );
        assert_eq!(log.error_count(), 3);
        assert_eq!(log.warning_count(), 1);
    }
}
