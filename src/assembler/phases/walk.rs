use super::types::{Abort, Failure, Loc, Located, Log, Severity};
use crate::assembler::ast::{Ast, BlockKind, Branch, ExprId, NodeId, Stmt};
use crate::assembler::conductor::Options;
use crate::assembler::data::{StructLayout, TypeRef};
use crate::assembler::model::{self, Instruction};
use crate::assembler::output::{Cursor, Generator, Position};
use crate::assembler::scope::{self, ScopeId, Scopes, Site};
use crate::spec::types::hw::{Byte, Number};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UndefinedSymbol(String),
    WrongArity(String, usize),
    TypeMismatch(String, &'static str),
    Reserved(String),
    Scope(scope::Error),
    RecursiveMacro(String),
    RecursiveEqu(String),
    RecursiveStruct(String),
    DivisionByZero,
    PositionUnavailable(&'static str),
    NotYetResolved(String),
    UnknownField(String, String),
    DuplicateField(String),
    FieldCount(usize, usize),
    TooManyElements(String, usize, usize),
    FieldInitializer(String),
    ValueOutOfRange(Number, &'static str),
    UnknownInvocation(String),
    InvalidInstruction(String),
    Encoding(model::Error),
    User(String),
    UserWarning(String),
    BadBitmap(String),
    UndefinedBits(char),
    AddressOutOfRange(Number),
}

impl Error {
    pub fn severity(&self) -> Severity {
        match self {
            Error::InvalidInstruction(_) | Error::UserWarning(_) => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UndefinedSymbol(name) => write!(f, "Undefined symbol '{}'", name),
            Error::WrongArity(name, n) => {
                write!(f, "'{}' does not take {} argument(s)", name, n)
            }
            Error::TypeMismatch(what, expected) => {
                write!(f, "Type mismatch: {} where {} was expected", what, expected)
            }
            Error::Reserved(name) => write!(
                f,
                "'{}' is a register or instruction name and cannot be defined",
                name
            ),
            Error::Scope(err) => write!(f, "{}", err),
            Error::RecursiveMacro(name) => write!(f, "Recursive invocation of macro '{}'", name),
            Error::RecursiveEqu(name) => write!(f, "'{}' is defined in terms of itself", name),
            Error::RecursiveStruct(name) => write!(f, "Struct '{}' contains itself", name),
            Error::DivisionByZero => write!(f, "Division by zero"),
            Error::PositionUnavailable(what) => {
                write!(f, "'{}' is not available at this point", what)
            }
            Error::NotYetResolved(name) => {
                write!(f, "The value of '{}' is not known yet", name)
            }
            Error::UnknownField(ty, field) => {
                write!(f, "'{}' has no field named '{}'", ty, field)
            }
            Error::DuplicateField(field) => write!(f, "Duplicate field '{}'", field),
            Error::FieldCount(expected, given) => write!(
                f,
                "Struct has {} field(s), but {} value(s) were given",
                expected, given
            ),
            Error::TooManyElements(field, expected, given) => write!(
                f,
                "Field '{}' holds {} element(s), but {} were given",
                field, expected, given
            ),
            Error::FieldInitializer(field) => write!(
                f,
                "The declaration of field '{}' may only contain '?'",
                field
            ),
            Error::ValueOutOfRange(n, what) => write!(f, "Value {} is out of range for {}", n, what),
            Error::UnknownInvocation(name) => {
                write!(f, "'{}' is not an instruction, macro or data type", name)
            }
            Error::InvalidInstruction(pattern) => write!(f, "Invalid instruction '{}'", pattern),
            Error::Encoding(err) => write!(f, "{}", err),
            Error::User(msg) | Error::UserWarning(msg) => write!(f, "{}", msg),
            Error::BadBitmap(msg) => write!(f, "Bad bitmap: {}", msg),
            Error::UndefinedBits(c) => write!(f, "No DEFBITS pattern for character '{}'", c),
            Error::AddressOutOfRange(ip) => write!(
                f,
                "Address {:#X} is outside of the address space (further overflows are not reported)",
                ip
            ),
        }
    }
}

impl From<scope::Error> for Error {
    fn from(err: scope::Error) -> Self {
        Error::Scope(err)
    }
}

pub type Step<T = ()> = Result<T, Failure<Error>>;

pub fn fail<T>(loc: Loc, err: Error) -> Step<T> {
    Err(Failure::Error(Located::with_loc(loc, err)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    DefineSymbols,
    Layout,
    Generate,
}

#[derive(Debug, Clone, Copy)]
pub enum Invocation {
    Data(TypeRef),
    Macro { body: NodeId, scope: ScopeId },
}

/// Everything the passes work out about statements, keyed by the site they were visited at.
#[derive(Debug, Default)]
pub struct State {
    /// Label addresses, each set exactly once during layout.
    pub labels: HashMap<Site, Number>,
    /// The branch of each `IF` taken, frozen when the condition was first evaluated.
    pub branches: HashMap<Site, Option<usize>>,
    pub invocations: HashMap<Site, Invocation>,
    /// Where each `EQU` was defined, which is what `$` means inside its value.
    pub equ_positions: HashMap<Site, Position>,
    pub proc_scopes: HashMap<Site, ScopeId>,
    pub structs: HashMap<Site, Rc<StructLayout>>,
    pub instructions: HashMap<Site, Option<&'static Instruction>>,
    /// Bytes laid out for data and `DS` statements, padded to if generating them fails.
    pub reserved: HashMap<Site, usize>,
    pub active_macros: HashSet<NodeId>,
    /// `EQU`s being evaluated, with the expression that referenced each one.
    pub active_equs: HashSet<(Site, ExprId)>,
    pub active_structs: HashSet<Site>,
    pub overflow_reported: bool,
}

/// The context threaded through one pass over the tree.
pub struct Walker<'a> {
    pub(crate) ast: &'a Ast,
    pub(crate) scopes: &'a mut Scopes,
    pub(crate) state: &'a mut State,
    pub(crate) log: &'a mut Log,
    pub(crate) options: &'a Options,
    pub(crate) phase: Phase,
    pub(crate) cursor: Cursor,
    generator: Option<&'a mut Generator>,
    overrides: Vec<Option<Position>>,
    macro_depth: usize,
    statement_start: Position,
}

impl<'a> Walker<'a> {
    pub fn new(
        ast: &'a Ast,
        scopes: &'a mut Scopes,
        state: &'a mut State,
        log: &'a mut Log,
        options: &'a Options,
        phase: Phase,
        generator: Option<&'a mut Generator>,
    ) -> Self {
        let cursor = Cursor::default();
        Walker {
            ast,
            scopes,
            state,
            log,
            options,
            phase,
            statement_start: cursor.position(),
            cursor,
            generator,
            overrides: Vec::new(),
            macro_depth: 0,
        }
    }

    /// Visit a block and everything in it. Errors of individual statements are logged and
    /// do not stop the walk.
    pub fn walk(&mut self, block: NodeId, scope: ScopeId) -> Result<(), Abort> {
        match self.visit(block, scope) {
            Ok(()) => Ok(()),
            Err(Failure::Error(err)) => self.report(err),
            Err(Failure::Abort(abort)) => Err(abort),
        }
    }

    fn report(&mut self, err: Located<Error>) -> Result<(), Abort> {
        let severity = err.as_ref().severity();
        self.log.report(severity, err)
    }

    pub(crate) fn visit(&mut self, id: NodeId, scope: ScopeId) -> Step {
        let ast = self.ast;
        let node = ast.node(id);
        let site = Site::new(id, scope);

        let result = match &node.stmt {
            Stmt::Block { kind, children } => {
                let inner = self.block_scope(site, *kind);
                for child in children {
                    self.walk(*child, inner)?;
                }
                Ok(())
            }
            Stmt::If(branches) => match self.taken_branch(site, branches)? {
                Some(idx) => self.visit(branches[idx].block, scope),
                None => Ok(()),
            },
            _ => {
                self.statement_start = self.cursor.position();
                match self.phase {
                    Phase::DefineSymbols => self.define_statement(site),
                    Phase::Layout => self.layout_statement(site),
                    Phase::Generate => {
                        self.begin_listing(node.loc);
                        self.generate_statement(site)
                    }
                }
            }
        };

        result.map_err(|failure| match failure {
            Failure::Error(err) => Failure::Error(err.proximate_to_loc(node.loc)),
            abort => abort,
        })
    }

    fn block_scope(&mut self, site: Site, kind: BlockKind) -> ScopeId {
        match kind {
            BlockKind::Proc => {
                let scopes = &mut *self.scopes;
                *self
                    .state
                    .proc_scopes
                    .entry(site)
                    .or_insert_with(|| scopes.create(site.scope, false))
            }
            _ => site.scope,
        }
    }

    fn taken_branch(&mut self, site: Site, branches: &[Branch]) -> Step<Option<usize>> {
        if self.phase != Phase::DefineSymbols {
            return Ok(self.state.branches.get(&site).copied().flatten());
        }
        if let Some(taken) = self.state.branches.get(&site) {
            return Ok(*taken);
        }

        // A failed condition freezes the whole statement as not taken.
        self.state.branches.insert(site, None);
        for (idx, branch) in branches.iter().enumerate() {
            let taken = match branch.cond {
                Some(cond) => self.eval_number(cond, site.scope)? != 0,
                None => true,
            };
            if taken {
                self.state.branches.insert(site, Some(idx));
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }

    /// Run `f` in another phase, e.g. the symbol definition pass of a macro body which is
    /// being expanded during layout.
    pub(crate) fn with_phase<T>(&mut self, phase: Phase, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = self.phase;
        self.phase = phase;
        let result = f(self);
        self.phase = saved;
        result
    }

    pub(crate) fn with_override<T>(
        &mut self,
        position: Option<Position>,
        f: impl FnOnce(&mut Self) -> Step<T>,
    ) -> Step<T> {
        self.overrides.push(position);
        let result = f(self);
        self.overrides.pop();
        result
    }

    pub(crate) fn in_macro<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.macro_depth += 1;
        let result = f(self);
        self.macro_depth -= 1;
        result
    }

    /// The position `$` and `$ofs` refer to.
    pub(crate) fn position(&self, what: &'static str) -> Result<Position, Error> {
        match self.overrides.last() {
            Some(Some(position)) => Ok(*position),
            Some(None) => Err(Error::PositionUnavailable(what)),
            None if self.phase == Phase::DefineSymbols => Err(Error::PositionUnavailable(what)),
            None => Ok(self.statement_start),
        }
    }

    pub(crate) fn statement_start(&self) -> Position {
        self.statement_start
    }

    fn begin_listing(&mut self, loc: Loc) {
        if self.macro_depth > 0 && !self.options.list_macros {
            return;
        }
        let ip = self.cursor.ip;
        if let Some(generator) = self.generator.as_deref_mut() {
            generator.listing.begin(loc, ip);
        }
    }

    fn check_range(&mut self, n: usize, loc: Loc) -> Result<(), Abort> {
        if n == 0 || self.cursor.in_range(n) || self.state.overflow_reported {
            return Ok(());
        }
        self.state.overflow_reported = true;
        let last = self.cursor.ip + n as Number - 1;
        self.log
            .error(Located::with_loc(loc, Error::AddressOutOfRange(last)))
    }

    /// Advance over `n` bytes without writing them.
    pub(crate) fn reserve(&mut self, n: usize, loc: Loc) -> Result<(), Abort> {
        self.check_range(n, loc)?;
        self.cursor.advance(n);
        Ok(())
    }

    /// Write bytes at the cursor during generation, or just reserve them otherwise.
    pub(crate) fn emit(
        &mut self,
        bytes: impl IntoIterator<Item = Option<Byte>>,
        loc: Loc,
    ) -> Result<(), Abort> {
        if self.phase != Phase::Generate || self.generator.is_none() {
            let n = bytes.into_iter().count();
            return self.reserve(n, loc);
        }

        for value in bytes {
            if !self.cursor.in_range(1) && !self.state.overflow_reported {
                self.state.overflow_reported = true;
                self.log.error(Located::with_loc(
                    loc,
                    Error::AddressOutOfRange(self.cursor.ip),
                ))?;
            }
            if let Some(generator) = self.generator.as_deref_mut() {
                generator
                    .write(&mut self.cursor, value, loc.file)
                    .map_err(|ip| {
                        Abort::OutputOverwrite(Located::with_loc(
                            loc,
                            format!("Output at address {:#06X} has already been written", ip),
                        ))
                    })?;
            }
        }
        Ok(())
    }

    pub(crate) fn expr_loc(&self, expr: ExprId) -> Loc {
        self.ast.expr_loc(expr)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_instructions_are_warnings() {
        assert_eq!(
            Error::InvalidInstruction("LD A,HL".to_owned()).severity(),
            Severity::Warning
        );
        assert_eq!(Error::DivisionByZero.severity(), Severity::Error);
    }

    #[test]
    fn position_depends_on_phase_and_overrides() {
        let ast = Ast::new();
        let mut scopes = Scopes::new();
        let mut state = State::default();
        let mut log = Log::default();
        let options = Options::default();
        let mut walker = Walker::new(
            &ast,
            &mut scopes,
            &mut state,
            &mut log,
            &options,
            Phase::DefineSymbols,
            None,
        );
        assert_eq!(walker.position("$"), Err(Error::PositionUnavailable("$")));

        walker.phase = Phase::Layout;
        walker.cursor.org(0x20);
        walker.statement_start = walker.cursor.position();
        assert_eq!(walker.position("$").map(|p| p.ip), Ok(0x20));

        let fixed = Position { ip: 7, op: 7 };
        let inner = walker.with_override(Some(fixed), |w| Ok(w.position("$")));
        assert_eq!(inner.ok(), Some(Ok(fixed)));
        let missing = walker.with_override(None, |w| Ok(w.position("$")));
        assert_eq!(missing.ok(), Some(Err(Error::PositionUnavailable("$"))));
        assert_eq!(walker.position("$").map(|p| p.ip), Ok(0x20));
    }
}
