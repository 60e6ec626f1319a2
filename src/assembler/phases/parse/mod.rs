mod expr;

use super::tokenize::{self, Punct, Token};
use super::types::{Abort, Failure, FileId, Loc, Located, Log};
use crate::assembler::ast::{Ast, BlockKind, Branch, Field, MessageKind, NodeId, Stmt};
use crate::assembler::conductor::{SourceLoader, SourceMap};
use crate::assembler::lang::Lang;
use crate::spec::types::hw::{Number, Radix};
use num_traits::FromPrimitive;
use std::fmt::Display;
use std::path::PathBuf;

pub use expr::parse_number;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Lexical(tokenize::Error),
    UnexpectedToken(String, &'static str),
    MalformedNumber(String),
    Unterminated(&'static str, &'static str),
    UnexpectedTerminator(String),
    ElseIfAfterElse,
    IncludeFailed(String, String),
    RecursiveInclude(String),
    BadRadix(Number),
    BadBitPattern(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Lexical(err) => write!(f, "{}", err),
            Error::UnexpectedToken(tk, msg) => {
                write!(f, "Unexpected token {}: expected {}", tk, msg)
            }
            Error::MalformedNumber(raw) => write!(f, "Malformed number '{}'", raw),
            Error::Unterminated(open, close) => {
                write!(f, "'{}' block is missing its closing '{}'", open, close)
            }
            Error::UnexpectedTerminator(word) => {
                write!(f, "'{}' without a matching opening directive", word)
            }
            Error::ElseIfAfterElse => write!(f, "'ELSEIF' cannot follow 'ELSE'"),
            Error::IncludeFailed(name, reason) => {
                write!(f, "Could not include '{}': {}", name, reason)
            }
            Error::RecursiveInclude(name) => write!(f, "Recursive inclusion of '{}'", name),
            Error::BadRadix(n) => write!(f, "Unsupported radix {} (use 2, 8, 10 or 16)", n),
            Error::BadBitPattern(s) => write!(
                f,
                "Bad bit pattern '{}': expected a string of '0' and '1'",
                s
            ),
        }
    }
}

type Step<T = ()> = Result<T, Failure<Error>>;

const TERMINATORS: [&str; 8] = [
    "ELSEIF", "ELSE", "ENDIF", "ENDM", "ENDP", "ENDS", "ENDB", "ENDPROC",
];

/// State shared by the parser of the root file and the parsers of everything it includes.
pub struct ParseContext<'a> {
    pub ast: &'a mut Ast,
    pub sources: &'a mut SourceMap,
    pub loader: &'a dyn SourceLoader,
    pub log: &'a mut Log,
    pub radix: Radix,
    include_stack: Vec<PathBuf>,
}

impl<'a> ParseContext<'a> {
    pub fn new(
        ast: &'a mut Ast,
        sources: &'a mut SourceMap,
        loader: &'a dyn SourceLoader,
        log: &'a mut Log,
        radix: Radix,
    ) -> Self {
        ParseContext {
            ast,
            sources,
            loader,
            log,
            radix,
            include_stack: Vec::new(),
        }
    }
}

/// Parse one source file into a `File` block. The block is not yet owned; the caller
/// appends it wherever the file was requested.
pub fn parse_file(ctx: &mut ParseContext, file: FileId) -> Result<NodeId, Abort> {
    if let Some(path) = ctx.sources.path(file) {
        ctx.include_stack.push(path.to_owned());
    }
    let tokens = tokenize::tokenize(file, ctx.sources.text(file));
    log::debug!(
        "parsing '{}' ({} tokens)",
        ctx.sources.name(file),
        tokens.len()
    );

    let result = Parser::new(ctx, file, tokens).parse_top();
    if ctx.sources.path(file).is_some() {
        ctx.include_stack.pop();
    }
    result
}

struct Parser<'c, 'a> {
    ctx: &'c mut ParseContext<'a>,
    file: FileId,
    tokens: Vec<Located<Token>>,
    pos: usize,
    ended: bool,
}

static END_OF_LINE: Token = Token::EndOfLine;

impl<'c, 'a> Parser<'c, 'a> {
    fn new(ctx: &'c mut ParseContext<'a>, file: FileId, tokens: Vec<Located<Token>>) -> Self {
        Parser {
            ctx,
            file,
            tokens,
            pos: 0,
            ended: false,
        }
    }

    fn parse_top(&mut self) -> Result<NodeId, Abort> {
        let loc = Loc::new(self.file, 1, 1);
        let (children, term) = self.parse_block(&[])?;
        debug_assert!(term.is_none());
        Ok(self
            .ctx
            .ast
            .add_block(loc, BlockKind::File(self.file), children))
    }

    /* Token stream plumbing */

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .map_or(&END_OF_LINE, Located::as_ref)
    }

    fn loc(&self) -> Loc {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .and_then(Located::loc)
            .unwrap_or_else(|| Loc::new(self.file, 1, 1))
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        token
    }

    fn error<T>(&self, err: Error) -> Step<T> {
        Err(Failure::Error(Located::with_loc(self.loc(), err)))
    }

    fn unexpected<T>(&self, expected: &'static str) -> Step<T> {
        match self.peek() {
            Token::Error(err) => self.error(Error::Lexical(err.clone())),
            tk => self.error(Error::UnexpectedToken(tk.to_string(), expected)),
        }
    }

    fn is_punct(&self, p: Punct) -> bool {
        *self.peek() == Token::Punct(p)
    }

    fn eat(&mut self, p: Punct) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: Punct, expected: &'static str) -> Step {
        if self.eat(p) {
            Ok(())
        } else {
            self.unexpected(expected)
        }
    }

    fn peek_word(&self) -> Option<String> {
        match self.peek() {
            Token::Name(name) => Some(name.to_uppercase()),
            _ => None,
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek_word().map_or(false, |w| w == word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_name(&mut self, expected: &'static str) -> Step<String> {
        match self.peek() {
            Token::Name(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => self.unexpected(expected),
        }
    }

    fn expect_string(&mut self, expected: &'static str) -> Step<String> {
        match self.peek() {
            Token::String(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => self.unexpected(expected),
        }
    }

    fn at_eol(&self) -> bool {
        *self.peek() == Token::EndOfLine
    }

    fn expect_eol(&mut self) -> Step {
        if self.at_eol() {
            self.advance();
            Ok(())
        } else {
            self.unexpected("end of line")
        }
    }

    fn skip_line(&mut self) {
        while !self.at_eof() {
            if self.advance() == Token::EndOfLine {
                break;
            }
        }
    }

    /* Statements */

    /// Parse statements until one of `terminators` opens a line (it is consumed, the rest of
    /// its line is not) or the file ends.
    fn parse_block(
        &mut self,
        terminators: &[&'static str],
    ) -> Result<(Vec<NodeId>, Option<&'static str>), Abort> {
        let mut children = Vec::new();
        loop {
            if self.ended {
                self.pos = self.tokens.len();
            }
            if self.at_eof() {
                return Ok((children, None));
            }
            if self.at_eol() {
                self.advance();
                continue;
            }

            if let Some(word) = self.peek_word() {
                if let Some(term) = terminators.iter().find(|t| **t == word) {
                    self.advance();
                    return Ok((children, Some(term)));
                }
            }

            match self.parse_line(&mut children) {
                Ok(()) => (),
                Err(Failure::Error(err)) => {
                    self.ctx.log.error(err)?;
                    self.skip_line();
                }
                Err(Failure::Abort(abort)) => return Err(abort),
            }
        }
    }

    fn add(&mut self, loc: Loc, stmt: Stmt) -> NodeId {
        self.ctx.ast.add_node(loc, stmt)
    }

    fn parse_line(&mut self, children: &mut Vec<NodeId>) -> Step {
        let loc = self.loc();

        if let Token::Name(name) = self.peek() {
            let name = name.clone();
            let next = self.peek_at(1).clone();

            if next == Token::Punct(Punct::Colon) {
                self.pos += 2;
                children.push(self.add(loc, Stmt::Label(name)));
                if self.at_eol() {
                    return self.expect_eol();
                }
                return self.parse_line(children);
            }

            let keyword = match &next {
                Token::Name(kw) => Some(kw.to_uppercase()),
                _ => None,
            };
            match keyword.as_deref() {
                Some("EQU") => {
                    self.pos += 2;
                    let node = self.parse_equ(loc, name, Vec::new())?;
                    children.push(node);
                    return self.expect_eol();
                }
                Some("MACRO") => {
                    self.pos += 2;
                    let node = self.parse_macro(loc, name)?;
                    children.push(node);
                    return Ok(());
                }
                Some("STRUCT") => {
                    self.pos += 2;
                    let node = self.parse_struct(loc, name)?;
                    children.push(node);
                    return Ok(());
                }
                _ => (),
            }

            if next == Token::Punct(Punct::Eq) {
                self.pos += 2;
                let node = self.parse_equ(loc, name, Vec::new())?;
                children.push(node);
                return self.expect_eol();
            }

            if next == Token::Punct(Punct::LParen) && self.is_parameterized_equ() {
                self.pos += 2;
                let params = self.parse_params(Punct::RParen)?;
                self.advance();
                let node = self.parse_equ(loc, name, params)?;
                children.push(node);
                return self.expect_eol();
            }
        }

        let word = self.expect_name("a directive, instruction or label")?;
        let node = self.parse_statement(loc, word)?;
        if let Some(node) = node {
            children.push(node);
        }
        Ok(())
    }

    /// `name(a, b) EQU ...`
    fn is_parameterized_equ(&self) -> bool {
        let mut n = 2;
        loop {
            match self.peek_at(n) {
                Token::Punct(Punct::RParen) => {
                    return matches!(self.peek_at(n + 1), Token::Name(kw) if kw.eq_ignore_ascii_case("EQU"))
                }
                Token::Name(_) | Token::Punct(Punct::Comma) => n += 1,
                _ => return false,
            }
        }
    }

    fn parse_params(&mut self, close: Punct) -> Step<Vec<String>> {
        let mut params = Vec::new();
        if self.eat(close) {
            return Ok(params);
        }
        loop {
            params.push(self.expect_name("a parameter name")?);
            if self.eat(close) {
                return Ok(params);
            }
            self.expect(Punct::Comma, "',' between parameters")?;
        }
    }

    fn parse_statement(&mut self, loc: Loc, word: String) -> Step<Option<NodeId>> {
        let upper = word.to_uppercase();
        let stmt = match upper.as_str() {
            "ORG" => Stmt::Org(self.parse_expr()?),
            "SEEK" => Stmt::Seek(self.parse_expr()?),
            "END" => {
                self.ended = true;
                return Ok(None);
            }
            "INCLUDE" => {
                let node = self.parse_include()?;
                self.expect_eol()?;
                return Ok(Some(node));
            }
            "INCBIN" => self.parse_incbin()?,
            "DS" | "DEFS" => {
                let count = self.parse_expr()?;
                let fill = if self.eat(Punct::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Stmt::Reserve { count, fill }
            }
            "IF" => return self.parse_if(loc).map(Some),
            "PROC" => {
                self.expect_eol()?;
                let (children, term) = self.parse_block(&["ENDP", "ENDPROC"])?;
                if term.is_none() {
                    return self.error(Error::Unterminated("PROC", "ENDP"));
                }
                self.expect_eol()?;
                return Ok(Some(self.ctx.ast.add_block(loc, BlockKind::Proc, children)));
            }
            "RADIX" => {
                let radix = self.parse_radix()?;
                self.ctx.radix = radix;
                Stmt::Radix(radix)
            }
            "ERROR" => Stmt::Message(MessageKind::Error, self.parse_expr()?),
            "WARNING" => Stmt::Message(MessageKind::Warning, self.parse_expr()?),
            "DEFBITS" => self.parse_defbits()?,
            "BITMAP" => return self.parse_bitmap(loc).map(Some),
            "MACRO" => {
                let name = self.expect_name("a macro name")?;
                return self.parse_macro(loc, name).map(Some);
            }
            "STRUCT" => {
                let name = self.expect_name("a struct name")?;
                return self.parse_struct(loc, name).map(Some);
            }
            _ if TERMINATORS.contains(&upper.as_str()) => {
                return self.error(Error::UnexpectedTerminator(upper))
            }
            _ if Lang::get().is_mnemonic(&word) => Stmt::Instruction {
                mnemonic: upper,
                operands: self.parse_operands()?,
            },
            _ => Stmt::Invoke {
                name: word,
                args: self.parse_invoke_args()?,
            },
        };
        self.expect_eol()?;
        Ok(Some(self.add(loc, stmt)))
    }

    fn parse_equ(&mut self, loc: Loc, name: String, params: Vec<String>) -> Step<NodeId> {
        let value = self.parse_data_list()?;
        Ok(self.add(
            loc,
            Stmt::Equ {
                name,
                params,
                value,
            },
        ))
    }

    fn parse_radix(&mut self) -> Step<Radix> {
        match self.peek().clone() {
            Token::Number(raw) => {
                let base = parse_number(&raw, Radix::Decimal)
                    .or_else(|err| self.error(err))?;
                self.advance();
                Radix::from_i64(base).map_or_else(|| self.error(Error::BadRadix(base)), Ok)
            }
            _ => self.unexpected("a radix (2, 8, 10 or 16)"),
        }
    }

    fn parse_if(&mut self, loc: Loc) -> Step<NodeId> {
        let mut branches = Vec::new();
        let mut cond = Some(self.parse_expr()?);
        self.expect_eol()?;

        loop {
            let branch_loc = self.loc();
            let (children, term) = self.parse_block(&["ELSEIF", "ELSE", "ENDIF"])?;
            let block = self
                .ctx
                .ast
                .add_block(branch_loc, BlockKind::Branch, children);
            let had_else = cond.is_none();
            branches.push(Branch { cond, block });

            match term {
                None => return self.error(Error::Unterminated("IF", "ENDIF")),
                Some("ENDIF") => break,
                Some("ELSEIF") if had_else => return self.error(Error::ElseIfAfterElse),
                Some("ELSEIF") => cond = Some(self.parse_expr()?),
                _ if had_else => return self.error(Error::UnexpectedTerminator("ELSE".to_owned())),
                _ => cond = None,
            }
            self.expect_eol()?;
        }
        self.expect_eol()?;

        let blocks: Vec<NodeId> = branches.iter().map(|b| b.block).collect();
        let node = self.add(loc, Stmt::If(branches));
        for block in blocks {
            self.ctx.ast.adopt(node, block);
        }
        Ok(node)
    }

    fn parse_macro(&mut self, loc: Loc, name: String) -> Step<NodeId> {
        let params = if self.at_eol() {
            Vec::new()
        } else if self.eat(Punct::LParen) {
            self.parse_params(Punct::RParen)?
        } else {
            let mut params = vec![self.expect_name("a parameter name")?];
            while self.eat(Punct::Comma) {
                params.push(self.expect_name("a parameter name")?);
            }
            params
        };
        self.expect_eol()?;

        let body_loc = self.loc();
        let (children, term) = self.parse_block(&["ENDM"])?;
        if term.is_none() {
            return self.error(Error::Unterminated("MACRO", "ENDM"));
        }
        self.expect_eol()?;

        let body = self
            .ctx
            .ast
            .add_block(body_loc, BlockKind::MacroBody, children);
        let node = self.add(loc, Stmt::Macro { name, params, body });
        self.ctx.ast.adopt(node, body);
        Ok(node)
    }

    fn parse_struct(&mut self, loc: Loc, name: String) -> Step<NodeId> {
        self.expect_eol()?;
        let mut fields = Vec::new();
        loop {
            if self.at_eof() {
                return self.error(Error::Unterminated("STRUCT", "ENDS"));
            }
            if self.at_eol() {
                self.advance();
                continue;
            }
            if self.eat_word("ENDS") {
                self.expect_eol()?;
                break;
            }

            match self.parse_field() {
                Ok(field) => fields.push(field),
                Err(Failure::Error(err)) => {
                    self.ctx.log.error(err)?;
                    self.skip_line();
                }
                Err(abort) => return Err(abort),
            }
        }
        Ok(self.add(loc, Stmt::Struct { name, fields }))
    }

    fn parse_field(&mut self) -> Step<Field> {
        let loc = self.loc();
        let name = self.expect_name("a field name")?;
        self.eat(Punct::Colon);
        let type_name = self.expect_name("a field type")?;
        let init = self.parse_data_list()?;
        self.expect_eol()?;
        Ok(Field {
            loc,
            name,
            type_name,
            init,
        })
    }

    fn parse_include(&mut self) -> Step<NodeId> {
        let name = self.expect_string("a file name")?;
        let including = self.ctx.sources.path(self.file).map(|p| p.to_owned());
        let path = match self.ctx.loader.resolve(&name, including.as_deref()) {
            Some(path) => path,
            None => return self.error(Error::IncludeFailed(name, "file not found".to_owned())),
        };
        if self.ctx.include_stack.contains(&path) {
            return self.error(Error::RecursiveInclude(name));
        }
        let text = match self.ctx.loader.read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => return self.error(Error::IncludeFailed(name, err.to_string())),
        };

        log::debug!("including '{}' from {}", name, path.display());
        let file = self.ctx.sources.add(name, Some(path), text);
        Ok(parse_file(self.ctx, file)?)
    }

    fn parse_incbin(&mut self) -> Step<Stmt> {
        let name = self.expect_string("a file name")?;
        let including = self.ctx.sources.path(self.file).map(|p| p.to_owned());
        let data = self
            .ctx
            .loader
            .resolve(&name, including.as_deref())
            .ok_or_else(|| "file not found".to_owned())
            .and_then(|path| self.ctx.loader.read(&path).map_err(|err| err.to_string()));
        match data {
            Ok(data) => Ok(Stmt::Incbin { path: name, data }),
            Err(reason) => self.error(Error::IncludeFailed(name, reason)),
        }
    }

    /// `DEFBITS 'c', "0110"` or `DEFBITS 'c', value, width`
    fn parse_defbits(&mut self) -> Step<Stmt> {
        let character = match self.advance() {
            Token::Char(c) => std::char::from_u32(c as u32),
            Token::String(s) if s.chars().count() == 1 => s.chars().next(),
            _ => None,
        };
        let character = match character {
            Some(c) => c,
            None => return self.unexpected("a single character"),
        };
        self.expect(Punct::Comma, "','")?;

        let bits = match self.advance() {
            Token::String(pattern) => pattern
                .chars()
                .map(|c| match c {
                    '0' => Ok(false),
                    '1' => Ok(true),
                    _ => Err(()),
                })
                .collect::<Result<Vec<_>, _>>()
                .or_else(|()| self.error(Error::BadBitPattern(pattern.clone())))?,
            Token::Number(raw) => {
                let value = parse_number(&raw, self.ctx.radix).or_else(|err| self.error(err))?;
                self.expect(Punct::Comma, "',' and a bit width")?;
                let width = match self.advance() {
                    Token::Number(raw) => {
                        parse_number(&raw, self.ctx.radix).or_else(|err| self.error(err))?
                    }
                    _ => return self.unexpected("a bit width"),
                };
                if !(1..=64).contains(&width) {
                    return self.error(Error::BadBitPattern(format!("{}/{}", value, width)));
                }
                (0..width).rev().map(|bit| (value >> bit) & 1 == 1).collect()
            }
            _ => return self.unexpected("a bit pattern"),
        };
        Ok(Stmt::DefBits { character, bits })
    }

    fn parse_bitmap(&mut self, loc: Loc) -> Step<NodeId> {
        let width = self.parse_expr()?;
        let height = if self.eat(Punct::Comma) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect_eol()?;

        let mut rows = Vec::new();
        loop {
            if self.at_eof() {
                return self.error(Error::Unterminated("BITMAP", "ENDB"));
            }
            if self.at_eol() {
                self.advance();
                continue;
            }
            if self.eat_word("ENDB") {
                self.expect_eol()?;
                break;
            }
            let row_loc = self.loc();
            let row = self.expect_string("a bitmap row")?;
            self.expect_eol()?;
            rows.push((row_loc, row));
        }
        Ok(self.add(
            loc,
            Stmt::Bitmap {
                width,
                height,
                rows,
            },
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assembler::ast::Expr;
    use crate::assembler::conductor::MemoryLoader;

    fn parse(source: &str) -> (Ast, NodeId, Log) {
        let mut ast = Ast::new();
        let mut sources = SourceMap::default();
        let mut log = Log::default();
        let loader = MemoryLoader::default()
            .with_file("inc.asm", "inner: nop\n")
            .with_file("self.asm", "include \"self.asm\"\n")
            .with_file("blob.bin", vec![1u8, 2, 3]);
        let file = sources.add("test.asm".to_owned(), None, source.to_owned());
        let block = {
            let mut ctx = ParseContext::new(&mut ast, &mut sources, &loader, &mut log, Radix::Decimal);
            parse_file(&mut ctx, file).unwrap()
        };
        (ast, block, log)
    }

    fn children(ast: &Ast, block: NodeId) -> Vec<Stmt> {
        match &ast.node(block).stmt {
            Stmt::Block { children, .. } => children
                .iter()
                .map(|c| ast.node(*c).stmt.clone())
                .collect(),
            other => panic!("not a block: {:?}", other),
        }
    }

    #[test]
    fn labels_and_instructions() {
        let (ast, block, log) = parse("start: ld a,5\n  nop\nloop:\n");
        assert_eq!(log.error_count(), 0);
        let stmts = children(&ast, block);
        assert_eq!(stmts.len(), 4);
        assert_eq!(stmts[0], Stmt::Label("start".to_owned()));
        match &stmts[1] {
            Stmt::Instruction { mnemonic, operands } => {
                assert_eq!(mnemonic, "LD");
                assert_eq!(operands.len(), 2);
            }
            other => panic!("{:?}", other),
        }
        assert_eq!(stmts[3], Stmt::Label("loop".to_owned()));
    }

    #[test]
    fn equ_forms() {
        let (ast, block, log) = parse("k equ 1\nj = 2\nf(x, y) equ x + y\n");
        assert_eq!(log.error_count(), 0);
        let stmts = children(&ast, block);
        match &stmts[2] {
            Stmt::Equ { name, params, value } => {
                assert_eq!(name, "f");
                assert_eq!(params, &vec!["x".to_owned(), "y".to_owned()]);
                assert_eq!(ast.show(*value), "(x + y)");
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn unknown_words_become_invocations() {
        let (ast, block, _) = parse("db 1, 2, \"ab\"\nmymacro(1, 2)\n");
        let stmts = children(&ast, block);
        match (&stmts[0], &stmts[1]) {
            (Stmt::Invoke { args: a, .. }, Stmt::Invoke { name, args: b }) => {
                assert_eq!(a.len(), 3);
                assert_eq!(name, "mymacro");
                assert_eq!(b.len(), 2);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn conditional_branches() {
        let (ast, block, log) = parse("if 1\nnop\nelseif 2\nelse\nhalt\nendif\n");
        assert_eq!(log.error_count(), 0);
        match &children(&ast, block)[0] {
            Stmt::If(branches) => {
                assert_eq!(branches.len(), 3);
                assert!(branches[2].cond.is_none());
                assert_eq!(children(&ast, branches[2].block).len(), 1);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn macro_and_struct_definitions() {
        let source = "m macro p, q\n ld a,p\n endm\nPoint struct\n x byte ?\n y: word ?\nends\n";
        let (ast, block, log) = parse(source);
        assert_eq!(log.error_count(), 0);
        let stmts = children(&ast, block);
        match &stmts[0] {
            Stmt::Macro { params, body, .. } => {
                assert_eq!(params.len(), 2);
                assert_eq!(children(&ast, *body).len(), 1);
            }
            other => panic!("{:?}", other),
        }
        match &stmts[1] {
            Stmt::Struct { fields, .. } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[1].type_name, "word");
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn errors_resynchronise_at_end_of_line() {
        let (ast, block, log) = parse("ld a,)\nnop\nendif\n");
        assert_eq!(log.error_count(), 2);
        assert_eq!(children(&ast, block).len(), 1);
    }

    #[test]
    fn unterminated_blocks() {
        let (_, _, log) = parse("if 1\nnop\n");
        assert_eq!(log.error_count(), 1);
    }

    #[test]
    fn radix_applies_to_later_literals() {
        let (ast, block, _) = parse("radix 16\nds 10\n");
        match &children(&ast, block)[1] {
            Stmt::Reserve { count, .. } => assert_eq!(ast.expr(*count), &Expr::Number(16)),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn includes_and_incbin() {
        let (ast, block, log) = parse("include \"inc.asm\"\nincbin \"blob.bin\"\n");
        assert_eq!(log.error_count(), 0);
        let stmts = children(&ast, block);
        assert!(matches!(stmts[0], Stmt::Block { kind: BlockKind::File(_), .. }));
        assert_eq!(
            stmts[1],
            Stmt::Incbin {
                path: "blob.bin".to_owned(),
                data: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn recursive_include_is_rejected() {
        let (_, _, log) = parse("include \"self.asm\"\n");
        assert_eq!(log.error_count(), 1);
        assert!(log.diagnostics()[0]
            .message
            .as_ref()
            .contains("Recursive inclusion"));
    }

    #[test]
    fn end_stops_the_file() {
        let (ast, block, _) = parse("nop\nend\nthis is not parsed\n");
        assert_eq!(children(&ast, block).len(), 1);
    }

    #[test]
    fn defbits_and_bitmap() {
        let (ast, block, log) =
            parse("defbits '#', \"1\"\ndefbits '.', 0, 1\nbitmap 8\n \"#.#.#.#.\"\nendb\n");
        assert_eq!(log.error_count(), 0);
        let stmts = children(&ast, block);
        assert_eq!(
            stmts[1],
            Stmt::DefBits {
                character: '.',
                bits: vec![false]
            }
        );
        assert!(matches!(&stmts[2], Stmt::Bitmap { rows, .. } if rows.len() == 1));
    }
}
