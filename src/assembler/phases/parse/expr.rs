use super::{Error, Parser, Step};
use crate::assembler::ast::{BinaryOp, Expr, ExprId, UnaryOp};
use crate::assembler::lang::Lang;
use crate::assembler::phases::tokenize::{Punct, Token};
use crate::spec::types::hw::{Number, Radix, Register};

/// Convert the raw spelling of a number. Explicit prefixes and suffixes win over `radix`.
pub fn parse_number(raw: &str, radix: Radix) -> Result<Number, Error> {
    let lower = raw.to_ascii_lowercase();
    let base = radix.base();
    let (digits, base) = if let Some(hex) = lower.strip_prefix("0x") {
        (hex, 16)
    } else if let Some(hex) = lower.strip_prefix('$') {
        (hex, 16)
    } else if let Some(hex) = lower.strip_suffix('h') {
        (hex, 16)
    } else if base < 16 && lower.starts_with("0b") && lower.len() > 2 {
        (&lower[2..], 2)
    } else if base <= 10 && lower.ends_with('b') {
        (&lower[..lower.len() - 1], 2)
    } else if let Some(oct) = lower
        .strip_suffix('o')
        .or_else(|| lower.strip_suffix('q'))
    {
        (oct, 8)
    } else if base <= 10 && lower.ends_with('d') {
        (&lower[..lower.len() - 1], 10)
    } else {
        (lower.as_str(), base)
    };

    if digits.is_empty() {
        return Err(Error::MalformedNumber(raw.to_owned()));
    }
    Number::from_str_radix(digits, base).map_err(|_| Error::MalformedNumber(raw.to_owned()))
}

type Level<'c, 'a> = fn(&mut Parser<'c, 'a>) -> Step<ExprId>;

impl<'c, 'a> Parser<'c, 'a> {
    fn add_expr(&mut self, loc: crate::assembler::phases::types::Loc, expr: Expr) -> ExprId {
        self.ctx.ast.add_expr(loc, expr)
    }

    fn is_dup(&self) -> bool {
        matches!(self.peek(), Token::Name(name) if name.eq_ignore_ascii_case("DUP"))
    }

    /// The top of the grammar: a ternary, optionally repeated with `DUP`.
    pub(super) fn parse_expr(&mut self) -> Step<ExprId> {
        let loc = self.loc();
        let expr = self.parse_ternary()?;
        if self.is_dup() {
            self.advance();
            let value = self.parse_expr()?;
            return Ok(self.add_expr(loc, Expr::Dup { count: expr, value }));
        }
        Ok(expr)
    }

    /// Comma separated items. A single item is returned as is.
    pub(super) fn parse_data_list(&mut self) -> Step<ExprId> {
        let loc = self.loc();
        let mut items = vec![self.parse_expr()?];
        while self.eat(Punct::Comma) {
            items.push(self.parse_expr()?);
        }
        if items.len() == 1 {
            Ok(items[0])
        } else {
            Ok(self.add_expr(loc, Expr::Concat(items)))
        }
    }

    fn parse_list(&mut self, close: Punct) -> Step<Vec<ExprId>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(Punct::Comma, "',' or the end of the list")?;
        }
    }

    /// Arguments of a macro invocation or data declaration, either `name a, b` or
    /// `name(a, b)` when the parentheses span the rest of the line.
    pub(super) fn parse_invoke_args(&mut self) -> Step<Vec<ExprId>> {
        if self.at_eol() {
            return Ok(Vec::new());
        }

        if self.is_punct(Punct::LParen) {
            let save = self.pos;
            self.advance();
            if let Ok(args) = self.parse_list(Punct::RParen) {
                if self.at_eol() {
                    return Ok(args);
                }
            }
            self.pos = save;
        }

        let mut args = vec![self.parse_expr()?];
        while self.eat(Punct::Comma) {
            args.push(self.parse_expr()?);
        }
        Ok(args)
    }

    pub(super) fn parse_operands(&mut self) -> Step<Vec<ExprId>> {
        let mut operands = Vec::new();
        if self.at_eol() {
            return Ok(operands);
        }
        loop {
            operands.push(self.parse_operand()?);
            if !self.eat(Punct::Comma) {
                return Ok(operands);
            }
        }
    }

    fn parse_operand(&mut self) -> Step<ExprId> {
        let loc = self.loc();

        if let Token::Name(name) = self.peek() {
            let ends_operand = matches!(
                self.peek_at(1),
                Token::EndOfLine | Token::Punct(Punct::Comma)
            );
            if Lang::is_sub_op(name) && !ends_operand {
                let mnemonic = Lang::sanitize_name(name);
                self.advance();
                let operands = self.parse_operands()?;
                return Ok(self.add_expr(loc, Expr::SubOp { mnemonic, operands }));
            }
        }

        // `(...)` spanning the whole operand is a memory reference, anything else is an
        // ordinary parenthesised expression.
        if self.is_punct(Punct::LParen) {
            let save = self.pos;
            self.advance();
            if let Ok(inner) = self.parse_expr() {
                if self.eat(Punct::RParen)
                    && matches!(self.peek(), Token::EndOfLine | Token::Punct(Punct::Comma))
                {
                    return Ok(self.add_expr(loc, Expr::Deref(inner)));
                }
            }
            self.pos = save;
        }

        self.parse_expr()
    }

    fn parse_ternary(&mut self) -> Step<ExprId> {
        let loc = self.loc();
        let cond = self.parse_logical_or()?;
        if self.eat(Punct::Question) {
            let then = self.parse_ternary()?;
            self.expect(Punct::Colon, "':' in a conditional expression")?;
            let otherwise = self.parse_ternary()?;
            return Ok(self.add_expr(loc, Expr::Ternary(cond, then, otherwise)));
        }
        Ok(cond)
    }

    fn parse_binary(&mut self, ops: &[(Punct, BinaryOp)], next: Level<'c, 'a>) -> Step<ExprId> {
        let loc = self.loc();
        let mut lhs = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat(*punct) {
                    let rhs = next(self)?;
                    lhs = self.add_expr(loc, Expr::Binary(*op, lhs, rhs));
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_logical_or(&mut self) -> Step<ExprId> {
        self.parse_binary(
            &[(Punct::PipePipe, BinaryOp::LogicalOr)],
            Self::parse_logical_and,
        )
    }

    fn parse_logical_and(&mut self) -> Step<ExprId> {
        self.parse_binary(&[(Punct::AmpAmp, BinaryOp::LogicalAnd)], Self::parse_bit_or)
    }

    fn parse_bit_or(&mut self) -> Step<ExprId> {
        self.parse_binary(&[(Punct::Pipe, BinaryOp::Or)], Self::parse_bit_xor)
    }

    fn parse_bit_xor(&mut self) -> Step<ExprId> {
        self.parse_binary(&[(Punct::Caret, BinaryOp::Xor)], Self::parse_bit_and)
    }

    fn parse_bit_and(&mut self) -> Step<ExprId> {
        self.parse_binary(&[(Punct::Amp, BinaryOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Step<ExprId> {
        self.parse_binary(
            &[
                (Punct::EqEq, BinaryOp::Eq),
                (Punct::Eq, BinaryOp::Eq),
                (Punct::Ne, BinaryOp::Ne),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Step<ExprId> {
        self.parse_binary(
            &[
                (Punct::Le, BinaryOp::Le),
                (Punct::Ge, BinaryOp::Ge),
                (Punct::Lt, BinaryOp::Lt),
                (Punct::Gt, BinaryOp::Gt),
            ],
            Self::parse_dup,
        )
    }

    fn parse_dup(&mut self) -> Step<ExprId> {
        let loc = self.loc();
        let count = self.parse_shift()?;
        if self.is_dup() {
            self.advance();
            let value = self.parse_shift()?;
            return Ok(self.add_expr(loc, Expr::Dup { count, value }));
        }
        Ok(count)
    }

    fn parse_shift(&mut self) -> Step<ExprId> {
        self.parse_binary(
            &[(Punct::Shl, BinaryOp::Shl), (Punct::Shr, BinaryOp::Shr)],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Step<ExprId> {
        self.parse_binary(
            &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Step<ExprId> {
        self.parse_binary(
            &[
                (Punct::Star, BinaryOp::Mul),
                (Punct::Slash, BinaryOp::Div),
                (Punct::Percent, BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Step<ExprId> {
        let loc = self.loc();
        let op = match self.peek() {
            Token::Punct(Punct::Minus) => UnaryOp::Neg,
            Token::Punct(Punct::Tilde) => UnaryOp::Not,
            Token::Punct(Punct::Bang) => UnaryOp::LogicalNot,
            Token::Punct(Punct::Plus) => {
                self.advance();
                return self.parse_unary();
            }
            _ => return self.parse_primary(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(self.add_expr(loc, Expr::Unary(op, operand)))
    }

    fn parse_primary(&mut self) -> Step<ExprId> {
        let loc = self.loc();
        let expr = match self.peek().clone() {
            Token::Number(raw) => {
                Expr::Number(parse_number(&raw, self.ctx.radix).or_else(|err| self.error(err))?)
            }
            Token::Char(c) => Expr::Number(c),
            Token::String(s) => Expr::Str(s),
            Token::Dollar => Expr::Ip,
            Token::DollarOfs => Expr::Op,
            Token::Punct(Punct::Question) => Expr::Uninit,
            Token::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Punct::RParen, "')'")?;
                return Ok(inner);
            }
            Token::Punct(Punct::LBracket) => {
                self.advance();
                let items = self.parse_list(Punct::RBracket)?;
                return Ok(self.add_expr(loc, Expr::Array(items)));
            }
            Token::Punct(Punct::LBrace) => {
                self.advance();
                return self.parse_map(loc);
            }
            Token::Name(name) => {
                self.advance();
                return self.parse_name(loc, name);
            }
            _ => return self.unexpected("an expression"),
        };
        self.advance();
        Ok(self.add_expr(loc, expr))
    }

    fn parse_map(&mut self, loc: crate::assembler::phases::types::Loc) -> Step<ExprId> {
        let mut pairs = Vec::new();
        if !self.eat(Punct::RBrace) {
            loop {
                let key = self.expect_name("a field name")?;
                self.expect(Punct::Colon, "':' after the field name")?;
                pairs.push((key, self.parse_expr()?));
                if self.eat(Punct::RBrace) {
                    break;
                }
                self.expect(Punct::Comma, "',' or '}'")?;
            }
        }
        Ok(self.add_expr(loc, Expr::Map(pairs)))
    }

    fn parse_name(&mut self, loc: crate::assembler::phases::types::Loc, name: String) -> Step<ExprId> {
        let upper = name.to_uppercase();
        let called = self.is_punct(Punct::LParen);

        let expr = match upper.as_str() {
            "DEFINED" if called => {
                self.advance();
                let target = self.expect_name("a symbol name")?;
                self.expect(Punct::RParen, "')'")?;
                Expr::Defined(target)
            }
            "SIZEOF" if called => {
                self.advance();
                let target = self.parse_expr()?;
                self.expect(Punct::RParen, "')'")?;
                Expr::SizeOf(target)
            }
            _ => match Register::lookup(&name) {
                Some(reg) => Expr::Register(reg),
                None if called => {
                    self.advance();
                    Expr::Ident {
                        name,
                        args: Some(self.parse_list(Punct::RParen)?),
                    }
                }
                None => Expr::Ident { name, args: None },
            },
        };
        Ok(self.add_expr(loc, expr))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assembler::ast::Ast;
    use crate::assembler::conductor::{MemoryLoader, SourceMap};
    use crate::assembler::phases::parse::ParseContext;
    use crate::assembler::phases::tokenize::tokenize;
    use crate::assembler::phases::types::Log;

    fn with_parser<T>(source: &str, f: impl FnOnce(&mut Parser) -> T) -> (Ast, T) {
        let mut ast = Ast::new();
        let mut sources = SourceMap::default();
        let mut log = Log::default();
        let loader = MemoryLoader::default();
        let result = {
            let mut ctx =
                ParseContext::new(&mut ast, &mut sources, &loader, &mut log, Radix::Decimal);
            let mut parser = Parser::new(&mut ctx, 0, tokenize(0, source));
            f(&mut parser)
        };
        (ast, result)
    }

    fn show_expr(source: &str) -> String {
        let (ast, id) = with_parser(source, |p| p.parse_expr().ok());
        ast.show(id.expect("expression should parse"))
    }

    fn show_operands(source: &str) -> Vec<String> {
        let (ast, ids) = with_parser(source, |p| p.parse_operands().ok());
        ids.expect("operands should parse")
            .into_iter()
            .map(|id| ast.show(id))
            .collect()
    }

    #[test]
    fn numbers_in_every_spelling() {
        let dec = Radix::Decimal;
        assert_eq!(parse_number("0x1F", dec), Ok(0x1F));
        assert_eq!(parse_number("$ff", dec), Ok(0xFF));
        assert_eq!(parse_number("0FFh", dec), Ok(0xFF));
        assert_eq!(parse_number("0b101", dec), Ok(5));
        assert_eq!(parse_number("101b", dec), Ok(5));
        assert_eq!(parse_number("17o", dec), Ok(15));
        assert_eq!(parse_number("42", dec), Ok(42));
        assert_eq!(parse_number("101b", Radix::Hex), Ok(0x101B));
        assert_eq!(parse_number("10", Radix::Octal), Ok(8));
        assert_eq!(
            parse_number("12z", dec),
            Err(Error::MalformedNumber("12z".to_owned()))
        );
    }

    #[test]
    fn precedence() {
        assert_eq!(show_expr("1 + 2 * 3"), "(1 + (2 * 3))");
        assert_eq!(show_expr("1 << 2 + 3"), "(1 << (2 + 3))");
        assert_eq!(show_expr("1 | 2 & 3 == 3"), "(1 | (2 & (3 == 3)))");
        assert_eq!(show_expr("p1 && p2 || p3"), "((p1 && p2) || p3)");
        assert_eq!(show_expr("-x * ~y"), "(-x * ~y)");
        assert_eq!(show_expr("c1 ? 1 : c2 ? 2 : 3"), "(c1 ? 1 : (c2 ? 2 : 3))");
    }

    #[test]
    fn dup_binds_below_relational() {
        assert_eq!(show_expr("2 + 3 DUP 0"), "(2 + 3) DUP 0");
        assert_eq!(show_expr("4 DUP ?"), "4 DUP ?");
    }

    #[test]
    fn literals_and_calls() {
        assert_eq!(show_expr("[1, 2]"), "[1, 2]");
        assert_eq!(show_expr("{x: 1, y: $}"), "{x: 1, y: $}");
        assert_eq!(show_expr("f(1, g(2))"), "f(1, g(2))");
        assert_eq!(show_expr("sizeof(Point.y)"), "sizeof(Point.y)");
        assert_eq!(show_expr("defined(foo)"), "defined(foo)");
        assert_eq!(show_expr("'A' + $ofs"), "(65 + $ofs)");
    }

    #[test]
    fn operands_with_memory_references() {
        assert_eq!(show_operands("a,(ix+5)"), vec!["A", "[(IX + 5)]"]);
        assert_eq!(show_operands("(hl),(1+2)*3"), vec!["[HL]", "((1 + 2) * 3)"]);
        assert_eq!(show_operands("af,af'"), vec!["AF", "AF'"]);
    }

    #[test]
    fn sub_operations_take_the_rest_of_the_line() {
        assert_eq!(show_operands("b,res 3,(ix+1)"), vec!["B", "RES 3, [(IX + 1)]"]);
    }
}
