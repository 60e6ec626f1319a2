use super::types::{FileId, Loc, Located};
use crate::spec::types::hw::Number;
use std::fmt::Display;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    MalformedToken(String, &'static str),
    UnterminatedStringLiteral,
    UnknownEscape(char),
    UnexpectedCharacter(char),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MalformedToken(raw, msg) => write!(f, "Malformed token '{}': {}", raw, msg),
            Error::UnterminatedStringLiteral => {
                write!(f, "Encountered unterminated string literal")
            }
            Error::UnknownEscape(c) => write!(f, "Unknown escape sequence '\\{}'", c),
            Error::UnexpectedCharacter(c) => write!(f, "Unexpected character '{}'", c),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    EqEq,
    Ne,
    Amp,
    AmpAmp,
    Pipe,
    PipePipe,
    Caret,
    Tilde,
    Bang,
}

impl Punct {
    const TABLE: [(&'static str, Punct); 31] = [
        ("<<", Punct::Shl),
        (">>", Punct::Shr),
        ("<=", Punct::Le),
        (">=", Punct::Ge),
        ("==", Punct::EqEq),
        ("!=", Punct::Ne),
        ("<>", Punct::Ne),
        ("&&", Punct::AmpAmp),
        ("||", Punct::PipePipe),
        ("(", Punct::LParen),
        (")", Punct::RParen),
        ("[", Punct::LBracket),
        ("]", Punct::RBracket),
        ("{", Punct::LBrace),
        ("}", Punct::RBrace),
        (",", Punct::Comma),
        (":", Punct::Colon),
        ("?", Punct::Question),
        ("+", Punct::Plus),
        ("-", Punct::Minus),
        ("*", Punct::Star),
        ("/", Punct::Slash),
        ("%", Punct::Percent),
        ("<", Punct::Lt),
        (">", Punct::Gt),
        ("=", Punct::Eq),
        ("&", Punct::Amp),
        ("|", Punct::Pipe),
        ("^", Punct::Caret),
        ("~", Punct::Tilde),
        ("!", Punct::Bang),
    ];

    pub fn as_str(self) -> &'static str {
        Punct::TABLE
            .iter()
            .find(|(_, p)| *p == self)
            .map_or("?", |(s, _)| s)
    }
}

// Classified tokens. Numbers keep their raw spelling: the base they are read in depends on
// the `RADIX` in force where they appear, which only the parser knows.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Token {
    Name(String),
    Number(String),
    Char(Number),
    String(String),
    Punct(Punct),
    /// `$`, the current instruction address.
    Dollar,
    /// `$ofs`, the current output offset.
    DollarOfs,
    Error(Error),
    EndOfLine,
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Name(s) => write!(f, "Name({})", s),
            Token::Number(s) => write!(f, "Number({})", s),
            Token::Char(c) => write!(f, "Char({})", c),
            Token::String(s) => write!(f, "String({})", s),
            Token::Punct(p) => write!(f, "'{}'", p.as_str()),
            Token::Dollar => write!(f, "'$'"),
            Token::DollarOfs => write!(f, "'$ofs'"),
            Token::Error(err) => write!(f, "Error({})", err),
            Token::EndOfLine => write!(f, "end of line"),
        }
    }
}

const COMMENT_CHAR: char = ';';
const STRING_LITERAL_CHAR: char = '"';
const CHAR_LITERAL_CHAR: char = '\'';

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '.'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

struct LineLexer<'a> {
    file: FileId,
    line_no: usize,
    line: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> LineLexer<'a> {
    fn new(file: FileId, line_no: usize, line: &'a str) -> Self {
        LineLexer {
            file,
            line_no,
            line,
            chars: line.char_indices().peekable(),
        }
    }

    fn loc(&self, idx: usize) -> Loc {
        Loc::new(self.file, self.line_no, idx + 1)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn take_while(&mut self, start: usize, pred: impl Fn(char) -> bool) -> &'a str {
        let mut end = start;
        while let Some(&(idx, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            end = idx + c.len_utf8();
            self.chars.next();
        }
        &self.line[start..end]
    }

    fn lex_escape(&mut self) -> Result<char, Error> {
        match self.chars.next().map(|(_, c)| c) {
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('t') => Ok('\t'),
            Some('0') => Ok('\0'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some('x') => {
                let mut digits = String::new();
                for _ in 0..2 {
                    match self.peek_char() {
                        Some(c) if c.is_ascii_hexdigit() => {
                            digits.push(c);
                            self.chars.next();
                        }
                        _ => break,
                    }
                }
                u8::from_str_radix(&digits, 16)
                    .map(char::from)
                    .map_err(|_| Error::MalformedToken(format!("\\x{}", digits), "bad hex escape"))
            }
            Some(c) => Err(Error::UnknownEscape(c)),
            None => Err(Error::UnterminatedStringLiteral),
        }
    }

    fn lex_quoted(&mut self, quote: char) -> Result<String, Error> {
        let mut text = String::new();
        loop {
            match self.chars.next().map(|(_, c)| c) {
                None => return Err(Error::UnterminatedStringLiteral),
                Some(c) if c == quote => return Ok(text),
                Some('\\') => text.push(self.lex_escape()?),
                Some(c) => text.push(c),
            }
        }
    }

    fn lex_char(&mut self) -> Result<Token, Error> {
        let text = self.lex_quoted(CHAR_LITERAL_CHAR)?;
        let mut cs = text.chars();
        match (cs.next(), cs.next()) {
            (Some(c), None) => Ok(Token::Char(c as Number)),
            _ => Err(Error::MalformedToken(
                text,
                "character literals hold exactly one character",
            )),
        }
    }

    fn lex_dollar(&mut self, start: usize) -> Token {
        match self.peek_char() {
            Some(c) if c.is_ascii_hexdigit() => {
                Token::Number(self.take_while(start, |c| c == '$' || c.is_ascii_alphanumeric()).to_owned())
            }
            Some(c) if is_name_start(c) => {
                let raw = self.take_while(start, |c| c == '$' || is_name_char(c));
                if raw.eq_ignore_ascii_case("$ofs") {
                    Token::DollarOfs
                } else {
                    Token::Error(Error::MalformedToken(
                        raw.to_owned(),
                        "expected '$', '$ofs' or a hex number",
                    ))
                }
            }
            _ => Token::Dollar,
        }
    }

    fn lex_name(&mut self, start: usize) -> Token {
        let name = self.take_while(start, is_name_char);
        // The only name with a quote in it.
        if name.eq_ignore_ascii_case("af") && self.peek_char() == Some('\'') {
            self.chars.next();
            return Token::Name(format!("{}'", name));
        }
        Token::Name(name.to_owned())
    }

    fn lex_punct(&mut self, start: usize) -> Token {
        let rest = &self.line[start..];
        for (s, p) in Punct::TABLE.iter() {
            if rest.starts_with(s) {
                for _ in 0..s.len() {
                    self.chars.next();
                }
                return Token::Punct(*p);
            }
        }
        self.chars.next();
        Token::Error(Error::UnexpectedCharacter(
            rest.chars().next().unwrap_or_default(),
        ))
    }

    fn next_token(&mut self) -> Option<Located<Token>> {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.chars.next();
        }

        let (start, c) = *self.chars.peek()?;
        let loc = self.loc(start);
        let token = match c {
            COMMENT_CHAR => return None,
            STRING_LITERAL_CHAR => {
                self.chars.next();
                self.lex_quoted(STRING_LITERAL_CHAR)
                    .map_or_else(Token::Error, Token::String)
            }
            CHAR_LITERAL_CHAR => {
                self.chars.next();
                self.lex_char().unwrap_or_else(Token::Error)
            }
            '$' => {
                self.chars.next();
                self.lex_dollar(start)
            }
            c if c.is_ascii_digit() => {
                Token::Number(self.take_while(start, |c| c.is_ascii_alphanumeric()).to_owned())
            }
            c if is_name_start(c) => self.lex_name(start),
            _ => self.lex_punct(start),
        };
        Some(Located::with_loc(loc, token))
    }

    fn finish(mut self, out: &mut Vec<Located<Token>>) {
        while let Some(token) = self.next_token() {
            let stop = matches!(token.as_ref(), Token::Error(_));
            out.push(token);
            // Nothing after a malformed token on this line is trustworthy.
            if stop {
                break;
            }
        }
        out.push(Located::with_loc(
            Loc::new(self.file, self.line_no, self.line.len() + 1),
            Token::EndOfLine,
        ));
    }
}

/// Split a source file into tokens, with an `EndOfLine` closing every line. Lexical errors are
/// embedded in the stream as `Token::Error` so that the parser reports them in order and
/// resynchronises at the end of the line.
pub fn tokenize(file: FileId, source: &str) -> Vec<Located<Token>> {
    let mut tokens = Vec::new();
    for (line_no, line) in source.lines().enumerate() {
        LineLexer::new(file, line_no + 1, line).finish(&mut tokens);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(0, source).into_iter().map(Located::value).collect()
    }

    fn name(s: &str) -> Token {
        Token::Name(s.to_owned())
    }

    #[test]
    fn instruction_line() {
        assert_eq!(
            kinds("loop: ld a,(ix+5) ; comment"),
            vec![
                name("loop"),
                Token::Punct(Punct::Colon),
                name("ld"),
                name("a"),
                Token::Punct(Punct::Comma),
                Token::Punct(Punct::LParen),
                name("ix"),
                Token::Punct(Punct::Plus),
                Token::Number("5".to_owned()),
                Token::Punct(Punct::RParen),
                Token::EndOfLine,
            ]
        );
    }

    #[test]
    fn locations_are_one_based() {
        let tokens = tokenize(3, "\n  nop");
        assert_eq!(tokens[0].loc(), Some(Loc::new(3, 1, 1)));
        assert_eq!(tokens[1].loc(), Some(Loc::new(3, 2, 3)));
    }

    #[test]
    fn shadow_register_pair() {
        assert_eq!(
            kinds("ex af,af'"),
            vec![
                name("ex"),
                name("af"),
                Token::Punct(Punct::Comma),
                name("af'"),
                Token::EndOfLine
            ]
        );
    }

    #[test]
    fn dollar_forms() {
        assert_eq!(
            kinds("$ $ofs $FF $+2"),
            vec![
                Token::Dollar,
                Token::DollarOfs,
                Token::Number("$FF".to_owned()),
                Token::Dollar,
                Token::Punct(Punct::Plus),
                Token::Number("2".to_owned()),
                Token::EndOfLine
            ]
        );
    }

    #[test]
    fn strings_and_chars() {
        assert_eq!(
            kinds(r#"db "a\"b\n", 'x', '\x41'"#),
            vec![
                name("db"),
                Token::String("a\"b\n".to_owned()),
                Token::Punct(Punct::Comma),
                Token::Char('x' as Number),
                Token::Punct(Punct::Comma),
                Token::Char(0x41),
                Token::EndOfLine
            ]
        );
    }

    #[test]
    fn comment_char_inside_string() {
        assert_eq!(
            kinds(r#"db ";" ; real"#),
            vec![name("db"), Token::String(";".to_owned()), Token::EndOfLine]
        );
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            kinds("1<<2 >= 3 <> 4"),
            vec![
                Token::Number("1".to_owned()),
                Token::Punct(Punct::Shl),
                Token::Number("2".to_owned()),
                Token::Punct(Punct::Ge),
                Token::Number("3".to_owned()),
                Token::Punct(Punct::Ne),
                Token::Number("4".to_owned()),
                Token::EndOfLine
            ]
        );
    }

    #[test]
    fn errors_stop_the_line() {
        assert_eq!(
            kinds("db \"abc\nnop"),
            vec![
                name("db"),
                Token::Error(Error::UnterminatedStringLiteral),
                Token::EndOfLine,
                name("nop"),
                Token::EndOfLine
            ]
        );
        assert_eq!(
            kinds("ld a,`"),
            vec![
                name("ld"),
                name("a"),
                Token::Punct(Punct::Comma),
                Token::Error(Error::UnexpectedCharacter('`')),
                Token::EndOfLine
            ]
        );
    }
}
