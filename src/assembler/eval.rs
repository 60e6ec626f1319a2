use super::ast::{BinaryOp, Expr, ExprId, Stmt, UnaryOp};
use super::data::TypeRef;
use super::phases::types::{Failure, Located};
use super::phases::walk::{Error, Step, Walker};
use super::scope::{self, ScopeId, Site, Symbol};
use crate::spec::types::hw::{Number, Register, ADDR_SPACE};
use bitflags::bitflags;
use std::rc::Rc;

bitflags! {
    /// How an operand addresses its data. The empty set is an invalid operand.
    pub struct Mode: u8 {
        const IMMEDIATE = 0b0001;
        const REGISTER  = 0b0010;
        const DEREF     = 0b0100;
        const SUBOP     = 0b1000;

        const REGISTER_PLUS_IMMEDIATE = Self::IMMEDIATE.bits | Self::REGISTER.bits;
    }
}

impl Mode {
    pub fn is_valid(self) -> bool {
        !self.is_empty()
    }

    /// The mode of `lhs + rhs`.
    pub fn add(self, rhs: Mode) -> Mode {
        let (i, r, rpi) = (
            Mode::IMMEDIATE,
            Mode::REGISTER,
            Mode::REGISTER_PLUS_IMMEDIATE,
        );
        if self == i && rhs == i {
            i
        } else if (self == i && (rhs == r || rhs == rpi)) || ((self == r || self == rpi) && rhs == i) {
            rpi
        } else {
            Mode::empty()
        }
    }

    /// The mode of `lhs - rhs`; only an immediate may be subtracted.
    pub fn sub(self, rhs: Mode) -> Mode {
        if rhs != Mode::IMMEDIATE {
            Mode::empty()
        } else if self == Mode::IMMEDIATE {
            Mode::IMMEDIATE
        } else if self == Mode::REGISTER || self == Mode::REGISTER_PLUS_IMMEDIATE {
            Mode::REGISTER_PLUS_IMMEDIATE
        } else {
            Mode::empty()
        }
    }

    pub fn deref(self) -> Mode {
        if self.is_empty() || self.intersects(Mode::DEREF | Mode::SUBOP) {
            self
        } else {
            self | Mode::DEREF
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Number(Number),
    Str(String),
    Type(TypeRef),
    /// A struct member: its type, offset from the start of the outermost struct, and element
    /// count.
    Field {
        ty: TypeRef,
        offset: Number,
        count: usize,
    },
}

impl Value {
    fn describe(&self) -> String {
        match self {
            Value::Number(n) => format!("number {}", n),
            Value::Str(s) => format!("string \"{}\"", s),
            Value::Type(_) => "a type".to_owned(),
            Value::Field { .. } => "a struct field".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Expr(ExprId, ScopeId),
    Char(Number),
}

/// A data list flattened lazily. `DUP` counts are applied while iterating, never stored.
#[derive(Debug, Clone)]
pub enum DataSeq {
    Single(ExprId, ScopeId),
    Chars(Rc<str>),
    Concat(Vec<DataSeq>),
    Repeat(usize, Box<DataSeq>),
}

impl DataSeq {
    pub fn len(&self) -> usize {
        match self {
            DataSeq::Single(..) => 1,
            DataSeq::Chars(s) => s.chars().count(),
            DataSeq::Concat(items) => items
                .iter()
                .fold(0, |n, item| n.saturating_add(item.len())),
            DataSeq::Repeat(n, inner) => n.saturating_mul(inner.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = Element> + '_> {
        match self {
            DataSeq::Single(expr, scope) => Box::new(std::iter::once(Element::Expr(*expr, *scope))),
            DataSeq::Chars(s) => Box::new(s.chars().map(|c| Element::Char(c as Number))),
            DataSeq::Concat(items) => Box::new(items.iter().flat_map(DataSeq::iter)),
            DataSeq::Repeat(n, inner) => Box::new((0..*n).flat_map(move |_| inner.iter())),
        }
    }
}

/// Where an instruction operand's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Value(ExprId, ScopeId),
    /// `(IX)` is encoded as `(IX+0)`.
    Zero,
}

const MAX_ALIAS_HOPS: usize = 64;

fn bool_value(b: bool) -> Number {
    b as Number
}

impl<'a> Walker<'a> {
    fn error<T>(&self, expr: ExprId, err: Error) -> Step<T> {
        Err(Failure::Error(Located::with_loc(self.expr_loc(expr), err)))
    }

    pub fn eval_number(&mut self, expr: ExprId, scope: ScopeId) -> Step<Number> {
        match self.evaluate(expr, scope)? {
            Value::Number(n) => Ok(n),
            Value::Str(s) if s.chars().count() == 1 => Ok(s.chars().next().map_or(0, |c| c as Number)),
            Value::Field { offset, .. } => Ok(offset),
            other => self.error(expr, Error::TypeMismatch(other.describe(), "a number")),
        }
    }

    pub fn eval_string(&mut self, expr: ExprId, scope: ScopeId) -> Step<String> {
        match self.evaluate(expr, scope)? {
            Value::Str(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => self.error(expr, Error::TypeMismatch(other.describe(), "a string")),
        }
    }

    pub fn evaluate(&mut self, expr: ExprId, scope: ScopeId) -> Step<Value> {
        let ast = self.ast;
        match ast.expr(expr) {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Unary(op, operand) => {
                let v = self.eval_number(*operand, scope)?;
                Ok(Value::Number(match op {
                    UnaryOp::Neg => v.wrapping_neg(),
                    UnaryOp::Not => !v,
                    UnaryOp::LogicalNot => bool_value(v == 0),
                }))
            }
            Expr::Binary(op, lhs, rhs) => self.eval_binary(expr, *op, *lhs, *rhs, scope).map(Value::Number),
            Expr::Ternary(cond, then, otherwise) => {
                if self.eval_number(*cond, scope)? != 0 {
                    self.evaluate(*then, scope)
                } else {
                    self.evaluate(*otherwise, scope)
                }
            }
            Expr::Ident { name, args } => self.resolve_ident(expr, name, args.as_deref(), scope),
            Expr::SizeOf(target) => {
                let size = match self.evaluate(*target, scope)? {
                    Value::Type(ty) => self.type_size(ty)?,
                    Value::Field { ty, count, .. } => self.type_size(ty)? * count,
                    Value::Str(s) => s.chars().count(),
                    other => {
                        return self.error(*target, Error::TypeMismatch(other.describe(), "a type"))
                    }
                };
                Ok(Value::Number(size as Number))
            }
            Expr::Defined(name) => Ok(Value::Number(bool_value(
                self.scopes.is_defined(scope, name, true),
            ))),
            Expr::Ip => Ok(Value::Number(
                self.position("$")
                    .or_else(|err| self.error(expr, err))?
                    .ip,
            )),
            Expr::Op => Ok(Value::Number(
                self.position("$ofs")
                    .or_else(|err| self.error(expr, err))?
                    .op,
            )),
            Expr::Register(reg) => self.error(
                expr,
                Error::TypeMismatch(format!("register {}", reg), "a value"),
            ),
            Expr::Deref(_) => self.error(
                expr,
                Error::TypeMismatch("a memory operand".to_owned(), "a value"),
            ),
            Expr::SubOp { mnemonic, .. } => self.error(
                expr,
                Error::TypeMismatch(format!("instruction '{}'", mnemonic), "a value"),
            ),
            Expr::Concat(_) | Expr::Dup { .. } | Expr::Array(_) | Expr::Map(_) => self.error(
                expr,
                Error::TypeMismatch("a data list".to_owned(), "a single value"),
            ),
            Expr::Uninit => self.error(
                expr,
                Error::TypeMismatch("'?'".to_owned(), "a value"),
            ),
        }
    }

    fn eval_binary(
        &mut self,
        expr: ExprId,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        scope: ScopeId,
    ) -> Step<Number> {
        let l = self.eval_number(lhs, scope)?;
        match op {
            BinaryOp::LogicalAnd if l == 0 => return Ok(0),
            BinaryOp::LogicalOr if l != 0 => return Ok(1),
            _ => (),
        }
        let r = self.eval_number(rhs, scope)?;

        Ok(match op {
            BinaryOp::Mul => l.wrapping_mul(r),
            BinaryOp::Div | BinaryOp::Mod if r == 0 => {
                return self.error(expr, Error::DivisionByZero)
            }
            BinaryOp::Div => l.wrapping_div(r),
            BinaryOp::Mod => l.wrapping_rem(r),
            BinaryOp::Add => l.wrapping_add(r),
            BinaryOp::Sub => l.wrapping_sub(r),
            BinaryOp::Shl => {
                if (0..64).contains(&r) {
                    l << r
                } else {
                    0
                }
            }
            BinaryOp::Shr => {
                if (0..64).contains(&r) {
                    l >> r
                } else if l < 0 {
                    -1
                } else {
                    0
                }
            }
            BinaryOp::Lt => bool_value(l < r),
            BinaryOp::Le => bool_value(l <= r),
            BinaryOp::Gt => bool_value(l > r),
            BinaryOp::Ge => bool_value(l >= r),
            BinaryOp::Eq => bool_value(l == r),
            BinaryOp::Ne => bool_value(l != r),
            BinaryOp::And => l & r,
            BinaryOp::Xor => l ^ r,
            BinaryOp::Or => l | r,
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => bool_value(r != 0),
        })
    }

    fn lookup_key(name: &str, args: Option<&[ExprId]>) -> String {
        match args {
            Some(args) => scope::with_arity(name, args.len()),
            None => name.to_owned(),
        }
    }

    fn resolve_ident(
        &mut self,
        expr: ExprId,
        name: &str,
        args: Option<&[ExprId]>,
        scope: ScopeId,
    ) -> Step<Value> {
        let symbol = match self.scopes.find_symbol(scope, &Walker::lookup_key(name, args)) {
            Some(symbol) => symbol,
            None => return self.resolve_member(expr, name, scope),
        };
        let takes_no_args = |w: &Self| match args {
            Some(args) => w.error(expr, Error::WrongArity(name.to_owned(), args.len())),
            None => Ok(()),
        };

        match symbol {
            Symbol::Expr { expr: bound, scope } => {
                takes_no_args(self)?;
                self.evaluate(bound, scope)
            }
            Symbol::Equ(site) => self.eval_equ(expr, site, args.unwrap_or(&[]), scope),
            Symbol::Label(site) => {
                takes_no_args(self)?;
                match self.state.labels.get(&site) {
                    Some(address) => Ok(Value::Number(*address)),
                    None => self.error(expr, Error::NotYetResolved(name.to_owned())),
                }
            }
            Symbol::Type(ty) => {
                takes_no_args(self)?;
                Ok(Value::Type(ty))
            }
            Symbol::Macro(_) => self.error(
                expr,
                Error::TypeMismatch(format!("macro '{}'", name), "a value"),
            ),
            Symbol::Bits(_) => self.error(
                expr,
                Error::TypeMismatch(format!("bit pattern '{}'", name), "a value"),
            ),
        }
    }

    /// `Type.field.field`, tried when no symbol has the whole dotted name.
    fn resolve_member(&mut self, expr: ExprId, name: &str, scope: ScopeId) -> Step<Value> {
        let base_len = name
            .char_indices()
            .rev()
            .filter(|(idx, c)| *c == '.' && *idx > 0)
            .map(|(idx, _)| idx)
            .find(|idx| self.scopes.find(scope, &name[..*idx]).is_some());
        let base_len = match base_len {
            Some(len) => len,
            None => return self.error(expr, Error::UndefinedSymbol(name.to_owned())),
        };

        let mut value = self.resolve_ident(expr, &name[..base_len], None, scope)?;
        let mut path = name[..base_len].to_owned();
        for field in name[base_len + 1..].split('.') {
            let (ty, base) = match value {
                Value::Type(ty) => (ty, 0),
                Value::Field { ty, offset, .. } => (ty, offset),
                other => {
                    return self.error(expr, Error::TypeMismatch(other.describe(), "a struct"))
                }
            };
            let layout = match ty {
                TypeRef::Struct(site) => self.struct_layout(site)?,
                _ => return self.error(expr, Error::UnknownField(path, field.to_owned())),
            };
            let found = layout
                .field(field)
                .ok_or_else(|| Error::UnknownField(path.clone(), field.to_owned()));
            let found = found.or_else(|err| self.error(expr, err))?;
            value = Value::Field {
                ty: found.ty,
                offset: base + found.offset as Number,
                count: found.count,
            };
            path.push('.');
            path.push_str(field);
        }
        Ok(value)
    }

    /// Bind the arguments of a parameterized `EQU` in a fresh scope.
    fn bind_params(
        &mut self,
        site: Site,
        params: &[String],
        args: &[ExprId],
        caller: ScopeId,
    ) -> Step<ScopeId> {
        if params.is_empty() {
            return Ok(site.scope);
        }
        let bound = self.scopes.create(site.scope, true);
        for (param, arg) in params.iter().zip(args) {
            self.scopes
                .define(
                    bound,
                    param,
                    Symbol::Expr {
                        expr: *arg,
                        scope: caller,
                    },
                    false,
                )
                .map_err(|err| Located::with_loc(self.expr_loc(*arg), Error::from(err)))?;
        }
        Ok(bound)
    }

    fn eval_equ(&mut self, expr: ExprId, site: Site, args: &[ExprId], caller: ScopeId) -> Step<Value> {
        let ast = self.ast;
        let (name, params, value) = match &ast.node(site.node).stmt {
            Stmt::Equ {
                name,
                params,
                value,
            } => (name, params, *value),
            other => panic!("EQU symbol bound to {:?}", other),
        };
        if params.len() != args.len() {
            return self.error(expr, Error::WrongArity(name.clone(), args.len()));
        }
        if !self.state.active_equs.insert((site, expr)) {
            return self.error(expr, Error::RecursiveEqu(name.clone()));
        }

        let position = self.state.equ_positions.get(&site).copied();
        let result = self
            .bind_params(site, params, args, caller)
            .and_then(|scope| self.with_override(position, |w| w.evaluate(value, scope)));
        self.state.active_equs.remove(&(site, expr));
        result
    }

    /// The value of a parameterless `EQU`, evaluated where it was defined.
    pub fn equ_value(&mut self, site: Site) -> Step<Value> {
        let ast = self.ast;
        match &ast.node(site.node).stmt {
            Stmt::Equ { value, .. } => self.eval_equ(*value, site, &[], site.scope),
            other => panic!("EQU symbol bound to {:?}", other),
        }
    }

    /// Resolve identifiers naming macro parameters and `EQU`s down to the expression they
    /// stand for, without evaluating anything.
    pub fn follow(&mut self, expr: ExprId, scope: ScopeId) -> Step<(ExprId, ScopeId)> {
        let ast = self.ast;
        let (mut expr, mut scope) = (expr, scope);
        for _ in 0..MAX_ALIAS_HOPS {
            let (name, args) = match ast.expr(expr) {
                Expr::Ident { name, args } => (name, args.as_deref()),
                _ => return Ok((expr, scope)),
            };
            let key = Walker::lookup_key(name, args);
            match self.scopes.find_symbol(scope, &key) {
                Some(Symbol::Expr { expr: e, scope: s }) if args.is_none() => {
                    expr = e;
                    scope = s;
                }
                Some(Symbol::Equ(site)) => match &ast.node(site.node).stmt {
                    Stmt::Equ { params, value, .. } if params.len() == args.map_or(0, |a| a.len()) => {
                        scope = self.bind_params(site, params, args.unwrap_or(&[]), scope)?;
                        expr = *value;
                    }
                    _ => return Ok((expr, scope)),
                },
                _ => return Ok((expr, scope)),
            }
        }
        let name = match ast.expr(expr) {
            Expr::Ident { name, .. } => name.clone(),
            _ => String::new(),
        };
        self.error(expr, Error::RecursiveEqu(name))
    }

    pub fn addressing_mode(&mut self, expr: ExprId, scope: ScopeId) -> Step<Mode> {
        let ast = self.ast;
        let (expr, scope) = self.follow(expr, scope)?;
        Ok(match ast.expr(expr) {
            Expr::Register(_) => Mode::REGISTER,
            Expr::Deref(inner) => self.addressing_mode(*inner, scope)?.deref(),
            Expr::SubOp { .. } => Mode::SUBOP,
            Expr::Binary(BinaryOp::Add, l, r) => {
                let l = self.addressing_mode(*l, scope)?;
                l.add(self.addressing_mode(*r, scope)?)
            }
            Expr::Binary(BinaryOp::Sub, l, r) => {
                let l = self.addressing_mode(*l, scope)?;
                l.sub(self.addressing_mode(*r, scope)?)
            }
            Expr::Binary(_, l, r) => {
                self.all_immediate(&[*l, *r], scope)?
            }
            Expr::Unary(_, operand) => self.all_immediate(&[*operand], scope)?,
            Expr::Ternary(c, t, e) => self.all_immediate(&[*c, *t, *e], scope)?,
            Expr::Str(s) if s.chars().count() == 1 => Mode::IMMEDIATE,
            Expr::Str(_) => Mode::empty(),
            Expr::Ident { name, args } => {
                let key = Walker::lookup_key(name, args.as_deref());
                match self.scopes.find_symbol(scope, &key) {
                    Some(Symbol::Type(_)) | Some(Symbol::Macro(_)) | Some(Symbol::Bits(_)) => {
                        Mode::empty()
                    }
                    _ => Mode::IMMEDIATE,
                }
            }
            Expr::Number(_)
            | Expr::Ip
            | Expr::Op
            | Expr::SizeOf(_)
            | Expr::Defined(_) => Mode::IMMEDIATE,
            Expr::Concat(_) | Expr::Dup { .. } | Expr::Array(_) | Expr::Map(_) | Expr::Uninit => {
                Mode::empty()
            }
        })
    }

    fn all_immediate(&mut self, operands: &[ExprId], scope: ScopeId) -> Step<Mode> {
        for operand in operands {
            if self.addressing_mode(*operand, scope)? != Mode::IMMEDIATE {
                return Ok(Mode::empty());
            }
        }
        Ok(Mode::IMMEDIATE)
    }

    pub fn get_register(&mut self, expr: ExprId, scope: ScopeId) -> Step<Option<Register>> {
        let ast = self.ast;
        let (expr, scope) = self.follow(expr, scope)?;
        match ast.expr(expr) {
            Expr::Register(reg) => Ok(Some(*reg)),
            Expr::Deref(inner) => self.get_register(*inner, scope),
            Expr::Binary(BinaryOp::Add, l, r) | Expr::Binary(BinaryOp::Sub, l, r) => {
                match self.get_register(*l, scope)? {
                    Some(reg) => Ok(Some(reg)),
                    None => self.get_register(*r, scope),
                }
            }
            _ => Ok(None),
        }
    }

    /// The numeric part of an operand: the whole value of an immediate, the displacement of
    /// `(IX+d)`, zero for a register.
    pub fn immediate_part(&mut self, expr: ExprId, scope: ScopeId) -> Step<Number> {
        let mode = self.addressing_mode(expr, scope)?;
        if mode == Mode::IMMEDIATE {
            return self.eval_number(expr, scope);
        }
        if mode == Mode::REGISTER {
            return Ok(0);
        }

        let ast = self.ast;
        let (expr, scope) = self.follow(expr, scope)?;
        match ast.expr(expr) {
            Expr::Deref(inner) => self.immediate_part(*inner, scope),
            Expr::Binary(BinaryOp::Add, l, r) => {
                Ok(self.immediate_part(*l, scope)? + self.immediate_part(*r, scope)?)
            }
            Expr::Binary(BinaryOp::Sub, l, r) => {
                Ok(self.immediate_part(*l, scope)? - self.immediate_part(*r, scope)?)
            }
            Expr::Register(_) => Ok(0),
            _ => self.eval_number(expr, scope),
        }
    }

    /// Render an operand as it appears in instruction patterns, e.g. `(IX+?)`, collecting the
    /// operand's value slots in order.
    pub fn render_operand(
        &mut self,
        mnemonic: &str,
        expr: ExprId,
        scope: ScopeId,
        slots: &mut Vec<Slot>,
    ) -> Step<String> {
        let mode = self.addressing_mode(expr, scope)?;
        let register = |w: &mut Self| -> Step<String> {
            Ok(w.get_register(expr, scope)?
                .map_or_else(|| "!".to_owned(), |reg| reg.to_string()))
        };

        if mode == Mode::IMMEDIATE {
            slots.push(Slot::Value(expr, scope));
            Ok("?".to_owned())
        } else if mode == Mode::REGISTER {
            register(self)
        } else if mode == Mode::IMMEDIATE | Mode::DEREF {
            slots.push(Slot::Value(expr, scope));
            Ok("(?)".to_owned())
        } else if mode == Mode::REGISTER | Mode::DEREF {
            let reg = self.get_register(expr, scope)?;
            match reg {
                Some(reg) if reg.is_index() && mnemonic != "JP" => {
                    slots.push(Slot::Zero);
                    Ok(format!("({}+?)", reg))
                }
                Some(reg) => Ok(format!("({})", reg)),
                None => Ok("!".to_owned()),
            }
        } else if mode == Mode::REGISTER_PLUS_IMMEDIATE | Mode::DEREF {
            slots.push(Slot::Value(expr, scope));
            Ok(format!("({}+?)", register(self)?))
        } else if mode == Mode::REGISTER_PLUS_IMMEDIATE {
            slots.push(Slot::Value(expr, scope));
            Ok(format!("{}+?", register(self)?))
        } else if mode == Mode::SUBOP {
            let ast = self.ast;
            let (expr, scope) = self.follow(expr, scope)?;
            match ast.expr(expr) {
                Expr::SubOp { mnemonic, operands } => {
                    let rendered = self.render_operands(mnemonic, operands, scope, slots)?;
                    Ok(format!("{} {}", mnemonic, rendered))
                }
                _ => Ok("!".to_owned()),
            }
        } else {
            Ok("!".to_owned())
        }
    }

    pub fn render_operands(
        &mut self,
        mnemonic: &str,
        operands: &[ExprId],
        scope: ScopeId,
        slots: &mut Vec<Slot>,
    ) -> Step<String> {
        let mut rendered = Vec::with_capacity(operands.len());
        for operand in operands {
            rendered.push(self.render_operand(mnemonic, *operand, scope, slots)?);
        }
        Ok(rendered.join(","))
    }

    /// The full lookup pattern of an instruction statement, e.g. `LD (IX+?),A`.
    pub fn render_instruction(
        &mut self,
        mnemonic: &str,
        operands: &[ExprId],
        scope: ScopeId,
        slots: &mut Vec<Slot>,
    ) -> Step<String> {
        if operands.is_empty() {
            return Ok(mnemonic.to_owned());
        }
        let rendered = self.render_operands(mnemonic, operands, scope, slots)?;
        Ok(format!("{} {}", mnemonic, rendered))
    }

    pub fn slot_value(&mut self, slot: Slot) -> Step<Number> {
        match slot {
            Slot::Value(expr, scope) => self.immediate_part(expr, scope),
            Slot::Zero => Ok(0),
        }
    }

    /// Flatten a data list. Strings become one element per character; with `flatten_arrays`
    /// the items of an `[...]` literal are spliced in too.
    pub fn enum_data(&mut self, expr: ExprId, scope: ScopeId, flatten_arrays: bool) -> Step<DataSeq> {
        let ast = self.ast;
        let (target, target_scope) = self.follow(expr, scope)?;
        Ok(match ast.expr(target) {
            Expr::Str(s) => DataSeq::Chars(Rc::from(s.as_str())),
            Expr::Concat(items) => {
                let mut seqs = Vec::with_capacity(items.len());
                for item in items {
                    seqs.push(self.enum_data(*item, target_scope, flatten_arrays)?);
                }
                DataSeq::Concat(seqs)
            }
            Expr::Array(items) if flatten_arrays => {
                let mut seqs = Vec::with_capacity(items.len());
                for item in items {
                    seqs.push(self.enum_data(*item, target_scope, false)?);
                }
                DataSeq::Concat(seqs)
            }
            Expr::Dup { count, value } => {
                let n = self.eval_number(*count, target_scope)?;
                if !(0..=ADDR_SPACE as Number).contains(&n) {
                    return self.error(*count, Error::ValueOutOfRange(n, "a repeat count"));
                }
                let inner = self.enum_data(*value, target_scope, flatten_arrays)?;
                DataSeq::Repeat(n as usize, Box::new(inner))
            }
            Expr::Array(_) | Expr::Map(_) | Expr::Uninit => DataSeq::Single(target, target_scope),
            _ => DataSeq::Single(expr, scope),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mode_composition() {
        let (i, r, rpi) = (
            Mode::IMMEDIATE,
            Mode::REGISTER,
            Mode::REGISTER_PLUS_IMMEDIATE,
        );
        assert_eq!(i.add(i), i);
        assert_eq!(r.add(i), rpi);
        assert_eq!(i.add(r), rpi);
        assert_eq!(i.add(rpi), rpi);
        assert_eq!(rpi.add(i), rpi);
        assert!(!r.add(r).is_valid());
        assert!(!rpi.add(r).is_valid());
        assert!(!(i | Mode::DEREF).add(i).is_valid());
        assert_eq!(r.sub(i), rpi);
        assert!(!i.sub(r).is_valid());
    }

    #[test]
    fn deref_is_added_once() {
        assert_eq!(Mode::REGISTER.deref(), Mode::REGISTER | Mode::DEREF);
        assert_eq!(
            (Mode::REGISTER | Mode::DEREF).deref(),
            Mode::REGISTER | Mode::DEREF
        );
        assert_eq!(Mode::SUBOP.deref(), Mode::SUBOP);
        assert!(!Mode::empty().deref().is_valid());
    }

    #[test]
    fn data_sequences_are_lazy_and_restartable() {
        let seq = DataSeq::Concat(vec![
            DataSeq::Chars(Rc::from("AB")),
            DataSeq::Repeat(1_000_000, Box::new(DataSeq::Chars(Rc::from("x")))),
        ]);
        assert_eq!(seq.len(), 1_000_002);
        let head: Vec<_> = seq.iter().take(3).collect();
        assert_eq!(
            head,
            vec![Element::Char(65), Element::Char(66), Element::Char(120)]
        );
        assert_eq!(seq.iter().next(), Some(Element::Char(65)));
        assert!(DataSeq::Repeat(0, Box::new(DataSeq::Chars(Rc::from("x")))).is_empty());
    }

    #[test]
    fn nested_repeat_lengths_saturate() {
        let mut seq = DataSeq::Chars(Rc::from("xy"));
        for _ in 0..4 {
            seq = DataSeq::Repeat(ADDR_SPACE, Box::new(seq));
        }
        assert_eq!(seq.len(), usize::MAX);
        let seq = DataSeq::Concat(vec![seq, DataSeq::Chars(Rc::from("z"))]);
        assert_eq!(seq.len(), usize::MAX);
    }
}
