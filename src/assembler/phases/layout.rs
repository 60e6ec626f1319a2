use super::define::bits_symbol;
use super::types::Loc;
use super::walk::{fail, Error, Invocation, Phase, Step, Walker};
use crate::assembler::ast::{ExprId, MessageKind, NodeId, Stmt};
use crate::assembler::lang::Lang;
use crate::assembler::scope::{with_arity, ScopeId, Site, Symbol};
use crate::spec::types::hw::{Byte, Number, ADDR_SPACE, WORD_MAX};
use std::convert::TryFrom;

impl<'a> Walker<'a> {
    pub(super) fn layout_statement(&mut self, site: Site) -> Step {
        let ast = self.ast;
        let node = ast.node(site.node);
        let scope = site.scope;

        match &node.stmt {
            Stmt::Label(_) => {
                let ip = self.cursor.ip;
                self.state.labels.entry(site).or_insert(ip);
            }
            Stmt::Equ { .. } => {
                let position = self.statement_start();
                self.state.equ_positions.insert(site, position);
            }
            Stmt::Org(_) | Stmt::Seek(_) => self.place(site)?,
            Stmt::Instruction { mnemonic, operands } => {
                let mut slots = Vec::new();
                let pattern = self.render_instruction(mnemonic, operands, scope, &mut slots)?;
                match Lang::get().lookup(&pattern) {
                    Some(instruction) => {
                        self.state.instructions.insert(site, Some(instruction));
                        self.reserve(instruction.len(), node.loc)?;
                    }
                    None => {
                        self.state.instructions.insert(site, None);
                        return fail(node.loc, Error::InvalidInstruction(pattern));
                    }
                }
            }
            Stmt::Invoke { name, args } => self.layout_invoke(site, name, args, node.loc)?,
            Stmt::Reserve { count, .. } => {
                let n = self.reserve_count(*count, scope)?;
                self.state.reserved.insert(site, n);
                self.reserve(n, node.loc)?;
            }
            Stmt::Message(kind, expr) => {
                let msg = self.eval_string(*expr, scope)?;
                let err = match kind {
                    MessageKind::Error => Error::User(msg),
                    MessageKind::Warning => Error::UserWarning(msg),
                };
                return fail(node.loc, err);
            }
            Stmt::Bitmap { .. } => {
                let bytes = self.bitmap_bytes(site)?;
                self.reserve(bytes.len(), node.loc)?;
            }
            Stmt::Incbin { data, .. } => self.reserve(data.len(), node.loc)?,
            Stmt::Macro { .. }
            | Stmt::Struct { .. }
            | Stmt::Radix(_)
            | Stmt::DefBits { .. }
            | Stmt::Block { .. }
            | Stmt::If(_) => (),
        }
        Ok(())
    }

    /// `ORG` and `SEEK`, which act the same in layout and generation.
    pub(super) fn place(&mut self, site: Site) -> Step {
        let ast = self.ast;
        let (expr, org) = match &ast.node(site.node).stmt {
            Stmt::Org(expr) => (*expr, true),
            Stmt::Seek(expr) => (*expr, false),
            _ => return Ok(()),
        };
        let n = self.eval_number(expr, site.scope)?;
        if !(0..=WORD_MAX as Number).contains(&n) {
            return fail(self.expr_loc(expr), Error::ValueOutOfRange(n, "an address"));
        }
        if org {
            log::trace!("ORG {:#06X}", n);
            self.cursor.org(n);
        } else {
            log::trace!("SEEK {:#06X}", n);
            self.cursor.seek(n);
        }
        Ok(())
    }

    pub(super) fn reserve_count(&mut self, count: ExprId, scope: ScopeId) -> Step<usize> {
        let n = self.eval_number(count, scope)?;
        if !(0..=WORD_MAX as Number + 1).contains(&n) {
            return fail(self.expr_loc(count), Error::ValueOutOfRange(n, "a byte count"));
        }
        Ok(n as usize)
    }

    /// Decide whether `name args` declares data or invokes a macro.
    fn layout_invoke(&mut self, site: Site, name: &str, args: &[ExprId], loc: Loc) -> Step {
        let scope = site.scope;
        if let Some(Symbol::Type(ty)) = self.scopes.find_symbol(scope, name) {
            self.state.invocations.insert(site, Invocation::Data(ty));
            let mut count: usize = 0;
            for arg in args {
                count = count.saturating_add(self.data_len(*arg, scope)?);
            }
            let size = self.type_size(ty)?.checked_mul(count).unwrap_or(usize::MAX);
            if size > ADDR_SPACE {
                let n = Number::try_from(size).unwrap_or(Number::MAX);
                return fail(loc, Error::ValueOutOfRange(n, "a data length"));
            }
            self.state.reserved.insert(site, size);
            return Ok(self.reserve(size, loc)?);
        }

        if let Some((defined_in, entry)) = self.scopes.find(scope, &with_arity(name, args.len())) {
            if let Symbol::Macro(node) = entry.symbol {
                return self.invoke_macro(site, node, defined_in, args);
            }
        }

        if self.scopes.is_defined(scope, name, true) {
            fail(loc, Error::WrongArity(name.to_owned(), args.len()))
        } else {
            fail(loc, Error::UnknownInvocation(name.to_owned()))
        }
    }

    /// Expand a macro: bind its parameters in a one-off scope, then define and lay out its
    /// body there. Generation later revisits the same scope.
    fn invoke_macro(&mut self, site: Site, node: NodeId, defined_in: ScopeId, args: &[ExprId]) -> Step {
        let ast = self.ast;
        let macro_node = ast.node(node);
        let (name, params, body) = match &macro_node.stmt {
            Stmt::Macro { name, params, body } => (name, params, *body),
            other => panic!("macro symbol bound to {:?}", other),
        };
        if self.state.active_macros.contains(&node) {
            return fail(ast.node(site.node).loc, Error::RecursiveMacro(name.clone()));
        }

        let scope = self.scopes.create(defined_in, true);
        for (param, arg) in params.iter().zip(args) {
            let bound = Symbol::Expr {
                expr: *arg,
                scope: site.scope,
            };
            if let Err(err) = self.scopes.define(scope, param, bound, false) {
                return fail(self.expr_loc(*arg), err.into());
            }
        }
        log::debug!(
            "expanding macro {} at {:04X} (scope {:?})",
            name,
            self.cursor.ip,
            scope
        );

        self.state.invocations.insert(site, Invocation::Macro { body, scope });
        self.state.active_macros.insert(node);
        let result = self.in_macro(|w| {
            w.with_phase(Phase::DefineSymbols, |w| w.walk(body, scope))?;
            w.walk(body, scope)
        });
        self.state.active_macros.remove(&node);
        Ok(result?)
    }

    fn bits_of(&self, c: char, scope: ScopeId) -> Option<&'a [bool]> {
        let ast = self.ast;
        match self.scopes.find_symbol(scope, &bits_symbol(c)) {
            Some(Symbol::Bits(node)) => match &ast.node(node).stmt {
                Stmt::DefBits { bits, .. } => Some(bits.as_slice()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Translate bitmap rows through the `DEFBITS` patterns. The image is cut into cells of
    /// `width` x `height` pixels, emitted left to right and top to bottom, each cell row by
    /// row with eight pixels per byte, most significant bit first.
    pub(super) fn bitmap_bytes(&mut self, site: Site) -> Step<Vec<Byte>> {
        let ast = self.ast;
        let node = ast.node(site.node);
        let (width, height, rows) = match &node.stmt {
            Stmt::Bitmap {
                width,
                height,
                rows,
            } => (*width, *height, rows),
            _ => return Ok(Vec::new()),
        };

        let w = self.eval_number(width, site.scope)?;
        if w <= 0 || w % 8 != 0 {
            return fail(
                self.expr_loc(width),
                Error::BadBitmap(format!("width {} is not a positive multiple of 8", w)),
            );
        }
        let h = match height {
            Some(height) => self.eval_number(height, site.scope)?,
            None => rows.len() as Number,
        };
        if h <= 0 || rows.len() as Number % h != 0 {
            return fail(
                node.loc,
                Error::BadBitmap(format!("{} rows cannot be cut into cells of height {}", rows.len(), h)),
            );
        }
        let (w, h) = (w as usize, h as usize);

        let mut pixels: Vec<Vec<bool>> = Vec::with_capacity(rows.len());
        for (loc, row) in rows {
            let mut bits = Vec::new();
            for c in row.chars() {
                match self.bits_of(c, site.scope) {
                    Some(pattern) => bits.extend_from_slice(pattern),
                    None => return fail(*loc, Error::UndefinedBits(c)),
                }
            }
            if bits.len() % w != 0 || pixels.first().map_or(false, |first| first.len() != bits.len()) {
                return fail(
                    *loc,
                    Error::BadBitmap(format!("row is {} pixels wide", bits.len())),
                );
            }
            pixels.push(bits);
        }

        let columns = pixels.first().map_or(0, |row| row.len() / w);
        let mut out = Vec::with_capacity(pixels.len() * columns * w / 8);
        for cell_row in pixels.chunks(h) {
            for column in 0..columns {
                for row in cell_row {
                    for byte in row[column * w..(column + 1) * w].chunks(8) {
                        out.push(byte.iter().fold(0, |acc, bit| (acc << 1) | *bit as Byte));
                    }
                }
            }
        }
        Ok(out)
    }
}
