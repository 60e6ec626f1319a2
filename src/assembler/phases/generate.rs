use super::types::{Abort, Failure, Located, Loc};
use super::walk::{Error, Invocation, Step, Walker};
use crate::assembler::ast::{ExprId, Stmt};
use crate::assembler::data::TypeRef;
use crate::assembler::model::FILLER;
use crate::assembler::scope::{ScopeId, Site};
use crate::spec::types::hw;

impl<'a> Walker<'a> {
    pub(super) fn generate_statement(&mut self, site: Site) -> Step {
        let ast = self.ast;
        let node = ast.node(site.node);
        let scope = site.scope;

        match &node.stmt {
            Stmt::Org(_) | Stmt::Seek(_) => self.place(site),
            Stmt::Instruction { mnemonic, operands } => {
                self.generate_instruction(site, mnemonic, operands, node.loc)
            }
            Stmt::Invoke { args, .. } => match self.state.invocations.get(&site).copied() {
                Some(Invocation::Data(ty)) => self.generate_data(site, ty, args, node.loc),
                Some(Invocation::Macro { body, scope }) => {
                    Ok(self.in_macro(|w| w.walk(body, scope))?)
                }
                None => Ok(()),
            },
            Stmt::Reserve { count, fill } => {
                let n = self.reserve_count(*count, scope)?;
                let value = match fill {
                    Some(fill) => {
                        let v = self.eval_number(*fill, scope)?;
                        match hw::byte_from_number(v) {
                            Some(b) => Some(b),
                            None => {
                                self.pad_reserved(site, 0, node.loc)?;
                                let loc = self.expr_loc(*fill);
                                return Err(Located::with_loc(loc, Error::ValueOutOfRange(v, "a byte")).into());
                            }
                        }
                    }
                    None => None,
                };
                Ok(self.emit(std::iter::repeat(value).take(n), node.loc)?)
            }
            Stmt::Bitmap { .. } => {
                let bytes = self.bitmap_bytes(site)?;
                Ok(self.emit(bytes.into_iter().map(Some), node.loc)?)
            }
            Stmt::Incbin { data, .. } => Ok(self.emit(data.iter().copied().map(Some), node.loc)?),
            Stmt::Label(_)
            | Stmt::Equ { .. }
            | Stmt::Message(..)
            | Stmt::Macro { .. }
            | Stmt::Struct { .. }
            | Stmt::Radix(_)
            | Stmt::DefBits { .. }
            | Stmt::Block { .. }
            | Stmt::If(_) => Ok(()),
        }
    }

    fn generate_instruction(
        &mut self,
        site: Site,
        mnemonic: &str,
        operands: &[ExprId],
        loc: Loc,
    ) -> Step {
        let instruction = match self.state.instructions.get(&site).copied().flatten() {
            Some(instruction) => instruction,
            None => return Ok(()),
        };

        let mut slots = Vec::new();
        let values = self
            .render_instruction(mnemonic, operands, site.scope, &mut slots)
            .and_then(|_| {
                slots
                    .iter()
                    .map(|slot| self.slot_value(*slot))
                    .collect::<Step<Vec<_>>>()
            });
        let values = match values {
            Ok(values) => values,
            Err(failure) => {
                // Keep the space reserved at layout so later addresses stay put.
                self.emit(std::iter::repeat(Some(FILLER)).take(instruction.len()), loc)?;
                return Err(failure);
            }
        };

        let encoded = instruction.encode(self.statement_start().ip, &values);
        debug_assert_eq!(encoded.bytes.len(), instruction.len());
        self.emit(encoded.bytes.into_iter().map(Some), loc)?;
        for err in encoded.errors {
            self.log.error(Located::with_loc(loc, Error::Encoding(err)))?;
        }
        Ok(())
    }

    fn generate_data(&mut self, site: Site, ty: TypeRef, args: &[ExprId], loc: Loc) -> Step {
        let mut written = 0;
        let result = self.generate_elements(ty, args, site.scope, loc, &mut written);
        if let Err(Failure::Error(_)) = result {
            self.pad_reserved(site, written, loc)?;
        }
        result
    }

    fn generate_elements(
        &mut self,
        ty: TypeRef,
        args: &[ExprId],
        scope: ScopeId,
        loc: Loc,
        written: &mut usize,
    ) -> Step {
        let mut bytes = Vec::new();
        for arg in args {
            let seq = self.enum_data(*arg, scope, false)?;
            for element in seq.iter() {
                bytes.clear();
                self.pack(ty, element, &mut bytes)?;
                *written += bytes.len();
                self.emit(bytes.drain(..), loc)?;
            }
        }
        Ok(())
    }

    /// Fill the rest of the space layout gave `site` after `written` bytes, so that a
    /// statement which failed to generate still ends where its successors expect.
    fn pad_reserved(&mut self, site: Site, written: usize, loc: Loc) -> Result<(), Abort> {
        let reserved = self.state.reserved.get(&site).copied().unwrap_or(0);
        self.emit(std::iter::repeat(Some(FILLER)).take(reserved.saturating_sub(written)), loc)
    }
}
