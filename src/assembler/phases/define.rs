use super::walk::{fail, Error, Step, Walker};
use crate::assembler::ast::Stmt;
use crate::assembler::data::TypeRef;
use crate::assembler::lang::Lang;
use crate::assembler::scope::{with_arity, Site, Symbol};
use crate::spec::types::hw::Register;

/// The symbol under which the `DEFBITS` pattern of a character is stored. Not a valid
/// identifier, so it cannot collide with user symbols.
pub fn bits_symbol(c: char) -> String {
    format!("$bits{}", c as u32)
}

fn is_reserved(name: &str) -> bool {
    Register::lookup(name).is_some() || Lang::get().is_mnemonic(name)
}

impl<'a> Walker<'a> {
    pub(super) fn define_statement(&mut self, site: Site) -> Step {
        let ast = self.ast;
        let node = ast.node(site.node);

        let (name, symbol) = match &node.stmt {
            Stmt::Label(name) => (name.clone(), Symbol::Label(site)),
            Stmt::Equ { name, params, .. } if params.is_empty() => (name.clone(), Symbol::Equ(site)),
            Stmt::Equ { name, params, .. } => (with_arity(name, params.len()), Symbol::Equ(site)),
            Stmt::Macro { name, params, .. } => {
                (with_arity(name, params.len()), Symbol::Macro(site.node))
            }
            Stmt::Struct { name, .. } => (name.clone(), Symbol::Type(TypeRef::Struct(site))),
            Stmt::DefBits { character, .. } => {
                let key = bits_symbol(*character);
                self.scopes
                    .define(site.scope, &key, Symbol::Bits(site.node), false)
                    .or_else(|err| fail(node.loc, err.into()))?;
                return Ok(());
            }
            _ => return Ok(()),
        };

        let bare = name.split('/').next().unwrap_or(&name);
        if is_reserved(bare) {
            return fail(node.loc, Error::Reserved(bare.to_owned()));
        }
        self.scopes
            .define(site.scope, &name, symbol, false)
            .or_else(|err| fail(node.loc, err.into()))
    }
}
