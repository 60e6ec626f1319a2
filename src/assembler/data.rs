use super::ast::{Expr, ExprId, Stmt};
use super::eval::Element;
use super::phases::types::{Failure, Located};
use super::phases::walk::{fail, Error, Step, Walker};
use super::scope::{normalize, ScopeId, Site, Symbol};
use crate::spec::types::hw::{self, Byte, Number};
use std::rc::Rc;

/// A data type: one of the built-in scalars, or a struct identified by its definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Byte,
    Word,
    Struct(Site),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: TypeRef,
    pub offset: usize,
    /// Number of elements; `count` times the size of `ty` bytes are reserved.
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub name: String,
    pub size: usize,
    pub fields: Vec<FieldLayout>,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        let key = normalize(name);
        self.fields.iter().find(|f| normalize(&f.name) == key)
    }
}

fn zeros(n: usize) -> impl Iterator<Item = Option<Byte>> {
    std::iter::repeat(Some(0)).take(n)
}

impl<'a> Walker<'a> {
    pub fn type_size(&mut self, ty: TypeRef) -> Step<usize> {
        match ty {
            TypeRef::Byte => Ok(1),
            TypeRef::Word => Ok(2),
            TypeRef::Struct(site) => Ok(self.struct_layout(site)?.size),
        }
    }

    fn type_name(&self, ty: TypeRef) -> String {
        match ty {
            TypeRef::Byte => "BYTE".to_owned(),
            TypeRef::Word => "WORD".to_owned(),
            TypeRef::Struct(site) => match &self.ast.node(site.node).stmt {
                Stmt::Struct { name, .. } => name.clone(),
                _ => "?".to_owned(),
            },
        }
    }

    /// Lay out a struct the first time it is needed. Every field initializer must consist of
    /// `?` only; the number of them is the field's element count.
    pub fn struct_layout(&mut self, site: Site) -> Step<Rc<StructLayout>> {
        if let Some(layout) = self.state.structs.get(&site) {
            return Ok(layout.clone());
        }

        let ast = self.ast;
        let node = ast.node(site.node);
        let (name, fields) = match &node.stmt {
            Stmt::Struct { name, fields } => (name, fields),
            other => panic!("struct type bound to {:?}", other),
        };
        if !self.state.active_structs.insert(site) {
            return fail(node.loc, Error::RecursiveStruct(name.clone()));
        }

        let result = (|| {
            let mut layout = StructLayout {
                name: name.clone(),
                size: 0,
                fields: Vec::with_capacity(fields.len()),
            };
            for field in fields {
                if layout.field(&field.name).is_some() {
                    return fail(field.loc, Error::DuplicateField(field.name.clone()));
                }
                let ty = match self.scopes.find_symbol(site.scope, &field.type_name) {
                    Some(Symbol::Type(ty)) => ty,
                    Some(_) => {
                        return fail(
                            field.loc,
                            Error::TypeMismatch(format!("'{}'", field.type_name), "a type"),
                        )
                    }
                    None => return fail(field.loc, Error::UndefinedSymbol(field.type_name.clone())),
                };

                let seq = self.enum_data(field.init, site.scope, true)?;
                let shape_only = seq.iter().all(|elem| match elem {
                    Element::Expr(expr, _) => *ast.expr(expr) == Expr::Uninit,
                    Element::Char(_) => false,
                });
                if !shape_only || seq.is_empty() {
                    return fail(field.loc, Error::FieldInitializer(field.name.clone()));
                }

                let count = seq.len();
                let size = self.type_size(ty)? * count;
                layout.fields.push(FieldLayout {
                    name: field.name.clone(),
                    ty,
                    offset: layout.size,
                    count,
                });
                layout.size += size;
            }
            Ok(layout)
        })();
        self.state.active_structs.remove(&site);

        let layout = Rc::new(result?);
        log::trace!("struct {} laid out, {} bytes", layout.name, layout.size);
        self.state.structs.insert(site, layout.clone());
        Ok(layout)
    }

    /// Lower one data element of type `ty` into bytes. `?` packs to unwritten bytes.
    pub fn pack(&mut self, ty: TypeRef, element: Element, out: &mut Vec<Option<Byte>>) -> Step {
        let (expr, scope) = match element {
            Element::Char(c) => return self.pack_number(ty, c, None, out),
            Element::Expr(expr, scope) => (expr, scope),
        };

        let ast = self.ast;
        let (target, target_scope) = self.follow(expr, scope)?;
        match ast.expr(target) {
            Expr::Uninit => {
                let size = self.type_size(ty)?;
                out.extend(std::iter::repeat(None).take(size));
                return Ok(());
            }
            Expr::Number(0) => {
                let size = self.type_size(ty)?;
                out.extend(zeros(size));
                return Ok(());
            }
            _ => (),
        }

        let site = match ty {
            TypeRef::Struct(site) => site,
            _ => {
                let n = self.eval_number(expr, scope)?;
                return self.pack_number(ty, n, Some(expr), out);
            }
        };

        let layout = self.struct_layout(site)?;
        let loc = self.expr_loc(target);
        match ast.expr(target) {
            Expr::Array(items) => {
                if items.len() != layout.fields.len() {
                    return fail(loc, Error::FieldCount(layout.fields.len(), items.len()));
                }
                for (field, item) in layout.fields.iter().zip(items) {
                    self.pack_field(field, Some((*item, target_scope)), out)?;
                }
                Ok(())
            }
            Expr::Map(pairs) => {
                for (key, item) in pairs {
                    if layout.field(key).is_none() {
                        let loc = self.expr_loc(*item);
                        return fail(loc, Error::UnknownField(layout.name.clone(), key.clone()));
                    }
                }
                for field in &layout.fields {
                    let item = pairs
                        .iter()
                        .find(|(key, _)| normalize(key) == normalize(&field.name))
                        .map(|(_, item)| (*item, target_scope));
                    self.pack_field(field, item, out)?;
                }
                Ok(())
            }
            _ => fail(
                loc,
                Error::TypeMismatch(
                    format!("'{}'", ast.show(target)),
                    "a struct literal ([...] or {...})",
                ),
            ),
        }
    }

    fn pack_number(
        &mut self,
        ty: TypeRef,
        n: Number,
        expr: Option<ExprId>,
        out: &mut Vec<Option<Byte>>,
    ) -> Step {
        let bytes = match ty {
            TypeRef::Byte => hw::byte_from_number(n).map(|b| vec![b]),
            TypeRef::Word => hw::word_from_number(n).map(|w| hw::word_to_bytes(w).to_vec()),
            TypeRef::Struct(_) => {
                let err = Error::TypeMismatch(format!("number {}", n), "a struct literal");
                return Err(Failure::Error(self.locate(expr, err)));
            }
        };
        match bytes {
            Some(bytes) => {
                out.extend(bytes.into_iter().map(Some));
                Ok(())
            }
            None => {
                let err = Error::ValueOutOfRange(n, if ty == TypeRef::Byte { "a byte" } else { "a word" });
                Err(Failure::Error(self.locate(expr, err)))
            }
        }
    }

    fn locate(&self, expr: Option<ExprId>, err: Error) -> Located<Error> {
        match expr {
            Some(expr) => Located::with_loc(self.expr_loc(expr), err),
            None => Located::from(err),
        }
    }

    /// Pack one struct field. Array fields take their elements from the value's data
    /// sequence and are zero-filled when it runs short.
    fn pack_field(
        &mut self,
        field: &FieldLayout,
        value: Option<(ExprId, ScopeId)>,
        out: &mut Vec<Option<Byte>>,
    ) -> Step {
        let size = self.type_size(field.ty)? * field.count;
        let start = out.len();

        match value {
            None => out.extend(zeros(size)),
            Some((expr, scope)) if field.count == 1 => {
                self.pack(field.ty, Element::Expr(expr, scope), out)?
            }
            Some((expr, scope)) => {
                let seq = self.enum_data(expr, scope, true)?;
                if seq.len() > field.count {
                    let loc = self.expr_loc(expr);
                    return fail(
                        loc,
                        Error::TooManyElements(field.name.clone(), field.count, seq.len()),
                    );
                }
                for element in seq.iter() {
                    self.pack(field.ty, element, out)?;
                }
                let missing = size - (out.len() - start);
                out.extend(zeros(missing));
            }
        }

        assert_eq!(
            out.len() - start,
            size,
            "field '{}' of type {} packed to the wrong size",
            field.name,
            self.type_name(field.ty)
        );
        Ok(())
    }

    /// Elements in one data declaration argument.
    pub fn data_len(&mut self, expr: ExprId, scope: ScopeId) -> Step<usize> {
        Ok(self.enum_data(expr, scope, false)?.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fields_are_found_ignoring_case() {
        let layout = StructLayout {
            name: "Point".to_owned(),
            size: 3,
            fields: vec![
                FieldLayout {
                    name: "x".to_owned(),
                    ty: TypeRef::Byte,
                    offset: 0,
                    count: 1,
                },
                FieldLayout {
                    name: "Y".to_owned(),
                    ty: TypeRef::Word,
                    offset: 1,
                    count: 1,
                },
            ],
        };
        assert_eq!(layout.field("y").map(|f| f.offset), Some(1));
        assert!(layout.field("z").is_none());
    }
}
