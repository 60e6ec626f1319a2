use super::ast::NodeId;
use super::data::TypeRef;
use once_cell::unsync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

/// A statement as visited in a particular scope. The same macro body statement is a
/// different site in every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Site {
    pub node: NodeId,
    pub scope: ScopeId,
}

impl Site {
    pub fn new(node: NodeId, scope: ScopeId) -> Self {
        Site { node, scope }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// A macro or `EQU` argument: an expression to be evaluated in the caller's scope.
    Expr {
        expr: super::ast::ExprId,
        scope: ScopeId,
    },
    Equ(Site),
    /// Resolved during layout.
    Label(Site),
    Type(TypeRef),
    Macro(NodeId),
    Bits(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Duplicate(String),
    Shadows(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Duplicate(name) => write!(f, "Symbol '{}' is already defined", name),
            Error::Shadows(name) => write!(
                f,
                "Symbol '{}' is already defined in an enclosing scope",
                name
            ),
        }
    }
}

#[derive(Debug)]
pub struct Entry {
    /// The spelling used at the definition.
    pub name: String,
    pub symbol: Symbol,
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    transient: bool,
    symbols: HashMap<String, Entry>,
    /// Local names with any `/N` arity suffix stripped, built on demand for `defined()`.
    weak_index: OnceCell<HashSet<String>>,
}

/// Every scope of the compilation, including the one-off scopes of macro invocations, which
/// are never reused once their invocation is done.
#[derive(Debug)]
pub struct Scopes {
    scopes: Vec<Scope>,
}

pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn with_arity(name: &str, arity: usize) -> String {
    format!("{}/{}", name, arity)
}

fn strip_arity(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) if key[idx + 1..].chars().all(|c| c.is_ascii_digit()) => &key[..idx],
        _ => key,
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Scopes::new()
    }
}

impl Scopes {
    pub fn new() -> Self {
        Scopes {
            scopes: vec![Scope::new(None, false)],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn create(&mut self, parent: ScopeId, transient: bool) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope::new(Some(parent), transient));
        id
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope.0].parent
    }

    fn ancestors(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), move |s| self.parent(*s))
    }

    pub fn define(
        &mut self,
        scope: ScopeId,
        name: &str,
        symbol: Symbol,
        can_replace: bool,
    ) -> Result<(), Error> {
        let key = normalize(name);

        if !can_replace {
            if self.scopes[scope.0].symbols.contains_key(&key) {
                return Err(Error::Duplicate(name.to_owned()));
            }
            let enclosing = self.parent(scope);
            if enclosing.map_or(false, |p| self.lookup_key(p, &key).is_some()) {
                return Err(Error::Shadows(name.to_owned()));
            }
        }

        log::trace!("define {} in scope #{}", key, scope.0);
        let local = &mut self.scopes[scope.0];
        local.symbols.insert(
            key,
            Entry {
                name: name.trim().to_owned(),
                symbol,
            },
        );
        local.weak_index = OnceCell::new();
        Ok(())
    }

    fn lookup_key(&self, scope: ScopeId, key: &str) -> Option<(ScopeId, &Entry)> {
        let bare = strip_arity(key);
        self.ancestors(scope).find_map(|s| {
            let symbols = &self.scopes[s.0].symbols;
            symbols
                .get(key)
                .or_else(|| symbols.get(bare))
                .map(|entry| (s, entry))
        })
    }

    /// Exact lookup first (including any `/N` suffix), then the bare name, then outward.
    pub fn find(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, &Entry)> {
        self.lookup_key(scope, &normalize(name))
    }

    pub fn find_symbol(&self, scope: ScopeId, name: &str) -> Option<Symbol> {
        self.find(scope, name).map(|(_, entry)| entry.symbol)
    }

    pub fn is_defined(&self, scope: ScopeId, name: &str, weak: bool) -> bool {
        if !weak {
            return self.find(scope, name).is_some();
        }

        let key = normalize(name);
        let bare = strip_arity(&key);
        self.ancestors(scope).any(|s| {
            let local = &self.scopes[s.0];
            local
                .weak_index
                .get_or_init(|| {
                    local
                        .symbols
                        .keys()
                        .map(|k| strip_arity(k).to_owned())
                        .collect()
                })
                .contains(bare)
        })
    }

    /// All entries of scopes which outlive the compilation (not macro invocations).
    pub fn persistent_entries(&self) -> impl Iterator<Item = (ScopeId, &Entry)> {
        self.scopes
            .iter()
            .enumerate()
            .filter(|(_, scope)| !scope.transient)
            .flat_map(|(idx, scope)| scope.symbols.values().map(move |e| (ScopeId(idx), e)))
    }
}

impl Scope {
    fn new(parent: Option<ScopeId>, transient: bool) -> Self {
        Scope {
            parent,
            transient,
            symbols: HashMap::new(),
            weak_index: OnceCell::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn macro_symbol() -> Symbol {
        Symbol::Macro(crate::assembler::ast::Ast::new().root())
    }

    fn ty() -> Symbol {
        Symbol::Type(TypeRef::Byte)
    }

    #[test]
    fn define_then_find() {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        scopes.define(root, "Start", ty(), false).unwrap();
        assert_eq!(scopes.find_symbol(root, "start"), Some(ty()));
        assert_eq!(scopes.find(root, " START ").unwrap().1.name, "Start");
    }

    #[test]
    fn duplicates_and_shadowing_are_rejected() {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        let inner = scopes.create(root, false);
        scopes.define(root, "x", ty(), false).unwrap();

        assert_eq!(
            scopes.define(root, "X", ty(), false),
            Err(Error::Duplicate("X".to_owned()))
        );
        assert_eq!(
            scopes.define(inner, "x", ty(), false),
            Err(Error::Shadows("x".to_owned()))
        );
        assert!(scopes.define(root, "x", ty(), true).is_ok());
    }

    #[test]
    fn lookup_recurses_outward() {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        let inner = scopes.create(root, false);
        let innermost = scopes.create(inner, true);
        scopes.define(root, "outer", ty(), false).unwrap();
        scopes.define(inner, "local", ty(), false).unwrap();

        assert_eq!(scopes.find(innermost, "outer").map(|(s, _)| s), Some(root));
        assert_eq!(scopes.find(innermost, "local").map(|(s, _)| s), Some(inner));
        assert!(scopes.find(root, "local").is_none());

        scopes.define(innermost, "param", ty(), false).unwrap();
        let mut persistent: Vec<_> = scopes
            .persistent_entries()
            .map(|(_, e)| e.name.clone())
            .collect();
        persistent.sort();
        assert_eq!(persistent, vec!["local".to_owned(), "outer".to_owned()]);
    }

    #[test]
    fn arity_lookup_falls_back_to_bare_name() {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        scopes
            .define(root, &with_arity("m", 2), macro_symbol(), false)
            .unwrap();
        scopes.define(root, "n", ty(), false).unwrap();

        assert!(scopes.find(root, "m/2").is_some());
        assert!(scopes.find(root, "m/1").is_none());
        assert!(scopes.find(root, "m").is_none());
        assert_eq!(scopes.find_symbol(root, "n/3"), Some(ty()));
    }

    #[test]
    fn weak_lookup_ignores_arity() {
        let mut scopes = Scopes::new();
        let root = scopes.root();
        let inner = scopes.create(root, false);
        assert!(!scopes.is_defined(inner, "m", true));

        scopes
            .define(root, &with_arity("m", 1), macro_symbol(), false)
            .unwrap();
        assert!(scopes.is_defined(inner, "m", true));
        assert!(scopes.is_defined(inner, "M/7", true));
        assert!(!scopes.is_defined(inner, "m", false));

        // The cached index of a scope is rebuilt after a definition.
        scopes.define(inner, "late", ty(), false).unwrap();
        assert!(scopes.is_defined(inner, "late", true));
    }
}
