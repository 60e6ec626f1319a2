use super::phases::types::{FileId, Loc};
use crate::spec::types::hw::{Number, Radix, Register};
use std::fmt::{Display, Write};

/*
    The syntax tree lives in two arenas owned by `Ast`: statements (`Node`) and expressions
    (`Expr`). Both are addressed by index, and neither is mutated structurally once the parser
    is done with it. Anything a pass works out about a statement (a label's address, which
    branch of an `IF` was taken, the scope a macro invocation ran in) is stored by the passes,
    keyed by the statement and the scope it was visited in, never on the node.

    Every statement has exactly one owner, the block it was parsed into. The root block owns
    itself implicitly.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Xor,
    Or,
    LogicalAnd,
    LogicalOr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Number),
    Str(String),
    /// A comma separated list of data items.
    Concat(Vec<ExprId>),
    /// `count DUP value`
    Dup {
        count: ExprId,
        value: ExprId,
    },
    Unary(UnaryOp, ExprId),
    Binary(BinaryOp, ExprId, ExprId),
    Ternary(ExprId, ExprId, ExprId),
    /// A symbol reference. Dotted names (`Point.y`) walk struct fields when no symbol of
    /// that exact name exists.
    Ident {
        name: String,
        args: Option<Vec<ExprId>>,
    },
    SizeOf(ExprId),
    Defined(String),
    Register(Register),
    Deref(ExprId),
    /// `$`
    Ip,
    /// `$ofs`
    Op,
    SubOp {
        mnemonic: String,
        operands: Vec<ExprId>,
    },
    Array(Vec<ExprId>),
    Map(Vec<(String, ExprId)>),
    /// `?`
    Uninit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Root,
    File(FileId),
    Branch,
    Proc,
    MacroBody,
}

impl BlockKind {
    pub fn opens_scope(self) -> bool {
        matches!(self, BlockKind::Root | BlockKind::Proc | BlockKind::MacroBody)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub loc: Loc,
    pub name: String,
    pub type_name: String,
    pub init: ExprId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// `None` for the `ELSE` branch.
    pub cond: Option<ExprId>,
    pub block: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block {
        kind: BlockKind,
        children: Vec<NodeId>,
    },
    Label(String),
    Equ {
        name: String,
        params: Vec<String>,
        value: ExprId,
    },
    Org(ExprId),
    Seek(ExprId),
    Instruction {
        mnemonic: String,
        operands: Vec<ExprId>,
    },
    /// Either a macro invocation or a data declaration, which cannot be told apart until
    /// the name is resolved.
    Invoke {
        name: String,
        args: Vec<ExprId>,
    },
    Reserve {
        count: ExprId,
        fill: Option<ExprId>,
    },
    If(Vec<Branch>),
    Macro {
        name: String,
        params: Vec<String>,
        body: NodeId,
    },
    Struct {
        name: String,
        fields: Vec<Field>,
    },
    Radix(Radix),
    Message(MessageKind, ExprId),
    DefBits {
        character: char,
        bits: Vec<bool>,
    },
    Bitmap {
        width: ExprId,
        height: Option<ExprId>,
        rows: Vec<(Loc, String)>,
    },
    Incbin {
        path: String,
        data: Vec<u8>,
    },
}

#[derive(Debug)]
pub struct Node {
    pub loc: Loc,
    pub stmt: Stmt,
    owner: Option<NodeId>,
}

#[derive(Debug)]
struct ExprNode {
    loc: Loc,
    expr: Expr,
}

#[derive(Debug)]
pub struct Ast {
    nodes: Vec<Node>,
    exprs: Vec<ExprNode>,
}

impl Default for Ast {
    fn default() -> Self {
        Ast::new()
    }
}

impl Ast {
    pub fn new() -> Self {
        let root = Node {
            loc: Loc::new(0, 0, 0),
            stmt: Stmt::Block {
                kind: BlockKind::Root,
                children: Vec::new(),
            },
            owner: None,
        };
        Ast {
            nodes: vec![root],
            exprs: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn add_node(&mut self, loc: Loc, stmt: Stmt) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            loc,
            stmt,
            owner: None,
        });
        id
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0].expr
    }

    pub fn expr_loc(&self, id: ExprId) -> Loc {
        self.exprs[id.0].loc
    }

    pub fn add_expr(&mut self, loc: Loc, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len());
        self.exprs.push(ExprNode { loc, expr });
        id
    }

    pub fn owner(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].owner
    }

    fn set_owner(&mut self, child: NodeId, owner: NodeId) {
        let root = self.root();
        let node = &mut self.nodes[child.0];
        assert!(
            node.owner.is_none(),
            "node {:?} is already owned by {:?}",
            child,
            node.owner
        );
        assert_ne!(child, root, "the root block cannot be owned");
        node.owner = Some(owner);
    }

    /// Create a block owning `children`.
    pub fn add_block(&mut self, loc: Loc, kind: BlockKind, children: Vec<NodeId>) -> NodeId {
        let id = self.add_node(
            loc,
            Stmt::Block {
                kind,
                children: Vec::new(),
            },
        );
        for child in children {
            self.append(id, child);
        }
        id
    }

    /// Hand `child` over to the block `block`.
    pub fn append(&mut self, block: NodeId, child: NodeId) {
        self.set_owner(child, block);
        match &mut self.nodes[block.0].stmt {
            Stmt::Block { children, .. } => children.push(child),
            other => panic!("cannot append to a non-block statement {:?}", other),
        }
    }

    /// Statements which own other statements outside of a block (the branches of an `IF`,
    /// a macro body) take ownership with this.
    pub fn adopt(&mut self, owner: NodeId, child: NodeId) {
        self.set_owner(child, owner);
    }

    /// The nearest enclosing block which opens a scope.
    pub fn containing_scope(&self, id: NodeId) -> NodeId {
        let mut cur = self.owner(id);
        while let Some(owner) = cur {
            if let Stmt::Block { kind, .. } = self.node(owner).stmt {
                if kind.opens_scope() {
                    return owner;
                }
            }
            cur = self.owner(owner);
        }
        self.root()
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(&mut out, self.root(), 0);
        out
    }

    fn dump_node(&self, out: &mut String, id: NodeId, depth: usize) {
        let node = self.node(id);
        let indent = "  ".repeat(depth);
        let _ = write!(out, "{}{:>4}:{:<3} ", indent, node.loc.line, node.loc.col);
        let _ = match &node.stmt {
            Stmt::Block { kind, .. } => writeln!(
                out,
                "block {:?} (scope #{})",
                kind,
                self.containing_scope(id).0
            ),
            Stmt::Label(name) => writeln!(out, "label {}", name),
            Stmt::Equ {
                name,
                params,
                value,
            } => writeln!(
                out,
                "equ {}({}) = {}",
                name,
                params.join(","),
                self.show(*value)
            ),
            Stmt::Org(e) => writeln!(out, "org {}", self.show(*e)),
            Stmt::Seek(e) => writeln!(out, "seek {}", self.show(*e)),
            Stmt::Instruction { mnemonic, operands } => {
                writeln!(out, "{} {}", mnemonic, self.show_list(operands))
            }
            Stmt::Invoke { name, args } => {
                writeln!(out, "invoke {} {}", name, self.show_list(args))
            }
            Stmt::Reserve { count, fill } => match fill {
                Some(fill) => writeln!(out, "ds {}, {}", self.show(*count), self.show(*fill)),
                None => writeln!(out, "ds {}", self.show(*count)),
            },
            Stmt::If(branches) => writeln!(out, "if ({} branches)", branches.len()),
            Stmt::Macro { name, params, .. } => {
                writeln!(out, "macro {}({})", name, params.join(","))
            }
            Stmt::Struct { name, fields } => writeln!(
                out,
                "struct {} {{{}}}",
                name,
                fields
                    .iter()
                    .map(|f| format!("{}: {} {}", f.name, f.type_name, self.show(f.init)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Stmt::Radix(radix) => writeln!(out, "radix {}", radix.base()),
            Stmt::Message(kind, e) => writeln!(out, "{:?} {}", kind, self.show(*e)),
            Stmt::DefBits { character, bits } => writeln!(
                out,
                "defbits {:?} {}",
                character,
                bits.iter().map(|b| if *b { '1' } else { '0' }).collect::<String>()
            ),
            Stmt::Bitmap { rows, .. } => writeln!(out, "bitmap ({} rows)", rows.len()),
            Stmt::Incbin { path, data } => writeln!(out, "incbin {:?} ({} bytes)", path, data.len()),
        };

        match &node.stmt {
            Stmt::Block { children, .. } => {
                for child in children {
                    self.dump_node(out, *child, depth + 1);
                }
            }
            Stmt::If(branches) => {
                for branch in branches {
                    let _ = writeln!(
                        out,
                        "{}  {}",
                        indent,
                        branch
                            .cond
                            .map_or_else(|| "else".to_owned(), |c| format!("when {}", self.show(c)))
                    );
                    self.dump_node(out, branch.block, depth + 2);
                }
            }
            Stmt::Macro { body, .. } => self.dump_node(out, *body, depth + 1),
            _ => (),
        }
    }

    fn show_list(&self, list: &[ExprId]) -> String {
        list.iter()
            .map(|e| self.show(*e))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Render an expression back to (normalised) source form.
    pub fn show(&self, id: ExprId) -> String {
        match self.expr(id) {
            Expr::Number(n) => n.to_string(),
            Expr::Str(s) => format!("{:?}", s),
            Expr::Concat(items) => self.show_list(items),
            Expr::Dup { count, value } => {
                format!("{} DUP {}", self.show(*count), self.show(*value))
            }
            Expr::Unary(op, e) => format!("{}{}", op, self.show(*e)),
            Expr::Binary(op, l, r) => format!("({} {} {})", self.show(*l), op, self.show(*r)),
            Expr::Ternary(c, t, f) => format!(
                "({} ? {} : {})",
                self.show(*c),
                self.show(*t),
                self.show(*f)
            ),
            Expr::Ident { name, args: None } => name.clone(),
            Expr::Ident {
                name,
                args: Some(args),
            } => format!("{}({})", name, self.show_list(args)),
            Expr::SizeOf(e) => format!("sizeof({})", self.show(*e)),
            Expr::Defined(name) => format!("defined({})", name),
            Expr::Register(r) => r.to_string(),
            Expr::Deref(e) => format!("[{}]", self.show(*e)),
            Expr::Ip => "$".to_owned(),
            Expr::Op => "$ofs".to_owned(),
            Expr::SubOp { mnemonic, operands } => {
                format!("{} {}", mnemonic, self.show_list(operands))
            }
            Expr::Array(items) => format!("[{}]", self.show_list(items)),
            Expr::Map(pairs) => format!(
                "{{{}}}",
                pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, self.show(*v)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Expr::Uninit => "?".to_owned(),
        }
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "~"),
            UnaryOp::LogicalNot => write!(f, "!"),
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&",
            BinaryOp::Xor => "^",
            BinaryOp::Or => "|",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn loc() -> Loc {
        Loc::new(0, 1, 1)
    }

    #[test]
    fn containing_scope_walks_owners() {
        let mut ast = Ast::new();
        let label = ast.add_node(loc(), Stmt::Label("x".to_owned()));
        let branch = ast.add_block(loc(), BlockKind::Branch, vec![label]);
        let proc = ast.add_block(loc(), BlockKind::Proc, vec![branch]);
        let file = ast.add_block(loc(), BlockKind::File(0), vec![proc]);
        let root = ast.root();
        ast.append(root, file);

        assert_eq!(ast.containing_scope(label), proc);
        assert_eq!(ast.containing_scope(proc), root);
        assert_eq!(ast.containing_scope(file), root);
    }

    #[test]
    #[should_panic(expected = "already owned")]
    fn nodes_are_owned_once() {
        let mut ast = Ast::new();
        let label = ast.add_node(loc(), Stmt::Label("x".to_owned()));
        ast.add_block(loc(), BlockKind::Branch, vec![label]);
        ast.add_block(loc(), BlockKind::Branch, vec![label]);
    }

    #[test]
    #[should_panic(expected = "root block cannot be owned")]
    fn the_root_has_no_owner() {
        let mut ast = Ast::new();
        let root = ast.root();
        ast.add_block(loc(), BlockKind::Proc, vec![root]);
    }

    #[test]
    fn expressions_render() {
        let mut ast = Ast::new();
        let ix = ast.add_expr(loc(), Expr::Register(Register::IX));
        let five = ast.add_expr(loc(), Expr::Number(5));
        let sum = ast.add_expr(loc(), Expr::Binary(BinaryOp::Add, ix, five));
        let deref = ast.add_expr(loc(), Expr::Deref(sum));
        assert_eq!(ast.show(deref), "[(IX + 5)]");
    }
}
