//! Syntax tree of a parsed unit

use std::fmt;

/// Declared type of a field, local, parameter or return value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Void,
    Int,
    Long,
    Double,
    Boolean,
    Char,
    /// `var`, inferred from the initialiser
    Inferred,
    /// `String`, `Object`, a user class or a built-in throwable
    Named(String),
    Array(Box<TypeRef>),
}

impl TypeRef {
    pub fn string() -> Self {
        Self::Named("String".into())
    }

    #[must_use]
    pub fn array_of(self) -> Self {
        Self::Array(Box::new(self))
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Double | Self::Char)
    }

    pub const fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Int | Self::Long | Self::Double | Self::Boolean | Self::Char
        )
    }

    /// True for `String[]`, the only accepted entry-point parameter
    pub fn is_string_array(&self) -> bool {
        matches!(self, Self::Array(inner) if **inner == Self::string())
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Int => f.write_str("int"),
            Self::Long => f.write_str("long"),
            Self::Double => f.write_str("double"),
            Self::Boolean => f.write_str("boolean"),
            Self::Char => f.write_str("char"),
            Self::Inferred => f.write_str("var"),
            Self::Named(name) => f.write_str(name),
            Self::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    Public,
    Protected,
    #[default]
    Package,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    pub is_abstract: bool,
}

/// One parsed source unit
#[derive(Debug, Clone, PartialEq)]
pub struct CompilationUnit {
    pub name: String,
    pub package: Option<String>,
    pub imports: Vec<String>,
    pub classes: Vec<ClassDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub modifiers: Modifiers,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub constructors: Vec<MethodDecl>,
    pub line: u32,
    pub column: u32,
}

impl ClassDecl {
    /// First method with the given name and arity
    pub fn method(&self, name: &str, arity: usize) -> Option<&MethodDecl> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.params.len() == arity)
    }

    pub fn has_method_named(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name == name)
    }

    pub fn constructor(&self, arity: usize) -> Option<&MethodDecl> {
        self.constructors.iter().find(|c| c.params.len() == arity)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeRef,
    pub modifiers: Modifiers,
    pub init: Option<Expr>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    pub modifiers: Modifiers,
    /// `Void` for constructors
    pub ret: TypeRef,
    pub params: Vec<Param>,
    pub body: Block,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `T a = x, b;`
    Local {
        ty: TypeRef,
        vars: Vec<(String, Option<Expr>)>,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Vec<Stmt>,
        cond: Option<Expr>,
        update: Vec<Expr>,
        body: Box<Stmt>,
    },
    ForEach {
        ty: TypeRef,
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Block(Block),
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// Alternatives of a multi-catch, `A | B`
    pub types: Vec<String>,
    pub name: String,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
    pub column: u32,
}

impl Expr {
    /// Levels in the tree rooted here, a leaf counting as one
    pub fn height(&self) -> usize {
        let tallest = |exprs: &[Self]| exprs.iter().map(Self::height).max().unwrap_or(0);
        1 + match &self.kind {
            ExprKind::Literal(_) | ExprKind::Name(_) | ExprKind::This => 0,
            ExprKind::Field { target, .. }
            | ExprKind::IncDec { target, .. }
            | ExprKind::Unary { expr: target, .. }
            | ExprKind::Cast { expr: target, .. } => target.height(),
            ExprKind::Index { target, index } => target.height().max(index.height()),
            ExprKind::Call { target, args, .. } => {
                target.as_deref().map_or(0, Self::height).max(tallest(args))
            }
            ExprKind::New { args, .. } => tallest(args),
            ExprKind::NewArray { dims, .. } => tallest(dims),
            ExprKind::ArrayLit { items, .. } => tallest(items),
            ExprKind::Binary { lhs, rhs, .. } => lhs.height().max(rhs.height()),
            ExprKind::Assign { target, value, .. } => target.height().max(value.height()),
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => cond.height().max(then.height()).max(otherwise.height()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::BitAnd => "&",
            Self::BitXor => "^",
            Self::BitOr => "|",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Name(String),
    This,
    Field {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        target: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    New {
        class: String,
        args: Vec<Expr>,
    },
    /// `new T[a][b][]`: `dims` holds the sized dimensions, `ty` the full array type
    NewArray {
        ty: TypeRef,
        dims: Vec<Expr>,
    },
    /// `{a, b}` or `new T[] {a, b}`
    ArrayLit {
        ty: TypeRef,
        items: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    IncDec {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Cast {
        ty: TypeRef,
        expr: Box<Expr>,
    },
}

impl ExprKind {
    /// Whether the expression may appear as a statement on its own
    pub const fn is_statement_expression(&self) -> bool {
        matches!(
            self,
            Self::Call { .. } | Self::New { .. } | Self::Assign { .. } | Self::IncDec { .. }
        )
    }

    pub const fn is_assignable(&self) -> bool {
        matches!(self, Self::Name(_) | Self::Field { .. } | Self::Index { .. })
    }
}
