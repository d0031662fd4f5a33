//! Hand-written recursive descent parser.
//!
//! The parser accepts one of two dialects. The lenient dialect is what the
//! dynamic backend understands and rejects a few newer constructs; the full
//! dialect accepts the whole language.

use super::ast::{
    BinaryOp, Block, CatchClause, ClassDecl, CompilationUnit, Expr, ExprKind, FieldDecl, Literal,
    MethodDecl, Modifiers, Param, Stmt, StmtKind, TypeRef, UnaryOp, Visibility,
};
use super::lexer::{Spanned, Token, lex};
use super::Diagnostic;
use crate::source::SourceUnit;

/// Maximum nesting of statements and expressions
pub const MAX_NESTING: usize = 96;

/// Maximum height of one expression tree, left-associative chains included
pub const MAX_EXPR_HEIGHT: usize = 512;

/// Grammar accepted by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// No enhanced `for`, no `var`
    Lenient,
    Full,
}

impl Dialect {
    const fn allows_enhanced_for(self) -> bool {
        matches!(self, Self::Full)
    }

    const fn allows_var(self) -> bool {
        matches!(self, Self::Full)
    }
}

type PResult<T> = Result<T, Diagnostic>;

/// Parse one unit with the given dialect
pub fn parse(unit: &SourceUnit, dialect: Dialect) -> PResult<CompilationUnit> {
    let tokens = lex(unit)?;
    Parser {
        unit,
        tokens,
        pos: 0,
        dialect,
        depth: 0,
    }
    .compilation_unit()
}

struct Parser<'a> {
    unit: &'a SourceUnit,
    tokens: Vec<Spanned>,
    pos: usize,
    dialect: Dialect,
    depth: usize,
}

impl Parser<'_> {
    // === Token stream ===

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Position of the current token, or just past the last one
    fn position(&self) -> (u32, u32) {
        match self.tokens.get(self.pos) {
            Some(s) => (s.line, s.column),
            None => self.tokens.last().map_or((1, 1), |s| {
                let width = u32::try_from(s.span.len()).unwrap_or(0);
                (s.line, s.column + width)
            }),
        }
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        let (line, column) = self.position();
        Diagnostic::new(self.unit, line, column, message)
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        match self.peek() {
            Some(found) => self.error_here(format!("expected {expected}, found {found}")),
            None => self.error_here(format!("expected {expected}, found end of input")),
        }
    }

    fn expect(&mut self, expected: &Token) -> PResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{}`", expected.symbol())))
        }
    }

    fn ident(&mut self) -> PResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    /// Height of a node over a subtree of `height` and a sibling of `other`
    fn grown(&self, height: usize, other: usize) -> PResult<usize> {
        let grown = height.max(other) + 1;
        if grown > MAX_EXPR_HEIGHT {
            return Err(self.error_here("expression is nested too deeply"));
        }
        Ok(grown)
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error_here("code is nested too deeply"));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    // === Declarations ===

    fn compilation_unit(mut self) -> PResult<CompilationUnit> {
        let mut package = None;
        let mut imports = Vec::new();

        if self.eat(&Token::Package) {
            package = Some(self.qualified_name(false)?);
            self.expect(&Token::Semi)?;
        }
        while self.eat(&Token::Import) {
            self.eat(&Token::Static);
            imports.push(self.qualified_name(true)?);
            self.expect(&Token::Semi)?;
        }

        let mut classes = Vec::new();
        while self.peek().is_some() {
            if self.eat(&Token::Semi) {
                continue;
            }
            classes.push(self.class_decl()?);
        }
        if classes.is_empty() {
            return Err(self.unexpected("a class declaration"));
        }

        Ok(CompilationUnit {
            name: self.unit.name().to_string(),
            package,
            imports,
            classes,
        })
    }

    fn qualified_name(&mut self, allow_star: bool) -> PResult<String> {
        let mut name = self.ident()?;
        while self.eat(&Token::Dot) {
            if allow_star && self.eat(&Token::Star) {
                name.push_str(".*");
                break;
            }
            name.push('.');
            name.push_str(&self.ident()?);
        }
        Ok(name)
    }

    fn modifiers(&mut self) -> PResult<Modifiers> {
        let mut modifiers = Modifiers::default();
        let mut visibility_seen = false;
        loop {
            let visibility = match self.peek() {
                Some(Token::Public) => Visibility::Public,
                Some(Token::Protected) => Visibility::Protected,
                Some(Token::Private) => Visibility::Private,
                Some(Token::Static) => {
                    self.flag(&mut modifiers.is_static, "static")?;
                    continue;
                }
                Some(Token::Final) => {
                    self.flag(&mut modifiers.is_final, "final")?;
                    continue;
                }
                Some(Token::Abstract) => {
                    self.flag(&mut modifiers.is_abstract, "abstract")?;
                    continue;
                }
                _ => return Ok(modifiers),
            };
            if visibility_seen {
                return Err(self.error_here("illegal combination of access modifiers"));
            }
            visibility_seen = true;
            modifiers.visibility = visibility;
            self.pos += 1;
        }
    }

    fn flag(&mut self, slot: &mut bool, name: &str) -> PResult<()> {
        if *slot {
            return Err(self.error_here(format!("repeated modifier `{name}`")));
        }
        *slot = true;
        self.pos += 1;
        Ok(())
    }

    fn class_decl(&mut self) -> PResult<ClassDecl> {
        let modifiers = self.modifiers()?;
        let (line, column) = self.position();
        self.expect(&Token::Class)?;
        let name = self.ident()?;
        self.expect(&Token::LBrace)?;

        let mut class = ClassDecl {
            name,
            modifiers,
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            line,
            column,
        };

        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.unexpected("`}` to close the class body"));
            }
            if self.eat(&Token::Semi) {
                continue;
            }
            self.member(&mut class)?;
        }
        Ok(class)
    }

    fn member(&mut self, class: &mut ClassDecl) -> PResult<()> {
        let modifiers = self.modifiers()?;
        let (line, column) = self.position();

        if matches!(self.peek(), Some(Token::Ident(name)) if *name == class.name)
            && self.peek_nth(1) == Some(&Token::LParen)
        {
            let name = self.ident()?;
            let params = self.params()?;
            let body = self.method_body()?;
            class.constructors.push(MethodDecl {
                name,
                modifiers,
                ret: TypeRef::Void,
                params,
                body,
                line,
                column,
            });
            return Ok(());
        }

        if self.check(&Token::Class) {
            return Err(self.error_here("nested classes are not supported"));
        }

        let ty = self.type_ref(true)?;
        let name = self.ident()?;

        if self.check(&Token::LParen) {
            let params = self.params()?;
            let body = self.method_body()?;
            class.methods.push(MethodDecl {
                name,
                modifiers,
                ret: ty,
                params,
                body,
                line,
                column,
            });
            return Ok(());
        }

        if ty == TypeRef::Void {
            return Err(self.error_here("fields cannot have type `void`"));
        }
        let mut name = name;
        loop {
            let field_line = self.position().0;
            let init = if self.eat(&Token::Assign) {
                Some(self.var_init(&ty)?)
            } else {
                None
            };
            class.fields.push(FieldDecl {
                name,
                ty: ty.clone(),
                modifiers,
                init,
                line: field_line,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
            name = self.ident()?;
        }
        self.expect(&Token::Semi)
    }

    fn params(&mut self) -> PResult<Vec<Param>> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(params);
        }
        loop {
            self.eat(&Token::Final);
            let mut ty = self.type_ref(false)?;
            let name = self.ident()?;
            while self.eat(&Token::LBracket) {
                self.expect(&Token::RBracket)?;
                ty = ty.array_of();
            }
            params.push(Param { name, ty });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(params)
    }

    fn method_body(&mut self) -> PResult<Block> {
        if self.check(&Token::Semi) {
            return Err(self.error_here("missing method body"));
        }
        self.block()
    }

    fn type_ref(&mut self, allow_void: bool) -> PResult<TypeRef> {
        let base = match self.peek() {
            Some(Token::Void) if allow_void => {
                self.pos += 1;
                return Ok(TypeRef::Void);
            }
            Some(Token::Int) => TypeRef::Int,
            Some(Token::Long) => TypeRef::Long,
            Some(Token::Double) => TypeRef::Double,
            Some(Token::Boolean) => TypeRef::Boolean,
            Some(Token::Char) => TypeRef::Char,
            Some(Token::Ident(_)) => {
                let qualified = self.qualified_name(false)?;
                let simple = qualified.rsplit('.').next().unwrap_or(&qualified);
                let mut ty = TypeRef::Named(simple.to_string());
                while self.check(&Token::LBracket) && self.peek_nth(1) == Some(&Token::RBracket) {
                    self.pos += 2;
                    ty = ty.array_of();
                }
                return Ok(ty);
            }
            _ => return Err(self.unexpected("a type")),
        };
        self.pos += 1;
        let mut ty = base;
        while self.check(&Token::LBracket) && self.peek_nth(1) == Some(&Token::RBracket) {
            self.pos += 2;
            ty = ty.array_of();
        }
        Ok(ty)
    }

    fn var_init(&mut self, ty: &TypeRef) -> PResult<Expr> {
        if self.check(&Token::LBrace) {
            let TypeRef::Array(elem) = ty else {
                return Err(self.error_here(format!("illegal initializer for {ty}")));
            };
            return self.array_lit(ty.clone(), elem);
        }
        self.expr()
    }

    fn array_lit(&mut self, ty: TypeRef, elem: &TypeRef) -> PResult<Expr> {
        let (line, column) = self.position();
        self.expect(&Token::LBrace)?;
        let mut items = Vec::new();
        while !self.check(&Token::RBrace) {
            items.push(self.nested(|p| p.var_init(elem))?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Expr {
            kind: ExprKind::ArrayLit { ty, items },
            line,
            column,
        })
    }

    // === Statements ===

    fn block(&mut self) -> PResult<Block> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.statement()?);
        }
        Ok(Block { stmts })
    }

    fn statement(&mut self) -> PResult<Stmt> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> PResult<Stmt> {
        let (line, column) = self.position();
        let stmt = |kind| Stmt { kind, line, column };

        let kind = match self.peek() {
            Some(Token::LBrace) => StmtKind::Block(self.block()?),
            Some(Token::Semi) => {
                self.pos += 1;
                StmtKind::Empty
            }
            Some(Token::If) => {
                self.pos += 1;
                let cond = self.paren_expr()?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat(&Token::Else) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then,
                    otherwise,
                }
            }
            Some(Token::While) => {
                self.pos += 1;
                let cond = self.paren_expr()?;
                let body = Box::new(self.statement()?);
                StmtKind::While { cond, body }
            }
            Some(Token::Do) => {
                self.pos += 1;
                let body = Box::new(self.statement()?);
                self.expect(&Token::While)?;
                let cond = self.paren_expr()?;
                self.expect(&Token::Semi)?;
                StmtKind::DoWhile { body, cond }
            }
            Some(Token::For) => return self.for_statement(line, column),
            Some(Token::Return) => {
                self.pos += 1;
                let value = if self.check(&Token::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(&Token::Semi)?;
                StmtKind::Return(value)
            }
            Some(Token::Break) => {
                self.pos += 1;
                self.expect(&Token::Semi)?;
                StmtKind::Break
            }
            Some(Token::Continue) => {
                self.pos += 1;
                self.expect(&Token::Semi)?;
                StmtKind::Continue
            }
            Some(Token::Throw) => {
                self.pos += 1;
                let value = self.expr()?;
                self.expect(&Token::Semi)?;
                StmtKind::Throw(value)
            }
            Some(Token::Try) => self.try_statement()?,
            Some(Token::Class) => return Err(self.error_here("local classes are not supported")),
            _ if self.looks_like_local() => {
                let kind = self.local_decl()?;
                self.expect(&Token::Semi)?;
                kind
            }
            _ => {
                let expr = self.expr()?;
                if !expr.kind.is_statement_expression() {
                    return Err(Diagnostic::new(
                        self.unit,
                        expr.line,
                        expr.column,
                        "not a statement",
                    ));
                }
                self.expect(&Token::Semi)?;
                StmtKind::Expr(expr)
            }
        };
        Ok(stmt(kind))
    }

    fn paren_expr(&mut self) -> PResult<Expr> {
        self.expect(&Token::LParen)?;
        let expr = self.expr()?;
        self.expect(&Token::RParen)?;
        Ok(expr)
    }

    /// Lookahead for `T name`, `T[] name`, `a.b.T name`, `final ...`, `var name`
    fn looks_like_local(&self) -> bool {
        match self.peek() {
            Some(Token::Int | Token::Long | Token::Double | Token::Boolean | Token::Char) => true,
            Some(Token::Final | Token::Var) => true,
            Some(Token::Ident(_)) => {
                let mut n = 1;
                while self.peek_nth(n) == Some(&Token::Dot)
                    && matches!(self.peek_nth(n + 1), Some(Token::Ident(_)))
                {
                    n += 2;
                }
                while self.peek_nth(n) == Some(&Token::LBracket)
                    && self.peek_nth(n + 1) == Some(&Token::RBracket)
                {
                    n += 2;
                }
                matches!(self.peek_nth(n), Some(Token::Ident(_)))
            }
            _ => false,
        }
    }

    fn local_type(&mut self) -> PResult<TypeRef> {
        self.eat(&Token::Final);
        if self.check(&Token::Var) {
            if !self.dialect.allows_var() {
                return Err(self.error_here("`var` declarations are not supported by this backend"));
            }
            self.pos += 1;
            return Ok(TypeRef::Inferred);
        }
        self.type_ref(false)
    }

    fn local_decl(&mut self) -> PResult<StmtKind> {
        let ty = self.local_type()?;
        let mut vars = Vec::new();
        loop {
            let name = self.ident()?;
            let mut var_ty = ty.clone();
            while self.eat(&Token::LBracket) {
                self.expect(&Token::RBracket)?;
                var_ty = var_ty.array_of();
            }
            if var_ty != ty {
                return Err(self.error_here("mixed array declarators are not supported"));
            }
            let init = if self.eat(&Token::Assign) {
                Some(self.var_init(&ty)?)
            } else {
                None
            };
            if ty == TypeRef::Inferred && init.is_none() {
                return Err(self.error_here("cannot infer type for local variable without initializer"));
            }
            vars.push((name, init));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(StmtKind::Local { ty, vars })
    }

    fn for_statement(&mut self, line: u32, column: u32) -> PResult<Stmt> {
        self.expect(&Token::For)?;
        self.expect(&Token::LParen)?;

        if self.looks_like_foreach() {
            if !self.dialect.allows_enhanced_for() {
                return Err(self.error_here("enhanced for statements are not supported by this backend"));
            }
            let ty = self.local_type()?;
            let name = self.ident()?;
            self.expect(&Token::Colon)?;
            let iterable = self.expr()?;
            self.expect(&Token::RParen)?;
            let body = Box::new(self.statement()?);
            return Ok(Stmt {
                kind: StmtKind::ForEach {
                    ty,
                    name,
                    iterable,
                    body,
                },
                line,
                column,
            });
        }

        let mut init = Vec::new();
        if !self.check(&Token::Semi) {
            if self.looks_like_local() {
                let (l, c) = self.position();
                init.push(Stmt {
                    kind: self.local_decl()?,
                    line: l,
                    column: c,
                });
            } else {
                loop {
                    let expr = self.expr()?;
                    init.push(Stmt {
                        line: expr.line,
                        column: expr.column,
                        kind: StmtKind::Expr(expr),
                    });
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
            }
        }
        self.expect(&Token::Semi)?;

        let cond = if self.check(&Token::Semi) {
            None
        } else {
            Some(self.expr()?)
        };
        self.expect(&Token::Semi)?;

        let mut update = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                update.push(self.expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        let body = Box::new(self.statement()?);

        Ok(Stmt {
            kind: StmtKind::For {
                init,
                cond,
                update,
                body,
            },
            line,
            column,
        })
    }

    /// `T name :` inside a `for (`
    fn looks_like_foreach(&self) -> bool {
        let mut n = 0;
        if self.peek_nth(n) == Some(&Token::Final) {
            n += 1;
        }
        match self.peek_nth(n) {
            Some(
                Token::Int
                | Token::Long
                | Token::Double
                | Token::Boolean
                | Token::Char
                | Token::Var
                | Token::Ident(_),
            ) => n += 1,
            _ => return false,
        }
        while self.peek_nth(n) == Some(&Token::Dot)
            && matches!(self.peek_nth(n + 1), Some(Token::Ident(_)))
        {
            n += 2;
        }
        while self.peek_nth(n) == Some(&Token::LBracket)
            && self.peek_nth(n + 1) == Some(&Token::RBracket)
        {
            n += 2;
        }
        matches!(self.peek_nth(n), Some(Token::Ident(_)))
            && self.peek_nth(n + 1) == Some(&Token::Colon)
    }

    fn try_statement(&mut self) -> PResult<StmtKind> {
        self.expect(&Token::Try)?;
        let body = self.block()?;
        let mut catches = Vec::new();
        while self.eat(&Token::Catch) {
            self.expect(&Token::LParen)?;
            self.eat(&Token::Final);
            let mut types = Vec::new();
            loop {
                let qualified = self.qualified_name(false)?;
                let simple = qualified.rsplit('.').next().unwrap_or(&qualified).to_string();
                types.push(simple);
                if !self.eat(&Token::Pipe) {
                    break;
                }
            }
            let name = self.ident()?;
            self.expect(&Token::RParen)?;
            let body = self.block()?;
            catches.push(CatchClause { types, name, body });
        }
        let finally = if self.eat(&Token::Finally) {
            Some(self.block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return Err(self.error_here("`try` without `catch` or `finally`"));
        }
        Ok(StmtKind::Try {
            body,
            catches,
            finally,
        })
    }

    // === Expressions ===

    fn expr(&mut self) -> PResult<Expr> {
        self.nested(Self::assignment)
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let target = self.conditional()?;
        let op = match self.peek() {
            Some(Token::Assign) => None,
            Some(Token::PlusAssign) => Some(BinaryOp::Add),
            Some(Token::MinusAssign) => Some(BinaryOp::Sub),
            Some(Token::StarAssign) => Some(BinaryOp::Mul),
            Some(Token::SlashAssign) => Some(BinaryOp::Div),
            Some(Token::PercentAssign) => Some(BinaryOp::Rem),
            _ => return Ok(target),
        };
        if !target.kind.is_assignable() {
            return Err(self.error_here("unexpected assignment, left side is not a variable"));
        }
        self.pos += 1;
        let value = self.nested(Self::assignment)?;
        Ok(Expr {
            line: target.line,
            column: target.column,
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
        })
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let cond = self.binary(1)?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.expr()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.nested(Self::conditional)?;
        Ok(Expr {
            line: cond.line,
            column: cond.column,
            kind: ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        })
    }

    fn binary_op(&self) -> Option<(BinaryOp, u8)> {
        let op = match self.peek()? {
            Token::OrOr => (BinaryOp::Or, 1),
            Token::AndAnd => (BinaryOp::And, 2),
            Token::Pipe => (BinaryOp::BitOr, 3),
            Token::Caret => (BinaryOp::BitXor, 4),
            Token::Amp => (BinaryOp::BitAnd, 5),
            Token::EqEq => (BinaryOp::Eq, 6),
            Token::NotEq => (BinaryOp::Ne, 6),
            Token::Lt => (BinaryOp::Lt, 7),
            Token::LtEq => (BinaryOp::Le, 7),
            Token::Gt => (BinaryOp::Gt, 7),
            Token::GtEq => (BinaryOp::Ge, 7),
            Token::Plus => (BinaryOp::Add, 8),
            Token::Minus => (BinaryOp::Sub, 8),
            Token::Star => (BinaryOp::Mul, 9),
            Token::Slash => (BinaryOp::Div, 9),
            Token::Percent => (BinaryOp::Rem, 9),
            _ => return None,
        };
        Some(op)
    }

    /// Precedence climbing over left-associative binary operators
    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        let mut height = lhs.height();
        while let Some((op, prec)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.nested(|p| p.binary(prec + 1))?;
            height = self.grown(height, rhs.height())?;
            lhs = Expr {
                line: lhs.line,
                column: lhs.column,
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let (line, column) = self.position();
        let op = match self.peek() {
            Some(Token::Minus) => {
                // The minimum int and long are only legal as negated literals
                let minimum = match self.peek_nth(1) {
                    Some(Token::IntLit(2_147_483_648)) => Some(Literal::Int(i32::MIN)),
                    Some(Token::LongLit(9_223_372_036_854_775_808)) => Some(Literal::Long(i64::MIN)),
                    _ => None,
                };
                if let Some(lit) = minimum {
                    self.pos += 2;
                    return self.postfix(Expr {
                        kind: ExprKind::Literal(lit),
                        line,
                        column,
                    });
                }
                UnaryOp::Neg
            }
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Tilde) => UnaryOp::BitNot,
            Some(Token::PlusPlus | Token::MinusMinus) => {
                let increment = self.check(&Token::PlusPlus);
                self.pos += 1;
                let target = self.nested(Self::unary)?;
                if !target.kind.is_assignable() {
                    return Err(Diagnostic::new(
                        self.unit,
                        target.line,
                        target.column,
                        "unexpected type, required a variable",
                    ));
                }
                return Ok(Expr {
                    kind: ExprKind::IncDec {
                        target: Box::new(target),
                        increment,
                        prefix: true,
                    },
                    line,
                    column,
                });
            }
            Some(Token::LParen) => {
                if let Some(ty) = self.try_cast()? {
                    let expr = self.nested(Self::unary)?;
                    return Ok(Expr {
                        kind: ExprKind::Cast {
                            ty,
                            expr: Box::new(expr),
                        },
                        line,
                        column,
                    });
                }
                let primary = self.primary()?;
                return self.postfix(primary);
            }
            _ => {
                let primary = self.primary()?;
                return self.postfix(primary);
            }
        };
        self.pos += 1;
        let expr = self.nested(Self::unary)?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
            line,
            column,
        })
    }

    /// Consume `(Type)` when the parenthesis is a cast
    fn try_cast(&mut self) -> PResult<Option<TypeRef>> {
        let primitive = matches!(
            self.peek_nth(1),
            Some(Token::Int | Token::Long | Token::Double | Token::Boolean | Token::Char)
        );
        let mut n = 2;
        if !primitive {
            if !matches!(self.peek_nth(1), Some(Token::Ident(_))) {
                return Ok(None);
            }
            while self.peek_nth(n) == Some(&Token::Dot)
                && matches!(self.peek_nth(n + 1), Some(Token::Ident(_)))
            {
                n += 2;
            }
        }
        while self.peek_nth(n) == Some(&Token::LBracket)
            && self.peek_nth(n + 1) == Some(&Token::RBracket)
        {
            n += 2;
        }
        if self.peek_nth(n) != Some(&Token::RParen) {
            return Ok(None);
        }
        if !primitive {
            let starts_operand = matches!(
                self.peek_nth(n + 1),
                Some(
                    Token::Ident(_)
                        | Token::IntLit(_)
                        | Token::LongLit(_)
                        | Token::DoubleLit(_)
                        | Token::StrLit(_)
                        | Token::CharLit(_)
                        | Token::True
                        | Token::False
                        | Token::Null
                        | Token::This
                        | Token::New
                        | Token::LParen
                        | Token::Bang
                        | Token::Tilde
                )
            );
            if !starts_operand {
                return Ok(None);
            }
        }
        self.expect(&Token::LParen)?;
        let ty = self.type_ref(false)?;
        self.expect(&Token::RParen)?;
        Ok(Some(ty))
    }

    fn postfix(&mut self, mut expr: Expr) -> PResult<Expr> {
        let mut height = expr.height();
        loop {
            let (line, column) = (expr.line, expr.column);
            if self.eat(&Token::Dot) {
                let name = self.ident()?;
                if self.check(&Token::LParen) {
                    let args = self.args()?;
                    let tallest = args.iter().map(Expr::height).max().unwrap_or(0);
                    height = self.grown(height, tallest)?;
                    expr = Expr {
                        kind: ExprKind::Call {
                            target: Some(Box::new(expr)),
                            name,
                            args,
                        },
                        line,
                        column,
                    };
                } else {
                    height = self.grown(height, 0)?;
                    expr = Expr {
                        kind: ExprKind::Field {
                            target: Box::new(expr),
                            name,
                        },
                        line,
                        column,
                    };
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.expr()?;
                self.expect(&Token::RBracket)?;
                height = self.grown(height, index.height())?;
                expr = Expr {
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                    column,
                };
            } else if self.check(&Token::PlusPlus) || self.check(&Token::MinusMinus) {
                if !expr.kind.is_assignable() {
                    return Err(self.error_here("unexpected type, required a variable"));
                }
                let increment = self.check(&Token::PlusPlus);
                self.pos += 1;
                return Ok(Expr {
                    kind: ExprKind::IncDec {
                        target: Box::new(expr),
                        increment,
                        prefix: false,
                    },
                    line,
                    column,
                });
            } else {
                return Ok(expr);
            }
        }
    }

    fn args(&mut self) -> PResult<Vec<Expr>> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let (line, column) = self.position();
        let literal = |lit| ExprKind::Literal(lit);
        let kind = match self.advance() {
            Some(Token::IntLit(v)) => match i32::try_from(v) {
                Ok(v) => literal(Literal::Int(v)),
                Err(_) => {
                    return Err(Diagnostic::new(self.unit, line, column, "integer number too large"));
                }
            },
            Some(Token::LongLit(v)) => match i64::try_from(v) {
                Ok(v) => literal(Literal::Long(v)),
                Err(_) => {
                    return Err(Diagnostic::new(self.unit, line, column, "long number too large"));
                }
            },
            Some(Token::DoubleLit(v)) => literal(Literal::Double(v)),
            Some(Token::StrLit(s)) => literal(Literal::Str(s)),
            Some(Token::CharLit(c)) => literal(Literal::Char(c)),
            Some(Token::True) => literal(Literal::Bool(true)),
            Some(Token::False) => literal(Literal::Bool(false)),
            Some(Token::Null) => literal(Literal::Null),
            Some(Token::This) => ExprKind::This,
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                return Ok(inner);
            }
            Some(Token::New) => return self.new_expr(line, column),
            Some(Token::Ident(name)) => {
                if self.check(&Token::LParen) {
                    let args = self.args()?;
                    ExprKind::Call {
                        target: None,
                        name,
                        args,
                    }
                } else {
                    ExprKind::Name(name)
                }
            }
            Some(_) => {
                self.pos -= 1;
                return Err(self.unexpected("an expression"));
            }
            None => return Err(self.unexpected("an expression")),
        };
        Ok(Expr { kind, line, column })
    }

    fn new_expr(&mut self, line: u32, column: u32) -> PResult<Expr> {
        let primitive = match self.peek() {
            Some(Token::Int) => Some(TypeRef::Int),
            Some(Token::Long) => Some(TypeRef::Long),
            Some(Token::Double) => Some(TypeRef::Double),
            Some(Token::Boolean) => Some(TypeRef::Boolean),
            Some(Token::Char) => Some(TypeRef::Char),
            Some(Token::Ident(_)) => None,
            _ => return Err(self.unexpected("a type after `new`")),
        };
        let elem = if let Some(ty) = primitive {
            self.pos += 1;
            ty
        } else {
            let qualified = self.qualified_name(false)?;
            let class = qualified.rsplit('.').next().unwrap_or(&qualified).to_string();
            if self.check(&Token::LParen) {
                let args = self.args()?;
                return Ok(Expr {
                    kind: ExprKind::New { class, args },
                    line,
                    column,
                });
            }
            TypeRef::Named(class)
        };

        if !self.check(&Token::LBracket) {
            return Err(self.unexpected("`[` or `(`"));
        }
        let mut dims = Vec::new();
        let mut ty = elem;
        while self.eat(&Token::LBracket) {
            if self.eat(&Token::RBracket) {
                ty = ty.array_of();
                continue;
            }
            if ty.is_array_depth_started(dims.len()) {
                return Err(self.error_here("array dimension missing"));
            }
            dims.push(self.expr()?);
            self.expect(&Token::RBracket)?;
            ty = ty.array_of();
        }

        if dims.is_empty() {
            let TypeRef::Array(item) = &ty else {
                return Err(self.error_here("array dimension missing"));
            };
            let item = (**item).clone();
            if !self.check(&Token::LBrace) {
                return Err(self.error_here("array dimension missing"));
            }
            let mut lit = self.array_lit(ty.clone(), &item)?;
            lit.line = line;
            lit.column = column;
            return Ok(lit);
        }
        Ok(Expr {
            kind: ExprKind::NewArray { ty, dims },
            line,
            column,
        })
    }
}

impl TypeRef {
    /// True once an unsized `[]` has been seen after `sized` sized dimensions,
    /// which makes a later sized dimension illegal (`new int[][3]`)
    fn is_array_depth_started(&self, sized: usize) -> bool {
        let mut depth = 0;
        let mut ty = self;
        while let Self::Array(inner) = ty {
            depth += 1;
            ty = inner;
        }
        depth > sized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn parse_full(text: &str) -> PResult<CompilationUnit> {
        parse(&SourceUnit::new("Question.java", text), Dialect::Full)
    }

    fn body_of(unit: &CompilationUnit) -> &[Stmt] {
        &unit.classes[0].methods[0].body.stmts
    }

    #[test]
    fn parses_a_main_class() {
        let unit = parse_full(
            "import java.util.*;\npublic class Question {\n  public static void main(String[] args) {\n    System.out.println(\"hi\");\n  }\n}\n",
        )
        .unwrap();
        assert_eq!(unit.imports, vec!["java.util.*"]);
        let class = &unit.classes[0];
        assert_eq!(class.name, "Question");
        assert_eq!(class.modifiers.visibility, Visibility::Public);
        let main = class.method("main", 1).unwrap();
        assert!(main.modifiers.is_static);
        assert!(main.params[0].ty.is_string_array());
        assert_eq!(main.line, 3);
    }

    #[test]
    fn c_style_array_parameter() {
        let unit = parse_full("class Q { static void main(String args[]) {} }").unwrap();
        assert!(unit.classes[0].methods[0].params[0].ty.is_string_array());
    }

    #[test]
    fn precedence_and_associativity() {
        let unit = parse_full("class Q { void m() { int x = 1 + 2 * 3 - 4; } }").unwrap();
        let StmtKind::Local { vars, .. } = &body_of(&unit)[0].kind else {
            panic!("expected a local");
        };
        let init = vars[0].1.as_ref().unwrap();
        assert_matches!(&init.kind, ExprKind::Binary { op: BinaryOp::Sub, lhs, .. } => {
            assert_matches!(&lhs.kind, ExprKind::Binary { op: BinaryOp::Add, rhs, .. } => {
                assert_matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. });
            });
        });
    }

    #[test]
    fn casts_versus_parentheses() {
        let unit = parse_full("class Q { void m() { int a = (int) 2.5; int b = (a) - 1; String s = (String) o; } }")
            .unwrap();
        let stmts = body_of(&unit);
        let init = |i: usize| match &stmts[i].kind {
            StmtKind::Local { vars, .. } => vars[0].1.clone().unwrap(),
            _ => panic!("expected a local"),
        };
        assert_matches!(init(0).kind, ExprKind::Cast { ty: TypeRef::Int, .. });
        assert_matches!(init(1).kind, ExprKind::Binary { op: BinaryOp::Sub, .. });
        assert_matches!(init(2).kind, ExprKind::Cast { ty: TypeRef::Named(_), .. });
    }

    #[test]
    fn new_arrays_and_initialisers() {
        let unit = parse_full(
            "class Q { void m() { int[][] g = new int[3][]; int[] a = {1, 2}; String[] s = new String[] {\"x\"}; } }",
        )
        .unwrap();
        let stmts = body_of(&unit);
        assert_matches!(&stmts[0].kind, StmtKind::Local { vars, .. } => {
            assert_matches!(&vars[0].1.as_ref().unwrap().kind, ExprKind::NewArray { dims, ty } => {
                assert_eq!(dims.len(), 1);
                assert_eq!(ty.to_string(), "int[][]");
            });
        });
        assert_matches!(&stmts[1].kind, StmtKind::Local { vars, .. } => {
            assert_matches!(&vars[0].1.as_ref().unwrap().kind, ExprKind::ArrayLit { items, .. } if items.len() == 2);
        });
        assert_matches!(&stmts[2].kind, StmtKind::Local { vars, .. } => {
            assert_matches!(&vars[0].1.as_ref().unwrap().kind, ExprKind::ArrayLit { .. });
        });
    }

    #[test]
    fn int_min_literal() {
        let unit = parse_full("class Q { void m() { int x = -2147483648; } }").unwrap();
        assert_matches!(&body_of(&unit)[0].kind, StmtKind::Local { vars, .. } => {
            assert_eq!(vars[0].1.as_ref().unwrap().kind, ExprKind::Literal(Literal::Int(i32::MIN)));
        });
        assert!(parse_full("class Q { void m() { int x = 2147483648; } }").is_err());
    }

    #[test]
    fn missing_semicolon_is_located() {
        let err = parse_full("class Q {\n  void m() {\n    int x = 1\n  }\n}").unwrap_err();
        assert_eq!(err.line, 4);
        assert!(err.message.contains("expected `;`"), "{}", err.message);
    }

    #[test]
    fn expression_statements_must_have_effect() {
        let err = parse_full("class Q { void m() { 1 + 2; } }").unwrap_err();
        assert_eq!(err.message, "not a statement");
    }

    #[test]
    fn lenient_dialect_rejects_newer_constructs() {
        let foreach = "class Q { void m(int[] a) { for (int x : a) {} } }";
        let var = "class Q { void m() { var x = 1; } }";
        for text in [foreach, var] {
            let unit = SourceUnit::new("Q.java", text);
            assert!(parse(&unit, Dialect::Full).is_ok());
            let err = parse(&unit, Dialect::Lenient).unwrap_err();
            assert!(err.message.contains("not supported"), "{}", err.message);
        }
    }

    #[test]
    fn try_catch_finally() {
        let unit = parse_full(
            "class Q { void m() { try { f(); } catch (IllegalStateException | ArithmeticException e) { } finally { } } }",
        )
        .unwrap();
        assert_matches!(&body_of(&unit)[0].kind, StmtKind::Try { catches, finally: Some(_), .. } => {
            assert_eq!(catches[0].types, vec!["IllegalStateException", "ArithmeticException"]);
        });
        assert!(parse_full("class Q { void m() { try { } } }").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let depth = MAX_NESTING * 2;
        let text = format!(
            "class Q {{ void m() {{ int x = {}1{}; }} }}",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let err = parse_full(&text).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }

    #[test]
    fn long_chains_are_bounded() {
        let sum = format!("class Q {{ void m() {{ int x = 1{}; }} }}", "+1".repeat(300_000));
        let err = parse_full(&sum).unwrap_err();
        assert!(err.message.contains("nested too deeply"), "{}", err.message);

        let calls = format!("class Q {{ void m() {{ s{}; }} }}", ".trim()".repeat(MAX_EXPR_HEIGHT * 2));
        assert!(parse_full(&calls).is_err());

        let fits = format!("class Q {{ void m() {{ int x = 1{}; }} }}", "+1".repeat(MAX_EXPR_HEIGHT / 2));
        assert!(parse_full(&fits).is_ok());
    }

    #[test]
    fn long_min_literal() {
        let unit = parse_full("class Q { void m() { long x = -9223372036854775808L; } }").unwrap();
        assert_matches!(&body_of(&unit)[0].kind, StmtKind::Local { vars, .. } => {
            assert_eq!(vars[0].1.as_ref().unwrap().kind, ExprKind::Literal(Literal::Long(i64::MIN)));
        });
        let err = parse_full("class Q { void m() { long x = 9223372036854775808L; } }").unwrap_err();
        assert_eq!(err.message, "long number too large");
    }

    #[test]
    fn empty_unit_is_an_error() {
        assert!(parse_full("// nothing here\n").is_err());
    }

    #[test]
    fn constructors_and_fields() {
        let unit = parse_full(
            "class Point { private int x, y = 2; static int count; Point(int x) { this.x = x; } }",
        )
        .unwrap();
        let class = &unit.classes[0];
        assert_eq!(class.fields.len(), 3);
        assert!(class.fields[2].modifiers.is_static);
        assert_eq!(class.constructors.len(), 1);
        assert!(class.constructor(1).is_some());
    }
}
