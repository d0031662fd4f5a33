//! Semantic checks run by the native backend.
//!
//! Resolves every name, class, field and method ahead of time and applies
//! a conservative type discipline: a mismatch is only reported when both
//! sides are statically known.

use std::collections::HashMap;
use std::fmt;

use super::ast::{
    BinaryOp, Block, ClassDecl, CompilationUnit, Expr, ExprKind, Literal, MethodDecl, Stmt,
    StmtKind, TypeRef, UnaryOp,
};
use super::library::{self, Returns};
use super::Diagnostic;
use crate::source::SourceUnit;

/// Classes a unit may refer to, keyed by name
pub type ClassScope<'a> = HashMap<&'a str, &'a ClassDecl>;

/// Check one parsed unit against the classes visible to it
pub fn check(unit: &CompilationUnit, source: &SourceUnit, visible: &ClassScope<'_>) -> Result<(), Diagnostic> {
    for class in &unit.classes {
        let mut checker = Checker {
            source,
            visible,
            class,
            is_static: true,
            ret: None,
            scopes: Vec::new(),
            loops: 0,
        };
        checker.class_decl()?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Ty {
    Unknown,
    Null,
    Of(TypeRef),
}

impl Ty {
    const fn known(&self) -> Option<&TypeRef> {
        match self {
            Self::Of(t) => Some(t),
            _ => None,
        }
    }

    fn is(&self, ty: &TypeRef) -> bool {
        self.known() == Some(ty)
    }

    fn is_numeric(&self) -> bool {
        self.known().is_some_and(TypeRef::is_numeric)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("?"),
            Self::Null => f.write_str("<null>"),
            Self::Of(t) => t.fmt(f),
        }
    }
}

enum ClassTarget<'a> {
    User(&'a ClassDecl),
    Builtin(&'a str),
}

struct Checker<'a> {
    source: &'a SourceUnit,
    visible: &'a ClassScope<'a>,
    class: &'a ClassDecl,
    is_static: bool,
    /// Declared return type of the current method, `None` outside methods
    ret: Option<TypeRef>,
    scopes: Vec<HashMap<String, Ty>>,
    loops: usize,
}

type CResult<T> = Result<T, Diagnostic>;

fn wrapper_of(ty: &TypeRef) -> Option<&'static str> {
    match ty {
        TypeRef::Int => Some("Integer"),
        TypeRef::Long => Some("Long"),
        TypeRef::Double => Some("Double"),
        TypeRef::Boolean => Some("Boolean"),
        TypeRef::Char => Some("Character"),
        _ => None,
    }
}

fn assignable(to: &TypeRef, from: &Ty) -> bool {
    let from = match from {
        Ty::Unknown => return true,
        Ty::Null => return !to.is_primitive(),
        Ty::Of(t) => t,
    };
    if to == from || *to == TypeRef::Inferred {
        return true;
    }
    match (to, from) {
        (_, TypeRef::Void) => false,
        (TypeRef::Int, TypeRef::Char)
        | (TypeRef::Char, TypeRef::Int)
        | (TypeRef::Long, TypeRef::Int | TypeRef::Char)
        | (TypeRef::Double, TypeRef::Int | TypeRef::Long | TypeRef::Char) => true,
        (TypeRef::Named(object), _) if object == "Object" => true,
        (TypeRef::Named(wrapper), prim) if wrapper_of(prim) == Some(wrapper.as_str()) => true,
        (prim, TypeRef::Named(wrapper)) if wrapper_of(prim) == Some(wrapper.as_str()) => true,
        (TypeRef::Named(sup), TypeRef::Named(sub)) => {
            library::is_throwable(sup) && library::is_subclass(sub, sup)
        }
        _ => false,
    }
}

fn promote(a: &TypeRef, b: &TypeRef) -> TypeRef {
    if *a == TypeRef::Double || *b == TypeRef::Double {
        TypeRef::Double
    } else if *a == TypeRef::Long || *b == TypeRef::Long {
        TypeRef::Long
    } else {
        TypeRef::Int
    }
}

fn unary_promote(a: &TypeRef) -> TypeRef {
    match a {
        TypeRef::Char => TypeRef::Int,
        other => other.clone(),
    }
}

fn is_integral(ty: &TypeRef) -> bool {
    matches!(ty, TypeRef::Int | TypeRef::Long | TypeRef::Char)
}

fn signature(name: &str, args: &[Ty]) -> String {
    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
    format!("{name}({})", args.join(","))
}

impl<'a> Checker<'a> {
    fn err<T>(&self, line: u32, column: u32, message: impl Into<String>) -> CResult<T> {
        Err(Diagnostic::new(self.source, line, column, message))
    }

    fn err_at<T>(&self, expr: &Expr, message: impl Into<String>) -> CResult<T> {
        self.err(expr.line, expr.column, message)
    }

    fn user_class(&self, name: &str) -> Option<&'a ClassDecl> {
        self.visible.get(name).copied()
    }

    fn known_type(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Named(name) => {
                self.user_class(name).is_some() || library::is_builtin_class(name)
            }
            TypeRef::Array(inner) => self.known_type(inner),
            _ => true,
        }
    }

    fn require_type(&self, ty: &TypeRef, line: u32, column: u32) -> CResult<()> {
        if self.known_type(ty) {
            return Ok(());
        }
        let mut base = ty;
        while let TypeRef::Array(inner) = base {
            base = inner;
        }
        self.err(line, column, format!("cannot find symbol: class {base}"))
    }

    // === Declarations ===

    fn class_decl(&mut self) -> CResult<()> {
        let class = self.class;

        for (i, field) in class.fields.iter().enumerate() {
            if class.fields[..i].iter().any(|f| f.name == field.name) {
                return self.err(
                    field.line,
                    1,
                    format!("variable {} is already defined in class {}", field.name, class.name),
                );
            }
            self.require_type(&field.ty, field.line, 1)?;
        }
        for (i, method) in class.methods.iter().enumerate() {
            let clash = class.methods[..i]
                .iter()
                .any(|m| m.name == method.name && m.params.len() == method.params.len());
            if clash {
                return self.err(
                    method.line,
                    method.column,
                    format!("method {} is already defined in class {}", describe(method), class.name),
                );
            }
        }
        for (i, ctor) in class.constructors.iter().enumerate() {
            if class.constructors[..i].iter().any(|c| c.params.len() == ctor.params.len()) {
                return self.err(
                    ctor.line,
                    ctor.column,
                    format!("constructor {} is already defined in class {}", describe(ctor), class.name),
                );
            }
        }

        for field in &class.fields {
            let Some(init) = &field.init else { continue };
            self.is_static = field.modifiers.is_static;
            self.scopes = vec![HashMap::new()];
            let ty = self.value(init)?;
            if !assignable(&field.ty, &ty) {
                return self.incompatible(init, &ty, &field.ty);
            }
        }

        for method in &class.methods {
            self.method(method, method.modifiers.is_static, method.ret.clone())?;
        }
        for ctor in &class.constructors {
            self.method(ctor, false, TypeRef::Void)?;
        }
        Ok(())
    }

    fn method(&mut self, method: &MethodDecl, is_static: bool, ret: TypeRef) -> CResult<()> {
        self.require_type(&ret, method.line, method.column)?;
        self.is_static = is_static;
        self.loops = 0;
        self.scopes = vec![HashMap::new()];
        for param in &method.params {
            self.require_type(&param.ty, method.line, method.column)?;
            if self.scopes[0].contains_key(&param.name) {
                return self.err(
                    method.line,
                    method.column,
                    format!("variable {} is already defined in method {}", param.name, describe(method)),
                );
            }
            self.scopes[0].insert(param.name.clone(), Ty::Of(param.ty.clone()));
        }
        self.ret = Some(ret.clone());
        for stmt in &method.body.stmts {
            self.stmt(stmt)?;
        }
        self.ret = None;

        if ret != TypeRef::Void && completes_normally(&method.body) {
            let (line, column) = closing_position(method);
            return self.err(line, column, "missing return statement");
        }
        Ok(())
    }

    // === Statements ===

    fn lookup_local(&self, name: &str) -> Option<&Ty> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn declare(&mut self, name: &str, ty: Ty, line: u32, column: u32) -> CResult<()> {
        if self.lookup_local(name).is_some() {
            return self.err(line, column, format!("variable {name} is already defined in this method"));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ty);
        }
        Ok(())
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> CResult<T>) -> CResult<T> {
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn in_loop(&mut self, body: &Stmt) -> CResult<()> {
        self.loops += 1;
        let result = self.scoped(|c| c.stmt(body));
        self.loops -= 1;
        result
    }

    fn block(&mut self, block: &Block) -> CResult<()> {
        self.scoped(|c| block.stmts.iter().try_for_each(|s| c.stmt(s)))
    }

    fn condition(&mut self, cond: &Expr) -> CResult<()> {
        let ty = self.value(cond)?;
        if assignable(&TypeRef::Boolean, &ty) && ty != Ty::Null {
            Ok(())
        } else {
            self.incompatible(cond, &ty, &TypeRef::Boolean)
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> CResult<()> {
        match &stmt.kind {
            StmtKind::Local { ty, vars } => {
                self.require_type(ty, stmt.line, stmt.column)?;
                for (name, init) in vars {
                    let declared = match init {
                        Some(init) => {
                            let init_ty = self.value(init)?;
                            if *ty == TypeRef::Inferred {
                                if init_ty == Ty::Null {
                                    return self.err_at(
                                        init,
                                        format!("cannot infer type for local variable {name}"),
                                    );
                                }
                                init_ty
                            } else if assignable(ty, &init_ty) {
                                Ty::Of(ty.clone())
                            } else {
                                return self.incompatible(init, &init_ty, ty);
                            }
                        }
                        None => Ty::Of(ty.clone()),
                    };
                    self.declare(name, declared, stmt.line, stmt.column)?;
                }
                Ok(())
            }
            StmtKind::Expr(expr) => self.expr(expr).map(drop),
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.condition(cond)?;
                self.scoped(|c| c.stmt(then))?;
                if let Some(otherwise) = otherwise {
                    self.scoped(|c| c.stmt(otherwise))?;
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                self.condition(cond)?;
                self.in_loop(body)
            }
            StmtKind::DoWhile { body, cond } => {
                self.in_loop(body)?;
                self.condition(cond)
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => self.scoped(|c| {
                init.iter().try_for_each(|s| c.stmt(s))?;
                if let Some(cond) = cond {
                    c.condition(cond)?;
                }
                update.iter().try_for_each(|u| c.expr(u).map(drop))?;
                c.in_loop(body)
            }),
            StmtKind::ForEach {
                ty,
                name,
                iterable,
                body,
            } => {
                let iter_ty = self.value(iterable)?;
                let elem = match &iter_ty {
                    Ty::Of(TypeRef::Array(elem)) => Ty::Of((**elem).clone()),
                    Ty::Unknown => Ty::Unknown,
                    other => {
                        return self.err_at(iterable, format!("for-each not applicable to expression type {other}"));
                    }
                };
                self.require_type(ty, stmt.line, stmt.column)?;
                let var_ty = if *ty == TypeRef::Inferred {
                    elem
                } else if assignable(ty, &elem) {
                    Ty::Of(ty.clone())
                } else {
                    return self.incompatible(iterable, &elem, ty);
                };
                self.scoped(|c| {
                    c.declare(name, var_ty, stmt.line, stmt.column)?;
                    c.in_loop(body)
                })
            }
            StmtKind::Block(block) => self.block(block),
            StmtKind::Return(value) => {
                let ret = self.ret.clone().unwrap_or(TypeRef::Void);
                match (value, ret == TypeRef::Void) {
                    (Some(value), true) => self.err_at(value, "incompatible types: unexpected return value"),
                    (None, false) => self.err(stmt.line, stmt.column, "missing return value"),
                    (None, true) => Ok(()),
                    (Some(value), false) => {
                        let ty = self.value(value)?;
                        if assignable(&ret, &ty) {
                            Ok(())
                        } else {
                            self.incompatible(value, &ty, &ret)
                        }
                    }
                }
            }
            StmtKind::Break if self.loops == 0 => {
                self.err(stmt.line, stmt.column, "break outside switch or loop")
            }
            StmtKind::Continue if self.loops == 0 => {
                self.err(stmt.line, stmt.column, "continue outside of loop")
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Empty => Ok(()),
            StmtKind::Throw(value) => {
                let ty = self.value(value)?;
                match &ty {
                    Ty::Unknown | Ty::Null => Ok(()),
                    Ty::Of(TypeRef::Named(name)) if library::is_throwable(name) => Ok(()),
                    other => self.incompatible(value, other, &TypeRef::Named("Throwable".into())),
                }
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                self.block(body)?;
                for clause in catches {
                    for name in &clause.types {
                        if !library::is_throwable(name) {
                            let message = if self.user_class(name).is_some() {
                                format!("incompatible types: {name} cannot be converted to Throwable")
                            } else {
                                format!("cannot find symbol: class {name}")
                            };
                            return self.err(stmt.line, stmt.column, message);
                        }
                    }
                    let bound = match clause.types.as_slice() {
                        [single] => single.clone(),
                        _ => "Throwable".to_string(),
                    };
                    self.scoped(|c| {
                        c.declare(&clause.name, Ty::Of(TypeRef::Named(bound)), stmt.line, stmt.column)?;
                        clause.body.stmts.iter().try_for_each(|s| c.stmt(s))
                    })?;
                }
                if let Some(finally) = finally {
                    self.block(finally)?;
                }
                Ok(())
            }
        }
    }

    // === Expressions ===

    fn incompatible<T>(&self, at: &Expr, from: &Ty, to: &TypeRef) -> CResult<T> {
        if from.is(&TypeRef::Void) {
            return self.err_at(at, "'void' type not allowed here");
        }
        let lossy = from.is_numeric() && to.is_numeric();
        if lossy {
            self.err_at(at, format!("incompatible types: possible lossy conversion from {from} to {to}"))
        } else {
            self.err_at(at, format!("incompatible types: {from} cannot be converted to {to}"))
        }
    }

    /// Type of an expression used as a value
    fn value(&mut self, expr: &Expr) -> CResult<Ty> {
        let ty = self.expr(expr)?;
        if ty.is(&TypeRef::Void) {
            return self.err_at(expr, "'void' type not allowed here");
        }
        Ok(ty)
    }

    fn values(&mut self, exprs: &[Expr]) -> CResult<Vec<Ty>> {
        exprs.iter().map(|e| self.value(e)).collect()
    }

    /// A bare name that refers to a class rather than a variable
    fn class_target(&self, expr: &Expr) -> Option<ClassTarget<'a>> {
        let ExprKind::Name(name) = &expr.kind else {
            return None;
        };
        if self.lookup_local(name).is_some() || self.class.field(name).is_some() {
            return None;
        }
        if let Some(class) = self.user_class(name) {
            return Some(ClassTarget::User(class));
        }
        library::CLASSES
            .iter()
            .chain(std::iter::once(&"Throwable"))
            .find(|c| **c == name.as_str())
            .map(|c| ClassTarget::Builtin(*c))
    }

    fn field_type(&self, expr: &Expr, class: &ClassDecl, name: &str, via_class: bool) -> CResult<Ty> {
        let Some(field) = class.field(name) else {
            return self.err_at(expr, format!("cannot find symbol: variable {name}"));
        };
        if via_class && !field.modifiers.is_static {
            return self.err_at(
                expr,
                format!("non-static variable {name} cannot be referenced from a static context"),
            );
        }
        Ok(Ty::Of(field.ty.clone()))
    }

    fn expr(&mut self, expr: &Expr) -> CResult<Ty> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                Literal::Int(_) => Ty::Of(TypeRef::Int),
                Literal::Long(_) => Ty::Of(TypeRef::Long),
                Literal::Double(_) => Ty::Of(TypeRef::Double),
                Literal::Bool(_) => Ty::Of(TypeRef::Boolean),
                Literal::Char(_) => Ty::Of(TypeRef::Char),
                Literal::Str(_) => Ty::Of(TypeRef::string()),
                Literal::Null => Ty::Null,
            }),
            ExprKind::Name(name) => {
                if let Some(ty) = self.lookup_local(name) {
                    return Ok(ty.clone());
                }
                if self.class.field(name).is_some() {
                    return self.field_type(expr, self.class, name, self.is_static);
                }
                self.err_at(expr, format!("cannot find symbol: variable {name}"))
            }
            ExprKind::This => {
                if self.is_static {
                    return self.err_at(expr, "non-static variable this cannot be referenced from a static context");
                }
                Ok(Ty::Of(TypeRef::Named(self.class.name.clone())))
            }
            ExprKind::Field { target, name } => self.field_access(expr, target, name),
            ExprKind::Index { target, index } => {
                let target_ty = self.value(target)?;
                let index_ty = self.value(index)?;
                if index_ty.known().is_some_and(|t| !matches!(t, TypeRef::Int | TypeRef::Char)) {
                    return self.incompatible(index, &index_ty, &TypeRef::Int);
                }
                match target_ty {
                    Ty::Of(TypeRef::Array(elem)) => Ok(Ty::Of(*elem)),
                    Ty::Unknown => Ok(Ty::Unknown),
                    other => self.err_at(expr, format!("array required, but {other} found")),
                }
            }
            ExprKind::Call { target, name, args } => self.call(expr, target.as_deref(), name, args),
            ExprKind::New { class, args } => self.new_object(expr, class, args),
            ExprKind::NewArray { ty, dims } => {
                self.require_type(ty, expr.line, expr.column)?;
                for dim in dims {
                    let dim_ty = self.value(dim)?;
                    if dim_ty.known().is_some_and(|t| !matches!(t, TypeRef::Int | TypeRef::Char)) {
                        return self.incompatible(dim, &dim_ty, &TypeRef::Int);
                    }
                }
                Ok(Ty::Of(ty.clone()))
            }
            ExprKind::ArrayLit { ty, items } => {
                self.require_type(ty, expr.line, expr.column)?;
                let TypeRef::Array(elem) = ty else {
                    return self.err_at(expr, format!("illegal initializer for {ty}"));
                };
                for item in items {
                    let item_ty = self.value(item)?;
                    if !assignable(elem, &item_ty) {
                        return self.incompatible(item, &item_ty, elem);
                    }
                }
                Ok(Ty::Of(ty.clone()))
            }
            ExprKind::Unary { op, expr: inner } => {
                let ty = self.value(inner)?;
                let Ty::Of(t) = &ty else {
                    return Ok(if *op == UnaryOp::Not { Ty::Of(TypeRef::Boolean) } else { Ty::Unknown });
                };
                let ok = match op {
                    UnaryOp::Neg | UnaryOp::Plus => t.is_numeric(),
                    UnaryOp::Not => *t == TypeRef::Boolean,
                    UnaryOp::BitNot => is_integral(t),
                };
                if !ok {
                    let symbol = match op {
                        UnaryOp::Neg => "-",
                        UnaryOp::Plus => "+",
                        UnaryOp::Not => "!",
                        UnaryOp::BitNot => "~",
                    };
                    return self.err_at(expr, format!("bad operand type {t} for unary operator '{symbol}'"));
                }
                Ok(Ty::Of(if *op == UnaryOp::Not { TypeRef::Boolean } else { unary_promote(t) }))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.value(lhs)?;
                let r = self.value(rhs)?;
                self.binary(expr, *op, &l, &r)
            }
            ExprKind::Assign { op, target, value } => {
                if let ExprKind::Field { name, target: inner } = &target.kind {
                    if name == "length" && matches!(self.expr(inner)?, Ty::Of(TypeRef::Array(_))) {
                        return self.err_at(target, "cannot assign a value to final variable length");
                    }
                }
                let target_ty = self.value(target)?;
                let value_ty = self.value(value)?;
                match op {
                    None => {
                        let Ty::Of(to) = &target_ty else {
                            return Ok(target_ty);
                        };
                        if !assignable(to, &value_ty) {
                            return self.incompatible(value, &value_ty, to);
                        }
                    }
                    Some(op) => {
                        self.binary(expr, *op, &target_ty, &value_ty)?;
                    }
                }
                Ok(target_ty)
            }
            ExprKind::IncDec { target, increment, .. } => {
                let ty = self.value(target)?;
                if ty.known().is_some_and(|t| !t.is_numeric()) {
                    let symbol = if *increment { "++" } else { "--" };
                    return self.err_at(expr, format!("bad operand type {ty} for unary operator '{symbol}'"));
                }
                Ok(ty)
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                self.condition(cond)?;
                let a = self.value(then)?;
                let b = self.value(otherwise)?;
                Ok(match (&a, &b) {
                    _ if a == b => a,
                    (Ty::Of(x), Ty::Of(y)) if x.is_numeric() && y.is_numeric() => Ty::Of(promote(x, y)),
                    (Ty::Null, Ty::Of(t)) | (Ty::Of(t), Ty::Null) if !t.is_primitive() => Ty::Of(t.clone()),
                    _ => Ty::Unknown,
                })
            }
            ExprKind::Cast { ty, expr: inner } => {
                self.require_type(ty, expr.line, expr.column)?;
                let from = self.value(inner)?;
                if let Ty::Of(from_ty) = &from {
                    let ok = match (ty.is_primitive(), from_ty.is_primitive()) {
                        (true, true) => (ty.is_numeric() && from_ty.is_numeric()) || ty == from_ty,
                        (false, false) => true,
                        _ => assignable(ty, &from) || *ty == TypeRef::Named("Object".into()),
                    };
                    if !ok {
                        return self.incompatible(inner, &from, ty);
                    }
                }
                Ok(Ty::Of(ty.clone()))
            }
        }
    }

    fn binary(&self, expr: &Expr, op: BinaryOp, l: &Ty, r: &Ty) -> CResult<Ty> {
        let bad = || {
            self.err_at(
                expr,
                format!("bad operand types for binary operator '{}': {l} and {r}", op.symbol()),
            )
        };
        let string = TypeRef::string();
        match op {
            BinaryOp::Add if l.is(&string) || r.is(&string) => Ok(Ty::Of(string)),
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                match (l, r) {
                    (Ty::Of(a), Ty::Of(b)) if a.is_numeric() && b.is_numeric() => Ok(Ty::Of(promote(a, b))),
                    (Ty::Unknown, _) | (_, Ty::Unknown) => {
                        if [l, r].iter().any(|t| t.known().is_some_and(|t| !t.is_numeric() && !matches!(t, TypeRef::Named(_)))) {
                            bad()
                        } else {
                            Ok(Ty::Unknown)
                        }
                    }
                    _ => bad(),
                }
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let numeric_or_unknown = |t: &Ty| *t == Ty::Unknown || t.is_numeric();
                if numeric_or_unknown(l) && numeric_or_unknown(r) {
                    Ok(Ty::Of(TypeRef::Boolean))
                } else {
                    bad()
                }
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let boolean = TypeRef::Boolean;
                let mixed = (l.is(&boolean) && r.is_numeric()) || (r.is(&boolean) && l.is_numeric());
                let prim_vs_null = matches!((l, r), (Ty::Of(t), Ty::Null) | (Ty::Null, Ty::Of(t)) if t.is_primitive());
                if mixed || prim_vs_null {
                    bad()
                } else {
                    Ok(Ty::Of(boolean))
                }
            }
            BinaryOp::And | BinaryOp::Or => {
                let bool_or_unknown = |t: &Ty| *t == Ty::Unknown || t.is(&TypeRef::Boolean);
                if bool_or_unknown(l) && bool_or_unknown(r) {
                    Ok(Ty::Of(TypeRef::Boolean))
                } else {
                    bad()
                }
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => match (l, r) {
                (Ty::Of(TypeRef::Boolean), Ty::Of(TypeRef::Boolean)) => Ok(Ty::Of(TypeRef::Boolean)),
                (Ty::Of(a), Ty::Of(b)) if is_integral(a) && is_integral(b) => Ok(Ty::Of(promote(a, b))),
                (Ty::Unknown, _) | (_, Ty::Unknown) => Ok(Ty::Unknown),
                _ => bad(),
            },
        }
    }

    fn field_access(&mut self, expr: &Expr, target: &Expr, name: &str) -> CResult<Ty> {
        match self.class_target(target) {
            Some(ClassTarget::User(class)) => return self.field_type(expr, class, name, true),
            Some(ClassTarget::Builtin(class)) => {
                return match library::static_field(class, name) {
                    Some(ty) => Ok(Ty::Of(ty)),
                    None => self.err_at(expr, format!("cannot find symbol: variable {name} in class {class}")),
                };
            }
            None => {}
        }
        match self.value(target)? {
            Ty::Unknown => Ok(Ty::Unknown),
            Ty::Of(TypeRef::Array(_)) if name == "length" => Ok(Ty::Of(TypeRef::Int)),
            Ty::Of(TypeRef::Named(class)) => match self.user_class(&class) {
                Some(decl) => self.field_type(expr, decl, name, false),
                None => self.err_at(expr, format!("cannot find symbol: variable {name} in {class}")),
            },
            Ty::Of(t) if t.is_primitive() => self.err_at(expr, format!("{t} cannot be dereferenced")),
            other => self.err_at(expr, format!("cannot find symbol: variable {name} in {other}")),
        }
    }

    fn apply(&self, expr: &Expr, method: &MethodDecl, owner: &ClassDecl, args: &[Ty]) -> CResult<Ty> {
        let fits = method
            .params
            .iter()
            .zip(args)
            .all(|(param, arg)| assignable(&param.ty, arg));
        if !fits {
            return self.err_at(
                expr,
                format!(
                    "method {} in class {} cannot be applied to given types: found {}",
                    describe(method),
                    owner.name,
                    signature(&method.name, args)
                ),
            );
        }
        Ok(Ty::Of(method.ret.clone()))
    }

    fn call(&mut self, expr: &Expr, target: Option<&Expr>, name: &str, args: &[Expr]) -> CResult<Ty> {
        let arity = args.len();
        let Some(target) = target else {
            let arg_tys = self.values(args)?;
            let class = self.class;
            let Some(method) = class.method(name, arity) else {
                return self.err_at(expr, format!("cannot find symbol: method {}", signature(name, &arg_tys)));
            };
            if self.is_static && !method.modifiers.is_static {
                return self.err_at(
                    expr,
                    format!("non-static method {} cannot be referenced from a static context", describe(method)),
                );
            }
            return self.apply(expr, method, class, &arg_tys);
        };

        match self.class_target(target) {
            Some(ClassTarget::User(class)) => {
                let arg_tys = self.values(args)?;
                let Some(method) = class.method(name, arity) else {
                    return self.err_at(
                        expr,
                        format!("cannot find symbol: method {} in class {}", signature(name, &arg_tys), class.name),
                    );
                };
                if !method.modifiers.is_static {
                    return self.err_at(
                        expr,
                        format!("non-static method {} cannot be referenced from a static context", describe(method)),
                    );
                }
                return self.apply(expr, method, class, &arg_tys);
            }
            Some(ClassTarget::Builtin(class)) => {
                let arg_tys = self.values(args)?;
                return match library::static_method(class, name, arity) {
                    Some(Returns::Type(ty)) => Ok(Ty::Of(ty)),
                    Some(Returns::ArgPromotion) => {
                        let known: Option<Vec<&TypeRef>> = arg_tys.iter().map(Ty::known).collect();
                        match known {
                            Some(tys) if tys.iter().all(|t| t.is_numeric()) => {
                                let first = unary_promote(tys[0]);
                                Ok(Ty::Of(tys[1..].iter().fold(first, |acc, t| promote(&acc, t))))
                            }
                            Some(_) => self.err_at(
                                expr,
                                format!("no suitable method found for {}", signature(name, &arg_tys)),
                            ),
                            None => Ok(Ty::Unknown),
                        }
                    }
                    None => self.err_at(
                        expr,
                        format!("cannot find symbol: method {} in class {class}", signature(name, &arg_tys)),
                    ),
                };
            }
            None => {}
        }

        let target_ty = self.value(target)?;
        let arg_tys = self.values(args)?;
        let missing = |c: &Self, on: &dyn fmt::Display| {
            c.err_at(
                expr,
                format!("cannot find symbol: method {} in {on}", signature(name, &arg_tys)),
            )
        };
        let found = match &target_ty {
            Ty::Unknown => return Ok(Ty::Unknown),
            Ty::Null => return self.err_at(target, "<null> cannot be dereferenced"),
            Ty::Of(t) if t.is_primitive() => return self.err_at(target, format!("{t} cannot be dereferenced")),
            Ty::Of(TypeRef::Named(class)) if class == "PrintStream" => library::print_method(name, arity),
            Ty::Of(TypeRef::Named(class)) if class == "String" => library::string_method(name, arity),
            Ty::Of(TypeRef::Named(class)) if library::is_throwable(class) => {
                library::throwable_method(name, arity)
            }
            Ty::Of(TypeRef::Named(class)) => {
                if let Some(decl) = self.user_class(class) {
                    if let Some(method) = decl.method(name, arity) {
                        return self.apply(expr, method, decl, &arg_tys);
                    }
                }
                library::object_method(name, arity)
            }
            Ty::Of(_) => library::object_method(name, arity),
        };
        match found {
            Some(ty) => Ok(Ty::Of(ty)),
            None => missing(self, &target_ty),
        }
    }

    fn new_object(&mut self, expr: &Expr, class: &str, args: &[Expr]) -> CResult<Ty> {
        let arg_tys = self.values(args)?;
        let arity = args.len();
        if let Some(decl) = self.user_class(class) {
            if decl.modifiers.is_abstract {
                return self.err_at(expr, format!("{class} is abstract; cannot be instantiated"));
            }
            match decl.constructor(arity) {
                Some(ctor) => {
                    self.apply(expr, ctor, decl, &arg_tys)?;
                }
                None if arity == 0 && decl.constructors.is_empty() => {}
                None => {
                    return self.err_at(
                        expr,
                        format!("constructor {class} in class {class} cannot be applied to given types"),
                    );
                }
            }
            return Ok(Ty::Of(TypeRef::Named(class.to_string())));
        }
        let fits = match class {
            _ if library::is_throwable(class) => arity <= 2,
            "Object" => arity == 0,
            "String" => arity <= 1,
            _ => return self.err_at(expr, format!("cannot find symbol: class {class}")),
        };
        if !fits {
            return self.err_at(
                expr,
                format!("constructor {class} in class {class} cannot be applied to given types"),
            );
        }
        Ok(Ty::Of(TypeRef::Named(class.to_string())))
    }
}

fn describe(method: &MethodDecl) -> String {
    let params: Vec<String> = method.params.iter().map(|p| p.ty.to_string()).collect();
    format!("{}({})", method.name, params.join(","))
}

fn closing_position(method: &MethodDecl) -> (u32, u32) {
    method
        .body
        .stmts
        .last()
        .map_or((method.line, method.column), |s| (s.line, s.column))
}

// === Reachability ===

fn completes_normally(block: &Block) -> bool {
    block.stmts.iter().all(stmt_completes)
}

fn stmt_completes(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) | StmtKind::Throw(_) => false,
        StmtKind::Block(block) => completes_normally(block),
        StmtKind::If {
            then,
            otherwise: Some(otherwise),
            ..
        } => stmt_completes(then) || stmt_completes(otherwise),
        StmtKind::While { cond, body } => !is_true(cond) || breaks(body),
        StmtKind::For { cond, body, .. } => cond.as_ref().is_some_and(|c| !is_true(c)) || breaks(body),
        StmtKind::DoWhile { body, cond } => (stmt_completes(body) && !is_true(cond)) || breaks(body),
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            let finally_completes = finally.as_ref().is_none_or(completes_normally);
            finally_completes
                && (completes_normally(body) || catches.iter().any(|c| completes_normally(&c.body)))
        }
        _ => true,
    }
}

fn is_true(expr: &Expr) -> bool {
    expr.kind == ExprKind::Literal(Literal::Bool(true))
}

/// Whether a loop body contains a `break` that exits this loop
fn breaks(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Break => true,
        StmtKind::Block(block) => block.stmts.iter().any(breaks),
        StmtKind::If {
            then, otherwise, ..
        } => breaks(then) || otherwise.as_deref().is_some_and(breaks),
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            body.stmts.iter().any(breaks)
                || catches.iter().any(|c| c.body.stmts.iter().any(breaks))
                || finally.as_ref().is_some_and(|f| f.stmts.iter().any(breaks))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::{Dialect, parse};

    fn check_src(text: &str) -> Result<(), Diagnostic> {
        let source = SourceUnit::new("Question.java", text);
        let unit = parse(&source, Dialect::Full).expect("parse");
        let visible: ClassScope<'_> = unit.classes.iter().map(|c| (c.name.as_str(), c)).collect();
        check(&unit, &source, &visible)
    }

    fn main_body(body: &str) -> String {
        format!("public class Question {{\n  static int counter;\n  int value;\n  public static void main(String[] args) {{\n{body}\n  }}\n  static int twice(int x) {{ return x * 2; }}\n  void bump() {{ value++; }}\n}}\n")
    }

    fn assert_rejects(body: &str, needle: &str) {
        let err = check_src(&main_body(body)).expect_err(body);
        assert!(err.message.contains(needle), "`{}` does not contain `{needle}`", err.message);
    }

    #[test]
    fn accepts_well_formed_code() {
        check_src(&main_body(
            "int total = 0;\nfor (int i = 0; i < 10; i++) { total += twice(i); }\nString s = \"t=\" + total;\nSystem.out.println(s.length());\nlong big = total;\ndouble d = Math.max(1, 2.5);\nint[] arr = new int[3];\narr[0] = Integer.parseInt(\"4\");\nfor (int v : arr) { counter += v; }\nvar q = new Question();\nq.bump();\ntry { throw new IllegalStateException(\"x\"); } catch (RuntimeException e) { System.err.println(e.getMessage()); }",
        ))
        .unwrap();
    }

    #[test]
    fn unknown_names() {
        assert_rejects("int x = y + 1;", "cannot find symbol: variable y");
        assert_rejects("frobnicate(1);", "cannot find symbol: method frobnicate(int)");
        assert_rejects("Scanner s = null;", "cannot find symbol: class Scanner");
        assert_rejects("Question.nope();", "cannot find symbol: method nope()");
        assert_rejects("Math.cube(2);", "cannot find symbol: method cube(int) in class Math");
        assert_rejects("\"s\".shout();", "cannot find symbol: method shout() in String");
    }

    #[test]
    fn static_context_misuse() {
        assert_rejects("value = 1;", "non-static variable value");
        assert_rejects("bump();", "non-static method bump()");
        assert_rejects("Object o = this;", "non-static variable this");
    }

    #[test]
    fn type_mismatches() {
        assert_rejects("int x = \"one\";", "String cannot be converted to int");
        assert_rejects("int x = 1.5;", "possible lossy conversion from double to int");
        assert_rejects("if (1) { }", "int cannot be converted to boolean");
        assert_rejects("boolean b = !3;", "bad operand type int for unary operator '!'");
        assert_rejects("int x = bump2();", "cannot find symbol");
        assert_rejects("int y = twice(\"a\");", "cannot be applied to given types");
        assert_rejects("String s = null; s.length().foo();", "int cannot be dereferenced");
        assert_rejects("int[] a = new int[2]; a.length = 3;", "final variable length");
    }

    #[test]
    fn void_values() {
        let text = "class Question { static void f() {} static void main(String[] a) { int x = f(); } }";
        let err = check_src(text).unwrap_err();
        assert_eq!(err.message, "'void' type not allowed here");
    }

    #[test]
    fn control_flow() {
        assert_rejects("break;", "break outside switch or loop");
        assert_rejects("return 1;", "unexpected return value");
        assert_rejects("int x = 1; int x = 2;", "variable x is already defined");

        let missing = "class Question { static int f(boolean b) { if (b) { return 1; } } }";
        assert_eq!(check_src(missing).unwrap_err().message, "missing return statement");

        let ok = "class Question { static int f(boolean b) { if (b) { return 1; } else { throw new RuntimeException(); } } static int g() { while (true) { } } }";
        check_src(ok).unwrap();
    }

    #[test]
    fn duplicate_members() {
        let text = "class Question { void a() {} void a() {} }";
        assert!(check_src(text).unwrap_err().message.contains("already defined"));
        let overload = "class Question { void a() {} void a(int x) {} }";
        check_src(overload).unwrap();
    }

    #[test]
    fn throw_requires_throwable() {
        assert_rejects("throw \"boom\";", "String cannot be converted to Throwable");
        assert_rejects("try { } catch (Question e) { }", "Question cannot be converted to Throwable");
    }

    #[test]
    fn constructors() {
        let text = "class P { int x; P(int x) { this.x = x; } }\nclass Question { static void main(String[] a) { P p = new P(); } }";
        assert!(check_src(text).unwrap_err().message.contains("constructor P"));
    }
}
