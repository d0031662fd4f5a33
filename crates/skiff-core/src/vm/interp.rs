use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use crate::compiler::{EntryPoint, LoadedClass, Program};
use crate::lang::ast::{
    BinaryOp, ClassDecl, Expr, ExprKind, Literal, MethodDecl, Stmt, StmtKind, TypeRef, UnaryOp,
};
use crate::lang::library;
use crate::permission::{Capability, PermissionSet};
use crate::worker::KillSwitch;

use super::throwable::{TraceElement, Throwable};
use super::value::{code_char, Array, Num, Object, Value};

/// Resource bounds of one execution
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_call_depth: usize,
    pub max_array_length: usize,
}

/// Abrupt termination that unwinds past ordinary control flow
#[derive(Debug, Clone)]
pub enum Abort {
    Throw(Rc<Throwable>),
    /// The kill switch was tripped
    Killed,
    /// `System.exit` with the given status
    Exit(i32),
}

pub type Exec<T> = Result<T, Abort>;

/// How a run of the entry point ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Returned,
    Exited(i32),
    /// An exception escaped, wrapped in the invocation envelope when it
    /// came from the entry point itself
    Threw(Throwable),
    Killed,
}

#[derive(Debug)]
pub(super) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

#[derive(Debug)]
struct Frame {
    class: String,
    method: String,
    unit: String,
    line: u32,
}

#[derive(Debug)]
struct Local {
    ty: TypeRef,
    value: Value,
}

/// Lexical context of the method being run
pub(super) struct Ctx<'p> {
    class: &'p LoadedClass,
    this: Option<Rc<Object>>,
    scopes: Vec<HashMap<&'p str, Local>>,
}

impl<'p> Ctx<'p> {
    fn new(class: &'p LoadedClass, this: Option<Rc<Object>>) -> Self {
        Self {
            class,
            this,
            scopes: vec![HashMap::new()],
        }
    }

    fn local(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn local_mut(&mut self, name: &str) -> Option<&mut Local> {
        self.scopes.iter_mut().rev().find_map(|s| s.get_mut(name))
    }

    fn declare(&mut self, name: &'p str, ty: TypeRef, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, Local { ty, value });
        }
    }
}

/// A class named in expression position
pub(super) enum ClassRef<'p> {
    User(&'p LoadedClass),
    Builtin(&'p str),
}

/// An assignable location
enum Place<'p> {
    Local(&'p str),
    Static(&'p LoadedClass, &'p str),
    Field(Rc<Object>, &'p str),
    Elem(Rc<Array>, usize),
}

pub struct Interpreter<'p> {
    pub(super) program: &'p Program,
    pub(super) permissions: &'p PermissionSet,
    pub(super) kill: KillSwitch,
    pub(super) limits: Limits,
    pub(super) started: Instant,
    statics: HashMap<&'p str, HashMap<&'p str, Value>>,
    frames: Vec<Frame>,
}

fn runtime_type(value: &Value) -> TypeRef {
    match value {
        Value::Int(_) => TypeRef::Int,
        Value::Long(_) => TypeRef::Long,
        Value::Double(_) => TypeRef::Double,
        Value::Bool(_) => TypeRef::Boolean,
        Value::Char(_) => TypeRef::Char,
        _ => TypeRef::Inferred,
    }
}

/// Narrow `value` back to the primitive kind of `like`, as compound
/// assignment does
fn cast_like(like: &Value, value: Value) -> Value {
    match (like, Num::of(&value)) {
        (Value::Int(_), Some(n)) => cast_num(&TypeRef::Int, n),
        (Value::Long(_), Some(n)) => cast_num(&TypeRef::Long, n),
        (Value::Char(_), Some(n)) => cast_num(&TypeRef::Char, n),
        (Value::Double(_), Some(n)) => cast_num(&TypeRef::Double, n),
        _ => value,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cast_num(ty: &TypeRef, n: Num) -> Value {
    match ty {
        TypeRef::Int => Value::Int(match n {
            Num::Int(v) => v,
            Num::Long(v) => v as i32,
            Num::Double(v) => v as i32,
        }),
        TypeRef::Long => Value::Long(n.as_long()),
        TypeRef::Double => Value::Double(n.as_double()),
        TypeRef::Char => Value::Char(code_char(match n {
            Num::Double(v) => i64::from(v as i32),
            other => other.as_long(),
        })),
        _ => n.into_value(),
    }
}

fn compare(op: BinaryOp, l: Num, r: Num) -> bool {
    let ordering = match l.promote_with(r) {
        (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
        (Num::Long(a), Num::Long(b)) => Some(a.cmp(&b)),
        (a, b) => a.as_double().partial_cmp(&b.as_double()),
    };
    match op {
        BinaryOp::Lt => ordering == Some(Ordering::Less),
        BinaryOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Gt => ordering == Some(Ordering::Greater),
        BinaryOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        _ => false,
    }
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program, permissions: &'p PermissionSet, kill: KillSwitch, limits: Limits) -> Self {
        Self {
            program,
            permissions,
            kill,
            limits,
            started: Instant::now(),
            statics: HashMap::new(),
            frames: Vec::new(),
        }
    }

    /// Invoke the entry point the way a reflective invoker would
    ///
    /// Locating the class needs `InspectOrigin`; a non-public entry method
    /// also needs `AccessDeclaredMembers` and `SuppressAccessChecks`. Those
    /// failures surface directly, anything thrown by the program itself is
    /// wrapped in one invocation envelope.
    pub fn run(&mut self, entry: &EntryPoint) -> Completion {
        match self.invoke(entry) {
            Ok(()) => Completion::Returned,
            Err(Abort::Exit(status)) => Completion::Exited(status),
            Err(Abort::Killed) => Completion::Killed,
            Err(Abort::Throw(t)) => Completion::Threw((*t).clone()),
        }
    }

    fn invoke(&mut self, entry: &EntryPoint) -> Exec<()> {
        if self.permissions.check(Capability::InspectOrigin).is_err() {
            return Err(self.throw("SecurityException", "access denied (inspect-origin)"));
        }
        let Some(class) = self.program.class(&entry.class) else {
            return Err(self.throw("NoSuchMethodError", format!("{}.{}", entry.class, entry.method)));
        };
        let Some(method) = class
            .decl
            .methods
            .iter()
            .find(|m| m.name == entry.method && m.params.len() == 1 && m.params[0].ty.is_string_array())
        else {
            return Err(self.throw("NoSuchMethodError", format!("{}.{}", entry.class, entry.method)));
        };
        if !entry.is_public {
            if self.permissions.check(Capability::AccessDeclaredMembers).is_err() {
                return Err(self.throw("SecurityException", "access denied (access-declared-members)"));
            }
            if self.permissions.check(Capability::SuppressAccessChecks).is_err() {
                return Err(self.throw(
                    "IllegalAccessException",
                    format!("cannot access a non-public member {}.{}", entry.class, entry.method),
                ));
            }
        }

        tracing::trace!(class = %entry.class, method = %entry.method, "invoking entry point");
        let args = Value::Array(Rc::new(Array {
            elem: TypeRef::string(),
            items: RefCell::new(Vec::new()),
        }));
        let result = self
            .ensure_init(class)
            .and_then(|()| self.call_method(class, method, None, vec![args]));
        match result {
            Ok(_) => Ok(()),
            Err(Abort::Throw(t)) => Err(Abort::Throw(Rc::new(Throwable::invocation_target((*t).clone())))),
            Err(other) => Err(other),
        }
    }

    // === Errors ===

    fn trace(&self) -> Vec<TraceElement> {
        self.frames
            .iter()
            .rev()
            .map(|f| TraceElement {
                class: f.class.clone(),
                method: f.method.clone(),
                unit: f.unit.clone(),
                line: f.line,
            })
            .collect()
    }

    pub(super) fn throwable(&self, class: &str, message: Option<String>) -> Throwable {
        Throwable::new(class, message, self.trace())
    }

    pub(super) fn throw(&self, class: &str, message: impl Into<String>) -> Abort {
        Abort::Throw(Rc::new(self.throwable(class, Some(message.into()))))
    }

    pub(super) fn npe(&self, what: &str) -> Abort {
        self.throw("NullPointerException", format!("Cannot {what} because value is null"))
    }

    pub(super) fn type_error(&self, value: &Value, expected: &str) -> Abort {
        self.throw(
            "ClassCastException",
            format!("{} cannot be cast to {expected}", value.type_name()),
        )
    }

    /// Refuse to build a string longer than the allocation limit
    pub(super) fn string_fits(&self, len: usize) -> Exec<()> {
        if len > self.limits.max_array_length {
            return Err(self.throw("OutOfMemoryError", "Requested string length exceeds VM limit"));
        }
        Ok(())
    }

    pub(super) fn tick(&self) -> Exec<()> {
        if self.kill.is_killed() {
            Err(Abort::Killed)
        } else {
            Ok(())
        }
    }

    fn set_line(&mut self, line: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
    }

    // === Classes ===

    /// Run static initialisers of `class` once, on first use
    fn ensure_init(&mut self, class: &'p LoadedClass) -> Exec<()> {
        let name = class.decl.name.as_str();
        if self.statics.contains_key(name) {
            return Ok(());
        }
        let defaults = class
            .decl
            .fields
            .iter()
            .filter(|f| f.modifiers.is_static)
            .map(|f| (f.name.as_str(), Value::default_for(&f.ty)))
            .collect();
        self.statics.insert(name, defaults);

        let inits: Vec<_> = class
            .decl
            .fields
            .iter()
            .filter(|f| f.modifiers.is_static)
            .filter_map(|f| f.init.as_ref().map(|init| (f, init)))
            .collect();
        if inits.is_empty() {
            return Ok(());
        }
        self.enter(class, "<clinit>", class.decl.line)?;
        let mut ctx = Ctx::new(class, None);
        let result = inits.into_iter().try_for_each(|(field, init)| {
            self.set_line(field.line);
            let value = self.eval(&mut ctx, init)?.coerce(&field.ty);
            if let Some(statics) = self.statics.get_mut(name) {
                statics.insert(field.name.as_str(), value);
            }
            Ok(())
        });
        self.frames.pop();
        result
    }

    fn enter(&mut self, class: &LoadedClass, method: &str, line: u32) -> Exec<()> {
        self.tick()?;
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(Abort::Throw(Rc::new(self.throwable("StackOverflowError", None))));
        }
        self.frames.push(Frame {
            class: class.decl.name.clone(),
            method: method.to_string(),
            unit: class.unit.clone(),
            line,
        });
        Ok(())
    }

    pub(super) fn call_method(
        &mut self,
        class: &'p LoadedClass,
        method: &'p MethodDecl,
        this: Option<Rc<Object>>,
        args: Vec<Value>,
    ) -> Exec<Value> {
        let frame_name = if this.is_some() && method.name == class.decl.name && method.ret == TypeRef::Void {
            "<init>"
        } else {
            method.name.as_str()
        };
        self.enter(class, frame_name, method.line)?;
        let mut ctx = Ctx::new(class, this);
        for (param, arg) in method.params.iter().zip(args) {
            ctx.declare(&param.name, param.ty.clone(), arg.coerce(&param.ty));
        }
        let result = self.stmts(&mut ctx, &method.body.stmts);
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value.coerce(&method.ret)),
            _ => Ok(Value::Null),
        }
    }

    pub(super) fn instantiate(&mut self, class: &'p LoadedClass, args: Vec<Value>) -> Exec<Value> {
        let decl: &'p ClassDecl = &class.decl;
        if decl.modifiers.is_abstract {
            return Err(self.throw(
                "UnsupportedOperationException",
                format!("{} is abstract; cannot be instantiated", decl.name),
            ));
        }
        self.ensure_init(class)?;
        let ctor = decl.constructor(args.len());
        if ctor.is_none() && !(args.is_empty() && decl.constructors.is_empty()) {
            return Err(self.throw("NoSuchMethodError", format!("{}.<init>", decl.name)));
        }

        let fields = decl
            .fields
            .iter()
            .filter(|f| !f.modifiers.is_static)
            .map(|f| (f.name.clone(), Value::default_for(&f.ty)))
            .collect();
        let object = Rc::new(Object {
            class: decl.name.clone(),
            fields: RefCell::new(fields),
        });

        let inits: Vec<_> = decl
            .fields
            .iter()
            .filter(|f| !f.modifiers.is_static)
            .filter_map(|f| f.init.as_ref().map(|init| (f, init)))
            .collect();
        if !inits.is_empty() {
            self.enter(class, "<init>", decl.line)?;
            let mut ctx = Ctx::new(class, Some(Rc::clone(&object)));
            let result = inits.into_iter().try_for_each(|(field, init)| {
                self.set_line(field.line);
                let value = self.eval(&mut ctx, init)?.coerce(&field.ty);
                object.fields.borrow_mut().insert(field.name.clone(), value);
                Ok(())
            });
            self.frames.pop();
            result?;
        }

        if let Some(ctor) = ctor {
            self.call_method(class, ctor, Some(Rc::clone(&object)), args)?;
        }
        Ok(Value::Object(object))
    }

    fn static_value(&mut self, class: &'p LoadedClass, name: &str) -> Exec<Value> {
        self.ensure_init(class)?;
        self.statics
            .get(class.decl.name.as_str())
            .and_then(|fields| fields.get(name))
            .cloned()
            .ok_or_else(|| self.throw("NoSuchFieldError", name))
    }

    pub(super) fn class_ref(&self, ctx: &Ctx<'p>, expr: &'p Expr) -> Option<ClassRef<'p>> {
        let ExprKind::Name(name) = &expr.kind else {
            return None;
        };
        if ctx.local(name).is_some() || ctx.class.decl.field(name).is_some() {
            return None;
        }
        if let Some(class) = self.program.class(name) {
            return Some(ClassRef::User(class));
        }
        library::is_builtin_class(name).then_some(ClassRef::Builtin(name.as_str()))
    }

    // === Statements ===

    fn scoped<T>(&mut self, ctx: &mut Ctx<'p>, f: impl FnOnce(&mut Self, &mut Ctx<'p>) -> Exec<T>) -> Exec<T> {
        ctx.scopes.push(HashMap::new());
        let result = f(self, ctx);
        ctx.scopes.pop();
        result
    }

    fn stmts(&mut self, ctx: &mut Ctx<'p>, stmts: &'p [Stmt]) -> Exec<Flow> {
        for stmt in stmts {
            match self.stmt(ctx, stmt)? {
                Flow::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        Ok(Flow::Normal)
    }

    fn truth(&mut self, ctx: &mut Ctx<'p>, cond: &'p Expr) -> Exec<bool> {
        match self.eval(ctx, cond)? {
            Value::Bool(b) => Ok(b),
            other => Err(self.type_error(&other, "boolean")),
        }
    }

    /// Run a loop body; `Some` carries a flow that leaves the loop
    fn iteration(&mut self, ctx: &mut Ctx<'p>, body: &'p Stmt) -> Exec<Option<Flow>> {
        self.tick()?;
        match self.scoped(ctx, |vm, ctx| vm.stmt(ctx, body))? {
            Flow::Normal | Flow::Continue => Ok(None),
            Flow::Break => Ok(Some(Flow::Normal)),
            ret @ Flow::Return(_) => Ok(Some(ret)),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn stmt(&mut self, ctx: &mut Ctx<'p>, stmt: &'p Stmt) -> Exec<Flow> {
        self.tick()?;
        self.set_line(stmt.line);
        match &stmt.kind {
            StmtKind::Local { ty, vars } => {
                for (name, init) in vars {
                    let value = match init {
                        Some(init) => self.eval(ctx, init)?.coerce(ty),
                        None => Value::default_for(ty),
                    };
                    let slot = if *ty == TypeRef::Inferred {
                        runtime_type(&value)
                    } else {
                        ty.clone()
                    };
                    ctx.declare(name, slot, value);
                }
                Ok(Flow::Normal)
            }
            StmtKind::Expr(expr) => {
                self.eval(ctx, expr)?;
                Ok(Flow::Normal)
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                if self.truth(ctx, cond)? {
                    self.scoped(ctx, |vm, ctx| vm.stmt(ctx, then))
                } else if let Some(otherwise) = otherwise {
                    self.scoped(ctx, |vm, ctx| vm.stmt(ctx, otherwise))
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                while self.truth(ctx, cond)? {
                    if let Some(flow) = self.iteration(ctx, body)? {
                        return Ok(flow);
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::DoWhile { body, cond } => loop {
                if let Some(flow) = self.iteration(ctx, body)? {
                    return Ok(flow);
                }
                if !self.truth(ctx, cond)? {
                    return Ok(Flow::Normal);
                }
            },
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => self.scoped(ctx, |vm, ctx| {
                for stmt in init {
                    vm.stmt(ctx, stmt)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !vm.truth(ctx, cond)? {
                            return Ok(Flow::Normal);
                        }
                    }
                    if let Some(flow) = vm.iteration(ctx, body)? {
                        return Ok(flow);
                    }
                    for expr in update {
                        vm.eval(ctx, expr)?;
                    }
                }
            }),
            StmtKind::ForEach {
                ty,
                name,
                iterable,
                body,
            } => {
                let items = match self.eval(ctx, iterable)? {
                    Value::Array(array) => array.items.borrow().clone(),
                    Value::Null => return Err(self.npe("iterate over the array")),
                    other => return Err(self.type_error(&other, "array")),
                };
                for item in items {
                    let value = item.coerce(ty);
                    let slot = if *ty == TypeRef::Inferred {
                        runtime_type(&value)
                    } else {
                        ty.clone()
                    };
                    let flow = self.scoped(ctx, |vm, ctx| {
                        ctx.declare(name, slot, value);
                        vm.iteration(ctx, body)
                    })?;
                    if let Some(flow) = flow {
                        return Ok(flow);
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Block(block) => self.scoped(ctx, |vm, ctx| vm.stmts(ctx, &block.stmts)),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(ctx, expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Throw(expr) => match self.eval(ctx, expr)? {
                Value::Throwable(t) => Err(Abort::Throw(t)),
                Value::Null => Err(self.npe("throw the exception")),
                other => Err(self.type_error(&other, "Throwable")),
            },
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                let mut result = self.scoped(ctx, |vm, ctx| vm.stmts(ctx, &body.stmts));
                if let Err(Abort::Throw(thrown)) = &result {
                    let handler = catches.iter().find(|clause| {
                        clause.types.iter().any(|ty| library::is_subclass(&thrown.class, ty))
                    });
                    if let Some(clause) = handler {
                        let thrown = Rc::clone(thrown);
                        let bound = TypeRef::Named(clause.types[0].clone());
                        result = self.scoped(ctx, |vm, ctx| {
                            ctx.declare(&clause.name, bound, Value::Throwable(thrown));
                            vm.stmts(ctx, &clause.body.stmts)
                        });
                    }
                }
                match finally {
                    Some(_) if matches!(result, Err(Abort::Killed | Abort::Exit(_))) => result,
                    Some(finally) => match self.scoped(ctx, |vm, ctx| vm.stmts(ctx, &finally.stmts))? {
                        Flow::Normal => result,
                        abrupt => Ok(abrupt),
                    },
                    None => result,
                }
            }
            StmtKind::Empty => Ok(Flow::Normal),
        }
    }

    // === Expressions ===

    pub(super) fn eval_args(&mut self, ctx: &mut Ctx<'p>, args: &'p [Expr]) -> Exec<Vec<Value>> {
        args.iter().map(|arg| self.eval(ctx, arg)).collect()
    }

    pub(super) fn int_value(&self, value: &Value) -> Exec<i32> {
        match value {
            Value::Int(v) => Ok(*v),
            Value::Char(c) => Ok(super::value::char_code(*c)),
            other => Err(self.type_error(other, "int")),
        }
    }

    #[allow(clippy::too_many_lines)]
    pub(super) fn eval(&mut self, ctx: &mut Ctx<'p>, expr: &'p Expr) -> Exec<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                Literal::Int(v) => Value::Int(*v),
                Literal::Long(v) => Value::Long(*v),
                Literal::Double(v) => Value::Double(*v),
                Literal::Bool(v) => Value::Bool(*v),
                Literal::Char(v) => Value::Char(*v),
                Literal::Str(s) => Value::str(s.as_str()),
                Literal::Null => Value::Null,
            }),
            ExprKind::Name(_) | ExprKind::Index { .. } => {
                let place = self.place(ctx, expr)?;
                self.load(ctx, &place)
            }
            ExprKind::Field { target, name } => {
                if let Some(class) = self.class_ref(ctx, target) {
                    return match class {
                        ClassRef::User(class) => self.static_value(class, name),
                        ClassRef::Builtin(class) => self
                            .builtin_static_field(class, name)
                            .ok_or_else(|| self.throw("NoSuchFieldError", format!("{class}.{name}"))),
                    };
                }
                match self.eval(ctx, target)? {
                    Value::Array(array) if name == "length" => {
                        Ok(Value::Int(i32::try_from(array.len()).unwrap_or(i32::MAX)))
                    }
                    Value::Object(object) => {
                        let found = object.fields.borrow().get(name.as_str()).cloned();
                        match found {
                            Some(value) => Ok(value),
                            None => match self.program.class(&object.class) {
                                Some(class) if class.decl.field(name).is_some() => self.static_value(class, name),
                                _ => Err(self.throw("NoSuchFieldError", name.as_str())),
                            },
                        }
                    }
                    Value::Null => Err(self.npe(&format!("read field \"{name}\""))),
                    _ => Err(self.throw("NoSuchFieldError", name.as_str())),
                }
            }
            ExprKind::This => ctx
                .this
                .as_ref()
                .map(|o| Value::Object(Rc::clone(o)))
                .ok_or_else(|| self.throw("NoSuchFieldError", "this")),
            ExprKind::Call { target, name, args } => self.call(ctx, target.as_deref(), name, args),
            ExprKind::New { class, args } => {
                let args = self.eval_args(ctx, args)?;
                match self.program.class(class) {
                    Some(loaded) => self.instantiate(loaded, args),
                    None => self.new_builtin(class, args),
                }
            }
            ExprKind::NewArray { ty, dims } => {
                let mut sizes = Vec::with_capacity(dims.len());
                for dim in dims {
                    let value = self.eval(ctx, dim)?;
                    sizes.push(self.int_value(&value)?);
                }
                let mut total: usize = 1;
                for &size in &sizes {
                    let Ok(size) = usize::try_from(size) else {
                        return Err(self.throw("NegativeArraySizeException", size.to_string()));
                    };
                    total = total.saturating_mul(size);
                }
                if total > self.limits.max_array_length {
                    return Err(self.throw("OutOfMemoryError", "Requested array size exceeds VM limit"));
                }
                Ok(Self::make_array(ty, &sizes))
            }
            ExprKind::ArrayLit { ty, items } => {
                let elem = match ty {
                    TypeRef::Array(elem) => (**elem).clone(),
                    other => other.clone(),
                };
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(ctx, item)?.coerce(&elem));
                }
                Ok(Value::Array(Rc::new(Array {
                    elem,
                    items: RefCell::new(values),
                })))
            }
            ExprKind::Unary { op, expr: inner } => {
                let value = self.eval(ctx, inner)?;
                self.unary(*op, value)
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => Ok(Value::Bool(self.truth(ctx, lhs)? && self.truth(ctx, rhs)?)),
                BinaryOp::Or => Ok(Value::Bool(self.truth(ctx, lhs)? || self.truth(ctx, rhs)?)),
                _ => {
                    let l = self.eval(ctx, lhs)?;
                    let r = self.eval(ctx, rhs)?;
                    self.binary(*op, l, r)
                }
            },
            ExprKind::Assign { op, target, value } => {
                let place = self.place(ctx, target)?;
                let value = match op {
                    None => self.eval(ctx, value)?,
                    Some(op) => {
                        let old = self.load(ctx, &place)?;
                        let rhs = self.eval(ctx, value)?;
                        let combined = self.binary(*op, old.clone(), rhs)?;
                        cast_like(&old, combined)
                    }
                };
                self.store(ctx, &place, value)
            }
            ExprKind::IncDec {
                target,
                increment,
                prefix,
            } => {
                let place = self.place(ctx, target)?;
                let old = self.load(ctx, &place)?;
                let op = if *increment { BinaryOp::Add } else { BinaryOp::Sub };
                let updated = cast_like(&old, self.binary(op, old.clone(), Value::Int(1))?);
                let stored = self.store(ctx, &place, updated)?;
                Ok(if *prefix { stored } else { old })
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if self.truth(ctx, cond)? {
                    self.eval(ctx, then)
                } else {
                    self.eval(ctx, otherwise)
                }
            }
            ExprKind::Cast { ty, expr: inner } => {
                let value = self.eval(ctx, inner)?;
                self.cast(ty, value)
            }
        }
    }

    fn make_array(ty: &TypeRef, sizes: &[i32]) -> Value {
        let elem = match ty {
            TypeRef::Array(elem) => (**elem).clone(),
            other => other.clone(),
        };
        let Some((&first, rest)) = sizes.split_first() else {
            return Value::Null;
        };
        let len = usize::try_from(first).unwrap_or(0);
        let items = if rest.is_empty() {
            vec![Value::default_for(&elem); len]
        } else {
            (0..len).map(|_| Self::make_array(&elem, rest)).collect()
        };
        Value::Array(Rc::new(Array {
            elem,
            items: RefCell::new(items),
        }))
    }

    fn place(&mut self, ctx: &mut Ctx<'p>, target: &'p Expr) -> Exec<Place<'p>> {
        match &target.kind {
            ExprKind::Name(name) => {
                if ctx.local(name).is_some() {
                    return Ok(Place::Local(name));
                }
                match ctx.class.decl.field(name) {
                    Some(field) if field.modifiers.is_static => Ok(Place::Static(ctx.class, name)),
                    Some(_) => match &ctx.this {
                        Some(this) => Ok(Place::Field(Rc::clone(this), name)),
                        None => Err(self.throw("NoSuchFieldError", name.as_str())),
                    },
                    None => Err(self.throw("NoSuchFieldError", name.as_str())),
                }
            }
            ExprKind::Field { target: owner, name } => {
                if let Some(ClassRef::User(class)) = self.class_ref(ctx, owner) {
                    return Ok(Place::Static(class, name));
                }
                match self.eval(ctx, owner)? {
                    Value::Object(object) => {
                        if object.fields.borrow().contains_key(name.as_str()) {
                            return Ok(Place::Field(object, name));
                        }
                        match self.program.class(&object.class) {
                            Some(class) if class.decl.field(name).is_some() => Ok(Place::Static(class, name)),
                            _ => Err(self.throw("NoSuchFieldError", name.as_str())),
                        }
                    }
                    Value::Null => Err(self.npe(&format!("assign field \"{name}\""))),
                    _ => Err(self.throw("NoSuchFieldError", name.as_str())),
                }
            }
            ExprKind::Index { target: array, index } => {
                let array = self.eval(ctx, array)?;
                let index = self.eval(ctx, index)?;
                let index = self.int_value(&index)?;
                let array = match array {
                    Value::Array(array) => array,
                    Value::Null => return Err(self.npe("load from the array")),
                    other => return Err(self.type_error(&other, "array")),
                };
                let len = array.len();
                match usize::try_from(index) {
                    Ok(i) if i < len => Ok(Place::Elem(array, i)),
                    _ => Err(self.throw(
                        "ArrayIndexOutOfBoundsException",
                        format!("Index {index} out of bounds for length {len}"),
                    )),
                }
            }
            _ => Err(self.throw("IllegalStateException", "expression is not assignable")),
        }
    }

    fn load(&mut self, ctx: &Ctx<'p>, place: &Place<'p>) -> Exec<Value> {
        match place {
            Place::Local(name) => Ok(ctx.local(name).map_or(Value::Null, |l| l.value.clone())),
            Place::Static(class, name) => self.static_value(*class, name),
            Place::Field(object, name) => Ok(object.fields.borrow().get(*name).cloned().unwrap_or(Value::Null)),
            Place::Elem(array, i) => Ok(array.items.borrow().get(*i).cloned().unwrap_or(Value::Null)),
        }
    }

    fn store(&mut self, ctx: &mut Ctx<'p>, place: &Place<'p>, value: Value) -> Exec<Value> {
        match place {
            Place::Local(name) => {
                if let Some(local) = ctx.local_mut(name) {
                    local.value = value.coerce(&local.ty);
                    return Ok(local.value.clone());
                }
                Ok(value)
            }
            Place::Static(class, name) => {
                self.ensure_init(*class)?;
                let value = match class.decl.field(name) {
                    Some(field) if field.modifiers.is_static => value.coerce(&field.ty),
                    _ => return Err(self.throw("NoSuchFieldError", *name)),
                };
                if let Some(fields) = self.statics.get_mut(class.decl.name.as_str()) {
                    if let Some(field) = class.decl.field(name) {
                        fields.insert(field.name.as_str(), value.clone());
                    }
                }
                Ok(value)
            }
            Place::Field(object, name) => {
                let ty = self
                    .program
                    .class(&object.class)
                    .and_then(|c| c.decl.field(name))
                    .map_or(TypeRef::Inferred, |f| f.ty.clone());
                let value = value.coerce(&ty);
                object.fields.borrow_mut().insert((*name).to_string(), value.clone());
                Ok(value)
            }
            Place::Elem(array, i) => {
                let value = value.coerce(&array.elem);
                if let Some(slot) = array.items.borrow_mut().get_mut(*i) {
                    *slot = value.clone();
                }
                Ok(value)
            }
        }
    }

    fn unary(&self, op: UnaryOp, value: Value) -> Exec<Value> {
        let num = Num::of(&value);
        match (op, num, &value) {
            (UnaryOp::Not, _, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Plus, Some(n), _) => Ok(n.into_value()),
            (UnaryOp::Neg, Some(Num::Int(v)), _) => Ok(Value::Int(v.wrapping_neg())),
            (UnaryOp::Neg, Some(Num::Long(v)), _) => Ok(Value::Long(v.wrapping_neg())),
            (UnaryOp::Neg, Some(Num::Double(v)), _) => Ok(Value::Double(-v)),
            (UnaryOp::BitNot, Some(Num::Int(v)), _) => Ok(Value::Int(!v)),
            (UnaryOp::BitNot, Some(Num::Long(v)), _) => Ok(Value::Long(!v)),
            _ => Err(self.type_error(&value, "a numeric type")),
        }
    }

    pub(super) fn binary(&mut self, op: BinaryOp, l: Value, r: Value) -> Exec<Value> {
        if op == BinaryOp::Add && (matches!(l, Value::Str(_)) || matches!(r, Value::Str(_))) {
            let mut text = self.stringify(&l)?;
            let tail = self.stringify(&r)?;
            self.string_fits(text.len().saturating_add(tail.len()))?;
            text.push_str(&tail);
            return Ok(Value::str(text));
        }
        match op {
            BinaryOp::Eq => return Ok(Value::Bool(l.same(&r))),
            BinaryOp::Ne => return Ok(Value::Bool(!l.same(&r))),
            BinaryOp::And | BinaryOp::Or => {
                return match (&l, &r) {
                    (Value::Bool(a), Value::Bool(b)) => {
                        Ok(Value::Bool(if op == BinaryOp::And { *a && *b } else { *a || *b }))
                    }
                    _ => Err(self.type_error(&l, "boolean")),
                };
            }
            _ => {}
        }
        if let (Value::Bool(a), Value::Bool(b)) = (&l, &r) {
            return match op {
                BinaryOp::BitAnd => Ok(Value::Bool(a & b)),
                BinaryOp::BitOr => Ok(Value::Bool(a | b)),
                BinaryOp::BitXor => Ok(Value::Bool(a ^ b)),
                _ => Err(self.type_error(&l, "a numeric type")),
            };
        }
        let (Some(a), Some(b)) = (Num::of(&l), Num::of(&r)) else {
            let culprit = if Num::of(&l).is_none() { &l } else { &r };
            return Err(self.type_error(culprit, "a numeric type"));
        };
        if op.is_comparison() {
            return Ok(Value::Bool(compare(op, a, b)));
        }
        self.arith(op, a, b)
    }

    fn arith(&self, op: BinaryOp, a: Num, b: Num) -> Exec<Value> {
        let by_zero = || self.throw("ArithmeticException", "/ by zero");
        let not_integral = || {
            self.throw(
                "ClassCastException",
                format!("bad operand types for binary operator '{}'", op.symbol()),
            )
        };
        match a.promote_with(b) {
            (Num::Int(x), Num::Int(y)) => Ok(Value::Int(match op {
                BinaryOp::Add => x.wrapping_add(y),
                BinaryOp::Sub => x.wrapping_sub(y),
                BinaryOp::Mul => x.wrapping_mul(y),
                BinaryOp::Div if y == 0 => return Err(by_zero()),
                BinaryOp::Div => x.wrapping_div(y),
                BinaryOp::Rem if y == 0 => return Err(by_zero()),
                BinaryOp::Rem => x.wrapping_rem(y),
                BinaryOp::BitAnd => x & y,
                BinaryOp::BitOr => x | y,
                BinaryOp::BitXor => x ^ y,
                _ => return Err(not_integral()),
            })),
            (Num::Long(x), Num::Long(y)) => Ok(Value::Long(match op {
                BinaryOp::Add => x.wrapping_add(y),
                BinaryOp::Sub => x.wrapping_sub(y),
                BinaryOp::Mul => x.wrapping_mul(y),
                BinaryOp::Div if y == 0 => return Err(by_zero()),
                BinaryOp::Div => x.wrapping_div(y),
                BinaryOp::Rem if y == 0 => return Err(by_zero()),
                BinaryOp::Rem => x.wrapping_rem(y),
                BinaryOp::BitAnd => x & y,
                BinaryOp::BitOr => x | y,
                BinaryOp::BitXor => x ^ y,
                _ => return Err(not_integral()),
            })),
            (x, y) => {
                let (x, y) = (x.as_double(), y.as_double());
                Ok(Value::Double(match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::Rem => x % y,
                    _ => return Err(not_integral()),
                }))
            }
        }
    }

    fn cast(&self, ty: &TypeRef, value: Value) -> Exec<Value> {
        if ty.is_numeric() {
            return match Num::of(&value) {
                Some(n) => Ok(cast_num(ty, n)),
                None => Err(self.type_error(&value, &ty.to_string())),
            };
        }
        let fits = match (ty, &value) {
            (_, Value::Null) => !ty.is_primitive(),
            (TypeRef::Boolean, Value::Bool(_)) => true,
            (TypeRef::Named(name), _) if name == "Object" => true,
            (TypeRef::Named(name), Value::Str(_)) => name == "String",
            (TypeRef::Named(name), Value::Object(o)) => *name == o.class,
            (TypeRef::Named(name), Value::Throwable(t)) => library::is_subclass(&t.class, name),
            (TypeRef::Array(_), Value::Array(_)) => true,
            _ => false,
        };
        if fits {
            Ok(value)
        } else {
            Err(self.throw(
                "ClassCastException",
                format!("class {} cannot be cast to class {ty}", value.type_name()),
            ))
        }
    }

    // === Calls ===

    fn call(&mut self, ctx: &mut Ctx<'p>, target: Option<&'p Expr>, name: &'p str, args: &'p [Expr]) -> Exec<Value> {
        let Some(target) = target else {
            let class = ctx.class;
            let argv = self.eval_args(ctx, args)?;
            let Some(method) = class.decl.method(name, argv.len()) else {
                return Err(self.throw("NoSuchMethodError", format!("{}.{name}", class.decl.name)));
            };
            let this = if method.modifiers.is_static {
                None
            } else {
                match &ctx.this {
                    Some(this) => Some(Rc::clone(this)),
                    None => {
                        return Err(self.throw(
                            "NoSuchMethodError",
                            format!("non-static method {name} called from a static context"),
                        ));
                    }
                }
            };
            return self.call_method(class, method, this, argv);
        };

        if let Some(class) = self.class_ref(ctx, target) {
            let argv = self.eval_args(ctx, args)?;
            return match class {
                ClassRef::User(class) => match class.decl.method(name, argv.len()) {
                    Some(method) if method.modifiers.is_static => {
                        self.ensure_init(class)?;
                        self.call_method(class, method, None, argv)
                    }
                    _ => Err(self.throw("NoSuchMethodError", format!("{}.{name}", class.decl.name))),
                },
                ClassRef::Builtin(class) => self.call_static(class, name, argv),
            };
        }

        let receiver = self.eval(ctx, target)?;
        let argv = self.eval_args(ctx, args)?;
        match receiver {
            Value::Null => Err(self.npe(&format!("invoke \"{name}()\""))),
            Value::Str(s) => self.string_method(&s, name, argv),
            Value::Stream(channel) => self.print_method(channel, name, argv),
            Value::Throwable(t) => self.throwable_method(&t, name, argv),
            Value::Object(object) => {
                let user = self
                    .program
                    .class(&object.class)
                    .and_then(|class| class.decl.method(name, argv.len()).map(|m| (class, m)));
                match user {
                    Some((class, method)) => {
                        let this = (!method.modifiers.is_static).then(|| Rc::clone(&object));
                        self.call_method(class, method, this, argv)
                    }
                    None => self.object_method(&Value::Object(object), name, argv),
                }
            }
            other @ Value::Array(_) => self.object_method(&other, name, argv),
            other => Err(self.throw(
                "NoSuchMethodError",
                format!("{}.{name}", other.type_name()),
            )),
        }
    }

    /// `String.valueOf` semantics, honouring user `toString()`
    pub(super) fn stringify(&mut self, value: &Value) -> Exec<String> {
        Ok(match value {
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Char(c) => c.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Double(v) => super::value::format_double(*v),
            Value::Str(s) => s.to_string(),
            Value::Throwable(t) => t.summary(),
            Value::Stream(_) => format!("PrintStream@{:x}", value.identity()),
            Value::Array(array) => format!("[{}@{:x}", descriptor(&array.elem), value.identity()),
            Value::Object(object) => {
                let user = self
                    .program
                    .class(&object.class)
                    .and_then(|class| {
                        class
                            .decl
                            .method("toString", 0)
                            .filter(|m| !m.modifiers.is_static)
                            .map(|m| (class, m))
                    });
                match user {
                    Some((class, method)) => {
                        let text = self.call_method(class, method, Some(Rc::clone(object)), Vec::new())?;
                        if text.is_null() { "null".into() } else { self.stringify(&text)? }
                    }
                    None => format!("{}@{:x}", object.class, value.identity()),
                }
            }
        })
    }
}

fn descriptor(ty: &TypeRef) -> String {
    match ty {
        TypeRef::Int => "I".into(),
        TypeRef::Long => "J".into(),
        TypeRef::Double => "D".into(),
        TypeRef::Boolean => "Z".into(),
        TypeRef::Char => "C".into(),
        TypeRef::Array(inner) => format!("[{}", descriptor(inner)),
        other => format!("L{other};"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::{CaptureBuffer, ConsoleRedirect, OUTPUT_LOCK};
    use crate::compiler::{resolve, Backend, NativeBackend};
    use crate::config::RunConfig;
    use crate::source::SourceUnit;
    use std::sync::Arc;

    /// Run `main` of `Question` on a large stack and return its output
    pub(crate) fn run_in(text: &str, permissions: PermissionSet) -> (Completion, String) {
        let program = NativeBackend
            .compile(&[SourceUnit::new("Question.java", text)])
            .unwrap_or_else(|d| panic!("{}", d.render()));
        let entry = resolve(&program, &RunConfig::default()).unwrap();
        let _serial = OUTPUT_LOCK.lock();
        let buffer = Arc::new(CaptureBuffer::new(1 << 20));
        let _redirect = ConsoleRedirect::install(Arc::clone(&buffer));
        let completion = std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(move || {
                let limits = Limits {
                    max_call_depth: 256,
                    max_array_length: 1 << 16,
                };
                Interpreter::new(&program, &permissions, KillSwitch::new(), limits).run(&entry)
            })
            .unwrap()
            .join()
            .unwrap();
        (completion, buffer.contents())
    }

    fn run(body: &str) -> (Completion, String) {
        let text = format!("public class Question {{\n    public static void main(String[] args) {{\n{body}\n    }}\n}}\n");
        run_in(&text, PermissionSet::minimal())
    }

    fn output_of(body: &str) -> String {
        let (completion, output) = run(body);
        assert_eq!(completion, Completion::Returned, "output so far: {output}");
        output
    }

    fn thrown(body: &str) -> Throwable {
        match run(body).0 {
            Completion::Threw(t) => t.unwrap_invocation(),
            other => panic!("expected a throwable, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic_follows_java() {
        assert_eq!(output_of("System.out.println(7 / 2 + \" \" + 7 % 3 + \" \" + 7.0 / 2);"), "3 1 3.5\n");
        assert_eq!(output_of("int x = Integer.MAX_VALUE; x++; System.out.println(x);"), "-2147483648\n");
        assert_eq!(output_of("System.out.println(3000000000L * 2);"), "6000000000\n");
    }

    #[test]
    fn strings_and_chars() {
        assert_eq!(
            output_of("String s = \"Hello\"; char c = s.charAt(1); c++; System.out.println(s.length() + \":\" + c + s.substring(3).toUpperCase());"),
            "5:fLO\n"
        );
        assert_eq!(output_of("System.out.println(1 + 2 + \"x\" + 1 + 2);"), "3x12\n");
    }

    #[test]
    fn objects_and_static_state() {
        let text = "
class Counter {
    static int created = 0;
    int value;
    Counter(int start) { value = start; created++; }
    void add(int n) { value += n; }
    public String toString() { return \"Counter(\" + value + \")\"; }
}
public class Question {
    public static void main(String[] args) {
        Counter a = new Counter(1);
        Counter b = new Counter(10);
        a.add(4);
        System.out.println(a + \" \" + b + \" \" + Counter.created);
    }
}
";
        let (completion, output) = run_in(text, PermissionSet::minimal());
        assert_eq!(completion, Completion::Returned);
        assert_eq!(output, "Counter(5) Counter(10) 2\n");
    }

    #[test]
    fn division_by_zero_is_thrown_with_a_trace() {
        let t = thrown("int zero = 0;\nSystem.out.println(1 / zero);");
        assert_eq!(t.summary(), "ArithmeticException: / by zero");
        assert_eq!(t.trace[0].to_string(), "Question.main(Question.java:4)");
    }

    #[test]
    fn exceptions_are_caught_and_finally_runs() {
        assert_eq!(
            output_of("try { int[] a = new int[2]; a[2] = 1; } catch (ArrayIndexOutOfBoundsException e) { System.out.println(e.getMessage()); } finally { System.out.println(\"done\"); }"),
            "Index 2 out of bounds for length 2\ndone\n"
        );
        assert_eq!(
            output_of("try { throw new IllegalStateException(\"inner\"); } catch (RuntimeException e) { System.out.println(e); }"),
            "IllegalStateException: inner\n"
        );
    }

    #[test]
    fn uncaught_exceptions_keep_their_cause() {
        let t = thrown("throw new RuntimeException(\"outer\", new IllegalArgumentException(\"root\"));");
        assert_eq!(t.summary(), "RuntimeException: outer");
        assert_eq!(t.cause.as_deref().map(Throwable::summary).as_deref(), Some("IllegalArgumentException: root"));
    }

    #[test]
    fn null_dereference() {
        assert_eq!(thrown("String s = null; s.length();").class, "NullPointerException");
    }

    #[test]
    fn deep_recursion_overflows() {
        let text = "public class Question { static int down(int n) { return down(n + 1); } public static void main(String[] a) { down(0); } }";
        match run_in(text, PermissionSet::minimal()).0 {
            Completion::Threw(t) => assert_eq!(t.unwrap_invocation().class, "StackOverflowError"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn exit_requires_process_control() {
        let text = "public class Question { public static void main(String[] a) { System.out.println(\"before\"); System.exit(3); System.out.println(\"after\"); } }";
        let (completion, _) = run_in(text, PermissionSet::minimal());
        assert_matches::assert_matches!(completion, Completion::Threw(t) if t.clone().unwrap_invocation().class == "SecurityException");

        let granted = PermissionSet::builder().grant(Capability::ProcessControl).build();
        let (completion, output) = run_in(text, granted);
        assert_eq!(completion, Completion::Exited(3));
        assert_eq!(output, "before\n");
    }

    #[test]
    fn invoker_needs_its_grant() {
        let hidden = "public class Question { static void main(String[] a) { } }";
        let without = PermissionSet::builder().revoke(Capability::SuppressAccessChecks).build();
        match run_in(hidden, without).0 {
            Completion::Threw(t) => assert_eq!(t.class, "IllegalAccessException"),
            other => panic!("{other:?}"),
        }
        assert_eq!(run_in(hidden, PermissionSet::minimal()).0, Completion::Returned);
        match run_in(hidden, PermissionSet::none()).0 {
            Completion::Threw(t) => assert_eq!(t.class, "SecurityException"),
            other => panic!("{other:?}"),
        }
    }
}
