//! Expression compilation: turns an analysed AST into a reusable evaluator.
//!
//! No code generation — every operator dispatches directly over the tree
//! (the value model makes all operations cheap dynamic dispatch). The
//! compiled handle carries the metadata the scope layer needs to pick a
//! watch strategy.

use std::cell::RefCell;
use std::rc::Rc;

use crate::analysis;
use crate::error::{Error, EvalError};
use crate::filters::FilterRegistry;
use crate::runtime::safety;
use crate::runtime::value::{
    self, as_index, loose_eq, strict_eq, Value,
};
use crate::scope::Scope;
use crate::syntax::ast::{BinOp, Expr, ExprKind, Lit, LogicalOp, Program, UnOp};
use crate::syntax::lexer::Lexer;
use crate::syntax::parser::Parser;

/// How a scope should watch this expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Plain dirty-check of the full expression.
    Normal,
    /// The value can never change: fire once, then drop the watcher.
    Constant,
    /// `::expr`: deregister once the value settles to something defined.
    OneTime,
    /// `::` on a literal: settle once every element/property is defined.
    OneTimeLiteral,
    /// Dirty-check the inputs first; re-evaluate only when one changed.
    Inputs,
}

struct Compiled {
    source: String,
    program: Program,
    constant: bool,
    literal: bool,
    inputs: Option<Vec<CompiledExpr>>,
    filters: Rc<RefCell<FilterRegistry>>,
}

/// A parsed, analysed, callable expression. Cloning shares the compilation.
#[derive(Clone)]
pub struct CompiledExpr {
    inner: Rc<Compiled>,
}

impl CompiledExpr {
    /// Compile `source` against `filters`. A leading `::` marks the
    /// expression one-time.
    pub fn compile(
        source: &str,
        filters: Rc<RefCell<FilterRegistry>>,
    ) -> Result<CompiledExpr, Vec<Error>> {
        let trimmed = source.trim_start();
        let (one_time, body_src) = match trimmed.strip_prefix("::") {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let tokens = Lexer::new(body_src).tokenize()?;
        let mut program = Parser::new(tokens).parse().map_err(|e| vec![e])?;
        program.one_time = one_time;

        let safety_errors = safety::scan_program(&program);
        if !safety_errors.is_empty() {
            return Err(safety_errors);
        }

        let info = analysis::annotate(&mut program, &filters.borrow());
        let inputs = info.inputs.map(|nodes| {
            nodes
                .into_iter()
                .map(|node| CompiledExpr {
                    inner: Rc::new(Compiled {
                        source: source.to_string(),
                        program: Program { body: vec![node], one_time: false },
                        constant: false,
                        literal: false,
                        inputs: None,
                        filters: filters.clone(),
                    }),
                })
                .collect()
        });

        Ok(CompiledExpr {
            inner: Rc::new(Compiled {
                source: source.to_string(),
                program,
                constant: info.constant,
                literal: info.literal,
                inputs,
                filters,
            }),
        })
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn constant(&self) -> bool {
        self.inner.constant
    }

    pub fn literal(&self) -> bool {
        self.inner.literal
    }

    pub fn one_time(&self) -> bool {
        self.inner.program.one_time
    }

    pub fn inputs(&self) -> Option<&[CompiledExpr]> {
        self.inner.inputs.as_deref()
    }

    pub fn watch_mode(&self) -> WatchMode {
        if self.inner.constant {
            WatchMode::Constant
        } else if self.one_time() {
            if self.inner.literal { WatchMode::OneTimeLiteral } else { WatchMode::OneTime }
        } else if self.inner.inputs.is_some() {
            WatchMode::Inputs
        } else {
            WatchMode::Normal
        }
    }

    pub fn eval(&self, scope: &Scope) -> Result<Value, EvalError> {
        self.eval_in(scope, None)
    }

    pub fn eval_with(&self, scope: &Scope, locals: &Value) -> Result<Value, EvalError> {
        self.eval_in(scope, Some(locals))
    }

    fn eval_in(&self, scope: &Scope, locals: Option<&Value>) -> Result<Value, EvalError> {
        let ctx = EvalCtx { scope, locals, filters: &self.inner.filters, source: &self.inner.source };
        let mut result = Value::Undefined;
        for stmt in &self.inner.program.body {
            result = eval_expr(stmt, &ctx)?;
        }
        Ok(result)
    }

    /// Store `value` into the location this expression names. Only a
    /// single-statement Identifier or Member program is assignable;
    /// intermediate objects are created along the path.
    pub fn assign(&self, scope: &Scope, value: Value) -> Result<Value, EvalError> {
        self.assign_with(scope, value, None)
    }

    pub fn assign_with(
        &self,
        scope: &Scope,
        value: Value,
        locals: Option<&Value>,
    ) -> Result<Value, EvalError> {
        let target = match self.inner.program.body.as_slice() {
            [only] if matches!(only.kind, ExprKind::Identifier(_) | ExprKind::Member { .. }) => only,
            _ => return Err(EvalError::non_assignable(&self.inner.source)),
        };
        let ctx = EvalCtx { scope, locals, filters: &self.inner.filters, source: &self.inner.source };
        store(target, value.clone(), &ctx)?;
        Ok(value)
    }

    /// Whether [`CompiledExpr::assign`] can succeed.
    pub fn assignable(&self) -> bool {
        matches!(
            self.inner.program.body.as_slice(),
            [only] if matches!(only.kind, ExprKind::Identifier(_) | ExprKind::Member { .. })
        )
    }
}

impl std::fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpr")
            .field("source", &self.inner.source)
            .field("constant", &self.inner.constant)
            .field("literal", &self.inner.literal)
            .finish()
    }
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

struct EvalCtx<'a> {
    scope: &'a Scope,
    locals: Option<&'a Value>,
    filters: &'a Rc<RefCell<FilterRegistry>>,
    source: &'a str,
}

impl EvalCtx<'_> {
    fn locals_object(&self) -> Option<value::Object> {
        match self.locals {
            Some(Value::Object(map)) => Some(map.clone()),
            _ => None,
        }
    }
}

fn eval_expr(expr: &Expr, ctx: &EvalCtx<'_>) -> Result<Value, EvalError> {
    match &expr.kind {
        ExprKind::Literal(lit) => Ok(literal_value(lit)),
        ExprKind::This => Ok(Value::Object(ctx.scope.data_object())),
        ExprKind::Locals => Ok(ctx.locals.cloned().unwrap_or(Value::Undefined)),

        ExprKind::Identifier(name) => Ok(read_identifier(name, ctx)),

        ExprKind::Array(elements) => {
            let mut items = Vec::with_capacity(elements.len());
            for el in elements {
                items.push(eval_expr(el, ctx)?);
            }
            Ok(Value::array(items))
        }

        ExprKind::Object(properties) => {
            let mut map = indexmap::IndexMap::new();
            for prop in properties {
                map.insert(prop.key.as_name(), eval_expr(&prop.value, ctx)?);
            }
            Ok(Value::Object(Rc::new(RefCell::new(map))))
        }

        ExprKind::Member { object, property, computed } => {
            let obj = eval_expr(object, ctx)?;
            safety::check_object(&obj, ctx.source)?;
            let name = member_name(property, *computed, ctx)?;
            // reads rooted at the context walk the scope chain like a bare
            // identifier would (without the locals overlay)
            if matches!(object.kind, ExprKind::This) {
                return Ok(ctx.scope.get(&name));
            }
            read_member(&obj, &name, ctx)
        }

        ExprKind::Call { callee, args, filter } => {
            if *filter {
                eval_filter_call(callee, args, ctx)
            } else {
                eval_call(callee, args, ctx)
            }
        }

        ExprKind::Assignment { left, right } => {
            let value = eval_expr(right, ctx)?;
            store(left, value.clone(), ctx)?;
            Ok(value)
        }

        ExprKind::Unary { op, operand } => {
            let v = eval_expr(operand, ctx)?;
            Ok(match op {
                UnOp::Not => Value::Bool(!v.is_truthy()),
                UnOp::Plus => Value::Number(defined_or_zero(&v)),
                UnOp::Minus => Value::Number(0.0 - defined_or_zero(&v)),
            })
        }

        ExprKind::Binary { op, left, right } => {
            let l = eval_expr(left, ctx)?;
            let r = eval_expr(right, ctx)?;
            Ok(eval_binary(*op, &l, &r))
        }

        ExprKind::Logical { op, left, right } => {
            let l = eval_expr(left, ctx)?;
            match op {
                LogicalOp::And => {
                    if l.is_truthy() { eval_expr(right, ctx) } else { Ok(l) }
                }
                LogicalOp::Or => {
                    if l.is_truthy() { Ok(l) } else { eval_expr(right, ctx) }
                }
            }
        }

        ExprKind::Conditional { test, consequent, alternate } => {
            if eval_expr(test, ctx)?.is_truthy() {
                eval_expr(consequent, ctx)
            } else {
                eval_expr(alternate, ctx)
            }
        }
    }
}

fn literal_value(lit: &Lit) -> Value {
    match lit {
        Lit::Null => Value::Null,
        Lit::Bool(b) => Value::Bool(*b),
        Lit::Number(n) => Value::Number(*n),
        Lit::Str(s) => Value::string(s),
    }
}

/// Identifier read: locals overlay first, then the scope chain. Reads never
/// create.
fn read_identifier(name: &str, ctx: &EvalCtx<'_>) -> Value {
    if let Some(locals) = ctx.locals_object() {
        if let Some(v) = locals.borrow().get(name) {
            return v.clone();
        }
    }
    ctx.scope.lookup(name).unwrap_or(Value::Undefined)
}

/// The property name of a member access. Computed names are evaluated and
/// gate-checked at evaluation time; static names were checked at compile
/// time but re-checking here keeps the gate the single authority.
fn member_name(property: &Expr, computed: bool, ctx: &EvalCtx<'_>) -> Result<String, EvalError> {
    let name = if computed {
        eval_expr(property, ctx)?.to_display()
    } else {
        match &property.kind {
            ExprKind::Identifier(name) => name.clone(),
            _ => return Err(EvalError::msg("malformed member access")),
        }
    };
    safety::check_member_name(&name, ctx.source)?;
    Ok(name)
}

fn read_member(obj: &Value, name: &str, ctx: &EvalCtx<'_>) -> Result<Value, EvalError> {
    safety::check_function_member(obj, name, ctx.source)?;
    Ok(match obj {
        Value::Object(map) => map.borrow().get(name).cloned().unwrap_or(Value::Undefined),
        Value::Array(items) => {
            if name == "length" {
                Value::Number(items.borrow().len() as f64)
            } else if let Some(idx) = name.parse::<f64>().ok().and_then(as_index) {
                items.borrow().get(idx).cloned().unwrap_or(Value::Undefined)
            } else {
                Value::Undefined
            }
        }
        Value::String(s) => {
            if name == "length" {
                Value::Number(s.chars().count() as f64)
            } else {
                Value::Undefined
            }
        }
        // reads fall through to undefined rather than faulting; writes and
        // calls are where missing values surface
        _ => Value::Undefined,
    })
}

fn eval_call(callee: &Expr, args: &[Expr], ctx: &EvalCtx<'_>) -> Result<Value, EvalError> {
    let (receiver, func, described) = match &callee.kind {
        ExprKind::Member { object, property, computed } => {
            let obj = eval_expr(object, ctx)?;
            safety::check_object(&obj, ctx.source)?;
            let name = member_name(property, *computed, ctx)?;
            let f = read_member(&obj, &name, ctx)?;
            (obj, f, name)
        }
        ExprKind::Identifier(name) => {
            (Value::Undefined, read_identifier(name, ctx), name.clone())
        }
        _ => (Value::Undefined, eval_expr(callee, ctx)?, "<expression>".to_string()),
    };

    let Value::Function(func) = func else {
        return Err(EvalError::not_a_function(&described));
    };

    let mut arg_values = Vec::with_capacity(args.len());
    for arg in args {
        let v = eval_expr(arg, ctx)?;
        safety::check_object(&v, ctx.source)?;
        arg_values.push(v);
    }

    let result = func.call(&receiver, &arg_values)?;
    safety::check_object(&result, ctx.source)?;
    Ok(result)
}

fn eval_filter_call(callee: &Expr, args: &[Expr], ctx: &EvalCtx<'_>) -> Result<Value, EvalError> {
    let name = match &callee.kind {
        ExprKind::Identifier(name) => name.clone(),
        _ => return Err(EvalError::msg("malformed filter application")),
    };
    let func = ctx
        .filters
        .borrow()
        .get(&name)
        .ok_or_else(|| EvalError::unknown_filter(&name))?;

    let mut arg_values = Vec::with_capacity(args.len());
    for arg in args {
        arg_values.push(eval_expr(arg, ctx)?);
    }
    let result = (func.as_ref())(&arg_values)?;
    safety::check_object(&result, ctx.source)?;
    Ok(result)
}

fn defined_or_zero(v: &Value) -> f64 {
    if v.is_defined() { v.to_number() } else { 0.0 }
}

fn eval_binary(op: BinOp, l: &Value, r: &Value) -> Value {
    match op {
        // a missing side of `+` contributes nothing rather than poisoning
        // the result; string concatenation wins over addition
        BinOp::Add => {
            if !l.is_defined() {
                return r.clone();
            }
            if !r.is_defined() {
                return l.clone();
            }
            if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
                Value::string(format!("{}{}", l.to_display(), r.to_display()))
            } else {
                Value::Number(l.to_number() + r.to_number())
            }
        }
        BinOp::Sub => Value::Number(defined_or_zero(l) - defined_or_zero(r)),
        BinOp::Mul => Value::Number(l.to_number() * r.to_number()),
        BinOp::Div => Value::Number(l.to_number() / r.to_number()),
        BinOp::Mod => Value::Number(l.to_number() % r.to_number()),

        BinOp::Eq => Value::Bool(loose_eq(l, r)),
        BinOp::NotEq => Value::Bool(!loose_eq(l, r)),
        BinOp::StrictEq => Value::Bool(strict_eq(l, r)),
        BinOp::StrictNotEq => Value::Bool(!strict_eq(l, r)),

        BinOp::Lt => compare(l, r, |o| o == std::cmp::Ordering::Less),
        BinOp::Gt => compare(l, r, |o| o == std::cmp::Ordering::Greater),
        BinOp::LtEq => compare(l, r, |o| o != std::cmp::Ordering::Greater),
        BinOp::GtEq => compare(l, r, |o| o != std::cmp::Ordering::Less),
    }
}

fn compare(l: &Value, r: &Value, keep: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    if let (Value::String(a), Value::String(b)) = (l, r) {
        return Value::Bool(keep(a.cmp(b)));
    }
    let (a, b) = (l.to_number(), r.to_number());
    match a.partial_cmp(&b) {
        Some(ordering) => Value::Bool(keep(ordering)),
        None => Value::Bool(false), // NaN never orders
    }
}

// ─── Assignment ──────────────────────────────────────────────────────────────

/// Write `value` into the location `target` names. Identifier writes land on
/// the nearest context that already owns the name (locals overlay included),
/// else the current scope. Member writes create missing intermediate
/// objects.
fn store(target: &Expr, value: Value, ctx: &EvalCtx<'_>) -> Result<(), EvalError> {
    match &target.kind {
        ExprKind::Identifier(name) => {
            safety::check_member_name(name, ctx.source)?;
            if let Some(locals) = ctx.locals_object() {
                if locals.borrow().contains_key(name.as_str()) {
                    locals.borrow_mut().insert(name.clone(), value);
                    return Ok(());
                }
            }
            let owner = ctx.scope.find_owner(name).unwrap_or_else(|| ctx.scope.clone());
            owner.set(name, value);
            Ok(())
        }

        ExprKind::Member { object, property, computed } => {
            let obj = eval_for_create(object, ctx)?;
            let name = member_name(property, *computed, ctx)?;
            write_member(&obj, &name, value)
        }

        _ => Err(EvalError::non_assignable(ctx.source)),
    }
}

/// Evaluate the object part of an lvalue path, materialising missing
/// intermediate objects on the context that owns the path root.
fn eval_for_create(expr: &Expr, ctx: &EvalCtx<'_>) -> Result<Value, EvalError> {
    match &expr.kind {
        ExprKind::Identifier(name) => {
            let existing = read_identifier(name, ctx);
            if existing.is_defined() {
                return Ok(existing);
            }
            let fresh = Value::empty_object();
            store(expr, fresh.clone(), ctx)?;
            Ok(fresh)
        }
        ExprKind::Member { object, property, computed } => {
            let obj = eval_for_create(object, ctx)?;
            let name = member_name(property, *computed, ctx)?;
            let existing = read_member(&obj, &name, ctx)?;
            if existing.is_defined() {
                return Ok(existing);
            }
            let fresh = Value::empty_object();
            write_member(&obj, &name, fresh.clone())?;
            Ok(fresh)
        }
        _ => eval_expr(expr, ctx),
    }
}

fn write_member(obj: &Value, name: &str, value: Value) -> Result<(), EvalError> {
    match obj {
        Value::Object(map) => {
            map.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            if let Some(idx) = name.parse::<f64>().ok().and_then(as_index) {
                let mut items = items.borrow_mut();
                if idx >= items.len() {
                    items.resize(idx + 1, Value::Undefined);
                }
                items[idx] = value;
                Ok(())
            } else {
                // non-index writes on sequences are dropped silently
                Ok(())
            }
        }
        other => Err(EvalError::msg(format!(
            "cannot assign a property on {}",
            other.type_name()
        ))),
    }
}
