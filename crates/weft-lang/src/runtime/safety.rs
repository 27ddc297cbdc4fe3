//! Centralised sandbox rules. The lexer and parser know nothing about
//! forbidden names; every prohibition is decided here and nowhere else.

use crate::error::{Error, ErrorCode, EvalError};
use crate::runtime::value::Value;
use crate::syntax::ast::{Expr, ExprKind};

/// Member names that may never be read or written through an expression.
const DISALLOWED_FIELDS: &[&str] = &[
    "constructor",
    "__proto__",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

/// Builtins on callables that may never be reached through an expression.
const DISALLOWED_FN_MEMBERS: &[&str] = &["call", "apply", "bind"];

/// Reject a member name before it is used for a read or a write.
pub fn check_member_name(name: &str, expr: &str) -> Result<(), EvalError> {
    if DISALLOWED_FIELDS.contains(&name) {
        return Err(EvalError::disallowed_field(name, expr));
    }
    Ok(())
}

/// Reject guarded host handles wherever they surface: as a receiver, an
/// argument, or a return value.
pub fn check_object(value: &Value, expr: &str) -> Result<(), EvalError> {
    if let Value::Opaque(o) = value {
        if o.guarded {
            return Err(EvalError::disallowed_object(
                &format!("guarded host object ({})", o.type_name),
                expr,
            ));
        }
    }
    Ok(())
}

/// Reject member access that would reach `call`/`apply`/`bind` on a callable.
pub fn check_function_member(object: &Value, name: &str, expr: &str) -> Result<(), EvalError> {
    if matches!(object, Value::Function(_)) && DISALLOWED_FN_MEMBERS.contains(&name) {
        return Err(EvalError::disallowed_object(
            &format!("function builtin (`{name}`)"),
            expr,
        ));
    }
    Ok(())
}

/// Compile-time sweep: statically-named member accesses are rejected before
/// an evaluator is ever produced. Computed names can only be checked when
/// they are evaluated.
pub(crate) fn scan_program(program: &crate::syntax::ast::Program) -> Vec<Error> {
    let mut errors = Vec::new();
    for expr in &program.body {
        scan_expr(expr, &mut errors);
    }
    errors
}

fn scan_expr(expr: &Expr, errors: &mut Vec<Error>) {
    if let ExprKind::Member { property, computed: false, .. } = &expr.kind {
        if let ExprKind::Identifier(name) = &property.kind {
            if DISALLOWED_FIELDS.contains(&name.as_str()) {
                errors.push(Error::new(
                    ErrorCode::S001,
                    property.span.line,
                    property.span.column,
                    format!("attempting to access a disallowed field `{name}`"),
                ));
            }
        }
    }

    match &expr.kind {
        ExprKind::Array(elements) => {
            for el in elements {
                scan_expr(el, errors);
            }
        }
        ExprKind::Object(properties) => {
            for prop in properties {
                scan_expr(&prop.value, errors);
            }
        }
        ExprKind::Member { object, property, computed } => {
            scan_expr(object, errors);
            if *computed {
                scan_expr(property, errors);
            }
        }
        ExprKind::Call { callee, args, .. } => {
            scan_expr(callee, errors);
            for arg in args {
                scan_expr(arg, errors);
            }
        }
        ExprKind::Assignment { left, right } => {
            scan_expr(left, errors);
            scan_expr(right, errors);
        }
        ExprKind::Unary { operand, .. } => scan_expr(operand, errors),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            scan_expr(left, errors);
            scan_expr(right, errors);
        }
        ExprKind::Conditional { test, consequent, alternate } => {
            scan_expr(test, errors);
            scan_expr(consequent, errors);
            scan_expr(alternate, errors);
        }
        ExprKind::Literal(_)
        | ExprKind::Identifier(_)
        | ExprKind::This
        | ExprKind::Locals => {}
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
