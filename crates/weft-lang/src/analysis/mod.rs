//! Constancy and watch-set marking over the parsed AST.
//!
//! A single post-order pass decides, per node, whether the subtree can ever
//! change, and which sub-expressions a dirty checker would have to observe
//! to know. The program-level summary drives watch-delegate selection.

use crate::filters::FilterRegistry;
use crate::syntax::ast::{Expr, ExprKind, Program};

/// Program-level classification produced by [`annotate`].
pub struct ProgramInfo {
    /// True when no statement of the program can ever change.
    pub constant: bool,
    /// True when the body is empty or a single literal/array/object.
    pub literal: bool,
    /// Present when the program can be dirty-checked through cheaper
    /// sub-expressions: a one-statement program whose watch set is non-empty
    /// and is not just the statement itself.
    pub inputs: Option<Vec<Expr>>,
}

/// Mark every node and summarise the program.
pub fn annotate(program: &mut Program, filters: &FilterRegistry) -> ProgramInfo {
    let mut constant = true;
    let mut last_watch: Vec<Expr> = Vec::new();

    for expr in &mut program.body {
        last_watch = mark(expr, filters);
        constant = constant && expr.constant;
    }

    let literal = match program.body.as_slice() {
        [] => true,
        [only] => matches!(
            only.kind,
            ExprKind::Literal(_) | ExprKind::Array(_) | ExprKind::Object(_)
        ),
        _ => false,
    };

    let inputs = match program.body.as_slice() {
        [only]
            if !last_watch.is_empty()
                && !(last_watch.len() == 1 && last_watch[0] == *only) =>
        {
            Some(last_watch)
        }
        _ => None,
    };

    ProgramInfo { constant, literal, inputs }
}

/// Post-order walk. Sets `constant` in place and returns the node's watch
/// set — the sub-expressions whose values determine whether it changed.
fn mark(expr: &mut Expr, filters: &FilterRegistry) -> Vec<Expr> {
    let (constant, watch) = match &mut expr.kind {
        ExprKind::Literal(_) => (true, Vec::new()),
        ExprKind::This | ExprKind::Locals => (false, Vec::new()),
        ExprKind::Identifier(_) => (false, Vec::new()), // watches itself, below

        ExprKind::Array(elements) => {
            let mut constant = true;
            let mut watch = Vec::new();
            for el in elements {
                let w = mark(el, filters);
                constant = constant && el.constant;
                if !el.constant {
                    watch.extend(w);
                }
            }
            (constant, watch)
        }

        ExprKind::Object(properties) => {
            let mut constant = true;
            let mut watch = Vec::new();
            for prop in properties {
                let w = mark(&mut prop.value, filters);
                constant = constant && prop.value.constant;
                if !prop.value.constant {
                    watch.extend(w);
                }
            }
            (constant, watch)
        }

        ExprKind::Member { object, property, computed } => {
            let _ = mark(object, filters);
            let prop_constant = if *computed {
                let _ = mark(property, filters);
                property.constant
            } else {
                true
            };
            (object.constant && prop_constant, Vec::new()) // watches itself
        }

        ExprKind::Call { callee, args, filter } => {
            if *filter {
                let name = match &callee.kind {
                    ExprKind::Identifier(name) => name.clone(),
                    _ => String::new(),
                };
                let stateful = filters.is_stateful(&name);
                let mut constant = !stateful;
                let mut watch = Vec::new();
                for arg in args {
                    let w = mark(arg, filters);
                    constant = constant && arg.constant;
                    watch.extend(w);
                }
                if stateful {
                    (false, Vec::new()) // watches itself
                } else {
                    (constant, watch)
                }
            } else {
                let _ = mark(callee, filters);
                for arg in args {
                    let _ = mark(arg, filters);
                }
                (false, Vec::new()) // watches itself
            }
        }

        ExprKind::Assignment { left, right } => {
            let _ = mark(left, filters);
            let _ = mark(right, filters);
            (left.constant && right.constant, Vec::new()) // watches itself
        }

        ExprKind::Unary { operand, .. } => {
            let w = mark(operand, filters);
            (operand.constant, w)
        }

        ExprKind::Binary { left, right, .. } => {
            let mut watch = mark(left, filters);
            watch.extend(mark(right, filters));
            (left.constant && right.constant, watch)
        }

        ExprKind::Logical { left, right, .. } => {
            let _ = mark(left, filters);
            let _ = mark(right, filters);
            (left.constant && right.constant, Vec::new()) // watches itself
        }

        ExprKind::Conditional { test, consequent, alternate } => {
            let _ = mark(test, filters);
            let _ = mark(consequent, filters);
            let _ = mark(alternate, filters);
            (
                test.constant && consequent.constant && alternate.constant,
                Vec::new(), // watches itself
            )
        }
    };

    expr.constant = constant;

    // self-watching nodes report their (now fully marked) selves
    let watches_self = matches!(
        expr.kind,
        ExprKind::Identifier(_)
            | ExprKind::Member { .. }
            | ExprKind::Assignment { .. }
            | ExprKind::Logical { .. }
            | ExprKind::Conditional { .. }
    ) || matches!(&expr.kind, ExprKind::Call { filter, .. } if !filter)
        || is_stateful_filter_call(expr, filters);

    if watches_self {
        vec![expr.clone()]
    } else {
        watch
    }
}

fn is_stateful_filter_call(expr: &Expr, filters: &FilterRegistry) -> bool {
    match &expr.kind {
        ExprKind::Call { callee, filter: true, .. } => match &callee.kind {
            ExprKind::Identifier(name) => filters.is_stateful(name),
            _ => false,
        },
        _ => false,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
