//! End-to-end expression behaviour.
//!
//! Tests the full pipeline: lex → parse → analyse → evaluate against a
//! scope, including filters, assignment, sandboxing, and the compile-time
//! metadata the scope layer keys off.

use weft_lang::{Scope, Value, WatchMode, WeftError};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn root() -> Scope {
    Scope::root()
}

fn eval(src: &str) -> Value {
    root().eval(src).unwrap_or_else(|e| panic!("eval `{src}` failed: {e}"))
}

fn eval_on(scope: &Scope, src: &str) -> Value {
    scope.eval(src).unwrap_or_else(|e| panic!("eval `{src}` failed: {e}"))
}

fn num(src: &str) -> f64 {
    match eval(src) {
        Value::Number(n) => n,
        other => panic!("expected number for `{src}`, got {other:?}"),
    }
}

fn num_on(scope: &Scope, src: &str) -> f64 {
    match eval_on(scope, src) {
        Value::Number(n) => n,
        other => panic!("expected number for `{src}`, got {other:?}"),
    }
}

fn boolean(src: &str) -> bool {
    match eval(src) {
        Value::Bool(b) => b,
        other => panic!("expected bool for `{src}`, got {other:?}"),
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.to_string(),
        other => panic!("expected string, got {other:?}"),
    }
}

fn strings(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items.borrow().iter().map(|x| x.to_display()).collect(),
        other => panic!("expected array, got {other:?}"),
    }
}

// ─── Arithmetic and precedence ───────────────────────────────────────────────

#[test]
fn arithmetic_precedence() {
    assert_eq!(num("2 + 3 * 5"), 17.0);
    assert_eq!(num("(2 + 3) * 5"), 25.0);
    assert_eq!(num("10 % 3"), 1.0);
    assert_eq!(num("10 / 4"), 2.5);
    assert_eq!(num("1e3 + .5"), 1000.5);
}

#[test]
fn undefined_in_addition_contributes_nothing() {
    let s = root();
    s.set("a", Value::Number(5.0));
    assert_eq!(num_on(&s, "a + nothing"), 5.0);
    assert_eq!(num_on(&s, "nothing + a"), 5.0);
    assert!(!eval("nothing + nothing_else").is_defined());
}

#[test]
fn undefined_in_subtraction_substitutes_zero() {
    let s = root();
    s.set("a", Value::Number(5.0));
    assert_eq!(num_on(&s, "a - nothing"), 5.0);
    assert_eq!(num_on(&s, "nothing - a"), -5.0);
}

#[test]
fn undefined_in_multiplication_is_nan() {
    let s = root();
    s.set("a", Value::Number(5.0));
    assert!(num_on(&s, "a * nothing").is_nan());
}

#[test]
fn unary_operators() {
    assert_eq!(num("-5"), -5.0);
    assert_eq!(num("- - 5"), 5.0);
    assert_eq!(num("+'3'"), 3.0);
    assert!(boolean("!0"));
    assert!(!boolean("!!0"));
    // minus on a missing value acts on zero
    assert_eq!(num("-nothing"), 0.0);
    assert_eq!(num("-(-nothing)"), 0.0);
}

#[test]
fn string_concatenation() {
    assert_eq!(text(&eval("'a' + 'b'")), "ab");
    assert_eq!(text(&eval("'n=' + 1")), "n=1");
}

#[test]
fn string_relational_is_lexicographic() {
    assert!(boolean("'abc' < 'abd'"));
    assert!(boolean("'b' >= 'a'"));
}

// ─── Equality ────────────────────────────────────────────────────────────────

#[test]
fn loose_and_strict_equality() {
    assert!(boolean("42 == '42'"));
    assert!(!boolean("42 === '42'"));
    assert!(boolean("42 === 42"));
    assert!(boolean("1 != 2"));
    assert!(boolean("1 !== '1'"));
    // a missing value is loosely equal to null
    assert!(boolean("null == nothing"));
    assert!(!boolean("null === nothing"));
}

// ─── Logic ───────────────────────────────────────────────────────────────────

#[test]
fn conditional_expression() {
    let s = root();
    s.set("a", Value::Number(42.0));
    assert_eq!(text(&eval_on(&s, "a === 42 ? 'y' : 'n'")), "y");
    assert_eq!(text(&eval_on(&s, "a === 43 ? 'y' : 'n'")), "n");
}

#[test]
fn logical_operators_return_operands() {
    assert_eq!(num("0 || 7"), 7.0);
    assert_eq!(num("3 && 7"), 7.0);
    assert_eq!(num("0 && 7"), 0.0);
}

#[test]
fn dead_branches_are_never_evaluated() {
    // `boom` is not a function; evaluating it as a call would fault
    assert!(!boolean("false && boom()"));
    assert!(boolean("true || boom()"));
    assert_eq!(num("true ? 1 : boom()"), 1.0);
}

// ─── Literals, members, calls ────────────────────────────────────────────────

#[test]
fn literal_collections() {
    let v = eval("[1, 2, 3]");
    assert_eq!(strings(&v), vec!["1", "2", "3"]);
    let obj = eval("{a: 1, 'b': 2}");
    match obj {
        Value::Object(map) => {
            assert_eq!(map.borrow().len(), 2);
            assert_eq!(map.borrow()["a"].to_display(), "1");
        }
        other => panic!("expected object, got {other:?}"),
    }
}

#[test]
fn member_access() {
    let s = root();
    s.set("user", Value::object([("name".to_string(), Value::string("ada"))]));
    assert_eq!(text(&eval_on(&s, "user.name")), "ada");
    assert_eq!(text(&eval_on(&s, "user['name']")), "ada");
    assert!(!eval_on(&s, "user.missing").is_defined());
    // reads through a missing path fall to undefined, not a fault
    assert!(!eval_on(&s, "ghost.deeply.nested").is_defined());
}

#[test]
fn sequence_access() {
    let s = root();
    s.set("xs", Value::array(vec![Value::Number(10.0), Value::Number(20.0)]));
    assert_eq!(num_on(&s, "xs[1]"), 20.0);
    assert_eq!(num_on(&s, "xs.length"), 2.0);
    assert!(!eval_on(&s, "xs[9]").is_defined());
}

#[test]
fn function_calls() {
    let s = root();
    s.set("double", Value::function("double", |args| {
        Ok(Value::Number(args[0].to_number() * 2.0))
    }));
    assert_eq!(num_on(&s, "double(21)"), 42.0);
}

#[test]
fn method_calls_bind_the_receiver() {
    let s = root();
    let obj = Value::object([
        ("factor".to_string(), Value::Number(3.0)),
        ("scale".to_string(), Value::method("scale", |this, args| {
            let factor = match this {
                Value::Object(map) => map.borrow()["factor"].to_number(),
                _ => return Err(weft_lang::EvalError::msg("no receiver")),
            };
            Ok(Value::Number(args[0].to_number() * factor))
        })),
    ]);
    s.set("obj", obj);
    assert_eq!(num_on(&s, "obj.scale(5)"), 15.0);
}

#[test]
fn calling_a_non_function_faults() {
    let s = root();
    s.set("x", Value::Number(1.0));
    assert!(matches!(s.eval("x()"), Err(WeftError::Eval(_))));
    assert!(matches!(s.eval("ghost()"), Err(WeftError::Eval(_))));
}

#[test]
fn this_refers_to_the_scope() {
    let s = root();
    s.set("a", Value::Number(9.0));
    assert_eq!(num_on(&s, "this.a"), 9.0);
}

#[test]
fn locals_overlay_wins_for_the_leading_identifier() {
    let s = root();
    s.set("a", Value::Number(1.0));
    let locals = Value::object([("a".to_string(), Value::Number(2.0))]);
    let v = s.eval_with("a", &locals).unwrap();
    assert_eq!(v.to_number(), 2.0);
    let v = s.eval_with("$locals.a", &locals).unwrap();
    assert_eq!(v.to_number(), 2.0);
}

// ─── Statements ──────────────────────────────────────────────────────────────

#[test]
fn semicolon_sequencing_yields_the_last_value() {
    let s = root();
    assert_eq!(num_on(&s, "a = 1; a + 1"), 2.0);
    assert_eq!(num_on(&s, "1;"), 1.0);
    assert!(!eval("").is_defined());
}

// ─── Assignment ──────────────────────────────────────────────────────────────

#[test]
fn assignment_writes_to_the_scope() {
    let s = root();
    assert_eq!(num_on(&s, "a = 5"), 5.0);
    assert_eq!(s.get("a").to_number(), 5.0);
}

#[test]
fn assignment_creates_intermediate_objects() {
    let s = root();
    eval_on(&s, "a.b.c = 2");
    assert_eq!(num_on(&s, "a.b.c"), 2.0);
}

#[test]
fn compiled_assign_round_trips() {
    let s = root();
    let e = s.compile("a.b").unwrap();
    assert!(e.assignable());
    e.assign(&s, Value::Number(7.0)).unwrap();
    assert_eq!(e.eval(&s).unwrap().to_number(), 7.0);
}

#[test]
fn non_lvalues_are_rejected_by_the_compiler_not_the_parser() {
    let s = root();
    let e = s.compile("a + b").unwrap();
    assert!(!e.assignable());
    assert!(e.assign(&s, Value::Number(1.0)).is_err());
    // parsing `1 = 2` succeeds; evaluation reports the illegal lvalue
    assert!(matches!(s.eval("1 = 2"), Err(WeftError::Eval(_))));
}

// ─── Filters ─────────────────────────────────────────────────────────────────

#[test]
fn builtin_filter_substring() {
    let s = root();
    s.set("arr", Value::array(vec![
        Value::string("quick"),
        Value::string("BROWN"),
        Value::string("fox"),
    ]));
    let v = eval_on(&s, "arr | filter:'o'");
    assert_eq!(strings(&v), vec!["BROWN", "fox"]);
}

#[test]
fn custom_filter_chain() {
    let s = root();
    s.register_filter("upcase", |args| {
        Ok(Value::string(args[0].to_display().to_uppercase()))
    });
    s.register_filter("exclamate", |args| {
        Ok(Value::string(format!("{}!", args[0].to_display())))
    });
    assert_eq!(text(&eval_on(&s, "'hello' | upcase | exclamate")), "HELLO!");
}

#[test]
fn filter_arguments_follow_the_piped_value() {
    let s = root();
    s.register_filter("clamp", |args| {
        let x = args[0].to_number();
        let lo = args[1].to_number();
        let hi = args[2].to_number();
        Ok(Value::Number(x.clamp(lo, hi)))
    });
    assert_eq!(num_on(&s, "15 | clamp:0:10"), 10.0);
}

#[test]
fn unknown_filter_faults_at_evaluation_time() {
    let s = root();
    let e = s.compile("1 | later").unwrap();
    assert!(e.eval(&s).is_err());
    // registration after compilation is honoured: lookup is late-bound
    s.register_filter("later", |args| Ok(args[0].clone()));
    assert_eq!(e.eval(&s).unwrap().to_number(), 1.0);
}

// ─── Sandbox ─────────────────────────────────────────────────────────────────

#[test]
fn statically_named_disallowed_members_fail_at_compile_time() {
    let s = root();
    for expr in [
        "x.constructor",
        "x.__proto__",
        "x.__defineGetter__",
        "x.__defineSetter__",
        "x.__lookupGetter__",
        "x.__lookupSetter__",
        "x.constructor = 1",
        "f(a.__proto__)",
    ] {
        match s.eval(expr) {
            Err(WeftError::Compile(errs)) => {
                assert!(
                    errs.iter().any(|e| e.message.contains("disallowed")),
                    "`{expr}`: {errs:?}"
                );
            }
            other => panic!("expected compile-time safety failure for `{expr}`, got {other:?}"),
        }
    }
}

#[test]
fn computed_member_names_are_checked_at_evaluation_time() {
    let s = root();
    s.set("key", Value::string("__proto__"));
    s.set("x", Value::empty_object());
    assert!(matches!(s.eval("x[key]"), Err(WeftError::Eval(_))));
}

#[test]
fn guarded_host_objects_cannot_flow_through_calls() {
    let s = root();
    s.set("win", Value::opaque("window", true));
    s.set("id", Value::function("id", |args| Ok(args[0].clone())));
    assert!(matches!(s.eval("id(win)"), Err(WeftError::Eval(_))));

    s.set("leak", Value::function("leak", |_| Ok(Value::opaque("window", true))));
    assert!(matches!(s.eval("leak()"), Err(WeftError::Eval(_))));

    // unguarded opaques pass
    s.set("widget", Value::opaque("widget", false));
    assert!(s.eval("id(widget)").is_ok());
}

#[test]
fn function_builtins_are_refused() {
    let s = root();
    s.set("f", Value::function("f", |_| Ok(Value::Undefined)));
    for expr in ["f.call", "f.apply", "f.bind"] {
        assert!(matches!(s.eval(expr), Err(WeftError::Eval(_))), "`{expr}`");
    }
}

// ─── Compile-time metadata ───────────────────────────────────────────────────

#[test]
fn watch_mode_classification() {
    let s = root();
    assert_eq!(s.compile("42").unwrap().watch_mode(), WatchMode::Constant);
    assert_eq!(s.compile("[1, 2]").unwrap().watch_mode(), WatchMode::Constant);
    assert_eq!(s.compile("a").unwrap().watch_mode(), WatchMode::Normal);
    assert_eq!(s.compile("::a").unwrap().watch_mode(), WatchMode::OneTime);
    assert_eq!(s.compile("::[a, b]").unwrap().watch_mode(), WatchMode::OneTimeLiteral);
    assert_eq!(s.compile("a | filter:'x'").unwrap().watch_mode(), WatchMode::Inputs);
    assert_eq!(s.compile("a + b").unwrap().watch_mode(), WatchMode::Inputs);
    assert_eq!(s.compile("[1, a]").unwrap().watch_mode(), WatchMode::Inputs);
}

#[test]
fn literal_expressions_evaluate_like_host_literals() {
    assert!(root().compile("[1, 'two', true]").unwrap().literal());
    assert!(root().compile("{a: 1}").unwrap().literal());
    assert!(root().compile("").unwrap().literal());
    assert!(!root().compile("a.b").unwrap().literal());
}

#[test]
fn parse_errors_surface_synchronously() {
    let s = root();
    assert!(matches!(s.eval("a +"), Err(WeftError::Compile(_))));
    assert!(matches!(s.eval("'unterminated"), Err(WeftError::Compile(_))));
    assert!(matches!(s.eval("a ? b"), Err(WeftError::Compile(_))));
}

#[test]
fn two_compilations_are_extensionally_equal() {
    let a = weft_lang::parse("1 + 2 * 3").unwrap();
    let b = weft_lang::parse("1 + 2 * 3").unwrap();
    let s = root();
    assert_eq!(a.eval(&s).unwrap().to_number(), b.eval(&s).unwrap().to_number());
}
