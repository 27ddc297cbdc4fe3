//! The array predicate filter: `arr | filter:criterion[:comparator]`.

use std::rc::Rc;

use crate::error::EvalError;
use crate::runtime::value::{deep_eq, Value};

/// Wildcard key: a criterion under `$` matches against every property at
/// the same level.
const ANY_KEY: &str = "$";

pub fn filter_filter(args: &[Value]) -> Result<Value, EvalError> {
    let input = args.first().cloned().unwrap_or(Value::Undefined);
    let items = match &input {
        Value::Array(items) => items.clone(),
        Value::Undefined | Value::Null => return Ok(input),
        other => {
            return Err(EvalError::msg(format!(
                "filter expects an array, got {}",
                other.type_name()
            )))
        }
    };
    let criterion = args.get(1).cloned().unwrap_or(Value::Undefined);
    let comparator = comparator_from(args.get(2));

    let snapshot: Vec<Value> = items.borrow().clone();
    let mut kept = Vec::new();
    for item in snapshot {
        if matches(&item, &criterion, &comparator)? {
            kept.push(item);
        }
    }
    Ok(Value::array(kept))
}

enum Comparator {
    /// Coerced-lowercase substring containment.
    Substring,
    /// Strict structural equality.
    Deep,
    /// A user-provided predicate over (actual, expected).
    Custom(Rc<crate::filters::FilterFn>),
}

fn comparator_from(arg: Option<&Value>) -> Comparator {
    match arg {
        Some(Value::Bool(true)) => Comparator::Deep,
        Some(Value::Function(f)) => {
            let f = f.clone();
            Comparator::Custom(Rc::new(move |args: &[Value]| {
                f.call(&Value::Undefined, args)
            }))
        }
        _ => Comparator::Substring,
    }
}

fn matches(item: &Value, criterion: &Value, comparator: &Comparator) -> Result<bool, EvalError> {
    match criterion {
        // predicate criterion decides on its own
        Value::Function(f) => Ok(f.call(&Value::Undefined, &[item.clone()])?.is_truthy()),
        // mapping criterion: every key must match
        Value::Object(map) => {
            let entries: Vec<(String, Value)> =
                map.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            for (key, expected) in entries {
                let ok = if key == ANY_KEY {
                    match_any_property(item, &expected, comparator)?
                } else {
                    let actual = property_of(item, &key);
                    deep_compare(&actual, &expected, comparator, false)?
                };
                if !ok {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        // primitive criterion: match the item or any of its properties
        _ => deep_compare(item, criterion, comparator, true),
    }
}

fn property_of(item: &Value, key: &str) -> Value {
    match item {
        Value::Object(map) => map.borrow().get(key).cloned().unwrap_or(Value::Undefined),
        _ => Value::Undefined,
    }
}

fn match_any_property(
    item: &Value,
    expected: &Value,
    comparator: &Comparator,
) -> Result<bool, EvalError> {
    match item {
        Value::Object(map) => {
            let values: Vec<Value> = map.borrow().values().cloned().collect();
            for v in values {
                if deep_compare(&v, expected, comparator, false)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        // primitive items compare directly against the wildcard criterion
        _ => deep_compare(item, expected, comparator, false),
    }
}

fn deep_compare(
    actual: &Value,
    expected: &Value,
    comparator: &Comparator,
    match_any_prop: bool,
) -> Result<bool, EvalError> {
    // a leading `!` on a string criterion negates the rest of it
    if let Value::String(s) = expected {
        if let Some(rest) = s.strip_prefix('!') {
            return Ok(!deep_compare(actual, &Value::string(rest), comparator, match_any_prop)?);
        }
    }

    match actual {
        Value::Array(items) => {
            let snapshot: Vec<Value> = items.borrow().clone();
            for item in snapshot {
                if deep_compare(&item, expected, comparator, match_any_prop)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Object(map) => {
            if let Value::Object(expected_map) = expected {
                // nested mapping criterion: every expected key must match
                let entries: Vec<(String, Value)> = expected_map
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (key, exp) in entries {
                    let ok = if key == ANY_KEY {
                        match_any_property(actual, &exp, comparator)?
                    } else {
                        let v = map.borrow().get(&key).cloned().unwrap_or(Value::Undefined);
                        deep_compare(&v, &exp, comparator, false)?
                    };
                    if !ok {
                        return Ok(false);
                    }
                }
                Ok(true)
            } else if match_any_prop {
                match_any_property(actual, expected, comparator)
            } else {
                compare(actual, expected, comparator)
            }
        }
        _ => compare(actual, expected, comparator),
    }
}

fn compare(actual: &Value, expected: &Value, comparator: &Comparator) -> Result<bool, EvalError> {
    match comparator {
        Comparator::Deep => Ok(deep_eq(actual, expected)),
        Comparator::Custom(f) => {
            Ok((f.as_ref())(&[actual.clone(), expected.clone()])?.is_truthy())
        }
        Comparator::Substring => {
            // undefined never matches; null matches only null
            if !actual.is_defined() {
                return Ok(false);
            }
            if matches!(actual, Value::Null) || matches!(expected, Value::Null) {
                return Ok(matches!((actual, expected), (Value::Null, Value::Null)));
            }
            if matches!(actual, Value::Object(_) | Value::Array(_))
                || matches!(expected, Value::Object(_) | Value::Array(_))
            {
                return Ok(false);
            }
            let actual = actual.to_display().to_lowercase();
            let expected = expected.to_display().to_lowercase();
            Ok(actual.contains(&expected))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Value {
        Value::array(items.iter().map(Value::string).collect())
    }

    fn run(input: Value, criterion: Value) -> Vec<String> {
        match filter_filter(&[input, criterion]).unwrap() {
            Value::Array(items) => items.borrow().iter().map(|v| v.to_display()).collect(),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let out = run(strings(&["quick", "BROWN", "fox"]), Value::string("o"));
        assert_eq!(out, vec!["BROWN", "fox"]);
    }

    #[test]
    fn bang_negates_substring_match() {
        let out = run(strings(&["quick", "BROWN", "fox"]), Value::string("!o"));
        assert_eq!(out, vec!["quick"]);
    }

    #[test]
    fn undefined_elements_never_match() {
        let input = Value::array(vec![Value::Undefined, Value::string("ok")]);
        let out = run(input, Value::string("o"));
        assert_eq!(out, vec!["ok"]);
    }

    #[test]
    fn null_matches_only_null() {
        let input = Value::array(vec![Value::Null, Value::string("null")]);
        let out = run(input, Value::Null);
        assert_eq!(out, vec!["null".to_string()]);
        assert!(matches!(
            filter_filter(&[Value::array(vec![Value::Null]), Value::Null]).unwrap(),
            Value::Array(items) if items.borrow().len() == 1
        ));
        // the string "null" does not match the null value
        let out = run(Value::array(vec![Value::Null]), Value::string("null"));
        assert!(out.is_empty());
    }

    #[test]
    fn predicate_criterion() {
        let pred = Value::function("long", |args| {
            Ok(Value::Bool(args[0].to_display().len() > 3))
        });
        let out = run(strings(&["ab", "abcd"]), pred);
        assert_eq!(out, vec!["abcd"]);
    }

    #[test]
    fn mapping_criterion_per_key() {
        let items = Value::array(vec![
            Value::object([("name".to_string(), Value::string("Ada")),
                           ("role".to_string(), Value::string("eng"))]),
            Value::object([("name".to_string(), Value::string("Bob")),
                           ("role".to_string(), Value::string("ops"))]),
        ]);
        let criterion = Value::object([("role".to_string(), Value::string("eng"))]);
        let out = filter_filter(&[items, criterion]).unwrap();
        match out {
            Value::Array(kept) => assert_eq!(kept.borrow().len(), 1),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn wildcard_key_matches_any_property() {
        let items = Value::array(vec![
            Value::object([("a".to_string(), Value::string("x")),
                           ("b".to_string(), Value::string("match-me"))]),
            Value::object([("a".to_string(), Value::string("y"))]),
        ]);
        let criterion = Value::object([("$".to_string(), Value::string("match"))]);
        match filter_filter(&[items, criterion]).unwrap() {
            Value::Array(kept) => assert_eq!(kept.borrow().len(), 1),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn true_comparator_means_strict_equality() {
        let out = filter_filter(&[
            strings(&["o", "oo"]),
            Value::string("o"),
            Value::Bool(true),
        ])
        .unwrap();
        match out {
            Value::Array(kept) => {
                assert_eq!(kept.borrow().len(), 1);
                assert_eq!(kept.borrow()[0].to_display(), "o");
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn missing_input_passes_through() {
        assert!(matches!(filter_filter(&[Value::Undefined]).unwrap(), Value::Undefined));
        assert!(matches!(filter_filter(&[Value::Null]).unwrap(), Value::Null));
    }

    #[test]
    fn non_array_input_errors() {
        assert!(filter_filter(&[Value::Number(3.0)]).is_err());
    }
}
