pub mod builtin;

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::EvalError;
use crate::runtime::value::Value;

/// A named transformation fetched at evaluation time. The piped value is
/// `args[0]`; colon arguments follow.
pub type FilterFn = dyn Fn(&[Value]) -> Result<Value, EvalError>;

struct Entry {
    func: Rc<FilterFn>,
    stateful: bool,
}

/// Name → filter mapping. Lookup happens at evaluation time, so filters
/// registered after an expression was compiled are still found; only the
/// `stateful` flag is consulted during analysis.
pub struct FilterRegistry {
    entries: HashMap<String, Entry>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// The standard registry: the array predicate `filter` is always present.
    pub fn standard() -> Self {
        let mut r = Self::new();
        r.register("filter", || Rc::new(builtin::filter_filter));
        r
    }

    /// Install a filter. The factory runs once, at registration.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: FnOnce() -> Rc<FilterFn>,
    {
        self.entries.insert(name.to_string(), Entry { func: factory(), stateful: false });
    }

    /// Install a filter whose output can change between identical inputs.
    /// Analysis never treats its applications as constant-foldable.
    pub fn register_stateful<F>(&mut self, name: &str, factory: F)
    where
        F: FnOnce() -> Rc<FilterFn>,
    {
        self.entries.insert(name.to_string(), Entry { func: factory(), stateful: true });
    }

    /// Batch form: install several filters at once.
    pub fn register_many(&mut self, filters: impl IntoIterator<Item = (String, Rc<FilterFn>)>) {
        for (name, func) in filters {
            self.entries.insert(name, Entry { func, stateful: false });
        }
    }

    pub fn get(&self, name: &str) -> Option<Rc<FilterFn>> {
        self.entries.get(name).map(|e| e.func.clone())
    }

    pub fn is_stateful(&self, name: &str) -> bool {
        self.entries.get(name).map(|e| e.stateful).unwrap_or(false)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
