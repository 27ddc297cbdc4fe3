//! Watch registration: normal watchers, the four compile-time delegates,
//! watch groups, and shallow collection watching.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{Error, EvalError};
use crate::runtime::compiler::{CompiledExpr, WatchMode};
use crate::runtime::value::{ref_eq, shallow_clone, Value};
use crate::scope::{Scope, ScopeInner};

pub type WatchFn = dyn Fn(&Scope) -> Result<Value, EvalError>;
pub type WatchListener = dyn FnMut(&Value, &Value, &Scope) -> Result<(), EvalError>;
pub type GroupListener = dyn FnMut(&[Value], &[Value], &Scope) -> Result<(), EvalError>;

/// One registered watcher. `last` starts at `None`, a sentinel no legal
/// expression value equals, so the first check always fires the listener.
pub(crate) struct Watcher {
    pub watch: Box<WatchFn>,
    pub listener: RefCell<Box<WatchListener>>,
    pub value_eq: bool,
    pub last: RefCell<Option<Value>>,
    pub context: String,
}

impl Watcher {
    pub(crate) fn same(&self, a: &Value, b: &Value) -> bool {
        if self.value_eq {
            crate::runtime::value::deep_eq(a, b)
        } else {
            ref_eq(a, b)
        }
    }
}

// ─── Deregistration ──────────────────────────────────────────────────────────

#[derive(Clone)]
enum HandleKind {
    Watcher {
        scope: Weak<ScopeInner>,
        watcher: Weak<Watcher>,
    },
    Group(Vec<WatchHandle>),
    Flag(Rc<Cell<bool>>),
}

/// Returned from every watch registration. Dropping the handle does not
/// deregister; call [`WatchHandle::unwatch`].
#[derive(Clone)]
pub struct WatchHandle {
    kind: HandleKind,
}

impl WatchHandle {
    fn single(scope: &Rc<ScopeInner>, watcher: &Rc<Watcher>) -> Self {
        Self {
            kind: HandleKind::Watcher {
                scope: Rc::downgrade(scope),
                watcher: Rc::downgrade(watcher),
            },
        }
    }

    fn group(handles: Vec<WatchHandle>) -> Self {
        Self { kind: HandleKind::Group(handles) }
    }

    fn flag(flag: Rc<Cell<bool>>) -> Self {
        Self { kind: HandleKind::Flag(flag) }
    }

    /// Remove the watcher(s). Idempotent. Also forgets the tree's last-dirty
    /// short-circuit marker, which the re-ordering would otherwise confuse.
    pub fn unwatch(&self) {
        match &self.kind {
            HandleKind::Watcher { scope, watcher } => {
                let (Some(scope), Some(watcher)) = (scope.upgrade(), watcher.upgrade()) else {
                    return;
                };
                let mut watchers = scope.watchers.borrow_mut();
                if let Some(pos) = watchers.iter().position(|w| Rc::ptr_eq(w, &watcher)) {
                    watchers.remove(pos);
                }
                drop(watchers);
                *scope.core.last_dirty.borrow_mut() = None;
            }
            HandleKind::Group(handles) => {
                for handle in handles {
                    handle.unwatch();
                }
            }
            HandleKind::Flag(flag) => flag.set(false),
        }
    }
}

// ─── Registration ────────────────────────────────────────────────────────────

impl Scope {
    /// Watch a callable directly. New watchers are prepended; the digest
    /// iterates in reverse, so a watcher added mid-pass waits for the next
    /// round and removals never skip a survivor.
    pub fn watch_fn(
        &self,
        watch: impl Fn(&Scope) -> Result<Value, EvalError> + 'static,
        listener: impl FnMut(&Value, &Value, &Scope) -> Result<(), EvalError> + 'static,
        value_eq: bool,
    ) -> WatchHandle {
        self.add_watcher(Box::new(watch), Box::new(listener), value_eq, "<fn>".to_string())
    }

    /// Watch an expression with reference comparison.
    pub fn watch(
        &self,
        expr: &str,
        listener: impl FnMut(&Value, &Value, &Scope) -> Result<(), EvalError> + 'static,
    ) -> Result<WatchHandle, Vec<Error>> {
        self.watch_with(expr, false, listener)
    }

    /// Watch an expression; `value_eq` selects structural comparison (with
    /// deep-cloned `last` values) over reference comparison.
    pub fn watch_with(
        &self,
        expr: &str,
        value_eq: bool,
        listener: impl FnMut(&Value, &Value, &Scope) -> Result<(), EvalError> + 'static,
    ) -> Result<WatchHandle, Vec<Error>> {
        let compiled = self.compile(expr)?;
        Ok(self.watch_compiled(compiled, value_eq, Box::new(listener)))
    }

    /// Registration switchboard: the compiled expression's watch mode picks
    /// the delegate.
    pub(crate) fn watch_compiled(
        &self,
        compiled: CompiledExpr,
        value_eq: bool,
        listener: Box<WatchListener>,
    ) -> WatchHandle {
        match compiled.watch_mode() {
            WatchMode::Normal => self.watch_normal(compiled, value_eq, listener),
            WatchMode::Constant => self.watch_constant(compiled, value_eq, listener),
            WatchMode::OneTime => self.watch_one_time(compiled, value_eq, listener, false),
            WatchMode::OneTimeLiteral => self.watch_one_time(compiled, value_eq, listener, true),
            WatchMode::Inputs => self.watch_inputs(compiled, value_eq, listener),
        }
    }

    fn add_watcher(
        &self,
        watch: Box<WatchFn>,
        listener: Box<WatchListener>,
        value_eq: bool,
        context: String,
    ) -> WatchHandle {
        let watcher = Rc::new(Watcher {
            watch,
            listener: RefCell::new(listener),
            value_eq,
            last: RefCell::new(None),
            context,
        });
        self.inner.watchers.borrow_mut().push_front(watcher.clone());
        *self.inner.core.last_dirty.borrow_mut() = None;
        WatchHandle::single(&self.inner, &watcher)
    }

    fn watch_normal(
        &self,
        compiled: CompiledExpr,
        value_eq: bool,
        listener: Box<WatchListener>,
    ) -> WatchHandle {
        let context = format!("watcher of `{}`", compiled.source());
        let expr = compiled.clone();
        self.add_watcher(
            Box::new(move |scope| expr.eval(scope)),
            listener,
            value_eq,
            context,
        )
    }

    /// Constant expressions fire once, then remove themselves.
    fn watch_constant(
        &self,
        compiled: CompiledExpr,
        value_eq: bool,
        mut listener: Box<WatchListener>,
    ) -> WatchHandle {
        let context = format!("watcher of `{}`", compiled.source());
        let handle_cell: Rc<RefCell<Option<WatchHandle>>> = Rc::new(RefCell::new(None));
        let cell = handle_cell.clone();
        let expr = compiled.clone();
        let handle = self.add_watcher(
            Box::new(move |scope| expr.eval(scope)),
            Box::new(move |new, old, scope| {
                let result = listener(new, old, scope);
                if let Some(handle) = cell.borrow_mut().take() {
                    handle.unwatch();
                }
                result
            }),
            value_eq,
            context,
        );
        *handle_cell.borrow_mut() = Some(handle.clone());
        handle
    }

    /// `::expr`: keep watching until the value settles to defined, then
    /// confirm in post-digest and deregister. The post-digest re-check is
    /// deliberate — a value that went back to undefined re-arms the watch.
    fn watch_one_time(
        &self,
        compiled: CompiledExpr,
        value_eq: bool,
        mut listener: Box<WatchListener>,
        literal: bool,
    ) -> WatchHandle {
        let context = format!("watcher of `{}`", compiled.source());
        let handle_cell: Rc<RefCell<Option<WatchHandle>>> = Rc::new(RefCell::new(None));
        let last_value = Rc::new(RefCell::new(Value::Undefined));

        let cell = handle_cell.clone();
        let remembered = last_value.clone();
        // a multi-input one-time expression (a literal, typically) rebuilds
        // its value on every evaluation; input tracking keeps it stable
        // between digest rounds so the loop can settle
        let watch_fn: Box<WatchFn> = if compiled.inputs().is_some() {
            inputs_watch_fn(&compiled)
        } else {
            let expr = compiled.clone();
            Box::new(move |scope| expr.eval(scope))
        };
        let settled = move |v: &Value| if literal { all_defined(v) } else { v.is_defined() };

        let handle = self.add_watcher(
            watch_fn,
            Box::new(move |new, old, scope| {
                *remembered.borrow_mut() = new.clone();
                let result = listener(new, old, scope);
                if settled(new) {
                    let cell = cell.clone();
                    let remembered = remembered.clone();
                    let settled = settled.clone();
                    scope.post_digest(move || {
                        if settled(&remembered.borrow()) {
                            if let Some(handle) = cell.borrow_mut().take() {
                                handle.unwatch();
                            }
                        }
                        Ok(())
                    });
                }
                result
            }),
            value_eq,
            context,
        );
        *handle_cell.borrow_mut() = Some(handle.clone());
        handle
    }

    /// Input-tracked watch: the effective watch function re-evaluates the
    /// full expression only when one of its inputs changed (NaN-stable
    /// reference comparison); otherwise the cached result is returned.
    fn watch_inputs(
        &self,
        compiled: CompiledExpr,
        value_eq: bool,
        listener: Box<WatchListener>,
    ) -> WatchHandle {
        let context = format!("watcher of `{}`", compiled.source());
        self.add_watcher(inputs_watch_fn(&compiled), listener, value_eq, context)
    }

    // ── Watch groups ─────────────────────────────────────────────────────────

    /// Watch an ordered list of expressions; the listener runs at most once
    /// per digest with parallel value arrays. The first firing hands the
    /// same array as both arguments.
    pub fn watch_group(
        &self,
        exprs: &[&str],
        listener: impl FnMut(&[Value], &[Value], &Scope) -> Result<(), EvalError> + 'static,
    ) -> Result<WatchHandle, Vec<Error>> {
        let mut listener: Box<GroupListener> = Box::new(listener);

        if exprs.is_empty() {
            // still fires once, through the async queue, unless
            // deregistered first
            let live = Rc::new(Cell::new(true));
            let flag = live.clone();
            self.eval_async_fn(move |scope| {
                if flag.get() {
                    listener(&[], &[], scope)?;
                }
                Ok(Value::Undefined)
            });
            return Ok(WatchHandle::flag(live));
        }

        if exprs.len() == 1 {
            let compiled = self.compile(exprs[0])?;
            return Ok(self.watch_compiled(
                compiled,
                false,
                Box::new(move |new, old, scope| {
                    let news = [new.clone()];
                    if ref_eq(new, old) {
                        listener(&news, &news, scope)
                    } else {
                        let olds = [old.clone()];
                        listener(&news, &olds, scope)
                    }
                }),
            ));
        }

        let state = Rc::new(RefCell::new(GroupState {
            new_values: vec![Value::Undefined; exprs.len()],
            old_values: vec![Value::Undefined; exprs.len()],
            scheduled: false,
            first: true,
            listener,
        }));

        let mut handles = Vec::with_capacity(exprs.len());
        for (i, expr) in exprs.iter().enumerate() {
            let compiled = self.compile(expr)?;
            let st = state.clone();
            handles.push(self.watch_compiled(
                compiled,
                false,
                Box::new(move |new, old, scope| {
                    {
                        let mut group = st.borrow_mut();
                        group.new_values[i] = new.clone();
                        group.old_values[i] = old.clone();
                        if group.scheduled {
                            return Ok(());
                        }
                        group.scheduled = true;
                    }
                    let st = st.clone();
                    scope.eval_async_fn(move |scope| {
                        let (news, olds, first) = {
                            let mut group = st.borrow_mut();
                            group.scheduled = false;
                            let first = group.first;
                            group.first = false;
                            (group.new_values.clone(), group.old_values.clone(), first)
                        };
                        let mut group = st.borrow_mut();
                        if first {
                            (group.listener)(&news, &news, scope)?;
                        } else {
                            (group.listener)(&news, &olds, scope)?;
                        }
                        Ok(Value::Undefined)
                    });
                    Ok(())
                }),
            ));
        }
        Ok(WatchHandle::group(handles))
    }

    // ── Collection watching ──────────────────────────────────────────────────

    /// Shallow dirty-check of a sequence or mapping: element/key changes
    /// fire the listener without structural comparison of the whole value.
    pub fn watch_collection(
        &self,
        expr: &str,
        listener: impl FnMut(&Value, &Value, &Scope) -> Result<(), EvalError> + 'static,
    ) -> Result<WatchHandle, Vec<Error>> {
        self.watch_collection_with(expr, true, listener)
    }

    /// `track_old` controls whether the listener is handed a shallow copy of
    /// the previous collection; skipping it avoids a copy per change.
    pub fn watch_collection_with(
        &self,
        expr: &str,
        track_old: bool,
        listener: impl FnMut(&Value, &Value, &Scope) -> Result<(), EvalError> + 'static,
    ) -> Result<WatchHandle, Vec<Error>> {
        let compiled = self.compile(expr)?;
        let context = format!("collection watcher of `{}`", compiled.source());

        let tracker = Rc::new(RefCell::new(CollectionTracker {
            track: Track::Scalar(Value::Undefined),
            change_count: 0,
            current: Value::Undefined,
        }));

        let watch_state = tracker.clone();
        let expr_for_watch = compiled.clone();
        let watch = Box::new(move |scope: &Scope| {
            let value = expr_for_watch.eval(scope)?;
            let mut t = watch_state.borrow_mut();
            t.update(&value);
            t.current = value;
            Ok(Value::Number(t.change_count as f64))
        });

        let mut listener: Box<WatchListener> = Box::new(listener);
        let listen_state = tracker.clone();
        let mut first = true;
        let mut very_old = Value::Undefined;
        let wrapped = Box::new(move |_: &Value, _: &Value, scope: &Scope| {
            let current = listen_state.borrow().current.clone();
            let result = if first {
                first = false;
                listener(&current, &current, scope)
            } else {
                listener(&current, &very_old, scope)
            };
            if track_old {
                very_old = shallow_clone(&current);
            }
            result
        });

        Ok(self.add_watcher(watch, wrapped, false, context))
    }
}

// ─── Delegate state ──────────────────────────────────────────────────────────

/// Build the input-tracked watch function: each input is dirty-checked with
/// NaN-stable reference comparison; the full expression re-evaluates only
/// when one changed, otherwise the cached result is returned unchanged.
fn inputs_watch_fn(compiled: &CompiledExpr) -> Box<WatchFn> {
    let inputs: Vec<CompiledExpr> = compiled.inputs().unwrap_or(&[]).to_vec();
    let state = Rc::new(RefCell::new(InputsState {
        last_inputs: vec![None; inputs.len()],
        last_result: Value::Undefined,
        primed: false,
    }));
    let full = compiled.clone();
    Box::new(move |scope| {
        let mut st = state.borrow_mut();
        let mut changed = !st.primed;
        for (i, input) in inputs.iter().enumerate() {
            let value = input.eval(scope)?;
            let unchanged = matches!(&st.last_inputs[i], Some(prev) if ref_eq(prev, &value));
            if !unchanged {
                st.last_inputs[i] = Some(value);
                changed = true;
            }
        }
        if changed {
            st.last_result = full.eval(scope)?;
            st.primed = true;
        }
        Ok(st.last_result.clone())
    })
}

struct InputsState {
    last_inputs: Vec<Option<Value>>,
    last_result: Value,
    primed: bool,
}

struct GroupState {
    new_values: Vec<Value>,
    old_values: Vec<Value>,
    scheduled: bool,
    first: bool,
    listener: Box<GroupListener>,
}

/// "Defined" for the literal one-time delegate: no element or property of
/// the collection is undefined.
fn all_defined(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.borrow().iter().all(Value::is_defined),
        Value::Object(map) => map.borrow().values().all(Value::is_defined),
        other => other.is_defined(),
    }
}

// ─── Collection tracking ─────────────────────────────────────────────────────

enum Track {
    Scalar(Value),
    Array(Vec<Value>),
    Object { entries: IndexMap<String, Value>, old_length: usize },
}

struct CollectionTracker {
    track: Track,
    change_count: u64,
    current: Value,
}

impl CollectionTracker {
    /// Shallow diff of `new` against the tracked copy; bumps the change
    /// counter per detected difference and mirrors `new` into the copy.
    fn update(&mut self, new: &Value) {
        match new {
            Value::Array(items) => {
                let items = items.borrow();
                if !matches!(self.track, Track::Array(_)) {
                    self.change_count += 1;
                    self.track = Track::Array(Vec::new());
                }
                let Track::Array(old) = &mut self.track else { unreachable!() };
                if old.len() != items.len() {
                    self.change_count += 1;
                    old.resize(items.len(), Value::Undefined);
                }
                for (i, item) in items.iter().enumerate() {
                    if !ref_eq(&old[i], item) {
                        self.change_count += 1;
                        old[i] = item.clone();
                    }
                }
            }

            Value::Object(map) => {
                let map = map.borrow();
                if !matches!(self.track, Track::Object { .. }) {
                    self.change_count += 1;
                    self.track = Track::Object { entries: IndexMap::new(), old_length: 0 };
                }
                let Track::Object { entries, old_length } = &mut self.track else {
                    unreachable!()
                };
                let new_length = map.len();
                for (key, value) in map.iter() {
                    match entries.get_mut(key) {
                        Some(old) => {
                            if !ref_eq(old, value) {
                                self.change_count += 1;
                                *old = value.clone();
                            }
                        }
                        None => {
                            self.change_count += 1;
                            *old_length += 1;
                            entries.insert(key.clone(), value.clone());
                        }
                    }
                }
                // only scan for removals when some key must be missing
                if *old_length > new_length {
                    self.change_count += 1;
                    entries.retain(|key, _| map.contains_key(key));
                    *old_length = entries.len();
                }
            }

            other => {
                let changed = match &self.track {
                    Track::Scalar(old) => !ref_eq(old, other),
                    _ => true,
                };
                if changed {
                    self.change_count += 1;
                    self.track = Track::Scalar(other.clone());
                }
            }
        }
    }
}
