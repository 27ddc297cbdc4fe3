//! The reactive scope tree: mutable evaluation contexts that host watchers,
//! absorb deferred work through cooperative queues, and dispatch events.
//!
//! A `Scope` is a cheap-clone handle; all shared state lives behind `Rc`.
//! Everything is single-threaded by construction.

pub mod digest;
pub mod events;
pub mod watch;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{DigestError, ErrorSink, EvalError, TracingSink, WeftError};
use crate::filters::{FilterFn, FilterRegistry};
use crate::runtime::compiler::CompiledExpr;
use crate::runtime::value::{self, Value};

use events::EventListener;
use watch::Watcher;

const DEFAULT_TTL: usize = 10;

// ─── Root configuration ──────────────────────────────────────────────────────

pub struct RootOptions {
    ttl: usize,
    sink: Box<dyn ErrorSink>,
}

impl RootOptions {
    pub fn new() -> Self {
        Self { ttl: DEFAULT_TTL, sink: Box::new(TracingSink) }
    }

    /// Maximum dirty-check rounds before a digest gives up. At least 1.
    pub fn ttl(mut self, ttl: usize) -> Self {
        self.ttl = ttl.max(1);
        self
    }

    /// Where caught watcher/listener/queue faults are reported.
    pub fn sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }
}

impl Default for RootOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Shared tree state ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Digest,
    Apply,
}

impl Phase {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Digest => "digest",
            Phase::Apply => "apply",
        }
    }
}

pub(crate) enum Work {
    Expr(CompiledExpr),
    Func(Box<dyn FnOnce(&Scope) -> Result<Value, EvalError>>),
}

pub(crate) struct AsyncTask {
    pub scope: Scope,
    pub work: Work,
}

impl AsyncTask {
    pub(crate) fn run(self) -> Result<Value, EvalError> {
        match self.work {
            Work::Expr(expr) => expr.eval(&self.scope),
            Work::Func(f) => f(&self.scope),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deferred {
    Digest,
    ApplyAsyncFlush,
}

/// State owned by the tree as a whole. Every scope handle keeps it alive;
/// the three queues are shared by reference across the entire tree,
/// isolated children included.
pub(crate) struct RootCore {
    pub phase: Cell<Phase>,
    pub ttl: usize,
    pub sink: Box<dyn ErrorSink>,
    pub last_dirty: RefCell<Option<Rc<Watcher>>>,
    pub async_queue: RefCell<VecDeque<AsyncTask>>,
    pub apply_async_queue: RefCell<VecDeque<AsyncTask>>,
    pub post_digest_queue: RefCell<VecDeque<Box<dyn FnOnce() -> Result<(), EvalError>>>>,
    pub deferred: RefCell<VecDeque<Deferred>>,
    pub apply_async_scheduled: Cell<bool>,
    pub filters: Rc<RefCell<FilterRegistry>>,
    pub cache: RefCell<HashMap<String, CompiledExpr>>,
    pub root: RefCell<Weak<ScopeInner>>,
}

impl RootCore {
    pub(crate) fn report(&self, error: &EvalError, context: &str) {
        self.sink.error(error, context);
    }
}

// ─── Scope ───────────────────────────────────────────────────────────────────

pub(crate) struct ScopeInner {
    pub data: value::Object,
    /// Tree parent: events walk it, destroy detaches from it.
    pub parent: Option<Weak<ScopeInner>>,
    /// Read-inheritance parent; `None` severs inheritance (isolated scopes).
    pub inherit: Option<Weak<ScopeInner>>,
    pub isolated: bool,
    pub destroyed: Cell<bool>,
    pub children: RefCell<Vec<Rc<ScopeInner>>>,
    pub watchers: RefCell<VecDeque<Rc<Watcher>>>,
    pub listeners: RefCell<HashMap<String, Vec<Option<Rc<EventListener>>>>>,
    pub core: Rc<RootCore>,
    pub weak_self: Weak<ScopeInner>,
}

/// A node of the scope tree. Clone freely: handles alias the same scope.
#[derive(Clone)]
pub struct Scope {
    pub(crate) inner: Rc<ScopeInner>,
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("isolated", &self.inner.isolated)
            .field("destroyed", &self.inner.destroyed.get())
            .field("watchers", &self.inner.watchers.borrow().len())
            .finish()
    }
}

impl Scope {
    // ── Construction ─────────────────────────────────────────────────────────

    pub fn root() -> Scope {
        Self::root_with(RootOptions::default())
    }

    pub fn root_with(options: RootOptions) -> Scope {
        let core = Rc::new(RootCore {
            phase: Cell::new(Phase::Idle),
            ttl: options.ttl,
            sink: options.sink,
            last_dirty: RefCell::new(None),
            async_queue: RefCell::new(VecDeque::new()),
            apply_async_queue: RefCell::new(VecDeque::new()),
            post_digest_queue: RefCell::new(VecDeque::new()),
            deferred: RefCell::new(VecDeque::new()),
            apply_async_scheduled: Cell::new(false),
            filters: Rc::new(RefCell::new(FilterRegistry::standard())),
            cache: RefCell::new(HashMap::new()),
            root: RefCell::new(Weak::new()),
        });

        let inner = Rc::new_cyclic(|weak: &Weak<ScopeInner>| ScopeInner {
            data: Rc::new(RefCell::new(IndexMap::new())),
            parent: None,
            inherit: None,
            isolated: false,
            destroyed: Cell::new(false),
            children: RefCell::new(Vec::new()),
            watchers: RefCell::new(VecDeque::new()),
            listeners: RefCell::new(HashMap::new()),
            core: core.clone(),
            weak_self: weak.clone(),
        });
        *core.root.borrow_mut() = Rc::downgrade(&inner);
        Scope { inner }
    }

    /// Create a child scope. A non-isolated child resolves reads through
    /// this scope; an isolated child starts from a blank context.
    pub fn new_child(&self, isolated: bool) -> Scope {
        self.new_child_under(isolated, self)
    }

    /// Create a child inheriting reads from `self` but attached (for digest
    /// traversal, events, and destruction) under `parent`.
    pub fn new_child_under(&self, isolated: bool, parent: &Scope) -> Scope {
        let inner = Rc::new_cyclic(|weak: &Weak<ScopeInner>| ScopeInner {
            data: Rc::new(RefCell::new(IndexMap::new())),
            parent: Some(Rc::downgrade(&parent.inner)),
            inherit: if isolated { None } else { Some(Rc::downgrade(&self.inner)) },
            isolated,
            destroyed: Cell::new(false),
            children: RefCell::new(Vec::new()),
            watchers: RefCell::new(VecDeque::new()),
            listeners: RefCell::new(HashMap::new()),
            core: self.inner.core.clone(),
            weak_self: weak.clone(),
        });
        parent.inner.children.borrow_mut().push(inner.clone());
        Scope { inner }
    }

    pub(crate) fn from_inner(inner: Rc<ScopeInner>) -> Scope {
        Scope { inner }
    }

    // ── Identity ─────────────────────────────────────────────────────────────

    pub fn parent(&self) -> Option<Scope> {
        self.inner.parent.as_ref().and_then(Weak::upgrade).map(Scope::from_inner)
    }

    /// The root of this tree: identical for every scope in it.
    pub fn root_scope(&self) -> Scope {
        match self.inner.core.root.borrow().upgrade() {
            Some(inner) => Scope::from_inner(inner),
            None => self.clone(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn is_isolated(&self) -> bool {
        self.inner.isolated
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    // ── Data ─────────────────────────────────────────────────────────────────

    /// Read through the inheritance chain. `None` when no scope on the
    /// chain defines the name.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.inner.data.borrow().get(name) {
            return Some(v.clone());
        }
        let mut cursor = self.inner.inherit.clone();
        while let Some(weak) = cursor {
            let Some(scope) = weak.upgrade() else { break };
            if let Some(v) = scope.data.borrow().get(name) {
                return Some(v.clone());
            }
            cursor = scope.inherit.clone();
        }
        None
    }

    /// Convenience read: `Undefined` when absent.
    pub fn get(&self, name: &str) -> Value {
        self.lookup(name).unwrap_or(Value::Undefined)
    }

    /// Write an attribute on this scope, shadowing any inherited value.
    pub fn set(&self, name: &str, value: Value) {
        self.inner.data.borrow_mut().insert(name.to_string(), value);
    }

    /// The nearest scope on the inheritance chain that already owns `name`.
    pub(crate) fn find_owner(&self, name: &str) -> Option<Scope> {
        if self.inner.data.borrow().contains_key(name) {
            return Some(self.clone());
        }
        let mut cursor = self.inner.inherit.clone();
        while let Some(weak) = cursor {
            let Some(inner) = weak.upgrade() else { break };
            if inner.data.borrow().contains_key(name) {
                return Some(Scope::from_inner(inner));
            }
            cursor = inner.inherit.clone();
        }
        None
    }

    /// The scope's own attribute mapping, as a value (`this`).
    pub(crate) fn data_object(&self) -> value::Object {
        self.inner.data.clone()
    }

    // ── Filters ──────────────────────────────────────────────────────────────

    /// Install a filter usable by every expression compiled for this tree.
    pub fn register_filter(
        &self,
        name: &str,
        f: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    ) {
        let func: Rc<FilterFn> = Rc::new(f);
        self.inner.core.filters.borrow_mut().register(name, || func);
    }

    /// Access the registry for the batch and stateful registration forms.
    pub fn filters(&self) -> Rc<RefCell<FilterRegistry>> {
        self.inner.core.filters.clone()
    }

    // ── Evaluation ───────────────────────────────────────────────────────────

    /// Compile (or fetch from the per-tree cache) an expression.
    pub fn compile(&self, src: &str) -> Result<CompiledExpr, Vec<crate::error::Error>> {
        if let Some(hit) = self.inner.core.cache.borrow().get(src) {
            return Ok(hit.clone());
        }
        let compiled = CompiledExpr::compile(src, self.inner.core.filters.clone())?;
        self.inner
            .core
            .cache
            .borrow_mut()
            .insert(src.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Evaluate an expression against this scope.
    pub fn eval(&self, src: &str) -> Result<Value, WeftError> {
        let compiled = self.compile(src)?;
        Ok(compiled.eval(self)?)
    }

    /// Evaluate with a per-call overlay consulted before the scope when
    /// resolving the leading identifier of a path. Must be an object value.
    pub fn eval_with(&self, src: &str, locals: &Value) -> Result<Value, WeftError> {
        let compiled = self.compile(src)?;
        Ok(compiled.eval_with(self, locals)?)
    }

    /// Run an expression in the apply phase, then digest from the root.
    /// Evaluation faults are reported to the sink, not returned; scheduler
    /// errors surface.
    pub fn apply(&self, src: &str) -> Result<Value, WeftError> {
        let compiled = self.compile(src)?;
        self.apply_fn(move |scope| compiled.eval(scope)).map_err(WeftError::from)
    }

    /// [`Scope::apply`] for a native closure.
    pub fn apply_fn(
        &self,
        f: impl FnOnce(&Scope) -> Result<Value, EvalError>,
    ) -> Result<Value, DigestError> {
        let core = &self.inner.core;
        let phase = core.phase.get();
        if phase != Phase::Idle {
            return Err(DigestError::PhaseInProgress { phase: phase.name() });
        }
        core.phase.set(Phase::Apply);
        let result = match f(self) {
            Ok(v) => v,
            Err(e) => {
                core.report(&e, "apply");
                Value::Undefined
            }
        };
        core.phase.set(Phase::Idle);
        self.root_scope().digest()?;
        Ok(result)
    }

    /// Queue an expression to run inside the current digest (or a deferred
    /// one when idle). Tasks run before the next round of dirty checking.
    pub fn eval_async(&self, src: &str) -> Result<(), WeftError> {
        let compiled = self.compile(src)?;
        self.eval_async_work(Work::Expr(compiled));
        Ok(())
    }

    /// [`Scope::eval_async`] for a native closure.
    pub fn eval_async_fn(&self, f: impl FnOnce(&Scope) -> Result<Value, EvalError> + 'static) {
        self.eval_async_work(Work::Func(Box::new(f)));
    }

    fn eval_async_work(&self, work: Work) {
        let core = &self.inner.core;
        if core.phase.get() == Phase::Idle && core.async_queue.borrow().is_empty() {
            self.schedule_deferred(Deferred::Digest);
        }
        core.async_queue
            .borrow_mut()
            .push_back(AsyncTask { scope: self.clone(), work });
    }

    /// Queue an expression to be applied later, coalescing with other
    /// pending applications into a single digest.
    pub fn apply_async(&self, src: &str) -> Result<(), WeftError> {
        let compiled = self.compile(src)?;
        self.apply_async_work(Work::Expr(compiled));
        Ok(())
    }

    /// [`Scope::apply_async`] for a native closure.
    pub fn apply_async_fn(&self, f: impl FnOnce(&Scope) -> Result<Value, EvalError> + 'static) {
        self.apply_async_work(Work::Func(Box::new(f)));
    }

    fn apply_async_work(&self, work: Work) {
        let core = &self.inner.core;
        core.apply_async_queue
            .borrow_mut()
            .push_back(AsyncTask { scope: self.clone(), work });
        if !core.apply_async_scheduled.replace(true) {
            self.schedule_deferred(Deferred::ApplyAsyncFlush);
        }
    }

    /// Run `f` after the current (or next) digest settles. Never schedules
    /// anything on its own.
    pub fn post_digest(&self, f: impl FnOnce() -> Result<(), EvalError> + 'static) {
        self.inner
            .core
            .post_digest_queue
            .borrow_mut()
            .push_back(Box::new(f));
    }

    fn schedule_deferred(&self, kind: Deferred) {
        let core = &self.inner.core;
        if !core.deferred.borrow().contains(&kind) {
            core.deferred.borrow_mut().push_back(kind);
        }
    }

    /// Drain the deferred-task queue: the embedder's event loop calls this
    /// where a host runtime would fire zero-delay timers.
    pub fn flush_deferred(&self) {
        loop {
            let next = self.inner.core.deferred.borrow_mut().pop_front();
            let Some(kind) = next else { break };
            match kind {
                Deferred::Digest => {
                    let core = &self.inner.core;
                    if core.phase.get() == Phase::Idle {
                        if let Err(e) = self.root_scope().digest() {
                            core.report(&EvalError::msg(e.to_string()), "deferred digest");
                        }
                    }
                }
                Deferred::ApplyAsyncFlush => {
                    if self.inner.core.apply_async_scheduled.replace(false) {
                        let root = self.root_scope();
                        let result = root.apply_fn(|scope| {
                            digest::flush_apply_async_queue(&scope.inner.core);
                            Ok(Value::Undefined)
                        });
                        if let Err(e) = result {
                            self.inner
                                .core
                                .report(&EvalError::msg(e.to_string()), "apply_async flush");
                        }
                    }
                }
            }
        }
    }

    /// True when a deferred task is pending. Useful to drive test loops.
    pub fn has_deferred(&self) -> bool {
        !self.inner.core.deferred.borrow().is_empty()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Remove this scope from the tree: broadcasts `$destroy`, detaches from
    /// the parent, and drops watchers and listeners. The root is
    /// indestructible; destroying it is a no-op.
    pub fn destroy(&self) {
        if self.is_root() || self.inner.destroyed.get() {
            return;
        }
        self.broadcast("$destroy", &[]);
        self.inner.destroyed.set(true);

        if let Some(parent) = self.parent() {
            parent
                .inner
                .children
                .borrow_mut()
                .retain(|c| !Rc::ptr_eq(c, &self.inner));
        }

        self.inner.watchers.borrow_mut().clear();
        self.inner.listeners.borrow_mut().clear();
        self.inner.children.borrow_mut().clear();
    }
}
