//! Scope event bus: `on`, upward `emit`, downward `broadcast`.
//!
//! Removal nulls the listener slot in place; compaction happens only while
//! firing that event name, so a listener removing itself (or a neighbour)
//! mid-dispatch never causes the next listener to be skipped.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::EvalError;
use crate::runtime::value::Value;
use crate::scope::{Scope, ScopeInner};

pub type EventListenerFn = dyn FnMut(&Event, &[Value]) -> Result<(), EvalError>;

pub(crate) struct EventListener {
    func: RefCell<Box<EventListenerFn>>,
}

/// The record shared by every target of one dispatch.
pub struct Event {
    name: String,
    target: Scope,
    current: RefCell<Option<Scope>>,
    stopped: Cell<bool>,
    default_prevented: Cell<bool>,
}

impl Event {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope the event was emitted or broadcast from.
    pub fn target(&self) -> Scope {
        self.target.clone()
    }

    /// The scope currently being notified; `None` once propagation ended.
    pub fn current_scope(&self) -> Option<Scope> {
        self.current.borrow().clone()
    }

    /// Stop an upward `emit` at the current scope. Broadcasts ignore this.
    pub fn stop_propagation(&self) {
        self.stopped.set(true);
    }

    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }
}

/// Returned from [`Scope::on`]; `remove` nulls the registration in place.
#[derive(Clone)]
pub struct ListenerHandle {
    scope: Weak<ScopeInner>,
    name: String,
    listener: Weak<EventListener>,
}

impl ListenerHandle {
    pub fn remove(&self) {
        let (Some(scope), Some(listener)) = (self.scope.upgrade(), self.listener.upgrade())
        else {
            return;
        };
        let mut map = scope.listeners.borrow_mut();
        if let Some(slots) = map.get_mut(&self.name) {
            for slot in slots.iter_mut() {
                if slot.as_ref().is_some_and(|l| Rc::ptr_eq(l, &listener)) {
                    *slot = None;
                }
            }
        }
    }
}

impl Scope {
    /// Register an event listener on this scope.
    pub fn on(
        &self,
        name: &str,
        f: impl FnMut(&Event, &[Value]) -> Result<(), EvalError> + 'static,
    ) -> ListenerHandle {
        let listener = Rc::new(EventListener { func: RefCell::new(Box::new(f)) });
        self.inner
            .listeners
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push(Some(listener.clone()));
        ListenerHandle {
            scope: Rc::downgrade(&self.inner),
            name: name.to_string(),
            listener: Rc::downgrade(&listener),
        }
    }

    /// Dispatch upward: this scope first, then each ancestor to the root,
    /// honouring `stop_propagation`.
    pub fn emit(&self, name: &str, args: &[Value]) -> Rc<Event> {
        let event = new_event(name, self);
        let mut cursor = Some(self.clone());
        while let Some(scope) = cursor {
            *event.current.borrow_mut() = Some(scope.clone());
            fire(&scope, &event, args);
            if event.stopped.get() {
                break;
            }
            cursor = scope.parent();
        }
        *event.current.borrow_mut() = None;
        event
    }

    /// Dispatch downward, pre-order over the subtree. Not stoppable.
    pub fn broadcast(&self, name: &str, args: &[Value]) -> Rc<Event> {
        let event = new_event(name, self);
        broadcast_into(self, &event, args);
        *event.current.borrow_mut() = None;
        event
    }
}

fn new_event(name: &str, target: &Scope) -> Rc<Event> {
    Rc::new(Event {
        name: name.to_string(),
        target: target.clone(),
        current: RefCell::new(None),
        stopped: Cell::new(false),
        default_prevented: Cell::new(false),
    })
}

fn broadcast_into(scope: &Scope, event: &Rc<Event>, args: &[Value]) {
    *event.current.borrow_mut() = Some(scope.clone());
    fire(scope, event, args);
    let children: Vec<Rc<ScopeInner>> = scope.inner.children.borrow().clone();
    for child in children {
        broadcast_into(&Scope::from_inner(child), event, args);
    }
}

/// Call every live listener for the event's name on one scope. Slots nulled
/// by removal are compacted here; listeners added during the dispatch are
/// not called until the next one.
fn fire(scope: &Scope, event: &Rc<Event>, args: &[Value]) {
    let name = event.name.clone();
    let mut i = 0;
    let mut length = match scope.inner.listeners.borrow().get(&name) {
        Some(slots) => slots.len(),
        None => return,
    };

    while i < length {
        let listener = {
            let mut map = scope.inner.listeners.borrow_mut();
            let Some(slots) = map.get_mut(&name) else { break };
            if i >= slots.len() {
                break;
            }
            match &slots[i] {
                None => {
                    slots.remove(i);
                    length -= 1;
                    continue;
                }
                Some(listener) => listener.clone(),
            }
        };

        // a listener that re-emits its own event would re-enter itself;
        // skip the inner dispatch for that listener only
        let result = match listener.func.try_borrow_mut() {
            Ok(mut func) => (*func)(event, args),
            Err(_) => Ok(()),
        };
        if let Err(e) = result {
            scope
                .inner
                .core
                .report(&e, &format!("listener for event `{name}`"));
        }
        i += 1;
    }
}
