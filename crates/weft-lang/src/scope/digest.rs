//! The fixed-point dirty-check scheduler.
//!
//! One digest = repeated passes over the subtree's watchers until a pass
//! finds nothing changed and the async queue is empty, bounded by the TTL.
//! User callbacks never abort a digest; their faults go to the sink.

use std::ops::ControlFlow;
use std::rc::Rc;

use crate::error::DigestError;
use crate::runtime::value::deep_clone;
use crate::scope::{Deferred, Phase, RootCore, Scope, ScopeInner};

impl Scope {
    /// Run the dirty-check loop over this scope's subtree until quiescent.
    ///
    /// Watcher evaluation order is deterministic: scopes pre-order, watchers
    /// within a scope in reverse registration order. A round that changes
    /// nothing up to the last watcher known dirty short-circuits the rest of
    /// the walk.
    pub fn digest(&self) -> Result<(), DigestError> {
        let core = self.inner.core.clone();

        let phase = core.phase.get();
        if phase != Phase::Idle {
            return Err(DigestError::PhaseInProgress { phase: phase.name() });
        }
        core.phase.set(Phase::Digest);
        *core.last_dirty.borrow_mut() = None;

        // a pending coalesced apply-async flush is preempted: cancel the
        // timer and absorb its queue into this digest
        if core.apply_async_scheduled.replace(false) {
            core.deferred.borrow_mut().retain(|d| *d != Deferred::ApplyAsyncFlush);
            flush_apply_async_queue(&core);
        }

        // `ttl` dirty rounds are allowed; a round past that fails
        let mut ttl = core.ttl;
        loop {
            loop {
                let task = core.async_queue.borrow_mut().pop_front();
                let Some(task) = task else { break };
                if let Err(e) = task.run() {
                    core.report(&e, "eval_async task");
                }
                *core.last_dirty.borrow_mut() = None;
            }

            let dirty = digest_once(self, &core);

            let pending = dirty || !core.async_queue.borrow().is_empty();
            if !pending {
                break;
            }
            if ttl == 0 {
                core.phase.set(Phase::Idle);
                return Err(DigestError::TtlExceeded { ttl: core.ttl });
            }
            ttl -= 1;
        }
        core.phase.set(Phase::Idle);

        loop {
            let task = core.post_digest_queue.borrow_mut().pop_front();
            let Some(task) = task else { break };
            if let Err(e) = task() {
                core.report(&e, "post_digest task");
            }
        }

        Ok(())
    }
}

/// One pass over the subtree. Returns whether any watcher changed.
fn digest_once(target: &Scope, core: &Rc<RootCore>) -> bool {
    let mut dirty = false;
    let _ = visit(&target.inner, core, &mut dirty);
    dirty
}

fn visit(scope: &Rc<ScopeInner>, core: &Rc<RootCore>, dirty: &mut bool) -> ControlFlow<()> {
    if scope.destroyed.get() {
        return ControlFlow::Continue(());
    }
    let handle = Scope::from_inner(scope.clone());

    // Reverse iteration over a prepend-ordered deque: watchers registered
    // during this pass land in front of the cursor and wait for the next
    // round; removing the current watcher shifts nothing we still have to
    // visit.
    let mut length = scope.watchers.borrow().len();
    while length > 0 {
        length -= 1;
        let watcher = scope.watchers.borrow().get(length).cloned();
        let Some(watcher) = watcher else { continue };

        match (watcher.watch)(&handle) {
            Ok(value) => {
                let last = watcher.last.borrow().clone();
                let changed = match &last {
                    None => true,
                    Some(old) => !watcher.same(&value, old),
                };
                if changed {
                    *core.last_dirty.borrow_mut() = Some(watcher.clone());
                    *dirty = true;
                    // the first firing reports the new value as both sides
                    let old_value = last.unwrap_or_else(|| value.clone());
                    *watcher.last.borrow_mut() = Some(if watcher.value_eq {
                        deep_clone(&value)
                    } else {
                        value.clone()
                    });
                    let result = {
                        let mut listener = watcher.listener.borrow_mut();
                        (*listener)(&value, &old_value, &handle)
                    };
                    if let Err(e) = result {
                        core.report(&e, &watcher.context);
                    }
                } else if is_last_dirty(core, &watcher) {
                    // nothing past this point changed last round either
                    return ControlFlow::Break(());
                }
            }
            Err(e) => core.report(&e, &watcher.context),
        }
    }

    let children: Vec<Rc<ScopeInner>> = scope.children.borrow().clone();
    for child in children {
        visit(&child, core, dirty)?;
    }
    ControlFlow::Continue(())
}

fn is_last_dirty(core: &Rc<RootCore>, watcher: &Rc<crate::scope::watch::Watcher>) -> bool {
    core.last_dirty
        .borrow()
        .as_ref()
        .is_some_and(|w| Rc::ptr_eq(w, watcher))
}

/// Run every queued apply-async task, reporting faults. Used both by the
/// deferred flush and by a digest that preempts it.
pub(crate) fn flush_apply_async_queue(core: &Rc<RootCore>) {
    loop {
        let task = core.apply_async_queue.borrow_mut().pop_front();
        let Some(task) = task else { break };
        if let Err(e) = task.run() {
            core.report(&e, "apply_async task");
        }
    }
}
