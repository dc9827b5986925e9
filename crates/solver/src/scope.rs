//! Thread-local ambient context.
//!
//! Entering installs a context as the current thread's ambient one and
//! returns a guard that puts the previous value back when dropped, whether
//! the scope is left normally or by unwinding. Each thread has its own slot.

use std::cell::RefCell;

use crate::context::Context;
use crate::error::SolverError;

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// Restores the previously installed context on drop.
#[must_use = "the context is uninstalled as soon as the guard is dropped"]
pub struct ScopeGuard {
    /// `None` once restored, or when the thread-local was unavailable.
    previous: Option<Option<Context>>,
}

/// Install `ctx` as the current thread's ambient context.
pub fn enter(ctx: &Context) -> ScopeGuard {
    let previous = CURRENT
        .try_with(|slot| slot.borrow_mut().replace(ctx.clone()))
        .ok();
    tracing::trace!(nested = matches!(previous, Some(Some(_))), "entered context scope");
    ScopeGuard { previous }
}

/// The innermost installed context.
pub fn current() -> Result<Context, SolverError> {
    CURRENT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
        .ok_or(SolverError::NoAmbientContext)
}

pub fn has_current() -> bool {
    CURRENT
        .try_with(|slot| slot.borrow().is_some())
        .unwrap_or(false)
}

/// Run `f` against the current context.
pub fn with_current<T>(f: impl FnOnce(&Context) -> T) -> Result<T, SolverError> {
    let ctx = current()?;
    Ok(f(&ctx))
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        // The exiting context is dropped outside the borrow: it may be the
        // last handle, and teardown must not run with the slot borrowed.
        let exiting = CURRENT
            .try_with(|slot| std::mem::replace(&mut *slot.borrow_mut(), previous))
            .ok()
            .flatten();
        drop(exiting);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use smtguard_native::reference::ReferenceEngine;

    use super::*;

    fn ctx() -> Context {
        Context::with_defaults(Arc::new(ReferenceEngine::new())).unwrap()
    }

    #[test]
    fn no_context_by_default() {
        assert!(!has_current());
        assert_eq!(current().unwrap_err(), SolverError::NoAmbientContext);
        assert_eq!(
            with_current(|_| ()).unwrap_err(),
            SolverError::NoAmbientContext
        );
    }

    #[test]
    fn nesting_restores_outer() {
        let outer = ctx();
        let inner = ctx();
        let _g1 = enter(&outer);
        assert!(current().unwrap().ptr_eq(&outer));
        {
            let _g2 = inner.enter();
            assert!(Context::current().unwrap().ptr_eq(&inner));
        }
        assert!(current().unwrap().ptr_eq(&outer));
    }

    #[test]
    fn guard_restores_empty_slot() {
        let c = ctx();
        {
            let _g = enter(&c);
            assert!(has_current());
        }
        assert!(!has_current());
    }

    #[test]
    fn scope_holding_last_handle_tears_down_on_exit() {
        let engine = Arc::new(ReferenceEngine::new());
        let guard = {
            let c = Context::with_defaults(engine.clone()).unwrap();
            enter(&c)
        };
        assert_eq!(engine.live_engines(), 1);
        drop(guard);
        assert_eq!(engine.live_engines(), 0);
    }

    #[test]
    fn with_current_sees_installed_context() {
        let c = ctx();
        let _g = enter(&c);
        let tracked = with_current(|ctx| ctx.int_const("x").map(|_| ctx.tracked_handle_count()));
        assert!(tracked.unwrap().unwrap() > 0);
    }
}
