//! Request-scoped credential context.
//!
//! The credential that applies to the operation currently executing. The
//! value lives in a per-thread slot, but it is only ever meaningful for the
//! duration of a single job or a single poll: whoever installs a value also
//! removes it (see [`ContextGuard`]). Carrying the value across thread
//! hand-offs is the job of [`crate::propagation`].
//!
//! Three observable states:
//! - *unset*: nothing bound (single-credential mode, or outside a request);
//! - *set*: a credential is bound for the current unit of work;
//! - *cleared*: the unit of work finished and the slot was emptied, so the
//!   next job scheduled on the same worker starts from *unset*.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::types::Credential;

thread_local! {
    static CURRENT: RefCell<Option<Credential>> = const { RefCell::new(None) };
}

/// Accessor for the current request's credential.
pub struct CredentialContext;

impl CredentialContext {
    /// Binds `credential` on the calling unit of execution.
    pub fn set(credential: Credential) {
        CURRENT.with(|slot| *slot.borrow_mut() = Some(credential));
    }

    /// Returns the currently bound credential, if any.
    #[must_use]
    pub fn current() -> Option<Credential> {
        CURRENT.with(|slot| slot.borrow().clone())
    }

    /// Removes any bound credential.
    pub fn clear() {
        CURRENT.with(|slot| slot.borrow_mut().take());
    }

    /// Installs `value` and returns a guard that puts back whatever was bound
    /// before. Nested scopes unwind correctly.
    #[must_use = "the context is restored when the guard is dropped"]
    pub fn scoped(value: Option<Credential>) -> ContextGuard {
        let previous = replace(value);
        ContextGuard {
            restore: previous,
            _not_send: PhantomData,
        }
    }

    /// Installs `value` and returns a guard that clears the slot on drop,
    /// discarding whatever was bound before (a stale value left behind on a
    /// reused worker is never resurrected).
    #[must_use = "the context is cleared when the guard is dropped"]
    pub fn exclusive(value: Option<Credential>) -> ContextGuard {
        let _stale = replace(value);
        ContextGuard {
            restore: None,
            _not_send: PhantomData,
        }
    }
}

fn replace(value: Option<Credential>) -> Option<Credential> {
    CURRENT.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), value))
}

/// Drop guard returned by [`CredentialContext::scoped`] and
/// [`CredentialContext::exclusive`].
///
/// Drop runs on normal return, on early return via `?`, and during panic
/// unwinding, so the slot is always reset. The guard is `!Send`: it must be
/// dropped on the thread that created it.
#[derive(Debug)]
pub struct ContextGuard {
    restore: Option<Credential>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let restore = self.restore.take();
        let _ = replace(restore);
    }
}
