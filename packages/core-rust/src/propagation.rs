//! Carries the request credential across thread hand-offs.
//!
//! A worker drawn from a pool has no idea which request it is serving. The
//! credential therefore travels *with the unit of work*: it is captured where
//! work is handed off ([`ContextSnapshot::capture`]), installed immediately
//! before the work runs on whatever worker picks it up, and removed
//! immediately after. Nothing is inherited from the thread that created the
//! worker, so a pool's bootstrap thread (created with no request in flight)
//! behaves exactly like every other worker on every reuse.
//!
//! - [`ContextSnapshot::run`] wraps a synchronous job (restore, run, clear).
//! - [`ContextSnapshot::instrument`] wraps a future; the credential is
//!   installed around every single poll, so it follows the future when the
//!   runtime resumes it on a different worker and never lingers on a worker
//!   between polls. Dropping the future (cancellation) leaves nothing behind.
//! - [`spawn`] / [`spawn_blocking`] capture the caller's context and hand the
//!   work to tokio's worker and blocking pools.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::context::CredentialContext;
use crate::types::Credential;

/// The credential bound at a hand-off point, detached from any thread.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    credential: Option<Credential>,
}

impl ContextSnapshot {
    /// Captures whatever is bound on the calling thread right now.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            credential: CredentialContext::current(),
        }
    }

    /// A snapshot carrying `credential`, used where a request first acquires it.
    #[must_use]
    pub fn of(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
        }
    }

    /// A snapshot carrying no credential.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Runs a job on the current (possibly reused) worker with this snapshot
    /// installed, then clears the slot on every outcome, including panics.
    ///
    /// With an empty snapshot the job observes no credential and the worker is
    /// left exactly as empty as before.
    pub fn run<F, R>(&self, job: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = CredentialContext::exclusive(self.credential.clone());
        job()
    }

    /// Wraps `future` so that this snapshot is installed around every poll.
    pub fn instrument<F>(self, future: F) -> Propagated<F>
    where
        F: Future,
    {
        Propagated {
            snapshot: self,
            inner: Box::pin(future),
        }
    }
}

/// Future returned by [`ContextSnapshot::instrument`].
#[must_use = "futures do nothing unless polled"]
pub struct Propagated<F> {
    snapshot: ContextSnapshot,
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Propagated<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        // Scoped rather than exclusive: a propagated future polled from inside
        // another one must hand the outer value back when it yields.
        let _guard = CredentialContext::scoped(this.snapshot.credential.clone());
        this.inner.as_mut().poll(cx)
    }
}

/// Spawns `future` on the tokio runtime, carrying the caller's credential.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(ContextSnapshot::capture().instrument(future))
}

/// Runs `job` on tokio's blocking pool, carrying the caller's credential.
pub fn spawn_blocking<F, R>(job: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let snapshot = ContextSnapshot::capture();
    tokio::task::spawn_blocking(move || snapshot.run(job))
}
