//! Load-shedding middleware for operations.
//!
//! Two limits are checked before an operation runs, and an operation over
//! either one fails with `OperationError::Overloaded` instead of queueing:
//! - a global cap on concurrent operations (`max_concurrent_operations`);
//! - a cap per credential (`max_concurrent_per_credential`), so one client
//!   flooding the gateway cannot take every global slot.
//!
//! The per-credential count is keyed by [`Credential::fingerprint`] of the
//! credential bound in the [`CredentialContext`] when the operation is
//! dispatched. Operations with no bound credential only count globally.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tollgate_core::{Credential, CredentialContext};
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing the global and per-credential concurrency caps.
///
/// Clones share both counters.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    global: Arc<Semaphore>,
    per_credential: Arc<CredentialSlots>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32, max_per_credential: u32) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_concurrent as usize)),
            per_credential: Arc::new(CredentialSlots {
                limit: max_per_credential,
                in_use: DashMap::new(),
            }),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            global: Arc::clone(&self.global),
            per_credential: Arc::clone(&self.per_credential),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-credential slots
// ---------------------------------------------------------------------------

/// In-use operation counts by credential fingerprint. Entries are removed
/// when their count drops back to zero.
#[derive(Debug)]
struct CredentialSlots {
    limit: u32,
    in_use: DashMap<String, u32>,
}

impl CredentialSlots {
    fn try_acquire(self: &Arc<Self>, credential: &Credential) -> Option<CredentialSlot> {
        let key = credential.fingerprint();
        {
            let mut count = self.in_use.entry(key.clone()).or_insert(0);
            if *count >= self.limit {
                return None;
            }
            *count += 1;
        }
        Some(CredentialSlot {
            slots: Arc::clone(self),
            key,
        })
    }

    fn release(&self, key: &str) {
        if let Some(mut count) = self.in_use.get_mut(key) {
            *count = count.saturating_sub(1);
        }
        self.in_use.remove_if(key, |_, count| *count == 0);
    }
}

/// Held for the lifetime of one operation; dropping it (on completion or
/// cancellation) frees the slot.
struct CredentialSlot {
    slots: Arc<CredentialSlots>,
    key: String,
}

impl Drop for CredentialSlot {
    fn drop(&mut self) {
        self.slots.release(&self.key);
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    global: Arc<Semaphore>,
    per_credential: Arc<CredentialSlots>,
}

impl<S> LoadShedService<S> {
    fn admit(&self) -> Result<(OwnedSemaphorePermit, Option<CredentialSlot>), &'static str> {
        let permit = Arc::clone(&self.global)
            .try_acquire_owned()
            .map_err(|_| "global")?;
        let slot = match CredentialContext::current() {
            Some(credential) => Some(
                self.per_credential
                    .try_acquire(&credential)
                    .ok_or("credential")?,
            ),
            None => None,
        };
        Ok((permit, slot))
    }
}

impl<S> Service<Operation> for LoadShedService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let admitted = match self.admit() {
            Ok(admitted) => admitted,
            Err(scope) => {
                warn!(
                    scope,
                    service = op.ctx().service_name,
                    call_id = op.ctx().call_id,
                    "Operation shed"
                );
                metrics::counter!("tollgate_operations_shed_total", "scope" => scope).increment(1);
                return Box::pin(async { Err(OperationError::Overloaded) });
            }
        };

        let fut = self.inner.call(op);
        Box::pin(async move {
            let _admitted = admitted;
            fut.await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::OperationContext;

    /// Service that holds for a configurable duration.
    #[derive(Clone)]
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<Operation> for SlowService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _op: Operation) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(OperationResponse::Empty)
            })
        }
    }

    fn make_op() -> Operation {
        Operation::Ping {
            ctx: OperationContext::new(1, "test", 5000),
        }
    }

    fn credential(raw: &str) -> Option<Credential> {
        Credential::parse(raw)
    }

    /// Dispatches one operation with `raw` bound as the request credential.
    fn call_as(
        svc: &mut LoadShedService<SlowService>,
        raw: Option<&str>,
    ) -> <LoadShedService<SlowService> as Service<Operation>>::Future {
        let _bound = CredentialContext::scoped(raw.and_then(credential));
        svc.call(make_op())
    }

    #[tokio::test]
    async fn allows_operations_under_limit() {
        let svc = LoadShedLayer::new(10, 10).layer(SlowService { delay_ms: 1 });
        let resp = svc.oneshot(make_op()).await.unwrap();
        assert!(matches!(resp, OperationResponse::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_when_globally_overloaded() {
        let mut svc = LoadShedLayer::new(1, 10).layer(SlowService { delay_ms: 500 });

        let first = tokio::spawn(call_as(&mut svc, Some("alice")));
        let err = call_as(&mut svc, Some("bob")).await.unwrap_err();
        assert!(matches!(err, OperationError::Overloaded));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn one_credential_cannot_take_every_slot() {
        let mut svc = LoadShedLayer::new(10, 2).layer(SlowService { delay_ms: 500 });

        let a1 = tokio::spawn(call_as(&mut svc, Some("alice")));
        let a2 = tokio::spawn(call_as(&mut svc, Some("alice")));
        let err = call_as(&mut svc, Some("alice")).await.unwrap_err();
        assert!(matches!(err, OperationError::Overloaded));

        // Other credentials and unbound operations still get through.
        assert!(call_as(&mut svc, Some("bob")).await.is_ok());
        assert!(call_as(&mut svc, None).await.is_ok());

        assert!(a1.await.unwrap().is_ok());
        assert!(a2.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn credential_rejection_returns_the_global_permit() {
        let mut svc = LoadShedLayer::new(2, 1).layer(SlowService { delay_ms: 500 });

        let held = tokio::spawn(call_as(&mut svc, Some("alice")));
        assert!(call_as(&mut svc, Some("alice")).await.is_err());
        // The rejected call must not have kept the second global permit.
        assert!(call_as(&mut svc, Some("bob")).await.is_ok());
        assert!(held.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn slots_are_released_after_completion() {
        let layer = LoadShedLayer::new(1, 1);
        let mut svc = layer.layer(SlowService { delay_ms: 1 });
        for _ in 0..3 {
            let resp = call_as(&mut svc, Some("alice")).await.unwrap();
            assert!(matches!(resp, OperationResponse::Empty));
        }
        assert!(layer.per_credential.in_use.is_empty());
        assert_eq!(layer.global.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_operation_frees_its_slot() {
        let layer = LoadShedLayer::new(1, 1);
        let mut svc = layer.layer(SlowService { delay_ms: 500 });

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), call_as(&mut svc, Some("alice"))).await;
        assert!(abandoned.is_err());

        assert!(layer.per_credential.in_use.is_empty());
        assert!(call_as(&mut svc, Some("alice")).await.is_ok());
    }
}
