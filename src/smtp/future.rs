/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::sync::Notify;

use crate::smtp::result::DeliveryResult;
use crate::Error;

type Listener = Box<dyn FnOnce(&[DeliveryResult]) + Send + 'static>;

struct Inner {
    result: Option<Vec<DeliveryResult>>,
    cancelled: bool,
    listeners: Vec<Listener>,
    wakers: Vec<Waker>,
}

pub(crate) struct FutureState {
    inner: Mutex<Inner>,
    expected: usize,
    cancel: Notify,
}

impl FutureState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Stores the result unless one was already set. The first setter wins;
    /// listeners and waiters are notified exactly once, in registration
    /// order.
    pub(crate) fn complete(&self, results: Vec<DeliveryResult>) -> bool {
        self.resolve(results, false)
    }

    fn resolve(&self, results: Vec<DeliveryResult>, cancelled: bool) -> bool {
        let (listeners, wakers) = {
            let mut inner = self.lock();
            if inner.result.is_some() {
                return false;
            }
            inner.result = Some(results.clone());
            inner.cancelled = cancelled;
            (
                std::mem::take(&mut inner.listeners),
                std::mem::take(&mut inner.wakers),
            )
        };
        for listener in listeners {
            listener(&results);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Resolves once the future has been cancelled. Used by the delivery
    /// task to tear the connection down.
    pub(crate) async fn cancelled(&self) {
        self.cancel.notified().await;
    }
}

/// One-shot handle to the outcome of a spawned delivery. The handle is a
/// future yielding one [`DeliveryResult`] per envelope; completion listeners
/// may be registered from any thread, and the delivery can be cancelled
/// while it is still in flight.
#[derive(Clone)]
pub struct DeliveryFuture {
    state: Arc<FutureState>,
}

impl DeliveryFuture {
    pub(crate) fn new(expected: usize) -> Self {
        DeliveryFuture {
            state: Arc::new(FutureState {
                inner: Mutex::new(Inner {
                    result: None,
                    cancelled: false,
                    listeners: Vec::new(),
                    wakers: Vec::new(),
                }),
                expected,
                cancel: Notify::new(),
            }),
        }
    }

    pub(crate) fn shared(&self) -> Arc<FutureState> {
        self.state.clone()
    }

    /// Returns `true` once a result has been set.
    pub fn is_done(&self) -> bool {
        self.state.lock().result.is_some()
    }

    /// Returns `true` if the future was resolved by cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Registers a completion listener. Listeners are invoked exactly once,
    /// in registration order; a listener registered after completion runs
    /// synchronously.
    pub fn on_complete(&self, listener: impl FnOnce(&[DeliveryResult]) + Send + 'static) {
        let mut inner = self.state.lock();
        match &inner.result {
            Some(results) => {
                let results = results.clone();
                drop(inner);
                listener(&results);
            }
            None => {
                inner.listeners.push(Box::new(listener));
            }
        }
    }

    /// Cancels the delivery. Succeeds only while no result has been set:
    /// every envelope resolves to `Failed(Cancelled)` and the session is
    /// closed. Returns `false` when the delivery already completed.
    pub fn cancel(&self) -> bool {
        let err = Arc::new(Error::Cancelled);
        let results = (0..self.state.expected)
            .map(|_| DeliveryResult::Failed(err.clone()))
            .collect();
        if self.state.resolve(results, true) {
            self.state.cancel.notify_one();
            true
        } else {
            false
        }
    }

    /// Waits for completion, failing with [`Error::Timeout`] when the
    /// results do not arrive in time.
    pub async fn wait_timeout(&self, duration: Duration) -> crate::Result<Vec<DeliveryResult>> {
        tokio::time::timeout(duration, self.clone())
            .await
            .map_err(|_| Error::Timeout)
    }
}

impl Future for DeliveryFuture {
    type Output = Vec<DeliveryResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.state.lock();
        match &inner.result {
            Some(results) => Poll::Ready(results.clone()),
            None => {
                inner.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::DeliveryFuture;
    use crate::smtp::result::{DeliveryResult, RecipientStatus};
    use crate::proto::response::Response;
    use crate::Error;

    fn delivered() -> DeliveryResult {
        DeliveryResult::Delivered(vec![RecipientStatus::new(
            "jane@example.com".to_string(),
            Response::new(250, vec!["accepted".to_string()]),
        )])
    }

    #[test]
    fn first_setter_wins() {
        let future = DeliveryFuture::new(1);
        assert!(!future.is_done());
        assert!(future.shared().complete(vec![delivered()]));
        assert!(future.is_done());
        assert!(!future.shared().complete(vec![delivered()]));
        assert!(!future.cancel());
        assert!(!future.is_cancelled());
    }

    #[test]
    fn listeners_run_once_in_order() {
        let future = DeliveryFuture::new(1);
        let order = Arc::new(AtomicUsize::new(0));

        let first = order.clone();
        future.on_complete(move |_| {
            assert_eq!(first.fetch_add(1, Ordering::SeqCst), 0);
        });
        let second = order.clone();
        future.on_complete(move |_| {
            assert_eq!(second.fetch_add(1, Ordering::SeqCst), 1);
        });

        future.shared().complete(vec![delivered()]);
        assert_eq!(order.load(Ordering::SeqCst), 2);

        // Registered after completion, runs synchronously
        let third = order.clone();
        future.on_complete(move |results| {
            assert_eq!(results.len(), 1);
            third.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(order.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancel_resolves_every_envelope() {
        let future = DeliveryFuture::new(3);
        assert!(future.cancel());
        assert!(future.is_done());
        assert!(future.is_cancelled());

        let results = {
            let shared = future.shared();
            let inner = shared.lock();
            inner.result.clone().unwrap()
        };
        assert_eq!(results.len(), 3);
        for result in &results {
            assert!(matches!(result.error(), Some(Error::Cancelled)));
        }
    }

    #[tokio::test]
    async fn await_and_timeout() {
        let future = DeliveryFuture::new(1);
        assert!(matches!(
            future.wait_timeout(Duration::from_millis(50)).await,
            Err(Error::Timeout)
        ));

        let state = future.shared();
        let waiter = tokio::spawn(future.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.complete(vec![delivered()]);

        let results = waiter.await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());
    }
}
