//! Ordered listener lists with snapshot-then-iterate fan-out.
//!
//! Every observer family (request received, response sent, request sent, response received)
//! and every handler list is a [Registry]. Registration never blocks an in-flight fan-out: a
//! fan-out works on a snapshot taken when it starts, so a listener added mid-dispatch is only
//! seen by the next one.

use crate::panic_message;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, trace};

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Asynchronous observer of events of type `E`.
pub type Listener<E> =
    dyn Fn(Arc<E>) -> BoxFuture<'static, Result<(), ListenerError>> + Send + Sync;

/// Identifies a registration, used to remove it again.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct Registry<F: ?Sized> {
    entries: RwLock<Vec<(ListenerId, Arc<F>)>>,
}

impl<F: ?Sized> Default for Registry<F> {
    fn default() -> Self {
        Registry {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> Registry<F> {
    pub fn add(&self, f: Arc<F>) -> ListenerId {
        let id = ListenerId::next();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, f));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let len_before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != len_before
    }

    /// Registered entries in registration order.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, f)| f.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Send + Sync + 'static> Registry<Listener<E>> {
    pub fn subscribe<L, Fut>(&self, listener: L) -> ListenerId
    where
        L: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        self.add(Arc::new(
            move |event: Arc<E>| -> BoxFuture<'static, Result<(), ListenerError>> {
                Box::pin(listener(event))
            },
        ))
    }

    /// Invokes all listeners concurrently and waits for all of them.
    ///
    /// A listener returning an error or panicking is reported to `errors` under `origin`,
    /// other listeners and the caller are unaffected.
    pub async fn notify(&self, event: Arc<E>, errors: &ErrorSink, origin: &str) {
        let listeners = self.snapshot();
        if listeners.is_empty() {
            return;
        }
        trace!("{origin}: notifying {} listener(s)", listeners.len());
        let results = join_all(listeners.into_iter().map(|listener| {
            let event = event.clone();
            AssertUnwindSafe(async move { listener(event).await }).catch_unwind()
        }))
        .await;
        for result in results {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.report(origin, e.to_string()),
                Err(panic) => errors.report(origin, panic_message(panic)),
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct ErrorReport {
    pub timestamp: DateTime<Utc>,
    /// Which pipeline stage or event family failed, e.g. `Heartbeat.OnRequestReceived`.
    pub origin: String,
    pub message: String,
}

pub type ErrorListener = dyn Fn(&ErrorReport) + Send + Sync;

/// Generic sink for failures that must never reach the remote peer.
#[derive(Default)]
pub struct ErrorSink {
    listeners: Registry<ErrorListener>,
}

impl ErrorSink {
    pub fn subscribe(&self, listener: impl Fn(&ErrorReport) + Send + Sync + 'static) -> ListenerId {
        self.listeners.add(Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn report(&self, origin: &str, message: impl Into<String>) {
        let report = ErrorReport {
            timestamp: Utc::now(),
            origin: origin.to_owned(),
            message: message.into(),
        };
        error!("{}: {}", report.origin, report.message);
        for listener in self.listeners.snapshot() {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(&report))).is_err() {
                error!("error listener panicked while handling a report from {origin}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn failing_listener_is_isolated() {
        let registry: Registry<Listener<u32>> = Registry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        registry.subscribe(move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<(), ListenerError>(())
            }
        });
        registry.subscribe(|_| async {
            let broken: Result<(), ListenerError> = Err("listener broke".into());
            broken
        });
        registry.subscribe(|event| async move {
            if *event > 0 {
                panic!("listener panicked");
            }
            Ok::<(), ListenerError>(())
        });
        let c = calls.clone();
        registry.subscribe(move |event| {
            let c = c.clone();
            async move {
                c.fetch_add(*event as usize, Ordering::SeqCst);
                Ok::<(), ListenerError>(())
            }
        });

        let errors = ErrorSink::default();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let r = reports.clone();
        errors.subscribe(move |report| r.lock().unwrap().push(report.message.clone()));

        registry.notify(Arc::new(10), &errors, "Test.OnEvent").await;
        assert_eq!(calls.load(Ordering::SeqCst), 11);
        let reports = reports.lock().unwrap();
        assert_eq!(
            *reports,
            vec!["listener broke".to_owned(), "listener panicked".to_owned()]
        );
    }

    #[test]
    fn remove_by_id() {
        let registry: Registry<Listener<()>> = Registry::default();
        let a = registry.subscribe(|_| async { Ok::<(), ListenerError>(()) });
        let b = registry.subscribe(|_| async { Ok::<(), ListenerError>(()) });
        assert_ne!(a, b);
        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(registry.len(), 1);
    }
}
