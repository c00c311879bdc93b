//! Sender-side table of requests awaiting an answer.
//!
//! ```text
//! insert(id)  -> PendingHandle ----- wait() ----+--> answer (Response / RequestError / Disconnected)
//!                                               +--> deadline elapsed: entry removed, Error::Timeout
//!                                               +--> cancellation fired: entry removed, Error::Cancelled
//! complete(id, answer): removes the entry and wakes the waiter, a second answer for the same id is a no-op
//! ```
//!
//! Deadlines are tokio timers (one per waiter), nothing ever scans the table for expired entries.

use crate::Error;
use crate::connection::ConnectionId;
use ocpp_frame::{Action, RequestErrorFrame, RequestId, ResponseFrame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub enum PendingAnswer {
    Response(ResponseFrame),
    RequestError(RequestErrorFrame),
    /// Connection the request was sent over went away.
    Disconnected,
}

struct PendingEntry {
    generation: u64,
    action: Action,
    connection: ConnectionId,
    done_tx: oneshot::Sender<PendingAnswer>,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<RequestId, PendingEntry>>,
    next_generation: AtomicU64,
}

#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Inner>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` as awaiting an answer until `deadline`.
    pub fn insert(
        &self,
        id: RequestId,
        action: Action,
        connection: ConnectionId,
        deadline: Instant,
    ) -> Result<PendingHandle, Error> {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            return Err(Error::DuplicateRequestId(id));
        }
        let (done_tx, done_rx) = oneshot::channel();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        trace!("pending {action} '{id}' over {connection}");
        entries.insert(
            id.clone(),
            PendingEntry {
                generation,
                action,
                connection,
                done_tx,
            },
        );
        Ok(PendingHandle {
            id,
            generation,
            deadline,
            done_rx,
            table: self.clone(),
        })
    }

    /// Delivers the answer for `id`. Returns false if nothing was waiting for it.
    pub fn complete(&self, id: &RequestId, answer: PendingAnswer) -> bool {
        let entry = self.lock().remove(id);
        match entry {
            Some(entry) => {
                trace!("completing {} '{id}'", entry.action);
                if entry.done_tx.send(answer).is_err() {
                    debug!("waiter of {} '{id}' is gone", entry.action);
                }
                true
            }
            None => {
                warn!("no pending request '{id}', late or duplicate answer ignored");
                false
            }
        }
    }

    /// Fails every request sent over `connection` with [PendingAnswer::Disconnected].
    pub fn cancel_connection(&self, connection: ConnectionId) -> usize {
        let drained: Vec<(RequestId, PendingEntry)> = {
            let mut entries = self.lock();
            let ids: Vec<RequestId> = entries
                .iter()
                .filter(|(_, entry)| entry.connection == connection)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };
        let count = drained.len();
        for (id, entry) in drained {
            trace!("canceling {} '{id}'", entry.action);
            _ = entry.done_tx.send(PendingAnswer::Disconnected);
        }
        count
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes the entry only if it is still the one registered by the handle of `generation`.
    fn remove_generation(&self, id: &RequestId, generation: u64) -> bool {
        let mut entries = self.lock();
        match entries.get(id) {
            Some(entry) if entry.generation == generation => {
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, PendingEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Waiting side of one pending request. Dropping it removes the entry.
pub struct PendingHandle {
    id: RequestId,
    generation: u64,
    deadline: Instant,
    done_rx: oneshot::Receiver<PendingAnswer>,
    table: PendingRequests,
}

enum Wake {
    Answer(Result<PendingAnswer, oneshot::error::RecvError>),
    Deadline,
    Cancelled,
}

impl PendingHandle {
    pub fn request_id(&self) -> &RequestId {
        &self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub async fn wait(mut self, cancellation: &CancellationToken) -> Result<PendingAnswer, Error> {
        let wake = tokio::select! {
            biased;
            answer = &mut self.done_rx => Wake::Answer(answer),
            _ = tokio::time::sleep_until(self.deadline) => Wake::Deadline,
            _ = cancellation.cancelled() => Wake::Cancelled,
        };
        match wake {
            Wake::Answer(Ok(answer)) => Ok(answer),
            Wake::Answer(Err(_)) => Err(Error::Disconnected),
            Wake::Deadline | Wake::Cancelled => {
                if !self.table.remove_generation(&self.id, self.generation) {
                    // completed concurrently, the answer reached the table first
                    if let Ok(answer) = self.done_rx.try_recv() {
                        return Ok(answer);
                    }
                }
                if matches!(wake, Wake::Deadline) {
                    debug!("request '{}' timed out", self.id);
                    Err(Error::Timeout)
                } else {
                    debug!("request '{}' cancelled", self.id);
                    Err(Error::Cancelled)
                }
            }
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        self.table.remove_generation(&self.id, self.generation);
    }
}
