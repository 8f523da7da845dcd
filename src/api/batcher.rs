//! Request batching and backoff engine
//!
//! Serializes many independent remote calls into rate-limit-respecting batched
//! executions. Failed items are classified by status code: retryable errors
//! back off and re-enter the shared queue, unrecoverable ones resolve their
//! caller with `None`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::client::{ApiRequest, RemoteTransport};
use super::errors::ApiError;

/// Maximum number of requests per batched execution
pub const BATCH_SIZE: usize = 100;

/// Cap on the per-iteration wait
const MAXIMUM_BACKOFF: Duration = Duration::from_secs(60);

/// Quiet period after which the backoff multiplier resets
const BACKOFF_RESET: Duration = Duration::from_secs(60);

type Pending = (ApiRequest, oneshot::Sender<Option<Value>>);

struct Backoff {
    multiplier: u32,
    started: Instant,
    /// Set by a per-item failure; applied once per loop iteration, so a batch
    /// failing uniformly costs one backoff rather than one per item.
    backoff_now: bool,
}

impl Backoff {
    fn bump(&mut self) {
        self.started = Instant::now();
        self.multiplier += 1;
        warn!(
            seconds = 2u64
                .saturating_pow(self.multiplier)
                .min(MAXIMUM_BACKOFF.as_secs()),
            "Backing off"
        );
    }
}

struct Inner {
    transport: Arc<dyn RemoteTransport>,
    /// Persistent FIFO queue, shared by all producers and the consumer loop
    queue: Mutex<VecDeque<Pending>>,
    backoff: Mutex<Backoff>,
}

/// Accepts logical requests, groups them into bounded batches, executes them
/// against the transport and resolves each caller with its eventual result.
pub struct RequestBatcher {
    inner: Arc<Inner>,
}

impl RequestBatcher {
    /// Create a batcher and spawn its persistent consumer loop, which runs
    /// for the lifetime of the session.
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        let inner = Arc::new(Inner {
            transport,
            queue: Mutex::new(VecDeque::new()),
            backoff: Mutex::new(Backoff {
                multiplier: 0,
                started: Instant::now(),
                backoff_now: false,
            }),
        });

        let consumer = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                let queue = &consumer.queue;
                consumer.run_iteration(queue).await;
            }
        });

        Self { inner }
    }

    /// Queue a request and suspend until it resolves.
    ///
    /// `immediate` runs the request through a throwaway queue instead of the
    /// shared one — used when subsequent calls depend on the response, e.g.
    /// each page of a paginated listing. Returns `None` if the request failed
    /// unrecoverably.
    pub async fn submit(&self, request: ApiRequest, immediate: bool) -> Option<Value> {
        let (tx, rx) = oneshot::channel();

        if immediate {
            let queue = Mutex::new(VecDeque::from([(request, tx)]));
            while !queue.lock().unwrap().is_empty() {
                self.inner.run_iteration(&queue).await;
            }
        } else {
            self.inner.queue.lock().unwrap().push_back((request, tx));
        }

        rx.await.unwrap_or(None)
    }

    #[cfg(test)]
    pub(crate) fn backoff_multiplier(&self) -> u32 {
        self.inner.backoff.lock().unwrap().multiplier
    }
}

impl Inner {
    async fn run_iteration(&self, queue: &Mutex<VecDeque<Pending>>) {
        let backoff_requested = {
            let mut backoff = self.backoff.lock().unwrap();
            if backoff.backoff_now {
                backoff.backoff_now = false;
                backoff.bump();
                true
            } else {
                if backoff.started.elapsed() > BACKOFF_RESET {
                    backoff.multiplier = 0;
                }
                false
            }
        };
        if backoff_requested {
            self.wait_between_requests().await;
            return;
        }

        let batch: Vec<Pending> = {
            let mut q = queue.lock().unwrap();
            let take = q.len().min(BATCH_SIZE);
            q.drain(..take).collect()
        };

        if !batch.is_empty() {
            let requests: Vec<ApiRequest> = batch.iter().map(|(req, _)| req.clone()).collect();
            match self.transport.execute_batch(&requests).await {
                Ok(results) => {
                    debug!(
                        executed = batch.len(),
                        remaining = queue.lock().unwrap().len(),
                        "Queue status"
                    );
                    for ((request, sender), result) in batch.into_iter().zip(results) {
                        self.complete(request, sender, result);
                    }
                }
                Err(e) => {
                    // Whole batch failed in transport. Back off and put the
                    // prefix back in front of anything appended concurrently.
                    warn!(error = %e, "Error in request batching");
                    self.backoff.lock().unwrap().bump();
                    let mut q = queue.lock().unwrap();
                    for item in batch.into_iter().rev() {
                        q.push_front(item);
                    }
                }
            }
        }

        self.wait_between_requests().await;
    }

    fn complete(&self, request: ApiRequest, sender: oneshot::Sender<Option<Value>>, result: Result<Value, ApiError>) {
        match result {
            Ok(value) => {
                let _ = sender.send(Some(value));
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Retryable error, re-queueing request");
                // backoff once per batch, on the next iteration
                self.backoff.lock().unwrap().backoff_now = true;
                self.queue.lock().unwrap().push_back((request, sender));
            }
            Err(e) if e.is_unrecoverable() => {
                warn!(error = %e, "Unrecoverable error, skipping request");
                let _ = sender.send(None);
            }
            Err(e) => {
                error!(error = %e, "Unrecognized error, skipping request");
                let _ = sender.send(None);
            }
        }
    }

    /// Randomized exponential backoff, capped at 60 seconds
    async fn wait_between_requests(&self) {
        let multiplier = self.backoff.lock().unwrap().multiplier;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(1..=1000));
        let base = 2u64
            .checked_pow(multiplier)
            .map(Duration::from_secs)
            .unwrap_or(MAXIMUM_BACKOFF);
        tokio::time::sleep((base + jitter).min(MAXIMUM_BACKOFF)).await;
    }
}
