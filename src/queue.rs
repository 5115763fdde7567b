//! # Bounded Dispatch Queue Module
//!
//! Coda FIFO con controllo di ammissione: al massimo `ceiling` azioni
//! in esecuzione contemporaneamente.
//!
//! ## Responsabilità:
//! - Accoda elementi e li passa alla funzione worker in ordine FIFO
//! - Limita la concorrenza con un semaforo (come l'orchestratore a worker pool)
//! - Supporta creazione in pausa e ripresa esplicita
//! - Segnala l'idle (nessuna azione in coda né in esecuzione)
//! - Interruzione: le azioni in coda vengono scartate, quelle in corso proseguono
//!
//! ## Gestione concorrenza:
//! - Un task dispatcher per coda legge gli elementi dal canale
//! - Ogni azione avviata gira in un task tokio con il proprio permesso
//! - I contatori vivono in un canale `watch` per l'attesa dell'idle
//!
//! ## Esempio:
//! ```rust,ignore
//! let uploads = DispatchQueue::paused("upload", 5, |job| async move { run(job).await });
//! uploads.push(job)?;
//! uploads.resume();
//! uploads.wait_idle().await;
//! ```

use crate::error::ShrinkError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Worker<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Snapshot of a queue's load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Accepted but not started
    pub pending: usize,
    /// Started and not finished
    pub in_flight: usize,
    /// Highest `in_flight` ever observed
    pub peak_in_flight: usize,
    /// Total actions started
    pub started: usize,
}

impl QueueCounts {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.in_flight == 0
    }
}

struct Shared {
    name: String,
    ceiling: usize,
    counts: watch::Sender<QueueCounts>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
}

/// Concurrency-limited FIFO queue feeding a worker function.
///
/// Must be created inside a tokio runtime.
pub struct DispatchQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    shared: Arc<Shared>,
}

impl<T> Clone for DispatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> DispatchQueue<T> {
    /// Queue that starts dispatching immediately
    pub fn new<F, Fut>(name: &str, ceiling: usize, worker: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(name, ceiling, false, CancellationToken::new(), worker)
    }

    /// Queue that holds everything until `resume()`
    pub fn paused<F, Fut>(name: &str, ceiling: usize, worker: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(name, ceiling, true, CancellationToken::new(), worker)
    }

    /// Fully configured queue; cancelling `cancel` halts it like `kill()`
    pub fn spawn<F, Fut>(
        name: &str,
        ceiling: usize,
        paused: bool,
        cancel: CancellationToken,
        worker: F,
    ) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (counts, _) = watch::channel(QueueCounts::default());
        let (paused, _) = watch::channel(paused);

        let shared = Arc::new(Shared {
            name: name.to_string(),
            ceiling: ceiling.max(1),
            counts,
            paused,
            cancel,
        });

        let worker: Worker<T> = Arc::new(move |item| worker(item).boxed());
        tokio::spawn(dispatch(rx, shared.clone(), worker));

        Self { tx, shared }
    }

    /// Enqueue an item; refused once the queue has been halted
    pub fn push(&self, item: T) -> Result<(), ShrinkError> {
        if self.shared.cancel.is_cancelled() {
            return Err(ShrinkError::Halted);
        }

        self.shared.counts.send_modify(|c| c.pending += 1);
        if self.tx.send(item).is_err() {
            self.shared
                .counts
                .send_modify(|c| c.pending = c.pending.saturating_sub(1));
            return Err(ShrinkError::Halted);
        }
        Ok(())
    }
}

impl<T> DispatchQueue<T> {
    pub fn counts(&self) -> QueueCounts {
        *self.shared.counts.borrow()
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.borrow()
    }

    pub fn resume(&self) {
        debug!("Resuming {} queue", self.shared.name);
        self.shared.paused.send_replace(false);
    }

    /// Drop everything not yet started; running actions are left alone
    pub fn kill(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_halted(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolve once nothing is pending or in flight
    pub async fn wait_idle(&self) {
        let mut counts = self.shared.counts.subscribe();
        loop {
            if counts.borrow_and_update().is_idle() {
                return;
            }
            if counts.changed().await.is_err() {
                return;
            }
        }
    }
}

async fn wait_resumed(paused: &mut watch::Receiver<bool>) -> bool {
    loop {
        if !*paused.borrow_and_update() {
            return true;
        }
        if paused.changed().await.is_err() {
            return false;
        }
    }
}

async fn dispatch<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<T>,
    shared: Arc<Shared>,
    worker: Worker<T>,
) {
    let semaphore = Arc::new(Semaphore::new(shared.ceiling));
    let mut paused = shared.paused.subscribe();

    loop {
        let item = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let resumed = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => false,
            resumed = wait_resumed(&mut paused) => resumed,
        };
        if !resumed {
            break;
        }

        let permit = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        shared.counts.send_modify(|c| {
            c.pending = c.pending.saturating_sub(1);
            c.in_flight += 1;
            c.started += 1;
            c.peak_in_flight = c.peak_in_flight.max(c.in_flight);
        });

        let action = worker(item);
        let running = shared.clone();
        tokio::spawn(async move {
            action.await;
            drop(permit);
            running
                .counts
                .send_modify(|c| c.in_flight = c.in_flight.saturating_sub(1));
        });
    }

    // Halted, or every handle is gone: whatever never started is discarded
    rx.close();
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    shared.counts.send_modify(|c| c.pending = 0);

    if dropped > 0 {
        debug!("{} queue stopped, dropped {} queued actions", shared.name, dropped);
    }
}
