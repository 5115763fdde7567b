//! # Batch Coordinator Module
//!
//! Orchestratore del batch: possiede le due code, collega il completamento
//! dei job alla persistenza delle firme e decide quando il batch è finito.
//!
//! ## Stati:
//! ```text
//! collecting → running → draining → done
//!                 └──(errore con stop_on_image_error)──→ aborted
//! ```
//!
//! ## Pipeline per job:
//! 1. Upload (coda `upload`, in pausa finché la raccolta non è conclusa)
//! 2. Download se il risultato è più piccolo (coda `download`), altrimenti copia
//! 3. Aggiornamento e salvataggio della firma del sorgente
//! 4. Report del job al coordinatore tramite canale
//!
//! ## Gestione errori:
//! - Ogni errore di un job passa da un unico percorso (`report_failure`)
//! - Con `stop_on_image_error` le code vengono fermate dentro l'azione fallita,
//!   prima che il suo permesso venga rilasciato
//! - Senza, l'errore viene loggato e il batch prosegue

use crate::{
    batch::{
        collector::{self, Decision},
        summary::BatchSummary,
    },
    client::ApiClient,
    config::{Config, FileMapping},
    error::ShrinkError,
    job::{CompressionJob, JobEvent, JobRecord},
    queue::{DispatchQueue, QueueCounts},
    signature::{self, SignatureStore},
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a whole batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Collecting,
    Running,
    Draining,
    Done,
    Aborted,
}

/// Outcome of `BatchCoordinator::run`
#[derive(Debug)]
pub struct BatchReport {
    pub success: bool,
    pub state: BatchState,
    /// Unchanged sources skipped through their signature
    pub skipped: usize,
    /// Sources that did not exist
    pub missing: usize,
    /// Every job that reached the coordinator, successful or failed
    pub records: Vec<JobRecord>,
    pub summary: BatchSummary,
    pub uploads: QueueCounts,
    pub downloads: QueueCounts,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.records.iter().filter(|r| r.is_failed()).count()
    }
}

/// Shared by the queue workers: what happens after each phase
struct JobPipeline {
    store: Option<Arc<Mutex<SignatureStore>>>,
    reports: mpsc::UnboundedSender<JobRecord>,
    halt: CancellationToken,
    stop_on_error: bool,
}

impl JobPipeline {
    async fn upload(self: Arc<Self>, mut job: CompressionJob, downloads: DispatchQueue<CompressionJob>) {
        let uploaded = job.start().await.map(|result| result.should_download());
        if self.halt.is_cancelled() {
            debug!("Ignoring upload result for {}, batch halted", job.source().display());
            return;
        }

        match uploaded {
            Ok(true) => {
                let source = job.source().to_path_buf();
                if let Err(e) = downloads.push(job) {
                    debug!("Download of {} not queued: {}", source.display(), e);
                }
            }
            Ok(false) => {
                debug!("No savings for {}, copying original", job.source().display());
                match job.keep_original().await {
                    Ok(()) => self.finalize(job).await,
                    Err(e) => self.fail(job, e),
                }
            }
            Err(e) => self.fail(job, e),
        }
    }

    async fn download(self: Arc<Self>, mut job: CompressionJob) {
        let downloaded = job.download_image().await;
        if self.halt.is_cancelled() {
            debug!("Ignoring download result for {}, batch halted", job.source().display());
            return;
        }

        match downloaded {
            Ok(()) => self.finalize(job).await,
            Err(e) => self.fail(job, e),
        }
    }

    async fn finalize(&self, job: CompressionJob) {
        if let Some(store) = &self.store {
            let signed = async {
                let digest = signature::file_digest(job.source()).await?;
                let mut store = store.lock().await;
                store.set(job.source(), digest);
                store.save().await
            }
            .await;

            if let Err(e) = signed {
                return self.fail(job, e);
            }
        }

        debug!("Finished {}", job.destination().display());
        let _ = self.reports.send(job.into_record());
    }

    fn fail(&self, job: CompressionJob, error: ShrinkError) {
        let mut record = job.into_record();
        if record.error.is_none() {
            record.error = Some(error.to_string());
        }
        self.report_failure(record);
    }

    fn report_failure(&self, record: JobRecord) {
        let message = record.error.as_deref().unwrap_or("unknown error");
        if self.stop_on_error {
            error!("Failed to process {}: {}", record.source.display(), message);
            self.halt.cancel();
        } else {
            warn!("Failed to process {}, continuing: {}", record.source.display(), message);
        }
        let _ = self.reports.send(record);
    }
}

/// Drives every job of a batch to a terminal phase
pub struct BatchCoordinator {
    config: Config,
    mappings: Vec<FileMapping>,
    client: ApiClient,
    events: Option<mpsc::UnboundedSender<JobEvent>>,
    state: BatchState,
}

impl BatchCoordinator {
    /// Create a coordinator for the resolved mappings
    pub fn new(config: Config, mappings: Vec<FileMapping>) -> Result<Self> {
        config.validate()?;
        let client = ApiClient::new(&config.api_endpoint, &config.api_key)?;

        Ok(Self {
            config,
            mappings,
            client,
            events: None,
            state: BatchState::Collecting,
        })
    }

    /// Forward every job event to `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<JobEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn transition(&mut self, next: BatchState) {
        debug!("Batch state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run the batch to completion or to the first fatal failure
    pub async fn run(mut self) -> Result<BatchReport> {
        info!("Starting batch of {} files", self.mappings.len());
        self.transition(BatchState::Collecting);

        let store = match self.config.signature_path() {
            Some(path) => {
                let store = SignatureStore::load(path, self.config.sig_file_space).await?;
                Some(Arc::new(Mutex::new(store)))
            }
            None => None,
        };

        let halt = CancellationToken::new();
        let (reports_tx, mut reports) = mpsc::unbounded_channel();
        let pipeline = Arc::new(JobPipeline {
            store: store.clone(),
            reports: reports_tx,
            halt: halt.clone(),
            stop_on_error: self.config.stop_on_image_error,
        });

        let downloads = {
            let pipeline = pipeline.clone();
            DispatchQueue::spawn(
                "download",
                self.config.download_concurrency,
                false,
                halt.child_token(),
                move |job| pipeline.clone().download(job),
            )
        };

        let uploads = {
            let pipeline = pipeline.clone();
            let downloads = downloads.clone();
            DispatchQueue::spawn(
                "upload",
                self.config.upload_concurrency,
                true,
                halt.child_token(),
                move |job| pipeline.clone().upload(job, downloads.clone()),
            )
        };

        let decisions = {
            let guard = match &store {
                Some(store) => Some(store.lock().await),
                None => None,
            };
            let mappings = std::mem::take(&mut self.mappings);
            collector::collect(mappings, guard.as_deref(), self.config.force).await?
        };

        let mut skipped = 0usize;
        let mut missing = 0usize;
        let mut queued = 0usize;

        for decision in decisions {
            match decision {
                Decision::Process(mapping) => {
                    let mut job = CompressionJob::new(
                        queued,
                        mapping,
                        self.client.clone(),
                        self.config.show_progress,
                    );
                    if let Some(tx) = &self.events {
                        job = job.with_events(tx.clone());
                    }
                    job.announce_queued().await;
                    uploads.push(job)?;
                    queued += 1;
                }
                Decision::Unchanged(_) => skipped += 1,
                Decision::Missing(_) => missing += 1,
            }
        }

        info!("Queued {} images ({} unchanged, {} missing)", queued, skipped, missing);
        self.transition(BatchState::Running);
        uploads.resume();

        let mut records = Vec::with_capacity(queued);
        let mut aborted = false;
        {
            let idle = async {
                uploads.wait_idle().await;
                downloads.wait_idle().await;
            };
            tokio::pin!(idle);

            loop {
                tokio::select! {
                    Some(record) = reports.recv() => {
                        if self.accept(record, &mut records) {
                            aborted = true;
                            break;
                        }
                    }
                    _ = &mut idle => break,
                }
            }
        }

        // Reports sent just before the queues went idle
        while !aborted {
            match reports.try_recv() {
                Ok(record) => aborted = self.accept(record, &mut records),
                Err(_) => break,
            }
        }

        let summary = BatchSummary::from_records(skipped, &records);

        if aborted {
            uploads.kill();
            downloads.kill();
            self.transition(BatchState::Aborted);
            if self.config.summarize_on_error {
                info!("{}", summary.render());
            }
            error!("Batch stopped on image error");

            return Ok(BatchReport {
                success: false,
                state: self.state,
                skipped,
                missing,
                records,
                summary,
                uploads: uploads.counts(),
                downloads: downloads.counts(),
            });
        }

        self.transition(BatchState::Draining);
        if let Some(store) = &store {
            let store = store.lock().await;
            store.save().await?;
            debug!("Saved {} signatures to {}", store.len(), store.path().display());
        }

        if self.config.summarize {
            info!("{}", summary.render());
        }
        self.transition(BatchState::Done);

        Ok(BatchReport {
            success: true,
            state: self.state,
            skipped,
            missing,
            records,
            summary,
            uploads: uploads.counts(),
            downloads: downloads.counts(),
        })
    }

    /// Keep a job report; true when it must stop the batch
    fn accept(&self, record: JobRecord, records: &mut Vec<JobRecord>) -> bool {
        let stop = record.is_failed() && self.config.stop_on_image_error;
        records.push(record);
        stop
    }
}
