//! # Remote Compression Job Module
//!
//! Questo modulo modella il ciclo di vita di un singolo file verso il servizio remoto.
//!
//! ## Responsabilità:
//! - Upload in streaming del file sorgente con autenticazione Basic
//! - Parsing della risposta (`Location` + statistiche di compressione)
//! - Download condizionale del risultato solo se più piccolo dell'originale
//! - Copia dell'originale quando la compressione non porta benefici
//! - Emissione di un evento per ogni transizione di stato
//!
//! ## Fasi del job:
//! ```text
//! pending → uploading → uploaded → downloading → completed
//!                                 └──────(copia)──────┘
//! failed: raggiungibile da ogni fase non terminale
//! ```
//!
//! ## Eventi:
//! - `UploadStart`, `UploadProgress*`, `UploadComplete` | `UploadFailed`
//! - `DownloadStart`, `DownloadProgress*`, `DownloadComplete` | `DownloadFailed`
//! - Gli eventi di progresso sono emessi solo con `track_progress` attivo

use crate::{
    client::ApiClient,
    config::FileMapping,
    error::ShrinkError,
    file_manager::FileManager,
};
use futures::TryStreamExt;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, LOCATION};
use reqwest::{Body, StatusCode, Url};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Identifier of a job inside one batch
pub type JobId = usize;

/// Lifecycle phase of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Uploading,
    Uploaded,
    Downloading,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal successor of this phase
    pub fn can_advance_to(&self, next: Phase) -> bool {
        match (self, next) {
            (Self::Pending, Self::Uploading) => true,
            (Self::Uploading, Self::Uploaded) => true,
            (Self::Uploaded, Self::Downloading) => true,
            (Self::Uploaded, Self::Completed) => true,
            (Self::Downloading, Self::Completed) => true,
            (current, Self::Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// Byte count reported by the service for one side of a compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SizeInfo {
    pub size: u64,
}

/// Body of a successful shrink response; extra fields are ignored
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompressionStats {
    pub input: SizeInfo,
    pub output: SizeInfo,
}

/// What the service produced for one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultDescriptor {
    pub input_size: u64,
    pub output_size: u64,
    pub location: Url,
}

impl ResultDescriptor {
    pub fn should_download(&self) -> bool {
        self.output_size < self.input_size
    }
}

/// Notification emitted on every job transition
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub job: JobId,
    pub source: PathBuf,
    pub kind: JobEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEventKind {
    /// Job admitted into the upload queue
    Queued { source_size: u64 },
    UploadStart,
    /// Cumulative bytes streamed to the service
    UploadProgress { sent: u64 },
    UploadComplete { should_download: bool },
    UploadFailed { message: String },
    DownloadStart { output_size: u64 },
    /// Cumulative bytes written to the destination
    DownloadProgress { received: u64 },
    DownloadComplete,
    DownloadFailed { message: String },
}

#[derive(Debug, Clone)]
struct EventSink {
    job: JobId,
    source: PathBuf,
    tx: Option<UnboundedSender<JobEvent>>,
}

impl EventSink {
    fn emit(&self, kind: JobEventKind) {
        if let Some(tx) = &self.tx {
            // The receiver going away only means nobody renders progress anymore
            let _ = tx.send(JobEvent {
                job: self.job,
                source: self.source.clone(),
                kind,
            });
        }
    }
}

/// Final view of a job, kept for the batch report
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub phase: Phase,
    pub source_size: Option<u64>,
    pub result: Option<ResultDescriptor>,
    pub error: Option<String>,
}

impl JobRecord {
    /// Failed in flight, or completed but its signature could not be stored
    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed || self.error.is_some()
    }

    /// Completed through the download path rather than the local copy
    pub fn downloaded(&self) -> bool {
        self.phase == Phase::Completed
            && self.result.as_ref().is_some_and(ResultDescriptor::should_download)
    }
}

/// One file's upload → (download | copy) lifecycle
#[derive(Debug)]
pub struct CompressionJob {
    id: JobId,
    source: PathBuf,
    destination: PathBuf,
    client: ApiClient,
    phase: Phase,
    file_size: Option<u64>,
    result: Option<ResultDescriptor>,
    error: Option<String>,
    track_progress: bool,
    events: EventSink,
}

impl CompressionJob {
    pub fn new(id: JobId, mapping: FileMapping, client: ApiClient, track_progress: bool) -> Self {
        let events = EventSink {
            job: id,
            source: mapping.source.clone(),
            tx: None,
        };

        Self {
            id,
            source: mapping.source,
            destination: mapping.destination,
            client,
            phase: Phase::Pending,
            file_size: None,
            result: None,
            error: None,
            track_progress,
            events,
        }
    }

    /// Route this job's events to a renderer
    pub fn with_events(mut self, tx: UnboundedSender<JobEvent>) -> Self {
        self.events.tx = Some(tx);
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn should_download(&self) -> bool {
        self.result.as_ref().is_some_and(ResultDescriptor::should_download)
    }

    /// Size of the source file, resolved on first use
    pub async fn source_size(&mut self) -> Result<u64, ShrinkError> {
        if let Some(size) = self.file_size {
            return Ok(size);
        }
        let size = fs::metadata(&self.source).await?.len();
        self.file_size = Some(size);
        Ok(size)
    }

    /// Announce admission into the upload queue
    pub async fn announce_queued(&mut self) {
        let source_size = self.source_size().await.unwrap_or(0);
        self.events.emit(JobEventKind::Queued { source_size });
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        self.phase = next;
    }

    /// Move the job to `failed`, keeping the error message
    pub fn mark_failed(&mut self, error: &ShrinkError) {
        if !self.phase.is_terminal() {
            self.advance(Phase::Failed);
        }
        self.error = Some(error.to_string());
    }

    /// Upload the source and wait for the service's verdict
    pub async fn start(&mut self) -> Result<&ResultDescriptor, ShrinkError> {
        if self.phase != Phase::Pending {
            return Err(ShrinkError::InvalidPhase(self.phase));
        }

        self.advance(Phase::Uploading);
        self.events.emit(JobEventKind::UploadStart);

        let uploaded = match self.source_size().await {
            Ok(size) => self.upload(size).await,
            Err(e) => Err(e),
        };

        match uploaded {
            Ok(descriptor) => {
                let should_download = descriptor.should_download();
                self.advance(Phase::Uploaded);
                self.events.emit(JobEventKind::UploadComplete { should_download });
                Ok(&*self.result.insert(descriptor))
            }
            Err(e) => {
                self.mark_failed(&e);
                self.events.emit(JobEventKind::UploadFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn upload(&self, size: u64) -> Result<ResultDescriptor, ShrinkError> {
        let request = self.client.shrink_request();
        let file = fs::File::open(&self.source).await?;
        let stream = ReaderStream::new(file);

        let body = if self.track_progress {
            let events = self.events.clone();
            let mut sent = 0u64;
            Body::wrap_stream(stream.inspect_ok(move |chunk| {
                sent += chunk.len() as u64;
                events.emit(JobEventKind::UploadProgress { sent });
            }))
        } else {
            Body::wrap_stream(stream)
        };

        debug!("Uploading {} ({} bytes) to {}", self.source.display(), size, request.url);

        let response = self
            .client
            .http()
            .post(request.url.clone())
            .basic_auth(request.username, Some(&request.password))
            .header(ACCEPT, "*/*")
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        debug!("API response status for {}: {}", self.source.display(), status);
        debug!("Headers: {:?}", response.headers());

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        match (status, location) {
            (StatusCode::CREATED, Some(location)) => {
                let location = request.resolve_location(&location)?;
                let body = response.bytes().await?;
                let stats: CompressionStats = serde_json::from_slice(&body).map_err(|e| {
                    ShrinkError::Protocol(format!("unreadable compression stats: {}", e))
                })?;

                Ok(ResultDescriptor {
                    input_size: stats.input.size,
                    output_size: stats.output.size,
                    location,
                })
            }
            (status, _) => {
                let body = response.text().await?;
                Err(ShrinkError::Api {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    /// Fetch the compressed image into the destination
    pub async fn download_image(&mut self) -> Result<(), ShrinkError> {
        let (location, output_size) = match (self.phase, &self.result) {
            (Phase::Uploaded, Some(result)) => (result.location.clone(), result.output_size),
            (phase, _) => return Err(ShrinkError::InvalidPhase(phase)),
        };

        self.advance(Phase::Downloading);
        self.events.emit(JobEventKind::DownloadStart { output_size });

        match self.fetch(location).await {
            Ok(()) => {
                self.advance(Phase::Completed);
                self.events.emit(JobEventKind::DownloadComplete);
                Ok(())
            }
            Err(e) => {
                self.mark_failed(&e);
                self.events.emit(JobEventKind::DownloadFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn fetch(&self, location: Url) -> Result<(), ShrinkError> {
        debug!("Making request to get image at {}", location);

        let mut response = self
            .client
            .http()
            .get(location.clone())
            .header(ACCEPT, "*/*")
            .send()
            .await?;

        let status = response.status();
        debug!("Minified image request response status code is {}", status);
        if !status.is_success() {
            return Err(ShrinkError::BadStatus {
                status: status.as_u16(),
                url: location.to_string(),
            });
        }

        FileManager::ensure_parent_dirs(&self.destination).await?;
        let mut file = fs::File::create(&self.destination).await?;
        let mut received = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if self.track_progress {
                self.events.emit(JobEventKind::DownloadProgress { received });
            }
        }
        file.flush().await?;

        debug!("Wrote minified image to {}", self.destination.display());
        Ok(())
    }

    /// Complete without downloading: the service could not shrink the image
    pub async fn keep_original(&mut self) -> Result<(), ShrinkError> {
        if self.phase != Phase::Uploaded || self.should_download() {
            return Err(ShrinkError::InvalidPhase(self.phase));
        }

        if let Err(e) = FileManager::copy_file(&self.source, &self.destination).await {
            self.mark_failed(&e);
            return Err(e);
        }

        self.advance(Phase::Completed);
        Ok(())
    }

    /// Consume the job into its report entry
    pub fn into_record(self) -> JobRecord {
        JobRecord {
            id: self.id,
            source: self.source,
            destination: self.destination,
            phase: self.phase,
            source_size: self.file_size,
            result: self.result,
            error: self.error,
        }
    }
}
