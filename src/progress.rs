//! # Progress Tracking Module
//!
//! Questo modulo trasforma gli eventi dei job in dati di progresso e li
//! visualizza con due barre `indicatif` (upload e download).
//!
//! ## Responsabilità:
//! - `TransferCounter`: immagini totali/completate/in attesa e byte trasferiti
//! - `ProgressModel`: applica ogni `JobEvent` ai contatori delle due barre
//! - `ProgressView`: task che consuma il canale eventi e aggiorna le barre
//!
//! ## Regole di aggiornamento:
//! - `Queued`: +1 in attesa e +1 immagine (con i suoi byte) sulla barra upload
//! - `UploadStart`: -1 in attesa sulla barra upload
//! - `UploadComplete`: +1 completata; se serve il download, +1 in attesa sulla barra download
//! - `DownloadStart`: -1 in attesa, +1 immagine con la dimensione compressa
//! - `*Progress`: byte cumulativi per job, la barra somma solo l'incremento
//!
//! ## Visual feedback:
//! ```text
//! ↑ Upload:   [========================>---------------]  62% (5/8 images, 3 pending)
//! ↓ Download: [==========>-----------------------------]  25% (1/4 images)
//! ```

use crate::job::{JobEvent, JobEventKind, JobId};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Counters behind one progress bar
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferCounter {
    pub total_images: usize,
    pub complete_images: usize,
    pub pending_images: usize,
    pub total_bytes: u64,
    pub progress_bytes: u64,
}

impl TransferCounter {
    pub fn add_image(&mut self, bytes: u64) {
        self.total_images += 1;
        self.total_bytes += bytes;
    }

    pub fn add_progress(&mut self, bytes: u64) {
        self.progress_bytes += bytes;
    }

    pub fn add_complete(&mut self) {
        self.complete_images += 1;
    }

    pub fn add_pending(&mut self) {
        self.pending_images += 1;
    }

    pub fn remove_pending(&mut self) {
        self.pending_images = self.pending_images.saturating_sub(1);
    }

    pub fn percent(&self) -> u64 {
        if self.total_bytes == 0 {
            0
        } else {
            ((self.progress_bytes as f64 / self.total_bytes as f64) * 100.0)
                .round()
                .min(100.0) as u64
        }
    }

    pub fn message(&self) -> String {
        let images = if self.total_images == 1 { "image" } else { "images" };
        let mut out = format!(
            "{:>3}% ({}/{} {}",
            self.percent(),
            self.complete_images,
            self.total_images,
            images
        );
        if self.pending_images > 0 {
            out.push_str(&format!(", {} pending", self.pending_images));
        }
        out.push(')');
        out
    }
}

/// Upload and download counters fed by job events
#[derive(Debug, Default, Clone)]
pub struct ProgressModel {
    pub upload: TransferCounter,
    pub download: TransferCounter,
    sent: HashMap<JobId, u64>,
    received: HashMap<JobId, u64>,
}

impl ProgressModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &JobEvent) {
        match &event.kind {
            JobEventKind::Queued { source_size } => {
                self.upload.add_pending();
                self.upload.add_image(*source_size);
            }
            JobEventKind::UploadStart => self.upload.remove_pending(),
            JobEventKind::UploadProgress { sent } => {
                let previous = self.sent.insert(event.job, *sent).unwrap_or(0);
                self.upload.add_progress(sent.saturating_sub(previous));
            }
            JobEventKind::UploadComplete { should_download } => {
                if *should_download {
                    self.download.add_pending();
                }
                self.upload.add_complete();
            }
            JobEventKind::DownloadStart { output_size } => {
                self.download.remove_pending();
                self.download.add_image(*output_size);
            }
            JobEventKind::DownloadProgress { received } => {
                let previous = self.received.insert(event.job, *received).unwrap_or(0);
                self.download.add_progress(received.saturating_sub(previous));
            }
            JobEventKind::DownloadComplete => self.download.add_complete(),
            JobEventKind::UploadFailed { .. } | JobEventKind::DownloadFailed { .. } => {}
        }
    }
}

/// Renders job events as two terminal progress bars
pub struct ProgressView {
    multi: MultiProgress,
    upload: ProgressBar,
    download: ProgressBar,
}

impl ProgressView {
    /// Create the bars; `visible = false` keeps the model but draws nothing
    pub fn new(visible: bool) -> Self {
        let multi = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let upload = multi.add(Self::bar("↑ Upload:  "));
        let download = multi.add(Self::bar("↓ Download:"));

        Self {
            multi,
            upload,
            download,
        }
    }

    fn bar(prefix: &'static str) -> ProgressBar {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{bar:40.cyan/blue}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_prefix(prefix);
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }

    fn render(&self, model: &ProgressModel) {
        self.upload.set_position(model.upload.percent());
        self.upload.set_message(model.upload.message());
        self.download.set_position(model.download.percent());
        self.download.set_message(model.download.message());
    }

    /// Consume events until every sender is gone, returning the final counters
    pub fn spawn(self, mut events: UnboundedReceiver<JobEvent>) -> JoinHandle<ProgressModel> {
        tokio::spawn(async move {
            let mut model = ProgressModel::new();
            while let Some(event) = events.recv().await {
                model.apply(&event);
                self.render(&model);
            }
            self.finish();
            model
        })
    }

    fn finish(&self) {
        self.upload.finish();
        self.download.finish();
        let _ = self.multi.clear();
    }
}
