//! # TinyPNG Batch - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Risoluzione delle coppie sorgente → destinazione
//! - Creazione della configurazione e avvio del coordinatore
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI (sorgenti, destinazione, firme, concorrenza, etc.)
//! 2. Configura il logging (INFO o DEBUG a seconda del flag verbose)
//! 3. Carica l'eventuale file di configurazione e applica i flag CLI
//! 4. Espande directory e coppie esplicite in mapping
//! 5. Avvia il batch, con barre di progresso se richieste
//! 6. Esce con errore se il batch è fallito
//!
//! ## Esempio di utilizzo:
//! ```bash
//! tinypng-batch assets/img --dest dist/img --suffix .min --check-sigs --sig-file sigs.json --summarize
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use tinypng_batch::{file_manager::FileManager, BatchCoordinator, Config, ProgressView};

#[derive(Parser)]
#[command(name = "tinypng-batch")]
#[command(about = "Compress images in bulk through the TinyPNG API, skipping unchanged files")]
struct Args {
    /// Image files or directories to compress
    sources: Vec<PathBuf>,

    /// Output directory (if not specified, images are compressed in place)
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// Suffix inserted before the extension of each output file (e.g. ".min")
    #[arg(short, long)]
    suffix: Option<String>,

    /// Explicit SRC=DEST mapping, may be repeated
    #[arg(long = "pair", value_name = "SRC=DEST")]
    pairs: Vec<String>,

    /// API key of the compression service
    #[arg(short = 'k', long, env = "TINYPNG_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// JSON configuration file, CLI flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip sources whose content did not change since the last run
    #[arg(long)]
    check_sigs: bool,

    /// Signature file used with --check-sigs
    #[arg(long)]
    sig_file: Option<PathBuf>,

    /// Indent width of the signature file (compact when omitted)
    #[arg(long)]
    sig_file_space: Option<usize>,

    /// Show upload and download progress bars
    #[arg(short, long)]
    progress: bool,

    /// Print a summary when the batch succeeds
    #[arg(long)]
    summarize: bool,

    /// Print a summary when the batch is stopped by an error
    #[arg(long)]
    summarize_on_error: bool,

    /// Keep going when an image fails
    #[arg(long)]
    continue_on_error: bool,

    /// Ignore signatures and compress everything
    #[arg(short, long)]
    force: bool,

    /// Maximum concurrent uploads
    #[arg(long)]
    upload_concurrency: Option<usize>,

    /// Maximum concurrent downloads
    #[arg(long)]
    download_concurrency: Option<usize>,

    /// Shrink endpoint of the compression service
    #[arg(long)]
    endpoint: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Layer the CLI flags over a base configuration
    fn apply_to(&self, mut config: Config) -> Config {
        if let Some(key) = &self.api_key {
            config.api_key = key.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.api_endpoint = endpoint.clone();
        }
        if let Some(sig_file) = &self.sig_file {
            config.sig_file = Some(sig_file.clone());
        }
        if self.sig_file_space.is_some() {
            config.sig_file_space = self.sig_file_space;
        }
        if let Some(n) = self.upload_concurrency {
            config.upload_concurrency = n;
        }
        if let Some(n) = self.download_concurrency {
            config.download_concurrency = n;
        }

        config.check_sigs |= self.check_sigs;
        config.show_progress |= self.progress;
        config.summarize |= self.summarize;
        config.summarize_on_error |= self.summarize_on_error;
        config.force |= self.force;
        if self.continue_on_error {
            config.stop_on_image_error = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let base = match &args.config {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    let config = args.apply_to(base);

    let mut mappings = FileManager::resolve_mappings(
        &args.sources,
        args.dest.as_deref(),
        args.suffix.as_deref(),
    )?;
    for pair in &args.pairs {
        mappings.push(FileManager::parse_pair(pair)?);
    }

    if mappings.is_empty() {
        warn!("No images to compress");
        return Ok(());
    }

    let show_progress = config.show_progress;
    let mut coordinator = BatchCoordinator::new(config, mappings)?;

    let progress = if show_progress {
        let (tx, rx) = mpsc::unbounded_channel();
        coordinator = coordinator.with_events(tx);
        Some(ProgressView::new(true).spawn(rx))
    } else {
        None
    };

    let report = coordinator.run().await?;

    if let Some(handle) = progress {
        // Jobs cut short by a halt may still hold an event sender
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    if !report.success {
        return Err(anyhow::anyhow!(
            "Batch stopped: {} of {} images failed",
            report.failed(),
            report.records.len()
        ));
    }

    info!(
        "Compressed {} images, {} unchanged",
        report.summary.compressed, report.skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_config() {
        let args = Args::parse_from([
            "tinypng-batch",
            "img",
            "--api-key",
            "secret",
            "--check-sigs",
            "--sig-file",
            "sigs.json",
            "--continue-on-error",
            "--upload-concurrency",
            "2",
        ]);
        let base = Config {
            summarize: true,
            download_concurrency: 3,
            ..Default::default()
        };

        let config = args.apply_to(base);
        assert_eq!(config.api_key, "secret");
        assert!(config.check_sigs);
        assert_eq!(config.sig_file, Some(PathBuf::from("sigs.json")));
        assert!(!config.stop_on_image_error);
        assert!(config.summarize);
        assert_eq!(config.upload_concurrency, 2);
        assert_eq!(config.download_concurrency, 3);
    }
}
