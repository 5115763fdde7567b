//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione di un batch di compressione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutte le opzioni del task
//! - Definisce `FileMapping`, la coppia sorgente → destinazione risolta
//! - Fornisce validazione dei parametri di input
//! - Supporta il caricamento della configurazione da file JSON (campi mancanti = default)
//!
//! ## Parametri di configurazione:
//! - `api_key`: Chiave API del servizio (obbligatoria)
//! - `check_sigs`: Salta i file non modificati (default: false)
//! - `sig_file`: File JSON delle firme (obbligatorio se `check_sigs`)
//! - `sig_file_space`: Indentazione del file firme (default: None = compatto)
//! - `show_progress`: Abilita eventi di progresso byte per byte (default: false)
//! - `summarize` / `summarize_on_error`: Riepilogo finale (default: false)
//! - `stop_on_image_error`: Ferma il batch al primo errore (default: true)
//! - `force`: Ignora le firme e riprocessa tutto (default: false)
//! - `upload_concurrency` / `download_concurrency`: Limiti code (default: 5)
//! - `api_endpoint`: URL di shrink (default: https://api.tinypng.com/shrink)
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     api_key: "secret".to_string(),
//!     check_sigs: true,
//!     sig_file: Some("file_sigs.json".into()),
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

/// Default shrink endpoint of the remote service
pub const DEFAULT_API_ENDPOINT: &str = "https://api.tinypng.com/shrink";

/// Default ceiling for both dispatch queues
pub const DEFAULT_CONCURRENCY: usize = 5;

/// One resolved source → destination pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl FileMapping {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Configuration for a compression batch
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Credential for the remote service
    pub api_key: String,
    /// Skip sources whose content did not change since the last run
    pub check_sigs: bool,
    /// Where the content signatures are persisted
    pub sig_file: Option<PathBuf>,
    /// Pretty-print indent width for the signature file
    pub sig_file_space: Option<usize>,
    /// Emit byte-level progress events and render progress bars
    pub show_progress: bool,
    /// Log a summary when the batch succeeds
    pub summarize: bool,
    /// Log a summary when the batch is stopped by an error
    pub summarize_on_error: bool,
    /// Abort the whole batch on the first failed image
    pub stop_on_image_error: bool,
    /// Bypass the signature skip check
    pub force: bool,
    /// Maximum concurrent uploads
    pub upload_concurrency: usize,
    /// Maximum concurrent downloads
    pub download_concurrency: usize,
    /// Shrink endpoint
    pub api_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            check_sigs: false,
            sig_file: None,
            sig_file_space: None,
            show_progress: false,
            summarize: false,
            summarize_on_error: false,
            stop_on_image_error: true,
            force: false,
            upload_concurrency: DEFAULT_CONCURRENCY,
            download_concurrency: DEFAULT_CONCURRENCY,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("An API key is required"));
        }

        if self.check_sigs && self.sig_file.is_none() {
            return Err(anyhow::anyhow!("A signature file is required when checking signatures"));
        }

        if self.upload_concurrency == 0 || self.download_concurrency == 0 {
            return Err(anyhow::anyhow!("Queue concurrency must be greater than 0"));
        }

        reqwest::Url::parse(&self.api_endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid API endpoint {}: {}", self.api_endpoint, e))?;

        Ok(())
    }

    /// Signature file to use, only when signature checking is enabled
    pub fn signature_path(&self) -> Option<&PathBuf> {
        if self.check_sigs {
            self.sig_file.as_ref()
        } else {
            None
        }
    }

    /// Load configuration from file
    pub async fn from_file(path: &PathBuf) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

}
