//! # TinyPNG Batch Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per i test di integrazione
//!
//! ## Architettura dei moduli:
//! - `config`: Configurazione del batch e validazione parametri
//! - `error`: Tipi di errore custom per le operazioni remote e locali
//! - `signature`: Firme del contenuto (MD5) e loro persistenza
//! - `client`: Client HTTP condiviso verso il servizio di compressione
//! - `job`: Ciclo di vita upload → download/copia di un singolo file
//! - `queue`: Code FIFO con limite di concorrenza e arresto cooperativo
//! - `batch`: Coordinatore del batch, raccolta file e riepilogo
//! - `progress`: Eventi di progresso e barre `indicatif`
//! - `file_manager`: Discovery immagini e risoluzione delle destinazioni
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use tinypng_batch::{BatchCoordinator, Config, FileMapping};
//!
//! let config = Config { api_key: key, ..Default::default() };
//! let mappings = vec![FileMapping::new("logo.png", "logo.min.png")];
//! let report = BatchCoordinator::new(config, mappings)?.run().await?;
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod file_manager;
pub mod job;
pub mod progress;
pub mod queue;
pub mod signature;

pub use batch::{BatchCoordinator, BatchReport, BatchState, BatchSummary};
pub use client::ApiClient;
pub use config::{Config, FileMapping};
pub use error::ShrinkError;
pub use job::{CompressionJob, JobEvent, JobEventKind, JobRecord, Phase};
pub use progress::ProgressView;
pub use queue::DispatchQueue;
pub use signature::SignatureStore;
