//! # Batch Module
//!
//! Modulo che separa le responsabilità del batch in sottomoduli:
//! - `coordinator`: Orchestratore principale (code, politica errori, completamento)
//! - `collector`: Decisioni di skip durante la raccolta dei file
//! - `summary`: Riepilogo aggregato

pub mod collector;
pub mod coordinator;
pub mod summary;

pub use collector::Decision;
pub use coordinator::{BatchCoordinator, BatchReport, BatchState};
pub use summary::BatchSummary;
