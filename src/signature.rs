//! # Content Signature Module
//!
//! Questo modulo gestisce le firme di contenuto dei file sorgente per evitare
//! di ricomprimere immagini non modificate tra un'esecuzione e l'altra.
//!
//! ## Responsabilità:
//! - Calcola un digest MD5 in streaming del contenuto di un file
//! - Confronta il digest corrente con quello salvato
//! - Persiste la mappa path → digest in un file JSON
//!
//! ## Strategia di persistence:
//! - Un unico file JSON indicato da `sig_file`
//! - Ordine delle chiavi = ordine di inserimento (salvataggio deterministico)
//! - Indentazione opzionale (`sig_file_space`), altrimenti JSON compatto
//! - Salvataggio dopo ogni job completato
//!
//! ## Prevenzione rielaborazione:
//! - Nessuna firma salvata → il file va processato
//! - Firma diversa dal contenuto attuale → il file va processato
//! - Firma identica → il file viene saltato
//!
//! ## Esempio struttura file firme:
//! ```json
//! {
//!   "test/fixtures/large.png": "0f1e2d3c4b5a69788796a5b4c3d2e1f0"
//! }
//! ```

use crate::error::ShrinkError;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

const READ_CHUNK: usize = 64 * 1024;

/// Length of a hex encoded digest
pub const DIGEST_HEX_LEN: usize = 32;

/// Compute the hex MD5 digest of a file, reading it in order
pub async fn file_digest(path: &Path) -> Result<String, ShrinkError> {
    let mut file = fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        context.consume(&buf[..read]);
    }

    Ok(hex::encode(context.compute().0))
}

/// Check a file against a previously stored digest.
///
/// An absent or empty signature never matches, so the file gets processed.
pub async fn matches_digest(path: &Path, expected: Option<&str>) -> Result<bool, ShrinkError> {
    match expected {
        Some(expected) if !expected.is_empty() => Ok(file_digest(path).await? == expected),
        _ => Ok(false),
    }
}

/// Key under which a source path is stored: the path with `.` segments removed
pub fn signature_key(path: &Path) -> String {
    let normalized: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    normalized.to_string_lossy().to_string()
}

/// Persisted mapping from source path to content digest
#[derive(Debug)]
pub struct SignatureStore {
    path: PathBuf,
    indent: Option<usize>,
    signatures: Map<String, Value>,
}

impl SignatureStore {
    /// Load the store from disk, or start empty when the file does not exist
    pub async fn load(path: &Path, indent: Option<usize>) -> Result<Self, ShrinkError> {
        let signatures = if fs::try_exists(path).await? {
            let content = fs::read_to_string(path).await.map_err(|e| {
                ShrinkError::Signature(format!("failed to read {}: {}", path.display(), e))
            })?;
            match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Ignoring unreadable signature file {}: {}", path.display(), e);
                    Map::new()
                }
            }
        } else {
            Map::new()
        };

        debug!("Loaded {} signatures from {}", signatures.len(), path.display());

        Ok(Self {
            path: path.to_path_buf(),
            indent,
            signatures,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Stored digest for a source path
    pub fn get(&self, source: &Path) -> Option<&str> {
        self.signatures
            .get(&signature_key(source))
            .and_then(Value::as_str)
    }

    /// Record the digest for a source path
    pub fn set(&mut self, source: &Path, digest: String) {
        self.signatures.insert(signature_key(source), Value::String(digest));
    }

    /// Serialize the store, honoring the configured indent
    pub fn to_json(&self) -> Result<String, ShrinkError> {
        let to_signature_err = |e: serde_json::Error| ShrinkError::Signature(e.to_string());

        match self.indent {
            Some(width) if width > 0 => {
                let indent = vec![b' '; width];
                let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
                let mut out = Vec::new();
                let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
                serde::Serialize::serialize(&self.signatures, &mut serializer)
                    .map_err(to_signature_err)?;
                String::from_utf8(out).map_err(|e| ShrinkError::Signature(e.to_string()))
            }
            _ => serde_json::to_string(&self.signatures).map_err(to_signature_err),
        }
    }

    /// Overwrite the signature file with the current mapping
    pub async fn save(&self) -> Result<(), ShrinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = self.to_json()?;
        fs::write(&self.path, content).await.map_err(|e| {
            ShrinkError::Signature(format!("failed to write {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}
