//! # Collection Module
//!
//! Fase `collecting` del batch: per ogni coppia sorgente → destinazione decide
//! se il file va compresso, saltato (firma invariata) o scartato (sorgente mancante).

use crate::{
    config::FileMapping,
    error::ShrinkError,
    signature::{self, SignatureStore},
};
use futures::{StreamExt, TryStreamExt};
use tokio::fs;
use tracing::{debug, warn};

/// Sources hashed at the same time while collecting
pub const MAX_OPEN_SOURCES: usize = 32;

/// Outcome of the skip check for one mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Process(FileMapping),
    Unchanged(FileMapping),
    Missing(FileMapping),
}

/// Decide what to do with one mapping.
///
/// The signature is only consulted when a store is given, the destination
/// already exists and `force` is off.
pub async fn decide(
    mapping: FileMapping,
    store: Option<&SignatureStore>,
    force: bool,
) -> Result<Decision, ShrinkError> {
    let is_file = fs::metadata(&mapping.source)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if !is_file {
        warn!("Source file \"{}\" not found.", mapping.source.display());
        return Ok(Decision::Missing(mapping));
    }

    let store = match store {
        Some(store) if !force => store,
        _ => return Ok(Decision::Process(mapping)),
    };
    if !fs::try_exists(&mapping.destination).await.unwrap_or(false) {
        return Ok(Decision::Process(mapping));
    }

    let expected = store.get(&mapping.source);
    if signature::matches_digest(&mapping.source, expected).await? {
        debug!("Skipping unchanged {}", mapping.source.display());
        Ok(Decision::Unchanged(mapping))
    } else {
        Ok(Decision::Process(mapping))
    }
}

/// Decide every mapping, keeping the input order.
///
/// At most `MAX_OPEN_SOURCES` decisions run at once, so large batches stay
/// under the open file limit.
pub async fn collect(
    mappings: Vec<FileMapping>,
    store: Option<&SignatureStore>,
    force: bool,
) -> Result<Vec<Decision>, ShrinkError> {
    futures::stream::iter(mappings)
        .map(|mapping| decide(mapping, store, force))
        .buffered(MAX_OPEN_SOURCES)
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    async fn store_with(dir: &Path, source: &Path) -> SignatureStore {
        let mut store = SignatureStore::load(&dir.join("sigs.json"), None).await.unwrap();
        let digest = signature::file_digest(source).await.unwrap();
        store.set(source, digest);
        store
    }

    #[tokio::test]
    async fn test_missing_source_is_excluded() {
        let temp_dir = TempDir::new().unwrap();
        let mapping = FileMapping::new(temp_dir.path().join("nope.png"), temp_dir.path().join("out.png"));
        let decision = decide(mapping.clone(), None, false).await.unwrap();
        assert_eq!(decision, Decision::Missing(mapping));

        let directory = FileMapping::new(temp_dir.path(), temp_dir.path().join("out.png"));
        let decision = decide(directory.clone(), None, false).await.unwrap();
        assert_eq!(decision, Decision::Missing(directory));
    }

    #[tokio::test]
    async fn test_unchanged_source_with_existing_destination_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.png");
        let destination = temp_dir.path().join("a.min.png");
        std::fs::write(&source, b"original").unwrap();
        std::fs::write(&destination, b"small").unwrap();

        let store = store_with(temp_dir.path(), &source).await;
        let mapping = FileMapping::new(&source, &destination);

        let decision = decide(mapping.clone(), Some(&store), false).await.unwrap();
        assert_eq!(decision, Decision::Unchanged(mapping.clone()));

        let forced = decide(mapping.clone(), Some(&store), true).await.unwrap();
        assert_eq!(forced, Decision::Process(mapping.clone()));

        let unchecked = decide(mapping.clone(), None, false).await.unwrap();
        assert_eq!(unchecked, Decision::Process(mapping));
    }

    #[tokio::test]
    async fn test_changed_or_unsigned_sources_are_processed() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.png");
        let destination = temp_dir.path().join("a.min.png");
        std::fs::write(&source, b"original").unwrap();
        std::fs::write(&destination, b"small").unwrap();

        let store = store_with(temp_dir.path(), &source).await;
        std::fs::write(&source, b"edited").unwrap();
        let mapping = FileMapping::new(&source, &destination);
        assert_eq!(
            decide(mapping.clone(), Some(&store), false).await.unwrap(),
            Decision::Process(mapping)
        );

        let other = temp_dir.path().join("b.png");
        std::fs::write(&other, b"new").unwrap();
        let unsigned = FileMapping::new(&other, &destination);
        assert_eq!(
            decide(unsigned.clone(), Some(&store), false).await.unwrap(),
            Decision::Process(unsigned)
        );
    }

    #[tokio::test]
    async fn test_missing_destination_is_processed_even_when_signed() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a.png");
        std::fs::write(&source, b"original").unwrap();

        let store = store_with(temp_dir.path(), &source).await;
        let mapping = FileMapping::new(&source, temp_dir.path().join("gone.png"));
        assert_eq!(
            decide(mapping.clone(), Some(&store), false).await.unwrap(),
            Decision::Process(mapping)
        );
    }

    #[tokio::test]
    async fn test_collect_keeps_order() {
        let temp_dir = TempDir::new().unwrap();
        let mut mappings = Vec::new();
        for i in 0..4 {
            let source = temp_dir.path().join(format!("{}.png", i));
            if i != 2 {
                std::fs::write(&source, [i as u8]).unwrap();
            }
            mappings.push(FileMapping::new(source, temp_dir.path().join(format!("{}.min.png", i))));
        }

        let decisions = collect(mappings.clone(), None, false).await.unwrap();
        assert_eq!(decisions[0], Decision::Process(mappings[0].clone()));
        assert_eq!(decisions[2], Decision::Missing(mappings[2].clone()));
        assert_eq!(decisions[3], Decision::Process(mappings[3].clone()));
    }

    #[tokio::test]
    async fn test_collect_large_signed_batch() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = SignatureStore::load(&temp_dir.path().join("sigs.json"), None)
            .await
            .unwrap();

        let count = MAX_OPEN_SOURCES * 100;
        let mut mappings = Vec::with_capacity(count);
        for i in 0..count {
            let source = temp_dir.path().join(format!("{}.png", i));
            let destination = temp_dir.path().join(format!("{}.min.png", i));
            std::fs::write(&source, i.to_string()).unwrap();
            std::fs::write(&destination, b"min").unwrap();
            store.set(&source, signature::file_digest(&source).await.unwrap());
            mappings.push(FileMapping::new(source, destination));
        }

        let decisions = collect(mappings.clone(), Some(&store), false).await.unwrap();
        assert_eq!(decisions.len(), count);
        for (decision, mapping) in decisions.iter().zip(&mappings) {
            assert_eq!(decision, &Decision::Unchanged(mapping.clone()));
        }
    }
}
