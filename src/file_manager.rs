//! # File Management Module
//!
//! Questo modulo gestisce le operazioni sui file locali e la risoluzione
//! delle coppie sorgente → destinazione per la CLI.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva di immagini in directory
//! - Determinazione formato file supportato dal servizio (PNG, JPEG, WebP)
//! - Calcolo path di destinazione (directory di output + suffisso)
//! - Copia sicura sorgente → destinazione con creazione directory
//! - Formattazione human-readable delle dimensioni
//!
//! ## Esempio:
//! ```rust,ignore
//! let mappings = FileManager::resolve_mappings(&sources, Some(&dest), Some(".min"))?;
//! for mapping in mappings {
//!     println!("{} -> {}", mapping.source.display(), mapping.destination.display());
//! }
//! ```

use crate::{config::FileMapping, error::ShrinkError};
use anyhow::Result;
use image::ImageFormat;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

/// Manages file operations and discovery
pub struct FileManager;

impl FileManager {
    /// Check if the service can compress this file
    pub fn is_supported_image(path: &Path) -> bool {
        matches!(
            ImageFormat::from_path(path),
            Ok(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP)
        )
    }

    /// Find all supported images below a directory
    pub fn find_images(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| Self::is_supported_image(path))
            .collect();
        files.sort();
        files
    }

    /// Destination for `source`, relative to `base`, inside `dest_dir`.
    ///
    /// `suffix` is inserted before the extension (`large.png` → `large.min.png`).
    pub fn destination_for(
        source: &Path,
        base: &Path,
        dest_dir: Option<&Path>,
        suffix: Option<&str>,
    ) -> Result<PathBuf> {
        let file_name = Self::suffixed_name(source, suffix)?;

        let target = match dest_dir {
            Some(dest_dir) => {
                let relative = source
                    .strip_prefix(base)
                    .ok()
                    .and_then(Path::parent)
                    .unwrap_or(Path::new(""));
                dest_dir.join(relative).join(file_name)
            }
            None => source.with_file_name(file_name),
        };

        debug!("Resolved destination: {} -> {}", source.display(), target.display());
        Ok(target)
    }

    fn suffixed_name(source: &Path, suffix: Option<&str>) -> Result<String> {
        let stem = source
            .file_stem()
            .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", source.display()))?
            .to_string_lossy();

        let suffix = suffix.unwrap_or("");
        Ok(match source.extension() {
            Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
            None => format!("{}{}", stem, suffix),
        })
    }

    /// Expand CLI sources (files or directories) into resolved mappings
    pub fn resolve_mappings(
        sources: &[PathBuf],
        dest_dir: Option<&Path>,
        suffix: Option<&str>,
    ) -> Result<Vec<FileMapping>> {
        let mut mappings = Vec::new();

        for source in sources {
            if source.is_dir() {
                for file in Self::find_images(source) {
                    let destination = Self::destination_for(&file, source, dest_dir, suffix)?;
                    mappings.push(FileMapping::new(file, destination));
                }
            } else {
                // Missing files are kept so the batch can warn about them
                let base = source.parent().unwrap_or(Path::new(""));
                let destination = Self::destination_for(source, base, dest_dir, suffix)?;
                mappings.push(FileMapping::new(source.clone(), destination));
            }
        }

        Ok(mappings)
    }

    /// Parse an explicit `SRC=DEST` pair
    pub fn parse_pair(pair: &str) -> Result<FileMapping> {
        match pair.split_once('=') {
            Some((source, destination)) if !source.is_empty() && !destination.is_empty() => {
                Ok(FileMapping::new(source, destination))
            }
            _ => Err(anyhow::anyhow!("Invalid pair '{}', expected SRC=DEST", pair)),
        }
    }

    /// Create the parent directories of `path` if needed
    pub async fn ensure_parent_dirs(path: &Path) -> Result<(), ShrinkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// Byte-for-byte copy, a no-op when both paths name the same file
    pub async fn copy_file(source: &Path, destination: &Path) -> Result<(), ShrinkError> {
        if Self::same_path(source, destination) {
            debug!("Keeping {} in place", source.display());
            return Ok(());
        }

        Self::ensure_parent_dirs(destination).await?;
        fs::copy(source, destination).await?;
        debug!("Copied original {} to {}", source.display(), destination.display());
        Ok(())
    }

    fn same_path(a: &Path, b: &Path) -> bool {
        let normalize = |p: &Path| -> PathBuf {
            p.components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect()
        };
        normalize(a) == normalize(b)
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}
