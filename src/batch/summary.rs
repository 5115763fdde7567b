//! # Batch Summary Module
//!
//! Riepilogo aggregato di un batch: immagini saltate, compresse, fallite e
//! byte risparmiati.

use crate::{file_manager::FileManager, job::JobRecord};

/// Aggregate figures for one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub skipped: usize,
    pub compressed: usize,
    pub failed: usize,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

impl BatchSummary {
    pub fn from_records(skipped: usize, records: &[JobRecord]) -> Self {
        let mut summary = Self {
            skipped,
            ..Default::default()
        };

        for record in records {
            if record.is_failed() {
                summary.failed += 1;
                continue;
            }

            let source_size = record.source_size.unwrap_or(0);
            summary.compressed += 1;
            summary.input_bytes += source_size;
            summary.output_bytes += match (&record.result, record.downloaded()) {
                (Some(result), true) => result.output_size,
                _ => source_size,
            };
        }

        summary
    }

    pub fn savings(&self) -> u64 {
        self.input_bytes.saturating_sub(self.output_bytes)
    }

    /// Output over input, rounded to four decimals
    pub fn ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            0.0
        } else {
            (self.output_bytes as f64 / self.input_bytes as f64 * 10000.0).round() / 10000.0
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Skipped: {}, Compressed: {}, ",
            images(self.skipped),
            images(self.compressed)
        );
        if self.failed > 0 {
            out.push_str(&format!("Failed: {}, ", images(self.failed)));
        }
        out.push_str(&format!(
            "Savings: {} (ratio: {})",
            FileManager::format_size(self.savings()),
            self.ratio()
        ));
        out
    }
}

fn images(count: usize) -> String {
    if count == 1 {
        "1 image".to_string()
    } else {
        format!("{} images", count)
    }
}
