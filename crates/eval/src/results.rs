//! The results file: the sole hand-off between the evaluation loop and the
//! metrics aggregator.
//!
//! Format: one row per sample, `p_benign,p_malignant`, no header. Row order
//! is manifest order; there is no explicit sample id (see DESIGN.md for the
//! compatibility decision). Values use Rust's shortest round-trip float
//! formatting, so write-then-read reproduces the f32 bits exactly and two
//! identical runs produce byte-identical files.

use anyhow::Context;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct ResultsWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    rows: usize,
}

impl ResultsWriter {
    /// Create (or truncate) the results file. Strictly sequential,
    /// single-writer.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create results file {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            rows: 0,
        })
    }

    pub fn write_row(&mut self, row: [f32; 2]) -> anyhow::Result<()> {
        writeln!(self.writer, "{},{}", row[0], row[1])
            .with_context(|| format!("failed to write results row to {}", self.path.display()))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and return the number of rows written.
    pub fn finish(mut self) -> anyhow::Result<usize> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush results file {}", self.path.display()))?;
        Ok(self.rows)
    }
}

/// Read the whole results file back. Malformed rows are fatal.
pub fn read_results(path: &Path) -> anyhow::Result<Vec<[f32; 2]>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read results file {}", path.display()))?;
    let mut rows = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (benign, malignant) = line
            .split_once(',')
            .with_context(|| format!("{}: line {}: expected two columns", path.display(), lineno + 1))?;
        let parse = |s: &str| -> anyhow::Result<f32> {
            s.trim()
                .parse()
                .with_context(|| format!("{}: line {}: bad float `{s}`", path.display(), lineno + 1))
        };
        rows.push([parse(benign)?, parse(malignant)?]);
    }
    Ok(rows)
}
