//! Reading and producing the evaluation manifest.
//!
//! The manifest is a headerless CSV, one `image_path,label` row per sample.
//! Row order is the iteration order for the whole pipeline: the results file
//! written during evaluation is linked back to labels purely by position, so
//! two reads of the same manifest must yield identical sequences.

use crate::types::{DatasetError, DatasetResult, ManifestEntry, LABEL_BENIGN, LABEL_MELANOMA};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Parse a manifest file. Relative image paths resolve against the
/// manifest's parent directory. Malformed rows are fatal.
pub fn read_manifest(path: &Path) -> DatasetResult<Vec<ManifestEntry>> {
    let raw = fs::read_to_string(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut entries = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (image, label) = line.rsplit_once(',').ok_or_else(|| DatasetError::Csv {
            path: path.to_path_buf(),
            msg: format!("line {}: expected `image_path,label`", lineno + 1),
        })?;
        let label = parse_label(label).ok_or_else(|| DatasetError::Csv {
            path: path.to_path_buf(),
            msg: format!("line {}: unrecognized label `{label}`", lineno + 1),
        })?;
        let image = PathBuf::from(image.trim());
        let image = if image.is_absolute() {
            image
        } else {
            base.join(image)
        };
        entries.push(ManifestEntry { image, label });
    }
    Ok(entries)
}

fn parse_label(raw: &str) -> Option<u8> {
    match raw.trim() {
        "0" | "0.0" | "benign" => Some(LABEL_BENIGN),
        "1" | "1.0" | "malignant" | "melanoma" => Some(LABEL_MELANOMA),
        _ => None,
    }
}

/// One-time dataset preparation (`--preprocess`).
///
/// Reads an ISIC-style ground-truth CSV (`image_id,label` rows, where the
/// label is `benign`/`malignant` or `0.0`/`1.0`), resolves each image file
/// under `root`, and writes the evaluation manifest sorted by image id.
/// A ground-truth row whose image file cannot be found is fatal.
pub fn preprocess_data(root: &Path, gt_csv: &Path, out_manifest: &Path) -> DatasetResult<usize> {
    let raw = fs::read_to_string(gt_csv).map_err(|e| DatasetError::Io {
        path: gt_csv.to_path_buf(),
        source: e,
    })?;
    let mut rows: Vec<(String, u8)> = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (id, label) = line.split_once(',').ok_or_else(|| DatasetError::Csv {
            path: gt_csv.to_path_buf(),
            msg: format!("line {}: expected `image_id,label`", lineno + 1),
        })?;
        let label = parse_label(label).ok_or_else(|| DatasetError::Csv {
            path: gt_csv.to_path_buf(),
            msg: format!("line {}: unrecognized label `{label}`", lineno + 1),
        })?;
        rows.push((id.trim().to_string(), label));
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = fs::File::create(out_manifest).map_err(|e| DatasetError::Io {
        path: out_manifest.to_path_buf(),
        source: e,
    })?;
    for (id, label) in &rows {
        let image = resolve_image(root, id).ok_or_else(|| DatasetError::MissingImage {
            path: root.join(id),
        })?;
        writeln!(out, "{},{}", image.display(), label).map_err(|e| DatasetError::Io {
            path: out_manifest.to_path_buf(),
            source: e,
        })?;
    }
    Ok(rows.len())
}

fn resolve_image(root: &Path, id: &str) -> Option<PathBuf> {
    let candidate = root.join(id);
    if candidate.is_file() {
        return Some(candidate);
    }
    for ext in ["jpg", "jpeg", "png"] {
        let candidate = root.join(format!("{id}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
