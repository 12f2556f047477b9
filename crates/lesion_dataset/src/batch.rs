//! Batch iteration over the evaluation manifest.

use crate::transform::EvalTransform;
use crate::types::{DatasetError, DatasetResult, LesionBatch, ManifestEntry, Sample};
use burn::tensor::{Int, Tensor, TensorData};
use rayon::prelude::*;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

/// Yields `LesionBatch`es in manifest order, never shuffled.
///
/// Decoding runs in parallel with rayon, then results are re-sorted by slice
/// index so batch contents always match manifest order. Any decode or I/O
/// error aborts iteration; there is no permissive skip mode.
pub struct BatchIter {
    entries: Vec<ManifestEntry>,
    transform: EvalTransform,
    batch_size: usize,
    cursor: usize,
    processed_samples: usize,
    processed_batches: usize,
    started: Instant,
    total_decode_time: Duration,
    last_log: Instant,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
    images_buf: Vec<f32>,
    labels_buf: Vec<i64>,
}

impl BatchIter {
    pub fn new(entries: Vec<ManifestEntry>, transform: EvalTransform, batch_size: usize) -> Self {
        let log_every_samples = match std::env::var("LESION_DATASET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let now = Instant::now();
        Self {
            entries,
            transform,
            batch_size: batch_size.max(1),
            cursor: 0,
            processed_samples: 0,
            processed_batches: 0,
            started: now,
            total_decode_time: Duration::ZERO,
            last_log: now,
            last_logged_samples: 0,
            log_every_samples,
            images_buf: Vec::new(),
            labels_buf: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_batch<B: burn::tensor::backend::Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<LesionBatch<B>>> {
        if self.cursor >= self.entries.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.entries.len());
        let slice = &self.entries[self.cursor..end];
        self.cursor = end;

        self.images_buf.clear();
        self.labels_buf.clear();

        let t_decode = Instant::now();
        let mut loaded: Vec<_> = slice
            .par_iter()
            .enumerate()
            .map(|(i, entry)| (i, load_sample(entry, &self.transform)))
            .collect();
        loaded.sort_by_key(|(i, _)| *i);
        let decode_elapsed = t_decode.elapsed();

        let mut expected_size: Option<(u32, u32)> = None;
        for (_i, res) in loaded {
            let sample = res?;
            let size = (sample.width, sample.height);
            match expected_size {
                None => expected_size = Some(size),
                Some(sz) if sz != size => {
                    return Err(DatasetError::Other(
                        "batch contains varying image sizes after transform".to_string(),
                    ));
                }
                _ => {}
            }
            self.images_buf.extend_from_slice(&sample.image_chw);
            self.labels_buf.push(sample.label as i64);
        }

        let (width, height) = expected_size.expect("non-empty slice sets size");
        let batch_len = self.labels_buf.len();
        let images = Tensor::<B, 1>::from_floats(self.images_buf.as_slice(), device).reshape([
            batch_len,
            3,
            height as usize,
            width as usize,
        ]);
        let labels = Tensor::<B, 1, Int>::from_data(
            TensorData::new(self.labels_buf.clone(), [batch_len]),
            device,
        );

        self.processed_samples += batch_len;
        self.processed_batches += 1;
        self.total_decode_time += decode_elapsed;
        self.maybe_log_progress();

        Ok(Some(LesionBatch { images, labels }))
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        let since_last = self.last_log.elapsed();
        if processed_since < threshold && since_last < Duration::from_secs(30) {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let rate = self.processed_samples as f32 / secs;
        let avg_decode_ms = if self.processed_batches > 0 {
            (self.total_decode_time.as_secs_f64() * 1000.0) / self.processed_batches as f64
        } else {
            0.0
        };
        eprintln!(
            "[dataset] batches={} samples={} elapsed={:.1}s rate={:.1} img/s avg_decode_ms={:.2}",
            self.processed_batches, self.processed_samples, secs, rate, avg_decode_ms
        );
        self.last_logged_samples = self.processed_samples;
        self.last_log = Instant::now();
    }
}

fn load_sample(entry: &ManifestEntry, transform: &EvalTransform) -> DatasetResult<Sample> {
    if !entry.image.exists() {
        return Err(DatasetError::MissingImage {
            path: entry.image.clone(),
        });
    }
    let img = image::open(&entry.image)
        .map_err(|e| DatasetError::Image {
            path: entry.image.clone(),
            source: e,
        })?
        .to_rgb8();
    Ok(transform.apply(img, entry.label))
}
