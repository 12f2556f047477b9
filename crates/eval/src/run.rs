//! The evaluation entry point: configuration, checkpoint loading, the batch
//! loop, and summary aggregation.

use crate::metrics::{accuracy, argmax_prediction, auc, mean_average_precision, precision_recall};
use crate::results::{read_results, ResultsWriter};
use crate::visualize::{
    batch_to_display_images, make_grid, render_attention_grid, EventWriter, GRID_NROW,
};
use crate::EvalBackend;
use anyhow::Context;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use clap::{Parser, ValueEnum};
use lesion_dataset::{preprocess_data, read_manifest, BatchIter, EvalTransform};
use models::{AttnVgg, AttnVggConfig};
use std::path::{Path, PathBuf};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate an AttnVgg checkpoint on the ISIC2016 test set (accuracy, precision/recall, mAP, AUC)"
)]
pub struct EvalArgs {
    /// Run the one-time dataset preparation step before evaluating.
    #[arg(long, default_value_t = false)]
    pub preprocess: bool,
    /// Directory for visualization logs.
    #[arg(long, default_value = "logs_test")]
    pub outf: PathBuf,
    /// Base upsampling factor for attention-map rendering (maps 2/3 use 2x/4x).
    #[arg(long, default_value_t = 8)]
    pub base_up_factor: u32,
    /// Normalize attention maps with a spatial softmax; sigmoid otherwise.
    #[arg(long, default_value_t = false)]
    pub normalize_attn: bool,
    /// Disable the attention branch entirely.
    #[arg(long, default_value_t = false)]
    pub no_attention: bool,
    /// Log image and attention-map visualizations.
    #[arg(long, default_value_t = false)]
    pub log_images: bool,
    /// Dataset root containing the test images and ground truth.
    #[arg(long, default_value = "data_2016")]
    pub dataset_root: PathBuf,
    /// Ground-truth CSV used by --preprocess, relative to the dataset root.
    #[arg(long, default_value = "Test_GroundTruth.csv")]
    pub ground_truth: String,
    /// Evaluation manifest (written by --preprocess).
    #[arg(long, default_value = "test.csv")]
    pub manifest: PathBuf,
    /// Checkpoint path to load.
    #[arg(long, default_value = "net.bin")]
    pub checkpoint: PathBuf,
    /// Results file written by the loop and read back by the aggregator.
    #[arg(long, default_value = "test_results.csv")]
    pub results: PathBuf,
    /// Batch size.
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,
    /// Resize side length applied before cropping.
    #[arg(long, default_value_t = 256)]
    pub resize: u32,
    /// Center-crop side length fed to the model.
    #[arg(long, default_value_t = 224)]
    pub crop: u32,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

#[derive(Debug, Clone, Copy)]
pub struct EvalSummary {
    pub total: usize,
    pub accuracy: f64,
    pub mean_precision: f64,
    pub mean_recall: f64,
    pub precision_mel: f64,
    pub recall_mel: f64,
    pub map: f64,
    pub auc: f64,
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            println!("note: built with backend-wgpu; evaluation will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

pub fn load_attn_vgg_from_checkpoint<P: AsRef<Path>>(
    path: P,
    cfg: AttnVggConfig,
    device: &<EvalBackend as Backend>::Device,
) -> Result<AttnVgg<EvalBackend>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    AttnVgg::<EvalBackend>::new(cfg, device).load_file(path.as_ref(), &recorder, device)
}

fn to_vec_f32<const D: usize>(tensor: Tensor<EvalBackend, D>) -> anyhow::Result<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("tensor readback failed: {e:?}"))
}

/// Run the full evaluation: one ordered pass over the manifest, the results
/// file write, optional visualization, then metrics aggregation from the
/// results file. Any batch error is fatal and may leave a truncated results
/// file behind.
pub fn run_eval(args: &EvalArgs) -> anyhow::Result<EvalSummary> {
    validate_backend_choice(args.backend)?;
    // Five 2x2 pooling stages need at least 32px on each side.
    anyhow::ensure!(args.crop >= 32, "crop must be at least 32, got {}", args.crop);

    if args.preprocess {
        let gt = args.dataset_root.join(&args.ground_truth);
        let count = preprocess_data(&args.dataset_root, &gt, &args.manifest)?;
        println!(
            "preprocessed {count} samples into {}",
            args.manifest.display()
        );
    }

    let transform = EvalTransform {
        resize: (args.resize, args.resize),
        crop: args.crop,
        ..Default::default()
    };
    println!("loading the dataset ({})", transform.describe());
    let entries = read_manifest(&args.manifest)?;
    anyhow::ensure!(
        !entries.is_empty(),
        "manifest {} contains no samples",
        args.manifest.display()
    );
    let labels: Vec<u8> = entries.iter().map(|e| e.label).collect();

    let attention = !args.no_attention;
    println!(
        "loading the model (attention {}, {} normalization)",
        if attention { "on" } else { "off" },
        if args.normalize_attn { "softmax" } else { "sigmoid" }
    );
    let device = <EvalBackend as Backend>::Device::default();
    let cfg = AttnVggConfig {
        num_classes: 2,
        attention,
        normalize_attn: args.normalize_attn,
    };
    // A missing or unreadable checkpoint is fatal: metrics from freshly
    // initialized weights would be meaningless.
    let model = load_attn_vgg_from_checkpoint(&args.checkpoint, cfg, &device).map_err(|e| {
        anyhow::anyhow!(
            "failed to load checkpoint {}: {e}",
            args.checkpoint.display()
        )
    })?;

    let mut iter = BatchIter::new(entries, transform.clone(), args.batch_size);
    let mut writer = ResultsWriter::create(&args.results)?;
    let mut events = if args.log_images {
        Some(EventWriter::create(&args.outf)?)
    } else {
        None
    };

    let mut total = 0usize;
    let mut correct = 0usize;
    let mut batch_index = 0usize;
    while let Some(batch) = iter.next_batch::<EvalBackend>(&device)? {
        let [bsz, _, height, width] = batch.images.dims();
        let scores = model.forward(batch.images.clone()).scores;
        let probs = to_vec_f32(softmax(scores, 1))?;
        let batch_labels: Vec<i64> = batch
            .labels
            .clone()
            .into_data()
            .to_vec::<i64>()
            .map_err(|e| anyhow::anyhow!("tensor readback failed: {e:?}"))?;

        // Decide from the probability rows that go into the results file so
        // the loop and the aggregator apply one decision rule to one input.
        total += bsz;
        let correct_idx: Vec<usize> = probs
            .chunks_exact(2)
            .zip(&batch_labels)
            .enumerate()
            .filter(|(_, (row, &l))| argmax_prediction(&[row[0], row[1]]) as i64 == l)
            .map(|(i, _)| i)
            .collect();
        correct += correct_idx.len();

        for row in probs.chunks_exact(2) {
            writer.write_row([row[0], row[1]])?;
        }

        if let Some(events) = events.as_mut() {
            if !correct_idx.is_empty() {
                let images_data = to_vec_f32(batch.images)?;
                let sample_len = 3 * height * width;
                let selected: Vec<f32> = correct_idx
                    .iter()
                    .flat_map(|&i| images_data[i * sample_len..(i + 1) * sample_len].iter().copied())
                    .collect();
                let displays = batch_to_display_images(
                    &selected,
                    correct_idx.len(),
                    height,
                    width,
                    transform.mean,
                    transform.std,
                );
                events.log_image("test/image", batch_index, &make_grid(&displays, GRID_NROW))?;

                if attention {
                    // Re-run forward restricted to the correct samples to get
                    // their attention maps.
                    let sub = Tensor::<EvalBackend, 1>::from_floats(selected.as_slice(), &device)
                        .reshape([correct_idx.len(), 3, height, width]);
                    let sub_out = model.forward(sub);
                    for (level, map) in sub_out.attn.iter().enumerate() {
                        let Some(map) = map else { continue };
                        let [_, _, map_h, map_w] = map.dims();
                        let data = to_vec_f32(map.clone())?;
                        let maps: Vec<Vec<f32>> =
                            data.chunks(map_h * map_w).map(|c| c.to_vec()).collect();
                        let grid = render_attention_grid(
                            &maps,
                            map_h,
                            map_w,
                            args.base_up_factor << level,
                            args.normalize_attn,
                            &displays,
                            GRID_NROW,
                        );
                        events.log_image(
                            &format!("test/attention_map_{}", level + 1),
                            batch_index,
                            &grid,
                        )?;
                    }
                }
            }
        }
        batch_index += 1;
    }

    let rows = writer.finish()?;
    anyhow::ensure!(
        rows == labels.len(),
        "results file has {rows} rows but the manifest has {} entries",
        labels.len()
    );

    let probs = read_results(&args.results)
        .with_context(|| format!("metrics aggregation over {}", args.results.display()))?;
    anyhow::ensure!(
        probs.len() == labels.len(),
        "results file read back {} rows, expected {}",
        probs.len(),
        labels.len()
    );

    let loop_accuracy = correct as f64 / total as f64;
    let file_accuracy = accuracy(&probs, &labels);
    anyhow::ensure!(
        (loop_accuracy - file_accuracy).abs() < 1e-9,
        "loop accuracy {loop_accuracy} disagrees with results-file accuracy {file_accuracy}"
    );

    let pr = precision_recall(&probs, &labels);
    let scores: Vec<f32> = probs.iter().map(|row| row[1]).collect();
    Ok(EvalSummary {
        total,
        accuracy: loop_accuracy,
        mean_precision: pr.mean_precision,
        mean_recall: pr.mean_recall,
        precision_mel: pr.melanoma_precision(),
        recall_mel: pr.melanoma_recall(),
        map: mean_average_precision(&probs, &labels),
        auc: auc(&scores, &labels),
    })
}
