//! Evaluation pipeline for the lesion classifier: ordered batch loop,
//! results-file hand-off, metrics aggregation, and attention visualization.

pub mod metrics;
pub mod results;
pub mod run;
pub mod visualize;

/// Backend alias for evaluation (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type EvalBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type EvalBackend = burn_ndarray::NdArray<f32>;

pub use run::{load_attn_vgg_from_checkpoint, run_eval, BackendKind, EvalArgs, EvalSummary};

pub mod prelude {
    pub use crate::metrics::{accuracy, auc, mean_average_precision, precision_recall};
    pub use crate::results::{read_results, ResultsWriter};
    pub use crate::run::{run_eval, EvalArgs, EvalSummary};
    pub use crate::EvalBackend;
}
