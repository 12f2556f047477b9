use clap::Parser;
use eval::{run_eval, EvalArgs};

fn main() -> anyhow::Result<()> {
    let args = EvalArgs::parse();
    let summary = run_eval(&args)?;
    println!(
        "\ntest result: accuracy {:.2}%\nmean precision {:.2}% mean recall {:.2}%\nprecision for mel {:.2}% recall for mel {:.2}%\nmAP {:.2}% AUC {:.4}",
        100.0 * summary.accuracy,
        100.0 * summary.mean_precision,
        100.0 * summary.mean_recall,
        100.0 * summary.precision_mel,
        100.0 * summary.recall_mel,
        100.0 * summary.map,
        summary.auc
    );
    Ok(())
}
