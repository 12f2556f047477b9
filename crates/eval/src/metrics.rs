//! Metric aggregation over probability rows and true labels.
//!
//! Every degenerate denominator (a class with no positives, no predicted
//! positives, or a single-class test set for AUC) reports 0.0 instead of
//! NaN, so summaries never divide by zero.

use lesion_dataset::LABEL_MELANOMA;

/// Arg-max decision rule over one probability row. Ties go to benign,
/// matching first-maximum argmax.
pub fn argmax_prediction(row: &[f32; 2]) -> u8 {
    if row[1] > row[0] {
        1
    } else {
        0
    }
}

pub fn accuracy(probs: &[[f32; 2]], labels: &[u8]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = probs
        .iter()
        .zip(labels)
        .filter(|(row, &label)| argmax_prediction(row) == label)
        .count();
    correct as f64 / labels.len() as f64
}

#[derive(Debug, Clone, Copy)]
pub struct PrecisionRecall {
    /// Per-class precision/recall, indexed by class (0 benign, 1 melanoma).
    pub precision: [f64; 2],
    pub recall: [f64; 2],
    pub mean_precision: f64,
    pub mean_recall: f64,
}

impl PrecisionRecall {
    pub fn melanoma_precision(&self) -> f64 {
        self.precision[LABEL_MELANOMA as usize]
    }

    pub fn melanoma_recall(&self) -> f64 {
        self.recall[LABEL_MELANOMA as usize]
    }
}

pub fn precision_recall(probs: &[[f32; 2]], labels: &[u8]) -> PrecisionRecall {
    let mut tp = [0usize; 2];
    let mut fp = [0usize; 2];
    let mut fneg = [0usize; 2];
    for (row, &label) in probs.iter().zip(labels) {
        let pred = argmax_prediction(row) as usize;
        let label = label as usize;
        if pred == label {
            tp[label] += 1;
        } else {
            fp[pred] += 1;
            fneg[label] += 1;
        }
    }
    let ratio = |num: usize, denom: usize| {
        if denom > 0 {
            num as f64 / denom as f64
        } else {
            0.0
        }
    };
    let precision = [ratio(tp[0], tp[0] + fp[0]), ratio(tp[1], tp[1] + fp[1])];
    let recall = [
        ratio(tp[0], tp[0] + fneg[0]),
        ratio(tp[1], tp[1] + fneg[1]),
    ];
    PrecisionRecall {
        precision,
        recall,
        mean_precision: (precision[0] + precision[1]) / 2.0,
        mean_recall: (recall[0] + recall[1]) / 2.0,
    }
}

/// Area-style summary of one class's precision-recall curve: samples are
/// ranked by score descending (stable on ties), and AP averages the
/// precision at each positive hit. A class with no positives reports 0.0.
pub fn average_precision(scores: &[f32], positives: &[bool]) -> f64 {
    let n_pos = positives.iter().filter(|p| **p).count();
    if n_pos == 0 {
        return 0.0;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut hits = 0usize;
    let mut precision_sum = 0.0f64;
    for (rank, &idx) in order.iter().enumerate() {
        if positives[idx] {
            hits += 1;
            precision_sum += hits as f64 / (rank + 1) as f64;
        }
    }
    precision_sum / n_pos as f64
}

pub fn mean_average_precision(probs: &[[f32; 2]], labels: &[u8]) -> f64 {
    let mut ap_sum = 0.0;
    for class in 0..2u8 {
        let scores: Vec<f32> = probs.iter().map(|row| row[class as usize]).collect();
        let positives: Vec<bool> = labels.iter().map(|&l| l == class).collect();
        ap_sum += average_precision(&scores, &positives);
    }
    ap_sum / 2.0
}

/// Area under the ROC curve by rank-based integration (Mann-Whitney), using
/// the melanoma-class probability as the ranking score. Ties receive
/// midpoint ranks. A single-class test set reports 0.0.
pub fn auc(scores: &[f32], labels: &[u8]) -> f64 {
    let n_pos = labels.iter().filter(|&&l| l == LABEL_MELANOMA).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal));

    // Midpoint ranks over tie groups, 1-based.
    let mut ranks = vec![0.0f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let midpoint = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = midpoint;
        }
        i = j + 1;
    }

    let rank_sum_pos: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(&l, _)| l == LABEL_MELANOMA)
        .map(|(_, &r)| r)
        .sum();
    (rank_sum_pos - n_pos as f64 * (n_pos as f64 + 1.0) / 2.0) / (n_pos as f64 * n_neg as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_PROBS: [[f32; 2]; 4] = [[0.9, 0.1], [0.2, 0.8], [0.6, 0.4], [0.3, 0.7]];
    const SCENARIO_LABELS: [u8; 4] = [0, 1, 0, 1];

    #[test]
    fn perfect_scenario_has_full_accuracy_and_auc() {
        let preds: Vec<u8> = SCENARIO_PROBS.iter().map(argmax_prediction).collect();
        assert_eq!(preds, vec![0, 1, 0, 1]);
        assert_eq!(accuracy(&SCENARIO_PROBS, &SCENARIO_LABELS), 1.0);

        let scores: Vec<f32> = SCENARIO_PROBS.iter().map(|r| r[1]).collect();
        assert_eq!(auc(&scores, &SCENARIO_LABELS), 1.0);
        assert_eq!(mean_average_precision(&SCENARIO_PROBS, &SCENARIO_LABELS), 1.0);

        let pr = precision_recall(&SCENARIO_PROBS, &SCENARIO_LABELS);
        assert_eq!(pr.mean_precision, 1.0);
        assert_eq!(pr.mean_recall, 1.0);
        assert_eq!(pr.melanoma_precision(), 1.0);
        assert_eq!(pr.melanoma_recall(), 1.0);
    }

    #[test]
    fn auc_is_one_when_all_melanoma_rank_above_benign() {
        let scores = [0.55f32, 0.6, 0.1, 0.2, 0.3];
        let labels = [1u8, 1, 0, 0, 0];
        assert_eq!(auc(&scores, &labels), 1.0);
    }

    #[test]
    fn auc_uses_midpoint_ranks_on_ties() {
        // One tied positive/negative pair contributes 0.5.
        let scores = [0.5f32, 0.5];
        let labels = [1u8, 0];
        assert_eq!(auc(&scores, &labels), 0.5);
    }

    #[test]
    fn auc_half_for_random_interleaving() {
        let scores = [0.1f32, 0.2, 0.3, 0.4];
        let labels = [1u8, 0, 1, 0];
        assert!((auc(&scores, &labels) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn absent_class_reports_zero_not_nan() {
        let probs = [[0.9f32, 0.1], [0.8, 0.2]];
        let labels = [0u8, 0];
        let pr = precision_recall(&probs, &labels);
        assert_eq!(pr.recall[1], 0.0);
        assert_eq!(pr.precision[1], 0.0);
        assert!(pr.mean_recall.is_finite());
        assert_eq!(auc(&[0.1, 0.2], &labels), 0.0);
        assert_eq!(average_precision(&[0.1, 0.2], &[false, false]), 0.0);
    }

    #[test]
    fn average_precision_penalizes_bad_ranking() {
        // Positive ranked last of three: AP = 1/3.
        let scores = [0.9f32, 0.8, 0.1];
        let positives = [false, false, true];
        assert!((average_precision(&scores, &positives) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn argmax_tie_goes_to_benign() {
        assert_eq!(argmax_prediction(&[0.5, 0.5]), 0);
    }

    #[test]
    fn accuracy_agrees_after_formatting_round_trip() {
        // Rows that round to exact 0.5/0.5 ties must yield the same decision
        // before and after the shortest round-trip write/parse cycle.
        let probs = [[0.5f32, 0.5], [0.49999997, 0.50000003], [0.1, 0.9]];
        let labels = [0u8, 0, 1];
        let reparsed: Vec<[f32; 2]> = probs
            .iter()
            .map(|row| {
                let text = format!("{},{}", row[0], row[1]);
                let (a, b) = text.split_once(',').unwrap();
                [a.parse().unwrap(), b.parse().unwrap()]
            })
            .collect();
        for (a, b) in probs.iter().zip(&reparsed) {
            assert_eq!(argmax_prediction(a), argmax_prediction(b));
        }
        assert_eq!(accuracy(&probs, &labels), accuracy(&reparsed, &labels));
    }
}
