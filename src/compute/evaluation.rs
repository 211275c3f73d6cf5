// Classification metrics

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Held-out evaluation of a fitted classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub roc_auc: f64,
}

impl EvaluationMetrics {
    /// Computes every metric from true labels, predicted labels and
    /// positive-class probabilities.
    pub fn compute(y_true: &[bool], y_pred: &[bool], y_score: &[f64]) -> Self {
        Self {
            accuracy: accuracy(y_true, y_pred),
            precision: precision(y_true, y_pred),
            recall: recall(y_true, y_pred),
            f1_score: f1_score(y_true, y_pred),
            roc_auc: roc_auc(y_true, y_score),
        }
    }

    /// Metric name to value, as stored on a model version.
    pub fn to_map(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("accuracy".to_string(), self.accuracy),
            ("precision".to_string(), self.precision),
            ("recall".to_string(), self.recall),
            ("f1_score".to_string(), self.f1_score),
            ("roc_auc".to_string(), self.roc_auc),
        ])
    }
}

#[derive(Default)]
struct Confusion {
    tp: usize,
    fp: usize,
    tn: usize,
    fn_: usize,
}

fn confusion(y_true: &[bool], y_pred: &[bool]) -> Confusion {
    let mut c = Confusion::default();
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t, p) {
            (true, true) => c.tp += 1,
            (false, true) => c.fp += 1,
            (false, false) => c.tn += 1,
            (true, false) => c.fn_ += 1,
        }
    }
    c
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn accuracy(y_true: &[bool], y_pred: &[bool]) -> f64 {
    let c = confusion(y_true, y_pred);
    ratio(c.tp + c.tn, c.tp + c.tn + c.fp + c.fn_)
}

/// Zero when nothing is predicted positive.
pub fn precision(y_true: &[bool], y_pred: &[bool]) -> f64 {
    let c = confusion(y_true, y_pred);
    ratio(c.tp, c.tp + c.fp)
}

/// Zero when there are no positives.
pub fn recall(y_true: &[bool], y_pred: &[bool]) -> f64 {
    let c = confusion(y_true, y_pred);
    ratio(c.tp, c.tp + c.fn_)
}

pub fn f1_score(y_true: &[bool], y_pred: &[bool]) -> f64 {
    let p = precision(y_true, y_pred);
    let r = recall(y_true, y_pred);
    if p + r == 0.0 {
        0.0
    } else {
        2.0 * p * r / (p + r)
    }
}

/// Area under the ROC curve via the Mann-Whitney rank statistic, with tied
/// scores sharing their average rank. Returns 0.5 when only one class is
/// present.
pub fn roc_auc(y_true: &[bool], y_score: &[f64]) -> f64 {
    let n_pos = y_true.iter().filter(|&&t| t).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..y_score.len()).collect();
    order.sort_by(|&a, &b| y_score[a].total_cmp(&y_score[b]));

    let mut ranks = vec![0.0; order.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && y_score[order[j + 1]] == y_score[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; ties get the mean of i+1..=j+1.
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = avg;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|(&t, _)| t)
        .map(|(_, &r)| r)
        .sum();

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    (pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}
