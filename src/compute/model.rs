// Tree-based churn classifiers

use super::features::FeatureVector;
use crate::error::{ChurnError, Result};
use crate::types::ModelType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Probability at or above which a customer is labelled as churning.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Classifier hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierParams {
    /// Trees (forest) or boosting rounds
    pub n_estimators: usize,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Minimum rows required to split a node
    pub min_samples_split: usize,
    /// Minimum rows in each child
    pub min_samples_leaf: usize,
    /// Shrinkage applied to each boosting round
    pub learning_rate: f64,
    /// Seed for bootstrap and feature sampling
    pub seed: u64,
}

impl ClassifierParams {
    /// Defaults per classifier family
    pub fn for_model_type(model_type: ModelType) -> Self {
        match model_type {
            ModelType::RandomForest => Self {
                n_estimators: 100,
                max_depth: 10,
                min_samples_split: 2,
                min_samples_leaf: 1,
                learning_rate: 1.0,
                seed: 42,
            },
            ModelType::GradientBoosting => Self {
                n_estimators: 100,
                max_depth: 5,
                min_samples_split: 2,
                min_samples_leaf: 1,
                learning_rate: 0.1,
                seed: 42,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(ChurnError::InvalidArgument("n_estimators must be at least 1".into()));
        }
        if self.max_depth == 0 {
            return Err(ChurnError::InvalidArgument("max_depth must be at least 1".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ChurnError::InvalidArgument("learning_rate must be positive".into()));
        }
        Ok(())
    }
}

/// Tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Binary regression tree. Rows with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct TreeBuilder<'a> {
    x: &'a [FeatureVector],
    targets: &'a [f64],
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
    /// Features considered per split; `None` means all
    max_features: Option<usize>,
    leaf_value: &'a dyn Fn(&[usize]) -> f64,
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    cost: f64,
}

impl<'a> TreeBuilder<'a> {
    fn build(mut self, indices: Vec<usize>, rng: &mut StdRng) -> DecisionTree {
        self.grow(indices, 0, rng);
        DecisionTree { nodes: self.nodes }
    }

    fn grow(&mut self, indices: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: (self.leaf_value)(&indices),
        });

        if depth >= self.max_depth || indices.len() < self.min_samples_split {
            return id;
        }

        let parent_cost = sse(self.targets, &indices);
        if parent_cost <= f64::EPSILON {
            return id;
        }

        let Some(split) = self.best_split(&indices, rng) else {
            return id;
        };
        if split.cost >= parent_cost - 1e-12 {
            return id;
        }

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.x[i][split.feature] <= split.threshold);

        let left = self.grow(left_rows, depth + 1, rng);
        let right = self.grow(right_rows, depth + 1, rng);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };

        id
    }

    fn best_split(&self, indices: &[usize], rng: &mut StdRng) -> Option<SplitCandidate> {
        let n_features = self.x[indices[0]].len();
        let features: Vec<usize> = match self.max_features {
            Some(k) if k < n_features => {
                rand::seq::index::sample(rng, n_features, k).into_vec()
            }
            _ => (0..n_features).collect(),
        };

        let total_sum: f64 = indices.iter().map(|&i| self.targets[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| self.targets[i] * self.targets[i]).sum();
        let n = indices.len();

        let mut best: Option<SplitCandidate> = None;
        let mut order = indices.to_vec();

        for feature in features {
            order.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 0..n - 1 {
                let t = self.targets[order[k]];
                left_sum += t;
                left_sq += t * t;

                let here = self.x[order[k]][feature];
                let next = self.x[order[k + 1]][feature];
                if here == next {
                    continue;
                }

                let n_left = k + 1;
                let n_right = n - n_left;
                if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let cost = (left_sq - left_sum * left_sum / n_left as f64)
                    + (right_sq - right_sum * right_sum / n_right as f64);

                if best.as_ref().map_or(true, |b| cost < b.cost) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        cost,
                    });
                }
            }
        }

        best
    }
}

fn sse(targets: &[f64], indices: &[usize]) -> f64 {
    let n = indices.len() as f64;
    let sum: f64 = indices.iter().map(|&i| targets[i]).sum();
    let sq: f64 = indices.iter().map(|&i| targets[i] * targets[i]).sum();
    sq - sum * sum / n
}

fn mean(targets: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64
}

impl DecisionTree {
    /// Evaluates the tree for one row
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Number of nodes
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Depth of the deepest leaf
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Bagged ensemble of trees fitted on bootstrap samples with feature
/// subsampling. Leaves hold the positive-class fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn fit(x: &[FeatureVector], y: &[f64], params: &ClassifierParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let n = x.len();
        let n_features = x[0].len();
        let max_features = ((n_features as f64).sqrt().round() as usize).max(1);
        let leaf = |rows: &[usize]| mean(y, rows);

        let trees = (0..params.n_estimators)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                TreeBuilder {
                    x,
                    targets: y,
                    max_depth: params.max_depth,
                    min_samples_split: params.min_samples_split,
                    min_samples_leaf: params.min_samples_leaf,
                    max_features: Some(max_features),
                    leaf_value: &leaf,
                    nodes: Vec::new(),
                }
                .build(sample, &mut rng)
            })
            .collect();

        Self { trees }
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        (total / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

/// Log-loss gradient boosting over regression trees with Newton leaf values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    /// Initial log-odds
    base_score: f64,
    learning_rate: f64,
    trees: Vec<DecisionTree>,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl GradientBoosting {
    pub fn fit(x: &[FeatureVector], y: &[f64], params: &ClassifierParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let n = x.len();
        let positive_rate = (y.iter().sum::<f64>() / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (positive_rate / (1.0 - positive_rate)).ln();

        let mut raw = vec![base_score; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let probs: Vec<f64> = raw.iter().map(|&z| sigmoid(z)).collect();
            let residuals: Vec<f64> = y.iter().zip(&probs).map(|(t, p)| t - p).collect();

            let leaf = |rows: &[usize]| {
                let num: f64 = rows.iter().map(|&i| residuals[i]).sum();
                let den: f64 = rows.iter().map(|&i| probs[i] * (1.0 - probs[i])).sum();
                if den.abs() < 1e-12 {
                    0.0
                } else {
                    num / den
                }
            };

            let tree = TreeBuilder {
                x,
                targets: &residuals,
                max_depth: params.max_depth,
                min_samples_split: params.min_samples_split,
                min_samples_leaf: params.min_samples_leaf,
                max_features: None,
                leaf_value: &leaf,
                nodes: Vec::new(),
            }
            .build((0..n).collect(), &mut rng);

            for (i, row) in x.iter().enumerate() {
                raw[i] += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Self {
            base_score,
            learning_rate: params.learning_rate,
            trees,
        }
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        let raw = self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict(x)).sum::<f64>();
        sigmoid(raw)
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

/// A fitted churn classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    RandomForest {
        n_features: usize,
        model: RandomForest,
    },
    GradientBoosting {
        n_features: usize,
        model: GradientBoosting,
    },
}

impl Classifier {
    /// Fits a classifier of the given family on encoded rows and 0/1 labels.
    pub fn fit(
        model_type: ModelType,
        x: &[FeatureVector],
        y: &[bool],
        params: &ClassifierParams,
    ) -> Result<Self> {
        params.validate()?;
        if x.is_empty() {
            return Err(ChurnError::InsufficientData("no training rows".into()));
        }
        if x.len() != y.len() {
            return Err(ChurnError::InvalidArgument(format!(
                "feature rows ({}) and labels ({}) differ in length",
                x.len(),
                y.len()
            )));
        }
        let n_features = x[0].len();
        if n_features == 0 || x.iter().any(|row| row.len() != n_features) {
            return Err(ChurnError::InvalidArgument(
                "feature rows must share a non-zero width".into(),
            ));
        }

        let targets: Vec<f64> = y.iter().map(|&label| if label { 1.0 } else { 0.0 }).collect();

        Ok(match model_type {
            ModelType::RandomForest => Classifier::RandomForest {
                n_features,
                model: RandomForest::fit(x, &targets, params),
            },
            ModelType::GradientBoosting => Classifier::GradientBoosting {
                n_features,
                model: GradientBoosting::fit(x, &targets, params),
            },
        })
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Classifier::RandomForest { .. } => ModelType::RandomForest,
            Classifier::GradientBoosting { .. } => ModelType::GradientBoosting,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Classifier::RandomForest { n_features, .. }
            | Classifier::GradientBoosting { n_features, .. } => *n_features,
        }
    }

    /// Positive-class probability.
    pub fn predict_proba(&self, x: &[f64]) -> Result<f64> {
        if x.len() != self.n_features() {
            return Err(ChurnError::InvalidArgument(format!(
                "expected {} features, got {}",
                self.n_features(),
                x.len()
            )));
        }
        Ok(match self {
            Classifier::RandomForest { model, .. } => model.predict_proba(x),
            Classifier::GradientBoosting { model, .. } => model.predict_proba(x),
        })
    }

    /// Thresholded label and positive-class probability.
    pub fn predict(&self, x: &[f64]) -> Result<(u8, f64)> {
        let probability = self.predict_proba(x)?;
        let label = u8::from(probability >= DECISION_THRESHOLD);
        Ok((label, probability))
    }
}
