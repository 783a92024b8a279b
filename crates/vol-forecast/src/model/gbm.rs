//! Gradient-boosted regression trees
//!
//! Squared loss, depth-limited trees, histogram split finding over
//! quantile bins. Trees are stored as flat node arenas so the whole model
//! serialises to plain JSON.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StockError};

/// Upper bound on bins per feature; bin indices are stored as `u8`
pub const MAX_BINS_LIMIT: usize = 256;

/// Boosting hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbmParams {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Shrinkage applied to every tree
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Minimum training rows in a leaf
    pub min_samples_leaf: usize,
    /// Histogram bins per feature
    pub max_bins: usize,
    /// Fraction of rows sampled per tree
    pub subsample: f64,
    pub seed: u64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 5,
            min_samples_leaf: 20,
            max_bins: 64,
            subsample: 1.0,
            seed: 42,
        }
    }
}

impl GbmParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(StockError::Config("n_estimators must be > 0".to_string()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(StockError::Config(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if self.min_samples_leaf == 0 {
            return Err(StockError::Config("min_samples_leaf must be > 0".to_string()));
        }
        if !(2..=MAX_BINS_LIMIT).contains(&self.max_bins) {
            return Err(StockError::Config(format!(
                "max_bins must be in 2..={MAX_BINS_LIMIT}, got {}",
                self.max_bins
            )));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(StockError::Config(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    /// Rows with `x[feature] <= threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if row.get(*feature).is_some_and(|x| x <= threshold) {
                        *left
                    } else {
                        *right
                    };
                }
                None => return 0.0,
            }
        }
    }

    fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Per-feature split candidates
///
/// `bin(x)` is the number of thresholds strictly below `x`, so
/// `bin(x) <= b` exactly when `x <= thresholds[b]`.
struct BinMapper {
    thresholds: Vec<Vec<f64>>,
}

impl BinMapper {
    fn fit(features: &[Vec<f64>], n_features: usize, max_bins: usize) -> Self {
        let thresholds = (0..n_features)
            .map(|f| {
                let mut values: Vec<f64> = features.iter().map(|row| row[f]).collect();
                values.sort_by(f64::total_cmp);
                let mut uniques = values.clone();
                uniques.dedup();

                let mut cuts: Vec<f64> = if uniques.len() <= max_bins {
                    uniques
                } else {
                    (1..max_bins)
                        .map(|i| values[i * values.len() / max_bins])
                        .collect()
                };
                cuts.dedup();
                // A cut at the maximum sends every row left
                if cuts.last() == values.last() {
                    cuts.pop();
                }
                cuts
            })
            .collect();
        Self { thresholds }
    }

    fn bin(&self, feature: usize, x: f64) -> u8 {
        self.thresholds[feature].partition_point(|t| *t < x) as u8
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.thresholds[feature].len() + 1
    }
}

struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct TreeBuilder<'a> {
    mapper: &'a BinMapper,
    /// Column-major bin indices
    binned: &'a [Vec<u8>],
    max_depth: usize,
    min_samples_leaf: usize,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, rows: &[usize], residuals: &[f64], depth: usize) -> usize {
        let sum: f64 = rows.iter().map(|&i| residuals[i]).sum();
        let value = sum / rows.len() as f64;

        let split = if depth < self.max_depth && rows.len() >= 2 * self.min_samples_leaf {
            self.best_split(rows, residuals, sum)
        } else {
            None
        };

        let Some(split) = split else {
            self.nodes.push(Node::Leaf { value });
            return self.nodes.len() - 1;
        };

        let column = &self.binned[split.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&i| usize::from(column[i]) <= split.bin);

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value });
        let left = self.grow(&left_rows, residuals, depth + 1);
        let right = self.grow(&right_rows, residuals, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: self.mapper.thresholds[split.feature][split.bin],
            left,
            right,
        };
        idx
    }

    fn best_split(&self, rows: &[usize], residuals: &[f64], total: f64) -> Option<SplitCandidate> {
        let n = rows.len() as f64;
        let parent_score = total * total / n;
        let mut best: Option<SplitCandidate> = None;

        for (feature, column) in self.binned.iter().enumerate() {
            let n_bins = self.mapper.n_bins(feature);
            if n_bins < 2 {
                continue;
            }
            let mut sums = vec![0.0; n_bins];
            let mut counts = vec![0usize; n_bins];
            for &i in rows {
                let b = usize::from(column[i]);
                sums[b] += residuals[i];
                counts[b] += 1;
            }

            let (mut left_sum, mut left_count) = (0.0, 0usize);
            for bin in 0..n_bins - 1 {
                left_sum += sums[bin];
                left_count += counts[bin];
                let right_count = rows.len() - left_count;
                if left_count < self.min_samples_leaf {
                    continue;
                }
                if right_count < self.min_samples_leaf {
                    break;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / left_count as f64
                    + right_sum * right_sum / right_count as f64
                    - parent_score;
                if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(SplitCandidate { feature, bin, gain });
                }
            }
        }
        best
    }
}

/// Fitted boosting ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base_score: f64,
    learning_rate: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    /// Fit on row-major `features` against `targets`
    pub fn fit(features: &[Vec<f64>], targets: &[f64], params: &GbmParams) -> Result<Self> {
        params.validate()?;
        if features.is_empty() {
            return Err(StockError::InsufficientData {
                stage: "model fit".to_string(),
                rows: 0,
                required: 1,
            });
        }
        if features.len() != targets.len() {
            return Err(StockError::InvalidRequest(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }
        let n_features = features[0].len();
        if let Some(bad) = features.iter().position(|row| row.len() != n_features) {
            return Err(StockError::InvalidRequest(format!(
                "row {bad} has {} features, expected {n_features}",
                features[bad].len()
            )));
        }
        if features.iter().flatten().chain(targets).any(|v| !v.is_finite()) {
            return Err(StockError::InvalidRequest(
                "training data contains non-finite values".to_string(),
            ));
        }

        let mapper = BinMapper::fit(features, n_features, params.max_bins);
        let binned: Vec<Vec<u8>> = (0..n_features)
            .map(|f| features.iter().map(|row| mapper.bin(f, row[f])).collect())
            .collect();

        let n = targets.len();
        let base_score = targets.iter().sum::<f64>() / n as f64;
        let mut predictions = vec![base_score; n];
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut indices: Vec<usize> = (0..n).collect();
        let sample_size = ((n as f64 * params.subsample).ceil() as usize).clamp(1, n);

        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = targets
                .iter()
                .zip(&predictions)
                .map(|(y, p)| y - p)
                .collect();

            if sample_size < n {
                indices.shuffle(&mut rng);
            }
            let mut rows = indices[..sample_size].to_vec();
            rows.sort_unstable();

            let mut builder = TreeBuilder {
                mapper: &mapper,
                binned: &binned,
                max_depth: params.max_depth,
                min_samples_leaf: params.min_samples_leaf,
                nodes: Vec::new(),
            };
            builder.grow(&rows, &residuals, 0);
            let tree = RegressionTree {
                nodes: builder.nodes,
            };

            for (pred, row) in predictions.iter_mut().zip(features) {
                *pred += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            base_score,
            learning_rate: params.learning_rate,
            n_features,
            trees,
        })
    }

    /// Predict one row
    pub fn predict(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.n_features {
            return Err(StockError::SchemaMismatch {
                expected: format!("{} features", self.n_features),
                found: format!("{} features", row.len()),
            });
        }
        Ok(self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>())
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|row| self.predict(row)).collect()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Depth of the deepest tree
    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(RegressionTree::depth).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn step_data(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(7);
        let features: Vec<Vec<f64>> = (0..n)
            .map(|_| vec![rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)])
            .collect();
        let targets = features
            .iter()
            .map(|row| if row[0] > 0.5 { 2.0 } else { 0.5 } + 0.1 * row[1])
            .collect();
        (features, targets)
    }

    #[test]
    fn test_default_params() {
        let params = GbmParams::default();
        assert_eq!(params.n_estimators, 100);
        assert_eq!(params.max_depth, 5);
        assert_eq!(params.min_samples_leaf, 20);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_invalid_params() {
        for params in [
            GbmParams { n_estimators: 0, ..Default::default() },
            GbmParams { learning_rate: 0.0, ..Default::default() },
            GbmParams { max_bins: 1, ..Default::default() },
            GbmParams { max_bins: 300, ..Default::default() },
            GbmParams { subsample: 1.5, ..Default::default() },
            GbmParams { min_samples_leaf: 0, ..Default::default() },
        ] {
            assert!(params.validate().is_err(), "{params:?}");
        }
    }

    #[test]
    fn test_learns_step_function() {
        let (features, targets) = step_data(500);
        let model = GradientBoostedTrees::fit(&features, &targets, &GbmParams::default()).unwrap();

        assert_eq!(model.n_trees(), 100);
        assert!(model.max_depth() <= 5);
        let low = model.predict(&[0.2, 0.5]).unwrap();
        let high = model.predict(&[0.8, 0.5]).unwrap();
        assert!((low - 0.55).abs() < 0.1, "low = {low}");
        assert!((high - 2.05).abs() < 0.1, "high = {high}");
    }

    #[test]
    fn test_more_rounds_never_raise_training_error() {
        let (features, targets) = step_data(400);
        let variance = {
            let mean = targets.iter().sum::<f64>() / targets.len() as f64;
            targets.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / targets.len() as f64
        };

        let mut previous = variance;
        for rounds in [1, 5, 20, 60] {
            let params = GbmParams {
                n_estimators: rounds,
                ..Default::default()
            };
            let model = GradientBoostedTrees::fit(&features, &targets, &params).unwrap();
            let predicted = model.predict_batch(&features).unwrap();
            let mse = targets
                .iter()
                .zip(&predicted)
                .map(|(t, p)| (t - p).powi(2))
                .sum::<f64>()
                / targets.len() as f64;
            assert!(mse <= previous + 1e-12, "{rounds} rounds: {mse} > {previous}");
            previous = mse;
        }
        assert!(previous < variance * 0.05);
    }

    #[test]
    fn test_constant_target() {
        let features: Vec<Vec<f64>> = (0..50).map(|i| vec![f64::from(i)]).collect();
        let targets = vec![0.3; 50];
        let model = GradientBoostedTrees::fit(&features, &targets, &GbmParams::default()).unwrap();
        assert!((model.predict(&[10.0]).unwrap() - 0.3).abs() < 1e-12);
        assert_eq!(model.max_depth(), 0);
    }

    #[test]
    fn test_fit_is_deterministic_with_subsample() {
        let (features, targets) = step_data(300);
        let params = GbmParams {
            subsample: 0.5,
            n_estimators: 20,
            ..Default::default()
        };
        let a = GradientBoostedTrees::fit(&features, &targets, &params).unwrap();
        let b = GradientBoostedTrees::fit(&features, &targets, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let (features, targets) = step_data(100);
        let model = GradientBoostedTrees::fit(&features, &targets, &GbmParams::default()).unwrap();
        assert!(matches!(
            model.predict(&[0.1]),
            Err(StockError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        let params = GbmParams::default();
        assert!(GradientBoostedTrees::fit(&[], &[], &params).is_err());
        assert!(GradientBoostedTrees::fit(&[vec![1.0]], &[1.0, 2.0], &params).is_err());
        assert!(GradientBoostedTrees::fit(&[vec![1.0], vec![1.0, 2.0]], &[1.0, 2.0], &params).is_err());
        assert!(GradientBoostedTrees::fit(&[vec![f64::NAN]], &[1.0], &params).is_err());
    }

    #[test]
    fn test_serde_preserves_predictions() {
        let (features, targets) = step_data(200);
        let model = GradientBoostedTrees::fit(&features, &targets, &GbmParams::default()).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: GradientBoostedTrees = serde_json::from_str(&json).unwrap();
        for row in &features[..10] {
            assert_eq!(model.predict(row).unwrap(), restored.predict(row).unwrap());
        }
    }

    #[test]
    fn test_bins_respect_thresholds() {
        let features: Vec<Vec<f64>> = (0..1000).map(|i| vec![f64::from(i)]).collect();
        let mapper = BinMapper::fit(&features, 1, 16);
        assert!(mapper.n_bins(0) <= 16);
        for row in &features {
            let b = usize::from(mapper.bin(0, row[0]));
            if let Some(t) = mapper.thresholds[0].get(b) {
                assert!(row[0] <= *t);
            }
            if b > 0 {
                assert!(row[0] > mapper.thresholds[0][b - 1]);
            }
        }
    }
}
