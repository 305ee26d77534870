//! Random forest inference over exported decision trees
//!
//! Each tree is the flat array form of a fitted CART tree: node `i` is a leaf
//! when `children_left[i] == -1`; otherwise samples with
//! `x[feature[i]] <= threshold[i]` go to `children_left[i]`, the rest to
//! `children_right[i]`. `value[i]` holds the per-class sample weights (or
//! fractions) at node `i`.

use super::ModelError;
use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
use serde::{Deserialize, Serialize};

const LEAF: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<Vec<f64>>,
}

impl DecisionTree {
    pub fn node_count(&self) -> usize {
        self.children_left.len()
    }

    fn validate(&self, index: usize, n_features: usize, n_classes: usize) -> Result<(), ModelError> {
        let invalid = |reason: String| ModelError::InvalidTree { index, reason };
        let n = self.node_count();
        if n == 0 {
            return Err(invalid("tree has no nodes".to_string()));
        }
        if self.children_right.len() != n
            || self.feature.len() != n
            || self.threshold.len() != n
            || self.value.len() != n
        {
            return Err(invalid("node arrays differ in length".to_string()));
        }

        for node in 0..n {
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == LEAF {
                let row = &self.value[node];
                if row.len() != n_classes {
                    return Err(invalid(format!(
                        "leaf {} has {} class values, expected {}",
                        node,
                        row.len(),
                        n_classes
                    )));
                }
                if row.iter().any(|v| !v.is_finite() || *v < 0.0) || row.iter().sum::<f64>() <= 0.0
                {
                    return Err(invalid(format!("leaf {} has no usable weights", node)));
                }
                continue;
            }
            // Children always follow their parent, which rules out cycles
            for child in [left, right] {
                if child <= node as i64 || child >= n as i64 {
                    return Err(invalid(format!(
                        "node {} points to invalid child {}",
                        node, child
                    )));
                }
            }
            let feature = self.feature[node];
            if feature < 0 || feature as usize >= n_features {
                return Err(invalid(format!(
                    "node {} splits on unknown feature {}",
                    node, feature
                )));
            }
        }
        Ok(())
    }

    /// Index of the leaf reached by `x`
    pub fn leaf(&self, x: &[f64]) -> usize {
        let mut node = 0usize;
        while self.children_left[node] != LEAF {
            // Inputs are compared at single precision, as they were during fitting
            let value = x[self.feature[node] as usize] as f32;
            node = if f64::from(value) <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        node
    }

    /// Class distribution of the leaf reached by `x`, normalized to sum to 1
    pub fn predict_proba(&self, x: &[f64]) -> Vec<f64> {
        let row = &self.value[self.leaf(x)];
        let total: f64 = row.iter().sum();
        row.iter().map(|v| v / total).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub feature_names: Vec<String>,
    pub classes: Vec<i64>,
    pub feature_importances: Vec<f64>,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.feature_names.len() != FEATURE_COUNT
            || self.feature_names.iter().zip(FEATURE_NAMES).any(|(a, b)| a != b)
        {
            return Err(ModelError::FeatureMismatch {
                artifact: "voice classifier",
            });
        }
        if self.classes != [0, 1] {
            return Err(ModelError::InvalidForest(format!(
                "expected classes [0, 1], got {:?}",
                self.classes
            )));
        }
        if self.feature_importances.len() != FEATURE_COUNT {
            return Err(ModelError::InvalidForest(format!(
                "expected {} feature importances, got {}",
                FEATURE_COUNT,
                self.feature_importances.len()
            )));
        }
        if self.trees.is_empty() {
            return Err(ModelError::InvalidForest("forest has no trees".to_string()));
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(index, FEATURE_COUNT, self.classes.len())?;
        }
        Ok(())
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean of the per-tree class distributions
    pub fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        if x.len() != self.feature_names.len() {
            return Err(ModelError::InputLength {
                expected: self.feature_names.len(),
                got: x.len(),
            });
        }
        let mut proba = vec![0.0f64; self.classes.len()];
        for tree in &self.trees {
            for (acc, p) in proba.iter_mut().zip(tree.predict_proba(x)) {
                *acc += p;
            }
        }
        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        Ok(proba)
    }
}

/// Position of the first maximum
pub fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max {
                (i, v)
            } else {
                (best, max)
            }
        })
        .0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Stump splitting on `feature` at `threshold`
    pub(crate) fn stump(feature: i64, threshold: f64, left: [f64; 2], right: [f64; 2]) -> DecisionTree {
        DecisionTree {
            children_left: vec![1, -1, -1],
            children_right: vec![2, -1, -1],
            feature: vec![feature, -2, -2],
            threshold: vec![threshold, -2.0, -2.0],
            value: vec![vec![1.0, 1.0], left.to_vec(), right.to_vec()],
        }
    }

    pub(crate) fn forest(trees: Vec<DecisionTree>) -> RandomForest {
        let mut importances = vec![0.0; FEATURE_COUNT];
        importances[7] = 0.75;
        importances[20] = 0.25;
        RandomForest {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            classes: vec![0, 1],
            feature_importances: importances,
            trees,
        }
    }

    #[test]
    fn test_tree_walk_uses_less_or_equal() {
        let tree = stump(0, 0.5, [3.0, 1.0], [0.0, 2.0]);
        let mut x = vec![0.0; FEATURE_COUNT];
        x[0] = 0.5;
        assert_eq!(tree.leaf(&x), 1);
        assert_eq!(tree.predict_proba(&x), vec![0.75, 0.25]);
        x[0] = 0.5000001;
        assert_eq!(tree.leaf(&x), 2);
    }

    #[test]
    fn test_forest_averages_trees() {
        let f = forest(vec![
            stump(0, 0.0, [1.0, 0.0], [0.0, 1.0]),
            stump(1, 0.0, [0.5, 0.5], [0.2, 0.8]),
        ]);
        f.validate().unwrap();
        let mut x = vec![0.0; FEATURE_COUNT];
        x[0] = -1.0;
        x[1] = 1.0;
        let proba = f.predict_proba(&x).unwrap();
        assert!((proba[0] - 0.6).abs() < 1e-12);
        assert!((proba[1] - 0.4).abs() < 1e-12);
        assert_eq!(argmax(&proba), 0);
    }

    #[test]
    fn test_argmax_prefers_first_on_tie() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.9]), 1);
    }

    #[test]
    fn test_malformed_trees_are_rejected() {
        let mut bad = stump(0, 0.0, [1.0, 0.0], [0.0, 1.0]);
        bad.children_right[0] = 0;
        assert!(matches!(
            forest(vec![bad]).validate(),
            Err(ModelError::InvalidTree { index: 0, .. })
        ));

        let bad = stump(FEATURE_COUNT as i64, 0.0, [1.0, 0.0], [0.0, 1.0]);
        assert!(forest(vec![bad]).validate().is_err());

        let mut bad = stump(0, 0.0, [1.0, 0.0], [0.0, 1.0]);
        bad.threshold.pop();
        assert!(forest(vec![bad]).validate().is_err());

        assert!(matches!(
            forest(vec![]).validate(),
            Err(ModelError::InvalidForest(_))
        ));
    }

    #[test]
    fn test_only_binary_label_classes_are_accepted() {
        for classes in [vec![1, 0], vec![0, 2], vec![0, 1, 2], vec![1]] {
            let mut f = forest(vec![stump(0, 0.0, [1.0, 0.0], [0.0, 1.0])]);
            f.classes = classes;
            assert!(
                matches!(f.validate(), Err(ModelError::InvalidForest(_))),
                "accepted {:?}",
                f.classes
            );
        }
    }

    #[test]
    fn test_wrong_input_length() {
        let f = forest(vec![stump(0, 0.0, [1.0, 0.0], [0.0, 1.0])]);
        assert!(matches!(
            f.predict_proba(&[0.0; 4]),
            Err(ModelError::InputLength { .. })
        ));
    }
}
