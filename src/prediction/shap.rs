//! TreeSHAP feature attributions for exported ensembles.
//!
//! Path-dependent TreeSHAP (Lundberg et al., 2018) using each node's
//! `number_samples` as its cover. Attributions are in margin space, so for
//! every row
//!
//! ```text
//! sum(shap_values) + expected_value == decision_function
//! ```

use crate::core::error::{EsMlError, Result};
use crate::core::types::NodeIndex;
use crate::export::EsModel;
use crate::tree::Tree;
use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

/// Element of the feature path tracked during the recursion.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PathElement {
    /// Feature split on; `None` for the root sentinel
    feature_index: Option<usize>,
    /// Fraction of samples flowing down this path when the feature is absent
    zero_fraction: f64,
    /// 1 when the row's value follows this path, else 0
    one_fraction: f64,
    /// Permutation weight
    pweight: f64,
}

fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature_index: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature_index,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / (depth + 1) as f64;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / (depth + 1) as f64;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, path_index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * (depth + 1) as f64 / ((i + 1) as f64 * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (depth - i) as f64 / (depth + 1) as f64;
        } else {
            path[i].pweight = path[i].pweight * (depth + 1) as f64 / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in path_index..depth {
        path[i].feature_index = path[i + 1].feature_index;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_path_sum(path: &[PathElement], path_index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * (depth + 1) as f64 / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (depth - i) as f64 / (depth + 1) as f64;
        } else {
            total += path[i].pweight / (zero_fraction * (depth - i) as f64 / (depth + 1) as f64);
        }
    }
    total
}

/// Per-tree recursion state.
struct TreeShap<'a> {
    tree: &'a Tree,
    features: &'a [f64],
    scale: f64,
}

impl TreeShap<'_> {
    fn cover(&self, node: NodeIndex) -> f64 {
        self.tree.tree_structure[node].number_samples.unwrap_or(0) as f64
    }

    fn recurse(
        &self,
        phi: &mut [f64],
        node: NodeIndex,
        parent_path: &[PathElement],
        zero_fraction: f64,
        one_fraction: f64,
        feature_index: Option<usize>,
    ) -> Result<()> {
        let mut path = parent_path.to_vec();
        extend_path(&mut path, zero_fraction, one_fraction, feature_index);

        let current = &self.tree.tree_structure[node];
        if current.is_leaf() {
            let value = current
                .leaf_value
                .as_ref()
                .and_then(|v| v.first())
                .copied()
                .unwrap_or(0.0);
            for i in 1..path.len() {
                let w = unwound_path_sum(&path, i);
                let element = path[i];
                if let Some(feature) = element.feature_index {
                    phi[feature] += self.scale * w * (element.one_fraction - element.zero_fraction) * value;
                }
            }
            return Ok(());
        }

        let split = current
            .split_feature
            .ok_or_else(|| EsMlError::prediction(format!("split node {} has no feature", node)))?;
        let (left, right) = match (current.left_child, current.right_child) {
            (Some(l), Some(r)) => (l, r),
            _ => return Err(EsMlError::prediction(format!("split node {} is incomplete", node))),
        };
        let hot = current
            .next_child(self.features.get(split).copied())
            .ok_or_else(|| EsMlError::prediction(format!("split node {} is incomplete", node)))?;
        let cold = if hot == left { right } else { left };

        let w = self.cover(node);
        if w <= 0.0 {
            return Err(EsMlError::prediction(format!("node {} has no samples", node)));
        }
        let hot_zero_fraction = self.cover(hot) / w;
        let cold_zero_fraction = self.cover(cold) / w;
        let mut incoming_zero_fraction = 1.0;
        let mut incoming_one_fraction = 1.0;

        // Splitting on a feature already in the path replaces its element.
        if let Some(k) = path
            .iter()
            .skip(1)
            .position(|e| e.feature_index == Some(split))
            .map(|k| k + 1)
        {
            incoming_zero_fraction = path[k].zero_fraction;
            incoming_one_fraction = path[k].one_fraction;
            unwind_path(&mut path, k);
        }

        self.recurse(
            phi,
            hot,
            &path,
            hot_zero_fraction * incoming_zero_fraction,
            incoming_one_fraction,
            Some(split),
        )?;
        self.recurse(
            phi,
            cold,
            &path,
            cold_zero_fraction * incoming_zero_fraction,
            0.0,
            Some(split),
        )
    }
}

/// TreeSHAP explainer over an exported ensemble.
#[derive(Debug, Clone)]
pub struct TreeExplainer<'a> {
    model: &'a EsModel,
    expected_value: f64,
}

impl<'a> TreeExplainer<'a> {
    /// Creates an explainer; computes the expected value up front.
    pub fn new(model: &'a EsModel) -> Result<Self> {
        let mut expected_value = 0.0;
        for (i, tree) in model.trees().enumerate() {
            expected_value += model.tree_weight(i) * tree.expected_value()?;
        }
        Ok(TreeExplainer {
            model,
            expected_value,
        })
    }

    /// Sample-weighted mean margin of the training data
    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    /// Attributions for one row.
    pub fn shap_values_row(&self, features: &[f64]) -> Result<Array1<f64>> {
        if features.len() != self.model.num_features() {
            return Err(EsMlError::dimension_mismatch(
                format!("{} features", self.model.num_features()),
                format!("{} features", features.len()),
            ));
        }
        let mut phi = vec![0.0; features.len()];
        for (i, tree) in self.model.trees().enumerate() {
            let state = TreeShap {
                tree,
                features,
                scale: self.model.tree_weight(i),
            };
            state.recurse(&mut phi, 0, &[], 1.0, 1.0, None)?;
        }
        Ok(Array1::from_vec(phi))
    }

    /// Attributions for every row of `data`, one row per input row.
    pub fn shap_values(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let rows = (0..data.nrows())
            .into_par_iter()
            .map(|i| self.shap_values_row(&data.row(i).to_vec()))
            .collect::<Result<Vec<Array1<f64>>>>()?;
        let mut out = Array2::zeros((data.nrows(), self.model.num_features()));
        for (i, row) in rows.into_iter().enumerate() {
            out.row_mut(i).assign(&row);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::{AggregateOutput, Ensemble};
    use crate::tree::{DecisionType, TreeNode};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn names() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    /// Depth-2 tree splitting on `a` then `b` on the left, `a` again on the right.
    fn tree() -> Tree {
        Tree::new(
            names(),
            vec![
                TreeNode::split(0, 0, 0.5, DecisionType::Lte, true, 1, 2).with_number_samples(100),
                TreeNode::split(1, 1, 0.5, DecisionType::Lte, true, 3, 4).with_number_samples(60),
                TreeNode::split(2, 0, 1.5, DecisionType::Lte, false, 5, 6).with_number_samples(40),
                TreeNode::leaf(3, vec![1.0]).with_number_samples(20),
                TreeNode::leaf(4, vec![2.0]).with_number_samples(40),
                TreeNode::leaf(5, vec![5.0]).with_number_samples(30),
                TreeNode::leaf(6, vec![9.0]).with_number_samples(10),
            ],
        )
    }

    fn model(weights: Vec<f64>) -> EsModel {
        let trees = vec![tree(); weights.len()];
        EsModel::new(
            Ensemble::new(names(), trees, AggregateOutput::WeightedSum { weights }).into(),
        )
        .unwrap()
    }

    #[test]
    fn test_expected_value() {
        let m = model(vec![1.0]);
        let explainer = TreeExplainer::new(&m).unwrap();
        // (20*1 + 40*2 + 30*5 + 10*9) / 100
        assert_abs_diff_eq!(explainer.expected_value(), 3.4, epsilon = 1e-12);
    }

    #[test]
    fn test_single_split_attribution() {
        let stump = Tree::new(
            names(),
            vec![
                TreeNode::split(0, 1, 0.0, DecisionType::Lte, true, 1, 2).with_number_samples(4),
                TreeNode::leaf(1, vec![0.0]).with_number_samples(3),
                TreeNode::leaf(2, vec![4.0]).with_number_samples(1),
            ],
        );
        let m = EsModel::new(
            Ensemble::new(names(), vec![stump], AggregateOutput::WeightedSum { weights: vec![1.0] }).into(),
        )
        .unwrap();
        let explainer = TreeExplainer::new(&m).unwrap();
        let phi = explainer.shap_values_row(&[7.0, 1.0]).unwrap();
        assert_abs_diff_eq!(phi[0], 0.0);
        assert_abs_diff_eq!(phi[1], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_local_accuracy() {
        let m = model(vec![0.25, 0.75]);
        let explainer = TreeExplainer::new(&m).unwrap();
        let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [2.0, 3.0], [f64::NAN, 1.0]];
        let shap = explainer.shap_values(x.view()).unwrap();
        for (i, row) in x.rows().into_iter().enumerate() {
            let margin = m.decision_function_row(&row.to_vec()).unwrap();
            let total: f64 = shap.row(i).sum() + explainer.expected_value();
            assert_abs_diff_eq!(total, margin, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_dimension_check() {
        let m = model(vec![1.0]);
        let explainer = TreeExplainer::new(&m).unwrap();
        assert!(explainer.shap_values_row(&[1.0]).is_err());
    }
}
