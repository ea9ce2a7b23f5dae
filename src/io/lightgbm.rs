//! LightGBM text model format (`save_model("model.txt")`).
//!
//! The format is line based: a header of `key=value` pairs (plus the bare
//! `average_output` flag for random forests), then one `Tree=N` block per
//! tree, terminated by `end of trees`. Anything after that line (feature
//! importances, parameters) is ignored.

use crate::core::error::{EsMlError, Result};
use std::collections::HashMap;
use std::path::Path;

/// How a split treats missing values (bits 2-3 of `decision_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingType {
    /// NaN is compared as 0.0
    #[default]
    None,
    /// Zero (and NaN) follow the default direction
    Zero,
    /// NaN follows the default direction
    NaN,
}

/// Decoded `decision_type` bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SplitKind {
    /// Bit 0: categorical split
    pub is_categorical: bool,
    /// Bit 1: missing values go left
    pub default_left: bool,
    /// Bits 2-3: missing value handling
    pub missing_type: MissingType,
}

impl SplitKind {
    /// Decodes the bitfield
    pub fn from_bits(value: i32) -> Self {
        let v = value as u32;
        SplitKind {
            is_categorical: v & 1 != 0,
            default_left: v & 2 != 0,
            missing_type: match (v >> 2) & 3 {
                1 => MissingType::Zero,
                2 => MissingType::NaN,
                _ => MissingType::None,
            },
        }
    }
}

/// Objective declared in the header (`objective=binary sigmoid:1`).
#[derive(Debug, Clone, PartialEq)]
pub struct LgbObjective {
    /// Objective name, first token of the line
    pub name: String,
    /// Remaining `key:value` parameters
    pub params: HashMap<String, String>,
    /// Remaining bare tokens such as `sqrt`
    pub flags: Vec<String>,
}

impl LgbObjective {
    /// Parses an objective line value
    pub fn parse(s: &str) -> Self {
        let mut tokens = s.split_whitespace();
        let name = tokens.next().unwrap_or_default().to_string();
        let mut params = HashMap::new();
        let mut flags = Vec::new();
        for token in tokens {
            match token.split_once(':') {
                Some((k, v)) => {
                    params.insert(k.to_string(), v.to_string());
                }
                None => flags.push(token.to_string()),
            }
        }
        LgbObjective { name, params, flags }
    }

    /// Float parameter, e.g. `sigmoid`
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.parse().ok())
    }

    /// Whether a bare flag such as `sqrt` is present
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// One parsed `Tree=N` block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LgbTree {
    /// Number of leaves
    pub num_leaves: usize,
    /// Number of categorical splits
    pub num_cat: usize,
    /// Split feature per internal node
    pub split_feature: Vec<i32>,
    /// Split gain per internal node
    pub split_gain: Vec<f64>,
    /// Threshold per internal node
    pub threshold: Vec<f64>,
    /// Decision bitfield per internal node
    pub decision_type: Vec<i32>,
    /// Left child per internal node; negative values `~leaf` point at leaves
    pub left_child: Vec<i32>,
    /// Right child per internal node; negative values `~leaf` point at leaves
    pub right_child: Vec<i32>,
    /// Output per leaf, shrinkage already applied
    pub leaf_value: Vec<f64>,
    /// Learning rate applied to the tree
    pub shrinkage: f64,
    /// Linear leaves
    pub is_linear: bool,
}

impl LgbTree {
    /// Number of internal nodes
    pub fn num_splits(&self) -> usize {
        self.num_leaves.saturating_sub(1)
    }

    /// Checks array lengths, children and unsupported split kinds.
    pub fn validate(&self, num_features: usize) -> Result<()> {
        if self.num_leaves == 0 {
            return Err(EsMlError::model_parse("lightgbm tree has no leaves"));
        }
        if self.is_linear {
            return Err(EsMlError::unsupported_model(
                "lightgbm linear trees cannot be expressed as a model definition",
            ));
        }
        if self.num_cat > 0 || self.decision_type.iter().any(|&d| SplitKind::from_bits(d).is_categorical) {
            return Err(EsMlError::unsupported_model(
                "lightgbm categorical splits cannot be expressed as a model definition",
            ));
        }
        if self.leaf_value.len() != self.num_leaves {
            return Err(EsMlError::model_parse(format!(
                "lightgbm tree has {} leaf values for {} leaves",
                self.leaf_value.len(),
                self.num_leaves
            )));
        }

        let n = self.num_splits();
        for (name, len) in [
            ("split_feature", self.split_feature.len()),
            ("threshold", self.threshold.len()),
            ("decision_type", self.decision_type.len()),
            ("left_child", self.left_child.len()),
            ("right_child", self.right_child.len()),
        ] {
            if len != n {
                return Err(EsMlError::model_parse(format!(
                    "lightgbm tree array {} has {} entries, expected {}",
                    name, len, n
                )));
            }
        }

        for i in 0..n {
            for child in [self.left_child[i], self.right_child[i]] {
                let ok = if child < 0 {
                    ((!child) as usize) < self.num_leaves
                } else {
                    child as usize > i && (child as usize) < n
                };
                if !ok {
                    return Err(EsMlError::model_parse(format!(
                        "lightgbm node {} has invalid child {}",
                        i, child
                    )));
                }
            }
            let feature = self.split_feature[i];
            if feature < 0 || feature as usize >= num_features {
                return Err(EsMlError::model_parse(format!(
                    "lightgbm node {} splits on feature {} of {}",
                    i, feature, num_features
                )));
            }
        }
        Ok(())
    }
}

/// Parsed LightGBM model.
#[derive(Debug, Clone, PartialEq)]
pub struct LgbModel {
    /// Format version, e.g. `v4`
    pub version: String,
    /// Number of classes (1 for regression and binary)
    pub num_class: usize,
    /// Trees per boosting iteration
    pub num_tree_per_iteration: usize,
    /// Largest feature index
    pub max_feature_idx: usize,
    /// Raw objective line
    pub objective_line: String,
    /// Parsed objective
    pub objective: LgbObjective,
    /// Random forest mode: outputs are averaged over iterations
    pub average_output: bool,
    /// Feature names
    pub feature_names: Vec<String>,
    /// Trees in boosting order
    pub trees: Vec<LgbTree>,
}

impl LgbModel {
    /// Parses a text model.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut header: HashMap<&str, &str> = HashMap::new();
        let mut average_output = false;
        let mut trees = Vec::new();
        let mut current: Option<HashMap<&str, &str>> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "end of trees" {
                break;
            }
            if line.starts_with("Tree=") {
                if let Some(fields) = current.take() {
                    trees.push(Self::parse_tree(&fields)?);
                }
                current = Some(HashMap::new());
                continue;
            }
            match (line.split_once('='), current.as_mut()) {
                (Some((key, value)), Some(fields)) => {
                    fields.insert(key, value);
                }
                (Some((key, value)), None) => {
                    header.insert(key, value);
                }
                (None, None) if line == "average_output" => average_output = true,
                _ => {}
            }
        }
        if let Some(fields) = current.take() {
            trees.push(Self::parse_tree(&fields)?);
        }

        let num_class: usize = Self::required(&header, "num_class")?;
        let objective_line = header.get("objective").copied().unwrap_or("regression").to_string();
        let model = LgbModel {
            version: header.get("version").copied().unwrap_or_default().to_string(),
            num_class,
            num_tree_per_iteration: Self::optional(&header, "num_tree_per_iteration")?
                .unwrap_or(num_class.max(1)),
            max_feature_idx: Self::required(&header, "max_feature_idx")?,
            objective: LgbObjective::parse(&objective_line),
            objective_line,
            average_output,
            feature_names: header
                .get("feature_names")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            trees,
        };
        model.validate()?;
        Ok(model)
    }

    /// Reads a text model from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_text(&std::fs::read_to_string(path)?)
    }

    /// Number of input features
    pub fn num_features(&self) -> usize {
        self.max_feature_idx + 1
    }

    /// Number of boosting iterations
    pub fn num_iterations(&self) -> usize {
        self.trees.len() / self.num_tree_per_iteration.max(1)
    }

    /// Checks the header and every tree.
    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(EsMlError::model_parse("lightgbm model has no trees"));
        }
        if self.num_tree_per_iteration == 0 || self.trees.len() % self.num_tree_per_iteration != 0 {
            return Err(EsMlError::model_parse(format!(
                "{} trees is not a multiple of {} trees per iteration",
                self.trees.len(),
                self.num_tree_per_iteration
            )));
        }
        if !self.feature_names.is_empty() && self.feature_names.len() != self.num_features() {
            return Err(EsMlError::model_parse(format!(
                "{} feature names for {} features",
                self.feature_names.len(),
                self.num_features()
            )));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.num_features()).map_err(|e| match e {
                EsMlError::ModelParse { message } => {
                    EsMlError::model_parse(format!("tree {}: {}", i, message))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    fn parse_tree(fields: &HashMap<&str, &str>) -> Result<LgbTree> {
        let num_leaves: usize = Self::required(fields, "num_leaves")?;
        let tree = LgbTree {
            num_leaves,
            num_cat: Self::optional(fields, "num_cat")?.unwrap_or(0),
            split_feature: Self::int_array(fields, "split_feature")?,
            split_gain: Self::float_array(fields, "split_gain")?,
            threshold: Self::float_array(fields, "threshold")?,
            decision_type: Self::int_array(fields, "decision_type")?,
            left_child: Self::int_array(fields, "left_child")?,
            right_child: Self::int_array(fields, "right_child")?,
            leaf_value: Self::float_array(fields, "leaf_value")?,
            shrinkage: Self::optional(fields, "shrinkage")?.unwrap_or(1.0),
            is_linear: Self::optional::<i32>(fields, "is_linear")?.unwrap_or(0) != 0,
        };
        Ok(tree)
    }

    fn optional<T: std::str::FromStr>(fields: &HashMap<&str, &str>, key: &str) -> Result<Option<T>> {
        match fields.get(key) {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| EsMlError::model_parse(format!("invalid value for {}: {}", key, value))),
            None => Ok(None),
        }
    }

    fn required<T: std::str::FromStr>(fields: &HashMap<&str, &str>, key: &str) -> Result<T> {
        Self::optional(fields, key)?
            .ok_or_else(|| EsMlError::model_parse(format!("missing required field {}", key)))
    }

    /// Parse integer array from a field
    fn int_array(fields: &HashMap<&str, &str>, key: &str) -> Result<Vec<i32>> {
        fields
            .get(key)
            .map_or("", |v| *v)
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<i32>()
                    .map_err(|e| EsMlError::model_parse(format!("invalid integer in {}: {}", key, e)))
            })
            .collect()
    }

    /// Parse float array from a field
    fn float_array(fields: &HashMap<&str, &str>, key: &str) -> Result<Vec<f64>> {
        fields
            .get(key)
            .map_or("", |v| *v)
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .map_err(|e| EsMlError::model_parse(format!("invalid float in {}: {}", key, e)))
            })
            .collect()
    }
}
