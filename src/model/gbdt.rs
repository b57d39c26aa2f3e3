//! Native evaluator for LightGBM models saved in text form (`Booster.save_model`).
//!
//! Only numerical splits are supported. The CNN features fed to the classifier
//! are dense floats, so categorical splits never appear in practice and are
//! rejected at load time.

use crate::error::InferenceError;
use crate::model::{argmax, Classifier};
use ndarray::ArrayView2;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

// Same tolerance LightGBM uses for "is this value zero"
const ZERO_THRESHOLD: f64 = 1e-35;

const CATEGORICAL_MASK: u8 = 1;
const DEFAULT_LEFT_MASK: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingType {
    None,
    Zero,
    NaN,
}

impl MissingType {
    fn from_decision_type(decision_type: u8) -> Self {
        match (decision_type >> 2) & 3 {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        }
    }
}

/// How summed raw scores become probabilities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputTransform {
    Softmax,
    Sigmoid(f64),
    Raw,
}

impl OutputTransform {
    /// Parses the `objective=` header, e.g. `multiclass num_class:3` or `binary sigmoid:1`.
    fn from_objective(objective: &str) -> Self {
        let mut parts = objective.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let sigmoid = parts
            .filter_map(|part| part.strip_prefix("sigmoid:"))
            .find_map(|value| value.parse::<f64>().ok())
            .unwrap_or(1.0);

        match name {
            "multiclass" | "softmax" => OutputTransform::Softmax,
            "multiclassova" | "multiclass_ova" | "ova" | "ovr" | "binary" => {
                OutputTransform::Sigmoid(sigmoid)
            }
            _ => OutputTransform::Raw,
        }
    }
}

#[derive(Debug, Clone)]
struct Tree {
    split_feature: Vec<usize>,
    threshold: Vec<f64>,
    decision_type: Vec<u8>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_value: Vec<f64>,
}

impl Tree {
    fn parse(index: usize, fields: &HashMap<&str, &str>) -> Result<Self, InferenceError> {
        let num_leaves: usize = field(fields, "num_leaves", index)?;
        let num_cat: usize = optional_field(fields, "num_cat", index)?.unwrap_or(0);
        if num_cat > 0 {
            return Err(InferenceError::ModelFormat(format!(
                "tree {index}: categorical splits are not supported"
            )));
        }
        // Linear leaves carry leaf_coeff/leaf_features on top of leaf_value
        let is_linear: u8 = optional_field(fields, "is_linear", index)?.unwrap_or(0);
        if is_linear != 0 {
            return Err(InferenceError::ModelFormat(format!(
                "tree {index}: linear trees are not supported"
            )));
        }
        if num_leaves == 0 {
            return Err(InferenceError::ModelFormat(format!(
                "tree {index}: num_leaves must be positive"
            )));
        }

        let leaf_value: Vec<f64> = list(fields, "leaf_value", index)?;
        if leaf_value.len() != num_leaves {
            return Err(InferenceError::ModelFormat(format!(
                "tree {index}: expected {num_leaves} leaf values, found {}",
                leaf_value.len()
            )));
        }

        if num_leaves == 1 {
            return Ok(Self {
                split_feature: Vec::new(),
                threshold: Vec::new(),
                decision_type: Vec::new(),
                left_child: Vec::new(),
                right_child: Vec::new(),
                leaf_value,
            });
        }

        let tree = Self {
            split_feature: list(fields, "split_feature", index)?,
            threshold: list(fields, "threshold", index)?,
            decision_type: list(fields, "decision_type", index)?,
            left_child: list(fields, "left_child", index)?,
            right_child: list(fields, "right_child", index)?,
            leaf_value,
        };
        tree.validate(index)?;
        Ok(tree)
    }

    fn num_internal(&self) -> usize {
        self.leaf_value.len() - 1
    }

    fn validate(&self, index: usize) -> Result<(), InferenceError> {
        let internal = self.num_internal();
        let lengths = [
            ("split_feature", self.split_feature.len()),
            ("threshold", self.threshold.len()),
            ("decision_type", self.decision_type.len()),
            ("left_child", self.left_child.len()),
            ("right_child", self.right_child.len()),
        ];
        for (name, len) in lengths {
            if len != internal {
                return Err(InferenceError::ModelFormat(format!(
                    "tree {index}: expected {internal} entries in {name}, found {len}"
                )));
            }
        }

        if self
            .decision_type
            .iter()
            .any(|&dt| dt & CATEGORICAL_MASK != 0)
        {
            return Err(InferenceError::ModelFormat(format!(
                "tree {index}: categorical splits are not supported"
            )));
        }

        // Children always point forward, which also rules out cycles
        for node in 0..internal {
            for child in [self.left_child[node], self.right_child[node]] {
                let valid = if child < 0 {
                    ((!child) as usize) < self.leaf_value.len()
                } else {
                    (child as usize) > node && (child as usize) < internal
                };
                if !valid {
                    return Err(InferenceError::ModelFormat(format!(
                        "tree {index}: node {node} has invalid child {child}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn max_feature(&self) -> Option<usize> {
        self.split_feature.iter().copied().max()
    }

    /// Next node for `value` at internal `node`; negative results encode leaves as `!leaf`.
    fn decide(&self, node: usize, value: f64) -> i32 {
        let decision_type = self.decision_type[node];
        let missing = MissingType::from_decision_type(decision_type);

        let value = if value.is_nan() && missing != MissingType::NaN {
            0.0
        } else {
            value
        };

        if (missing == MissingType::Zero && value.abs() <= ZERO_THRESHOLD)
            || (missing == MissingType::NaN && value.is_nan())
        {
            return if decision_type & DEFAULT_LEFT_MASK != 0 {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
        }

        if value <= self.threshold[node] {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }

    fn predict(&self, row: &[f32]) -> f64 {
        if self.num_internal() == 0 {
            return self.leaf_value[0];
        }
        let mut node = 0usize;
        loop {
            let value = row[self.split_feature[node]] as f64;
            let next = self.decide(node, value);
            if next < 0 {
                return self.leaf_value[(!next) as usize];
            }
            node = next as usize;
        }
    }
}

fn field<T: FromStr>(
    fields: &HashMap<&str, &str>,
    key: &str,
    tree: usize,
) -> Result<T, InferenceError> {
    optional_field(fields, key, tree)?
        .ok_or_else(|| InferenceError::ModelFormat(format!("tree {tree}: missing {key}")))
}

fn optional_field<T: FromStr>(
    fields: &HashMap<&str, &str>,
    key: &str,
    tree: usize,
) -> Result<Option<T>, InferenceError> {
    fields
        .get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                InferenceError::ModelFormat(format!("tree {tree}: invalid {key} '{raw}'"))
            })
        })
        .transpose()
}

fn list<T: FromStr>(
    fields: &HashMap<&str, &str>,
    key: &str,
    tree: usize,
) -> Result<Vec<T>, InferenceError> {
    let raw = fields
        .get(key)
        .ok_or_else(|| InferenceError::ModelFormat(format!("tree {tree}: missing {key}")))?;
    raw.split_whitespace()
        .map(|item| {
            item.parse::<T>().map_err(|_| {
                InferenceError::ModelFormat(format!("tree {tree}: invalid {key} entry '{item}'"))
            })
        })
        .collect()
}

/// A gradient-boosted tree classifier evaluated in process.
#[derive(Debug, Clone)]
pub struct GbdtClassifier {
    num_class: usize,
    trees_per_iteration: usize,
    num_features: usize,
    transform: OutputTransform,
    average_output: bool,
    trees: Vec<Tree>,
}

impl GbdtClassifier {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, InferenceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(InferenceError::ModelNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let model = Self::parse(&text)?;
        info!(
            path = %path.display(),
            trees = model.trees.len(),
            classes = model.num_class,
            features = model.num_features,
            "loaded LightGBM model"
        );
        Ok(model)
    }

    pub fn parse(text: &str) -> Result<Self, InferenceError> {
        let mut header: HashMap<&str, &str> = HashMap::new();
        let mut blocks: Vec<HashMap<&str, &str>> = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line == "end of trees" {
                break;
            }
            // Written as a bare flag, without '='
            if line == "average_output" && blocks.is_empty() {
                header.insert("average_output", "");
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if key == "Tree" {
                blocks.push(HashMap::new());
                continue;
            }
            match blocks.last_mut() {
                Some(block) => block.insert(key, value),
                None => header.insert(key, value),
            };
        }

        let header_value = |key: &str| -> Result<usize, InferenceError> {
            header
                .get(key)
                .ok_or_else(|| InferenceError::ModelFormat(format!("missing header {key}")))?
                .trim()
                .parse::<usize>()
                .map_err(|_| InferenceError::ModelFormat(format!("invalid header {key}")))
        };

        let num_class = header_value("num_class")?;
        let trees_per_iteration = match header.get("num_tree_per_iteration") {
            Some(_) => header_value("num_tree_per_iteration")?,
            None => num_class,
        };
        let num_features = header_value("max_feature_idx")? + 1;
        let transform = OutputTransform::from_objective(header.get("objective").unwrap_or(&""));
        let average_output = header.contains_key("average_output");

        if num_class == 0 || trees_per_iteration == 0 {
            return Err(InferenceError::ModelFormat(
                "num_class and num_tree_per_iteration must be positive".to_string(),
            ));
        }
        if blocks.is_empty() {
            return Err(InferenceError::ModelFormat("model contains no trees".to_string()));
        }

        let trees = blocks
            .iter()
            .enumerate()
            .map(|(i, fields)| Tree::parse(i, fields))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(feature) = trees.iter().filter_map(Tree::max_feature).max() {
            if feature >= num_features {
                return Err(InferenceError::ModelFormat(format!(
                    "split on feature {feature} but max_feature_idx is {}",
                    num_features - 1
                )));
            }
        }

        Ok(Self {
            num_class,
            trees_per_iteration,
            num_features,
            transform,
            average_output,
            trees,
        })
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Summed leaf outputs, one per tree slot in an iteration.
    pub fn raw_scores(&self, row: &[f32]) -> Vec<f64> {
        let mut scores = vec![0.0; self.trees_per_iteration];
        for (i, tree) in self.trees.iter().enumerate() {
            scores[i % self.trees_per_iteration] += tree.predict(row);
        }
        if self.average_output {
            let iterations = (self.trees.len() / self.trees_per_iteration).max(1) as f64;
            scores.iter_mut().for_each(|s| *s /= iterations);
        }
        scores
    }

    pub fn probabilities(&self, row: &[f32]) -> Vec<f64> {
        let scores = self.raw_scores(row);
        match self.transform {
            OutputTransform::Softmax => softmax(&scores),
            OutputTransform::Sigmoid(scale) => {
                let probs: Vec<f64> = scores.iter().map(|&s| sigmoid(scale * s)).collect();
                if self.num_class == 1 {
                    // Binary: report both classes
                    vec![1.0 - probs[0], probs[0]]
                } else {
                    probs
                }
            }
            OutputTransform::Raw => scores,
        }
    }

    fn first_row(&self, features: ArrayView2<'_, f32>) -> Result<Vec<f32>, InferenceError> {
        if features.nrows() == 0 || features.ncols() != self.num_features {
            return Err(InferenceError::ShapeMismatch {
                expected: vec![1, self.num_features],
                got: features.shape().to_vec(),
            });
        }
        Ok(features.row(0).to_vec())
    }
}

impl Classifier for GbdtClassifier {
    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<i64, InferenceError> {
        let row = self.first_row(features)?;
        let probabilities = self.probabilities(&row);
        argmax(&probabilities)
            .map(|i| i as i64)
            .ok_or_else(|| InferenceError::ModelFormat("model produced no scores".to_string()))
    }

    fn predict_proba(
        &self,
        features: ArrayView2<'_, f32>,
    ) -> Result<Option<Vec<f64>>, InferenceError> {
        let row = self.first_row(features)?;
        Ok(Some(self.probabilities(&row)))
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
