//! Common test utilities for esml integration tests.
//!
//! [`MockElasticsearch`] plays the remote model store in memory: it stores
//! uploaded definitions, answers model lookups, and evaluates ingest
//! simulations and infer calls with the stored definition. The fixture
//! builders generate random sklearn, XGBoost and LightGBM models whose
//! thresholds and feature values sit on disjoint grids, so every split is
//! decided the same way in single and double precision.

#![allow(dead_code)]

use esml::client::Method;
use esml::io::codec::{decode_definition_value, encode_definition};
use esml::{
    Document, EsClient, LgbModel, Request, Response, SklearnModel, TrainedModelDefinition,
    Transport, XgbModel,
};
use ndarray::Array2;
use rand::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const MODELS_PREFIX: &str = "_ml/trained_models/";
const SIMULATE_PATH: &str = "_ingest/pipeline/_simulate";
const ANALYTICS_PREFIX: &str = "_ml/data_frame/analytics/";

/// A model held by the mock store.
#[derive(Debug, Clone)]
pub struct StoredModel {
    /// Uploaded configuration without its definition
    pub config: Value,
    /// Decoded definition
    pub definition: TrainedModelDefinition,
    /// Whether the upload used `compressed_definition`
    pub compressed: bool,
}

/// In-memory stand-in for the cluster.
#[derive(Debug)]
pub struct MockElasticsearch {
    version: Mutex<String>,
    models: Mutex<BTreeMap<String, StoredModel>>,
    simulate_response: Mutex<Option<Value>>,
    analytics: Mutex<BTreeMap<String, Value>>,
    requests: Mutex<Vec<Request>>,
}

fn error_response(status: u16, error_type: &str, reason: String) -> Response {
    Response::new(
        status,
        json!({
            "error": {"type": error_type, "reason": reason},
            "status": status,
        }),
    )
}

impl MockElasticsearch {
    /// Mock cluster reporting version 8.11.0
    pub fn new() -> Arc<Self> {
        Self::with_version("8.11.0")
    }

    /// Mock cluster reporting `version`
    pub fn with_version(version: &str) -> Arc<Self> {
        Arc::new(MockElasticsearch {
            version: Mutex::new(version.to_string()),
            models: Mutex::new(BTreeMap::new()),
            simulate_response: Mutex::new(None),
            analytics: Mutex::new(BTreeMap::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Client talking to this mock
    pub fn client(self: &Arc<Self>) -> EsClient {
        EsClient::new(self.clone())
    }

    /// Answer every simulate call with `body`
    pub fn set_simulate_response(&self, body: Value) {
        *self.simulate_response.lock().unwrap() = Some(body);
    }

    /// Store a definition as if it had been trained remotely
    pub fn insert_model(&self, model_id: &str, definition: TrainedModelDefinition) {
        let config = json!({
            "model_id": model_id,
            "input": {"field_names": definition.input_field_names()},
            "inference_config": esml::InferenceConfig::for_model_type(definition.model_type()),
        });
        self.models.lock().unwrap().insert(
            model_id.to_string(),
            StoredModel {
                config,
                definition,
                compressed: true,
            },
        );
    }

    /// Configured analytics job ids
    pub fn analytics_ids(&self) -> Vec<String> {
        self.analytics.lock().unwrap().keys().cloned().collect()
    }

    fn analytics_job(&self, method: Method, rest: &str, body: &Value) -> Response {
        let mut jobs = self.analytics.lock().unwrap();
        match (method, rest.strip_suffix("/_start")) {
            (Method::Put, None) => {
                jobs.insert(rest.to_string(), body.clone());
                Response::new(200, json!({"id": rest}))
            }
            (Method::Post, Some(id)) if jobs.contains_key(id) => {
                Response::new(200, json!({"acknowledged": true, "node": "mock"}))
            }
            (Method::Delete, None) if jobs.contains_key(rest) => {
                jobs.remove(rest);
                Response::new(200, json!({"acknowledged": true}))
            }
            _ => error_response(
                404,
                "resource_not_found_exception",
                format!("No known data frame analytics with id [{}]", rest),
            ),
        }
    }

    /// Stored model by id
    pub fn stored(&self, model_id: &str) -> Option<StoredModel> {
        self.models.lock().unwrap().get(model_id).cloned()
    }

    /// Ids of every stored model
    pub fn model_ids(&self) -> Vec<String> {
        self.models.lock().unwrap().keys().cloned().collect()
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests with the given method and path
    pub fn count_requests(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn get_models(&self, pattern: &str, request: &Request) -> Response {
        let models = self.models.lock().unwrap();
        let matches: Vec<(&String, &StoredModel)> = match pattern.strip_suffix('*') {
            Some(prefix) => models.iter().filter(|(id, _)| id.starts_with(prefix)).collect(),
            None => models.iter().filter(|(id, _)| id.as_str() == pattern).collect(),
        };
        if matches.is_empty() && !pattern.ends_with('*') {
            return error_response(
                404,
                "resource_not_found_exception",
                format!("Could not find trained model [{}]", pattern),
            );
        }

        let include_definition = request.query_param("include") == Some("definition");
        let configs: Vec<Value> = matches
            .into_iter()
            .map(|(id, stored)| {
                let mut config = stored.config.clone();
                config["model_id"] = Value::String(id.clone());
                if include_definition {
                    let encoded = encode_definition(&stored.definition).unwrap();
                    config["compressed_definition"] = Value::String(encoded);
                }
                config
            })
            .collect();
        Response::new(
            200,
            json!({"count": configs.len(), "trained_model_configs": configs}),
        )
    }

    fn put_model(&self, model_id: &str, body: &Value) -> Response {
        if self.models.lock().unwrap().contains_key(model_id) {
            return error_response(
                400,
                "resource_already_exists_exception",
                format!("Trained machine learning model [{}] already exists", model_id),
            );
        }
        let (encoded, compressed) = match (body.get("compressed_definition"), body.get("definition")) {
            (Some(encoded), _) => (encoded, true),
            (None, Some(definition)) => (definition, false),
            (None, None) => {
                return error_response(
                    400,
                    "action_request_validation_exception",
                    "definition is required".to_string(),
                )
            }
        };
        let definition = match decode_definition_value(encoded) {
            Ok(definition) => definition,
            Err(e) => return error_response(400, "x_content_parse_exception", e.to_string()),
        };
        if let Err(e) = definition.validate() {
            return error_response(400, "illegal_argument_exception", e.to_string());
        }

        let mut config = body.clone();
        if let Some(object) = config.as_object_mut() {
            object.remove("compressed_definition");
            object.remove("definition");
            object.insert("model_id".to_string(), Value::String(model_id.to_string()));
        }
        self.models.lock().unwrap().insert(
            model_id.to_string(),
            StoredModel {
                config: config.clone(),
                definition,
                compressed,
            },
        );
        Response::new(200, config)
    }

    fn delete_model(&self, model_id: &str) -> Response {
        match self.models.lock().unwrap().remove(model_id) {
            Some(_) => Response::new(200, json!({"acknowledged": true})),
            None => error_response(
                404,
                "resource_not_found_exception",
                format!("Could not find trained model [{}]", model_id),
            ),
        }
    }

    fn infer_document(stored: &StoredModel, source: &Document) -> Result<Document, Value> {
        let num_top_classes = stored.config["inference_config"]["classification"]["num_top_classes"]
            .as_i64()
            .unwrap_or(0) as i32;
        stored
            .definition
            .infer_document(source)
            .map(|result| result.to_document(num_top_classes))
            .map_err(|e| json!({"type": "status_exception", "reason": e.to_string()}))
    }

    fn simulate(&self, body: &Value) -> Response {
        if let Some(canned) = self.simulate_response.lock().unwrap().clone() {
            return Response::new(200, canned);
        }
        let processor = &body["pipeline"]["processors"][0]["inference"];
        let model_id = processor["model_id"].as_str().unwrap_or_default();
        let stored = self.stored(model_id);

        let docs: Vec<Value> = body["docs"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|doc| {
                let source = doc["_source"].as_object().cloned().unwrap_or_default();
                let stored = match &stored {
                    Some(stored) => stored,
                    None => {
                        return json!({"error": {
                            "type": "resource_not_found_exception",
                            "reason": format!("Could not find trained model [{}]", model_id),
                        }})
                    }
                };
                match Self::infer_document(stored, &source) {
                    Ok(mut inference) => {
                        inference.insert("model_id".to_string(), Value::from(model_id));
                        let mut output = source.clone();
                        output.insert("ml".to_string(), json!({"inference": inference}));
                        json!({"doc": {"_index": "_index", "_id": "_id", "_source": output}})
                    }
                    Err(error) => json!({"error": error}),
                }
            })
            .collect();
        Response::new(200, json!({"docs": docs}))
    }

    fn infer(&self, model_id: &str, body: &Value) -> Response {
        let stored = match self.stored(model_id) {
            Some(stored) => stored,
            None => {
                return error_response(
                    404,
                    "resource_not_found_exception",
                    format!("Could not find trained model [{}]", model_id),
                )
            }
        };
        let mut results = Vec::new();
        for doc in body["docs"].as_array().cloned().unwrap_or_default() {
            let source = doc.as_object().cloned().unwrap_or_default();
            match Self::infer_document(&stored, &source) {
                Ok(result) => results.push(Value::Object(result)),
                Err(error) => return Response::new(400, json!({"error": error, "status": 400})),
            }
        }
        Response::new(200, json!({"inference_results": results}))
    }
}

impl Transport for MockElasticsearch {
    fn perform(&self, request: &Request) -> esml::Result<Response> {
        self.requests.lock().unwrap().push(request.clone());
        let body = request.body.clone().unwrap_or(Value::Null);

        let response = if request.path.is_empty() && request.method == Method::Get {
            let version = self.version.lock().unwrap().clone();
            Response::new(200, json!({"name": "mock", "version": {"number": version}}))
        } else if request.path == SIMULATE_PATH && request.method == Method::Post {
            self.simulate(&body)
        } else if let Some(rest) = request.path.strip_prefix(MODELS_PREFIX) {
            match (request.method, rest.strip_suffix("/_infer")) {
                (Method::Post, Some(model_id)) => self.infer(model_id, &body),
                (Method::Get, None) => self.get_models(rest, request),
                (Method::Put, None) => self.put_model(rest, &body),
                (Method::Delete, None) => self.delete_model(rest),
                _ => error_response(405, "method_not_allowed", request.path.clone()),
            }
        } else if let Some(rest) = request.path.strip_prefix(ANALYTICS_PREFIX) {
            self.analytics_job(request.method, rest, &body)
        } else if request.method == Method::Delete && !request.path.starts_with('_') {
            Response::new(200, json!({"acknowledged": true}))
        } else {
            error_response(400, "illegal_argument_exception", format!("no handler for {}", request.path))
        };
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Random data and model fixtures
// ---------------------------------------------------------------------------

/// Names `f0..fn`
pub fn feature_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("f{}", i)).collect()
}

/// Feature values on the grid `k / 4 + 1 / 8`.
pub fn grid_data(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-16..16) as f64 / 4.0 + 0.125)
}

/// Grid data with roughly a quarter of the values set to exactly 0.0.
pub fn grid_data_with_zeros(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
    let mut data = grid_data(rng, rows, cols);
    data.mapv_inplace(|v| if rng.gen_bool(0.25) { 0.0 } else { v });
    data
}

/// Thresholds on the grid `k / 4`, never equal to a feature value.
fn grid_threshold(rng: &mut StdRng) -> f64 {
    rng.gen_range(-12..12) as f64 / 4.0
}

/// Leaf values rounded to 1/1024.
fn leaf_value(rng: &mut StdRng) -> f64 {
    (rng.gen_range(-1.0..1.0) * 1024.0_f64).round() / 1024.0
}

struct SkNode {
    left: i64,
    right: i64,
    feature: i64,
    threshold: f64,
    value: Vec<f64>,
    samples: u64,
}

fn grow_sklearn(
    rng: &mut StdRng,
    nodes: &mut Vec<SkNode>,
    depth: usize,
    n_features: usize,
    n_classes: usize,
) -> usize {
    let index = nodes.len();
    nodes.push(SkNode {
        left: -1,
        right: -1,
        feature: -2,
        threshold: -2.0,
        value: Vec::new(),
        samples: 0,
    });

    if depth == 0 || (index > 0 && rng.gen_bool(0.2)) {
        let samples = rng.gen_range(1..50u64);
        let value = if n_classes == 0 {
            vec![leaf_value(rng) * 10.0]
        } else {
            let winner = rng.gen_range(0..n_classes);
            (0..n_classes)
                .map(|c| {
                    if c == winner {
                        rng.gen_range(20..40) as f64
                    } else {
                        rng.gen_range(0..10) as f64
                    }
                })
                .collect()
        };
        nodes[index].value = value;
        nodes[index].samples = samples;
        return index;
    }

    let left = grow_sklearn(rng, nodes, depth - 1, n_features, n_classes);
    let right = grow_sklearn(rng, nodes, depth - 1, n_features, n_classes);
    let samples = nodes[left].samples + nodes[right].samples;
    let value = if n_classes == 0 {
        let (l, r) = (&nodes[left], &nodes[right]);
        vec![(l.value[0] * l.samples as f64 + r.value[0] * r.samples as f64) / samples as f64]
    } else {
        nodes[left]
            .value
            .iter()
            .zip(&nodes[right].value)
            .map(|(a, b)| a + b)
            .collect()
    };
    let node = &mut nodes[index];
    node.left = left as i64;
    node.right = right as i64;
    node.feature = rng.gen_range(0..n_features) as i64;
    node.threshold = grid_threshold(rng);
    node.value = value;
    node.samples = samples;
    index
}

/// Arrays of a random fitted sklearn tree. `n_classes == 0` builds a regressor.
pub fn random_sklearn_tree(rng: &mut StdRng, n_features: usize, depth: usize, n_classes: usize) -> Value {
    let mut nodes = Vec::new();
    grow_sklearn(rng, &mut nodes, depth, n_features, n_classes);
    json!({
        "children_left": nodes.iter().map(|n| n.left).collect::<Vec<_>>(),
        "children_right": nodes.iter().map(|n| n.right).collect::<Vec<_>>(),
        "feature": nodes.iter().map(|n| n.feature).collect::<Vec<_>>(),
        "threshold": nodes.iter().map(|n| n.threshold).collect::<Vec<_>>(),
        "value": nodes.iter().map(|n| n.value.clone()).collect::<Vec<_>>(),
        "n_node_samples": nodes.iter().map(|n| n.samples).collect::<Vec<_>>(),
    })
}

/// Random sklearn estimator of the given `"type"`.
pub fn random_sklearn_model(
    rng: &mut StdRng,
    estimator: &str,
    n_features: usize,
    n_classes: usize,
    n_trees: usize,
) -> SklearnModel {
    let classifier = estimator.ends_with("Classifier");
    let classes = if classifier { n_classes } else { 0 };
    let mut doc = json!({"type": estimator, "n_features_in": n_features});
    if classifier {
        doc["classes"] = json!((0..n_classes).collect::<Vec<_>>());
    }
    if estimator.starts_with("RandomForest") {
        let trees: Vec<Value> = (0..n_trees)
            .map(|_| random_sklearn_tree(rng, n_features, 4, classes))
            .collect();
        doc["estimators"] = Value::Array(trees);
    } else {
        doc["tree"] = random_sklearn_tree(rng, n_features, 5, classes);
    }
    SklearnModel::from_json_str(&doc.to_string()).unwrap()
}

fn grow_xgb(rng: &mut StdRng, tree: &mut XgbArrays, depth: usize, n_features: usize) -> usize {
    let index = tree.left.len();
    tree.left.push(-1);
    tree.right.push(-1);
    tree.feature.push(0);
    tree.condition.push(0.0);
    tree.default_left.push(0);

    if depth == 0 || (index > 0 && rng.gen_bool(0.25)) {
        tree.condition[index] = leaf_value(rng) as f32;
        return index;
    }
    let left = grow_xgb(rng, tree, depth - 1, n_features);
    let right = grow_xgb(rng, tree, depth - 1, n_features);
    tree.left[index] = left as i32;
    tree.right[index] = right as i32;
    tree.feature[index] = rng.gen_range(0..n_features) as i32;
    tree.condition[index] = grid_threshold(rng) as f32;
    tree.default_left[index] = rng.gen_range(0..2);
    index
}

#[derive(Default)]
struct XgbArrays {
    left: Vec<i32>,
    right: Vec<i32>,
    feature: Vec<i32>,
    condition: Vec<f32>,
    default_left: Vec<i32>,
}

/// One random booster tree in XGBoost JSON form.
pub fn random_xgb_tree(rng: &mut StdRng, n_features: usize, depth: usize) -> Value {
    let mut arrays = XgbArrays::default();
    grow_xgb(rng, &mut arrays, depth, n_features);
    let n = arrays.left.len();
    json!({
        "left_children": arrays.left,
        "right_children": arrays.right,
        "split_indices": arrays.feature,
        "split_conditions": arrays.condition,
        "default_left": arrays.default_left,
        "split_type": vec![0; n],
        "loss_changes": vec![0.0; n],
        "parents": vec![0; n],
    })
}

/// Random XGBoost model. `num_class` is 0 unless the objective is multi-class;
/// `rounds` trees are grown per class.
pub fn random_xgb_model(
    rng: &mut StdRng,
    objective: &str,
    booster: &str,
    n_features: usize,
    num_class: usize,
    rounds: usize,
) -> XgbModel {
    let groups = num_class.max(1);
    let trees: Vec<Value> = (0..rounds * groups)
        .map(|_| random_xgb_tree(rng, n_features, 3))
        .collect();
    let tree_info: Vec<usize> = (0..rounds * groups).map(|i| i % groups).collect();
    let model = json!({"trees": trees, "tree_info": tree_info, "gbtree_model_param": {}});
    let gradient_booster = match booster {
        "dart" => json!({
            "name": "dart",
            "gbtree": {"name": "gbtree", "model": model},
            "weight_drop": (0..rounds * groups).map(|_| rng.gen_range(0.5..1.0)).collect::<Vec<f64>>(),
        }),
        _ => json!({"name": "gbtree", "model": model}),
    };
    let base_score = match objective {
        "binary:logistic" | "reg:logistic" => "3E-1",
        "reg:gamma" | "reg:tweedie" | "count:poisson" => "1.5E0",
        _ => "5E-1",
    };
    let doc = json!({
        "learner": {
            "attributes": {},
            "feature_names": [],
            "feature_types": [],
            "gradient_booster": gradient_booster,
            "learner_model_param": {
                "base_score": format!("[{}]", base_score),
                "boost_from_average": "1",
                "num_class": num_class.to_string(),
                "num_feature": n_features.to_string(),
                "num_target": "1"
            },
            "objective": {"name": objective}
        },
        "version": [2, 0, 3]
    });
    XgbModel::from_json_str(&doc.to_string()).unwrap()
}

/// Missing type given to every split of a random LightGBM tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LgbMissing {
    /// NaN follows a random default direction
    NaN,
    /// Zero and NaN follow the side 0.0 falls on
    Zero,
}

#[derive(Default)]
struct LgbArrays {
    split_feature: Vec<i32>,
    threshold: Vec<f64>,
    decision_type: Vec<i32>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_value: Vec<f64>,
}

/// Returns the child reference: internal index, or `!leaf` for leaves.
fn grow_lgb(
    rng: &mut StdRng,
    tree: &mut LgbArrays,
    depth: usize,
    n_features: usize,
    root: bool,
    missing: LgbMissing,
) -> i32 {
    if depth == 0 || (!root && rng.gen_bool(0.25)) {
        tree.leaf_value.push(leaf_value(rng));
        return !((tree.leaf_value.len() - 1) as i32);
    }
    let index = tree.split_feature.len();
    tree.split_feature.push(rng.gen_range(0..n_features) as i32);
    let threshold = grid_threshold(rng);
    tree.threshold.push(threshold);
    let decision_type = match missing {
        LgbMissing::NaN => {
            let default_left = if rng.gen_bool(0.5) { 2 } else { 0 };
            let nan = if rng.gen_bool(0.5) { 2 << 2 } else { 0 };
            default_left | nan
        }
        LgbMissing::Zero => {
            let default_left = if 0.0 <= threshold { 2 } else { 0 };
            default_left | (1 << 2)
        }
    };
    tree.decision_type.push(decision_type);
    tree.left_child.push(0);
    tree.right_child.push(0);
    let left = grow_lgb(rng, tree, depth - 1, n_features, false, missing);
    let right = grow_lgb(rng, tree, depth - 1, n_features, false, missing);
    tree.left_child[index] = left;
    tree.right_child[index] = right;
    index as i32
}

fn join<T: ToString>(values: &[T]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

/// One random `Tree=N` block in LightGBM text form.
pub fn random_lgb_tree(
    rng: &mut StdRng,
    index: usize,
    n_features: usize,
    depth: usize,
    missing: LgbMissing,
) -> String {
    let mut tree = LgbArrays::default();
    grow_lgb(rng, &mut tree, depth, n_features, true, missing);
    format!(
        "Tree={}\nnum_leaves={}\nnum_cat=0\nsplit_feature={}\nsplit_gain={}\nthreshold={}\n\
         decision_type={}\nleft_child={}\nright_child={}\nleaf_value={}\nis_linear=0\nshrinkage=0.1\n\n",
        index,
        tree.leaf_value.len(),
        join(&tree.split_feature),
        join(&vec![1.0; tree.split_feature.len()]),
        join(&tree.threshold),
        join(&tree.decision_type),
        join(&tree.left_child),
        join(&tree.right_child),
        join(&tree.leaf_value),
    )
}

/// Random LightGBM model text. `num_class` is 1 unless multi-class.
pub fn random_lgb_model(
    rng: &mut StdRng,
    objective_line: &str,
    n_features: usize,
    num_class: usize,
    rounds: usize,
    average_output: bool,
) -> LgbModel {
    random_lgb_model_with_missing(
        rng,
        objective_line,
        n_features,
        num_class,
        rounds,
        average_output,
        LgbMissing::NaN,
    )
}

/// Random LightGBM model whose splits all use `missing`.
pub fn random_lgb_model_with_missing(
    rng: &mut StdRng,
    objective_line: &str,
    n_features: usize,
    num_class: usize,
    rounds: usize,
    average_output: bool,
    missing: LgbMissing,
) -> LgbModel {
    let mut text = format!(
        "tree\nversion=v4\nnum_class={}\nnum_tree_per_iteration={}\nlabel_index=0\nmax_feature_idx={}\nobjective={}\n",
        num_class,
        num_class,
        n_features - 1,
        objective_line
    );
    if average_output {
        text.push_str("average_output\n");
    }
    text.push_str(&format!("feature_names={}\n\n", join(&feature_names(n_features))));
    for i in 0..rounds * num_class {
        text.push_str(&random_lgb_tree(rng, i, n_features, 3, missing));
    }
    text.push_str("end of trees\n\nfeature_importances:\n");
    LgbModel::from_text(&text).unwrap()
}
