//! Import, remote prediction and deletion against the in-memory cluster.

mod common;

use common::*;
use esml::client::Method;
use esml::harness::{check_prediction_equality, random_rows};
use esml::{EsMlError, IfExists, ImportOptions, LocalModel, MLModel, ModelType, ModelTransformer};
use ndarray::array;
use rand::prelude::*;
use serde_json::json;

const MODEL_ID: &str = "test_model";

fn import<M: ModelTransformer + ?Sized>(
    es: &std::sync::Arc<MockElasticsearch>,
    model_id: &str,
    model: &M,
    options: ImportOptions,
) -> esml::Result<MLModel> {
    let names = feature_names(model.num_features());
    MLModel::import_model(es.client(), model_id, model, &names, options)
}

fn assert_remote_matches_local<M: LocalModel>(model: &M, seed: u64) {
    let es = MockElasticsearch::new();
    let mut rng = StdRng::seed_from_u64(seed);
    let data = grid_data(&mut rng, 200, model.num_features());
    let test_data = random_rows(data.view(), 20, &mut rng);

    let es_model = import(&es, MODEL_ID, model, ImportOptions::default()).unwrap();
    check_prediction_equality(&es_model, model, test_data.view(), 2).unwrap();
    check_prediction_equality(&es_model, model, data.view(), 2).unwrap();
}

#[test]
fn test_decision_tree_classifier() {
    let mut rng = StdRng::seed_from_u64(1);
    for seed in 0..5 {
        let model = random_sklearn_model(&mut rng, "DecisionTreeClassifier", 4, 2, 1);
        assert_remote_matches_local(&model, seed);
    }
}

#[test]
fn test_decision_tree_multiclass_classifier() {
    let mut rng = StdRng::seed_from_u64(2);
    let model = random_sklearn_model(&mut rng, "DecisionTreeClassifier", 5, 4, 1);
    assert!(model.is_multiclass());
    assert_remote_matches_local(&model, 2);
}

#[test]
fn test_decision_tree_regressor() {
    let mut rng = StdRng::seed_from_u64(3);
    for seed in 0..5 {
        let model = random_sklearn_model(&mut rng, "DecisionTreeRegressor", 3, 0, 1);
        assert_remote_matches_local(&model, seed);
    }
}

#[test]
fn test_random_forest_classifier() {
    let mut rng = StdRng::seed_from_u64(4);
    let model = random_sklearn_model(&mut rng, "RandomForestClassifier", 4, 3, 7);
    assert_remote_matches_local(&model, 4);
}

#[test]
fn test_random_forest_regressor() {
    let mut rng = StdRng::seed_from_u64(5);
    let model = random_sklearn_model(&mut rng, "RandomForestRegressor", 4, 0, 10);
    assert_remote_matches_local(&model, 5);
}

#[test]
fn test_xgb_classifier() {
    let mut rng = StdRng::seed_from_u64(6);
    for booster in ["gbtree", "dart"] {
        let model = random_xgb_model(&mut rng, "binary:logistic", booster, 4, 0, 10);
        assert_eq!(model.model_type(), ModelType::Classification);
        assert_remote_matches_local(&model, 6);
    }
}

#[test]
fn test_xgb_multiclass_classifier() {
    let mut rng = StdRng::seed_from_u64(7);
    for objective in ["multi:softmax", "multi:softprob"] {
        let model = random_xgb_model(&mut rng, objective, "gbtree", 5, 3, 6);
        assert!(model.is_multiclass());
        assert_remote_matches_local(&model, 7);
    }
}

#[test]
fn test_xgb_regressor() {
    let mut rng = StdRng::seed_from_u64(8);
    for objective in [
        "reg:squarederror",
        "reg:linear",
        "reg:squaredlogerror",
        "reg:logistic",
        "reg:pseudohubererror",
        "reg:gamma",
        "reg:tweedie",
        "count:poisson",
    ] {
        for booster in ["gbtree", "dart"] {
            let model = random_xgb_model(&mut rng, objective, booster, 4, 0, 8);
            assert_eq!(model.model_type(), ModelType::Regression);
            assert_remote_matches_local(&model, 8);
        }
    }
}

#[test]
fn test_lgbm_regressor() {
    let mut rng = StdRng::seed_from_u64(9);
    for objective in [
        "regression",
        "regression_l1",
        "huber",
        "fair",
        "quantile",
        "mape",
        "poisson",
        "gamma",
        "tweedie",
    ] {
        let model = random_lgb_model(&mut rng, objective, 4, 1, 10, false);
        assert_remote_matches_local(&model, 9);
    }
}

#[test]
fn test_lgbm_zero_as_missing_regressor() {
    let mut rng = StdRng::seed_from_u64(14);
    let model = random_lgb_model_with_missing(&mut rng, "regression", 4, 1, 10, false, LgbMissing::Zero);
    let es = MockElasticsearch::new();
    let data = grid_data_with_zeros(&mut rng, 100, 4);
    assert!(data.iter().any(|&v| v == 0.0));

    let es_model = import(&es, MODEL_ID, &model, ImportOptions::default()).unwrap();
    check_prediction_equality(&es_model, &model, data.view(), 2).unwrap();
}

#[test]
fn test_lgbm_random_forest_regressor() {
    let mut rng = StdRng::seed_from_u64(10);
    let model = random_lgb_model(&mut rng, "regression", 4, 1, 10, true);
    assert_remote_matches_local(&model, 10);
}

#[test]
fn test_lgbm_classifier() {
    let mut rng = StdRng::seed_from_u64(11);
    for objective in ["binary sigmoid:1", "binary sigmoid:0.5"] {
        let model = random_lgb_model(&mut rng, objective, 4, 1, 10, false);
        assert_eq!(model.model_type(), ModelType::Classification);
        assert_remote_matches_local(&model, 11);
    }
}

#[test]
fn test_lgbm_multiclass_classifier() {
    let mut rng = StdRng::seed_from_u64(12);
    for objective in ["multiclass num_class:3", "multiclassova num_class:3 sigmoid:1"] {
        let model = random_lgb_model(&mut rng, objective, 5, 3, 6, false);
        assert!(model.is_multiclass());
        assert_remote_matches_local(&model, 12);
    }
}

#[test]
fn test_lgbm_cross_entropy_regressor() {
    let mut rng = StdRng::seed_from_u64(13);
    let model = random_lgb_model(&mut rng, "cross_entropy", 3, 1, 10, false);
    assert_eq!(model.model_type(), ModelType::Regression);
    assert_remote_matches_local(&model, 13);
}

#[test]
fn test_import_compressed_and_inline() {
    let mut rng = StdRng::seed_from_u64(14);
    let model = random_sklearn_model(&mut rng, "RandomForestRegressor", 3, 0, 5);
    let es = MockElasticsearch::new();

    import(&es, "compressed", &model, ImportOptions::default()).unwrap();
    import(
        &es,
        "inline",
        &model,
        ImportOptions::default().es_compress_model_definition(false),
    )
    .unwrap();

    let compressed = es.stored("compressed").unwrap();
    let inline = es.stored("inline").unwrap();
    assert!(compressed.compressed);
    assert!(!inline.compressed);
    assert_eq!(compressed.definition, inline.definition);
    assert_eq!(
        compressed.config["input"]["field_names"],
        json!(["f0", "f1", "f2"])
    );
    assert_eq!(compressed.config["inference_config"], json!({"regression": {}}));
}

#[test]
fn test_import_existing_model() {
    let mut rng = StdRng::seed_from_u64(15);
    let model = random_sklearn_model(&mut rng, "DecisionTreeClassifier", 3, 2, 1);
    let other = random_sklearn_model(&mut rng, "DecisionTreeRegressor", 3, 0, 1);
    let es = MockElasticsearch::new();

    import(&es, MODEL_ID, &model, ImportOptions::default()).unwrap();
    let err = import(&es, MODEL_ID, &other, ImportOptions::default()).unwrap_err();
    assert!(matches!(&err, EsMlError::ModelAlreadyExists { model_id } if model_id == MODEL_ID));
    assert_eq!(
        err.to_string(),
        format!("Trained machine learning model {} already exists", MODEL_ID)
    );
    assert_eq!(es.stored(MODEL_ID).unwrap().definition.model_type(), ModelType::Classification);

    let replaced = import(
        &es,
        MODEL_ID,
        &other,
        ImportOptions::default().es_if_exists(IfExists::Replace),
    )
    .unwrap();
    assert_eq!(replaced.model_type().unwrap(), ModelType::Regression);
    assert_eq!(es.stored(MODEL_ID).unwrap().definition.model_type(), ModelType::Regression);
    assert_eq!(
        es.count_requests(Method::Delete, &format!("_ml/trained_models/{}", MODEL_ID)),
        1
    );
}

#[test]
fn test_import_rejects_wrong_feature_count() {
    let mut rng = StdRng::seed_from_u64(16);
    let model = random_sklearn_model(&mut rng, "DecisionTreeRegressor", 3, 0, 1);
    let es = MockElasticsearch::new();
    let names = feature_names(2);
    let err = MLModel::import_model(es.client(), MODEL_ID, &model, &names, ImportOptions::default())
        .unwrap_err();
    assert!(matches!(err, EsMlError::InvalidParameter { .. }));
    assert!(es.model_ids().is_empty());
}

#[test]
fn test_multiclass_requires_server_version() {
    let mut rng = StdRng::seed_from_u64(17);
    let multiclass = random_xgb_model(&mut rng, "multi:softprob", "gbtree", 3, 3, 2);
    let binary = random_xgb_model(&mut rng, "binary:logistic", "gbtree", 3, 0, 2);
    let es = MockElasticsearch::with_version("7.6.2");

    let err = import(&es, "multi", &multiclass, ImportOptions::default()).unwrap_err();
    assert!(matches!(err, EsMlError::UnsupportedServerVersion { .. }));
    assert!(import(&es, "binary", &binary, ImportOptions::default()).is_ok());

    let es = MockElasticsearch::with_version("7.7.0");
    assert!(import(&es, "multi", &multiclass, ImportOptions::default()).is_ok());
}

#[test]
fn test_classification_label_override() {
    let mut rng = StdRng::seed_from_u64(18);
    let model = random_xgb_model(&mut rng, "binary:logistic", "gbtree", 3, 0, 4);
    let es = MockElasticsearch::new();
    let options = ImportOptions::default()
        .classification_labels(vec!["no".to_string(), "yes".to_string()])
        .description("labelled");
    import(&es, MODEL_ID, &model, options).unwrap();

    let stored = es.stored(MODEL_ID).unwrap();
    assert_eq!(stored.config["description"], json!("labelled"));
    let labels = stored.definition.trained_model.classification_labels().unwrap();
    assert_eq!(labels, ["no".to_string(), "yes".to_string()]);

    let regressor = random_xgb_model(&mut rng, "reg:squarederror", "gbtree", 3, 0, 4);
    let options = ImportOptions::default().classification_weights(vec![1.0, 2.0]);
    assert!(import(&es, "regressor", &regressor, options).is_err());
}

#[test]
fn test_predict_single_feature_vector() {
    let mut rng = StdRng::seed_from_u64(19);
    let model = random_sklearn_model(&mut rng, "DecisionTreeRegressor", 3, 0, 1);
    let es = MockElasticsearch::new();
    let es_model = import(&es, MODEL_ID, &model, ImportOptions::default()).unwrap();

    let row = [0.125, -1.375, 2.625];
    let remote = es_model.predict_row(&row).unwrap();
    let local = model.predict_row(&row).unwrap();
    assert!((remote - local).abs() < 1e-9);
}

#[test]
fn test_missing_features_follow_default_direction() {
    let mut rng = StdRng::seed_from_u64(20);
    let model = random_xgb_model(&mut rng, "reg:squarederror", "gbtree", 3, 0, 5);
    let es = MockElasticsearch::new();
    let es_model = import(&es, MODEL_ID, &model, ImportOptions::default()).unwrap();

    let data = array![[f64::NAN, 0.125, -0.875], [1.125, f64::NAN, f64::NAN]];
    check_prediction_equality(&es_model, &model, data.view(), 2).unwrap();
}

#[test]
fn test_simulate_error_is_reported() {
    let mut rng = StdRng::seed_from_u64(21);
    let model = random_sklearn_model(&mut rng, "DecisionTreeClassifier", 3, 2, 1);
    let es = MockElasticsearch::new();
    let es_model = import(&es, "test_decision_tree_classifier", &model, ImportOptions::default()).unwrap();

    es.set_simulate_response(json!({
        "docs": [{"error": {
            "type": "x_content_parse_exception",
            "reason": "[1:1052] [inference_model_definition] failed to parse field [trained_model]"
        }}]
    }));
    let err = es_model.predict_row(&[0.125, 0.125, 0.125]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to run prediction for model ID 'test_decision_tree_classifier'"
    );
    match err {
        EsMlError::InferenceFailed { error, .. } => {
            assert_eq!(error["type"], json!("x_content_parse_exception"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_predict_missing_model() {
    let es = MockElasticsearch::new();
    let es_model = MLModel::new(es.client(), "missing");
    assert!(!es_model.exists_model().unwrap());
    assert!(es_model.predict_row(&[1.0]).unwrap_err().is_not_found());
}

#[test]
fn test_existing_model_handle() {
    let mut rng = StdRng::seed_from_u64(22);
    let model = random_lgb_model(&mut rng, "binary sigmoid:1", 4, 1, 5, false);
    let es = MockElasticsearch::new();
    import(&es, MODEL_ID, &model, ImportOptions::default()).unwrap();

    let handle = MLModel::new(es.client(), MODEL_ID);
    assert!(handle.exists_model().unwrap());
    assert_eq!(handle.model_type().unwrap(), ModelType::Classification);
    assert_eq!(handle.feature_names().unwrap(), feature_names(4));

    let data = grid_data(&mut rng, 30, 4);
    check_prediction_equality(&handle, &model, data.view(), 2).unwrap();
}

#[test]
fn test_infer_documents() {
    let mut rng = StdRng::seed_from_u64(23);
    let model = random_sklearn_model(&mut rng, "RandomForestRegressor", 2, 0, 3);
    let es = MockElasticsearch::new();
    let es_model = import(&es, MODEL_ID, &model, ImportOptions::default()).unwrap();

    let docs: Vec<esml::Document> = (0..3)
        .map(|i| {
            let mut doc = esml::Document::new();
            doc.insert("f0".to_string(), json!(i as f64 + 0.125));
            doc.insert("f1".to_string(), json!(-0.375));
            doc
        })
        .collect();
    let results = es_model.infer_documents(&docs).unwrap();
    assert_eq!(results.len(), 3);
    for (i, result) in results.iter().enumerate() {
        let local = model.predict_row(&[i as f64 + 0.125, -0.375]).unwrap();
        let remote = result["predicted_value"].as_f64().unwrap();
        assert!((local - remote).abs() < 1e-9);
    }
}

#[test]
fn test_delete_model() {
    let mut rng = StdRng::seed_from_u64(24);
    let model = random_sklearn_model(&mut rng, "DecisionTreeRegressor", 2, 0, 1);
    let es = MockElasticsearch::new();
    let es_model = import(&es, MODEL_ID, &model, ImportOptions::default()).unwrap();

    assert!(es_model.exists_model().unwrap());
    es_model.delete_model().unwrap();
    assert!(!es_model.exists_model().unwrap());
    es_model.delete_model().unwrap();
    assert!(es.model_ids().is_empty());
}
