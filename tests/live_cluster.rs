//! End-to-end checks against a running cluster.
//!
//! Run with `ES_TEST_URL=http://localhost:9200 cargo test -- --ignored`.

mod common;

use common::*;
use esml::harness::{check_prediction_equality, random_rows};
use esml::{ClientConfig, EsClient, IfExists, ImportOptions, MLModel, ModelTransformer};
use rand::prelude::*;

fn live_client() -> Option<EsClient> {
    let url = std::env::var("ES_TEST_URL").ok()?;
    let mut config = ClientConfig::new(url);
    config.username = std::env::var("ES_TEST_USERNAME").ok();
    config.password = std::env::var("ES_TEST_PASSWORD").ok();
    config.verify_certs = false;
    Some(EsClient::from_config(&config).expect("invalid ES_TEST_URL configuration"))
}

fn round_trip<M: esml::LocalModel>(client: EsClient, model_id: &str, model: &M, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let names = feature_names(model.num_features());
    let options = ImportOptions::default().es_if_exists(IfExists::Replace);
    let es_model = MLModel::import_model(client, model_id, model, &names, options).unwrap();

    let data = grid_data(&mut rng, 100, model.num_features());
    let test_data = random_rows(data.view(), 20, &mut rng);
    let result = check_prediction_equality(&es_model, model, test_data.view(), 2);
    es_model.delete_model().unwrap();
    result.unwrap();
}

#[test]
#[ignore]
fn test_live_sklearn_forest() {
    let Some(client) = live_client() else { return };
    let mut rng = StdRng::seed_from_u64(51);
    let model = random_sklearn_model(&mut rng, "RandomForestRegressor", 4, 0, 10);
    round_trip(client, "esml_live_forest", &model, 51);
}

#[test]
#[ignore]
fn test_live_xgb_classifier() {
    let Some(client) = live_client() else { return };
    let mut rng = StdRng::seed_from_u64(52);
    let model = random_xgb_model(&mut rng, "binary:logistic", "gbtree", 4, 0, 10);
    round_trip(client, "esml_live_xgb", &model, 52);
}

#[test]
#[ignore]
fn test_live_lgbm_regressor() {
    let Some(client) = live_client() else { return };
    let mut rng = StdRng::seed_from_u64(53);
    let model = random_lgb_model(&mut rng, "regression", 4, 1, 10, false);
    round_trip(client, "esml_live_lgbm", &model, 53);
}

#[test]
#[ignore]
fn test_live_export_forest() {
    let Some(client) = live_client() else { return };
    let mut rng = StdRng::seed_from_u64(54);
    let model = random_sklearn_model(&mut rng, "RandomForestRegressor", 3, 0, 5);
    let names = model.feature_names();
    let options = ImportOptions::default().es_if_exists(IfExists::Replace);
    let es_model = MLModel::import_model(client, "esml_live_export", &model, &names, options).unwrap();
    let pipeline = es_model.export_model();
    es_model.delete_model().unwrap();
    assert_eq!(pipeline.unwrap().es_model().num_features(), 3);
}
