//! Feature preprocessors stored alongside a trained model.
//!
//! Definitions produced by remote data frame analytics may start with a list
//! of preprocessors that turn categorical input fields into numeric model
//! features. Each preprocessor reads one input field from a [`Document`] and
//! writes one or more numeric features back into it. A missing input field
//! produces no features, leaving the model to follow its default branches.

use crate::core::types::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// A preprocessor, serialized externally tagged
/// (`{"one_hot_encoding": {...}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocessor {
    /// One output feature per known category
    OneHotEncoding(OneHotEncoding),
    /// Category frequency
    FrequencyEncoding(FrequencyEncoding),
    /// Mean target value per category
    TargetMeanEncoding(TargetMeanEncoding),
}

/// Maps each category to its own 0/1 feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoding {
    /// Input field
    pub field: String,
    /// Category value to output feature name
    pub hot_map: BTreeMap<String, String>,
    /// Set for user supplied preprocessors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<bool>,
}

/// Replaces a category by its frequency in the training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyEncoding {
    /// Input field
    pub field: String,
    /// Output feature name
    pub feature_name: String,
    /// Category value to frequency
    pub frequency_map: BTreeMap<String, f64>,
    /// Set for user supplied preprocessors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<bool>,
}

/// Replaces a category by the mean target value observed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMeanEncoding {
    /// Input field
    pub field: String,
    /// Output feature name
    pub feature_name: String,
    /// Category value to mean target
    pub target_map: BTreeMap<String, f64>,
    /// Value for categories not in `target_map`
    pub default_value: f64,
    /// Set for user supplied preprocessors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<bool>,
}

/// String form of a field value used for category lookups.
///
/// Returns `None` for null, arrays and objects.
pub fn category_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", f as i64)),
            _ => Some(n.to_string()),
        },
        _ => None,
    }
}

impl Preprocessor {
    /// The input field this preprocessor reads
    pub fn input_field(&self) -> &str {
        match self {
            Preprocessor::OneHotEncoding(p) => &p.field,
            Preprocessor::FrequencyEncoding(p) => &p.field,
            Preprocessor::TargetMeanEncoding(p) => &p.field,
        }
    }

    /// Names of the features this preprocessor writes
    pub fn output_features(&self) -> Vec<String> {
        match self {
            Preprocessor::OneHotEncoding(p) => p.hot_map.values().cloned().collect(),
            Preprocessor::FrequencyEncoding(p) => vec![p.feature_name.clone()],
            Preprocessor::TargetMeanEncoding(p) => vec![p.feature_name.clone()],
        }
    }

    /// Whether the preprocessor was supplied by the user
    pub fn is_custom(&self) -> bool {
        let custom = match self {
            Preprocessor::OneHotEncoding(p) => p.custom,
            Preprocessor::FrequencyEncoding(p) => p.custom,
            Preprocessor::TargetMeanEncoding(p) => p.custom,
        };
        custom.unwrap_or(false)
    }

    /// Writes the output features into `doc`.
    pub fn apply(&self, doc: &mut Document) {
        let category = match doc.get(self.input_field()).and_then(category_of) {
            Some(category) => category,
            None => return,
        };

        match self {
            Preprocessor::OneHotEncoding(p) => {
                for (value, feature) in &p.hot_map {
                    let hot = if *value == category { 1.0 } else { 0.0 };
                    doc.insert(feature.clone(), Value::from(hot));
                }
            }
            Preprocessor::FrequencyEncoding(p) => {
                let freq = p.frequency_map.get(&category).copied().unwrap_or(0.0);
                doc.insert(p.feature_name.clone(), Value::from(freq));
            }
            Preprocessor::TargetMeanEncoding(p) => {
                let mean = p.target_map.get(&category).copied().unwrap_or(p.default_value);
                doc.insert(p.feature_name.clone(), Value::from(mean));
            }
        }
    }
}

/// Fields a document must provide to `preprocessors` followed by a model
/// reading `feature_names`: preprocessor inputs, then the features no
/// preprocessor produces.
pub fn input_field_names(preprocessors: &[Preprocessor], feature_names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut fields = Vec::new();
    for p in preprocessors {
        if seen.insert(p.input_field().to_string()) {
            fields.push(p.input_field().to_string());
        }
    }
    let produced: HashSet<String> = preprocessors
        .iter()
        .flat_map(Preprocessor::output_features)
        .collect();
    for name in feature_names {
        if !produced.contains(name) && seen.insert(name.clone()) {
            fields.push(name.clone());
        }
    }
    fields
}

/// Applies every preprocessor in order.
pub fn apply_all(preprocessors: &[Preprocessor], doc: &mut Document) {
    for preprocessor in preprocessors {
        preprocessor.apply(doc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }

    #[test]
    fn test_one_hot_encoding() {
        let p: Preprocessor = serde_json::from_value(json!({
            "one_hot_encoding": {
                "field": "OriginWeather",
                "hot_map": {"Rain": "OriginWeather_Rain", "Sunny": "OriginWeather_Sunny"}
            }
        }))
        .unwrap();

        let mut d = doc(json!({"OriginWeather": "Rain"}));
        p.apply(&mut d);
        assert_eq!(d["OriginWeather_Rain"], 1.0);
        assert_eq!(d["OriginWeather_Sunny"], 0.0);
        assert_eq!(p.input_field(), "OriginWeather");
        assert_eq!(p.output_features().len(), 2);
        assert!(!p.is_custom());
    }

    #[test]
    fn test_frequency_encoding_unknown_category() {
        let p = Preprocessor::FrequencyEncoding(FrequencyEncoding {
            field: "DestCityName".to_string(),
            feature_name: "DestCityName_frequency".to_string(),
            frequency_map: [("Tokyo".to_string(), 0.25)].into_iter().collect(),
            custom: None,
        });

        let mut d = doc(json!({"DestCityName": "Tokyo"}));
        p.apply(&mut d);
        assert_eq!(d["DestCityName_frequency"], 0.25);

        let mut d = doc(json!({"DestCityName": "Oslo"}));
        p.apply(&mut d);
        assert_eq!(d["DestCityName_frequency"], 0.0);
    }

    #[test]
    fn test_target_mean_encoding_default() {
        let p = Preprocessor::TargetMeanEncoding(TargetMeanEncoding {
            field: "OriginAirportID".to_string(),
            feature_name: "OriginAirportID_targetmean".to_string(),
            target_map: [("AMS".to_string(), 42.0)].into_iter().collect(),
            default_value: 17.5,
            custom: Some(true),
        });

        let mut d = doc(json!({"OriginAirportID": "SFO"}));
        p.apply(&mut d);
        assert_eq!(d["OriginAirportID_targetmean"], 17.5);
        assert!(p.is_custom());
    }

    #[test]
    fn test_missing_field_writes_nothing() {
        let p = Preprocessor::FrequencyEncoding(FrequencyEncoding {
            field: "a".to_string(),
            feature_name: "a_freq".to_string(),
            frequency_map: BTreeMap::new(),
            custom: None,
        });
        let mut d = doc(json!({"b": 1}));
        p.apply(&mut d);
        assert!(!d.contains_key("a_freq"));
    }

    #[test]
    fn test_numeric_categories() {
        assert_eq!(category_of(&json!(3)), Some("3".to_string()));
        assert_eq!(category_of(&json!(3.0)), Some("3".to_string()));
        assert_eq!(category_of(&json!(true)), Some("true".to_string()));
        assert_eq!(category_of(&Value::Null), None);
    }

    #[test]
    fn test_input_field_names_skip_produced_features() {
        let frequency = Preprocessor::FrequencyEncoding(FrequencyEncoding {
            field: "city".to_string(),
            feature_name: "city_frequency".to_string(),
            frequency_map: BTreeMap::new(),
            custom: None,
        });
        let again = Preprocessor::FrequencyEncoding(FrequencyEncoding {
            field: "city".to_string(),
            feature_name: "city_again".to_string(),
            frequency_map: BTreeMap::new(),
            custom: None,
        });
        let features: Vec<String> = ["city_frequency", "distance", "city_again", "distance"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            input_field_names(&[frequency, again], &features),
            vec!["city", "distance"]
        );
        assert_eq!(
            input_field_names(&[], &features),
            vec!["city_frequency", "distance", "city_again"]
        );
    }
}
