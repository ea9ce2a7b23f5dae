//! Transport encoding of model definitions.
//!
//! The model store accepts a definition either inline as JSON or as a
//! `compressed_definition` string: the JSON document gzip-compressed and
//! then base64 encoded.

use crate::core::error::{EsMlError, Result};
use crate::definition::TrainedModelDefinition;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::{Read, Write};

/// Compression statistics of an encoded definition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionStats {
    /// JSON size in bytes
    pub original_size: usize,
    /// Encoded size in bytes
    pub compressed_size: usize,
}

impl CompressionStats {
    /// Encoded size divided by JSON size
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        self.compressed_size as f64 / self.original_size as f64
    }
}

/// Validates and encodes a definition as a `compressed_definition` string.
pub fn encode_definition(definition: &TrainedModelDefinition) -> Result<String> {
    Ok(encode_definition_with_stats(definition)?.0)
}

/// Same as [`encode_definition`], also reporting sizes.
pub fn encode_definition_with_stats(
    definition: &TrainedModelDefinition,
) -> Result<(String, CompressionStats)> {
    definition.validate()?;

    let json = serde_json::to_vec(definition)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    let encoded = STANDARD.encode(compressed);

    let stats = CompressionStats {
        original_size: json.len(),
        compressed_size: encoded.len(),
    };
    log::debug!(
        "Compressed model definition from {} to {} bytes",
        stats.original_size,
        stats.compressed_size
    );
    Ok((encoded, stats))
}

/// Decodes a `compressed_definition` string.
pub fn decode_definition(encoded: &str) -> Result<TrainedModelDefinition> {
    let compressed = STANDARD.decode(encoded.trim())?;
    let mut json = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut json)
        .map_err(|e| EsMlError::serialization(format!("invalid gzip payload: {}", e)))?;
    Ok(serde_json::from_str(&json)?)
}

/// Decodes a definition given either as a compressed string or inline JSON.
pub fn decode_definition_value(value: &Value) -> Result<TrainedModelDefinition> {
    match value {
        Value::String(encoded) => decode_definition(encoded),
        Value::Object(_) => Ok(serde_json::from_value(value.clone())?),
        other => Err(EsMlError::serialization(format!(
            "expected a compressed string or a definition object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{DecisionType, Tree, TreeNode};

    fn definition() -> TrainedModelDefinition {
        TrainedModelDefinition::new(Tree::new(
            vec!["f0".to_string()],
            vec![
                TreeNode::split(0, 0, 0.25, DecisionType::Lt, true, 1, 2),
                TreeNode::leaf(1, vec![1.5]),
                TreeNode::leaf(2, vec![-0.5]),
            ],
        ))
    }

    #[test]
    fn test_compressed_definition_decodes() {
        let (encoded, stats) = encode_definition_with_stats(&definition()).unwrap();
        assert!(stats.original_size > 0);
        assert_eq!(decode_definition(&encoded).unwrap(), definition());
        assert_eq!(
            decode_definition_value(&Value::String(encoded)).unwrap(),
            definition()
        );
    }

    #[test]
    fn test_inline_definition_decodes() {
        let value = serde_json::to_value(definition()).unwrap();
        assert_eq!(decode_definition_value(&value).unwrap(), definition());
        assert!(decode_definition_value(&Value::from(3)).is_err());
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(matches!(
            decode_definition("not base64!"),
            Err(EsMlError::Base64 { .. })
        ));
        let not_gzip = STANDARD.encode(b"{}");
        assert!(decode_definition(&not_gzip).is_err());
    }

    #[test]
    fn test_invalid_definition_is_not_encoded() {
        let mut bad = definition();
        if let crate::definition::TrainedModel::Tree(tree) = &mut bad.trained_model {
            tree.tree_structure[0].left_child = Some(9);
        }
        assert!(encode_definition(&bad).is_err());
    }
}
