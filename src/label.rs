//! Label extraction from raw records
//!
//! The shuffle engine only needs `bytes -> label`. The default extractor
//! decodes a serialized `tf.train.Example` and reads one integer feature.

use crate::error::{ShuffleError, ShuffleResult};
use prost::Message;
use std::collections::BTreeMap;

/// Class label attached to a record
pub type Label = i64;

/// Pluggable `bytes -> label` function
pub trait LabelExtractor {
    fn extract(&self, record: &[u8]) -> ShuffleResult<Label>;
}

impl<F> LabelExtractor for F
where
    F: Fn(&[u8]) -> ShuffleResult<Label>,
{
    fn extract(&self, record: &[u8]) -> ShuffleResult<Label> {
        self(record)
    }
}

/// Reads `features.feature[<name>].int64_list.value[0]` from an Example
#[derive(Debug, Clone)]
pub struct ExampleLabel {
    feature: String,
}

impl ExampleLabel {
    pub fn new(feature: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
        }
    }
}

impl Default for ExampleLabel {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_LABEL_FEATURE)
    }
}

impl LabelExtractor for ExampleLabel {
    fn extract(&self, record: &[u8]) -> ShuffleResult<Label> {
        let example = Example::decode(record)
            .map_err(|e| ShuffleError::malformed(&format!("invalid example: {e}")))?;

        let feature = example
            .features
            .as_ref()
            .and_then(|features| features.feature.get(&self.feature))
            .ok_or_else(|| {
                ShuffleError::malformed(&format!("feature '{}' not found in example", self.feature))
            })?;

        let first = match &feature.kind {
            Some(feature::Kind::Int64List(list)) => list.value.first().copied(),
            _ => None,
        };
        first.ok_or_else(|| {
            ShuffleError::malformed(&format!("feature '{}' has no int64 value", self.feature))
        })
    }
}

/// `tensorflow.Example`
#[derive(Clone, PartialEq, Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

/// `tensorflow.Features`
#[derive(Clone, PartialEq, Message)]
pub struct Features {
    #[prost(btree_map = "string, message", tag = "1")]
    pub feature: BTreeMap<String, Feature>,
}

/// `tensorflow.Feature`
#[derive(Clone, PartialEq, Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

/// Nested types of [`Feature`]
pub mod feature {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

impl Example {
    /// Example with one int64 feature and one bytes feature
    pub fn labelled(feature: &str, label: Label, payload_key: &str, payload: &[u8]) -> Self {
        let mut map = BTreeMap::new();
        map.insert(
            feature.to_string(),
            Feature {
                kind: Some(feature::Kind::Int64List(Int64List { value: vec![label] })),
            },
        );
        map.insert(
            payload_key.to_string(),
            Feature {
                kind: Some(feature::Kind::BytesList(BytesList {
                    value: vec![payload.to_vec()],
                })),
            },
        );
        Example {
            features: Some(Features { feature: map }),
        }
    }
}
