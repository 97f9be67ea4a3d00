//! Core data model for the KPI stream.
//!
//! A [`Sample`] is one KPI reading for one sector at one instant. Samples
//! travel in [`Batch`]es from the producer through the intake queue to the
//! scorer, which appends two annotations (anomaly flag, then sent-at) before
//! the hub fans them out as [`KpiUpdate`] messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Ordered group of samples produced together in one producer tick.
pub type Batch = Vec<Sample>;

/// Numeric features extracted from one sample, in configured feature order.
pub type FeatureVector = Vec<f64>;

/// Message type tag carried by every scored sample on the wire.
pub const KPI_UPDATE_TYPE: &str = "kpi_update";

// ============================================================================
// Sample
// ============================================================================

/// One telemetry reading for one entity.
///
/// Everything other than the entity id, timestamp and the two annotations is
/// kept in `fields`: the numeric KPI features plus any passthrough metadata
/// (province, lat, lon, ...). Serialization flattens `fields` back into the
/// top-level object so the wire shape matches what producers sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Stable per-entity identifier
    #[serde(rename = "sector_id", alias = "entity_id")]
    pub entity_id: String,

    /// Producer wall-clock time of the reading
    pub timestamp: DateTime<Utc>,

    /// Features and passthrough metadata
    #[serde(flatten)]
    pub fields: Map<String, Value>,

    /// Anomaly verdict, absent until scored against a model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_anomaly: Option<bool>,

    /// Seconds since the Unix epoch when the scorer stamped the batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<f64>,
}

impl Sample {
    pub fn new(entity_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            fields: Map::new(),
            is_anomaly: None,
            sent_at: None,
        }
    }

    /// Attach a field (feature or passthrough metadata).
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Build a sample carrying the given feature values under the given names.
    pub fn with_features(
        entity_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        names: &[String],
        values: &[f64],
    ) -> Self {
        names
            .iter()
            .zip(values)
            .fold(Self::new(entity_id, timestamp), |s, (name, v)| {
                s.with_field(name.clone(), *v)
            })
    }

    /// Extract the feature vector for `features`, in that order.
    ///
    /// A missing or non-numeric feature is a contract violation by the
    /// producer and is reported, never coerced. So is a sample that arrives
    /// already carrying scorer annotations.
    pub fn feature_vector(&self, features: &[String]) -> Result<FeatureVector, SampleError> {
        if self.is_anomaly.is_some() || self.sent_at.is_some() {
            return Err(SampleError::AlreadyAnnotated {
                entity_id: self.entity_id.clone(),
            });
        }
        features
            .iter()
            .map(|name| match self.fields.get(name) {
                None => Err(SampleError::MissingFeature {
                    entity_id: self.entity_id.clone(),
                    feature: name.clone(),
                }),
                Some(value) => value.as_f64().ok_or_else(|| SampleError::NonNumericFeature {
                    entity_id: self.entity_id.clone(),
                    feature: name.clone(),
                    value: value.to_string(),
                }),
            })
            .collect()
    }

    /// Apply the scorer's annotations: the verdict first, then the send time.
    ///
    /// `is_anomaly` stays `None` for samples consumed during warm-up.
    pub fn stamp(&mut self, is_anomaly: Option<bool>, sent_at: f64) {
        debug_assert!(self.sent_at.is_none(), "sample {} stamped twice", self.entity_id);
        self.is_anomaly = is_anomaly;
        self.sent_at = Some(sent_at);
    }

    /// Whether the scorer has already stamped this sample.
    pub fn is_stamped(&self) -> bool {
        self.sent_at.is_some()
    }
}

/// Errors extracting features from a sample.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SampleError {
    #[error("Sample {entity_id} is missing feature '{feature}'")]
    MissingFeature { entity_id: String, feature: String },

    #[error("Sample {entity_id} has non-numeric feature '{feature}': {value}")]
    NonNumericFeature {
        entity_id: String,
        feature: String,
        value: String,
    },

    #[error("Sample {entity_id} already carries is_anomaly/sent_at annotations")]
    AlreadyAnnotated { entity_id: String },
}

// ============================================================================
// Wire message
// ============================================================================

/// `{"type": "kpi_update", "payload": <sample>}` as published to subscribers.
#[derive(Debug, Serialize)]
pub struct KpiUpdate<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub payload: &'a Sample,
}

impl<'a> KpiUpdate<'a> {
    pub fn new(payload: &'a Sample) -> Self {
        Self {
            kind: KPI_UPDATE_TYPE,
            payload,
        }
    }
}

/// Wall-clock time as fractional seconds since the Unix epoch.
#[allow(clippy::cast_precision_loss)]
pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        ["payload", "thr", "prb", "avail"].iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_feature_vector_follows_configured_order() {
        let sample = Sample::new("IR_SECT_0001", Utc::now())
            .with_field("avail", 99.5)
            .with_field("payload", 120.0)
            .with_field("prb", 55.0)
            .with_field("thr", 9.5)
            .with_field("province", "Tehran");

        let v = sample.feature_vector(&names()).expect("all features present");
        assert_eq!(v, vec![120.0, 9.5, 55.0, 99.5]);
    }

    #[test]
    fn test_missing_feature_is_reported() {
        let sample = Sample::new("IR_SECT_0002", Utc::now()).with_field("payload", 1.0);
        let err = sample.feature_vector(&names()).unwrap_err();
        assert_eq!(
            err,
            SampleError::MissingFeature {
                entity_id: "IR_SECT_0002".to_string(),
                feature: "thr".to_string(),
            }
        );
    }

    #[test]
    fn test_non_numeric_feature_is_reported() {
        let sample = Sample::with_features("S", Utc::now(), &names(), &[1.0, 2.0, 3.0, 4.0])
            .with_field("prb", "high");
        let err = sample.feature_vector(&names()).unwrap_err();
        assert!(matches!(err, SampleError::NonNumericFeature { ref feature, .. } if feature == "prb"));
    }

    #[test]
    fn test_pre_annotated_producer_sample_is_rejected() {
        let raw = r#"{"sector_id":"A","timestamp":"2024-05-01T10:00:00Z",
            "payload":1.0,"thr":2.0,"prb":3.0,"avail":4.0,"sent_at":1.0}"#;
        let sample: Sample = serde_json::from_str(raw).expect("parse");
        assert!(!sample.fields.contains_key("sent_at"));
        assert_eq!(
            sample.feature_vector(&names()).unwrap_err(),
            SampleError::AlreadyAnnotated {
                entity_id: "A".to_string()
            }
        );
    }

    #[test]
    fn test_wire_shape_flattens_fields_and_skips_unset_annotations() {
        let sample = Sample::new("IR_SECT_0003", Utc::now())
            .with_field("payload", 101.5)
            .with_field("province", "Fars");

        let json = serde_json::to_value(KpiUpdate::new(&sample)).expect("serialize");
        assert_eq!(json["type"], "kpi_update");
        assert_eq!(json["payload"]["sector_id"], "IR_SECT_0003");
        assert_eq!(json["payload"]["payload"], 101.5);
        assert_eq!(json["payload"]["province"], "Fars");
        assert!(json["payload"].get("is_anomaly").is_none());
        assert!(json["payload"].get("sent_at").is_none());
    }

    #[test]
    fn test_stamp_sets_both_annotations() {
        let mut sample = Sample::new("S", Utc::now());
        assert!(!sample.is_stamped());
        sample.stamp(Some(true), 1_700_000_000.5);
        assert!(sample.is_stamped());

        let json = serde_json::to_value(&sample).expect("serialize");
        assert_eq!(json["is_anomaly"], true);
        assert_eq!(json["sent_at"], 1_700_000_000.5);
    }

    #[test]
    fn test_deserialize_producer_json() {
        let raw = r#"{
            "sector_id": "IR_SECT_0042",
            "province": "Gilan",
            "lat": 37.3012,
            "lon": 49.6021,
            "payload": 140.25,
            "thr": 11.2,
            "prb": 60.1,
            "avail": 99.7,
            "timestamp": "2024-05-01T10:00:00.123456+00:00"
        }"#;
        let sample: Sample = serde_json::from_str(raw).expect("parse");
        assert_eq!(sample.entity_id, "IR_SECT_0042");
        assert_eq!(sample.fields["province"], "Gilan");
        assert_eq!(sample.is_anomaly, None);
        assert_eq!(
            sample.feature_vector(&names()).expect("features"),
            vec![140.25, 11.2, 60.1, 99.7]
        );
    }
}
