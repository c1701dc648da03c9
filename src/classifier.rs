//! Response Classifier
//!
//! Every inbound frame is decoded once and sorted into a closed variant:
//! a recognized prediction, or an opaque payload kept only for the log.
//! A malformed frame is never an error; the next frame is processed
//! normally.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::{PredictionMessage, RawValues};

const RECOMMENDED_SETTINGS: &str = "recommended_settings";
const RAW_VALUES: &str = "raw_values";

/// Classification of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Opaque(String),
    Prediction(PredictionMessage),
}

/// Decode and classify one raw inbound frame.
pub fn classify(raw: &str) -> InboundMessage {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "inbound frame is not json");
            return InboundMessage::Opaque(raw.to_string());
        }
    };

    let Value::Object(map) = &value else {
        return InboundMessage::Opaque(raw.to_string());
    };
    if !map.contains_key(RECOMMENDED_SETTINGS) && !map.contains_key(RAW_VALUES) {
        return InboundMessage::Opaque(raw.to_string());
    }

    let recommended_settings = map.get(RECOMMENDED_SETTINGS).and_then(decode_settings);
    let raw_values = map.get(RAW_VALUES).and_then(decode_raw_values);

    if recommended_settings.is_none() && raw_values.is_none() {
        debug!("prediction keys present but nothing decodable");
        return InboundMessage::Opaque(raw.to_string());
    }
    InboundMessage::Prediction(PredictionMessage {
        recommended_settings,
        raw_values,
    })
}

/// Settings must be an object; entries that are not numbers are dropped.
fn decode_settings(value: &Value) -> Option<BTreeMap<String, f64>> {
    match value {
        Value::Null => None,
        Value::Object(entries) => {
            let settings: BTreeMap<String, f64> = entries
                .iter()
                .filter_map(|(name, v)| v.as_f64().map(|x| (name.clone(), x)))
                .collect();
            if settings.len() < entries.len() {
                warn!(
                    dropped = entries.len() - settings.len(),
                    "non-numeric recommended settings ignored"
                );
            }
            Some(settings)
        }
        other => {
            warn!(kind = json_kind(other), "recommended_settings is not an object");
            None
        }
    }
}

fn decode_raw_values(value: &Value) -> Option<RawValues> {
    if value.is_null() {
        return None;
    }
    match RawValues::deserialize(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "malformed raw_values ignored");
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Opaque,
    Prediction,
}

/// One entry of the received-message history.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    pub kind: MessageKind,
    pub raw: String,
}

/// Latest prediction plus the ordered, unbounded history of everything
/// received.
#[derive(Debug, Default)]
pub struct PredictionView {
    latest: Option<PredictionMessage>,
    latest_at: Option<DateTime<Utc>>,
    log: Vec<LogEntry>,
    predictions: u64,
    opaque: u64,
}

impl PredictionView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `raw`, log it, and replace the current prediction if it is
    /// one. Returns the classification kind.
    pub fn ingest(&mut self, raw: &str) -> MessageKind {
        let received_at = Utc::now();
        let kind = match classify(raw) {
            InboundMessage::Prediction(p) => {
                self.predictions += 1;
                info!(
                    settings = p.recommended_settings.as_ref().map_or(0, |s| s.len()),
                    raw_values = p.raw_values.as_ref().map_or(0, |r| r.len()),
                    "🔔 Prediction received"
                );
                self.latest = Some(p);
                self.latest_at = Some(received_at);
                MessageKind::Prediction
            }
            InboundMessage::Opaque(_) => {
                self.opaque += 1;
                if tracing::enabled!(tracing::Level::DEBUG) {
                    debug!(payload = %&raw[..floor_char_boundary(raw, 200)], "opaque message logged");
                }
                MessageKind::Opaque
            }
        };

        self.log.push(LogEntry {
            seq: self.log.len() as u64 + 1,
            received_at,
            kind,
            raw: raw.to_string(),
        });
        kind
    }

    pub fn latest(&self) -> Option<&PredictionMessage> {
        self.latest.as_ref()
    }

    pub fn latest_at(&self) -> Option<DateTime<Utc>> {
        self.latest_at
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn prediction_count(&self) -> u64 {
        self.predictions
    }

    pub fn opaque_count(&self) -> u64 {
        self.opaque
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_json_is_opaque() {
        assert_eq!(classify("not json"), InboundMessage::Opaque("not json".into()));
        assert_eq!(classify(""), InboundMessage::Opaque("".into()));
    }

    #[test]
    fn test_null_empty_and_other_shapes_are_opaque() {
        for raw in ["null", "{}", "[]", "42", r#""text""#, r#"{"status":"ok"}"#] {
            assert_eq!(classify(raw), InboundMessage::Opaque(raw.into()), "{}", raw);
        }
        assert!(matches!(
            classify(r#"{"recommended_settings": null}"#),
            InboundMessage::Opaque(_)
        ));
    }

    #[test]
    fn test_recommended_settings_is_prediction() {
        match classify(r#"{"recommended_settings": {"x": 1.5}}"#) {
            InboundMessage::Prediction(p) => {
                assert_eq!(p.setting("x"), Some(1.5));
                assert!(p.raw_values.is_none());
            }
            other => panic!("expected prediction, got {:?}", other),
        }
    }

    #[test]
    fn test_reference_server_shape() {
        let raw = r#"{"recommended_settings": {"part": 12.0, "tfe_level": 55.0}, "raw_values": [0.12, 0.55]}"#;
        match classify(raw) {
            InboundMessage::Prediction(p) => {
                assert_eq!(p.setting("tfe_level"), Some(55.0));
                assert_eq!(p.raw_values, Some(RawValues::List(vec![0.12, 0.55])));
            }
            other => panic!("expected prediction, got {:?}", other),
        }
    }

    #[test]
    fn test_wrongly_shaped_prediction_is_opaque() {
        assert!(matches!(
            classify(r#"{"recommended_settings": "soon"}"#),
            InboundMessage::Opaque(_)
        ));
        assert!(matches!(
            classify(r#"{"recommended_settings": 3, "raw_values": "x"}"#),
            InboundMessage::Opaque(_)
        ));
    }

    #[test]
    fn test_one_decodable_key_is_enough() {
        match classify(r#"{"recommended_settings": {"x": 2.0}, "raw_values": [[0.1, 0.2]]}"#) {
            InboundMessage::Prediction(p) => {
                assert_eq!(p.setting("x"), Some(2.0));
                assert!(p.raw_values.is_none());
            }
            other => panic!("expected prediction, got {:?}", other),
        }
        match classify(r#"{"recommended_settings": "later", "raw_values": [0.5]}"#) {
            InboundMessage::Prediction(p) => {
                assert!(p.recommended_settings.is_none());
                assert_eq!(p.raw_values, Some(RawValues::List(vec![0.5])));
            }
            other => panic!("expected prediction, got {:?}", other),
        }
    }

    #[test]
    fn test_null_setting_entries_are_dropped() {
        match classify(r#"{"recommended_settings": {"x": 3.0, "y": null}}"#) {
            InboundMessage::Prediction(p) => {
                assert_eq!(p.setting("x"), Some(3.0));
                assert_eq!(p.setting("y"), None);
            }
            other => panic!("expected prediction, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_sibling_still_replaces_latest() {
        let mut view = PredictionView::new();
        view.ingest(r#"{"recommended_settings": {"x": 1.0}}"#);
        let kind = view.ingest(r#"{"recommended_settings": {"x": 2.0}, "raw_values": [[0.1, 0.2]]}"#);
        assert_eq!(kind, MessageKind::Prediction);
        assert_eq!(view.latest().unwrap().setting("x"), Some(2.0));
        assert_eq!(view.prediction_count(), 2);
    }

    #[test]
    fn test_view_keeps_latest_and_logs_everything() {
        let mut view = PredictionView::new();

        assert_eq!(view.ingest("not json"), MessageKind::Opaque);
        assert!(view.latest().is_none());
        assert_eq!(view.log().len(), 1);
        assert_eq!(view.log()[0].raw, "not json");

        view.ingest(r#"{"recommended_settings": {"x": 1.5}}"#);
        view.ingest("garbage {");
        view.ingest(r#"{"recommended_settings": {"x": 2.5}}"#);

        assert_eq!(view.latest().unwrap().setting("x"), Some(2.5));
        assert_eq!(view.prediction_count(), 2);
        assert_eq!(view.opaque_count(), 2);
        let seqs: Vec<u64> = view.log().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(view.log()[2].kind, MessageKind::Opaque);
    }

    #[test]
    fn test_opaque_does_not_clear_prediction() {
        let mut view = PredictionView::new();
        view.ingest(r#"{"raw_values": {"a": 1.0}}"#);
        view.ingest("not json");
        assert!(view.latest().is_some());
        assert!(view.latest_at().is_some());
    }

    #[test]
    fn test_floor_char_boundary() {
        let s = "ééé";
        assert_eq!(floor_char_boundary(s, 3), 2);
        assert_eq!(floor_char_boundary(s, 100), s.len());
    }
}
