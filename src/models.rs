//! Replay data model: raw records, the sensor schema, normalized readings
//! and the prediction payloads returned by the scoring service.

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Sensor fields expected by the evaporator scoring service, in wire order.
pub const EVAPORATOR_FIELDS: [&str; 23] = [
    "part",
    "extract_tank_level",
    "ffte_discharge_density",
    "ffte_discharge_solids",
    "ffte_feed_flow_rate_pv",
    "ffte_feed_solids_pv",
    "ffte_heat_temperature_1",
    "ffte_heat_temperature_2",
    "ffte_heat_temperature_3",
    "ffte_production_solids_pv",
    "ffte_steam_pressure_pv",
    "tfe_input_flow_pv",
    "tfe_level",
    "tfe_motor_current",
    "tfe_motor_speed",
    "tfe_out_flow_pv",
    "tfe_production_solids_pv",
    "tfe_production_solids_density",
    "tfe_steam_pressure_pv",
    "tfe_steam_temperature",
    "tfe_tank_level",
    "tfe_temperature",
    "tfe_vacuum_pressure_pv",
];

/// A single cell of an ingested row (CSV cells arrive as text, JSON fixtures
/// may carry numbers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordValue {
    Number(f64),
    Text(String),
}

impl From<&str> for RecordValue {
    fn from(s: &str) -> Self {
        RecordValue::Text(s.to_string())
    }
}

impl From<String> for RecordValue {
    fn from(s: String) -> Self {
        RecordValue::Text(s)
    }
}

impl From<f64> for RecordValue {
    fn from(n: f64) -> Self {
        RecordValue::Number(n)
    }
}

/// One row of the dataset. Keys are already lower_snake_case; see
/// [`crate::dataset::normalize_field_name`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, RecordValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<RecordValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<RecordValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&RecordValue> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<RecordValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// Closed, ordered set of field names a [`NormalizedReading`] carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSchema {
    fields: Vec<String>,
}

impl SensorSchema {
    /// The 23-field evaporator schema.
    pub fn evaporator() -> Self {
        Self {
            fields: EVAPORATOR_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Build a custom schema. Blank names are dropped and duplicates keep
    /// their first position.
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for field in fields {
            let name = field.as_ref().trim();
            if name.is_empty() || out.iter().any(|f| f == name) {
                continue;
            }
            out.push(name.to_string());
        }
        Self { fields: out }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

impl Default for SensorSchema {
    fn default() -> Self {
        Self::evaporator()
    }
}

/// Fixed-shape numeric payload sent to the scoring service.
///
/// Serializes as a flat JSON object with keys in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    values: Vec<(String, f64)>,
}

impl NormalizedReading {
    pub(crate) fn from_values(values: Vec<(String, f64)>) -> Self {
        Self { values }
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, v)| (name.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encode as the single JSON text frame sent per replay step.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for NormalizedReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// `raw_values` as sent by the scoring service: the reference server emits
/// the model output vector as a list, other deployments label it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValues {
    List(Vec<f64>),
    Map(BTreeMap<String, f64>),
}

impl RawValues {
    pub fn len(&self) -> usize {
        match self {
            RawValues::List(v) => v.len(),
            RawValues::Map(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A recognized prediction response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_settings: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_values: Option<RawValues>,
}

impl PredictionMessage {
    /// Look up one recommended setting by name.
    pub fn setting(&self, name: &str) -> Option<f64> {
        self.recommended_settings.as_ref()?.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_from_fields_dedups_and_trims() {
        let schema = SensorSchema::from_fields(["part", " tfe_level ", "", "part"]);
        assert_eq!(schema.fields(), &["part".to_string(), "tfe_level".to_string()]);
        assert!(schema.contains("tfe_level"));
        assert!(!schema.contains(""));
    }

    #[test]
    fn test_evaporator_schema_shape() {
        let schema = SensorSchema::default();
        assert_eq!(schema.len(), 23);
        assert_eq!(schema.fields()[0], "part");
        assert_eq!(schema.fields()[22], "tfe_vacuum_pressure_pv");
    }

    #[test]
    fn test_reading_serializes_in_schema_order() {
        let reading = NormalizedReading::from_values(vec![
            ("tfe_level".to_string(), 2.5),
            ("part".to_string(), 12.0),
        ]);
        assert_eq!(reading.to_json().unwrap(), r#"{"tfe_level":2.5,"part":12.0}"#);
    }

    #[test]
    fn test_record_value_untagged() {
        let record: Record = serde_json::from_str(r#"{"part": 3, "tfe_level": "4.5"}"#).unwrap();
        assert_eq!(record.get("part"), Some(&RecordValue::Number(3.0)));
        assert_eq!(record.get("tfe_level"), Some(&RecordValue::Text("4.5".into())));
    }

    #[test]
    fn test_prediction_raw_values_list_or_map() {
        let list: PredictionMessage =
            serde_json::from_str(r#"{"raw_values": [0.1, 0.2]}"#).unwrap();
        assert_eq!(list.raw_values, Some(RawValues::List(vec![0.1, 0.2])));
        assert!(list.recommended_settings.is_none());

        let map: PredictionMessage =
            serde_json::from_str(r#"{"recommended_settings": {"part": 12.0}, "raw_values": {"a": 1}}"#)
                .unwrap();
        assert_eq!(map.setting("part"), Some(12.0));
        assert_eq!(map.raw_values.unwrap().len(), 1);
    }
}
