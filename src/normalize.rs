//! Record Normalization
//!
//! Maps a loosely-typed dataset row onto the fixed sensor schema. Telemetry
//! replay must never halt on dirty data, so every missing, unparsable or
//! non-finite cell resolves to [`DEFAULT_VALUE`].

use crate::models::{NormalizedReading, Record, RecordValue, SensorSchema};

/// Substituted for any absent or invalid field.
pub const DEFAULT_VALUE: f64 = 0.0;

/// Why a schema field fell back to [`DEFAULT_VALUE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultReason {
    Missing,
    Unparsable,
    NonFinite,
}

/// Fields that were defaulted while normalizing one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationReport {
    pub defaulted: Vec<(String, DefaultReason)>,
}

impl NormalizationReport {
    pub fn is_clean(&self) -> bool {
        self.defaulted.is_empty()
    }

    pub fn count(&self, reason: DefaultReason) -> usize {
        self.defaulted.iter().filter(|(_, r)| *r == reason).count()
    }
}

/// Normalize one record against `schema`.
pub fn normalize_record(record: &Record, schema: &SensorSchema) -> NormalizedReading {
    normalize_with_report(record, schema).0
}

/// Normalize and also report which fields were defaulted.
pub fn normalize_with_report(
    record: &Record,
    schema: &SensorSchema,
) -> (NormalizedReading, NormalizationReport) {
    let mut report = NormalizationReport::default();
    let mut values = Vec::with_capacity(schema.len());

    for field in schema.fields() {
        let value = match parse_value(record.get(field)) {
            Ok(v) => v,
            Err(reason) => {
                report.defaulted.push((field.clone(), reason));
                DEFAULT_VALUE
            }
        };
        values.push((field.clone(), value));
    }

    (NormalizedReading::from_values(values), report)
}

fn parse_value(value: Option<&RecordValue>) -> Result<f64, DefaultReason> {
    let parsed = match value {
        None => return Err(DefaultReason::Missing),
        Some(RecordValue::Number(n)) => *n,
        Some(RecordValue::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| DefaultReason::Unparsable)?,
    };

    // "NaN" and "inf" parse, but cannot be encoded as JSON numbers.
    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(DefaultReason::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parse_defaults_to_zero() {
        let record = Record::new().with("part", "12").with("tfe_level", "abc");
        let reading = normalize_record(&record, &SensorSchema::evaporator());

        assert_eq!(reading.len(), 23);
        assert_eq!(reading.get("part"), Some(12.0));
        assert_eq!(reading.get("tfe_level"), Some(0.0));
        for (name, value) in reading.iter() {
            if name != "part" {
                assert_eq!(value, 0.0, "{} should default", name);
            }
        }
    }

    #[test]
    fn test_numbers_and_padded_text() {
        let record = Record::new()
            .with("tfe_motor_speed", 1450.5)
            .with("ffte_steam_pressure_pv", "  3.25 ")
            .with("tfe_temperature", "-4e1");
        let reading = normalize_record(&record, &SensorSchema::evaporator());

        assert_eq!(reading.get("tfe_motor_speed"), Some(1450.5));
        assert_eq!(reading.get("ffte_steam_pressure_pv"), Some(3.25));
        assert_eq!(reading.get("tfe_temperature"), Some(-40.0));
    }

    #[test]
    fn test_report_reasons() {
        let schema = SensorSchema::from_fields(["a", "b", "c", "d", "e"]);
        let record = Record::new()
            .with("a", "1")
            .with("b", "")
            .with("c", "NaN")
            .with("d", f64::INFINITY);
        let (reading, report) = normalize_with_report(&record, &schema);

        assert_eq!(reading.get("a"), Some(1.0));
        assert_eq!(report.count(DefaultReason::Unparsable), 1);
        assert_eq!(report.count(DefaultReason::NonFinite), 2);
        assert_eq!(report.count(DefaultReason::Missing), 1);
        assert!(!report.is_clean());
        assert!(reading.iter().skip(1).all(|(_, v)| v == DEFAULT_VALUE));
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let schema = SensorSchema::from_fields(["part"]);
        let record = Record::new().with("part", "7").with("timestamp", "2024-01-01");
        let reading = normalize_record(&record, &schema);

        assert_eq!(reading.len(), 1);
        assert_eq!(reading.to_json().unwrap(), r#"{"part":7.0}"#);
    }

    #[test]
    fn test_key_match_is_exact() {
        let schema = SensorSchema::from_fields(["tfe_level"]);
        let record = Record::new().with("TFE Level", "9");
        let (reading, report) = normalize_with_report(&record, &schema);

        assert_eq!(reading.get("tfe_level"), Some(0.0));
        assert_eq!(report.count(DefaultReason::Missing), 1);
    }
}
