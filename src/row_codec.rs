use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Number;
use thiserror::Error;

/// Column order of the published daily CSV schema.
///
/// No header row is written to the output object (legacy-compatible); this
/// constant documents the order `encode_row` produces.
pub const CSV_COLUMNS: [&str; 15] = [
    "location",
    "value",
    "unit",
    "parameter",
    "country",
    "city",
    "sourceName",
    "date_utc",
    "date_local",
    "sourceType",
    "mobile",
    "latitude",
    "longitude",
    "averagingPeriodValue",
    "averagingPeriodUnit",
];

/// Why a single NDJSON line could not be turned into a record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unparseable date.utc {raw:?}: {source}")]
    Date {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Measurement timestamp pair as carried in the source NDJSON.
#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementDate {
    /// UTC timestamp; normalized to strict ISO-8601 during line parsing.
    pub utc: String,
    /// Local-time string, passed through verbatim.
    #[serde(default)]
    pub local: Option<String>,
}

/// Optional geolocation of a measurement.
#[derive(Debug, Clone, Deserialize)]
pub struct Coordinates {
    #[serde(default)]
    pub latitude: Option<Number>,
    #[serde(default)]
    pub longitude: Option<Number>,
}

/// Optional averaging window of a measurement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AveragingPeriod {
    #[serde(default)]
    pub value: Option<Number>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// One decoded measurement record.
///
/// Only `date.utc` is required; every other field degrades to an empty CSV
/// field when absent. Unknown fields in the source JSON are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRecord {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub value: Option<Number>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    pub date: MeasurementDate,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub mobile: Option<bool>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub averaging_period: Option<AveragingPeriod>,
}

impl MeasurementRecord {
    /// Parse one NDJSON line into a record, normalizing `date.utc`.
    ///
    /// This is the only fallible step of the row pipeline; `encode_row` on a
    /// successfully parsed record is total.
    pub fn from_ndjson_line(line: &str) -> Result<Self, RecordError> {
        let mut record: MeasurementRecord = serde_json::from_str(line)?;
        record.date.utc = normalize_utc(&record.date.utc)?;
        Ok(record)
    }
}

/// Normalize an RFC 3339 timestamp (any offset) to UTC with millisecond
/// precision, e.g. `2020-01-01T00:00:00.000Z`.
pub fn normalize_utc(raw: &str) -> Result<String, RecordError> {
    let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(raw)
        .map_err(|source| RecordError::Date {
            raw: raw.to_string(),
            source,
        })?
        .with_timezone(&Utc);

    Ok(parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Encode one record as a CSV row in the fixed column order.
///
/// Every field is wrapped in double quotes with no escaping of embedded
/// quotes. This matches the historical output format; consumers depend on
/// it, so it is documented as a known limitation rather than fixed here.
pub fn encode_row(record: &MeasurementRecord) -> String {
    let (latitude, longitude) = match &record.coordinates {
        Some(coords) => (number(&coords.latitude), number(&coords.longitude)),
        None => (String::new(), String::new()),
    };

    let (period_value, period_unit) = match &record.averaging_period {
        Some(period) => (number(&period.value), text(&period.unit)),
        None => (String::new(), String::new()),
    };

    let fields = [
        text(&record.location),
        number(&record.value),
        text(&record.unit),
        text(&record.parameter),
        text(&record.country),
        text(&record.city),
        text(&record.source_name),
        record.date.utc.clone(),
        text(&record.date.local),
        text(&record.source_type),
        record.mobile.map(|m| m.to_string()).unwrap_or_default(),
        latitude,
        longitude,
        period_value,
        period_unit,
    ];

    let quoted: Vec<String> = fields.iter().map(|field| format!("\"{field}\"")).collect();
    quoted.join(",")
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn number(value: &Option<Number>) -> String {
    value.as_ref().map(Number::to_string).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_LINE: &str = r#"{"location":"A","value":1,"unit":"ppm","parameter":"pm25","country":"US","city":"X","sourceName":"S","date":{"utc":"2020-01-01T00:00:00.000Z","local":"2020-01-01T00:00:00-05:00"},"sourceType":"government","mobile":false}"#;

    #[test]
    fn test_encode_full_record() {
        let record = MeasurementRecord::from_ndjson_line(FULL_LINE).unwrap();
        let row = encode_row(&record);
        assert_eq!(
            row,
            r#""A","1","ppm","pm25","US","X","S","2020-01-01T00:00:00.000Z","2020-01-01T00:00:00-05:00","government","false","","","","""#
        );
    }

    #[test]
    fn test_column_count_matches_schema() {
        let record = MeasurementRecord::from_ndjson_line(FULL_LINE).unwrap();
        let row = encode_row(&record);
        assert_eq!(row.split(',').count(), CSV_COLUMNS.len());
    }

    #[test]
    fn test_missing_coordinates_default_to_empty() {
        let record = MeasurementRecord::from_ndjson_line(FULL_LINE).unwrap();
        assert!(record.coordinates.is_none());
        let row = encode_row(&record);
        assert!(row.ends_with(r#","","","","""#));
    }

    #[test]
    fn test_coordinates_and_averaging_period() {
        let line = r#"{"location":"B","value":2.5,"date":{"utc":"2020-06-15T12:30:00Z","local":"2020-06-15T08:30:00-04:00"},"coordinates":{"latitude":40.7,"longitude":-74.0},"averagingPeriod":{"value":1,"unit":"hours"}}"#;
        let record = MeasurementRecord::from_ndjson_line(line).unwrap();
        let row = encode_row(&record);
        assert_eq!(
            row,
            r#""B","2.5","","","","","","2020-06-15T12:30:00.000Z","2020-06-15T08:30:00-04:00","","","40.7","-74.0","1","hours""#
        );
    }

    #[test]
    fn test_utc_normalized_from_offset() {
        let normalized = normalize_utc("2020-01-01T05:00:00+05:00").unwrap();
        assert_eq!(normalized, "2020-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_bad_date_is_record_error() {
        let line = r#"{"location":"A","date":{"utc":"not-a-date","local":"x"}}"#;
        let err = MeasurementRecord::from_ndjson_line(line).unwrap_err();
        assert!(matches!(err, RecordError::Date { .. }));
    }

    #[test]
    fn test_missing_date_is_json_error() {
        let err = MeasurementRecord::from_ndjson_line(r#"{"location":"A"}"#).unwrap_err();
        assert!(matches!(err, RecordError::Json(_)));
    }

    #[test]
    fn test_invalid_json_is_record_error() {
        let err = MeasurementRecord::from_ndjson_line("{bad json").unwrap_err();
        assert!(matches!(err, RecordError::Json(_)));
    }

    #[test]
    fn test_integer_values_keep_json_representation() {
        let line = r#"{"value":42,"date":{"utc":"2020-01-01T00:00:00Z"}}"#;
        let record = MeasurementRecord::from_ndjson_line(line).unwrap();
        let row = encode_row(&record);
        assert!(row.starts_with(r#""","42","#));
    }
}
