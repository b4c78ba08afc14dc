//! Content analysis over classified payloads
//!
//! Structured records report their shape and any well-known sensor fields.
//! Plain text is scanned for numbers, command markers and URLs. Both paths
//! are pure.

use super::classifier::ClassifiedContent;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Field names reported as recognized, compared case-insensitively
pub const RECOGNIZED_FIELDS: &[&str] = &[
    "temperature",
    "temp",
    "humidity",
    "pressure",
    "timestamp",
    "time",
    "device_id",
    "deviceid",
    "device",
    "sensor_id",
    "sensor",
    "battery",
    "voltage",
    "location",
];

// ASCII digits only; `\d` would also match other Unicode digit classes
static NUMBER_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)*").expect("number pattern is valid"));

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("URL pattern is valid"));

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentReport {
    Structured(StructuredReport),
    Text(TextReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredReport {
    pub field_count: usize,
    pub recognized_fields: Vec<String>,
    pub numeric_fields: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextReport {
    pub numbers: Vec<String>,
    pub is_command: bool,
    pub url_count: usize,
    pub urls: Vec<String>,
}

/// Analyze classified content
pub fn analyze(content: &ClassifiedContent) -> ContentReport {
    match content {
        ClassifiedContent::StructuredRecord { value } => {
            ContentReport::Structured(analyze_structured(value))
        }
        ClassifiedContent::PlainText { raw } => ContentReport::Text(analyze_text(raw)),
    }
}

pub fn analyze_structured(value: &Value) -> StructuredReport {
    let entries: Vec<(String, &Value)> = match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    };

    let recognized_fields = entries
        .iter()
        .filter(|(name, _)| is_recognized_field(name))
        .map(|(name, _)| name.clone())
        .collect();

    let numeric_fields = entries
        .iter()
        .filter_map(|(name, v)| {
            v.as_f64()
                .filter(|n| n.is_finite())
                .map(|n| (name.clone(), n))
        })
        .collect();

    StructuredReport {
        field_count: entries.len(),
        recognized_fields,
        numeric_fields,
    }
}

pub fn is_recognized_field(name: &str) -> bool {
    RECOGNIZED_FIELDS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}

pub fn analyze_text(text: &str) -> TextReport {
    let urls: Vec<String> = URL.find_iter(text).map(|m| m.as_str().to_string()).collect();

    TextReport {
        numbers: extract_numbers(text),
        is_command: is_command(text),
        url_count: urls.len(),
        urls,
    }
}

/// Numeric substrings in order of appearance
///
/// A run with exactly one dot is kept whole as a decimal. A run with more
/// dots (a version string or an IPv4 address) yields each integer component.
pub fn extract_numbers(text: &str) -> Vec<String> {
    let mut numbers = Vec::new();
    for run in NUMBER_RUN.find_iter(text) {
        let run = run.as_str();
        if run.matches('.').count() > 1 {
            numbers.extend(run.split('.').map(str::to_string));
        } else {
            numbers.push(run.to_string());
        }
    }
    numbers
}

pub fn is_command(text: &str) -> bool {
    text.trim_start().starts_with('/') || text.contains("cmd:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classify_payload;
    use serde_json::json;

    #[test]
    fn test_huge_numbers_in_records() {
        let content = classify_payload(
            br#"{"reading": 1e400, "count": 123456789012345678901234567890}"#,
        );
        let report = match analyze(&content) {
            ContentReport::Structured(report) => report,
            other => panic!("Expected structured report, got {other:?}"),
        };

        assert_eq!(report.field_count, 2);
        assert!(report.numeric_fields.iter().all(|(_, n)| n.is_finite()));
        let count = report
            .numeric_fields
            .iter()
            .find(|(name, _)| name == "count")
            .map(|(_, n)| *n)
            .expect("30-digit integer is reported as numeric");
        assert!((count - 1.2345678901234568e29).abs() < 1e15);
    }

    #[test]
    fn test_sensor_record() {
        let content = classify_payload(br#"{"temperature": 21.5, "device_id": "sensorA"}"#);
        let report = analyze(&content);

        assert_eq!(
            report,
            ContentReport::Structured(StructuredReport {
                field_count: 2,
                recognized_fields: vec!["temperature".to_string(), "device_id".to_string()],
                numeric_fields: vec![("temperature".to_string(), 21.5)],
            })
        );
    }

    #[test]
    fn test_recognized_fields_ignore_case() {
        let report = analyze_structured(&json!({"Humidity": 40, "DeviceID": "x", "color": "red"}));
        assert_eq!(report.recognized_fields, vec!["Humidity", "DeviceID"]);
        assert_eq!(report.numeric_fields, vec![("Humidity".to_string(), 40.0)]);
        assert_eq!(report.field_count, 3);
    }

    #[test]
    fn test_array_and_scalar_records() {
        let array = analyze_structured(&json!([1, "two", 3.5]));
        assert_eq!(array.field_count, 3);
        assert_eq!(
            array.numeric_fields,
            vec![("0".to_string(), 1.0), ("2".to_string(), 3.5)]
        );
        assert!(array.recognized_fields.is_empty());

        let scalar = analyze_structured(&json!(7));
        assert_eq!(scalar.field_count, 0);
        assert!(scalar.numeric_fields.is_empty());
    }

    #[test]
    fn test_nested_values_are_not_numeric_fields() {
        let report = analyze_structured(&json!({"location": {"lat": 1.0}, "battery": 88}));
        assert_eq!(report.numeric_fields, vec![("battery".to_string(), 88.0)]);
        assert_eq!(report.recognized_fields, vec!["location", "battery"]);
    }

    #[test]
    fn test_command_with_url() {
        let content = classify_payload(b"cmd: restart device at http://10.0.0.5/reset");
        let report = analyze(&content);

        assert_eq!(
            report,
            ContentReport::Text(TextReport {
                numbers: vec!["10", "0", "0", "5"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                is_command: true,
                url_count: 1,
                urls: vec!["http://10.0.0.5/reset".to_string()],
            })
        );
    }

    #[test]
    fn test_extract_numbers_decimals_and_integers() {
        assert_eq!(extract_numbers("temp 21.5 at 3pm, v1.2.3"), vec!["21.5", "3", "1", "2", "3"]);
        assert_eq!(extract_numbers("no digits here"), Vec::<String>::new());
        assert_eq!(extract_numbers("end."), Vec::<String>::new());
        assert_eq!(extract_numbers("42."), vec!["42"]);
    }

    #[test]
    fn test_command_heuristic() {
        assert!(is_command("  /reboot now"));
        assert!(is_command("please cmd:stop"));
        assert!(!is_command("hello / world"));
        assert!(!is_command("command: stop"));
    }

    #[test]
    fn test_multiple_urls() {
        let report = analyze_text("see https://a.example/x and http://b.example");
        assert_eq!(report.url_count, 2);
        assert_eq!(report.urls[1], "http://b.example");
    }

    #[test]
    fn test_report_serializes_with_kind_tag() {
        let report = analyze(&classify_payload(b"hello"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["is_command"], false);
    }
}
