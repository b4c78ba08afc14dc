//! Payload classification: structured JSON record or plain text

use serde_json::Value;

/// Classified payload
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedContent {
    /// Payload parsed as JSON; object field order is preserved
    StructuredRecord { value: Value },
    /// Anything else, decoded as text (lossily for invalid UTF-8)
    PlainText { raw: String },
}

impl ClassifiedContent {
    /// Short label used in logs and observations
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifiedContent::StructuredRecord { .. } => "structured",
            ClassifiedContent::PlainText { .. } => "text",
        }
    }
}

/// Classify a raw payload (pure function, never fails)
pub fn classify_payload(payload: &[u8]) -> ClassifiedContent {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(_) => {
            return ClassifiedContent::PlainText {
                raw: String::from_utf8_lossy(payload).into_owned(),
            }
        }
    };

    match serde_json::from_str::<Value>(text) {
        Ok(value) => ClassifiedContent::StructuredRecord { value },
        Err(_) => ClassifiedContent::PlainText {
            raw: text.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_object_is_structured() {
        let content = classify_payload(br#"{"temperature": 21.5, "device_id": "sensorA"}"#);
        assert_eq!(
            content,
            ClassifiedContent::StructuredRecord {
                value: json!({"temperature": 21.5, "device_id": "sensorA"})
            }
        );
        assert_eq!(content.kind(), "structured");
    }

    #[test]
    fn test_json_scalars_are_structured() {
        assert!(matches!(
            classify_payload(b"42"),
            ClassifiedContent::StructuredRecord { .. }
        ));
        assert!(matches!(
            classify_payload(b" \"quoted\" "),
            ClassifiedContent::StructuredRecord { .. }
        ));
    }

    #[test]
    fn test_out_of_range_numbers_are_structured() {
        for payload in [
            &br#"{"reading": 1e400}"#[..],
            br#"{"count": 123456789012345678901234567890}"#,
            b"-1e-400",
        ] {
            assert!(
                matches!(classify_payload(payload), ClassifiedContent::StructuredRecord { .. }),
                "{} should be structured",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_field_order_preserved() {
        let content = classify_payload(br#"{"z": 1, "a": 2, "m": 3}"#);
        match content {
            ClassifiedContent::StructuredRecord { value } => {
                let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
                assert_eq!(keys, vec!["z", "a", "m"]);
            }
            other => panic!("Expected StructuredRecord, got {other:?}"),
        }
    }

    #[test]
    fn test_non_json_is_plain_text() {
        assert_eq!(
            classify_payload(b"cmd: restart"),
            ClassifiedContent::PlainText {
                raw: "cmd: restart".to_string()
            }
        );
        assert!(matches!(
            classify_payload(b"{\"unterminated\": "),
            ClassifiedContent::PlainText { .. }
        ));
        assert!(matches!(classify_payload(b""), ClassifiedContent::PlainText { .. }));
    }

    #[test]
    fn test_invalid_utf8_is_lossy_text() {
        let content = classify_payload(&[0x66, 0x6f, 0xff, 0x6f]);
        assert_eq!(
            content,
            ClassifiedContent::PlainText {
                raw: "fo\u{FFFD}o".to_string()
            }
        );
    }
}
