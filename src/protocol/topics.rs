//! Topic filter validation and matching
//!
//! Implements the MQTT wildcard rules: `+` matches exactly one topic level,
//! `#` matches any number of trailing levels and must be the last level.

use thiserror::Error;

/// Filter matching every topic on the broker
pub const CATCH_ALL_FILTER: &str = "#";

pub fn validate_topic_filter(filter: &str) -> Result<(), ValidationError> {
    if filter.is_empty() {
        return Err(ValidationError::EmptyFilter);
    }
    if filter.contains('\0') {
        return Err(ValidationError::NulInFilter);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(ValidationError::MisplacedMultiLevelWildcard(
                filter.to_string(),
            ));
        }
        if level.contains('+') && *level != "+" {
            return Err(ValidationError::MisplacedSingleLevelWildcard(
                filter.to_string(),
            ));
        }
    }

    Ok(())
}

/// Check whether a concrete topic name is matched by a (valid) filter
///
/// Topics starting with `$` are only matched by filters whose first level
/// is literal, so `#` does not match `$SYS/...`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

pub fn validate_client_id(client_id: &str) -> Result<(), ValidationError> {
    if client_id.is_empty() {
        return Err(ValidationError::EmptyClientId);
    }

    for ch in client_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidClientIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for topic filters and client identifiers
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic filter cannot be empty")]
    EmptyFilter,
    #[error("Topic filter contains a NUL character")]
    NulInFilter,
    #[error("'#' must be the last level on its own in filter '{0}'")]
    MisplacedMultiLevelWildcard(String),
    #[error("'+' must occupy a whole level in filter '{0}'")]
    MisplacedSingleLevelWildcard(String),
    #[error("Client ID cannot be empty")]
    EmptyClientId,
    #[error("Client ID contains invalid character: '{0}'")]
    InvalidClientIdChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn catch_all_matches_every_plain_topic(topic in "[a-zA-Z0-9_/-]{1,40}") {
            prop_assert!(topic_matches(CATCH_ALL_FILTER, &topic));
        }

        #[test]
        fn literal_filter_matches_itself(topic in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,4}") {
            prop_assert!(validate_topic_filter(&topic).is_ok());
            prop_assert!(topic_matches(&topic, &topic));
        }

        #[test]
        fn valid_client_ids_pass(id in "[a-zA-Z0-9._-]{1,64}") {
            prop_assert!(validate_client_id(&id).is_ok());
        }
    }

    #[test]
    fn test_valid_filters() {
        for filter in ["#", "+", "sensors/#", "sensors/+/temperature", "+/+/#", "a/b/c"] {
            assert!(validate_topic_filter(filter).is_ok(), "{filter} should be valid");
        }
    }

    #[test]
    fn test_invalid_filters() {
        assert_eq!(validate_topic_filter(""), Err(ValidationError::EmptyFilter));
        assert_eq!(
            validate_topic_filter("a\0b"),
            Err(ValidationError::NulInFilter)
        );
        assert!(matches!(
            validate_topic_filter("sensors/#/temp"),
            Err(ValidationError::MisplacedMultiLevelWildcard(_))
        ));
        assert!(matches!(
            validate_topic_filter("sensors#"),
            Err(ValidationError::MisplacedMultiLevelWildcard(_))
        ));
        assert!(matches!(
            validate_topic_filter("sensors/temp+"),
            Err(ValidationError::MisplacedSingleLevelWildcard(_))
        ));
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(topic_matches("sensors/+/temperature", "sensors/a/temperature"));
        assert!(!topic_matches("sensors/+/temperature", "sensors/a/b/temperature"));
        assert!(topic_matches("sensors/#", "sensors"));
        assert!(topic_matches("sensors/#", "sensors/a/b"));
        assert!(!topic_matches("sensors/+", "sensors"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_system_topics_not_matched_by_leading_wildcards() {
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
        assert!(!topic_matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_client_id_validation() {
        assert!(validate_client_id("topicwatch-1a2b3c4d").is_ok());
        assert_eq!(validate_client_id(""), Err(ValidationError::EmptyClientId));
        assert_eq!(
            validate_client_id("watch er"),
            Err(ValidationError::InvalidClientIdChar(' '))
        );
    }
}
