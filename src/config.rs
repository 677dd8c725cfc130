use crate::error::{Error, Result};

use serde_json::{Map, Value};
use tracing::warn;

/// Parses a JSON object of constructor arguments and screens its keys.
///
/// Keys listed in `obsolete` are dropped with a deprecation warning. Any other key missing
/// from `known` fails the whole parse.
pub(crate) fn screen_keys(json: &str, known: &[&str], obsolete: &[&str]) -> Result<Value> {
    let value: Value = serde_json::from_str(json)?;

    let Value::Object(map) = value else {
        return Err(Error::InvalidConfig(
            "configuration must be a JSON object".into(),
        ));
    };

    let mut screened = Map::new();
    let mut unexpected = Vec::new();

    for (key, value) in map {
        if known.contains(&key.as_str()) {
            screened.insert(key, value);
        } else if obsolete.contains(&key.as_str()) {
            warn!(
                "The parameter `{}` is deprecated and will be removed in a future version.",
                key
            );
        } else {
            unexpected.push(key);
        }
    }

    if !unexpected.is_empty() {
        unexpected.sort();
        return Err(Error::UnexpectedKeys(unexpected));
    }

    Ok(Value::Object(screened))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::capture_warnings;

    #[test]
    fn unknown_keys_are_collected() {
        let err = screen_keys(r#"{"a": 1, "zeta": 2, "beta": 3}"#, &["a"], &[]).unwrap_err();

        match err {
            Error::UnexpectedKeys(keys) => assert_eq!(keys, vec!["beta", "zeta"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn obsolete_keys_are_dropped() {
        let (value, warnings) =
            capture_warnings(|| screen_keys(r#"{"a": 1, "old": [8, 4]}"#, &["a"], &["old"]));

        assert_eq!(value.unwrap(), serde_json::json!({"a": 1}));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("`old` is deprecated"));
    }

    #[test]
    fn known_keys_do_not_warn() {
        let (value, warnings) = capture_warnings(|| screen_keys(r#"{"a": 1}"#, &["a"], &["old"]));

        assert!(value.is_ok());
        assert!(warnings.is_empty());
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(matches!(
            screen_keys("[1, 2]", &["a"], &[]),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            screen_keys("{", &["a"], &[]),
            Err(Error::Json(_))
        ));
    }
}
