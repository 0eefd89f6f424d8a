//! Definition sources
//!
//! A source turns definition text into a [`Definition`]. ADX parsing lives
//! outside this crate; the JSON source below reads the crate's own
//! serialized form.

use std::path::Path;

use super::{Definition, DefinitionError};

/// Producer of definitions from text
pub trait DefinitionSource {
    /// Parse `text`. `display_name` is usually the file name the text came from.
    fn parse(&self, text: &str, display_name: &str) -> Result<Definition, DefinitionError>;
}

/// Reads definitions stored as JSON (the same shape the library persists)
///
/// A missing or blank `name` falls back to the file stem of `display_name`.
/// Definitions without gauge slots get one slot per parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDefinitionSource;

impl DefinitionSource for JsonDefinitionSource {
    fn parse(&self, text: &str, display_name: &str) -> Result<Definition, DefinitionError> {
        let mut value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| DefinitionError::Parse {
                name: display_name.to_string(),
                message: e.to_string(),
            })?;

        let has_name = value
            .get("name")
            .and_then(|n| n.as_str())
            .is_some_and(|n| !n.trim().is_empty());
        if !has_name {
            if let Some(obj) = value.as_object_mut() {
                obj.insert("name".into(), fallback_name(display_name).into());
            }
        }

        let mut definition: Definition =
            serde_json::from_value(value).map_err(|e| DefinitionError::Parse {
                name: display_name.to_string(),
                message: e.to_string(),
            })?;

        if definition.gauges.is_empty() {
            definition.bind_default_gauges();
        }
        definition.validate()?;
        Ok(definition)
    }
}

fn fallback_name(display_name: &str) -> String {
    Path::new(display_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(display_name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_definition() {
        let text = r#"{
            "name": "1227747 Vortec",
            "baudRate": 8192,
            "requestCommand": [244, 87, 1, 0, 180],
            "parameters": [
                {"id": "rpm", "title": "Engine RPM", "units": "rpm", "packetOffset": 10, "scale": 25},
                {"id": "map", "title": "MAP", "units": "kPa", "packetOffset": 12, "byteCount": 2, "scale": 0.1}
            ]
        }"#;
        let def = JsonDefinitionSource.parse(text, "vortec.json").unwrap();
        assert_eq!(def.name, "1227747 Vortec");
        assert_eq!(def.parameters.len(), 2);
        assert_eq!(def.gauges.len(), 2);
        assert_eq!(def.parameter("rpm").unwrap().scale, 25.0);
    }

    #[test]
    fn test_name_falls_back_to_file_stem() {
        let def = JsonDefinitionSource
            .parse(r#"{"parameters": []}"#, "A033.json")
            .unwrap();
        assert_eq!(def.name, "A033");
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let err = JsonDefinitionSource.parse("not json", "broken.json").unwrap_err();
        assert!(matches!(err, DefinitionError::Parse { ref name, .. } if name == "broken.json"));
    }

    #[test]
    fn test_contract_violations_are_rejected() {
        let text = r#"{"name": "dup", "parameters": [
            {"id": "a", "title": "A", "packetOffset": 0},
            {"id": "a", "title": "B", "packetOffset": 1}
        ]}"#;
        assert!(matches!(
            JsonDefinitionSource.parse(text, "dup.json"),
            Err(DefinitionError::DuplicateParameter(_))
        ));
    }
}
