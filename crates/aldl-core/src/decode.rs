//! Packet decoding
//!
//! Applies a [`Definition`] to a raw response packet. Decoding never fails:
//! a parameter whose bytes are not in the packet is left out of the sample.

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::definition::{Definition, ParameterDefinition, ParameterId};

/// Errors building a sample by hand
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    #[error("Parameter '{0}' is not part of definition '{1}'")]
    UnknownParameter(ParameterId, String),
}

/// One decoded snapshot of telemetry values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Values in definition order
    #[serde(with = "values_as_map")]
    values: Vec<(ParameterId, f64)>,
}

/// Serializes the ordered value list as a JSON-style object, keeping entry order
mod values_as_map {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    use crate::definition::ParameterId;

    pub fn serialize<S: Serializer>(
        values: &[(ParameterId, f64)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(values.len()))?;
        for (id, value) in values {
            map.serialize_entry(id, value)?;
        }
        map.end()
    }

    struct OrderedValues;

    impl<'de> Visitor<'de> for OrderedValues {
        type Value = Vec<(ParameterId, f64)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of parameter ids to values")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut values: Vec<(ParameterId, f64)> =
                Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((id, value)) = access.next_entry::<ParameterId, f64>()? {
                // A repeated key keeps its first position
                match values.iter_mut().find(|(k, _)| *k == id) {
                    Some(entry) => entry.1 = value,
                    None => values.push((id, value)),
                }
            }
            Ok(values)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(ParameterId, f64)>, D::Error> {
        deserializer.deserialize_map(OrderedValues)
    }
}

impl TelemetrySample {
    /// Create an empty sample
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: Vec::new(),
        }
    }

    /// Build a sample from explicit values, checking every id against `definition`
    pub fn from_values<I, K>(
        definition: &Definition,
        timestamp: DateTime<Utc>,
        values: I,
    ) -> Result<Self, SampleError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<ParameterId>,
    {
        let mut sample = Self::empty(timestamp);
        for (id, value) in values {
            let id = id.into();
            if !definition.contains(id.as_str()) {
                return Err(SampleError::UnknownParameter(id, definition.name.clone()));
            }
            sample.set(id, value);
        }
        Ok(sample)
    }

    fn set(&mut self, id: ParameterId, value: f64) {
        match self.values.iter_mut().find(|(k, _)| *k == id) {
            Some(entry) => entry.1 = value,
            None => self.values.push((id, value)),
        }
    }

    /// Value for `id`, if it was decoded
    pub fn get(&self, id: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(k, _)| k.as_str() == id)
            .map(|(_, v)| *v)
    }

    /// Whether `id` was decoded
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Decoded ids, in definition order
    pub fn keys(&self) -> impl Iterator<Item = &ParameterId> {
        self.values.iter().map(|(k, _)| k)
    }

    /// Decoded (id, value) pairs, in definition order
    pub fn iter(&self) -> impl Iterator<Item = (&ParameterId, f64)> {
        self.values.iter().map(|(k, v)| (k, *v))
    }

    /// Number of decoded values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was decoded
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Raw value of `param` in `packet`, or `None` if its first byte is missing.
///
/// A 2-byte field whose low byte is missing reads as a 1-byte field at the
/// same offset.
pub fn extract_raw(param: &ParameterDefinition, packet: &[u8]) -> Option<u16> {
    let off = param.packet_offset;
    let first = *packet.get(off)?;
    if param.byte_count == 2 && off + 1 < packet.len() {
        return Some(BigEndian::read_u16(&packet[off..off + 2]));
    }
    Some(u16::from(first))
}

/// Decode `packet`, stamping the sample with the current time
pub fn decode(definition: &Definition, packet: &[u8]) -> TelemetrySample {
    decode_at(definition, packet, Utc::now())
}

/// Decode `packet` with an explicit capture time
pub fn decode_at(definition: &Definition, packet: &[u8], timestamp: DateTime<Utc>) -> TelemetrySample {
    let mut sample = TelemetrySample::empty(timestamp);
    for param in &definition.parameters {
        if let Some(raw) = extract_raw(param, packet) {
            sample.set(param.id.clone(), param.raw_to_display(f64::from(raw)));
        }
    }
    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn two_field_definition() -> Definition {
        Definition::new("test")
            .with_parameter(ParameterDefinition::new("lo", "Low byte", 0, 1))
            .with_parameter(ParameterDefinition::new("word", "Word", 0, 2).with_conversion(0.1, 0.0))
    }

    #[test]
    fn test_known_packet() {
        let sample = decode(&two_field_definition(), &[0x00, 0x64]);
        assert_eq!(sample.get("lo"), Some(0.0));
        let word = sample.get("word").unwrap();
        assert!((word - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_two_byte_field_truncates_to_one_byte() {
        let def = Definition::new("t").with_parameter(ParameterDefinition::new("w", "W", 1, 2));
        let sample = decode(&def, &[0x12, 0x34]);
        assert_eq!(sample.get("w"), Some(f64::from(0x34u8)));
    }

    #[test]
    fn test_out_of_range_field_is_omitted() {
        let def = Definition::new("t")
            .with_parameter(ParameterDefinition::new("a", "A", 0, 1))
            .with_parameter(ParameterDefinition::new("b", "B", 4, 1));
        let sample = decode(&def, &[0x01, 0x02]);
        assert!(sample.contains("a"));
        assert!(!sample.contains("b"));
        assert_eq!(sample.len(), 1);
    }

    #[test]
    fn test_empty_packet_and_empty_definition() {
        assert!(decode(&two_field_definition(), &[]).is_empty());
        assert!(decode(&Definition::new("none"), &[1, 2, 3]).is_empty());
    }

    #[test]
    fn test_linear_conversion() {
        let def = Definition::new("t").with_parameter(
            ParameterDefinition::new("clt", "Coolant Temp", 0, 1).with_conversion(0.75, -40.0),
        );
        assert_eq!(decode(&def, &[200]).get("clt"), Some(110.0));
    }

    #[test]
    fn test_keys_follow_definition_order() {
        let def = Definition::new("t")
            .with_parameter(ParameterDefinition::new("z", "Z", 1, 1))
            .with_parameter(ParameterDefinition::new("a", "A", 0, 1));
        let sample = decode(&def, &[1, 2]);
        let keys: Vec<&str> = sample.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_serializes_values_as_object() {
        let def = two_field_definition();
        let sample = decode(&def, &[0x00, 0x64]);
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["values"]["lo"], 0.0);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_deserialize_keeps_definition_order() {
        let def = Definition::new("t")
            .with_parameter(ParameterDefinition::new("z", "Z", 1, 1))
            .with_parameter(ParameterDefinition::new("a", "A", 0, 1));
        let sample = decode(&def, &[1, 2]);

        let json = serde_json::to_string(&sample).unwrap();
        let back: TelemetrySample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample);
        let keys: Vec<&str> = back.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert_eq!(
            crate::datalog::to_csv([&back]).unwrap().lines().next(),
            Some("timestamp,z,a")
        );
    }

    #[test]
    fn test_from_values_rejects_unknown_ids() {
        let def = two_field_definition();
        let ok = TelemetrySample::from_values(&def, Utc::now(), [("lo", 1.0)]).unwrap();
        assert_eq!(ok.get("lo"), Some(1.0));

        let err = TelemetrySample::from_values(&def, Utc::now(), [("rpm", 1.0)]).unwrap_err();
        assert_eq!(
            err,
            SampleError::UnknownParameter(ParameterId::from("rpm"), "test".into())
        );
    }
}
