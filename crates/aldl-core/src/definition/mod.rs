//! ECM Definitions
//!
//! A [`Definition`] describes one ECM variant: the request frame sent on every
//! poll, the bus speed, and how the bytes of the response packet map onto
//! named physical parameters.
//!
//! Turning an ADX file into a `Definition` is the job of a
//! [`DefinitionSource`]; this module only holds the resulting model and the
//! [`DefinitionLibrary`] that stores loaded definitions by name.

mod gauges;
mod library;
mod source;

pub use gauges::{range_for_title, GaugeBinding, GaugeRange, RangeRule, FALLBACK_RANGE, RANGE_RULES};
pub use library::{DefinitionLibrary, LibraryError};
pub use source::{DefinitionSource, JsonDefinitionSource};

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Default ALDL bus speed
pub const DEFAULT_BAUD_RATE: u32 = 8192;

/// Default request frame: mode 1 data request to device 0xF4
pub const DEFAULT_REQUEST_COMMAND: [u8; 5] = [0xF4, 0x57, 0x01, 0x00, 0xB4];

/// Errors reported when checking a definition
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Definition has no name")]
    EmptyName,

    #[error("Duplicate parameter id '{0}'")]
    DuplicateParameter(ParameterId),

    #[error("Parameter '{id}' has byte count {byte_count}, expected 1 or 2")]
    InvalidByteCount { id: ParameterId, byte_count: u8 },

    #[error("Gauge slot {slot} references unknown parameter '{id}'")]
    UnknownGaugeParameter { slot: usize, id: ParameterId },

    #[error("Gauge slot {0} does not exist")]
    UnknownGaugeSlot(usize),

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(ParameterId),

    #[error("Failed to parse definition '{name}': {message}")]
    Parse { name: String, message: String },
}

/// Identifier of a parameter, unique within one definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterId(String);

impl ParameterId {
    /// Create an id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ParameterId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParameterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParameterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<ParameterId> for String {
    fn from(id: ParameterId) -> Self {
        id.0
    }
}

fn default_scale() -> f64 {
    1.0
}

/// One physical channel inside the response packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    /// Stable identifier
    pub id: ParameterId,

    /// Human-readable name
    pub title: String,

    /// Unit of measurement
    #[serde(default)]
    pub units: String,

    /// Zero-based byte offset into the response packet
    pub packet_offset: usize,

    /// Width in bytes: 1, or 2 for a big-endian word
    #[serde(default = "default_byte_count")]
    pub byte_count: u8,

    /// Scale factor
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Additive term applied after scaling
    #[serde(default)]
    pub offset: f64,
}

fn default_byte_count() -> u8 {
    1
}

impl ParameterDefinition {
    /// Create a parameter with unit scale and no offset
    pub fn new(
        id: impl Into<ParameterId>,
        title: impl Into<String>,
        packet_offset: usize,
        byte_count: u8,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            units: String::new(),
            packet_offset,
            byte_count,
            scale: 1.0,
            offset: 0.0,
        }
    }

    /// Set the unit label
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Set the linear conversion `raw * scale + offset`
    pub fn with_conversion(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    /// Convert a raw value to display value
    pub fn raw_to_display(&self, raw: f64) -> f64 {
        raw * self.scale + self.offset
    }

    /// Inverse of [`raw_to_display`](Self::raw_to_display), rounded and clamped to the field width
    pub fn display_to_raw(&self, value: f64) -> u16 {
        let scale = if self.scale == 0.0 { 1.0 } else { self.scale };
        let max = if self.byte_count == 2 { u16::MAX } else { u8::MAX as u16 };
        ((value - self.offset) / scale).round().clamp(0.0, max as f64) as u16
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_request_command() -> Vec<u8> {
    DEFAULT_REQUEST_COMMAND.to_vec()
}

/// Communication profile for one ECM variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    /// Display name, also the library key
    pub name: String,

    /// Bus speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Frame sent on every poll
    #[serde(default = "default_request_command")]
    pub request_command: Vec<u8>,

    /// Parameters in packet-definition order
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,

    /// Gauge slots
    #[serde(default)]
    pub gauges: Vec<GaugeBinding>,
}

impl Definition {
    /// Create an empty definition with the default bus settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            request_command: DEFAULT_REQUEST_COMMAND.to_vec(),
            parameters: Vec::new(),
            gauges: Vec::new(),
        }
    }

    /// Append a parameter
    pub fn with_parameter(mut self, param: ParameterDefinition) -> Self {
        self.parameters.push(param);
        self
    }

    /// Look up a parameter by id
    pub fn parameter(&self, id: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.id.as_str() == id)
    }

    /// Whether `id` names a parameter of this definition
    pub fn contains(&self, id: &str) -> bool {
        self.parameter(id).is_some()
    }

    /// Number of response bytes needed to decode every parameter at full width.
    ///
    /// Saturates at `usize::MAX` for offsets at the top of the range.
    pub fn packet_len(&self) -> usize {
        self.parameters
            .iter()
            .map(|p| p.packet_offset.saturating_add(if p.byte_count == 2 { 2 } else { 1 }))
            .max()
            .unwrap_or(0)
    }

    /// Add a gauge slot for every parameter that does not have one yet
    pub fn bind_default_gauges(&mut self) {
        for param in &self.parameters {
            if !self.gauges.iter().any(|g| g.field == param.id) {
                self.gauges.push(GaugeBinding::for_parameter(param));
            }
        }
    }

    /// Point gauge `slot` at parameter `id`, resetting label, units and range
    pub fn rebind_gauge(&mut self, slot: usize, id: &str) -> Result<(), DefinitionError> {
        let param = self
            .parameter(id)
            .ok_or_else(|| DefinitionError::UnknownParameter(ParameterId::from(id)))?;
        let binding = GaugeBinding::for_parameter(param);
        let target = self
            .gauges
            .get_mut(slot)
            .ok_or(DefinitionError::UnknownGaugeSlot(slot))?;
        *target = binding;
        Ok(())
    }

    /// Display range of gauge `slot`
    pub fn gauge_range(&self, slot: usize) -> Option<GaugeRange> {
        let binding = self.gauges.get(slot)?;
        if let Some(range) = binding.range {
            return Some(range);
        }
        let title = self
            .parameter(binding.field.as_str())
            .map(|p| p.title.as_str())
            .unwrap_or(&binding.label);
        Some(range_for_title(title))
    }

    /// Check the loader contract: a name, unique ids, widths of 1 or 2, and
    /// gauge slots that point at existing parameters.
    ///
    /// Decoding never calls this.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.id.as_str()) {
                return Err(DefinitionError::DuplicateParameter(param.id.clone()));
            }
            if !matches!(param.byte_count, 1 | 2) {
                return Err(DefinitionError::InvalidByteCount {
                    id: param.id.clone(),
                    byte_count: param.byte_count,
                });
            }
        }

        for (slot, gauge) in self.gauges.iter().enumerate() {
            if !seen.contains(gauge.field.as_str()) {
                return Err(DefinitionError::UnknownGaugeParameter {
                    slot,
                    id: gauge.field.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_definition() -> Definition {
        Definition::new("1227747")
            .with_parameter(ParameterDefinition::new("rpm", "Engine RPM", 2, 1).with_conversion(25.0, 0.0))
            .with_parameter(
                ParameterDefinition::new("clt", "Coolant Temp", 3, 1).with_conversion(0.75, -40.0),
            )
            .with_parameter(ParameterDefinition::new("tps", "TPS", 5, 2))
    }

    #[test]
    fn test_defaults() {
        let def = Definition::new("empty");
        assert_eq!(def.baud_rate, 8192);
        assert_eq!(def.request_command, vec![0xF4, 0x57, 0x01, 0x00, 0xB4]);
        assert_eq!(def.packet_len(), 0);
    }

    #[test]
    fn test_serde_defaults_fill_unset_fields() {
        let def: Definition = serde_json::from_str(
            r#"{"name":"min","parameters":[{"id":"map","title":"MAP","packetOffset":4}]}"#,
        )
        .unwrap();
        assert_eq!(def.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(def.request_command, DEFAULT_REQUEST_COMMAND.to_vec());
        let map = def.parameter("map").unwrap();
        assert_eq!(map.byte_count, 1);
        assert_eq!(map.scale, 1.0);
        assert_eq!(map.offset, 0.0);
    }

    #[test]
    fn test_packet_len() {
        assert_eq!(sample_definition().packet_len(), 7);
    }

    #[test]
    fn test_packet_len_saturates() {
        let def = Definition::new("far")
            .with_parameter(ParameterDefinition::new("w", "Word", usize::MAX, 2));
        assert_eq!(def.packet_len(), usize::MAX);
    }

    #[test]
    fn test_validate() {
        assert!(sample_definition().validate().is_ok());

        let dup = sample_definition().with_parameter(ParameterDefinition::new("rpm", "Again", 9, 1));
        assert_eq!(
            dup.validate(),
            Err(DefinitionError::DuplicateParameter(ParameterId::from("rpm")))
        );

        let wide = Definition::new("wide").with_parameter(ParameterDefinition::new("x", "X", 0, 4));
        assert!(matches!(
            wide.validate(),
            Err(DefinitionError::InvalidByteCount { byte_count: 4, .. })
        ));

        assert_eq!(Definition::new("  ").validate(), Err(DefinitionError::EmptyName));
    }

    #[test]
    fn test_rebind_gauge() {
        let mut def = sample_definition();
        def.bind_default_gauges();
        assert_eq!(def.gauges.len(), 3);
        assert_eq!(def.gauge_range(0), Some(GaugeRange::new(0.0, 7000.0)));

        def.rebind_gauge(0, "clt").unwrap();
        assert_eq!(def.gauges[0].field.as_str(), "clt");
        assert_eq!(def.gauges[0].label, "Coolant Temp");
        assert_eq!(def.gauge_range(0), Some(GaugeRange::new(0.0, 120.0)));

        let before = def.clone();
        assert!(def.rebind_gauge(0, "nope").is_err());
        assert!(def.rebind_gauge(7, "rpm").is_err());
        assert_eq!(def, before);
    }

    #[test]
    fn test_display_to_raw() {
        let clt = ParameterDefinition::new("clt", "Coolant", 0, 1).with_conversion(0.75, -40.0);
        assert_eq!(clt.display_to_raw(35.0), 100);
        assert_eq!(clt.display_to_raw(1000.0), 255);
        assert_eq!(clt.display_to_raw(-100.0), 0);
    }
}
