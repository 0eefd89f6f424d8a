//! Gauge slot bindings
//!
//! A definition carries an ordered list of gauge slots. Each slot points at a
//! parameter and a display range. When no explicit range is stored, the range
//! is guessed from the parameter title with [`RANGE_RULES`].

use serde::{Deserialize, Serialize};

use super::{ParameterDefinition, ParameterId};

/// Display range of a gauge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaugeRange {
    /// Minimum display value
    pub min: f64,
    /// Maximum display value
    pub max: f64,
}

impl GaugeRange {
    /// Create a new range
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Position of `value` within the range as a fraction clamped to 0..=1
    pub fn fraction(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}

/// One entry of the title heuristic: a title containing `pattern` gets `range`
#[derive(Debug, Clone, Copy)]
pub struct RangeRule {
    /// Upper-case substring looked for in the title
    pub pattern: &'static str,
    /// Range assigned on match
    pub range: GaugeRange,
}

/// Title substring rules, evaluated in order, first match wins.
///
/// Best-effort default only; a binding with an explicit range ignores this.
pub const RANGE_RULES: &[RangeRule] = &[
    RangeRule {
        pattern: "RPM",
        range: GaugeRange::new(0.0, 7000.0),
    },
    RangeRule {
        pattern: "TEMP",
        range: GaugeRange::new(0.0, 120.0),
    },
    RangeRule {
        pattern: "TPS",
        range: GaugeRange::new(0.0, 100.0),
    },
];

/// Range used when no rule matches
pub const FALLBACK_RANGE: GaugeRange = GaugeRange::new(0.0, 255.0);

/// Guess a display range from a parameter title (case-insensitive)
pub fn range_for_title(title: &str) -> GaugeRange {
    let upper = title.to_uppercase();
    RANGE_RULES
        .iter()
        .find(|rule| upper.contains(rule.pattern))
        .map(|rule| rule.range)
        .unwrap_or(FALLBACK_RANGE)
}

/// A gauge slot bound to one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeBinding {
    /// Parameter shown by this gauge
    pub field: ParameterId,

    /// Label shown on the gauge
    pub label: String,

    /// Unit label
    #[serde(default)]
    pub units: String,

    /// Explicit display range, overrides the title heuristic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<GaugeRange>,
}

impl GaugeBinding {
    /// Bind a slot to `param`, using the heuristic range
    pub fn for_parameter(param: &ParameterDefinition) -> Self {
        Self {
            field: param.id.clone(),
            label: param.title.clone(),
            units: param.units.clone(),
            range: None,
        }
    }

    /// Pin an explicit range on this slot
    pub fn with_range(mut self, range: GaugeRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Effective display range: the explicit one, else guessed from the label
    pub fn display_range(&self) -> GaugeRange {
        self.range.unwrap_or_else(|| range_for_title(&self.label))
    }
}
