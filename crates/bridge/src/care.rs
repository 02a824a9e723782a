//! Care instructions: device configuration, validation of the advisory
//! record, and the plant-name resolver that asks the advisor for one.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::advisor::{Advisor, AdvisoryRequest};
use crate::error::CareError;

const CARE_SYSTEM_INSTRUCTION: &str = "You are a horticulture assistant configuring an automatic \
plant care device. Reply with a single JSON object and nothing else. The object must have exactly \
these numeric keys: moistureThreshold (soil moisture percentage 0-100 below which the plant needs \
water), lightingFrequency (times per day the grow light switches on, 0-24), lightingDuration \
(hours of light per session, 0-24), wateringFrequency (days between waterings, 1-7), \
wateringDuration (seconds of watering per session, 1-300). Use integers, no units.";

/// Field name, inclusive lower bound, inclusive upper bound.
const CARE_FIELDS: [(&str, i64, i64); 5] = [
    ("moistureThreshold", 0, 100),
    ("lightingFrequency", 0, 24),
    ("lightingDuration", 0, 24),
    ("wateringFrequency", 1, 7),
    ("wateringDuration", 1, 300),
];

// ---------------------------------------------------------------------------
// Device configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub(crate) moisture_threshold: i64,
    pub(crate) lighting_frequency: i64,
    pub(crate) lighting_duration: i64,
    pub(crate) watering_frequency: i64,
    pub(crate) watering_duration: i64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            moisture_threshold: 40,
            lighting_frequency: 1,
            lighting_duration: 8,
            watering_frequency: 1,
            watering_duration: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Turn an advisory record into a `DeviceConfig`.
///
/// Every field must be present and a JSON number; fractions are truncated.
/// Declared ranges are not enforced here, an out-of-range value is passed
/// through with a warning.
pub(crate) fn validate(raw: &Value) -> Result<DeviceConfig, CareError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| CareError::Validation(format!("expected an object, got {raw}")))?;

    let mut values = [0i64; 5];
    for (slot, (name, lo, hi)) in values.iter_mut().zip(CARE_FIELDS) {
        let value = numeric_field(obj, name)?;
        if !(lo..=hi).contains(&value) {
            warn!(field = name, value, lo, hi, "care value outside declared range, accepted as-is");
        }
        *slot = value;
    }

    let [moisture_threshold, lighting_frequency, lighting_duration, watering_frequency, watering_duration] =
        values;

    Ok(DeviceConfig {
        moisture_threshold,
        lighting_frequency,
        lighting_duration,
        watering_frequency,
        watering_duration,
    })
}

fn numeric_field(obj: &Map<String, Value>, name: &str) -> Result<i64, CareError> {
    let value = obj
        .get(name)
        .ok_or_else(|| CareError::Validation(format!("missing field '{name}'")))?;

    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.trunc() as i64))
        .ok_or_else(|| CareError::Validation(format!("field '{name}' is not numeric: {value}")))
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Ask the advisor for care instructions for `plant_name`.
pub(crate) async fn resolve(
    advisor: &dyn Advisor,
    plant_name: &str,
) -> Result<DeviceConfig, CareError> {
    let plant = plant_name.trim();
    if plant.is_empty() {
        return Err(CareError::EmptyPlantName);
    }

    let request = AdvisoryRequest {
        system_instruction: CARE_SYSTEM_INSTRUCTION.to_string(),
        user_text: format!("Plant: {plant}"),
    };
    let text = advisor.complete(&request).await?;

    let raw: Value = serde_json::from_str(strip_code_fence(&text))
        .map_err(|e| CareError::AdvisoryParse(e.to_string()))?;
    if !raw.is_object() {
        return Err(CareError::AdvisoryParse(format!("expected a JSON object, got {raw}")));
    }

    validate(&raw)
}

/// Models like to wrap JSON in a Markdown fence; unwrap one if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

// ===========================================================================
// Tests
// ===========================================================================
