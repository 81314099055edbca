//! Effect Model Definitions
//!
//! Per-element visual effects as they arrive from the editor. Parameters may be
//! static or keyframed; keyframed parameters are resolved per frame time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// Effect Types
// =============================================================================

/// Visual effect kinds supported by the export pipeline
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    // Color
    Brightness,
    Contrast,
    Saturation,
    Hue,
    Gamma,
    Grayscale,
    Sepia,
    Invert,

    // Blur/Sharpen
    GaussianBlur,
    Sharpen,

    // Stylize
    Vignette,
    FilmGrain,
    Pixelate,
    Posterize,

    // Animated
    /// Continuous hue rotation; expressible as a time expression
    ColorCycle,
    /// Random channel shifts generated per frame
    Glitch,
    /// Random brightness jitter generated per frame
    Flicker,

    /// Unknown effect from a newer editor version
    #[serde(untagged)]
    Custom(String),
}

impl EffectType {
    /// Effects whose look is generated procedurally for every frame and can
    /// therefore never be baked into one static filter graph.
    pub fn is_procedural(&self) -> bool {
        matches!(self, EffectType::Glitch | EffectType::Flicker)
    }
}

// =============================================================================
// Effect Parameters
// =============================================================================

/// Effect parameter value types
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Bool(bool),
    String(String),
}

impl ParamValue {
    /// Attempts to get as f64
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

// =============================================================================
// Keyframe Animation
// =============================================================================

/// Easing function for keyframe interpolation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
    Hold,
}

impl Easing {
    /// Maps linear progress `t` in [0, 1] through the easing curve.
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t,
            Easing::EaseOut => t * (2.0 - t),
            Easing::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            Easing::Hold => 0.0,
        }
    }
}

/// A keyframe for parameter animation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    /// Time offset from element start (seconds)
    pub time_offset: f64,
    /// Parameter value at this keyframe
    pub value: ParamValue,
    /// Easing to next keyframe
    #[serde(default)]
    pub easing: Easing,
}

impl Keyframe {
    pub fn new(time_offset: f64, value: ParamValue) -> Self {
        Self {
            time_offset,
            value,
            easing: Easing::Linear,
        }
    }

    pub fn with_easing(time_offset: f64, value: ParamValue, easing: Easing) -> Self {
        Self {
            time_offset,
            value,
            easing,
        }
    }
}

// =============================================================================
// Effect Instance
// =============================================================================

fn default_enabled() -> bool {
    true
}

/// An effect instance attached to a timeline element
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Effect {
    /// Unique identifier
    pub id: String,
    /// Effect type
    pub effect_type: EffectType,
    /// Whether the effect is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Static parameter values
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    /// Keyframed parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keyframes: BTreeMap<String, Vec<Keyframe>>,
    /// Effect order (lower = applied first)
    #[serde(default)]
    pub order: u32,
}

impl Effect {
    pub fn new(effect_type: EffectType) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            effect_type,
            enabled: true,
            params: BTreeMap::new(),
            keyframes: BTreeMap::new(),
            order: 0,
        }
    }

    /// Builder-style parameter setter
    pub fn with_param(mut self, name: &str, value: f64) -> Self {
        self.params.insert(name.to_string(), ParamValue::Float(value));
        self
    }

    pub fn set_param(&mut self, name: &str, value: ParamValue) {
        self.params.insert(name.to_string(), value);
    }

    pub fn get_param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.params.get(name).and_then(|v| v.as_float())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.params.get(name).and_then(|v| v.as_bool())
    }

    /// Adds a keyframe for a parameter, keeping keyframes sorted by time.
    pub fn add_keyframe(&mut self, param_name: &str, keyframe: Keyframe) -> Result<(), String> {
        if !keyframe.time_offset.is_finite() || keyframe.time_offset < 0.0 {
            warn!(
                param_name = param_name,
                time_offset = keyframe.time_offset,
                "Rejected invalid keyframe time_offset"
            );
            return Err("Keyframe timeOffset must be finite and non-negative".to_string());
        }

        let keyframes = self.keyframes.entry(param_name.to_string()).or_default();
        keyframes.push(keyframe);
        keyframes.sort_by(|a, b| a.time_offset.total_cmp(&b.time_offset));
        Ok(())
    }

    /// Returns true if this effect has any keyframes
    pub fn has_keyframes(&self) -> bool {
        self.keyframes.values().any(|kfs| !kfs.is_empty())
    }

    /// Returns true when the effect must be evaluated frame by frame.
    pub fn is_time_varying(&self) -> bool {
        self.has_keyframes() || self.effect_type.is_procedural()
    }

    /// Gets the interpolated value at a time offset from element start.
    pub fn get_value_at(&self, param_name: &str, time_offset: f64) -> Option<ParamValue> {
        if let Some(keyframes) = self.keyframes.get(param_name) {
            if !keyframes.is_empty() {
                return Some(interpolate_keyframes(keyframes, time_offset));
            }
        }
        self.params.get(param_name).cloned()
    }

    /// Copy of the effect with every keyframed parameter resolved at `time_offset`.
    pub fn with_params_at_time(&self, time_offset: f64) -> Self {
        let mut resolved = self.clone();
        for (param_name, keyframes) in &self.keyframes {
            if !keyframes.is_empty() {
                resolved
                    .params
                    .insert(param_name.clone(), interpolate_keyframes(keyframes, time_offset));
            }
        }
        resolved.keyframes.clear();
        resolved
    }
}

/// Interpolates between sorted keyframes.
fn interpolate_keyframes(keyframes: &[Keyframe], time_offset: f64) -> ParamValue {
    let (Some(first), Some(last)) = (keyframes.first(), keyframes.last()) else {
        warn!("Interpolate called with empty keyframes; defaulting to 0.0");
        return ParamValue::Float(0.0);
    };

    if !time_offset.is_finite() || time_offset <= first.time_offset {
        return first.value.clone();
    }
    if time_offset >= last.time_offset {
        return last.value.clone();
    }

    for pair in keyframes.windows(2) {
        let (kf1, kf2) = (&pair[0], &pair[1]);
        if time_offset < kf1.time_offset || time_offset > kf2.time_offset {
            continue;
        }

        let denom = kf2.time_offset - kf1.time_offset;
        if denom <= 0.0 {
            return kf2.value.clone();
        }
        let t = kf1.easing.apply((time_offset - kf1.time_offset) / denom);

        return match (&kf1.value, &kf2.value) {
            (ParamValue::Float(v1), ParamValue::Float(v2)) => ParamValue::Float(v1 + (v2 - v1) * t),
            _ => kf1.value.clone(),
        };
    }

    last.value.clone()
}
