//! FFmpeg Filter Builder
//!
//! Converts Effect instances into FFmpeg filter strings.
//!
//! Effects come in two flavours:
//! - static: no keyframes and a time-invariant mapping; these are spliced into
//!   the composition graph once per source segment
//! - time-varying: keyframed or procedural (glitch, flicker); these are resolved
//!   per frame and applied by the frame effect processor
//!
//! # Example
//!
//! ```rust,ignore
//! let effect = Effect::new(EffectType::GaussianBlur).with_param("radius", 4.0);
//! assert_eq!(effect.to_filter().as_deref(), Some("gblur=sigma=4.0000"));
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use super::{Effect, EffectType};

// =============================================================================
// Effect Chains
// =============================================================================

/// Returns true if any enabled effect must be evaluated frame by frame.
pub fn needs_frame_processing<'a>(effects: impl IntoIterator<Item = &'a Effect>) -> bool {
    effects
        .into_iter()
        .any(|e| e.enabled && e.is_time_varying())
}

/// Joins the static effects into one comma-separated chain.
///
/// Time-varying effects are skipped; they belong to the per-frame chain.
pub fn build_static_chain<'a>(effects: impl IntoIterator<Item = &'a Effect>) -> Option<String> {
    let filters: Vec<String> = sorted_enabled(effects)
        .into_iter()
        .filter(|e| !e.is_time_varying())
        .filter_map(|e| e.to_filter())
        .collect();
    join_chain(filters)
}

/// Builds the chain applied to a single rendered frame.
///
/// `element_time` is the offset from the element start used for keyframe
/// lookup; `frame_index` seeds procedural effects so re-running an export
/// produces identical frames.
pub fn build_frame_chain<'a>(
    effects: impl IntoIterator<Item = &'a Effect>,
    element_time: f64,
    frame_index: u64,
) -> Option<String> {
    let filters: Vec<String> = sorted_enabled(effects)
        .into_iter()
        .filter(|e| e.is_time_varying())
        .filter_map(|e| e.to_frame_filter(element_time, frame_index))
        .collect();
    join_chain(filters)
}

fn sorted_enabled<'a>(effects: impl IntoIterator<Item = &'a Effect>) -> Vec<&'a Effect> {
    let mut enabled: Vec<&Effect> = effects.into_iter().filter(|e| e.enabled).collect();
    enabled.sort_by_key(|e| e.order);
    enabled
}

fn join_chain(filters: Vec<String>) -> Option<String> {
    if filters.is_empty() {
        None
    } else {
        Some(filters.join(","))
    }
}

// =============================================================================
// Filter Parameter Builders
// =============================================================================

impl Effect {
    /// Filter body for the effect's current (static) parameters.
    ///
    /// Returns `None` for disabled or unknown effects.
    pub fn to_filter(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let filter = match &self.effect_type {
            // Color effects
            EffectType::Brightness => self.build_brightness_filter(),
            EffectType::Contrast => self.build_contrast_filter(),
            EffectType::Saturation => self.build_saturation_filter(),
            EffectType::Hue => self.build_hue_filter(),
            EffectType::Gamma => self.build_gamma_filter(),
            EffectType::Grayscale => "hue=s=0".to_string(),
            EffectType::Sepia => {
                "colorchannelmixer=.393:.769:.189:0:.349:.686:.168:0:.272:.534:.131".to_string()
            }
            EffectType::Invert => "negate".to_string(),

            // Blur/Sharpen
            EffectType::GaussianBlur => self.build_gaussian_blur_filter(),
            EffectType::Sharpen => self.build_sharpen_filter(),

            // Stylize
            EffectType::Vignette => self.build_vignette_filter(),
            EffectType::FilmGrain => self.build_film_grain_filter(),
            EffectType::Pixelate => self.build_pixelate_filter(),
            EffectType::Posterize => self.build_posterize_filter(),

            // Animated
            EffectType::ColorCycle => self.build_color_cycle_expression(),
            EffectType::Glitch => self.build_glitch_filter(0),
            EffectType::Flicker => self.build_flicker_filter(0),

            EffectType::Custom(name) => {
                warn!(effect_id = %self.id, effect_type = %name, "Unsupported effect skipped");
                return None;
            }
        };
        Some(filter)
    }

    /// Filter body for one frame: keyframes resolved at `element_time`,
    /// procedural effects seeded by `frame_index`.
    pub fn to_frame_filter(&self, element_time: f64, frame_index: u64) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let resolved = self.with_params_at_time(element_time);
        match &resolved.effect_type {
            EffectType::Glitch => Some(resolved.build_glitch_filter(frame_index)),
            EffectType::Flicker => Some(resolved.build_flicker_filter(frame_index)),
            // A single image has t=0, so the cycle is evaluated explicitly.
            EffectType::ColorCycle => Some(resolved.build_color_cycle_at(element_time)),
            _ => resolved.to_filter(),
        }
    }

    // -------------------------------------------------------------------------
    // Color Effect Builders
    // -------------------------------------------------------------------------

    fn build_brightness_filter(&self) -> String {
        let value = self.get_float("value").unwrap_or(0.0).clamp(-1.0, 1.0);
        format!("eq=brightness={:.4}", value)
    }

    fn build_contrast_filter(&self) -> String {
        let value = self.get_float("value").unwrap_or(1.0).clamp(-1000.0, 1000.0);
        format!("eq=contrast={:.4}", value)
    }

    fn build_saturation_filter(&self) -> String {
        let value = self.get_float("value").unwrap_or(1.0).clamp(0.0, 3.0);
        format!("eq=saturation={:.4}", value)
    }

    fn build_hue_filter(&self) -> String {
        // Degrees
        let value = self.get_float("value").unwrap_or(0.0);
        format!("hue=h={:.4}", value)
    }

    fn build_gamma_filter(&self) -> String {
        let value = self.get_float("value").unwrap_or(1.0).clamp(0.1, 10.0);
        format!("eq=gamma={:.4}", value)
    }

    // -------------------------------------------------------------------------
    // Blur/Sharpen Effect Builders
    // -------------------------------------------------------------------------

    fn build_gaussian_blur_filter(&self) -> String {
        let sigma = self.get_float("radius").unwrap_or(5.0).max(0.1);
        format!("gblur=sigma={:.4}", sigma)
    }

    fn build_sharpen_filter(&self) -> String {
        // unsharp format: luma_msize_x:luma_msize_y:luma_amount
        let amount = self.get_float("amount").unwrap_or(1.0).clamp(-2.0, 5.0);
        format!("unsharp=5:5:{:.4}", amount)
    }

    // -------------------------------------------------------------------------
    // Stylize Effect Builders
    // -------------------------------------------------------------------------

    fn build_vignette_filter(&self) -> String {
        let intensity = self.get_float("intensity").unwrap_or(0.5).clamp(0.0, 1.0);
        let angle = intensity * std::f64::consts::PI / 4.0;
        format!("vignette=angle={:.4}", angle)
    }

    fn build_film_grain_filter(&self) -> String {
        let amount = self.get_float("amount").unwrap_or(10.0) as i64;
        format!("noise=alls={}:allf=t", amount.clamp(0, 100))
    }

    fn build_pixelate_filter(&self) -> String {
        let size = (self.get_float("size").unwrap_or(8.0) as i64).clamp(2, 100);
        format!("pixelize=w={}:h={}", size, size)
    }

    fn build_posterize_filter(&self) -> String {
        let levels = (self.get_float("levels").unwrap_or(4.0) as i64).clamp(2, 64);
        let step = 256 / levels;
        let expr = format!("floor(val/{step})*{step}");
        format!("lutrgb=r={expr}:g={expr}:b={expr}")
    }

    // -------------------------------------------------------------------------
    // Animated Effect Builders
    // -------------------------------------------------------------------------

    fn color_cycle_speed(&self) -> f64 {
        // Degrees per second
        self.get_float("speed").unwrap_or(90.0)
    }

    fn build_color_cycle_expression(&self) -> String {
        format!("hue=h=t*{:.4}", self.color_cycle_speed())
    }

    fn build_color_cycle_at(&self, element_time: f64) -> String {
        let degrees = (self.color_cycle_speed() * element_time.max(0.0)).rem_euclid(360.0);
        format!("hue=h={:.4}", degrees)
    }

    fn intensity(&self) -> f64 {
        self.get_float("intensity").unwrap_or(0.5).clamp(0.0, 1.0)
    }

    fn build_glitch_filter(&self, frame_index: u64) -> String {
        let mut rng = frame_rng(&self.id, frame_index);
        let max_shift = (self.intensity() * 24.0).round();
        let dx = (rng.gen_range(-1.0_f64..1.0) * max_shift).round() as i64;
        let dy = (rng.gen_range(-1.0_f64..1.0) * max_shift / 4.0).round() as i64;
        format!("rgbashift=rh={}:bh={}:rv={}", dx, -dx, dy)
    }

    fn build_flicker_filter(&self, frame_index: u64) -> String {
        let mut rng = frame_rng(&self.id, frame_index);
        let jitter = rng.gen_range(-1.0_f64..1.0) * self.intensity() * 0.3;
        format!("eq=brightness={:.4}", jitter)
    }
}

// =============================================================================
// Deterministic per-frame randomness
// =============================================================================

/// Seeds a generator from the effect id and frame index.
fn frame_rng(effect_id: &str, frame_index: u64) -> StdRng {
    let mut hasher = DefaultHasher::new();
    effect_id.hash(&mut hasher);
    frame_index.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}
