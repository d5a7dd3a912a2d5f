//! Tunables consumed at construction. Every field has a documented default;
//! missing JSON keys fall back to it.

use serde::Deserialize;

use super::types::QualityTier;

/// Tuning for one canvas. Every section and field is optional in JSON.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
	/// Interaction envelope timings.
	pub interaction: InteractionConfig,
	/// Frame scheduling and effects.
	pub render: RenderConfig,
	/// Zoom range, wheel speed and click threshold.
	pub camera: CameraConfig,
	/// Hit-test grid sizes and tolerances.
	pub picker: PickerConfig,
	/// Layout simulation switches.
	pub physics: PhysicsConfig,
	/// Pixel ratio clamp and resize debounce.
	pub viewport: ViewportConfig,
}

impl GraphConfig {
	/// Parses a JSON config blob, falling back to defaults on malformed input.
	pub fn from_json(text: &str) -> Self {
		match serde_json::from_str::<GraphConfig>(text) {
			Ok(config) => config,
			Err(e) => {
				log::warn!("trust-graph: ignoring malformed config: {}", e);
				Self::default()
			}
		}
	}
}

/// Durations (ms) of the interaction intensity envelope.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
	pub hold_ms: f64,
	pub ease_in_ms: f64,
	pub ease_out_delay_ms: f64,
	pub ease_out_ms: f64,
}

impl Default for InteractionConfig {
	fn default() -> Self {
		Self {
			hold_ms: 250.0,
			ease_in_ms: 100.0,
			ease_out_delay_ms: 200.0,
			ease_out_ms: 150.0,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
	/// Frame rate of the throttled path once nothing is animating.
	pub idle_fps: f64,
	/// Keep vsync scheduling this long after the last activity.
	pub active_hold_ms: f64,
	/// Flash strength lost per rendered frame.
	pub flash_decay: f64,
	/// Combined limit over all particle buffers.
	pub particle_cap: Option<usize>,
	/// Deterministic mode: always animate, never drag or pan.
	pub deterministic: bool,
}

impl Default for RenderConfig {
	fn default() -> Self {
		Self {
			idle_fps: 12.0,
			active_hold_ms: 300.0,
			flash_decay: 0.05,
			particle_cap: Some(600),
			deterministic: false,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
	pub min_zoom: f64,
	pub max_zoom: f64,
	/// Pointer travel (px) below which a press counts as a click.
	pub click_threshold_px: f64,
	pub wheel_sensitivity: f64,
}

impl Default for CameraConfig {
	fn default() -> Self {
		Self {
			min_zoom: 0.1,
			max_zoom: 8.0,
			click_threshold_px: 3.0,
			wheel_sensitivity: 0.0015,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PickerConfig {
	pub node_cell_size: f64,
	pub edge_cell_size: f64,
	/// Edge hit tolerance in screen pixels.
	pub edge_hit_px: f64,
	/// Fraction of a node's larger side used as its hit radius.
	pub node_hit_scale: f64,
}

impl Default for PickerConfig {
	fn default() -> Self {
		Self {
			node_cell_size: 180.0,
			edge_cell_size: 220.0,
			edge_hit_px: 8.0,
			node_hit_scale: 0.8,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
	pub enabled: bool,
	pub quality: QualityTier,
	/// Energy injected when the viewport changes size.
	pub viewport_reheat_alpha: f64,
}

impl Default for PhysicsConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			quality: QualityTier::Med,
			viewport_reheat_alpha: 0.3,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
	pub dpr_clamp: f64,
	pub resize_debounce_ms: f64,
}

impl Default for ViewportConfig {
	fn default() -> Self {
		Self {
			dpr_clamp: 2.0,
			resize_debounce_ms: 120.0,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partial_json_keeps_defaults() {
		let config = GraphConfig::from_json(r#"{ "render": { "idle_fps": 6 }, "physics": { "quality": "low" } }"#);
		assert_eq!(config.render.idle_fps, 6.0);
		assert_eq!(config.render.active_hold_ms, 300.0);
		assert_eq!(config.physics.quality, QualityTier::Low);
		assert_eq!(config.picker.node_cell_size, 180.0);
	}

	#[test]
	fn malformed_json_falls_back() {
		let config = GraphConfig::from_json("{ not json");
		assert_eq!(config.camera.click_threshold_px, 3.0);
	}
}
