//! Canvas 2D drawing: the surfaces the render loop paints on and the draw
//! callbacks for the trust graph and its effects.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::rc::Rc;

use wasm_bindgen::{JsCast, JsValue};
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement};

use super::fx::{EdgeHighlights, FxLayer, ParticleBuffers, ParticleKind};
use super::render_loop::{DrawSurface, FrameContext, SurfaceKey, SurfaceProvider};
use super::types::{Camera, LayoutLink, LayoutNode, NodeId, QualityTier, Viewport};

const GROUP_COLORS: [&str; 8] = [
	"#4e9cff", "#ff8a5b", "#57d68d", "#e65fd0", "#f6c343", "#43d1d9", "#a98bff", "#ff5d73",
];
const UNGROUPED_COLOR: &str = "#8a93a8";

fn ease_out_cubic(t: f64) -> f64 {
	1.0 - (1.0 - t).powi(3)
}

fn group_color(group: Option<u32>) -> &'static str {
	group.map_or(UNGROUPED_COLOR, |g| GROUP_COLORS[g as usize % GROUP_COLORS.len()])
}

/// A 2D context whose backing store is `dpr` times the CSS size.
pub struct CanvasSurface {
	ctx: CanvasRenderingContext2d,
	dpr: f64,
}

impl CanvasSurface {
	pub fn context(&self) -> &CanvasRenderingContext2d {
		&self.ctx
	}
}

impl DrawSurface for CanvasSurface {
	fn reset_transform(&self) {
		let _ = self.ctx.set_transform(self.dpr, 0.0, 0.0, self.dpr, 0.0, 0.0);
	}

	fn clear(&self, width: f64, height: f64) {
		self.ctx.clear_rect(0.0, 0.0, width, height);
	}

	fn fill_background(&self, color: &str, width: f64, height: f64) {
		self.ctx.set_fill_style_str(color);
		self.ctx.fill_rect(0.0, 0.0, width, height);
	}

	fn apply_camera(&self, camera: &Camera) {
		let k = self.dpr * camera.zoom;
		let _ = self.ctx.set_transform(
			k,
			0.0,
			0.0,
			k,
			self.dpr * camera.pan_x,
			self.dpr * camera.pan_y,
		);
	}

	fn paint_flash(&self, width: f64, height: f64, strength: f64) {
		let (cx, cy) = (width / 2.0, height / 2.0);
		let radius = cx.hypot(cy);
		let Ok(gradient) = self.ctx.create_radial_gradient(cx, cy, 0.0, cx, cy, radius) else {
			return;
		};
		let _ = gradient.add_color_stop(0.0, &format!("rgba(255, 255, 255, {})", 0.35 * strength));
		let _ = gradient.add_color_stop(1.0, &format!("rgba(160, 200, 255, {})", 0.1 * strength));
		#[allow(deprecated)]
		self.ctx.set_fill_style(&gradient);
		self.ctx.fill_rect(0.0, 0.0, width, height);
	}
}

struct Mounted {
	main: HtmlCanvasElement,
	fx: HtmlCanvasElement,
	css: Viewport,
	dpr: f64,
}

/// The stacked main and effects canvases. Cloning shares the same elements.
#[derive(Clone, Default)]
pub struct CanvasPair {
	mounted: Rc<RefCell<Option<Mounted>>>,
	generation: Rc<Cell<u64>>,
}

impl CanvasPair {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adopts both canvases and sizes their backing stores.
	pub fn mount(&self, main: HtmlCanvasElement, fx: HtmlCanvasElement, css: Viewport, dpr: f64) {
		*self.mounted.borrow_mut() = Some(Mounted { main, fx, css, dpr });
		self.apply_size();
	}

	pub fn resize(&self, css: Viewport, dpr: f64) {
		if let Some(m) = self.mounted.borrow_mut().as_mut() {
			m.css = css;
			m.dpr = dpr;
		}
		self.apply_size();
	}

	fn apply_size(&self) {
		if let Some(m) = self.mounted.borrow().as_ref() {
			for canvas in [&m.main, &m.fx] {
				canvas.set_width((m.css.width * m.dpr).round() as u32);
				canvas.set_height((m.css.height * m.dpr).round() as u32);
				let style = canvas.style();
				let _ = style.set_property("width", &format!("{}px", m.css.width));
				let _ = style.set_property("height", &format!("{}px", m.css.height));
			}
		}
		// resizing resets context state and may change the pixel ratio
		self.generation.set(self.generation.get() + 1);
	}
}

fn context_2d(canvas: &HtmlCanvasElement) -> Option<CanvasRenderingContext2d> {
	canvas.get_context("2d").ok().flatten()?.dyn_into().ok()
}

impl SurfaceProvider for CanvasPair {
	type Surface = CanvasSurface;

	fn surface_key(&self) -> Option<SurfaceKey> {
		self.mounted
			.borrow()
			.as_ref()
			.map(|_| SurfaceKey(self.generation.get()))
	}

	fn acquire(&self) -> Option<(CanvasSurface, CanvasSurface)> {
		let mounted = self.mounted.borrow();
		let m = mounted.as_ref()?;
		let main = CanvasSurface {
			ctx: context_2d(&m.main)?,
			dpr: m.dpr,
		};
		let fx = CanvasSurface {
			ctx: context_2d(&m.fx)?,
			dpr: m.dpr,
		};
		Some((main, fx))
	}

	fn size(&self) -> Viewport {
		self.mounted
			.borrow()
			.as_ref()
			.map_or(Viewport::new(0.0, 0.0), |m| m.css)
	}
}

/// What the user is pointing at or has picked.
#[derive(Clone, Debug, Default)]
pub struct Scene {
	pub selected: Option<NodeId>,
	pub hovered_edge: Option<String>,
}

impl Scene {
	fn touches_selection(&self, link: &LayoutLink) -> bool {
		self.selected
			.as_deref()
			.is_some_and(|id| link.source == id || link.target == id)
	}
}

/// Trustlines, then participants. Emphasis fades while the user is
/// actively interacting (`intensity` near 1).
pub fn draw_base(frame: &FrameContext<'_, CanvasSurface>, scene: &Scene, intensity: f64) {
	let ctx = frame.surface.context();
	let k = frame.camera.zoom;
	let emphasis = ease_out_cubic(1.0 - 0.6 * intensity.clamp(0.0, 1.0));
	let detailed = frame.quality != QualityTier::Low;

	for link in frame.layout.links() {
		let Some((source, target)) = frame.layout.resolve_link(link) else {
			continue;
		};
		let hovered = scene.hovered_edge.as_deref() == Some(link.key.as_str());
		let lit = hovered || scene.touches_selection(link);
		let (alpha, width) = if lit {
			(0.45 + 0.45 * emphasis, (1.5 + 1.0 * emphasis) / k)
		} else {
			(0.45, 1.5 / k)
		};
		if lit && detailed {
			let (dash, gap) = (8.0 / k, 4.0 / k);
			let _ = ctx.set_line_dash(&js_sys::Array::of2(
				&JsValue::from_f64(dash),
				&JsValue::from_f64(gap),
			));
			ctx.set_line_dash_offset(-(frame.now_ms / 1000.0 * 30.0 / k) % (dash + gap));
		}
		draw_trustline(ctx, source, target, k, alpha, width, detailed);
		if lit && detailed {
			let _ = ctx.set_line_dash(&js_sys::Array::new());
		}
	}

	for node in frame.layout.nodes() {
		let selected = scene.selected.as_deref() == Some(node.id.as_str());
		draw_participant(ctx, node, k, selected, emphasis, detailed);
	}
}

fn draw_trustline(
	ctx: &CanvasRenderingContext2d,
	source: &LayoutNode,
	target: &LayoutNode,
	k: f64,
	alpha: f64,
	width: f64,
	arrow: bool,
) {
	let (dx, dy) = (target.x - source.x, target.y - source.y);
	let dist = dx.hypot(dy);
	if dist < 0.001 {
		return;
	}
	let (ux, uy) = (dx / dist, dy / dist);
	let (r_src, r_tgt) = (source.width / 2.0 / k, target.width / 2.0 / k);
	let arrow_size = if arrow { 7.0 / k } else { 0.0 };

	ctx.set_stroke_style_str(&format!("rgba(120, 180, 255, {alpha})"));
	ctx.set_line_width(width);
	ctx.begin_path();
	ctx.move_to(source.x + ux * r_src, source.y + uy * r_src);
	ctx.line_to(
		target.x - ux * (r_tgt + arrow_size),
		target.y - uy * (r_tgt + arrow_size),
	);
	ctx.stroke();

	if !arrow {
		return;
	}
	let (tip_x, tip_y) = (target.x - ux * r_tgt, target.y - uy * r_tgt);
	let (back_x, back_y) = (tip_x - ux * arrow_size, tip_y - uy * arrow_size);
	let (px, py) = (-uy * arrow_size * 0.5, ux * arrow_size * 0.5);
	ctx.set_fill_style_str(&format!("rgba(120, 180, 255, {})", (alpha + 0.2).min(1.0)));
	ctx.begin_path();
	ctx.move_to(tip_x, tip_y);
	ctx.line_to(back_x + px, back_y + py);
	ctx.line_to(back_x - px, back_y - py);
	ctx.close_path();
	ctx.fill();
}

fn draw_participant(
	ctx: &CanvasRenderingContext2d,
	node: &LayoutNode,
	k: f64,
	selected: bool,
	emphasis: f64,
	labels: bool,
) {
	let radius = node.width / 2.0 / k;

	if selected {
		let glow = radius * (1.8 + 1.2 * emphasis);
		if let Ok(gradient) =
			ctx.create_radial_gradient(node.x, node.y, radius * 0.3, node.x, node.y, glow)
		{
			let _ = gradient.add_color_stop(0.0, &format!("rgba(255, 255, 255, {})", 0.35 * emphasis));
			let _ = gradient.add_color_stop(1.0, "rgba(255, 255, 255, 0)");
			ctx.begin_path();
			let _ = ctx.arc(node.x, node.y, glow, 0.0, 2.0 * PI);
			#[allow(deprecated)]
			ctx.set_fill_style(&gradient);
			ctx.fill();
		}
	}

	ctx.begin_path();
	let _ = ctx.arc(node.x, node.y, radius, 0.0, 2.0 * PI);
	ctx.set_fill_style_str(group_color(node.group));
	ctx.fill();

	if node.pinned {
		ctx.begin_path();
		let _ = ctx.arc(node.x, node.y, radius + 2.0 / k, 0.0, 2.0 * PI);
		ctx.set_stroke_style_str("rgba(255, 255, 255, 0.8)");
		ctx.set_line_width(1.0 / k);
		ctx.stroke();
	}

	if labels {
		let text = node.label.as_deref().unwrap_or(&node.id);
		let alpha = if selected { 1.0 } else { 0.75 };
		ctx.set_fill_style_str(&format!("rgba(255, 255, 255, {alpha})"));
		ctx.set_font(&format!("{}px sans-serif", 10.0 / k));
		let _ = ctx.fill_text(text, node.x + radius + 3.0 / k, node.y + 3.0 / k);
	}
}

/// Particles travelling along trustlines and highlighted trustlines.
pub fn draw_fx(
	frame: &FrameContext<'_, CanvasSurface>,
	particles: &ParticleBuffers,
	highlights: &EdgeHighlights,
) {
	if particles.is_empty() && highlights.active_count() == 0 {
		return;
	}
	let ctx = frame.surface.context();
	let k = frame.camera.zoom;
	let by_key: HashMap<&str, &LayoutLink> = frame
		.layout
		.links()
		.iter()
		.map(|l| (l.key.as_str(), l))
		.collect();

	ctx.set_line_width(3.0 / k);
	ctx.set_stroke_style_str("rgba(255, 214, 102, 0.6)");
	for key in highlights.keys() {
		let Some((a, b)) = by_key.get(key).and_then(|l| frame.layout.resolve_link(l)) else {
			continue;
		};
		ctx.begin_path();
		ctx.move_to(a.x, a.y);
		ctx.line_to(b.x, b.y);
		ctx.stroke();
	}

	for particle in particles.iter() {
		let Some((a, b)) = by_key
			.get(particle.edge_key.as_str())
			.and_then(|l| frame.layout.resolve_link(l))
		else {
			continue;
		};
		let t = particle.progress(frame.now_ms);
		let (x, y) = (a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t);
		let (size, color) = match particle.kind {
			ParticleKind::Spark => (2.0, "rgba(255, 240, 200, 0.9)"),
			ParticleKind::Pulse => (3.5, "rgba(120, 220, 255, 0.85)"),
			ParticleKind::Burst => (5.0 * (1.0 - t) + 1.0, "rgba(255, 140, 90, 0.8)"),
		};
		ctx.begin_path();
		let _ = ctx.arc(x, y, size / k, 0.0, 2.0 * PI);
		ctx.set_fill_style_str(color);
		ctx.fill();
	}
}
