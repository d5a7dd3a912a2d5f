//! Pan/zoom state, coordinate transforms and gesture classification.
//!
//! `screen = world * zoom + pan`. Wheel input is coalesced into one transform
//! update per animation frame; the change callback runs after that update.

use std::cell::RefCell;
use std::rc::Rc;

use super::config::CameraConfig;
use super::host::{FrameHandle, FrameHost};
use super::types::{Camera, Layout, Viewport};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerInput {
	pub client_x: f64,
	pub client_y: f64,
	pub pointer_id: i32,
}

impl PointerInput {
	pub fn at(client_x: f64, client_y: f64) -> Self {
		Self {
			client_x,
			client_y,
			pointer_id: 1,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WheelInput {
	pub client_x: f64,
	pub client_y: f64,
	pub delta_y: f64,
}

/// Tracks the furthest a pointer strayed from where it went down.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClickTracker {
	start_x: f64,
	start_y: f64,
	max_dist_sq: f64,
}

impl ClickTracker {
	pub fn new(x: f64, y: f64) -> Self {
		Self {
			start_x: x,
			start_y: y,
			max_dist_sq: 0.0,
		}
	}

	pub fn track(&mut self, x: f64, y: f64) {
		let (dx, dy) = (x - self.start_x, y - self.start_y);
		self.max_dist_sq = self.max_dist_sq.max(dx * dx + dy * dy);
	}

	pub fn is_click(&self, threshold_px: f64) -> bool {
		self.max_dist_sq < threshold_px * threshold_px
	}
}

#[derive(Clone, Copy, Debug)]
struct PanGesture {
	pointer_id: i32,
	click: ClickTracker,
	start_sx: f64,
	start_sy: f64,
	pan_start: (f64, f64),
}

#[derive(Clone, Copy, Debug)]
struct WheelBatch {
	factor: f64,
	anchor_sx: f64,
	anchor_sy: f64,
	/// `None` when the host refused the frame and the batch flushes inline.
	frame: Option<FrameHandle>,
}

type ChangeCallback = Rc<dyn Fn(Camera)>;

struct CameraState {
	camera: Camera,
	config: CameraConfig,
	viewport: Viewport,
	origin: (f64, f64),
	gesture: Option<PanGesture>,
	wheel: Option<WheelBatch>,
	on_changed: Option<ChangeCallback>,
}

/// Shared handle; clones observe the same camera.
#[derive(Clone)]
pub struct CameraSystem {
	state: Rc<RefCell<CameraState>>,
	host: Rc<dyn FrameHost>,
}

impl CameraSystem {
	pub fn new(host: Rc<dyn FrameHost>, config: CameraConfig, viewport: Viewport) -> Self {
		Self {
			state: Rc::new(RefCell::new(CameraState {
				camera: Camera::default(),
				config,
				viewport,
				origin: (0.0, 0.0),
				gesture: None,
				wheel: None,
				on_changed: None,
			})),
			host,
		}
	}

	pub fn camera(&self) -> Camera {
		self.state.borrow().camera
	}

	#[cfg(test)]
	pub fn set_camera(&self, camera: Camera) {
		let mut state = self.state.borrow_mut();
		let zoom = camera.zoom.clamp(state.config.min_zoom, state.config.max_zoom);
		state.camera = Camera { zoom, ..camera };
	}

	pub fn viewport(&self) -> Viewport {
		self.state.borrow().viewport
	}

	pub fn set_viewport(&self, width: f64, height: f64) {
		self.state.borrow_mut().viewport = Viewport::new(width, height);
	}

	/// Client-space position of the host element's top-left corner.
	pub fn set_host_origin(&self, left: f64, top: f64) {
		self.state.borrow_mut().origin = (left, top);
	}

	pub fn set_on_camera_changed(&self, cb: impl Fn(Camera) + 'static) {
		self.state.borrow_mut().on_changed = Some(Rc::new(cb));
	}

	#[cfg(test)]
	pub fn world_to_screen(&self, x: f64, y: f64) -> (f64, f64) {
		let c = self.camera();
		(x * c.zoom + c.pan_x, y * c.zoom + c.pan_y)
	}

	pub fn screen_to_world(&self, x: f64, y: f64) -> (f64, f64) {
		let c = self.camera();
		((x - c.pan_x) / c.zoom, (y - c.pan_y) / c.zoom)
	}

	pub fn client_to_screen(&self, client_x: f64, client_y: f64) -> (f64, f64) {
		let (left, top) = self.state.borrow().origin;
		(client_x - left, client_y - top)
	}

	pub fn client_to_world(&self, client_x: f64, client_y: f64) -> (f64, f64) {
		let (sx, sy) = self.client_to_screen(client_x, client_y);
		self.screen_to_world(sx, sy)
	}

	/// Centres content that fits the viewport; otherwise keeps it covering
	/// the viewport so it cannot be scrolled entirely away.
	pub fn clamp_camera_pan(&self, layout: &Layout) {
		let Some(bounds) = layout.bounds() else {
			return;
		};
		let mut state = self.state.borrow_mut();
		let zoom = state.camera.zoom;
		let vp = state.viewport;
		state.camera.pan_x = clamp_axis(state.camera.pan_x, bounds.min_x, bounds.max_x, zoom, vp.width);
		state.camera.pan_y = clamp_axis(state.camera.pan_y, bounds.min_y, bounds.max_y, zoom, vp.height);
	}

	/// Zooms so all nodes fit with `padding` screen pixels to spare, then centres.
	pub fn zoom_to_fit(&self, layout: &Layout, padding: f64) {
		let Some(bounds) = layout.bounds() else {
			return;
		};
		{
			let mut state = self.state.borrow_mut();
			let vp = state.viewport;
			let fit_x = (vp.width - 2.0 * padding).max(1.0) / bounds.width().max(1.0);
			let fit_y = (vp.height - 2.0 * padding).max(1.0) / bounds.height().max(1.0);
			state.camera.zoom = fit_x.min(fit_y).clamp(state.config.min_zoom, state.config.max_zoom);
		}
		self.clamp_camera_pan(layout);
	}

	pub fn is_panning(&self) -> bool {
		self.state.borrow().gesture.is_some()
	}

	/// Starts a pan gesture. Returns `true` when the gesture was accepted.
	pub fn on_pointer_down(&self, input: PointerInput) -> bool {
		let (sx, sy) = self.client_to_screen(input.client_x, input.client_y);
		let mut state = self.state.borrow_mut();
		if state.gesture.is_some() {
			return false;
		}
		let pan_start = (state.camera.pan_x, state.camera.pan_y);
		state.gesture = Some(PanGesture {
			pointer_id: input.pointer_id,
			click: ClickTracker::new(sx, sy),
			start_sx: sx,
			start_sy: sy,
			pan_start,
		});
		true
	}

	/// Pans with the active gesture. Returns `true` when the camera moved.
	pub fn on_pointer_move(&self, input: PointerInput) -> bool {
		let (sx, sy) = self.client_to_screen(input.client_x, input.client_y);
		let mut state = self.state.borrow_mut();
		let Some(gesture) = state.gesture.as_mut() else {
			return false;
		};
		if gesture.pointer_id != input.pointer_id {
			return false;
		}
		gesture.click.track(sx, sy);
		let (px, py) = (
			gesture.pan_start.0 + (sx - gesture.start_sx),
			gesture.pan_start.1 + (sy - gesture.start_sy),
		);
		let moved = state.camera.pan_x != px || state.camera.pan_y != py;
		state.camera.pan_x = px;
		state.camera.pan_y = py;
		moved
	}

	/// Ends the gesture. Returns `true` when it never travelled past the
	/// click threshold.
	pub fn on_pointer_up(&self, input: PointerInput) -> bool {
		let (sx, sy) = self.client_to_screen(input.client_x, input.client_y);
		let mut state = self.state.borrow_mut();
		let Some(mut gesture) = state.gesture.take() else {
			return false;
		};
		gesture.click.track(sx, sy);
		gesture.click.is_click(state.config.click_threshold_px)
	}

	/// Abandons any pan without classifying it.
	pub fn cancel_gesture(&self) {
		self.state.borrow_mut().gesture = None;
	}

	/// Queues a zoom step around the pointer; applied once at the next frame.
	pub fn on_wheel(&self, input: WheelInput) {
		let (sx, sy) = self.client_to_screen(input.client_x, input.client_y);
		let mut state = self.state.borrow_mut();
		let step = (-input.delta_y * state.config.wheel_sensitivity).exp();
		if let Some(batch) = state.wheel.as_mut() {
			batch.factor *= step;
			batch.anchor_sx = sx;
			batch.anchor_sy = sy;
			return;
		}
		drop(state);

		let this = self.clone();
		let frame = self.host.request_frame(Box::new(move |_| this.flush_wheel()));
		self.state.borrow_mut().wheel = Some(WheelBatch {
			factor: step,
			anchor_sx: sx,
			anchor_sy: sy,
			frame,
		});
		if frame.is_none() {
			self.flush_wheel();
		}
	}

	#[cfg(test)]
	pub fn has_pending_wheel(&self) -> bool {
		self.state.borrow().wheel.is_some()
	}

	fn flush_wheel(&self) {
		let (camera, callback) = {
			let mut state = self.state.borrow_mut();
			let Some(batch) = state.wheel.take() else {
				return;
			};
			let old = state.camera;
			let zoom = (old.zoom * batch.factor).clamp(state.config.min_zoom, state.config.max_zoom);
			let ratio = zoom / old.zoom;
			state.camera = Camera {
				pan_x: batch.anchor_sx - (batch.anchor_sx - old.pan_x) * ratio,
				pan_y: batch.anchor_sy - (batch.anchor_sy - old.pan_y) * ratio,
				zoom,
			};
			(state.camera, state.on_changed.clone())
		};
		log::trace!("trust-graph: wheel batch applied, zoom {:.3}", camera.zoom);
		if let Some(cb) = callback {
			cb(camera);
		}
	}

	/// Cancels a pending wheel flush and drops the change callback.
	pub fn dispose(&self) {
		let mut state = self.state.borrow_mut();
		if let Some(frame) = state.wheel.take().and_then(|batch| batch.frame) {
			self.host.cancel_frame(frame);
		}
		state.gesture = None;
		state.on_changed = None;
	}
}

fn clamp_axis(pan: f64, min: f64, max: f64, zoom: f64, viewport: f64) -> f64 {
	let content = (max - min) * zoom;
	if content <= viewport {
		(viewport - content) / 2.0 - min * zoom
	} else {
		pan.clamp(viewport - max * zoom, -min * zoom)
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use proptest::prelude::*;

	use super::*;
	use crate::components::trust_graph::host::ManualHost;
	use crate::components::trust_graph::types::LayoutNode;

	fn system(host: &ManualHost) -> CameraSystem {
		CameraSystem::new(
			Rc::new(host.clone()),
			CameraConfig::default(),
			Viewport::new(800.0, 600.0),
		)
	}

	#[test]
	fn small_move_is_a_click() {
		let host = ManualHost::new();
		let camera = system(&host);
		camera.on_pointer_down(PointerInput::at(10.0, 10.0));
		camera.on_pointer_move(PointerInput::at(11.0, 11.0));
		assert!(camera.on_pointer_up(PointerInput::at(11.0, 11.0)));
	}

	#[test]
	fn three_pixel_move_is_a_drag() {
		let host = ManualHost::new();
		let camera = system(&host);
		camera.on_pointer_down(PointerInput::at(10.0, 10.0));
		camera.on_pointer_move(PointerInput::at(13.0, 10.0));
		assert!(!camera.on_pointer_up(PointerInput::at(13.0, 10.0)));
	}

	#[test]
	fn excursion_counts_even_if_pointer_returns() {
		let host = ManualHost::new();
		let camera = system(&host);
		camera.on_pointer_down(PointerInput::at(10.0, 10.0));
		camera.on_pointer_move(PointerInput::at(30.0, 10.0));
		assert!(!camera.on_pointer_up(PointerInput::at(10.0, 10.0)));
	}

	#[test]
	fn pan_follows_pointer_in_client_space() {
		let host = ManualHost::new();
		let camera = system(&host);
		camera.set_host_origin(100.0, 50.0);
		camera.on_pointer_down(PointerInput::at(200.0, 200.0));
		assert!(camera.is_panning());
		camera.on_pointer_move(PointerInput::at(230.0, 180.0));
		let c = camera.camera();
		assert_eq!((c.pan_x, c.pan_y), (30.0, -20.0));
		camera.on_pointer_up(PointerInput::at(230.0, 180.0));
		assert!(!camera.is_panning());
	}

	#[test]
	fn wheel_events_in_one_tick_flush_once() {
		let host = ManualHost::new();
		let camera = system(&host);
		let calls = Rc::new(Cell::new(0));
		let seen_zoom = Rc::new(Cell::new(0.0));
		let (c, z) = (calls.clone(), seen_zoom.clone());
		let view = camera.clone();
		camera.set_on_camera_changed(move |cam| {
			c.set(c.get() + 1);
			// the camera is already updated when the callback runs
			assert_eq!(view.camera(), cam);
			z.set(cam.zoom);
		});

		for _ in 0..3 {
			camera.on_wheel(WheelInput {
				client_x: 400.0,
				client_y: 300.0,
				delta_y: -100.0,
			});
		}
		assert_eq!(calls.get(), 0);
		assert_eq!(camera.camera().zoom, 1.0);
		assert_eq!(host.pending_frames(), 1);

		host.run_frames();
		assert_eq!(calls.get(), 1);
		let expected = (300.0 * CameraConfig::default().wheel_sensitivity).exp();
		assert!((seen_zoom.get() - expected).abs() < 1e-9);

		host.run_frames();
		assert_eq!(calls.get(), 1);
	}

	#[test]
	fn wheel_zoom_keeps_anchor_fixed() {
		let host = ManualHost::new();
		let camera = system(&host);
		let before = camera.screen_to_world(400.0, 300.0);
		camera.on_wheel(WheelInput {
			client_x: 400.0,
			client_y: 300.0,
			delta_y: 200.0,
		});
		host.run_frames();
		let after = camera.screen_to_world(400.0, 300.0);
		assert!((before.0 - after.0).abs() < 1e-9 && (before.1 - after.1).abs() < 1e-9);
	}

	#[test]
	fn wheel_applies_inline_when_frames_are_refused() {
		let host = ManualHost::new();
		host.set_refuse_frames(true);
		let camera = system(&host);
		let calls = Rc::new(Cell::new(0));
		let c = calls.clone();
		camera.set_on_camera_changed(move |_| c.set(c.get() + 1));

		camera.on_wheel(WheelInput {
			client_x: 400.0,
			client_y: 300.0,
			delta_y: -100.0,
		});
		assert!(!camera.has_pending_wheel());
		assert!(camera.camera().zoom > 1.0);
		assert_eq!(calls.get(), 1);
	}

	#[test]
	fn dispose_cancels_pending_wheel() {
		let host = ManualHost::new();
		let camera = system(&host);
		camera.on_wheel(WheelInput {
			client_x: 0.0,
			client_y: 0.0,
			delta_y: 50.0,
		});
		camera.dispose();
		camera.dispose();
		assert_eq!(host.pending_frames(), 0);
		assert_eq!(camera.camera().zoom, 1.0);
	}

	#[test]
	fn zoom_is_clamped() {
		let host = ManualHost::new();
		let camera = system(&host);
		camera.set_camera(Camera {
			pan_x: 0.0,
			pan_y: 0.0,
			zoom: 1000.0,
		});
		assert_eq!(camera.camera().zoom, CameraConfig::default().max_zoom);
	}

	#[test]
	fn small_content_is_centred() {
		let host = ManualHost::new();
		let camera = system(&host);
		let layout = Layout::new(
			vec![LayoutNode::new("a", 0.0, 0.0), LayoutNode::new("b", 200.0, 100.0)],
			vec![],
		);
		camera.clamp_camera_pan(&layout);
		let c = camera.camera();
		assert_eq!((c.pan_x, c.pan_y), ((800.0 - 200.0) / 2.0, (600.0 - 100.0) / 2.0));
	}

	#[test]
	fn large_content_cannot_leave_the_viewport() {
		let host = ManualHost::new();
		let camera = system(&host);
		let layout = Layout::new(
			vec![LayoutNode::new("a", 0.0, 0.0), LayoutNode::new("b", 2000.0, 2000.0)],
			vec![],
		);
		camera.set_camera(Camera {
			pan_x: 5000.0,
			pan_y: -9000.0,
			zoom: 1.0,
		});
		camera.clamp_camera_pan(&layout);
		let c = camera.camera();
		assert_eq!(c.pan_x, 0.0);
		assert_eq!(c.pan_y, 600.0 - 2000.0);
	}

	#[test]
	fn zoom_to_fit_shows_everything() {
		let host = ManualHost::new();
		let camera = system(&host);
		let layout = Layout::new(
			vec![LayoutNode::new("a", -500.0, -100.0), LayoutNode::new("b", 1500.0, 300.0)],
			vec![],
		);
		camera.zoom_to_fit(&layout, 20.0);
		let (x0, _) = camera.world_to_screen(-500.0, -100.0);
		let (x1, _) = camera.world_to_screen(1500.0, 300.0);
		assert!(x0 >= 19.9 && x1 <= 780.1);
	}

	proptest! {
		#[test]
		fn screen_world_round_trip(
			x in -1.0e5..1.0e5f64,
			y in -1.0e5..1.0e5f64,
			pan_x in -1.0e4..1.0e4f64,
			pan_y in -1.0e4..1.0e4f64,
			zoom in 0.1..8.0f64,
		) {
			let host = ManualHost::new();
			let camera = system(&host);
			camera.set_camera(Camera { pan_x, pan_y, zoom });
			let (sx, sy) = camera.world_to_screen(x, y);
			let (wx, wy) = camera.screen_to_world(sx, sy);
			prop_assert!((wx - x).abs() <= 1e-6 * x.abs().max(1.0));
			prop_assert!((wy - y).abs() <= 1e-6 * y.abs().max(1.0));
		}
	}
}
