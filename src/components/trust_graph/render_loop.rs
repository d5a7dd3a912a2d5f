//! Frame scheduling: full rate while something moves, throttled when idle.
//!
//! Each scheduled tick renders one frame and then decides how to wait for the
//! next one. While anything animates (or shortly after it stopped) the loop
//! rides vsync; otherwise it sleeps on a timer at the idle frame rate before
//! asking for the next vsync. [`RenderLoop::wake_up`] cuts an idle sleep short.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use log::{debug, info, trace};

use super::camera::CameraSystem;
use super::config::RenderConfig;
use super::fx::{FlashOverlay, FxLayer};
use super::host::{FrameHandle, FrameHost, RunEpoch, TimerHandle};
use super::types::{Camera, Layout, LayoutSlot, QualityTier, Viewport};

pub const BACKGROUND: &str = "#0f1424";

/// Timer period standing in for vsync when the host refuses frames.
const FALLBACK_FRAME_MS: f64 = 1000.0 / 60.0;

/// The drawing operations the loop itself performs; content drawing belongs
/// to the draw callbacks.
pub trait DrawSurface {
	/// Back to untransformed screen space.
	fn reset_transform(&self);
	fn clear(&self, width: f64, height: f64);
	fn fill_background(&self, color: &str, width: f64, height: f64);
	fn apply_camera(&self, camera: &Camera);
	fn paint_flash(&self, width: f64, height: f64, strength: f64);
}

/// Identity of the canvas elements behind a surface pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceKey(pub u64);

pub trait SurfaceProvider {
	type Surface: DrawSurface;
	/// Changes whenever a canvas element is replaced; `None` while unmounted.
	fn surface_key(&self) -> Option<SurfaceKey>;
	/// Looks up the main and FX drawing contexts.
	fn acquire(&self) -> Option<(Self::Surface, Self::Surface)>;
	fn size(&self) -> Viewport;
}

/// What a draw callback gets for one frame.
pub struct FrameContext<'a, S> {
	pub surface: &'a S,
	pub camera: Camera,
	pub layout: &'a Layout,
	pub quality: QualityTier,
	pub viewport: Viewport,
	pub now_ms: f64,
}

type DrawFn<S> = Box<dyn FnMut(&FrameContext<'_, S>)>;

/// Injected behaviour, called in a fixed order each frame.
pub struct RenderHooks<S> {
	pub is_animating: Option<Box<dyn Fn() -> bool>>,
	/// Runs before drawing with the live layout; physics ticks here.
	pub before_draw: Option<Box<dyn FnMut(&mut Layout, f64)>>,
	pub draw_base: Option<DrawFn<S>>,
	pub draw_fx: Option<DrawFn<S>>,
	pub fx_layers: Vec<Box<dyn FxLayer>>,
}

impl<S> Default for RenderHooks<S> {
	fn default() -> Self {
		Self {
			is_animating: None,
			before_draw: None,
			draw_base: None,
			draw_fx: None,
			fx_layers: Vec::new(),
		}
	}
}

struct CachedSurfaces<S> {
	key: SurfaceKey,
	main: Rc<S>,
	fx: Rc<S>,
}

struct LoopState<S> {
	running: bool,
	frame: Option<FrameHandle>,
	idle_timer: Option<TimerHandle>,
	last_active_ms: f64,
	cached: Option<CachedSurfaces<S>>,
	flash: FlashOverlay,
	frames_rendered: usize,
	acquisitions: usize,
}

struct Shared<P: SurfaceProvider> {
	host: Rc<dyn FrameHost>,
	provider: P,
	config: RenderConfig,
	camera: CameraSystem,
	layout: LayoutSlot,
	quality: Cell<QualityTier>,
	epoch: RunEpoch,
	state: RefCell<LoopState<P::Surface>>,
	hooks: RefCell<RenderHooks<P::Surface>>,
}

pub struct RenderLoop<P: SurfaceProvider> {
	shared: Rc<Shared<P>>,
}

impl<P: SurfaceProvider> Clone for RenderLoop<P> {
	fn clone(&self) -> Self {
		Self {
			shared: self.shared.clone(),
		}
	}
}

impl<P: SurfaceProvider + 'static> RenderLoop<P> {
	pub fn new(
		host: Rc<dyn FrameHost>,
		provider: P,
		config: RenderConfig,
		camera: CameraSystem,
		layout: LayoutSlot,
		quality: QualityTier,
	) -> Self {
		Self {
			shared: Rc::new(Shared {
				host,
				provider,
				config,
				camera,
				layout,
				quality: Cell::new(quality),
				epoch: RunEpoch::new(),
				state: RefCell::new(LoopState {
					running: false,
					frame: None,
					idle_timer: None,
					last_active_ms: f64::NEG_INFINITY,
					cached: None,
					flash: FlashOverlay::default(),
					frames_rendered: 0,
					acquisitions: 0,
				}),
				hooks: RefCell::new(RenderHooks::default()),
			}),
		}
	}

	pub fn set_is_animating(&self, f: impl Fn() -> bool + 'static) {
		self.shared.hooks.borrow_mut().is_animating = Some(Box::new(f));
	}

	pub fn set_before_draw(&self, f: impl FnMut(&mut Layout, f64) + 'static) {
		self.shared.hooks.borrow_mut().before_draw = Some(Box::new(f));
	}

	pub fn set_draw_base(&self, f: impl FnMut(&FrameContext<'_, P::Surface>) + 'static) {
		self.shared.hooks.borrow_mut().draw_base = Some(Box::new(f));
	}

	pub fn set_draw_fx(&self, f: impl FnMut(&FrameContext<'_, P::Surface>) + 'static) {
		self.shared.hooks.borrow_mut().draw_fx = Some(Box::new(f));
	}

	pub fn add_fx_layer(&self, layer: impl FxLayer + 'static) {
		self.shared.hooks.borrow_mut().fx_layers.push(Box::new(layer));
	}

	pub fn set_quality(&self, quality: QualityTier) {
		self.shared.quality.set(quality);
	}

	pub fn is_running(&self) -> bool {
		self.shared.state.borrow().running
	}

	/// True while the loop is sleeping on the idle timer.
	#[cfg(test)]
	pub fn is_idle(&self) -> bool {
		self.shared.state.borrow().idle_timer.is_some()
	}

	pub fn frames_rendered(&self) -> usize {
		self.shared.state.borrow().frames_rendered
	}

	/// How many times drawing contexts were looked up.
	#[cfg(test)]
	pub fn surface_acquisitions(&self) -> usize {
		self.shared.state.borrow().acquisitions
	}

	#[cfg(test)]
	pub fn flash_strength(&self) -> f64 {
		self.shared.state.borrow().flash.strength()
	}

	/// Starts the loop unless it is already running.
	pub fn ensure_render_loop(&self) {
		let now = self.shared.host.now();
		{
			let mut state = self.shared.state.borrow_mut();
			if state.running {
				return;
			}
			state.running = true;
			state.last_active_ms = now;
		}
		self.shared.epoch.bump();
		info!("trust-graph: render loop started");
		Shared::request_frame(&self.shared);
	}

	/// Stops the loop, cancelling both the pending frame and the idle timer.
	pub fn stop_render_loop(&self) {
		let (frame, timer) = {
			let mut state = self.shared.state.borrow_mut();
			if !state.running {
				return;
			}
			state.running = false;
			(state.frame.take(), state.idle_timer.take())
		};
		self.shared.epoch.bump();
		if let Some(frame) = frame {
			self.shared.host.cancel_frame(frame);
		}
		if let Some(timer) = timer {
			self.shared.host.clear_timeout(timer);
		}
		info!("trust-graph: render loop stopped");
	}

	/// Marks activity and leaves idle throttling immediately.
	pub fn wake_up(&self) {
		self.shared.state.borrow_mut().last_active_ms = self.shared.host.now();
		Shared::escalate(&self.shared);
	}

	/// Paints a frame right now, outside the schedule, and nudges an idle
	/// loop back to full rate.
	pub fn render_once(&self, now_ms: Option<f64>) -> bool {
		let now = self.shared.host.now();
		self.shared.state.borrow_mut().last_active_ms = now;
		let painted = self.shared.render_frame(now_ms.unwrap_or(now));
		Shared::escalate(&self.shared);
		painted
	}

	pub fn trigger_flash(&self, strength: f64) {
		self.shared.state.borrow_mut().flash.trigger(strength);
		self.wake_up();
	}
}

impl<P: SurfaceProvider + 'static> Shared<P> {
	fn request_frame(this: &Rc<Self>) {
		if this.state.borrow().frame.is_some() {
			return;
		}
		let token = this.epoch.current();
		let weak: Weak<Self> = Rc::downgrade(this);
		let handle = this.host.request_frame(Box::new(move |ts| {
			if let Some(shared) = weak.upgrade() {
				Shared::on_frame(&shared, token, ts);
			}
		}));
		match handle {
			Some(handle) => this.state.borrow_mut().frame = Some(handle),
			// no vsync available: paint from a timer instead
			None => Shared::arm_timer(this, FALLBACK_FRAME_MS, true),
		}
	}

	fn on_frame(this: &Rc<Self>, token: u64, ts: f64) {
		this.state.borrow_mut().frame = None;
		if !this.epoch.is_current(token) || !this.state.borrow().running {
			return;
		}
		this.render_frame(ts);
		Shared::schedule_next(this);
	}

	fn schedule_next(this: &Rc<Self>) {
		let now = this.host.now();
		if this.is_animating_now() {
			this.state.borrow_mut().last_active_ms = now;
			Shared::request_frame(this);
			return;
		}
		let since_active = now - this.state.borrow().last_active_ms;
		if since_active < this.config.active_hold_ms {
			Shared::request_frame(this);
			return;
		}

		let interval = 1000.0 / this.config.idle_fps.max(1.0);
		Shared::arm_timer(this, interval, false);
		trace!("trust-graph: idle, next frame in {:.0}ms", interval);
	}

	/// Sleeps `ms`, then either asks for a vsync frame or, when `paint` is
	/// set, renders directly from the timer.
	fn arm_timer(this: &Rc<Self>, ms: f64, paint: bool) {
		if this.state.borrow().idle_timer.is_some() {
			return;
		}
		let token = this.epoch.current();
		let weak: Weak<Self> = Rc::downgrade(this);
		let timer = this.host.set_timeout(
			Box::new(move || {
				let Some(shared) = weak.upgrade() else {
					return;
				};
				shared.state.borrow_mut().idle_timer = None;
				if !shared.epoch.is_current(token) || !shared.state.borrow().running {
					return;
				}
				if paint {
					shared.render_frame(shared.host.now());
					Shared::schedule_next(&shared);
				} else {
					Shared::request_frame(&shared);
				}
			}),
			ms,
		);
		this.state.borrow_mut().idle_timer = Some(timer);
	}

	/// Swaps a pending idle timer for an immediate vsync request.
	fn escalate(this: &Rc<Self>) {
		let timer = {
			let mut state = this.state.borrow_mut();
			if !state.running {
				return;
			}
			state.idle_timer.take()
		};
		if let Some(timer) = timer {
			this.host.clear_timeout(timer);
			debug!("trust-graph: woken from idle");
		}
		Shared::request_frame(this);
	}

	fn is_animating_now(&self) -> bool {
		if self.config.deterministic {
			return true;
		}
		if self.state.borrow().flash.is_active() {
			return true;
		}
		let Ok(hooks) = self.hooks.try_borrow() else {
			return true;
		};
		hooks.is_animating.as_ref().is_some_and(|f| f())
			|| hooks.fx_layers.iter().any(|layer| layer.active_count() > 0)
	}

	fn surfaces(&self) -> Option<(Rc<P::Surface>, Rc<P::Surface>)> {
		let key = self.provider.surface_key()?;
		let mut state = self.state.borrow_mut();
		if let Some(cached) = state.cached.as_ref().filter(|c| c.key == key) {
			return Some((cached.main.clone(), cached.fx.clone()));
		}
		state.cached = None;
		let (main, fx) = self.provider.acquire()?;
		state.acquisitions += 1;
		let (main, fx) = (Rc::new(main), Rc::new(fx));
		state.cached = Some(CachedSurfaces {
			key,
			main: main.clone(),
			fx: fx.clone(),
		});
		Some((main, fx))
	}

	/// Draws one frame. Returns `false` when it was skipped.
	fn render_frame(&self, now_ms: f64) -> bool {
		let Ok(mut hooks) = self.hooks.try_borrow_mut() else {
			trace!("trust-graph: nested frame request ignored");
			return false;
		};
		let Some((main, fx)) = self.surfaces() else {
			return false;
		};
		let Ok(mut slot) = self.layout.try_borrow_mut() else {
			return false;
		};
		let Some(layout) = slot.as_mut() else {
			return false;
		};

		for layer in hooks.fx_layers.iter_mut() {
			layer.prune(now_ms);
		}
		if let Some(before_draw) = hooks.before_draw.as_mut() {
			before_draw(layout, now_ms);
		}
		let layout: &Layout = layout;

		let viewport = self.provider.size();
		let camera = self.shared_camera();
		for surface in [&main, &fx] {
			surface.reset_transform();
			surface.clear(viewport.width, viewport.height);
		}
		main.fill_background(BACKGROUND, viewport.width, viewport.height);

		main.apply_camera(&camera);
		fx.apply_camera(&camera);
		let quality = self.quality.get();
		if let Some(draw_base) = hooks.draw_base.as_mut() {
			draw_base(&FrameContext {
				surface: main.as_ref(),
				camera,
				layout,
				quality,
				viewport,
				now_ms,
			});
		}
		if let Some(draw_fx) = hooks.draw_fx.as_mut() {
			draw_fx(&FrameContext {
				surface: fx.as_ref(),
				camera,
				layout,
				quality,
				viewport,
				now_ms,
			});
		}
		main.reset_transform();
		fx.reset_transform();

		let mut state = self.state.borrow_mut();
		if state.flash.is_active() {
			fx.paint_flash(viewport.width, viewport.height, state.flash.strength());
			state.flash.decay(self.config.flash_decay);
		}
		state.frames_rendered += 1;
		true
	}

	fn shared_camera(&self) -> Camera {
		self.camera.camera()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::components::trust_graph::config::CameraConfig;
	use crate::components::trust_graph::fx::EdgeHighlights;
	use crate::components::trust_graph::host::ManualHost;
	use crate::components::trust_graph::types::LayoutNode;

	type Log = Rc<RefCell<Vec<String>>>;

	struct RecordingSurface {
		name: &'static str,
		log: Log,
	}

	impl RecordingSurface {
		fn record(&self, op: &str) {
			self.log.borrow_mut().push(format!("{}:{}", self.name, op));
		}
	}

	impl DrawSurface for RecordingSurface {
		fn reset_transform(&self) {
			self.record("reset");
		}
		fn clear(&self, _w: f64, _h: f64) {
			self.record("clear");
		}
		fn fill_background(&self, _color: &str, _w: f64, _h: f64) {
			self.record("background");
		}
		fn apply_camera(&self, _camera: &Camera) {
			self.record("camera");
		}
		fn paint_flash(&self, _w: f64, _h: f64, strength: f64) {
			self.record(&format!("flash {strength:.2}"));
		}
	}

	struct FakeCanvas {
		key: Rc<Cell<Option<u64>>>,
		log: Log,
	}

	impl SurfaceProvider for FakeCanvas {
		type Surface = RecordingSurface;

		fn surface_key(&self) -> Option<SurfaceKey> {
			self.key.get().map(SurfaceKey)
		}

		fn acquire(&self) -> Option<(RecordingSurface, RecordingSurface)> {
			Some((
				RecordingSurface {
					name: "main",
					log: self.log.clone(),
				},
				RecordingSurface {
					name: "fx",
					log: self.log.clone(),
				},
			))
		}

		fn size(&self) -> Viewport {
			Viewport::new(800.0, 600.0)
		}
	}

	struct Rig {
		host: ManualHost,
		render: RenderLoop<FakeCanvas>,
		key: Rc<Cell<Option<u64>>>,
		log: Log,
		layout: LayoutSlot,
	}

	fn rig(config: RenderConfig) -> Rig {
		let host = ManualHost::new();
		let log = Log::default();
		let key = Rc::new(Cell::new(Some(1)));
		let layout: LayoutSlot = Rc::new(RefCell::new(Some(Layout::new(
			vec![LayoutNode::new("a", 0.0, 0.0)],
			vec![],
		))));
		let camera = CameraSystem::new(
			Rc::new(host.clone()),
			CameraConfig::default(),
			Viewport::new(800.0, 600.0),
		);
		let render = RenderLoop::new(
			Rc::new(host.clone()),
			FakeCanvas {
				key: key.clone(),
				log: log.clone(),
			},
			config,
			camera,
			layout.clone(),
			QualityTier::Med,
		);
		Rig {
			host,
			render,
			key,
			log,
			layout,
		}
	}

	fn frames_over(rig: &Rig, ms: f64) -> usize {
		let before = rig.render.frames_rendered();
		rig.host.advance(ms);
		rig.render.frames_rendered() - before
	}

	#[test]
	fn idle_loop_throttles_to_idle_rate() {
		let rig = rig(RenderConfig::default());
		rig.render.ensure_render_loop();
		rig.host.advance(1_050.0);
		assert!(rig.render.is_idle());

		let frames = frames_over(&rig, 2_000.0);
		// 12 fps nominal; vsync alignment after each timer shaves a little
		assert!((16..=25).contains(&frames), "idle frames: {frames}");
	}

	#[test]
	fn animating_loop_rides_vsync() {
		let rig = rig(RenderConfig::default());
		rig.render.set_is_animating(|| true);
		rig.render.ensure_render_loop();
		let frames = frames_over(&rig, 2_000.0);
		assert!((118..=121).contains(&frames), "active frames: {frames}");
		assert!(!rig.render.is_idle());
	}

	#[test]
	fn active_fx_keeps_full_rate_until_it_expires() {
		let rig = rig(RenderConfig::default());
		let edges = Rc::new(RefCell::new(EdgeHighlights::new()));
		edges.borrow_mut().activate("a->b", 1_000.0);
		rig.render.add_fx_layer(edges.clone());
		rig.render.ensure_render_loop();

		assert!(frames_over(&rig, 900.0) > 50);
		rig.host.advance(1_050.0);
		assert_eq!(edges.borrow().active_count(), 0);
		assert!(rig.render.is_idle());
	}

	#[test]
	fn hold_window_delays_the_idle_fallback() {
		let rig = rig(RenderConfig::default());
		rig.render.ensure_render_loop();
		rig.host.advance(200.0);
		assert!(!rig.render.is_idle());
		rig.host.advance(250.0);
		assert!(rig.render.is_idle());
	}

	#[test]
	fn wake_up_leaves_idle_immediately() {
		let rig = rig(RenderConfig::default());
		rig.render.ensure_render_loop();
		rig.host.advance(1_050.0);
		assert!(rig.render.is_idle());

		rig.render.wake_up();
		assert!(!rig.render.is_idle());
		assert_eq!(rig.host.pending_timers(), 0);
		assert_eq!(rig.host.pending_frames(), 1);
		// stays at full rate for the hold window
		assert!(frames_over(&rig, 250.0) >= 12);
	}

	#[test]
	fn render_once_paints_now_and_nudges_idle_loop() {
		let rig = rig(RenderConfig::default());
		rig.render.ensure_render_loop();
		rig.host.advance(1_050.0);
		let before = rig.render.frames_rendered();

		assert!(rig.render.render_once(None));
		assert_eq!(rig.render.frames_rendered(), before + 1);
		assert!(!rig.render.is_idle());
		assert_eq!(rig.host.pending_frames(), 1);
	}

	#[test]
	fn stop_cancels_frame_and_timer() {
		let rig = rig(RenderConfig::default());
		rig.render.ensure_render_loop();
		rig.host.advance(1_050.0);
		assert_eq!(rig.host.pending_timers(), 1);

		rig.render.stop_render_loop();
		assert_eq!(rig.host.pending_timers(), 0);
		assert_eq!(rig.host.pending_frames(), 0);
		assert_eq!(frames_over(&rig, 1_000.0), 0);

		rig.render.ensure_render_loop();
		rig.render.ensure_render_loop();
		assert_eq!(rig.host.pending_frames(), 1);
	}

	#[test]
	fn refused_frames_fall_back_to_timer_painting() {
		let rig = rig(RenderConfig::default());
		rig.host.set_refuse_frames(true);
		rig.render.set_is_animating(|| true);
		rig.render.ensure_render_loop();
		assert_eq!(rig.host.pending_frames(), 0);
		assert_eq!(rig.host.pending_timers(), 1);

		let frames = frames_over(&rig, 1_000.0);
		assert!((55..=61).contains(&frames), "timer frames: {frames}");

		// back on vsync once the host grants frames again
		rig.host.set_refuse_frames(false);
		rig.host.advance(20.0);
		assert_eq!(rig.host.pending_frames(), 1);
		assert_eq!(rig.host.pending_timers(), 0);
	}

	#[test]
	fn frame_clears_in_screen_space_before_drawing_content() {
		let rig = rig(RenderConfig::default());
		let log = rig.log.clone();
		let l = log.clone();
		rig.render.add_fx_layer(Rc::new(RefCell::new(EdgeHighlights::new())));
		rig.render.set_before_draw(move |_, _| l.borrow_mut().push("before_draw".into()));
		let l = log.clone();
		rig.render.set_draw_base(move |ctx| {
			assert_eq!(ctx.layout.nodes().len(), 1);
			l.borrow_mut().push("draw_base".into());
		});
		let l = log.clone();
		rig.render.set_draw_fx(move |_| l.borrow_mut().push("draw_fx".into()));
		rig.render.trigger_flash(0.5);
		log.borrow_mut().clear();

		assert!(rig.render.render_once(Some(0.0)));
		let expected = [
			"before_draw",
			"main:reset",
			"main:clear",
			"fx:reset",
			"fx:clear",
			"main:background",
			"main:camera",
			"fx:camera",
			"draw_base",
			"draw_fx",
			"main:reset",
			"fx:reset",
			"fx:flash 0.50",
		];
		assert_eq!(*log.borrow(), expected);
		assert!((rig.render.flash_strength() - 0.45).abs() < 1e-12);
	}

	#[test]
	fn contexts_are_looked_up_only_when_the_canvas_changes() {
		let rig = rig(RenderConfig::default());
		for t in 0..3 {
			rig.render.render_once(Some(t as f64));
		}
		assert_eq!(rig.render.surface_acquisitions(), 1);
		rig.key.set(Some(2));
		rig.render.render_once(Some(4.0));
		assert_eq!(rig.render.surface_acquisitions(), 2);
	}

	#[test]
	fn missing_canvas_or_layout_skips_the_frame() {
		let rig = rig(RenderConfig::default());
		rig.key.set(None);
		assert!(!rig.render.render_once(None));
		rig.key.set(Some(1));
		*rig.layout.borrow_mut() = None;
		assert!(!rig.render.render_once(None));
		assert!(rig.log.borrow().is_empty());
		assert_eq!(rig.render.frames_rendered(), 0);
	}

	#[test]
	fn deterministic_mode_always_animates() {
		let rig = rig(RenderConfig {
			deterministic: true,
			..RenderConfig::default()
		});
		rig.render.ensure_render_loop();
		rig.host.advance(2_000.0);
		assert!(!rig.render.is_idle());
	}
}
