//! Leptos component hosting the trust graph.
//!
//! Two stacked canvases (graph below, effects above) share one render loop.
//! Pointer and wheel events land on the top canvas and go through the
//! interaction dispatcher; the loop itself only wakes when something changed.

use std::cell::RefCell;
use std::rc::Rc;

use leptos::prelude::*;
use log::{debug, error, info};
use wasm_bindgen::prelude::*;
use web_sys::{HtmlCanvasElement, MouseEvent, PointerEvent, WheelEvent, Window};

use super::camera::{CameraSystem, PointerInput, WheelInput};
use super::config::{GraphConfig, PhysicsConfig, ViewportConfig};
use super::error::{Result, SetupError};
use super::fx::{EdgeHighlights, Particle, ParticleBuffers, ParticleKind};
use super::host::{FrameHost, RunEpoch};
use super::intensity::{InteractionHold, InteractionPhase};
use super::interaction::InteractionDispatcher;
use super::physics::PhysicsManager;
use super::picker::Picker;
use super::render::{CanvasPair, Scene, draw_base, draw_fx};
use super::render_loop::{RenderLoop, SurfaceProvider};
use super::types::{GraphData, Layout, LayoutSlot, NodeId, QualityTier, Viewport};
use super::web_host::WebHost;

const FIT_PADDING: f64 = 48.0;
const PULSE_TTL_MS: f64 = 900.0;
const HIGHLIGHT_MS: f64 = 1_200.0;
const SELECT_FLASH: f64 = 0.25;

/// How the canvases pick their CSS size.
#[derive(Clone, Copy)]
struct Sizing {
	fullscreen: bool,
	width: Option<f64>,
	height: Option<f64>,
}

impl Sizing {
	fn measure(&self, anchor: &HtmlCanvasElement, window: &Window) -> Viewport {
		let inner = |v: std::result::Result<JsValue, JsValue>, fallback: f64| {
			v.ok().and_then(|v| v.as_f64()).unwrap_or(fallback)
		};
		if self.fullscreen {
			return Viewport::new(
				inner(window.inner_width(), 800.0),
				inner(window.inner_height(), 600.0),
			);
		}
		let parent = anchor.parent_element();
		Viewport::new(
			self.width.unwrap_or_else(|| {
				parent
					.as_ref()
					.map(|p| p.client_width() as f64)
					.unwrap_or(800.0)
			}),
			self.height.unwrap_or_else(|| {
				parent
					.as_ref()
					.map(|p| p.client_height() as f64)
					.unwrap_or(600.0)
			}),
		)
	}
}

fn device_pixel_ratio(window: &Window, clamp: f64) -> f64 {
	window.device_pixel_ratio().clamp(1.0, clamp.max(1.0))
}

/// Applies a settled window size to every size-dependent part.
#[derive(Clone)]
struct Resizer {
	anchor: HtmlCanvasElement,
	sizing: Sizing,
	viewport_config: ViewportConfig,
	physics_config: PhysicsConfig,
	canvases: CanvasPair,
	camera: CameraSystem,
	physics: Rc<RefCell<PhysicsManager>>,
	render: RenderLoop<CanvasPair>,
}

impl Resizer {
	fn apply(&self) {
		let Some(window) = web_sys::window() else {
			return;
		};
		let css = self.sizing.measure(&self.anchor, &window);
		let dpr = device_pixel_ratio(&window, self.viewport_config.dpr_clamp);
		self.canvases.resize(css, dpr);
		self.camera.set_viewport(css.width, css.height);
		self.physics.borrow_mut().update_viewport(
			css.width,
			css.height,
			self.physics_config.viewport_reheat_alpha,
		);
		self.render.wake_up();
		debug!(
			"trust-graph: resized to {}x{} @{dpr}",
			css.width, css.height
		);
	}
}

struct Runtime {
	fx_canvas: HtmlCanvasElement,
	camera: CameraSystem,
	render: RenderLoop<CanvasPair>,
	physics: Rc<RefCell<PhysicsManager>>,
	hold: InteractionHold,
	dispatcher: Rc<RefCell<InteractionDispatcher>>,
	layout: LayoutSlot,
	on_resize: Closure<dyn FnMut()>,
	on_visibility: Closure<dyn FnMut()>,
}

impl Runtime {
	/// Swaps in a new graph; physics and picking rebuild on the next use.
	fn replace_graph(&self, data: &GraphData) {
		let viewport = self.camera.viewport();
		let layout = Layout::from_graph_data(data, viewport.width, viewport.height);
		self.camera.zoom_to_fit(&layout, FIT_PADDING);
		*self.layout.borrow_mut() = Some(layout);
		info!(
			"trust-graph: graph replaced ({} participants, {} trustlines)",
			data.nodes.len(),
			data.links.len()
		);
		self.render.wake_up();
	}

	fn set_physics_enabled(&self, enabled: bool) {
		{
			let mut physics = self.physics.borrow_mut();
			if physics.is_enabled() == enabled {
				return;
			}
			physics.set_enabled(enabled);
		}
		info!("trust-graph: physics {}", if enabled { "resumed" } else { "frozen" });
		self.render.wake_up();
	}

	fn set_quality(&self, quality: QualityTier) {
		self.physics.borrow_mut().set_quality(quality);
		self.render.set_quality(quality);
		self.render.wake_up();
	}
}

impl Drop for Runtime {
	fn drop(&mut self) {
		if let Some(window) = web_sys::window() {
			let _ = window
				.remove_event_listener_with_callback("resize", self.on_resize.as_ref().unchecked_ref());
			if let Some(document) = window.document() {
				let _ = document.remove_event_listener_with_callback(
					"visibilitychange",
					self.on_visibility.as_ref().unchecked_ref(),
				);
			}
		}
		self.render.stop_render_loop();
		self.hold.dispose();
		self.camera.dispose();
		debug!(
			"trust-graph: torn down after {} frames",
			self.render.frames_rendered()
		);
	}
}

/// Reactive outputs of the canvas.
#[derive(Clone, Copy)]
struct Outputs {
	set_selected: WriteSignal<Option<NodeId>>,
	set_detail: WriteSignal<Option<NodeId>>,
}

fn setup(
	main: HtmlCanvasElement,
	fx: HtmlCanvasElement,
	data: &GraphData,
	config: &GraphConfig,
	sizing: Sizing,
	outputs: Outputs,
) -> Result<Runtime> {
	let window = web_sys::window().ok_or(SetupError::MissingWindow)?;
	let web_host = WebHost::new()?;
	let host: Rc<dyn FrameHost> = Rc::new(web_host);

	let css = sizing.measure(&main, &window);
	let canvases = CanvasPair::new();
	canvases.mount(
		main.clone(),
		fx.clone(),
		css,
		device_pixel_ratio(&window, config.viewport.dpr_clamp),
	);
	if canvases.acquire().is_none() {
		return Err(SetupError::MissingContext("trust-graph-main/fx"));
	}

	let layout = Layout::from_graph_data(data, css.width, css.height);
	let camera = CameraSystem::new(host.clone(), config.camera, css);
	camera.zoom_to_fit(&layout, FIT_PADDING);
	let layout: LayoutSlot = Rc::new(RefCell::new(Some(layout)));

	let physics = Rc::new(RefCell::new(PhysicsManager::new(
		config.physics.enabled,
		config.physics.quality,
		css,
	)));
	let hold = InteractionHold::new(host.clone(), config.interaction);
	let render = RenderLoop::new(
		host.clone(),
		canvases.clone(),
		config.render,
		camera.clone(),
		layout.clone(),
		config.physics.quality,
	);

	let scene = Rc::new(RefCell::new(Scene::default()));
	let particles = Rc::new(RefCell::new(ParticleBuffers::new(config.render.particle_cap)));
	let highlights = Rc::new(RefCell::new(EdgeHighlights::new()));

	{
		let (physics, hold, host) = (physics.clone(), hold.clone(), host.clone());
		render.set_is_animating(move || {
			let now = host.now();
			hold.is_interacting_at(now)
				|| hold.phase_at(now) != InteractionPhase::Idle
				|| physics.borrow().is_running()
		});
	}
	{
		let physics = physics.clone();
		render.set_before_draw(move |layout, _| {
			let mut physics = physics.borrow_mut();
			physics.ensure_for_layout(layout);
			physics.tick_and_sync_to_layout(layout);
		});
	}
	{
		let (scene, hold) = (scene.clone(), hold.clone());
		render.set_draw_base(move |frame| draw_base(frame, &scene.borrow(), hold.intensity()));
	}
	{
		let (particles, highlights) = (particles.clone(), highlights.clone());
		render.set_draw_fx(move |frame| {
			draw_fx(frame, &particles.borrow(), &highlights.borrow())
		});
	}
	render.add_fx_layer(particles.clone());
	render.add_fx_layer(highlights.clone());

	{
		let render = render.clone();
		hold.set_on_change(move || render.wake_up());
	}
	{
		let render = render.clone();
		camera.set_on_camera_changed(move |_| render.wake_up());
	}

	let wake: Rc<dyn Fn()> = {
		let render = render.clone();
		Rc::new(move || render.wake_up())
	};
	let mut dispatcher = InteractionDispatcher::new(
		camera.clone(),
		Picker::new(config.picker),
		physics.clone(),
		layout.clone(),
		hold.clone(),
		wake,
	);
	dispatcher.set_deterministic(config.render.deterministic);
	dispatcher.set_click_threshold(config.camera.click_threshold_px);
	{
		let (scene, layout, render, host) =
			(scene.clone(), layout.clone(), render.clone(), host.clone());
		dispatcher.on_select(move |id| {
			scene.borrow_mut().selected = id.clone();
			outputs.set_selected.set(id.clone());
			let Some(id) = id else {
				return;
			};
			let now = host.now();
			if let Some(layout) = layout.borrow().as_ref() {
				let mut particles = particles.borrow_mut();
				let mut highlights = highlights.borrow_mut();
				for link in layout
					.links()
					.iter()
					.filter(|l| l.source == id || l.target == id)
				{
					particles.push(Particle {
						kind: ParticleKind::Pulse,
						edge_key: link.key.clone(),
						born_ms: now,
						ttl_ms: PULSE_TTL_MS,
					});
					highlights.activate(link.key.clone(), now + HIGHLIGHT_MS);
				}
			}
			render.trigger_flash(SELECT_FLASH);
		});
	}
	{
		let scene = scene.clone();
		dispatcher.on_hover_edge(move |key| scene.borrow_mut().hovered_edge = key);
	}
	dispatcher.on_open_detail(move |id| outputs.set_detail.set(Some(id)));

	let resizer = Resizer {
		anchor: main,
		sizing,
		viewport_config: config.viewport,
		physics_config: config.physics,
		canvases,
		camera: camera.clone(),
		physics: physics.clone(),
		render: render.clone(),
	};
	let resize_epoch = RunEpoch::new();
	let debounce_ms = config.viewport.resize_debounce_ms;
	let on_resize = Closure::<dyn FnMut()>::new(move || {
		let token = resize_epoch.bump();
		let (epoch, resizer) = (resize_epoch.clone(), resizer.clone());
		host.set_timeout(
			Box::new(move || {
				if epoch.is_current(token) {
					resizer.apply();
				}
			}),
			debounce_ms,
		);
	});
	let _ = window.add_event_listener_with_callback("resize", on_resize.as_ref().unchecked_ref());

	// hidden tabs get no rAF but would keep the idle timer going
	let on_visibility = {
		let render = render.clone();
		Closure::<dyn FnMut()>::new(move || {
			let hidden = web_sys::window()
				.and_then(|w| w.document())
				.is_some_and(|d| d.hidden());
			if hidden {
				render.stop_render_loop();
			} else if !render.is_running() {
				render.ensure_render_loop();
				render.wake_up();
			}
		})
	};
	if let Some(document) = window.document() {
		let _ = document.add_event_listener_with_callback(
			"visibilitychange",
			on_visibility.as_ref().unchecked_ref(),
		);
	}

	info!(
		"trust-graph: mounted {}x{} with {} participants",
		css.width,
		css.height,
		data.nodes.len()
	);
	Ok(Runtime {
		fx_canvas: fx,
		camera,
		render,
		physics,
		hold,
		dispatcher: Rc::new(RefCell::new(dispatcher)),
		layout,
		on_resize,
		on_visibility,
	})
}

/// Pointer positions are relative to the canvas, so refresh its origin
/// before handing out the dispatcher.
fn dispatcher_for(
	runtime: &Rc<RefCell<Option<Runtime>>>,
) -> Option<Rc<RefCell<InteractionDispatcher>>> {
	let runtime = runtime.borrow();
	let runtime = runtime.as_ref()?;
	let rect = runtime.fx_canvas.get_bounding_client_rect();
	runtime.camera.set_host_origin(rect.left(), rect.top());
	Some(runtime.dispatcher.clone())
}

fn pointer_input(ev: &PointerEvent) -> PointerInput {
	PointerInput {
		client_x: ev.client_x() as f64,
		client_y: ev.client_y() as f64,
		pointer_id: ev.pointer_id(),
	}
}

/// Who `id` trusts and who trusts `id`.
fn counterparties(data: &GraphData, id: &str) -> (Vec<String>, Vec<String>) {
	let trusts = data
		.links
		.iter()
		.filter(|l| l.source == id)
		.map(|l| l.target.clone())
		.collect();
	let trusted_by = data
		.links
		.iter()
		.filter(|l| l.target == id)
		.map(|l| l.source.clone())
		.collect();
	(trusts, trusted_by)
}

/// Interactive trust network: drag participants to pin them, drag the
/// background to pan, scroll to zoom, click to select and double-click for
/// a participant's trustlines.
#[component]
pub fn TrustGraphCanvas(
	/// Participants and trustlines; a change replaces the whole graph.
	#[prop(into)]
	data: Signal<GraphData>,
	/// Tuning; defaults when omitted.
	#[prop(optional)]
	config: GraphConfig,
	/// Size to the window instead of the parent element.
	#[prop(default = false)]
	fullscreen: bool,
	/// Fixed CSS width; the parent's width otherwise.
	#[prop(default = None)]
	width: Option<f64>,
	/// Fixed CSS height; the parent's height otherwise.
	#[prop(default = None)]
	height: Option<f64>,
	/// Freezes or resumes the layout simulation.
	#[prop(optional)]
	physics_enabled: Option<Signal<bool>>,
	/// Overrides the configured quality tier while the canvas is live.
	#[prop(optional)]
	quality: Option<Signal<QualityTier>>,
) -> impl IntoView {
	let main_ref = NodeRef::<leptos::html::Canvas>::new();
	let fx_ref = NodeRef::<leptos::html::Canvas>::new();
	let runtime: Rc<RefCell<Option<Runtime>>> = Rc::new(RefCell::new(None));
	let (selected, set_selected) = signal(None::<NodeId>);
	let (detail, set_detail) = signal(None::<NodeId>);
	let (unpin_request, set_unpin_request) = signal(None::<NodeId>);
	let sizing = Sizing {
		fullscreen,
		width,
		height,
	};
	let outputs = Outputs {
		set_selected,
		set_detail,
	};

	let runtime_init = runtime.clone();
	Effect::new(move |_| {
		let graph = data.get();
		let (Some(main), Some(fx)) = (main_ref.get(), fx_ref.get()) else {
			return;
		};
		if let Some(rt) = runtime_init.borrow().as_ref() {
			rt.replace_graph(&graph);
			return;
		}
		match setup(main.into(), fx.into(), &graph, &config, sizing, outputs) {
			Ok(rt) => {
				if let Some(enabled) = physics_enabled {
					rt.set_physics_enabled(enabled.get_untracked());
				}
				if let Some(quality) = quality {
					rt.set_quality(quality.get_untracked());
				}
				rt.render.render_once(None);
				rt.render.ensure_render_loop();
				*runtime_init.borrow_mut() = Some(rt);
			}
			Err(e) => error!("trust-graph: setup failed: {e}"),
		}
	});

	let runtime_physics = runtime.clone();
	Effect::new(move |_| {
		let Some(enabled) = physics_enabled.map(|s| s.get()) else {
			return;
		};
		if let Some(rt) = runtime_physics.borrow().as_ref() {
			rt.set_physics_enabled(enabled);
		}
	});

	let runtime_quality = runtime.clone();
	Effect::new(move |_| {
		let Some(tier) = quality.map(|s| s.get()) else {
			return;
		};
		if let Some(rt) = runtime_quality.borrow().as_ref() {
			rt.set_quality(tier);
		}
	});

	let runtime_unpin = runtime.clone();
	Effect::new(move |_| {
		let Some(id) = unpin_request.get() else {
			return;
		};
		if let Some(dispatcher) = dispatcher_for(&runtime_unpin) {
			dispatcher.borrow_mut().unpin(&id);
		}
	});

	let runtime_pd = runtime.clone();
	let on_pointerdown = move |ev: PointerEvent| {
		let Some(dispatcher) = dispatcher_for(&runtime_pd) else {
			return;
		};
		dispatcher.borrow_mut().pointer_down(pointer_input(&ev));
		if let Some(canvas) = fx_ref.get() {
			let canvas: HtmlCanvasElement = canvas.into();
			let _ = canvas.set_pointer_capture(ev.pointer_id());
		}
	};

	let runtime_pm = runtime.clone();
	let on_pointermove = move |ev: PointerEvent| {
		if let Some(dispatcher) = dispatcher_for(&runtime_pm) {
			dispatcher.borrow_mut().pointer_move(pointer_input(&ev));
		}
	};

	let runtime_pu = runtime.clone();
	let on_pointerup = move |ev: PointerEvent| {
		if let Some(dispatcher) = dispatcher_for(&runtime_pu) {
			dispatcher.borrow_mut().pointer_up(pointer_input(&ev));
		}
	};

	let runtime_pc = runtime.clone();
	let on_pointercancel = move |_: PointerEvent| {
		if let Some(dispatcher) = dispatcher_for(&runtime_pc) {
			dispatcher.borrow_mut().pointer_cancel();
		}
	};

	let runtime_pl = runtime.clone();
	let on_pointerleave = move |_: PointerEvent| {
		if let Some(dispatcher) = dispatcher_for(&runtime_pl) {
			dispatcher.borrow_mut().pointer_leave();
		}
	};

	let runtime_ck = runtime.clone();
	let on_click = move |ev: MouseEvent| {
		if let Some(dispatcher) = dispatcher_for(&runtime_ck) {
			dispatcher
				.borrow_mut()
				.click(PointerInput::at(ev.client_x() as f64, ev.client_y() as f64));
		}
	};

	let runtime_dc = runtime.clone();
	let on_dblclick = move |ev: MouseEvent| {
		if let Some(dispatcher) = dispatcher_for(&runtime_dc) {
			dispatcher
				.borrow_mut()
				.double_click(PointerInput::at(ev.client_x() as f64, ev.client_y() as f64));
		}
	};

	let runtime_wh = runtime;
	let on_wheel = move |ev: WheelEvent| {
		ev.prevent_default();
		if let Some(dispatcher) = dispatcher_for(&runtime_wh) {
			dispatcher.borrow_mut().wheel(WheelInput {
				client_x: ev.client_x() as f64,
				client_y: ev.client_y() as f64,
				delta_y: ev.delta_y(),
			});
		}
	};

	let selection_panel = move || {
		selected.get().map(|id| {
			let graph = data.get();
			let node = graph.nodes.iter().find(|n| n.id == id);
			let label = node.and_then(|n| n.label.clone()).unwrap_or_else(|| id.clone());
			let (trusts, trusted_by) = counterparties(&graph, &id);
			view! {
				<div class="graph-selection">
					<strong>{label}</strong>
					<span>{format!("trusts {}, trusted by {}", trusts.len(), trusted_by.len())}</span>
				</div>
			}
		})
	};

	let detail_panel = move || {
		detail.get().map(|id| {
			let (trusts, trusted_by) = counterparties(&data.get(), &id);
			let unpin_id = id.clone();
			view! {
				<aside class="graph-detail">
					<h2>{id}</h2>
					<h3>"Trusts"</h3>
					<ul>{trusts.into_iter().map(|t| view! { <li>{t}</li> }).collect_view()}</ul>
					<h3>"Trusted by"</h3>
					<ul>{trusted_by.into_iter().map(|t| view! { <li>{t}</li> }).collect_view()}</ul>
					<button on:click=move |_| set_unpin_request.set(Some(unpin_id.clone()))>"Unpin"</button>
					<button on:click=move |_| set_detail.set(None)>"Close"</button>
				</aside>
			}
		})
	};

	view! {
		<div class="trust-graph" style="position: relative; width: 100%; height: 100%;">
			<canvas
				node_ref=main_ref
				class="trust-graph-main"
				style="position: absolute; left: 0; top: 0; display: block;"
			/>
			<canvas
				node_ref=fx_ref
				class="trust-graph-fx"
				on:pointerdown=on_pointerdown
				on:pointermove=on_pointermove
				on:pointerup=on_pointerup
				on:pointercancel=on_pointercancel
				on:pointerleave=on_pointerleave
				on:click=on_click
				on:dblclick=on_dblclick
				on:wheel=on_wheel
				style="position: absolute; left: 0; top: 0; display: block; cursor: grab; touch-action: none;"
			/>
			{selection_panel}
			{detail_panel}
		</div>
	}
}
