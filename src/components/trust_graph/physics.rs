//! Force-directed layout physics.
//!
//! [`PhysicsManager`] owns at most one engine, built for one layout version.
//! The engine cools over time (`alpha`) and stops ticking once settled, so an
//! idle graph costs nothing even when the render loop keeps asking.

use std::collections::HashMap;

use force_graph::{DefaultNodeIdx, EdgeData, ForceGraph, NodeData, SimulationParameters};
use log::debug;

use super::types::{Layout, LayoutVersion, NodeId, QualityTier, Viewport};

/// Alpha used by `reheat(None)`.
pub const DEFAULT_REHEAT_ALPHA: f64 = 0.3;

/// Per-engine tuning, derived from viewport, graph size and quality tier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
	pub force_charge: f32,
	pub force_spring: f32,
	pub force_max: f32,
	pub node_speed: f32,
	pub damping_factor: f32,
	/// Simulation steps per tick.
	pub iterations: usize,
	pub time_step: f32,
	pub alpha_decay: f64,
	pub alpha_min: f64,
	/// Pull towards the viewport centre, scaled by alpha.
	pub gravity: f64,
}

impl EngineConfig {
	pub fn derive(viewport: Viewport, node_count: usize, quality: QualityTier) -> Self {
		let n = node_count.max(1) as f64;
		let area = (viewport.width * viewport.height).max(1.0);
		let spacing = (area / n).sqrt();

		// pair budget bounds the O(n^2) charge pass per tick
		let (base_iterations, pair_budget, alpha_decay) = match quality {
			QualityTier::Low => (1, 250_000.0, 0.05),
			QualityTier::Med => (2, 1_000_000.0, 0.0228),
			QualityTier::High => (3, 4_000_000.0, 0.0228),
		};
		let affordable = (pair_budget / (n * n)).floor().max(1.0) as usize;

		Self {
			force_charge: (spacing * 1.5).clamp(30.0, 400.0) as f32,
			force_spring: 0.05,
			force_max: 100.0,
			node_speed: 3000.0,
			damping_factor: 0.9,
			iterations: base_iterations.min(affordable),
			time_step: 0.016,
			alpha_decay,
			alpha_min: 0.001,
			gravity: 0.02,
		}
	}
}

/// A running simulation bound to one layout snapshot.
pub trait PhysicsEngine {
	fn tick(&mut self);
	fn is_running(&self) -> bool;
	fn reheat(&mut self, alpha: f64);
	fn stop(&mut self);
	fn pin(&mut self, id: &str, x: f64, y: f64);
	fn unpin(&mut self, id: &str);
	fn set_center(&mut self, x: f64, y: f64);
	/// Copies layout positions into the engine.
	fn sync_from_layout(&mut self, layout: &Layout);
	/// Writes engine positions into the layout in place.
	fn sync_to_layout(&self, layout: &mut Layout);
}

pub trait EngineFactory {
	fn create(&self, layout: &Layout, config: &EngineConfig) -> Box<dyn PhysicsEngine>;
}

/// Builds [`ForceEngine`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForceEngineFactory;

impl EngineFactory for ForceEngineFactory {
	fn create(&self, layout: &Layout, config: &EngineConfig) -> Box<dyn PhysicsEngine> {
		Box::new(ForceEngine::new(layout, *config))
	}
}

/// `force_graph` simulation with alpha cooling. Node user data is the
/// node's index in the layout it was built from.
pub struct ForceEngine {
	graph: ForceGraph<usize, ()>,
	ids: HashMap<NodeId, DefaultNodeIdx>,
	config: EngineConfig,
	alpha: f64,
	center: (f64, f64),
}

impl ForceEngine {
	pub fn new(layout: &Layout, config: EngineConfig) -> Self {
		let mut graph = ForceGraph::new(SimulationParameters {
			force_charge: config.force_charge,
			force_spring: config.force_spring,
			force_max: config.force_max,
			node_speed: config.node_speed,
			damping_factor: config.damping_factor,
		});
		let mut ids = HashMap::new();
		for (i, node) in layout.nodes().iter().enumerate() {
			let idx = graph.add_node(NodeData {
				x: node.x as f32,
				y: node.y as f32,
				mass: 10.0,
				is_anchor: node.pinned,
				user_data: i,
			});
			ids.insert(node.id.clone(), idx);
		}
		for link in layout.links() {
			if let (Some(&src), Some(&tgt)) = (ids.get(&link.source), ids.get(&link.target)) {
				if src != tgt {
					graph.add_edge(src, tgt, EdgeData::default());
				}
			}
		}

		Self {
			graph,
			ids,
			config,
			alpha: 1.0,
			center: (0.0, 0.0),
		}
	}

	#[cfg(test)]
	fn position_of(&self, id: &str) -> Option<(f64, f64)> {
		let idx = *self.ids.get(id)?;
		let mut found = None;
		self.graph.visit_nodes(|node| {
			if node.index() == idx {
				found = Some((node.x() as f64, node.y() as f64));
			}
		});
		found
	}
}

impl PhysicsEngine for ForceEngine {
	fn tick(&mut self) {
		if !self.is_running() {
			return;
		}
		let dt = self.config.time_step * self.alpha as f32;
		for _ in 0..self.config.iterations {
			self.graph.update(dt);
		}

		let pull = (self.config.gravity * self.alpha) as f32;
		let (cx, cy) = (self.center.0 as f32, self.center.1 as f32);
		self.graph.visit_nodes_mut(|node| {
			if !node.data.is_anchor {
				node.data.x += (cx - node.data.x) * pull;
				node.data.y += (cy - node.data.y) * pull;
			}
		});

		self.alpha *= 1.0 - self.config.alpha_decay;
		if self.alpha < self.config.alpha_min {
			self.alpha = 0.0;
		}
	}

	fn is_running(&self) -> bool {
		self.alpha >= self.config.alpha_min
	}

	fn reheat(&mut self, alpha: f64) {
		self.alpha = self.alpha.max(alpha.min(1.0));
	}

	fn stop(&mut self) {
		self.alpha = 0.0;
	}

	fn pin(&mut self, id: &str, x: f64, y: f64) {
		let Some(&idx) = self.ids.get(id) else {
			return;
		};
		self.graph.visit_nodes_mut(|node| {
			if node.index() == idx {
				node.data.x = x as f32;
				node.data.y = y as f32;
				node.data.is_anchor = true;
			}
		});
	}

	fn unpin(&mut self, id: &str) {
		let Some(&idx) = self.ids.get(id) else {
			return;
		};
		self.graph.visit_nodes_mut(|node| {
			if node.index() == idx {
				node.data.is_anchor = false;
			}
		});
	}

	fn set_center(&mut self, x: f64, y: f64) {
		self.center = (x, y);
	}

	fn sync_from_layout(&mut self, layout: &Layout) {
		self.graph.visit_nodes_mut(|node| {
			if let Some(src) = layout.nodes().get(node.data.user_data) {
				node.data.x = src.x as f32;
				node.data.y = src.y as f32;
			}
		});
	}

	fn sync_to_layout(&self, layout: &mut Layout) {
		let nodes = layout.nodes_mut();
		self.graph.visit_nodes(|node| {
			if let Some(dst) = nodes.get_mut(node.data.user_data) {
				dst.x = node.x() as f64;
				dst.y = node.y() as f64;
			}
		});
	}
}

pub struct PhysicsManager {
	enabled: bool,
	quality: QualityTier,
	factory: Box<dyn EngineFactory>,
	engine: Option<Box<dyn PhysicsEngine>>,
	engine_version: Option<LayoutVersion>,
	pinned: HashMap<NodeId, (f64, f64)>,
	viewport: Viewport,
}

impl PhysicsManager {
	pub fn new(enabled: bool, quality: QualityTier, viewport: Viewport) -> Self {
		Self::with_factory(enabled, quality, viewport, Box::new(ForceEngineFactory))
	}

	pub fn with_factory(
		enabled: bool,
		quality: QualityTier,
		viewport: Viewport,
		factory: Box<dyn EngineFactory>,
	) -> Self {
		Self {
			enabled,
			quality,
			factory,
			engine: None,
			engine_version: None,
			pinned: HashMap::new(),
			viewport,
		}
	}

	/// Throws away any engine and builds a fresh one for `layout`, re-applying
	/// every pin that still names a node in it.
	pub fn recreate_for_current_layout(&mut self, layout: &mut Layout, viewport: Viewport) {
		if let Some(mut old) = self.engine.take() {
			old.stop();
		}
		self.viewport = viewport;
		self.engine_version = Some(layout.version());
		self.pinned.retain(|id, _| layout.index_of(id).is_some());

		if !self.enabled || layout.is_empty() {
			debug!("trust-graph: physics idle (enabled={}, nodes={})", self.enabled, layout.nodes().len());
			return;
		}

		for (id, &(x, y)) in &self.pinned {
			if let Some(node) = layout.node_mut(id) {
				node.x = x;
				node.y = y;
				node.pinned = true;
			}
		}
		if !self.pinned.is_empty() {
			layout.mark_moved();
		}

		let config = EngineConfig::derive(viewport, layout.nodes().len(), self.quality);
		let mut engine = self.factory.create(layout, &config);
		for (id, &(x, y)) in &self.pinned {
			engine.pin(id, x, y);
		}
		engine.set_center(viewport.width / 2.0, viewport.height / 2.0);
		debug!(
			"trust-graph: physics recreated for {} nodes, {} iterations/tick",
			layout.nodes().len(),
			config.iterations
		);
		self.engine = Some(engine);
	}

	/// Recreates only when `layout` is structurally different from the one
	/// the current engine was built for.
	pub fn ensure_for_layout(&mut self, layout: &mut Layout) -> bool {
		if self.engine_version == Some(layout.version()) {
			return false;
		}
		self.recreate_for_current_layout(layout, self.viewport);
		true
	}

	pub fn update_viewport(&mut self, width: f64, height: f64, reheat_alpha: f64) {
		self.viewport = Viewport::new(width, height);
		if reheat_alpha > 0.0 {
			self.reheat(Some(reheat_alpha));
		}
	}

	/// Advances one tick and writes positions back. No-op once settled.
	pub fn tick_and_sync_to_layout(&mut self, layout: &mut Layout) -> bool {
		if !self.is_running() || self.engine_version != Some(layout.version()) {
			return false;
		}
		let Some(engine) = self.engine.as_mut() else {
			return false;
		};
		engine.tick();
		engine.sync_to_layout(layout);
		layout.mark_moved();
		true
	}

	pub fn pin(&mut self, id: &str, x: f64, y: f64) {
		self.pinned.insert(id.to_owned(), (x, y));
		if let Some(engine) = self.engine.as_mut() {
			engine.pin(id, x, y);
		}
	}

	pub fn unpin(&mut self, id: &str) {
		self.pinned.remove(id);
		if let Some(engine) = self.engine.as_mut() {
			engine.unpin(id);
		}
	}

	pub fn is_pinned(&self, id: &str) -> bool {
		self.pinned.contains_key(id)
	}

	pub fn sync_from_layout(&mut self, layout: &Layout) {
		if self.engine_version != Some(layout.version()) {
			return;
		}
		if let Some(engine) = self.engine.as_mut() {
			engine.sync_from_layout(layout);
		}
	}

	pub fn reheat(&mut self, alpha: Option<f64>) {
		let alpha = alpha.unwrap_or(DEFAULT_REHEAT_ALPHA);
		if !self.enabled || alpha <= 0.0 {
			return;
		}
		let center = (self.viewport.width / 2.0, self.viewport.height / 2.0);
		if let Some(engine) = self.engine.as_mut() {
			engine.set_center(center.0, center.1);
			engine.reheat(alpha);
		}
	}

	pub fn is_running(&self) -> bool {
		self.enabled && self.engine.as_ref().is_some_and(|e| e.is_running())
	}

	pub fn stop(&mut self) {
		if let Some(engine) = self.engine.as_mut() {
			engine.stop();
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	/// Disabling stops the engine; re-enabling rebuilds on the next
	/// [`ensure_for_layout`](Self::ensure_for_layout).
	pub fn set_enabled(&mut self, enabled: bool) {
		if self.enabled == enabled {
			return;
		}
		self.enabled = enabled;
		if !enabled {
			self.stop();
		}
		self.engine_version = None;
	}

	pub fn set_quality(&mut self, quality: QualityTier) {
		if self.quality != quality {
			self.quality = quality;
			self.engine_version = None;
		}
	}

	#[cfg(test)]
	pub fn has_engine(&self) -> bool {
		self.engine.is_some()
	}
}

#[cfg(test)]
mod tests {
	use std::cell::{Cell, RefCell};
	use std::rc::Rc;

	use super::*;
	use crate::components::trust_graph::types::{LayoutLink, LayoutNode};

	type CallLog = Rc<RefCell<Vec<String>>>;

	struct MockEngine {
		log: CallLog,
		running: Rc<Cell<bool>>,
	}

	impl PhysicsEngine for MockEngine {
		fn tick(&mut self) {
			self.log.borrow_mut().push("tick".into());
		}
		fn is_running(&self) -> bool {
			self.running.get()
		}
		fn reheat(&mut self, alpha: f64) {
			self.log.borrow_mut().push(format!("reheat {alpha}"));
		}
		fn stop(&mut self) {
			self.log.borrow_mut().push("stop".into());
		}
		fn pin(&mut self, id: &str, x: f64, y: f64) {
			self.log.borrow_mut().push(format!("pin {id} {x} {y}"));
		}
		fn unpin(&mut self, id: &str) {
			self.log.borrow_mut().push(format!("unpin {id}"));
		}
		fn set_center(&mut self, _x: f64, _y: f64) {}
		fn sync_from_layout(&mut self, _layout: &Layout) {
			self.log.borrow_mut().push("sync_from".into());
		}
		fn sync_to_layout(&self, _layout: &mut Layout) {
			self.log.borrow_mut().push("sync_to".into());
		}
	}

	struct MockFactory {
		log: CallLog,
		running: Rc<Cell<bool>>,
		created: Rc<Cell<usize>>,
	}

	impl EngineFactory for MockFactory {
		fn create(&self, _layout: &Layout, _config: &EngineConfig) -> Box<dyn PhysicsEngine> {
			self.created.set(self.created.get() + 1);
			self.log.borrow_mut().push("create".into());
			Box::new(MockEngine {
				log: self.log.clone(),
				running: self.running.clone(),
			})
		}
	}

	struct Harness {
		manager: PhysicsManager,
		log: CallLog,
		running: Rc<Cell<bool>>,
		created: Rc<Cell<usize>>,
	}

	fn harness(enabled: bool) -> Harness {
		let log = CallLog::default();
		let running = Rc::new(Cell::new(true));
		let created = Rc::new(Cell::new(0));
		let factory = MockFactory {
			log: log.clone(),
			running: running.clone(),
			created: created.clone(),
		};
		Harness {
			manager: PhysicsManager::with_factory(
				enabled,
				QualityTier::Med,
				Viewport::new(800.0, 600.0),
				Box::new(factory),
			),
			log,
			running,
			created,
		}
	}

	fn layout() -> Layout {
		Layout::new(
			vec![
				LayoutNode::new("a", 100.0, 100.0),
				LayoutNode::new("b", 200.0, 100.0),
				LayoutNode::new("c", 150.0, 200.0),
			],
			vec![LayoutLink::new("a", "b"), LayoutLink::new("b", "c")],
		)
	}

	fn count(log: &CallLog, entry: &str) -> usize {
		log.borrow().iter().filter(|e| *e == entry).count()
	}

	#[test]
	fn settled_engine_is_never_ticked() {
		let mut h = harness(true);
		let mut layout = layout();
		h.manager.recreate_for_current_layout(&mut layout, Viewport::new(800.0, 600.0));
		let epoch = layout.positions_epoch();
		assert!(h.manager.tick_and_sync_to_layout(&mut layout));
		assert_eq!(layout.positions_epoch(), epoch + 1);
		h.running.set(false);
		for _ in 0..50 {
			assert!(!h.manager.tick_and_sync_to_layout(&mut layout));
		}
		assert_eq!(count(&h.log, "tick"), 1);
		assert_eq!(count(&h.log, "sync_to"), 1);
		assert_eq!(layout.positions_epoch(), epoch + 1);
	}

	#[test]
	fn pins_are_reapplied_before_the_first_tick() {
		let mut h = harness(true);
		let mut first = layout();
		h.manager.recreate_for_current_layout(&mut first, Viewport::new(800.0, 600.0));
		h.manager.pin("a", 12.0, 34.0);

		let mut second = layout();
		h.log.borrow_mut().clear();
		h.manager.recreate_for_current_layout(&mut second, Viewport::new(800.0, 600.0));
		h.manager.tick_and_sync_to_layout(&mut second);

		let log = h.log.borrow();
		let pin_at = log.iter().position(|e| e == "pin a 12 34").unwrap();
		let tick_at = log.iter().position(|e| e == "tick").unwrap();
		assert!(pin_at < tick_at);
		assert_eq!(log[0], "stop");
		let node = second.node("a").unwrap();
		assert!(node.pinned && node.x == 12.0 && node.y == 34.0);
	}

	#[test]
	fn pins_for_vanished_nodes_are_dropped() {
		let mut h = harness(true);
		let mut first = layout();
		h.manager.recreate_for_current_layout(&mut first, Viewport::new(800.0, 600.0));
		h.manager.pin("a", 1.0, 1.0);
		let mut without_a = Layout::new(vec![LayoutNode::new("b", 0.0, 0.0)], vec![]);
		h.manager.recreate_for_current_layout(&mut without_a, Viewport::new(800.0, 600.0));
		assert!(!h.manager.is_pinned("a"));
	}

	#[test]
	fn disabled_or_empty_leaves_no_engine() {
		let mut h = harness(false);
		let mut layout = layout();
		h.manager.recreate_for_current_layout(&mut layout, Viewport::new(800.0, 600.0));
		assert!(!h.manager.has_engine());
		assert!(!h.manager.is_running());
		h.manager.pin("a", 0.0, 0.0);
		h.manager.unpin("a");
		assert!(!h.manager.tick_and_sync_to_layout(&mut layout));

		let mut h = harness(true);
		let mut empty = Layout::new(vec![], vec![]);
		h.manager.recreate_for_current_layout(&mut empty, Viewport::new(800.0, 600.0));
		assert!(!h.manager.has_engine());
		assert_eq!(h.created.get(), 0);
	}

	#[test]
	fn disabled_wins_over_running_engine() {
		let mut h = harness(true);
		let mut layout = layout();
		h.manager.recreate_for_current_layout(&mut layout, Viewport::new(800.0, 600.0));
		assert!(h.manager.is_running());
		h.manager.set_enabled(false);
		h.running.set(true);
		assert!(!h.manager.is_running());
		assert!(!h.manager.tick_and_sync_to_layout(&mut layout));
	}

	#[test]
	fn zero_reheat_is_a_no_op() {
		let mut h = harness(true);
		let mut layout = layout();
		h.manager.recreate_for_current_layout(&mut layout, Viewport::new(800.0, 600.0));
		h.log.borrow_mut().clear();
		h.manager.update_viewport(1024.0, 768.0, 0.0);
		assert!(h.log.borrow().is_empty());
		h.manager.update_viewport(1024.0, 768.0, 0.5);
		assert_eq!(*h.log.borrow(), vec!["reheat 0.5".to_string()]);
	}

	#[test]
	fn ensure_rebuilds_only_for_new_structure() {
		let mut h = harness(true);
		let mut layout = layout();
		assert!(h.manager.ensure_for_layout(&mut layout));
		layout.nodes_mut()[0].x += 5.0;
		assert!(!h.manager.ensure_for_layout(&mut layout));
		let mut replaced = self::layout();
		assert!(h.manager.ensure_for_layout(&mut replaced));
		assert_eq!(h.created.get(), 2);
		// old engine no longer drives the new layout's predecessor
		assert!(!h.manager.tick_and_sync_to_layout(&mut layout));
	}

	#[test]
	fn lower_tiers_and_bigger_graphs_do_less_work() {
		let vp = Viewport::new(1000.0, 800.0);
		let high = EngineConfig::derive(vp, 50, QualityTier::High);
		let low = EngineConfig::derive(vp, 50, QualityTier::Low);
		assert!(low.iterations < high.iterations);
		let huge = EngineConfig::derive(vp, 5000, QualityTier::High);
		assert_eq!(huge.iterations, 1);
	}

	#[test]
	fn force_engine_settles_and_respects_pins() {
		let mut layout = layout();
		let config = EngineConfig::derive(Viewport::new(400.0, 300.0), 3, QualityTier::Low);
		let mut engine = ForceEngine::new(&layout, config);
		engine.pin("a", 50.0, 60.0);
		engine.set_center(200.0, 150.0);

		let mut ticks = 0;
		while engine.is_running() {
			engine.tick();
			ticks += 1;
			assert!(ticks < 10_000, "engine never cooled");
		}
		engine.sync_to_layout(&mut layout);
		let a = layout.node("a").unwrap();
		assert_eq!((a.x, a.y), (50.0, 60.0));
		assert!(layout.nodes().iter().all(|n| n.x.is_finite() && n.y.is_finite()));
		assert_eq!(engine.position_of("a"), Some((50.0, 60.0)));

		engine.reheat(0.5);
		assert!(engine.is_running());
		engine.stop();
		assert!(!engine.is_running());
	}
}
