//! Uniform-grid hit testing for nodes and trustline segments.
//!
//! Grids are built from the layout the first time they are queried and are
//! kept until the layout's structural version or its positions epoch changes.
//! Small edits between rebuilds are absorbed by reading live positions and
//! scanning one extra ring of cells.

use std::collections::HashMap;

use super::camera::CameraSystem;
use super::config::PickerConfig;
use super::types::{Layout, LayoutVersion, NodeId};

type CellKey = (i32, i32);

fn cell_coord(value: f64, cell_size: f64) -> i32 {
	(value / cell_size).floor() as i32
}

/// Buckets item indices by the cells their bounding boxes overlap.
#[derive(Debug, Default)]
struct SpatialGrid {
	cell_size: f64,
	cells: HashMap<CellKey, Vec<usize>>,
	/// Largest item footprint seen at build time.
	reach: f64,
}

impl SpatialGrid {
	fn new(cell_size: f64) -> Self {
		debug_assert!(cell_size > 0.0, "grid cell_size must be strictly positive");
		Self {
			cell_size,
			cells: HashMap::new(),
			reach: 0.0,
		}
	}

	fn insert_box(&mut self, item: usize, min_x: f64, min_y: f64, max_x: f64, max_y: f64) {
		let (x0, y0) = (cell_coord(min_x, self.cell_size), cell_coord(min_y, self.cell_size));
		let (x1, y1) = (cell_coord(max_x, self.cell_size), cell_coord(max_y, self.cell_size));
		for cx in x0..=x1 {
			for cy in y0..=y1 {
				self.cells.entry((cx, cy)).or_default().push(item);
			}
		}
	}

	/// Items in cells overlapping the query box plus one ring of neighbours.
	/// An item spanning several cells may be yielded more than once.
	fn candidates(&self, x: f64, y: f64, radius: f64) -> impl Iterator<Item = usize> + '_ {
		let x0 = cell_coord(x - radius, self.cell_size) - 1;
		let y0 = cell_coord(y - radius, self.cell_size) - 1;
		let x1 = cell_coord(x + radius, self.cell_size) + 1;
		let y1 = cell_coord(y + radius, self.cell_size) + 1;
		(x0..=x1)
			.flat_map(move |cx| (y0..=y1).map(move |cy| (cx, cy)))
			.filter_map(move |key| self.cells.get(&key))
			.flat_map(|items| items.iter().copied())
	}
}

/// Squared distance from `p` to the segment `a`-`b`.
pub fn point_segment_distance_sq(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
	let (dx, dy) = (bx - ax, by - ay);
	let len_sq = dx * dx + dy * dy;
	let t = if len_sq <= f64::EPSILON {
		0.0
	} else {
		(((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
	};
	let (cx, cy) = (ax + t * dx, ay + t * dy);
	(px - cx) * (px - cx) + (py - cy) * (py - cy)
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeHit {
	pub index: usize,
	pub id: NodeId,
	/// World-space distance from the query point to the node centre.
	pub distance: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EdgeHit {
	pub index: usize,
	pub key: String,
	pub source: NodeId,
	pub target: NodeId,
	pub distance: f64,
}

/// Which layout state a grid was built from.
type Stamp = (LayoutVersion, u64);

fn stamp(layout: &Layout) -> Stamp {
	(layout.version(), layout.positions_epoch())
}

#[derive(Debug)]
pub struct Picker {
	config: PickerConfig,
	nodes: Option<(Stamp, SpatialGrid)>,
	edges: Option<(Stamp, SpatialGrid)>,
	builds: usize,
}

impl Picker {
	pub fn new(config: PickerConfig) -> Self {
		Self {
			config,
			nodes: None,
			edges: None,
			builds: 0,
		}
	}

	/// Number of grid builds so far, for cache diagnostics.
	#[cfg(test)]
	pub fn builds(&self) -> usize {
		self.builds
	}

	fn node_grid(&mut self, layout: &Layout) -> &SpatialGrid {
		let current = stamp(layout);
		if !matches!(&self.nodes, Some((s, _)) if *s == current) {
			self.nodes = None;
		}
		let (cell_size, builds) = (self.config.node_cell_size, &mut self.builds);
		let (_, grid) = self.nodes.get_or_insert_with(|| {
			let mut grid = SpatialGrid::new(cell_size);
			for (i, node) in layout.nodes().iter().enumerate() {
				grid.insert_box(i, node.x, node.y, node.x, node.y);
				grid.reach = grid.reach.max(node.width.max(node.height));
			}
			*builds += 1;
			(current, grid)
		});
		grid
	}

	fn edge_grid(&mut self, layout: &Layout) -> &SpatialGrid {
		let current = stamp(layout);
		if !matches!(&self.edges, Some((s, _)) if *s == current) {
			self.edges = None;
		}
		let (cell_size, builds) = (self.config.edge_cell_size, &mut self.builds);
		let (_, grid) = self.edges.get_or_insert_with(|| {
			let mut grid = SpatialGrid::new(cell_size);
			for (i, link) in layout.links().iter().enumerate() {
				let Some((a, b)) = layout.resolve_link(link) else {
					continue;
				};
				grid.insert_box(i, a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y));
			}
			*builds += 1;
			(current, grid)
		});
		grid
	}

	pub fn pick_node_at(
		&mut self,
		layout: &Layout,
		camera: &CameraSystem,
		client_x: f64,
		client_y: f64,
	) -> Option<NodeHit> {
		if layout.is_empty() {
			return None;
		}
		let (sx, sy) = camera.client_to_screen(client_x, client_y);
		let (wx, wy) = camera.screen_to_world(sx, sy);
		let zoom = camera.camera().zoom;
		let scale = self.config.node_hit_scale;

		let grid = self.node_grid(layout);
		let max_radius = grid.reach * scale / zoom;
		grid.candidates(wx, wy, max_radius)
			.filter_map(|i| {
				let node = layout.nodes().get(i)?;
				let radius = node.width.max(node.height) * scale / zoom;
				let (dx, dy) = (node.x - wx, node.y - wy);
				let d_sq = dx * dx + dy * dy;
				(d_sq <= radius * radius).then_some((i, d_sq))
			})
			.min_by(|a, b| a.1.total_cmp(&b.1))
			.map(|(i, d_sq)| NodeHit {
				index: i,
				id: layout.nodes()[i].id.clone(),
				distance: d_sq.sqrt(),
			})
	}

	pub fn pick_edge_at(
		&mut self,
		layout: &Layout,
		camera: &CameraSystem,
		client_x: f64,
		client_y: f64,
	) -> Option<EdgeHit> {
		if layout.links().is_empty() {
			return None;
		}
		let (sx, sy) = camera.client_to_screen(client_x, client_y);
		let (wx, wy) = camera.screen_to_world(sx, sy);
		let tolerance = self.config.edge_hit_px / camera.camera().zoom;
		let tolerance_sq = tolerance * tolerance;

		let grid = self.edge_grid(layout);
		grid.candidates(wx, wy, tolerance)
			.filter_map(|i| {
				let link = layout.links().get(i)?;
				let (a, b) = layout.resolve_link(link)?;
				let d_sq = point_segment_distance_sq(wx, wy, a.x, a.y, b.x, b.y);
				(d_sq <= tolerance_sq).then_some((i, d_sq))
			})
			.min_by(|a, b| a.1.total_cmp(&b.1))
			.map(|(i, d_sq)| {
				let link = &layout.links()[i];
				EdgeHit {
					index: i,
					key: link.key.clone(),
					source: link.source.clone(),
					target: link.target.clone(),
					distance: d_sq.sqrt(),
				}
			})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::components::trust_graph::config::CameraConfig;
	use crate::components::trust_graph::host::ManualHost;
	use crate::components::trust_graph::physics::PhysicsManager;
	use crate::components::trust_graph::types::{
		GraphData, GraphLink, GraphNode, LayoutLink, LayoutNode, QualityTier, Viewport,
	};
	use std::rc::Rc;

	fn camera() -> CameraSystem {
		CameraSystem::new(
			Rc::new(ManualHost::new()),
			CameraConfig::default(),
			Viewport::new(800.0, 600.0),
		)
	}

	#[test]
	fn picks_node_near_click_and_misses_far_away() {
		let layout = Layout::new(vec![LayoutNode::new("a", 0.0, 0.0)], vec![]);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());

		let hit = picker.pick_node_at(&layout, &camera, 2.0, 1.0).unwrap();
		assert_eq!(hit.id, "a");
		assert!(picker.pick_node_at(&layout, &camera, 400.0, 400.0).is_none());
	}

	#[test]
	fn nearest_node_wins() {
		let layout = Layout::new(
			vec![LayoutNode::new("a", 0.0, 0.0), LayoutNode::new("b", 6.0, 0.0)],
			vec![],
		);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());
		assert_eq!(picker.pick_node_at(&layout, &camera, 4.0, 0.0).unwrap().id, "b");
		assert_eq!(picker.pick_node_at(&layout, &camera, 1.0, 0.0).unwrap().id, "a");
	}

	#[test]
	fn hit_radius_follows_zoom() {
		let layout = Layout::new(vec![LayoutNode::new("a", 0.0, 0.0)], vec![]);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());
		// radius 9.6 world units at zoom 1
		assert!(picker.pick_node_at(&layout, &camera, 9.0, 0.0).is_some());
		camera.set_camera(crate::components::trust_graph::types::Camera {
			pan_x: 0.0,
			pan_y: 0.0,
			zoom: 2.0,
		});
		// screen 9px = world 4.5 = within radius 4.8
		assert!(picker.pick_node_at(&layout, &camera, 9.0, 0.0).is_some());
		assert!(picker.pick_node_at(&layout, &camera, 11.0, 0.0).is_none());
	}

	#[test]
	fn edge_tolerance() {
		let layout = Layout::new(
			vec![LayoutNode::new("a", 0.0, 0.0), LayoutNode::new("b", 500.0, 0.0)],
			vec![LayoutLink::new("a", "b")],
		);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());
		let hit = picker.pick_edge_at(&layout, &camera, 250.0, 5.0).unwrap();
		assert_eq!(hit.key, "a->b");
		assert!(picker.pick_edge_at(&layout, &camera, 250.0, 50.0).is_none());
	}

	#[test]
	fn long_edges_are_found_far_from_their_endpoints() {
		let layout = Layout::new(
			vec![LayoutNode::new("a", -1000.0, -1000.0), LayoutNode::new("b", 1000.0, 1000.0)],
			vec![LayoutLink::new("a", "b")],
		);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());
		assert!(picker.pick_edge_at(&layout, &camera, 600.0, 601.0).is_some());
	}

	#[test]
	fn dangling_links_are_skipped() {
		let layout = Layout::new(
			vec![LayoutNode::new("a", 0.0, 0.0)],
			vec![LayoutLink::new("a", "missing")],
		);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());
		assert!(picker.pick_edge_at(&layout, &camera, 0.0, 0.0).is_none());
	}

	#[test]
	fn empty_layout_picks_nothing() {
		let layout = Layout::new(vec![], vec![]);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());
		assert!(picker.pick_node_at(&layout, &camera, 0.0, 0.0).is_none());
		assert!(picker.pick_edge_at(&layout, &camera, 0.0, 0.0).is_none());
	}

	#[test]
	fn grid_rebuilds_only_on_structural_change() {
		let mut layout = Layout::new(vec![LayoutNode::new("a", 0.0, 0.0)], vec![]);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());

		picker.pick_node_at(&layout, &camera, 0.0, 0.0);
		picker.pick_node_at(&layout, &camera, 5.0, 0.0);
		assert_eq!(picker.builds(), 1);

		// small unmarked edits keep the grid but read live positions
		layout.nodes_mut()[0].x = 40.0;
		assert!(picker.pick_node_at(&layout, &camera, 40.0, 0.0).is_some());
		assert_eq!(picker.builds(), 1);

		let replaced = Layout::new(vec![LayoutNode::new("a", 0.0, 0.0)], vec![]);
		picker.pick_node_at(&replaced, &camera, 0.0, 0.0);
		assert_eq!(picker.builds(), 2);
	}

	#[test]
	fn marked_moves_rebuild_the_grid() {
		let mut layout = Layout::new(vec![LayoutNode::new("a", 0.0, 0.0)], vec![]);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());
		assert!(picker.pick_node_at(&layout, &camera, 0.0, 0.0).is_some());

		// several cells away: beyond the extra ring of the old bucket
		layout.nodes_mut()[0].x = 700.0;
		assert!(picker.pick_node_at(&layout, &camera, 700.0, 0.0).is_none());
		layout.mark_moved();
		assert!(picker.pick_node_at(&layout, &camera, 700.0, 0.0).is_some());
		assert_eq!(picker.builds(), 2);
	}

	#[test]
	fn footprint_is_taken_from_the_build() {
		let mut big = LayoutNode::new("big", 0.0, 0.0);
		big.width = 400.0;
		big.height = 400.0;
		let layout = Layout::new(vec![big, LayoutNode::new("a", 1000.0, 0.0)], vec![]);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());
		// radius 320 reaches across two cells
		assert_eq!(picker.pick_node_at(&layout, &camera, 300.0, 0.0).unwrap().id, "big");
		assert_eq!(picker.pick_node_at(&layout, &camera, 1002.0, 0.0).unwrap().id, "a");
	}

	#[test]
	fn settled_physics_leaves_every_node_pickable() {
		let data = GraphData {
			nodes: (0..60)
				.map(|i| GraphNode {
					id: format!("n{i}"),
					label: None,
					group: None,
				})
				.collect(),
			links: (1..60)
				.map(|i| GraphLink {
					source: format!("n{}", i / 3),
					target: format!("n{i}"),
				})
				.collect(),
		};
		let viewport = Viewport::new(800.0, 600.0);
		let mut layout = Layout::from_graph_data(&data, viewport.width, viewport.height);
		let camera = camera();
		let mut picker = Picker::new(PickerConfig::default());
		picker.pick_node_at(&layout, &camera, 0.0, 0.0);

		let mut physics = PhysicsManager::new(true, QualityTier::Med, viewport);
		physics.ensure_for_layout(&mut layout);
		let mut ticks = 0;
		while physics.tick_and_sync_to_layout(&mut layout) {
			ticks += 1;
			assert!(ticks < 5_000, "simulation never cooled");
		}

		for node in layout.nodes() {
			let hit = picker.pick_node_at(&layout, &camera, node.x, node.y);
			assert!(hit.is_some_and(|h| h.distance < 1e-9), "missed {}", node.id);
		}
	}

	#[test]
	fn segment_distance() {
		assert_eq!(point_segment_distance_sq(5.0, 3.0, 0.0, 0.0, 10.0, 0.0), 9.0);
		assert_eq!(point_segment_distance_sq(-3.0, 4.0, 0.0, 0.0, 10.0, 0.0), 25.0);
		assert_eq!(point_segment_distance_sq(1.0, 1.0, 0.0, 0.0, 0.0, 0.0), 2.0);
	}
}
