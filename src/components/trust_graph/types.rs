use std::cell::RefCell;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

/// Participant identifier shared by layout nodes, links and the pin map.
pub type NodeId = String;

/// A participant as delivered by the data source.
#[derive(Clone, Debug, Deserialize)]
pub struct GraphNode {
	/// Unique participant id.
	pub id: String,
	/// Display name; the id is shown when absent.
	#[serde(default)]
	pub label: Option<String>,
	/// Community index, used for colouring.
	#[serde(default)]
	pub group: Option<u32>,
}

/// A trustline between two participants.
#[derive(Clone, Debug, Deserialize)]
pub struct GraphLink {
	/// Id of the participant extending trust.
	pub source: String,
	/// Id of the trusted participant.
	pub target: String,
}

/// A whole trust network.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GraphData {
	/// Participants.
	pub nodes: Vec<GraphNode>,
	/// Trustlines; ones naming unknown participants are ignored.
	pub links: Vec<GraphLink>,
}

/// Default on-screen node footprint in pixels.
pub const NODE_SIZE: f64 = 12.0;

#[derive(Clone, Debug, PartialEq)]
pub struct LayoutNode {
	pub id: NodeId,
	pub x: f64,
	pub y: f64,
	/// Screen-space footprint, used for hit radius.
	pub width: f64,
	pub height: f64,
	pub pinned: bool,
	pub label: Option<String>,
	pub group: Option<u32>,
}

impl LayoutNode {
	pub fn new(id: impl Into<NodeId>, x: f64, y: f64) -> Self {
		Self {
			id: id.into(),
			x,
			y,
			width: NODE_SIZE,
			height: NODE_SIZE,
			pinned: false,
			label: None,
			group: None,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct LayoutLink {
	/// Unique per directed pair.
	pub key: String,
	pub source: NodeId,
	pub target: NodeId,
}

impl LayoutLink {
	pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
		let (source, target) = (source.into(), target.into());
		Self {
			key: format!("{source}->{target}"),
			source,
			target,
		}
	}
}

/// Structural identity of a [`Layout`].
///
/// Every `Layout::new` draws a fresh version; in-place position edits keep it.
/// Caches compare versions instead of contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayoutVersion(u64);

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

impl LayoutVersion {
	fn next() -> Self {
		Self(NEXT_VERSION.fetch_add(1, Ordering::Relaxed))
	}
}

/// Axis-aligned bounds of node positions in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
	pub min_x: f64,
	pub min_y: f64,
	pub max_x: f64,
	pub max_y: f64,
}

impl Bounds {
	pub fn width(&self) -> f64 {
		self.max_x - self.min_x
	}

	pub fn height(&self) -> f64 {
		self.max_y - self.min_y
	}
}

/// A node/link snapshot. Positions are mutable in place, structure is not.
#[derive(Debug)]
pub struct Layout {
	version: LayoutVersion,
	/// Bumped whenever positions move far enough to stale spatial indexes.
	moved: u64,
	nodes: Vec<LayoutNode>,
	links: Vec<LayoutLink>,
	index: HashMap<NodeId, usize>,
}

impl Layout {
	pub fn new(nodes: Vec<LayoutNode>, links: Vec<LayoutLink>) -> Self {
		let index = nodes
			.iter()
			.enumerate()
			.map(|(i, n)| (n.id.clone(), i))
			.collect();
		Self {
			version: LayoutVersion::next(),
			moved: 0,
			nodes,
			links,
			index,
		}
	}

	/// Seeds nodes on a circle around the viewport centre.
	pub fn from_graph_data(data: &GraphData, width: f64, height: f64) -> Self {
		let count = data.nodes.len().max(1) as f64;
		let radius = 40.0 + 6.0 * count.sqrt() * 10.0;
		let nodes = data
			.nodes
			.iter()
			.enumerate()
			.map(|(i, node)| {
				let angle = (i as f64) * 2.0 * PI / count;
				let mut n = LayoutNode::new(
					node.id.clone(),
					width / 2.0 + radius * angle.cos(),
					height / 2.0 + radius * angle.sin(),
				);
				n.label = node.label.clone();
				n.group = node.group;
				n
			})
			.collect();
		let links = data
			.links
			.iter()
			.map(|l| LayoutLink::new(l.source.clone(), l.target.clone()))
			.collect();
		Self::new(nodes, links)
	}

	pub fn version(&self) -> LayoutVersion {
		self.version
	}

	/// Counts [`mark_moved`](Self::mark_moved) calls on this layout.
	pub fn positions_epoch(&self) -> u64 {
		self.moved
	}

	/// Called after a physics sync or a drag writes new positions.
	pub fn mark_moved(&mut self) {
		self.moved += 1;
	}

	pub fn nodes(&self) -> &[LayoutNode] {
		&self.nodes
	}

	pub fn nodes_mut(&mut self) -> &mut [LayoutNode] {
		&mut self.nodes
	}

	pub fn links(&self) -> &[LayoutLink] {
		&self.links
	}

	pub fn index_of(&self, id: &str) -> Option<usize> {
		self.index.get(id).copied()
	}

	pub fn node(&self, id: &str) -> Option<&LayoutNode> {
		self.index_of(id).map(|i| &self.nodes[i])
	}

	pub fn node_mut(&mut self, id: &str) -> Option<&mut LayoutNode> {
		let i = self.index_of(id)?;
		self.nodes.get_mut(i)
	}

	/// Endpoints of a link, or `None` when either side is missing from this snapshot.
	pub fn resolve_link(&self, link: &LayoutLink) -> Option<(&LayoutNode, &LayoutNode)> {
		Some((self.node(&link.source)?, self.node(&link.target)?))
	}

	pub fn bounds(&self) -> Option<Bounds> {
		let first = self.nodes.first()?;
		let init = Bounds {
			min_x: first.x,
			min_y: first.y,
			max_x: first.x,
			max_y: first.y,
		};
		Some(self.nodes.iter().fold(init, |b, n| Bounds {
			min_x: b.min_x.min(n.x),
			min_y: b.min_y.min(n.y),
			max_x: b.max_x.max(n.x),
			max_y: b.max_y.max(n.y),
		}))
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}
}

/// Shared slot holding the current layout, written by whoever computes layouts.
pub type LayoutSlot = Rc<RefCell<Option<Layout>>>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
	pub pan_x: f64,
	pub pan_y: f64,
	pub zoom: f64,
}

impl Default for Camera {
	fn default() -> Self {
		Self {
			pan_x: 0.0,
			pan_y: 0.0,
			zoom: 1.0,
		}
	}
}

/// How much simulation work each frame may spend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
	/// One step per tick and fast cooling, for large graphs or weak devices.
	Low,
	/// The default.
	#[default]
	Med,
	/// Up to three steps per tick.
	High,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
	pub width: f64,
	pub height: f64,
}

impl Viewport {
	pub fn new(width: f64, height: f64) -> Self {
		Self { width, height }
	}
}
