//! Routes raw canvas gestures to exactly one of: dragging a node (which pins
//! it), panning the camera, or a click that changes the selection.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use super::camera::{CameraSystem, ClickTracker, PointerInput, WheelInput};
use super::intensity::InteractionHold;
use super::physics::PhysicsManager;
use super::picker::Picker;
use super::types::{LayoutSlot, NodeId};

/// Energy given back to the simulation when a dragged node is let go.
const RELEASE_REHEAT_ALPHA: f64 = 0.15;

/// One node drag, from the press that hit it until release.
#[derive(Clone, Debug, PartialEq)]
pub struct DragState {
	pub node_id: NodeId,
	/// Layout index at press time; re-resolved if the layout was replaced.
	pub cached_index: usize,
	pub pointer_id: i32,
	/// World offset from the pointer to the node centre.
	grab_dx: f64,
	grab_dy: f64,
	click: ClickTracker,
	moved: bool,
}

type Listener<T> = Option<Box<dyn Fn(T)>>;

pub struct InteractionDispatcher {
	camera: CameraSystem,
	picker: Picker,
	physics: Rc<RefCell<PhysicsManager>>,
	layout: LayoutSlot,
	hold: InteractionHold,
	wake: Rc<dyn Fn()>,
	deterministic: bool,
	click_threshold_px: f64,
	drag: Option<DragState>,
	selected: Option<NodeId>,
	hovered_edge: Option<String>,
	on_select: Listener<Option<NodeId>>,
	on_open_detail: Listener<NodeId>,
	on_hover_edge: Listener<Option<String>>,
}

impl InteractionDispatcher {
	pub fn new(
		camera: CameraSystem,
		picker: Picker,
		physics: Rc<RefCell<PhysicsManager>>,
		layout: LayoutSlot,
		hold: InteractionHold,
		wake: Rc<dyn Fn()>,
	) -> Self {
		Self {
			camera,
			picker,
			physics,
			layout,
			hold,
			wake,
			deterministic: false,
			click_threshold_px: 3.0,
			drag: None,
			selected: None,
			hovered_edge: None,
			on_select: None,
			on_open_detail: None,
			on_hover_edge: None,
		}
	}

	/// In deterministic mode presses never start drags or pans.
	pub fn set_deterministic(&mut self, deterministic: bool) {
		self.deterministic = deterministic;
	}

	pub fn set_click_threshold(&mut self, px: f64) {
		self.click_threshold_px = px;
	}

	pub fn on_select(&mut self, f: impl Fn(Option<NodeId>) + 'static) {
		self.on_select = Some(Box::new(f));
	}

	pub fn on_open_detail(&mut self, f: impl Fn(NodeId) + 'static) {
		self.on_open_detail = Some(Box::new(f));
	}

	pub fn on_hover_edge(&mut self, f: impl Fn(Option<String>) + 'static) {
		self.on_hover_edge = Some(Box::new(f));
	}

	#[cfg(test)]
	pub fn selected(&self) -> Option<&str> {
		self.selected.as_deref()
	}

	#[cfg(test)]
	pub fn hovered_edge(&self) -> Option<&str> {
		self.hovered_edge.as_deref()
	}

	#[cfg(test)]
	pub fn drag(&self) -> Option<&DragState> {
		self.drag.as_ref()
	}

	#[cfg(test)]
	pub fn is_dragging(&self) -> bool {
		self.drag.is_some()
	}

	/// Returns `true` when a node drag claimed the press.
	pub fn pointer_down(&mut self, input: PointerInput) -> bool {
		(self.wake)();
		if self.deterministic || self.drag.is_some() {
			return false;
		}
		self.hold.mark(false);

		if let Some(drag) = self.try_begin_drag(input) {
			debug!("trust-graph: drag start on {}", drag.node_id);
			self.drag = Some(drag);
			return true;
		}
		self.camera.on_pointer_down(input);
		false
	}

	fn try_begin_drag(&mut self, input: PointerInput) -> Option<DragState> {
		let slot = self.layout.borrow();
		let layout = slot.as_ref()?;
		let hit = self
			.picker
			.pick_node_at(layout, &self.camera, input.client_x, input.client_y)?;
		let node = layout.nodes().get(hit.index)?;
		let (wx, wy) = self.camera.client_to_world(input.client_x, input.client_y);
		let (sx, sy) = self.camera.client_to_screen(input.client_x, input.client_y);
		Some(DragState {
			node_id: hit.id,
			cached_index: hit.index,
			pointer_id: input.pointer_id,
			grab_dx: node.x - wx,
			grab_dy: node.y - wy,
			click: ClickTracker::new(sx, sy),
			moved: false,
		})
	}

	pub fn pointer_move(&mut self, input: PointerInput) {
		(self.wake)();
		if self.drag.is_some() {
			self.drag_to(input);
			return;
		}
		if self.camera.is_panning() {
			if self.camera.on_pointer_move(input) {
				self.hold.mark(false);
			}
		} else {
			self.update_hover(input);
		}
	}

	fn drag_to(&mut self, input: PointerInput) {
		let (sx, sy) = self.camera.client_to_screen(input.client_x, input.client_y);
		let (wx, wy) = self.camera.client_to_world(input.client_x, input.client_y);
		let threshold = self.click_threshold_px;
		let Some(drag) = self.drag.as_mut() else {
			return;
		};
		if drag.pointer_id != input.pointer_id {
			return;
		}
		drag.click.track(sx, sy);
		if !drag.moved && drag.click.is_click(threshold) {
			return;
		}
		drag.moved = true;
		let (x, y) = (wx + drag.grab_dx, wy + drag.grab_dy);

		{
			let mut slot = self.layout.borrow_mut();
			let Some(layout) = slot.as_mut() else {
				return;
			};
			let index = match layout.nodes().get(drag.cached_index) {
				Some(n) if n.id == drag.node_id => Some(drag.cached_index),
				_ => layout.index_of(&drag.node_id),
			};
			let Some(index) = index else {
				return;
			};
			drag.cached_index = index;
			let node = &mut layout.nodes_mut()[index];
			node.x = x;
			node.y = y;
			node.pinned = true;
			layout.mark_moved();
		}
		self.physics.borrow_mut().pin(&drag.node_id, x, y);
		self.hold.mark(false);
	}

	fn update_hover(&mut self, input: PointerInput) {
		let hovered = {
			let slot = self.layout.borrow();
			let Some(layout) = slot.as_ref() else {
				return;
			};
			self.picker
				.pick_edge_at(layout, &self.camera, input.client_x, input.client_y)
				.map(|hit| hit.key)
		};
		if hovered != self.hovered_edge {
			self.hovered_edge = hovered.clone();
			if let Some(cb) = &self.on_hover_edge {
				cb(hovered);
			}
		}
	}

	pub fn pointer_up(&mut self, input: PointerInput) {
		(self.wake)();
		if let Some(mut drag) = self.drag.take() {
			let (sx, sy) = self.camera.client_to_screen(input.client_x, input.client_y);
			drag.click.track(sx, sy);
			if !drag.moved && drag.click.is_click(self.click_threshold_px) {
				self.select(Some(drag.node_id));
			} else {
				self.finish_drag();
			}
			return;
		}

		if !self.camera.on_pointer_up(input) {
			return;
		}
		let hit = {
			let slot = self.layout.borrow();
			slot.as_ref().and_then(|layout| {
				self.picker
					.pick_node_at(layout, &self.camera, input.client_x, input.client_y)
			})
		};
		self.select(hit.map(|h| h.id));
	}

	/// Browser `click`; selection already happened on pointer up.
	pub fn click(&mut self, _input: PointerInput) {
		(self.wake)();
	}

	pub fn double_click(&mut self, input: PointerInput) {
		(self.wake)();
		let hit = {
			let slot = self.layout.borrow();
			slot.as_ref().and_then(|layout| {
				self.picker
					.pick_node_at(layout, &self.camera, input.client_x, input.client_y)
			})
		};
		if let (Some(hit), Some(cb)) = (hit, &self.on_open_detail) {
			cb(hit.id);
		}
	}

	/// Zooms unless a drag is in progress. Waking is left to the camera's
	/// change callback, which runs once the batched zoom is applied, so the
	/// hold is marked quietly.
	pub fn wheel(&mut self, input: WheelInput) -> bool {
		if self.drag.is_some() {
			return false;
		}
		self.hold.mark_quiet(true);
		self.camera.on_wheel(input);
		true
	}

	/// Pointer left the canvas or the gesture was cancelled.
	pub fn pointer_cancel(&mut self) {
		(self.wake)();
		if self.drag.take().is_some() {
			self.finish_drag();
		}
		self.camera.cancel_gesture();
		if self.hovered_edge.take().is_some() {
			if let Some(cb) = &self.on_hover_edge {
				cb(None);
			}
		}
	}

	pub fn pointer_leave(&mut self) {
		self.pointer_cancel();
	}

	/// Releases a user pin and lets the node move again.
	pub fn unpin(&mut self, id: &str) {
		if !self.physics.borrow().is_pinned(id) {
			return;
		}
		if let Some(node) = self.layout.borrow_mut().as_mut().and_then(|l| l.node_mut(id)) {
			node.pinned = false;
		}
		let mut physics = self.physics.borrow_mut();
		physics.unpin(id);
		physics.reheat(Some(RELEASE_REHEAT_ALPHA));
		drop(physics);
		(self.wake)();
	}

	fn finish_drag(&mut self) {
		if let Some(layout) = self.layout.borrow().as_ref() {
			self.physics.borrow_mut().sync_from_layout(layout);
		}
		self.physics.borrow_mut().reheat(Some(RELEASE_REHEAT_ALPHA));
	}

	fn select(&mut self, id: Option<NodeId>) {
		if self.selected == id {
			return;
		}
		self.selected = id.clone();
		if let Some(cb) = &self.on_select {
			cb(id);
		}
	}
}
