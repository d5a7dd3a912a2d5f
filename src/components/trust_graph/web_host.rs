//! [`FrameHost`] backed by the browser window.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::warn;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{Performance, Window};

use super::error::{Result, SetupError};
use super::host::{FrameCallback, FrameHandle, FrameHost, TimerCallback, TimerHandle};

#[derive(Default)]
struct Pending {
	next_id: u32,
	/// handle -> (browser request id, callback)
	frames: HashMap<u32, (i32, FrameCallback)>,
	timers: HashMap<u32, (i32, TimerCallback)>,
}

/// Callbacks live in Rust-side maps; the JS closure handed to the browser
/// only looks its callback up by handle, so cancelling drops the callback
/// even though the browser never calls back.
pub struct WebHost {
	window: Window,
	performance: Performance,
	pending: Rc<RefCell<Pending>>,
}

impl WebHost {
	pub fn new() -> Result<Self> {
		let window = web_sys::window().ok_or(SetupError::MissingWindow)?;
		let performance = window.performance().ok_or(SetupError::MissingPerformance)?;
		Ok(Self {
			window,
			performance,
			pending: Rc::new(RefCell::new(Pending::default())),
		})
	}

	fn next_id(&self) -> u32 {
		let mut pending = self.pending.borrow_mut();
		pending.next_id = pending.next_id.wrapping_add(1);
		pending.next_id
	}
}

impl FrameHost for WebHost {
	fn now(&self) -> f64 {
		self.performance.now()
	}

	fn request_frame(&self, cb: FrameCallback) -> Option<FrameHandle> {
		let id = self.next_id();
		let pending = self.pending.clone();
		let trampoline = Closure::once_into_js(move |ts: f64| {
			let entry = pending.borrow_mut().frames.remove(&id);
			if let Some((_, cb)) = entry {
				cb(ts);
			}
		});
		match self.window.request_animation_frame(trampoline.unchecked_ref()) {
			Ok(raf) => {
				self.pending.borrow_mut().frames.insert(id, (raf, cb));
				Some(FrameHandle(id))
			}
			Err(e) => {
				warn!("trust-graph: requestAnimationFrame failed: {e:?}");
				None
			}
		}
	}

	fn cancel_frame(&self, handle: FrameHandle) {
		let entry = self.pending.borrow_mut().frames.remove(&handle.0);
		if let Some((raf, _)) = entry {
			let _ = self.window.cancel_animation_frame(raf);
		}
	}

	fn set_timeout(&self, cb: TimerCallback, ms: f64) -> TimerHandle {
		let id = self.next_id();
		let pending = self.pending.clone();
		let trampoline = Closure::once_into_js(move || {
			let entry = pending.borrow_mut().timers.remove(&id);
			if let Some((_, cb)) = entry {
				cb();
			}
		});
		let delay = ms.max(0.0).round() as i32;
		match self
			.window
			.set_timeout_with_callback_and_timeout_and_arguments_0(trampoline.unchecked_ref(), delay)
		{
			Ok(timer) => {
				self.pending.borrow_mut().timers.insert(id, (timer, cb));
			}
			Err(e) => warn!("trust-graph: setTimeout failed: {e:?}"),
		}
		TimerHandle(id)
	}

	fn clear_timeout(&self, handle: TimerHandle) {
		let entry = self.pending.borrow_mut().timers.remove(&handle.0);
		if let Some((timer, _)) = entry {
			self.window.clear_timeout_with_handle(timer);
		}
	}
}
