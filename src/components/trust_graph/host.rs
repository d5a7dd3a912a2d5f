//! Clock and scheduling capability handed to every time-driven component.
//!
//! The browser implementation lives in `web_host`; `ManualHost` is a
//! deterministic stand-in where time only moves when told to.

use std::cell::Cell;
#[cfg(test)]
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u32);

pub type FrameCallback = Box<dyn FnOnce(f64)>;
pub type TimerCallback = Box<dyn FnOnce()>;

pub trait FrameHost {
	/// Milliseconds on a monotonic clock.
	fn now(&self) -> f64;
	/// Runs `cb` with the frame timestamp at the next vsync. `None` means
	/// the request was refused and `cb` was dropped.
	fn request_frame(&self, cb: FrameCallback) -> Option<FrameHandle>;
	fn cancel_frame(&self, handle: FrameHandle);
	fn set_timeout(&self, cb: TimerCallback, ms: f64) -> TimerHandle;
	fn clear_timeout(&self, handle: TimerHandle);
}

/// Monotonic run token. Delayed work captures the token when scheduled and
/// does nothing if a newer run has started by the time it fires.
#[derive(Clone, Debug, Default)]
pub struct RunEpoch(Rc<Cell<u64>>);

impl RunEpoch {
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts a new run, superseding all outstanding tokens.
	pub fn bump(&self) -> u64 {
		let next = self.0.get() + 1;
		self.0.set(next);
		next
	}

	pub fn current(&self) -> u64 {
		self.0.get()
	}

	pub fn is_current(&self, token: u64) -> bool {
		self.0.get() == token
	}
}

#[cfg(test)]
const FRAME_INTERVAL_MS: f64 = 1000.0 / 60.0;

/// First 60 Hz boundary strictly after `now`; a time within float noise of a
/// boundary counts as on it.
#[cfg(test)]
fn next_vsync(now: f64) -> f64 {
	((now / FRAME_INTERVAL_MS + 1e-6).floor() + 1.0) * FRAME_INTERVAL_MS
}

#[cfg(test)]
#[derive(Default)]
struct ManualState {
	now: f64,
	next_id: u32,
	frames: Vec<(u32, FrameCallback)>,
	timers: Vec<(u32, f64, TimerCallback)>,
	frames_requested: usize,
	timers_set: usize,
	refuse_frames: bool,
}

/// Deterministic host: frames and timers only run from [`advance`](Self::advance)
/// and [`run_frames`](Self::run_frames).
#[cfg(test)]
#[derive(Clone, Default)]
pub struct ManualHost {
	state: Rc<RefCell<ManualState>>,
}

#[cfg(test)]
impl ManualHost {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_now(&self, now: f64) {
		self.state.borrow_mut().now = now;
	}

	/// Makes `request_frame` fail, like a browser without
	/// `requestAnimationFrame`.
	pub fn set_refuse_frames(&self, refuse: bool) {
		self.state.borrow_mut().refuse_frames = refuse;
	}

	pub fn pending_frames(&self) -> usize {
		self.state.borrow().frames.len()
	}

	pub fn pending_timers(&self) -> usize {
		self.state.borrow().timers.len()
	}

	pub fn frames_requested(&self) -> usize {
		self.state.borrow().frames_requested
	}

	pub fn timers_set(&self) -> usize {
		self.state.borrow().timers_set
	}

	/// Runs every frame callback queued so far at the current time.
	/// Frames requested from inside a callback wait for the next call.
	pub fn run_frames(&self) -> usize {
		let (now, frames) = {
			let mut state = self.state.borrow_mut();
			(state.now, std::mem::take(&mut state.frames))
		};
		let count = frames.len();
		for (_, cb) in frames {
			cb(now);
		}
		count
	}

	/// Moves the clock forward by `ms`, firing timers at their deadlines and
	/// vsync frames on 60 Hz boundaries, in time order.
	pub fn advance(&self, ms: f64) {
		let end = self.state.borrow().now + ms;
		loop {
			let (next_frame, next_timer) = {
				let state = self.state.borrow();
				let frame_at = (!state.frames.is_empty())
					.then(|| next_vsync(state.now));
				let timer = state
					.timers
					.iter()
					.min_by(|a, b| a.1.total_cmp(&b.1))
					.map(|t| (t.0, t.1));
				(frame_at, timer)
			};

			let timer_first = match (next_frame, next_timer) {
				(_, Some((_, at))) if at > end => None,
				(Some(f), Some((_, at))) => Some(at <= f),
				(None, Some(_)) => Some(true),
				_ => None,
			};

			match (timer_first, next_frame) {
				(Some(true), _) => {
					let (id, at) = next_timer.unwrap_or_default();
					let cb = {
						let mut state = self.state.borrow_mut();
						state.now = state.now.max(at);
						let pos = state.timers.iter().position(|t| t.0 == id);
						pos.map(|p| state.timers.remove(p).2)
					};
					if let Some(cb) = cb {
						cb();
					}
				}
				(_, Some(at)) if at <= end => {
					self.state.borrow_mut().now = at;
					self.run_frames();
				}
				_ => break,
			}
		}
		self.state.borrow_mut().now = end;
	}
}

#[cfg(test)]
impl FrameHost for ManualHost {
	fn now(&self) -> f64 {
		self.state.borrow().now
	}

	fn request_frame(&self, cb: FrameCallback) -> Option<FrameHandle> {
		let mut state = self.state.borrow_mut();
		if state.refuse_frames {
			return None;
		}
		state.next_id += 1;
		state.frames_requested += 1;
		let id = state.next_id;
		state.frames.push((id, cb));
		Some(FrameHandle(id))
	}

	fn cancel_frame(&self, handle: FrameHandle) {
		self.state.borrow_mut().frames.retain(|f| f.0 != handle.0);
	}

	fn set_timeout(&self, cb: TimerCallback, ms: f64) -> TimerHandle {
		let mut state = self.state.borrow_mut();
		state.next_id += 1;
		state.timers_set += 1;
		let id = state.next_id;
		let at = state.now + ms.max(0.0);
		state.timers.push((id, at, cb));
		TimerHandle(id)
	}

	fn clear_timeout(&self, handle: TimerHandle) {
		self.state.borrow_mut().timers.retain(|t| t.0 != handle.0);
	}
}
