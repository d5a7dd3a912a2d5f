//! Interaction hold and eased intensity.
//!
//! Discrete pointer/wheel marks become a 0..=1 signal that ramps in, holds
//! while input keeps arriving, waits a little, then ramps out. Intensity is a
//! pure function of the committed phase and the query time, so sampling never
//! advances state and a late sample cascades through every elapsed phase.

use std::cell::RefCell;
use std::rc::Rc;

use super::config::InteractionConfig;
use super::host::{FrameHost, TimerHandle};

/// Smallest timer delay, so a boundary that is due "now" still makes progress.
const MIN_TIMER_MS: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractionPhase {
	Idle,
	RampingUp,
	Holding,
	Delaying,
	RampingDown,
}

/// Committed phase, when it began, and the intensity it began at.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Envelope {
	phase: InteractionPhase,
	since: f64,
	from: f64,
}

impl Envelope {
	const IDLE: Self = Self {
		phase: InteractionPhase::Idle,
		since: 0.0,
		from: 0.0,
	};

	/// Time at which the current phase ends on its own, if it does.
	fn natural_end(&self, deadline: f64, cfg: &InteractionConfig) -> Option<f64> {
		match self.phase {
			InteractionPhase::Idle => None,
			InteractionPhase::RampingUp => Some(self.since + cfg.ease_in_ms * (1.0 - self.from)),
			InteractionPhase::Holding => Some(deadline.max(self.since)),
			InteractionPhase::Delaying => Some(self.since + cfg.ease_out_delay_ms),
			InteractionPhase::RampingDown => Some(self.since + cfg.ease_out_ms * self.from),
		}
	}

	fn successor(&self, at: f64) -> Self {
		let (phase, from) = match self.phase {
			InteractionPhase::Idle => return *self,
			InteractionPhase::RampingUp => (InteractionPhase::Holding, 1.0),
			InteractionPhase::Holding => (InteractionPhase::Delaying, 1.0),
			InteractionPhase::Delaying => (InteractionPhase::RampingDown, 1.0),
			InteractionPhase::RampingDown => (InteractionPhase::Idle, 0.0),
		};
		Self {
			phase,
			since: at,
			from,
		}
	}

	/// The envelope in effect at `t`, following every transition due by then.
	fn resolve(mut self, deadline: f64, cfg: &InteractionConfig, t: f64) -> Self {
		while let Some(end) = self.natural_end(deadline, cfg) {
			if t < end {
				break;
			}
			self = self.successor(end);
		}
		self
	}

	fn value(&self, cfg: &InteractionConfig, t: f64) -> f64 {
		let elapsed = (t - self.since).max(0.0);
		match self.phase {
			InteractionPhase::Idle => 0.0,
			InteractionPhase::RampingUp if cfg.ease_in_ms <= 0.0 => 1.0,
			InteractionPhase::RampingUp => (self.from + elapsed / cfg.ease_in_ms).min(1.0),
			InteractionPhase::Holding | InteractionPhase::Delaying => 1.0,
			InteractionPhase::RampingDown if cfg.ease_out_ms <= 0.0 => 0.0,
			InteractionPhase::RampingDown => (self.from - elapsed / cfg.ease_out_ms).max(0.0),
		}
	}
}

struct HoldState {
	config: InteractionConfig,
	envelope: Envelope,
	deadline: f64,
	interacting: bool,
	/// Pending timer and the host time it fires at.
	timer: Option<(TimerHandle, f64)>,
	on_change: Option<Rc<dyn Fn()>>,
}

/// Shared handle; clones drive the same envelope.
#[derive(Clone)]
pub struct InteractionHold {
	state: Rc<RefCell<HoldState>>,
	host: Rc<dyn FrameHost>,
}

impl InteractionHold {
	pub fn new(host: Rc<dyn FrameHost>, config: InteractionConfig) -> Self {
		Self {
			state: Rc::new(RefCell::new(HoldState {
				config,
				envelope: Envelope::IDLE,
				deadline: f64::NEG_INFINITY,
				interacting: false,
				timer: None,
				on_change: None,
			})),
			host,
		}
	}

	/// Called whenever the interacting flag flips or the envelope settles.
	pub fn set_on_change(&self, cb: impl Fn() + 'static) {
		self.state.borrow_mut().on_change = Some(Rc::new(cb));
	}

	/// Records interaction at the host's current time.
	pub fn mark(&self, instant: bool) {
		self.mark_at(self.host.now(), instant);
	}

	pub fn mark_at(&self, now: f64, instant: bool) {
		if self.record(now, instant) {
			self.notify();
		}
	}

	/// Records interaction without calling the change callback, for input
	/// whose own effect wakes the renderer later (a batched wheel zoom).
	pub fn mark_quiet(&self, instant: bool) {
		self.record(self.host.now(), instant);
	}

	/// Returns whether the interacting flag flipped on.
	fn record(&self, now: f64, instant: bool) -> bool {
		let mut state = self.state.borrow_mut();
		let cfg = state.config;
		let current = state.envelope.resolve(state.deadline, &cfg, now);
		state.envelope = if instant {
			Envelope {
				phase: InteractionPhase::Holding,
				since: now,
				from: 1.0,
			}
		} else {
			match current.phase {
				InteractionPhase::RampingUp | InteractionPhase::Holding => current,
				InteractionPhase::Idle | InteractionPhase::Delaying | InteractionPhase::RampingDown => {
					Envelope {
						phase: InteractionPhase::RampingUp,
						since: now,
						from: current.value(&cfg, now),
					}
				}
			}
		};
		state.deadline = now + cfg.hold_ms;
		let flipped = !state.interacting;
		state.interacting = true;
		// a timer due after the new deadline would hold the flag too long
		let arm = match state.timer {
			None => true,
			Some((handle, due)) if due > state.deadline => {
				state.timer = None;
				self.host.clear_timeout(handle);
				true
			}
			Some(_) => false,
		};
		drop(state);
		if arm {
			self.arm_timer(cfg.hold_ms);
		}
		flipped
	}

	pub fn intensity_at(&self, t: f64) -> f64 {
		let state = self.state.borrow();
		let cfg = state.config;
		state.envelope.resolve(state.deadline, &cfg, t).value(&cfg, t)
	}

	pub fn intensity(&self) -> f64 {
		self.intensity_at(self.host.now())
	}

	pub fn phase_at(&self, t: f64) -> InteractionPhase {
		let state = self.state.borrow();
		let cfg = state.config;
		state.envelope.resolve(state.deadline, &cfg, t).phase
	}

	/// The timer-maintained hold flag.
	#[cfg(test)]
	pub fn is_interacting(&self) -> bool {
		self.state.borrow().interacting
	}

	/// Whether `t` falls inside the current hold window.
	pub fn is_interacting_at(&self, t: f64) -> bool {
		let state = self.state.borrow();
		state.interacting && t < state.deadline
	}

	#[cfg(test)]
	pub fn has_timer(&self) -> bool {
		self.state.borrow().timer.is_some()
	}

	/// Resets to idle and cancels the pending timer. Safe to repeat.
	pub fn dispose(&self) {
		let mut state = self.state.borrow_mut();
		if let Some((timer, _)) = state.timer.take() {
			self.host.clear_timeout(timer);
		}
		state.envelope = Envelope::IDLE;
		state.deadline = f64::NEG_INFINITY;
		state.interacting = false;
	}

	fn arm_timer(&self, ms: f64) {
		let this = self.clone();
		let ms = ms.max(MIN_TIMER_MS);
		let handle = self.host.set_timeout(Box::new(move || this.on_timer()), ms);
		self.state.borrow_mut().timer = Some((handle, self.host.now() + ms));
	}

	fn on_timer(&self) {
		let now = self.host.now();
		let (next, notify) = {
			let mut state = self.state.borrow_mut();
			state.timer = None;
			if now < state.deadline {
				// marks since arming only moved the deadline
				(Some(state.deadline - now), false)
			} else {
				let cfg = state.config;
				let was_interacting = state.interacting;
				state.interacting = false;
				state.envelope = state.envelope.resolve(state.deadline, &cfg, now);
				let next = state
					.envelope
					.natural_end(state.deadline, &cfg)
					.map(|end| end - now);
				let settled = state.envelope.phase == InteractionPhase::Idle;
				(next, was_interacting || settled)
			}
		};
		if let Some(ms) = next {
			self.arm_timer(ms);
		}
		if notify {
			self.notify();
		}
	}

	fn notify(&self) {
		let cb = self.state.borrow().on_change.clone();
		if let Some(cb) = cb {
			cb();
		}
	}
}
