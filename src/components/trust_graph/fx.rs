//! Transient visual effects the render loop keeps alive while they last.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Something with time-limited elements that keep the loop animating.
pub trait FxLayer {
	/// Drops everything expired at `now_ms`.
	fn prune(&mut self, now_ms: f64);
	fn active_count(&self) -> usize;
}

impl<T: FxLayer> FxLayer for Rc<RefCell<T>> {
	fn prune(&mut self, now_ms: f64) {
		self.borrow_mut().prune(now_ms);
	}

	fn active_count(&self) -> usize {
		self.borrow().active_count()
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticleKind {
	Spark,
	Pulse,
	Burst,
}

/// A particle travelling along a trustline from `source` to `target`.
#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
	pub kind: ParticleKind,
	pub edge_key: String,
	pub born_ms: f64,
	pub ttl_ms: f64,
}

impl Particle {
	pub fn expires_at(&self) -> f64 {
		self.born_ms + self.ttl_ms
	}

	/// Travel fraction in `0..=1` at `now_ms`.
	pub fn progress(&self, now_ms: f64) -> f64 {
		if self.ttl_ms <= 0.0 {
			return 1.0;
		}
		((now_ms - self.born_ms) / self.ttl_ms).clamp(0.0, 1.0)
	}
}

/// Spark, pulse and burst buffers, each ordered by birth time.
#[derive(Debug, Default)]
pub struct ParticleBuffers {
	pub sparks: VecDeque<Particle>,
	pub pulses: VecDeque<Particle>,
	pub bursts: VecDeque<Particle>,
	cap: Option<usize>,
}

impl ParticleBuffers {
	pub fn new(cap: Option<usize>) -> Self {
		Self {
			cap,
			..Self::default()
		}
	}

	pub fn push(&mut self, particle: Particle) {
		let buffer = match particle.kind {
			ParticleKind::Spark => &mut self.sparks,
			ParticleKind::Pulse => &mut self.pulses,
			ParticleKind::Burst => &mut self.bursts,
		};
		// births arrive in order; keep it that way if one is back-dated
		let at = buffer
			.iter()
			.rposition(|p| p.born_ms <= particle.born_ms)
			.map_or(0, |i| i + 1);
		buffer.insert(at, particle);
	}

	pub fn len(&self) -> usize {
		self.sparks.len() + self.pulses.len() + self.bursts.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn iter(&self) -> impl Iterator<Item = &Particle> {
		self.sparks.iter().chain(self.pulses.iter()).chain(self.bursts.iter())
	}

	/// Drops the oldest particles across all buffers until at most `cap` remain.
	/// Works out how many to take from each front, then drains each once.
	pub fn enforce_cap(&mut self, cap: usize) {
		let excess = self.len().saturating_sub(cap);
		if excess == 0 {
			return;
		}
		let mut cut = [0usize; 3];
		for _ in 0..excess {
			let fronts = [
				self.sparks.get(cut[0]),
				self.pulses.get(cut[1]),
				self.bursts.get(cut[2]),
			];
			let oldest = fronts
				.iter()
				.enumerate()
				.filter_map(|(i, p)| p.map(|p| (i, p.born_ms)))
				.min_by(|a, b| a.1.total_cmp(&b.1))
				.map(|(i, _)| i);
			match oldest {
				Some(i) => cut[i] += 1,
				None => break,
			}
		}
		self.sparks.drain(..cut[0]);
		self.pulses.drain(..cut[1]);
		self.bursts.drain(..cut[2]);
	}
}

impl FxLayer for ParticleBuffers {
	fn prune(&mut self, now_ms: f64) {
		for buffer in [&mut self.sparks, &mut self.pulses, &mut self.bursts] {
			buffer.retain(|p| p.expires_at() > now_ms);
		}
		if let Some(cap) = self.cap {
			self.enforce_cap(cap);
		}
	}

	fn active_count(&self) -> usize {
		self.len()
	}
}

/// Trustlines highlighted until a deadline.
#[derive(Debug, Default)]
pub struct EdgeHighlights {
	active: HashMap<String, f64>,
}

impl EdgeHighlights {
	pub fn new() -> Self {
		Self::default()
	}

	/// Highlights `key` until `until_ms`, extending an existing highlight.
	pub fn activate(&mut self, key: impl Into<String>, until_ms: f64) {
		let entry = self.active.entry(key.into()).or_insert(until_ms);
		*entry = entry.max(until_ms);
	}

	#[cfg(test)]
	pub fn is_active(&self, key: &str) -> bool {
		self.active.contains_key(key)
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.active.keys().map(String::as_str)
	}
}

impl FxLayer for EdgeHighlights {
	fn prune(&mut self, now_ms: f64) {
		self.active.retain(|_, until| *until > now_ms);
	}

	fn active_count(&self) -> usize {
		self.active.len()
	}
}

/// Full-viewport flash, drawn in screen space and fading per frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlashOverlay {
	strength: f64,
}

impl FlashOverlay {
	pub fn trigger(&mut self, strength: f64) {
		self.strength = self.strength.max(strength.clamp(0.0, 1.0));
	}

	pub fn strength(&self) -> f64 {
		self.strength
	}

	pub fn is_active(&self) -> bool {
		self.strength > 0.0
	}

	/// One frame's worth of fade.
	pub fn decay(&mut self, step: f64) {
		self.strength = (self.strength - step).max(0.0);
	}
}
