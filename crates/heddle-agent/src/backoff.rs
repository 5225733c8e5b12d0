// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::{Duration, Instant};

/// Exponential backoff with full jitter for the client retry loop.
///
/// Defaults: 1 s initial, 1.7x growth, randomization factor 1.0, 15 s
/// interval cap, and roughly three months of total elapsed time before
/// [`ExponentialBackOff::next_backoff`] gives up and returns `None`.
pub struct ExponentialBackOff {
	initial: Duration,
	multiplier: f64,
	randomization: f64,
	max_interval: Duration,
	max_elapsed: Duration,
	current: Duration,
	started: Instant,
}

impl ExponentialBackOff {
	pub fn new() -> Self {
		let initial = Duration::from_secs(1);
		Self {
			initial,
			multiplier: 1.7,
			randomization: 1.0,
			max_interval: Duration::from_secs(15),
			max_elapsed: Duration::from_secs(3 * 30 * 24 * 60 * 60),
			current: initial,
			started: Instant::now(),
		}
	}

	pub fn next_backoff(&mut self) -> Option<Duration> {
		if self.started.elapsed() > self.max_elapsed {
			return None;
		}

		let current = self.current.as_secs_f64();
		let delta = self.randomization * current;
		let low = (current - delta).max(0.0);
		let jittered = low + fastrand::f64() * 2.0 * delta;

		let next = current * self.multiplier;
		self.current = Duration::from_secs_f64(next.min(self.max_interval.as_secs_f64()));

		Some(Duration::from_secs_f64(jittered))
	}

	pub fn reset(&mut self) {
		self.current = self.initial;
		self.started = Instant::now();
	}
}

impl Default for ExponentialBackOff {
	fn default() -> Self {
		Self::new()
	}
}
