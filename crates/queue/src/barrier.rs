//! Method barriers and the SPMD barrier coordinator seam.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Rendezvous on a set of method names.
///
/// While a barrier is active its queue only hands out requests whose method is in
/// the tag set (plus control-plane requests). Each matching arrival counts down;
/// the barrier is released once `expected` matching requests arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBarrier {
	name: String,
	tags: Vec<String>,
	remaining: usize,
}

impl MethodBarrier {
	pub fn new<I, S>(name: impl Into<String>, tags: I, expected: usize) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			name: name.into(),
			tags: tags.into_iter().map(Into::into).collect(),
			remaining: expected,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn tags(&self) -> &[String] {
		&self.tags
	}

	/// Matching arrivals still expected.
	pub const fn remaining(&self) -> usize {
		self.remaining
	}

	pub const fn is_released(&self) -> bool {
		self.remaining == 0
	}

	pub fn matches(&self, method_name: &str) -> bool {
		self.tags.iter().any(|tag| tag == method_name)
	}

	/// Counts one arrival of `method_name`. Returns true if it matched.
	pub(crate) fn record_arrival(&mut self, method_name: &str) -> bool {
		if self.remaining == 0 || !self.matches(method_name) {
			return false;
		}
		self.remaining -= 1;
		true
	}
}

/// External coordinator of an SPMD group barrier.
///
/// Consulted by the barrier-aware removal path of
/// [`BlockingRequestQueue`](crate::BlockingRequestQueue). Implementations must call
/// [`notify_barrier_change`](crate::BlockingRequestQueue::notify_barrier_change) on
/// the queues they gate whenever their answer changes.
pub trait BarrierCoordinator: Send + Sync {
	/// Members that reached the pending barrier, or `None` when no barrier is pending.
	fn arrived(&self) -> Option<usize>;

	/// True when `method_name` may run while a barrier is pending.
	fn is_exempt(&self, method_name: &str) -> bool;

	/// True while fewer than `group_size` members reached the pending barrier.
	fn is_pending(&self, group_size: usize) -> bool {
		self.arrived().is_some_and(|arrived| arrived < group_size)
	}
}

#[derive(Debug, Default)]
struct LocalBarrierState {
	arrived: Option<usize>,
	exempt: HashSet<String>,
}

/// In-process [`BarrierCoordinator`] driven explicitly by its owner.
#[derive(Debug, Default)]
pub struct LocalBarrierCoordinator {
	state: Mutex<LocalBarrierState>,
}

impl LocalBarrierCoordinator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Opens a barrier with no member arrived yet.
	pub fn begin(&self) {
		self.state.lock().arrived = Some(0);
	}

	/// Counts one member arrival. Returns the new count, or `None` without a barrier.
	pub fn arrive(&self) -> Option<usize> {
		let mut state = self.state.lock();
		let arrived = state.arrived.as_mut()?;
		*arrived += 1;
		Some(*arrived)
	}

	/// Closes the pending barrier.
	pub fn finish(&self) {
		self.state.lock().arrived = None;
	}

	/// Lets `method_name` run while a barrier is pending.
	pub fn exempt(&self, method_name: impl Into<String>) {
		self.state.lock().exempt.insert(method_name.into());
	}
}

impl BarrierCoordinator for LocalBarrierCoordinator {
	fn arrived(&self) -> Option<usize> {
		self.state.lock().arrived
	}

	fn is_exempt(&self, method_name: &str) -> bool {
		self.state.lock().exempt.contains(method_name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn barrier_counts_matching_arrivals_only() {
		let mut barrier = MethodBarrier::new("exchange", ["send_border", "recv_border"], 2);
		assert!(!barrier.record_arrival("compute"));
		assert!(barrier.record_arrival("send_border"));
		assert_eq!(barrier.remaining(), 1);
		assert!(barrier.record_arrival("recv_border"));
		assert!(barrier.is_released());
		assert!(!barrier.record_arrival("send_border"));
	}

	#[test]
	fn local_coordinator_pending_against_group_size() {
		let coordinator = LocalBarrierCoordinator::new();
		assert!(!coordinator.is_pending(3));

		coordinator.begin();
		assert!(coordinator.is_pending(3));
		coordinator.arrive();
		coordinator.arrive();
		assert!(coordinator.is_pending(3));
		assert!(!coordinator.is_pending(2));
		coordinator.arrive();
		assert!(!coordinator.is_pending(3));

		coordinator.finish();
		assert_eq!(coordinator.arrive(), None);
	}
}
