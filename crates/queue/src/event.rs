//! Queue change notifications.

use tokio::sync::broadcast;

use crate::request::{BodyId, Request};

/// Notification emitted by a [`BlockingRequestQueue`](crate::BlockingRequestQueue).
///
/// Emitted after the queue lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
	/// A request was enqueued.
	Added {
		method: String,
		sender: BodyId,
		sequence: u64,
		pending: usize,
	},
	/// A request was taken out of the queue.
	Removed {
		method: String,
		sender: BodyId,
		sequence: u64,
		pending: usize,
	},
	/// The consumer parked waiting for a servable request.
	Waiting { pending: usize },
	/// Pending requests were discarded.
	Cleared { discarded: usize },
	/// The queue reached its terminal state.
	Destroyed { discarded: usize },
}

impl QueueEvent {
	pub(crate) fn added(request: &Request, pending: usize) -> Self {
		Self::Added {
			method: request.method_name().to_owned(),
			sender: request.sender(),
			sequence: request.sequence(),
			pending,
		}
	}

	pub(crate) fn removed(request: &Request, pending: usize) -> Self {
		Self::Removed {
			method: request.method_name().to_owned(),
			sender: request.sender(),
			sequence: request.sequence(),
			pending,
		}
	}
}

/// Fire-and-forget sink for queue events. Must not block and must not call back
/// into the emitting queue's blocking operations.
pub trait QueueObserver: Send + Sync {
	fn on_event(&self, owner: BodyId, event: &QueueEvent);
}

/// Forwards queue events to `tracing` at trace level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl QueueObserver for TracingObserver {
	fn on_event(&self, owner: BodyId, event: &QueueEvent) {
		match event {
			QueueEvent::Added { method, sequence, pending, .. } => {
				tracing::trace!(%owner, method = %method, sequence, pending, "queue.added");
			}
			QueueEvent::Removed { method, sequence, pending, .. } => {
				tracing::trace!(%owner, method = %method, sequence, pending, "queue.removed");
			}
			QueueEvent::Waiting { pending } => tracing::trace!(%owner, pending, "queue.waiting"),
			QueueEvent::Cleared { discarded } => tracing::debug!(%owner, discarded, "queue.cleared"),
			QueueEvent::Destroyed { discarded } => tracing::debug!(%owner, discarded, "queue.destroyed"),
		}
	}
}

/// Publishes queue events on a tokio broadcast channel.
///
/// Sending never blocks: events are dropped when nobody subscribes, and slow
/// subscribers observe `Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
	tx: broadcast::Sender<(BodyId, QueueEvent)>,
}

impl BroadcastObserver {
	/// Creates an observer with a bounded event buffer.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	pub fn new(capacity: usize) -> Self {
		assert!(capacity > 0, "event buffer capacity must be > 0");
		let (tx, _) = broadcast::channel(capacity);
		Self { tx }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<(BodyId, QueueEvent)> {
		self.tx.subscribe()
	}
}

impl QueueObserver for BroadcastObserver {
	fn on_event(&self, owner: BodyId, event: &QueueEvent) {
		let _ = self.tx.send((owner, event.clone()));
	}
}
