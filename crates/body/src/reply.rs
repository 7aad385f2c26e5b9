//! Reply routing back to callers.

use std::collections::HashMap;

use aorta_queue::{BodyId, Reply};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{ReplyError, Undelivered};

/// Destination of the replies a body produces.
pub trait ReplySink: Send + Sync {
	/// Delivers `reply` to its caller, handing it back on failure.
	fn send_reply(&self, reply: Reply) -> Result<(), Undelivered>;
}

/// [`ReplySink`] that completes [`PendingReply`] handles registered by callers.
///
/// Each two-way request gets a oneshot route keyed by its sender and sequence
/// number. The route is consumed by the reply.
#[derive(Debug, Default)]
pub struct ReplyRouter {
	pending: Mutex<HashMap<(BodyId, u64), oneshot::Sender<Reply>>>,
}

impl ReplyRouter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers interest in the reply to request `sequence` of `sender`.
	///
	/// A second registration for the same request replaces the first, whose
	/// handle then resolves to [`ReplyError::Abandoned`].
	pub fn expect(&self, sender: BodyId, sequence: u64) -> PendingReply {
		let (tx, rx) = oneshot::channel();
		if self.pending.lock().insert((sender, sequence), tx).is_some() {
			tracing::warn!(%sender, sequence, "reply.expect.replaced");
		}
		PendingReply { sender, sequence, rx }
	}

	/// Drops the route for a request that will never be answered.
	pub fn cancel(&self, sender: BodyId, sequence: u64) -> bool {
		self.pending.lock().remove(&(sender, sequence)).is_some()
	}

	/// Number of replies still awaited.
	pub fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}
}

impl ReplySink for ReplyRouter {
	fn send_reply(&self, reply: Reply) -> Result<(), Undelivered> {
		let (sender, sequence) = (reply.sender(), reply.sequence());
		let Some(tx) = self.pending.lock().remove(&(sender, sequence)) else {
			return Err(Undelivered {
				reply,
				error: ReplyError::NoPendingCaller { sender, sequence },
			});
		};
		tracing::trace!(%sender, sequence, method = reply.method_name(), "reply.send");
		tx.send(reply).map_err(|reply| Undelivered {
			reply,
			error: ReplyError::CallerGone { sender, sequence },
		})
	}
}

/// Caller-side handle on the reply to one request.
#[derive(Debug)]
pub struct PendingReply {
	sender: BodyId,
	sequence: u64,
	rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
	pub fn sender(&self) -> BodyId {
		self.sender
	}

	pub fn sequence(&self) -> u64 {
		self.sequence
	}

	/// Waits for the reply.
	pub async fn wait(self) -> Result<Reply, ReplyError> {
		let Self { sender, sequence, rx } = self;
		rx.await.map_err(|_| ReplyError::Abandoned { sender, sequence })
	}

	/// Waits for the reply on the current thread.
	///
	/// # Panics
	///
	/// Panics when called from within an async runtime; use [`wait`](Self::wait) there.
	pub fn blocking_wait(self) -> Result<Reply, ReplyError> {
		let Self { sender, sequence, rx } = self;
		rx.blocking_recv().map_err(|_| ReplyError::Abandoned { sender, sequence })
	}

	/// Takes the reply if it already arrived.
	pub fn try_take(&mut self) -> Option<Reply> {
		self.rx.try_recv().ok()
	}
}

#[cfg(test)]
mod tests {
	use aorta_queue::CallFailure;
	use serde_json::json;

	use super::*;

	#[tokio::test]
	async fn routed_reply_completes_waiter() {
		let router = ReplyRouter::new();
		let caller = BodyId::new();
		let pending = router.expect(caller, 7);

		router.send_reply(Reply::new(caller, 7, "add", Ok(json!(3)))).unwrap();
		let reply = pending.wait().await.unwrap();
		assert_eq!(reply.result(), &Ok(json!(3)));
		assert_eq!(router.pending_count(), 0);
	}

	#[test]
	fn unknown_reply_is_handed_back() {
		let router = ReplyRouter::new();
		let reply = Reply::new(BodyId::new(), 1, "add", Ok(json!(1)));

		let undelivered = router.send_reply(reply.clone()).unwrap_err();
		assert_eq!(undelivered.reply, reply);
		assert!(matches!(undelivered.error, ReplyError::NoPendingCaller { sequence: 1, .. }));
	}

	#[test]
	fn dropped_waiter_reports_caller_gone() {
		let router = ReplyRouter::new();
		let caller = BodyId::new();
		drop(router.expect(caller, 2));

		let undelivered = router.send_reply(Reply::new(caller, 2, "add", Err(CallFailure::Raised("x".into())))).unwrap_err();
		assert!(matches!(undelivered.error, ReplyError::CallerGone { sequence: 2, .. }));
	}

	#[test]
	fn cancelled_route_abandons_waiter() {
		let router = ReplyRouter::new();
		let caller = BodyId::new();
		let pending = router.expect(caller, 3);

		assert!(router.cancel(caller, 3));
		assert_eq!(pending.blocking_wait().unwrap_err(), ReplyError::Abandoned { sender: caller, sequence: 3 });
	}

	#[test]
	fn try_take_polls_without_blocking() {
		let router = ReplyRouter::new();
		let caller = BodyId::new();
		let mut pending = router.expect(caller, 4);
		assert!(pending.try_take().is_none());

		router.send_reply(Reply::new(caller, 4, "add", Ok(json!(null)))).unwrap();
		assert_eq!(pending.try_take().map(Reply::into_result), Some(Ok(json!(null))));
	}
}
