//! Caller-side stand-in for an active object.

use std::sync::Arc;

use aorta_queue::{BodyId, Caller, MethodCall, Priority, Request};

use crate::body::Body;
use crate::error::DeliveryError;
use crate::receiver::Ack;
use crate::reply::{PendingReply, ReplyRouter};

/// Builds requests for one target body and delivers them in-process.
///
/// Two-way calls register their reply route before delivery, so replies from
/// immediate services cannot overtake the registration.
pub struct Proxy<T> {
	caller: Caller,
	body: Arc<Body<T>>,
	replies: Arc<ReplyRouter>,
}

impl<T: Send + Sync + 'static> Proxy<T> {
	/// Creates a proxy with a fresh caller identity.
	pub fn new(body: Arc<Body<T>>, replies: Arc<ReplyRouter>) -> Self {
		Self::with_caller(Caller::new(), body, replies)
	}

	pub fn with_caller(caller: Caller, body: Arc<Body<T>>, replies: Arc<ReplyRouter>) -> Self {
		Self { caller, body, replies }
	}

	pub fn caller(&self) -> &Caller {
		&self.caller
	}

	pub fn target(&self) -> BodyId {
		self.body.id()
	}

	/// Two-way call.
	pub fn call(&self, call: impl MethodCall) -> Result<PendingReply, DeliveryError> {
		self.send_two_way(self.caller.request(call).build())
	}

	/// Two-way control-plane call served ahead of ordinary requests.
	pub fn call_non_functional(&self, call: impl MethodCall, priority: Priority) -> Result<PendingReply, DeliveryError> {
		self.send_two_way(self.caller.request(call).non_functional(priority).build())
	}

	/// One-way call; no reply is produced.
	pub fn call_one_way(&self, call: impl MethodCall) -> Result<Ack, DeliveryError> {
		self.forward(self.caller.request(call).one_way().build())
	}

	/// Delivers an already built request, returning its pending reply when two-way.
	pub fn send(&self, request: Request) -> Result<Option<PendingReply>, DeliveryError> {
		if request.is_one_way() {
			return self.forward(request).map(|_| None);
		}
		self.send_two_way(request).map(Some)
	}

	fn send_two_way(&self, request: Request) -> Result<PendingReply, DeliveryError> {
		request.ensure_forwardable()?;
		let pending = self.replies.expect(request.sender(), request.sequence());
		if let Err(err) = self.forward(request) {
			self.replies.cancel(pending.sender(), pending.sequence());
			return Err(err);
		}
		Ok(pending)
	}

	/// Hands `request` to the target's receiver. Only remote requests travel.
	pub fn forward(&self, request: Request) -> Result<Ack, DeliveryError> {
		request.ensure_forwardable()?;
		let method = request.method_name().to_owned();
		match self.body.receive_request(request) {
			Ack::Failed => Err(DeliveryError::Refused {
				body: self.body.id(),
				method,
			}),
			ack => Ok(ack),
		}
	}
}

impl<T: Send + Sync + 'static> std::fmt::Debug for Proxy<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Proxy")
			.field("caller", &self.caller.id())
			.field("target", &self.body.id())
			.finish_non_exhaustive()
	}
}
