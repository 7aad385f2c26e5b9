//! Delivery boundary between callers and a body's queue.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use aorta_queue::{FtToken, Request};

use crate::body::Body;
use crate::immediate::ImmediateServices;

/// Acknowledgement of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
	/// Enqueued (or matched an awaited placeholder); carries the queue's token.
	Queued(FtToken),
	/// Served on the delivering thread before returning.
	Immediate,
	/// Refused or failed; the failure was logged.
	Failed,
}

impl Ack {
	pub const fn is_failed(self) -> bool {
		matches!(self, Self::Failed)
	}
}

/// Receives requests on behalf of one body.
///
/// Immediate services are served on the delivering thread; everything else goes
/// through the body's queue. No failure crosses back to the caller: it is
/// logged and acknowledged as [`Ack::Failed`].
#[derive(Debug)]
pub struct RequestReceiver {
	services: Arc<ImmediateServices>,
	in_immediate: AtomicUsize,
}

impl RequestReceiver {
	pub fn new(services: Arc<ImmediateServices>) -> Self {
		Self {
			services,
			in_immediate: AtomicUsize::new(0),
		}
	}

	/// Allow-list of methods served on arrival.
	pub fn services(&self) -> &Arc<ImmediateServices> {
		&self.services
	}

	/// True while an immediate service is executing. Lock-free.
	pub fn is_in_immediate_service(&self) -> bool {
		self.in_immediate.load(Ordering::Acquire) > 0
	}

	pub fn receive_request<T: Send + Sync + 'static>(&self, request: Request, body: &Body<T>) -> Ack {
		if !body.is_active() {
			tracing::warn!(body = %body.id(), method = request.method_name(), sequence = request.sequence(), "receiver.refused");
			return Ack::Failed;
		}
		if self.services.is_immediate(&request) {
			return self.serve_immediately(request, body);
		}

		let (method, sequence) = (request.method_name().to_owned(), request.sequence());
		match catch_unwind(AssertUnwindSafe(|| self.enqueue(request, body))) {
			Ok(ack) => ack,
			Err(_) => {
				tracing::error!(body = %body.id(), method = %method, sequence, "receiver.enqueue.panicked");
				Ack::Failed
			}
		}
	}

	/// Hands `request` to an awaited placeholder or the queue.
	fn enqueue<T: Send + Sync + 'static>(&self, request: Request, body: &Body<T>) -> Ack {
		request.notify_reception(body.id());
		if let Some(placeholder) = body.take_awaited(request.sender(), request.sequence()) {
			return match placeholder.resolve(request) {
				Ok(()) => {
					tracing::trace!(body = %body.id(), sender = %placeholder.sender(), sequence = placeholder.sequence(), "receiver.resolved");
					Ack::Queued(FtToken::NON_FT)
				}
				Err(err) => {
					tracing::error!(body = %body.id(), error = %err, "receiver.resolve.failed");
					Ack::Failed
				}
			};
		}
		let method = request.method_name().to_owned();
		match body.queue().try_add(request) {
			Ok(token) => Ack::Queued(token),
			Err(_) => {
				tracing::warn!(body = %body.id(), method = %method, "receiver.refused");
				Ack::Failed
			}
		}
	}

	fn serve_immediately<T: Send + Sync + 'static>(&self, request: Request, body: &Body<T>) -> Ack {
		let _guard = ImmediateGuard::enter(&self.in_immediate);
		let method = request.method_name().to_owned();
		tracing::trace!(body = %body.id(), method = %method, sequence = request.sequence(), "receiver.immediate");
		match catch_unwind(AssertUnwindSafe(|| body.serve(request))) {
			Ok(Ok(())) => Ack::Immediate,
			Ok(Err(err)) => {
				tracing::warn!(body = %body.id(), method = %method, error = %err, "receiver.immediate.failed");
				Ack::Failed
			}
			Err(_) => {
				tracing::error!(body = %body.id(), method = %method, "receiver.immediate.panicked");
				Ack::Failed
			}
		}
	}
}

struct ImmediateGuard<'a>(&'a AtomicUsize);

impl<'a> ImmediateGuard<'a> {
	fn enter(counter: &'a AtomicUsize) -> Self {
		counter.fetch_add(1, Ordering::AcqRel);
		Self(counter)
	}
}

impl Drop for ImmediateGuard<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::AcqRel);
	}
}
