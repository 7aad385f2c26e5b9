//! The body of an active object: target, queue, receiver and reply sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use aorta_queue::{
	BarrierCoordinator, BlockingRequestQueue, BodyId, CallFailure, Caller, FaultTolerance, MethodCall, QueueObserver, Reply, Request,
	ServeError,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::BodyConfig;
use crate::immediate::{ImmediateServices, TERMINATE_PREFIX};
use crate::receiver::{Ack, RequestReceiver};
use crate::reply::ReplySink;

/// Owner of one active target and everything needed to serve it.
///
/// The target is shared: immediate services run on the delivering thread while
/// the service thread serves queued requests, so `T` synchronizes its own state.
pub struct Body<T> {
	id: BodyId,
	config: BodyConfig,
	target: Arc<T>,
	queue: BlockingRequestQueue,
	receiver: RequestReceiver,
	replies: Arc<dyn ReplySink>,
	/// Own identity for internal calls.
	caller: Caller,
	/// Placeholders of requests announced but not yet received.
	awaited: Mutex<HashMap<(BodyId, u64), Request>>,
	active: AtomicBool,
}

/// Builder for [`Body`].
pub struct BodyBuilder<T> {
	target: Arc<T>,
	id: BodyId,
	config: BodyConfig,
	replies: Arc<dyn ReplySink>,
	immediate_services: Option<Arc<ImmediateServices>>,
	observers: Vec<Arc<dyn QueueObserver>>,
	fault_tolerance: Option<Arc<dyn FaultTolerance>>,
	coordinator: Option<Arc<dyn BarrierCoordinator>>,
}

impl<T: Send + Sync + 'static> BodyBuilder<T> {
	#[must_use]
	pub fn id(mut self, id: BodyId) -> Self {
		self.id = id;
		self
	}

	#[must_use]
	pub fn config(mut self, config: BodyConfig) -> Self {
		self.config = config;
		self
	}

	/// Shares an existing allow-list instead of building one from the config.
	#[must_use]
	pub fn immediate_services(mut self, services: Arc<ImmediateServices>) -> Self {
		self.immediate_services = Some(services);
		self
	}

	#[must_use]
	pub fn observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
		self.observers.push(observer);
		self
	}

	#[must_use]
	pub fn fault_tolerance(mut self, fault_tolerance: Arc<dyn FaultTolerance>) -> Self {
		self.fault_tolerance = Some(fault_tolerance);
		self
	}

	#[must_use]
	pub fn coordinator(mut self, coordinator: Arc<dyn BarrierCoordinator>) -> Self {
		self.coordinator = Some(coordinator);
		self
	}

	pub fn build(self) -> Body<T> {
		let mut queue = BlockingRequestQueue::builder(self.id);
		for observer in self.observers {
			queue = queue.observer(observer);
		}
		if let Some(fault_tolerance) = self.fault_tolerance {
			queue = queue.fault_tolerance(fault_tolerance);
		}
		if let Some(coordinator) = self.coordinator {
			queue = queue.coordinator(coordinator);
		}
		let services = self.immediate_services.unwrap_or_else(|| Arc::new(self.config.immediate_services()));
		tracing::debug!(body = %self.id, name = %self.config.name, immediate = services.len(), "body.created");

		Body {
			id: self.id,
			caller: Caller::with_id(self.id),
			config: self.config,
			target: self.target,
			queue: queue.build(),
			receiver: RequestReceiver::new(services),
			replies: self.replies,
			awaited: Mutex::new(HashMap::new()),
			active: AtomicBool::new(true),
		}
	}
}

impl<T: Send + Sync + 'static> Body<T> {
	/// Creates a body with the default configuration.
	pub fn new(target: T, replies: Arc<dyn ReplySink>) -> Self {
		Self::builder(Arc::new(target), replies).build()
	}

	pub fn builder(target: Arc<T>, replies: Arc<dyn ReplySink>) -> BodyBuilder<T> {
		BodyBuilder {
			target,
			id: BodyId::new(),
			config: BodyConfig::default(),
			replies,
			immediate_services: None,
			observers: Vec::new(),
			fault_tolerance: None,
			coordinator: None,
		}
	}

	pub fn id(&self) -> BodyId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.config.name
	}

	pub fn config(&self) -> &BodyConfig {
		&self.config
	}

	pub fn target(&self) -> &Arc<T> {
		&self.target
	}

	pub fn queue(&self) -> &BlockingRequestQueue {
		&self.queue
	}

	pub fn receiver(&self) -> &RequestReceiver {
		&self.receiver
	}

	/// Blocking-serve timeout from the configuration.
	pub fn service_timeout(&self) -> Option<Duration> {
		self.config.service_timeout()
	}

	/// False once terminated.
	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}

	/// Delivers `request` through this body's receiver.
	pub fn receive_request(&self, request: Request) -> Ack {
		self.receiver.receive_request(request, self)
	}

	/// Serves `request` on the calling thread and delivers its reply.
	///
	/// Methods named with the termination prefix terminate the body instead of
	/// executing. Reply delivery failures are logged, never returned.
	pub fn serve(&self, request: Request) -> Result<(), ServeError> {
		if request.method_name().starts_with(TERMINATE_PREFIX) {
			tracing::debug!(body = %self.id, method = request.method_name(), "body.serve.terminate");
			self.terminate();
			if !request.is_one_way() {
				self.send_reply(Reply::new(request.sender(), request.sequence(), request.method_name(), Ok(Value::Null)));
			}
			return Ok(());
		}
		tracing::trace!(body = %self.id, method = request.method_name(), sequence = request.sequence(), "body.serve");
		if let Some(reply) = request.serve(&*self.target)? {
			self.send_reply(reply);
		}
		Ok(())
	}

	/// Delivers `reply`, retrying once with the delivery failure as result.
	fn send_reply(&self, reply: Reply) {
		let Err(undelivered) = self.replies.send_reply(reply) else {
			return;
		};
		tracing::warn!(body = %self.id, error = %undelivered, "body.reply.retry");
		let fallback = undelivered.reply.with_failure(CallFailure::Delivery(undelivered.error.to_string()));
		if let Err(retry) = self.replies.send_reply(fallback) {
			tracing::error!(
				body = %self.id,
				method = undelivered.reply.method_name(),
				error = %undelivered.error,
				retry_error = %retry.error,
				"body.reply.failed"
			);
		}
	}

	/// Runs `call` synchronously against the target as a body-internal request.
	pub fn call_internal(&self, call: impl MethodCall) -> Result<Value, CallFailure> {
		let request = self.caller.request(call).internal().build();
		match request.serve(&*self.target) {
			Ok(Some(reply)) => reply.into_result(),
			Ok(None) => Ok(Value::Null),
			Err(ServeError::OneWay { source, .. }) => Err(source),
			Err(err) => Err(CallFailure::Raised(err.to_string())),
		}
	}

	/// Reserves the queue position of request `sequence` of `sender` before it arrives.
	///
	/// The placeholder is enqueued now; serving it blocks until the matching
	/// request is received, which then takes its place instead of being enqueued.
	pub fn expect_request(&self, sender: BodyId, sequence: u64) -> Request {
		let placeholder = Request::awaited(sender, sequence);
		self.awaited.lock().insert((sender, sequence), placeholder.clone());
		self.queue.add(placeholder.clone());
		tracing::debug!(body = %self.id, %sender, sequence, "body.expect_request");
		placeholder
	}

	pub(crate) fn take_awaited(&self, sender: BodyId, sequence: u64) -> Option<Request> {
		self.awaited.lock().remove(&(sender, sequence))
	}

	/// Stops the body: the queue is destroyed and the service loop wakes up.
	///
	/// Two-way requests still queued are answered with
	/// [`CallFailure::Terminated`]. Later deliveries are refused. Idempotent.
	pub fn terminate(&self) {
		if !self.active.swap(false, Ordering::AcqRel) {
			return;
		}
		let discarded = self.queue.destroy();
		self.awaited.lock().clear();
		tracing::debug!(body = %self.id, name = %self.config.name, discarded = discarded.len(), "body.terminate");
		for request in discarded.iter().filter(|r| !r.is_one_way()) {
			let reply = Reply::new(request.sender(), request.sequence(), request.method_name(), Err(CallFailure::Terminated));
			if let Err(undelivered) = self.replies.send_reply(reply) {
				tracing::debug!(body = %self.id, error = %undelivered, "body.reply.abandoned");
			}
		}
	}
}

impl<T> std::fmt::Debug for Body<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Body")
			.field("id", &self.id)
			.field("name", &self.config.name)
			.field("active", &self.active.load(Ordering::Relaxed))
			.field("queue", &self.queue)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use aorta_queue::{CallFailure, call};
	use serde_json::json;

	use super::*;
	use crate::error::{ReplyError, Undelivered};
	use crate::reply::ReplyRouter;

	#[derive(Default)]
	struct Counter {
		hits: AtomicUsize,
	}

	fn bump() -> impl MethodCall {
		call("bump", |c: &Counter| Ok(json!(c.hits.fetch_add(1, Ordering::SeqCst) + 1)))
	}

	/// Sink failing the first `failures` deliveries and recording the rest.
	struct FlakySink {
		failures: AtomicUsize,
		delivered: Mutex<Vec<Reply>>,
	}

	impl FlakySink {
		fn new(failures: usize) -> Self {
			Self {
				failures: AtomicUsize::new(failures),
				delivered: Mutex::new(Vec::new()),
			}
		}
	}

	impl ReplySink for FlakySink {
		fn send_reply(&self, reply: Reply) -> Result<(), Undelivered> {
			if self.failures.load(Ordering::SeqCst) > 0 {
				self.failures.fetch_sub(1, Ordering::SeqCst);
				let (sender, sequence) = (reply.sender(), reply.sequence());
				return Err(Undelivered {
					reply,
					error: ReplyError::CallerGone { sender, sequence },
				});
			}
			self.delivered.lock().push(reply);
			Ok(())
		}
	}

	#[test]
	fn serve_delivers_reply() {
		let router = Arc::new(ReplyRouter::new());
		let body = Body::new(Counter::default(), Arc::clone(&router) as Arc<dyn ReplySink>);
		let caller = Caller::new();
		let request = caller.request(bump()).build();
		let pending = router.expect(caller.id(), request.sequence());

		body.serve(request).unwrap();
		assert_eq!(pending.blocking_wait().unwrap().into_result(), Ok(json!(1)));
	}

	#[test]
	fn failed_delivery_is_retried_with_failure() {
		let sink = Arc::new(FlakySink::new(1));
		let body = Body::new(Counter::default(), Arc::clone(&sink) as Arc<dyn ReplySink>);

		body.serve(Caller::new().request(bump()).build()).unwrap();
		let delivered = sink.delivered.lock();
		assert_eq!(delivered.len(), 1);
		assert!(matches!(delivered[0].result(), Err(CallFailure::Delivery(_))));
	}

	#[test]
	fn retry_failure_is_only_logged() {
		let sink = Arc::new(FlakySink::new(2));
		let body = Body::new(Counter::default(), Arc::clone(&sink) as Arc<dyn ReplySink>);

		assert!(body.serve(Caller::new().request(bump()).build()).is_ok());
		assert!(sink.delivered.lock().is_empty());
		assert_eq!(body.target().hits.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn termination_prefix_terminates_instead_of_executing() {
		let body = Body::new(Counter::default(), Arc::new(ReplyRouter::new()));
		let request = Caller::new()
			.request(call("_terminate", |c: &Counter| Ok(json!(c.hits.fetch_add(1, Ordering::SeqCst)))))
			.one_way()
			.build();

		body.serve(request).unwrap();
		assert!(!body.is_active());
		assert!(body.queue().is_destroyed());
		assert_eq!(body.target().hits.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn terminate_answers_queued_callers() {
		let router = Arc::new(ReplyRouter::new());
		let body = Body::new(Counter::default(), Arc::clone(&router) as Arc<dyn ReplySink>);
		let caller = Caller::new();
		let two_way = caller.request(bump()).build();
		let pending = router.expect(caller.id(), two_way.sequence());
		body.receive_request(two_way);
		body.receive_request(caller.request(bump()).one_way().build());

		body.terminate();
		assert_eq!(pending.blocking_wait().unwrap().into_result(), Err(CallFailure::Terminated));
		assert_eq!(router.pending_count(), 0);
		assert_eq!(body.target().hits.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn two_way_termination_request_is_answered() {
		let router = Arc::new(ReplyRouter::new());
		let body = Body::new(Counter::default(), Arc::clone(&router) as Arc<dyn ReplySink>);
		let caller = Caller::new();
		let request = caller.request(call("_terminate", |_: &Counter| Ok(json!("unused")))).build();
		let pending = router.expect(caller.id(), request.sequence());

		body.serve(request).unwrap();
		assert!(!body.is_active());
		assert_eq!(pending.blocking_wait().unwrap().into_result(), Ok(Value::Null));
	}

	#[test]
	fn internal_calls_run_synchronously() {
		let body = Body::new(Counter::default(), Arc::new(ReplyRouter::new()));
		assert_eq!(body.call_internal(bump()), Ok(json!(1)));
		assert_eq!(body.call_internal(call("fail", |_: &Counter| Err("bad".to_string()))), Err(CallFailure::Raised("bad".into())));
		assert!(body.queue().is_empty());
	}

	#[test]
	fn terminate_is_idempotent() {
		let body = Body::new(Counter::default(), Arc::new(ReplyRouter::new()));
		body.queue().add(Caller::new().request(bump()).build());

		body.terminate();
		body.terminate();
		assert!(!body.is_active());
		assert!(body.queue().is_empty());
	}

	#[test]
	fn builder_applies_config() {
		let config = BodyConfig::from_toml_str("name = \"solver\"\nservice_timeout_ms = 5\nseed_default_immediate_services = false").unwrap();
		let body = Body::builder(Arc::new(Counter::default()), Arc::new(ReplyRouter::new())).config(config).build();

		assert_eq!(body.name(), "solver");
		assert_eq!(body.service_timeout(), Some(Duration::from_millis(5)));
		assert!(body.receiver().services().is_empty());
	}
}
