//! Service threads running a body's activity.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

use aorta_queue::{BodyId, Request};

use crate::body::Body;
use crate::immediate::ImmediateService;
use crate::proxy::Proxy;
use crate::receiver::Ack;
use crate::reply::ReplyRouter;
use crate::service::Service;

/// Serving policy of an active object, run on its service thread.
pub trait Activity<T: Send + Sync + 'static>: Send + 'static {
	/// Runs once before serving starts.
	fn init_activity(&mut self, _body: &Body<T>) {}

	/// Serves requests until the body terminates. Defaults to FIFO service.
	fn run_activity(&mut self, body: &Body<T>) {
		Service::new(body).fifo_serving();
	}

	/// Runs once after serving stopped, before the body is terminated.
	fn end_activity(&mut self, _body: &Body<T>) {}
}

/// Oldest-first service of every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoActivity;

impl<T: Send + Sync + 'static> Activity<T> for FifoActivity {}

/// Closures serve as the activity's run step.
impl<T, F> Activity<T> for F
where
	T: Send + Sync + 'static,
	F: FnMut(&Body<T>) + Send + 'static,
{
	fn run_activity(&mut self, body: &Body<T>) {
		self(body);
	}
}

/// A body paired with the activity that will serve it.
pub struct ActiveObject<T, A> {
	body: Body<T>,
	activity: A,
}

impl<T, A> ActiveObject<T, A>
where
	T: Send + Sync + 'static,
	A: Activity<T>,
{
	pub fn new(body: Body<T>, activity: A) -> Self {
		Self { body, activity }
	}

	/// Starts the service thread, named after the body's configuration.
	pub fn spawn(self) -> std::io::Result<ActiveHandle<T>> {
		let Self { body, mut activity } = self;
		let body = Arc::new(body);
		let name = body.config().thread_name();
		tracing::trace!(body = %body.id(), thread = %name, "activity.spawn");

		let worker = Arc::clone(&body);
		let thread = std::thread::Builder::new().name(name).spawn(move || run(&worker, &mut activity))?;
		Ok(ActiveHandle { body, thread: Some(thread) })
	}
}

fn run<T, A>(body: &Body<T>, activity: &mut A)
where
	T: Send + Sync + 'static,
	A: Activity<T>,
{
	tracing::debug!(body = %body.id(), name = body.name(), "activity.start");
	let outcome = catch_unwind(AssertUnwindSafe(|| {
		activity.init_activity(body);
		activity.run_activity(body);
		activity.end_activity(body);
	}));
	if outcome.is_err() {
		tracing::error!(body = %body.id(), name = body.name(), "activity.panicked");
	}
	body.terminate();
	tracing::debug!(body = %body.id(), name = body.name(), "activity.end");
}

/// Owner-side handle on a running active object.
///
/// Dropping the handle terminates the body without waiting for its thread.
pub struct ActiveHandle<T: Send + Sync + 'static> {
	body: Arc<Body<T>>,
	thread: Option<JoinHandle<()>>,
}

impl<T: Send + Sync + 'static> ActiveHandle<T> {
	pub fn id(&self) -> BodyId {
		self.body.id()
	}

	pub fn body(&self) -> &Arc<Body<T>> {
		&self.body
	}

	/// Delivers `request` as if it arrived from the transport.
	pub fn deliver(&self, request: Request) -> Ack {
		self.body.receive_request(request)
	}

	/// Caller-side stand-in whose replies are routed through `replies`.
	///
	/// `replies` must be the sink this body was built with.
	pub fn proxy(&self, replies: Arc<ReplyRouter>) -> Proxy<T> {
		Proxy::new(Arc::clone(&self.body), replies)
	}

	pub fn is_active(&self) -> bool {
		self.body.is_active()
	}

	/// Stops the body; the service thread exits after its current request.
	pub fn terminate(&self) {
		self.body.terminate();
	}

	/// Waits for the service thread to exit.
	pub fn join(mut self) -> std::thread::Result<()> {
		match self.thread.take() {
			Some(thread) => thread.join(),
			None => Ok(()),
		}
	}

	pub fn register_immediate_service(&self, service: ImmediateService) -> bool {
		self.body.receiver().services().register(service)
	}

	pub fn unregister_immediate_service(&self, service: &ImmediateService) -> usize {
		self.body.receiver().services().unregister(service)
	}

	/// True while an immediate service runs on some delivering thread.
	pub fn is_in_immediate_service(&self) -> bool {
		self.body.receiver().is_in_immediate_service()
	}
}

impl<T: Send + Sync + 'static> Drop for ActiveHandle<T> {
	fn drop(&mut self) {
		if self.thread.is_some() {
			self.body.terminate();
		}
	}
}

impl<T: Send + Sync + 'static> std::fmt::Debug for ActiveHandle<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ActiveHandle")
			.field("body", &self.body)
			.field("running", &self.thread.as_ref().is_some_and(|t| !t.is_finished()))
			.finish()
	}
}
