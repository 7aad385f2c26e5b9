//! Reified method invocations and their replies.

use std::any::{Any, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use uuid::Uuid;

use crate::barrier::MethodBarrier;
use crate::error::{CallFailure, RequestError, ServeError};
use crate::filter::RequestFilter;

/// Method name reported by an awaited placeholder before it is resolved.
pub const AWAITED_METHOD_NAME: &str = "<awaited>";

/// Object a request is served against.
///
/// Immediate services run concurrently with the service thread, so targets are
/// shared (`Sync`) and keep their mutable state behind interior mutability.
pub type ActiveTarget = dyn Any + Send + Sync;

/// Identity of a body (sender or receiver of requests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(Uuid);

impl BodyId {
	/// Creates a fresh random identity.
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}

	/// Wraps an existing UUID.
	pub const fn from_uuid(uuid: Uuid) -> Self {
		Self(uuid)
	}

	/// Returns the underlying UUID.
	pub const fn as_uuid(&self) -> &Uuid {
		&self.0
	}
}

impl Default for BodyId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for BodyId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Service priority of a non-functional (control-plane) request.
///
/// Orthogonal to arrival order: any elevated request is served before every
/// ordinary request, and `Immediate` before `Elevated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
	/// Plain arrival order.
	#[default]
	Normal,
	/// Served before any ordinary request.
	Elevated,
	/// Served before elevated and ordinary requests.
	Immediate,
}

impl Priority {
	/// Returns true for priorities tracked by the non-functional index.
	pub const fn is_elevated(self) -> bool {
		!matches!(self, Self::Normal)
	}

	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Normal => "normal",
			Self::Elevated => "elevated",
			Self::Immediate => "immediate",
		}
	}
}

/// The reflective half of a request: locates and invokes the target method.
pub trait MethodCall: Send + Sync + 'static {
	/// Name of the invoked method.
	fn method_name(&self) -> &str;

	/// Parameter type names, used for signature-qualified immediate services.
	fn parameter_types(&self) -> &[String] {
		&[]
	}

	/// Invokes the method on `target`.
	fn execute(&self, target: &ActiveTarget) -> Result<Value, CallFailure>;
}

/// [`MethodCall`] backed by a closure over a concrete target type.
pub struct FnCall<T, F> {
	name: String,
	parameters: Vec<String>,
	body: F,
	_target: PhantomData<fn(&T)>,
}

/// Builds a closure-backed method call.
pub fn call<T, F>(name: impl Into<String>, body: F) -> FnCall<T, F>
where
	T: Any + Send + Sync,
	F: Fn(&T) -> Result<Value, String> + Send + Sync + 'static,
{
	FnCall {
		name: name.into(),
		parameters: Vec::new(),
		body,
		_target: PhantomData,
	}
}

impl<T, F> FnCall<T, F> {
	/// Declares the parameter type names of this call.
	#[must_use]
	pub fn with_parameters<I, S>(mut self, parameters: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.parameters = parameters.into_iter().map(Into::into).collect();
		self
	}
}

impl<T, F> MethodCall for FnCall<T, F>
where
	T: Any + Send + Sync,
	F: Fn(&T) -> Result<Value, String> + Send + Sync + 'static,
{
	fn method_name(&self) -> &str {
		&self.name
	}

	fn parameter_types(&self) -> &[String] {
		&self.parameters
	}

	fn execute(&self, target: &ActiveTarget) -> Result<Value, CallFailure> {
		let target = target
			.downcast_ref::<T>()
			.ok_or(CallFailure::TargetMismatch { expected: type_name::<T>() })?;
		(self.body)(target).map_err(CallFailure::Raised)
	}
}

/// Result of serving a two-way request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
	sender: BodyId,
	sequence: u64,
	method_name: String,
	result: Result<Value, CallFailure>,
}

impl Reply {
	/// Creates a reply addressed to the sender of request `sequence`.
	pub fn new(sender: BodyId, sequence: u64, method_name: impl Into<String>, result: Result<Value, CallFailure>) -> Self {
		Self {
			sender,
			sequence,
			method_name: method_name.into(),
			result,
		}
	}

	/// Body the reply is addressed to.
	pub const fn sender(&self) -> BodyId {
		self.sender
	}

	/// Sequence number of the answered request.
	pub const fn sequence(&self) -> u64 {
		self.sequence
	}

	pub fn method_name(&self) -> &str {
		&self.method_name
	}

	/// Returned value or carried failure.
	pub fn result(&self) -> &Result<Value, CallFailure> {
		&self.result
	}

	pub fn into_result(self) -> Result<Value, CallFailure> {
		self.result
	}

	/// Same addressing, with the result replaced by `failure`.
	#[must_use]
	pub fn with_failure(&self, failure: CallFailure) -> Self {
		Self {
			sender: self.sender,
			sequence: self.sequence,
			method_name: self.method_name.clone(),
			result: Err(failure),
		}
	}
}

/// Request variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestVariant {
	/// Ordinary call delivered by a caller.
	Remote,
	/// Synchronous call issued by the body to itself.
	Internal,
	/// Placeholder for a request that has not been received yet.
	Awaited,
}

impl fmt::Display for RequestVariant {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Remote => "remote",
			Self::Internal => "internal",
			Self::Awaited => "awaited",
		})
	}
}

/// Forwarding-chain bookkeeping updated on each reception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Arrival {
	/// Number of bodies that received this request.
	pub hops: u32,
	/// Most recent receiver.
	pub last_receiver: Option<BodyId>,
}

struct Invocation {
	sender: BodyId,
	sequence: u64,
	call: Box<dyn MethodCall>,
	one_way: bool,
	functional: bool,
	priority: Priority,
	barrier: Option<MethodBarrier>,
}

struct AwaitedSlot {
	sender: BodyId,
	sequence: u64,
	resolved: OnceLock<Request>,
	lock: Mutex<()>,
	ready: Condvar,
}

impl AwaitedSlot {
	fn wait_resolved(&self) -> &Request {
		if let Some(request) = self.resolved.get() {
			return request;
		}
		let mut guard = self.lock.lock();
		loop {
			if let Some(request) = self.resolved.get() {
				return request;
			}
			self.ready.wait(&mut guard);
		}
	}
}

enum RequestKind {
	Remote(Invocation),
	Internal(Invocation),
	Awaited(AwaitedSlot),
}

struct RequestInner {
	kind: RequestKind,
	ignored: AtomicBool,
	served: AtomicBool,
	arrival: Mutex<Arrival>,
}

/// Shared handle to one reified invocation.
///
/// Cloning is cheap; clones refer to the same request. The payload never changes
/// after construction except for the ignore flag and the arrival bookkeeping.
#[derive(Clone)]
pub struct Request {
	inner: Arc<RequestInner>,
}

impl Request {
	/// Starts building a remote request.
	pub fn builder(sender: BodyId, sequence: u64, call: impl MethodCall) -> RequestBuilder {
		RequestBuilder {
			invocation: Invocation {
				sender,
				sequence,
				call: Box::new(call),
				one_way: false,
				functional: true,
				priority: Priority::Normal,
				barrier: None,
			},
			internal: false,
		}
	}

	/// Creates a placeholder for request `sequence` of `sender`, resolved later.
	pub fn awaited(sender: BodyId, sequence: u64) -> Self {
		Self::from_kind(RequestKind::Awaited(AwaitedSlot {
			sender,
			sequence,
			resolved: OnceLock::new(),
			lock: Mutex::new(()),
			ready: Condvar::new(),
		}))
	}

	fn from_kind(kind: RequestKind) -> Self {
		Self {
			inner: Arc::new(RequestInner {
				kind,
				ignored: AtomicBool::new(false),
				served: AtomicBool::new(false),
				arrival: Mutex::new(Arrival::default()),
			}),
		}
	}

	/// Resolved invocation, if any. Unresolved placeholders return `None`.
	fn invocation(&self) -> Option<&Invocation> {
		match &self.inner.kind {
			RequestKind::Remote(inv) | RequestKind::Internal(inv) => Some(inv),
			RequestKind::Awaited(slot) => slot.resolved.get().and_then(|request| request.invocation()),
		}
	}

	pub fn variant(&self) -> RequestVariant {
		match &self.inner.kind {
			RequestKind::Remote(_) => RequestVariant::Remote,
			RequestKind::Internal(_) => RequestVariant::Internal,
			RequestKind::Awaited(_) => RequestVariant::Awaited,
		}
	}

	pub fn sender(&self) -> BodyId {
		match &self.inner.kind {
			RequestKind::Remote(inv) | RequestKind::Internal(inv) => inv.sender,
			RequestKind::Awaited(slot) => slot.sender,
		}
	}

	/// Sequence number, monotonic per sender.
	pub fn sequence(&self) -> u64 {
		match &self.inner.kind {
			RequestKind::Remote(inv) | RequestKind::Internal(inv) => inv.sequence,
			RequestKind::Awaited(slot) => slot.sequence,
		}
	}

	pub fn method_name(&self) -> &str {
		self.invocation().map_or(AWAITED_METHOD_NAME, |inv| inv.call.method_name())
	}

	pub fn parameter_types(&self) -> &[String] {
		self.invocation().map_or(&[] as &[String], |inv| inv.call.parameter_types())
	}

	pub fn priority(&self) -> Priority {
		self.invocation().map_or(Priority::Normal, |inv| inv.priority)
	}

	/// True when no reply is expected.
	pub fn is_one_way(&self) -> bool {
		self.invocation().is_some_and(|inv| inv.one_way)
	}

	/// False for control-plane requests.
	pub fn is_functional(&self) -> bool {
		self.invocation().is_none_or(|inv| inv.functional)
	}

	/// Barrier installed when this request is enqueued.
	pub fn barrier(&self) -> Option<&MethodBarrier> {
		self.invocation().and_then(|inv| inv.barrier.as_ref())
	}

	pub fn matches<F: RequestFilter + ?Sized>(&self, filter: &F) -> bool {
		filter.accepts(self)
	}

	/// True when both handles refer to the same request.
	pub fn same_as(&self, other: &Request) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	pub fn is_ignored(&self) -> bool {
		self.inner.ignored.load(Ordering::Acquire)
	}

	/// Marks the request as a duplicate to be dropped instead of served.
	pub fn set_ignored(&self, ignored: bool) {
		self.inner.ignored.store(ignored, Ordering::Release);
	}

	pub fn is_served(&self) -> bool {
		self.inner.served.load(Ordering::Acquire)
	}

	/// Records that `receiver` received this request.
	pub fn notify_reception(&self, receiver: BodyId) {
		let mut arrival = self.inner.arrival.lock();
		arrival.hops = arrival.hops.saturating_add(1);
		arrival.last_receiver = Some(receiver);
	}

	pub fn arrival(&self) -> Arrival {
		*self.inner.arrival.lock()
	}

	/// Fails for requests that must never travel to another body.
	pub fn ensure_forwardable(&self) -> Result<(), RequestError> {
		match self.variant() {
			RequestVariant::Remote => Ok(()),
			variant => Err(RequestError::NotForwardable {
				variant,
				method: self.method_name().to_owned(),
			}),
		}
	}

	pub fn is_resolved(&self) -> bool {
		match &self.inner.kind {
			RequestKind::Awaited(slot) => slot.resolved.get().is_some(),
			_ => true,
		}
	}

	/// Supplies the real request to an awaited placeholder and wakes its server.
	pub fn resolve(&self, request: Request) -> Result<(), RequestError> {
		let RequestKind::Awaited(slot) = &self.inner.kind else {
			return Err(RequestError::NotAwaited(self.method_name().to_owned()));
		};
		if request.variant() == RequestVariant::Awaited {
			return Err(RequestError::NestedAwaited);
		}
		if request.sender() != slot.sender || request.sequence() != slot.sequence {
			return Err(RequestError::IdentityMismatch {
				expected_sender: slot.sender,
				expected_sequence: slot.sequence,
				sender: request.sender(),
				sequence: request.sequence(),
			});
		}
		slot.resolved.set(request).map_err(|_| RequestError::AlreadyResolved {
			sender: slot.sender,
			sequence: slot.sequence,
		})?;
		let _guard = slot.lock.lock();
		slot.ready.notify_all();
		Ok(())
	}

	/// Executes the call against `target`. At most once per request.
	///
	/// Two-way calls return their reply, with target failures carried inside it.
	/// One-way calls return `None`, or [`ServeError::OneWay`] when the target fails.
	/// Ignored requests are consumed without executing. Awaited placeholders block
	/// until resolved, then serve the resolved request.
	pub fn serve(&self, target: &ActiveTarget) -> Result<Option<Reply>, ServeError> {
		if self.inner.served.swap(true, Ordering::AcqRel) {
			return Err(ServeError::AlreadyServed {
				method: self.method_name().to_owned(),
				sequence: self.sequence(),
			});
		}
		if self.is_ignored() {
			tracing::trace!(method = self.method_name(), sequence = self.sequence(), "request.serve.ignored");
			return Ok(None);
		}
		match &self.inner.kind {
			RequestKind::Remote(inv) | RequestKind::Internal(inv) => execute(inv, target),
			RequestKind::Awaited(slot) => slot.wait_resolved().serve(target),
		}
	}
}

fn execute(inv: &Invocation, target: &ActiveTarget) -> Result<Option<Reply>, ServeError> {
	let result = catch_unwind(AssertUnwindSafe(|| inv.call.execute(target))).unwrap_or_else(|payload| {
		tracing::warn!(method = inv.call.method_name(), sequence = inv.sequence, "request.serve.panicked");
		Err(CallFailure::Panicked(panic_message(payload.as_ref())))
	});
	if inv.one_way {
		return match result {
			Ok(_) => Ok(None),
			Err(source) => Err(ServeError::OneWay {
				method: inv.call.method_name().to_owned(),
				source,
			}),
		};
	}
	Ok(Some(Reply::new(inv.sender, inv.sequence, inv.call.method_name(), result)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	payload
		.downcast_ref::<&str>()
		.map(|message| (*message).to_owned())
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "non-string panic payload".to_owned())
}

impl fmt::Debug for Request {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Request")
			.field("variant", &self.variant())
			.field("method", &self.method_name())
			.field("sender", &self.sender())
			.field("sequence", &self.sequence())
			.field("priority", &self.priority().as_str())
			.field("one_way", &self.is_one_way())
			.field("ignored", &self.is_ignored())
			.finish()
	}
}

/// Builder for remote and internal requests.
pub struct RequestBuilder {
	invocation: Invocation,
	internal: bool,
}

impl RequestBuilder {
	/// No reply is expected.
	#[must_use]
	pub fn one_way(mut self) -> Self {
		self.invocation.one_way = true;
		self
	}

	/// Marks the request as control-plane with the given service priority.
	#[must_use]
	pub fn non_functional(mut self, priority: Priority) -> Self {
		self.invocation.functional = false;
		self.invocation.priority = priority;
		self
	}

	/// Installs `barrier` on the receiving queue when enqueued.
	#[must_use]
	pub fn barrier(mut self, barrier: MethodBarrier) -> Self {
		self.invocation.barrier = Some(barrier);
		self
	}

	/// Builds a body-internal request, which may never be forwarded.
	#[must_use]
	pub fn internal(mut self) -> Self {
		self.internal = true;
		self
	}

	pub fn build(self) -> Request {
		if self.internal {
			Request::from_kind(RequestKind::Internal(self.invocation))
		} else {
			Request::from_kind(RequestKind::Remote(self.invocation))
		}
	}
}

/// Caller-side identity: numbers the requests one sender issues.
#[derive(Debug)]
pub struct Caller {
	id: BodyId,
	next_sequence: AtomicU64,
}

impl Default for Caller {
	fn default() -> Self {
		Self::new()
	}
}

impl Caller {
	/// Creates a caller with a fresh identity.
	pub fn new() -> Self {
		Self::with_id(BodyId::new())
	}

	pub fn with_id(id: BodyId) -> Self {
		Self {
			id,
			next_sequence: AtomicU64::new(0),
		}
	}

	pub fn id(&self) -> BodyId {
		self.id
	}

	/// Returns the next sequence number (starting at 1).
	pub fn next_sequence(&self) -> u64 {
		self.next_sequence.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}

	/// Starts a request for `call` with the next sequence number.
	pub fn request(&self, call: impl MethodCall) -> RequestBuilder {
		Request::builder(self.id, self.next_sequence(), call)
	}
}
