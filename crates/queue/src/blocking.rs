//! Monitor-style blocking layer over [`RequestQueue`].
//!
//! One mutex guards the request sequence, the non-functional index, the method
//! barriers and the lifecycle flags; one condition variable wakes every parked
//! consumer on any change. Blocking-remove is the only suspension point: it tests
//! its predicate under the lock, releases the lock while parked, and re-tests
//! after every wake-up.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::barrier::{BarrierCoordinator, MethodBarrier};
use crate::event::{QueueEvent, QueueObserver};
use crate::filter::{RequestFilter, filter_fn};
use crate::ft::{FaultTolerance, FtToken};
use crate::queue::{End, RequestExecutor, RequestProcessor, RequestQueue};
use crate::request::{BodyId, Request};

struct QueueState {
	queue: RequestQueue,
	barriers: VecDeque<MethodBarrier>,
	/// False once destroyed; never flips back.
	should_wait: bool,
	suspended: bool,
	waiting: bool,
}

/// What a blocking removal is looking for.
struct Selection<'a> {
	end: End,
	filter: Option<&'a dyn RequestFilter>,
	/// SPMD group size; `Some` enables the coordinator gate.
	group_size: Option<usize>,
}

impl Selection<'_> {
	fn accepts(&self, request: &Request) -> bool {
		self.filter.is_none_or(|filter| filter.accepts(request))
	}
}

/// Request queue of one active object.
///
/// Many producers, one consumer. Timeouts of `None` or [`Duration::ZERO`] wait
/// forever. After [`destroy`](Self::destroy) every blocking call returns `None`
/// immediately.
pub struct BlockingRequestQueue {
	owner: BodyId,
	state: Mutex<QueueState>,
	available: Condvar,
	observers: Vec<Arc<dyn QueueObserver>>,
	fault_tolerance: Option<Arc<dyn FaultTolerance>>,
	coordinator: Option<Arc<dyn BarrierCoordinator>>,
}

/// Builder for [`BlockingRequestQueue`] collaborators.
pub struct BlockingRequestQueueBuilder {
	owner: BodyId,
	observers: Vec<Arc<dyn QueueObserver>>,
	fault_tolerance: Option<Arc<dyn FaultTolerance>>,
	coordinator: Option<Arc<dyn BarrierCoordinator>>,
}

impl BlockingRequestQueueBuilder {
	/// Adds an event sink.
	#[must_use]
	pub fn observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
		self.observers.push(observer);
		self
	}

	/// Installs the enqueue interception hook.
	#[must_use]
	pub fn fault_tolerance(mut self, fault_tolerance: Arc<dyn FaultTolerance>) -> Self {
		self.fault_tolerance = Some(fault_tolerance);
		self
	}

	/// Injects the SPMD barrier coordinator used by the gated removals.
	#[must_use]
	pub fn coordinator(mut self, coordinator: Arc<dyn BarrierCoordinator>) -> Self {
		self.coordinator = Some(coordinator);
		self
	}

	pub fn build(self) -> BlockingRequestQueue {
		BlockingRequestQueue {
			owner: self.owner,
			state: Mutex::new(QueueState {
				queue: RequestQueue::new(),
				barriers: VecDeque::new(),
				should_wait: true,
				suspended: false,
				waiting: false,
			}),
			available: Condvar::new(),
			observers: self.observers,
			fault_tolerance: self.fault_tolerance,
			coordinator: self.coordinator,
		}
	}
}

impl BlockingRequestQueue {
	/// Creates a queue without collaborators.
	pub fn new(owner: BodyId) -> Self {
		Self::builder(owner).build()
	}

	pub fn builder(owner: BodyId) -> BlockingRequestQueueBuilder {
		BlockingRequestQueueBuilder {
			owner,
			observers: Vec::new(),
			fault_tolerance: None,
			coordinator: None,
		}
	}

	/// Body owning this queue.
	pub fn owner(&self) -> BodyId {
		self.owner
	}

	pub fn len(&self) -> usize {
		self.state.lock().queue.len()
	}

	pub fn is_empty(&self) -> bool {
		self.state.lock().queue.is_empty()
	}

	pub fn is_destroyed(&self) -> bool {
		!self.state.lock().should_wait
	}

	pub fn is_suspended(&self) -> bool {
		self.state.lock().suspended
	}

	/// True while the consumer is parked in a blocking call.
	pub fn is_waiting_for_request(&self) -> bool {
		self.state.lock().waiting
	}

	/// True if a pending request invokes `method_name`.
	pub fn has_request(&self, method_name: &str) -> bool {
		self.state.lock().queue.has_method(method_name)
	}

	/// Method names of the pending requests, oldest first.
	pub fn method_names(&self) -> Vec<String> {
		self.state.lock().queue.iter().map(|r| r.method_name().to_owned()).collect()
	}

	/// Method barriers not released yet, active one first.
	pub fn barriers(&self) -> Vec<MethodBarrier> {
		self.state.lock().barriers.iter().cloned().collect()
	}

	// -- enqueue --

	/// Appends `request`; elevated requests are additionally indexed.
	///
	/// Returns the fault-tolerance token. Ignored requests, and any request added
	/// after destruction, are dropped.
	pub fn add(&self, request: Request) -> FtToken {
		self.enqueue(request, End::Youngest).unwrap_or_else(|token| token)
	}

	/// Like [`add`](Self::add), but reports a destroyed queue as `Err`.
	///
	/// Both variants carry the fault-tolerance token.
	pub fn try_add(&self, request: Request) -> Result<FtToken, FtToken> {
		self.enqueue(request, End::Youngest)
	}

	/// Inserts `request` ahead of everything already queued.
	pub fn add_to_front(&self, request: Request) -> FtToken {
		self.enqueue(request, End::Oldest).unwrap_or_else(|token| token)
	}

	fn enqueue(&self, request: Request, end: End) -> Result<FtToken, FtToken> {
		let token = self.fault_tolerance.as_ref().map_or(FtToken::NON_FT, |ft| ft.on_receive(&request));
		if request.is_ignored() {
			tracing::trace!(owner = %self.owner, method = request.method_name(), sequence = request.sequence(), "queue.add.ignored");
			return Ok(token);
		}

		let mut state = self.state.lock();
		if !state.should_wait {
			drop(state);
			tracing::debug!(owner = %self.owner, method = request.method_name(), "queue.add.destroyed");
			return Err(token);
		}
		self.track_barriers(&mut state, &request);
		match end {
			End::Oldest => state.queue.add_to_front(request.clone()),
			End::Youngest => state.queue.add(request.clone()),
		}
		let pending = state.queue.len();
		drop(state);

		self.available.notify_all();
		self.emit_with(|| QueueEvent::added(&request, pending));
		Ok(token)
	}

	fn track_barriers(&self, state: &mut QueueState, request: &Request) {
		let released = state
			.barriers
			.front_mut()
			.is_some_and(|active| active.record_arrival(request.method_name()) && active.is_released());
		if released && let Some(barrier) = state.barriers.pop_front() {
			tracing::debug!(owner = %self.owner, barrier = barrier.name(), "queue.barrier.released");
		}
		if let Some(barrier) = request.barrier()
			&& !barrier.is_released()
		{
			tracing::debug!(owner = %self.owner, barrier = barrier.name(), expected = barrier.remaining(), "queue.barrier.installed");
			state.barriers.push_back(barrier.clone());
		}
	}

	/// Installs a method barrier directly.
	pub fn install_barrier(&self, barrier: MethodBarrier) {
		if barrier.is_released() {
			return;
		}
		tracing::debug!(owner = %self.owner, barrier = barrier.name(), expected = barrier.remaining(), "queue.barrier.installed");
		self.state.lock().barriers.push_back(barrier);
		self.available.notify_all();
	}

	// -- non-blocking accessors --

	/// Oldest request without removing it; elevated requests come first.
	pub fn get_oldest(&self) -> Option<Request> {
		self.state.lock().queue.oldest().cloned()
	}

	pub fn get_oldest_matching<F: RequestFilter + ?Sized>(&self, filter: &F) -> Option<Request> {
		self.state.lock().queue.oldest_matching(filter).cloned()
	}

	pub fn get_oldest_named(&self, method_name: &str) -> Option<Request> {
		self.get_oldest_matching(&filter_fn(|r: &Request| r.method_name() == method_name))
	}

	pub fn get_youngest(&self) -> Option<Request> {
		self.state.lock().queue.youngest().cloned()
	}

	pub fn get_youngest_matching<F: RequestFilter + ?Sized>(&self, filter: &F) -> Option<Request> {
		self.state.lock().queue.youngest_matching(filter).cloned()
	}

	pub fn get_youngest_named(&self, method_name: &str) -> Option<Request> {
		self.get_youngest_matching(&filter_fn(|r: &Request| r.method_name() == method_name))
	}

	// -- non-blocking removal --

	/// Removes the oldest request; elevated requests preempt arrival order.
	pub fn remove_oldest(&self) -> Option<Request> {
		self.remove_with(|queue| queue.remove_oldest())
	}

	pub fn remove_oldest_matching<F: RequestFilter + ?Sized>(&self, filter: &F) -> Option<Request> {
		self.remove_with(|queue| queue.remove_oldest_matching(filter))
	}

	pub fn remove_oldest_named(&self, method_name: &str) -> Option<Request> {
		self.remove_oldest_matching(&filter_fn(|r: &Request| r.method_name() == method_name))
	}

	pub fn remove_youngest(&self) -> Option<Request> {
		self.remove_with(|queue| queue.remove_youngest())
	}

	pub fn remove_youngest_matching<F: RequestFilter + ?Sized>(&self, filter: &F) -> Option<Request> {
		self.remove_with(|queue| queue.remove_youngest_matching(filter))
	}

	pub fn remove_youngest_named(&self, method_name: &str) -> Option<Request> {
		self.remove_youngest_matching(&filter_fn(|r: &Request| r.method_name() == method_name))
	}

	/// Removes every request matching `filter`, in arrival order.
	pub fn remove_all<F: RequestFilter + ?Sized>(&self, filter: &F) -> Vec<Request> {
		let (removed, pending) = {
			let mut state = self.state.lock();
			let removed = state.queue.remove_all(filter);
			(removed, state.queue.len())
		};
		for request in &removed {
			self.emit_with(|| QueueEvent::removed(request, pending));
		}
		removed
	}

	/// Discards every pending request. Returns how many were dropped.
	pub fn clear(&self) -> usize {
		let discarded = self.state.lock().queue.clear();
		if discarded > 0 {
			self.emit_with(|| QueueEvent::Cleared { discarded });
		}
		discarded
	}

	fn remove_with(&self, remove: impl FnOnce(&mut RequestQueue) -> Option<Request>) -> Option<Request> {
		let (removed, pending) = {
			let mut state = self.state.lock();
			let removed = remove(&mut state.queue);
			(removed, state.queue.len())
		};
		if let Some(request) = &removed {
			self.emit_with(|| QueueEvent::removed(request, pending));
		}
		removed
	}

	/// One processing pass, see [`RequestQueue::process_requests`].
	///
	/// `processor` runs under the queue lock and must not call back into this
	/// queue. The selected requests are handed to `executor` after the lock is
	/// released, elevated requests first. Returns how many were served.
	pub fn process_requests<P, E>(&self, processor: &mut P, executor: &mut E) -> usize
	where
		P: RequestProcessor + ?Sized,
		E: RequestExecutor + ?Sized,
	{
		let (processed, pending) = {
			let mut state = self.state.lock();
			let processed = state.queue.process_requests(processor);
			(processed, state.queue.len())
		};
		for request in processed.to_serve.iter().chain(&processed.discarded) {
			self.emit_with(|| QueueEvent::removed(request, pending));
		}
		let served = processed.to_serve.len();
		for request in processed.to_serve {
			executor.serve(request);
		}
		served
	}

	// -- blocking removal --

	/// Removes the oldest servable request, waiting up to `timeout` for one.
	pub fn blocking_remove_oldest(&self, timeout: Option<Duration>) -> Option<Request> {
		self.blocking_remove(
			Selection {
				end: End::Oldest,
				filter: None,
				group_size: None,
			},
			timeout,
		)
	}

	pub fn blocking_remove_oldest_matching<F: RequestFilter>(&self, filter: &F, timeout: Option<Duration>) -> Option<Request> {
		self.blocking_remove(
			Selection {
				end: End::Oldest,
				filter: Some(filter as &dyn RequestFilter),
				group_size: None,
			},
			timeout,
		)
	}

	pub fn blocking_remove_oldest_named(&self, method_name: &str, timeout: Option<Duration>) -> Option<Request> {
		self.blocking_remove_oldest_matching(&filter_fn(|r: &Request| r.method_name() == method_name), timeout)
	}

	/// Removes the youngest servable request, waiting up to `timeout` for one.
	pub fn blocking_remove_youngest(&self, timeout: Option<Duration>) -> Option<Request> {
		self.blocking_remove(
			Selection {
				end: End::Youngest,
				filter: None,
				group_size: None,
			},
			timeout,
		)
	}

	pub fn blocking_remove_youngest_matching<F: RequestFilter>(&self, filter: &F, timeout: Option<Duration>) -> Option<Request> {
		self.blocking_remove(
			Selection {
				end: End::Youngest,
				filter: Some(filter as &dyn RequestFilter),
				group_size: None,
			},
			timeout,
		)
	}

	pub fn blocking_remove_youngest_named(&self, method_name: &str, timeout: Option<Duration>) -> Option<Request> {
		self.blocking_remove_youngest_matching(&filter_fn(|r: &Request| r.method_name() == method_name), timeout)
	}

	/// Barrier-aware variant of [`blocking_remove_oldest`](Self::blocking_remove_oldest).
	///
	/// While the injected coordinator reports fewer than `group_size` members at
	/// the pending barrier, only methods it exempts are handed out; otherwise the
	/// caller keeps waiting even if the queue is non-empty.
	pub fn blocking_remove_oldest_gated(&self, group_size: usize, timeout: Option<Duration>) -> Option<Request> {
		self.blocking_remove(
			Selection {
				end: End::Oldest,
				filter: None,
				group_size: Some(group_size),
			},
			timeout,
		)
	}

	/// Barrier-aware variant of [`blocking_remove_youngest`](Self::blocking_remove_youngest).
	pub fn blocking_remove_youngest_gated(&self, group_size: usize, timeout: Option<Duration>) -> Option<Request> {
		self.blocking_remove(
			Selection {
				end: End::Youngest,
				filter: None,
				group_size: Some(group_size),
			},
			timeout,
		)
	}

	/// Waits until the queue holds at least one request, without removing it.
	///
	/// Returns false on timeout or destruction.
	pub fn wait_for_request(&self, timeout: Option<Duration>) -> bool {
		self.blocking_peek(End::Oldest, timeout).is_some()
	}

	/// Waits for a pending request and returns the oldest without removing it.
	///
	/// Elevated requests come first, as with [`get_oldest`](Self::get_oldest).
	/// `None` on timeout or destruction.
	pub fn blocking_get_oldest(&self, timeout: Option<Duration>) -> Option<Request> {
		self.blocking_peek(End::Oldest, timeout)
	}

	/// Waits for a pending request and returns the youngest without removing it.
	pub fn blocking_get_youngest(&self, timeout: Option<Duration>) -> Option<Request> {
		self.blocking_peek(End::Youngest, timeout)
	}

	fn blocking_peek(&self, end: End, timeout: Option<Duration>) -> Option<Request> {
		let deadline = deadline(timeout);
		let mut state = self.state.lock();
		loop {
			if !state.should_wait {
				return None;
			}
			let pending = match end {
				End::Oldest => state.queue.oldest(),
				End::Youngest => state.queue.youngest(),
			};
			if let Some(request) = pending {
				return Some(request.clone());
			}
			if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
				return None;
			}
			self.park(&mut state, deadline);
		}
	}

	fn blocking_remove(&self, selection: Selection<'_>, timeout: Option<Duration>) -> Option<Request> {
		let deadline = deadline(timeout);
		let mut announced = self.observers.is_empty();
		let mut state = self.state.lock();
		let removed = loop {
			if !state.should_wait {
				break None;
			}
			if let Some(request) = self.select(&mut state, &selection) {
				break Some(request);
			}
			if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
				break None;
			}
			if !announced {
				announced = true;
				let pending = state.queue.len();
				MutexGuard::unlocked(&mut state, || self.emit(&QueueEvent::Waiting { pending }));
				continue;
			}
			self.park(&mut state, deadline);
		};
		let pending = state.queue.len();
		drop(state);

		if let Some(request) = &removed {
			self.emit_with(|| QueueEvent::removed(request, pending));
		}
		removed
	}

	fn park(&self, state: &mut MutexGuard<'_, QueueState>, deadline: Option<Instant>) {
		state.waiting = true;
		match deadline {
			Some(deadline) => {
				let _ = self.available.wait_until(state, deadline);
			}
			None => self.available.wait(state),
		}
		state.waiting = false;
	}

	/// Removes the next request `selection` may take under the current gates.
	fn select(&self, state: &mut QueueState, selection: &Selection<'_>) -> Option<Request> {
		if let (Some(coordinator), Some(group_size)) = (&self.coordinator, selection.group_size)
			&& coordinator.is_pending(group_size)
		{
			let exempt = filter_fn(|r: &Request| coordinator.is_exempt(r.method_name()) && selection.accepts(r));
			return state.queue.remove(selection.end, Some(&exempt as &dyn RequestFilter));
		}

		let barrier = state.barriers.front();
		if barrier.is_some() || state.suspended {
			let admissible = filter_fn(|r: &Request| {
				(!r.is_functional() || barrier.is_some_and(|b| b.matches(r.method_name()))) && selection.accepts(r)
			});
			if let End::Oldest = selection.end
				&& let Some(request) = state.queue.remove_non_functional_matching(&admissible)
			{
				return Some(request);
			}
			return state.queue.remove(selection.end, Some(&admissible as &dyn RequestFilter));
		}

		state.queue.remove(selection.end, selection.filter)
	}

	// -- lifecycle --

	/// Pauses service of ordinary requests. Requests keep being accepted.
	pub fn suspend(&self) {
		self.state.lock().suspended = true;
		tracing::debug!(owner = %self.owner, "queue.suspend");
	}

	/// Resumes service and wakes parked consumers.
	pub fn resume(&self) {
		self.state.lock().suspended = false;
		self.available.notify_all();
		tracing::debug!(owner = %self.owner, "queue.resume");
	}

	/// Wakes parked consumers so they re-consult the barrier coordinator.
	pub fn notify_barrier_change(&self) {
		let _state = self.state.lock();
		self.available.notify_all();
	}

	/// Removes all pending requests and enters the terminal state.
	///
	/// Every parked consumer wakes up and returns `None`. Returns the discarded
	/// requests in arrival order so their callers can be answered; later calls
	/// return nothing.
	pub fn destroy(&self) -> Vec<Request> {
		let discarded = {
			let mut state = self.state.lock();
			if !state.should_wait {
				return Vec::new();
			}
			state.should_wait = false;
			state.suspended = false;
			state.barriers.clear();
			state.queue.drain()
		};
		self.available.notify_all();
		tracing::debug!(owner = %self.owner, discarded = discarded.len(), "queue.destroy");
		self.emit_with(|| QueueEvent::Destroyed { discarded: discarded.len() });
		discarded
	}

	fn emit(&self, event: &QueueEvent) {
		for observer in &self.observers {
			observer.on_event(self.owner, event);
		}
	}

	fn emit_with(&self, event: impl FnOnce() -> QueueEvent) {
		if !self.observers.is_empty() {
			self.emit(&event());
		}
	}
}

impl std::fmt::Debug for BlockingRequestQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("BlockingRequestQueue")
			.field("owner", &self.owner)
			.field("pending", &state.queue.len())
			.field("destroyed", &!state.should_wait)
			.field("suspended", &state.suspended)
			.field("barriers", &state.barriers.len())
			.finish()
	}
}

fn deadline(timeout: Option<Duration>) -> Option<Instant> {
	// Unrepresentable deadlines wait forever.
	timeout.filter(|t| !t.is_zero()).and_then(|t| Instant::now().checked_add(t))
}
