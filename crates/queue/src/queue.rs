//! Ordered request storage with priority resolution.

use std::collections::VecDeque;

use crate::filter::RequestFilter;
use crate::non_functional::NonFunctionalRequests;
use crate::request::Request;

/// Verdict of a [`RequestProcessor`] on one pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessVerdict {
	/// Remove the request and hand it to the executor.
	RemoveAndServe,
	/// Remove the request without serving it.
	Remove,
	/// Leave the request in place.
	Keep,
}

/// Decides the fate of each pending request during
/// [`RequestQueue::process_requests`].
pub trait RequestProcessor {
	fn process(&mut self, request: &Request) -> ProcessVerdict;
}

impl<F> RequestProcessor for F
where
	F: FnMut(&Request) -> ProcessVerdict,
{
	fn process(&mut self, request: &Request) -> ProcessVerdict {
		self(request)
	}
}

/// Serves the requests a processing pass selected.
pub trait RequestExecutor {
	fn serve(&mut self, request: Request);
}

impl<F> RequestExecutor for F
where
	F: FnMut(Request),
{
	fn serve(&mut self, request: Request) {
		self(request)
	}
}

/// Outcome of [`RequestQueue::process_requests`].
#[derive(Debug, Default)]
pub struct ProcessedRequests {
	/// Requests to serve, in serving order.
	pub to_serve: Vec<Request>,
	/// Requests removed without serving.
	pub discarded: Vec<Request>,
}

#[derive(Clone, Copy)]
pub(crate) enum End {
	Oldest,
	Youngest,
}

/// Arrival-ordered pending requests plus the non-functional index.
///
/// Not synchronized; [`BlockingRequestQueue`](crate::BlockingRequestQueue) owns
/// one behind its lock. Oldest is the front, youngest the back.
#[derive(Debug, Default)]
pub struct RequestQueue {
	requests: VecDeque<Request>,
	non_functional: NonFunctionalRequests,
}

impl RequestQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.requests.len()
	}

	pub fn is_empty(&self) -> bool {
		self.requests.is_empty()
	}

	/// Pending requests in arrival order.
	pub fn iter(&self) -> impl Iterator<Item = &Request> {
		self.requests.iter()
	}

	/// Appends at the tail, indexing elevated requests.
	pub fn add(&mut self, request: Request) {
		self.non_functional.push_back(request.clone());
		self.requests.push_back(request);
	}

	/// Inserts at the head, indexing elevated requests ahead of their bucket.
	pub fn add_to_front(&mut self, request: Request) {
		self.non_functional.push_front(request.clone());
		self.requests.push_front(request);
	}

	/// Oldest request, preferring the non-functional index when it is non-empty.
	pub fn oldest(&self) -> Option<&Request> {
		self.non_functional.oldest().or_else(|| self.requests.front())
	}

	pub fn oldest_matching<F: RequestFilter + ?Sized>(&self, filter: &F) -> Option<&Request> {
		self.requests.iter().find(|r| filter.accepts(r))
	}

	pub fn youngest(&self) -> Option<&Request> {
		self.requests.back()
	}

	pub fn youngest_matching<F: RequestFilter + ?Sized>(&self, filter: &F) -> Option<&Request> {
		self.requests.iter().rev().find(|r| filter.accepts(r))
	}

	/// Removes the oldest request; elevated requests preempt arrival order.
	pub fn remove_oldest(&mut self) -> Option<Request> {
		if let Some(request) = self.non_functional.pop_oldest() {
			self.remove_from_sequence(&request);
			return Some(request);
		}
		self.requests.pop_front()
	}

	pub fn remove_oldest_matching<F: RequestFilter + ?Sized>(&mut self, filter: &F) -> Option<Request> {
		let index = self.requests.iter().position(|r| filter.accepts(r))?;
		self.remove_at(index)
	}

	pub fn remove_youngest(&mut self) -> Option<Request> {
		let request = self.requests.pop_back()?;
		self.non_functional.remove(&request);
		Some(request)
	}

	pub fn remove_youngest_matching<F: RequestFilter + ?Sized>(&mut self, filter: &F) -> Option<Request> {
		let index = self.requests.iter().rposition(|r| filter.accepts(r))?;
		self.remove_at(index)
	}

	/// Removes the oldest elevated request matching `filter`, highest priority first.
	pub(crate) fn remove_non_functional_matching<F: RequestFilter + ?Sized>(&mut self, filter: &F) -> Option<Request> {
		let request = self.non_functional.iter().find(|r| filter.accepts(r))?.clone();
		self.non_functional.remove(&request);
		self.remove_from_sequence(&request);
		Some(request)
	}

	pub(crate) fn remove(&mut self, end: End, filter: Option<&dyn RequestFilter>) -> Option<Request> {
		match (end, filter) {
			(End::Oldest, None) => self.remove_oldest(),
			(End::Oldest, Some(filter)) => self.remove_oldest_matching(filter),
			(End::Youngest, None) => self.remove_youngest(),
			(End::Youngest, Some(filter)) => self.remove_youngest_matching(filter),
		}
	}

	/// Removes every request matching `filter`, returned in arrival order.
	pub fn remove_all<F: RequestFilter + ?Sized>(&mut self, filter: &F) -> Vec<Request> {
		let mut removed = Vec::new();
		let mut kept = VecDeque::with_capacity(self.requests.len());
		for request in self.requests.drain(..) {
			if filter.accepts(&request) {
				removed.push(request);
			} else {
				kept.push_back(request);
			}
		}
		self.requests = kept;
		for request in &removed {
			self.non_functional.remove(request);
		}
		removed
	}

	/// Removes every pending request, returned in arrival order.
	pub fn drain(&mut self) -> Vec<Request> {
		self.non_functional.clear();
		self.requests.drain(..).collect()
	}

	/// Discards every pending request. Returns how many were dropped.
	pub fn clear(&mut self) -> usize {
		let discarded = self.requests.len();
		self.requests.clear();
		self.non_functional.clear();
		discarded
	}

	pub fn has_method(&self, method_name: &str) -> bool {
		self.requests.iter().any(|r| r.method_name() == method_name)
	}

	/// One pass over the queue.
	///
	/// Elevated requests are removed and selected for serving first,
	/// unconditionally. The remaining requests are then offered to `processor` in
	/// arrival order and its verdicts applied.
	pub fn process_requests<P: RequestProcessor + ?Sized>(&mut self, processor: &mut P) -> ProcessedRequests {
		let mut processed = ProcessedRequests {
			to_serve: self.non_functional.drain(),
			discarded: Vec::new(),
		};
		for request in &processed.to_serve {
			self.remove_from_sequence(request);
		}
		let mut index = 0;
		while index < self.requests.len() {
			let verdict = processor.process(&self.requests[index]);
			if verdict == ProcessVerdict::Keep {
				index += 1;
				continue;
			}
			let Some(request) = self.requests.remove(index) else {
				break;
			};
			match verdict {
				ProcessVerdict::RemoveAndServe => processed.to_serve.push(request),
				_ => processed.discarded.push(request),
			}
		}
		processed
	}

	fn remove_at(&mut self, index: usize) -> Option<Request> {
		let request = self.requests.remove(index)?;
		if request.priority().is_elevated() {
			self.non_functional.remove(&request);
		}
		Some(request)
	}

	fn remove_from_sequence(&mut self, request: &Request) {
		if let Some(index) = self.requests.iter().position(|r| r.same_as(request)) {
			self.requests.remove(index);
		}
	}
}
