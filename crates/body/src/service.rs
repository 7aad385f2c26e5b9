//! Serving policies built on a body's queue.

use std::time::Duration;

use aorta_queue::{ProcessVerdict, Request, RequestFilter};

use crate::body::Body;

/// Helpers an [`Activity`](crate::Activity) uses to pick and serve requests.
///
/// `blocking_*` calls return false when nothing was served: on timeout or once
/// the body is terminated. Non-blocking calls return false when nothing matched.
pub struct Service<'a, T> {
	body: &'a Body<T>,
}

impl<'a, T: Send + Sync + 'static> Service<'a, T> {
	pub fn new(body: &'a Body<T>) -> Self {
		Self { body }
	}

	pub fn body(&self) -> &'a Body<T> {
		self.body
	}

	/// Serves `request`, logging one-way failures.
	pub fn serve(&self, request: Request) {
		let method = request.method_name().to_owned();
		if let Err(err) = self.body.serve(request) {
			tracing::warn!(body = %self.body.id(), method = %method, error = %err, "service.serve.failed");
		}
	}

	fn serve_some(&self, request: Option<Request>) -> bool {
		let Some(request) = request else {
			return false;
		};
		self.serve(request);
		true
	}

	fn is_serving(&self) -> bool {
		self.body.is_active() && !self.body.queue().is_destroyed()
	}

	/// Serves requests oldest first until the body terminates.
	pub fn fifo_serving(&self) {
		while self.is_serving() {
			self.blocking_serve_oldest(None);
		}
	}

	/// Serves requests youngest first until the body terminates.
	pub fn lifo_serving(&self) {
		while self.is_serving() {
			self.blocking_serve_youngest(None);
		}
	}

	// -- blocking --

	/// Serves the oldest request, waiting up to `timeout`.
	///
	/// `None` falls back to the configured service timeout; pass
	/// [`Duration::ZERO`] to wait forever regardless.
	pub fn blocking_serve_oldest(&self, timeout: Option<Duration>) -> bool {
		let timeout = timeout.or(self.body.service_timeout());
		self.serve_some(self.body.queue().blocking_remove_oldest(timeout))
	}

	pub fn blocking_serve_oldest_matching<F: RequestFilter>(&self, filter: &F, timeout: Option<Duration>) -> bool {
		let timeout = timeout.or(self.body.service_timeout());
		self.serve_some(self.body.queue().blocking_remove_oldest_matching(filter, timeout))
	}

	pub fn blocking_serve_oldest_named(&self, method_name: &str, timeout: Option<Duration>) -> bool {
		let timeout = timeout.or(self.body.service_timeout());
		self.serve_some(self.body.queue().blocking_remove_oldest_named(method_name, timeout))
	}

	/// Serves the youngest request, waiting up to `timeout`.
	pub fn blocking_serve_youngest(&self, timeout: Option<Duration>) -> bool {
		let timeout = timeout.or(self.body.service_timeout());
		self.serve_some(self.body.queue().blocking_remove_youngest(timeout))
	}

	pub fn blocking_serve_youngest_matching<F: RequestFilter>(&self, filter: &F, timeout: Option<Duration>) -> bool {
		let timeout = timeout.or(self.body.service_timeout());
		self.serve_some(self.body.queue().blocking_remove_youngest_matching(filter, timeout))
	}

	pub fn blocking_serve_youngest_named(&self, method_name: &str, timeout: Option<Duration>) -> bool {
		let timeout = timeout.or(self.body.service_timeout());
		self.serve_some(self.body.queue().blocking_remove_youngest_named(method_name, timeout))
	}

	/// Barrier-aware oldest serve for a member of a group of `group_size`.
	pub fn blocking_serve_oldest_gated(&self, group_size: usize, timeout: Option<Duration>) -> bool {
		let timeout = timeout.or(self.body.service_timeout());
		self.serve_some(self.body.queue().blocking_remove_oldest_gated(group_size, timeout))
	}

	/// Barrier-aware youngest serve for a member of a group of `group_size`.
	pub fn blocking_serve_youngest_gated(&self, group_size: usize, timeout: Option<Duration>) -> bool {
		let timeout = timeout.or(self.body.service_timeout());
		self.serve_some(self.body.queue().blocking_remove_youngest_gated(group_size, timeout))
	}

	/// Waits for a pending request and returns the oldest without serving it.
	pub fn blocking_get_oldest(&self, timeout: Option<Duration>) -> Option<Request> {
		self.body.queue().blocking_get_oldest(timeout.or(self.body.service_timeout()))
	}

	/// Waits for a pending request and returns the youngest without serving it.
	pub fn blocking_get_youngest(&self, timeout: Option<Duration>) -> Option<Request> {
		self.body.queue().blocking_get_youngest(timeout.or(self.body.service_timeout()))
	}

	/// Waits until a request is pending without serving it.
	pub fn wait_for_request(&self, timeout: Option<Duration>) -> bool {
		self.body.queue().wait_for_request(timeout.or(self.body.service_timeout()))
	}

	// -- non-blocking --

	pub fn serve_oldest(&self) -> bool {
		self.serve_some(self.body.queue().remove_oldest())
	}

	pub fn serve_oldest_matching<F: RequestFilter + ?Sized>(&self, filter: &F) -> bool {
		self.serve_some(self.body.queue().remove_oldest_matching(filter))
	}

	pub fn serve_oldest_named(&self, method_name: &str) -> bool {
		self.serve_some(self.body.queue().remove_oldest_named(method_name))
	}

	pub fn serve_youngest(&self) -> bool {
		self.serve_some(self.body.queue().remove_youngest())
	}

	pub fn serve_youngest_matching<F: RequestFilter + ?Sized>(&self, filter: &F) -> bool {
		self.serve_some(self.body.queue().remove_youngest_matching(filter))
	}

	pub fn serve_youngest_named(&self, method_name: &str) -> bool {
		self.serve_some(self.body.queue().remove_youngest_named(method_name))
	}

	/// Serves every request `filter` accepts, oldest first.
	///
	/// Pending elevated requests are served first whether or not they match.
	/// Returns how many were served.
	pub fn serve_all<F: RequestFilter + ?Sized>(&self, filter: &F) -> usize {
		self.body.queue().process_requests(
			&mut |r: &Request| {
				if filter.accepts(r) {
					ProcessVerdict::RemoveAndServe
				} else {
					ProcessVerdict::Keep
				}
			},
			&mut |r: Request| self.serve(r),
		)
	}

	/// Serves the oldest request `filter` accepts and discards its other matches.
	pub fn flushing_serve_oldest<F: RequestFilter + ?Sized>(&self, filter: &F) -> bool {
		let mut found = false;
		let served = self.body.queue().process_requests(
			&mut |r: &Request| match (filter.accepts(r), found) {
				(false, _) => ProcessVerdict::Keep,
				(true, false) => {
					found = true;
					ProcessVerdict::RemoveAndServe
				}
				(true, true) => ProcessVerdict::Remove,
			},
			&mut |r: Request| self.serve(r),
		);
		tracing::trace!(body = %self.body.id(), served, found, "service.flush.oldest");
		found
	}

	/// Serves the youngest request `filter` accepts and discards its older matches.
	///
	/// Like [`flushing_serve_oldest`](Self::flushing_serve_oldest), pending
	/// elevated requests are served first. Matches arriving during the pass are
	/// kept.
	pub fn flushing_serve_youngest<F: RequestFilter + ?Sized>(&self, filter: &F) -> bool {
		let target = self.body.queue().get_youngest_matching(filter);
		let mut passed = false;
		let mut found = false;
		self.body.queue().process_requests(
			&mut |r: &Request| {
				let Some(target) = target.as_ref().filter(|_| !passed && filter.accepts(r)) else {
					return ProcessVerdict::Keep;
				};
				if r.same_as(target) {
					passed = true;
					return ProcessVerdict::RemoveAndServe;
				}
				ProcessVerdict::Remove
			},
			&mut |r: Request| {
				found |= target.as_ref().is_some_and(|target| r.same_as(target));
				self.serve(r);
			},
		);
		found
	}

	/// Discards every pending request. Returns how many were dropped.
	pub fn flush_all(&self) -> usize {
		self.body.queue().clear()
	}

	/// Discards every pending request `filter` accepts.
	pub fn flush_matching<F: RequestFilter + ?Sized>(&self, filter: &F) -> usize {
		self.body.queue().remove_all(filter).len()
	}

	// -- inspection --

	pub fn has_request_to_serve(&self) -> bool {
		!self.body.queue().is_empty()
	}

	pub fn has_request_to_serve_named(&self, method_name: &str) -> bool {
		self.body.queue().has_request(method_name)
	}

	pub fn request_count(&self) -> usize {
		self.body.queue().len()
	}

	pub fn get_oldest(&self) -> Option<Request> {
		self.body.queue().get_oldest()
	}

	pub fn get_oldest_named(&self, method_name: &str) -> Option<Request> {
		self.body.queue().get_oldest_named(method_name)
	}

	pub fn get_youngest(&self) -> Option<Request> {
		self.body.queue().get_youngest()
	}

	pub fn get_youngest_named(&self, method_name: &str) -> Option<Request> {
		self.body.queue().get_youngest_named(method_name)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use aorta_queue::{Caller, MethodNameFilter, Priority, call};
	use parking_lot::Mutex;
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;
	use crate::reply::ReplyRouter;

	#[derive(Default)]
	struct Journal {
		served: Mutex<Vec<String>>,
	}

	fn body() -> Body<Journal> {
		Body::new(Journal::default(), Arc::new(ReplyRouter::new()))
	}

	fn enqueue(body: &Body<Journal>, caller: &Caller, method: &str) {
		let name = method.to_owned();
		let request = caller
			.request(call(method.to_owned(), move |j: &Journal| {
				j.served.lock().push(name.clone());
				Ok(json!(null))
			}))
			.one_way()
			.build();
		body.queue().add(request);
	}

	fn enqueue_all(body: &Body<Journal>, methods: &[&str]) {
		let caller = Caller::new();
		for method in methods {
			enqueue(body, &caller, method);
		}
	}

	fn served(body: &Body<Journal>) -> Vec<String> {
		body.target().served.lock().clone()
	}

	#[test]
	fn oldest_and_youngest_serving() {
		let body = body();
		enqueue_all(&body, &["a", "b", "c"]);
		let service = Service::new(&body);

		assert!(service.serve_oldest());
		assert!(service.serve_youngest());
		assert_eq!(served(&body), vec!["a", "c"]);
		assert_eq!(service.request_count(), 1);
	}

	#[test]
	fn named_serving_skips_other_methods() {
		let body = body();
		enqueue_all(&body, &["a", "b", "a", "c"]);
		let service = Service::new(&body);

		assert!(service.serve_youngest_named("a"));
		assert!(service.serve_oldest_named("c"));
		assert!(!service.serve_oldest_named("missing"));
		assert_eq!(served(&body), vec!["a", "c"]);
		assert_eq!(body.queue().method_names(), vec!["a", "b"]);
	}

	#[test]
	fn serve_all_serves_matches_in_order() {
		let body = body();
		enqueue_all(&body, &["a", "b", "a", "c"]);
		let service = Service::new(&body);

		assert_eq!(service.serve_all(&MethodNameFilter::new("a")), 2);
		assert_eq!(served(&body), vec!["a", "a"]);
		assert_eq!(body.queue().method_names(), vec!["b", "c"]);
	}

	#[test]
	fn flushing_oldest_discards_later_matches() {
		let body = body();
		enqueue_all(&body, &["a", "b", "a", "a"]);
		let service = Service::new(&body);

		assert!(service.flushing_serve_oldest(&MethodNameFilter::new("a")));
		assert_eq!(served(&body), vec!["a"]);
		assert_eq!(body.queue().method_names(), vec!["b"]);
		assert!(!service.flushing_serve_oldest(&MethodNameFilter::new("a")));
	}

	#[test]
	fn flushing_youngest_serves_last_match() {
		let body = body();
		let caller = Caller::new();
		for method in ["a", "b", "a"] {
			enqueue(&body, &caller, method);
		}
		let youngest_a = body.queue().get_youngest_named("a").map(|r| r.sequence());
		let service = Service::new(&body);

		assert!(service.flushing_serve_youngest(&MethodNameFilter::new("a")));
		assert_eq!(youngest_a, Some(3));
		assert_eq!(served(&body), vec!["a"]);
		assert_eq!(body.queue().method_names(), vec!["b"]);
	}

	fn enqueue_ping(body: &Body<Journal>) {
		let ping = Caller::new()
			.request(call("ping", |j: &Journal| {
				j.served.lock().push("ping".into());
				Ok(json!(null))
			}))
			.non_functional(Priority::Elevated)
			.one_way()
			.build();
		body.queue().add(ping);
	}

	#[test]
	fn flushing_youngest_serves_control_requests_first() {
		let body = body();
		enqueue_all(&body, &["a", "b", "a"]);
		enqueue_ping(&body);
		enqueue_all(&body, &["c"]);
		let service = Service::new(&body);

		assert!(service.flushing_serve_youngest(&MethodNameFilter::new("a")));
		assert_eq!(served(&body), vec!["ping", "a"]);
		assert_eq!(body.queue().method_names(), vec!["b", "c"]);
		assert!(!service.flushing_serve_youngest(&MethodNameFilter::new("a")));
	}

	#[test]
	fn flushing_oldest_reports_only_filter_matches() {
		let body = body();
		enqueue_all(&body, &["b"]);
		enqueue_ping(&body);
		let service = Service::new(&body);

		assert!(!service.flushing_serve_oldest(&MethodNameFilter::new("a")));
		assert_eq!(served(&body), vec!["ping"]);
		assert_eq!(body.queue().method_names(), vec!["b"]);
	}

	#[test]
	fn blocking_get_leaves_request_queued() {
		let body = body();
		enqueue_all(&body, &["a", "b"]);
		let service = Service::new(&body);

		let oldest = service.blocking_get_oldest(Some(Duration::from_millis(20)));
		let youngest = service.blocking_get_youngest(Some(Duration::from_millis(20)));
		assert_eq!(oldest.map(|r| r.method_name().to_owned()).as_deref(), Some("a"));
		assert_eq!(youngest.map(|r| r.method_name().to_owned()).as_deref(), Some("b"));
		assert_eq!(service.request_count(), 2);
		assert!(served(&body).is_empty());

		body.terminate();
		assert!(service.blocking_get_oldest(None).is_none());
	}

	#[test]
	fn flush_all_empties_without_serving() {
		let body = body();
		enqueue_all(&body, &["a", "b"]);
		let service = Service::new(&body);

		assert!(service.has_request_to_serve());
		assert_eq!(service.flush_all(), 2);
		assert!(!service.has_request_to_serve());
		assert!(served(&body).is_empty());
	}

	#[test]
	fn blocking_serve_times_out_on_empty_queue() {
		let body = body();
		let service = Service::new(&body);
		assert!(!service.blocking_serve_oldest(Some(Duration::from_millis(20))));
		assert!(!service.wait_for_request(Some(Duration::from_millis(20))));
	}

	#[test]
	fn blocking_serve_returns_false_once_terminated() {
		let body = body();
		body.terminate();
		let service = Service::new(&body);
		assert!(!service.blocking_serve_oldest(None));
		service.fifo_serving();
	}

	#[test]
	fn control_requests_are_served_first() {
		let body = body();
		enqueue_all(&body, &["a"]);
		enqueue_ping(&body);

		let service = Service::new(&body);
		assert!(service.blocking_serve_oldest(Some(Duration::from_millis(20))));
		assert!(service.get_oldest().is_some_and(|r| r.method_name() == "a"));
		assert!(service.has_request_to_serve_named("a"));
		assert_eq!(served(&body), vec!["ping"]);
	}

	#[test]
	fn one_way_failure_does_not_stop_serving() {
		let body = body();
		let failing = Caller::new().request(call("boom", |_: &Journal| Err("boom".to_string()))).one_way().build();
		body.queue().add(failing);
		enqueue_all(&body, &["after"]);

		let service = Service::new(&body);
		assert!(service.serve_oldest());
		assert!(service.serve_oldest());
		assert_eq!(served(&body), vec!["after"]);
	}
}
