//! Request selection predicates.

use crate::request::Request;

/// Predicate selecting requests without removing the others.
///
/// Implementations must be deterministic for a given request and free of side
/// effects; queues call them while holding their lock.
pub trait RequestFilter {
	fn accepts(&self, request: &Request) -> bool;
}

impl<F: RequestFilter + ?Sized> RequestFilter for &F {
	fn accepts(&self, request: &Request) -> bool {
		(**self).accepts(request)
	}
}

impl<F: RequestFilter + ?Sized> RequestFilter for Box<F> {
	fn accepts(&self, request: &Request) -> bool {
		(**self).accepts(request)
	}
}

/// Accepts every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl RequestFilter for AcceptAll {
	fn accepts(&self, _request: &Request) -> bool {
		true
	}
}

/// Accepts requests for one method name.
///
/// The target name can be reset so a single instance serves repeated scans
/// without reallocating. Not meant to be shared across threads while reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodNameFilter {
	name: String,
}

impl MethodNameFilter {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into() }
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Retargets the filter, reusing its buffer.
	pub fn reset(&mut self, name: &str) {
		self.name.clear();
		self.name.push_str(name);
	}
}

impl RequestFilter for MethodNameFilter {
	fn accepts(&self, request: &Request) -> bool {
		request.method_name() == self.name
	}
}

/// Accepts requests whose method belongs to a fixed set of names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSetFilter {
	names: Vec<String>,
}

impl MethodSetFilter {
	pub fn new<I, S>(names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			names: names.into_iter().map(Into::into).collect(),
		}
	}

	pub fn contains(&self, name: &str) -> bool {
		self.names.iter().any(|n| n == name)
	}
}

impl RequestFilter for MethodSetFilter {
	fn accepts(&self, request: &Request) -> bool {
		self.contains(request.method_name())
	}
}

/// Closure-backed filter, see [`filter_fn`].
#[derive(Debug, Clone, Copy)]
pub struct FnFilter<F>(F);

/// Wraps a predicate closure as a [`RequestFilter`].
pub fn filter_fn<F>(f: F) -> FnFilter<F>
where
	F: Fn(&Request) -> bool,
{
	FnFilter(f)
}

impl<F> RequestFilter for FnFilter<F>
where
	F: Fn(&Request) -> bool,
{
	fn accepts(&self, request: &Request) -> bool {
		(self.0)(request)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::Value;

	use super::*;
	use crate::request::{BodyId, call};

	fn named(name: &str) -> Request {
		Request::builder(BodyId::new(), 1, call(name, |_: &()| Ok(Value::Null))).build()
	}

	#[test]
	fn name_filter_reset_retargets() {
		let mut filter = MethodNameFilter::new("a");
		assert!(filter.accepts(&named("a")));
		assert!(!filter.accepts(&named("b")));

		filter.reset("b");
		assert_eq!(filter.name(), "b");
		assert!(filter.accepts(&named("b")));
		assert!(!filter.accepts(&named("a")));
	}

	#[test]
	fn set_filter_matches_any_member() {
		let filter = MethodSetFilter::new(["put", "get"]);
		assert!(named("get").matches(&filter));
		assert!(named("put").matches(&filter));
		assert!(!named("del").matches(&filter));
	}

	#[test]
	fn boxed_and_closure_filters_compose() {
		let filters: Vec<Box<dyn RequestFilter>> = vec![Box::new(AcceptAll), Box::new(filter_fn(|r: &Request| r.sequence() == 1))];
		let request = named("x");
		assert!(filters.iter().all(|f| f.accepts(&request)));
	}
}
