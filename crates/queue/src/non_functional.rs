//! Secondary index of elevated non-functional requests.

use std::collections::VecDeque;

use crate::request::{Priority, Request};

/// Elevated requests tracked apart from arrival order.
///
/// Every entry is also present exactly once in the owning
/// [`RequestQueue`](crate::RequestQueue); both are only mutated under the same lock.
#[derive(Debug, Default)]
pub struct NonFunctionalRequests {
	immediate: VecDeque<Request>,
	elevated: VecDeque<Request>,
}

impl NonFunctionalRequests {
	pub fn new() -> Self {
		Self::default()
	}

	fn bucket_mut(&mut self, priority: Priority) -> Option<&mut VecDeque<Request>> {
		match priority {
			Priority::Immediate => Some(&mut self.immediate),
			Priority::Elevated => Some(&mut self.elevated),
			Priority::Normal => None,
		}
	}

	/// Indexes `request` behind its bucket. Returns false for normal priority.
	pub fn push_back(&mut self, request: Request) -> bool {
		match self.bucket_mut(request.priority()) {
			Some(bucket) => {
				bucket.push_back(request);
				true
			}
			None => false,
		}
	}

	/// Indexes `request` ahead of its bucket. Returns false for normal priority.
	pub fn push_front(&mut self, request: Request) -> bool {
		match self.bucket_mut(request.priority()) {
			Some(bucket) => {
				bucket.push_front(request);
				true
			}
			None => false,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.immediate.is_empty() && self.elevated.is_empty()
	}

	pub fn len(&self) -> usize {
		self.immediate.len() + self.elevated.len()
	}

	/// Oldest request of the highest non-empty bucket.
	pub fn oldest(&self) -> Option<&Request> {
		self.immediate.front().or_else(|| self.elevated.front())
	}

	/// Indexed requests, highest priority first.
	pub fn iter(&self) -> impl Iterator<Item = &Request> {
		self.immediate.iter().chain(self.elevated.iter())
	}

	pub fn pop_oldest(&mut self) -> Option<Request> {
		self.immediate.pop_front().or_else(|| self.elevated.pop_front())
	}

	/// Drops `request` from the index. Returns true if it was present.
	pub fn remove(&mut self, request: &Request) -> bool {
		let Some(bucket) = self.bucket_mut(request.priority()) else {
			return false;
		};
		match bucket.iter().position(|r| r.same_as(request)) {
			Some(index) => {
				bucket.remove(index);
				true
			}
			None => false,
		}
	}

	/// Empties the index, highest priority first.
	pub fn drain(&mut self) -> Vec<Request> {
		let mut drained = Vec::with_capacity(self.len());
		drained.extend(self.immediate.drain(..));
		drained.extend(self.elevated.drain(..));
		drained
	}

	pub fn clear(&mut self) {
		self.immediate.clear();
		self.elevated.clear();
	}
}

#[cfg(test)]
mod tests {
	use serde_json::Value;

	use super::*;
	use crate::request::{BodyId, call};

	fn control(name: &str, priority: Priority) -> Request {
		Request::builder(BodyId::new(), 1, call(name, |_: &()| Ok(Value::Null)))
			.non_functional(priority)
			.build()
	}

	#[test]
	fn immediate_bucket_precedes_elevated() {
		let mut index = NonFunctionalRequests::new();
		assert!(index.push_back(control("migrate", Priority::Elevated)));
		assert!(index.push_back(control("kill", Priority::Immediate)));
		assert!(!index.push_back(control("plain", Priority::Normal)));

		assert_eq!(index.len(), 2);
		assert_eq!(index.oldest().map(Request::method_name), Some("kill"));
		assert_eq!(index.pop_oldest().map(|r| r.method_name().to_owned()).as_deref(), Some("kill"));
		assert_eq!(index.pop_oldest().map(|r| r.method_name().to_owned()).as_deref(), Some("migrate"));
		assert!(index.is_empty());
	}

	#[test]
	fn remove_matches_by_identity() {
		let mut index = NonFunctionalRequests::new();
		let first = control("ping", Priority::Elevated);
		let twin = control("ping", Priority::Elevated);
		index.push_back(first.clone());

		assert!(!index.remove(&twin));
		assert!(index.remove(&first));
		assert!(index.is_empty());
	}
}
