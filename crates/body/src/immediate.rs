//! Per-receiver allow-list of methods that bypass the queue.

use aorta_queue::Request;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Method name prefix that terminates the receiving body when served.
pub const TERMINATE_PREFIX: &str = "_terminate";

/// Introspection and termination methods seeded into every receiver by default.
pub const DEFAULT_IMMEDIATE_SERVICES: &[&str] = &["equals", "hash_code", "to_string", "_terminate_immediately"];

/// One immediate-service entry.
///
/// Without `parameters` any overload of `method` matches; with them only the
/// exact parameter-type signature does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImmediateService {
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub parameters: Option<Vec<String>>,
}

impl ImmediateService {
	/// Matches every signature of `method`.
	pub fn method(method: impl Into<String>) -> Self {
		Self {
			method: method.into(),
			parameters: None,
		}
	}

	/// Matches `method` with exactly these parameter types.
	pub fn with_signature<I, S>(method: impl Into<String>, parameters: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			method: method.into(),
			parameters: Some(parameters.into_iter().map(Into::into).collect()),
		}
	}

	pub fn accepts(&self, request: &Request) -> bool {
		self.method == request.method_name() && self.parameters.as_deref().is_none_or(|p| p == request.parameter_types())
	}
}

/// Methods a [`RequestReceiver`](crate::RequestReceiver) serves on arrival.
///
/// Shared by reference; registration is safe while requests are being received.
#[derive(Debug, Default)]
pub struct ImmediateServices {
	services: RwLock<Vec<ImmediateService>>,
}

impl ImmediateServices {
	/// Creates an empty allow-list.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates an allow-list holding [`DEFAULT_IMMEDIATE_SERVICES`].
	pub fn with_defaults() -> Self {
		let services = Self::new();
		for method in DEFAULT_IMMEDIATE_SERVICES {
			services.register(ImmediateService::method(*method));
		}
		services
	}

	/// Adds `service`. Returns false if the identical entry already existed.
	pub fn register(&self, service: ImmediateService) -> bool {
		let mut services = self.services.write();
		if services.contains(&service) {
			return false;
		}
		tracing::debug!(method = %service.method, parameters = ?service.parameters, "immediate.register");
		services.push(service);
		true
	}

	/// Removes entries. An entry without parameters removes every signature of
	/// its method; otherwise only the exact signature goes. Returns how many
	/// entries were removed.
	pub fn unregister(&self, service: &ImmediateService) -> usize {
		let mut services = self.services.write();
		let before = services.len();
		services.retain(|s| s.method != service.method || (service.parameters.is_some() && s.parameters != service.parameters));
		let removed = before - services.len();
		if removed > 0 {
			tracing::debug!(method = %service.method, parameters = ?service.parameters, removed, "immediate.unregister");
		}
		removed
	}

	/// True when `request` must be served on arrival.
	pub fn is_immediate(&self, request: &Request) -> bool {
		self.services.read().iter().any(|s| s.accepts(request))
	}

	pub fn contains_method(&self, method: &str) -> bool {
		self.services.read().iter().any(|s| s.method == method)
	}

	pub fn len(&self) -> usize {
		self.services.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.services.read().is_empty()
	}

	/// Snapshot of the registered entries in registration order.
	pub fn snapshot(&self) -> Vec<ImmediateService> {
		self.services.read().clone()
	}
}

impl FromIterator<ImmediateService> for ImmediateServices {
	fn from_iter<I: IntoIterator<Item = ImmediateService>>(iter: I) -> Self {
		let services = Self::new();
		for service in iter {
			services.register(service);
		}
		services
	}
}
