//! Error types for requests and serving.

use thiserror::Error;

use crate::request::RequestVariant;

/// Failure raised by the target method of a served call.
///
/// Two-way calls carry it back to the caller inside the [`Reply`](crate::Reply).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
	/// The invoked method reported an error.
	#[error("{0}")]
	Raised(String),

	/// The call was served against an object of the wrong type.
	#[error("target is not a `{expected}`")]
	TargetMismatch {
		/// Type name the call expected.
		expected: &'static str,
	},

	/// The invoked method panicked; the payload message is kept.
	#[error("method panicked: {0}")]
	Panicked(String),

	/// The body terminated before serving the call.
	#[error("body terminated before serving the call")]
	Terminated,

	/// Reply delivery failed and the original result was replaced.
	#[error("reply delivery failed: {0}")]
	Delivery(String),
}

/// Protocol misuse on a request handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
	/// Only remote requests travel forward; internal and awaited ones never leave their body.
	#[error("{variant} request `{method}` cannot be forwarded")]
	NotForwardable {
		/// Variant of the offending request.
		variant: RequestVariant,
		/// Method name of the offending request.
		method: String,
	},

	/// `resolve` called on a request that is not an awaited placeholder.
	#[error("request `{0}` is not awaited")]
	NotAwaited(String),

	/// The awaited placeholder already received its request.
	#[error("awaited request {sender}#{sequence} already resolved")]
	AlreadyResolved {
		/// Sender of the awaited request.
		sender: crate::BodyId,
		/// Sequence number of the awaited request.
		sequence: u64,
	},

	/// The supplied request does not carry the awaited identity.
	#[error("awaited request {expected_sender}#{expected_sequence} resolved with {sender}#{sequence}")]
	IdentityMismatch {
		/// Awaited sender.
		expected_sender: crate::BodyId,
		/// Awaited sequence number.
		expected_sequence: u64,
		/// Supplied sender.
		sender: crate::BodyId,
		/// Supplied sequence number.
		sequence: u64,
	},

	/// An awaited placeholder cannot stand in for another placeholder.
	#[error("awaited request cannot be resolved with another awaited request")]
	NestedAwaited,
}

/// Failure of [`Request::serve`](crate::Request::serve).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServeError {
	/// The request was already consumed by an earlier serve.
	#[error("request `{method}` #{sequence} was already served")]
	AlreadyServed {
		/// Method name.
		method: String,
		/// Sequence number.
		sequence: u64,
	},

	/// A one-way call failed; there is no reply to carry the failure.
	#[error("one-way request `{method}` failed: {source}")]
	OneWay {
		/// Method name.
		method: String,
		/// Failure raised by the target.
		#[source]
		source: CallFailure,
	},
}
