//! Error types for delivery, replies and configuration.

use std::path::PathBuf;

use aorta_queue::{BodyId, Reply, RequestError};
use thiserror::Error;

/// Caller-side failure to hand a request to a body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
	/// The request may not leave the body that created it.
	#[error(transparent)]
	Request(#[from] RequestError),

	/// The receiving body refused the request (terminated, or the immediate
	/// service failed).
	#[error("body {body} refused request `{method}`")]
	Refused {
		/// Receiving body.
		body: BodyId,
		/// Method name of the refused request.
		method: String,
	},
}

/// Failure to route or await a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
	/// No caller registered interest in this reply.
	#[error("no caller is waiting for reply {sender}#{sequence}")]
	NoPendingCaller {
		/// Caller the reply is addressed to.
		sender: BodyId,
		/// Sequence number of the answered request.
		sequence: u64,
	},

	/// The caller dropped its pending reply before the reply arrived.
	#[error("caller of {sender}#{sequence} went away")]
	CallerGone {
		/// Caller the reply is addressed to.
		sender: BodyId,
		/// Sequence number of the answered request.
		sequence: u64,
	},

	/// The reply route was dropped without a reply being sent.
	#[error("reply for {sender}#{sequence} was never sent")]
	Abandoned {
		/// Caller the reply is addressed to.
		sender: BodyId,
		/// Sequence number of the answered request.
		sequence: u64,
	},
}

/// A reply that could not be delivered, handed back to the sender.
#[derive(Debug, Error)]
#[error("reply {}#{} undelivered: {error}", .reply.sender(), .reply.sequence())]
pub struct Undelivered {
	/// The reply, unchanged.
	pub reply: Reply,
	/// Why delivery failed.
	#[source]
	pub error: ReplyError,
}

/// Errors that can occur when loading a body configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// The configuration is not valid TOML for [`BodyConfig`](crate::BodyConfig).
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// An immediate service entry names no method.
	#[error("immediate service #{index} has an empty method name")]
	EmptyMethodName {
		/// Position of the entry in `immediate_services`.
		index: usize,
	},

	/// The thread name prefix cannot be used for OS thread names.
	#[error("thread name prefix must not contain NUL bytes")]
	InvalidThreadName,
}
