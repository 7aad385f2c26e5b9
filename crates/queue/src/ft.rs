//! Fault-tolerance interception point on enqueue.

use crate::request::Request;

/// Acknowledgement token returned by enqueue operations.
///
/// The value is opaque to the queue: a fault-tolerance layer assigns it, and the
/// queue passes it through to whoever delivered the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FtToken(pub i32);

impl FtToken {
	/// Token returned when no fault-tolerance layer is installed.
	pub const NON_FT: Self = Self(0);
}

impl Default for FtToken {
	fn default() -> Self {
		Self::NON_FT
	}
}

/// Hook run on every request before it is enqueued.
///
/// May mark the request ignored (duplicate suppression); ignored requests are
/// dropped without being queued or served.
pub trait FaultTolerance: Send + Sync {
	fn on_receive(&self, request: &Request) -> FtToken;
}
