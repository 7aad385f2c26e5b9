//! Per-object request queue for active objects.
//!
//! Every active object owns exactly one [`BlockingRequestQueue`]. Producers (any
//! thread delivering a request) append to it; the object's single service thread
//! pulls the next servable request with one of the blocking-remove operations.
//!
//! * [`Request`]: reified method invocation plus sender identity and priority tag
//! * [`RequestFilter`]: predicate used to select requests without removing others
//! * [`RequestQueue`]: unsynchronized ordered storage with the non-functional index
//! * [`BlockingRequestQueue`]: monitor-style blocking layer (timeouts, suspension,
//!   method barriers, destruction)

pub mod barrier;
pub mod blocking;
pub mod error;
pub mod event;
pub mod filter;
pub mod ft;
pub mod non_functional;
pub mod queue;
pub mod request;

pub use barrier::{BarrierCoordinator, LocalBarrierCoordinator, MethodBarrier};
pub use blocking::{BlockingRequestQueue, BlockingRequestQueueBuilder};
pub use error::{CallFailure, RequestError, ServeError};
pub use event::{BroadcastObserver, QueueEvent, QueueObserver, TracingObserver};
pub use filter::{AcceptAll, FnFilter, MethodNameFilter, MethodSetFilter, RequestFilter, filter_fn};
pub use ft::{FaultTolerance, FtToken};
pub use non_functional::NonFunctionalRequests;
pub use queue::{ProcessVerdict, ProcessedRequests, RequestExecutor, RequestProcessor, RequestQueue};
pub use request::{
	ActiveTarget, Arrival, BodyId, Caller, FnCall, MethodCall, Priority, Reply, Request, RequestBuilder, RequestVariant, call,
};
