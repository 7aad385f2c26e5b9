//! Active object bodies built on [`aorta_queue`].
//!
//! A [`Body`] owns one target object, its request queue and the receiver that
//! feeds it. An [`ActiveObject`] runs the body's [`Activity`] on a dedicated
//! thread; callers reach it through a [`Proxy`] and await replies with
//! [`PendingReply`].
//!
//! * [`RequestReceiver`]: delivery boundary, serves [`ImmediateServices`] on arrival
//! * [`Service`]: oldest/youngest, filtered, flushing and barrier-aware serving
//! * [`ReplyRouter`]: [`ReplySink`] completing caller-side reply handles
//! * [`BodyConfig`]: TOML configuration of a body

pub mod activity;
pub mod body;
pub mod config;
pub mod error;
pub mod immediate;
pub mod proxy;
pub mod receiver;
pub mod reply;
pub mod service;

pub use activity::{ActiveHandle, ActiveObject, Activity, FifoActivity};
pub use body::{Body, BodyBuilder};
pub use config::BodyConfig;
pub use error::{ConfigError, DeliveryError, ReplyError, Undelivered};
pub use immediate::{DEFAULT_IMMEDIATE_SERVICES, ImmediateService, ImmediateServices, TERMINATE_PREFIX};
pub use proxy::Proxy;
pub use receiver::{Ack, RequestReceiver};
pub use reply::{PendingReply, ReplyRouter, ReplySink};
pub use service::Service;
